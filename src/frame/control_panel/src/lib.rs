mod chart;
mod context;
mod document;
mod error;
mod format;
mod forms;
mod module;
pub mod modules;

pub use chart::*;
pub use context::*;
pub use document::*;
pub use error::*;
pub use format::*;
pub use forms::*;
pub use module::*;

pub use wrt_api::{
    connect_router, load_panel_config, ClientStorage, FeatureFlags, FileStorage, MemoryStorage, PanelConfig,
    RouterClient,
};
