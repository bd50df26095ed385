mod client;
mod config;
mod error;
mod features;
mod file;
mod session;
mod storage;
mod uci;

pub use client::*;
pub use config::*;
pub use error::*;
pub use features::*;
pub use file::*;
pub use session::*;
pub use storage::*;
pub use uci::*;

use std::sync::Arc;
use ubus_rpc::UbusRpc;

/// Client over the real HTTP endpoint named by the config.
pub fn connect_router(config: &PanelConfig) -> WrtResult<Arc<RouterClient>> {
    let transport = UbusRpc::new(&config.endpoint, config.request_timeout())?;
    log::info!("router client is created, endpoint:{}", config.endpoint);
    Ok(Arc::new(RouterClient::new(Arc::new(transport))))
}
