mod path;
mod time;
mod log_util;
pub use path::*;
pub use time::*;
pub use log_util::*;
