use thiserror::Error;
use ubus_rpc::{RPCErrors, UBUS_STATUS_NOT_FOUND};

#[derive(Error, Debug)]
pub enum WrtApiError {
    #[error("rpc failed: {0}")]
    Rpc(#[from] RPCErrors),
    #[error("{object}.{method} returned status {code}")]
    Status {
        object: String,
        method: String,
        code: i64,
    },
    #[error("Login failed")]
    LoginFailed,
    #[error("{0}")]
    Validation(String),
    #[error("storage error: {0}")]
    Storage(String),
    #[error("config error: {0}")]
    Config(String),
    #[error("Failed due to reason: {0}")]
    ReasonError(String),
}

pub type WrtResult<T> = std::result::Result<T, WrtApiError>;

impl WrtApiError {
    pub fn status(object: &str, method: &str, code: i64) -> Self {
        WrtApiError::Status {
            object: object.to_string(),
            method: method.to_string(),
            code,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, WrtApiError::Status { code, .. } if *code == UBUS_STATUS_NOT_FOUND)
    }
}
