use thiserror::Error;
use wrt_api::WrtApiError;

#[derive(Error, Debug)]
pub enum PanelError {
    #[error(transparent)]
    Api(#[from] WrtApiError),
    #[error("{0}")]
    Validation(String),
    #[error("cancelled by user")]
    Cancelled,
    #[error("unknown action {0}")]
    UnknownAction(String),
    #[error("module {0} is not available")]
    ModuleUnavailable(String),
    #[error("Failed due to reason: {0}")]
    ReasonError(String),
}

pub type PanelResult<T> = std::result::Result<T, PanelError>;

impl From<ubus_rpc::RPCErrors> for PanelError {
    fn from(err: ubus_rpc::RPCErrors) -> Self {
        PanelError::Api(WrtApiError::Rpc(err))
    }
}

pub(crate) fn validation<T>(message: &str) -> PanelResult<T> {
    Err(PanelError::Validation(message.to_string()))
}
