use log::*;
use serde_json::Value;
use std::sync::{Arc, RwLock};
use ubus_rpc::{CallOptions, UbusReply, UbusTransport, UBUS_NULL_SESSION};

use crate::{WrtApiError, WrtResult};

pub trait ReplyExt {
    /// Payload of a status-0 reply, `WrtApiError::Status` otherwise.
    fn into_payload(self, object: &str, method: &str) -> WrtResult<Value>;
}

impl ReplyExt for UbusReply {
    fn into_payload(self, object: &str, method: &str) -> WrtResult<Value> {
        if self.status != 0 {
            return Err(WrtApiError::status(object, method, self.status));
        }
        Ok(self.payload)
    }
}

/// Every call to the router goes through here. The client attaches the
/// current session token and returns the raw `[status, payload]` reply.
pub struct RouterClient {
    transport: Arc<dyn UbusTransport>,
    session_token: RwLock<Option<String>>,
}

impl RouterClient {
    pub fn new(transport: Arc<dyn UbusTransport>) -> Self {
        RouterClient {
            transport,
            session_token: RwLock::new(None),
        }
    }

    pub fn session_token(&self) -> Option<String> {
        self.session_token.read().ok().and_then(|t| t.clone())
    }

    pub fn set_session_token(&self, token: &str) {
        if let Ok(mut guard) = self.session_token.write() {
            *guard = Some(token.to_string());
        }
    }

    pub fn clear_session_token(&self) {
        if let Ok(mut guard) = self.session_token.write() {
            *guard = None;
        }
    }

    pub fn has_session(&self) -> bool {
        self.session_token().is_some()
    }

    pub async fn call(&self, object: &str, method: &str, params: Value) -> WrtResult<UbusReply> {
        self.call_with_options(object, method, params, &CallOptions::default())
            .await
    }

    pub async fn call_with_options(
        &self,
        object: &str,
        method: &str,
        params: Value,
        options: &CallOptions,
    ) -> WrtResult<UbusReply> {
        let session = self
            .session_token()
            .unwrap_or_else(|| UBUS_NULL_SESSION.to_string());
        let reply = self
            .transport
            .call(&session, object, method, params, options)
            .await
            .map_err(|err| {
                warn!("ubus {}.{} failed: {}", object, method, err);
                WrtApiError::Rpc(err)
            })?;
        if reply.status != 0 {
            debug!("ubus {}.{} status {}", object, method, reply.status);
        }
        Ok(reply)
    }

    /// Login always goes out with the null session, whatever token is held.
    pub async fn call_anonymous(&self, object: &str, method: &str, params: Value) -> WrtResult<UbusReply> {
        let reply = self
            .transport
            .call(UBUS_NULL_SESSION, object, method, params, &CallOptions::default())
            .await?;
        Ok(reply)
    }
}
