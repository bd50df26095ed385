mod mock;
mod protocol;

pub use mock::*;
pub use protocol::*;

use async_trait::async_trait;
use log::*;
use reqwest::{Client, ClientBuilder};
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use thiserror::Error;

pub const DEFAULT_UBUS_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RPCErrors {
    #[error("transport failed: {0}")]
    Transport(String),
    #[error("ubus error: {0}")]
    Protocol(String),
    #[error("parse response error: {0}")]
    ParseResponseError(String),
    #[error("Failed due to reason: {0}")]
    ReasonError(String),
}

pub type Result<T> = std::result::Result<T, RPCErrors>;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CallOptions {
    // overrides the client timeout for slow calls (sysupgrade, traceroute...)
    pub timeout: Option<Duration>,
}

impl CallOptions {
    pub fn with_timeout(timeout: Duration) -> Self {
        CallOptions { timeout: Some(timeout) }
    }
}

#[async_trait]
pub trait UbusTransport: Send + Sync {
    async fn call(
        &self,
        session: &str,
        object: &str,
        method: &str,
        params: Value,
        options: &CallOptions,
    ) -> Result<UbusReply>;
}

/// HTTP POST json transport against rpcd's `/ubus` endpoint.
pub struct UbusRpc {
    client: Client,
    server_url: String,
    seq: AtomicU64,
}

impl UbusRpc {
    pub fn new(url: &str, timeout: Duration) -> Result<Self> {
        let seed = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);

        let client = ClientBuilder::new()
            .tcp_keepalive(Some(Duration::from_secs(60)))
            .pool_max_idle_per_host(10)
            .timeout(timeout)
            .build()
            .map_err(|err| RPCErrors::ReasonError(format!("build http client failed: {}", err)))?;

        Ok(UbusRpc {
            client,
            server_url: url.to_string(),
            seq: AtomicU64::new(seed),
        })
    }

    pub fn server_url(&self) -> &str {
        self.server_url.as_str()
    }

    fn next_id(&self) -> u64 {
        self.seq.fetch_add(1, Ordering::Relaxed) + 1
    }
}

#[async_trait]
impl UbusTransport for UbusRpc {
    async fn call(
        &self,
        session: &str,
        object: &str,
        method: &str,
        params: Value,
        options: &CallOptions,
    ) -> Result<UbusReply> {
        let request = UbusRequest::new(self.next_id(), session, object, method, params);
        debug!("ubus call #{} {}.{}", request.id, object, method);

        let mut builder = self.client.post(&self.server_url).json(&request);
        if let Some(timeout) = options.timeout {
            builder = builder.timeout(timeout);
        }

        let response = builder
            .send()
            .await
            .map_err(|err| RPCErrors::Transport(format!("{}", err)))?;

        if !response.status().is_success() {
            return Err(RPCErrors::Transport(format!(
                "{}.{} http status {}",
                object,
                method,
                response.status()
            )));
        }

        let envelope: UbusResponse = response
            .json()
            .await
            .map_err(|err| RPCErrors::ParseResponseError(format!("{}", err)))?;
        envelope.into_reply()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use warp::Filter;

    #[tokio::test]
    async fn test_call_over_http() {
        let _ = env_logger::builder().is_test(true).try_init();

        let route = warp::post()
            .and(warp::path("ubus"))
            .and(warp::body::json())
            .map(|req: UbusRequest| {
                let resp = match (req.object.as_str(), req.method.as_str()) {
                    ("session", "login") if req.session == UBUS_NULL_SESSION => UbusResponse::success(
                        req.id,
                        json!([0, {"ubus_rpc_session": "feedface"}]),
                    ),
                    ("system", "info") if req.session == "feedface" => {
                        UbusResponse::success(req.id, json!([0, {"uptime": 90061}]))
                    }
                    _ => UbusResponse::failed(req.id, "Access denied"),
                };
                warp::reply::json(&resp)
            });
        let (addr, server) = warp::serve(route).bind_ephemeral(([127, 0, 0, 1], 0));
        tokio::spawn(server);

        let rpc = UbusRpc::new(&format!("http://{}/ubus", addr), DEFAULT_UBUS_TIMEOUT).unwrap();
        let opts = CallOptions::default();

        let reply = rpc
            .call(UBUS_NULL_SESSION, "session", "login", json!({"username": "root"}), &opts)
            .await
            .unwrap();
        assert_eq!(reply.status, 0);
        assert_eq!(reply.payload["ubus_rpc_session"], "feedface");

        let reply = rpc
            .call("feedface", "system", "info", json!({}), &CallOptions::with_timeout(Duration::from_secs(5)))
            .await
            .unwrap();
        assert_eq!(reply.payload["uptime"], 90061);

        let err = rpc.call("bogus", "system", "info", json!({}), &opts).await.unwrap_err();
        assert_eq!(err, RPCErrors::Protocol("Access denied".to_string()));
    }

    #[tokio::test]
    async fn test_transport_failure() {
        // nothing listens on port 9 of loopback
        let rpc = UbusRpc::new("http://127.0.0.1:9/ubus", Duration::from_secs(2)).unwrap();
        let err = rpc
            .call(UBUS_NULL_SESSION, "session", "access", json!({}), &CallOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, RPCErrors::Transport(_)));
    }

    #[test]
    fn test_ids_increase() {
        let rpc = UbusRpc::new("http://127.0.0.1/ubus", DEFAULT_UBUS_TIMEOUT).unwrap();
        let a = rpc.next_id();
        let b = rpc.next_id();
        assert!(b > a);
    }
}
