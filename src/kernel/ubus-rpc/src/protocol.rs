use serde::de::Error as _;
use serde::ser::SerializeStruct;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{RPCErrors, Result};

pub const JSONRPC_VERSION: &str = "2.0";

// rpcd only understands "call" (and "list", which we never use)
pub const UBUS_METHOD_CALL: &str = "call";

/// Session id rpcd accepts from anonymous callers; only `session.login` works with it.
pub const UBUS_NULL_SESSION: &str = "00000000000000000000000000000000";

/// rpcd status for a missing object, method or file.
pub const UBUS_STATUS_NOT_FOUND: i64 = 4;

#[derive(Debug, Clone, PartialEq)]
pub struct UbusRequest {
    pub id: u64,
    pub session: String,
    pub object: String,
    pub method: String,
    pub params: Value,
}

impl UbusRequest {
    pub fn new(id: u64, session: &str, object: &str, method: &str, params: Value) -> Self {
        UbusRequest {
            id,
            session: session.to_string(),
            object: object.to_string(),
            method: method.to_string(),
            params,
        }
    }
}

impl Serialize for UbusRequest {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let params = if self.params.is_null() {
            Value::Object(Default::default())
        } else {
            self.params.clone()
        };
        let mut state = serializer.serialize_struct("UbusRequest", 4)?;
        state.serialize_field("jsonrpc", JSONRPC_VERSION)?;
        state.serialize_field("id", &self.id)?;
        state.serialize_field("method", UBUS_METHOD_CALL)?;
        state.serialize_field(
            "params",
            &serde_json::json!([self.session, self.object, self.method, params]),
        )?;
        state.end()
    }
}

impl<'de> Deserialize<'de> for UbusRequest {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let v = Value::deserialize(deserializer)?;
        let method = v
            .get("method")
            .and_then(|m| m.as_str())
            .ok_or_else(|| D::Error::missing_field("method"))?;
        if method != UBUS_METHOD_CALL {
            return Err(D::Error::custom(format!("unsupported method {}", method)));
        }
        let id = v.get("id").and_then(|id| id.as_u64()).unwrap_or(0);
        let params = v
            .get("params")
            .and_then(|p| p.as_array())
            .ok_or_else(|| D::Error::custom("params is not array"))?;
        if params.len() < 3 {
            return Err(D::Error::custom("params too short"));
        }
        let text_at = |idx: usize, name: &str| -> std::result::Result<String, D::Error> {
            params[idx]
                .as_str()
                .map(|s| s.to_string())
                .ok_or_else(|| D::Error::custom(format!("params[{}] {} is not string", idx, name)))
        };

        Ok(UbusRequest {
            id,
            session: text_at(0, "session")?,
            object: text_at(1, "object")?,
            method: text_at(2, "method")?,
            params: params.get(3).cloned().unwrap_or(Value::Null),
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum UbusResult {
    Success(Value),
    Failed(String),
}

/// The json-rpc envelope. `Failed` carries `error.message`.
#[derive(Debug, Clone, PartialEq)]
pub struct UbusResponse {
    pub id: u64,
    pub result: UbusResult,
}

impl UbusResponse {
    pub fn success(id: u64, result: Value) -> Self {
        UbusResponse { id, result: UbusResult::Success(result) }
    }

    pub fn failed(id: u64, message: &str) -> Self {
        UbusResponse { id, result: UbusResult::Failed(message.to_string()) }
    }

    pub fn into_reply(self) -> Result<UbusReply> {
        match self.result {
            UbusResult::Success(value) => UbusReply::from_value(value),
            UbusResult::Failed(message) => Err(RPCErrors::Protocol(message)),
        }
    }
}

impl Serialize for UbusResponse {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let mut state = serializer.serialize_struct("UbusResponse", 3)?;
        state.serialize_field("jsonrpc", JSONRPC_VERSION)?;
        state.serialize_field("id", &self.id)?;
        match &self.result {
            UbusResult::Success(value) => state.serialize_field("result", value)?,
            UbusResult::Failed(message) => state.serialize_field(
                "error",
                &serde_json::json!({"code": -32000, "message": message}),
            )?,
        }
        state.end()
    }
}

impl<'de> Deserialize<'de> for UbusResponse {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let v = Value::deserialize(deserializer)?;
        let id = v.get("id").and_then(|id| id.as_u64()).unwrap_or(0);
        if let Some(error) = v.get("error") {
            let message = error
                .get("message")
                .and_then(|m| m.as_str())
                .unwrap_or("ubus call failed");
            return Ok(UbusResponse::failed(id, message));
        }
        let result = v.get("result").cloned().unwrap_or(Value::Null);
        Ok(UbusResponse::success(id, result))
    }
}

/// `result = [status, payload]`. Status 0 is success; callers check it themselves.
#[derive(Debug, Clone, PartialEq)]
pub struct UbusReply {
    pub status: i64,
    pub payload: Value,
}

impl UbusReply {
    pub fn new(status: i64, payload: Value) -> Self {
        UbusReply { status, payload }
    }

    pub fn ok(payload: Value) -> Self {
        UbusReply { status: 0, payload }
    }

    pub fn from_value(value: Value) -> Result<Self> {
        let items = value.as_array().ok_or_else(|| {
            RPCErrors::ParseResponseError(format!("result is not an array: {}", value))
        })?;
        let status = items
            .first()
            .and_then(|s| s.as_i64())
            .ok_or_else(|| RPCErrors::ParseResponseError("result[0] status is not a number".to_string()))?;
        let payload = items.get(1).cloned().unwrap_or(Value::Null);
        Ok(UbusReply { status, payload })
    }

    pub fn to_value(&self) -> Value {
        if self.payload.is_null() {
            serde_json::json!([self.status])
        } else {
            serde_json::json!([self.status, self.payload])
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_envelope() {
        let req = UbusRequest::new(7, "abc", "uci", "get", json!({"config": "network"}));
        let encoded = serde_json::to_value(&req).unwrap();
        assert_eq!(
            encoded,
            json!({
                "jsonrpc": "2.0",
                "id": 7,
                "method": "call",
                "params": ["abc", "uci", "get", {"config": "network"}]
            })
        );

        let decoded: UbusRequest = serde_json::from_value(encoded).unwrap();
        assert_eq!(decoded, req);
    }

    #[test]
    fn test_null_params_become_empty_object() {
        let req = UbusRequest::new(1, "abc", "system", "info", Value::Null);
        let encoded = serde_json::to_value(&req).unwrap();
        assert_eq!(encoded["params"][3], json!({}));
    }

    #[test]
    fn test_error_envelope() {
        let resp: UbusResponse =
            serde_json::from_value(json!({"jsonrpc": "2.0", "id": 1, "error": {"code": -32002, "message": "Access denied"}}))
                .unwrap();
        assert_eq!(resp.result, UbusResult::Failed("Access denied".to_string()));
        match resp.into_reply() {
            Err(RPCErrors::Protocol(msg)) => assert_eq!(msg, "Access denied"),
            other => panic!("unexpected {:?}", other),
        }

        let resp: UbusResponse = serde_json::from_value(json!({"id": 1, "error": {}})).unwrap();
        assert_eq!(resp.result, UbusResult::Failed("ubus call failed".to_string()));
    }

    #[test]
    fn test_reply_shapes() {
        let reply = UbusReply::from_value(json!([0, {"uptime": 5}])).unwrap();
        assert!(reply.is_ok());
        assert_eq!(reply.payload["uptime"], 5);

        let reply = UbusReply::from_value(json!([6])).unwrap();
        assert_eq!(reply.status, 6);
        assert!(reply.payload.is_null());
        assert!(!reply.is_ok());

        assert!(matches!(
            UbusReply::from_value(json!({"status": 0})),
            Err(RPCErrors::ParseResponseError(_))
        ));
    }
}
