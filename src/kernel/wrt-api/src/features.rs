use log::*;
use serde_json::{Map, Value};

use crate::RouterClient;

pub const DEFAULT_FEATURES: &[&str] = &[
    "dashboard",
    "network",
    "wireless",
    "firewall",
    "dhcp",
    "dns",
    "wireguard",
    "qos",
    "ddns",
    "diagnostics",
    "system",
    "backup",
    "packages",
    "services",
    "ssh_keys",
    "storage",
    "leds",
    "firmware",
];

/// Features a module depends on; the module loads if any one is enabled.
pub fn module_features(module: &str) -> &'static [&'static str] {
    match module {
        "dashboard" => &["dashboard"],
        "network" => &["network", "wireless", "firewall", "dhcp", "dns", "diagnostics"],
        "system" => &[
            "system", "backup", "packages", "services", "ssh_keys", "storage", "leds", "firmware",
        ],
        "vpn" => &["wireguard"],
        "services" => &["qos", "ddns"],
        _ => &[],
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeatureFlags {
    values: Map<String, Value>,
}

impl FeatureFlags {
    pub fn from_values(values: Map<String, Value>) -> Self {
        FeatureFlags { values }
    }

    pub fn defaults() -> Self {
        let values = DEFAULT_FEATURES
            .iter()
            .map(|name| (name.to_string(), Value::String("1".to_string())))
            .collect();
        FeatureFlags { values }
    }

    /// Reads `based.features`. Any failure or an empty section falls back to the defaults.
    pub async fn load(client: &RouterClient) -> Self {
        match client.call("uci", "get", serde_json::json!({"config": "based", "section": "features"})).await {
            Ok(reply) if reply.status == 0 => {
                let values = reply
                    .payload
                    .get("values")
                    .and_then(|v| v.as_object())
                    .filter(|v| !v.is_empty())
                    .cloned();
                match values {
                    Some(values) => FeatureFlags::from_values(values),
                    None => FeatureFlags::defaults(),
                }
            }
            Ok(reply) => {
                info!("feature config status {}, using defaults", reply.status);
                FeatureFlags::defaults()
            }
            Err(err) => {
                error!("Feature config not found, using defaults: {}", err);
                FeatureFlags::defaults()
            }
        }
    }

    /// Only the string "1" counts as enabled.
    pub fn is_enabled(&self, name: &str) -> bool {
        matches!(self.values.get(name), Some(Value::String(v)) if v == "1")
    }

    pub fn should_load_module(&self, module: &str) -> bool {
        module_features(module).iter().any(|f| self.is_enabled(f))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;
    use ubus_rpc::{MockUbus, RPCErrors};

    #[test]
    fn test_only_string_one_is_enabled() {
        let values = json!({"network": "1", "wireless": true, "dhcp": 1, "dns": "0", "qos": "yes"});
        let flags = FeatureFlags::from_values(values.as_object().cloned().unwrap());
        assert!(flags.is_enabled("network"));
        for name in ["wireless", "dhcp", "dns", "qos", "unknown", ""] {
            assert!(!flags.is_enabled(name), "{} should be disabled", name);
        }
    }

    #[test]
    fn test_module_gate() {
        let values = json!({"ddns": "1"});
        let flags = FeatureFlags::from_values(values.as_object().cloned().unwrap());
        assert!(flags.should_load_module("services"));
        assert!(!flags.should_load_module("vpn"));
        assert!(!flags.should_load_module("nonsense"));
        assert!(FeatureFlags::defaults().should_load_module("system"));
    }

    #[tokio::test]
    async fn test_load_fallbacks() {
        let mock = Arc::new(MockUbus::new());
        let client = RouterClient::new(mock.clone());

        mock.fail("uci", "get", RPCErrors::Protocol("Not found".to_string()));
        assert_eq!(FeatureFlags::load(&client).await, FeatureFlags::defaults());

        mock.on("uci", "get", json!({"values": {}}));
        assert_eq!(FeatureFlags::load(&client).await, FeatureFlags::defaults());

        mock.on("uci", "get", json!({"values": {".type": "features", "dashboard": "1", "vpn": "0"}}));
        let flags = FeatureFlags::load(&client).await;
        assert!(flags.is_enabled("dashboard"));
        assert!(!flags.is_enabled("network"));
    }
}
