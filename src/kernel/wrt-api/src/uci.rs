use log::*;
use serde_json::{json, Map, Value};

use crate::{ReplyExt, RouterClient, WrtResult};

/// One named, typed record of a UCI config.
#[derive(Debug, Clone, PartialEq)]
pub struct UciSection {
    pub name: String,
    pub section_type: String,
    pub anonymous: bool,
    pub index: i64,
    pub values: Map<String, Value>,
}

impl UciSection {
    pub fn from_value(name: &str, value: &Value) -> Option<Self> {
        let obj = value.as_object()?;
        let section_type = obj.get(".type").and_then(|t| t.as_str()).unwrap_or("").to_string();
        let index = obj.get(".index").and_then(|i| i.as_i64()).unwrap_or(i64::MAX);
        let anonymous = obj.get(".anonymous").and_then(|a| a.as_bool()).unwrap_or(false);
        let name = obj
            .get(".name")
            .and_then(|n| n.as_str())
            .unwrap_or(name)
            .to_string();
        Some(UciSection {
            name,
            section_type,
            anonymous,
            index,
            values: obj.clone(),
        })
    }

    /// Option as text. Lists are joined by a space.
    pub fn get(&self, option: &str) -> Option<String> {
        match self.values.get(option)? {
            Value::String(s) => Some(s.clone()),
            Value::Array(items) => Some(
                items
                    .iter()
                    .filter_map(|i| i.as_str())
                    .collect::<Vec<_>>()
                    .join(" "),
            ),
            Value::Null => None,
            other => Some(other.to_string()),
        }
    }

    pub fn get_or(&self, option: &str, default: &str) -> String {
        self.get(option).unwrap_or_else(|| default.to_string())
    }

    pub fn is(&self, option: &str, expected: &str) -> bool {
        self.get(option).as_deref() == Some(expected)
    }
}

/// Sections of a `uci get` payload (`{"values": {name: {...}}}`) in config order.
pub fn parse_uci_sections(payload: &Value) -> Vec<UciSection> {
    let mut sections: Vec<UciSection> = payload
        .get("values")
        .and_then(|v| v.as_object())
        .map(|values| {
            values
                .iter()
                .filter_map(|(name, value)| UciSection::from_value(name, value))
                .collect()
        })
        .unwrap_or_default();
    sections.sort_by_key(|s| s.index);
    sections
}

impl RouterClient {
    pub async fn uci_get(&self, config: &str, section: Option<&str>) -> WrtResult<Value> {
        let mut params = json!({ "config": config });
        if let Some(section) = section {
            params["section"] = json!(section);
        }
        self.call("uci", "get", params).await?.into_payload("uci", "get")
    }

    pub async fn uci_sections(&self, config: &str) -> WrtResult<Vec<UciSection>> {
        let payload = self.uci_get(config, None).await?;
        Ok(parse_uci_sections(&payload))
    }

    pub async fn uci_sections_of_type(&self, config: &str, section_type: &str) -> WrtResult<Vec<UciSection>> {
        let sections = self.uci_sections(config).await?;
        Ok(sections
            .into_iter()
            .filter(|s| s.section_type == section_type)
            .collect())
    }

    pub async fn uci_section(&self, config: &str, section: &str) -> WrtResult<UciSection> {
        let payload = self.uci_get(config, Some(section)).await?;
        let values = payload.get("values").cloned().unwrap_or(Value::Null);
        UciSection::from_value(section, &values)
            .ok_or_else(|| crate::WrtApiError::ReasonError(format!("{}.{} has no values", config, section)))
    }

    pub async fn uci_set(&self, config: &str, section: &str, values: Value) -> WrtResult<()> {
        self.call("uci", "set", json!({ "config": config, "section": section, "values": values }))
            .await?
            .into_payload("uci", "set")?;
        Ok(())
    }

    /// Returns the name of the new section (generated by uci when `name` is None).
    pub async fn uci_add(
        &self,
        config: &str,
        section_type: &str,
        name: Option<&str>,
        values: Value,
    ) -> WrtResult<String> {
        let mut params = json!({ "config": config, "type": section_type, "values": values });
        if let Some(name) = name {
            params["name"] = json!(name);
        }
        let payload = self.call("uci", "add", params).await?.into_payload("uci", "add")?;
        let created = payload
            .get("section")
            .and_then(|s| s.as_str())
            .map(|s| s.to_string())
            .or_else(|| name.map(|n| n.to_string()))
            .unwrap_or_default();
        debug!("uci add {}.{} => {}", config, section_type, created);
        Ok(created)
    }

    pub async fn uci_delete(&self, config: &str, section: &str) -> WrtResult<()> {
        self.call("uci", "delete", json!({ "config": config, "section": section }))
            .await?
            .into_payload("uci", "delete")?;
        Ok(())
    }

    pub async fn uci_commit(&self, config: &str) -> WrtResult<()> {
        self.call("uci", "commit", json!({ "config": config }))
            .await?
            .into_payload("uci", "commit")?;
        Ok(())
    }

    pub async fn service_reload(&self, service: &str) -> WrtResult<()> {
        self.init_script(service, "reload").await
    }

    pub async fn init_script(&self, service: &str, action: &str) -> WrtResult<()> {
        let command = format!("/etc/init.d/{}", service);
        self.file_exec(&command, &[action], None).await?;
        Ok(())
    }

    /// commit then reload, in that order. A failed commit skips the reload.
    pub async fn apply_changes(&self, config: &str, service: &str) -> WrtResult<()> {
        self.uci_commit(config).await?;
        self.service_reload(service).await?;
        info!("applied {} and reloaded {}", config, service);
        Ok(())
    }
}
