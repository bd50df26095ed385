use regex::Regex;
use std::collections::BTreeMap;
use std::sync::LazyLock;

use crate::document::{form_field_id, Document};

static MAC_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([0-9A-Fa-f]{2}[:-]){5}([0-9A-Fa-f]{2})$").unwrap());
static SERVICE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_-]+$").unwrap());
static HOST_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[A-Za-z0-9.:_-]+$").unwrap());

const PASSWORD_FORBIDDEN: &[char] = &[
    '`', '$', '"', '\'', '\\', ';', '&', '|', '<', '>', '(', ')', '{', '}', '[', ']', '\n', '\r',
];

/// Submitted form fields, keyed by field name (`src_dport`, `ssid`, ...).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FormData {
    fields: BTreeMap<String, String>,
}

impl FormData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: &str, value: &str) -> Self {
        self.set(key, value);
        self
    }

    pub fn set(&mut self, key: &str, value: &str) {
        self.fields.insert(key.to_string(), value.to_string());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields.get(key).map(|v| v.as_str())
    }

    /// Trimmed value, empty when missing.
    pub fn text(&self, key: &str) -> String {
        self.get(key).map(|v| v.trim().to_string()).unwrap_or_default()
    }

    pub fn text_or(&self, key: &str, default: &str) -> String {
        let v = self.text(key);
        if v.is_empty() {
            default.to_string()
        } else {
            v
        }
    }

    /// Raw value, not trimmed (passwords).
    pub fn raw(&self, key: &str) -> String {
        self.get(key).unwrap_or("").to_string()
    }

    pub fn flag(&self, key: &str) -> bool {
        matches!(self.text(key).as_str(), "1" | "true" | "on" | "yes")
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Parses `key=value` words as typed on the command line.
    pub fn parse_pairs<'a, I>(pairs: I) -> Self
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut form = FormData::new();
        for pair in pairs {
            if let Some((k, v)) = pair.split_once('=') {
                form.set(k.trim(), v);
            }
        }
        form
    }

    /// Fields of a modal: submitted values win, the rest come from the
    /// `edit-<prefix>-<field>` inputs as last filled.
    pub fn merged_with_modal(&self, doc: &Document, prefix: &str, fields: &[&str]) -> FormData {
        let mut merged = FormData::new();
        for field in fields {
            let value = match self.get(field) {
                Some(v) => v.to_string(),
                None => doc.value(&form_field_id(prefix, field)).to_string(),
            };
            merged.set(field, &value);
        }
        merged
    }
}

pub fn is_valid_mac(mac: &str) -> bool {
    MAC_RE.is_match(mac)
}

pub fn is_valid_service_name(name: &str) -> bool {
    SERVICE_RE.is_match(name)
}

/// Host names and addresses only; anything else would end up as a command argument.
pub fn is_valid_host(host: &str) -> bool {
    !host.starts_with('-') && HOST_RE.is_match(host)
}

pub fn password_has_forbidden_chars(password: &str) -> bool {
    password.chars().any(|c| PASSWORD_FORBIDDEN.contains(&c))
}
