//! Feature modules. Each one is built lazily by its factory and registers
//! its own routes on the context.

pub mod dashboard;
pub mod network;
pub mod services;
pub mod system;
pub mod vpn;

use std::collections::HashMap;

use crate::{validation, AppContext, FormData, ModuleFactory, PanelResult};

pub fn default_factories() -> HashMap<&'static str, ModuleFactory> {
    let mut factories: HashMap<&'static str, ModuleFactory> = HashMap::new();
    factories.insert("dashboard", dashboard::create);
    factories.insert("network", network::create);
    factories.insert("system", system::create);
    factories.insert("vpn", vpn::create);
    factories.insert("services", services::create);
    factories
}

/// Row id of a row action, rejected when empty.
pub(crate) fn require_id(id: Option<&str>) -> PanelResult<&str> {
    match id.map(str::trim) {
        Some(id) if !id.is_empty() => Ok(id),
        _ => validation("No item selected"),
    }
}

/// Tab from the sub path, or `default` when there is none.
pub(crate) fn sub_tab<'a>(sub_paths: &'a [String], default: &'a str) -> &'a str {
    sub_paths.first().map(|s| s.as_str()).unwrap_or(default)
}

/// Submitted `key`, else the current value of the page input `input`. Trimmed.
pub(crate) fn input_value(ctx: &AppContext, form: &FormData, key: &str, input: &str) -> String {
    match form.get(key) {
        Some(v) => v.trim().to_string(),
        None => ctx.with_doc(|d| d.value(input).trim().to_string()),
    }
}
