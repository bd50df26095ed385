use std::collections::{BTreeMap, BTreeSet, HashMap};
use wrt_api::FeatureFlags;
use wrt_kit::wrt_get_unix_timestamp;

pub const HIDDEN_CLASS: &str = "hidden";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToastKind {
    Info,
    Success,
    Error,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Toast {
    pub kind: ToastKind,
    pub message: String,
    pub created_at: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BadgeKind {
    Success,
    Error,
    Info,
    Neutral,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Text(String),
    Badge(BadgeKind, String),
    /// Row actions, dispatched back through `perform` with `id`.
    Actions { id: String, actions: Vec<String> },
    Progress { percent: f64, label: String },
}

impl Cell {
    pub fn text<S: Into<String>>(s: S) -> Self {
        Cell::Text(s.into())
    }

    pub fn badge(condition: bool, yes: &str, no: &str) -> Self {
        if condition {
            Cell::Badge(BadgeKind::Success, yes.to_string())
        } else {
            Cell::Badge(BadgeKind::Error, no.to_string())
        }
    }

    pub fn edit_delete(id: &str) -> Self {
        Cell::Actions {
            id: id.to_string(),
            actions: vec!["edit".to_string(), "delete".to_string()],
        }
    }

    pub fn plain(&self) -> String {
        match self {
            Cell::Text(s) => s.clone(),
            Cell::Badge(_, s) => s.clone(),
            Cell::Actions { id, actions } => format!("[{}: {}]", actions.join("|"), id),
            Cell::Progress { percent, label } => format!("{:.0}% {}", percent, label),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Cell>>,
    pub empty_message: Option<String>,
    pub footer: Option<String>,
}

impl Table {
    pub fn new(columns: &[&str]) -> Self {
        Table {
            columns: columns.iter().map(|c| c.to_string()).collect(),
            ..Default::default()
        }
    }

    pub fn empty(columns: &[&str], message: &str) -> Self {
        let mut table = Table::new(columns);
        table.empty_message = Some(message.to_string());
        table
    }

    pub fn push(&mut self, row: Vec<Cell>) {
        self.rows.push(row);
    }

    /// Rows, or the empty message when there are none.
    pub fn or_empty(mut self, message: &str) -> Self {
        if self.rows.is_empty() {
            self.empty_message = Some(message.to_string());
        }
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogClass {
    Normal,
    Warn,
    Error,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LogLine {
    pub class: LogClass,
    pub text: String,
}

impl LogLine {
    pub fn normal(text: &str) -> Self {
        LogLine { class: LogClass::Normal, text: text.to_string() }
    }

    pub fn error(text: &str) -> Self {
        LogLine { class: LogClass::Error, text: text.to_string() }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Download {
    pub filename: String,
    pub mime: String,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SelectedFile {
    pub name: String,
    pub mime: String,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Element {
    pub id: String,
    pub parent: Option<String>,
    pub hidden: bool,
    pub classes: BTreeSet<String>,
    pub text: String,
    pub value: String,
    pub attrs: BTreeMap<String, String>,
    pub width_percent: Option<f64>,
    pub disabled: bool,
}

impl Element {
    pub fn new(id: &str, parent: Option<&str>) -> Self {
        Element {
            id: id.to_string(),
            parent: parent.map(|p| p.to_string()),
            ..Default::default()
        }
    }

    pub fn class(mut self, class: &str) -> Self {
        self.classes.insert(class.to_string());
        self
    }

    pub fn attr(mut self, key: &str, value: &str) -> Self {
        self.attrs.insert(key.to_string(), value.to_string());
        self
    }

    pub fn hidden(mut self) -> Self {
        self.hidden = true;
        self
    }

    pub fn disabled(mut self) -> Self {
        self.disabled = true;
        self
    }

    pub fn value(mut self, value: &str) -> Self {
        self.value = value.to_string();
        self
    }

    pub fn has_class(&self, class: &str) -> bool {
        self.classes.contains(class)
    }
}

/// Everything the panel renders. Elements are kept in insertion order so a
/// renderer can walk a page top to bottom.
#[derive(Debug, Default)]
pub struct Document {
    elements: Vec<Element>,
    index: HashMap<String, usize>,
    tables: HashMap<String, Table>,
    logs: HashMap<String, Vec<LogLine>>,
    charts: HashMap<String, String>,
    toasts: Vec<Toast>,
    downloads: Vec<Download>,
    files: HashMap<String, SelectedFile>,
    location_hash: String,
}

impl Document {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, element: Element) {
        if let Some(&idx) = self.index.get(&element.id) {
            self.elements[idx] = element;
            return;
        }
        self.index.insert(element.id.clone(), self.elements.len());
        self.elements.push(element);
    }

    pub fn element(&self, id: &str) -> Option<&Element> {
        self.index.get(id).map(|&idx| &self.elements[idx])
    }

    pub fn element_mut(&mut self, id: &str) -> Option<&mut Element> {
        let idx = *self.index.get(id)?;
        Some(&mut self.elements[idx])
    }

    /// Content setters create a detached element when the id is unknown.
    fn entry(&mut self, id: &str) -> &mut Element {
        if !self.index.contains_key(id) {
            self.add(Element::new(id, None));
        }
        let idx = self.index[id];
        &mut self.elements[idx]
    }

    pub fn elements(&self) -> impl Iterator<Item = &Element> {
        self.elements.iter()
    }

    pub fn children(&self, parent: &str) -> Vec<&Element> {
        self.elements
            .iter()
            .filter(|e| e.parent.as_deref() == Some(parent))
            .collect()
    }

    pub fn ids_with_class(&self, class: &str) -> Vec<String> {
        self.elements
            .iter()
            .filter(|e| e.has_class(class))
            .map(|e| e.id.clone())
            .collect()
    }

    /// Returns false when there is no such element.
    pub fn show(&mut self, id: &str) -> bool {
        match self.element_mut(id) {
            Some(el) => {
                el.hidden = false;
                true
            }
            None => false,
        }
    }

    pub fn hide(&mut self, id: &str) {
        if let Some(el) = self.element_mut(id) {
            el.hidden = true;
        }
    }

    pub fn is_hidden(&self, id: &str) -> bool {
        self.element(id).map(|e| e.hidden).unwrap_or(true)
    }

    /// Visible when neither the element nor any ancestor is hidden.
    pub fn is_visible(&self, id: &str) -> bool {
        let mut current = self.element(id);
        let mut depth = 0;
        while let Some(el) = current {
            if el.hidden {
                return false;
            }
            depth += 1;
            if depth > 32 {
                break;
            }
            current = el.parent.as_deref().and_then(|p| self.element(p));
        }
        self.element(id).is_some()
    }

    pub fn add_class(&mut self, id: &str, class: &str) {
        if let Some(el) = self.element_mut(id) {
            el.classes.insert(class.to_string());
        }
    }

    pub fn remove_class(&mut self, id: &str, class: &str) {
        if let Some(el) = self.element_mut(id) {
            el.classes.remove(class);
        }
    }

    pub fn has_class(&self, id: &str, class: &str) -> bool {
        self.element(id).map(|e| e.has_class(class)).unwrap_or(false)
    }

    pub fn set_text(&mut self, id: &str, text: &str) {
        self.entry(id).text = text.to_string();
    }

    pub fn text(&self, id: &str) -> &str {
        self.element(id).map(|e| e.text.as_str()).unwrap_or("")
    }

    pub fn set_value(&mut self, id: &str, value: &str) {
        self.entry(id).value = value.to_string();
    }

    pub fn value(&self, id: &str) -> &str {
        self.element(id).map(|e| e.value.as_str()).unwrap_or("")
    }

    pub fn set_width(&mut self, id: &str, percent: f64) {
        self.entry(id).width_percent = Some(percent.clamp(0.0, 100.0));
    }

    pub fn set_disabled(&mut self, id: &str, disabled: bool) {
        self.entry(id).disabled = disabled;
    }

    pub fn is_disabled(&self, id: &str) -> bool {
        self.element(id).map(|e| e.disabled).unwrap_or(false)
    }

    pub fn attr(&self, id: &str, key: &str) -> Option<&str> {
        self.element(id)?.attrs.get(key).map(|v| v.as_str())
    }

    pub fn set_table(&mut self, id: &str, table: Table) {
        self.tables.insert(id.to_string(), table);
    }

    pub fn table(&self, id: &str) -> Option<&Table> {
        self.tables.get(id)
    }

    pub fn set_log(&mut self, id: &str, lines: Vec<LogLine>) {
        self.logs.insert(id.to_string(), lines);
    }

    pub fn log(&self, id: &str) -> &[LogLine] {
        self.logs.get(id).map(|l| l.as_slice()).unwrap_or(&[])
    }

    pub fn set_chart(&mut self, id: &str, svg: String) {
        self.charts.insert(id.to_string(), svg);
    }

    pub fn chart(&self, id: &str) -> Option<&str> {
        self.charts.get(id).map(|c| c.as_str())
    }

    pub fn toast(&mut self, message: &str, kind: ToastKind) {
        self.toasts.push(Toast {
            kind,
            message: message.to_string(),
            created_at: wrt_get_unix_timestamp(),
        });
    }

    pub fn toasts(&self) -> &[Toast] {
        &self.toasts
    }

    pub fn take_toasts(&mut self) -> Vec<Toast> {
        std::mem::take(&mut self.toasts)
    }

    pub fn push_download(&mut self, download: Download) {
        self.downloads.push(download);
    }

    pub fn take_downloads(&mut self) -> Vec<Download> {
        std::mem::take(&mut self.downloads)
    }

    pub fn select_file(&mut self, input: &str, file: SelectedFile) {
        self.files.insert(input.to_string(), file);
    }

    pub fn selected_file(&self, input: &str) -> Option<&SelectedFile> {
        self.files.get(input)
    }

    pub fn clear_file(&mut self, input: &str) {
        self.files.remove(input);
    }

    pub fn location_hash(&self) -> &str {
        &self.location_hash
    }

    pub fn set_location_hash(&mut self, hash: &str) {
        self.location_hash = hash.to_string();
    }

    /// Hide everything tagged with a disabled `data-feature`.
    pub fn apply_feature_flags(&mut self, flags: &FeatureFlags) {
        for el in self.elements.iter_mut() {
            if let Some(feature) = el.attrs.get("data-feature") {
                if !flags.is_enabled(feature) {
                    el.hidden = true;
                }
            }
        }
    }

    /// Switch the tab strip of `page` to `tab`. Returns false for an unknown tab.
    pub fn show_sub_tab(&mut self, page: &str, tab: &str) -> bool {
        let ids: Vec<(String, bool, bool)> = self
            .children(page)
            .iter()
            .map(|e| (e.id.clone(), e.has_class("tab-content"), e.has_class("tab-btn")))
            .collect();
        for (id, is_content, is_btn) in ids {
            if is_content {
                self.hide(&id);
            }
            if is_btn {
                self.remove_class(&id, "active");
            }
        }
        self.add_class(&format!("tab-btn-{}", tab), "active");
        self.show(&format!("tab-{}", tab))
    }

    /// Fill `edit-<prefix>-<field>` inputs of a modal.
    pub fn fill_form(&mut self, prefix: &str, values: &[(&str, String)]) {
        for (field, value) in values {
            self.set_value(&form_field_id(prefix, field), value);
        }
    }

    pub fn with_default_layout() -> Self {
        let mut doc = Document::new();
        layout::build(&mut doc);
        doc
    }
}

pub fn form_field_id(prefix: &str, field: &str) -> String {
    format!("edit-{}-{}", prefix, field.replace('_', "-"))
}

mod layout {
    use super::{form_field_id, Document, Element};

    pub const PAGES: &[(&str, Option<&str>)] = &[
        ("dashboard", Some("dashboard")),
        ("network", Some("network")),
        ("system", Some("system")),
        ("vpn", Some("wireguard")),
        ("services", None),
    ];

    pub const NETWORK_TABS: &[(&str, &str)] = &[
        ("interfaces", "network"),
        ("wireless", "wireless"),
        ("firewall", "firewall"),
        ("dhcp", "dhcp"),
        ("dns", "dns"),
        ("ddns", "ddns"),
        ("qos", "qos"),
        ("wireguard", "wireguard"),
        ("diagnostics", "diagnostics"),
    ];

    pub const SYSTEM_TABS: &[(&str, &str)] = &[
        ("general", "system"),
        ("admin", "system"),
        ("backup", "backup"),
        ("software", "packages"),
        ("startup", "services"),
        ("cron", "system"),
        ("ssh-keys", "ssh_keys"),
        ("mounts", "storage"),
        ("led", "leds"),
        ("upgrade", "firmware"),
    ];

    fn leaf(doc: &mut Document, parent: &str, ids: &[&str]) {
        for id in ids {
            doc.add(Element::new(id, Some(parent)));
        }
    }

    fn modal(doc: &mut Document, parent: &str, prefix: &str, fields: &[&str]) {
        let modal_id = format!("{}-modal", prefix);
        doc.add(Element::new(&modal_id, Some(parent)).class("modal").hidden());
        for field in fields {
            doc.add(Element::new(&form_field_id(prefix, field), Some(&modal_id)).class("form-input"));
        }
    }

    fn tabs(doc: &mut Document, page: &str, tabs: &[(&str, &str)]) {
        for (tab, feature) in tabs {
            doc.add(
                Element::new(&format!("tab-btn-{}", tab), Some(page))
                    .class("tab-btn")
                    .attr("data-tab", tab)
                    .attr("data-feature", feature),
            );
        }
        for (tab, feature) in tabs {
            doc.add(
                Element::new(&format!("tab-{}", tab), Some(page))
                    .class("tab-content")
                    .attr("data-feature", feature)
                    .hidden(),
            );
        }
    }

    pub fn build(doc: &mut Document) {
        doc.add(Element::new("login-view", None).hidden());
        leaf(doc, "login-view", &["login-form", "username", "password", "remember-me", "login-error"]);
        doc.add(Element::new("main-view", None).hidden());
        doc.add(Element::new("logout-btn", Some("main-view")));

        for (name, feature) in PAGES {
            let mut link = Element::new(&format!("nav-{}", name), Some("main-view"))
                .class("nav-link")
                .attr("href", &format!("#/{}", name));
            if let Some(feature) = feature {
                link = link.attr("data-feature", feature);
            }
            doc.add(link);
        }
        for (name, _) in PAGES {
            doc.add(Element::new(&format!("{}-page", name), Some("main-view")).class("page").hidden());
        }

        leaf(
            doc,
            "dashboard-page",
            &[
                "hostname",
                "uptime",
                "memory",
                "memory-bar",
                "load",
                "cpu",
                "cpu-bar",
                "bandwidth-down",
                "bandwidth-up",
                "wan-status-hero",
                "wan-status",
                "wan-ip",
                "lan-ip",
                "clients",
                "system-log",
                "connections-table",
                "bandwidth-graph",
            ],
        );

        tabs(doc, "network-page", NETWORK_TABS);
        leaf(doc, "tab-interfaces", &["interfaces-table"]);
        modal(doc, "tab-interfaces", "iface", &["name", "proto", "ipaddr", "netmask", "gateway", "dns"]);
        leaf(doc, "tab-wireless", &["wireless-table"]);
        modal(
            doc,
            "tab-wireless",
            "wifi",
            &["section", "radio", "ssid", "encryption", "key", "disabled", "hidden", "channel", "txpower"],
        );
        leaf(doc, "tab-firewall", &["firewall-table", "firewall-rules-table"]);
        modal(
            doc,
            "tab-firewall",
            "forward",
            &["section", "name", "proto", "src_dport", "dest_ip", "dest_port", "enabled"],
        );
        modal(
            doc,
            "tab-firewall",
            "rule",
            &["section", "name", "src", "dest", "proto", "dest_port", "target", "enabled"],
        );
        leaf(doc, "tab-dhcp", &["dhcp-leases-table", "dhcp-static-table"]);
        modal(doc, "tab-dhcp", "static-lease", &["section", "name", "mac", "ip"]);
        leaf(doc, "tab-dns", &["dns-table"]);
        modal(doc, "tab-dns", "dns", &["section", "name", "ip"]);
        leaf(doc, "tab-ddns", &["ddns-services-table"]);
        modal(
            doc,
            "tab-ddns",
            "ddns",
            &["section", "service_name", "domain", "username", "password", "interface", "enabled"],
        );
        leaf(doc, "tab-qos", &["qos-rules-table"]);
        modal(
            doc,
            "tab-qos",
            "qos",
            &["section", "name", "target", "proto", "srchost", "dsthost", "ports", "enabled"],
        );
        leaf(doc, "tab-wireguard", &["wg-peers-table"]);
        modal(
            doc,
            "tab-wireguard",
            "wg-peer",
            &[
                "section",
                "interface",
                "description",
                "public_key",
                "allowed_ips",
                "endpoint_host",
                "endpoint_port",
                "persistent_keepalive",
            ],
        );
        leaf(
            doc,
            "tab-diagnostics",
            &["ping-host", "ping-output", "traceroute-host", "traceroute-output", "wol-mac", "wol-output"],
        );

        tabs(doc, "system-page", SYSTEM_TABS);
        leaf(doc, "tab-general", &["system-hostname", "system-timezone", "save-general-btn"]);
        leaf(doc, "tab-admin", &["new-password", "confirm-password", "change-password-btn"]);
        leaf(
            doc,
            "tab-backup",
            &[
                "backup-btn",
                "restore-file",
                "restore-btn",
                "reset-btn",
                "reboot-btn",
                "restart-network-btn",
                "restart-firewall-btn",
            ],
        );
        leaf(doc, "tab-software", &["packages-table"]);
        leaf(doc, "tab-startup", &["services-table"]);
        leaf(doc, "tab-cron", &["cron-table"]);
        modal(
            doc,
            "tab-cron",
            "cron",
            &["index", "minute", "hour", "day", "month", "weekday", "command", "enabled"],
        );
        leaf(doc, "tab-ssh-keys", &["ssh-keys-table", "ssh-key-paste-area", "parsed-keys-list"]);
        leaf(doc, "tab-mounts", &["storage-charts", "mounts-table"]);
        leaf(doc, "tab-led", &["led-table"]);
        leaf(doc, "tab-upgrade", &["firmware-file", "firmware-details", "keep-settings", "upgrade-status"]);
        doc.add(Element::new("validate-firmware-btn", Some("tab-upgrade")).disabled());
        doc.add(Element::new("flash-firmware-btn", Some("tab-upgrade")).disabled());
        doc.add(Element::new("upgrade-progress", Some("tab-upgrade")).hidden());

        leaf(doc, "vpn-page", &["wireguard-table"]);
        leaf(doc, "services-page", &["qos-table", "ddns-table"]);
    }
}

pub use layout::{NETWORK_TABS, PAGES, SYSTEM_TABS};

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_default_layout() {
        let doc = Document::with_default_layout();
        assert_eq!(doc.ids_with_class("page").len(), 5);
        assert_eq!(doc.attr("nav-network", "href"), Some("#/network"));
        assert!(doc.is_hidden("dashboard-page"));
        assert!(doc.element("edit-forward-src-dport").is_some());
        assert!(doc.is_disabled("flash-firmware-btn"));
    }

    #[test]
    fn test_visibility_follows_parents() {
        let mut doc = Document::with_default_layout();
        doc.show("main-view");
        doc.show("network-page");
        assert!(!doc.is_visible("interfaces-table"));
        doc.show("tab-interfaces");
        assert!(doc.is_visible("interfaces-table"));
        doc.hide("main-view");
        assert!(!doc.is_visible("interfaces-table"));
        assert!(!doc.is_visible("does-not-exist"));
    }

    #[test]
    fn test_feature_flags_hide_tagged_elements() {
        let mut doc = Document::with_default_layout();
        doc.show("tab-btn-wireless");
        let values = json!({"network": "1", "wireless": "0"});
        let flags = FeatureFlags::from_values(values.as_object().cloned().unwrap());
        doc.apply_feature_flags(&flags);
        assert!(doc.is_hidden("tab-btn-wireless"));
        assert!(doc.is_hidden("nav-vpn"));
        assert!(!doc.is_hidden("tab-btn-interfaces"));
        // untagged elements are left alone
        assert!(!doc.is_hidden("nav-services"));
    }

    #[test]
    fn test_table_empty_message() {
        let table = Table::new(&["Name"]).or_empty("Nothing here");
        assert_eq!(table.empty_message.as_deref(), Some("Nothing here"));
        let mut table = Table::new(&["Name"]);
        table.push(vec![Cell::text("a")]);
        assert!(table.or_empty("Nothing here").empty_message.is_none());
    }
}
