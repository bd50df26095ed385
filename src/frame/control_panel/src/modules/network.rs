use async_trait::async_trait;
use log::*;
use serde_json::{json, Map, Value};
use std::sync::{Arc, Mutex};
use wrt_api::{ReplyExt, UciSection};

use super::{input_value, require_id, sub_tab};
use crate::{
    is_valid_host, is_valid_mac, is_valid_service_name, validation, AppContext, Cell, FormData, LogLine,
    ModuleCapabilities, PanelError, PanelModule, PanelResult, RouteHandler, Table, NETWORK_TABS,
};

const DEFAULT_TAB: &str = "interfaces";

const INTERFACE_COLUMNS: &[&str] = &["Interface", "Protocol", "Status", "IPv4 Address", "Traffic", "Actions"];
const WIRELESS_COLUMNS: &[&str] = &["Radio", "SSID", "Channel", "Status", "Encryption", "Actions"];
const LEASE_COLUMNS: &[&str] = &["Hostname", "IP Address", "MAC Address", "Expires"];
const IFACE_FIELDS: &[&str] = &["name", "proto", "ipaddr", "netmask", "gateway", "dns"];
const WIFI_FIELDS: &[&str] = &[
    "section", "radio", "ssid", "encryption", "key", "disabled", "hidden", "channel", "txpower",
];

/// A UCI section type edited through a modal with add/edit/delete rows.
pub struct SectionKind {
    pub prefix: &'static str,
    pub config: &'static str,
    /// None for WireGuard peers, whose type is `wireguard_<interface>`.
    pub section_type: Option<&'static str>,
    pub service: &'static str,
    pub tab: &'static str,
    pub table: &'static str,
    pub columns: &'static [&'static str],
    pub fields: &'static [&'static str],
    pub empty: &'static str,
    pub load_failed: &'static str,
    pub saved: &'static str,
    pub save_failed: &'static str,
    pub confirm_delete: &'static str,
    pub deleted: &'static str,
    pub delete_failed: &'static str,
}

pub const SECTION_KINDS: &[SectionKind] = &[
    SectionKind {
        prefix: "forward",
        config: "firewall",
        section_type: Some("redirect"),
        service: "firewall",
        tab: "firewall",
        table: "firewall-table",
        columns: &["Name", "Protocol", "External Port", "Internal IP", "Internal Port", "Enabled", "Actions"],
        fields: &["section", "name", "proto", "src_dport", "dest_ip", "dest_port", "enabled"],
        empty: "No rules configured",
        load_failed: "Failed to load rules",
        saved: "Port forwarding rule saved",
        save_failed: "Failed to save rule",
        confirm_delete: "Delete this port forwarding rule?",
        deleted: "Rule deleted",
        delete_failed: "Failed to delete rule",
    },
    SectionKind {
        prefix: "rule",
        config: "firewall",
        section_type: Some("rule"),
        service: "firewall",
        tab: "firewall",
        table: "firewall-rules-table",
        columns: &["Name", "Source", "Destination", "Protocol", "Port", "Target", "Enabled", "Actions"],
        fields: &["section", "name", "src", "dest", "proto", "dest_port", "target", "enabled"],
        empty: "No traffic rules configured",
        load_failed: "Failed to load traffic rules",
        saved: "Traffic rule saved",
        save_failed: "Failed to save rule",
        confirm_delete: "Delete this traffic rule?",
        deleted: "Rule deleted",
        delete_failed: "Failed to delete rule",
    },
    SectionKind {
        prefix: "static-lease",
        config: "dhcp",
        section_type: Some("host"),
        service: "dnsmasq",
        tab: "dhcp",
        table: "dhcp-static-table",
        columns: &["Hostname", "MAC Address", "IP Address", "Actions"],
        fields: &["section", "name", "mac", "ip"],
        empty: "No static leases",
        load_failed: "Failed to load static leases",
        saved: "Static DHCP lease saved",
        save_failed: "Failed to save lease",
        confirm_delete: "Delete this static DHCP lease?",
        deleted: "Static lease deleted",
        delete_failed: "Failed to delete lease",
    },
    SectionKind {
        prefix: "dns",
        config: "dhcp",
        section_type: Some("domain"),
        service: "dnsmasq",
        tab: "dns",
        table: "dns-table",
        columns: &["Hostname", "IP Address", "Actions"],
        fields: &["section", "name", "ip"],
        empty: "No DNS records",
        load_failed: "Failed to load DNS records",
        saved: "DNS record saved",
        save_failed: "Failed to save DNS record",
        confirm_delete: "Delete this DNS record?",
        deleted: "DNS record deleted",
        delete_failed: "Failed to delete DNS record",
    },
    SectionKind {
        prefix: "ddns",
        config: "ddns",
        section_type: Some("service"),
        service: "ddns",
        tab: "ddns",
        table: "ddns-services-table",
        columns: &["Name", "Service", "Domain", "Status", "Actions"],
        fields: &["section", "service_name", "domain", "username", "password", "interface", "enabled"],
        empty: "No DDNS services configured",
        load_failed: "DDNS not configured",
        saved: "DDNS service saved",
        save_failed: "Failed to save DDNS service",
        confirm_delete: "Delete this DDNS service?",
        deleted: "DDNS service deleted",
        delete_failed: "Failed to delete DDNS service",
    },
    SectionKind {
        prefix: "qos",
        config: "qos",
        section_type: Some("classify"),
        service: "qos",
        tab: "qos",
        table: "qos-rules-table",
        columns: &["Name", "Target", "Protocol", "Source", "Destination", "Ports", "Status", "Actions"],
        fields: &["section", "name", "target", "proto", "srchost", "dsthost", "ports", "enabled"],
        empty: "No QoS rules configured",
        load_failed: "QoS not configured",
        saved: "QoS rule saved",
        save_failed: "Failed to save QoS rule",
        confirm_delete: "Delete this QoS rule?",
        deleted: "QoS rule deleted",
        delete_failed: "Failed to delete QoS rule",
    },
    SectionKind {
        prefix: "wg-peer",
        config: "network",
        section_type: None,
        service: "network",
        tab: "wireguard",
        table: "wg-peers-table",
        columns: &["Interface", "Description", "Public Key", "Allowed IPs", "Endpoint", "Actions"],
        fields: &[
            "section",
            "interface",
            "description",
            "public_key",
            "allowed_ips",
            "endpoint_host",
            "endpoint_port",
            "persistent_keepalive",
        ],
        empty: "No WireGuard peers configured",
        load_failed: "Failed to load WireGuard peers",
        saved: "WireGuard peer saved",
        save_failed: "Failed to save WireGuard peer",
        confirm_delete: "Delete this WireGuard peer?",
        deleted: "WireGuard peer deleted",
        delete_failed: "Failed to delete WireGuard peer",
    },
];

pub fn section_kind(prefix: &str) -> Option<&'static SectionKind> {
    SECTION_KINDS.iter().find(|k| k.prefix == prefix)
}

const WG_PEER_PREFIX: &str = "wireguard_";

impl SectionKind {
    fn matches(&self, section: &UciSection) -> bool {
        match self.section_type {
            Some(t) => section.section_type == t,
            None => section.section_type.starts_with(WG_PEER_PREFIX),
        }
    }

    fn default_value(&self, field: &str) -> &'static str {
        match (self.prefix, field) {
            ("forward", "proto") | ("rule", "proto") => "tcp",
            ("rule", "src") | ("ddns", "interface") => "wan",
            ("rule", "target") => "ACCEPT",
            (_, "enabled") => "1",
            _ => "",
        }
    }

    /// Modal contents for an existing section, or the blank form when None.
    fn form_values(&self, section: Option<&UciSection>) -> Vec<(&'static str, String)> {
        self.fields
            .iter()
            .map(|field| {
                let value = match (section, *field) {
                    (None, _) => self.default_value(field).to_string(),
                    (Some(s), "section") => s.name.clone(),
                    (Some(s), "interface") if self.section_type.is_none() => {
                        s.section_type.trim_start_matches(WG_PEER_PREFIX).to_string()
                    }
                    (Some(s), field) => s.get_or(field, self.default_value(field)),
                };
                (*field, value)
            })
            .collect()
    }

    fn new_section_type(&self, form: &FormData) -> String {
        match self.section_type {
            Some(t) => t.to_string(),
            None => format!("{}{}", WG_PEER_PREFIX, form.text("interface")),
        }
    }
}

fn put(values: &mut Map<String, Value>, key: &str, value: String) {
    values.insert(key.to_string(), Value::String(value));
}

fn put_if(values: &mut Map<String, Value>, key: &str, value: String) {
    if !value.is_empty() {
        put(values, key, value);
    }
}

/// Validated UCI values of a submitted section form.
pub fn section_values(kind: &SectionKind, form: &FormData) -> PanelResult<Map<String, Value>> {
    let mut values = Map::new();
    let enabled = form.text_or("enabled", kind.default_value("enabled"));
    match kind.prefix {
        "forward" => {
            let (name, src_dport, dest_ip) = (form.text("name"), form.text("src_dport"), form.text("dest_ip"));
            if name.is_empty() || src_dport.is_empty() || dest_ip.is_empty() {
                return validation("Name, external port, and internal IP are required");
            }
            put(&mut values, "name", name);
            put(&mut values, "src", "wan".to_string());
            put(&mut values, "proto", form.text_or("proto", "tcp"));
            put(&mut values, "src_dport", src_dport);
            put(&mut values, "dest", "lan".to_string());
            put(&mut values, "dest_ip", dest_ip);
            put(&mut values, "target", "DNAT".to_string());
            put(&mut values, "enabled", enabled);
            put_if(&mut values, "dest_port", form.text("dest_port"));
        }
        "rule" => {
            let name = form.text("name");
            if name.is_empty() {
                return validation("Rule name is required");
            }
            put(&mut values, "name", name);
            put(&mut values, "src", form.text_or("src", "wan"));
            put_if(&mut values, "dest", form.text("dest"));
            put(&mut values, "proto", form.text_or("proto", "tcp"));
            put_if(&mut values, "dest_port", form.text("dest_port"));
            put(&mut values, "target", form.text_or("target", "ACCEPT"));
            put(&mut values, "enabled", enabled);
        }
        "static-lease" => {
            let (mac, ip) = (form.text("mac"), form.text("ip"));
            if mac.is_empty() || ip.is_empty() {
                return validation("MAC address and IP address are required");
            }
            if !is_valid_mac(&mac) {
                return validation("Invalid MAC address format");
            }
            put(&mut values, "name", form.text_or("name", &mac));
            put(&mut values, "mac", mac);
            put(&mut values, "ip", ip);
        }
        "dns" => {
            let (name, ip) = (form.text("name"), form.text("ip"));
            if name.is_empty() || ip.is_empty() {
                return validation("Hostname and IP address are required");
            }
            put(&mut values, "name", name);
            put(&mut values, "ip", ip);
        }
        "ddns" => {
            let (service, domain) = (form.text("service_name"), form.text("domain"));
            if service.is_empty() || domain.is_empty() {
                return validation("Service and domain are required");
            }
            put(&mut values, "service_name", service);
            put(&mut values, "lookup_host", domain.clone());
            put(&mut values, "domain", domain);
            put_if(&mut values, "username", form.text("username"));
            put_if(&mut values, "password", form.raw("password"));
            put(&mut values, "interface", form.text_or("interface", "wan"));
            put(&mut values, "enabled", enabled);
        }
        "qos" => {
            let target = form.text("target");
            if target.is_empty() {
                return validation("Target class is required");
            }
            put_if(&mut values, "name", form.text("name"));
            put(&mut values, "target", target);
            put_if(&mut values, "proto", form.text("proto"));
            put_if(&mut values, "srchost", form.text("srchost"));
            put_if(&mut values, "dsthost", form.text("dsthost"));
            put_if(&mut values, "ports", form.text("ports"));
            put(&mut values, "enabled", enabled);
        }
        "wg-peer" => {
            let (interface, public_key) = (form.text("interface"), form.text("public_key"));
            if interface.is_empty() || public_key.is_empty() {
                return validation("Interface and public key are required");
            }
            if !is_valid_service_name(&interface) {
                return validation("Invalid interface name");
            }
            put_if(&mut values, "description", form.text("description"));
            put(&mut values, "public_key", public_key);
            let allowed: Vec<Value> = form
                .text("allowed_ips")
                .split(|c: char| c == ',' || c.is_whitespace())
                .filter(|s| !s.is_empty())
                .map(|s| Value::String(s.to_string()))
                .collect();
            if !allowed.is_empty() {
                values.insert("allowed_ips".to_string(), Value::Array(allowed));
            }
            put_if(&mut values, "endpoint_host", form.text("endpoint_host"));
            put_if(&mut values, "endpoint_port", form.text("endpoint_port"));
            put_if(&mut values, "persistent_keepalive", form.text("persistent_keepalive"));
        }
        other => return Err(PanelError::UnknownAction(format!("save-{}", other))),
    }
    Ok(values)
}

fn truncated(text: &str, len: usize) -> String {
    text.chars().take(len).collect()
}

pub fn section_row(kind: &SectionKind, s: &UciSection) -> Vec<Cell> {
    let name = || s.get("name").filter(|n| !n.is_empty()).unwrap_or_else(|| s.name.clone());
    let mut row = match kind.prefix {
        "forward" => {
            let src_dport = s.get_or("src_dport", "N/A");
            vec![
                Cell::text(name()),
                Cell::text(s.get_or("proto", "tcp").to_uppercase()),
                Cell::text(src_dport.clone()),
                Cell::text(s.get_or("dest_ip", "N/A")),
                Cell::text(s.get_or("dest_port", &src_dport)),
                Cell::badge(!s.is("enabled", "0"), "YES", "NO"),
            ]
        }
        "rule" => vec![
            Cell::text(name()),
            Cell::text(s.get_or("src", "Any")),
            Cell::text(s.get_or("dest", "Any")),
            Cell::text(s.get_or("proto", "tcp").to_uppercase()),
            Cell::text(s.get_or("dest_port", "Any")),
            Cell::text(s.get_or("target", "ACCEPT")),
            Cell::badge(!s.is("enabled", "0"), "YES", "NO"),
        ],
        "static-lease" => vec![
            Cell::text(name()),
            Cell::text(s.get_or("mac", "N/A")),
            Cell::text(s.get_or("ip", "N/A")),
        ],
        "dns" => vec![Cell::text(s.get_or("name", "N/A")), Cell::text(s.get_or("ip", "N/A"))],
        "ddns" => vec![
            Cell::text(s.name.clone()),
            Cell::text(s.get_or("service_name", "Custom")),
            Cell::text(s.get_or("domain", "N/A")),
            Cell::badge(s.is("enabled", "1"), "ENABLED", "DISABLED"),
        ],
        "qos" => vec![
            Cell::text(name()),
            Cell::text(s.get_or("target", "Default")),
            Cell::text(s.get_or("proto", "all")),
            Cell::text(s.get_or("srchost", "any")),
            Cell::text(s.get_or("dsthost", "any")),
            Cell::text(s.get_or("ports", "any")),
            Cell::badge(!s.is("enabled", "0"), "ACTIVE", "INACTIVE"),
        ],
        _ => {
            let endpoint = match (s.get("endpoint_host"), s.get("endpoint_port")) {
                (Some(host), Some(port)) => format!("{}:{}", host, port),
                (Some(host), None) => host,
                _ => "N/A".to_string(),
            };
            vec![
                Cell::text(s.section_type.trim_start_matches(WG_PEER_PREFIX)),
                Cell::text(s.get("description").unwrap_or_else(|| s.name.clone())),
                Cell::text(format!("{}...", truncated(&s.get_or("public_key", "N/A"), 20))),
                Cell::text(s.get_or("allowed_ips", "N/A")),
                Cell::text(endpoint),
            ]
        }
    };
    row.push(Cell::edit_delete(&s.name));
    row
}

fn interface_row(iface: &Value) -> Vec<Cell> {
    let name = iface.get("interface").and_then(|i| i.as_str()).unwrap_or("Unknown");
    let up = iface.get("up").and_then(|u| u.as_bool()).unwrap_or(false);
    let ip = iface
        .pointer("/ipv4-address/0/address")
        .and_then(|a| a.as_str())
        .unwrap_or("N/A");
    let mb = |key: &str| {
        iface
            .pointer(&format!("/statistics/{}", key))
            .and_then(|v| v.as_f64())
            .unwrap_or(0.0)
            / 1024.0
            / 1024.0
    };
    vec![
        Cell::text(name),
        Cell::text(iface.get("proto").and_then(|p| p.as_str()).unwrap_or("unknown").to_uppercase()),
        Cell::badge(up, "UP", "DOWN"),
        Cell::text(ip),
        Cell::text(format!("{:.2} / {:.2} MB", mb("rx_bytes"), mb("tx_bytes"))),
        Cell::Actions {
            id: name.to_string(),
            actions: vec!["edit".to_string()],
        },
    ]
}

fn lease_expiry(lease: &Value) -> String {
    match lease.get("expires").and_then(|e| e.as_i64()) {
        Some(expires) if expires > 0 => format!("{}m", expires / 60),
        _ => "Static".to_string(),
    }
}

#[derive(Default)]
pub struct NetworkModule {
    current_tab: Mutex<Option<String>>,
}

pub fn create(ctx: &AppContext) -> Arc<dyn PanelModule> {
    let module = Arc::new(NetworkModule::default());
    ctx.register_route("/network", module.clone());
    module
}

impl NetworkModule {
    fn current_tab(&self) -> String {
        self.current_tab
            .lock()
            .ok()
            .and_then(|t| t.clone())
            .unwrap_or_else(|| DEFAULT_TAB.to_string())
    }

    async fn show_tab(&self, ctx: &AppContext, tab: &str) -> PanelResult<()> {
        let tab = if ctx.with_doc(|d| d.show_sub_tab("network-page", tab)) {
            tab
        } else {
            ctx.with_doc(|d| d.show_sub_tab("network-page", DEFAULT_TAB));
            DEFAULT_TAB
        };
        if let Ok(mut current) = self.current_tab.lock() {
            *current = Some(tab.to_string());
        }
        self.load_tab(ctx, tab).await;
        Ok(())
    }

    async fn load_tab(&self, ctx: &AppContext, tab: &str) {
        let feature = NETWORK_TABS
            .iter()
            .find(|(name, _)| *name == tab)
            .map(|(_, feature)| *feature)
            .unwrap_or(tab);
        if !ctx.is_feature_enabled(feature) {
            debug!("network tab {} disabled", tab);
            return;
        }
        match tab {
            "interfaces" => self.load_interfaces(ctx).await,
            "wireless" => self.load_wireless(ctx).await,
            "dhcp" => {
                self.load_leases(ctx).await;
                self.load_sections(ctx, "static-lease").await;
            }
            "diagnostics" => {}
            tab => {
                for kind in SECTION_KINDS.iter().filter(|k| k.tab == tab) {
                    self.load_sections(ctx, kind.prefix).await;
                }
            }
        }
    }

    async fn load_interfaces(&self, ctx: &AppContext) {
        let result = async {
            let payload = ctx
                .client()
                .call("network.interface", "dump", json!({}))
                .await?
                .into_payload("network.interface", "dump")?;
            let mut table = Table::new(INTERFACE_COLUMNS);
            for iface in payload.get("interface").and_then(|i| i.as_array()).into_iter().flatten() {
                table.push(interface_row(iface));
            }
            Ok::<_, PanelError>(table.or_empty("No interfaces found"))
        }
        .await;
        ctx.put_table("interfaces-table", INTERFACE_COLUMNS, result, "Failed to load interfaces");
    }

    async fn load_wireless(&self, ctx: &AppContext) {
        let result = async {
            let sections = ctx.client().uci_sections("wireless").await?;
            let mut table = Table::new(WIRELESS_COLUMNS);
            for iface in sections.iter().filter(|s| s.section_type == "wifi-iface") {
                let radio = iface.get_or("device", "unknown");
                let channel = sections
                    .iter()
                    .find(|s| s.name == radio)
                    .and_then(|r| r.get("channel"))
                    .unwrap_or_else(|| "Auto".to_string());
                table.push(vec![
                    Cell::text(radio),
                    Cell::text(iface.get_or("ssid", "N/A")),
                    Cell::text(channel),
                    Cell::badge(!iface.is("disabled", "1"), "ENABLED", "DISABLED"),
                    Cell::text(iface.get_or("encryption", "none")),
                    Cell::Actions {
                        id: iface.name.clone(),
                        actions: vec!["edit".to_string()],
                    },
                ]);
            }
            Ok::<_, PanelError>(table.or_empty("No wireless interfaces found"))
        }
        .await;
        ctx.put_table("wireless-table", WIRELESS_COLUMNS, result, "Failed to load wireless");
    }

    async fn load_leases(&self, ctx: &AppContext) {
        let leases = match ctx.client().call("luci-rpc", "getDHCPLeases", json!({})).await {
            Ok(reply) => reply
                .payload
                .get("dhcp_leases")
                .and_then(|l| l.as_array())
                .cloned()
                .unwrap_or_default(),
            Err(err) => {
                debug!("getDHCPLeases failed: {}", err);
                Vec::new()
            }
        };
        let mut table = Table::new(LEASE_COLUMNS);
        for lease in &leases {
            let field = |key: &str| lease.get(key).and_then(|v| v.as_str()).unwrap_or("Unknown").to_string();
            table.push(vec![
                Cell::text(field("hostname")),
                Cell::text(field("ipaddr")),
                Cell::text(field("macaddr")),
                Cell::text(lease_expiry(lease)),
            ]);
        }
        ctx.with_doc(|d| d.set_table("dhcp-leases-table", table.or_empty("No active leases")));
    }

    async fn load_sections(&self, ctx: &AppContext, prefix: &str) {
        let Some(kind) = section_kind(prefix) else { return };
        let result = async {
            let sections = ctx.client().uci_sections(kind.config).await?;
            let mut table = Table::new(kind.columns);
            for section in sections.iter().filter(|s| kind.matches(s)) {
                table.push(section_row(kind, section));
            }
            Ok::<_, PanelError>(table.or_empty(kind.empty))
        }
        .await;
        ctx.put_table(kind.table, kind.columns, result, kind.load_failed);
    }

    async fn open_section(&self, ctx: &AppContext, kind: &SectionKind, id: Option<&str>) -> PanelResult<()> {
        let section = match id {
            Some(id) => Some(ctx.client().uci_section(kind.config, id).await?),
            None => None,
        };
        let values = kind.form_values(section.as_ref());
        ctx.with_doc(|d| {
            d.fill_form(kind.prefix, &values);
            d.show(&format!("{}-modal", kind.prefix));
        });
        Ok(())
    }

    async fn save_section(&self, ctx: &AppContext, kind: &SectionKind, form: &FormData) -> PanelResult<()> {
        let form = ctx.with_doc(|d| form.merged_with_modal(d, kind.prefix, kind.fields));
        let values = Value::Object(section_values(kind, &form)?);
        let client = ctx.client();
        let section = form.text("section");
        if section.is_empty() {
            client
                .uci_add(kind.config, &kind.new_section_type(&form), None, values)
                .await?;
        } else {
            // uci set cannot retype a section, and a peer's type names its interface
            if kind.section_type.is_none() {
                let existing = client.uci_section(kind.config, &section).await?;
                if existing.section_type != kind.new_section_type(&form) {
                    return validation("Interface of an existing peer cannot be changed");
                }
            }
            client.uci_set(kind.config, &section, values).await?;
        }
        client.apply_changes(kind.config, kind.service).await?;
        ctx.with_doc(|d| d.hide(&format!("{}-modal", kind.prefix)));
        Ok(())
    }

    async fn delete_section(&self, ctx: &AppContext, kind: &SectionKind, id: &str) -> PanelResult<()> {
        ctx.confirm(kind.confirm_delete)?;
        let client = ctx.client();
        client.uci_delete(kind.config, id).await?;
        client.apply_changes(kind.config, kind.service).await?;
        Ok(())
    }

    async fn open_interface(&self, ctx: &AppContext, id: &str) -> PanelResult<()> {
        let section = ctx.client().uci_section("network", id).await?;
        let values = vec![
            ("name", id.to_string()),
            ("proto", section.get_or("proto", "static")),
            ("ipaddr", section.get_or("ipaddr", "")),
            ("netmask", section.get_or("netmask", "")),
            ("gateway", section.get_or("gateway", "")),
            ("dns", section.get_or("dns", "")),
        ];
        ctx.with_doc(|d| {
            d.fill_form("iface", &values);
            d.show("iface-modal");
        });
        Ok(())
    }

    async fn save_interface(&self, ctx: &AppContext, form: &FormData) -> PanelResult<()> {
        let form = ctx.with_doc(|d| form.merged_with_modal(d, "iface", IFACE_FIELDS));
        let name = form.text("name");
        if name.is_empty() {
            return validation("Interface name is required");
        }
        let proto = form.text_or("proto", "static");
        let mut values = Map::new();
        put(&mut values, "proto", proto.clone());
        if proto == "static" {
            put_if(&mut values, "ipaddr", form.text("ipaddr"));
            put_if(&mut values, "netmask", form.text("netmask"));
            put_if(&mut values, "gateway", form.text("gateway"));
            let dns: Vec<Value> = form
                .text("dns")
                .split_whitespace()
                .map(|d| Value::String(d.to_string()))
                .collect();
            if !dns.is_empty() {
                values.insert("dns".to_string(), Value::Array(dns));
            }
        }
        let client = ctx.client();
        client.uci_set("network", &name, Value::Object(values)).await?;
        client.apply_changes("network", "network").await?;
        ctx.with_doc(|d| d.hide("iface-modal"));
        Ok(())
    }

    async fn open_wireless(&self, ctx: &AppContext, id: &str) -> PanelResult<()> {
        let client = ctx.client();
        let iface = client.uci_section("wireless", id).await?;
        let radio_name = iface.get_or("device", "");
        let radio = if radio_name.is_empty() {
            None
        } else {
            client.uci_section("wireless", &radio_name).await.ok()
        };
        let radio_value = |key: &str, default: &str| {
            radio
                .as_ref()
                .map(|r| r.get_or(key, default))
                .unwrap_or_else(|| default.to_string())
        };
        let values = vec![
            ("section", id.to_string()),
            ("radio", radio_name.clone()),
            ("ssid", iface.get_or("ssid", "")),
            ("encryption", iface.get_or("encryption", "none")),
            ("key", iface.get_or("key", "")),
            ("disabled", iface.get_or("disabled", "0")),
            ("hidden", iface.get_or("hidden", "0")),
            ("channel", radio_value("channel", "auto")),
            ("txpower", radio_value("txpower", "")),
        ];
        ctx.with_doc(|d| {
            d.fill_form("wifi", &values);
            d.show("wifi-modal");
        });
        Ok(())
    }

    async fn save_wireless(&self, ctx: &AppContext, form: &FormData) -> PanelResult<()> {
        let form = ctx.with_doc(|d| form.merged_with_modal(d, "wifi", WIFI_FIELDS));
        let section = form.text("section");
        let ssid = form.text("ssid");
        let encryption = form.text_or("encryption", "none");
        let key = form.raw("key");
        if section.is_empty() {
            return validation("No wireless interface selected");
        }
        if ssid.is_empty() {
            return validation("SSID is required");
        }
        if encryption != "none" && key.chars().count() < 8 {
            return validation("Password must be at least 8 characters");
        }

        let mut iface = Map::new();
        put(&mut iface, "ssid", ssid);
        put(&mut iface, "encryption", encryption.clone());
        put(&mut iface, "disabled", form.text_or("disabled", "0"));
        put(&mut iface, "hidden", form.text_or("hidden", "0"));
        if encryption != "none" {
            put(&mut iface, "key", key);
        }

        let client = ctx.client();
        client.uci_set("wireless", &section, Value::Object(iface)).await?;

        let radio = form.text("radio");
        let mut radio_values = Map::new();
        put_if(&mut radio_values, "channel", form.text("channel"));
        put_if(&mut radio_values, "txpower", form.text("txpower"));
        if !radio.is_empty() && !radio_values.is_empty() {
            client.uci_set("wireless", &radio, Value::Object(radio_values)).await?;
        }

        client.uci_commit("wireless").await?;
        client.file_exec("/sbin/wifi", &["reload"], None).await?;
        ctx.with_doc(|d| d.hide("wifi-modal"));
        Ok(())
    }

    async fn run_probe(&self, ctx: &AppContext, form: &FormData, tool: &str) -> PanelResult<()> {
        let (command, params, input, output) = match tool {
            "ping" => ("/bin/ping", ["-c", "4"], "ping-host", "ping-output"),
            _ => ("/usr/bin/traceroute", ["-m", "15"], "traceroute-host", "traceroute-output"),
        };
        let label = if tool == "ping" { "Ping" } else { "Traceroute" };
        let host = input_value(ctx, form, "host", input);
        if host.is_empty() {
            return validation("Please enter a hostname or IP address");
        }
        if !is_valid_host(&host) {
            return validation("Invalid hostname or IP address");
        }

        ctx.with_doc(|d| d.set_log(output, vec![LogLine::normal(&format!("Running {}...", tool))]));
        let timeout = Some(ctx.config().long_call_timeout());
        let lines = match ctx
            .client()
            .file_exec(command, &[params[0], params[1], host.as_str()], timeout)
            .await
        {
            Ok(result) => {
                let lines: Vec<LogLine> = result
                    .stdout
                    .lines()
                    .filter(|l| !l.trim().is_empty())
                    .map(LogLine::normal)
                    .collect();
                if lines.is_empty() {
                    vec![LogLine::error(&format!("{} failed or permission denied", label))]
                } else {
                    lines
                }
            }
            Err(err) => {
                warn!("{} {} failed: {}", tool, host, err);
                vec![LogLine::error(&format!("Failed to execute {}", tool))]
            }
        };
        ctx.with_doc(|d| d.set_log(output, lines));
        Ok(())
    }

    async fn wake_on_lan(&self, ctx: &AppContext, form: &FormData) -> PanelResult<()> {
        let mac = input_value(ctx, form, "mac", "wol-mac");
        if mac.is_empty() {
            return validation("Please enter a MAC address");
        }
        if !is_valid_mac(&mac) {
            return validation("Invalid MAC address format");
        }
        let client = ctx.client();
        let timeout = Some(ctx.config().long_call_timeout());
        let sent = match client.file_exec("/usr/bin/etherwake", &[mac.as_str()], timeout).await {
            Ok(_) => Ok(()),
            Err(err) => {
                debug!("etherwake failed, trying wol: {}", err);
                client.file_exec("/usr/bin/wol", &[mac.as_str()], timeout).await.map(|_| ())
            }
        };
        match sent {
            Ok(()) => {
                ctx.with_doc(|d| {
                    d.set_log(
                        "wol-output",
                        vec![LogLine::normal(&format!("WOL packet sent successfully to {}", mac))],
                    )
                });
                Ok(())
            }
            Err(err) => {
                ctx.with_doc(|d| {
                    d.set_log(
                        "wol-output",
                        vec![LogLine::error(
                            "Failed to send WOL packet. Make sure etherwake or wol package is installed.",
                        )],
                    )
                });
                Err(err.into())
            }
        }
    }
}

#[async_trait]
impl PanelModule for NetworkModule {
    fn name(&self) -> &'static str {
        "network"
    }

    fn capabilities(&self) -> ModuleCapabilities {
        ModuleCapabilities {
            load: true,
            update: false,
            cleanup: true,
        }
    }

    async fn load(&self, ctx: &AppContext) -> PanelResult<()> {
        ctx.with_doc(|d| d.show("network-page"));
        self.show_tab(ctx, &self.current_tab()).await
    }

    async fn handle_action(
        &self,
        ctx: &AppContext,
        action: &str,
        id: Option<&str>,
        form: &FormData,
    ) -> PanelResult<()> {
        match action {
            "refresh" => {
                self.load_tab(ctx, &self.current_tab()).await;
                return Ok(());
            }
            "tab" => return self.show_tab(ctx, require_id(id)?).await,
            "ping" | "traceroute" => {
                let result = self.run_probe(ctx, form, action).await;
                return ctx.report(result, "", "");
            }
            "wol" => {
                let result = self.wake_on_lan(ctx, form).await;
                return ctx.report(result, "Wake-on-LAN packet sent", "Failed to send WOL packet");
            }
            _ => {}
        }

        let (verb, prefix) = action
            .split_once('-')
            .ok_or_else(|| PanelError::UnknownAction(action.to_string()))?;
        match (verb, prefix) {
            ("edit", "iface") => {
                let result = self.open_interface(ctx, require_id(id)?).await;
                ctx.report(result, "", "Failed to load interface configuration")
            }
            ("save", "iface") => {
                let result = self.save_interface(ctx, form).await;
                ctx.report(result, "Interface configuration saved", "Failed to save configuration")?;
                ctx.settle().await;
                self.load_interfaces(ctx).await;
                Ok(())
            }
            ("edit", "wifi") => {
                let result = self.open_wireless(ctx, require_id(id)?).await;
                ctx.report(result, "", "Failed to load wireless configuration")
            }
            ("save", "wifi") => {
                let result = self.save_wireless(ctx, form).await;
                ctx.report(
                    result,
                    "Wireless configuration saved. WiFi reloading...",
                    "Failed to save configuration",
                )?;
                ctx.settle().await;
                self.load_wireless(ctx).await;
                Ok(())
            }
            (verb, prefix) => {
                let kind = section_kind(prefix).ok_or_else(|| PanelError::UnknownAction(action.to_string()))?;
                match verb {
                    "add" => {
                        let result = self.open_section(ctx, kind, None).await;
                        ctx.report(result, "", "Failed to open form")
                    }
                    "edit" => {
                        let result = self.open_section(ctx, kind, Some(require_id(id)?)).await;
                        ctx.report(result, "", "Failed to load rule configuration")
                    }
                    "save" => {
                        let result = self.save_section(ctx, kind, form).await;
                        ctx.report(result, kind.saved, kind.save_failed)?;
                        ctx.settle().await;
                        self.load_sections(ctx, kind.prefix).await;
                        Ok(())
                    }
                    "delete" => {
                        let id = require_id(id)?;
                        let result = self.delete_section(ctx, kind, id).await;
                        ctx.report(result, kind.deleted, kind.delete_failed)?;
                        ctx.settle().await;
                        self.load_sections(ctx, kind.prefix).await;
                        Ok(())
                    }
                    _ => Err(PanelError::UnknownAction(action.to_string())),
                }
            }
        }
    }

    fn cleanup(&self, _ctx: &AppContext) {
        if let Ok(mut current) = self.current_tab.lock() {
            *current = None;
        }
    }
}

#[async_trait]
impl RouteHandler for NetworkModule {
    async fn handle_route(&self, ctx: &AppContext, _full_path: &str, sub_paths: &[String]) -> PanelResult<()> {
        ctx.with_doc(|d| d.show("network-page"));
        self.show_tab(ctx, sub_tab(sub_paths, DEFAULT_TAB)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{AutoConfirm, ToastKind};
    use ubus_rpc::{MockUbus, RPCErrors};
    use wrt_api::{MemoryStorage, PanelConfig, RouterClient};

    fn mock() -> Arc<MockUbus> {
        let mock = Arc::new(MockUbus::new());
        mock.on("session", "login", json!({"ubus_rpc_session": "c0ffee"}))
            .on("system", "info", json!({}))
            .on("system", "board", json!({}))
            .on("uci", "set", json!({}))
            .on("uci", "add", json!({"section": "cfg0a1b2c"}))
            .on("uci", "delete", json!({}))
            .on("uci", "commit", json!({}))
            .on("file", "exec", json!({"code": 0, "stdout": ""}));
        mock
    }

    async fn context(mock: Arc<MockUbus>, confirm: bool) -> Arc<AppContext> {
        let config = PanelConfig {
            settle_delay_ms: 0,
            ..Default::default()
        };
        let ctx = AppContext::new(
            config,
            Arc::new(RouterClient::new(mock)),
            Arc::new(MemoryStorage::new()),
            Arc::new(AutoConfirm(confirm)),
        );
        ctx.login("root", "pw", false).await.unwrap();
        ctx.stop_polling();
        ctx.with_doc(|d| d.take_toasts());
        ctx
    }

    fn toasts(ctx: &AppContext) -> Vec<(ToastKind, String)> {
        ctx.with_doc(|d| d.take_toasts())
            .into_iter()
            .map(|t| (t.kind, t.message))
            .collect()
    }

    #[test]
    fn test_forward_values() {
        let kind = section_kind("forward").unwrap();
        let err = section_values(kind, &FormData::new().with("name", "web")).unwrap_err();
        assert!(matches!(err, PanelError::Validation(m) if m == "Name, external port, and internal IP are required"));

        let form = FormData::new()
            .with("name", "web")
            .with("src_dport", "8080")
            .with("dest_ip", "192.168.1.10");
        let values = section_values(kind, &form).unwrap();
        assert_eq!(values["target"], "DNAT");
        assert_eq!(values["src"], "wan");
        assert_eq!(values["dest"], "lan");
        assert_eq!(values["proto"], "tcp");
        assert_eq!(values["enabled"], "1");
        assert!(values.get("dest_port").is_none());
    }

    #[test]
    fn test_lease_and_peer_values() {
        let lease = section_kind("static-lease").unwrap();
        let err = section_values(lease, &FormData::new().with("mac", "nope").with("ip", "10.0.0.2")).unwrap_err();
        assert!(matches!(err, PanelError::Validation(m) if m == "Invalid MAC address format"));
        let values = section_values(lease, &FormData::new().with("mac", "aa:bb:cc:dd:ee:ff").with("ip", "10.0.0.2")).unwrap();
        assert_eq!(values["name"], "aa:bb:cc:dd:ee:ff");

        let peer = section_kind("wg-peer").unwrap();
        let form = FormData::new()
            .with("interface", "wg0")
            .with("public_key", "abc=")
            .with("allowed_ips", "10.9.0.2/32, 10.9.1.0/24");
        let values = section_values(peer, &form).unwrap();
        assert_eq!(values["allowed_ips"], json!(["10.9.0.2/32", "10.9.1.0/24"]));
        assert_eq!(peer.new_section_type(&form), "wireguard_wg0");
        let bad = FormData::new().with("interface", "wg0; reboot").with("public_key", "k");
        assert!(section_values(peer, &bad).is_err());
    }

    #[test]
    fn test_rows() {
        let s = UciSection::from_value(
            "cfg01",
            &json!({".type": "redirect", "name": "ssh", "src_dport": "2222", "dest_ip": "10.0.0.5", "enabled": "0"}),
        )
        .unwrap();
        let row = section_row(section_kind("forward").unwrap(), &s);
        assert_eq!(row[1], Cell::text("TCP"));
        assert_eq!(row[4], Cell::text("2222"));
        assert_eq!(row[5], Cell::badge(false, "YES", "NO"));
        assert_eq!(row[6], Cell::edit_delete("cfg01"));

        let ddns = UciSection::from_value("myddns", &json!({".type": "service"})).unwrap();
        let row = section_row(section_kind("ddns").unwrap(), &ddns);
        assert_eq!(row[1], Cell::text("Custom"));
        assert_eq!(row[3], Cell::badge(false, "ENABLED", "DISABLED"));

        assert_eq!(lease_expiry(&json!({"expires": 3725})), "62m");
        assert_eq!(lease_expiry(&json!({})), "Static");
    }

    #[tokio::test]
    async fn test_firewall_tab_and_save_forward() {
        let mock = mock();
        mock.on_params(
            "uci",
            "get",
            |p| p["config"] == "firewall",
            json!({"values": {
                "cfg01": {".type": "redirect", ".name": "cfg01", ".index": 1, "name": "web", "src_dport": "80", "dest_ip": "10.0.0.2"},
                "cfg02": {".type": "rule", ".name": "cfg02", ".index": 2, "name": "Allow-Ping", "proto": "icmp", "target": "ACCEPT"},
                "cfg03": {".type": "zone", ".name": "cfg03", ".index": 0}
            }}),
        );
        let ctx = context(mock.clone(), true).await;

        ctx.navigate("/network/firewall").await;
        ctx.with_doc(|d| {
            assert!(!d.is_hidden("tab-firewall"));
            assert!(d.is_hidden("tab-interfaces"));
            assert!(d.has_class("tab-btn-firewall", "active"));
            assert_eq!(d.table("firewall-table").unwrap().rows.len(), 1);
            assert_eq!(d.table("firewall-rules-table").unwrap().rows[0][3], Cell::text("ICMP"));
        });

        mock.clear_calls();
        let form = FormData::new()
            .with("name", "game")
            .with("src_dport", "3074")
            .with("dest_ip", "192.168.1.50");
        ctx.perform("network", "save-forward", None, &form).await.unwrap();

        let methods: Vec<String> = mock
            .calls()
            .iter()
            .map(|c| format!("{}.{}", c.object, c.method))
            .collect();
        assert_eq!(&methods[..3], &["uci.add", "uci.commit", "file.exec"]);
        let add = &mock.calls_to("uci", "add")[0];
        assert_eq!(add.params["type"], "redirect");
        assert_eq!(add.params["values"]["target"], "DNAT");
        let exec = &mock.calls_to("file", "exec")[0];
        assert_eq!(exec.params["command"], "/etc/init.d/firewall");
        assert_eq!(exec.params["params"], json!(["reload"]));
        assert_eq!(toasts(&ctx), vec![(ToastKind::Success, "Port forwarding rule saved".to_string())]);
    }

    #[tokio::test]
    async fn test_validation_makes_no_calls() {
        let mock = mock();
        let ctx = context(mock.clone(), true).await;
        mock.clear_calls();
        let form = FormData::new().with("name", "x");
        assert!(ctx.perform("network", "save-forward", None, &form).await.is_err());
        assert!(mock.calls().is_empty());
        assert_eq!(
            toasts(&ctx),
            vec![(ToastKind::Error, "Name, external port, and internal IP are required".to_string())]
        );

        let form = FormData::new().with("section", "default_radio0").with("ssid", "home").with("encryption", "psk2").with("key", "short");
        assert!(ctx.perform("network", "save-wifi", None, &form).await.is_err());
        assert!(mock.calls().is_empty());
    }

    #[tokio::test]
    async fn test_peer_edit_keeps_interface() {
        let mock = mock();
        mock.on_params(
            "uci",
            "get",
            |p| p["config"] == "network" && p["section"] == "cfg0peer",
            json!({"values": {".type": "wireguard_wg0", ".name": "cfg0peer", "public_key": "abc="}}),
        );
        let ctx = context(mock.clone(), true).await;
        mock.clear_calls();

        let moved = FormData::new()
            .with("section", "cfg0peer")
            .with("interface", "wg1")
            .with("public_key", "abc=");
        let err = ctx.perform("network", "save-wg-peer", None, &moved).await.unwrap_err();
        assert!(matches!(err, PanelError::Validation(m) if m == "Interface of an existing peer cannot be changed"));
        assert_eq!(mock.call_count("uci", "set"), 0);
        assert_eq!(mock.call_count("uci", "commit"), 0);
        assert_eq!(
            toasts(&ctx),
            vec![(ToastKind::Error, "Interface of an existing peer cannot be changed".to_string())]
        );

        let same = moved.clone().with("interface", "wg0").with("description", "laptop");
        ctx.perform("network", "save-wg-peer", None, &same).await.unwrap();
        let set = &mock.calls_to("uci", "set")[0];
        assert_eq!(set.params["section"], "cfg0peer");
        assert_eq!(set.params["values"]["description"], "laptop");
    }

    #[tokio::test]
    async fn test_delete_needs_confirmation() {
        let mock = mock();
        mock.on_params("uci", "get", |p| p["config"] == "dhcp", json!({"values": {}}));
        let ctx = context(mock.clone(), false).await;
        mock.clear_calls();
        let err = ctx
            .perform("network", "delete-static-lease", Some("cfg07"), &FormData::new())
            .await
            .unwrap_err();
        assert!(matches!(err, PanelError::Cancelled));
        assert!(mock.calls().is_empty());
        assert!(toasts(&ctx).is_empty());

        let ctx = context(mock.clone(), true).await;
        mock.clear_calls();
        ctx.perform("network", "delete-static-lease", Some("cfg07"), &FormData::new())
            .await
            .unwrap();
        assert_eq!(mock.calls_to("uci", "delete")[0].params["section"], "cfg07");
        assert_eq!(mock.calls_to("file", "exec")[0].params["command"], "/etc/init.d/dnsmasq");
        assert_eq!(toasts(&ctx), vec![(ToastKind::Success, "Static lease deleted".to_string())]);
        assert_eq!(
            ctx.with_doc(|d| d.table("dhcp-static-table").unwrap().empty_message.clone()),
            Some("No static leases".to_string())
        );
    }

    #[tokio::test]
    async fn test_edit_then_save_interface() {
        let mock = mock();
        mock.on_params(
            "uci",
            "get",
            |p| p["config"] == "network" && p["section"] == "lan",
            json!({"values": {".type": "interface", "proto": "static", "ipaddr": "192.168.1.1",
                              "netmask": "255.255.255.0", "dns": ["1.1.1.1", "9.9.9.9"]}}),
        )
        .on("network.interface", "dump", json!({"interface": []}));
        let ctx = context(mock.clone(), true).await;

        ctx.perform("network", "edit-iface", Some("lan"), &FormData::new()).await.unwrap();
        ctx.with_doc(|d| {
            assert!(!d.is_hidden("iface-modal"));
            assert_eq!(d.value("edit-iface-dns"), "1.1.1.1 9.9.9.9");
        });

        mock.clear_calls();
        let form = FormData::new().with("ipaddr", "192.168.2.1");
        ctx.perform("network", "save-iface", None, &form).await.unwrap();
        let set = &mock.calls_to("uci", "set")[0];
        assert_eq!(set.params["section"], "lan");
        assert_eq!(set.params["values"]["ipaddr"], "192.168.2.1");
        assert_eq!(set.params["values"]["dns"], json!(["1.1.1.1", "9.9.9.9"]));
        assert!(ctx.with_doc(|d| d.is_hidden("iface-modal")));
        assert_eq!(
            ctx.with_doc(|d| d.table("interfaces-table").unwrap().empty_message.clone()),
            Some("No interfaces found".to_string())
        );
    }

    #[tokio::test]
    async fn test_diagnostics() {
        let mock = mock();
        // etherwake and wol both fail
        mock.fail("file", "exec", RPCErrors::Protocol("Not found".to_string()))
            .on_params(
                "file",
                "exec",
                |p| p["command"] == "/bin/ping",
                json!({"code": 0, "stdout": "PING 1.1.1.1\n\n4 packets transmitted\n"}),
            );
        let ctx = context(mock.clone(), true).await;

        ctx.perform("network", "ping", None, &FormData::new().with("host", "1.1.1.1"))
            .await
            .unwrap();
        let ping = &mock.calls_to("file", "exec").last().cloned().unwrap();
        assert_eq!(ping.params["params"], json!(["-c", "4", "1.1.1.1"]));
        assert_eq!(ping.timeout, Some(ctx.config().long_call_timeout()));
        assert_eq!(ctx.with_doc(|d| d.log("ping-output").len()), 2);

        assert!(ctx
            .perform("network", "ping", None, &FormData::new().with("host", "-f"))
            .await
            .is_err());

        let err = ctx
            .perform("network", "wol", None, &FormData::new().with("mac", "aa:bb:cc:dd:ee:ff"))
            .await;
        assert!(err.is_err());
        let commands: Vec<String> = mock
            .calls_to("file", "exec")
            .iter()
            .map(|c| c.params["command"].as_str().unwrap_or("").to_string())
            .collect();
        assert!(commands.ends_with(&["/usr/bin/etherwake".to_string(), "/usr/bin/wol".to_string()]));
        assert!(toasts(&ctx).contains(&(ToastKind::Error, "Failed to send WOL packet".to_string())));
    }
}
