use async_trait::async_trait;
use log::*;
use std::sync::Arc;
use wrt_api::{parse_uci_sections, UciSection};

use crate::{AppContext, Cell, FormData, ModuleCapabilities, PanelError, PanelModule, PanelResult, RouteHandler, Table, ToastKind};

const WIREGUARD_COLUMNS: &[&str] = &["Interface", "Private Key", "Listen Port", "Status"];
const LOAD_FAILED: &str = "Failed to load WireGuard configuration";

pub fn wireguard_row(iface: &UciSection) -> Vec<Cell> {
    let key = match iface.get("private_key").filter(|k| !k.is_empty()) {
        Some(key) => key.chars().take(20).collect(),
        None => "N/A".to_string(),
    };
    vec![
        Cell::text(iface.name.clone()),
        Cell::text(format!("{}...", key)),
        Cell::text(iface.get_or("listen_port", "N/A")),
        Cell::badge(!iface.is("disabled", "1"), "ENABLED", "DISABLED"),
    ]
}

/// WireGuard interfaces overview.
#[derive(Default)]
pub struct VpnModule;

pub fn create(ctx: &AppContext) -> Arc<dyn PanelModule> {
    let module = Arc::new(VpnModule);
    ctx.register_route("/vpn", module.clone());
    module
}

impl VpnModule {
    async fn load_wireguard(&self, ctx: &AppContext) {
        if !ctx.is_feature_enabled("wireguard") {
            return;
        }
        let result = async {
            let payload = ctx.client().uci_get("network", None).await?;
            if !payload.get("values").map(|v| v.is_object()).unwrap_or(false) {
                return Err(PanelError::ReasonError("Failed to fetch network config".to_string()));
            }
            let mut table = Table::new(WIREGUARD_COLUMNS);
            for iface in parse_uci_sections(&payload).iter().filter(|s| s.is("proto", "wireguard")) {
                table.push(wireguard_row(iface));
            }
            Ok(table.or_empty("No WireGuard interfaces configured"))
        }
        .await;
        if let Err(err) = &result {
            error!("Failed to load WireGuard config: {}", err);
            ctx.toast(LOAD_FAILED, ToastKind::Error);
        }
        ctx.put_table("wireguard-table", WIREGUARD_COLUMNS, result, LOAD_FAILED);
    }
}

#[async_trait]
impl PanelModule for VpnModule {
    fn name(&self) -> &'static str {
        "vpn"
    }

    fn capabilities(&self) -> ModuleCapabilities {
        ModuleCapabilities {
            load: true,
            ..Default::default()
        }
    }

    async fn load(&self, ctx: &AppContext) -> PanelResult<()> {
        ctx.with_doc(|d| d.show("vpn-page"));
        self.load_wireguard(ctx).await;
        Ok(())
    }

    async fn handle_action(
        &self,
        ctx: &AppContext,
        action: &str,
        _id: Option<&str>,
        _form: &FormData,
    ) -> PanelResult<()> {
        match action {
            "refresh" => {
                self.load_wireguard(ctx).await;
                Ok(())
            }
            _ => Err(PanelError::UnknownAction(action.to_string())),
        }
    }
}

#[async_trait]
impl RouteHandler for VpnModule {
    async fn handle_route(&self, ctx: &AppContext, _full_path: &str, _sub_paths: &[String]) -> PanelResult<()> {
        self.load(ctx).await
    }
}
