use async_trait::async_trait;
use log::*;
use std::sync::Arc;
use wrt_api::{parse_uci_sections, UciSection};

use crate::{AppContext, Cell, FormData, ModuleCapabilities, PanelError, PanelModule, PanelResult, RouteHandler, Table};

const QOS_COLUMNS: &[&str] = &["Name", "Target", "Protocol", "Source", "Status"];
const DDNS_COLUMNS: &[&str] = &["Name", "Service", "Domain", "Status"];

pub fn qos_row(rule: &UciSection) -> Vec<Cell> {
    vec![
        Cell::text(rule.name.clone()),
        Cell::text(rule.get_or("target", "Default")),
        Cell::text(rule.get_or("proto", "all")),
        Cell::text(rule.get_or("srchost", "any")),
        Cell::badge(!rule.is("enabled", "0"), "ACTIVE", "INACTIVE"),
    ]
}

pub fn ddns_row(service: &UciSection) -> Vec<Cell> {
    vec![
        Cell::text(service.name.clone()),
        Cell::text(service.get_or("service_name", "Custom")),
        Cell::text(service.get_or("domain", "N/A")),
        Cell::badge(service.is("enabled", "1"), "ENABLED", "DISABLED"),
    ]
}

/// Read-only QoS and DDNS overview.
pub struct ServicesModule;

pub fn create(ctx: &AppContext) -> Arc<dyn PanelModule> {
    let module = Arc::new(ServicesModule);
    ctx.register_route("/services", module.clone());
    module
}

impl ServicesModule {
    /// Sections of `section_type` in `config`. A config without values counts as not configured.
    async fn sections(ctx: &AppContext, config: &str, section_type: &str) -> PanelResult<Vec<UciSection>> {
        let payload = ctx.client().uci_get(config, None).await?;
        if !payload.get("values").map(|v| v.is_object()).unwrap_or(false) {
            return Err(PanelError::ReasonError(format!("{} not configured", config)));
        }
        Ok(parse_uci_sections(&payload)
            .into_iter()
            .filter(|s| s.section_type == section_type)
            .collect())
    }

    async fn load_table(
        ctx: &AppContext,
        (config, section_type): (&str, &str),
        (table_id, columns): (&str, &[&str]),
        row: fn(&UciSection) -> Vec<Cell>,
        (empty, fail): (&str, &str),
    ) {
        let result = Self::sections(ctx, config, section_type).await.map(|sections| {
            let mut table = Table::new(columns);
            for section in &sections {
                table.push(row(section));
            }
            table.or_empty(empty)
        });
        if let Err(err) = &result {
            warn!("load {} failed: {}", config, err);
        }
        ctx.put_table(table_id, columns, result, fail);
    }

    async fn load_qos(&self, ctx: &AppContext) {
        if !ctx.is_feature_enabled("qos") {
            return;
        }
        Self::load_table(
            ctx,
            ("qos", "classify"),
            ("qos-table", QOS_COLUMNS),
            qos_row,
            ("No QoS rules configured", "QoS not configured"),
        )
        .await;
    }

    async fn load_ddns(&self, ctx: &AppContext) {
        if !ctx.is_feature_enabled("ddns") {
            return;
        }
        Self::load_table(
            ctx,
            ("ddns", "service"),
            ("ddns-table", DDNS_COLUMNS),
            ddns_row,
            ("No DDNS services configured", "DDNS not configured"),
        )
        .await;
    }
}

#[async_trait]
impl PanelModule for ServicesModule {
    fn name(&self) -> &'static str {
        "services"
    }

    fn capabilities(&self) -> ModuleCapabilities {
        ModuleCapabilities {
            load: true,
            ..Default::default()
        }
    }

    async fn load(&self, ctx: &AppContext) -> PanelResult<()> {
        ctx.with_doc(|d| d.show("services-page"));
        self.load_qos(ctx).await;
        self.load_ddns(ctx).await;
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
            "refresh" => self.load(ctx).await,
            _ => Err(PanelError::UnknownAction(action.to_string())),
        }
    }
}

#[async_trait]
impl RouteHandler for ServicesModule {
    async fn handle_route(&self, ctx: &AppContext, _full_path: &str, _sub_paths: &[String]) -> PanelResult<()> {
        self.load(ctx).await
    }
}
