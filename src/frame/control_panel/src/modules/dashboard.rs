use async_trait::async_trait;
use log::*;
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use tokio::time::Instant;
use wrt_api::ReplyExt;

use crate::{
    format_memory, format_rate, format_uptime, memory_percent, AppContext, BadgeKind, BandwidthChart, BandwidthHistory, Cell,
    LogClass, LogLine, ModuleCapabilities, PanelError, PanelModule, PanelResult, RouteHandler, Table,
};

const LOG_TAIL: usize = 20;
const CONNECTION_COLUMNS: &[&str] = &["IP Address", "MAC Address", "Hostname", "Status"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CpuSample {
    pub idle: u64,
    pub total: u64,
}

/// Aggregate `cpu` line of `/proc/stat`.
pub fn parse_cpu_stats(content: &str) -> Option<CpuSample> {
    let line = content.lines().next()?;
    let values: Vec<u64> = line
        .split_whitespace()
        .skip(1)
        .map(|v| v.parse::<u64>().unwrap_or(0))
        .collect();
    let idle = *values.get(3)?;
    Some(CpuSample {
        idle,
        total: values.iter().sum(),
    })
}

/// Busy percentage between two samples, one decimal. None on the first
/// sample and when no time has passed.
pub fn cpu_usage(current: &CpuSample, previous: Option<&CpuSample>) -> Option<f64> {
    let previous = previous?;
    let total = current.total.checked_sub(previous.total)?;
    if total == 0 {
        return None;
    }
    let idle = current.idle.saturating_sub(previous.idle).min(total);
    let usage = (1.0 - idle as f64 / total as f64) * 100.0;
    Some((usage * 10.0).round() / 10.0)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NetSample {
    pub rx: u64,
    pub tx: u64,
}

/// Byte totals over all devices of `/proc/net/dev` except loopback.
pub fn parse_net_dev(content: &str) -> NetSample {
    let mut sample = NetSample::default();
    for line in content.lines().skip(2) {
        let line = line.trim();
        if line.is_empty() || line.starts_with("lo:") {
            continue;
        }
        // "eth0: 123 ..." and "eth0:123 ..." both occur
        let line = line.replacen(':', ": ", 1);
        let parts: Vec<&str> = line.split_whitespace().collect();
        let field = |i: usize| parts.get(i).and_then(|v| v.parse::<u64>().ok()).unwrap_or(0);
        sample.rx += field(1);
        sample.tx += field(9);
    }
    sample
}

/// (down, up) in kbps. A counter that went backwards counts as 0.
pub fn bandwidth_rates(current: &NetSample, previous: &NetSample, elapsed_secs: f64) -> (f64, f64) {
    if elapsed_secs <= 0.0 {
        return (0.0, 0.0);
    }
    let rate = |now: u64, before: u64| now.saturating_sub(before) as f64 * 8.0 / 1000.0 / elapsed_secs;
    (rate(current.rx, previous.rx), rate(current.tx, previous.tx))
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct InternetLink {
    pub interface: String,
    pub ip: Option<String>,
    pub gateway: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct WanStatus {
    pub lan_ip: Option<String>,
    pub internet: Option<InternetLink>,
}

fn first_ipv4(iface: &Value) -> Option<String> {
    iface
        .get("ipv4-address")?
        .as_array()?
        .first()?
        .get("address")?
        .as_str()
        .map(|s| s.to_string())
}

fn is_up(iface: &Value) -> bool {
    iface.get("up").and_then(|u| u.as_bool()).unwrap_or(false)
}

fn iface_name(iface: &Value) -> &str {
    iface.get("interface").and_then(|i| i.as_str()).unwrap_or("")
}

/// LAN and internet link from a `network.interface dump`.
pub fn parse_wan_status(interfaces: &[Value]) -> WanStatus {
    let lan = interfaces
        .iter()
        .find(|i| iface_name(i) == "lan" || i.get("device").and_then(|d| d.as_str()) == Some("br-lan"))
        .or_else(|| {
            interfaces
                .iter()
                .find(|i| is_up(i) && first_ipv4(i).is_some() && iface_name(i) != "loopback")
        });

    let internet = interfaces
        .iter()
        .filter(|i| is_up(i) && iface_name(i) != "loopback")
        .find_map(|iface| {
            let route = iface
                .get("route")?
                .as_array()?
                .iter()
                .find(|r| r.get("target").and_then(|t| t.as_str()) == Some("0.0.0.0"))?;
            Some(InternetLink {
                interface: iface_name(iface).to_string(),
                ip: first_ipv4(iface),
                gateway: route.get("nexthop").and_then(|n| n.as_str()).map(|n| n.to_string()),
            })
        });

    WanStatus {
        lan_ip: lan.and_then(first_ipv4),
        internet,
    }
}

/// Complete entries of `/proc/net/arp`.
pub fn count_arp_clients(content: &str) -> usize {
    content
        .lines()
        .skip(1)
        .filter(|line| {
            let parts: Vec<&str> = line.split_whitespace().collect();
            parts.len() >= 4 && parts[2] != "0x0"
        })
        .count()
}

/// Last lines of the syslog, tagged by severity keyword.
pub fn classify_log(stdout: &str) -> Vec<LogLine> {
    let lines: Vec<&str> = stdout.lines().filter(|l| !l.trim().is_empty()).collect();
    let start = lines.len().saturating_sub(LOG_TAIL);
    lines[start..]
        .iter()
        .map(|line| {
            let lower = line.to_lowercase();
            let class = if lower.contains("error") || lower.contains("fail") {
                LogClass::Error
            } else if lower.contains("warn") {
                LogClass::Warn
            } else {
                LogClass::Normal
            };
            LogLine {
                class,
                text: line.to_string(),
            }
        })
        .collect()
}

#[derive(Default)]
struct DashboardState {
    last_cpu: Option<CpuSample>,
    last_net: Option<(NetSample, Instant)>,
    history: BandwidthHistory,
    chart_ready: bool,
}

#[derive(Default)]
pub struct DashboardModule {
    state: Mutex<DashboardState>,
    chart: BandwidthChart,
}

pub fn create(ctx: &AppContext) -> Arc<dyn PanelModule> {
    let module = Arc::new(DashboardModule::default());
    ctx.register_route("/dashboard", module.clone());
    module
}

impl DashboardModule {
    fn state(&self) -> std::sync::MutexGuard<'_, DashboardState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    async fn load_system_info(&self, ctx: &AppContext) -> PanelResult<()> {
        let client = ctx.client();
        let info = client
            .call("system", "info", json!({}))
            .await?
            .into_payload("system", "info")?;
        let board = client
            .call("system", "board", json!({}))
            .await?
            .into_payload("system", "board")?;

        let hostname = board
            .get("hostname")
            .and_then(|h| h.as_str())
            .filter(|h| !h.is_empty())
            .unwrap_or("OpenWrt")
            .to_string();
        let uptime = info.get("uptime").and_then(|u| u.as_u64()).unwrap_or(0);
        let total = info.pointer("/memory/total").and_then(|v| v.as_u64()).unwrap_or(0);
        let free = info.pointer("/memory/free").and_then(|v| v.as_u64()).unwrap_or(0);
        let load = info
            .get("load")
            .and_then(|l| l.as_array())
            .map(|l| {
                l.iter()
                    .map(|v| format!("{:.2}", v.as_f64().unwrap_or(0.0) / 65536.0))
                    .collect::<Vec<_>>()
                    .join(", ")
            })
            .unwrap_or_default();

        ctx.with_doc(|d| {
            d.set_text("hostname", &hostname);
            d.set_text("uptime", &format_uptime(uptime));
            d.set_text("memory", &format_memory(total, free));
            d.set_width("memory-bar", memory_percent(total, free) as f64);
            d.set_text("load", &load);
        });
        Ok(())
    }

    async fn update_cpu(&self, ctx: &AppContext) {
        let sample = match ctx.client().file_read("/proc/stat").await {
            Ok(content) => parse_cpu_stats(&content),
            Err(err) => {
                debug!("read /proc/stat failed: {}", err);
                None
            }
        };
        let usage = {
            let mut state = self.state();
            match sample {
                Some(sample) => {
                    let usage = cpu_usage(&sample, state.last_cpu.as_ref());
                    state.last_cpu = Some(sample);
                    usage
                }
                None => None,
            }
        };
        ctx.with_doc(|d| match usage {
            Some(usage) => {
                d.set_text("cpu", &format!("{:.1}%", usage));
                d.set_width("cpu-bar", usage);
            }
            None => d.set_text("cpu", "N/A"),
        });
    }

    async fn update_network_stats(&self, ctx: &AppContext) {
        let content = match ctx.client().file_read("/proc/net/dev").await {
            Ok(content) => content,
            Err(err) => {
                error!("updateNetworkStats error: {}", err);
                return;
            }
        };
        let sample = parse_net_dev(&content);
        let now = Instant::now();
        let (rates, chart) = {
            let mut state = self.state();
            let rates = state.last_net.map(|(previous, at)| {
                let elapsed = now.duration_since(at).as_secs_f64();
                let elapsed = if elapsed > 0.0 {
                    elapsed
                } else {
                    ctx.config().poll_interval().as_secs_f64()
                };
                bandwidth_rates(&sample, &previous, elapsed)
            });
            state.last_net = Some((sample, now));
            if let Some((down, up)) = rates {
                state.history.push(down, up);
            }
            let chart = if rates.is_some() && state.chart_ready {
                Some(self.chart.render(&state.history))
            } else {
                None
            };
            (rates, chart)
        };

        if let Some((down, up)) = rates {
            ctx.with_doc(|d| {
                d.set_text("bandwidth-down", &format_rate(down));
                d.set_text("bandwidth-up", &format_rate(up));
                if let Some(svg) = chart {
                    d.set_chart("bandwidth-graph", svg);
                }
            });
        }
    }

    async fn fetch_interfaces(&self, ctx: &AppContext) -> PanelResult<Vec<Value>> {
        let payload = ctx
            .client()
            .call("network.interface", "dump", json!({}))
            .await?
            .into_payload("network.interface", "dump")?;
        payload
            .get("interface")
            .and_then(|i| i.as_array())
            .cloned()
            .ok_or_else(|| PanelError::ReasonError("Failed to fetch WAN interfaces".to_string()))
    }

    async fn update_wan_status(&self, ctx: &AppContext) {
        let status = match self.fetch_interfaces(ctx).await {
            Ok(interfaces) => Some(parse_wan_status(&interfaces)),
            Err(err) => {
                error!("Failed to load WAN status: {}", err);
                None
            }
        };
        ctx.with_doc(|d| {
            let Some(status) = status else {
                d.add_class("wan-status-hero", "offline");
                d.remove_class("wan-status-hero", "online");
                d.set_text("wan-status", "UNKNOWN");
                return;
            };
            d.set_text("lan-ip", status.lan_ip.as_deref().unwrap_or("---.---.---.---"));
            match status.internet {
                Some(link) => {
                    d.add_class("wan-status-hero", "online");
                    d.remove_class("wan-status-hero", "offline");
                    d.set_text("wan-status", "ONLINE");
                    let text = match (link.ip, link.gateway) {
                        (Some(ip), _) => ip,
                        (None, Some(gateway)) => format!("Gateway: {}", gateway),
                        (None, None) => "Connected".to_string(),
                    };
                    d.set_text("wan-ip", &text);
                }
                None => {
                    d.add_class("wan-status-hero", "offline");
                    d.remove_class("wan-status-hero", "online");
                    d.set_text("wan-status", "OFFLINE");
                    d.set_text("wan-ip", "No internet route");
                }
            }
        });
    }

    async fn update_system_log(&self, ctx: &AppContext) {
        let lines = match ctx.client().file_exec("/usr/libexec/syslog-wrapper", &[], None).await {
            Ok(result) => classify_log(&result.stdout),
            Err(err) => {
                error!("Failed to load system log: {}", err);
                Vec::new()
            }
        };
        let lines = if lines.is_empty() {
            vec![LogLine::normal("No logs available")]
        } else {
            lines
        };
        ctx.with_doc(|d| d.set_log("system-log", lines));
    }

    async fn update_connections(&self, ctx: &AppContext) {
        let client = ctx.client();
        let clients = match client.file_read("/proc/net/arp").await {
            Ok(content) => count_arp_clients(&content),
            Err(_) => 0,
        };

        let leases = match client.call("luci-rpc", "getDHCPLeases", json!({})).await {
            Ok(reply) if reply.status == 0 => reply
                .payload
                .get("dhcp_leases")
                .and_then(|l| l.as_array())
                .cloned()
                .unwrap_or_default(),
            Ok(_) => Vec::new(),
            Err(err) => {
                debug!("getDHCPLeases failed: {}", err);
                Vec::new()
            }
        };

        let mut table = Table::new(CONNECTION_COLUMNS);
        for lease in &leases {
            let field = |key: &str| lease.get(key).and_then(|v| v.as_str()).unwrap_or("Unknown").to_string();
            table.push(vec![
                Cell::text(field("ipaddr")),
                Cell::text(field("macaddr")),
                Cell::text(field("hostname")),
                Cell::Badge(BadgeKind::Success, "Active".to_string()),
            ]);
        }
        let table = table.or_empty("No active connections");

        ctx.with_doc(|d| {
            d.set_text("clients", &clients.to_string());
            d.set_table("connections-table", table);
        });
    }

    fn init_chart(&self, ctx: &AppContext) {
        let svg = {
            let mut state = self.state();
            if state.chart_ready {
                return;
            }
            state.chart_ready = true;
            self.chart.render(&state.history)
        };
        ctx.with_doc(|d| d.set_chart("bandwidth-graph", svg));
    }

    pub fn history(&self) -> BandwidthHistory {
        self.state().history.clone()
    }
}

#[async_trait]
impl PanelModule for DashboardModule {
    fn name(&self) -> &'static str {
        "dashboard"
    }

    fn capabilities(&self) -> ModuleCapabilities {
        ModuleCapabilities {
            load: true,
            update: true,
            cleanup: false,
        }
    }

    async fn load(&self, ctx: &AppContext) -> PanelResult<()> {
        ctx.with_doc(|d| d.show("dashboard-page"));
        if let Err(err) = self.load_system_info(ctx).await {
            error!("Failed to load dashboard: {}", err);
            ctx.toast("Failed to load system information", crate::ToastKind::Error);
            return Ok(());
        }
        self.update_cpu(ctx).await;
        self.update_network_stats(ctx).await;
        self.update_wan_status(ctx).await;
        self.update_system_log(ctx).await;
        self.update_connections(ctx).await;
        self.init_chart(ctx);
        Ok(())
    }

    async fn update(&self, ctx: &AppContext) -> PanelResult<()> {
        self.update_cpu(ctx).await;
        self.update_network_stats(ctx).await;
        self.update_wan_status(ctx).await;
        Ok(())
    }

    async fn handle_action(
        &self,
        ctx: &AppContext,
        action: &str,
        _id: Option<&str>,
        _form: &crate::FormData,
    ) -> PanelResult<()> {
        match action {
            "refresh" => self.load(ctx).await,
            "refresh-log" => {
                self.update_system_log(ctx).await;
                Ok(())
            }
            "refresh-connections" => {
                self.update_connections(ctx).await;
                Ok(())
            }
            other => Err(PanelError::UnknownAction(other.to_string())),
        }
    }
}

#[async_trait]
impl RouteHandler for DashboardModule {
    async fn handle_route(&self, ctx: &AppContext, _full_path: &str, _sub_paths: &[String]) -> PanelResult<()> {
        self.load(ctx).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{AutoConfirm, ToastKind, ViewState};
    use std::time::Duration;
    use ubus_rpc::{MockUbus, RPCErrors};
    use wrt_api::{MemoryStorage, PanelConfig, RouterClient};

    const STAT_1: &str = "cpu  100 0 100 800 0 0 0 0 0 0\ncpu0 1 2 3 4\n";
    const STAT_2: &str = "cpu  150 0 150 900 0 0 0 0 0 0\n";
    const NET_1: &str = "Inter-|   Receive |  Transmit\n face |bytes packets|bytes\n    lo: 5000 10 0 0 0 0 0 0 5000 10 0 0 0 0 0 0\n  eth0: 1000 10 0 0 0 0 0 0 2000 20 0 0 0 0 0 0\n";
    const NET_2: &str = "Inter-|   Receive |  Transmit\n face |bytes packets|bytes\n    lo: 9000 10 0 0 0 0 0 0 9000 10 0 0 0 0 0 0\n  eth0: 376000 10 0 0 0 0 0 0 2000 20 0 0 0 0 0 0\n";

    #[test]
    fn test_cpu_usage() {
        let a = parse_cpu_stats(STAT_1).unwrap();
        assert_eq!(a, CpuSample { idle: 800, total: 1000 });
        assert_eq!(cpu_usage(&a, None), None);
        let b = parse_cpu_stats(STAT_2).unwrap();
        assert_eq!(cpu_usage(&b, Some(&a)), Some(50.0));
        // no elapsed jiffies must not divide by zero
        assert_eq!(cpu_usage(&a, Some(&a)), None);
        assert!(parse_cpu_stats("").is_none());
    }

    #[test]
    fn test_net_dev_and_rates() {
        let a = parse_net_dev(NET_1);
        assert_eq!(a, NetSample { rx: 1000, tx: 2000 });
        let b = parse_net_dev(NET_2);
        let (down, up) = bandwidth_rates(&b, &a, 3.0);
        assert_eq!(down, 1000.0);
        assert_eq!(up, 0.0);
        // counter reset
        let (down, _) = bandwidth_rates(&a, &b, 3.0);
        assert_eq!(down, 0.0);
        assert_eq!(parse_net_dev("h\nh\neth1:10 0 0 0 0 0 0 0 20 0\n"), NetSample { rx: 10, tx: 20 });
    }

    #[test]
    fn test_wan_status() {
        let interfaces = vec![
            json!({"interface": "loopback", "up": true, "ipv4-address": [{"address": "127.0.0.1"}],
                   "route": [{"target": "0.0.0.0", "nexthop": "x"}]}),
            json!({"interface": "lan", "up": true, "device": "br-lan", "ipv4-address": [{"address": "192.168.1.1"}]}),
            json!({"interface": "wan", "up": true, "ipv4-address": [{"address": "203.0.113.7"}],
                   "route": [{"target": "0.0.0.0", "nexthop": "203.0.113.1"}]}),
        ];
        let status = parse_wan_status(&interfaces);
        assert_eq!(status.lan_ip.as_deref(), Some("192.168.1.1"));
        let link = status.internet.unwrap();
        assert_eq!(link.interface, "wan");
        assert_eq!(link.ip.as_deref(), Some("203.0.113.7"));
        assert_eq!(link.gateway.as_deref(), Some("203.0.113.1"));

        let down = vec![json!({"interface": "wan", "up": false, "route": [{"target": "0.0.0.0"}]})];
        assert_eq!(parse_wan_status(&down), WanStatus::default());
    }

    #[test]
    fn test_arp_and_log() {
        let arp = "IP address HW type Flags HW address Mask Device\n\
                   192.168.1.10 0x1 0x2 aa:bb:cc:dd:ee:ff * br-lan\n\
                   192.168.1.11 0x1 0x0 00:00:00:00:00:00 * br-lan\n\n";
        assert_eq!(count_arp_clients(arp), 1);

        let mut log = String::new();
        for i in 0..25 {
            log.push_str(&format!("line {}\n\n", i));
        }
        log.push_str("kernel: WARNING low memory\ndaemon: connect FAILED\n");
        let lines = classify_log(&log);
        assert_eq!(lines.len(), 20);
        assert_eq!(lines[18].class, LogClass::Warn);
        assert_eq!(lines[19].class, LogClass::Error);
        assert_eq!(lines[0].class, LogClass::Normal);
    }

    fn router_mock() -> Arc<MockUbus> {
        let mock = Arc::new(MockUbus::new());
        mock.on("session", "login", json!({"ubus_rpc_session": "c0ffee"}))
            .fail("uci", "get", RPCErrors::Protocol("Not found".to_string()))
            .on(
                "system",
                "info",
                json!({"uptime": 90061, "load": [65536, 32768, 0],
                       "memory": {"total": 536870912u64, "free": 134217728u64}}),
            )
            .on("system", "board", json!({"hostname": "edge"}))
            .on_params_sequence(
                "file",
                "read",
                |p| p["path"] == "/proc/stat",
                vec![json!({"data": STAT_1}), json!({"data": STAT_2})],
            )
            .on_params_sequence(
                "file",
                "read",
                |p| p["path"] == "/proc/net/dev",
                vec![json!({"data": NET_1}), json!({"data": NET_2})],
            )
            .on_params("file", "read", |p| p["path"] == "/proc/net/arp", json!({"data": "h\n10.0.0.2 0x1 0x2 aa:bb:cc:dd:ee:ff * br-lan\n"}))
            .on(
                "network.interface",
                "dump",
                json!({"interface": [
                    {"interface": "lan", "up": true, "ipv4-address": [{"address": "192.168.1.1"}]},
                    {"interface": "wan", "up": true, "route": [{"target": "0.0.0.0", "nexthop": "10.1.1.1"}]}
                ]}),
            )
            .on("file", "exec", json!({"code": 0, "stdout": "boot ok\nerror: disk\n"}))
            .on(
                "luci-rpc",
                "getDHCPLeases",
                json!({"dhcp_leases": [{"ipaddr": "192.168.1.20", "macaddr": "aa:bb:cc:00:11:22"}]}),
            );
        mock
    }

    fn context(mock: Arc<MockUbus>) -> Arc<AppContext> {
        AppContext::new(
            PanelConfig::default(),
            Arc::new(RouterClient::new(mock)),
            Arc::new(MemoryStorage::new()),
            Arc::new(AutoConfirm(true)),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_dashboard_load_and_update() {
        let mock = router_mock();
        let ctx = context(mock.clone());
        ctx.login("root", "pw", false).await.unwrap();
        ctx.stop_polling();
        assert_eq!(ctx.view_state(), ViewState::MainView("/dashboard".to_string()));

        ctx.with_doc(|d| {
            assert!(!d.is_hidden("dashboard-page"));
            assert_eq!(d.text("hostname"), "edge");
            assert_eq!(d.text("uptime"), "1d 1h 1m");
            assert_eq!(d.text("memory"), "384MB / 512MB (75%)");
            assert_eq!(d.text("load"), "1.00, 0.50, 0.00");
            assert_eq!(d.text("cpu"), "N/A");
            assert_eq!(d.text("wan-status"), "ONLINE");
            assert_eq!(d.text("wan-ip"), "Gateway: 10.1.1.1");
            assert_eq!(d.text("lan-ip"), "192.168.1.1");
            assert_eq!(d.text("clients"), "1");
            assert_eq!(d.log("system-log")[1].class, LogClass::Error);
            let table = d.table("connections-table").unwrap();
            assert_eq!(table.rows[0][2], Cell::text("Unknown"));
            assert!(d.chart("bandwidth-graph").is_some());
        });

        tokio::time::advance(Duration::from_secs(3)).await;
        ctx.poll_once().await;
        ctx.with_doc(|d| {
            assert_eq!(d.text("cpu"), "50.0%");
            assert_eq!(d.text("bandwidth-down"), "1.0 Mbps");
            assert_eq!(d.text("bandwidth-up"), "0 Mbps");
        });
    }

    #[tokio::test]
    async fn test_dashboard_failures() {
        let mock = router_mock();
        mock.fail("system", "info", RPCErrors::Transport("down".to_string()))
            .fail("network.interface", "dump", RPCErrors::Protocol("Access denied".to_string()));
        let ctx = context(mock);
        ctx.login("root", "pw", false).await.unwrap();
        ctx.stop_polling();

        let toasts = ctx.with_doc(|d| d.take_toasts());
        assert!(toasts
            .iter()
            .any(|t| t.message == "Failed to load system information" && t.kind == ToastKind::Error));

        ctx.poll_once().await;
        ctx.with_doc(|d| {
            assert_eq!(d.text("wan-status"), "UNKNOWN");
            assert!(d.has_class("wan-status-hero", "offline"));
        });
    }
}
