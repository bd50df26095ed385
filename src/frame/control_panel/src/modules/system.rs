use async_trait::async_trait;
use chrono::Utc;
use log::*;
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use wrt_api::{ExecResult, ReplyExt, WrtApiError};

use super::{input_value, require_id, sub_tab};
use crate::{
    format_bytes, is_valid_host, is_valid_service_name, password_has_forbidden_chars, validation, AppContext,
    BadgeKind, Cell, Download, FormData, LogLine, ModuleCapabilities, PanelError, PanelModule, PanelResult,
    RouteHandler, Table, ToastKind, SYSTEM_TABS,
};

const DEFAULT_TAB: &str = "general";

const CRONTAB_PATH: &str = "/etc/crontabs/root";
const AUTHORIZED_KEYS_PATH: &str = "/etc/dropbear/authorized_keys";
const OPKG_STATUS_PATH: &str = "/usr/lib/opkg/status";
const PASSWD_INPUT_PATH: &str = "/tmp/.passwd_input";
const BACKUP_PATH: &str = "/tmp/backup.tar.gz";
const RESTORE_PATH: &str = "/tmp/restore.tar.gz";
const FIRMWARE_PATH: &str = "/tmp/firmware.bin";
const PACKAGE_DISPLAY_LIMIT: usize = 100;

const PACKAGE_COLUMNS: &[&str] = &["Package", "Version", "Status", "Actions"];
const SERVICE_COLUMNS: &[&str] = &["Service", "Status", "Enabled", "Actions"];
const CRON_COLUMNS: &[&str] = &["Schedule", "Command", "Status", "Actions"];
const SSH_KEY_COLUMNS: &[&str] = &["Type", "Key", "Comment", "Actions"];
const MOUNT_COLUMNS: &[&str] = &["Filesystem", "Mount Point", "Type", "Size", "Used", "Available"];
const STORAGE_CHART_COLUMNS: &[&str] = &["Mount Point", "Usage"];
const LED_COLUMNS: &[&str] = &["Name", "Trigger", "Status"];
const CRON_FIELDS: &[&str] = &["index", "minute", "hour", "day", "month", "weekday", "command", "enabled"];
const SERVICE_VERBS: &[&str] = &["start", "stop", "restart", "enable", "disable"];

#[derive(Debug, Clone, PartialEq)]
pub struct CronEntry {
    pub minute: String,
    pub hour: String,
    pub day: String,
    pub month: String,
    pub weekday: String,
    pub command: String,
    pub enabled: bool,
    /// Line number in the crontab.
    pub raw_index: usize,
}

impl CronEntry {
    pub fn schedule(&self) -> String {
        format!("{} {} {} {} {}", self.minute, self.hour, self.day, self.month, self.weekday)
    }

    pub fn to_line(&self) -> String {
        format!(
            "{}{} {}",
            if self.enabled { "" } else { "# " },
            self.schedule(),
            self.command
        )
    }
}

/// Entries are non-empty lines with at least six fields. A leading `#` marks
/// a disabled entry, so plain comments with six words show up too.
pub fn parse_cron(data: &str) -> Vec<CronEntry> {
    data.split('\n')
        .enumerate()
        .filter_map(|(raw_index, line)| {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                return None;
            }
            let enabled = !trimmed.starts_with('#');
            let clean = trimmed.trim_start_matches('#').trim();
            let parts: Vec<&str> = clean.split_whitespace().collect();
            if parts.len() < 6 {
                return None;
            }
            Some(CronEntry {
                minute: parts[0].to_string(),
                hour: parts[1].to_string(),
                day: parts[2].to_string(),
                month: parts[3].to_string(),
                weekday: parts[4].to_string(),
                command: parts[5..].join(" "),
                enabled,
                raw_index,
            })
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq)]
pub struct SshKey {
    pub key_type: String,
    pub key: String,
    pub comment: String,
    pub raw_index: usize,
}

impl SshKey {
    pub fn to_line(&self) -> String {
        if self.comment.is_empty() {
            format!("{} {}", self.key_type, self.key)
        } else {
            format!("{} {} {}", self.key_type, self.key, self.comment)
        }
    }
}

pub fn parse_ssh_keys(data: &str) -> Vec<SshKey> {
    data.split('\n')
        .enumerate()
        .filter_map(|(raw_index, line)| {
            if line.trim().is_empty() || line.starts_with('#') {
                return None;
            }
            let parts: Vec<&str> = line.split_whitespace().collect();
            if parts.len() < 2 {
                return None;
            }
            Some(SshKey {
                key_type: parts[0].to_string(),
                key: parts[1].to_string(),
                comment: parts[2..].join(" "),
                raw_index,
            })
        })
        .collect()
}

/// Line-oriented rewrite of a text file: `edit` gets the raw lines, the result
/// always ends with a newline unless it is empty.
pub fn rewrite_lines<F>(raw: &str, edit: F) -> String
where
    F: FnOnce(&mut Vec<String>),
{
    let mut lines: Vec<String> = raw.split('\n').map(|l| l.to_string()).collect();
    while lines.last().map(|l| l.is_empty()).unwrap_or(false) {
        lines.pop();
    }
    edit(&mut lines);
    let mut out = lines.join("\n");
    if !out.is_empty() {
        out.push('\n');
    }
    out
}

#[derive(Debug, Clone, PartialEq)]
pub struct PackageInfo {
    pub name: String,
    pub version: String,
}

/// `Package:` / `Version:` pairs of the opkg status database.
pub fn parse_opkg_status(data: &str) -> Vec<PackageInfo> {
    data.split("\n\n")
        .filter_map(|block| {
            let mut name = None;
            let mut version = String::new();
            for line in block.lines() {
                if let Some(v) = line.strip_prefix("Package: ") {
                    name = Some(v.trim().to_string());
                } else if let Some(v) = line.strip_prefix("Version: ") {
                    version = v.trim().to_string();
                }
            }
            name.map(|name| PackageInfo { name, version })
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq)]
pub struct MountInfo {
    pub device: String,
    pub size: String,
    pub used: String,
    pub available: String,
    pub use_percent: String,
    pub mount_point: String,
}

impl MountInfo {
    pub fn percent(&self) -> f64 {
        self.use_percent.trim_end_matches('%').parse().unwrap_or(0.0)
    }
}

/// Rows of `df -h` output, header skipped.
pub fn parse_df(stdout: &str) -> Vec<MountInfo> {
    stdout
        .lines()
        .skip(1)
        .filter_map(|line| {
            let parts: Vec<&str> = line.split_whitespace().collect();
            if parts.len() < 6 {
                return None;
            }
            Some(MountInfo {
                device: parts[0].to_string(),
                size: parts[1].to_string(),
                used: parts[2].to_string(),
                available: parts[3].to_string(),
                use_percent: parts[4].to_string(),
                mount_point: parts[5..].join(" "),
            })
        })
        .collect()
}

/// `(name, running)` from a `service list` payload. A service runs when it has instances.
pub fn parse_service_list(payload: &Value) -> Vec<(String, bool)> {
    payload
        .as_object()
        .map(|services| {
            services
                .iter()
                .map(|(name, info)| {
                    let running = info
                        .get("instances")
                        .and_then(|i| i.as_object())
                        .map(|i| !i.is_empty())
                        .unwrap_or(false);
                    (name.clone(), running)
                })
                .collect()
        })
        .unwrap_or_default()
}

pub fn backup_filename() -> String {
    format!("backup-{}.tar.gz", Utc::now().format("%Y-%m-%d"))
}

fn exec_message(exec: &ExecResult, fallback: &str) -> String {
    let message = exec.message();
    if message.is_empty() {
        fallback.to_string()
    } else {
        message.to_string()
    }
}

fn exec_failed(exec: &ExecResult, fallback: &str) -> PanelError {
    PanelError::ReasonError(exec_message(exec, fallback))
}

/// Current text of a router file, read right before it is rewritten. Only a
/// missing file reads as empty; other failures abort the edit.
async fn read_router_file(ctx: &AppContext, path: &str) -> PanelResult<String> {
    match ctx.client().file_read(path).await {
        Ok(data) => Ok(data),
        Err(err) if err.is_not_found() => Ok(String::new()),
        Err(err) => {
            error!("read {} failed: {}", path, err);
            Err(err.into())
        }
    }
}

fn cron_entry(raw: &str, index: &str) -> PanelResult<CronEntry> {
    index
        .parse::<usize>()
        .ok()
        .and_then(|i| parse_cron(raw).into_iter().nth(i))
        .ok_or_else(|| PanelError::Validation("Scheduled task not found".to_string()))
}

#[derive(Default)]
struct SystemState {
    tab: Option<String>,
    pending_keys: Vec<SshKey>,
    firmware_validated: bool,
}

#[derive(Default)]
pub struct SystemModule {
    state: Mutex<SystemState>,
}

pub fn create(ctx: &AppContext) -> Arc<dyn PanelModule> {
    let module = Arc::new(SystemModule::default());
    ctx.register_route("/system", module.clone());
    module
}

impl SystemModule {
    fn with_state<R>(&self, f: impl FnOnce(&mut SystemState) -> R) -> R {
        let mut state = self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&mut state)
    }

    async fn show_tab(&self, ctx: &AppContext, tab: &str) -> PanelResult<()> {
        let tab = if ctx.with_doc(|d| d.show_sub_tab("system-page", tab)) {
            tab
        } else {
            ctx.with_doc(|d| d.show_sub_tab("system-page", DEFAULT_TAB));
            DEFAULT_TAB
        };
        self.with_state(|s| s.tab = Some(tab.to_string()));
        self.load_tab(ctx, tab).await;
        Ok(())
    }

    fn current_tab(&self) -> String {
        self.with_state(|s| s.tab.clone())
            .unwrap_or_else(|| DEFAULT_TAB.to_string())
    }

    async fn load_tab(&self, ctx: &AppContext, tab: &str) {
        let feature = SYSTEM_TABS
            .iter()
            .find(|(name, _)| *name == tab)
            .map(|(_, feature)| *feature)
            .unwrap_or(tab);
        if !ctx.is_feature_enabled(feature) {
            debug!("system tab {} disabled", tab);
            return;
        }
        match tab {
            "general" => self.load_general(ctx).await,
            "software" => self.load_packages(ctx).await,
            "startup" => self.load_services(ctx).await,
            "cron" => self.load_cron(ctx).await,
            "ssh-keys" => self.load_ssh_keys(ctx).await,
            "mounts" => self.load_mounts(ctx).await,
            "led" => self.load_leds(ctx).await,
            _ => {}
        }
    }

    async fn load_general(&self, ctx: &AppContext) {
        let client = ctx.client();
        match client.call("system", "board", json!({})).await {
            Ok(reply) if reply.is_ok() => {
                let hostname = reply.payload.get("hostname").and_then(|h| h.as_str()).unwrap_or("");
                ctx.with_doc(|d| d.set_value("system-hostname", hostname));
            }
            Ok(reply) => debug!("system board status {}", reply.status),
            Err(err) => debug!("system board failed: {}", err),
        }
        match client.uci_section("system", "@system[0]").await {
            Ok(section) => {
                let zone = section
                    .get("zonename")
                    .or_else(|| section.get("timezone"))
                    .unwrap_or_else(|| "UTC".to_string());
                ctx.with_doc(|d| d.set_value("system-timezone", &zone));
            }
            Err(err) => debug!("read @system[0] failed: {}", err),
        }
    }

    async fn save_general(&self, ctx: &AppContext, form: &FormData) -> PanelResult<()> {
        let hostname = input_value(ctx, form, "hostname", "system-hostname");
        let timezone = input_value(ctx, form, "timezone", "system-timezone");
        if hostname.is_empty() {
            return validation("Hostname is required");
        }
        if !is_valid_host(&hostname) {
            return validation("Invalid hostname");
        }
        let client = ctx.client();
        client
            .uci_set("system", "@system[0]", json!({ "hostname": hostname, "zonename": timezone }))
            .await?;
        client.apply_changes("system", "system").await?;
        Ok(())
    }

    async fn change_password(&self, ctx: &AppContext, form: &FormData) -> PanelResult<()> {
        let password = match form.get("password") {
            Some(p) => p.to_string(),
            None => ctx.with_doc(|d| d.value("new-password").to_string()),
        };
        let confirm = match form.get("confirm") {
            Some(p) => p.to_string(),
            None => ctx.with_doc(|d| d.value("confirm-password").to_string()),
        };
        if password.is_empty() {
            return validation("Password is required");
        }
        if password != confirm {
            return validation("Passwords do not match");
        }
        if password_has_forbidden_chars(&password) {
            return validation("Password contains invalid characters");
        }

        let client = ctx.client();
        let result = async {
            client
                .file_write(PASSWD_INPUT_PATH, &format!("{}\n{}\n", password, password), false, false)
                .await?;
            let command = format!("cat {} | passwd root", PASSWD_INPUT_PATH);
            client.file_exec("/bin/sh", &["-c", &command], None).await?;
            Ok::<(), WrtApiError>(())
        }
        .await;
        client.remove_file(PASSWD_INPUT_PATH).await;
        result?;

        ctx.with_doc(|d| {
            d.set_value("new-password", "");
            d.set_value("confirm-password", "");
        });
        Ok(())
    }

    async fn create_backup(&self, ctx: &AppContext) -> PanelResult<()> {
        let client = ctx.client();
        let result = async {
            let timeout = Some(ctx.config().long_call_timeout());
            let exec = client
                .file_exec("/sbin/sysupgrade", &["--create-backup", BACKUP_PATH], timeout)
                .await?;
            if !exec.success() {
                return Err(exec_failed(&exec, "Backup failed"));
            }
            let bytes = client.file_read_base64(BACKUP_PATH).await?;
            if bytes.is_empty() {
                return Err(PanelError::ReasonError("Failed to read backup".to_string()));
            }
            Ok(bytes)
        }
        .await;
        client.remove_file(BACKUP_PATH).await;

        let bytes = result?;
        let filename = backup_filename();
        info!("backup {} ({} bytes)", filename, bytes.len());
        ctx.with_doc(|d| {
            d.push_download(Download {
                filename,
                mime: "application/gzip".to_string(),
                bytes,
            })
        });
        Ok(())
    }

    async fn restore_backup(&self, ctx: &AppContext) -> PanelResult<()> {
        let file = ctx
            .with_doc(|d| d.selected_file("restore-file").cloned())
            .ok_or_else(|| PanelError::Validation("Please select a backup file".to_string()))?;
        ctx.confirm("Restore configuration from this backup? Current settings will be overwritten.")?;

        let client = ctx.client();
        let timeout = Some(ctx.config().long_call_timeout());
        let result = async {
            client
                .file_upload(RESTORE_PATH, &file.bytes, ctx.config().firmware_chunk_size, timeout, |_, _| {})
                .await?;
            let exec = client
                .file_exec("/sbin/sysupgrade", &["--restore-backup", RESTORE_PATH], timeout)
                .await?;
            if !exec.success() {
                return Err(exec_failed(&exec, "Restore failed"));
            }
            Ok(())
        }
        .await;
        client.remove_file(RESTORE_PATH).await;
        ctx.with_doc(|d| d.clear_file("restore-file"));
        result
    }

    async fn reboot_and_logout(&self, ctx: &AppContext) {
        let delay = ctx.config().reboot_logout_delay();
        tokio::time::sleep(delay).await;
        ctx.logout().await;
    }

    async fn factory_reset(&self, ctx: &AppContext) -> PanelResult<()> {
        ctx.confirm("This will erase all settings and restore factory defaults. Continue?")?;
        ctx.confirm("This action cannot be undone. Are you absolutely sure?")?;
        let result = ctx.client().file_exec("/sbin/firstboot", &["-y"], None).await;
        ctx.report(
            result.map_err(PanelError::from),
            "Factory reset initiated, rebooting...",
            "Failed to initiate factory reset",
        )?;

        tokio::time::sleep(ctx.config().reboot_logout_delay()).await;
        match ctx.client().call("system", "reboot", json!({})).await {
            Ok(_) => self.reboot_and_logout(ctx).await,
            Err(err) => warn!("reboot after factory reset failed: {}", err),
        }
        Ok(())
    }

    async fn reboot(&self, ctx: &AppContext) -> PanelResult<()> {
        ctx.confirm("Reboot the system?")?;
        let result = ctx.client().call("system", "reboot", json!({})).await;
        ctx.report(result.map_err(PanelError::from), "System is rebooting...", "Failed to reboot")?;
        self.reboot_and_logout(ctx).await;
        Ok(())
    }

    async fn load_packages(&self, ctx: &AppContext) {
        let result = async {
            let data = ctx.client().file_read(OPKG_STATUS_PATH).await?;
            if data.is_empty() {
                return Err(PanelError::ReasonError("No data".to_string()));
            }
            let packages = parse_opkg_status(&data);
            let mut table = Table::new(PACKAGE_COLUMNS);
            for pkg in packages.iter().take(PACKAGE_DISPLAY_LIMIT) {
                table.push(vec![
                    Cell::text(pkg.name.clone()),
                    Cell::text(pkg.version.clone()),
                    Cell::Badge(BadgeKind::Success, "Installed".to_string()),
                    Cell::Actions {
                        id: pkg.name.clone(),
                        actions: vec!["remove".to_string()],
                    },
                ]);
            }
            if packages.len() > PACKAGE_DISPLAY_LIMIT {
                table.footer = Some(format!(
                    "Showing {} of {} packages",
                    PACKAGE_DISPLAY_LIMIT,
                    packages.len()
                ));
            }
            Ok(table.or_empty("No packages found"))
        }
        .await;
        ctx.put_table("packages-table", PACKAGE_COLUMNS, result, "Failed to load packages");
    }

    async fn remove_package(&self, ctx: &AppContext, name: &str) -> PanelResult<()> {
        if !is_valid_host(name) {
            return validation("Invalid package name");
        }
        ctx.confirm(&format!("Remove package {}? This may break dependencies.", name))?;
        ctx.toast(&format!("Removing {}...", name), ToastKind::Info);
        let timeout = Some(ctx.config().long_call_timeout());
        let exec = ctx.client().file_exec("/bin/opkg", &["remove", name], timeout).await?;
        if !exec.success() {
            return Err(exec_failed(&exec, "opkg remove failed"));
        }
        Ok(())
    }

    async fn load_services(&self, ctx: &AppContext) {
        let result = async {
            let reply = ctx.client().call("service", "list", json!({})).await?;
            let services = parse_service_list(&reply.into_payload("service", "list")?);
            let mut table = Table::new(SERVICE_COLUMNS);
            for (name, running) in services {
                let mut actions = vec!["toggle".to_string()];
                actions.extend(SERVICE_VERBS.iter().map(|v| v.to_string()));
                table.push(vec![
                    Cell::text(name.clone()),
                    Cell::badge(running, "RUNNING", "STOPPED"),
                    Cell::Badge(BadgeKind::Info, "N/A".to_string()),
                    Cell::Actions { id: name, actions },
                ]);
            }
            Ok::<_, PanelError>(table.or_empty("No services found"))
        }
        .await;
        ctx.put_table("services-table", SERVICE_COLUMNS, result, "Failed to load services");
    }

    async fn service_running(&self, ctx: &AppContext, name: &str) -> PanelResult<bool> {
        let reply = ctx.client().call("service", "list", json!({})).await?;
        let services = parse_service_list(&reply.into_payload("service", "list")?);
        Ok(services.into_iter().any(|(n, running)| n == name && running))
    }

    /// Starts a stopped service or stops a running one. Returns the past tense of what was done.
    async fn toggle_service(&self, ctx: &AppContext, name: &str) -> PanelResult<&'static str> {
        let (action, done) = if self.service_running(ctx, name).await? {
            ("stop", "stopped")
        } else {
            ("start", "started")
        };
        ctx.client().init_script(name, action).await?;
        Ok(done)
    }

    async fn load_cron(&self, ctx: &AppContext) {
        let raw = match ctx.client().file_read(CRONTAB_PATH).await {
            Ok(data) => data,
            Err(err) => {
                debug!("read crontab failed: {}", err);
                String::new()
            }
        };
        let entries = parse_cron(&raw);

        let mut table = Table::new(CRON_COLUMNS);
        for (i, entry) in entries.iter().enumerate() {
            table.push(vec![
                Cell::text(entry.schedule()),
                Cell::text(entry.command.clone()),
                Cell::badge(entry.enabled, "ENABLED", "DISABLED"),
                Cell::edit_delete(&i.to_string()),
            ]);
        }
        ctx.with_doc(|d| d.set_table("cron-table", table.or_empty("No scheduled tasks")));
    }

    async fn open_cron(&self, ctx: &AppContext, index: Option<&str>) -> PanelResult<()> {
        let values: Vec<(&str, String)> = match index {
            Some(index) => {
                let raw = read_router_file(ctx, CRONTAB_PATH).await?;
                let entry = cron_entry(&raw, index)?;
                vec![
                    ("index", index.to_string()),
                    ("minute", entry.minute),
                    ("hour", entry.hour),
                    ("day", entry.day),
                    ("month", entry.month),
                    ("weekday", entry.weekday),
                    ("command", entry.command),
                    ("enabled", if entry.enabled { "1" } else { "0" }.to_string()),
                ]
            }
            None => CRON_FIELDS
                .iter()
                .map(|f| (*f, if *f == "enabled" { "1" } else { "" }.to_string()))
                .collect(),
        };
        ctx.with_doc(|d| {
            d.fill_form("cron", &values);
            d.show("cron-modal");
        });
        Ok(())
    }

    async fn save_cron(&self, ctx: &AppContext, form: &FormData) -> PanelResult<()> {
        let form = ctx.with_doc(|d| form.merged_with_modal(d, "cron", CRON_FIELDS));
        let command = form.text("command");
        if command.is_empty() {
            return validation("Command is required");
        }
        if command.contains('\n') || command.contains('\r') {
            return validation("Command must be a single line");
        }
        let entry = CronEntry {
            minute: form.text_or("minute", "*"),
            hour: form.text_or("hour", "*"),
            day: form.text_or("day", "*"),
            month: form.text_or("month", "*"),
            weekday: form.text_or("weekday", "*"),
            command,
            enabled: !matches!(form.text("enabled").as_str(), "0" | "false" | "off" | "no"),
            raw_index: 0,
        };
        let schedule = [&entry.minute, &entry.hour, &entry.day, &entry.month, &entry.weekday];
        if schedule.iter().any(|f| f.split_whitespace().count() != 1) {
            return validation("Invalid schedule field");
        }

        let raw = read_router_file(ctx, CRONTAB_PATH).await?;
        let index = form.text("index");
        let existing = if index.is_empty() {
            None
        } else {
            Some(cron_entry(&raw, &index)?)
        };
        let line = entry.to_line();
        let content = rewrite_lines(&raw, |lines| match existing {
            Some(old) if old.raw_index < lines.len() => lines[old.raw_index] = line,
            _ => lines.push(line),
        });
        ctx.client().file_write(CRONTAB_PATH, &content, false, false).await?;
        ctx.with_doc(|d| d.hide("cron-modal"));
        Ok(())
    }

    async fn delete_cron(&self, ctx: &AppContext, index: &str) -> PanelResult<()> {
        ctx.confirm("Delete this scheduled task?")?;
        let raw = read_router_file(ctx, CRONTAB_PATH).await?;
        let entry = cron_entry(&raw, index)?;
        let content = rewrite_lines(&raw, |lines| {
            if entry.raw_index < lines.len() {
                lines.remove(entry.raw_index);
            }
        });
        ctx.client().file_write(CRONTAB_PATH, &content, false, false).await?;
        Ok(())
    }

    async fn load_ssh_keys(&self, ctx: &AppContext) {
        let raw = match ctx.client().file_read(AUTHORIZED_KEYS_PATH).await {
            Ok(data) => data,
            Err(err) => {
                debug!("read authorized_keys failed: {}", err);
                String::new()
            }
        };
        let keys = parse_ssh_keys(&raw);

        let mut table = Table::new(SSH_KEY_COLUMNS);
        for (i, key) in keys.iter().enumerate() {
            let short: String = key.key.chars().take(30).collect();
            table.push(vec![
                Cell::text(key.key_type.clone()),
                Cell::text(format!("{}...", short)),
                Cell::text(if key.comment.is_empty() { "N/A".to_string() } else { key.comment.clone() }),
                Cell::Actions {
                    id: i.to_string(),
                    actions: vec!["delete".to_string()],
                },
            ]);
        }
        ctx.with_doc(|d| d.set_table("ssh-keys-table", table.or_empty("No SSH keys")));
    }

    fn parse_pasted_keys(&self, ctx: &AppContext, form: &FormData) -> PanelResult<usize> {
        let pasted = match form.get("keys") {
            Some(text) => text.to_string(),
            None => ctx.with_doc(|d| d.value("ssh-key-paste-area").to_string()),
        };
        let keys = parse_ssh_keys(&pasted);
        if keys.is_empty() {
            return validation("No valid keys found");
        }
        let preview = keys
            .iter()
            .enumerate()
            .map(|(i, k)| {
                let short: String = k.key.chars().take(40).collect();
                let comment = if k.comment.is_empty() { "No comment" } else { &k.comment };
                LogLine::normal(&format!("[{}] {} {} {}...", i, k.key_type, comment, short))
            })
            .collect();
        ctx.with_doc(|d| d.set_log("parsed-keys-list", preview));
        let count = keys.len();
        self.with_state(|s| s.pending_keys = keys);
        Ok(count)
    }

    /// Appends the parsed keys picked by `selected` (comma separated indexes, all when absent).
    async fn save_ssh_keys(&self, ctx: &AppContext, form: &FormData) -> PanelResult<usize> {
        let pending = self.with_state(|s| s.pending_keys.clone());
        let selected: Vec<SshKey> = match form.get("selected") {
            Some(list) => {
                let picked: Vec<usize> = list.split(',').filter_map(|i| i.trim().parse().ok()).collect();
                pending
                    .into_iter()
                    .enumerate()
                    .filter(|(i, _)| picked.contains(i))
                    .map(|(_, k)| k)
                    .collect()
            }
            None => pending,
        };
        if selected.is_empty() {
            return validation("No keys selected");
        }

        let existing = read_router_file(ctx, AUTHORIZED_KEYS_PATH).await?;
        let content = rewrite_lines(existing.trim(), |lines| {
            lines.retain(|l| !l.is_empty());
            lines.extend(selected.iter().map(|k| k.to_line()));
        });
        ctx.client().file_write(AUTHORIZED_KEYS_PATH, &content, false, false).await?;
        self.with_state(|s| s.pending_keys.clear());
        ctx.with_doc(|d| {
            d.set_value("ssh-key-paste-area", "");
            d.set_log("parsed-keys-list", Vec::new());
        });
        Ok(selected.len())
    }

    async fn delete_ssh_key(&self, ctx: &AppContext, index: &str) -> PanelResult<()> {
        ctx.confirm("Remove this SSH key?")?;
        let raw = read_router_file(ctx, AUTHORIZED_KEYS_PATH).await?;
        let entry = index
            .parse::<usize>()
            .ok()
            .and_then(|i| parse_ssh_keys(&raw).into_iter().nth(i))
            .ok_or_else(|| PanelError::Validation("SSH key not found".to_string()))?;
        let content = rewrite_lines(&raw, |lines| {
            if entry.raw_index < lines.len() {
                lines.remove(entry.raw_index);
            }
        });
        ctx.client().file_write(AUTHORIZED_KEYS_PATH, &content, false, false).await?;
        Ok(())
    }

    async fn load_mounts(&self, ctx: &AppContext) {
        let result = async {
            let exec = ctx.client().file_exec("/bin/df", &["-h"], None).await?;
            if exec.stdout.trim().is_empty() {
                return Err(PanelError::ReasonError("No data".to_string()));
            }
            Ok(parse_df(&exec.stdout))
        }
        .await;

        let (charts, table) = match result {
            Ok(mounts) => {
                let mut charts = Table::new(STORAGE_CHART_COLUMNS);
                let mut table = Table::new(MOUNT_COLUMNS);
                for m in &mounts {
                    if m.mount_point != "/dev" {
                        charts.push(vec![
                            Cell::text(m.mount_point.clone()),
                            Cell::Progress {
                                percent: m.percent(),
                                label: format!("{} / {} ({})", m.used, m.size, m.use_percent),
                            },
                        ]);
                    }
                    table.push(vec![
                        Cell::text(m.device.clone()),
                        Cell::text(m.mount_point.clone()),
                        Cell::text("N/A"),
                        Cell::text(m.size.clone()),
                        Cell::text(m.used.clone()),
                        Cell::text(m.available.clone()),
                    ]);
                }
                (charts, Ok(table.or_empty("No mount points")))
            }
            Err(err) => (Table::new(STORAGE_CHART_COLUMNS), Err(err)),
        };
        ctx.with_doc(|d| d.set_table("storage-charts", charts));
        ctx.put_table("mounts-table", MOUNT_COLUMNS, table, "Failed to load mount points");
    }

    async fn load_leds(&self, ctx: &AppContext) {
        let result = async {
            let leds = ctx.client().uci_sections_of_type("system", "led").await?;
            let mut table = Table::new(LED_COLUMNS);
            for led in &leds {
                table.push(vec![
                    Cell::text(led.get("sysfs").unwrap_or_else(|| led.name.clone())),
                    Cell::text(led.get_or("trigger", "default-on")),
                    Cell::Badge(BadgeKind::Info, "CONFIGURED".to_string()),
                ]);
            }
            Ok::<_, PanelError>(table.or_empty("No LEDs configured"))
        }
        .await;
        ctx.put_table("led-table", LED_COLUMNS, result, "Failed to load LEDs");
    }

    fn select_firmware(&self, ctx: &AppContext) -> PanelResult<()> {
        let file = ctx
            .with_doc(|d| d.selected_file("firmware-file").cloned())
            .ok_or_else(|| PanelError::Validation("No file selected".to_string()))?;
        let mime = if file.mime.is_empty() { "application/octet-stream" } else { &file.mime };
        let details = format!(
            "File: {}\nSize: {}\nType: {}",
            file.name,
            format_bytes(file.bytes.len() as u64),
            mime
        );
        self.with_state(|s| s.firmware_validated = false);
        ctx.with_doc(|d| {
            d.set_text("firmware-details", &details);
            d.set_disabled("validate-firmware-btn", false);
            d.set_disabled("flash-firmware-btn", true);
            d.set_text("upgrade-status", "");
        });
        Ok(())
    }

    async fn validate_firmware(&self, ctx: &AppContext) -> PanelResult<()> {
        let file = ctx
            .with_doc(|d| d.selected_file("firmware-file").cloned())
            .ok_or_else(|| PanelError::Validation("No file selected".to_string()))?;
        self.with_state(|s| s.firmware_validated = false);
        ctx.with_doc(|d| {
            d.set_disabled("flash-firmware-btn", true);
            d.show("upgrade-progress");
            d.set_width("upgrade-progress", 0.0);
            d.set_text("upgrade-status", "Uploading firmware...");
        });

        let client = ctx.client();
        let timeout = Some(ctx.config().long_call_timeout());
        let uploaded = client
            .file_upload(
                FIRMWARE_PATH,
                &file.bytes,
                ctx.config().firmware_chunk_size,
                timeout,
                |done, total| {
                    let percent = if total == 0 { 100.0 } else { done as f64 * 100.0 / total as f64 };
                    ctx.with_doc(|d| d.set_width("upgrade-progress", percent));
                },
            )
            .await;
        let tested = match uploaded {
            Ok(()) => {
                ctx.with_doc(|d| d.set_text("upgrade-status", "Validating firmware..."));
                client
                    .file_exec("/sbin/sysupgrade", &["--test", FIRMWARE_PATH], timeout)
                    .await
            }
            Err(err) => Err(err),
        };

        match tested {
            Ok(exec) if exec.success() => {
                self.with_state(|s| s.firmware_validated = true);
                ctx.with_doc(|d| {
                    d.set_text("upgrade-status", "Firmware validated successfully. Ready to flash.");
                    d.set_disabled("flash-firmware-btn", false);
                });
                Ok(())
            }
            Ok(exec) => {
                let message = exec_message(&exec, "Validation failed");
                ctx.with_doc(|d| d.set_text("upgrade-status", &format!("Validation failed: {}", message)));
                client.remove_file(FIRMWARE_PATH).await;
                Err(PanelError::ReasonError(message))
            }
            Err(err) => {
                ctx.with_doc(|d| d.set_text("upgrade-status", "Upload or validation failed"));
                client.remove_file(FIRMWARE_PATH).await;
                Err(err.into())
            }
        }
    }

    async fn flash_firmware(&self, ctx: &AppContext, form: &FormData) -> PanelResult<()> {
        if !self.with_state(|s| s.firmware_validated) {
            return validation("Validate the firmware before flashing");
        }
        ctx.confirm("Flash firmware now? The device will reboot.")?;
        ctx.confirm("This will replace the firmware. Proceed?")?;

        let keep = match form.get("keep_settings") {
            Some(_) => form.flag("keep_settings"),
            None => ctx.with_doc(|d| matches!(d.value("keep-settings"), "1" | "true" | "on")),
        };
        let params: &[&str] = if keep { &[FIRMWARE_PATH] } else { &["-n", FIRMWARE_PATH] };
        ctx.with_doc(|d| d.set_text("upgrade-status", "Flashing firmware... Do not power off the device."));
        self.with_state(|s| s.firmware_validated = false);

        let timeout = Some(ctx.config().flash_timeout());
        match ctx.client().file_exec("/sbin/sysupgrade", params, timeout).await {
            Ok(_) => {
                ctx.with_doc(|d| d.set_text("upgrade-status", "Firmware flashed. Device is rebooting..."));
                ctx.toast("Firmware flashed, device rebooting...", ToastKind::Success);
            }
            Err(err) => {
                // the device usually drops the connection while flashing
                info!("sysupgrade call ended: {}", err);
                ctx.with_doc(|d| d.set_text("upgrade-status", "Flash initiated. Device should be rebooting..."));
            }
        }
        ctx.with_doc(|d| d.set_disabled("flash-firmware-btn", true));
        Ok(())
    }
}

#[async_trait]
impl PanelModule for SystemModule {
    fn name(&self) -> &'static str {
        "system"
    }

    fn capabilities(&self) -> ModuleCapabilities {
        ModuleCapabilities {
            load: true,
            update: false,
            cleanup: true,
        }
    }

    async fn load(&self, ctx: &AppContext) -> PanelResult<()> {
        ctx.with_doc(|d| d.show("system-page"));
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
            "tab" => self.show_tab(ctx, require_id(id)?).await,
            "refresh" => {
                self.load_tab(ctx, &self.current_tab()).await;
                Ok(())
            }
            "save-general" => {
                let result = self.save_general(ctx, form).await;
                ctx.report(result, "System settings saved", "Failed to save settings")
            }
            "change-password" => {
                let result = self.change_password(ctx, form).await;
                ctx.report(result, "Password changed", "Failed to change password")
            }
            "backup" => {
                let result = self.create_backup(ctx).await;
                ctx.report(result, "Backup created", "Failed to create backup")
            }
            "restore" => {
                let result = self.restore_backup(ctx).await;
                ctx.report(
                    result,
                    "Backup restored. Reboot to apply all settings.",
                    "Failed to restore backup",
                )
            }
            "factory-reset" => self.factory_reset(ctx).await,
            "reboot" => self.reboot(ctx).await,
            "restart-network" => {
                let result = ctx.client().init_script("network", "restart").await.map_err(PanelError::from);
                ctx.report(result, "Network services restarting...", "Failed to restart network")
            }
            "restart-firewall" => {
                let result = ctx.client().init_script("firewall", "restart").await.map_err(PanelError::from);
                ctx.report(result, "Firewall restarted successfully", "Failed to restart firewall")
            }
            "remove" => {
                let name = require_id(id)?;
                let result = self.remove_package(ctx, name).await;
                ctx.report(result, &format!("Package {} removed", name), "Failed to remove package")?;
                ctx.settle().await;
                self.load_packages(ctx).await;
                Ok(())
            }
            "toggle" => {
                let name = require_id(id)?;
                if !is_valid_service_name(name) {
                    return ctx.report(validation("Invalid service name"), "", "");
                }
                let result = self.toggle_service(ctx, name).await;
                match &result {
                    Ok(done) => ctx.toast(&format!("Service {} {}", name, done), ToastKind::Success),
                    Err(PanelError::Validation(message)) => ctx.toast(message, ToastKind::Error),
                    Err(err) => {
                        error!("toggle {} failed: {}", name, err);
                        ctx.toast(&format!("Failed to toggle service {}", name), ToastKind::Error);
                    }
                }
                result?;
                self.load_services(ctx).await;
                Ok(())
            }
            verb if SERVICE_VERBS.contains(&verb) => {
                let name = require_id(id)?;
                if !is_valid_service_name(name) {
                    return ctx.report(validation("Invalid service name"), "", "");
                }
                ctx.toast(&format!("{}ing {}...", verb, name), ToastKind::Info);
                let result = ctx.client().init_script(name, verb).await.map_err(PanelError::from);
                ctx.report(
                    result,
                    &format!("Service {} completed", verb),
                    &format!("Failed to {} service", verb),
                )?;
                ctx.settle().await;
                self.load_services(ctx).await;
                Ok(())
            }
            "add-cron" => self.open_cron(ctx, None).await,
            "edit-cron" => {
                let result = self.open_cron(ctx, Some(require_id(id)?)).await;
                ctx.report(result, "", "Failed to open scheduled task")
            }
            "save-cron" => {
                let result = self.save_cron(ctx, form).await;
                ctx.report(result, "Cron entry saved", "Failed to save cron entry")?;
                self.load_cron(ctx).await;
                Ok(())
            }
            "delete-cron" => {
                let result = self.delete_cron(ctx, require_id(id)?).await;
                ctx.report(result, "Task deleted", "Failed to delete task")?;
                self.load_cron(ctx).await;
                Ok(())
            }
            "parse-ssh-keys" => {
                let result = self.parse_pasted_keys(ctx, form);
                ctx.report(result, "", "").map(|_| ())
            }
            "save-ssh-keys" => {
                let result = self.save_ssh_keys(ctx, form).await;
                if let Ok(count) = &result {
                    ctx.toast(&format!("{} key(s) added", count), ToastKind::Success);
                }
                ctx.report(result, "", "Failed to save SSH keys")?;
                self.load_ssh_keys(ctx).await;
                Ok(())
            }
            "delete-ssh-key" => {
                let result = self.delete_ssh_key(ctx, require_id(id)?).await;
                ctx.report(result, "SSH key removed", "Failed to remove SSH key")?;
                self.load_ssh_keys(ctx).await;
                Ok(())
            }
            "select-firmware" => {
                let result = self.select_firmware(ctx);
                ctx.report(result, "", "")
            }
            "validate-firmware" => {
                let result = self.validate_firmware(ctx).await;
                ctx.report(result, "Firmware validated", "Firmware validation failed")
            }
            "flash-firmware" => {
                let result = self.flash_firmware(ctx, form).await;
                ctx.report(result, "", "Failed to flash firmware")
            }
            _ => Err(PanelError::UnknownAction(action.to_string())),
        }
    }

    fn cleanup(&self, _ctx: &AppContext) {
        self.with_state(|s| {
            s.tab = None;
            s.pending_keys.clear();
        });
    }
}

#[async_trait]
impl RouteHandler for SystemModule {
    async fn handle_route(&self, ctx: &AppContext, _full_path: &str, sub_paths: &[String]) -> PanelResult<()> {
        ctx.with_doc(|d| d.show("system-page"));
        self.show_tab(ctx, sub_tab(sub_paths, DEFAULT_TAB)).await
    }
}
