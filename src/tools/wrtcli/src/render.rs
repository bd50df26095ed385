use control_panel::{Cell, Document, LogClass, Table, Toast, ToastKind};
use std::fmt::Write;

const ACTIVE_CLASS: &str = "active";

fn cell_text(cell: &Cell) -> String {
    match cell {
        Cell::Badge(_, label) => format!("[{}]", label),
        _ => cell.plain(),
    }
}

pub fn render_table(table: &Table) -> String {
    let mut widths: Vec<usize> = table.columns.iter().map(|c| c.chars().count()).collect();
    let rows: Vec<Vec<String>> = table
        .rows
        .iter()
        .map(|row| row.iter().map(cell_text).collect())
        .collect();
    for row in &rows {
        for (i, cell) in row.iter().enumerate() {
            let len = cell.chars().count();
            match widths.get_mut(i) {
                Some(w) => *w = (*w).max(len),
                None => widths.push(len),
            }
        }
    }

    let line = |cells: &[String]| -> String {
        let padded: Vec<String> = cells
            .iter()
            .enumerate()
            .map(|(i, c)| format!("{:<width$}", c, width = widths.get(i).copied().unwrap_or(0)))
            .collect();
        padded.join("  ").trim_end().to_string()
    };

    let mut out = String::new();
    let _ = writeln!(out, "  {}", line(&table.columns));
    let total: usize = widths.iter().sum::<usize>() + 2 * widths.len().saturating_sub(1);
    let _ = writeln!(out, "  {}", "-".repeat(total));
    if rows.is_empty() {
        if let Some(message) = &table.empty_message {
            let _ = writeln!(out, "  {}", message);
        }
    }
    for row in &rows {
        let _ = writeln!(out, "  {}", line(row));
    }
    if let Some(footer) = &table.footer {
        let _ = writeln!(out, "  {}", footer);
    }
    out
}

fn bar(percent: f64) -> String {
    let filled = ((percent.clamp(0.0, 100.0) / 100.0) * 20.0).round() as usize;
    format!("[{}{}] {:.0}%", "#".repeat(filled), "-".repeat(20 - filled), percent)
}

/// Text view of everything currently visible: route, tab strip, widgets, tables and log panes.
pub fn render_document(doc: &Document) -> String {
    let mut out = String::new();

    if doc.is_visible("login-view") {
        let _ = writeln!(out, "== login ==");
        let error = doc.text("login-error");
        if !error.is_empty() {
            let _ = writeln!(out, "{}", error);
        }
        return out;
    }

    let _ = writeln!(out, "== {} ==", doc.location_hash().trim_start_matches('#'));
    let tabs: Vec<String> = doc
        .elements()
        .filter(|e| e.has_class("tab-btn") && doc.is_visible(&e.id))
        .filter_map(|e| {
            let tab = e.attrs.get("data-tab")?;
            Some(if e.has_class(ACTIVE_CLASS) { format!("*{}*", tab) } else { tab.clone() })
        })
        .collect();
    if !tabs.is_empty() {
        let _ = writeln!(out, "tabs: {}", tabs.join(" "));
    }

    for el in doc.elements() {
        if el.has_class("page") || el.has_class("tab-btn") || el.has_class("nav-link") || !doc.is_visible(&el.id) {
            continue;
        }
        if let Some(table) = doc.table(&el.id) {
            let _ = writeln!(out, "{}:", el.id);
            out.push_str(&render_table(table));
            continue;
        }
        let log = doc.log(&el.id);
        if !log.is_empty() {
            let _ = writeln!(out, "{}:", el.id);
            for line in log {
                let marker = match line.class {
                    LogClass::Error => "!",
                    LogClass::Warn => "~",
                    LogClass::Normal => " ",
                };
                let _ = writeln!(out, " {} {}", marker, line.text);
            }
            continue;
        }
        if doc.chart(&el.id).is_some() {
            let _ = writeln!(out, "{}: <chart>", el.id);
            continue;
        }
        match (el.width_percent, el.text.is_empty(), el.value.is_empty()) {
            (Some(percent), _, _) => {
                let _ = writeln!(out, "{}: {}", el.id, bar(percent));
            }
            (None, false, _) => {
                let _ = writeln!(out, "{}: {}", el.id, el.text);
            }
            (None, true, false) if el.has_class("form-input") => {
                let _ = writeln!(out, "{} = {}", el.id, el.value);
            }
            _ => {}
        }
    }
    out
}

pub fn render_toast(toast: &Toast) -> String {
    let tag = match toast.kind {
        ToastKind::Success => "ok",
        ToastKind::Error => "error",
        ToastKind::Info => "info",
    };
    format!("[{}] {}", tag, toast.message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use control_panel::BadgeKind;

    #[test]
    fn test_render_table() {
        let mut table = Table::new(&["Name", "Status"]);
        table.push(vec![Cell::text("lan"), Cell::badge(true, "UP", "DOWN")]);
        table.footer = Some("Showing 1 of 1".to_string());
        let text = render_table(&table);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "  Name  Status");
        assert_eq!(lines[2], "  lan   [UP]");
        assert_eq!(lines[3], "  Showing 1 of 1");

        let empty = render_table(&Table::empty(&["Name"], "No leases"));
        assert!(empty.ends_with("  No leases\n"));
    }

    #[test]
    fn test_render_only_visible_page() {
        let mut doc = Document::with_default_layout();
        doc.set_location_hash("/dashboard");
        doc.show("main-view");
        doc.show("dashboard-page");
        doc.set_text("hostname", "OpenWrt");
        doc.set_width("memory-bar", 50.0);
        doc.set_text("system-hostname", "hidden-page");
        let mut table = Table::new(&["Host"]);
        table.push(vec![Cell::Badge(BadgeKind::Info, "tcp".to_string())]);
        doc.set_table("connections-table", table);

        let text = render_document(&doc);
        assert!(text.starts_with("== /dashboard =="));
        assert!(text.contains("hostname: OpenWrt"));
        assert!(text.contains("memory-bar: [##########----------] 50%"));
        assert!(text.contains("[tcp]"));
        assert!(!text.contains("hidden-page"));
    }

    #[test]
    fn test_render_login() {
        let mut doc = Document::with_default_layout();
        doc.show("login-view");
        doc.set_text("login-error", "Login failed: Invalid username or password");
        assert_eq!(render_document(&doc), "== login ==\nLogin failed: Invalid username or password\n");
    }

    #[test]
    fn test_render_toast() {
        let toast = Toast { kind: ToastKind::Error, message: "Failed".to_string(), created_at: 0 };
        assert_eq!(render_toast(&toast), "[error] Failed");
    }
}
