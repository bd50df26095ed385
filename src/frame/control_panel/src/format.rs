const MB: f64 = 1024.0 * 1024.0;

pub fn format_bytes(bytes: u64) -> String {
    if bytes == 0 {
        return "0 B".to_string();
    }
    const SIZES: [&str; 4] = ["B", "KB", "MB", "GB"];
    let mut value = bytes as f64;
    let mut idx = 0;
    while value >= 1024.0 && idx < SIZES.len() - 1 {
        value /= 1024.0;
        idx += 1;
    }
    // two decimals, trailing zeros dropped
    let text = format!("{:.2}", value);
    let text = text.trim_end_matches('0').trim_end_matches('.');
    format!("{} {}", text, SIZES[idx])
}

pub fn format_uptime(seconds: u64) -> String {
    let days = seconds / 86400;
    let hours = (seconds % 86400) / 3600;
    let minutes = (seconds % 3600) / 60;
    format!("{}d {}h {}m", days, hours, minutes)
}

/// Used percentage of `total`, rounded. Zero total reads as 0.
pub fn memory_percent(total: u64, free: u64) -> u64 {
    if total == 0 {
        return 0;
    }
    let used = total.saturating_sub(free) as f64;
    (used / total as f64 * 100.0).round() as u64
}

/// "384MB / 512MB (75%)". Both sides are rounded to whole MB first.
pub fn format_memory(total: u64, free: u64) -> String {
    let total_mb = (total as f64 / MB).round() as u64;
    let free_mb = (free as f64 / MB).round() as u64;
    let used_mb = total_mb.saturating_sub(free_mb);
    let percent = if total_mb == 0 {
        0
    } else {
        (used_mb as f64 / total_mb as f64 * 100.0).round() as u64
    };
    format!("{}MB / {}MB ({}%)", used_mb, total_mb, percent)
}

pub fn format_rate(kbps: f64) -> String {
    let mbps = kbps / 1000.0;
    if mbps < 0.01 {
        "0 Mbps".to_string()
    } else if mbps < 1.0 {
        format!("{:.2} Mbps", mbps)
    } else {
        format!("{:.1} Mbps", mbps)
    }
}
