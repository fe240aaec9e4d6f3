//! Output formatting for the CLI
//!
//! Table rendering for `list`, human-readable byte/duration/bandwidth
//! helpers, and colored status lines.

use tabled::{settings::Style, Table, Tabled};

use tm_core::ipc::TunnelInfo;
use tm_core::time::elapsed_secs;

/// Format a list of tunnels as an ASCII table
///
/// Returns "No active tunnels" when the list is empty. The daemon already
/// orders the list by (host, remote_port).
pub fn format_tunnels(tunnels: &[TunnelInfo]) -> String {
    if tunnels.is_empty() {
        return "No active tunnels".to_string();
    }

    #[derive(Tabled)]
    struct TunnelRow {
        #[tabled(rename = "TUNNEL")]
        tunnel: String,
        #[tabled(rename = "UPTIME")]
        uptime: String,
        #[tabled(rename = "LAST ACTIVITY")]
        last_activity: String,
        #[tabled(rename = "TRANSFER")]
        transfer: String,
        #[tabled(rename = "SPEED")]
        speed: String,
        #[tabled(rename = "CONNS")]
        conns: String,
    }

    let rows: Vec<TunnelRow> = tunnels
        .iter()
        .map(|t| TunnelRow {
            tunnel: format!("{}:{} -> localhost:{}", t.host, t.remote_port, t.local_port),
            uptime: format_duration(elapsed_secs(t.created_at)),
            last_activity: format!("{} ago", format_duration(elapsed_secs(t.last_activity))),
            transfer: format!(
                "{} ↑ / {} ↓",
                format_bytes(t.bytes_sent),
                format_bytes(t.bytes_received)
            ),
            speed: format!(
                "{} ↑ / {} ↓",
                format_bandwidth(t.bandwidth_up),
                format_bandwidth(t.bandwidth_down)
            ),
            conns: format!("{} / {}", t.active_conns, t.total_conns),
        })
        .collect();

    Table::new(rows).with(Style::rounded()).to_string()
}

/// Format a byte count as a human-readable string
pub fn format_bytes(bytes: u64) -> String {
    const UNIT: u64 = 1024;
    if bytes < UNIT {
        return format!("{} B", bytes);
    }
    let mut div = UNIT;
    let mut exp = 0;
    let mut n = bytes / UNIT;
    while n >= UNIT {
        div *= UNIT;
        exp += 1;
        n /= UNIT;
    }
    format!(
        "{:.1} {}B",
        bytes as f64 / div as f64,
        ['K', 'M', 'G', 'T', 'P', 'E'][exp]
    )
}

/// Format a duration in seconds as `12s`, `3m`, `2h5m`, or `1d4h`
pub fn format_duration(secs: u64) -> String {
    if secs < 60 {
        return format!("{}s", secs);
    }
    let minutes = secs / 60;
    if minutes < 60 {
        return format!("{}m", minutes);
    }
    let hours = minutes / 60;
    let minutes = minutes % 60;
    if hours < 24 {
        return format!("{}h{}m", hours, minutes);
    }
    let days = hours / 24;
    let hours = hours % 24;
    format!("{}d{}h", days, hours)
}

/// Format a bandwidth value in KB/s
pub fn format_bandwidth(bytes_per_sec: f64) -> String {
    format!("{:.1} KB/s", bytes_per_sec / 1024.0)
}

/// Print a success message in green with a checkmark prefix
pub fn print_success(msg: &str) {
    use crossterm::style::{Color, Print, ResetColor, SetForegroundColor};

    let mut stdout = std::io::stdout();
    let _ = crossterm::execute!(
        stdout,
        SetForegroundColor(Color::Green),
        Print("✓ "),
        ResetColor,
        Print(msg),
        Print("\n")
    );
}

/// Print an error message in red with an X prefix
pub fn print_error(msg: &str) {
    use crossterm::style::{Color, Print, ResetColor, SetForegroundColor};

    let mut stderr = std::io::stderr();
    let _ = crossterm::execute!(
        stderr,
        SetForegroundColor(Color::Red),
        Print("✗ "),
        ResetColor,
        Print(msg),
        Print("\n")
    );
}

/// Print an informational message in cyan with an info symbol prefix
pub fn print_info(msg: &str) {
    use crossterm::style::{Color, Print, ResetColor, SetForegroundColor};

    let mut stdout = std::io::stdout();
    let _ = crossterm::execute!(
        stdout,
        SetForegroundColor(Color::Cyan),
        Print("ℹ "),
        ResetColor,
        Print(msg),
        Print("\n")
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(0), "0 B");
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.0 KB");
        assert_eq!(format_bytes(1536), "1.5 KB");
        assert_eq!(format_bytes(5 * 1024 * 1024), "5.0 MB");
        assert_eq!(format_bytes(3 * 1024 * 1024 * 1024), "3.0 GB");
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(0), "0s");
        assert_eq!(format_duration(59), "59s");
        assert_eq!(format_duration(60), "1m");
        assert_eq!(format_duration(3599), "59m");
        assert_eq!(format_duration(3600), "1h0m");
        assert_eq!(format_duration(7500), "2h5m");
        assert_eq!(format_duration(100_800), "1d4h");
    }

    #[test]
    fn test_format_bandwidth() {
        assert_eq!(format_bandwidth(0.0), "0.0 KB/s");
        assert_eq!(format_bandwidth(1024.0), "1.0 KB/s");
        assert_eq!(format_bandwidth(1536.0), "1.5 KB/s");
    }

    #[test]
    fn test_format_tunnels_empty() {
        assert_eq!(format_tunnels(&[]), "No active tunnels");
    }

    #[test]
    fn test_format_tunnels_contains_endpoints() {
        let info = TunnelInfo {
            host: "server1".to_string(),
            local_port: 8080,
            remote_port: 80,
            last_activity: tm_core::time::current_time_secs(),
            created_at: tm_core::time::current_time_secs(),
            bytes_sent: 2048,
            bytes_received: 4096,
            bandwidth_up: 0.0,
            bandwidth_down: 0.0,
            active_conns: 1,
            total_conns: 3,
        };
        let table = format_tunnels(&[info]);
        assert!(table.contains("server1:80 -> localhost:8080"));
        assert!(table.contains("2.0 KB"));
        assert!(table.contains("1 / 3"));
    }
}
