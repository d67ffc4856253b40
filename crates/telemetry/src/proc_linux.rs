//! RSS reader backed by procfs.

/// Reads `VmRSS` from `/proc/self/status`, in bytes.
pub fn read_rss_bytes() -> Option<u64> {
    let content = std::fs::read_to_string("/proc/self/status").ok()?;
    content
        .lines()
        .find_map(|line| parse_status_kb(line, "VmRSS:"))
        .map(|kb| kb * 1024)
}

/// Parses a `/proc/<pid>/status` line like `VmRSS:     1234 kB`.
fn parse_status_kb(line: &str, prefix: &str) -> Option<u64> {
    line.strip_prefix(prefix)?
        .split_whitespace()
        .next()
        .and_then(|v| v.parse().ok())
}
