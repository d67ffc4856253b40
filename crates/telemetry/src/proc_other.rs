//! Fallback for platforms without a supported RSS source.

pub fn read_rss_bytes() -> Option<u64> {
    None
}
