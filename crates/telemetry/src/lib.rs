//! Process memory sampler for the formrelay server.
//!
//! Periodically reads this process's resident set size from a
//! platform-specific source, logs it and optionally forwards it to a callback.

mod sampler;

#[cfg(target_os = "linux")]
#[path = "proc_linux.rs"]
mod platform;

#[cfg(not(target_os = "linux"))]
#[path = "proc_other.rs"]
mod platform;

pub use sampler::{DEFAULT_INTERVAL, MemorySample, MemorySampler, SampleFn};

/// Reads the current resident set size, if the platform exposes it.
pub fn read_rss_bytes() -> Option<u64> {
    platform::read_rss_bytes()
}
