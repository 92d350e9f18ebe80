//! Process memory diagnostics.

use std::fs;

use tracing::info;

/// Resident and peak memory of the current process, in kilobytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryUsage {
    pub resident_kb: u64,
    pub peak_kb: u64,
}

/// Reads memory usage from `/proc/self/status`.
pub fn current_usage() -> Option<MemoryUsage> {
    let status = fs::read_to_string("/proc/self/status").ok()?;
    parse_status(&status)
}

fn parse_status(status: &str) -> Option<MemoryUsage> {
    let field = |name: &str| {
        status
            .lines()
            .find_map(|line| line.strip_prefix(name))
            .and_then(|rest| rest.split_whitespace().next())
            .and_then(|value| value.parse::<u64>().ok())
    };
    Some(MemoryUsage {
        resident_kb: field("VmRSS:")?,
        peak_kb: field("VmHWM:").unwrap_or(0),
    })
}

/// Logs memory usage at `info` level, tagged with `context`.
pub fn log_memory_usage(context: &str) {
    match current_usage() {
        Some(usage) => info!(
            "Memory [{}]: resident {} KB, peak {} KB",
            context, usage.resident_kb, usage.peak_kb
        ),
        None => info!("Memory [{}]: diagnostics unavailable on this platform", context),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_status() {
        let status = "Name:\tlintbridge\nVmHWM:\t  20480 kB\nVmRSS:\t  10240 kB\n";
        assert_eq!(
            parse_status(status),
            Some(MemoryUsage {
                resident_kb: 10240,
                peak_kb: 20480
            })
        );
        assert_eq!(parse_status("Name:\tx\n"), None);
    }
}
