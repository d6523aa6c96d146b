//! CPU utility functions
//!
//! Utilities for querying CPU information from /sys filesystem.

use anyhow::{Context, Result};
use std::fs;

/// Parse a /sys CPU list like "0-3" or "0-3,8-11" (NUMA systems)
///
/// # Errors
/// Returns an error if any range is not a number or number pair
pub fn parse_cpu_list(content: &str) -> Result<Vec<u32>> {
    let mut cpus = Vec::new();

    for range in content.trim().split(',').filter(|r| !r.is_empty()) {
        if let Some((start, end)) = range.split_once('-') {
            // Range like "0-3"
            let start: u32 = start.parse().with_context(|| format!("Bad CPU range {range:?}"))?;
            let end: u32 = end.parse().with_context(|| format!("Bad CPU range {range:?}"))?;
            cpus.extend(start..=end);
        } else {
            // Single CPU like "5"
            let cpu: u32 = range.parse().with_context(|| format!("Bad CPU id {range:?}"))?;
            cpus.push(cpu);
        }
    }

    Ok(cpus)
}

/// Get list of online CPU IDs from /sys/devices/system/cpu/online
///
/// # Errors
/// Returns an error if the file cannot be read or parsed
pub fn online_cpus() -> Result<Vec<u32>> {
    let content = fs::read_to_string("/sys/devices/system/cpu/online")
        .context("Failed to read /sys/devices/system/cpu/online")?;
    parse_cpu_list(&content)
}

/// Compaction thread count: one per online CPU
pub fn default_worker_count() -> usize {
    match online_cpus() {
        Ok(cpus) if !cpus.is_empty() => cpus.len(),
        _ => std::thread::available_parallelism().map_or(1, std::num::NonZeroUsize::get),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_cpu_list() {
        assert_eq!(parse_cpu_list("0-3\n").unwrap(), vec![0, 1, 2, 3]);
        assert_eq!(parse_cpu_list("0-1,8-9,12").unwrap(), vec![0, 1, 8, 9, 12]);
        assert!(parse_cpu_list("0-x").is_err());
    }

    #[test]
    #[cfg(target_os = "linux")]
    fn test_worker_count_follows_online_cpus() {
        let cpus = online_cpus().unwrap();
        assert!(cpus.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(default_worker_count(), cpus.len());
    }

    #[test]
    fn test_default_worker_count_positive() {
        assert!(default_worker_count() >= 1);
    }
}
