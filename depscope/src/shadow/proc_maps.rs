//! Memory mapping utilities for target address space discovery
//!
//! This module parses /proc/pid/maps of the instrumented process. The stack is
//! live without any explicit ALLOC event, so its range has to be discovered
//! here before the first load or store touches it.

use crate::domain::{Pid, ShadowError};
use log::debug;
use std::fs;

/// Address range of one mapping in the target process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryRange {
    pub start: u64,
    pub end: u64,
}

impl MemoryRange {
    /// Check if an address falls within this memory range
    #[must_use]
    pub fn contains(&self, addr: u64) -> bool {
        addr >= self.start && addr < self.end
    }

    #[must_use]
    pub fn len(&self) -> u64 {
        self.end - self.start
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

/// One line of /proc/pid/maps
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MapEntry {
    pub range: MemoryRange,
    /// Pathname column: a file path, `[stack]`, `[heap]`, or absent
    pub name: Option<String>,
}

/// Parse the contents of a maps file.
///
/// Lines are `start-end perms offset dev inode [pathname]`; malformed lines are
/// skipped.
#[must_use]
pub fn parse_maps(contents: &str) -> Vec<MapEntry> {
    contents
        .lines()
        .filter_map(|line| {
            let mut parts = line.split_whitespace();
            let (start, end) = parts.next()?.split_once('-')?;
            let start = u64::from_str_radix(start, 16).ok()?;
            let end = u64::from_str_radix(end, 16).ok()?;
            // perms, offset, dev, inode
            let name = parts.nth(4).map(str::to_string);
            Some(MapEntry { range: MemoryRange { start, end }, name })
        })
        .collect()
}

/// Read and parse /proc/pid/maps
///
/// # Errors
/// Returns an error if /proc/pid/maps cannot be read
pub fn read_maps(pid: Pid) -> Result<Vec<MapEntry>, ShadowError> {
    let maps_path = format!("/proc/{}/maps", pid.0);
    let maps = fs::read_to_string(&maps_path)
        .map_err(|source| ShadowError::MapsReadFailed { pid: pid.0, source })?;
    let entries = parse_maps(&maps);
    debug!("Read {} mappings from {maps_path}", entries.len());
    Ok(entries)
}

/// Find the first mapping with the given pathname (e.g. `[stack]`)
#[must_use]
pub fn find_named(entries: &[MapEntry], name: &str) -> Option<MemoryRange> {
    entries.iter().find(|e| e.name.as_deref() == Some(name)).map(|e| e.range)
}
