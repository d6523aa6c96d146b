// Rates are display-only
#![allow(clippy::cast_precision_loss)]

use std::collections::BTreeMap;
use std::time::Duration;

use depscope_common::tag_name;

use super::session::SessionResult;

/// Largest tag value in the protocol, plus one
const TAG_SLOTS: usize = 32;

/// Event counters kept by the dispatcher
#[derive(Debug, Clone)]
pub struct EventStats {
    pub events: u64,
    by_tag: [u64; TAG_SLOTS],
}

impl Default for EventStats {
    fn default() -> Self {
        Self { events: 0, by_tag: [0; TAG_SLOTS] }
    }
}

impl EventStats {
    #[inline]
    pub fn count(&mut self, tag: u8) {
        self.events += 1;
        if let Some(slot) = self.by_tag.get_mut(usize::from(tag)) {
            *slot += 1;
        }
    }

    #[must_use]
    pub fn of(&self, tag: u8) -> u64 {
        self.by_tag.get(usize::from(tag)).copied().unwrap_or(0)
    }

    /// Nonzero counters keyed by tag name
    #[must_use]
    pub fn per_tag(&self) -> BTreeMap<&'static str, u64> {
        self.by_tag
            .iter()
            .enumerate()
            .filter(|(_, n)| **n > 0)
            .filter_map(|(tag, n)| u8::try_from(tag).ok().map(|t| (tag_name(t), *n)))
            .collect()
    }
}

/// Display the end-of-run statistics
pub fn display_statistics(stats: &EventStats, result: &SessionResult, elapsed: Duration) {
    let secs = elapsed.as_secs_f64();
    let rate = if secs > 0.0 { stats.events as f64 / secs / 1e6 } else { 0.0 };
    eprintln!("stats: events={} ({rate:.1}M/s over {secs:.1}s)", stats.events);
    let tags: Vec<String> = stats.per_tag().iter().map(|(name, n)| format!("{name}={n}")).collect();
    eprintln!("  by tag: {}", tags.join(" "));
    let c = &result.counters;
    eprintln!("  loads={} stores={} unallocated={}", c.loads, c.stores, c.unallocated_accesses);
    eprintln!(
        "  dependences={} compactions={} invocations={}",
        result.dependences.len(),
        result.compactions,
        c.invocations
    );
}

/// Progress line for long runs
pub fn display_progress(stats: &EventStats, pending_keys: usize, distinct: usize) {
    log::info!(
        "Progress: {}M events, {} keys pending, {} distinct dependences",
        stats.events / 1_000_000,
        pending_keys,
        distinct
    );
}
