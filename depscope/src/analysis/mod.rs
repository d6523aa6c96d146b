//! Dependence analysis
//!
//! Pure data logic with no I/O: the key type produced by the profiling session
//! and the aggregator that deduplicates keys before the report is written.

pub mod aggregator;
pub mod dependence;

pub use aggregator::{dedup_parallel, DependenceAggregator, DEFAULT_DEDUP_CAPACITY};
pub use dependence::DependenceKey;
