//! Run output
//!
//! - `report`: the dependence report consumed by downstream passes
//! - `summary`: optional JSON run summary for scripts and CI

pub mod report;
pub mod summary;

pub use report::{report_path, write_partial_report_file, write_report, write_report_file};
pub use summary::{write_summary, ExitReason, RunSummary};
