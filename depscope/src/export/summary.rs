//! Machine-readable run summary (JSON)

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::domain::ExportError;
use crate::profiling::{EventStats, RunOutcome, SessionCounters};

/// How the run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitReason {
    Finished,
    Error,
    Interrupted,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub exit_reason: ExitReason,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub loop_id: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub events: u64,
    pub events_by_tag: BTreeMap<&'static str, u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub counters: Option<SessionCounters>,
    pub distinct_dependences: usize,
    pub compactions: u64,
    pub elapsed_secs: f64,
    /// Calling contexts of the profiled loop, most frequent first
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub invocation_contexts: Vec<InvocationContext>,
}

#[derive(Debug, Clone, Serialize)]
pub struct InvocationContext {
    pub context: String,
    pub invocations: u64,
}

impl RunSummary {
    #[must_use]
    pub fn from_outcome(outcome: &RunOutcome) -> Self {
        let result = &outcome.result;
        Self {
            exit_reason: ExitReason::Finished,
            loop_id: Some(result.loop_id.0),
            report: Some(outcome.report_path.clone()),
            error: None,
            events: outcome.stats.events,
            events_by_tag: outcome.stats.per_tag(),
            counters: Some(result.counters.clone()),
            distinct_dependences: result.dependences.len(),
            compactions: result.compactions,
            elapsed_secs: outcome.elapsed.as_secs_f64(),
            invocation_contexts: result
                .invocation_contexts
                .iter()
                .map(|(context, invocations)| InvocationContext {
                    context: context.clone(),
                    invocations: *invocations,
                })
                .collect(),
        }
    }

    /// Summary of a run that did not reach FINISHED
    #[must_use]
    pub fn failed(reason: ExitReason, error: &dyn std::fmt::Display, stats: &EventStats) -> Self {
        Self {
            exit_reason: reason,
            loop_id: None,
            report: None,
            error: Some(error.to_string()),
            events: stats.events,
            events_by_tag: stats.per_tag(),
            counters: None,
            distinct_dependences: 0,
            compactions: 0,
            elapsed_secs: 0.0,
            invocation_contexts: Vec::new(),
        }
    }
}

/// Write `summary` as pretty-printed JSON
///
/// # Errors
/// Returns an error if the file cannot be created or serialization fails
pub fn write_summary(path: &Path, summary: &RunSummary) -> Result<(), ExportError> {
    let file = File::create(path)
        .map_err(|source| ExportError::WriteFailed { path: path.to_path_buf(), source })?;
    let mut out = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut out, summary)?;
    out.flush()?;
    Ok(())
}
