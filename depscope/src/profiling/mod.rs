//! Profiling core modules
//!
//! This module contains the consumer side of a profiling run:
//! - Event decoding
//! - Event dispatch and run control
//! - Session state (shadow memory updates, loop counters)
//! - Calling-context tracking
//! - CPU utilities for sizing the compaction pool
//! - Statistics display

pub mod context;
pub mod cpu_utils;
pub mod dispatcher;
pub mod event;
pub mod event_display;
pub mod session;

// Re-export common types
pub use context::{ContextHandle, ContextId, ContextKind, ContextTracker};
pub use cpu_utils::{default_worker_count, online_cpus};
pub use dispatcher::{EventDispatcher, Flow, RunOutcome};
pub use event::Event;
pub use event_display::{display_progress, display_statistics, EventStats};
pub use session::{ProfilingSession, SessionCounters, SessionResult};
