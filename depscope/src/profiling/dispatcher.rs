//! # Event Dispatch
//!
//! Decodes events from an [`EventReader`] and routes them to the
//! [`ProfilingSession`].
//!
//! ## Event Routing
//!
//! - `INIT` → create the session (shadow memory, stack, empty log)
//! - `LOAD` / `STORE` → shadow lookup / update
//! - `ALLOC` / `HEAP_FREE` / `REALLOC` → shadow page lifetime
//! - `LOOP_INVOC` / `LOOP_ITER` → loop counters
//! - `FUNC_*` / `LOOP_ENTRY` / `LOOP_EXIT` → context stack
//! - `FINISHED` → final compaction and report
//!
//! Any fatal error after INIT writes what has been collected to a `.partial`
//! report before the error is returned.

use std::path::PathBuf;
use std::time::Instant;

use log::{error, info, warn};

use super::event::Event;
use super::event_display::{display_progress, EventStats};
use super::session::{ProfilingSession, SessionResult};
use crate::config::ProfilerConfig;
use crate::domain::{ProfilerError, ProtocolError};
use crate::export::report;
use crate::transport::reader::{ByteSource, EventReader};

/// Whether the stream continues after an event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Finished,
}

/// Result of a completed run
#[derive(Debug)]
pub struct RunOutcome {
    pub report_path: PathBuf,
    pub result: SessionResult,
    pub stats: EventStats,
    pub elapsed: std::time::Duration,
}

/// Drives one profiling run
pub struct EventDispatcher {
    config: ProfilerConfig,
    session: Option<ProfilingSession>,
    pub stats: EventStats,
    last_event: Option<Event>,
    next_progress: u64,
}

impl EventDispatcher {
    #[must_use]
    pub fn new(config: ProfilerConfig) -> Self {
        let next_progress = config.progress_interval;
        Self { config, session: None, stats: EventStats::default(), last_event: None, next_progress }
    }

    /// Consume events until FINISHED.
    ///
    /// # Errors
    /// Protocol violations, shadow mapping failures and report I/O failures.
    /// A partial report has been written when the session had started.
    pub fn run<S: ByteSource>(
        &mut self,
        reader: &mut EventReader<S>,
    ) -> Result<RunOutcome, ProfilerError> {
        let started = Instant::now();
        let result = self.dispatch_all(reader);
        match result {
            Ok(()) => self.finish(started),
            Err(e) => {
                self.flush_partial();
                Err(e)
            }
        }
    }

    fn dispatch_all<S: ByteSource>(&mut self, reader: &mut EventReader<S>) -> Result<(), ProfilerError> {
        loop {
            let event = match Event::read(reader) {
                Ok(Some(event)) => event,
                Ok(None) => {
                    let offset = reader.offset();
                    return Err(self.protocol_error(ProtocolError::MissingFinished { offset }));
                }
                Err(e) => return Err(self.protocol_error(e)),
            };
            if self.process_event(event)? == Flow::Finished {
                return Ok(());
            }
        }
    }

    /// Process a single event
    ///
    /// # Errors
    /// Returns an error for events before INIT and for shadow mapping failures
    pub fn process_event(&mut self, event: Event) -> Result<Flow, ProfilerError> {
        self.stats.count(event.tag());

        if let Event::Init { loop_id, pid } = event {
            if self.session.is_some() {
                warn!("Ignoring repeated INIT({loop_id}, {pid})");
            } else {
                self.session = Some(ProfilingSession::init(&self.config, loop_id, pid)?);
            }
            self.last_event = Some(event);
            return Ok(Flow::Continue);
        }

        let Some(session) = self.session.as_mut() else {
            let tag = depscope_common::tag_name(event.tag());
            return Err(self.protocol_error(ProtocolError::NotInitialized { tag }));
        };

        let flow = match event {
            Event::Load { instr, addr, bare } => {
                session.load(instr, addr, bare);
                Flow::Continue
            }
            Event::Store { instr, bare, addr } => {
                session.store(instr, bare, addr);
                Flow::Continue
            }
            Event::Alloc { addr, size } => {
                session.allocate(addr, size).inspect_err(|e| error!("ALLOC failed: {e}"))?;
                Flow::Continue
            }
            Event::LoopInvoc => {
                session.loop_invoc();
                Flow::Continue
            }
            Event::LoopIter => {
                session.loop_iter();
                Flow::Continue
            }
            Event::HeapFree { addr, size } => {
                session.heap_free(addr, size);
                Flow::Continue
            }
            Event::Realloc { dst, src, size } => {
                session.realloc(dst, src, size).inspect_err(|e| error!("REALLOC failed: {e}"))?;
                Flow::Continue
            }
            Event::FuncEntry(id) => {
                session.func_entry(id);
                Flow::Continue
            }
            Event::FuncExit(id) => {
                session.func_exit(id);
                Flow::Continue
            }
            Event::LoopEntry(id) => {
                session.loop_entry(id);
                Flow::Continue
            }
            Event::LoopExit(id) => {
                session.loop_exit(id);
                Flow::Continue
            }
            Event::Finished => Flow::Finished,
            Event::Init { .. } => Flow::Continue,
        };
        self.last_event = Some(event);

        if self.next_progress != 0 && self.stats.events >= self.next_progress {
            self.next_progress += self.config.progress_interval;
            let agg = session.aggregator();
            display_progress(&self.stats, agg.pending(), agg.distinct());
        }
        Ok(flow)
    }

    fn finish(&mut self, started: Instant) -> Result<RunOutcome, ProfilerError> {
        let Some(session) = self.session.take() else {
            return Err(self.protocol_error(ProtocolError::NotInitialized { tag: "FINISHED" }));
        };
        let result = session.fini();
        let report_path = report::write_report_file(&self.config.output_dir, &result)?;
        info!(
            "Wrote {} dependences to {}",
            result.dependences.len(),
            report_path.display()
        );
        Ok(RunOutcome { report_path, result, stats: self.stats.clone(), elapsed: started.elapsed() })
    }

    fn flush_partial(&mut self) {
        let Some(session) = self.session.take() else {
            return;
        };
        let loop_id = session.loop_id();
        let keys = session.snapshot();
        match report::write_partial_report_file(&self.config.output_dir, loop_id, &keys) {
            Ok(path) => warn!("Wrote partial report ({} dependences) to {}", keys.len(), path.display()),
            Err(e) => error!("Failed to write partial report: {e}"),
        }
    }

    fn protocol_error(&self, source: ProtocolError) -> ProfilerError {
        ProfilerError::Protocol {
            source,
            events: self.stats.events,
            last_event: self.last_event.map_or_else(|| "none".to_string(), |e| e.to_string()),
        }
    }
}
