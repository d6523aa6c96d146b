//! # Profiling Session
//!
//! All state of one profiling run: shadow memory, loop counters, the context
//! tracker and the dependence aggregator. Created by INIT, consumed by
//! [`ProfilingSession::fini`].
//!
//! ## Dependence rule
//!
//! ```text
//! STORE(i, addr)  shadow[addr] = ts(i, iteration, invocation)
//! LOAD(j, addr)   ts = shadow[addr]
//!                 ts != 0  =>  Key(src = instr(ts), dst = j,
//!                                  cross = iter(ts) != iteration)
//! ```
//!
//! Only read-after-write dependences are tracked. A load of memory whose page
//! was never allocated is skipped and counted, never dereferenced.

use std::collections::{HashMap, HashSet};

use log::{debug, info, warn};
use serde::Serialize;

use super::context::{ContextHandle, ContextId, ContextTracker};
use crate::analysis::{DependenceAggregator, DependenceKey};
use crate::config::ProfilerConfig;
use crate::domain::{InstrId, LoopId, Pid, RealAddr, ShadowError};
use crate::shadow::timestamp::{MAX_INSTR, MAX_INVOC, MAX_ITER};
use crate::shadow::{ShadowMemory, Timestamp};

/// Per-session access counters
#[derive(Debug, Default, Clone, Serialize)]
pub struct SessionCounters {
    pub loads: u64,
    pub stores: u64,
    pub allocs: u64,
    pub frees: u64,
    pub reallocs: u64,
    pub invocations: u64,
    pub iterations: u64,
    /// Loads/stores on addresses with no shadow page
    pub unallocated_accesses: u64,
    /// Loads dropped because the source store was in another invocation
    pub filtered_other_invocation: u64,
    /// REALLOCs whose source range had no shadow to carry over
    pub reallocs_without_history: u64,
}

/// Everything left once a session is finished
#[derive(Debug)]
pub struct SessionResult {
    pub loop_id: LoopId,
    pub pid: Pid,
    /// Distinct dependences in canonical order
    pub dependences: Vec<DependenceKey>,
    pub counters: SessionCounters,
    pub compactions: u64,
    /// Calling contexts the target loop was entered from, with entry counts
    pub invocation_contexts: Vec<(String, u64)>,
}

pub struct ProfilingSession {
    loop_id: LoopId,
    pid: Pid,
    same_invocation_only: bool,
    shadow: ShadowMemory,
    deps: DependenceAggregator,
    contexts: ContextTracker,
    iteration: u64,
    invocation: u64,
    counters: SessionCounters,
    invocation_contexts: HashMap<ContextHandle, u64>,
    /// Pages already reported as unallocated
    warned_pages: HashSet<u64>,
    warned_overflow: bool,
}

impl ProfilingSession {
    /// Start a run for `loop_id` in process `pid`.
    ///
    /// # Errors
    /// Returns an error if the target stack cannot be shadowed
    pub fn init(config: &ProfilerConfig, loop_id: LoopId, pid: Pid) -> Result<Self, ShadowError> {
        let mut shadow = ShadowMemory::new();
        if let Some(stack_size) = config.stack_size {
            shadow.init_stack(stack_size, pid)?;
            match shadow.heap_start() {
                Some(heap) => info!("Heap of {pid} starts at 0x{heap:x}"),
                None => debug!("No [heap] mapping in {pid}"),
            }
        }
        info!(
            "Profiling {loop_id} in {pid} (dedup capacity {}, {} workers)",
            config.dedup_capacity, config.workers
        );
        Ok(Self {
            loop_id,
            pid,
            same_invocation_only: config.same_invocation_only,
            shadow,
            deps: DependenceAggregator::new(config.dedup_capacity, config.workers),
            contexts: ContextTracker::new(),
            iteration: 0,
            invocation: 0,
            counters: SessionCounters::default(),
            invocation_contexts: HashMap::new(),
            warned_pages: HashSet::new(),
            warned_overflow: false,
        })
    }

    #[must_use]
    pub fn loop_id(&self) -> LoopId {
        self.loop_id
    }

    #[must_use]
    pub fn counters(&self) -> &SessionCounters {
        &self.counters
    }

    #[must_use]
    pub fn iteration(&self) -> u64 {
        self.iteration
    }

    #[must_use]
    pub fn invocation(&self) -> u64 {
        self.invocation
    }

    #[must_use]
    pub fn shadow(&self) -> &ShadowMemory {
        &self.shadow
    }

    #[must_use]
    pub fn aggregator(&self) -> &DependenceAggregator {
        &self.deps
    }

    // ========================================================================
    // Memory events
    // ========================================================================

    pub fn load(&mut self, instr: InstrId, addr: RealAddr, bare: InstrId) {
        self.counters.loads += 1;
        let Some(ts) = self.shadow.read(addr.0) else {
            self.unallocated(addr, "LOAD");
            return;
        };
        if ts.is_unwritten() {
            return;
        }
        if self.same_invocation_only && ts.invocation() != self.invocation & MAX_INVOC {
            self.counters.filtered_other_invocation += 1;
            return;
        }
        let cross = ts.iteration() != self.iteration & MAX_ITER;
        self.deps.record(DependenceKey::new(InstrId(ts.instr()), instr, bare, cross));
    }

    pub fn store(&mut self, instr: InstrId, _bare: InstrId, addr: RealAddr) {
        self.counters.stores += 1;
        if instr.0 > MAX_INSTR {
            self.overflow("instruction id", u64::from(instr.0));
        }
        let ts = Timestamp::encode(
            instr.0 % (MAX_INSTR + 1),
            self.iteration & MAX_ITER,
            self.invocation & MAX_INVOC,
        );
        if !self.shadow.write(addr.0, ts) {
            self.unallocated(addr, "STORE");
        }
    }

    /// # Errors
    /// Returns an error if the shadow for the range cannot be mapped
    pub fn allocate(&mut self, addr: RealAddr, size: u64) -> Result<(), ShadowError> {
        self.counters.allocs += 1;
        self.shadow.allocate(addr.0, size)?;
        Ok(())
    }

    pub fn heap_free(&mut self, addr: RealAddr, size: u64) {
        self.counters.frees += 1;
        let released = self.shadow.deallocate_range(addr.0, size);
        if released > 0 {
            debug!("free {addr} (+{size}): released {released} shadow pages");
        }
    }

    /// Shadow `dst` and carry the history of `src` over to it. The source
    /// range stays shadowed until it is freed.
    ///
    /// # Errors
    /// Returns an error if the destination shadow cannot be mapped
    pub fn realloc(&mut self, dst: RealAddr, src: RealAddr, size: u64) -> Result<(), ShadowError> {
        self.counters.reallocs += 1;
        self.shadow.allocate(dst.0, size)?;
        match self.shadow.copy(dst.0, src.0, size) {
            Ok(()) => Ok(()),
            Err(ShadowError::NotAllocated { .. } | ShadowError::RangeOverflow { .. }) => {
                self.counters.reallocs_without_history += 1;
                debug!("realloc {src} -> {dst} (+{size}): no source history");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    // ========================================================================
    // Loop and context events
    // ========================================================================

    pub fn loop_invoc(&mut self) {
        self.iteration = 0;
        self.invocation += 1;
        self.counters.invocations += 1;
        if self.invocation > MAX_INVOC {
            self.overflow("invocation", self.invocation);
        }
        let handle = self.contexts.active_handle();
        *self.invocation_contexts.entry(handle).or_default() += 1;
    }

    pub fn loop_iter(&mut self) {
        self.iteration += 1;
        self.counters.iterations += 1;
        if self.iteration > MAX_ITER {
            self.overflow("iteration", self.iteration);
        }
    }

    pub fn func_entry(&mut self, id: u32) {
        self.contexts.push(ContextId::function(id));
    }

    pub fn func_exit(&mut self, id: u32) {
        self.contexts.pop(ContextId::function(id));
    }

    pub fn loop_entry(&mut self, id: LoopId) {
        self.contexts.push(ContextId::looping(id.0));
    }

    pub fn loop_exit(&mut self, id: LoopId) {
        self.contexts.pop(ContextId::looping(id.0));
    }

    // ========================================================================
    // Finish
    // ========================================================================

    /// Distinct dependences so far, without ending the session
    #[must_use]
    pub fn snapshot(&self) -> Vec<DependenceKey> {
        self.deps.snapshot_sorted()
    }

    /// Final compaction. Shadow pages are released here.
    #[must_use]
    pub fn fini(self) -> SessionResult {
        let Self { loop_id, pid, deps, contexts, counters, invocation_contexts, shadow, .. } =
            self;
        drop(shadow);
        let compactions_before = deps.compactions();
        let pending = deps.pending();
        let dependences = deps.finish();
        let compactions = compactions_before + u64::from(pending > 0);

        let mut invocation_contexts: Vec<(String, u64)> = invocation_contexts
            .into_iter()
            .map(|(handle, count)| {
                (contexts.describe(handle).unwrap_or_else(|| format!("#{handle}")), count)
            })
            .collect();
        invocation_contexts.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

        info!(
            "{loop_id}: {} loads, {} stores, {} distinct dependences",
            counters.loads,
            counters.stores,
            dependences.len()
        );
        SessionResult { loop_id, pid, dependences, counters, compactions, invocation_contexts }
    }

    fn unallocated(&mut self, addr: RealAddr, what: &str) {
        self.counters.unallocated_accesses += 1;
        let page = addr.0 & !(self.shadow.page_size() - 1);
        if self.warned_pages.insert(page) {
            warn!("{what} of {addr} on page 0x{page:x} with no shadow; access skipped");
        }
    }

    fn overflow(&mut self, field: &str, value: u64) {
        if !self.warned_overflow {
            self.warned_overflow = true;
            warn!("{field} {value} exceeds its timestamp field; dependences may alias from here on");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Each test shadows its own real range; shadow pages are process-wide.

    fn session() -> ProfilingSession {
        let config = ProfilerConfig { workers: 2, ..ProfilerConfig::default() }.without_stack();
        ProfilingSession::init(&config, LoopId(1), Pid(1)).unwrap()
    }

    fn key(src: u32, dst: u32, cross: bool) -> DependenceKey {
        DependenceKey::new(InstrId(src), InstrId(dst), InstrId(dst), cross)
    }

    #[test]
    fn test_cross_iteration_dependence() {
        let mut s = session();
        let a = RealAddr(0x1100_0000);
        s.allocate(a, 8).unwrap();
        s.loop_invoc();
        s.store(InstrId(10), InstrId(10), a);
        s.loop_iter();
        s.load(InstrId(20), a, InstrId(20));
        assert_eq!(s.fini().dependences, vec![key(10, 20, true)]);
    }

    #[test]
    fn test_store_of_instruction_zero_before_first_invocation() {
        let mut s = session();
        let a = RealAddr(0x1180_0000);
        s.allocate(a, 8).unwrap();
        s.store(InstrId(0), InstrId(0), a);
        s.loop_invoc();
        s.load(InstrId(20), a, InstrId(20));
        assert_eq!(s.fini().dependences, vec![key(0, 20, false)]);
    }

    #[test]
    fn test_free_at_top_of_address_space() {
        let mut s = session();
        s.heap_free(RealAddr(u64::MAX - 100), 10);
        assert_eq!(s.shadow().allocated_pages(), 0);
        assert_eq!(s.fini().counters.frees, 1);
    }

    #[test]
    fn test_same_iteration_dependence() {
        let mut s = session();
        let a = RealAddr(0x1200_0000);
        s.allocate(a, 8).unwrap();
        s.loop_invoc();
        s.store(InstrId(10), InstrId(10), a);
        s.load(InstrId(20), a, InstrId(20));
        assert_eq!(s.fini().dependences, vec![key(10, 20, false)]);
    }

    #[test]
    fn test_unwritten_load_records_nothing() {
        let mut s = session();
        let a = RealAddr(0x1300_0000);
        s.allocate(a, 8).unwrap();
        s.loop_invoc();
        s.load(InstrId(20), a, InstrId(20));
        let result = s.fini();
        assert!(result.dependences.is_empty());
        assert_eq!(result.counters.loads, 1);
    }

    #[test]
    fn test_last_writer_wins() {
        let mut s = session();
        let a = RealAddr(0x1400_0000);
        s.allocate(a, 8).unwrap();
        s.loop_invoc();
        s.store(InstrId(10), InstrId(10), a);
        s.store(InstrId(11), InstrId(11), a);
        s.loop_iter();
        s.load(InstrId(20), a, InstrId(20));
        assert_eq!(s.fini().dependences, vec![key(11, 20, true)]);
    }

    #[test]
    fn test_unallocated_access_is_soft() {
        let mut s = session();
        let a = RealAddr(0x1500_0000);
        s.loop_invoc();
        s.store(InstrId(10), InstrId(10), a);
        s.load(InstrId(20), a, InstrId(20));
        s.load(InstrId(21), RealAddr(a.0 + 8), InstrId(21));
        let result = s.fini();
        assert!(result.dependences.is_empty());
        assert_eq!(result.counters.unallocated_accesses, 3);
    }

    #[test]
    fn test_same_invocation_only_filter() {
        let config = ProfilerConfig { same_invocation_only: true, workers: 1, ..ProfilerConfig::default() }
            .without_stack();
        let mut s = ProfilingSession::init(&config, LoopId(2), Pid(1)).unwrap();
        let a = RealAddr(0x1600_0000);
        s.allocate(a, 8).unwrap();
        s.loop_invoc();
        s.store(InstrId(10), InstrId(10), a);
        s.loop_invoc();
        s.load(InstrId(20), a, InstrId(20));
        let result = s.fini();
        assert!(result.dependences.is_empty());
        assert_eq!(result.counters.filtered_other_invocation, 1);
    }

    #[test]
    fn test_free_forgets_history() {
        let mut s = session();
        let page = s.shadow().page_size();
        let a = RealAddr(0x1700_0000);
        s.allocate(a, page).unwrap();
        s.loop_invoc();
        s.store(InstrId(10), InstrId(10), a);
        s.heap_free(a, page);
        s.allocate(a, page).unwrap();
        s.loop_iter();
        s.load(InstrId(20), a, InstrId(20));
        assert!(s.fini().dependences.is_empty());
    }

    #[test]
    fn test_realloc_carries_history() {
        let mut s = session();
        let page = s.shadow().page_size();
        let src = RealAddr(0x1800_0000);
        let dst = RealAddr(src.0 + 4 * page);
        s.allocate(src, 16).unwrap();
        s.loop_invoc();
        s.store(InstrId(10), InstrId(10), RealAddr(src.0 + 8));
        s.realloc(dst, src, 16).unwrap();
        s.loop_iter();
        s.load(InstrId(20), RealAddr(dst.0 + 8), InstrId(20));
        assert_eq!(s.fini().dependences, vec![key(10, 20, true)]);
    }

    #[test]
    fn test_realloc_from_unknown_source() {
        let mut s = session();
        let dst = RealAddr(0x1900_0000);
        s.realloc(dst, RealAddr(0x1a00_0000), 16).unwrap();
        assert!(s.shadow().is_allocated(dst.0));
        assert_eq!(s.counters().reallocs_without_history, 1);
    }

    #[test]
    fn test_invocation_resets_iteration() {
        let mut s = session();
        s.loop_invoc();
        s.loop_iter();
        s.loop_iter();
        assert_eq!((s.invocation(), s.iteration()), (1, 2));
        s.loop_invoc();
        assert_eq!((s.invocation(), s.iteration()), (2, 0));
    }

    #[test]
    fn test_invocation_contexts_recorded() {
        let mut s = session();
        s.func_entry(1);
        s.loop_invoc();
        s.loop_invoc();
        s.func_exit(1);
        s.func_entry(2);
        s.loop_invoc();
        let result = s.fini();
        assert_eq!(
            result.invocation_contexts,
            vec![("fn1 <- top".to_string(), 2), ("fn2 <- top".to_string(), 1)]
        );
    }
}
