//! Calling-context tracking
//!
//! FUNC_ENTRY/FUNC_EXIT and LOOP_ENTRY/LOOP_EXIT events maintain a stack of
//! `(kind, id)` frames rooted at a `Top` frame. Each distinct stack is given a
//! small integer handle so that it can be stored and compared cheaply; handles
//! start at 1 and can be decoded back into the stack.

use std::collections::HashMap;
use std::fmt;

use log::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ContextKind {
    Top,
    Function,
    Loop,
}

/// One frame of the context stack
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContextId {
    pub kind: ContextKind,
    pub id: u32,
}

impl ContextId {
    pub const TOP: Self = Self { kind: ContextKind::Top, id: 0 };

    #[must_use]
    pub fn function(id: u32) -> Self {
        Self { kind: ContextKind::Function, id }
    }

    #[must_use]
    pub fn looping(id: u32) -> Self {
        Self { kind: ContextKind::Loop, id }
    }
}

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            ContextKind::Top => f.write_str("top"),
            ContextKind::Function => write!(f, "fn{}", self.id),
            ContextKind::Loop => write!(f, "loop{}", self.id),
        }
    }
}

/// Handle of a registered context stack. Never zero.
pub type ContextHandle = u32;

/// Current context stack plus the registry of every stack seen so far
pub struct ContextTracker {
    stack: Vec<ContextId>,
    handles: HashMap<Vec<ContextId>, ContextHandle>,
    /// `stacks[h - 1]` is the stack with handle `h`
    stacks: Vec<Vec<ContextId>>,
    cached: Option<ContextHandle>,
    mismatched_pops: u64,
}

impl ContextTracker {
    #[must_use]
    pub fn new() -> Self {
        Self {
            stack: vec![ContextId::TOP],
            handles: HashMap::new(),
            stacks: Vec::new(),
            cached: None,
            mismatched_pops: 0,
        }
    }

    pub fn push(&mut self, ctx: ContextId) {
        self.cached = None;
        self.stack.push(ctx);
    }

    /// Pop `ctx`, discarding any frames above it.
    ///
    /// Frames can be left behind when the target unwinds (`longjmp`, C++
    /// exceptions) without reporting an exit. The `Top` frame is never popped;
    /// if `ctx` is not on the stack everything down to `Top` is discarded.
    pub fn pop(&mut self, ctx: ContextId) {
        self.cached = None;
        if self.stack.last() == Some(&ctx) && ctx != ContextId::TOP {
            self.stack.pop();
            return;
        }
        self.mismatched_pops += 1;
        debug!("context pop of {ctx} does not match top of {}", self.render(&self.stack));
        while let Some(&top) = self.stack.last() {
            if top == ContextId::TOP {
                break;
            }
            self.stack.pop();
            if top == ctx {
                break;
            }
        }
    }

    /// Handle of `stack`, registering it if new
    pub fn encode(&mut self, stack: &[ContextId]) -> ContextHandle {
        if let Some(&handle) = self.handles.get(stack) {
            return handle;
        }
        self.stacks.push(stack.to_vec());
        #[allow(clippy::cast_possible_truncation)]
        let handle = self.stacks.len() as ContextHandle;
        self.handles.insert(stack.to_vec(), handle);
        handle
    }

    /// Handle of the current stack
    pub fn active_handle(&mut self) -> ContextHandle {
        if let Some(handle) = self.cached {
            return handle;
        }
        let stack = std::mem::take(&mut self.stack);
        let handle = self.encode(&stack);
        self.stack = stack;
        self.cached = Some(handle);
        handle
    }

    /// Stack registered under `handle`, outermost frame first
    #[must_use]
    pub fn decode(&self, handle: ContextHandle) -> Option<&[ContextId]> {
        let index = usize::try_from(handle).ok()?.checked_sub(1)?;
        self.stacks.get(index).map(Vec::as_slice)
    }

    /// Innermost-first rendering, e.g. `loop3 <- fn1 <- top`
    #[must_use]
    pub fn describe(&self, handle: ContextHandle) -> Option<String> {
        self.decode(handle).map(|stack| self.render(stack))
    }

    #[must_use]
    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    #[must_use]
    pub fn registered(&self) -> usize {
        self.stacks.len()
    }

    /// Pops that did not match the innermost frame
    #[must_use]
    pub fn mismatched_pops(&self) -> u64 {
        self.mismatched_pops
    }

    #[allow(clippy::unused_self)]
    fn render(&self, stack: &[ContextId]) -> String {
        stack.iter().rev().map(ToString::to_string).collect::<Vec<_>>().join(" <- ")
    }
}

impl Default for ContextTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handles_start_at_one() {
        let mut tracker = ContextTracker::new();
        assert_eq!(tracker.active_handle(), 1);
        assert_eq!(tracker.decode(0), None);
        assert_eq!(tracker.decode(1), Some(&[ContextId::TOP][..]));
    }

    #[test]
    fn test_equal_stacks_share_a_handle() {
        let mut tracker = ContextTracker::new();
        tracker.push(ContextId::function(1));
        tracker.push(ContextId::looping(3));
        let inner = tracker.active_handle();

        tracker.pop(ContextId::looping(3));
        let outer = tracker.active_handle();
        assert_ne!(inner, outer);

        tracker.push(ContextId::looping(3));
        assert_eq!(tracker.active_handle(), inner);
        assert_eq!(tracker.registered(), 2);
        assert_eq!(tracker.describe(inner).unwrap(), "loop3 <- fn1 <- top");
    }

    #[test]
    fn test_pop_unwinds_to_matching_frame() {
        let mut tracker = ContextTracker::new();
        tracker.push(ContextId::function(1));
        tracker.push(ContextId::function(2));
        tracker.push(ContextId::looping(7));

        // fn2 exits without its loop reporting an exit
        tracker.pop(ContextId::function(2));
        assert_eq!(tracker.depth(), 2);
        assert_eq!(tracker.mismatched_pops(), 1);
    }

    #[test]
    fn test_pop_never_removes_top() {
        let mut tracker = ContextTracker::new();
        tracker.push(ContextId::function(1));
        tracker.pop(ContextId::function(9));
        assert_eq!(tracker.depth(), 1);
        tracker.pop(ContextId::TOP);
        assert_eq!(tracker.depth(), 1);
        assert_eq!(tracker.active_handle(), 1);
    }
}
