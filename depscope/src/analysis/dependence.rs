//! Dependence facts observed by the profiler

use std::fmt;

use crate::domain::InstrId;

/// One observed read-after-write dependence.
///
/// Keys are plain values compared field by field; the derived order (by
/// `src`, then `dst`, `dst_bare`, `cross`) is the canonical report order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DependenceKey {
    /// Store that last wrote the location
    pub src: InstrId,
    /// Load that read it
    pub dst: InstrId,
    /// Bare id of the load, as assigned by the producer
    pub dst_bare: InstrId,
    /// Written in an earlier iteration of the same invocation (or in an
    /// earlier invocation)
    pub cross: bool,
}

impl DependenceKey {
    #[must_use]
    pub fn new(src: InstrId, dst: InstrId, dst_bare: InstrId, cross: bool) -> Self {
        Self { src, dst, dst_bare, cross }
    }
}

/// `src dst dst_bare cross`, the body of a report line
impl fmt::Display for DependenceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {} {}", self.src.0, self.dst.0, self.dst_bare.0, u8::from(self.cross))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn key(src: u32, dst: u32, bare: u32, cross: bool) -> DependenceKey {
        DependenceKey::new(InstrId(src), InstrId(dst), InstrId(bare), cross)
    }

    #[test]
    fn test_structural_equality() {
        let mut set = HashSet::new();
        assert!(set.insert(key(10, 20, 20, true)));
        assert!(!set.insert(key(10, 20, 20, true)));
        assert!(set.insert(key(10, 20, 20, false)));
        assert!(set.insert(key(10, 20, 21, true)));
        assert_eq!(set.len(), 3);
    }

    #[test]
    fn test_canonical_order() {
        let mut keys = vec![key(2, 1, 1, false), key(1, 3, 3, true), key(1, 3, 3, false), key(1, 2, 9, true)];
        keys.sort();
        assert_eq!(
            keys,
            vec![key(1, 2, 9, true), key(1, 3, 3, false), key(1, 3, 3, true), key(2, 1, 1, false)]
        );
    }

    #[test]
    fn test_display() {
        assert_eq!(key(10, 20, 20, true).to_string(), "10 20 20 1");
        assert_eq!(key(10, 20, 21, false).to_string(), "10 20 21 0");
    }
}
