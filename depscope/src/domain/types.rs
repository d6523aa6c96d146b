//! Domain types providing compile-time safety and self-documentation
//!
//! These newtype wrappers prevent common bugs like passing an instruction id
//! where a loop id is expected, and make function signatures more expressive.

use std::fmt;

/// Static instruction id assigned by the instrumentation pass
///
/// Identifies one load or store in the target program. The same id appears in
/// every dynamic execution of that instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstrId(pub u32);

impl fmt::Display for InstrId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "I{}", self.0)
    }
}

/// Id of the loop being profiled in this run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LoopId(pub u32);

impl fmt::Display for LoopId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Loop#{}", self.0)
    }
}

/// Process ID of the instrumented target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Pid(pub u64);

impl fmt::Display for Pid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PID:{}", self.0)
    }
}

/// Address in the target process's address space
///
/// Never dereferenced by the consumer directly; only translated to a shadow
/// address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RealAddr(pub u64);

impl fmt::Display for RealAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:x}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_formats() {
        assert_eq!(InstrId(42).to_string(), "I42");
        assert_eq!(LoopId(3).to_string(), "Loop#3");
        assert_eq!(Pid(1234).to_string(), "PID:1234");
        assert_eq!(RealAddr(0x1000).to_string(), "0x1000");
    }
}
