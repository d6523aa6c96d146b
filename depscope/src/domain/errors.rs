//! Structured error types for depscope
//!
//! Using thiserror for automatic Display implementation and error chaining.
//! Every variant here is fatal for the profiling run; recoverable gaps (an
//! access to a page that was never allocated) are counted, not raised.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Invalid shared memory name {0:?} (must start with '/' and contain no other '/')")]
    InvalidName(String),

    #[error("Failed to create shared memory object {name}: {source}")]
    ShmCreateFailed { name: String, source: std::io::Error },

    #[error("Failed to open shared memory object {name}: {source}")]
    ShmOpenFailed { name: String, source: std::io::Error },

    #[error("Failed to map {len} bytes of shared memory: {source}")]
    MapFailed { len: usize, source: std::io::Error },

    #[error("Ring capacity {0} is not a nonzero power of two")]
    InvalidCapacity(usize),

    #[error("Shared region of {len} bytes cannot hold a ring of {capacity} bytes")]
    RegionTooSmall { len: usize, capacity: usize },

    #[error("Shared region is not an initialized event ring (magic 0x{0:x})")]
    BadMagic(u64),
}

#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Unknown event tag {tag} at stream offset {offset}")]
    UnknownTag { tag: u8, offset: u64 },

    #[error("Event stream ended mid-event at offset {offset}")]
    Truncated { offset: u64 },

    #[error("Event stream closed at offset {offset} without FINISHED")]
    MissingFinished { offset: u64 },

    #[error("Event stream interrupted at offset {offset}")]
    Interrupted { offset: u64 },

    #[error("{tag} event received before INIT")]
    NotInitialized { tag: &'static str },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Error, Debug)]
pub enum ShadowError {
    #[error("Failed to map shadow 0x{shadow:x} for 0x{addr:x} (+{size} bytes): {source}")]
    MapFailed { addr: u64, size: u64, shadow: u64, source: std::io::Error },

    #[error("Range 0x{addr:x} (+{size} bytes) wraps the address space")]
    RangeOverflow { addr: u64, size: u64 },

    #[error("Shadow for 0x{addr:x} (+{size} bytes) is not allocated")]
    NotAllocated { addr: u64, size: u64 },

    #[error("No [stack] mapping found in /proc/{pid}/maps")]
    StackNotFound { pid: u64 },

    #[error("Failed to read /proc/{pid}/maps: {source}")]
    MapsReadFailed { pid: u64, source: std::io::Error },
}

#[derive(Error, Debug)]
pub enum ExportError {
    #[error("Failed to write {path}: {source}")]
    WriteFailed { path: PathBuf, source: std::io::Error },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

#[derive(Error, Debug)]
pub enum ProfilerError {
    #[error("Protocol error after {events} events (last: {last_event}): {source}")]
    Protocol { source: ProtocolError, events: u64, last_event: String },

    #[error(transparent)]
    Shadow(#[from] ShadowError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Export(#[from] ExportError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_tag_display() {
        let err = ProtocolError::UnknownTag { tag: 99, offset: 1024 };
        assert_eq!(err.to_string(), "Unknown event tag 99 at stream offset 1024");
    }

    #[test]
    fn test_protocol_error_carries_last_event() {
        let err = ProfilerError::Protocol {
            source: ProtocolError::Truncated { offset: 17 },
            events: 3,
            last_event: "STORE(instr=10, bare=10, addr=0x1000)".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("after 3 events"));
        assert!(msg.contains("STORE(instr=10"));
        assert!(msg.contains("offset 17"));
    }

    #[test]
    fn test_shadow_error_names_address() {
        let err = ShadowError::MapFailed {
            addr: 0x1000,
            size: 8,
            shadow: 0x2000_0000_8000,
            source: std::io::Error::from_raw_os_error(libc::EEXIST),
        };
        let msg = err.to_string();
        assert!(msg.contains("0x1000"));
        assert!(msg.contains("0x200000008000"));
    }

    #[test]
    fn test_stack_not_found_display() {
        let err = ShadowError::StackNotFound { pid: 77 };
        assert_eq!(err.to_string(), "No [stack] mapping found in /proc/77/maps");
    }
}
