//! # Shared Wire ABI (Producer ↔ Consumer)
//!
//! Defines the constants and the shared-memory ring header used by both the
//! instrumented target process (producer) and the `depscope` consumer. All
//! layouts are `#[repr(C)]` and all payload fields are little-endian so that a
//! producer built separately from the consumer still speaks the same protocol.
//!
//! ## Event Stream
//!
//! Every event is a one-byte tag followed by a fixed-size payload:
//!
//! ```text
//! ┌─────┬──────────────────────────────────────────────┐
//! │ tag │ payload (see payload_len(tag))               │
//! └─────┴──────────────────────────────────────────────┘
//!   u8    little-endian u32/u64 fields, no padding
//! ```
//!
//! ## Key Types
//!
//! - [`RingHeader`] - Control block placed at the start of the shared region
//! - [`payload_len`] - Payload size lookup used by the consumer's decoder

#![no_std]

use core::sync::atomic::{AtomicU32, AtomicU64};

// ============================================================================
// Event Tags
// ============================================================================

/// Profiling run start. Payload: `u32 loop_id`, `u64 pid`.
pub const TAG_INIT: u8 = 0;

/// Memory read. Payload: `u32 instr_id`, `u64 addr`, `u32 bare_instr_id`.
pub const TAG_LOAD: u8 = 1;

/// Memory write. Payload: `u32 instr_id`, `u32 bare_instr_id`, `u64 addr`.
///
/// Note the field order differs from [`TAG_LOAD`].
pub const TAG_STORE: u8 = 2;

/// Region becomes live (heap, global, stack slot). Payload: `u64 addr`, `u64 size`.
pub const TAG_ALLOC: u8 = 3;

/// Target loop entered. No payload.
pub const TAG_LOOP_INVOC: u8 = 4;

/// Target loop iteration boundary. No payload.
pub const TAG_LOOP_ITER: u8 = 5;

/// Profiling run complete. No payload.
pub const TAG_FINISHED: u8 = 6;

/// Function entered (context tracking). Payload: `u32 function_id`.
pub const TAG_FUNC_ENTRY: u8 = 7;

/// Function exited (context tracking). Payload: `u32 function_id`.
pub const TAG_FUNC_EXIT: u8 = 8;

/// Any loop entered (context tracking). Payload: `u32 loop_id`.
pub const TAG_LOOP_ENTRY: u8 = 9;

/// Any loop exited (context tracking). Payload: `u32 loop_id`.
pub const TAG_LOOP_EXIT: u8 = 10;

/// Heap region released. Payload: `u64 addr`, `u64 size`.
pub const TAG_HEAP_FREE: u8 = 16;

/// Region moved by `realloc`. Payload: `u64 dst`, `u64 src`, `u64 size`.
pub const TAG_REALLOC: u8 = 17;

/// Payload size in bytes for a tag, or `None` for tags outside the protocol.
#[must_use]
pub const fn payload_len(tag: u8) -> Option<usize> {
    match tag {
        TAG_INIT => Some(4 + 8),
        TAG_LOAD | TAG_STORE => Some(4 + 8 + 4),
        TAG_ALLOC | TAG_HEAP_FREE => Some(8 + 8),
        TAG_LOOP_INVOC | TAG_LOOP_ITER | TAG_FINISHED => Some(0),
        TAG_FUNC_ENTRY | TAG_FUNC_EXIT | TAG_LOOP_ENTRY | TAG_LOOP_EXIT => Some(4),
        TAG_REALLOC => Some(8 + 8 + 8),
        _ => None,
    }
}

/// Human-readable tag name for diagnostics
#[must_use]
pub const fn tag_name(tag: u8) -> &'static str {
    match tag {
        TAG_INIT => "INIT",
        TAG_LOAD => "LOAD",
        TAG_STORE => "STORE",
        TAG_ALLOC => "ALLOC",
        TAG_LOOP_INVOC => "LOOP_INVOC",
        TAG_LOOP_ITER => "LOOP_ITER",
        TAG_FINISHED => "FINISHED",
        TAG_FUNC_ENTRY => "FUNC_ENTRY",
        TAG_FUNC_EXIT => "FUNC_EXIT",
        TAG_LOOP_ENTRY => "LOOP_ENTRY",
        TAG_LOOP_EXIT => "LOOP_EXIT",
        TAG_HEAP_FREE => "HEAP_FREE",
        TAG_REALLOC => "REALLOC",
        _ => "UNKNOWN",
    }
}

// ============================================================================
// Timestamp Layout
// ============================================================================

/// Bits reserved for the static instruction id (upper bits of a timestamp).
///
/// Bounds the instrumented program to 2^20 memory instructions.
pub const TS_INSTR_BITS: u32 = 20;

/// Bits reserved for the iteration counter.
///
/// Bounds a single invocation to 2^28 iterations.
pub const TS_ITER_BITS: u32 = 28;

/// Bits reserved for the invocation counter (lowest bits).
pub const TS_INVOC_BITS: u32 = 16;

/// Size of one shadow cell in bytes, log2. One 8-byte timestamp per real byte.
pub const TS_SIZE_LOG2: u32 = 3;

// ============================================================================
// Shared Ring Buffer
// ============================================================================

/// Cache line size assumed for header padding
pub const CACHELINE_SIZE: usize = 64;

/// Default data capacity of the event ring (64 MiB)
pub const DEFAULT_RING_CAPACITY: usize = 1 << 26;

/// Default POSIX shared memory object name
pub const DEFAULT_SHM_NAME: &str = "/depscope-events";

/// Written by whoever formats the region; checked by the other side on attach
pub const RING_MAGIC: u64 = 0x4445_5053_434F_5045; // "DEPSCOPE"

/// Counter aligned to its own cache line so producer and consumer never
/// false-share.
#[repr(C, align(64))]
pub struct CacheAligned<T>(pub T);

/// Control block at offset 0 of the shared region; the data area follows it.
///
/// `head` and `tail` are monotonically increasing byte counts, not wrapped
/// offsets. The producer only stores `head`, the consumer only stores `tail`.
///
/// **Memory Layout**: `#[repr(C)]`, five cache lines.
#[repr(C)]
pub struct RingHeader {
    /// [`RING_MAGIC`] once the header is initialized
    pub magic: CacheAligned<AtomicU64>,

    /// Data area size in bytes (power of two)
    pub capacity: CacheAligned<AtomicU64>,

    /// Total bytes ever written
    pub head: CacheAligned<AtomicU64>,

    /// Total bytes ever read
    pub tail: CacheAligned<AtomicU64>,

    /// Nonzero once the producer will write no more bytes
    pub closed: CacheAligned<AtomicU32>,
}

/// Offset of the data area from the start of the shared region
pub const RING_DATA_OFFSET: usize = core::mem::size_of::<RingHeader>();
