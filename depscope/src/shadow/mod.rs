//! Shadow memory: one last-writer timestamp per byte of the target process
//!
//! - `timestamp`: packing of `(instr, iteration, invocation)` into a cell
//! - `translate`: the real-to-shadow address transform
//! - `memory_map`: page allocation and cell access
//! - `proc_maps`: discovery of the target's stack and heap

pub mod memory_map;
pub mod proc_maps;
pub mod timestamp;
pub mod translate;

pub use memory_map::ShadowMemory;
pub use proc_maps::MemoryRange;
pub use timestamp::Timestamp;
pub use translate::{real_to_shadow, RATIO};
