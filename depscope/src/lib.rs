//! # depscope - Dynamic Memory-Dependence Profiler
//!
//! depscope is the consumer half of a loop dependence profiler. An
//! instrumented program reports every memory access, allocation and loop
//! boundary of interest; depscope replays them against a shadow memory and
//! records which stores each load observed, and whether the store happened in
//! an earlier iteration of the profiled loop.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                  Instrumented Program (producer)                │
//! │     LOAD / STORE / ALLOC / LOOP_INVOC / LOOP_ITER / FINISHED    │
//! └───────────────────────┬─────────────────────────────────────────┘
//!                         │ tagged little-endian events
//!                         ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │            SPSC byte ring in POSIX shared memory                │
//! │          (depscope-common::RingHeader + data area)              │
//! └───────────────────────┬─────────────────────────────────────────┘
//!                         │ bulk drain into a 1 MiB local buffer
//!                         ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                     depscope (This Crate)                       │
//! │                                                                 │
//! │  ┌──────────────┐   ┌──────────────┐   ┌──────────────┐         │
//! │  │  Transport   │──▶│  Dispatcher  │──▶│   Session    │         │
//! │  │ (ring/reader)│   │   (events)   │   │ (loop state) │         │
//! │  └──────────────┘   └──────────────┘   └──────┬───────┘         │
//! │                                               │                 │
//! │                     ┌──────────────┐          │                 │
//! │                     │    Shadow    │◀─────────┤ timestamps      │
//! │                     │    Memory    │          │                 │
//! │                     └──────────────┘          ▼                 │
//! │  ┌──────────────┐                     ┌──────────────┐          │
//! │  │    Export    │◀────────────────────│  Aggregator  │          │
//! │  │ (deplog.txt) │   sorted keys       │ (dedup pool) │          │
//! │  └──────────────┘                     └──────────────┘          │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Structure
//!
//! - [`transport`]: shared memory regions, the SPSC ring, buffered decoding
//!   and producer-side encoding
//! - [`shadow`]: timestamp packing, real-to-shadow translation, shadow page
//!   management and `/proc/<pid>/maps` discovery
//! - [`profiling`]: event types, the dispatcher, per-run session state and
//!   calling-context tracking
//! - [`analysis`]: dependence keys and the deduplicating aggregator
//! - [`export`]: the dependence report and the JSON run summary
//! - [`cli`] / [`config`]: command-line arguments and run configuration
//! - [`domain`]: newtypes and error enums
//! - [`preflight`]: system checks run before a live session
//!
//! ## Key Concepts
//!
//! - **Invocation**: one entry into the profiled loop (LOOP_INVOC)
//! - **Iteration**: one trip around it (LOOP_ITER); resets on each invocation
//! - **Timestamp**: `(instruction, iteration, invocation)` of the last store
//!   to a byte, packed into the 8-byte shadow cell of that byte
//! - **Cross-iteration dependence**: a load whose last writer ran in a
//!   different iteration than the load

pub mod analysis;
pub mod cli;
pub mod config;
pub mod domain;
pub mod export;
pub mod preflight;
pub mod profiling;
pub mod shadow;
pub mod transport;
