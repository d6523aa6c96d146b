//! Synthetic producer - drives a running depscope with a stencil loop
//!
//! Attaches to the ring depscope created, then profiles
//! `a[i] = a[i - 1] + a[i + 1]` over a heap array: the load of `a[i - 1]`
//! depends on the store of the previous iteration, `a[i + 1]` does not. The
//! initializing stores (instruction 0) appear as sources as well.
//!
//! Run with:
//!   cargo run --bin depscope -- --no-stack &
//!   cargo run --example synthetic-producer -- /depscope-events 1000

use std::process::ExitCode;

use depscope::transport::{EventWriter, Ring, SharedRegion};
use depscope_common::DEFAULT_SHM_NAME;

const LOOP_ID: u32 = 1;
const BASE: u64 = 0x10_0000;

// Instruction ids of the simulated loop body
const LOAD_PREV: u32 = 1;
const LOAD_NEXT: u32 = 2;
const STORE_CUR: u32 = 3;

fn main() -> ExitCode {
    let mut args = std::env::args().skip(1);
    let shm = args.next().unwrap_or_else(|| DEFAULT_SHM_NAME.to_string());
    let len: u64 = args.next().and_then(|n| n.parse().ok()).unwrap_or(1000);

    match produce(&shm, len) {
        Ok(events) => {
            println!("sent {events} events to {shm}");
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("synthetic-producer: {e}");
            ExitCode::FAILURE
        }
    }
}

fn produce(shm: &str, len: u64) -> Result<u64, Box<dyn std::error::Error>> {
    let ring = Ring::attach(SharedRegion::open(shm)?)?;
    let mut w = EventWriter::new(ring.into_producer());

    w.init(LOOP_ID, u64::from(std::process::id()))?;
    w.alloc(BASE, (len + 2) * 8)?;
    for i in 0..len + 2 {
        w.store(0, 0, BASE + i * 8)?;
    }

    // Two invocations so the report reflects both
    for _ in 0..2 {
        w.loop_invoc()?;
        for i in 1..=len {
            let cur = BASE + i * 8;
            w.load(LOAD_PREV, cur - 8, LOAD_PREV)?;
            w.load(LOAD_NEXT, cur + 8, LOAD_NEXT)?;
            w.store(STORE_CUR, STORE_CUR, cur)?;
            w.loop_iter()?;
        }
    }
    w.finished()?;
    Ok(w.events_written())
}
