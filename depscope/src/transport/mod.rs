//! Event transport between the instrumented program and the consumer
//!
//! - `shm`: named or anonymous shared memory regions
//! - `ring`: lock-free SPSC byte ring laid out in a region
//! - `reader`: buffered field decoding on the consumer side
//! - `writer`: event encoding on the producer side

pub mod reader;
pub mod ring;
pub mod shm;
pub mod writer;

pub use reader::{ByteSource, EventReader, ReadSource, WireField};
pub use ring::{region_len, Consumer, Producer, Ring};
pub use shm::SharedRegion;
pub use writer::{ByteSink, EventWriter, WriteSink};
