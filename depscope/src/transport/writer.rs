//! Producer-side serialization of events
//!
//! The instrumented program normally emits raw bytes through its own runtime
//! shim. This writer speaks the same wire format from Rust, which is what the
//! synthetic producer and recorded-stream tooling use.

use std::io::Write;

use super::ring::Producer;
use crate::domain::{InstrId, LoopId, Pid, RealAddr};
use crate::profiling::event::Event;

/// Destination for encoded event bytes
pub trait ByteSink {
    /// Append `bytes` to the stream
    ///
    /// # Errors
    /// Returns an error if the sink cannot accept the bytes
    fn put(&mut self, bytes: &[u8]) -> std::io::Result<()>;

    /// Signal end of stream
    ///
    /// # Errors
    /// Returns an error if the sink cannot be flushed
    fn finish(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl ByteSink for Producer {
    fn put(&mut self, bytes: &[u8]) -> std::io::Result<()> {
        self.push(bytes);
        Ok(())
    }

    fn finish(&mut self) -> std::io::Result<()> {
        self.close();
        Ok(())
    }
}

impl ByteSink for Vec<u8> {
    fn put(&mut self, bytes: &[u8]) -> std::io::Result<()> {
        self.extend_from_slice(bytes);
        Ok(())
    }
}

/// Adapts any [`Write`] (file, pipe) into a [`ByteSink`]
pub struct WriteSink<W>(pub W);

impl<W: Write> ByteSink for WriteSink<W> {
    fn put(&mut self, bytes: &[u8]) -> std::io::Result<()> {
        self.0.write_all(bytes)
    }

    fn finish(&mut self) -> std::io::Result<()> {
        self.0.flush()
    }
}

/// Typed front end over a [`ByteSink`]
pub struct EventWriter<S> {
    sink: S,
    scratch: Vec<u8>,
    events: u64,
}

impl<S: ByteSink> EventWriter<S> {
    pub fn new(sink: S) -> Self {
        Self { sink, scratch: Vec::with_capacity(32), events: 0 }
    }

    /// # Errors
    /// Returns an error if the sink rejects the bytes
    pub fn write(&mut self, event: &Event) -> std::io::Result<()> {
        self.scratch.clear();
        event.encode(&mut self.scratch);
        self.sink.put(&self.scratch)?;
        self.events += 1;
        Ok(())
    }

    /// # Errors
    /// Returns an error if the sink rejects the bytes
    pub fn init(&mut self, loop_id: u32, pid: u64) -> std::io::Result<()> {
        self.write(&Event::Init { loop_id: LoopId(loop_id), pid: Pid(pid) })
    }

    /// # Errors
    /// Returns an error if the sink rejects the bytes
    pub fn load(&mut self, instr: u32, addr: u64, bare: u32) -> std::io::Result<()> {
        self.write(&Event::Load { instr: InstrId(instr), addr: RealAddr(addr), bare: InstrId(bare) })
    }

    /// # Errors
    /// Returns an error if the sink rejects the bytes
    pub fn store(&mut self, instr: u32, bare: u32, addr: u64) -> std::io::Result<()> {
        self.write(&Event::Store { instr: InstrId(instr), bare: InstrId(bare), addr: RealAddr(addr) })
    }

    /// # Errors
    /// Returns an error if the sink rejects the bytes
    pub fn alloc(&mut self, addr: u64, size: u64) -> std::io::Result<()> {
        self.write(&Event::Alloc { addr: RealAddr(addr), size })
    }

    /// # Errors
    /// Returns an error if the sink rejects the bytes
    pub fn loop_invoc(&mut self) -> std::io::Result<()> {
        self.write(&Event::LoopInvoc)
    }

    /// # Errors
    /// Returns an error if the sink rejects the bytes
    pub fn loop_iter(&mut self) -> std::io::Result<()> {
        self.write(&Event::LoopIter)
    }

    /// Write FINISHED and close the sink
    ///
    /// # Errors
    /// Returns an error if the sink rejects the bytes
    pub fn finished(&mut self) -> std::io::Result<()> {
        self.write(&Event::Finished)?;
        self.sink.finish()
    }

    #[must_use]
    pub fn events_written(&self) -> u64 {
        self.events
    }

    pub fn into_inner(self) -> S {
        self.sink
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_writes_wire_bytes() {
        let mut writer = EventWriter::new(Vec::new());
        writer.loop_invoc().unwrap();
        writer.alloc(0x1000, 8).unwrap();
        assert_eq!(writer.events_written(), 2);

        let bytes = writer.into_inner();
        assert_eq!(bytes.len(), 1 + 1 + 16);
        assert_eq!(bytes[0], depscope_common::TAG_LOOP_INVOC);
        assert_eq!(bytes[1], depscope_common::TAG_ALLOC);
        assert_eq!(&bytes[2..10], &0x1000u64.to_le_bytes());
    }

    #[test]
    fn test_write_sink_flushes_on_finish() {
        let mut writer = EventWriter::new(WriteSink(std::io::BufWriter::new(Vec::new())));
        writer.finished().unwrap();
        let WriteSink(buffered) = writer.into_inner();
        assert_eq!(buffered.buffer().len(), 0);
        assert_eq!(buffered.get_ref(), &[depscope_common::TAG_FINISHED]);
    }
}
