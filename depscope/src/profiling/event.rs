//! Typed events of the wire protocol
//!
//! Decoding is driven by the tag byte; every payload has a fixed size given by
//! [`depscope_common::payload_len`].

use std::fmt;

use depscope_common::{
    TAG_ALLOC, TAG_FINISHED, TAG_FUNC_ENTRY, TAG_FUNC_EXIT, TAG_HEAP_FREE, TAG_INIT, TAG_LOAD,
    TAG_LOOP_ENTRY, TAG_LOOP_EXIT, TAG_LOOP_INVOC, TAG_LOOP_ITER, TAG_REALLOC, TAG_STORE,
};

use crate::domain::{InstrId, LoopId, Pid, ProtocolError, RealAddr};
use crate::transport::reader::{ByteSource, EventReader, WireField};

/// One decoded event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    Init { loop_id: LoopId, pid: Pid },
    Load { instr: InstrId, addr: RealAddr, bare: InstrId },
    Store { instr: InstrId, bare: InstrId, addr: RealAddr },
    Alloc { addr: RealAddr, size: u64 },
    LoopInvoc,
    LoopIter,
    Finished,
    FuncEntry(u32),
    FuncExit(u32),
    LoopEntry(LoopId),
    LoopExit(LoopId),
    HeapFree { addr: RealAddr, size: u64 },
    Realloc { dst: RealAddr, src: RealAddr, size: u64 },
}

impl Event {
    #[must_use]
    pub fn tag(&self) -> u8 {
        match self {
            Event::Init { .. } => TAG_INIT,
            Event::Load { .. } => TAG_LOAD,
            Event::Store { .. } => TAG_STORE,
            Event::Alloc { .. } => TAG_ALLOC,
            Event::LoopInvoc => TAG_LOOP_INVOC,
            Event::LoopIter => TAG_LOOP_ITER,
            Event::Finished => TAG_FINISHED,
            Event::FuncEntry(_) => TAG_FUNC_ENTRY,
            Event::FuncExit(_) => TAG_FUNC_EXIT,
            Event::LoopEntry(_) => TAG_LOOP_ENTRY,
            Event::LoopExit(_) => TAG_LOOP_EXIT,
            Event::HeapFree { .. } => TAG_HEAP_FREE,
            Event::Realloc { .. } => TAG_REALLOC,
        }
    }

    /// Append the wire encoding (tag and payload) to `out`
    pub fn encode(&self, out: &mut Vec<u8>) {
        out.push(self.tag());
        match *self {
            Event::Init { loop_id, pid } => {
                loop_id.0.put_le(out);
                pid.0.put_le(out);
            }
            Event::Load { instr, addr, bare } => {
                instr.0.put_le(out);
                addr.0.put_le(out);
                bare.0.put_le(out);
            }
            Event::Store { instr, bare, addr } => {
                instr.0.put_le(out);
                bare.0.put_le(out);
                addr.0.put_le(out);
            }
            Event::Alloc { addr, size } | Event::HeapFree { addr, size } => {
                addr.0.put_le(out);
                size.put_le(out);
            }
            Event::LoopInvoc | Event::LoopIter | Event::Finished => {}
            Event::FuncEntry(id) | Event::FuncExit(id) => id.put_le(out),
            Event::LoopEntry(id) | Event::LoopExit(id) => id.0.put_le(out),
            Event::Realloc { dst, src, size } => {
                dst.0.put_le(out);
                src.0.put_le(out);
                size.put_le(out);
            }
        }
    }

    /// Decode the next event, or `None` at a clean end of stream
    ///
    /// # Errors
    /// Returns an error for unknown tags and truncated payloads
    pub fn read<S: ByteSource>(reader: &mut EventReader<S>) -> Result<Option<Self>, ProtocolError> {
        let offset = reader.offset();
        let Some(tag) = reader.next_tag()? else {
            return Ok(None);
        };
        let event = match tag {
            TAG_INIT => Event::Init { loop_id: LoopId(reader.pop()?), pid: Pid(reader.pop()?) },
            TAG_LOAD => Event::Load {
                instr: InstrId(reader.pop()?),
                addr: RealAddr(reader.pop()?),
                bare: InstrId(reader.pop()?),
            },
            TAG_STORE => Event::Store {
                instr: InstrId(reader.pop()?),
                bare: InstrId(reader.pop()?),
                addr: RealAddr(reader.pop()?),
            },
            TAG_ALLOC => Event::Alloc { addr: RealAddr(reader.pop()?), size: reader.pop()? },
            TAG_LOOP_INVOC => Event::LoopInvoc,
            TAG_LOOP_ITER => Event::LoopIter,
            TAG_FINISHED => Event::Finished,
            TAG_FUNC_ENTRY => Event::FuncEntry(reader.pop()?),
            TAG_FUNC_EXIT => Event::FuncExit(reader.pop()?),
            TAG_LOOP_ENTRY => Event::LoopEntry(LoopId(reader.pop()?)),
            TAG_LOOP_EXIT => Event::LoopExit(LoopId(reader.pop()?)),
            TAG_HEAP_FREE => Event::HeapFree { addr: RealAddr(reader.pop()?), size: reader.pop()? },
            TAG_REALLOC => Event::Realloc {
                dst: RealAddr(reader.pop()?),
                src: RealAddr(reader.pop()?),
                size: reader.pop()?,
            },
            tag => return Err(ProtocolError::UnknownTag { tag, offset }),
        };
        Ok(Some(event))
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = depscope_common::tag_name(self.tag());
        match self {
            Event::Init { loop_id, pid } => write!(f, "{name}(loop={}, pid={})", loop_id.0, pid.0),
            Event::Load { instr, addr, bare } => {
                write!(f, "{name}(instr={}, addr={addr}, bare={})", instr.0, bare.0)
            }
            Event::Store { instr, bare, addr } => {
                write!(f, "{name}(instr={}, bare={}, addr={addr})", instr.0, bare.0)
            }
            Event::Alloc { addr, size } | Event::HeapFree { addr, size } => {
                write!(f, "{name}(addr={addr}, size={size})")
            }
            Event::LoopInvoc | Event::LoopIter | Event::Finished => f.write_str(name),
            Event::FuncEntry(id) | Event::FuncExit(id) => write!(f, "{name}({id})"),
            Event::LoopEntry(id) | Event::LoopExit(id) => write!(f, "{name}({})", id.0),
            Event::Realloc { dst, src, size } => {
                write!(f, "{name}(dst={dst}, src={src}, size={size})")
            }
        }
    }
}
