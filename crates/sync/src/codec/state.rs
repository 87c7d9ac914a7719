//! Binary layout of `room_state` frames. Everything little-endian:
//!
//! ```text
//! u8  opcode (0x01)   u32 tick   f64 timestamp_ms
//! u8  flags (bit 0 delta, bit 1 numeric ids)   u16 body count
//! per body: id (u16 index, or u8 len + utf-8), u8 field mask,
//!           then only the masked fields.
//! ```

use crate::body::BodyState;

use super::{quat, CodecError};

pub const FLAG_DELTA: u8 = 1 << 0;
pub const FLAG_NUMERIC_IDS: u8 = 1 << 1;

/// Selects which of the four state fields a body entry carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FieldMask(pub u8);

impl FieldMask {
    pub const POSITION: FieldMask = FieldMask(1 << 0);
    pub const ROTATION: FieldMask = FieldMask(1 << 1);
    pub const LINEAR_VELOCITY: FieldMask = FieldMask(1 << 2);
    pub const ANGULAR_VELOCITY: FieldMask = FieldMask(1 << 3);
    pub const ALL: FieldMask = FieldMask(0b1111);

    pub fn contains(self, other: FieldMask) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: FieldMask) {
        self.0 |= other.0;
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

/// A body in a state frame, named either by its stable numeric index
/// (deltas) or by its string id (legacy peers).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BodyRef {
    Index(u16),
    Name(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct BodyEntry {
    pub body: BodyRef,
    pub mask: FieldMask,
    pub state: BodyState,
}

impl BodyEntry {
    pub fn full(index: u16, state: BodyState) -> Self {
        Self {
            body: BodyRef::Index(index),
            mask: FieldMask::ALL,
            state,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StateFrame {
    pub tick: u32,
    pub timestamp_ms: f64,
    pub is_delta: bool,
    pub bodies: Vec<BodyEntry>,
}

pub(super) fn encode_into(frame: &StateFrame, out: &mut Vec<u8>) -> Result<(), CodecError> {
    let numeric = frame
        .bodies
        .iter()
        .all(|b| matches!(b.body, BodyRef::Index(_)));
    if !numeric
        && frame
            .bodies
            .iter()
            .any(|b| matches!(b.body, BodyRef::Index(_)))
    {
        return Err(CodecError::MixedBodyIds);
    }
    if frame.bodies.len() > u16::MAX as usize {
        return Err(CodecError::TooManyBodies(frame.bodies.len()));
    }

    out.extend_from_slice(&frame.tick.to_le_bytes());
    out.extend_from_slice(&frame.timestamp_ms.to_le_bytes());

    let mut flags = 0u8;
    if frame.is_delta {
        flags |= FLAG_DELTA;
    }
    if numeric {
        flags |= FLAG_NUMERIC_IDS;
    }
    out.push(flags);
    out.extend_from_slice(&(frame.bodies.len() as u16).to_le_bytes());

    for entry in &frame.bodies {
        match &entry.body {
            BodyRef::Index(index) => out.extend_from_slice(&index.to_le_bytes()),
            BodyRef::Name(name) => {
                let bytes = name.as_bytes();
                if bytes.len() > u8::MAX as usize {
                    return Err(CodecError::BodyIdTooLong(bytes.len()));
                }
                out.push(bytes.len() as u8);
                out.extend_from_slice(bytes);
            }
        }

        out.push(entry.mask.0);
        if entry.mask.contains(FieldMask::POSITION) {
            write_vec3(out, entry.state.position);
        }
        if entry.mask.contains(FieldMask::ROTATION) {
            out.extend_from_slice(&quat::encode(entry.state.orientation));
        }
        if entry.mask.contains(FieldMask::LINEAR_VELOCITY) {
            write_vec3(out, entry.state.linear_velocity);
        }
        if entry.mask.contains(FieldMask::ANGULAR_VELOCITY) {
            write_vec3(out, entry.state.angular_velocity);
        }
    }

    Ok(())
}

pub(super) fn decode_body(payload: &[u8]) -> Result<StateFrame, CodecError> {
    let mut reader = Reader::new(payload);

    let tick = reader.u32()?;
    let timestamp_ms = reader.f64()?;
    let flags = reader.u8()?;
    let body_count = reader.u16()?;

    let is_delta = flags & FLAG_DELTA != 0;
    let numeric_ids = flags & FLAG_NUMERIC_IDS != 0;

    let mut bodies = Vec::with_capacity(body_count as usize);
    for _ in 0..body_count {
        let body = if numeric_ids {
            BodyRef::Index(reader.u16()?)
        } else {
            let len = reader.u8()? as usize;
            let bytes = reader.take(len)?;
            BodyRef::Name(
                std::str::from_utf8(bytes)
                    .map_err(|_| CodecError::InvalidBodyId)?
                    .to_owned(),
            )
        };

        let mask = FieldMask(reader.u8()?);
        let mut state = BodyState::default();
        if mask.contains(FieldMask::POSITION) {
            state.position = reader.vec3()?;
        }
        if mask.contains(FieldMask::ROTATION) {
            let mut raw = [0u8; quat::ENCODED_LEN];
            raw.copy_from_slice(reader.take(quat::ENCODED_LEN)?);
            state.orientation = quat::decode(&raw)?;
        }
        if mask.contains(FieldMask::LINEAR_VELOCITY) {
            state.linear_velocity = reader.vec3()?;
        }
        if mask.contains(FieldMask::ANGULAR_VELOCITY) {
            state.angular_velocity = reader.vec3()?;
        }

        bodies.push(BodyEntry { body, mask, state });
    }

    Ok(StateFrame {
        tick,
        timestamp_ms,
        is_delta,
        bodies,
    })
}

fn write_vec3(out: &mut Vec<u8>, v: [f32; 3]) {
    for c in v {
        out.extend_from_slice(&c.to_le_bytes());
    }
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], CodecError> {
        if self.pos + len > self.buf.len() {
            return Err(CodecError::Truncated {
                needed: self.pos + len,
                available: self.buf.len(),
            });
        }
        let slice = &self.buf[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8, CodecError> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16, CodecError> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    fn u32(&mut self) -> Result<u32, CodecError> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn f32(&mut self) -> Result<f32, CodecError> {
        let b = self.take(4)?;
        Ok(f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn f64(&mut self) -> Result<f64, CodecError> {
        let b = self.take(8)?;
        Ok(f64::from_le_bytes([
            b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7],
        ]))
    }

    fn vec3(&mut self) -> Result<[f32; 3], CodecError> {
        Ok([self.f32()?, self.f32()?, self.f32()?])
    }
}
