//! Low-level wire encoding.
//!
//! Records are encoded field by field, protobuf style. Every field starts with
//! a varint tag:
//!
//! ```text
//! ┌────────────────────────┬───────────┐
//! │ field number           │ wire type │
//! │ bits 3..               │ bits 0..2 │
//! └────────────────────────┴───────────┘
//! ```
//!
//! followed by a varint (type 0), a varint length and that many bytes
//! (type 2), or four little-endian bytes (type 5). A top-level record on the
//! bus is prefixed by its own varint length ("delimited").
//!
//! Varints are ULEB128: 7 data bits per byte, bit 7 set on every byte but the
//! last.

use bytes::Buf;

use crate::error::{FieldkitError, Result};

/// Protocol version modules advertise and the master sends.
pub const PROTOCOL_VERSION: u32 = 1;

/// Longest varint the decoder accepts (a full u64).
pub const MAX_VARINT_LEN: usize = 10;

const CONTINUATION_BIT: u8 = 0x80;
const DATA_MASK: u8 = 0x7F;
const WIRE_TYPE_BITS: u32 = 3;
const WIRE_TYPE_MASK: u32 = 0b111;

/// Wire types understood by the codec.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum WireType {
    Varint = 0,
    /// Only ever skipped; no schema field uses it.
    Fixed64 = 1,
    LengthDelimited = 2,
    Fixed32 = 5,
}

impl WireType {
    /// Parse the low three bits of a tag.
    pub fn from_u8(value: u8) -> Result<Self> {
        match value {
            0 => Ok(WireType::Varint),
            1 => Ok(WireType::Fixed64),
            2 => Ok(WireType::LengthDelimited),
            5 => Ok(WireType::Fixed32),
            other => Err(FieldkitError::decode(format!("unsupported wire type {}", other))),
        }
    }
}

/// Build a field tag.
#[inline]
pub fn make_tag(number: u32, wire_type: WireType) -> u32 {
    (number << WIRE_TYPE_BITS) | wire_type as u32
}

/// Split a field tag into number and wire type.
pub fn split_tag(tag: u64) -> Result<(u32, WireType)> {
    let number = tag >> WIRE_TYPE_BITS;
    if number == 0 || number > u64::from(u32::MAX) {
        return Err(FieldkitError::decode(format!("invalid field number in tag {}", tag)));
    }
    let wire_type = WireType::from_u8((tag as u32 & WIRE_TYPE_MASK) as u8)?;
    Ok((number as u32, wire_type))
}

/// Bytes needed to encode `value` as a varint.
#[inline]
pub const fn varint_len(value: u64) -> usize {
    if value == 0 {
        return 1;
    }
    let bits = 64 - value.leading_zeros() as usize;
    bits.div_ceil(7)
}

/// Bytes needed for a field tag.
#[inline]
pub fn tag_len(number: u32) -> usize {
    varint_len(u64::from(make_tag(number, WireType::Varint)))
}

/// Sequential writer over a fixed buffer. Every write is bounds checked.
#[derive(Debug)]
pub struct FrameWriter<'a> {
    buf: &'a mut [u8],
    pos: usize,
}

impl<'a> FrameWriter<'a> {
    pub fn new(buf: &'a mut [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Bytes written so far.
    #[inline]
    pub fn position(&self) -> usize {
        self.pos
    }

    /// The written prefix of the buffer.
    pub fn written(&self) -> &[u8] {
        &self.buf[..self.pos]
    }

    fn reserve(&mut self, len: usize) -> Result<&mut [u8]> {
        let end = self.pos + len;
        if end > self.buf.len() {
            return Err(FieldkitError::FrameTooLarge {
                size: end,
                max: self.buf.len(),
            });
        }
        let slot = &mut self.buf[self.pos..end];
        self.pos = end;
        Ok(slot)
    }

    pub fn write_varint(&mut self, mut value: u64) -> Result<()> {
        let slot = self.reserve(varint_len(value))?;
        for byte in slot.iter_mut() {
            *byte = (value & u64::from(DATA_MASK)) as u8;
            value >>= 7;
            if value != 0 {
                *byte |= CONTINUATION_BIT;
            }
        }
        Ok(())
    }

    pub fn write_tag(&mut self, number: u32, wire_type: WireType) -> Result<()> {
        self.write_varint(u64::from(make_tag(number, wire_type)))
    }

    pub fn write_fixed32(&mut self, value: u32) -> Result<()> {
        self.reserve(4)?.copy_from_slice(&value.to_le_bytes());
        Ok(())
    }

    pub fn write_float(&mut self, value: f32) -> Result<()> {
        self.write_fixed32(value.to_bits())
    }

    /// Write a varint length followed by the bytes.
    pub fn write_length_delimited(&mut self, data: &[u8]) -> Result<()> {
        self.write_varint(data.len() as u64)?;
        self.reserve(data.len())?.copy_from_slice(data);
        Ok(())
    }
}

/// Sequential reader over a received buffer.
#[derive(Debug, Clone)]
pub struct FrameReader<'a> {
    buf: &'a [u8],
}

impl<'a> FrameReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        !self.buf.has_remaining()
    }

    #[inline]
    pub fn remaining(&self) -> usize {
        self.buf.remaining()
    }

    pub fn read_varint(&mut self) -> Result<u64> {
        let mut value = 0u64;
        for i in 0..MAX_VARINT_LEN {
            if !self.buf.has_remaining() {
                return Err(FieldkitError::decode("truncated varint"));
            }
            let byte = self.buf.get_u8();
            value |= u64::from(byte & DATA_MASK) << (7 * i);
            if byte & CONTINUATION_BIT == 0 {
                return Ok(value);
            }
        }
        Err(FieldkitError::decode("varint overflow"))
    }

    /// Read a varint that must fit in 32 bits.
    pub fn read_u32(&mut self) -> Result<u32> {
        let value = self.read_varint()?;
        u32::try_from(value)
            .map_err(|_| FieldkitError::decode(format!("varint {} does not fit in u32", value)))
    }

    pub fn read_tag(&mut self) -> Result<(u32, WireType)> {
        let tag = self.read_varint()?;
        split_tag(tag)
    }

    pub fn read_fixed32(&mut self) -> Result<u32> {
        if self.buf.remaining() < 4 {
            return Err(FieldkitError::decode("truncated fixed32"));
        }
        Ok(self.buf.get_u32_le())
    }

    pub fn read_float(&mut self) -> Result<f32> {
        self.read_fixed32().map(f32::from_bits)
    }

    /// Read a varint length and borrow that many bytes.
    pub fn read_length_delimited(&mut self) -> Result<&'a [u8]> {
        let len = self.read_varint()? as usize;
        if len > self.buf.remaining() {
            return Err(FieldkitError::decode(format!(
                "length {} exceeds remaining {} bytes",
                len,
                self.buf.remaining()
            )));
        }
        let (data, rest) = self.buf.split_at(len);
        self.buf = rest;
        Ok(data)
    }

    /// Skip one field value of the given wire type.
    pub fn skip(&mut self, wire_type: WireType) -> Result<()> {
        match wire_type {
            WireType::Varint => {
                self.read_varint()?;
            }
            WireType::LengthDelimited => {
                self.read_length_delimited()?;
            }
            WireType::Fixed32 => {
                self.read_fixed32()?;
            }
            WireType::Fixed64 => {
                if self.buf.remaining() < 8 {
                    return Err(FieldkitError::decode("truncated fixed64"));
                }
                self.buf.advance(8);
            }
        }
        Ok(())
    }
}
