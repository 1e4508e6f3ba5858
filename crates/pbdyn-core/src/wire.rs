//! Low-level protobuf wire format reading.
//!
//! Both the descriptor-set parser and the payload decoder are built on the
//! primitives in this module.
//!
//! ## Wire Format Overview
//!
//! Each protobuf field is encoded as:
//! - A varint "tag" containing the field number and wire type
//! - The field data (format depends on wire type)
//!
//! Wire types:
//! - 0: VARINT (int32, int64, uint32, uint64, sint32, sint64, bool, enum)
//! - 1: I64 (fixed64, sfixed64, double)
//! - 2: LEN (string, bytes, embedded messages, packed repeated fields)
//! - 3/4: SGROUP/EGROUP (legacy groups)
//! - 5: I32 (fixed32, sfixed32, float)

use crate::error::WireFormatError;

type Result<T> = std::result::Result<T, WireFormatError>;

/// Maximum valid protobuf field number (2^29 - 1)
pub const MAX_FIELD_NUMBER: u32 = 536_870_911;

/// Varints are at most 10 bytes for a 64-bit value
const MAX_VARINT_LEN: usize = 10;

/// Protobuf wire types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum WireType {
    /// Variable-length integer
    Varint = 0,
    /// 64-bit fixed-width
    I64 = 1,
    /// Length-delimited (strings, bytes, embedded messages)
    Len = 2,
    /// Start group (deprecated)
    StartGroup = 3,
    /// End group (deprecated)
    EndGroup = 4,
    /// 32-bit fixed-width
    I32 = 5,
}

impl WireType {
    /// Decodes the low three bits of a tag
    pub fn from_bits(value: u8) -> Option<Self> {
        match value {
            0 => Some(WireType::Varint),
            1 => Some(WireType::I64),
            2 => Some(WireType::Len),
            3 => Some(WireType::StartGroup),
            4 => Some(WireType::EndGroup),
            5 => Some(WireType::I32),
            _ => None,
        }
    }
}

/// A decoded field key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tag {
    /// Field number (1..=2^29-1)
    pub field: u32,
    /// Wire type of the value that follows
    pub wire_type: WireType,
    /// Absolute offset of the first byte of the tag
    pub offset: usize,
}

/// A wire value read without schema interpretation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RawValue<'a> {
    /// Wire type 0
    Varint(u64),
    /// Wire type 1
    Fixed64(u64),
    /// Wire type 5
    Fixed32(u32),
    /// Wire type 2; `offset` is where the payload starts
    Len {
        /// Absolute offset of the first payload byte
        offset: usize,
        /// Payload bytes
        data: &'a [u8],
    },
    /// Wire type 3 up to (not including) its end-group tag
    Group {
        /// Absolute offset of the first byte inside the group
        offset: usize,
        /// Group contents
        data: &'a [u8],
    },
}

/// Decode a varint from the given bytes.
///
/// `offset` is the absolute position of `data[0]`, used for error reporting.
/// Returns the decoded value and the number of bytes consumed.
pub fn decode_varint(data: &[u8], offset: usize) -> Result<(u64, usize)> {
    let mut result: u64 = 0;

    for (i, &byte) in data.iter().take(MAX_VARINT_LEN).enumerate() {
        // The tenth byte may only contribute the top bit of a u64
        if i == MAX_VARINT_LEN - 1 && byte > 1 {
            return Err(WireFormatError::VarintOverflow { offset });
        }

        result |= ((byte & 0x7F) as u64) << (7 * i);

        if byte & 0x80 == 0 {
            return Ok((result, i + 1));
        }
    }

    Err(WireFormatError::TruncatedVarint { offset })
}

/// Zigzag-decode a 32-bit value (sint32)
#[inline]
pub fn from_zigzag32(n: u32) -> i32 {
    ((n >> 1) as i32) ^ (-((n & 1) as i32))
}

/// Zigzag-decode a 64-bit value (sint64)
#[inline]
pub fn from_zigzag64(n: u64) -> i64 {
    ((n >> 1) as i64) ^ (-((n & 1) as i64))
}

/// Cursor over a protobuf-encoded buffer.
///
/// A reader over a sub-slice remembers where that slice sits in the
/// outermost buffer so every error carries an absolute offset.
#[derive(Debug, Clone)]
pub struct WireReader<'a> {
    data: &'a [u8],
    pos: usize,
    base: usize,
}

impl<'a> WireReader<'a> {
    /// Creates a reader over a whole buffer
    pub fn new(data: &'a [u8]) -> Self {
        Self::with_base(data, 0)
    }

    /// Creates a reader over a slice that starts at `base` in the outer buffer
    pub fn with_base(data: &'a [u8], base: usize) -> Self {
        Self { data, pos: 0, base }
    }

    /// Absolute offset of the next unread byte
    pub fn offset(&self) -> usize {
        self.base + self.pos
    }

    /// True when all bytes have been consumed
    pub fn is_empty(&self) -> bool {
        self.pos >= self.data.len()
    }

    /// Bytes left to read
    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    /// Reads an unsigned varint
    pub fn read_varint(&mut self) -> Result<u64> {
        let (value, len) = decode_varint(&self.data[self.pos..], self.offset())?;
        self.pos += len;
        Ok(value)
    }

    /// Reads a field key, or `None` at end of buffer
    pub fn read_tag(&mut self) -> Result<Option<Tag>> {
        if self.is_empty() {
            return Ok(None);
        }

        let offset = self.offset();
        let key = self.read_varint()?;
        let field = key >> 3;

        if field == 0 || field > MAX_FIELD_NUMBER as u64 {
            return Err(WireFormatError::InvalidFieldNumber { offset, field });
        }
        let field = field as u32;

        let bits = (key & 0x07) as u8;
        let wire_type = WireType::from_bits(bits).ok_or(WireFormatError::InvalidWireType {
            offset,
            field,
            wire_type: bits,
        })?;

        Ok(Some(Tag {
            field,
            wire_type,
            offset,
        }))
    }

    /// Takes exactly `len` bytes
    fn take(&mut self, len: u64, field: u32) -> Result<&'a [u8]> {
        let remaining = self.remaining();
        if len > remaining as u64 {
            return Err(WireFormatError::Truncated {
                offset: self.offset(),
                field,
                needed: len,
                remaining,
            });
        }
        let len = len as usize;
        let out = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(out)
    }

    /// Reads a little-endian 32-bit value
    pub fn read_fixed32(&mut self, field: u32) -> Result<u32> {
        let bytes = self.take(4, field)?;
        let mut buf = [0u8; 4];
        buf.copy_from_slice(bytes);
        Ok(u32::from_le_bytes(buf))
    }

    /// Reads a little-endian 64-bit value
    pub fn read_fixed64(&mut self, field: u32) -> Result<u64> {
        let bytes = self.take(8, field)?;
        let mut buf = [0u8; 8];
        buf.copy_from_slice(bytes);
        Ok(u64::from_le_bytes(buf))
    }

    /// Reads a length prefix and the payload it announces.
    ///
    /// Returns the absolute offset of the payload and the payload itself.
    pub fn read_length_delimited(&mut self, field: u32) -> Result<(usize, &'a [u8])> {
        let prefix_offset = self.offset();
        let remaining = self.remaining();
        // an unterminated prefix needs at least one byte more than is left
        let len = self.read_varint().map_err(|e| match e {
            WireFormatError::TruncatedVarint { .. } => WireFormatError::Truncated {
                offset: prefix_offset,
                field,
                needed: remaining as u64 + 1,
                remaining,
            },
            other => other,
        })?;
        let offset = self.offset();
        let data = self.take(len, field)?;
        Ok((offset, data))
    }

    /// Skips the contents of a group whose start tag has just been read.
    ///
    /// Nested groups are tracked on an explicit stack so hostile nesting
    /// cannot exhaust the call stack. Returns the bytes between the start
    /// tag and the matching end tag.
    pub fn skip_group(&mut self, start: Tag) -> Result<(usize, &'a [u8])> {
        let content_start = self.pos;
        let mut open: Vec<u32> = vec![start.field];

        loop {
            let before_tag = self.pos;
            let Some(tag) = self.read_tag()? else {
                return Err(WireFormatError::UnterminatedGroup {
                    offset: start.offset,
                    field: start.field,
                });
            };

            match tag.wire_type {
                WireType::StartGroup => open.push(tag.field),
                WireType::EndGroup => {
                    let expected = open.pop().unwrap_or(start.field);
                    if expected != tag.field {
                        return Err(WireFormatError::MismatchedEndGroup {
                            offset: tag.offset,
                            expected,
                            found: tag.field,
                        });
                    }
                    if open.is_empty() {
                        let data = &self.data[content_start..before_tag];
                        return Ok((self.base + content_start, data));
                    }
                }
                WireType::Varint => {
                    self.read_varint()?;
                }
                WireType::I64 => {
                    self.read_fixed64(tag.field)?;
                }
                WireType::I32 => {
                    self.read_fixed32(tag.field)?;
                }
                WireType::Len => {
                    self.read_length_delimited(tag.field)?;
                }
            }
        }
    }

    /// Reads the value that follows `tag` without interpreting it.
    ///
    /// An end-group tag has no value of its own and is rejected here; callers
    /// that track group nesting must handle it before calling.
    pub fn read_raw(&mut self, tag: Tag) -> Result<RawValue<'a>> {
        Ok(match tag.wire_type {
            WireType::Varint => RawValue::Varint(self.read_varint()?),
            WireType::I64 => RawValue::Fixed64(self.read_fixed64(tag.field)?),
            WireType::I32 => RawValue::Fixed32(self.read_fixed32(tag.field)?),
            WireType::Len => {
                let (offset, data) = self.read_length_delimited(tag.field)?;
                RawValue::Len { offset, data }
            }
            WireType::StartGroup => {
                let (offset, data) = self.skip_group(tag)?;
                RawValue::Group { offset, data }
            }
            WireType::EndGroup => {
                return Err(WireFormatError::UnexpectedEndGroup {
                    offset: tag.offset,
                    field: tag.field,
                })
            }
        })
    }

    /// Returns the raw encoded bytes consumed since `start` (a value of [`Self::offset`])
    pub fn consumed_since(&self, start: usize) -> &'a [u8] {
        &self.data[start - self.base..self.pos]
    }
}
