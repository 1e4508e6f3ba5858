//! Schema-guided wire decoding.
//!
//! The [`Decoder`] walks protobuf wire bytes with a [`MessageDescriptor`] in
//! hand and produces a [`DecodedMessage`] tree.
//!
//! ## Algorithm Overview
//!
//! 1. Read a tag and split it into field number and wire type
//! 2. Look the field up in the current message type; unknown numbers are
//!    kept raw under the message's unknown fields
//! 3. Interpret the value according to the field's [`FieldKind`]: varints
//!    (zigzag for `sint*`), fixed-width values, strings, bytes, packed runs,
//!    embedded messages, groups and map entries
//! 4. Recurse into embedded messages, groups and map entries with a
//!    sub-reader, checking the configured depth limit first

mod value;

use crate::descriptor::{FieldDescriptor, FieldKind, MessageDescriptor, Registry};
use crate::error::{Error, Result, WireFormatError};
use crate::observer::{NullObserver, Observer};
use crate::wire::{from_zigzag32, from_zigzag64, Tag, WireReader, WireType};
use bytes::Bytes;
use tracing::{debug, trace};

pub use value::{DecodedMessage, DecodedValue, ScalarValue, UnknownField};

/// Nesting limit suited to untrusted payloads; the CLI applies it by default
pub const DEFAULT_MAX_DEPTH: usize = 100;

/// Configuration for the decoder
///
/// Decoding is unlimited by default. Set `max_depth`
/// (for example to [`DEFAULT_MAX_DEPTH`]) when payloads come from untrusted
/// sources, since each nesting level uses stack.
#[derive(Debug, Clone, Default)]
pub struct DecoderConfig {
    /// Maximum nesting of messages, groups and map entries below the root
    /// (`None` = unlimited)
    pub max_depth: Option<usize>,
}

impl DecoderConfig {
    /// Creates a new decoder config with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the nesting limit
    pub fn max_depth(mut self, limit: Option<usize>) -> Self {
        self.max_depth = limit;
        self
    }
}

/// Decodes wire bytes against types from a [`Registry`]
#[derive(Debug, Clone)]
pub struct Decoder<'r> {
    registry: &'r Registry,
    config: DecoderConfig,
}

impl<'r> Decoder<'r> {
    /// Creates a decoder with default configuration
    pub fn new(registry: &'r Registry) -> Self {
        Self::with_config(registry, DecoderConfig::default())
    }

    /// Creates a decoder with custom configuration
    pub fn with_config(registry: &'r Registry, config: DecoderConfig) -> Self {
        Self { registry, config }
    }

    /// Decodes `bytes` as a message of type `root`
    pub fn decode(&self, root: &MessageDescriptor, bytes: &[u8]) -> Result<DecodedMessage> {
        self.decode_with_observer(root, bytes, &mut NullObserver)
    }

    /// Decodes `bytes` as a message of type `root`, reporting to `observer`
    pub fn decode_with_observer(
        &self,
        root: &MessageDescriptor,
        bytes: &[u8],
        observer: &mut dyn Observer,
    ) -> Result<DecodedMessage> {
        debug!(
            "Decoding {} bytes as {}",
            bytes.len(),
            root.full_name()
        );
        let mut reader = WireReader::new(bytes);
        let message = self.decode_message(root, &mut reader, None, 0, observer)?;
        debug!(
            "Decoded {}: {} field(s), {} unknown",
            root.full_name(),
            message.len(),
            message.unknown_fields().len()
        );
        Ok(message)
    }

    /// Reads fields until the reader is exhausted, or until the end-group tag
    /// matching `group` when decoding a group
    fn decode_message(
        &self,
        desc: &MessageDescriptor,
        reader: &mut WireReader<'_>,
        group: Option<Tag>,
        depth: usize,
        observer: &mut dyn Observer,
    ) -> Result<DecodedMessage> {
        observer.on_message(desc.full_name(), depth);
        let mut message = DecodedMessage::new(desc.full_name());

        loop {
            let Some(tag) = reader.read_tag()? else {
                if let Some(start) = group {
                    return Err(WireFormatError::UnterminatedGroup {
                        offset: start.offset,
                        field: start.field,
                    }
                    .into());
                }
                break;
            };

            if tag.wire_type == WireType::EndGroup {
                match group {
                    Some(start) if start.field == tag.field => break,
                    Some(start) => {
                        return Err(WireFormatError::MismatchedEndGroup {
                            offset: tag.offset,
                            expected: start.field,
                            found: tag.field,
                        }
                        .into())
                    }
                    None => {
                        return Err(WireFormatError::UnexpectedEndGroup {
                            offset: tag.offset,
                            field: tag.field,
                        }
                        .into())
                    }
                }
            }

            match desc.field(tag.field) {
                Some(field) => {
                    observer.on_field(field, &tag);
                    self.decode_field(field, tag, reader, &mut message, depth, observer)?;
                }
                None => {
                    let start = reader.offset();
                    reader.read_raw(tag)?;
                    let unknown = UnknownField {
                        number: tag.field,
                        wire_type: tag.wire_type,
                        offset: tag.offset,
                        data: Bytes::copy_from_slice(reader.consumed_since(start)),
                    };
                    trace!(
                        "Unknown field {} ({:?}) in {} at offset {}",
                        tag.field,
                        tag.wire_type,
                        desc.full_name(),
                        tag.offset
                    );
                    observer.on_unknown_field(desc.full_name(), &unknown);
                    message.push_unknown(unknown);
                }
            }
        }

        Ok(message)
    }

    fn decode_field(
        &self,
        field: &FieldDescriptor,
        tag: Tag,
        reader: &mut WireReader<'_>,
        message: &mut DecodedMessage,
        depth: usize,
        observer: &mut dyn Observer,
    ) -> Result<()> {
        let kind = field.kind();

        if let (true, FieldKind::Message(entry_index)) = (field.is_map(), kind) {
            check_wire_type(field, tag, WireType::Len, "map entry")?;
            let (offset, data) = reader.read_length_delimited(tag.field)?;
            self.check_depth(depth + 1, tag.field, offset)?;

            let entry_desc = self.registry.message(entry_index);
            let mut sub = WireReader::with_base(data, offset);
            let mut entry = self.decode_message(entry_desc, &mut sub, None, depth + 1, observer)?;
            let key = self.take_entry_part(entry_desc, &mut entry, 1)?;
            let value = self.take_entry_part(entry_desc, &mut entry, 2)?;

            observer.on_map_entry(field);
            message.push_map_entry(field.number(), key, value);
            return Ok(());
        }

        if tag.wire_type == WireType::Len && field.is_packed() {
            let (offset, data) = reader.read_length_delimited(tag.field)?;
            let mut sub = WireReader::with_base(data, offset);
            let element = Tag {
                field: tag.field,
                wire_type: kind.wire_type(),
                offset,
            };

            let mut count = 0;
            while !sub.is_empty() {
                let value = self.decode_value(field, element, &mut sub, depth, observer)?;
                message.push_repeated(field.number(), value);
                count += 1;
            }
            trace!("Unpacked {} value(s) for {}", count, field.full_name());
            observer.on_packed_run(field, count);
            return Ok(());
        }

        check_wire_type(field, tag, kind.wire_type(), kind.name())?;
        let value = self.decode_value(field, tag, reader, depth, observer)?;

        if field.is_repeated() {
            message.push_repeated(field.number(), value);
        } else if let DecodedValue::Message(m) = value {
            message.merge_message(field.number(), m);
        } else {
            message.set(field.number(), value);
        }
        Ok(())
    }

    /// Reads one value of the field's kind; the wire type is already checked
    fn decode_value(
        &self,
        field: &FieldDescriptor,
        tag: Tag,
        reader: &mut WireReader<'_>,
        depth: usize,
        observer: &mut dyn Observer,
    ) -> Result<DecodedValue> {
        let n = tag.field;
        let scalar = |v: ScalarValue| -> Result<DecodedValue> { Ok(DecodedValue::Scalar(v)) };

        match field.kind() {
            FieldKind::Double => scalar(ScalarValue::Double(f64::from_bits(reader.read_fixed64(n)?))),
            FieldKind::Float => scalar(ScalarValue::Float(f32::from_bits(reader.read_fixed32(n)?))),
            FieldKind::Int64 => scalar(ScalarValue::Int64(reader.read_varint()? as i64)),
            FieldKind::UInt64 => scalar(ScalarValue::UInt64(reader.read_varint()?)),
            FieldKind::Int32 => scalar(ScalarValue::Int32(reader.read_varint()? as i32)),
            FieldKind::Fixed64 => scalar(ScalarValue::UInt64(reader.read_fixed64(n)?)),
            FieldKind::Fixed32 => scalar(ScalarValue::UInt32(reader.read_fixed32(n)?)),
            FieldKind::Bool => scalar(ScalarValue::Bool(reader.read_varint()? != 0)),
            FieldKind::String => {
                let (offset, data) = reader.read_length_delimited(n)?;
                let text = std::str::from_utf8(data)
                    .map_err(|_| WireFormatError::InvalidUtf8 { offset, field: n })?;
                scalar(ScalarValue::String(text.to_owned()))
            }
            FieldKind::Bytes => {
                let (_, data) = reader.read_length_delimited(n)?;
                Ok(DecodedValue::Bytes(Bytes::copy_from_slice(data)))
            }
            FieldKind::UInt32 => scalar(ScalarValue::UInt32(reader.read_varint()? as u32)),
            FieldKind::SFixed32 => scalar(ScalarValue::Int32(reader.read_fixed32(n)? as i32)),
            FieldKind::SFixed64 => scalar(ScalarValue::Int64(reader.read_fixed64(n)? as i64)),
            FieldKind::SInt32 => scalar(ScalarValue::Int32(from_zigzag32(reader.read_varint()? as u32))),
            FieldKind::SInt64 => scalar(ScalarValue::Int64(from_zigzag64(reader.read_varint()?))),
            FieldKind::Enum(_) => scalar(ScalarValue::Enum(reader.read_varint()? as i32)),
            FieldKind::Message(index) => {
                let (offset, data) = reader.read_length_delimited(n)?;
                self.check_depth(depth + 1, n, offset)?;
                let mut sub = WireReader::with_base(data, offset);
                let desc = self.registry.message(index);
                Ok(DecodedValue::Message(self.decode_message(
                    desc,
                    &mut sub,
                    None,
                    depth + 1,
                    observer,
                )?))
            }
            FieldKind::Group(index) => {
                self.check_depth(depth + 1, n, reader.offset())?;
                let desc = self.registry.message(index);
                Ok(DecodedValue::Message(self.decode_message(
                    desc,
                    reader,
                    Some(tag),
                    depth + 1,
                    observer,
                )?))
            }
        }
    }

    fn check_depth(&self, depth: usize, field: u32, offset: usize) -> Result<()> {
        match self.config.max_depth {
            Some(limit) if depth > limit => Err(WireFormatError::DepthExceeded {
                limit,
                field,
                offset,
            }
            .into()),
            _ => Ok(()),
        }
    }

    /// Removes the key or value from a decoded map entry, defaulting when absent
    fn take_entry_part(
        &self,
        entry_desc: &MessageDescriptor,
        entry: &mut DecodedMessage,
        number: u32,
    ) -> Result<DecodedValue> {
        let part = entry_desc.field(number).ok_or_else(|| {
            Error::unsupported_field(
                if number == 1 { "key" } else { "value" },
                entry_desc.full_name(),
                "map entry type lacks the field",
            )
        })?;
        Ok(entry
            .take(number)
            .unwrap_or_else(|| self.default_value(part)))
    }

    /// Zero value of a field's kind
    fn default_value(&self, field: &FieldDescriptor) -> DecodedValue {
        let scalar = DecodedValue::Scalar;
        match field.kind() {
            FieldKind::Double => scalar(ScalarValue::Double(0.0)),
            FieldKind::Float => scalar(ScalarValue::Float(0.0)),
            FieldKind::Int64 | FieldKind::SInt64 | FieldKind::SFixed64 => {
                scalar(ScalarValue::Int64(0))
            }
            FieldKind::UInt64 | FieldKind::Fixed64 => scalar(ScalarValue::UInt64(0)),
            FieldKind::Int32 | FieldKind::SInt32 | FieldKind::SFixed32 => {
                scalar(ScalarValue::Int32(0))
            }
            FieldKind::UInt32 | FieldKind::Fixed32 => scalar(ScalarValue::UInt32(0)),
            FieldKind::Bool => scalar(ScalarValue::Bool(false)),
            FieldKind::String => scalar(ScalarValue::String(String::new())),
            FieldKind::Bytes => DecodedValue::Bytes(Bytes::new()),
            FieldKind::Enum(index) => scalar(ScalarValue::Enum(
                self.registry.enum_type(index).default_number(),
            )),
            FieldKind::Message(index) | FieldKind::Group(index) => DecodedValue::Message(
                DecodedMessage::new(self.registry.message(index).full_name()),
            ),
        }
    }
}

fn check_wire_type(
    field: &FieldDescriptor,
    tag: Tag,
    expected: WireType,
    what: &'static str,
) -> Result<()> {
    if tag.wire_type == expected {
        return Ok(());
    }
    Err(WireFormatError::WireTypeMismatch {
        offset: tag.offset,
        field: tag.field,
        name: field.name().to_string(),
        wire_type: tag.wire_type as u8,
        expected: what,
    }
    .into())
}
