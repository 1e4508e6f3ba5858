//! Decoding of `google.protobuf.FileDescriptorSet` bytes.
//!
//! The descriptor set is itself a protobuf message. It is read here with the
//! same [`WireReader`] the payload decoder uses, against the fixed schema of
//! `descriptor.proto`. Only the parts needed for decoding and projection are
//! kept; everything else (options we do not use, source info, services,
//! extensions) is skipped.

use crate::error::{Error, Result, WireFormatError};
use crate::wire::{RawValue, Tag, WireReader};

/// `FileDescriptorProto`, reduced
#[derive(Debug, Default, Clone)]
pub(crate) struct FileProto {
    pub(crate) name: String,
    pub(crate) package: String,
    pub(crate) dependencies: Vec<String>,
    pub(crate) messages: Vec<MessageProto>,
    pub(crate) enums: Vec<EnumProto>,
    pub(crate) syntax: String,
}

/// `DescriptorProto`, reduced
#[derive(Debug, Default, Clone)]
pub(crate) struct MessageProto {
    pub(crate) name: String,
    pub(crate) fields: Vec<FieldProto>,
    pub(crate) nested: Vec<MessageProto>,
    pub(crate) enums: Vec<EnumProto>,
    pub(crate) map_entry: bool,
}

/// `FieldDescriptorProto`, reduced
#[derive(Debug, Default, Clone)]
pub(crate) struct FieldProto {
    pub(crate) name: String,
    pub(crate) number: i32,
    pub(crate) label: Option<i32>,
    pub(crate) r#type: Option<i32>,
    pub(crate) type_name: Option<String>,
    pub(crate) json_name: Option<String>,
}

/// `EnumDescriptorProto`, reduced
#[derive(Debug, Default, Clone)]
pub(crate) struct EnumProto {
    pub(crate) name: String,
    pub(crate) values: Vec<(String, i32)>,
}

// descriptor.proto field numbers
const SET_FILE: u32 = 1;

const FILE_NAME: u32 = 1;
const FILE_PACKAGE: u32 = 2;
const FILE_DEPENDENCY: u32 = 3;
const FILE_MESSAGE_TYPE: u32 = 4;
const FILE_ENUM_TYPE: u32 = 5;
const FILE_SYNTAX: u32 = 12;

const MESSAGE_NAME: u32 = 1;
const MESSAGE_FIELD: u32 = 2;
const MESSAGE_NESTED_TYPE: u32 = 3;
const MESSAGE_ENUM_TYPE: u32 = 4;
const MESSAGE_OPTIONS: u32 = 7;
const MESSAGE_OPTIONS_MAP_ENTRY: u32 = 7;

const FIELD_NAME: u32 = 1;
const FIELD_NUMBER: u32 = 3;
const FIELD_LABEL: u32 = 4;
const FIELD_TYPE: u32 = 5;
const FIELD_TYPE_NAME: u32 = 6;
const FIELD_JSON_NAME: u32 = 10;

const ENUM_NAME: u32 = 1;
const ENUM_VALUE: u32 = 2;
const ENUM_VALUE_NAME: u32 = 1;
const ENUM_VALUE_NUMBER: u32 = 2;

/// Deepest `nested_type` chain accepted in a descriptor set
pub(crate) const MAX_MESSAGE_NESTING: usize = 100;

/// Parses a serialized `FileDescriptorSet`
pub(crate) fn parse_descriptor_set(data: &[u8]) -> Result<Vec<FileProto>> {
    let mut files = Vec::new();
    for_each_field(data, 0, "FileDescriptorSet", |tag, value| {
        if tag.field == SET_FILE {
            let (offset, bytes) = expect_len(tag, value, "FileDescriptorSet.file")?;
            files.push(parse_file(bytes, offset)?);
        }
        Ok(())
    })?;
    Ok(files)
}

fn parse_file(data: &[u8], base: usize) -> Result<FileProto> {
    let mut file = FileProto::default();
    for_each_field(data, base, "FileDescriptorProto", |tag, value| {
        match tag.field {
            FILE_NAME => file.name = expect_string(tag, value, "FileDescriptorProto.name")?,
            FILE_PACKAGE => {
                file.package = expect_string(tag, value, "FileDescriptorProto.package")?
            }
            FILE_DEPENDENCY => file
                .dependencies
                .push(expect_string(tag, value, "FileDescriptorProto.dependency")?),
            FILE_MESSAGE_TYPE => {
                let (offset, bytes) = expect_len(tag, value, "FileDescriptorProto.message_type")?;
                file.messages.push(parse_message(bytes, offset, 0)?);
            }
            FILE_ENUM_TYPE => {
                let (offset, bytes) = expect_len(tag, value, "FileDescriptorProto.enum_type")?;
                file.enums.push(parse_enum(bytes, offset)?);
            }
            FILE_SYNTAX => file.syntax = expect_string(tag, value, "FileDescriptorProto.syntax")?,
            _ => {}
        }
        Ok(())
    })?;
    Ok(file)
}

fn parse_message(data: &[u8], base: usize, depth: usize) -> Result<MessageProto> {
    if depth > MAX_MESSAGE_NESTING {
        return Err(Error::schema_parse(format!(
            "message nesting exceeds limit of {MAX_MESSAGE_NESTING} at offset {base}"
        )));
    }
    let mut message = MessageProto::default();
    for_each_field(data, base, "DescriptorProto", |tag, value| {
        match tag.field {
            MESSAGE_NAME => message.name = expect_string(tag, value, "DescriptorProto.name")?,
            MESSAGE_FIELD => {
                let (offset, bytes) = expect_len(tag, value, "DescriptorProto.field")?;
                message.fields.push(parse_field(bytes, offset)?);
            }
            MESSAGE_NESTED_TYPE => {
                let (offset, bytes) = expect_len(tag, value, "DescriptorProto.nested_type")?;
                message.nested.push(parse_message(bytes, offset, depth + 1)?);
            }
            MESSAGE_ENUM_TYPE => {
                let (offset, bytes) = expect_len(tag, value, "DescriptorProto.enum_type")?;
                message.enums.push(parse_enum(bytes, offset)?);
            }
            MESSAGE_OPTIONS => {
                let (offset, bytes) = expect_len(tag, value, "DescriptorProto.options")?;
                for_each_field(bytes, offset, "MessageOptions", |tag, value| {
                    if tag.field == MESSAGE_OPTIONS_MAP_ENTRY {
                        message.map_entry =
                            expect_varint(tag, value, "MessageOptions.map_entry")? != 0;
                    }
                    Ok(())
                })?;
            }
            _ => {}
        }
        Ok(())
    })?;
    Ok(message)
}

fn parse_field(data: &[u8], base: usize) -> Result<FieldProto> {
    let mut field = FieldProto::default();
    for_each_field(data, base, "FieldDescriptorProto", |tag, value| {
        match tag.field {
            FIELD_NAME => field.name = expect_string(tag, value, "FieldDescriptorProto.name")?,
            FIELD_NUMBER => {
                field.number = expect_varint(tag, value, "FieldDescriptorProto.number")? as i32
            }
            FIELD_LABEL => {
                field.label = Some(expect_varint(tag, value, "FieldDescriptorProto.label")? as i32)
            }
            FIELD_TYPE => {
                field.r#type = Some(expect_varint(tag, value, "FieldDescriptorProto.type")? as i32)
            }
            FIELD_TYPE_NAME => {
                field.type_name =
                    Some(expect_string(tag, value, "FieldDescriptorProto.type_name")?)
            }
            FIELD_JSON_NAME => {
                field.json_name =
                    Some(expect_string(tag, value, "FieldDescriptorProto.json_name")?)
            }
            _ => {}
        }
        Ok(())
    })?;
    Ok(field)
}

fn parse_enum(data: &[u8], base: usize) -> Result<EnumProto> {
    let mut enum_type = EnumProto::default();
    for_each_field(data, base, "EnumDescriptorProto", |tag, value| {
        match tag.field {
            ENUM_NAME => enum_type.name = expect_string(tag, value, "EnumDescriptorProto.name")?,
            ENUM_VALUE => {
                let (offset, bytes) = expect_len(tag, value, "EnumDescriptorProto.value")?;
                let mut name = String::new();
                let mut number = 0i32;
                for_each_field(bytes, offset, "EnumValueDescriptorProto", |tag, value| {
                    match tag.field {
                        ENUM_VALUE_NAME => {
                            name = expect_string(tag, value, "EnumValueDescriptorProto.name")?
                        }
                        ENUM_VALUE_NUMBER => {
                            number =
                                expect_varint(tag, value, "EnumValueDescriptorProto.number")? as i32
                        }
                        _ => {}
                    }
                    Ok(())
                })?;
                enum_type.values.push((name, number));
            }
            _ => {}
        }
        Ok(())
    })?;
    Ok(enum_type)
}

/// Reads every field of one descriptor message, handing each to `f`
fn for_each_field<'a, F>(data: &'a [u8], base: usize, message: &str, mut f: F) -> Result<()>
where
    F: FnMut(Tag, RawValue<'a>) -> Result<()>,
{
    let mut reader = WireReader::with_base(data, base);
    let wire = |e: WireFormatError| Error::SchemaParse {
        details: format!("malformed {message}"),
        source: Some(e),
    };

    while let Some(tag) = reader.read_tag().map_err(wire)? {
        let value = reader.read_raw(tag).map_err(wire)?;
        f(tag, value)?;
    }
    Ok(())
}

fn expect_len<'a>(tag: Tag, value: RawValue<'a>, what: &str) -> Result<(usize, &'a [u8])> {
    match value {
        RawValue::Len { offset, data } => Ok((offset, data)),
        _ => Err(unexpected(tag, what)),
    }
}

fn expect_string(tag: Tag, value: RawValue<'_>, what: &str) -> Result<String> {
    let (_, data) = expect_len(tag, value, what)?;
    String::from_utf8(data.to_vec()).map_err(|_| {
        Error::schema_parse(format!("{what} at offset {} is not valid UTF-8", tag.offset))
    })
}

fn expect_varint(tag: Tag, value: RawValue<'_>, what: &str) -> Result<u64> {
    match value {
        RawValue::Varint(v) => Ok(v),
        _ => Err(unexpected(tag, what)),
    }
}

fn unexpected(tag: Tag, what: &str) -> Error {
    Error::schema_parse(format!(
        "{what} at offset {} has unexpected wire type {:?}",
        tag.offset, tag.wire_type
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_set() {
        assert!(parse_descriptor_set(&[]).unwrap().is_empty());
    }

    #[test]
    fn test_single_file() {
        // FileDescriptorSet { file: [ FileDescriptorProto { name: "a.proto", package: "p" } ] }
        let file = [0x0A, 0x07, b'a', b'.', b'p', b'r', b'o', b't', b'o', 0x12, 0x01, b'p'];
        let mut set = vec![0x0A, file.len() as u8];
        set.extend_from_slice(&file);

        let files = parse_descriptor_set(&set).unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].name, "a.proto");
        assert_eq!(files[0].package, "p");
    }

    #[test]
    fn test_wrong_wire_type_is_schema_error() {
        // file entry encoded as a varint
        let err = parse_descriptor_set(&[0x08, 0x01]).unwrap_err();
        assert!(matches!(err, Error::SchemaParse { .. }));
    }

    #[test]
    fn test_truncated_set() {
        let err = parse_descriptor_set(&[0x0A, 0x10, 0x0A]).unwrap_err();
        assert!(matches!(
            err,
            Error::SchemaParse {
                source: Some(WireFormatError::Truncated { .. }),
                ..
            }
        ));
    }

    /// `DescriptorProto { name: "N", nested_type: [inner] }`
    fn nest(inner: Option<Vec<u8>>) -> Vec<u8> {
        let mut message = vec![0x0A, 0x01, b'N'];
        if let Some(inner) = inner {
            message.push(0x1A);
            push_len(&mut message, inner.len());
            message.extend_from_slice(&inner);
        }
        message
    }

    fn push_len(buf: &mut Vec<u8>, mut len: usize) {
        while len >= 0x80 {
            buf.push((len as u8 & 0x7F) | 0x80);
            len >>= 7;
        }
        buf.push(len as u8);
    }

    fn nested_set(depth: usize) -> Vec<u8> {
        let mut message = nest(None);
        for _ in 0..depth {
            message = nest(Some(message));
        }
        // FileDescriptorProto { message_type: [message] }
        let mut file = vec![0x22];
        push_len(&mut file, message.len());
        file.extend_from_slice(&message);

        let mut set = vec![0x0A];
        push_len(&mut set, file.len());
        set.extend_from_slice(&file);
        set
    }

    #[test]
    fn test_nesting_at_limit() {
        let files = parse_descriptor_set(&nested_set(MAX_MESSAGE_NESTING)).unwrap();
        let mut message = &files[0].messages[0];
        let mut depth = 0;
        while let Some(inner) = message.nested.first() {
            message = inner;
            depth += 1;
        }
        assert_eq!(depth, MAX_MESSAGE_NESTING);
    }

    #[test]
    fn test_deep_nesting_is_schema_error() {
        let err = parse_descriptor_set(&nested_set(3000)).unwrap_err();
        assert!(matches!(err, Error::SchemaParse { source: None, .. }));
        assert!(err.to_string().contains("nesting"));
    }
}
