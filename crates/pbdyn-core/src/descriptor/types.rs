//! Resolved schema types held by the [`Registry`](super::Registry).

use crate::error::{Error, Result};
use crate::wire::WireType;
use std::collections::HashMap;

/// Index of a message type inside its registry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MessageIndex(pub(crate) usize);

/// Index of an enum type inside its registry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EnumIndex(pub(crate) usize);

/// Proto syntax version of a schema file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Syntax {
    /// Proto2 syntax
    Proto2,
    /// Proto3 syntax
    Proto3,
    /// Protobuf editions
    Editions,
}

impl Syntax {
    /// Returns the syntax declaration string
    pub fn as_str(&self) -> &'static str {
        match self {
            Syntax::Proto2 => "proto2",
            Syntax::Proto3 => "proto3",
            Syntax::Editions => "editions",
        }
    }
}

impl TryFrom<&str> for Syntax {
    type Error = Error;

    fn try_from(value: &str) -> Result<Self> {
        match value {
            "" | "proto2" => Ok(Syntax::Proto2),
            "proto3" => Ok(Syntax::Proto3),
            "editions" => Ok(Syntax::Editions),
            _ => Err(Error::schema_parse(format!("unsupported proto syntax: '{value}'"))),
        }
    }
}

/// A logical schema file
#[derive(Debug, Clone)]
pub struct FileDescriptor {
    pub(crate) name: String,
    pub(crate) package: String,
    pub(crate) dependencies: Vec<String>,
    pub(crate) syntax: Syntax,
    pub(crate) messages: Vec<MessageIndex>,
    pub(crate) enums: Vec<EnumIndex>,
}

impl FileDescriptor {
    /// File name, e.g. `events/v1/simple.proto`
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Package declared by the file (may be empty)
    pub fn package(&self) -> &str {
        &self.package
    }

    /// Names of imported files. Informational only: field types resolve
    /// against the whole registry, not per-file import scopes.
    pub fn dependencies(&self) -> &[String] {
        &self.dependencies
    }

    /// Declared syntax
    pub fn syntax(&self) -> Syntax {
        self.syntax
    }

    /// Top-level message types declared in this file
    pub fn messages(&self) -> &[MessageIndex] {
        &self.messages
    }

    /// Top-level enum types declared in this file
    pub fn enums(&self) -> &[EnumIndex] {
        &self.enums
    }
}

/// Cardinality of a field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cardinality {
    /// Singular, presence not required
    Optional,
    /// Singular, proto2 `required`
    Required,
    /// Zero or more values
    Repeated,
}

/// Declared kind of a field, with references already bound.
///
/// This is a closed set: the decoder and projector each match on it
/// exhaustively.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    /// `double`
    Double,
    /// `float`
    Float,
    /// `int64`
    Int64,
    /// `uint64`
    UInt64,
    /// `int32`
    Int32,
    /// `fixed64`
    Fixed64,
    /// `fixed32`
    Fixed32,
    /// `bool`
    Bool,
    /// `string`
    String,
    /// `bytes`
    Bytes,
    /// `uint32`
    UInt32,
    /// `sfixed32`
    SFixed32,
    /// `sfixed64`
    SFixed64,
    /// `sint32` (zigzag)
    SInt32,
    /// `sint64` (zigzag)
    SInt64,
    /// Enum type reference
    Enum(EnumIndex),
    /// Embedded message reference
    Message(MessageIndex),
    /// Legacy group reference
    Group(MessageIndex),
}

impl FieldKind {
    /// Wire type a single value of this kind is encoded with
    pub fn wire_type(&self) -> WireType {
        match self {
            FieldKind::Int32
            | FieldKind::Int64
            | FieldKind::UInt32
            | FieldKind::UInt64
            | FieldKind::SInt32
            | FieldKind::SInt64
            | FieldKind::Bool
            | FieldKind::Enum(_) => WireType::Varint,
            FieldKind::Double | FieldKind::Fixed64 | FieldKind::SFixed64 => WireType::I64,
            FieldKind::Float | FieldKind::Fixed32 | FieldKind::SFixed32 => WireType::I32,
            FieldKind::String | FieldKind::Bytes | FieldKind::Message(_) => WireType::Len,
            FieldKind::Group(_) => WireType::StartGroup,
        }
    }

    /// True for kinds that may be packed into a single length-delimited run
    pub fn is_packable(&self) -> bool {
        !matches!(
            self,
            FieldKind::String | FieldKind::Bytes | FieldKind::Message(_) | FieldKind::Group(_)
        )
    }

    /// True for kinds projected as JSON strings to avoid double precision loss
    pub fn is_64_bit_integer(&self) -> bool {
        matches!(
            self,
            FieldKind::Int64
                | FieldKind::UInt64
                | FieldKind::SInt64
                | FieldKind::Fixed64
                | FieldKind::SFixed64
        )
    }

    /// The `.proto` spelling of the kind
    pub fn name(&self) -> &'static str {
        match self {
            FieldKind::Double => "double",
            FieldKind::Float => "float",
            FieldKind::Int64 => "int64",
            FieldKind::UInt64 => "uint64",
            FieldKind::Int32 => "int32",
            FieldKind::Fixed64 => "fixed64",
            FieldKind::Fixed32 => "fixed32",
            FieldKind::Bool => "bool",
            FieldKind::String => "string",
            FieldKind::Bytes => "bytes",
            FieldKind::UInt32 => "uint32",
            FieldKind::SFixed32 => "sfixed32",
            FieldKind::SFixed64 => "sfixed64",
            FieldKind::SInt32 => "sint32",
            FieldKind::SInt64 => "sint64",
            FieldKind::Enum(_) => "enum",
            FieldKind::Message(_) => "message",
            FieldKind::Group(_) => "group",
        }
    }
}

/// A field of a message type
#[derive(Debug, Clone)]
pub struct FieldDescriptor {
    pub(crate) number: u32,
    pub(crate) name: String,
    pub(crate) json_name: String,
    pub(crate) full_name: String,
    pub(crate) cardinality: Cardinality,
    pub(crate) kind: FieldKind,
    pub(crate) type_name: Option<String>,
    pub(crate) is_map: bool,
    pub(crate) is_packed: bool,
}

impl FieldDescriptor {
    /// Field number, unique within the owning message
    pub fn number(&self) -> u32 {
        self.number
    }

    /// Field name as declared
    pub fn name(&self) -> &str {
        &self.name
    }

    /// JSON name: the declared `json_name`, or the lowerCamelCase field name
    pub fn json_name(&self) -> &str {
        &self.json_name
    }

    /// Fully-qualified field name, `pkg.Message.field`
    pub fn full_name(&self) -> &str {
        &self.full_name
    }

    /// Declared cardinality
    pub fn cardinality(&self) -> Cardinality {
        self.cardinality
    }

    /// Declared kind with resolved references
    pub fn kind(&self) -> FieldKind {
        self.kind
    }

    /// Fully-qualified name of the referenced message or enum type
    pub fn type_name(&self) -> Option<&str> {
        self.type_name.as_deref()
    }

    /// True for repeated fields (map fields included)
    pub fn is_repeated(&self) -> bool {
        self.cardinality == Cardinality::Repeated
    }

    /// True when the field is a map, i.e. repeated over a synthetic entry type
    pub fn is_map(&self) -> bool {
        self.is_map
    }

    /// True when the field may arrive as a packed run
    pub fn is_packed(&self) -> bool {
        self.is_packed
    }
}

/// A message type
#[derive(Debug, Clone)]
pub struct MessageDescriptor {
    pub(crate) index: MessageIndex,
    pub(crate) full_name: String,
    pub(crate) name: String,
    pub(crate) file: usize,
    pub(crate) fields: Vec<FieldDescriptor>,
    pub(crate) by_number: HashMap<u32, usize>,
    pub(crate) nested_messages: Vec<MessageIndex>,
    pub(crate) nested_enums: Vec<EnumIndex>,
    pub(crate) map_entry: bool,
}

impl MessageDescriptor {
    /// Position of this type in its registry
    pub fn index(&self) -> MessageIndex {
        self.index
    }

    /// Fully-qualified name, e.g. `pkg.Outer.Inner`
    pub fn full_name(&self) -> &str {
        &self.full_name
    }

    /// Simple name, e.g. `Inner`
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Index of the declaring file in [`Registry::files`](super::Registry::files)
    pub fn file_index(&self) -> usize {
        self.file
    }

    /// Fields in declaration order
    pub fn fields(&self) -> &[FieldDescriptor] {
        &self.fields
    }

    /// Looks up a field by number
    pub fn field(&self, number: u32) -> Option<&FieldDescriptor> {
        self.by_number.get(&number).map(|&i| &self.fields[i])
    }

    /// Looks up a field by declared name
    pub fn field_by_name(&self, name: &str) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Message types declared inside this one
    pub fn nested_messages(&self) -> &[MessageIndex] {
        &self.nested_messages
    }

    /// Enum types declared inside this one
    pub fn nested_enums(&self) -> &[EnumIndex] {
        &self.nested_enums
    }

    /// True for the synthetic entry type generated for a map field
    pub fn is_map_entry(&self) -> bool {
        self.map_entry
    }
}

/// A symbolic enum value
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnumValue {
    /// Symbolic name
    pub name: String,
    /// Integer value
    pub number: i32,
}

/// An enum type
#[derive(Debug, Clone)]
pub struct EnumDescriptor {
    pub(crate) full_name: String,
    pub(crate) name: String,
    pub(crate) values: Vec<EnumValue>,
    pub(crate) by_number: HashMap<i32, usize>,
}

impl EnumDescriptor {
    pub(crate) fn new(full_name: String, name: String, values: Vec<EnumValue>) -> Self {
        let mut by_number = HashMap::with_capacity(values.len());
        for (i, value) in values.iter().enumerate() {
            // Aliases: the first declared name wins
            by_number.entry(value.number).or_insert(i);
        }
        Self {
            full_name,
            name,
            values,
            by_number,
        }
    }

    /// Fully-qualified name
    pub fn full_name(&self) -> &str {
        &self.full_name
    }

    /// Simple name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Values in declaration order
    pub fn values(&self) -> &[EnumValue] {
        &self.values
    }

    /// Symbolic name for an integer value, if declared
    pub fn value_name(&self, number: i32) -> Option<&str> {
        self.by_number
            .get(&number)
            .map(|&i| self.values[i].name.as_str())
    }

    /// The value a missing field of this type defaults to
    pub fn default_number(&self) -> i32 {
        self.values.first().map_or(0, |v| v.number)
    }
}

/// Convert a snake_case name to lowerCamelCase
pub(crate) fn to_lower_camel_case(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    let mut capitalize_next = false;

    for c in s.chars() {
        if c == '_' {
            capitalize_next = true;
        } else if capitalize_next {
            result.push(c.to_ascii_uppercase());
            capitalize_next = false;
        } else {
            result.push(c);
        }
    }

    result
}
