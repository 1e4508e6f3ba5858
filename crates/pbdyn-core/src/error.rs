//! Error types for the pbdyn-core library.
//!
//! Every failure is terminal for the conversion that raised it. The taxonomy
//! separates a schema that cannot be read ([`Error::SchemaParse`]), a type
//! that cannot be found ([`Error::TypeNotFound`]), payload bytes that do not
//! match the wire format implied by the schema ([`Error::WireFormat`]) and a
//! field the projector cannot render ([`Error::UnsupportedField`]).
//!
//! Unknown *fields* are never errors; they are retained by the decoder.

use thiserror::Error;

/// Result type alias for pbdyn operations
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type for registry, decoder and projector operations
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// The descriptor-set bytes are not a well-formed descriptor-set encoding
    #[error("failed to parse descriptor set: {details}")]
    SchemaParse {
        /// Description of what was malformed
        details: String,
        /// Underlying wire error, if the failure was at the wire level
        #[source]
        source: Option<WireFormatError>,
    },

    /// A requested root type, or a type referenced by a field, is not in the registry
    #[error("type not found: '{type_name}'{}", referenced_by.as_ref().map(|f| format!(" (referenced by field '{f}')")).unwrap_or_default())]
    TypeNotFound {
        /// Fully-qualified name that failed to resolve
        type_name: String,
        /// Fully-qualified field name that referenced the type
        referenced_by: Option<String>,
    },

    /// The payload bytes do not match the wire format implied by the schema
    #[error("{0}")]
    WireFormat(#[from] WireFormatError),

    /// A field kind or decoded shape the projector does not know how to render
    #[error("cannot render field '{field}' of type '{type_name}': {details}")]
    UnsupportedField {
        /// Field name
        field: String,
        /// Owning message type
        type_name: String,
        /// Why the field could not be rendered
        details: String,
    },
}

impl Error {
    /// Creates a schema parse error without an underlying wire error
    pub fn schema_parse(details: impl Into<String>) -> Self {
        Self::SchemaParse {
            details: details.into(),
            source: None,
        }
    }

    /// Creates a type-not-found error for a root type lookup
    pub fn type_not_found(type_name: impl Into<String>) -> Self {
        Self::TypeNotFound {
            type_name: type_name.into(),
            referenced_by: None,
        }
    }

    /// Creates a type-not-found error for a field reference
    pub fn unresolved_reference(type_name: impl Into<String>, field: impl Into<String>) -> Self {
        Self::TypeNotFound {
            type_name: type_name.into(),
            referenced_by: Some(field.into()),
        }
    }

    /// Creates an unsupported field error
    pub fn unsupported_field(
        field: impl Into<String>,
        type_name: impl Into<String>,
        details: impl Into<String>,
    ) -> Self {
        Self::UnsupportedField {
            field: field.into(),
            type_name: type_name.into(),
            details: details.into(),
        }
    }

    /// Returns the wire error if this is a [`Error::WireFormat`]
    pub fn as_wire_format(&self) -> Option<&WireFormatError> {
        match self {
            Self::WireFormat(e) => Some(e),
            _ => None,
        }
    }
}

/// Failures while reading protobuf wire-format bytes.
///
/// Offsets are absolute byte positions in the outermost buffer being decoded.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum WireFormatError {
    /// The buffer ended in the middle of a varint
    #[error("truncated varint at offset {offset}")]
    TruncatedVarint {
        /// Offset of the first byte of the varint
        offset: usize,
    },

    /// A varint ran past 10 bytes or overflowed 64 bits
    #[error("varint at offset {offset} exceeds 64 bits")]
    VarintOverflow {
        /// Offset of the first byte of the varint
        offset: usize,
    },

    /// A length prefix or fixed-width value needs more bytes than remain
    #[error("truncated value for field {field} at offset {offset}: need {needed} bytes, have {remaining}")]
    Truncated {
        /// Offset where the value starts
        offset: usize,
        /// Field number being read
        field: u32,
        /// Bytes required
        needed: u64,
        /// Bytes left in the buffer
        remaining: usize,
    },

    /// The tag carries wire type 6 or 7
    #[error("invalid wire type {wire_type} for field {field} at offset {offset}")]
    InvalidWireType {
        /// Offset of the tag
        offset: usize,
        /// Field number decoded from the tag
        field: u32,
        /// The raw wire type bits
        wire_type: u8,
    },

    /// The tag carries field number 0 or one above the protobuf maximum
    #[error("invalid field number {field} at offset {offset}")]
    InvalidFieldNumber {
        /// Offset of the tag
        offset: usize,
        /// Field number decoded from the tag
        field: u64,
    },

    /// The wire type cannot carry the schema kind of the field
    #[error("field {field} ('{name}') at offset {offset}: wire type {wire_type} cannot encode {expected}")]
    WireTypeMismatch {
        /// Offset of the tag
        offset: usize,
        /// Field number
        field: u32,
        /// Field name
        name: String,
        /// Wire type found on the wire
        wire_type: u8,
        /// Schema kind that was expected
        expected: &'static str,
    },

    /// A string field does not hold valid UTF-8
    #[error("field {field} at offset {offset} is not valid UTF-8")]
    InvalidUtf8 {
        /// Offset of the string bytes
        offset: usize,
        /// Field number
        field: u32,
    },

    /// An end-group tag appeared outside any group
    #[error("unexpected end-group tag for field {field} at offset {offset}")]
    UnexpectedEndGroup {
        /// Offset of the tag
        offset: usize,
        /// Field number of the end-group tag
        field: u32,
    },

    /// An end-group tag closed a different group than the one open
    #[error("end-group for field {found} at offset {offset} does not close open group {expected}")]
    MismatchedEndGroup {
        /// Offset of the tag
        offset: usize,
        /// Field number of the open group
        expected: u32,
        /// Field number of the end-group tag
        found: u32,
    },

    /// The buffer ended before a group was closed
    #[error("group for field {field} starting at offset {offset} has no end-group tag")]
    UnterminatedGroup {
        /// Offset of the start-group tag
        offset: usize,
        /// Field number of the group
        field: u32,
    },

    /// Nesting of messages or groups went past the configured limit
    #[error("nesting depth exceeds limit of {limit} at field {field}, offset {offset}")]
    DepthExceeded {
        /// Configured limit
        limit: usize,
        /// Field that would have opened the next level
        field: u32,
        /// Offset of that field's value
        offset: usize,
    },
}

impl WireFormatError {
    /// Byte offset the error refers to
    pub fn offset(&self) -> usize {
        match self {
            Self::TruncatedVarint { offset }
            | Self::VarintOverflow { offset }
            | Self::Truncated { offset, .. }
            | Self::InvalidWireType { offset, .. }
            | Self::InvalidFieldNumber { offset, .. }
            | Self::WireTypeMismatch { offset, .. }
            | Self::InvalidUtf8 { offset, .. }
            | Self::UnexpectedEndGroup { offset, .. }
            | Self::MismatchedEndGroup { offset, .. }
            | Self::UnterminatedGroup { offset, .. }
            | Self::DepthExceeded { offset, .. } => *offset,
        }
    }
}
