//! The decoder's output tree.

use crate::wire::WireType;
use bytes::Bytes;
use std::collections::BTreeMap;

/// A decoded scalar. The variant records the in-memory representation; the
/// field's [`FieldKind`](crate::FieldKind) says how it was encoded.
#[derive(Debug, Clone, PartialEq)]
pub enum ScalarValue {
    /// `double`
    Double(f64),
    /// `float`
    Float(f32),
    /// `int32`, `sint32`, `sfixed32`
    Int32(i32),
    /// `int64`, `sint64`, `sfixed64`
    Int64(i64),
    /// `uint32`, `fixed32`
    UInt32(u32),
    /// `uint64`, `fixed64`
    UInt64(u64),
    /// `bool`
    Bool(bool),
    /// `string`
    String(String),
    /// Enum number, known to the schema or not
    Enum(i32),
}

/// A node of the decoded tree
#[derive(Debug, Clone, PartialEq)]
pub enum DecodedValue {
    /// Numeric, bool, string or enum value
    Scalar(ScalarValue),
    /// `bytes` value
    Bytes(Bytes),
    /// Embedded message or group
    Message(DecodedMessage),
    /// Values of a repeated non-map field, in arrival order
    Repeated(Vec<DecodedValue>),
    /// Entries of a map field, every occurrence kept in arrival order
    MapEntries(Vec<(DecodedValue, DecodedValue)>),
}

impl DecodedValue {
    /// Short description of the node shape, for diagnostics
    pub fn shape(&self) -> &'static str {
        match self {
            DecodedValue::Scalar(_) => "scalar",
            DecodedValue::Bytes(_) => "bytes",
            DecodedValue::Message(_) => "message",
            DecodedValue::Repeated(_) => "repeated",
            DecodedValue::MapEntries(_) => "map",
        }
    }

    /// Returns the message if this is a [`DecodedValue::Message`]
    pub fn as_message(&self) -> Option<&DecodedMessage> {
        match self {
            DecodedValue::Message(m) => Some(m),
            _ => None,
        }
    }

    /// Returns the scalar if this is a [`DecodedValue::Scalar`]
    pub fn as_scalar(&self) -> Option<&ScalarValue> {
        match self {
            DecodedValue::Scalar(s) => Some(s),
            _ => None,
        }
    }
}

/// A field number the schema does not declare, kept as it appeared
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownField {
    /// Field number from the tag
    pub number: u32,
    /// Wire type from the tag
    pub wire_type: WireType,
    /// Absolute offset of the tag
    pub offset: usize,
    /// Encoded value bytes following the tag (length prefix and end-group
    /// tag included where the wire type has them)
    pub data: Bytes,
}

/// A decoded message: present fields keyed by number, plus unknown fields
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedMessage {
    type_name: String,
    fields: BTreeMap<u32, DecodedValue>,
    unknown_fields: Vec<UnknownField>,
}

impl DecodedMessage {
    /// Creates an empty message of the given type
    pub fn new(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            fields: BTreeMap::new(),
            unknown_fields: Vec::new(),
        }
    }

    /// Fully-qualified type name
    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    /// Value of a present field
    pub fn get(&self, number: u32) -> Option<&DecodedValue> {
        self.fields.get(&number)
    }

    /// True when the field appeared on the wire
    pub fn contains(&self, number: u32) -> bool {
        self.fields.contains_key(&number)
    }

    /// Present fields in field-number order
    pub fn fields(&self) -> impl Iterator<Item = (u32, &DecodedValue)> {
        self.fields.iter().map(|(&n, v)| (n, v))
    }

    /// Number of present fields
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// True when no known field appeared
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Fields the schema does not declare, in arrival order
    pub fn unknown_fields(&self) -> &[UnknownField] {
        &self.unknown_fields
    }

    pub(crate) fn push_unknown(&mut self, field: UnknownField) {
        self.unknown_fields.push(field);
    }

    /// Sets a singular field, replacing any earlier occurrence
    pub(crate) fn set(&mut self, number: u32, value: DecodedValue) {
        self.fields.insert(number, value);
    }

    /// Sets a singular message field, merging into an earlier occurrence
    pub(crate) fn merge_message(&mut self, number: u32, value: DecodedMessage) {
        match self.fields.get_mut(&number) {
            Some(DecodedValue::Message(existing)) => existing.merge(value),
            _ => {
                self.fields.insert(number, DecodedValue::Message(value));
            }
        }
    }

    pub(crate) fn take(&mut self, number: u32) -> Option<DecodedValue> {
        self.fields.remove(&number)
    }

    /// Appends to a repeated field
    pub(crate) fn push_repeated(&mut self, number: u32, value: DecodedValue) {
        match self
            .fields
            .entry(number)
            .or_insert_with(|| DecodedValue::Repeated(Vec::new()))
        {
            DecodedValue::Repeated(items) => items.push(value),
            slot => *slot = DecodedValue::Repeated(vec![value]),
        }
    }

    /// Appends to a map field
    pub(crate) fn push_map_entry(&mut self, number: u32, key: DecodedValue, value: DecodedValue) {
        match self
            .fields
            .entry(number)
            .or_insert_with(|| DecodedValue::MapEntries(Vec::new()))
        {
            DecodedValue::MapEntries(entries) => entries.push((key, value)),
            slot => *slot = DecodedValue::MapEntries(vec![(key, value)]),
        }
    }

    /// Protobuf merge: later singular values win, repeated and map fields
    /// append, nested messages merge recursively
    pub fn merge(&mut self, other: DecodedMessage) {
        for (number, value) in other.fields {
            match value {
                DecodedValue::Message(m) => self.merge_message(number, m),
                DecodedValue::Repeated(items) => {
                    for item in items {
                        self.push_repeated(number, item);
                    }
                }
                DecodedValue::MapEntries(entries) => {
                    for (k, v) in entries {
                        self.push_map_entry(number, k, v);
                    }
                }
                scalar @ (DecodedValue::Scalar(_) | DecodedValue::Bytes(_)) => {
                    self.set(number, scalar)
                }
            }
        }
        self.unknown_fields.extend(other.unknown_fields);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn int(v: i32) -> DecodedValue {
        DecodedValue::Scalar(ScalarValue::Int32(v))
    }

    #[test]
    fn test_repeated_appends() {
        let mut msg = DecodedMessage::new("pkg.M");
        msg.push_repeated(1, int(1));
        msg.push_repeated(1, int(2));
        assert_eq!(msg.get(1), Some(&DecodedValue::Repeated(vec![int(1), int(2)])));
    }

    #[test]
    fn test_merge() {
        let mut inner_a = DecodedMessage::new("pkg.Inner");
        inner_a.set(1, int(1));
        inner_a.push_repeated(2, int(10));
        let mut a = DecodedMessage::new("pkg.M");
        a.set(1, int(5));
        a.merge_message(2, inner_a);

        let mut inner_b = DecodedMessage::new("pkg.Inner");
        inner_b.set(3, int(3));
        inner_b.push_repeated(2, int(20));
        let mut b = DecodedMessage::new("pkg.M");
        b.set(1, int(6));
        b.merge_message(2, inner_b);

        a.merge(b);
        assert_eq!(a.get(1), Some(&int(6)));
        let inner = a.get(2).and_then(DecodedValue::as_message).unwrap();
        assert_eq!(inner.get(1), Some(&int(1)));
        assert_eq!(inner.get(3), Some(&int(3)));
        assert_eq!(
            inner.get(2),
            Some(&DecodedValue::Repeated(vec![int(10), int(20)]))
        );
    }
}
