//! JSON projection of decoded messages.
//!
//! The [`Projector`] walks a [`DecodedMessage`] alongside its
//! [`MessageDescriptor`] and builds a `serde_json` object:
//!
//! - fields appear in declaration order; absent fields are omitted
//! - 64-bit integers become decimal strings, other numbers stay numbers
//! - non-finite floats become `"NaN"`, `"Infinity"` or `"-Infinity"`
//! - `bytes` become standard base64 with padding
//! - enums become the value name, or the bare number when unknown
//! - maps become objects keyed by the key's text form; the last entry for a
//!   key wins
//! - unknown fields are dropped

use crate::decode::{DecodedMessage, DecodedValue, ScalarValue};
use crate::descriptor::{FieldDescriptor, FieldKind, MessageDescriptor, Registry};
use crate::error::{Error, Result};
use crate::observer::{NullObserver, Observer};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde_json::{Map, Number, Value};
use tracing::trace;

/// A projected message
pub type JsonObject = Map<String, Value>;

/// Which name a field is written under
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FieldNaming {
    /// The name as declared in the `.proto` file
    #[default]
    ProtoName,
    /// The descriptor's `json_name` (lowerCamelCase unless overridden)
    JsonName,
}

/// Configuration for the projector
#[derive(Debug, Clone, Default)]
pub struct ProjectorConfig {
    /// Output key for each field
    pub field_names: FieldNaming,
}

impl ProjectorConfig {
    /// Creates a new projector config with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the output key naming
    pub fn field_names(mut self, naming: FieldNaming) -> Self {
        self.field_names = naming;
        self
    }
}

/// Renders decoded messages as JSON objects
#[derive(Debug, Clone)]
pub struct Projector<'r> {
    registry: &'r Registry,
    config: ProjectorConfig,
}

impl<'r> Projector<'r> {
    /// Creates a projector with default configuration
    pub fn new(registry: &'r Registry) -> Self {
        Self::with_config(registry, ProjectorConfig::default())
    }

    /// Creates a projector with custom configuration
    pub fn with_config(registry: &'r Registry, config: ProjectorConfig) -> Self {
        Self { registry, config }
    }

    /// Projects `message`, decoded as `desc`, to a JSON object
    pub fn project(&self, message: &DecodedMessage, desc: &MessageDescriptor) -> Result<JsonObject> {
        self.project_with_observer(message, desc, &mut NullObserver)
    }

    /// Projects `message`, reporting dropped unknown fields to `observer`
    pub fn project_with_observer(
        &self,
        message: &DecodedMessage,
        desc: &MessageDescriptor,
        observer: &mut dyn Observer,
    ) -> Result<JsonObject> {
        let unknown = message.unknown_fields().len();
        if unknown > 0 {
            trace!(
                "Dropping {} unknown field(s) of {}",
                unknown,
                desc.full_name()
            );
            observer.on_unknown_dropped(desc.full_name(), unknown);
        }

        let mut out = JsonObject::new();
        for field in desc.fields() {
            let Some(value) = message.get(field.number()) else {
                continue;
            };
            let json = self.project_field(desc, field, value, observer)?;
            out.insert(self.key(field).to_string(), json);
        }
        Ok(out)
    }

    fn key<'f>(&self, field: &'f FieldDescriptor) -> &'f str {
        match self.config.field_names {
            FieldNaming::ProtoName => field.name(),
            FieldNaming::JsonName => field.json_name(),
        }
    }

    fn project_field(
        &self,
        owner: &MessageDescriptor,
        field: &FieldDescriptor,
        value: &DecodedValue,
        observer: &mut dyn Observer,
    ) -> Result<Value> {
        match (value, field.kind()) {
            (DecodedValue::MapEntries(entries), FieldKind::Message(entry)) if field.is_map() => {
                let entry = self.registry.message(entry);
                let value_field = entry.field(2).ok_or_else(|| {
                    Error::unsupported_field(
                        field.name(),
                        owner.full_name(),
                        "map entry type has no value field",
                    )
                })?;

                let mut map = JsonObject::new();
                for (k, v) in entries {
                    let key = map_key(k).ok_or_else(|| {
                        Error::unsupported_field(
                            field.name(),
                            owner.full_name(),
                            format!("map key of shape {} has no text form", k.shape()),
                        )
                    })?;
                    let v = self.project_value(owner, value_field, v, observer)?;
                    map.insert(key, v);
                }
                Ok(Value::Object(map))
            }
            (DecodedValue::Repeated(items), _) if field.is_repeated() && !field.is_map() => items
                .iter()
                .map(|item| self.project_value(owner, field, item, observer))
                .collect::<Result<Vec<_>>>()
                .map(Value::Array),
            (_, _) if !field.is_repeated() => self.project_value(owner, field, value, observer),
            (other, _) => Err(Error::unsupported_field(
                field.name(),
                owner.full_name(),
                format!(
                    "{} value for a {} field",
                    other.shape(),
                    if field.is_map() { "map" } else { "repeated" }
                ),
            )),
        }
    }

    /// Renders a single (non-repeated) value of the field's kind
    fn project_value(
        &self,
        owner: &MessageDescriptor,
        field: &FieldDescriptor,
        value: &DecodedValue,
        observer: &mut dyn Observer,
    ) -> Result<Value> {
        use ScalarValue as S;

        let rendered = match (field.kind(), value) {
            (FieldKind::Double, DecodedValue::Scalar(S::Double(v))) => Some(float(*v)),
            (FieldKind::Float, DecodedValue::Scalar(S::Float(v))) => Some(float(widen(*v))),
            (
                FieldKind::Int64 | FieldKind::SInt64 | FieldKind::SFixed64,
                DecodedValue::Scalar(S::Int64(v)),
            ) => Some(Value::String(v.to_string())),
            (FieldKind::UInt64 | FieldKind::Fixed64, DecodedValue::Scalar(S::UInt64(v))) => {
                Some(Value::String(v.to_string()))
            }
            (
                FieldKind::Int32 | FieldKind::SInt32 | FieldKind::SFixed32,
                DecodedValue::Scalar(S::Int32(v)),
            ) => Some(Value::from(*v)),
            (FieldKind::UInt32 | FieldKind::Fixed32, DecodedValue::Scalar(S::UInt32(v))) => {
                Some(Value::from(*v))
            }
            (FieldKind::Bool, DecodedValue::Scalar(S::Bool(v))) => Some(Value::Bool(*v)),
            (FieldKind::String, DecodedValue::Scalar(S::String(v))) => {
                Some(Value::String(v.clone()))
            }
            (FieldKind::Bytes, DecodedValue::Bytes(v)) => Some(Value::String(STANDARD.encode(v))),
            (FieldKind::Enum(index), DecodedValue::Scalar(S::Enum(v))) => {
                Some(match self.registry.enum_type(index).value_name(*v) {
                    Some(name) => Value::String(name.to_string()),
                    None => Value::from(*v),
                })
            }
            (FieldKind::Message(index) | FieldKind::Group(index), DecodedValue::Message(m)) => {
                let desc = self.registry.message(index);
                Some(Value::Object(self.project_with_observer(m, desc, observer)?))
            }
            (
                FieldKind::Double
                | FieldKind::Float
                | FieldKind::Int64
                | FieldKind::UInt64
                | FieldKind::Int32
                | FieldKind::Fixed64
                | FieldKind::Fixed32
                | FieldKind::Bool
                | FieldKind::String
                | FieldKind::Bytes
                | FieldKind::UInt32
                | FieldKind::SFixed32
                | FieldKind::SFixed64
                | FieldKind::SInt32
                | FieldKind::SInt64
                | FieldKind::Enum(_)
                | FieldKind::Message(_)
                | FieldKind::Group(_),
                _,
            ) => None,
        };

        rendered.ok_or_else(|| {
            Error::unsupported_field(
                field.name(),
                owner.full_name(),
                format!(
                    "{} value does not fit field kind {}",
                    value.shape(),
                    field.kind().name()
                ),
            )
        })
    }
}

/// JSON number for a finite float, string token otherwise
fn float(v: f64) -> Value {
    match Number::from_f64(v) {
        Some(n) => Value::Number(n),
        None if v.is_nan() => Value::String("NaN".into()),
        None if v > 0.0 => Value::String("Infinity".into()),
        None => Value::String("-Infinity".into()),
    }
}

/// Widens a `float` to its shortest decimal form, so `0.1f32` prints as
/// `0.1` rather than `0.10000000149011612`
fn widen(v: f32) -> f64 {
    if !v.is_finite() {
        return f64::from(v);
    }
    v.to_string().parse().unwrap_or(f64::from(v))
}

/// Text form of a map key
fn map_key(key: &DecodedValue) -> Option<String> {
    match key {
        DecodedValue::Scalar(scalar) => match scalar {
            ScalarValue::String(s) => Some(s.clone()),
            ScalarValue::Bool(b) => Some(b.to_string()),
            ScalarValue::Int32(v) => Some(v.to_string()),
            ScalarValue::Int64(v) => Some(v.to_string()),
            ScalarValue::UInt32(v) => Some(v.to_string()),
            ScalarValue::UInt64(v) => Some(v.to_string()),
            ScalarValue::Enum(v) => Some(v.to_string()),
            ScalarValue::Double(_) | ScalarValue::Float(_) => None,
        },
        DecodedValue::Bytes(_)
        | DecodedValue::Message(_)
        | DecodedValue::Repeated(_)
        | DecodedValue::MapEntries(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::Decoder;
    use crate::descriptor::testing::{enumeration, field, message, registry};
    use crate::observer::StatsObserver;
    use bytes::Bytes;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn fixture() -> Registry {
        let mut record = message(
            "Record",
            vec![
                field("user_id", 1, 1, 3, None),
                field("display_name", 2, 1, 9, None),
                field("raw", 3, 1, 12, None),
                field("status", 4, 1, 14, Some("Status")),
                field("scores", 5, 3, 2, None),
                field("attrs", 6, 3, 11, Some("Record.AttrsEntry")),
                field("child", 7, 1, 11, Some("Record")),
                field("ratio", 8, 1, 1, None),
                field("count", 9, 1, 13, None),
            ],
        );
        let mut entry = message(
            "AttrsEntry",
            vec![field("key", 1, 1, 9, None), field("value", 2, 1, 5, None)],
        );
        entry.map_entry = true;
        record.nested.push(entry);
        registry(
            "demo",
            vec![record],
            vec![enumeration("Status", &[("UNKNOWN", 0), ("ACTIVE", 1)])],
        )
    }

    fn project(registry: &Registry, msg: &DecodedMessage, naming: FieldNaming) -> Value {
        let desc = registry.resolve("demo.Record").unwrap();
        let projector =
            Projector::with_config(registry, ProjectorConfig::new().field_names(naming));
        Value::Object(projector.project(msg, desc).unwrap())
    }

    fn scalar(v: ScalarValue) -> DecodedValue {
        DecodedValue::Scalar(v)
    }

    #[test]
    fn test_scalars_and_ordering() {
        let registry = fixture();
        let mut msg = DecodedMessage::new("demo.Record");
        msg.set(9, scalar(ScalarValue::UInt32(3)));
        msg.set(2, scalar(ScalarValue::String("Ada".into())));
        msg.set(1, scalar(ScalarValue::Int64(-42)));
        msg.set(3, DecodedValue::Bytes(Bytes::from_static(b"hi")));
        msg.set(4, scalar(ScalarValue::Enum(1)));

        let out = project(&registry, &msg, FieldNaming::ProtoName);
        assert_eq!(
            out,
            json!({
                "user_id": "-42",
                "display_name": "Ada",
                "raw": "aGk=",
                "status": "ACTIVE",
                "count": 3
            })
        );
        let keys: Vec<_> = out.as_object().unwrap().keys().cloned().collect();
        assert_eq!(keys, ["user_id", "display_name", "raw", "status", "count"]);
    }

    #[test]
    fn test_json_names() {
        let registry = fixture();
        let mut msg = DecodedMessage::new("demo.Record");
        msg.set(2, scalar(ScalarValue::String("Ada".into())));
        assert_eq!(
            project(&registry, &msg, FieldNaming::JsonName),
            json!({ "displayName": "Ada" })
        );
    }

    #[test]
    fn test_unknown_enum_renders_number() {
        let registry = fixture();
        let mut msg = DecodedMessage::new("demo.Record");
        msg.set(4, scalar(ScalarValue::Enum(99)));
        assert_eq!(
            project(&registry, &msg, FieldNaming::ProtoName),
            json!({ "status": 99 })
        );
    }

    #[test]
    fn test_floats() {
        let registry = fixture();
        let mut msg = DecodedMessage::new("demo.Record");
        msg.push_repeated(5, scalar(ScalarValue::Float(0.1)));
        msg.push_repeated(5, scalar(ScalarValue::Float(f32::NAN)));
        msg.push_repeated(5, scalar(ScalarValue::Float(f32::NEG_INFINITY)));
        msg.set(8, scalar(ScalarValue::Double(f64::INFINITY)));
        assert_eq!(
            project(&registry, &msg, FieldNaming::ProtoName),
            json!({ "scores": [0.1, "NaN", "-Infinity"], "ratio": "Infinity" })
        );
    }

    #[test]
    fn test_map_last_key_wins() {
        let registry = fixture();
        let mut msg = DecodedMessage::new("demo.Record");
        let s = |v: &str| scalar(ScalarValue::String(v.into()));
        msg.push_map_entry(6, s("a"), scalar(ScalarValue::Int32(1)));
        msg.push_map_entry(6, s("b"), scalar(ScalarValue::Int32(2)));
        msg.push_map_entry(6, s("a"), scalar(ScalarValue::Int32(3)));
        assert_eq!(
            project(&registry, &msg, FieldNaming::ProtoName),
            json!({ "attrs": { "a": 3, "b": 2 } })
        );
    }

    #[test]
    fn test_nested_and_unknown_dropped() {
        let registry = fixture();
        let desc = registry.resolve("demo.Record").unwrap();

        // child { user_id: 7, <unknown 15: 1> }, <unknown 16: 2>
        let child = [0x08, 0x07, 0x78, 0x01];
        let mut buf = vec![0x3A, child.len() as u8];
        buf.extend_from_slice(&child);
        buf.extend_from_slice(&[0x80, 0x01, 0x02]);

        let decoded = Decoder::new(&registry).decode(desc, &buf).unwrap();
        let mut stats = StatsObserver::default();
        let out = Projector::new(&registry)
            .project_with_observer(&decoded, desc, &mut stats)
            .unwrap();
        assert_eq!(Value::Object(out), json!({ "child": { "user_id": "7" } }));
        assert_eq!(stats.unknown_dropped_count, 2);
    }

    #[test]
    fn test_shape_mismatch_is_unsupported() {
        let registry = fixture();
        let desc = registry.resolve("demo.Record").unwrap();
        let mut msg = DecodedMessage::new("demo.Record");
        msg.set(2, scalar(ScalarValue::Int32(1)));
        let err = Projector::new(&registry).project(&msg, desc).unwrap_err();
        assert!(matches!(
            err,
            Error::UnsupportedField { ref field, ref type_name, .. }
                if field == "display_name" && type_name == "demo.Record"
        ));
    }
}
