//! Diagnostics hooks for decoding and projection.
//!
//! The [`Observer`] trait lets callers watch a conversion without the core
//! writing to any global output. Every method has a no-op default, so an
//! implementation only overrides what it needs.

use crate::decode::UnknownField;
use crate::descriptor::FieldDescriptor;
use crate::wire::Tag;

/// Receives events from the [`Decoder`](crate::Decoder) and
/// [`Projector`](crate::Projector).
///
/// # Example
///
/// ```
/// use pbdyn_core::{Observer, UnknownField};
///
/// #[derive(Default)]
/// struct UnknownLogger {
///     lines: Vec<String>,
/// }
///
/// impl Observer for UnknownLogger {
///     fn on_unknown_field(&mut self, type_name: &str, field: &UnknownField) {
///         self.lines.push(format!("{type_name}: unknown field {}", field.number));
///     }
/// }
/// ```
pub trait Observer {
    /// A message of `type_name` starts decoding at nesting `depth` (root is 0)
    fn on_message(&mut self, type_name: &str, depth: usize) {
        let _ = (type_name, depth);
    }

    /// A known field was read
    fn on_field(&mut self, field: &FieldDescriptor, tag: &Tag) {
        let _ = (field, tag);
    }

    /// A field number absent from the schema was retained
    fn on_unknown_field(&mut self, type_name: &str, field: &UnknownField) {
        let _ = (type_name, field);
    }

    /// A packed run of `count` values was unpacked
    fn on_packed_run(&mut self, field: &FieldDescriptor, count: usize) {
        let _ = (field, count);
    }

    /// A map entry was decoded
    fn on_map_entry(&mut self, field: &FieldDescriptor) {
        let _ = field;
    }

    /// The projector dropped `count` unknown fields of a `type_name` message
    fn on_unknown_dropped(&mut self, type_name: &str, count: usize) {
        let _ = (type_name, count);
    }
}

/// An observer that ignores everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NullObserver;

impl Observer for NullObserver {}

/// An observer that counts what it sees
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct StatsObserver {
    /// Messages decoded, root included
    pub message_count: usize,
    /// Known field occurrences read
    pub field_count: usize,
    /// Unknown field occurrences retained
    pub unknown_field_count: usize,
    /// Packed runs unpacked
    pub packed_run_count: usize,
    /// Values found inside packed runs
    pub packed_value_count: usize,
    /// Map entries decoded
    pub map_entry_count: usize,
    /// Deepest nesting level reached
    pub max_depth: usize,
    /// Unknown fields left out of the JSON output
    pub unknown_dropped_count: usize,
}

impl Observer for StatsObserver {
    fn on_message(&mut self, _type_name: &str, depth: usize) {
        self.message_count += 1;
        self.max_depth = self.max_depth.max(depth);
    }

    fn on_field(&mut self, _field: &FieldDescriptor, _tag: &Tag) {
        self.field_count += 1;
    }

    fn on_unknown_field(&mut self, _type_name: &str, _field: &UnknownField) {
        self.unknown_field_count += 1;
    }

    fn on_packed_run(&mut self, _field: &FieldDescriptor, count: usize) {
        self.packed_run_count += 1;
        self.packed_value_count += count;
    }

    fn on_map_entry(&mut self, _field: &FieldDescriptor) {
        self.map_entry_count += 1;
    }

    fn on_unknown_dropped(&mut self, _type_name: &str, count: usize) {
        self.unknown_dropped_count += count;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::WireType;
    use bytes::Bytes;

    #[test]
    fn test_null_observer() {
        let mut observer = NullObserver;
        observer.on_message("pkg.M", 0);
        observer.on_unknown_dropped("pkg.M", 3);
    }

    #[test]
    fn test_stats_observer() {
        let mut stats = StatsObserver::default();
        stats.on_message("pkg.M", 0);
        stats.on_message("pkg.N", 2);
        stats.on_unknown_field(
            "pkg.M",
            &UnknownField {
                number: 9,
                wire_type: WireType::Varint,
                offset: 0,
                data: Bytes::from_static(&[0x01]),
            },
        );
        stats.on_unknown_dropped("pkg.M", 1);

        assert_eq!(stats.message_count, 2);
        assert_eq!(stats.max_depth, 2);
        assert_eq!(stats.unknown_field_count, 1);
        assert_eq!(stats.unknown_dropped_count, 1);
    }
}
