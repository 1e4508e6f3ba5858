//! # pbdyn-core
//!
//! Schema-on-read conversion of protobuf wire bytes to JSON.
//!
//! No generated message types are involved: the schema arrives at runtime as
//! a serialized `FileDescriptorSet`, and any message type it describes can be
//! decoded from its wire bytes.
//!
//! ## Architecture
//!
//! - [`descriptor`]: the [`Registry`] of message and enum types, parsed from
//!   descriptor-set bytes with this crate's own wire primitives
//! - [`decode`]: the [`Decoder`], which turns payload bytes into a
//!   [`DecodedMessage`] tree, keeping unknown fields
//! - [`project`]: the [`Projector`], which renders a decoded tree as a
//!   `serde_json` object following protobuf's JSON conventions
//! - [`convert`]: the [`Converter`], which runs all three over in-memory bytes
//! - [`wire`]: low-level varint, tag and length-delimited reading
//! - [`error`]: error types and handling
//!
//! The crate performs no I/O. Fetching schema and payload bytes is left to
//! the caller.
//!
//! ## Example
//!
//! ```no_run
//! use pbdyn_core::Converter;
//! use std::fs;
//!
//! let schema = fs::read("./schemas/orders.pb")?;
//! let payload = fs::read("./order.bin")?;
//!
//! let converter = Converter::from_schema_bytes(&schema)?;
//! let json = converter.convert("shop.v1.Order", &payload)?;
//! println!("{}", serde_json::Value::Object(json));
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! ## Diagnostics
//!
//! Implement [`Observer`] to watch fields, unknown fields, packed runs and map
//! entries as they are decoded; [`StatsObserver`] counts them.

#![deny(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unreachable_pub)]

pub mod convert;
pub mod decode;
pub mod descriptor;
pub mod error;
pub mod observer;
pub mod project;
pub mod wire;

// Re-export primary types for convenience
pub use convert::Converter;
pub use decode::{
    DecodedMessage, DecodedValue, Decoder, DecoderConfig, ScalarValue, UnknownField,
};
pub use descriptor::{
    Cardinality, DuplicatePolicy, EnumDescriptor, EnumIndex, FieldDescriptor, FieldKind,
    MessageDescriptor, MessageIndex, Registry, RegistryConfig,
};
pub use error::{Error, Result, WireFormatError};
pub use observer::{NullObserver, Observer, StatsObserver};
pub use project::{FieldNaming, JsonObject, Projector, ProjectorConfig};
pub use wire::MAX_FIELD_NUMBER;

/// Crate version for programmatic access
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
