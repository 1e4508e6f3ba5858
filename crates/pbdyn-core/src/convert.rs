//! One-call conversion: registry lookup, decode, project.

use crate::decode::{Decoder, DecoderConfig};
use crate::descriptor::{Registry, RegistryConfig};
use crate::error::Result;
use crate::observer::{NullObserver, Observer};
use crate::project::{JsonObject, Projector, ProjectorConfig};
use std::sync::Arc;
use tracing::debug;

/// Converts payloads of any type in one registry to JSON.
///
/// The registry is shared through an [`Arc`], so converters for the same
/// schema can be cloned cheaply and used from several threads.
#[derive(Debug, Clone)]
pub struct Converter {
    registry: Arc<Registry>,
    decoder: DecoderConfig,
    projector: ProjectorConfig,
}

impl Converter {
    /// Creates a converter over an already-built registry
    pub fn new(registry: Arc<Registry>) -> Self {
        Self {
            registry,
            decoder: DecoderConfig::default(),
            projector: ProjectorConfig::default(),
        }
    }

    /// Builds a registry from descriptor-set bytes and wraps it
    pub fn from_schema_bytes(schema: &[u8]) -> Result<Self> {
        Self::from_schema_bytes_with_config(schema, &RegistryConfig::default())
    }

    /// Like [`Converter::from_schema_bytes`] with custom registry configuration
    pub fn from_schema_bytes_with_config(schema: &[u8], config: &RegistryConfig) -> Result<Self> {
        Ok(Self::new(Arc::new(Registry::build_with_config(schema, config)?)))
    }

    /// Sets the decoder configuration
    pub fn decoder_config(mut self, config: DecoderConfig) -> Self {
        self.decoder = config;
        self
    }

    /// Sets the projector configuration
    pub fn projector_config(mut self, config: ProjectorConfig) -> Self {
        self.projector = config;
        self
    }

    /// The shared registry
    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Decodes `payload` as `root_type` and projects it to JSON
    pub fn convert(&self, root_type: &str, payload: &[u8]) -> Result<JsonObject> {
        self.convert_with_observer(root_type, payload, &mut NullObserver)
    }

    /// Like [`Converter::convert`], reporting decode and projection events
    pub fn convert_with_observer(
        &self,
        root_type: &str,
        payload: &[u8],
        observer: &mut dyn Observer,
    ) -> Result<JsonObject> {
        let desc = self.registry.resolve(root_type)?;
        let decoded = Decoder::with_config(&self.registry, self.decoder.clone())
            .decode_with_observer(desc, payload, observer)?;
        let json = Projector::with_config(&self.registry, self.projector.clone())
            .project_with_observer(&decoded, desc, observer)?;
        debug!("Converted {} ({} bytes)", desc.full_name(), payload.len());
        Ok(json)
    }
}

/// Converts `payload` to JSON with a registry built from `schema`
pub fn convert(schema: &[u8], root_type: &str, payload: &[u8]) -> Result<JsonObject> {
    Converter::from_schema_bytes(schema)?.convert(root_type, payload)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::testing::{field, message, registry};
    use crate::error::Error;
    use crate::observer::StatsObserver;
    use serde_json::json;

    #[test]
    fn test_convert_and_type_not_found() {
        let registry = registry(
            "demo",
            vec![message(
                "Ping",
                vec![field("seq", 1, 1, 13, None), field("note", 2, 1, 9, None)],
            )],
            vec![],
        );
        let converter = Converter::new(Arc::new(registry));

        let mut stats = StatsObserver::default();
        let out = converter
            .convert_with_observer("demo.Ping", &[0x08, 0x05, 0x18, 0x01], &mut stats)
            .unwrap();
        assert_eq!(serde_json::Value::Object(out), json!({ "seq": 5 }));
        assert_eq!(stats.unknown_field_count, 1);
        assert_eq!(stats.unknown_dropped_count, 1);

        let err = converter.convert("demo.Pong", &[]).unwrap_err();
        assert!(matches!(err, Error::TypeNotFound { ref type_name, .. } if type_name == "demo.Pong"));
    }

    #[test]
    fn test_converter_is_shareable() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Converter>();
        assert_send_sync::<Registry>();
    }
}
