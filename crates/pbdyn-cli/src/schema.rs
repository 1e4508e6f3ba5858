//! Schema references, schema fetching and the registry cache.

use anyhow::{anyhow, bail, Context, Result};
use pbdyn_core::{Registry, RegistryConfig};
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, trace};
use url::Url;

/// A `<location>#<MessageType>` reference, as carried in `dataschema`
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SchemaRef {
    /// URI or path of the descriptor set
    pub(crate) location: String,
    /// Message type from the fragment, if any
    pub(crate) type_name: Option<String>,
}

impl SchemaRef {
    pub(crate) fn parse(reference: &str) -> Result<Self> {
        let (location, fragment) = match reference.rsplit_once('#') {
            Some((location, fragment)) => (location, Some(fragment)),
            None => (reference, None),
        };
        if location.is_empty() {
            bail!("Schema reference '{}' has no location", reference);
        }
        Ok(Self {
            location: location.to_string(),
            type_name: fragment
                .filter(|f| !f.is_empty())
                .map(str::to_string),
        })
    }

    /// Picks the root type name: the explicit override, else the fragment,
    /// qualified with `package` when it is a simple name
    pub(crate) fn root_type(&self, explicit: Option<&str>, package: Option<&str>) -> Result<String> {
        let name = explicit
            .or(self.type_name.as_deref())
            .ok_or_else(|| {
                anyhow!(
                    "No message type for schema '{}': add '#<Type>' or pass --message-type",
                    self.location
                )
            })?;
        let name = name.strip_prefix('.').unwrap_or(name);

        Ok(match package {
            Some(package) if !package.is_empty() && !name.contains('.') => {
                format!("{}.{}", package.trim_end_matches('.'), name)
            }
            _ => name.to_string(),
        })
    }
}

/// Reads descriptor-set bytes from a `file://` URI or a filesystem path
pub(crate) fn fetch(location: &str) -> Result<Vec<u8>> {
    let path = match Url::parse(location) {
        Ok(url) if url.scheme() == "file" => match url.host_str() {
            // file://relative/dir/set.pb names a path relative to the working directory
            Some(host) if !host.is_empty() && host != "localhost" => {
                PathBuf::from(&location["file://".len()..])
            }
            _ => url
                .to_file_path()
                .map_err(|()| anyhow!("Cannot map '{}' to a local path", location))?,
        },
        // single letters are Windows drive prefixes, not schemes
        Ok(url) if url.scheme().len() > 1 => {
            bail!(
                "Unsupported schema URI scheme '{}' in '{}': only file:// URIs and paths are supported",
                url.scheme(),
                location
            )
        }
        _ => PathBuf::from(location),
    };

    trace!("Reading schema from {}", path.display());
    fs::read(&path).with_context(|| format!("Failed to read schema: {}", path.display()))
}

/// Registries shared by schema content, so equal descriptor sets are built once
#[derive(Debug, Default)]
pub(crate) struct RegistryCache {
    config: RegistryConfig,
    locations: HashMap<String, blake3::Hash>,
    registries: HashMap<blake3::Hash, Arc<Registry>>,
}

impl RegistryCache {
    pub(crate) fn new(config: RegistryConfig) -> Self {
        Self {
            config,
            ..Default::default()
        }
    }

    pub(crate) fn get(&mut self, location: &str) -> Result<Arc<Registry>> {
        if let Some(registry) = self
            .locations
            .get(location)
            .and_then(|hash| self.registries.get(hash))
        {
            trace!("Registry cache hit for {}", location);
            return Ok(Arc::clone(registry));
        }

        let bytes = fetch(location)?;
        let hash = blake3::hash(&bytes);
        self.locations.insert(location.to_string(), hash);

        if let Some(registry) = self.registries.get(&hash) {
            debug!(
                "Schema {} has the same content as a cached one ({})",
                location,
                &hash.to_hex()[..8]
            );
            return Ok(Arc::clone(registry));
        }

        let registry = Arc::new(
            Registry::build_with_config(&bytes, &self.config)
                .with_context(|| format!("Failed to load schema: {}", location))?,
        );
        debug!(
            "Loaded schema {} ({} bytes, {} message types)",
            location,
            bytes.len(),
            registry.messages().count()
        );
        self.registries.insert(hash, Arc::clone(&registry));
        Ok(registry)
    }

    /// Number of distinct registries built
    pub(crate) fn len(&self) -> usize {
        self.registries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_parse_schema_ref() {
        let r = SchemaRef::parse("file:///schemas/root.pb#shop.Order").unwrap();
        assert_eq!(r.location, "file:///schemas/root.pb");
        assert_eq!(r.type_name.as_deref(), Some("shop.Order"));

        let r = SchemaRef::parse("build/root.pb").unwrap();
        assert_eq!(r.location, "build/root.pb");
        assert_eq!(r.type_name, None);

        assert_eq!(SchemaRef::parse("root.pb#").unwrap().type_name, None);
        assert!(SchemaRef::parse("#shop.Order").is_err());
    }

    #[test]
    fn test_root_type() {
        let r = SchemaRef::parse("root.pb#Order").unwrap();
        assert_eq!(r.root_type(None, None).unwrap(), "Order");
        assert_eq!(r.root_type(None, Some("shop.v1")).unwrap(), "shop.v1.Order");
        assert_eq!(r.root_type(Some(".other.Thing"), Some("shop")).unwrap(), "other.Thing");

        let bare = SchemaRef::parse("root.pb").unwrap();
        assert!(bare.root_type(None, Some("shop")).is_err());
        assert_eq!(bare.root_type(Some("Order"), Some("shop")).unwrap(), "shop.Order");
    }

    #[test]
    fn test_fetch_paths_and_uris() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("set.pb");
        fs::write(&path, [1u8, 2, 3]).unwrap();

        assert_eq!(fetch(path.to_str().unwrap()).unwrap(), vec![1, 2, 3]);
        let uri = Url::from_file_path(&path).unwrap();
        assert_eq!(fetch(uri.as_str()).unwrap(), vec![1, 2, 3]);

        let err = fetch("https://example.com/set.pb").unwrap_err();
        assert!(err.to_string().contains("https"));
        assert!(fetch(temp_dir.path().join("missing.pb").to_str().unwrap()).is_err());
    }

    #[test]
    fn test_cache_shares_equal_content() {
        let temp_dir = TempDir::new().unwrap();
        let a = temp_dir.path().join("a.pb");
        let b = temp_dir.path().join("b.pb");
        // an empty descriptor set is valid
        fs::write(&a, b"").unwrap();
        fs::write(&b, b"").unwrap();

        let mut cache = RegistryCache::new(RegistryConfig::default());
        let first = cache.get(a.to_str().unwrap()).unwrap();
        let second = cache.get(b.to_str().unwrap()).unwrap();
        let again = cache.get(a.to_str().unwrap()).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert!(Arc::ptr_eq(&first, &again));
        assert_eq!(cache.len(), 1);
    }
}
