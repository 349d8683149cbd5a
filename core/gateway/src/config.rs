//! Gateway configuration.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use unigate_common::{Error, Result};
use unigate_storage::{create_default_registries, BackendContext, BackendsConfig};

use crate::paths::DirectoryPathResolver;
use crate::resolver::{AddressResolver, ResolutionRule};

/// Resolution table, backend selection and local download directory.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default)]
    pub entities: Vec<ResolutionRule>,
    #[serde(flatten)]
    pub backends: BackendsConfig,
    /// Where downloaded blobs land. Defaults to the platform cache dir.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub downloads_dir: Option<PathBuf>,
}

impl GatewayConfig {
    /// Serialize config to JSON.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| Error::InvalidInput(format!("Failed to serialize config: {}", e)))
    }

    /// Deserialize config from JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| Error::InvalidInput(format!("Failed to parse config: {}", e)))
    }

    /// Read and parse a config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| {
            Error::InvalidInput(format!("Failed to read config {}: {}", path.display(), e))
        })?;
        Self::from_json(&json)
    }

    /// Compile the resolution table.
    pub fn resolver(&self) -> Result<AddressResolver> {
        AddressResolver::from_rules(self.entities.iter().cloned())
    }

    /// Construct every backend session through the built-in registries.
    pub fn build_context(&self) -> Result<BackendContext> {
        create_default_registries().build_context(&self.backends)
    }

    pub fn path_resolver(&self) -> DirectoryPathResolver {
        match &self.downloads_dir {
            Some(dir) => DirectoryPathResolver::new(dir),
            None => DirectoryPathResolver::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;
    use unigate_common::{BackendKind, EntityDescriptor};
    use unigate_storage::BackendSpec;

    fn sample() -> GatewayConfig {
        GatewayConfig {
            entities: vec![
                ResolutionRule::collection("profile", BackendKind::Document, "profiles").unwrap(),
                ResolutionRule::callable("greet", "greetUser").unwrap(),
            ],
            backends: BackendsConfig {
                rpc: BackendSpec::new("http", json!({"base_url": "https://api.example.com"})),
                ..BackendsConfig::default()
            },
            downloads_dir: Some(PathBuf::from("/tmp/unigate")),
        }
    }

    #[test]
    fn test_config_json_roundtrip() {
        let config = sample();
        let restored = GatewayConfig::from_json(&config.to_json().unwrap()).unwrap();
        assert_eq!(restored, config);
    }

    #[test]
    fn test_backends_are_flattened() {
        let config = GatewayConfig::from_json(
            r#"{
                "entities": [{"kind": "avatar", "backend": "blob", "path": "avatars"}],
                "document": {"provider": "local", "options": {"root": "/data/docs"}},
                "blob": {"provider": "memory"}
            }"#,
        )
        .unwrap();

        assert_eq!(config.backends.documents.provider, "local");
        assert_eq!(config.backends.blobs.provider, "memory");
        assert_eq!(config.backends.tree.provider, "memory");
        assert!(config.downloads_dir.is_none());

        let resolver = config.resolver().unwrap();
        let avatar = EntityDescriptor::parse("avatar/u1").unwrap();
        assert_eq!(resolver.resolve_blob(&avatar).unwrap().to_string_path(), "avatars/u1");
    }

    #[test]
    fn test_load_and_build() {
        let temp = TempDir::new().unwrap();
        let file = temp.path().join("gateway.json");
        let config = GatewayConfig {
            backends: BackendsConfig {
                documents: BackendSpec::new(
                    "local",
                    json!({"root": temp.path().join("docs").to_string_lossy()}),
                ),
                ..BackendsConfig::default()
            },
            ..sample()
        };
        std::fs::write(&file, config.to_json().unwrap()).unwrap();

        let loaded = GatewayConfig::load(&file).unwrap();
        let context = loaded.build_context().unwrap();
        assert_eq!(context.documents.name(), "local");
        assert_eq!(context.rpc.name(), "http");
    }

    #[test]
    fn test_bad_config_rejected() {
        assert!(GatewayConfig::from_json("{not json").is_err());
        assert!(GatewayConfig::load("/definitely/not/here.json").is_err());

        let unknown = GatewayConfig::from_json(r#"{"tree": {"provider": "etcd"}}"#).unwrap();
        assert!(unknown.build_context().is_err());

        let duplicate = GatewayConfig::from_json(
            r#"{"entities": [
                {"kind": "profile", "backend": "document", "path": "a"},
                {"kind": "profile", "backend": "tree", "path": "b"}
            ]}"#,
        )
        .unwrap();
        assert!(duplicate.resolver().is_err());

        let escaping = GatewayConfig::from_json(
            r#"{"entities": [{"kind": "/tmp/x", "backend": "blob", "path": "avatars"}]}"#,
        );
        assert!(escaping.is_err());
    }

    #[test]
    fn test_downloads_dir_default() {
        let config = GatewayConfig::default();
        assert_eq!(
            config.path_resolver().base(),
            DirectoryPathResolver::default_base().as_path()
        );
    }
}
