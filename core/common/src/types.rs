//! Common types used throughout the gateway.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Type tag naming what kind of record an entity is.
///
/// A kind is always a single path component.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct EntityKind(String);

impl EntityKind {
    /// Create a new EntityKind from a string.
    ///
    /// # Errors
    /// - Returns error if the tag is empty, contains a separator or is `.`/`..`
    pub fn new(kind: impl Into<String>) -> crate::Result<Self> {
        let kind = kind.into();
        if kind.trim().is_empty() {
            return Err(crate::Error::InvalidInput(
                "EntityKind cannot be empty".to_string(),
            ));
        }
        StorePath::check_component(&kind).map_err(|_| {
            crate::Error::InvalidInput(format!(
                "EntityKind '{}' must be a single path component",
                kind
            ))
        })?;
        Ok(Self(kind))
    }

    /// Get the inner string value.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for EntityKind {
    type Error = crate::Error;

    fn try_from(kind: String) -> crate::Result<Self> {
        Self::new(kind)
    }
}

impl From<EntityKind> for String {
    fn from(kind: EntityKind) -> Self {
        kind.0
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a single record, either textual or numeric.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EntityId {
    Number(i64),
    Text(String),
}

impl EntityId {
    /// Render the identifier as one path segment.
    ///
    /// # Errors
    /// - Empty identifiers and identifiers containing separators are rejected
    pub fn to_segment(&self) -> crate::Result<String> {
        match self {
            EntityId::Number(n) => Ok(n.to_string()),
            EntityId::Text(s) => {
                if s.is_empty() {
                    return Err(crate::Error::InvalidInput(
                        "EntityId cannot be empty".to_string(),
                    ));
                }
                if s == "." || s == ".." || s.contains('/') || s.contains('\\') {
                    return Err(crate::Error::InvalidInput(format!(
                        "EntityId '{}' cannot contain separators",
                        s
                    )));
                }
                Ok(s.clone())
            }
        }
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityId::Number(n) => write!(f, "{}", n),
            EntityId::Text(s) => write!(f, "{}", s),
        }
    }
}

impl From<&str> for EntityId {
    fn from(value: &str) -> Self {
        EntityId::Text(value.to_string())
    }
}

impl From<String> for EntityId {
    fn from(value: String) -> Self {
        EntityId::Text(value)
    }
}

impl From<i64> for EntityId {
    fn from(value: i64) -> Self {
        EntityId::Number(value)
    }
}

/// Names "what" to fetch or store, independent of the backend serving it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityDescriptor {
    pub kind: EntityKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<EntityId>,
}

impl EntityDescriptor {
    /// Descriptor for a kind without an identifier.
    pub fn of(kind: EntityKind) -> Self {
        Self { kind, id: None }
    }

    /// Descriptor for one identified record of a kind.
    pub fn with_id(kind: EntityKind, id: impl Into<EntityId>) -> Self {
        Self {
            kind,
            id: Some(id.into()),
        }
    }

    /// Parse `kind` or `kind/id` into a descriptor.
    pub fn parse(value: &str) -> crate::Result<Self> {
        match value.split_once('/') {
            Some((kind, id)) => Ok(Self::with_id(EntityKind::new(kind)?, id)),
            None => Ok(Self::of(EntityKind::new(value)?)),
        }
    }

    /// Descriptor for the entity type `T`.
    pub fn for_type<T: Entity>() -> crate::Result<Self> {
        Ok(Self::of(EntityKind::new(T::KIND)?))
    }

    /// Descriptor for a concrete entity value, carrying its own identifier.
    pub fn for_value<T: Entity>(value: &T) -> crate::Result<Self> {
        Ok(Self {
            kind: EntityKind::new(T::KIND)?,
            id: value.entity_id(),
        })
    }

    /// Same kind, different identifier.
    pub fn with_entity_id(&self, id: impl Into<EntityId>) -> Self {
        Self {
            kind: self.kind.clone(),
            id: Some(id.into()),
        }
    }
}

impl fmt::Display for EntityDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.id {
            Some(id) => write!(f, "{}/{}", self.kind, id),
            None => write!(f, "{}", self.kind),
        }
    }
}

/// A serializable record type known to the gateway's resolution table.
pub trait Entity: Serialize + DeserializeOwned + Send + Sync {
    /// Type tag under which the resolution rule for this entity is registered.
    const KIND: &'static str;

    /// The entity's own identifier, if it has one.
    fn entity_id(&self) -> Option<EntityId> {
        None
    }
}

/// A slash-separated location inside one backend.
///
/// Paths are relative (no leading separator); the empty path is the root.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StorePath {
    components: Vec<String>,
}

impl StorePath {
    /// Create a root path.
    pub fn root() -> Self {
        Self {
            components: Vec::new(),
        }
    }

    /// Create a path from string components.
    ///
    /// # Errors
    /// - Returns error if any component is empty or contains a separator
    pub fn from_components(components: Vec<String>) -> crate::Result<Self> {
        for comp in &components {
            Self::check_component(comp)?;
        }
        Ok(Self { components })
    }

    /// Parse a path string, using '/' as separator.
    pub fn parse(path: &str) -> crate::Result<Self> {
        let path = path.trim_matches('/');
        if path.is_empty() {
            return Ok(Self::root());
        }

        let components: Vec<String> = path.split('/').map(String::from).collect();
        Self::from_components(components)
    }

    pub fn is_root(&self) -> bool {
        self.components.is_empty()
    }

    /// Get the parent path, if any.
    pub fn parent(&self) -> Option<Self> {
        if self.is_root() {
            None
        } else {
            let mut components = self.components.clone();
            components.pop();
            Some(Self { components })
        }
    }

    /// Get the last component.
    pub fn name(&self) -> Option<&str> {
        self.components.last().map(|s| s.as_str())
    }

    /// Join this path with a child component.
    pub fn join(&self, child: &str) -> crate::Result<Self> {
        Self::check_component(child)?;
        let mut components = self.components.clone();
        components.push(child.to_string());
        Ok(Self { components })
    }

    /// Join this path with an entity identifier.
    pub fn join_id(&self, id: &EntityId) -> crate::Result<Self> {
        self.join(&id.to_segment()?)
    }

    pub fn components(&self) -> &[String] {
        &self.components
    }

    /// Number of components.
    pub fn depth(&self) -> usize {
        self.components.len()
    }

    /// Whether `self` lies strictly below `ancestor`.
    pub fn is_descendant_of(&self, ancestor: &StorePath) -> bool {
        self.components.len() > ancestor.components.len()
            && self.components.starts_with(&ancestor.components)
    }

    /// Convert to a string representation without a leading separator.
    pub fn to_string_path(&self) -> String {
        self.components.join("/")
    }

    fn check_component(comp: &str) -> crate::Result<()> {
        if comp.is_empty() {
            return Err(crate::Error::InvalidInput(
                "Path component cannot be empty".to_string(),
            ));
        }
        if comp.contains('/') || comp.contains('\\') {
            return Err(crate::Error::InvalidInput(
                "Path component cannot contain separators".to_string(),
            ));
        }
        if comp == "." || comp == ".." {
            return Err(crate::Error::InvalidInput(format!(
                "Path component cannot be '{}'",
                comp
            )));
        }
        Ok(())
    }
}

impl fmt::Display for StorePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_root() {
            f.write_str("/")
        } else {
            f.write_str(&self.to_string_path())
        }
    }
}

/// Secret string that zeroizes on drop.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SecretString(String);

impl SecretString {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Expose the secret value.
    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for SecretString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SecretString([REDACTED; {} bytes])", self.0.len())
    }
}

impl From<&str> for SecretString {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[derive(Serialize, Deserialize)]
    struct Profile {
        id: String,
        name: String,
    }

    impl Entity for Profile {
        const KIND: &'static str = "profile";

        fn entity_id(&self) -> Option<EntityId> {
            Some(EntityId::from(self.id.as_str()))
        }
    }

    #[test]
    fn test_entity_kind_empty_fails() {
        assert!(EntityKind::new("").is_err());
        assert!(EntityKind::new("  ").is_err());
    }

    #[test]
    fn test_entity_kind_is_single_component() {
        for bad in ["/tmp/x", "a/b", "a\\b", ".", ".."] {
            assert!(EntityKind::new(bad).is_err(), "{bad}");
        }
        assert!(serde_json::from_str::<EntityKind>("\"/tmp/x\"").is_err());

        let kind: EntityKind = serde_json::from_str("\"profile\"").unwrap();
        assert_eq!(kind.as_str(), "profile");
        assert_eq!(serde_json::to_string(&kind).unwrap(), "\"profile\"");
        assert!(EntityDescriptor::parse("../u1").is_err());
    }

    #[test]
    fn test_entity_id_segments() {
        assert_eq!(EntityId::from(42i64).to_segment().unwrap(), "42");
        assert_eq!(EntityId::from("u1").to_segment().unwrap(), "u1");
        assert!(EntityId::from("a/b").to_segment().is_err());
        assert!(EntityId::from("").to_segment().is_err());
    }

    #[test]
    fn test_entity_id_untagged_serde() {
        let id: EntityId = serde_json::from_str("7").unwrap();
        assert_eq!(id, EntityId::Number(7));
        let id: EntityId = serde_json::from_str("\"u1\"").unwrap();
        assert_eq!(id, EntityId::Text("u1".to_string()));
    }

    #[test]
    fn test_descriptor_from_value() {
        let profile = Profile {
            id: "u1".to_string(),
            name: "Ann".to_string(),
        };
        let descriptor = EntityDescriptor::for_value(&profile).unwrap();
        assert_eq!(descriptor.kind.as_str(), "profile");
        assert_eq!(descriptor.id, Some(EntityId::from("u1")));
        assert_eq!(descriptor.to_string(), "profile/u1");
    }

    #[test]
    fn test_descriptor_parse() {
        let descriptor = EntityDescriptor::parse("profile/u1").unwrap();
        assert_eq!(descriptor.id, Some(EntityId::from("u1")));
        let descriptor = EntityDescriptor::parse("settings").unwrap();
        assert!(descriptor.id.is_none());
    }

    #[test]
    fn test_store_path_parse_and_join() {
        let path = StorePath::parse("/users/u1/").unwrap();
        assert_eq!(path.components(), &["users", "u1"]);
        assert_eq!(path.to_string(), "users/u1");

        let child = path.join_id(&EntityId::from(3i64)).unwrap();
        assert_eq!(child.to_string_path(), "users/u1/3");
        assert!(child.is_descendant_of(&path));
        assert!(!path.is_descendant_of(&child));
        assert_eq!(child.parent().unwrap(), path);
    }

    #[test]
    fn test_store_path_root() {
        let root = StorePath::parse("/").unwrap();
        assert!(root.is_root());
        assert_eq!(root.to_string(), "/");
        assert!(root.parent().is_none());
    }

    #[test]
    fn test_store_path_rejects_traversal() {
        assert!(StorePath::parse("users/../etc").is_err());
        assert!(StorePath::root().join(".").is_err());
    }

    #[test]
    fn test_secret_string_debug_redacted() {
        let secret = SecretString::new("hunter2");
        assert!(!format!("{:?}", secret).contains("hunter2"));
        assert_eq!(secret.expose(), "hunter2");
    }

    proptest! {
        #[test]
        fn prop_store_path_roundtrips(parts in prop::collection::vec("[a-z0-9_-]{1,8}", 0..6)) {
            let joined = parts.join("/");
            let path = StorePath::parse(&joined).unwrap();
            prop_assert_eq!(path.to_string_path(), joined);
            prop_assert_eq!(path.depth(), parts.len());
        }
    }
}
