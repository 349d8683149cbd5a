//! Address resolution from logical entity descriptors.
//!
//! Resolution is a pure table lookup: every entity kind has exactly one
//! rule naming its backend, its shape and its base path.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use unigate_common::{Address, BackendKind, EntityDescriptor, EntityKind, Error, Result, StorePath};

/// How descriptors of one kind map onto addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Shape {
    /// Every descriptor of the kind resolves to the same address; ids are ignored.
    Singleton,
    /// The base path is a container and the descriptor's id selects an item.
    #[default]
    Collection,
}

/// One row of the resolution table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolutionRule {
    pub kind: EntityKind,
    pub backend: BackendKind,
    #[serde(default)]
    pub shape: Shape,
    /// Store path, or callable name / URL for RPC rules.
    pub path: String,
}

impl ResolutionRule {
    pub fn new(kind: &str, backend: BackendKind, shape: Shape, path: &str) -> Result<Self> {
        Ok(Self {
            kind: EntityKind::new(kind)?,
            backend,
            shape,
            path: path.to_string(),
        })
    }

    pub fn collection(kind: &str, backend: BackendKind, path: &str) -> Result<Self> {
        Self::new(kind, backend, Shape::Collection, path)
    }

    pub fn singleton(kind: &str, backend: BackendKind, path: &str) -> Result<Self> {
        Self::new(kind, backend, Shape::Singleton, path)
    }

    /// Callable rule for the RPC backend.
    pub fn callable(kind: &str, target: &str) -> Result<Self> {
        Self::new(kind, BackendKind::Rpc, Shape::Singleton, target)
    }
}

#[derive(Debug, Clone)]
struct CompiledRule {
    rule: ResolutionRule,
    base: StorePath,
}

/// Maps entity descriptors to backend addresses.
#[derive(Debug, Clone, Default)]
pub struct AddressResolver {
    rules: BTreeMap<EntityKind, CompiledRule>,
}

impl AddressResolver {
    /// Create an empty resolver.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a resolver from a rule table.
    ///
    /// # Errors
    /// - Two rules for the same kind
    /// - A store path that does not parse, or an empty callable target
    pub fn from_rules(rules: impl IntoIterator<Item = ResolutionRule>) -> Result<Self> {
        rules
            .into_iter()
            .try_fold(Self::new(), |resolver, rule| resolver.with_rule(rule))
    }

    /// Add one rule.
    pub fn with_rule(mut self, rule: ResolutionRule) -> Result<Self> {
        if self.rules.contains_key(&rule.kind) {
            return Err(Error::InvalidInput(format!(
                "Entity kind '{}' already has a resolution rule",
                rule.kind
            )));
        }

        let base = match rule.backend {
            BackendKind::Rpc => {
                if rule.path.trim().is_empty() {
                    return Err(Error::InvalidInput(format!(
                        "Callable target for '{}' cannot be empty",
                        rule.kind
                    )));
                }
                StorePath::root()
            }
            _ => StorePath::parse(&rule.path)?,
        };

        self.rules
            .insert(rule.kind.clone(), CompiledRule { rule, base });
        Ok(self)
    }

    /// Resolve a descriptor to its address.
    ///
    /// # Errors
    /// - `UnsupportedType` when no rule exists for the descriptor's kind
    /// - `InvalidInput` when the identifier cannot form a path segment, or a
    ///   blob collection is addressed without an identifier
    pub fn resolve(&self, descriptor: &EntityDescriptor) -> Result<Address> {
        let compiled = self.lookup(&descriptor.kind)?;
        let rule = &compiled.rule;
        let base = &compiled.base;

        let item = match (rule.shape, &descriptor.id) {
            (Shape::Collection, Some(id)) => Some(id),
            _ => None,
        };

        match rule.backend {
            BackendKind::Document => match item {
                Some(id) => Ok(Address::Document(base.join_id(id)?)),
                None if rule.shape == Shape::Singleton => Ok(Address::Document(base.clone())),
                None => Ok(Address::Collection(base.clone())),
            },
            BackendKind::Tree => match item {
                Some(id) => Ok(Address::Tree(base.join_id(id)?)),
                None => Ok(Address::Tree(base.clone())),
            },
            BackendKind::Blob => match item {
                Some(id) => Ok(Address::Blob(base.join_id(id)?)),
                None if rule.shape == Shape::Singleton => Ok(Address::Blob(base.clone())),
                None => Err(Error::InvalidInput(format!(
                    "Blob address for '{}' requires an identifier",
                    descriptor.kind
                ))),
            },
            BackendKind::Rpc => match item {
                Some(id) => Ok(Address::Callable(format!(
                    "{}/{}",
                    rule.path.trim_end_matches('/'),
                    id.to_segment()?
                ))),
                None => Ok(Address::Callable(rule.path.clone())),
            },
        }
    }

    /// Path of a single document.
    pub fn resolve_document(&self, descriptor: &EntityDescriptor) -> Result<StorePath> {
        match self.resolve(descriptor)? {
            Address::Document(path) => Ok(path),
            Address::Collection(path) => Err(Error::InvalidInput(format!(
                "Descriptor '{}' names the collection {} rather than a document",
                descriptor, path
            ))),
            other => Err(Self::wrong_backend(descriptor, BackendKind::Document, &other)),
        }
    }

    /// Collection in which new documents of this kind are allocated.
    pub fn resolve_collection(&self, descriptor: &EntityDescriptor) -> Result<StorePath> {
        let compiled = self.lookup(&descriptor.kind)?;
        if compiled.rule.backend != BackendKind::Document || compiled.rule.shape != Shape::Collection
        {
            return Err(Error::InvalidInput(format!(
                "Entity kind '{}' is not a document collection",
                descriptor.kind
            )));
        }
        Ok(compiled.base.clone())
    }

    pub fn resolve_tree(&self, descriptor: &EntityDescriptor) -> Result<StorePath> {
        match self.resolve(descriptor)? {
            Address::Tree(path) => Ok(path),
            other => Err(Self::wrong_backend(descriptor, BackendKind::Tree, &other)),
        }
    }

    pub fn resolve_blob(&self, descriptor: &EntityDescriptor) -> Result<StorePath> {
        match self.resolve(descriptor)? {
            Address::Blob(path) => Ok(path),
            other => Err(Self::wrong_backend(descriptor, BackendKind::Blob, &other)),
        }
    }

    pub fn resolve_callable(&self, descriptor: &EntityDescriptor) -> Result<String> {
        match self.resolve(descriptor)? {
            Address::Callable(target) => Ok(target),
            other => Err(Self::wrong_backend(descriptor, BackendKind::Rpc, &other)),
        }
    }

    /// Rule registered for `kind`, if any.
    pub fn rule(&self, kind: &EntityKind) -> Option<&ResolutionRule> {
        self.rules.get(kind).map(|compiled| &compiled.rule)
    }

    /// Registered kinds, in sorted order.
    pub fn kinds(&self) -> Vec<&EntityKind> {
        self.rules.keys().collect()
    }

    /// The full rule table.
    pub fn rules(&self) -> Vec<ResolutionRule> {
        self.rules.values().map(|c| c.rule.clone()).collect()
    }

    /// Fail fast when any of `kinds` lacks a rule.
    pub fn ensure_registered<'a>(&self, kinds: impl IntoIterator<Item = &'a str>) -> Result<()> {
        for kind in kinds {
            self.lookup(&EntityKind::new(kind)?)?;
        }
        Ok(())
    }

    fn lookup(&self, kind: &EntityKind) -> Result<&CompiledRule> {
        self.rules.get(kind).ok_or_else(|| {
            Error::UnsupportedType(format!("No resolution rule for entity kind '{}'", kind))
        })
    }

    fn wrong_backend(descriptor: &EntityDescriptor, expected: BackendKind, actual: &Address) -> Error {
        Error::InvalidInput(format!(
            "Entity '{}' resolves to {} but a {} address was required",
            descriptor, actual, expected
        ))
    }
}
