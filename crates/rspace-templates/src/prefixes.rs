/*
 * prefixes.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! Expansion of namespace-prefixed partial names.
//!
//! Templates may reference remote partials by short name (`ex:card`). The
//! scanner hands those names to a [`PrefixResolver`], which returns the full
//! resource identifiers in the same order.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::{TemplateServiceError, TemplateServiceResult};

/// Expands prefixed short names into full resource identifiers.
pub trait PrefixResolver: Send + Sync {
    /// Resolve every name in `names`. The result has the same length and order.
    fn resolve_short_names(&self, names: &[String]) -> TemplateServiceResult<Vec<String>>;
}

/// A fixed prefix → namespace table.
///
/// Deserializes from a plain JSON object: `{"ex": "http://example.org/"}`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NamespaceRegistry {
    prefixes: IndexMap<String, String>,
}

impl NamespaceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>, namespace: impl Into<String>) -> Self {
        self.register(prefix, namespace);
        self
    }

    pub fn register(&mut self, prefix: impl Into<String>, namespace: impl Into<String>) {
        self.prefixes.insert(prefix.into(), namespace.into());
    }

    pub fn namespace(&self, prefix: &str) -> Option<&str> {
        self.prefixes.get(prefix).map(String::as_str)
    }

    /// Expand a single `prefix:local` name.
    pub fn expand(&self, name: &str) -> TemplateServiceResult<String> {
        let (prefix, local) = name.split_once(':').unwrap_or(("", name));
        match self.prefixes.get(prefix) {
            Some(namespace) => Ok(format!("{namespace}{local}")),
            None => Err(TemplateServiceError::UnknownPrefix {
                prefix: prefix.to_string(),
                name: name.to_string(),
            }),
        }
    }
}

impl PrefixResolver for NamespaceRegistry {
    fn resolve_short_names(&self, names: &[String]) -> TemplateServiceResult<Vec<String>> {
        names.iter().map(|name| self.expand(name)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_expand_known_prefix() {
        let registry = NamespaceRegistry::new().with_prefix("ex", "http://example.org/templates/");
        assert_eq!(
            registry
                .resolve_short_names(&["ex:card".to_string(), "ex:".to_string()])
                .unwrap(),
            vec![
                "http://example.org/templates/card".to_string(),
                "http://example.org/templates/".to_string()
            ]
        );
    }

    #[test]
    fn test_unknown_prefix() {
        let err = NamespaceRegistry::new().expand("nope:card").unwrap_err();
        assert_eq!(err.to_string(), "Unknown namespace prefix 'nope' in 'nope:card'");
    }

    #[test]
    fn test_deserialize_from_object() {
        let registry: NamespaceRegistry =
            serde_json::from_str(r#"{"ex": "http://example.org/", "Platform": "urn:platform:"}"#)
                .unwrap();
        assert_eq!(registry.namespace("Platform"), Some("urn:platform:"));
        assert_eq!(registry.expand("ex:a").unwrap(), "http://example.org/a");
    }
}
