/*
 * scanner.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! Template parsing and partial reference discovery.
//!
//! [`parse_template`] parses a source string and walks the tree once to list
//! every partial it invokes by bare name. Names are classified as:
//!
//! - fully qualified identifiers (`http://…`, `https://…`, `urn:…`), kept as is;
//! - prefixed short names (`ex:card`), expanded through a [`PrefixResolver`];
//! - local names (`card`), kept as is.
//!
//! Prefixed names are also rewritten in the tree itself, so the renderer
//! looks partials up under the same full identifier the resolver registers
//! them with.

use std::collections::HashMap;
use std::sync::Arc;

use indexmap::IndexSet;
use rspace_handlebars::{Partial, PartialName, Template, Visitor, rewrite_partial_names, walk};

use crate::error::TemplateServiceResult;
use crate::prefixes::PrefixResolver;

/// Schemes that mark a name as an already fully qualified identifier.
pub const FULL_IRI_SCHEMES: &[&str] = &["http:", "https:", "urn:"];

/// A parsed template together with the partials it references.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedTemplate {
    /// The source text the tree was parsed from.
    pub source: String,
    pub ast: Arc<Template>,
    /// Deduplicated local names and full identifiers, in order of first use.
    pub references: Vec<String>,
}

/// Whether `name` is already a fully qualified resource identifier.
pub fn is_full_iri(name: &str) -> bool {
    FULL_IRI_SCHEMES.iter().any(|scheme| name.starts_with(scheme))
}

/// Whether `name` must be resolved remotely rather than from local partials.
pub fn is_remote_reference(name: &str) -> bool {
    name.contains(':') || is_full_iri(name)
}

#[derive(Default)]
struct ReferenceCollector {
    names: IndexSet<String>,
}

impl Visitor for ReferenceCollector {
    fn visit_partial(&mut self, partial: &Partial) {
        // `@partial-block` and friends are runtime constructs
        if let PartialName::Static(name) = &partial.name {
            if !name.starts_with('@') {
                self.names.insert(name.clone());
            }
        }
    }
}

/// Parse `source` and collect its partial references.
pub fn parse_template(
    source: &str,
    prefixes: &dyn PrefixResolver,
) -> TemplateServiceResult<ParsedTemplate> {
    let mut ast = Template::parse(source)?;

    let mut collector = ReferenceCollector::default();
    walk(&ast, &mut collector);

    let short_names: Vec<String> = collector
        .names
        .iter()
        .filter(|name| is_remote_reference(name) && !is_full_iri(name))
        .cloned()
        .collect();

    let expanded: HashMap<String, String> = if short_names.is_empty() {
        HashMap::new()
    } else {
        let full = prefixes.resolve_short_names(&short_names)?;
        short_names.into_iter().zip(full).collect()
    };

    if !expanded.is_empty() {
        rewrite_partial_names(&mut ast, &mut |name| expanded.get(name).cloned());
    }

    let references: IndexSet<String> = collector
        .names
        .into_iter()
        .map(|name| expanded.get(&name).cloned().unwrap_or(name))
        .collect();

    Ok(ParsedTemplate {
        source: source.to_string(),
        ast: Arc::new(ast),
        references: references.into_iter().collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prefixes::NamespaceRegistry;
    use pretty_assertions::assert_eq;

    fn prefixes() -> NamespaceRegistry {
        NamespaceRegistry::new()
            .with_prefix("ex", "http://example.org/t/")
            .with_prefix("Platform", "http://example.org/platform/")
    }

    fn references(source: &str) -> Vec<String> {
        parse_template(source, &prefixes()).unwrap().references
    }

    #[test]
    fn test_classification() {
        assert!(is_full_iri("http://example.org/a"));
        assert!(is_full_iri("https://example.org/a"));
        assert!(is_full_iri("urn:example:greeting"));
        assert!(!is_full_iri("ex:card"));

        assert!(is_remote_reference("ex:card"));
        assert!(is_remote_reference("urn:example:greeting"));
        assert!(!is_remote_reference("card"));
    }

    #[test]
    fn test_collects_local_and_remote_references() {
        assert_eq!(
            references(
                "{{> header}}{{#each xs}}{{> ex:row}}{{/each}}\
                 {{#> urn:layout}}{{> header}}{{/urn:layout}}"
            ),
            vec!["header", "http://example.org/t/row", "urn:layout"]
        );
    }

    #[test]
    fn test_skips_runtime_and_dynamic_names() {
        assert_eq!(
            references("{{> @partial-block}}{{> (lookup . \"p\")}}{{> \"quoted\"}}{{> local}}"),
            vec!["local"]
        );
    }

    #[test]
    fn test_deduplicates_after_expansion() {
        assert_eq!(
            references("{{> ex:a}}{{> http://example.org/t/a}}{{> ex:a}}"),
            vec!["http://example.org/t/a"]
        );
    }

    #[test]
    fn test_rewrites_prefixed_names_in_tree() {
        let parsed = parse_template("{{> Platform:nav}}", &prefixes()).unwrap();

        let mut collector = ReferenceCollector::default();
        walk(&parsed.ast, &mut collector);
        assert_eq!(
            collector.names.into_iter().collect::<Vec<_>>(),
            vec!["http://example.org/platform/nav"]
        );
        assert_eq!(parsed.source, "{{> Platform:nav}}");
    }

    #[test]
    fn test_unknown_prefix_fails() {
        let err = parse_template("{{> nope:x}}", &prefixes()).unwrap_err();
        assert_eq!(err.to_string(), "Unknown namespace prefix 'nope' in 'nope:x'");
    }

    #[test]
    fn test_parse_errors_surface_unwrapped() {
        let err = parse_template("{{#if x}}", &prefixes()).unwrap_err();
        assert!(matches!(
            err,
            crate::error::TemplateServiceError::Template(
                rspace_handlebars::TemplateError::Parse { .. }
            )
        ));
    }
}
