/*
 * integration_tests.rs
 * Copyright (c) 2025 Posit, PBC
 *
 * Integration tests for rspace-handlebars using test fixtures.
 */

use std::path::Path;

use pretty_assertions::assert_eq;
use rspace_handlebars::{
    Partial, PartialName, Registry, Template, TemplateError, TemplateValue, Visitor, walk,
};
use serde_json::json;

/// Helper to get the path to test fixtures
fn fixture_path(name: &str) -> std::path::PathBuf {
    let manifest_dir = env!("CARGO_MANIFEST_DIR");
    Path::new(manifest_dir).join("test-fixtures").join(name)
}

fn load_source(name: &str) -> String {
    std::fs::read_to_string(fixture_path(name))
        .unwrap_or_else(|_| panic!("Failed to load fixture: {}", name))
}

/// Helper to load a template from fixtures
fn load_template(name: &str) -> Template {
    Template::parse(&load_source(name))
        .unwrap_or_else(|e| panic!("Failed to parse template {}: {}", name, e))
}

fn people_registry() -> Registry {
    let registry = Registry::new();
    registry
        .register_partial_source("layout", &load_source("layout.hbs"))
        .unwrap();
    registry
}

#[derive(Default)]
struct StaticPartials(Vec<String>);

impl Visitor for StaticPartials {
    fn visit_partial(&mut self, partial: &Partial) {
        if let PartialName::Static(name) = &partial.name {
            self.0.push(name.clone());
        }
    }
}

#[test]
fn test_simple_interpolation() {
    let template = load_template("simple.hbs");
    let ctx = TemplateValue::from(json!({"name": "World"}));
    assert_eq!(template.render(&ctx).unwrap(), "Hello, World!\n");
}

#[test]
fn test_layout_with_inline_partial_and_parent_lookup() {
    let registry = people_registry();
    let template = load_template("people.hbs");
    let ctx = TemplateValue::from(json!({
        "title": "Team",
        "highlight": true,
        "people": [{"name": "Ann"}, {"name": "Bob"}]
    }));

    let result = registry.render(&template, &ctx).unwrap();
    assert_eq!(
        result.trim(),
        "<html><title>Team</title><body><li>0. Ann *</li><li>1. Bob *</li></body></html>"
    );
}

#[test]
fn test_layout_renders_inverse_when_empty() {
    let registry = people_registry();
    let template = load_template("people.hbs");
    let ctx = TemplateValue::from(json!({"title": "Empty", "people": []}));

    let result = registry.render(&template, &ctx).unwrap();
    assert_eq!(
        result.trim(),
        "<html><title>Empty</title><body><p>nobody</p></body></html>"
    );
}

#[test]
fn test_comments_whitespace_and_raw_blocks() {
    let template = load_template("comments.hbs");
    let result = template.render(&TemplateValue::Null).unwrap();
    assert_eq!(result.trim(), "beforeafter\n{{not evaluated}}");
}

#[test]
fn test_partial_references_are_discoverable_before_render() {
    let template = load_template("people.hbs");
    let mut partials = StaticPartials::default();
    walk(&template, &mut partials);
    assert_eq!(partials.0, vec!["layout", "person"]);
}

#[test]
fn test_missing_layout_is_reported() {
    let template = load_template("people.hbs");
    // `{{#> layout}}` has a fallback, so a missing layout renders the block itself
    let result = template
        .render(&TemplateValue::from(json!({"people": [{"name": "Solo"}]})))
        .unwrap();
    assert_eq!(result.trim(), "<li>0. Solo</li>");

    let err = Template::parse("{{> layout}}")
        .unwrap()
        .render(&TemplateValue::Null)
        .unwrap_err();
    assert!(matches!(err, TemplateError::PartialNotFound { name } if name == "layout"));
}
