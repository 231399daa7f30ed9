/*
 * lib.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! Handlebars-compatible template engine with an inspectable syntax tree.
//!
//! Supported syntax:
//!
//! - Expressions: `{{name}}`, `{{{raw}}}`, `{{& raw}}`, `{{../up}}`, `{{@index}}`
//! - Helper calls with literals, hash arguments and sub-expressions:
//!   `{{link (concat a b) class="x"}}`
//! - Blocks with inverse sections: `{{#if x}}...{{else if y}}...{{else}}...{{/if}}`,
//!   `{{^x}}...{{/x}}`
//! - Partials: `{{> name ctx key=v}}`, `{{> (dynamic)}}`, `{{#> layout}}...{{/layout}}`
//!   with `@partial-block`, and `{{#*inline "name"}}...{{/inline}}`
//! - Comments, `~` whitespace control, `\{{` escapes and raw blocks
//!   `{{{{raw}}}}...{{{{/raw}}}}`
//!
//! # Architecture
//!
//! Unlike engines that compile straight to a renderer, parsing produces a
//! public [`Template`] tree. Callers can [`visitor::walk`] it to find which
//! partials a template references before anything is rendered, and
//! [`visitor::rewrite_partial_names`] lets them canonicalize those names.
//! Rendering happens against a [`Registry`] of helpers and partials.
//!
//! # Example
//!
//! ```ignore
//! use rspace_handlebars::{Registry, Template, TemplateValue};
//!
//! let registry = Registry::new();
//! registry.register_partial_source("greeting", "Hello, {{name}}!")?;
//!
//! let template = Template::parse("{{> greeting}}")?;
//! let ctx = TemplateValue::from(serde_json::json!({"name": "World"}));
//! assert_eq!(registry.render(&template, &ctx)?, "Hello, World!");
//! ```

pub mod ast;
pub mod data;
pub mod error;
pub mod helpers;
pub mod parser;
pub mod registry;
pub mod render;
pub mod value;
pub mod visitor;

// Re-export main types at crate root
pub use ast::{
    Block, Call, Expression, InlinePartial, Literal, Mustache, Partial, PartialBlock, PartialName,
    PathExpr, Span, Template, TemplateNode,
};
pub use data::DataFrame;
pub use error::{TemplateError, TemplateResult};
pub use helpers::{HelperDef, HelperOptions};
pub use registry::{Registry, RenderConfig};
pub use render::escape_html;
pub use value::TemplateValue;
pub use visitor::{Visitor, rewrite_partial_names, walk};
