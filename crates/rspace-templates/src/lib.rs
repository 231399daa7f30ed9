/*
 * lib.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! Template resolution and compilation for platform pages.
//!
//! Page markup is a Handlebars-style template whose partials can live in the
//! same scope (`{{> card}}`) or be stored as separate resources addressed by
//! identifier (`{{> ex:card}}`, `{{> urn:example:card}}`). This crate turns a
//! source string into a renderer with every such reference satisfied:
//!
//! - [`scanner`] parses a template and lists the partials it references,
//!   expanding prefixed names through a [`PrefixResolver`].
//! - [`remote`] fetches stored templates through [`TemplateStorage`] and
//!   caches them process-wide, one fetch per identifier.
//! - [`resolver`] walks the reference graph, terminating on cycles.
//! - [`scope`] owns helpers, local partials and a compiled-template cache.
//! - [`capture`] provides the `capture` / `expose` helpers that carry a
//!   render context into templates compiled later.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use rspace_templates::{
//!     InMemoryTemplateStorage, RemoteTemplateFetcher, RenderOptions, TemplateScopeBuilder,
//! };
//!
//! let storage = InMemoryTemplateStorage::new().with_template("urn:example:greeting", "World");
//! let fetcher = Arc::new(RemoteTemplateFetcher::new(Arc::new(storage)));
//! let scope = TemplateScopeBuilder::new(fetcher).build();
//!
//! let template = scope.compile("Hello {{> urn:example:greeting}}").await?;
//! assert_eq!(template.render(&context, &RenderOptions::default())?, "Hello World");
//! ```
//!
//! # Cache invalidation
//!
//! Neither cache watches storage. After a stored template changes, call
//! [`TemplateScope::invalidate`] (or purge the fetcher and clear each
//! affected scope's cache).

pub mod capture;
pub mod error;
pub mod prefixes;
pub mod remote;
pub mod resolver;
pub mod sanitize;
pub mod scanner;
pub mod scope;
pub mod storage;

pub use capture::{CapturedContext, CapturedData, ContextCapturer, merge_context};
pub use error::{TemplateServiceError, TemplateServiceResult};
pub use prefixes::{NamespaceRegistry, PrefixResolver};
pub use remote::{RemoteTemplateCache, RemoteTemplateFetcher};
pub use resolver::{DependencyTable, PartialLoader, resolve};
pub use sanitize::{PassthroughSanitizer, TemplateSanitizer, TemplateTagEscaper};
pub use scanner::{ParsedTemplate, is_full_iri, is_remote_reference, parse_template};
pub use scope::{
    CompiledTemplate, PartialSource, RenderOptions, ScopeOptions, ScopeProps, ScopeTrace,
    TemplateScope, TemplateScopeBuilder,
};
pub use storage::{InMemoryTemplateStorage, TemplateBody, TemplateStorage, UnconfiguredStorage};

pub use rspace_handlebars::{RenderConfig, TemplateValue};
