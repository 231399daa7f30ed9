/*
 * scope.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! Template scopes.
//!
//! A [`TemplateScope`] is an isolated compiler: a fixed table of helpers and
//! local partials, its own engine registry, and a cache of compiled templates
//! keyed by source text. Compiling a template resolves every partial it
//! references, locally first and then through the remote loader, and
//! registers what was found before the template is handed out.
//!
//! Scopes are built with a [`TemplateScopeBuilder`]. Deriving a scope
//! ([`TemplateScope::to_builder`], [`Clone`]) snapshots the tables by value
//! and starts with an empty compiled cache.
//!
//! ```ignore
//! let scope = TemplateScope::builder()
//!     .register_partial("card", "<div class=\"card\">{{> @partial-block}}</div>")?
//!     .build();
//! let template = scope.compile("{{#> card}}{{> ex:summary}}{{/card}}").await?;
//! let html = template.render(&context, &RenderOptions::default())?;
//! ```

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, Mutex, OnceLock, PoisonError};

use async_trait::async_trait;
use indexmap::IndexMap;
use rspace_handlebars::{
    DataFrame, HelperDef, HelperOptions, Registry, RenderConfig, Template, TemplateResult,
    TemplateValue,
};
use serde::{Deserialize, Serialize};

use crate::capture::{CapturedContext, ContextCapturer, default_helpers};
use crate::error::{TemplateServiceError, TemplateServiceResult};
use crate::remote::RemoteTemplateFetcher;
use crate::resolver::{PartialLoader, resolve};
use crate::scanner::{ParsedTemplate, is_remote_reference, parse_template};

static GLOBAL_SCOPE: OnceLock<TemplateScope> = OnceLock::new();

/// Identity of the component that owns a scope, attached to its log events.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ScopeTrace {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub component_tag: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub component_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub template_id: Option<String>,
}

impl fmt::Display for ScopeTrace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts = [
            ("tag", &self.component_tag),
            ("id", &self.component_id),
            ("template", &self.template_id),
        ];
        let mut any = false;
        for (label, value) in parts {
            if let Some(value) = value {
                if any {
                    f.write_str(" ")?;
                }
                write!(f, "{label}={value}")?;
                any = true;
            }
        }
        if !any {
            f.write_str("-")?;
        }
        Ok(())
    }
}

/// Partials of a scope in source form, enough to re-create it elsewhere.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScopeProps {
    pub partials: IndexMap<String, String>,
}

/// Serializable scope configuration, as carried by component settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ScopeOptions {
    pub partials: IndexMap<String, String>,
    #[serde(rename = "scopeTrace")]
    pub trace: ScopeTrace,
    pub render: RenderConfig,
}

/// A partial handed to [`TemplateScopeBuilder::register_partial`].
#[derive(Debug, Clone)]
pub enum PartialSource {
    Source(String),
    Parsed(Arc<ParsedTemplate>),
}

impl From<&str> for PartialSource {
    fn from(source: &str) -> Self {
        PartialSource::Source(source.to_string())
    }
}

impl From<String> for PartialSource {
    fn from(source: String) -> Self {
        PartialSource::Source(source)
    }
}

impl From<ParsedTemplate> for PartialSource {
    fn from(parsed: ParsedTemplate) -> Self {
        PartialSource::Parsed(Arc::new(parsed))
    }
}

impl From<Arc<ParsedTemplate>> for PartialSource {
    fn from(parsed: Arc<ParsedTemplate>) -> Self {
        PartialSource::Parsed(parsed)
    }
}

/// Per-render options of a [`CompiledTemplate`].
#[derive(Debug, Clone, Default)]
pub struct RenderOptions {
    /// Sink for `{{#capture}}` blocks.
    pub capturer: Option<ContextCapturer>,
    /// Source for `{{#expose}}` blocks.
    pub parent_context: Option<CapturedContext>,
}

impl RenderOptions {
    pub fn with_capturer(mut self, capturer: ContextCapturer) -> Self {
        self.capturer = Some(capturer);
        self
    }

    pub fn with_parent_context(mut self, parent_context: CapturedContext) -> Self {
        self.parent_context = Some(parent_context);
        self
    }
}

struct Compiled {
    template: Arc<Template>,
    registry: Arc<Registry>,
}

/// A template ready to render, bound to the registry of the scope that
/// compiled it.
#[derive(Clone, Default)]
pub struct CompiledTemplate {
    inner: Option<Arc<Compiled>>,
}

impl CompiledTemplate {
    fn new(template: Arc<Template>, registry: Arc<Registry>) -> Self {
        Self {
            inner: Some(Arc::new(Compiled { template, registry })),
        }
    }

    /// A template that always renders to the empty string.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_none()
    }

    /// Render against `context`. The capturer and parent context from
    /// `options` are made available to `capture` and `expose`.
    pub fn render(
        &self,
        context: &TemplateValue,
        options: &RenderOptions,
    ) -> TemplateResult<String> {
        let Some(compiled) = &self.inner else {
            return Ok(String::new());
        };
        let mut data = DataFrame::new();
        if let Some(capturer) = &options.capturer {
            data.set_slot(ContextCapturer::DATA_KEY, Arc::new(capturer.clone()));
        }
        if let Some(parent_context) = &options.parent_context {
            data.set_slot(CapturedContext::DATA_KEY, Arc::new(parent_context.clone()));
        }
        compiled
            .registry
            .render_with_data(&compiled.template, context, data)
    }
}

impl fmt::Debug for CompiledTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompiledTemplate")
            .field("empty", &self.is_empty())
            .finish_non_exhaustive()
    }
}

/// An isolated compiler with its own helpers, partials and compiled cache.
pub struct TemplateScope {
    helpers: IndexMap<String, HelperDef>,
    partials: IndexMap<String, Arc<ParsedTemplate>>,
    registry: Arc<Registry>,
    compiled: Mutex<HashMap<String, CompiledTemplate>>,
    fetcher: Arc<RemoteTemplateFetcher>,
    trace: ScopeTrace,
    config: RenderConfig,
}

impl TemplateScope {
    /// A builder on top of the process-wide remote fetcher.
    pub fn builder() -> TemplateScopeBuilder {
        TemplateScopeBuilder::new(RemoteTemplateFetcher::default_fetcher())
    }

    /// Build a scope from serializable options.
    pub fn create(options: ScopeOptions) -> TemplateServiceResult<Self> {
        let builder =
            TemplateScopeBuilder::from_options(RemoteTemplateFetcher::default_fetcher(), options)?;
        Ok(builder.build())
    }

    /// The process-wide default scope, with the default helpers and no partials.
    pub fn global() -> &'static TemplateScope {
        GLOBAL_SCOPE.get_or_init(|| Self::builder().build())
    }

    /// A builder seeded with this scope's helpers, partials, trace and config.
    pub fn to_builder(&self) -> TemplateScopeBuilder {
        TemplateScopeBuilder {
            fetcher: Arc::clone(&self.fetcher),
            helpers: self.helpers.clone(),
            partials: self.partials.clone(),
            own_helpers: HashSet::new(),
            trace: self.trace.clone(),
            config: self.config.clone(),
        }
    }

    pub fn trace(&self) -> &ScopeTrace {
        &self.trace
    }

    pub fn fetcher(&self) -> &Arc<RemoteTemplateFetcher> {
        &self.fetcher
    }

    pub fn get_partial(&self, name: &str) -> Option<&Arc<ParsedTemplate>> {
        self.partials.get(name)
    }

    pub fn has_helper(&self, name: &str) -> bool {
        self.helpers.contains_key(name)
    }

    /// Local partials in source form.
    pub fn export_props(&self) -> ScopeProps {
        ScopeProps {
            partials: self
                .partials
                .iter()
                .map(|(id, partial)| (id.clone(), partial.source.clone()))
                .collect(),
        }
    }

    /// Forget every compiled template of this scope.
    pub fn clear_cache(&self) {
        self.compiled
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    /// Drop every cached remote template and compiled template. Call after
    /// stored templates change.
    pub fn invalidate(&self) {
        self.fetcher.purge();
        self.clear_cache();
    }

    fn cached(&self, source: &str) -> Option<CompiledTemplate> {
        self.compiled
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(source)
            .cloned()
    }

    fn remember(&self, source: &str, compiled: CompiledTemplate) -> CompiledTemplate {
        self.compiled
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(source.to_string(), compiled.clone());
        compiled
    }

    /// Compile `source`, loading every partial it depends on.
    pub async fn compile(&self, source: &str) -> TemplateServiceResult<CompiledTemplate> {
        if let Some(compiled) = self.cached(source) {
            tracing::trace!(scope = %self.trace, "compiled template cache hit");
            return Ok(compiled);
        }
        tracing::debug!(scope = %self.trace, "compiling template");

        let parsed = parse_template(source, self.fetcher.prefixes())?;
        let dependencies = resolve(&parsed, self).await?;
        for (reference, dependency) in dependencies {
            if !self.partials.contains_key(&reference) {
                self.registry
                    .register_partial(reference, Arc::clone(&dependency.ast));
            }
        }

        let compiled = CompiledTemplate::new(parsed.ast, Arc::clone(&self.registry));
        Ok(self.remember(source, compiled))
    }

    /// [`compile`](Self::compile) for an optional source. `None` yields the
    /// empty template.
    pub async fn compile_optional(
        &self,
        source: Option<&str>,
    ) -> TemplateServiceResult<CompiledTemplate> {
        match source {
            Some(source) => self.compile(source).await,
            None => Ok(CompiledTemplate::empty()),
        }
    }

    /// Compile `source` against what the scope already knows, without
    /// loading anything. Unknown partials fail at render time.
    #[deprecated(note = "use `compile`, which resolves remote partials")]
    pub fn compile_without_remote(&self, source: &str) -> TemplateServiceResult<CompiledTemplate> {
        if let Some(compiled) = self.cached(source) {
            tracing::trace!(scope = %self.trace, "compiled template cache hit");
            return Ok(compiled);
        }
        tracing::debug!(scope = %self.trace, "compiling template without remote partials");

        let parsed = parse_template(source, self.fetcher.prefixes())?;
        let compiled = CompiledTemplate::new(parsed.ast, Arc::clone(&self.registry));
        Ok(self.remember(source, compiled))
    }

    #[deprecated(note = "use `compile_optional`, which resolves remote partials")]
    #[allow(deprecated)]
    pub fn compile_without_remote_optional(
        &self,
        source: Option<&str>,
    ) -> TemplateServiceResult<CompiledTemplate> {
        match source {
            Some(source) => self.compile_without_remote(source),
            None => Ok(CompiledTemplate::empty()),
        }
    }
}

#[async_trait]
impl PartialLoader for TemplateScope {
    async fn load_by_reference(
        &self,
        reference: &str,
    ) -> TemplateServiceResult<Option<Arc<ParsedTemplate>>> {
        if let Some(partial) = self.partials.get(reference) {
            return Ok(Some(Arc::clone(partial)));
        }
        if is_remote_reference(reference) {
            return self.fetcher.fetch(reference).await.map(Some);
        }
        Ok(None)
    }
}

impl Clone for TemplateScope {
    /// Same helpers and partials, fresh registry and empty compiled cache.
    fn clone(&self) -> Self {
        self.to_builder().build()
    }
}

impl fmt::Debug for TemplateScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let compiled = self
            .compiled
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len();
        f.debug_struct("TemplateScope")
            .field("trace", &self.trace)
            .field("helpers", &self.helpers.keys().collect::<Vec<_>>())
            .field("partials", &self.partials.keys().collect::<Vec<_>>())
            .field("compiled", &compiled)
            .field("config", &self.config)
            .finish()
    }
}

/// Collects helpers and partials for a new [`TemplateScope`].
///
/// A partial id that is already in the table fails to register, including
/// ids inherited from a parent scope. Inherited helpers (and the default
/// helpers) may be replaced once; registering a helper twice on the same
/// builder fails.
pub struct TemplateScopeBuilder {
    fetcher: Arc<RemoteTemplateFetcher>,
    helpers: IndexMap<String, HelperDef>,
    partials: IndexMap<String, Arc<ParsedTemplate>>,
    own_helpers: HashSet<String>,
    trace: ScopeTrace,
    config: RenderConfig,
}

impl TemplateScopeBuilder {
    /// A builder with the default helpers, loading remote partials through
    /// `fetcher`.
    pub fn new(fetcher: Arc<RemoteTemplateFetcher>) -> Self {
        Self {
            fetcher,
            helpers: default_helpers()
                .into_iter()
                .map(|(name, helper)| (name.to_string(), helper))
                .collect(),
            partials: IndexMap::new(),
            own_helpers: HashSet::new(),
            trace: ScopeTrace::default(),
            config: RenderConfig::default(),
        }
    }

    pub fn from_options(
        fetcher: Arc<RemoteTemplateFetcher>,
        options: ScopeOptions,
    ) -> TemplateServiceResult<Self> {
        let mut builder = Self::new(fetcher);
        builder.trace(options.trace).render_config(options.render);
        for (id, source) in options.partials {
            builder.register_partial(id, source)?;
        }
        Ok(builder)
    }

    pub fn register_helper<F>(
        &mut self,
        name: impl Into<String>,
        helper: F,
    ) -> TemplateServiceResult<&mut Self>
    where
        F: Fn(&[TemplateValue], &mut HelperOptions<'_, '_>) -> TemplateResult<TemplateValue>
            + Send
            + Sync
            + 'static,
    {
        self.register_helper_def(name, Arc::new(helper))
    }

    pub fn register_helper_def(
        &mut self,
        name: impl Into<String>,
        helper: HelperDef,
    ) -> TemplateServiceResult<&mut Self> {
        let name = name.into();
        if !self.own_helpers.insert(name.clone()) {
            return Err(TemplateServiceError::DuplicateHelper { name });
        }
        self.helpers.insert(name, helper);
        Ok(self)
    }

    /// Register a local partial from source text or an already parsed template.
    pub fn register_partial(
        &mut self,
        id: impl Into<String>,
        partial: impl Into<PartialSource>,
    ) -> TemplateServiceResult<&mut Self> {
        let id = id.into();
        if self.partials.contains_key(&id) {
            return Err(TemplateServiceError::DuplicatePartial { id });
        }
        let parsed = match partial.into() {
            PartialSource::Source(source) => {
                Arc::new(parse_template(&source, self.fetcher.prefixes())?)
            }
            PartialSource::Parsed(parsed) => parsed,
        };
        self.partials.insert(id, parsed);
        Ok(self)
    }

    pub fn trace(&mut self, trace: ScopeTrace) -> &mut Self {
        self.trace = trace;
        self
    }

    pub fn render_config(&mut self, config: RenderConfig) -> &mut Self {
        self.config = config;
        self
    }

    pub fn build(&self) -> TemplateScope {
        let mut registry = Registry::with_config(self.config.clone());
        for (name, helper) in &self.helpers {
            registry.register_helper_def(name.clone(), Arc::clone(helper));
        }
        for (id, partial) in &self.partials {
            registry.register_partial(id.clone(), Arc::clone(&partial.ast));
        }
        tracing::debug!(
            scope = %self.trace,
            helpers = self.helpers.len(),
            partials = self.partials.len(),
            "building template scope"
        );

        TemplateScope {
            helpers: self.helpers.clone(),
            partials: self.partials.clone(),
            registry: Arc::new(registry),
            compiled: Mutex::new(HashMap::new()),
            fetcher: Arc::clone(&self.fetcher),
            trace: self.trace.clone(),
            config: self.config.clone(),
        }
    }
}

impl fmt::Debug for TemplateScopeBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TemplateScopeBuilder")
            .field("trace", &self.trace)
            .field("helpers", &self.helpers.keys().collect::<Vec<_>>())
            .field("partials", &self.partials.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}
