/*
 * remote.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! Remote template loading and caching.
//!
//! [`RemoteTemplateFetcher`] turns a resource identifier into a
//! [`ParsedTemplate`]: it loads the raw body from storage, sanitizes it and
//! parses it. Results are cached per identifier as shared futures, inserted
//! *before* the fetch makes progress, so concurrent requests for the same
//! identifier wait on a single storage call.
//!
//! Entries, including failed ones, stay cached until [`RemoteTemplateCache::purge`]
//! is called, which must happen whenever stored templates may have changed.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock, PoisonError};

use futures::future::{BoxFuture, FutureExt, Shared};

use crate::error::{TemplateServiceError, TemplateServiceResult};
use crate::prefixes::{NamespaceRegistry, PrefixResolver};
use crate::sanitize::{TemplateSanitizer, TemplateTagEscaper};
use crate::scanner::{ParsedTemplate, parse_template};
use crate::storage::{TemplateStorage, UnconfiguredStorage};

type PendingFetch = Shared<BoxFuture<'static, TemplateServiceResult<Arc<ParsedTemplate>>>>;

/// Identifier → in-flight or settled fetch.
#[derive(Default)]
pub struct RemoteTemplateCache {
    entries: Mutex<HashMap<String, PendingFetch>>,
}

impl RemoteTemplateCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop every entry. The next request for any identifier fetches again.
    pub fn purge(&self) {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        tracing::debug!(entries = entries.len(), "purging remote template cache");
        entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, resource: &str) -> bool {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(resource)
    }

    /// The cached fetch for `resource`, or the one `start` creates.
    fn get_or_start(
        &self,
        resource: &str,
        start: impl FnOnce() -> BoxFuture<'static, TemplateServiceResult<Arc<ParsedTemplate>>>,
    ) -> PendingFetch {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(pending) = entries.get(resource) {
            tracing::trace!(resource = %resource, "remote template cache hit");
            return pending.clone();
        }
        tracing::debug!(resource = %resource, "fetching remote template");
        let pending = start().shared();
        entries.insert(resource.to_string(), pending.clone());
        pending
    }
}

impl std::fmt::Debug for RemoteTemplateCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let mut resources: Vec<&String> = entries.keys().collect();
        resources.sort();
        f.debug_struct("RemoteTemplateCache")
            .field("resources", &resources)
            .finish()
    }
}

static DEFAULT_FETCHER: OnceLock<Arc<RemoteTemplateFetcher>> = OnceLock::new();

/// Loads, sanitizes and parses remote templates through a shared cache.
#[derive(Clone)]
pub struct RemoteTemplateFetcher {
    storage: Arc<dyn TemplateStorage>,
    sanitizer: Arc<dyn TemplateSanitizer>,
    prefixes: Arc<dyn PrefixResolver>,
    cache: Arc<RemoteTemplateCache>,
}

impl RemoteTemplateFetcher {
    /// A fetcher over `storage` with a fresh cache, the `<template>` escaper
    /// and an empty prefix table.
    pub fn new(storage: Arc<dyn TemplateStorage>) -> Self {
        Self {
            storage,
            sanitizer: Arc::new(TemplateTagEscaper),
            prefixes: Arc::new(NamespaceRegistry::new()),
            cache: Arc::new(RemoteTemplateCache::new()),
        }
    }

    pub fn with_sanitizer(mut self, sanitizer: Arc<dyn TemplateSanitizer>) -> Self {
        self.sanitizer = sanitizer;
        self
    }

    pub fn with_prefixes(mut self, prefixes: Arc<dyn PrefixResolver>) -> Self {
        self.prefixes = prefixes;
        self
    }

    /// Share `cache` with other fetchers instead of using a private one.
    pub fn with_cache(mut self, cache: Arc<RemoteTemplateCache>) -> Self {
        self.cache = cache;
        self
    }

    /// Make `fetcher` the process-wide default. Only the first call succeeds,
    /// and it must happen before anything asks for the default.
    pub fn install_default(fetcher: RemoteTemplateFetcher) -> TemplateServiceResult<Arc<Self>> {
        let fetcher = Arc::new(fetcher);
        DEFAULT_FETCHER
            .set(Arc::clone(&fetcher))
            .map_err(|_| TemplateServiceError::DefaultAlreadyInstalled)?;
        Ok(fetcher)
    }

    /// The process-wide fetcher. Without [`install_default`](Self::install_default)
    /// every remote load fails.
    pub fn default_fetcher() -> Arc<Self> {
        Arc::clone(
            DEFAULT_FETCHER
                .get_or_init(|| Arc::new(RemoteTemplateFetcher::new(Arc::new(UnconfiguredStorage)))),
        )
    }

    pub fn prefixes(&self) -> &dyn PrefixResolver {
        self.prefixes.as_ref()
    }

    pub fn cache(&self) -> &Arc<RemoteTemplateCache> {
        &self.cache
    }

    /// Clear the remote cache.
    pub fn purge(&self) {
        self.cache.purge();
    }

    /// Fetch and parse the template identified by `resource`.
    pub async fn fetch(&self, resource: &str) -> TemplateServiceResult<Arc<ParsedTemplate>> {
        let pending = self.cache.get_or_start(resource, || {
            let storage = Arc::clone(&self.storage);
            let sanitizer = Arc::clone(&self.sanitizer);
            let prefixes = Arc::clone(&self.prefixes);
            let resource = resource.to_string();
            async move {
                load(storage, sanitizer, prefixes, &resource)
                    .await
                    .map(Arc::new)
                    .map_err(|source| TemplateServiceError::RemoteLoad {
                        resource,
                        source: Arc::new(source),
                    })
            }
            .boxed()
        });
        pending.await
    }
}

async fn load(
    storage: Arc<dyn TemplateStorage>,
    sanitizer: Arc<dyn TemplateSanitizer>,
    prefixes: Arc<dyn PrefixResolver>,
    resource: &str,
) -> TemplateServiceResult<ParsedTemplate> {
    let body = storage.load_template_body(resource).await?;
    let source = sanitizer.sanitize(resource, body.template_html).await?;
    parse_template(&source, prefixes.as_ref())
}

impl std::fmt::Debug for RemoteTemplateFetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteTemplateFetcher")
            .field("cache", &self.cache)
            .finish_non_exhaustive()
    }
}
