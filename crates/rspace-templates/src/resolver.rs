/*
 * resolver.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! Recursive resolution of partial references.
//!
//! Starting from a parsed template, [`resolve`] loads every referenced
//! partial through a [`PartialLoader`], then the partials those reference,
//! and so on. One [`DependencyTable`] is shared by the whole walk: a reference
//! is reserved in it before its load starts, so a name reached twice (through
//! a diamond or a cycle) is loaded once and cycles terminate.
//!
//! A load that yields nothing releases its reservation again. Such names are
//! left to the engine's partial-not-found handling at render time and are
//! retried if they show up elsewhere in the graph.

use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt, try_join_all};
use indexmap::IndexMap;

use crate::error::{TemplateServiceError, TemplateServiceResult};
use crate::scanner::ParsedTemplate;

/// Source of partials for the resolver.
#[async_trait]
pub trait PartialLoader: Send + Sync {
    /// Load the partial named `reference`. `Ok(None)` means the name is not
    /// known here and should be left to the renderer's fallback.
    async fn load_by_reference(
        &self,
        reference: &str,
    ) -> TemplateServiceResult<Option<Arc<ParsedTemplate>>>;
}

/// Reference → loaded template, or `None` while its load is in flight.
#[derive(Debug, Default)]
pub struct DependencyTable {
    entries: Mutex<IndexMap<String, Option<Arc<ParsedTemplate>>>>,
}

impl DependencyTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve every reference not seen yet and return those, in order.
    pub fn reserve<'r>(&self, references: &'r [String]) -> Vec<&'r str> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        references
            .iter()
            .filter(|reference| {
                if entries.contains_key(reference.as_str()) {
                    false
                } else {
                    entries.insert(reference.to_string(), None);
                    true
                }
            })
            .map(String::as_str)
            .collect()
    }

    pub fn store(&self, reference: &str, template: Arc<ParsedTemplate>) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(reference.to_string(), Some(template));
    }

    /// Forget a reservation.
    pub fn release(&self, reference: &str) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .shift_remove(reference);
    }

    pub fn contains(&self, reference: &str) -> bool {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(reference)
    }

    /// The loaded templates, in the order their references were first seen.
    pub fn into_resolved(self) -> IndexMap<String, Arc<ParsedTemplate>> {
        self.entries
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner)
            .into_iter()
            .filter_map(|(reference, template)| template.map(|t| (reference, t)))
            .collect()
    }
}

/// Load the transitive partial dependencies of `parsed`.
///
/// Any failed load fails the whole resolution. Failures below the first level
/// are wrapped in [`TemplateServiceError::Resolution`] naming the reference
/// whose dependencies were being resolved.
pub async fn resolve(
    parsed: &ParsedTemplate,
    loader: &dyn PartialLoader,
) -> TemplateServiceResult<IndexMap<String, Arc<ParsedTemplate>>> {
    let table = DependencyTable::new();
    resolve_into(parsed, &table, loader).await?;
    Ok(table.into_resolved())
}

fn resolve_into<'a>(
    parsed: &'a ParsedTemplate,
    table: &'a DependencyTable,
    loader: &'a dyn PartialLoader,
) -> BoxFuture<'a, TemplateServiceResult<()>> {
    async move {
        let pending = table.reserve(&parsed.references);

        let loaded = try_join_all(pending.into_iter().map(|reference| async move {
            let template = loader.load_by_reference(reference).await?;
            Ok::<_, TemplateServiceError>((reference, template))
        }))
        .await?;

        let mut fetched = Vec::with_capacity(loaded.len());
        for (reference, template) in loaded {
            match template {
                Some(template) => {
                    table.store(reference, Arc::clone(&template));
                    fetched.push((reference, template));
                }
                None => {
                    tracing::debug!(
                        reference = %reference,
                        "partial not found, deferring to render-time fallback"
                    );
                    table.release(reference);
                }
            }
        }

        try_join_all(fetched.iter().map(|(reference, template)| {
            resolve_into(template, table, loader).map(move |result| {
                result.map_err(|source| TemplateServiceError::Resolution {
                    reference: reference.to_string(),
                    source: Arc::new(source),
                })
            })
        }))
        .await?;
        Ok(())
    }
    .boxed()
}
