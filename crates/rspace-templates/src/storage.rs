/*
 * storage.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! Template storage collaborator.
//!
//! The remote loader fetches raw template text by resource identifier through
//! [`TemplateStorage`]. The transport is up to the implementation; the wire
//! form used by the platform's REST endpoint is `{"templateHtml": "..."}`,
//! which [`TemplateBody`] decodes.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{TemplateServiceError, TemplateServiceResult};

/// Raw template text returned by storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplateBody {
    pub template_html: String,
}

impl TemplateBody {
    pub fn new(template_html: impl Into<String>) -> Self {
        Self {
            template_html: template_html.into(),
        }
    }

    /// Decode the JSON wire form.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

/// Read-only access to stored templates.
///
/// Implementations must be `Send + Sync`; a single storage is shared by the
/// process-wide remote loader.
#[async_trait]
pub trait TemplateStorage: Send + Sync {
    /// Load the body of the template identified by `resource`.
    async fn load_template_body(&self, resource: &str) -> TemplateServiceResult<TemplateBody>;
}

/// Storage backed by an in-memory map, for embedding and tests.
#[derive(Debug, Default)]
pub struct InMemoryTemplateStorage {
    bodies: RwLock<HashMap<String, String>>,
}

impl InMemoryTemplateStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_template(self, resource: impl Into<String>, html: impl Into<String>) -> Self {
        self.insert(resource, html);
        self
    }

    /// Store or replace a template body.
    pub fn insert(&self, resource: impl Into<String>, html: impl Into<String>) {
        self.bodies
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(resource.into(), html.into());
    }

    pub fn remove(&self, resource: &str) -> Option<String> {
        self.bodies
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(resource)
    }
}

#[async_trait]
impl TemplateStorage for InMemoryTemplateStorage {
    async fn load_template_body(&self, resource: &str) -> TemplateServiceResult<TemplateBody> {
        let bodies = self.bodies.read().unwrap_or_else(PoisonError::into_inner);
        bodies
            .get(resource)
            .map(TemplateBody::new)
            .ok_or_else(|| TemplateServiceError::storage(resource, "template not found"))
    }
}

/// Storage used until the process installs a real one. Every load fails.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnconfiguredStorage;

#[async_trait]
impl TemplateStorage for UnconfiguredStorage {
    async fn load_template_body(&self, resource: &str) -> TemplateServiceResult<TemplateBody> {
        Err(TemplateServiceError::storage(
            resource,
            "no template storage configured",
        ))
    }
}
