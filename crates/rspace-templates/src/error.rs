/*
 * error.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! Error types for template resolution and compilation.
//!
//! [`TemplateServiceError`] is `Clone` so that the failure of one in-flight
//! remote fetch can be handed to every caller waiting on it. Chained variants
//! keep their cause behind an `Arc`; [`std::error::Error::source`] hands out
//! the inner error so each link can be downcast.

use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;

use rspace_handlebars::TemplateError;

#[derive(Debug, Clone)]
pub enum TemplateServiceError {
    /// Malformed template syntax or a render failure, surfaced unwrapped.
    Template(TemplateError),

    /// The storage collaborator could not produce a template body.
    Storage { resource: String, message: String },

    /// A prefixed partial name uses a prefix nobody registered.
    UnknownPrefix { prefix: String, name: String },

    /// Fetching, sanitizing or parsing a remote template failed.
    RemoteLoad {
        resource: String,
        source: Arc<TemplateServiceError>,
    },

    /// A transitive dependency of `reference` failed to resolve.
    Resolution {
        reference: String,
        source: Arc<TemplateServiceError>,
    },

    DuplicatePartial { id: String },

    DuplicateHelper { name: String },

    DefaultAlreadyInstalled,
}

impl fmt::Display for TemplateServiceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Template(e) => fmt::Display::fmt(e, f),
            Self::Storage { resource, message } => write!(
                f,
                "Failed to load template body for '{}': {}",
                resource, message
            ),
            Self::UnknownPrefix { prefix, name } => {
                write!(f, "Unknown namespace prefix '{}' in '{}'", prefix, name)
            }
            Self::RemoteLoad { resource, .. } => {
                write!(f, "Failed to load remote template '{}'", resource)
            }
            Self::Resolution { reference, .. } => write!(
                f,
                "Error while resolving dependencies of template '{}'",
                reference
            ),
            Self::DuplicatePartial { id } => {
                write!(f, "Template partial '{}' already registered", id)
            }
            Self::DuplicateHelper { name } => {
                write!(f, "Template helper '{}' already registered", name)
            }
            Self::DefaultAlreadyInstalled => {
                f.write_str("A default remote template fetcher is already installed")
            }
        }
    }
}

// Chained variants hand out the inner error, not its `Arc`, so every link
// downcasts to `TemplateServiceError`.
impl StdError for TemplateServiceError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            Self::Template(e) => e.source(),
            Self::RemoteLoad { source, .. } | Self::Resolution { source, .. } => {
                Some(source.as_ref())
            }
            _ => None,
        }
    }
}

impl From<TemplateError> for TemplateServiceError {
    fn from(err: TemplateError) -> Self {
        Self::Template(err)
    }
}

impl TemplateServiceError {
    /// Create a storage failure for `resource`.
    pub fn storage(resource: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Storage {
            resource: resource.into(),
            message: message.into(),
        }
    }

    /// This error followed by each of its causes, outermost first.
    pub fn causes(&self) -> impl Iterator<Item = &(dyn StdError + 'static)> {
        std::iter::successors(Some(self as &(dyn StdError + 'static)), |&e| e.source())
    }

    /// The innermost cause.
    pub fn root_cause(&self) -> &(dyn StdError + 'static) {
        self.causes()
            .last()
            .unwrap_or(self as &(dyn StdError + 'static))
    }
}

/// Result type for template service operations.
pub type TemplateServiceResult<T> = Result<T, TemplateServiceError>;
