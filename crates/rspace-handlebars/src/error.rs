/*
 * error.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! Error types for template parsing and evaluation.

use thiserror::Error;

/// Errors that can occur during template operations.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TemplateError {
    /// Error parsing the template syntax.
    #[error("Parse error at line {line}, column {column}: {message}")]
    Parse {
        message: String,
        line: usize,
        column: usize,
    },

    /// A helper was invoked with arguments but no helper of that name exists.
    #[error("Missing helper: {name}")]
    MissingHelper { name: String },

    /// A partial was invoked but neither the render state nor the registry
    /// knows it, and no fallback block was given.
    #[error("The partial {name} could not be found")]
    PartialNotFound { name: String },

    /// Recursive partial inclusion detected.
    #[error("Recursive partial inclusion detected (depth > {max_depth}): {name}")]
    RecursivePartial { name: String, max_depth: usize },

    /// A helper reported a failure.
    #[error("Helper '{name}' failed: {message}")]
    Helper { name: String, message: String },

    /// Strict mode: an expression did not resolve to a value.
    #[error("\"{path}\" not defined in context")]
    MissingValue { path: String },

    /// Error evaluating the template.
    #[error("Evaluation error: {message}")]
    Evaluation { message: String },
}

impl TemplateError {
    /// Create a helper failure.
    pub fn helper(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Helper {
            name: name.into(),
            message: message.into(),
        }
    }
}

/// Result type for template operations.
pub type TemplateResult<T> = Result<T, TemplateError>;
