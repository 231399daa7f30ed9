/*
 * sanitize.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! Preprocessing of fetched markup before it is parsed as a template.
//!
//! Stored templates can embed mini-templates inside `<template>` elements.
//! Those bodies belong to whichever component later compiles them, so their
//! partial references must not be expanded (or fetched) while the enclosing
//! template is parsed. [`TemplateTagEscaper`] wraps each outermost
//! `<template>` body in a raw block to keep it verbatim.

use async_trait::async_trait;

use crate::error::TemplateServiceResult;

const RAW_OPEN: &str = "{{{{raw}}}}";
const RAW_CLOSE: &str = "{{{{/raw}}}}";
const TEMPLATE_CLOSE: &str = "</template>";

#[async_trait]
pub trait TemplateSanitizer: Send + Sync {
    /// Turn fetched `markup` for `resource` into template source.
    async fn sanitize(&self, resource: &str, markup: String) -> TemplateServiceResult<String>;
}

/// Leaves markup untouched.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassthroughSanitizer;

#[async_trait]
impl TemplateSanitizer for PassthroughSanitizer {
    async fn sanitize(&self, _resource: &str, markup: String) -> TemplateServiceResult<String> {
        Ok(markup)
    }
}

/// Wraps outermost `<template>` bodies in raw blocks.
#[derive(Debug, Clone, Copy, Default)]
pub struct TemplateTagEscaper;

#[async_trait]
impl TemplateSanitizer for TemplateTagEscaper {
    async fn sanitize(&self, _resource: &str, markup: String) -> TemplateServiceResult<String> {
        Ok(escape_template_tags(&markup))
    }
}

/// Find the next `<template ...>` opening tag; returns its start and the
/// offset just past its `>`.
fn find_open_tag(markup: &str) -> Option<(usize, usize)> {
    let mut from = 0;
    while let Some(found) = markup[from..].find("<template") {
        let start = from + found;
        let after = start + "<template".len();
        let boundary = markup[after..].chars().next();
        if matches!(boundary, Some(c) if c.is_whitespace() || c == '>' || c == '/') {
            let end = markup[after..].find('>').map(|i| after + i + 1)?;
            return Some((start, end));
        }
        from = after;
    }
    None
}

/// Wrap the content of every outermost `<template>` element in a raw block.
pub fn escape_template_tags(markup: &str) -> String {
    let mut out = String::with_capacity(markup.len());
    let mut depth = 0usize;
    let mut rest = markup;

    loop {
        let open = find_open_tag(rest);
        let close = rest.find(TEMPLATE_CLOSE);
        match (open, close) {
            (Some((start, end)), close) if close.is_none_or(|c| start < c) => {
                out.push_str(&rest[..end]);
                if depth == 0 {
                    out.push_str(RAW_OPEN);
                }
                depth += 1;
                rest = &rest[end..];
            }
            (_, Some(close)) => {
                out.push_str(&rest[..close]);
                if depth == 1 {
                    out.push_str(RAW_CLOSE);
                }
                depth = depth.saturating_sub(1);
                out.push_str(TEMPLATE_CLOSE);
                rest = &rest[close + TEMPLATE_CLOSE.len()..];
            }
            _ => {
                out.push_str(rest);
                break;
            }
        }
    }

    if depth > 0 {
        out.push_str(RAW_CLOSE);
    }
    out
}
