/*
 * helpers.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! Helper functions.
//!
//! A helper receives its evaluated positional parameters and a
//! [`HelperOptions`] handle. Block helpers render their body through
//! [`HelperOptions::render_program`] / [`HelperOptions::render_inverse`],
//! optionally with a new context and `@data` frame. A block helper's result is
//! emitted verbatim; a mustache helper's result is HTML-escaped unless the
//! mustache is triple-stashed.

use std::sync::Arc;

use indexmap::IndexMap;

use crate::ast::TemplateNode;
use crate::data::DataFrame;
use crate::error::{TemplateError, TemplateResult};
use crate::render::{Frame, RenderState, render_nodes};
use crate::value::TemplateValue;

/// A registered helper.
pub type HelperDef = Arc<
    dyn Fn(&[TemplateValue], &mut HelperOptions<'_, '_>) -> TemplateResult<TemplateValue>
        + Send
        + Sync,
>;

/// Invocation details handed to a helper.
pub struct HelperOptions<'h, 'reg> {
    name: &'h str,
    hash: IndexMap<String, TemplateValue>,
    frame: &'h Frame<'h>,
    program: Option<&'h [TemplateNode]>,
    inverse: Option<&'h [TemplateNode]>,
    state: &'h mut RenderState<'reg>,
}

impl<'h, 'reg> HelperOptions<'h, 'reg> {
    pub(crate) fn new(
        name: &'h str,
        hash: IndexMap<String, TemplateValue>,
        frame: &'h Frame<'h>,
        program: Option<&'h [TemplateNode]>,
        inverse: Option<&'h [TemplateNode]>,
        state: &'h mut RenderState<'reg>,
    ) -> Self {
        Self {
            name,
            hash,
            frame,
            program,
            inverse,
            state,
        }
    }

    /// The name the helper was invoked under.
    pub fn name(&self) -> &str {
        self.name
    }

    pub fn hash(&self) -> &IndexMap<String, TemplateValue> {
        &self.hash
    }

    pub fn hash_get(&self, key: &str) -> Option<&TemplateValue> {
        self.hash.get(key)
    }

    /// The implicit context at the invocation site.
    pub fn context(&self) -> &'h TemplateValue {
        self.frame.context
    }

    /// The `@data` frame at the invocation site.
    pub fn data(&self) -> &DataFrame {
        &self.frame.data
    }

    /// A fresh `@data` frame whose parent is the invocation site's frame.
    pub fn child_data(&self) -> DataFrame {
        DataFrame::child(&self.frame.data)
    }

    /// Whether the helper was invoked as a block (`{{#name}}`).
    pub fn is_block(&self) -> bool {
        self.program.is_some()
    }

    /// Render the block body with `context`, and with `data` as the `@data`
    /// frame when given. Returns an empty string for non-block invocations.
    pub fn render_program(
        &mut self,
        context: &TemplateValue,
        data: Option<DataFrame>,
    ) -> TemplateResult<String> {
        let program = self.program;
        self.render_with(program, context, data)
    }

    /// Render the `{{else}}` body, if any.
    pub fn render_inverse(
        &mut self,
        context: &TemplateValue,
        data: Option<DataFrame>,
    ) -> TemplateResult<String> {
        let inverse = self.inverse;
        self.render_with(inverse, context, data)
    }

    fn render_with(
        &mut self,
        nodes: Option<&[TemplateNode]>,
        context: &TemplateValue,
        data: Option<DataFrame>,
    ) -> TemplateResult<String> {
        let Some(nodes) = nodes else {
            return Ok(String::new());
        };
        let frame = Frame {
            context,
            parent: Some(self.frame),
            data: match data {
                Some(data) => Arc::new(data),
                None => Arc::clone(&self.frame.data),
            },
        };
        render_nodes(nodes, &frame, self.state)
    }
}

fn exactly_one<'v>(name: &str, params: &'v [TemplateValue]) -> TemplateResult<&'v TemplateValue> {
    match params {
        [value] => Ok(value),
        _ => Err(TemplateError::helper(
            name,
            format!("#{name} requires exactly one argument"),
        )),
    }
}

/// Built-in helpers available in every registry.
pub fn builtin_helpers() -> Vec<(&'static str, HelperDef)> {
    vec![
        ("if", Arc::new(if_helper) as HelperDef),
        ("unless", Arc::new(unless_helper) as HelperDef),
        ("each", Arc::new(each_helper) as HelperDef),
        ("with", Arc::new(with_helper) as HelperDef),
        ("lookup", Arc::new(lookup_helper) as HelperDef),
        ("log", Arc::new(log_helper) as HelperDef),
    ]
}

fn condition(value: &TemplateValue, options: &HelperOptions<'_, '_>) -> bool {
    let include_zero = options
        .hash_get("includeZero")
        .is_some_and(TemplateValue::is_truthy);
    value.is_truthy() || (include_zero && *value == TemplateValue::Number(0.0))
}

fn if_helper(
    params: &[TemplateValue],
    options: &mut HelperOptions<'_, '_>,
) -> TemplateResult<TemplateValue> {
    let value = exactly_one("if", params)?;
    let context = options.context();
    let rendered = if condition(value, options) {
        options.render_program(context, None)?
    } else {
        options.render_inverse(context, None)?
    };
    Ok(TemplateValue::String(rendered))
}

fn unless_helper(
    params: &[TemplateValue],
    options: &mut HelperOptions<'_, '_>,
) -> TemplateResult<TemplateValue> {
    let value = exactly_one("unless", params)?;
    let context = options.context();
    let rendered = if condition(value, options) {
        options.render_inverse(context, None)?
    } else {
        options.render_program(context, None)?
    };
    Ok(TemplateValue::String(rendered))
}

fn each_helper(
    params: &[TemplateValue],
    options: &mut HelperOptions<'_, '_>,
) -> TemplateResult<TemplateValue> {
    let Some(value) = params.first() else {
        return Err(TemplateError::helper("each", "Must pass iterator to #each"));
    };
    iterate(value, options)
}

fn iterate(
    value: &TemplateValue,
    options: &mut HelperOptions<'_, '_>,
) -> TemplateResult<TemplateValue> {
    let mut out = String::new();
    match value {
        TemplateValue::List(items) if !items.is_empty() => {
            let last = items.len() - 1;
            for (i, item) in items.iter().enumerate() {
                let mut data = options.child_data();
                data.index = Some(i);
                data.key = Some(TemplateValue::from(i));
                data.first = Some(i == 0);
                data.last = Some(i == last);
                out.push_str(&options.render_program(item, Some(data))?);
            }
        }
        TemplateValue::Map(map) if !map.is_empty() => {
            let last = map.len() - 1;
            for (i, (key, item)) in map.iter().enumerate() {
                let mut data = options.child_data();
                data.index = Some(i);
                data.key = Some(TemplateValue::from(key.as_str()));
                data.first = Some(i == 0);
                data.last = Some(i == last);
                out.push_str(&options.render_program(item, Some(data))?);
            }
        }
        _ => {
            let context = options.context();
            out = options.render_inverse(context, None)?;
        }
    }
    Ok(TemplateValue::String(out))
}

fn with_helper(
    params: &[TemplateValue],
    options: &mut HelperOptions<'_, '_>,
) -> TemplateResult<TemplateValue> {
    let value = exactly_one("with", params)?;
    let rendered = if value.is_truthy() {
        options.render_program(value, None)?
    } else {
        let context = options.context();
        options.render_inverse(context, None)?
    };
    Ok(TemplateValue::String(rendered))
}

fn lookup_helper(
    params: &[TemplateValue],
    _options: &mut HelperOptions<'_, '_>,
) -> TemplateResult<TemplateValue> {
    match params {
        [object, key] => Ok(object.get(&key.render()).cloned().unwrap_or_default()),
        _ => Err(TemplateError::helper(
            "lookup",
            "lookup requires an object and a key",
        )),
    }
}

fn log_helper(
    params: &[TemplateValue],
    options: &mut HelperOptions<'_, '_>,
) -> TemplateResult<TemplateValue> {
    let message = params
        .iter()
        .map(TemplateValue::render)
        .collect::<Vec<_>>()
        .join(" ");
    let level = options
        .hash_get("level")
        .map(TemplateValue::render)
        .unwrap_or_default();
    match level.as_str() {
        "debug" => tracing::debug!(target: "rspace_handlebars::log", "{}", message),
        "warn" => tracing::warn!(target: "rspace_handlebars::log", "{}", message),
        "error" => tracing::error!(target: "rspace_handlebars::log", "{}", message),
        _ => tracing::info!(target: "rspace_handlebars::log", "{}", message),
    }
    Ok(TemplateValue::Null)
}

/// Behavior of `{{#name}}...{{/name}}` when `name` is not a helper.
///
/// `true` renders the body in the current context; falsy values render the
/// inverse; lists iterate like `each`; anything else becomes the new
/// context for a single rendering of the body.
pub fn block_helper_missing(
    value: &TemplateValue,
    options: &mut HelperOptions<'_, '_>,
) -> TemplateResult<TemplateValue> {
    let context = options.context();
    let rendered = match value {
        TemplateValue::Bool(true) => options.render_program(context, None)?,
        v if !v.is_truthy() => options.render_inverse(context, None)?,
        TemplateValue::List(_) => return iterate(value, options),
        other => options.render_program(other, None)?,
    };
    Ok(TemplateValue::String(rendered))
}
