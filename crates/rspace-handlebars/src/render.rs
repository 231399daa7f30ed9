/*
 * render.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! Template evaluation engine.
//!
//! Rendering walks the AST against a chain of [`Frame`]s. Each frame holds
//! the implicit context (`this`), a link to the enclosing frame for `../`
//! lookups, and the current `@data` frame. [`RenderState`] carries what is
//! shared by the whole render: the registry, partial nesting depth, the
//! `@partial-block` stack and inline partial definitions.

use std::borrow::Cow;
use std::collections::HashMap;
use std::sync::Arc;

use indexmap::IndexMap;

use crate::ast::{
    Block, Call, Expression, Literal, Partial, PartialName, PathExpr, Template, TemplateNode,
};
use crate::data::DataFrame;
use crate::error::{TemplateError, TemplateResult};
use crate::helpers::{HelperOptions, block_helper_missing};
use crate::registry::Registry;
use crate::value::TemplateValue;

/// One level of implicit context.
pub struct Frame<'a> {
    pub context: &'a TemplateValue,
    pub parent: Option<&'a Frame<'a>>,
    pub data: Arc<DataFrame>,
}

impl<'a> Frame<'a> {
    /// The nearest enclosing frame with a different context.
    ///
    /// Helpers such as `if` re-render with the same context; those levels do
    /// not count for `../`.
    fn parent_scope(&self) -> Option<&Frame<'a>> {
        let mut current = self.parent?;
        while std::ptr::eq(current.context, self.context) {
            match current.parent {
                Some(parent) => current = parent,
                None => break,
            }
        }
        Some(current)
    }
}

/// State shared across a single render call.
pub struct RenderState<'reg> {
    pub(crate) registry: &'reg Registry,

    /// Current partial nesting depth (for recursion protection).
    pub partial_depth: usize,

    /// Maximum partial nesting depth before error.
    pub max_partial_depth: usize,

    /// Strict mode: missing values are errors instead of empty output.
    pub strict_mode: bool,

    partial_blocks: Vec<Arc<Vec<TemplateNode>>>,
    inline_partials: Vec<HashMap<String, Arc<Vec<TemplateNode>>>>,
}

impl<'reg> RenderState<'reg> {
    pub fn new(registry: &'reg Registry) -> Self {
        let config = registry.config();
        Self {
            registry,
            partial_depth: 0,
            max_partial_depth: config.max_partial_depth,
            strict_mode: config.strict,
            partial_blocks: Vec::new(),
            inline_partials: Vec::new(),
        }
    }

    fn inline_partial(&self, name: &str) -> Option<Arc<Vec<TemplateNode>>> {
        self.inline_partials
            .iter()
            .rev()
            .find_map(|scope| scope.get(name).cloned())
    }
}

impl Template {
    /// Render with the built-in helpers and no registered partials.
    pub fn render(&self, context: &TemplateValue) -> TemplateResult<String> {
        Registry::new().render(self, context)
    }
}

/// Render a sequence of nodes.
pub fn render_nodes(
    nodes: &[TemplateNode],
    frame: &Frame<'_>,
    state: &mut RenderState<'_>,
) -> TemplateResult<String> {
    let inline: HashMap<String, Arc<Vec<TemplateNode>>> = nodes
        .iter()
        .filter_map(|node| match node {
            TemplateNode::InlinePartial(inline) => {
                Some((inline.name.clone(), Arc::clone(&inline.body)))
            }
            _ => None,
        })
        .collect();
    let scoped = !inline.is_empty();
    if scoped {
        state.inline_partials.push(inline);
    }

    let result = render_each(nodes, frame, state);

    if scoped {
        state.inline_partials.pop();
    }
    result
}

fn render_each(
    nodes: &[TemplateNode],
    frame: &Frame<'_>,
    state: &mut RenderState<'_>,
) -> TemplateResult<String> {
    let mut out = String::new();
    for node in nodes {
        match node {
            TemplateNode::Text(text) => out.push_str(text),
            TemplateNode::Comment(_) | TemplateNode::InlinePartial(_) => {}
            TemplateNode::Mustache(mustache) => {
                let value = eval_call(&mustache.call, frame, state)?;
                let rendered = value.render();
                if mustache.escaped {
                    out.push_str(&escape_html(&rendered));
                } else {
                    out.push_str(&rendered);
                }
            }
            TemplateNode::Block(block) => out.push_str(&render_block(block, frame, state)?),
            TemplateNode::Partial(partial) => {
                out.push_str(&render_partial(partial, None, frame, state)?);
            }
            TemplateNode::PartialBlock(block) => {
                out.push_str(&render_partial(
                    &block.partial,
                    Some(&block.fallback),
                    frame,
                    state,
                )?);
            }
        }
    }
    Ok(out)
}

fn render_block(
    block: &Block,
    frame: &Frame<'_>,
    state: &mut RenderState<'_>,
) -> TemplateResult<String> {
    let registry = state.registry;
    let helper = block
        .call
        .helper_name()
        .and_then(|name| registry.helper(name).map(|helper| (name, helper)));

    if let Some((name, helper)) = helper {
        let params = eval_params(&block.call.params, frame, state)?;
        let hash = eval_hash(&block.call.hash, frame, state)?;
        let mut options = HelperOptions::new(
            name,
            hash,
            frame,
            Some(block.program.as_slice()),
            block.inverse.as_deref().map(Vec::as_slice),
            state,
        );
        return Ok(helper(&params, &mut options)?.render());
    }

    let name = call_name(&block.call);
    if !block.call.params.is_empty() || !block.call.hash.is_empty() {
        return Err(TemplateError::MissingHelper { name });
    }

    let value = eval_expr(&block.call.target, frame, state)?.into_owned();
    let mut options = HelperOptions::new(
        &name,
        IndexMap::new(),
        frame,
        Some(block.program.as_slice()),
        block.inverse.as_deref().map(Vec::as_slice),
        state,
    );
    Ok(block_helper_missing(&value, &mut options)?.render())
}

enum PartialBody {
    Nodes(Arc<Vec<TemplateNode>>),
    Template(Arc<Template>),
}

impl PartialBody {
    fn nodes(&self) -> &[TemplateNode] {
        match self {
            PartialBody::Nodes(nodes) => nodes,
            PartialBody::Template(template) => &template.nodes,
        }
    }
}

fn render_partial(
    partial: &Partial,
    fallback: Option<&Arc<Vec<TemplateNode>>>,
    frame: &Frame<'_>,
    state: &mut RenderState<'_>,
) -> TemplateResult<String> {
    let name = match &partial.name {
        PartialName::Static(name) | PartialName::Literal(name) => name.clone(),
        PartialName::Dynamic(expr) => eval_expr(expr, frame, state)?.render(),
    };

    // Without a context or hash the partial shares the caller's frame, so
    // `../` inside it resolves exactly as at the call site.
    let context = if partial.context.is_none() && partial.hash.is_empty() {
        None
    } else {
        let base = match &partial.context {
            Some(expr) => eval_expr(expr, frame, state)?.into_owned(),
            None => frame.context.clone(),
        };
        let hash = eval_hash(&partial.hash, frame, state)?;
        Some(if hash.is_empty() {
            base
        } else {
            let mut merged = match base {
                TemplateValue::Map(map) => map,
                _ => IndexMap::new(),
            };
            merged.extend(hash);
            TemplateValue::Map(merged)
        })
    };
    let scoped;
    let child: &Frame<'_> = match &context {
        Some(context) => {
            scoped = Frame {
                context,
                parent: Some(frame),
                data: Arc::clone(&frame.data),
            };
            &scoped
        }
        None => frame,
    };

    if name == "@partial-block" {
        let Some(body) = state.partial_blocks.pop() else {
            return Err(TemplateError::PartialNotFound { name });
        };
        let result = render_nodes(&body, child, state);
        state.partial_blocks.push(body);
        return result;
    }

    let body = match state.inline_partial(&name) {
        Some(nodes) => Some(PartialBody::Nodes(nodes)),
        None => state.registry.partial(&name).map(PartialBody::Template),
    };

    let Some(body) = body else {
        return match fallback {
            Some(fallback) => render_nodes(fallback, child, state),
            None => Err(TemplateError::PartialNotFound { name }),
        };
    };

    if state.partial_depth >= state.max_partial_depth {
        return Err(TemplateError::RecursivePartial {
            name,
            max_depth: state.max_partial_depth,
        });
    }

    state.partial_depth += 1;
    if let Some(fallback) = fallback {
        state.partial_blocks.push(Arc::clone(fallback));
    }
    let result = render_nodes(body.nodes(), child, state);
    if fallback.is_some() {
        state.partial_blocks.pop();
    }
    state.partial_depth -= 1;
    result
}

/// Evaluate a mustache or sub-expression call.
fn eval_call(
    call: &Call,
    frame: &Frame<'_>,
    state: &mut RenderState<'_>,
) -> TemplateResult<TemplateValue> {
    let registry = state.registry;
    if let Some(name) = call.helper_name() {
        if let Some(helper) = registry.helper(name) {
            let params = eval_params(&call.params, frame, state)?;
            let hash = eval_hash(&call.hash, frame, state)?;
            let mut options = HelperOptions::new(name, hash, frame, None, None, state);
            return helper(&params, &mut options);
        }
    }
    if !call.params.is_empty() || !call.hash.is_empty() {
        return Err(TemplateError::MissingHelper {
            name: call_name(call),
        });
    }
    Ok(eval_expr(&call.target, frame, state)?.into_owned())
}

fn call_name(call: &Call) -> String {
    match &call.target {
        Expression::Path(path) => path.original.clone(),
        Expression::Literal(literal) => literal_value(literal).render(),
        Expression::SubExpression(_) => "(subexpression)".to_string(),
    }
}

fn eval_params(
    params: &[Expression],
    frame: &Frame<'_>,
    state: &mut RenderState<'_>,
) -> TemplateResult<Vec<TemplateValue>> {
    params
        .iter()
        .map(|param| eval_expr(param, frame, state).map(Cow::into_owned))
        .collect()
}

fn eval_hash(
    hash: &[(String, Expression)],
    frame: &Frame<'_>,
    state: &mut RenderState<'_>,
) -> TemplateResult<IndexMap<String, TemplateValue>> {
    hash.iter()
        .map(|(key, expr)| Ok((key.clone(), eval_expr(expr, frame, state)?.into_owned())))
        .collect()
}

fn eval_expr<'f>(
    expr: &Expression,
    frame: &'f Frame<'_>,
    state: &mut RenderState<'_>,
) -> TemplateResult<Cow<'f, TemplateValue>> {
    match expr {
        Expression::Literal(literal) => Ok(Cow::Owned(literal_value(literal))),
        Expression::SubExpression(call) => Ok(Cow::Owned(eval_call(call, frame, state)?)),
        Expression::Path(path) => match lookup_path(path, frame) {
            Some(value) => Ok(value),
            None if state.strict_mode => Err(TemplateError::MissingValue {
                path: path.original.clone(),
            }),
            None => Ok(Cow::Owned(TemplateValue::Null)),
        },
    }
}

fn literal_value(literal: &Literal) -> TemplateValue {
    match literal {
        Literal::String(s) => TemplateValue::String(s.clone()),
        Literal::Number(n) => TemplateValue::Number(*n),
        Literal::Bool(b) => TemplateValue::Bool(*b),
        Literal::Null | Literal::Undefined => TemplateValue::Null,
    }
}

fn lookup_path<'f>(path: &PathExpr, frame: &'f Frame<'_>) -> Option<Cow<'f, TemplateValue>> {
    if path.data {
        let data = frame.data.ancestor(path.depth)?;
        let (first, rest) = path.parts.split_first()?;
        let value = data.lookup(first)?;
        return value.get_path(rest).cloned().map(Cow::Owned);
    }

    let mut target: &Frame<'_> = frame;
    for _ in 0..path.depth {
        target = target.parent_scope()?;
    }
    target.context.get_path(&path.parts).map(Cow::Borrowed)
}

/// Escape a string for inclusion in HTML.
pub fn escape_html(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            '`' => out.push_str("&#x60;"),
            '=' => out.push_str("&#x3D;"),
            _ => out.push(c),
        }
    }
    out
}
