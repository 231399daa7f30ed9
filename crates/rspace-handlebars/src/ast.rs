/*
 * ast.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! Template AST types.
//!
//! This module defines the abstract syntax tree for parsed templates.
//! The tree is public and inspectable: callers can walk it with
//! [`crate::visitor`] to discover dependencies before rendering, and rewrite
//! partial names in place.

use std::sync::Arc;

/// A parsed template.
#[derive(Debug, Clone, PartialEq)]
pub struct Template {
    /// Top-level nodes.
    pub nodes: Vec<TemplateNode>,
}

/// A node in the template AST.
#[derive(Debug, Clone, PartialEq)]
pub enum TemplateNode {
    /// Literal text to be output as-is.
    Text(String),

    /// Expression output: `{{expr}}`, `{{{expr}}}` or `{{& expr}}`.
    Mustache(Mustache),

    /// Block: `{{#name ...}}...{{else}}...{{/name}}` or `{{^name}}...{{/name}}`.
    Block(Block),

    /// Partial invocation: `{{> name ctx key=value}}`.
    Partial(Partial),

    /// Partial block with fallback content: `{{#> name}}...{{/name}}`.
    PartialBlock(PartialBlock),

    /// Inline partial definition: `{{#*inline "name"}}...{{/inline}}`.
    InlinePartial(InlinePartial),

    /// Comment (not rendered): `{{! ... }}` or `{{!-- ... --}}`.
    Comment(String),
}

/// Position of a tag in the template source, 1-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Span {
    pub line: usize,
    pub column: usize,
}

/// An invocation: target followed by positional params and hash arguments.
#[derive(Debug, Clone, PartialEq)]
pub struct Call {
    pub target: Expression,
    pub params: Vec<Expression>,
    pub hash: Vec<(String, Expression)>,
}

impl Call {
    /// Name of the invoked helper when the target is a plain identifier.
    pub fn helper_name(&self) -> Option<&str> {
        match &self.target {
            Expression::Path(path) => path.simple_name(),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Mustache {
    pub call: Call,
    /// Whether the output is HTML-escaped (`{{ }}` vs `{{{ }}}`).
    pub escaped: bool,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Block {
    pub call: Call,
    pub program: Arc<Vec<TemplateNode>>,
    pub inverse: Option<Arc<Vec<TemplateNode>>>,
    pub span: Span,
}

/// Name of an invoked partial.
#[derive(Debug, Clone, PartialEq)]
pub enum PartialName {
    /// Bare name as written: `{{> header}}`, `{{> ns:footer}}`, `{{> @partial-block}}`.
    Static(String),
    /// Quoted name: `{{> "header"}}`.
    Literal(String),
    /// Computed at render time: `{{> (lookup . "name")}}`.
    Dynamic(Box<Expression>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Partial {
    pub name: PartialName,
    /// Optional context expression replacing the current context.
    pub context: Option<Expression>,
    pub hash: Vec<(String, Expression)>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PartialBlock {
    pub partial: Partial,
    /// Rendered when the partial is missing, and exposed as `@partial-block`.
    pub fallback: Arc<Vec<TemplateNode>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct InlinePartial {
    pub name: String,
    pub body: Arc<Vec<TemplateNode>>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    Path(PathExpr),
    Literal(Literal),
    SubExpression(Box<Call>),
}

/// A path into the implicit context or the data channel.
#[derive(Debug, Clone, PartialEq)]
pub struct PathExpr {
    /// `@`-prefixed path into the data channel.
    pub data: bool,
    /// Number of leading `../` segments.
    pub depth: usize,
    /// Remaining segments; empty for `this` / `.`.
    pub parts: Vec<String>,
    /// The path as written.
    pub original: String,
}

impl PathExpr {
    /// The identifier when this path is a single plain segment (`foo`, not `this.foo`).
    pub fn simple_name(&self) -> Option<&str> {
        if !self.data && self.depth == 0 && self.parts.len() == 1 && !self.is_scoped() {
            Some(self.parts[0].as_str())
        } else {
            None
        }
    }

    fn is_scoped(&self) -> bool {
        self.original.starts_with("this")
            || self.original.starts_with("./")
            || self.original.starts_with('[')
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    String(String),
    Number(f64),
    Bool(bool),
    Null,
    Undefined,
}
