/*
 * parser.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! Template parser.
//!
//! Parsing happens in two passes. The scanner splits the source into text
//! pieces and tags (`{{ ... }}`), applying comments, raw blocks, escaped
//! mustaches and whitespace control along the way. The tree builder then
//! turns the flat tag stream into nested [`TemplateNode`]s, matching block
//! openers with their `{{else}}` and closing tags.

use std::sync::Arc;

use crate::ast::{
    Block, Call, Expression, InlinePartial, Literal, Mustache, Partial, PartialBlock, PartialName,
    PathExpr, Span, Template, TemplateNode,
};
use crate::error::{TemplateError, TemplateResult};

impl Template {
    /// Parse a template from source text.
    pub fn parse(source: &str) -> TemplateResult<Self> {
        let pieces = Scanner::new(source).scan()?;
        let mut builder = TreeBuilder {
            pieces: pieces.into_iter(),
        };
        let (nodes, end) = builder.parse_program()?;
        match end {
            Terminator::Eof => Ok(Template { nodes }),
            Terminator::Else(tag) => Err(parse_error("Unexpected {{else}}", tag.span)),
            Terminator::Close(tag) => Err(parse_error(
                format!("Unexpected closing tag {{{{/{}}}}}", tag.content.trim()),
                tag.span,
            )),
        }
    }
}

fn parse_error(message: impl Into<String>, span: Span) -> TemplateError {
    TemplateError::Parse {
        message: message.into(),
        line: span.line,
        column: span.column,
    }
}

// ============================================================================
// Scanner
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq)]
enum TagKind {
    Mustache { escaped: bool },
    Open,
    OpenInverse,
    OpenPartialBlock,
    OpenDecorator,
    Close,
    Else,
    Partial,
    Comment,
}

#[derive(Debug, Clone)]
struct Tag {
    kind: TagKind,
    /// Tag content with the sigil and whitespace-control markers removed.
    content: String,
    strip_before: bool,
    strip_after: bool,
    span: Span,
}

#[derive(Debug)]
enum Piece {
    Text(String),
    Tag(Tag),
}

struct Scanner<'s> {
    src: &'s str,
    pos: usize,
    pieces: Vec<Piece>,
}

impl<'s> Scanner<'s> {
    fn new(src: &'s str) -> Self {
        Self {
            src,
            pos: 0,
            pieces: Vec::new(),
        }
    }

    fn span_at(&self, offset: usize) -> Span {
        let before = &self.src[..offset];
        let line = before.matches('\n').count() + 1;
        let column = before.rfind('\n').map_or(offset, |nl| offset - nl - 1) + 1;
        Span { line, column }
    }

    fn push_text(&mut self, text: &str) {
        if text.is_empty() {
            return;
        }
        if let Some(Piece::Text(existing)) = self.pieces.last_mut() {
            existing.push_str(text);
        } else {
            self.pieces.push(Piece::Text(text.to_string()));
        }
    }

    fn scan(mut self) -> TemplateResult<Vec<Piece>> {
        while let Some(found) = self.src[self.pos..].find("{{") {
            let start = self.pos + found;

            // `\{{foo}}` is emitted literally
            if start > self.pos && self.src.as_bytes()[start - 1] == b'\\' {
                let text = &self.src[self.pos..start - 1];
                self.push_text(text);
                let end = self.src[start..]
                    .find("}}")
                    .map_or(self.src.len(), |i| start + i + 2);
                let literal = &self.src[start..end];
                self.push_text(literal);
                self.pos = end;
                continue;
            }

            let text = &self.src[self.pos..start];
            self.push_text(text);

            if self.src[start..].starts_with("{{{{") {
                self.scan_raw_block(start)?;
            } else {
                self.scan_tag(start)?;
            }
        }
        let rest = &self.src[self.pos..];
        self.push_text(rest);
        apply_whitespace_control(&mut self.pieces);
        Ok(self.pieces)
    }

    /// `{{{{name}}}} ... {{{{/name}}}}`: the content is kept verbatim.
    fn scan_raw_block(&mut self, start: usize) -> TemplateResult<()> {
        let open_end = self.src[start + 4..]
            .find("}}}}")
            .map(|i| start + 4 + i)
            .ok_or_else(|| parse_error("Unclosed raw block tag", self.span_at(start)))?;
        let name = self.src[start + 4..open_end].trim();
        let closing = format!("{{{{{{{{/{}}}}}}}}}", name);
        let body_start = open_end + 4;
        let body_end = self.src[body_start..]
            .find(&closing)
            .map(|i| body_start + i)
            .ok_or_else(|| {
                parse_error(
                    format!("Raw block '{}' is never closed", name),
                    self.span_at(start),
                )
            })?;
        let body = &self.src[body_start..body_end];
        self.push_text(body);
        self.pos = body_end + closing.len();
        Ok(())
    }

    fn scan_tag(&mut self, start: usize) -> TemplateResult<()> {
        let span = self.span_at(start);
        let mut p = start + 2;
        let triple = self.src[p..].starts_with('{');
        if triple {
            p += 1;
        }
        let strip_before = self.src[p..].starts_with('~');
        if strip_before {
            p += 1;
        }

        // Comments may contain `}}` when written in the long form.
        if self.src[p..].starts_with("!--") {
            let body_start = p + 3;
            let end = self.src[body_start..]
                .find("--}}")
                .or_else(|| self.src[body_start..].find("--~}}"))
                .map(|i| body_start + i)
                .ok_or_else(|| parse_error("Unclosed comment", span))?;
            let strip_after = self.src[end..].starts_with("--~");
            let close_len = if strip_after { 5 } else { 4 };
            self.pieces.push(Piece::Tag(Tag {
                kind: TagKind::Comment,
                content: self.src[body_start..end].to_string(),
                strip_before,
                strip_after,
                span,
            }));
            self.pos = end + close_len;
            return Ok(());
        }

        let close = if triple { "}}}" } else { "}}" };
        let end = if self.src[p..].starts_with('!') {
            self.src[p..].find(close).map(|i| p + i)
        } else {
            find_tag_end(self.src, p, close)
        }
        .ok_or_else(|| parse_error("Unclosed mustache tag", span))?;
        let mut content = &self.src[p..end];
        let strip_after = content.ends_with('~');
        if strip_after {
            content = &content[..content.len() - 1];
        }
        self.pos = end + close.len();

        let tag = if triple {
            Tag {
                kind: TagKind::Mustache { escaped: false },
                content: content.to_string(),
                strip_before,
                strip_after,
                span,
            }
        } else {
            classify(content, strip_before, strip_after, span)
        };
        self.pieces.push(Piece::Tag(tag));
        Ok(())
    }
}

/// Find the closing delimiter of a tag, skipping over quoted strings.
fn find_tag_end(src: &str, from: usize, close: &str) -> Option<usize> {
    let bytes = src.as_bytes();
    let mut quote: Option<u8> = None;
    let mut i = from;
    while i < bytes.len() {
        let b = bytes[i];
        match quote {
            Some(_) if b == b'\\' => {
                i += 2;
                continue;
            }
            Some(q) if b == q => quote = None,
            Some(_) => {}
            None if b == b'"' || b == b'\'' => quote = Some(b),
            None if bytes[i..].starts_with(close.as_bytes()) => return Some(i),
            None => {}
        }
        i += 1;
    }
    None
}

fn classify(content: &str, strip_before: bool, strip_after: bool, span: Span) -> Tag {
    let trimmed = content.trim_start();
    let (kind, rest) = if let Some(rest) = trimmed.strip_prefix("#>") {
        (TagKind::OpenPartialBlock, rest)
    } else if let Some(rest) = trimmed.strip_prefix("#*") {
        (TagKind::OpenDecorator, rest)
    } else if let Some(rest) = trimmed.strip_prefix('#') {
        (TagKind::Open, rest)
    } else if let Some(rest) = trimmed.strip_prefix('^') {
        if rest.trim().is_empty() {
            (TagKind::Else, "")
        } else {
            (TagKind::OpenInverse, rest)
        }
    } else if let Some(rest) = trimmed.strip_prefix('/') {
        (TagKind::Close, rest)
    } else if let Some(rest) = trimmed.strip_prefix('>') {
        (TagKind::Partial, rest)
    } else if let Some(rest) = trimmed.strip_prefix('&') {
        (TagKind::Mustache { escaped: false }, rest)
    } else if let Some(rest) = trimmed.strip_prefix('!') {
        (TagKind::Comment, rest)
    } else if trimmed.trim_end() == "else" {
        (TagKind::Else, "")
    } else if let Some(rest) = trimmed.strip_prefix("else ") {
        (TagKind::Else, rest)
    } else {
        (TagKind::Mustache { escaped: true }, trimmed)
    };
    Tag {
        kind,
        content: rest.to_string(),
        strip_before,
        strip_after,
        span,
    }
}

/// `{{~` trims whitespace before the tag, `~}}` trims whitespace after it.
fn apply_whitespace_control(pieces: &mut [Piece]) {
    for i in 0..pieces.len() {
        let (strip_before, strip_after) = match &pieces[i] {
            Piece::Tag(tag) => (tag.strip_before, tag.strip_after),
            Piece::Text(_) => continue,
        };
        if strip_before && i > 0 {
            if let Piece::Text(text) = &mut pieces[i - 1] {
                let trimmed_len = text.trim_end().len();
                text.truncate(trimmed_len);
            }
        }
        if strip_after && i + 1 < pieces.len() {
            if let Piece::Text(text) = &mut pieces[i + 1] {
                *text = text.trim_start().to_string();
            }
        }
    }
}

// ============================================================================
// Tag content tokenizer
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Id(String),
    Str(String),
    Num(f64),
    Open,
    Close,
    Equals,
}

fn tokenize(content: &str, span: Span) -> TemplateResult<Vec<Token>> {
    let mut tokens = Vec::new();
    let chars: Vec<char> = content.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        match c {
            c if c.is_whitespace() => i += 1,
            '(' => {
                tokens.push(Token::Open);
                i += 1;
            }
            ')' => {
                tokens.push(Token::Close);
                i += 1;
            }
            '=' => {
                tokens.push(Token::Equals);
                i += 1;
            }
            '"' | '\'' => {
                let quote = c;
                let mut value = String::new();
                i += 1;
                loop {
                    match chars.get(i) {
                        None => return Err(parse_error("Unterminated string literal", span)),
                        Some('\\') if chars.get(i + 1) == Some(&quote) => {
                            value.push(quote);
                            i += 2;
                        }
                        Some(&ch) if ch == quote => {
                            i += 1;
                            break;
                        }
                        Some(&ch) => {
                            value.push(ch);
                            i += 1;
                        }
                    }
                }
                tokens.push(Token::Str(value));
            }
            _ => {
                let mut id = String::new();
                while i < chars.len() {
                    let ch = chars[i];
                    if ch == '[' {
                        // segment literal, may contain spaces
                        while i < chars.len() && chars[i] != ']' {
                            id.push(chars[i]);
                            i += 1;
                        }
                        if i < chars.len() {
                            id.push(']');
                            i += 1;
                        }
                        continue;
                    }
                    if ch.is_whitespace() || matches!(ch, '(' | ')' | '=') {
                        break;
                    }
                    id.push(ch);
                    i += 1;
                }
                match parse_number(&id) {
                    Some(n) => tokens.push(Token::Num(n)),
                    None => tokens.push(Token::Id(id)),
                }
            }
        }
    }
    Ok(tokens)
}

fn parse_number(s: &str) -> Option<f64> {
    let digits = s.strip_prefix('-').unwrap_or(s);
    let starts_numeric = digits.chars().next().is_some_and(|c| c.is_ascii_digit());
    if !starts_numeric || !digits.chars().all(|c| c.is_ascii_digit() || c == '.') {
        return None;
    }
    s.parse().ok()
}

struct TokenStream {
    tokens: Vec<Token>,
    pos: usize,
    span: Span,
}

impl TokenStream {
    fn new(content: &str, span: Span) -> TemplateResult<Self> {
        Ok(Self {
            tokens: tokenize(content, span)?,
            pos: 0,
            span,
        })
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn peek_is_hash_key(&self) -> bool {
        matches!(self.tokens.get(self.pos), Some(Token::Id(_)))
            && matches!(self.tokens.get(self.pos + 1), Some(Token::Equals))
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn at_end(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    fn expression(&mut self) -> TemplateResult<Expression> {
        match self.next() {
            Some(Token::Open) => {
                let call = self.call(true)?;
                match self.next() {
                    Some(Token::Close) => Ok(Expression::SubExpression(Box::new(call))),
                    _ => Err(parse_error("Unclosed sub-expression", self.span)),
                }
            }
            Some(Token::Str(s)) => Ok(Expression::Literal(Literal::String(s))),
            Some(Token::Num(n)) => Ok(Expression::Literal(Literal::Number(n))),
            Some(Token::Id(id)) => Ok(match id.as_str() {
                "true" => Expression::Literal(Literal::Bool(true)),
                "false" => Expression::Literal(Literal::Bool(false)),
                "null" => Expression::Literal(Literal::Null),
                "undefined" => Expression::Literal(Literal::Undefined),
                _ => Expression::Path(parse_path(&id)),
            }),
            Some(Token::Close) => Err(parse_error("Unexpected ')'", self.span)),
            Some(Token::Equals) => Err(parse_error("Unexpected '='", self.span)),
            None => Err(parse_error("Expected an expression", self.span)),
        }
    }

    fn params_and_hash(
        &mut self,
        in_subexpression: bool,
    ) -> TemplateResult<(Vec<Expression>, Vec<(String, Expression)>)> {
        let mut params = Vec::new();
        let mut hash = Vec::new();
        loop {
            match self.peek() {
                None => break,
                Some(Token::Close) if in_subexpression => break,
                _ => {}
            }
            if self.peek_is_hash_key() {
                let Some(Token::Id(key)) = self.next() else {
                    unreachable!("checked by peek_is_hash_key");
                };
                self.next();
                hash.push((key, self.expression()?));
            } else {
                params.push(self.expression()?);
            }
        }
        Ok((params, hash))
    }

    fn call(&mut self, in_subexpression: bool) -> TemplateResult<Call> {
        let target = self.expression()?;
        let (params, hash) = self.params_and_hash(in_subexpression)?;
        Ok(Call {
            target,
            params,
            hash,
        })
    }
}

fn parse_call(content: &str, span: Span) -> TemplateResult<Call> {
    let mut stream = TokenStream::new(content, span)?;
    let call = stream.call(false)?;
    if !stream.at_end() {
        return Err(parse_error("Unexpected ')'", span));
    }
    Ok(call)
}

/// Parse a path expression such as `../foo.bar`, `@root.x` or `this/[a b]`.
pub fn parse_path(raw: &str) -> PathExpr {
    let mut rest = raw;
    let data = rest.starts_with('@');
    if data {
        rest = &rest[1..];
    }
    let mut depth = 0;
    loop {
        if let Some(r) = rest.strip_prefix("../") {
            depth += 1;
            rest = r;
        } else if rest == ".." {
            depth += 1;
            rest = "";
        } else {
            break;
        }
    }

    let mut parts = Vec::new();
    let mut current = String::new();
    let mut chars = rest.chars().peekable();
    let mut bracketed = false;
    while let Some(c) = chars.next() {
        match c {
            '[' => {
                bracketed = true;
                for inner in chars.by_ref() {
                    if inner == ']' {
                        break;
                    }
                    current.push(inner);
                }
            }
            '.' | '/' => {
                push_segment(&mut parts, &mut current, bracketed);
                bracketed = false;
            }
            _ => current.push(c),
        }
    }
    push_segment(&mut parts, &mut current, bracketed);

    if !data && parts.first().is_some_and(|p| p == "this") {
        parts.remove(0);
    }

    PathExpr {
        data,
        depth,
        parts,
        original: raw.to_string(),
    }
}

fn push_segment(parts: &mut Vec<String>, current: &mut String, bracketed: bool) {
    if current.is_empty() && !bracketed {
        return;
    }
    parts.push(std::mem::take(current));
}

fn parse_partial(content: &str, span: Span) -> TemplateResult<(Partial, String)> {
    let trimmed = content.trim();
    let (name, raw_name, rest) = if trimmed.starts_with('(') {
        let mut stream = TokenStream::new(trimmed, span)?;
        let name = stream.expression()?;
        let (params, hash) = stream.params_and_hash(false)?;
        return Ok((
            Partial {
                name: PartialName::Dynamic(Box::new(name)),
                context: single_context(params, span)?,
                hash,
                span,
            },
            String::new(),
        ));
    } else if trimmed.starts_with('"') || trimmed.starts_with('\'') {
        let quote = &trimmed[..1];
        let end = trimmed[1..]
            .find(quote)
            .map(|i| i + 1)
            .ok_or_else(|| parse_error("Unterminated partial name", span))?;
        let name = trimmed[1..end].to_string();
        (
            PartialName::Literal(name.clone()),
            name,
            &trimmed[end + 1..],
        )
    } else {
        let end = trimmed
            .find(char::is_whitespace)
            .unwrap_or(trimmed.len());
        let name = trimmed[..end].to_string();
        if name.is_empty() {
            return Err(parse_error("Partial name expected", span));
        }
        (PartialName::Static(name.clone()), name, &trimmed[end..])
    };

    let mut stream = TokenStream::new(rest, span)?;
    let (params, hash) = stream.params_and_hash(false)?;
    Ok((
        Partial {
            name,
            context: single_context(params, span)?,
            hash,
            span,
        },
        raw_name,
    ))
}

fn single_context(mut params: Vec<Expression>, span: Span) -> TemplateResult<Option<Expression>> {
    match params.len() {
        0 => Ok(None),
        1 => Ok(params.pop()),
        _ => Err(parse_error(
            "Partials accept at most one context parameter",
            span,
        )),
    }
}

// ============================================================================
// Tree builder
// ============================================================================

enum Terminator {
    Eof,
    Else(Tag),
    Close(Tag),
}

struct TreeBuilder {
    pieces: std::vec::IntoIter<Piece>,
}

impl TreeBuilder {
    fn parse_program(&mut self) -> TemplateResult<(Vec<TemplateNode>, Terminator)> {
        let mut nodes = Vec::new();
        while let Some(piece) = self.pieces.next() {
            let tag = match piece {
                Piece::Text(text) => {
                    if !text.is_empty() {
                        nodes.push(TemplateNode::Text(text));
                    }
                    continue;
                }
                Piece::Tag(tag) => tag,
            };
            match tag.kind {
                TagKind::Mustache { escaped } => {
                    nodes.push(TemplateNode::Mustache(Mustache {
                        call: parse_call(&tag.content, tag.span)?,
                        escaped,
                        span: tag.span,
                    }));
                }
                TagKind::Comment => nodes.push(TemplateNode::Comment(tag.content)),
                TagKind::Partial => {
                    let (partial, _) = parse_partial(&tag.content, tag.span)?;
                    nodes.push(TemplateNode::Partial(partial));
                }
                TagKind::Open | TagKind::OpenInverse => {
                    let call = parse_call(&tag.content, tag.span)?;
                    let close_name = block_name(&call, tag.span)?;
                    let inverted = tag.kind == TagKind::OpenInverse;
                    let block = self.parse_block_rest(call, &close_name, inverted, tag.span)?;
                    nodes.push(TemplateNode::Block(block));
                }
                TagKind::OpenPartialBlock => {
                    let (partial, raw_name) = parse_partial(&tag.content, tag.span)?;
                    let (fallback, end) = self.parse_program()?;
                    match end {
                        Terminator::Close(close) => {
                            if !raw_name.is_empty() {
                                expect_close(&close, &raw_name)?;
                            }
                        }
                        Terminator::Else(other) => {
                            return Err(parse_error("Unexpected {{else}} in partial block", other.span));
                        }
                        Terminator::Eof => {
                            return Err(parse_error(
                                format!("Partial block '{}' is never closed", raw_name),
                                tag.span,
                            ));
                        }
                    }
                    nodes.push(TemplateNode::PartialBlock(PartialBlock {
                        partial,
                        fallback: Arc::new(fallback),
                    }));
                }
                TagKind::OpenDecorator => {
                    let mut stream = TokenStream::new(&tag.content, tag.span)?;
                    let name = match (stream.next(), stream.next()) {
                        (Some(Token::Id(decorator)), Some(Token::Str(name)))
                            if decorator == "inline" =>
                        {
                            name
                        }
                        (Some(Token::Id(decorator)), _) if decorator == "inline" => {
                            return Err(parse_error("Inline partial name must be a string", tag.span));
                        }
                        _ => {
                            return Err(parse_error(
                                format!("Unsupported decorator block '{}'", tag.content.trim()),
                                tag.span,
                            ));
                        }
                    };
                    let (body, end) = self.parse_program()?;
                    match end {
                        Terminator::Close(close) => expect_close(&close, "inline")?,
                        _ => {
                            return Err(parse_error(
                                format!("Inline partial '{}' is never closed", name),
                                tag.span,
                            ));
                        }
                    }
                    nodes.push(TemplateNode::InlinePartial(InlinePartial {
                        name,
                        body: Arc::new(body),
                        span: tag.span,
                    }));
                }
                TagKind::Else => return Ok((nodes, Terminator::Else(tag))),
                TagKind::Close => return Ok((nodes, Terminator::Close(tag))),
            }
        }
        Ok((nodes, Terminator::Eof))
    }

    fn parse_block_rest(
        &mut self,
        call: Call,
        close_name: &str,
        inverted: bool,
        span: Span,
    ) -> TemplateResult<Block> {
        let (first, end) = self.parse_program()?;
        let (program, inverse) = match end {
            Terminator::Close(close) => {
                expect_close(&close, close_name)?;
                (first, None)
            }
            Terminator::Else(else_tag) if else_tag.content.trim().is_empty() => {
                let (second, end) = self.parse_program()?;
                match end {
                    Terminator::Close(close) => expect_close(&close, close_name)?,
                    Terminator::Else(other) => {
                        return Err(parse_error("Unexpected second {{else}}", other.span));
                    }
                    Terminator::Eof => {
                        return Err(parse_error(
                            format!("Block '{}' is never closed", close_name),
                            span,
                        ));
                    }
                }
                (first, Some(second))
            }
            Terminator::Else(else_tag) => {
                // `{{else if x}}` opens a chained block sharing our closing tag
                let chained_call = parse_call(&else_tag.content, else_tag.span)?;
                let chained = self.parse_block_rest(chained_call, close_name, false, else_tag.span)?;
                (first, Some(vec![TemplateNode::Block(chained)]))
            }
            Terminator::Eof => {
                return Err(parse_error(
                    format!("Block '{}' is never closed", close_name),
                    span,
                ));
            }
        };

        let (program, inverse) = if inverted {
            (inverse.unwrap_or_default(), Some(program))
        } else {
            (program, inverse)
        };

        Ok(Block {
            call,
            program: Arc::new(program),
            inverse: inverse.map(Arc::new),
            span,
        })
    }
}

fn block_name(call: &Call, span: Span) -> TemplateResult<String> {
    match &call.target {
        Expression::Path(path) => Ok(path.original.clone()),
        _ => Err(parse_error("Block name must be a path", span)),
    }
}

fn expect_close(close: &Tag, expected: &str) -> TemplateResult<()> {
    let name = close.content.trim();
    if name == expected {
        Ok(())
    } else {
        Err(parse_error(
            format!("{} doesn't match {}", expected, name),
            close.span,
        ))
    }
}
