/*
 * visitor.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! AST traversal.
//!
//! [`walk`] visits every node of a template, descending into block bodies,
//! partial-block fallbacks and inline partial definitions. Callers implement
//! only the callbacks they care about.

use std::sync::Arc;

use crate::ast::{
    Block, InlinePartial, Mustache, Partial, PartialBlock, PartialName, Template, TemplateNode,
};

/// Callbacks invoked by [`walk`]. All methods default to doing nothing.
pub trait Visitor {
    fn visit_text(&mut self, _text: &str) {}
    fn visit_comment(&mut self, _comment: &str) {}
    fn visit_mustache(&mut self, _mustache: &Mustache) {}
    /// Called before the block's program and inverse are walked.
    fn visit_block(&mut self, _block: &Block) {}
    fn visit_partial(&mut self, _partial: &Partial) {}
    /// Called before the fallback is walked. The invoked partial is also
    /// reported through [`Visitor::visit_partial`].
    fn visit_partial_block(&mut self, _block: &PartialBlock) {}
    fn visit_inline_partial(&mut self, _inline: &InlinePartial) {}
}

/// Walk the whole template in document order.
pub fn walk<V: Visitor + ?Sized>(template: &Template, visitor: &mut V) {
    walk_nodes(&template.nodes, visitor);
}

pub fn walk_nodes<V: Visitor + ?Sized>(nodes: &[TemplateNode], visitor: &mut V) {
    for node in nodes {
        match node {
            TemplateNode::Text(text) => visitor.visit_text(text),
            TemplateNode::Comment(comment) => visitor.visit_comment(comment),
            TemplateNode::Mustache(mustache) => visitor.visit_mustache(mustache),
            TemplateNode::Block(block) => {
                visitor.visit_block(block);
                walk_nodes(&block.program, visitor);
                if let Some(inverse) = &block.inverse {
                    walk_nodes(inverse, visitor);
                }
            }
            TemplateNode::Partial(partial) => visitor.visit_partial(partial),
            TemplateNode::PartialBlock(block) => {
                visitor.visit_partial_block(block);
                visitor.visit_partial(&block.partial);
                walk_nodes(&block.fallback, visitor);
            }
            TemplateNode::InlinePartial(inline) => {
                visitor.visit_inline_partial(inline);
                walk_nodes(&inline.body, visitor);
            }
        }
    }
}

/// Rewrite statically named partial invocations in place.
///
/// `rewrite` receives each bare partial name and returns the replacement, or
/// `None` to leave the name untouched. Shared subtrees are copied on write.
pub fn rewrite_partial_names<F>(template: &mut Template, rewrite: &mut F)
where
    F: FnMut(&str) -> Option<String>,
{
    rewrite_nodes(&mut template.nodes, rewrite);
}

fn rewrite_nodes<F>(nodes: &mut [TemplateNode], rewrite: &mut F)
where
    F: FnMut(&str) -> Option<String>,
{
    for node in nodes {
        match node {
            TemplateNode::Partial(partial) => rewrite_partial(partial, rewrite),
            TemplateNode::PartialBlock(block) => {
                rewrite_partial(&mut block.partial, rewrite);
                rewrite_nodes(Arc::make_mut(&mut block.fallback).as_mut_slice(), rewrite);
            }
            TemplateNode::Block(block) => {
                rewrite_nodes(Arc::make_mut(&mut block.program).as_mut_slice(), rewrite);
                if let Some(inverse) = &mut block.inverse {
                    rewrite_nodes(Arc::make_mut(inverse).as_mut_slice(), rewrite);
                }
            }
            TemplateNode::InlinePartial(inline) => {
                rewrite_nodes(Arc::make_mut(&mut inline.body).as_mut_slice(), rewrite);
            }
            TemplateNode::Text(_) | TemplateNode::Comment(_) | TemplateNode::Mustache(_) => {}
        }
    }
}

fn rewrite_partial<F>(partial: &mut Partial, rewrite: &mut F)
where
    F: FnMut(&str) -> Option<String>,
{
    if let PartialName::Static(name) = &mut partial.name {
        if let Some(replacement) = rewrite(name) {
            *name = replacement;
        }
    }
}
