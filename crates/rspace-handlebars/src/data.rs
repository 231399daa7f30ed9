/*
 * data.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! The `@data` channel.
//!
//! Alongside the implicit context every render carries a chain of
//! [`DataFrame`]s. Iteration helpers push a child frame with `@index`,
//! `@key`, `@first` and `@last`; `@root` always names the outermost context.
//! Frames also carry typed slots, which host code uses to hand opaque
//! objects (such as a context capturer) to helpers without exposing them to
//! templates.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;

use crate::value::TemplateValue;

type Slot = Arc<dyn Any + Send + Sync>;

/// One level of the `@data` chain.
#[derive(Clone, Default)]
pub struct DataFrame {
    pub root: Option<Arc<TemplateValue>>,
    pub index: Option<usize>,
    pub key: Option<TemplateValue>,
    pub first: Option<bool>,
    pub last: Option<bool>,
    pub parent: Option<Arc<DataFrame>>,
    /// Additional `@name` variables.
    pub fields: IndexMap<String, TemplateValue>,
    slots: HashMap<&'static str, Slot>,
}

impl DataFrame {
    pub fn new() -> Self {
        Self::default()
    }

    /// A top-level frame whose `@root` is `root`.
    pub fn with_root(root: TemplateValue) -> Self {
        Self {
            root: Some(Arc::new(root)),
            ..Self::default()
        }
    }

    /// A child frame that inherits everything from `parent` and links back to it.
    ///
    /// Iteration variables are copied, so `@index` inside a `{{#with}}` nested
    /// in `{{#each}}` still names the enclosing iteration. `@../index` reaches
    /// the parent frame explicitly.
    pub fn child(parent: &Arc<DataFrame>) -> Self {
        Self {
            root: parent.root.clone(),
            index: parent.index,
            key: parent.key.clone(),
            first: parent.first,
            last: parent.last,
            parent: Some(Arc::clone(parent)),
            fields: parent.fields.clone(),
            slots: parent.slots.clone(),
        }
    }

    /// Resolve `@name`.
    pub fn lookup(&self, name: &str) -> Option<TemplateValue> {
        match name {
            "root" => self.root.as_deref().cloned(),
            "index" => self.index.map(TemplateValue::from),
            "key" => self.key.clone(),
            "first" => self.first.map(TemplateValue::Bool),
            "last" => self.last.map(TemplateValue::Bool),
            _ => self.fields.get(name).cloned(),
        }
    }

    /// The frame `depth` levels up the chain (`@../index` is depth 1).
    pub fn ancestor(&self, depth: usize) -> Option<&DataFrame> {
        let mut frame = self;
        for _ in 0..depth {
            frame = frame.parent.as_deref()?;
        }
        Some(frame)
    }

    pub fn set_field(&mut self, name: impl Into<String>, value: impl Into<TemplateValue>) {
        self.fields.insert(name.into(), value.into());
    }

    /// Attach an opaque value under `key`. Slots are inherited by child frames.
    pub fn set_slot<T: Any + Send + Sync>(&mut self, key: &'static str, value: Arc<T>) {
        self.slots.insert(key, value);
    }

    pub fn slot(&self, key: &str) -> Option<&Slot> {
        self.slots.get(key)
    }

    /// Downcast a slot to its concrete type.
    pub fn slot_as<T: Any + Send + Sync>(&self, key: &str) -> Option<Arc<T>> {
        self.slots
            .get(key)
            .and_then(|slot| Arc::clone(slot).downcast::<T>().ok())
    }
}

impl fmt::Debug for DataFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut slots: Vec<&&str> = self.slots.keys().collect();
        slots.sort();
        f.debug_struct("DataFrame")
            .field("root", &self.root)
            .field("index", &self.index)
            .field("key", &self.key)
            .field("first", &self.first)
            .field("last", &self.last)
            .field("parent", &self.parent)
            .field("fields", &self.fields)
            .field("slots", &slots)
            .finish()
    }
}
