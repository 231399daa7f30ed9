/*
 * capture.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! The `capture` / `expose` helper pair.
//!
//! A template cannot reach the context of an enclosing block from inside a
//! sub-template that is compiled and rendered later. `capture` snapshots the
//! implicit context and `@data` frame under a fresh key and wraps its
//! rendered body in an `{{#expose key}}…{{/expose}}` marker. When that output
//! is itself compiled and rendered with the matching [`CapturedContext`],
//! `expose` restores the snapshot around the body.
//!
//! Both helpers find their state in hidden `@data` slots that compiled
//! templates fill from their render options. Outside such a render they
//! degrade to plain block rendering.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use rspace_handlebars::{DataFrame, HelperDef, HelperOptions, TemplateResult, TemplateValue};
use serde::Serialize;

static NEXT_CAPTURE_KEY: AtomicU64 = AtomicU64::new(0);

/// The positional part of a `@data` frame, without slots or custom fields.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CapturedData {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub root: Option<Arc<TemplateValue>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub index: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<TemplateValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last: Option<bool>,
    #[serde(rename = "_parent", skip_serializing_if = "Option::is_none")]
    pub parent: Option<Box<CapturedData>>,
}

impl CapturedData {
    /// Snapshot `frame` and its ancestors.
    pub fn from_frame(frame: &DataFrame) -> Self {
        Self {
            root: frame.root.clone(),
            index: frame.index,
            key: frame.key.clone(),
            first: frame.first,
            last: frame.last,
            parent: frame
                .parent
                .as_deref()
                .map(|parent| Box::new(Self::from_frame(parent))),
        }
    }

    /// Lay the snapshot over `current`: every captured field replaces the
    /// current one at the same depth, everything else is kept.
    pub fn overlay_onto(&self, current: Option<&DataFrame>) -> DataFrame {
        let mut frame = current.cloned().unwrap_or_default();
        if let Some(root) = &self.root {
            frame.root = Some(Arc::clone(root));
        }
        if let Some(index) = self.index {
            frame.index = Some(index);
        }
        if let Some(key) = &self.key {
            frame.key = Some(key.clone());
        }
        if let Some(first) = self.first {
            frame.first = Some(first);
        }
        if let Some(last) = self.last {
            frame.last = Some(last);
        }
        if let Some(parent) = &self.parent {
            let current_parent = current.and_then(|c| c.parent.as_deref());
            frame.parent = Some(Arc::new(parent.overlay_onto(current_parent)));
        }
        frame
    }
}

/// One captured environment.
#[derive(Debug, Clone, PartialEq)]
pub struct CapturedEntry {
    pub context: TemplateValue,
    pub data: CapturedData,
}

type CaptureStore = Arc<Mutex<HashMap<u64, CapturedEntry>>>;

/// Sink that `capture` writes snapshots into. Create one per outer render.
#[derive(Debug, Clone, Default)]
pub struct ContextCapturer {
    store: CaptureStore,
}

impl ContextCapturer {
    /// `@data` slot the capturer is handed to helpers under.
    pub const DATA_KEY: &'static str = "contextCapturer";

    pub fn new() -> Self {
        Self::default()
    }

    /// Store a snapshot and return its key. Keys are unique process-wide.
    pub fn capture(&self, context: &TemplateValue, data: &DataFrame) -> u64 {
        let key = NEXT_CAPTURE_KEY.fetch_add(1, Ordering::Relaxed);
        let entry = CapturedEntry {
            context: context.clone(),
            data: CapturedData::from_frame(data),
        };
        self.store
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key, entry);
        key
    }

    /// Read-only view over everything this capturer has stored.
    pub fn captured_context(&self) -> CapturedContext {
        CapturedContext {
            store: Arc::clone(&self.store),
        }
    }

    pub fn len(&self) -> usize {
        self.store
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Source that `expose` reads snapshots from.
#[derive(Debug, Clone)]
pub struct CapturedContext {
    store: CaptureStore,
}

impl CapturedContext {
    /// `@data` slot the captured context is handed to helpers under.
    pub const DATA_KEY: &'static str = "capturedContext";

    pub fn get(&self, key: u64) -> Option<CapturedEntry> {
        self.store
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&key)
            .cloned()
    }
}

/// Combine a captured context (`inner`) with the context at the expose site.
///
/// Maps are merged shallowly with `inner` winning. Any other `inner` value
/// replaces `outer`, unless it has no own keys.
pub fn merge_context(inner: &TemplateValue, outer: &TemplateValue) -> TemplateValue {
    match inner {
        TemplateValue::Map(inner_map) => {
            let mut merged = outer.as_map().cloned().unwrap_or_default();
            for (key, value) in inner_map {
                merged.insert(key.clone(), value.clone());
            }
            TemplateValue::Map(merged)
        }
        _ if inner.has_own_keys() => inner.clone(),
        _ => outer.clone(),
    }
}

/// `{{#capture}}…{{/capture}}`
pub fn capture(
    _params: &[TemplateValue],
    options: &mut HelperOptions<'_, '_>,
) -> TemplateResult<TemplateValue> {
    let context = options.context();
    let Some(capturer) = options
        .data()
        .slot_as::<ContextCapturer>(ContextCapturer::DATA_KEY)
    else {
        return options.render_program(context, None).map(TemplateValue::String);
    };

    let key = capturer.capture(context, options.data());
    let body = options.render_program(context, None)?;
    Ok(TemplateValue::String(format!(
        "{{{{#expose {key}}}}}{body}{{{{/expose}}}}"
    )))
}

/// `{{#expose key}}…{{/expose}}`
pub fn expose(
    params: &[TemplateValue],
    options: &mut HelperOptions<'_, '_>,
) -> TemplateResult<TemplateValue> {
    let context = options.context();
    let key = params
        .first()
        .and_then(TemplateValue::as_f64)
        .filter(|key| *key >= 0.0 && key.fract() == 0.0)
        .map(|key| key as u64);
    let source = options
        .data()
        .slot_as::<CapturedContext>(CapturedContext::DATA_KEY);

    let entry = match (key, source) {
        (Some(key), Some(source)) => source.get(key),
        _ => None,
    };
    let Some(entry) = entry else {
        tracing::warn!(
            key = ?params.first(),
            "expose: no captured context for key, rendering with current context"
        );
        return options.render_program(context, None).map(TemplateValue::String);
    };

    let merged = merge_context(&entry.context, context);
    let data = entry.data.overlay_onto(Some(options.data()));
    options
        .render_program(&merged, Some(data))
        .map(TemplateValue::String)
}

/// Helpers every scope starts with.
pub fn default_helpers() -> Vec<(&'static str, HelperDef)> {
    vec![
        ("capture", Arc::new(capture) as HelperDef),
        ("expose", Arc::new(expose) as HelperDef),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rspace_handlebars::{Registry, Template};
    use serde_json::json;

    fn registry() -> Registry {
        let mut registry = Registry::new();
        for (name, helper) in default_helpers() {
            registry.register_helper_def(name, helper);
        }
        registry
    }

    fn value(json: serde_json::Value) -> TemplateValue {
        TemplateValue::from(json)
    }

    fn render(
        registry: &Registry,
        source: &str,
        context: &TemplateValue,
        capturer: Option<&ContextCapturer>,
        captured: Option<&CapturedContext>,
    ) -> String {
        let mut data = DataFrame::new();
        if let Some(capturer) = capturer {
            data.set_slot(ContextCapturer::DATA_KEY, Arc::new(capturer.clone()));
        }
        if let Some(captured) = captured {
            data.set_slot(CapturedContext::DATA_KEY, Arc::new(captured.clone()));
        }
        let template = Template::parse(source).unwrap();
        registry.render_with_data(&template, context, data).unwrap()
    }

    #[test]
    fn test_merge_context() {
        let outer = value(json!({"a": 1, "b": 2}));
        assert_eq!(
            merge_context(&value(json!({"b": 3, "c": 4})), &outer),
            value(json!({"a": 1, "b": 3, "c": 4}))
        );
        assert_eq!(merge_context(&value(json!({})), &outer), outer);
        assert_eq!(merge_context(&value(json!("text")), &outer), value(json!("text")));
        assert_eq!(merge_context(&value(json!([1])), &outer), value(json!([1])));
        assert_eq!(merge_context(&value(json!(42)), &outer), outer);
        assert_eq!(merge_context(&TemplateValue::Null, &outer), outer);
        assert_eq!(merge_context(&value(json!("")), &outer), outer);
        assert_eq!(
            merge_context(&value(json!({"x": 1})), &value(json!("scalar"))),
            value(json!({"x": 1}))
        );
    }

    #[test]
    fn test_capture_without_sink_renders_block() {
        let out = render(
            &registry(),
            "[{{#capture}}{{x}}{{/capture}}]",
            &value(json!({"x": 1})),
            None,
            None,
        );
        assert_eq!(out, "[1]");
    }

    #[test]
    fn test_capture_emits_expose_marker() {
        let capturer = ContextCapturer::new();
        let out = render(
            &registry(),
            "{{#capture}}<b>{{x}}</b>{{/capture}}",
            &value(json!({"x": 1})),
            Some(&capturer),
            None,
        );
        assert_eq!(capturer.len(), 1);
        assert!(out.starts_with("{{#expose "), "{out}");
        assert!(out.ends_with("}}<b>1</b>{{/expose}}"), "{out}");
    }

    #[test]
    fn test_round_trip_restores_captured_context() {
        let registry = registry();
        let capturer = ContextCapturer::new();
        let marked = render(
            &registry,
            r"{{#each items}}{{#capture}}\{{name}}@\{{@index}}{{/capture}};{{/each}}",
            &value(json!({"items": [{"name": "a"}, {"name": "b"}]})),
            Some(&capturer),
            None,
        );
        assert_eq!(capturer.len(), 2);

        let captured = capturer.captured_context();
        let out = render(
            &registry,
            &marked,
            &value(json!({"name": "unrelated"})),
            None,
            Some(&captured),
        );
        assert_eq!(out, "a@0;b@1;");
    }

    #[test]
    fn test_expose_with_unknown_key_uses_current_context() {
        let captured = ContextCapturer::new().captured_context();
        let out = render(
            &registry(),
            "{{#expose 999999}}{{x}}{{/expose}}",
            &value(json!({"x": "current"})),
            None,
            Some(&captured),
        );
        assert_eq!(out, "current");
    }

    #[test]
    fn test_slot_of_other_kind_is_ignored() {
        let registry = registry();
        let mut data = DataFrame::new();
        data.set_slot(ContextCapturer::DATA_KEY, Arc::new("not a capturer".to_string()));
        let template = Template::parse("{{#capture}}{{x}}{{/capture}}").unwrap();
        let out = registry
            .render_with_data(&template, &value(json!({"x": 7})), data)
            .unwrap();
        assert_eq!(out, "7");
    }

    #[test]
    fn test_overlay_replaces_fields_at_every_depth() {
        let mut outer = DataFrame::with_root(value(json!("current-root")));
        outer.index = Some(9);
        outer.set_field("custom", "kept");
        let outer = Arc::new(outer);
        let mut current = DataFrame::child(&outer);
        current.first = Some(false);

        let captured = CapturedData {
            index: Some(1),
            parent: Some(Box::new(CapturedData {
                index: Some(4),
                ..CapturedData::default()
            })),
            ..CapturedData::default()
        };
        let frame = captured.overlay_onto(Some(&current));

        assert_eq!(frame.index, Some(1));
        assert_eq!(frame.first, Some(false));
        assert_eq!(frame.lookup("custom"), Some(TemplateValue::from("kept")));
        assert_eq!(frame.ancestor(1).and_then(|f| f.index), Some(4));
        assert_eq!(
            frame.ancestor(1).and_then(|f| f.lookup("root")),
            Some(value(json!("current-root")))
        );
    }

    #[test]
    fn test_captured_data_serializes_trimmed() {
        let mut top = DataFrame::with_root(value(json!({"r": 1})));
        top.set_field("private", "dropped");
        let top = Arc::new(top);
        let mut child = DataFrame::child(&top);
        child.index = Some(2);
        child.first = Some(false);

        let json = serde_json::to_value(CapturedData::from_frame(&child)).unwrap();
        assert_eq!(
            json,
            json!({
                "root": {"r": 1},
                "index": 2,
                "first": false,
                "_parent": {"root": {"r": 1}}
            })
        );
    }
}
