/*
 * registry.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! Helper and partial registry.
//!
//! Helpers are fixed once the registry is shared; partials can still be
//! registered through a shared reference so that dependencies discovered
//! after construction can be added before rendering.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use serde::{Deserialize, Serialize};

use crate::ast::Template;
use crate::data::DataFrame;
use crate::error::TemplateResult;
use crate::helpers::{HelperDef, HelperOptions, builtin_helpers};
use crate::render::{Frame, RenderState, render_nodes};
use crate::value::TemplateValue;

/// Rendering limits and modes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RenderConfig {
    /// Maximum partial nesting depth before a render fails.
    pub max_partial_depth: usize,
    /// Treat missing values as errors.
    pub strict: bool,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            max_partial_depth: 50,
            strict: false,
        }
    }
}

pub struct Registry {
    helpers: HashMap<String, HelperDef>,
    partials: RwLock<HashMap<String, Arc<Template>>>,
    config: RenderConfig,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut helpers: Vec<&String> = self.helpers.keys().collect();
        helpers.sort();
        let partials = self.partials.read().unwrap_or_else(PoisonError::into_inner);
        let mut partial_names: Vec<&String> = partials.keys().collect();
        partial_names.sort();
        f.debug_struct("Registry")
            .field("helpers", &helpers)
            .field("partials", &partial_names)
            .field("config", &self.config)
            .finish()
    }
}

impl Registry {
    /// A registry with the built-in helpers and no partials.
    pub fn new() -> Self {
        Self::with_config(RenderConfig::default())
    }

    pub fn with_config(config: RenderConfig) -> Self {
        Self {
            helpers: builtin_helpers()
                .into_iter()
                .map(|(name, helper)| (name.to_string(), helper))
                .collect(),
            partials: RwLock::new(HashMap::new()),
            config,
        }
    }

    pub fn config(&self) -> &RenderConfig {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut RenderConfig {
        &mut self.config
    }

    /// Register a helper, replacing any helper with the same name.
    pub fn register_helper<F>(&mut self, name: impl Into<String>, helper: F)
    where
        F: Fn(&[TemplateValue], &mut HelperOptions<'_, '_>) -> TemplateResult<TemplateValue>
            + Send
            + Sync
            + 'static,
    {
        self.helpers.insert(name.into(), Arc::new(helper));
    }

    pub fn register_helper_def(&mut self, name: impl Into<String>, helper: HelperDef) {
        self.helpers.insert(name.into(), helper);
    }

    pub fn helper(&self, name: &str) -> Option<&HelperDef> {
        self.helpers.get(name)
    }

    pub fn has_helper(&self, name: &str) -> bool {
        self.helpers.contains_key(name)
    }

    /// Register a parsed partial. Returns the partial previously registered
    /// under `name`, if any.
    pub fn register_partial(
        &self,
        name: impl Into<String>,
        template: Arc<Template>,
    ) -> Option<Arc<Template>> {
        self.partials
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.into(), template)
    }

    /// Parse and register a partial.
    pub fn register_partial_source(&self, name: impl Into<String>, source: &str) -> TemplateResult<()> {
        let template = Template::parse(source)?;
        self.register_partial(name, Arc::new(template));
        Ok(())
    }

    pub fn unregister_partial(&self, name: &str) -> Option<Arc<Template>> {
        self.partials
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(name)
    }

    pub fn partial(&self, name: &str) -> Option<Arc<Template>> {
        self.partials
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    pub fn has_partial(&self, name: &str) -> bool {
        self.partials
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(name)
    }

    /// Render `template` against `context`.
    pub fn render(&self, template: &Template, context: &TemplateValue) -> TemplateResult<String> {
        self.render_with_data(template, context, DataFrame::new())
    }

    /// Render with a caller-supplied `@data` frame. `@root` defaults to
    /// `context` when the frame does not set it.
    pub fn render_with_data(
        &self,
        template: &Template,
        context: &TemplateValue,
        mut data: DataFrame,
    ) -> TemplateResult<String> {
        if data.root.is_none() {
            data.root = Some(Arc::new(context.clone()));
        }
        let frame = Frame {
            context,
            parent: None,
            data: Arc::new(data),
        };
        let mut state = RenderState::new(self);
        render_nodes(&template.nodes, &frame, &mut state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_builtins_registered() {
        let registry = Registry::new();
        for name in ["if", "unless", "each", "with", "lookup", "log"] {
            assert!(registry.has_helper(name), "{name}");
        }
        assert!(!registry.has_helper("capture"));
    }

    #[test]
    fn test_register_and_replace_partial() {
        let registry = Registry::new();
        assert!(!registry.has_partial("p"));
        registry.register_partial_source("p", "one").unwrap();
        let previous = registry.register_partial("p", Arc::new(Template::parse("two").unwrap()));
        assert!(previous.is_some());

        let template = Template::parse("{{> p}}").unwrap();
        assert_eq!(registry.render(&template, &TemplateValue::Null).unwrap(), "two");

        registry.unregister_partial("p");
        assert!(!registry.has_partial("p"));
    }

    #[test]
    fn test_render_config_defaults_and_serde() {
        let config: RenderConfig = serde_json::from_str("{\"strict\": true}").unwrap();
        assert_eq!(
            config,
            RenderConfig {
                max_partial_depth: 50,
                strict: true
            }
        );
        assert_eq!(
            serde_json::to_value(RenderConfig::default()).unwrap(),
            serde_json::json!({"maxPartialDepth": 50, "strict": false})
        );
    }

    #[test]
    fn test_max_partial_depth_is_configurable() {
        let registry = Registry::with_config(RenderConfig {
            max_partial_depth: 2,
            strict: false,
        });
        registry.register_partial_source("a", "a{{> b}}").unwrap();
        registry.register_partial_source("b", "b{{> c}}").unwrap();
        registry.register_partial_source("c", "c").unwrap();
        let template = Template::parse("{{> a}}").unwrap();
        let err = registry.render(&template, &TemplateValue::Null).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Recursive partial inclusion detected (depth > 2): c"
        );
    }

    #[test]
    fn test_render_with_data_keeps_supplied_root() {
        let registry = Registry::new();
        let template = Template::parse("{{@root.x}}|{{x}}").unwrap();
        let data = DataFrame::with_root(TemplateValue::from(serde_json::json!({"x": "outer"})));
        let context = TemplateValue::from(serde_json::json!({"x": "inner"}));
        assert_eq!(
            registry.render_with_data(&template, &context, data).unwrap(),
            "outer|inner"
        );
    }
}
