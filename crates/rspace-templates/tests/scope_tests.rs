/*
 * scope_tests.rs
 * Copyright (c) 2025 Posit, PBC
 *
 * Integration tests for template scopes over counting storage and prefix mocks.
 */

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use pretty_assertions::assert_eq;
use rspace_templates::{
    ContextCapturer, InMemoryTemplateStorage, NamespaceRegistry, PrefixResolver,
    RemoteTemplateFetcher, RenderOptions, TemplateBody, TemplateScope, TemplateScopeBuilder,
    TemplateServiceError, TemplateServiceResult, TemplateStorage, TemplateValue,
};
use serde_json::json;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Route engine logs to the test harness. Set `RUST_LOG=rspace_templates=debug` to see them.
fn init_tracing() {
    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_test_writer())
        .try_init();
}

/// In-memory storage that counts loads and yields once per load, so
/// concurrent callers overlap.
#[derive(Default)]
struct CountingStorage {
    inner: InMemoryTemplateStorage,
    loads: AtomicUsize,
}

impl CountingStorage {
    fn with_template(self, resource: &str, html: &str) -> Self {
        self.inner.insert(resource, html);
        self
    }

    fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TemplateStorage for CountingStorage {
    async fn load_template_body(&self, resource: &str) -> TemplateServiceResult<TemplateBody> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        tokio::task::yield_now().await;
        self.inner.load_template_body(resource).await
    }
}

#[derive(Default)]
struct CountingPrefixes {
    inner: NamespaceRegistry,
    calls: AtomicUsize,
}

impl PrefixResolver for CountingPrefixes {
    fn resolve_short_names(&self, names: &[String]) -> TemplateServiceResult<Vec<String>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.resolve_short_names(names)
    }
}

fn setup(storage: CountingStorage) -> (Arc<CountingStorage>, Arc<RemoteTemplateFetcher>) {
    let storage = Arc::new(storage);
    let fetcher = RemoteTemplateFetcher::new(Arc::clone(&storage) as Arc<dyn TemplateStorage>);
    (storage, Arc::new(fetcher))
}

fn ctx(value: serde_json::Value) -> TemplateValue {
    TemplateValue::from(value)
}

fn render(template: &rspace_templates::CompiledTemplate, value: serde_json::Value) -> String {
    template
        .render(&ctx(value), &RenderOptions::default())
        .unwrap()
}

#[tokio::test]
async fn test_hello_world_scenario() {
    let (storage, fetcher) =
        setup(CountingStorage::default().with_template("urn:example:greeting", "World"));
    let scope = TemplateScopeBuilder::new(fetcher).build();

    let template = scope
        .compile("Hello {{> urn:example:greeting}}")
        .await
        .unwrap();
    assert_eq!(render(&template, json!({})), "Hello World");
    assert_eq!(storage.loads(), 1);
}

#[tokio::test]
async fn test_compile_is_idempotent_and_cached() {
    let (storage, _) = setup(
        CountingStorage::default().with_template("http://example.org/t/card", "<i>{{name}}</i>"),
    );
    let prefixes = Arc::new(CountingPrefixes {
        inner: NamespaceRegistry::new().with_prefix("ex", "http://example.org/t/"),
        calls: AtomicUsize::new(0),
    });
    let fetcher = RemoteTemplateFetcher::new(Arc::clone(&storage) as Arc<dyn TemplateStorage>)
        .with_prefixes(Arc::clone(&prefixes) as Arc<dyn PrefixResolver>);
    let fetcher = Arc::new(fetcher);
    let scope = TemplateScopeBuilder::new(Arc::clone(&fetcher)).build();

    let source = "<p>{{> ex:card}}</p>";
    let first = scope.compile(source).await.unwrap();
    assert_eq!(storage.loads(), 1);
    assert_eq!(prefixes.calls.load(Ordering::SeqCst), 1);

    // a second resolution would have to hit storage again
    fetcher.purge();
    let second = scope.compile(source).await.unwrap();
    assert_eq!(storage.loads(), 1);
    assert_eq!(prefixes.calls.load(Ordering::SeqCst), 1);

    let data = json!({"name": "Ada & Bob"});
    assert_eq!(render(&first, data.clone()), "<p><i>Ada &amp; Bob</i></p>");
    assert_eq!(render(&first, data.clone()), render(&second, data));
}

#[tokio::test]
async fn test_concurrent_compiles_share_one_fetch() {
    init_tracing();
    let (storage, fetcher) =
        setup(CountingStorage::default().with_template("urn:shared", "shared"));
    let left = TemplateScopeBuilder::new(Arc::clone(&fetcher)).build();
    let right = TemplateScopeBuilder::new(Arc::clone(&fetcher)).build();

    let (a, b) = futures::join!(
        left.compile("L {{> urn:shared}}"),
        right.compile("R {{> urn:shared}}")
    );
    assert_eq!(render(&a.unwrap(), json!({})), "L shared");
    assert_eq!(render(&b.unwrap(), json!({})), "R shared");
    assert_eq!(storage.loads(), 1);
}

#[tokio::test]
#[allow(deprecated)]
async fn test_cycle_resolves_once_per_participant() {
    let (storage, fetcher) = setup(
        CountingStorage::default()
            .with_template("urn:a", "a({{> urn:b}})")
            .with_template("urn:b", "b{{#if deeper}}{{> urn:a}}{{/if}}"),
    );
    let scope = TemplateScopeBuilder::new(fetcher).build();

    let template = scope.compile("{{> urn:a}}").await.unwrap();
    assert_eq!(render(&template, json!({})), "a(b)");
    assert_eq!(storage.loads(), 2);

    // both participants are registered on the scope
    let b_only = scope.compile_without_remote("[{{> urn:b}}]").unwrap();
    assert_eq!(render(&b_only, json!({})), "[b]");
}

#[tokio::test]
async fn test_local_partial_takes_precedence_over_storage() {
    let (storage, fetcher) =
        setup(CountingStorage::default().with_template("urn:example:greeting", "Remote"));
    let mut builder = TemplateScopeBuilder::new(fetcher);
    builder
        .register_partial("urn:example:greeting", "Local")
        .unwrap();
    let scope = builder.build();

    let template = scope
        .compile("Hello {{> urn:example:greeting}}")
        .await
        .unwrap();
    assert_eq!(render(&template, json!({})), "Hello Local");
    assert_eq!(storage.loads(), 0);
}

#[tokio::test]
async fn test_invalidate_refetches_changed_templates() {
    let (storage, fetcher) = setup(CountingStorage::default().with_template("urn:note", "v1"));
    let scope = TemplateScopeBuilder::new(fetcher).build();
    let source = "{{> urn:note}}";

    let before = scope.compile(source).await.unwrap();
    assert_eq!(render(&before, json!({})), "v1");

    storage.inner.insert("urn:note", "v2");
    let cached = scope.compile(source).await.unwrap();
    assert_eq!(render(&cached, json!({})), "v1");

    scope.invalidate();
    let after = scope.compile(source).await.unwrap();
    assert_eq!(render(&after, json!({})), "v2");
    assert_eq!(storage.loads(), 2);
}

#[tokio::test]
async fn test_dependency_errors_are_chained() {
    init_tracing();
    let (_, fetcher) = setup(CountingStorage::default().with_template("urn:a", "{{> urn:b}}"));
    let scope = TemplateScopeBuilder::new(fetcher).build();

    let err = scope.compile("{{> urn:a}}").await.unwrap_err();
    let messages: Vec<String> = err.causes().map(|e| e.to_string()).collect();
    assert_eq!(
        messages,
        vec![
            "Error while resolving dependencies of template 'urn:a'",
            "Failed to load remote template 'urn:b'",
            "Failed to load template body for 'urn:b': template not found",
        ]
    );
}

#[tokio::test]
async fn test_failed_fetch_is_cached_until_invalidated() {
    let (storage, fetcher) = setup(CountingStorage::default());
    let scope = TemplateScopeBuilder::new(fetcher).build();
    let source = "{{> urn:late}}";

    let err = scope.compile(source).await.unwrap_err();
    assert!(matches!(err, TemplateServiceError::RemoteLoad { .. }));

    storage.inner.insert("urn:late", "arrived");
    assert!(scope.compile(source).await.is_err());
    assert_eq!(storage.loads(), 1);

    scope.invalidate();
    let template = scope.compile(source).await.unwrap();
    assert_eq!(render(&template, json!({})), "arrived");
}

#[tokio::test]
async fn test_parse_errors_surface_unwrapped() {
    let (_, fetcher) = setup(CountingStorage::default());
    let scope = TemplateScopeBuilder::new(fetcher).build();

    let err = scope.compile("{{#each items}}").await.unwrap_err();
    assert!(matches!(err, TemplateServiceError::Template(_)));
}

#[tokio::test]
async fn test_capture_expose_round_trip() {
    init_tracing();
    let (_, fetcher) = setup(CountingStorage::default());
    let scope = TemplateScopeBuilder::new(fetcher).build();
    let capturer = ContextCapturer::new();

    let outer = scope
        .compile("{{#capture}}{{x}}{{/capture}}")
        .await
        .unwrap();
    let marked = outer
        .render(
            &ctx(json!({"x": 1})),
            &RenderOptions::default().with_capturer(capturer.clone()),
        )
        .unwrap();
    assert_eq!(capturer.len(), 1);

    let replay = scope.compile(&marked).await.unwrap();
    let options = RenderOptions::default().with_parent_context(capturer.captured_context());
    let replayed = replay.render(&ctx(json!({"x": 2})), &options).unwrap();

    let direct = scope.compile("{{x}}").await.unwrap();
    assert_eq!(replayed, render(&direct, json!({"x": 1})));
    assert_eq!(replayed, "1");
}

#[tokio::test]
async fn test_capture_carries_outer_context_into_nested_template() {
    let (_, fetcher) = setup(CountingStorage::default());
    let scope = TemplateScopeBuilder::new(fetcher).build();
    let capturer = ContextCapturer::new();

    // the cell template is only compiled once the row output exists
    let rows = scope
        .compile(
            r"{{#each rows}}{{#capture}}<td>\{{label}} of \{{@root.table}}</td>{{/capture}}{{/each}}",
        )
        .await
        .unwrap();
    let cells = rows
        .render(
            &ctx(json!({"table": "T", "rows": [{"label": "r0"}, {"label": "r1"}]})),
            &RenderOptions::default().with_capturer(capturer.clone()),
        )
        .unwrap();

    let nested = scope.compile(&cells).await.unwrap();
    let html = nested
        .render(
            &ctx(json!({"label": "unrelated"})),
            &RenderOptions::default().with_parent_context(capturer.captured_context()),
        )
        .unwrap();
    assert_eq!(html, "<td>r0 of T</td><td>r1 of T</td>");
}

#[test]
fn test_registration_conflicts_and_clone_independence() {
    let (_, fetcher) = setup(CountingStorage::default());
    let mut builder = TemplateScopeBuilder::new(fetcher);
    builder
        .register_helper("shout", |_params, _options| Ok(TemplateValue::from("HEY")))
        .unwrap();
    let err = builder
        .register_helper("shout", |_params, _options| Ok(TemplateValue::from("again")))
        .err()
        .unwrap();
    assert_eq!(err.to_string(), "Template helper 'shout' already registered");
    let original = builder.build();

    let mut derived = original.to_builder();
    derived
        .register_helper("shout", |_params, _options| Ok(TemplateValue::from("hey")))
        .unwrap();
    let derived = derived.build();

    let original_out = pollster::block_on(original.compile("{{shout}}")).unwrap();
    let derived_out = pollster::block_on(derived.compile("{{shout}}")).unwrap();
    assert_eq!(render(&original_out, json!({})), "HEY");
    assert_eq!(render(&derived_out, json!({})), "hey");
}

#[test]
fn test_inherited_partials_cannot_be_shadowed() {
    let (_, fetcher) = setup(CountingStorage::default());
    let mut builder = TemplateScopeBuilder::new(fetcher);
    builder.register_partial("card", "ORIGINAL").unwrap();
    let parent = builder.build();

    let mut derived = parent.to_builder();
    let err = derived
        .register_partial("card", "SHADOWED")
        .err()
        .unwrap();
    assert!(matches!(
        &err,
        TemplateServiceError::DuplicatePartial { id } if id == "card"
    ));
    derived.register_partial("badge", "NEW").unwrap();
    let derived = derived.build();

    let template = pollster::block_on(derived.compile("{{> card}} {{> badge}}")).unwrap();
    assert_eq!(render(&template, json!({})), "ORIGINAL NEW");
    assert!(parent.get_partial("badge").is_none());
}

#[test]
fn test_clone_starts_with_empty_cache_and_same_partials() {
    let (_, fetcher) = setup(CountingStorage::default());
    let mut builder = TemplateScopeBuilder::new(fetcher);
    builder.register_partial("name", "{{first}}").unwrap();
    let scope = builder.build();
    pollster::block_on(scope.compile("{{> name}}")).unwrap();

    let cloned = scope.clone();
    assert!(format!("{cloned:?}").contains("compiled: 0"));
    assert_eq!(
        cloned.get_partial("name").map(|p| p.source.as_str()),
        Some("{{first}}")
    );

    let template = pollster::block_on(cloned.compile("Hi {{> name}}")).unwrap();
    assert_eq!(render(&template, json!({"first": "Ada"})), "Hi Ada");
}

#[test]
fn test_create_from_options() {
    let options = serde_json::from_value(json!({
        "partials": {"badge": "<b>{{> @partial-block}}</b>"},
        "scopeTrace": {"componentTag": "semantic-table", "componentId": "t1"}
    }))
    .unwrap();
    let scope = TemplateScope::create(options).unwrap();
    assert_eq!(
        scope.trace().component_tag.as_deref(),
        Some("semantic-table")
    );

    let template = pollster::block_on(scope.compile("{{#> badge}}new{{/badge}}")).unwrap();
    assert_eq!(render(&template, json!({})), "<b>new</b>");
}
