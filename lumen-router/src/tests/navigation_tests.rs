//! Core navigation behavior: committing, no-op detection, transition plans,
//! titles and activity checks.

use super::harness::{Behavior, component, entries, new_log, start_app};
use crate::component::ComponentRegistry;
use crate::options::{RouterOptions, SameUrlStrategy};
use crate::route_config::{RouteConfig, Routeable};
use std::sync::Arc;

#[tokio::test]
async fn test_basic_navigation_commits() {
    let registry = ComponentRegistry::new();
    let log = new_log();
    component(&registry, &log, "home", RouteConfig::new(), Behavior::default());
    let app = start_app(
        registry,
        Arc::clone(&log),
        vec![Routeable::component("home")],
        RouterOptions::default(),
    )
    .await;

    let committed = app.router.load("home", None).await.unwrap();
    assert!(committed);

    assert_eq!(
        entries(&log),
        vec!["home.canLoad", "home.load", "home.activate"]
    );
    assert!(app.router.is_active("home", None).unwrap());
    assert_eq!(app.event_count("lumen:router:navigation-start"), 1);
    assert_eq!(app.event_count("lumen:router:navigation-end"), 1);
}

#[tokio::test]
async fn test_identical_navigation_is_a_noop() {
    let registry = ComponentRegistry::new();
    let log = new_log();
    component(&registry, &log, "home", RouteConfig::new(), Behavior::default());
    let app = start_app(
        registry,
        Arc::clone(&log),
        vec![Routeable::component("home")],
        RouterOptions::default(),
    )
    .await;

    assert!(app.router.load("home", None).await.unwrap());
    let starts_before = app.event_count("lumen:router:navigation-start");
    let ends_before = app.event_count("lumen:router:navigation-end");

    // Same instructions, default same-URL strategy: resolves false without
    // firing any events.
    let second = app.router.load("home", None).await.unwrap();
    assert!(!second);
    assert_eq!(app.event_count("lumen:router:navigation-start"), starts_before);
    assert_eq!(app.event_count("lumen:router:navigation-end"), ends_before);
}

#[tokio::test]
async fn test_param_change_invokes_lifecycles_without_replacing() {
    let registry = ComponentRegistry::new();
    let log = new_log();
    component(
        &registry,
        &log,
        "foo",
        RouteConfig::new().with_path("foo"),
        Behavior::default(),
    );
    let app = start_app(
        registry,
        Arc::clone(&log),
        vec![Routeable::component("foo")],
        RouterOptions::default(),
    )
    .await;

    assert!(app.router.load("foo(id=1)", None).await.unwrap());
    log.lock().clear();

    assert!(app.router.load("foo(id=2)", None).await.unwrap());
    let calls = entries(&log);
    assert!(calls.contains(&"foo.canUnload".to_string()));
    assert!(calls.contains(&"foo.canLoad".to_string()));
    assert!(calls.contains(&"foo.unload".to_string()));
    assert!(calls.contains(&"foo.load".to_string()));
    // The component itself is kept: no replacement lifecycle runs.
    assert!(!calls.contains(&"foo.activate".to_string()));
    assert!(!calls.contains(&"foo.deactivate".to_string()));
}

#[tokio::test]
async fn test_same_params_reload_invokes_no_hooks() {
    let registry = ComponentRegistry::new();
    let log = new_log();
    component(&registry, &log, "foo", RouteConfig::new(), Behavior::default());
    let app = start_app(
        registry,
        Arc::clone(&log),
        vec![Routeable::component("foo")],
        RouterOptions::default().with_same_url_strategy(SameUrlStrategy::Reload),
    )
    .await;

    assert!(app.router.load("foo(id=1)", None).await.unwrap());
    log.lock().clear();

    // Reload strategy runs the pipeline, but identical params select the
    // `none` plan: the pipeline commits without touching any hook.
    assert!(app.router.load("foo(id=1)", None).await.unwrap());
    assert!(entries(&log).is_empty());
}

#[tokio::test]
async fn test_is_active_distinguishes_params() {
    let registry = ComponentRegistry::new();
    let log = new_log();
    component(&registry, &log, "product", RouteConfig::new(), Behavior::default());
    let app = start_app(
        registry,
        Arc::clone(&log),
        vec![Routeable::component("product")],
        RouterOptions::default(),
    )
    .await;

    assert!(app.router.load("product(id=42)", None).await.unwrap());
    assert!(app.router.is_active("product", None).unwrap());
    assert!(app.router.is_active("product(id=42)", None).unwrap());
    assert!(!app.router.is_active("product(id=7)", None).unwrap());
    assert!(!app.router.is_active("other", None).unwrap());
}

#[tokio::test]
async fn test_sibling_navigation_activates_both() {
    let registry = ComponentRegistry::new();
    let log = new_log();
    component(&registry, &log, "list", RouteConfig::new(), Behavior::default());
    component(
        &registry,
        &log,
        "detail",
        RouteConfig::new().with_viewport("side"),
        Behavior::default(),
    );
    let app = start_app(
        registry,
        Arc::clone(&log),
        vec![
            Routeable::component("list"),
            Routeable::component("detail"),
        ],
        RouterOptions::default(),
    )
    .await;
    app.router
        .root_context()
        .unwrap()
        .register_viewport(crate::viewport::Viewport::named("side"));

    assert!(app.router.load("list+detail@side", None).await.unwrap());
    let calls = entries(&log);
    assert!(calls.contains(&"list.activate".to_string()));
    assert!(calls.contains(&"detail.activate".to_string()));
    assert!(app.router.is_active("list", None).unwrap());
    assert!(app.router.is_active("detail@side", None).unwrap());
}

#[tokio::test]
async fn test_title_composition_deepest_first() {
    let registry = ComponentRegistry::new();
    let log = new_log();
    component(
        &registry,
        &log,
        "shell",
        RouteConfig::new()
            .with_title("Shell")
            .with_routes([Routeable::component("leaf")]),
        Behavior {
            registers_viewport: true,
            ..Behavior::default()
        },
    );
    component(
        &registry,
        &log,
        "leaf",
        RouteConfig::new().with_title("Leaf"),
        Behavior::default(),
    );
    let app = start_app(
        registry,
        Arc::clone(&log),
        vec![Routeable::component("shell")],
        RouterOptions::default(),
    )
    .await;

    assert!(app.router.load("shell/leaf", None).await.unwrap());
    assert_eq!(app.router.current_title(), "Leaf | Shell");
}

#[tokio::test]
async fn test_unclaimed_viewport_gets_default_component() {
    let registry = ComponentRegistry::new();
    let log = new_log();
    component(&registry, &log, "welcome", RouteConfig::new(), Behavior::default());
    let app = start_app(
        registry,
        Arc::clone(&log),
        vec![Routeable::component("welcome")],
        RouterOptions::default(),
    )
    .await;
    let mut viewport = crate::viewport::Viewport::named("aside");
    viewport.default_component = Some("welcome".to_string());
    app.router
        .root_context()
        .unwrap()
        .register_viewport(viewport);

    // Nothing claims the "aside" viewport, so its default mounts.
    assert!(app.router.load("/", None).await.unwrap());
    assert!(entries(&log).contains(&"welcome.activate".to_string()));
    assert!(app.router.is_active("welcome@aside", None).unwrap());
}

#[tokio::test]
async fn test_unknown_route_rejects() {
    let registry = ComponentRegistry::new();
    let log = new_log();
    component(&registry, &log, "home", RouteConfig::new(), Behavior::default());
    let app = start_app(
        registry,
        Arc::clone(&log),
        vec![Routeable::component("home")],
        RouterOptions::default(),
    )
    .await;

    let err = app.router.load("nowhere", None).await.unwrap_err();
    assert_eq!(err.code, crate::error::RouterErrorCode::NoMatchingRoute);
    assert_eq!(app.event_count("lumen:router:navigation-error"), 1);
    // The router remains usable afterwards.
    assert!(app.router.load("home", None).await.unwrap());
}

#[tokio::test]
async fn test_fallback_component_for_unrecognized_child() {
    let registry = ComponentRegistry::new();
    let log = new_log();
    component(&registry, &log, "home", RouteConfig::new(), Behavior::default());
    component(&registry, &log, "missing", RouteConfig::new(), Behavior::default());

    let root_routes = vec![Routeable::component("home")];
    let registry_clone = Arc::clone(&registry);
    let app = start_app(
        registry_clone,
        Arc::clone(&log),
        root_routes,
        RouterOptions::default(),
    )
    .await;
    // Give the root viewport a fallback for unrecognized paths.
    let ctx = app.router.root_context().unwrap();
    let mut viewport = crate::viewport::Viewport::named("rescue");
    viewport.fallback = Some("missing".to_string());
    ctx.register_viewport(viewport);

    assert!(app.router.load("no-such-route@rescue", None).await.unwrap());
    assert!(entries(&log).contains(&"missing.activate".to_string()));
}
