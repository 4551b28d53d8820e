//! Redirects: configured redirect chains and guard-initiated redirects.

use super::harness::{Behavior, component, entries, new_log, start_app};
use crate::component::{CanLoadResult, ComponentRegistry};
use crate::options::RouterOptions;
use crate::route_config::{RouteConfig, Routeable};
use std::sync::Arc;

#[tokio::test]
async fn test_redirect_chain_resolves_once() {
    let registry = ComponentRegistry::new();
    let log = new_log();
    component(&registry, &log, "c", RouteConfig::new(), Behavior::default());
    let app = start_app(
        registry,
        Arc::clone(&log),
        vec![
            Routeable::redirect("a", "b"),
            Routeable::redirect("b", "c"),
            Routeable::component("c"),
        ],
        RouterOptions::default(),
    )
    .await;

    // a redirects to b redirects to c; one navigation, one navigation-end.
    let committed = app.router.load("a", None).await.unwrap();
    assert!(committed);
    assert_eq!(entries(&log), vec!["c.canLoad", "c.load", "c.activate"]);
    assert_eq!(app.event_count("lumen:router:navigation-end"), 1);
    assert!(app.router.is_active("c", None).unwrap());

    let final_instructions = app.router.current_instructions();
    assert_eq!(final_instructions.to_url(), "/c");
}

#[tokio::test]
async fn test_redirect_substitutes_captured_params() {
    let registry = ComponentRegistry::new();
    let log = new_log();
    component(
        &registry,
        &log,
        "detail",
        RouteConfig::new().with_path("items/:id"),
        Behavior::default(),
    );
    let app = start_app(
        registry,
        Arc::clone(&log),
        vec![
            Routeable::redirect("legacy/:id", "items/:id"),
            Routeable::component("detail"),
        ],
        RouterOptions::default(),
    )
    .await;

    assert!(app.router.load("legacy/42", None).await.unwrap());
    assert!(app.router.is_active("detail(id=42)", None).unwrap());
    assert_eq!(app.router.current_instructions().to_url(), "/items/42");
}

#[tokio::test]
async fn test_guard_redirect_settles_original_call() {
    let registry = ComponentRegistry::new();
    let log = new_log();
    component(
        &registry,
        &log,
        "guarded",
        RouteConfig::new(),
        Behavior {
            can_load: Some(Arc::new(|| CanLoadResult::Redirect("safe".into()))),
            ..Behavior::default()
        },
    );
    component(&registry, &log, "safe", RouteConfig::new(), Behavior::default());
    let app = start_app(
        registry,
        Arc::clone(&log),
        vec![
            Routeable::component("guarded"),
            Routeable::component("safe"),
        ],
        RouterOptions::default(),
    )
    .await;

    // The original promise settles only once the redirect target activated,
    // with the redirect's outcome.
    let committed = app.router.load("guarded", None).await.unwrap();
    assert!(committed);
    assert!(app.router.is_active("safe", None).unwrap());
    assert!(!app.router.is_active("guarded", None).unwrap());

    let calls = entries(&log);
    assert!(calls.contains(&"guarded.canLoad".to_string()));
    assert!(!calls.contains(&"guarded.load".to_string()));
    assert!(calls.contains(&"safe.activate".to_string()));

    // The redirected-away attempt cancels, the redirect itself commits.
    assert_eq!(app.event_count("lumen:router:navigation-cancel"), 1);
    assert_eq!(app.event_count("lumen:router:navigation-end"), 1);
}

#[tokio::test]
async fn test_unresolvable_redirect_target_rejects() {
    let registry = ComponentRegistry::new();
    let log = new_log();
    let app = start_app(
        registry,
        Arc::clone(&log),
        vec![Routeable::redirect("old", "nowhere")],
        RouterOptions::default(),
    )
    .await;

    let err = app.router.load("old", None).await.unwrap_err();
    assert_eq!(err.code, crate::error::RouterErrorCode::NoMatchingRoute);
}
