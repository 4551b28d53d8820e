//! Guard semantics: invocation order across nested viewports, denial with
//! state restoration, shared navigation hooks, and hook failures.

use super::harness::{Behavior, component, entries, new_log, position, start_app};
use crate::component::{CanLoadResult, ComponentRegistry, NavigationHook};
use crate::error::RouterResult;
use crate::options::RouterOptions;
use crate::route_config::{RouteConfig, Routeable};
use crate::tree::RouteNode;
use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

fn shell_behavior() -> Behavior {
    Behavior {
        registers_viewport: true,
        ..Behavior::default()
    }
}

/// Build an app with two nested branches: a/b and c/d, where a and c are
/// shells that register a viewport for their child.
async fn nested_app() -> (super::harness::TestApp, super::harness::Log) {
    let registry = ComponentRegistry::new();
    let log = new_log();
    component(
        &registry,
        &log,
        "a",
        RouteConfig::new().with_routes([Routeable::component("b")]),
        shell_behavior(),
    );
    component(&registry, &log, "b", RouteConfig::new(), Behavior::default());
    component(
        &registry,
        &log,
        "c",
        RouteConfig::new().with_routes([Routeable::component("d")]),
        shell_behavior(),
    );
    component(&registry, &log, "d", RouteConfig::new(), Behavior::default());
    let app = start_app(
        Arc::clone(&registry),
        Arc::clone(&log),
        vec![Routeable::component("a"), Routeable::component("c")],
        RouterOptions::default(),
    )
    .await;
    (app, log)
}

#[tokio::test]
async fn test_can_load_runs_parent_before_child() {
    let (app, log) = nested_app().await;
    assert!(app.router.load("c/d", None).await.unwrap());
    assert!(position(&log, "c.canLoad") < position(&log, "d.canLoad"));
    assert!(position(&log, "c.activate") < position(&log, "d.activate"));
}

#[tokio::test]
async fn test_can_unload_runs_child_before_parent() {
    let (app, log) = nested_app().await;
    assert!(app.router.load("a/b", None).await.unwrap());
    log.lock().clear();

    assert!(app.router.load("c/d", None).await.unwrap());
    assert!(position(&log, "b.canUnload") < position(&log, "a.canUnload"));
    assert!(position(&log, "b.unload") < position(&log, "a.unload"));
    assert!(position(&log, "b.deactivate") < position(&log, "a.deactivate"));
}

#[tokio::test]
async fn test_can_unload_denial_restores_state() {
    let registry = ComponentRegistry::new();
    let log = new_log();
    let allow = Arc::new(AtomicBool::new(false));
    component(
        &registry,
        &log,
        "editor",
        RouteConfig::new(),
        Behavior {
            can_unload_allow: Some(Arc::clone(&allow)),
            ..Behavior::default()
        },
    );
    component(&registry, &log, "other", RouteConfig::new(), Behavior::default());
    let app = start_app(
        registry,
        Arc::clone(&log),
        vec![Routeable::component("editor"), Routeable::component("other")],
        RouterOptions::default(),
    )
    .await;

    assert!(app.router.load("editor", None).await.unwrap());

    // Guard denies: the call resolves false, state stays put.
    let moved = app.router.load("other", None).await.unwrap();
    assert!(!moved);
    assert!(app.router.is_active("editor", None).unwrap());
    assert!(!app.router.is_active("other", None).unwrap());
    assert_eq!(app.event_count("lumen:router:navigation-cancel"), 1);
    // The denied target never got past its guards.
    assert!(!entries(&log).contains(&"other.load".to_string()));

    // Allow it and the same navigation commits.
    allow.store(true, Ordering::SeqCst);
    assert!(app.router.load("other", None).await.unwrap());
    assert!(app.router.is_active("other", None).unwrap());
}

#[tokio::test]
async fn test_can_load_denial_resolves_false() {
    let registry = ComponentRegistry::new();
    let log = new_log();
    component(&registry, &log, "open", RouteConfig::new(), Behavior::default());
    component(
        &registry,
        &log,
        "locked",
        RouteConfig::new(),
        Behavior {
            can_load: Some(Arc::new(|| CanLoadResult::Deny)),
            ..Behavior::default()
        },
    );
    let app = start_app(
        registry,
        Arc::clone(&log),
        vec![Routeable::component("open"), Routeable::component("locked")],
        RouterOptions::default(),
    )
    .await;

    assert!(app.router.load("open", None).await.unwrap());
    assert!(!app.router.load("locked", None).await.unwrap());
    assert!(app.router.is_active("open", None).unwrap());
    assert!(!app.router.is_active("locked", None).unwrap());
    // The guard ran; nothing further did.
    assert!(entries(&log).contains(&"locked.canLoad".to_string()));
    assert!(!entries(&log).contains(&"locked.load".to_string()));
}

#[tokio::test]
async fn test_shared_navigation_hook_consulted_after_instance() {
    struct DenyHook {
        log: super::harness::Log,
    }
    #[async_trait]
    impl NavigationHook for DenyHook {
        async fn can_load(&self, next: &RouteNode) -> RouterResult<CanLoadResult> {
            self.log.lock().push("hook.canLoad".to_string());
            let name = next.component().map(|c| c.name.clone()).unwrap_or_default();
            if name == "admin" {
                Ok(CanLoadResult::Deny)
            } else {
                Ok(CanLoadResult::Allow)
            }
        }
    }

    let registry = ComponentRegistry::new();
    let log = new_log();
    component(&registry, &log, "admin", RouteConfig::new(), Behavior::default());
    component(&registry, &log, "public", RouteConfig::new(), Behavior::default());
    registry.register_hook(Arc::new(DenyHook {
        log: Arc::clone(&log),
    }));
    let app = start_app(
        registry,
        Arc::clone(&log),
        vec![Routeable::component("admin"), Routeable::component("public")],
        RouterOptions::default(),
    )
    .await;

    assert!(app.router.load("public", None).await.unwrap());
    assert!(position(&log, "public.canLoad") < position(&log, "hook.canLoad"));

    assert!(!app.router.load("admin", None).await.unwrap());
    assert!(!app.router.is_active("admin", None).unwrap());
}

#[tokio::test]
async fn test_hook_error_rejects_with_original_error() {
    let registry = ComponentRegistry::new();
    let log = new_log();
    component(
        &registry,
        &log,
        "broken",
        RouteConfig::new(),
        Behavior {
            load_error: Some("database unavailable".to_string()),
            ..Behavior::default()
        },
    );
    let app = start_app(
        registry,
        Arc::clone(&log),
        vec![Routeable::component("broken")],
        RouterOptions::default(),
    )
    .await;

    let err = app.router.load("broken", None).await.unwrap_err();
    assert_eq!(err.code, crate::error::RouterErrorCode::HookError);
    assert!(err.message.contains("database unavailable"));
    assert_eq!(app.event_count("lumen:router:navigation-error"), 1);
    assert_eq!(app.event_count("lumen:router:navigation-end"), 0);
}
