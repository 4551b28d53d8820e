//! History side effects and location-driven navigation.

use super::harness::{Behavior, component, new_log, start_app};
use crate::component::ComponentRegistry;
use crate::history::{LocationManager, NAV_ID_KEY};
use crate::options::{HistoryStrategy, NavigationOptions, RouterOptions};
use crate::route_config::{RouteConfig, Routeable};
use std::sync::Arc;
use std::time::Duration;

async fn two_page_app() -> super::harness::TestApp {
    let registry = ComponentRegistry::new();
    let log = new_log();
    component(&registry, &log, "a", RouteConfig::new(), Behavior::default());
    component(&registry, &log, "b", RouteConfig::new(), Behavior::default());
    start_app(
        registry,
        log,
        vec![Routeable::component("a"), Routeable::component("b")],
        RouterOptions::default(),
    )
    .await
}

/// Give traversal-triggered (popstate) transitions a moment to settle; they
/// are enqueued from the location listener, not awaited by the test.
async fn settle() {
    tokio::time::sleep(Duration::from_millis(20)).await;
}

#[tokio::test]
async fn test_committed_navigation_pushes_history() {
    let app = two_page_app().await;
    let before = app.location.entry_count();

    assert!(app.router.load("a", None).await.unwrap());
    assert_eq!(app.location.entry_count(), before + 1);
    assert_eq!(app.location.get_path(), "/a");

    assert!(app.router.load("b", None).await.unwrap());
    assert_eq!(app.location.entry_count(), before + 2);
    assert_eq!(app.location.get_path(), "/b");
}

#[tokio::test]
async fn test_replace_strategy_keeps_entry_count() {
    let app = two_page_app().await;
    assert!(app.router.load("a", None).await.unwrap());
    let count = app.location.entry_count();

    let options = NavigationOptions::from_router_options(app.router.options())
        .with_history_strategy(HistoryStrategy::Replace);
    assert!(app.router.load("b", Some(options)).await.unwrap());
    assert_eq!(app.location.entry_count(), count);
    assert_eq!(app.location.get_path(), "/b");
}

#[tokio::test]
async fn test_none_strategy_leaves_history_alone() {
    let app = two_page_app().await;
    assert!(app.router.load("a", None).await.unwrap());
    let count = app.location.entry_count();
    let path = app.location.get_path();

    let options = NavigationOptions::from_router_options(app.router.options())
        .with_history_strategy(HistoryStrategy::None);
    assert!(app.router.load("b", Some(options)).await.unwrap());
    assert_eq!(app.location.entry_count(), count);
    assert_eq!(app.location.get_path(), path);
}

#[tokio::test]
async fn test_managed_state_carries_navigation_id() {
    let app = two_page_app().await;
    let options = NavigationOptions::from_router_options(app.router.options())
        .with_state(serde_json::json!({"scroll": 120}));
    assert!(app.router.load("a", Some(options)).await.unwrap());

    let state = app.location.current_state();
    assert_eq!(state["scroll"], 120);
    assert!(state[NAV_ID_KEY].is_u64());
}

#[tokio::test]
async fn test_history_traversal_navigates_back_and_forward() {
    let app = two_page_app().await;
    assert!(app.router.load("a", None).await.unwrap());
    assert!(app.router.load("b", None).await.unwrap());
    assert!(app.router.is_active("b", None).unwrap());

    app.location.go(-1);
    settle().await;
    assert!(app.router.is_active("a", None).unwrap());
    assert!(!app.router.is_active("b", None).unwrap());

    app.location.go(1);
    settle().await;
    assert!(app.router.is_active("b", None).unwrap());

    // Traversal must not have grown the history stack.
    assert_eq!(app.location.entry_count(), 3);
}

#[tokio::test]
async fn test_location_change_event_published_on_traversal() {
    let app = two_page_app().await;
    assert!(app.router.load("a", None).await.unwrap());
    assert!(app.router.load("b", None).await.unwrap());

    app.location.go(-1);
    settle().await;
    assert_eq!(app.event_count("lumen:router:location-change"), 1);
}

#[tokio::test]
async fn test_stop_detaches_from_location() {
    let app = two_page_app().await;
    assert!(app.router.load("a", None).await.unwrap());
    assert!(app.router.load("b", None).await.unwrap());

    app.router.stop();
    app.location.go(-1);
    settle().await;
    // No listener anymore: the router keeps its committed state.
    assert!(app.router.is_active("b", None).unwrap());
}
