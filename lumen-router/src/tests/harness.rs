//! Test doubles: a recording component whose hooks append to a shared call
//! log, plus helpers for wiring a router against the in-memory history.

use crate::component::{ComponentDefinition, ComponentRegistry, RouteComponent};
use crate::error::RouterResult;
use crate::events::EventSubscription;
use crate::history::{LocationManager, MemoryLocationManager};
use crate::instruction::Params;
use crate::options::RouterOptions;
use crate::route_config::{RouteConfig, Routeable};
use crate::router::Router;
use crate::tree::RouteNode;
use crate::viewport::Viewport;
use crate::CanLoadResult;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

pub(crate) type Log = Arc<Mutex<Vec<String>>>;

pub(crate) fn new_log() -> Log {
    Arc::new(Mutex::new(Vec::new()))
}

pub(crate) fn entries(log: &Log) -> Vec<String> {
    log.lock().clone()
}

/// Position of `entry` in the log; panics when absent so ordering assertions
/// fail with a readable message.
pub(crate) fn position(log: &Log, entry: &str) -> usize {
    let entries = log.lock();
    entries
        .iter()
        .position(|e| e == entry)
        .unwrap_or_else(|| panic!("'{entry}' not found in call log {entries:?}"))
}

type CanLoadBehavior = Arc<dyn Fn() -> CanLoadResult + Send + Sync>;

/// Per-component behavior knobs, baked into the factory at registration.
#[derive(Clone, Default)]
pub(crate) struct Behavior {
    /// Register a default viewport on the component's scope during `load`,
    /// the way rendering glue does when the component contains a viewport.
    pub registers_viewport: bool,
    /// Override the `can_load` outcome.
    pub can_load: Option<CanLoadBehavior>,
    /// When set and false, `can_unload` denies.
    pub can_unload_allow: Option<Arc<AtomicBool>>,
    /// When set, `load` fails with this message.
    pub load_error: Option<String>,
}

struct Recording {
    name: String,
    log: Log,
    behavior: Behavior,
}

#[async_trait]
impl RouteComponent for Recording {
    async fn can_load(
        &self,
        _params: &Params,
        _next: &RouteNode,
        _current: Option<&RouteNode>,
    ) -> RouterResult<CanLoadResult> {
        self.log.lock().push(format!("{}.canLoad", self.name));
        Ok(self
            .behavior
            .can_load
            .as_ref()
            .map(|outcome| outcome())
            .unwrap_or(CanLoadResult::Allow))
    }

    async fn load(
        &self,
        _params: &Params,
        next: &RouteNode,
        _current: Option<&RouteNode>,
    ) -> RouterResult<()> {
        self.log.lock().push(format!("{}.load", self.name));
        if let Some(message) = &self.behavior.load_error {
            return Err(crate::error::RouterError::hook_error(message.clone()));
        }
        if self.behavior.registers_viewport {
            next.context().register_viewport(Viewport::default());
        }
        Ok(())
    }

    async fn can_unload(
        &self,
        _next: Option<&RouteNode>,
        _current: &RouteNode,
    ) -> RouterResult<bool> {
        self.log.lock().push(format!("{}.canUnload", self.name));
        Ok(self
            .behavior
            .can_unload_allow
            .as_ref()
            .map(|allow| allow.load(Ordering::SeqCst))
            .unwrap_or(true))
    }

    async fn unload(
        &self,
        _next: Option<&RouteNode>,
        _current: &RouteNode,
    ) -> RouterResult<()> {
        self.log.lock().push(format!("{}.unload", self.name));
        Ok(())
    }

    async fn activate(&self) -> RouterResult<()> {
        self.log.lock().push(format!("{}.activate", self.name));
        Ok(())
    }

    async fn deactivate(&self) -> RouterResult<()> {
        self.log.lock().push(format!("{}.deactivate", self.name));
        Ok(())
    }
}

/// Register a recording component and return its definition.
pub(crate) fn component(
    registry: &Arc<ComponentRegistry>,
    log: &Log,
    name: &str,
    config: RouteConfig,
    behavior: Behavior,
) -> Arc<ComponentDefinition> {
    let log = Arc::clone(log);
    let component_name = name.to_string();
    let definition = ComponentDefinition::new(name, config, move || {
        let instance: Arc<dyn RouteComponent> = Arc::new(Recording {
            name: component_name.clone(),
            log: Arc::clone(&log),
            behavior: behavior.clone(),
        });
        instance
    });
    registry.register(Arc::clone(&definition));
    definition
}

pub(crate) struct TestApp {
    pub router: Arc<Router>,
    pub location: Arc<MemoryLocationManager>,
    pub log: Log,
    pub events: Log,
    _subscription: EventSubscription,
}

impl TestApp {
    pub(crate) fn event_count(&self, name: &str) -> usize {
        self.events.lock().iter().filter(|e| *e == name).count()
    }
}

/// Start a router whose root scope declares `routes`, with a default viewport
/// registered and every published event name recorded.
pub(crate) async fn start_app(
    registry: Arc<ComponentRegistry>,
    log: Log,
    routes: Vec<Routeable>,
    options: RouterOptions,
) -> TestApp {
    let root_log = Arc::clone(&log);
    let root = ComponentDefinition::new(
        "app-root",
        RouteConfig::new().with_routes(routes),
        move || {
            let instance: Arc<dyn RouteComponent> = Arc::new(Recording {
                name: "app-root".to_string(),
                log: Arc::clone(&root_log),
                behavior: Behavior::default(),
            });
            instance
        },
    );

    let location = MemoryLocationManager::new();
    let location_dyn: Arc<dyn LocationManager> = location.clone();
    let router = Router::new(registry, location_dyn, options).expect("router options are valid");

    let events = new_log();
    let sink = Arc::clone(&events);
    let subscription = router
        .events()
        .subscribe(move |event| sink.lock().push(event.name().to_string()));

    router
        .start(root, false)
        .await
        .expect("router start succeeds");
    router
        .root_context()
        .expect("root context exists after start")
        .register_viewport(Viewport::default());

    TestApp {
        router,
        location,
        log,
        events,
        _subscription: subscription,
    }
}
