//! Routed components
//!
//! [`RouteComponent`] is the lifecycle contract a routed component implements;
//! every hook is optional and asynchronous. [`ComponentDefinition`] pairs a
//! component name with its factory and route configuration and is what the
//! [`ComponentRegistry`] — the resolution seam standing in for the dependency
//! injection container — hands out. [`ComponentAgent`] wraps one instantiated
//! component and drives its hooks (plus any externally registered
//! [`NavigationHook`]s) on behalf of a viewport agent.

use crate::batch::Batch;
use crate::error::{RouterError, RouterResult};
use crate::instruction::{NavigationRequest, Params};
use crate::route_config::RouteConfig;
use crate::transition::{GuardsResult, Transition};
use crate::tree::RouteNode;
use async_trait::async_trait;
use dashmap::DashMap;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, trace};

// =============================================================================
// Lifecycle contract
// =============================================================================

/// Result of a `can_load` guard.
#[derive(Debug, Clone)]
pub enum CanLoadResult {
    /// Permit the navigation.
    Allow,
    /// Deny the navigation; the transition resolves `false`.
    Deny,
    /// Redirect: cancel this transition and run the given request instead.
    /// The original caller's promise settles with the redirect's outcome.
    Redirect(NavigationRequest),
}

/// The lifecycle contract of a routed component.
///
/// All hooks default to permissive no-ops, so components implement only what
/// they need. Hooks may suspend; a hook that never resolves stalls its
/// transition (no deadline is enforced at this layer).
#[async_trait]
pub trait RouteComponent: Send + Sync {
    /// Guard invoked before this component is loaded into a viewport.
    async fn can_load(
        &self,
        params: &Params,
        next: &RouteNode,
        current: Option<&RouteNode>,
    ) -> RouterResult<CanLoadResult> {
        let _ = (params, next, current);
        Ok(CanLoadResult::Allow)
    }

    /// Invoked once the navigation into this component is committed to.
    async fn load(
        &self,
        params: &Params,
        next: &RouteNode,
        current: Option<&RouteNode>,
    ) -> RouterResult<()> {
        let _ = (params, next, current);
        Ok(())
    }

    /// Guard invoked before this component is navigated away from.
    async fn can_unload(
        &self,
        next: Option<&RouteNode>,
        current: &RouteNode,
    ) -> RouterResult<bool> {
        let _ = (next, current);
        Ok(true)
    }

    /// Invoked once the navigation away from this component is committed to.
    async fn unload(&self, next: Option<&RouteNode>, current: &RouteNode) -> RouterResult<()> {
        let _ = (next, current);
        Ok(())
    }

    /// Mount the component into its viewport.
    async fn activate(&self) -> RouterResult<()> {
        Ok(())
    }

    /// Unmount the component from its viewport.
    async fn deactivate(&self) -> RouterResult<()> {
        Ok(())
    }

    /// Release resources. Called when a non-stateful viewport discards the
    /// component for good.
    fn dispose(&self) {}
}

/// A navigation hook registered globally, consulted for every routed
/// component in addition to the component's own hooks.
#[async_trait]
pub trait NavigationHook: Send + Sync {
    /// Guard invoked before any component loads.
    async fn can_load(&self, next: &RouteNode) -> RouterResult<CanLoadResult> {
        let _ = next;
        Ok(CanLoadResult::Allow)
    }

    /// Invoked when any component loads.
    async fn load(&self, next: &RouteNode) -> RouterResult<()> {
        let _ = next;
        Ok(())
    }

    /// Guard invoked before any component unloads.
    async fn can_unload(&self, current: &RouteNode, next: Option<&RouteNode>) -> RouterResult<bool> {
        let _ = (current, next);
        Ok(true)
    }

    /// Invoked when any component unloads.
    async fn unload(&self, current: &RouteNode, next: Option<&RouteNode>) -> RouterResult<()> {
        let _ = (current, next);
        Ok(())
    }
}

// =============================================================================
// Definitions and registry
// =============================================================================

/// Factory producing component instances.
pub type ComponentFactory = Arc<dyn Fn() -> Arc<dyn RouteComponent> + Send + Sync>;

static DEFINITION_ID: AtomicU64 = AtomicU64::new(1);

/// A registered routable component: name, factory, and route configuration.
pub struct ComponentDefinition {
    pub(crate) id: u64,
    /// Primary component name.
    pub name: String,
    /// Additional names this component is reachable under.
    pub aliases: Vec<String>,
    /// Route configuration attached to the component.
    pub config: RouteConfig,
    factory: ComponentFactory,
    resolved: Mutex<Option<Arc<crate::route_config::RouteDefinition>>>,
}

impl ComponentDefinition {
    /// Create a definition with configuration.
    pub fn new(
        name: impl Into<String>,
        config: RouteConfig,
        factory: impl Fn() -> Arc<dyn RouteComponent> + Send + Sync + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            id: DEFINITION_ID.fetch_add(1, Ordering::Relaxed),
            name: name.into(),
            aliases: Vec::new(),
            config,
            factory: Arc::new(factory),
            resolved: Mutex::new(None),
        })
    }

    /// Create a definition with default configuration.
    pub fn simple(
        name: impl Into<String>,
        factory: impl Fn() -> Arc<dyn RouteComponent> + Send + Sync + 'static,
    ) -> Arc<Self> {
        Self::new(name, RouteConfig::new(), factory)
    }

    /// Instantiate the component.
    pub(crate) fn create_instance(&self) -> Arc<dyn RouteComponent> {
        trace!(component = %self.name, "creating component instance");
        (self.factory)()
    }

    /// The resolved route definition for this component, created lazily the
    /// first time it is requested and cached for the definition's lifetime.
    pub fn route_definition(self: &Arc<Self>) -> Arc<crate::route_config::RouteDefinition> {
        let mut cached = self.resolved.lock();
        if let Some(existing) = cached.as_ref() {
            return Arc::clone(existing);
        }
        let resolved =
            crate::route_config::RouteDefinition::for_component(Arc::clone(self), None);
        *cached = Some(Arc::clone(&resolved));
        resolved
    }
}

impl fmt::Debug for ComponentDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentDefinition")
            .field("name", &self.name)
            .field("aliases", &self.aliases)
            .finish()
    }
}

/// A lazy component loader: the promise-of-module form of a routeable.
///
/// Compared by loader identity; the same loader value always resolves the
/// same logical component.
#[derive(Clone)]
pub struct LazyComponent(
    Arc<dyn Fn() -> BoxFuture<'static, RouterResult<Arc<ComponentDefinition>>> + Send + Sync>,
);

impl LazyComponent {
    /// Wrap an async loader.
    pub fn new<F, Fut>(loader: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = RouterResult<Arc<ComponentDefinition>>> + Send + 'static,
    {
        Self(Arc::new(move || Box::pin(loader())))
    }

    /// Run the loader.
    pub fn load(&self) -> BoxFuture<'static, RouterResult<Arc<ComponentDefinition>>> {
        (self.0)()
    }

    /// Identity comparison.
    pub fn ptr_eq(&self, other: &LazyComponent) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for LazyComponent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LazyComponent(..)")
    }
}

/// A live component instance paired with its definition, used when a
/// navigation request carries an instance directly.
pub struct ComponentInstance {
    /// The definition the instance was created from.
    pub definition: Arc<ComponentDefinition>,
    /// The instance itself.
    pub instance: Arc<dyn RouteComponent>,
}

/// The component resolution seam: `register` + `resolve(name)`.
///
/// Stands in for the dependency-injection container, which this crate
/// consumes as an interface only.
pub struct ComponentRegistry {
    components: DashMap<String, Arc<ComponentDefinition>>,
    hooks: Mutex<Vec<Arc<dyn NavigationHook>>>,
}

impl ComponentRegistry {
    /// Create an empty registry.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            components: DashMap::new(),
            hooks: Mutex::new(Vec::new()),
        })
    }

    /// Register a component definition under its name and aliases.
    pub fn register(&self, definition: Arc<ComponentDefinition>) {
        debug!(component = %definition.name, "registering component");
        self.components
            .insert(definition.name.clone(), Arc::clone(&definition));
        for alias in &definition.aliases {
            self.components.insert(alias.clone(), Arc::clone(&definition));
        }
    }

    /// Whether a component is registered under `name`.
    pub fn contains(&self, name: &str) -> bool {
        self.components.contains_key(name)
    }

    /// Resolve a component by name.
    pub fn resolve(&self, name: &str) -> RouterResult<Arc<ComponentDefinition>> {
        self.components
            .get(name)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| {
                let mut available: Vec<String> =
                    self.components.iter().map(|e| e.key().clone()).collect();
                available.sort();
                RouterError::component_not_found(name).with_details(serde_json::json!({
                    "available_components": available,
                    "requested": name,
                }))
            })
    }

    /// Register a global navigation hook. Hooks run after the component's own
    /// hooks, in registration order.
    pub fn register_hook(&self, hook: Arc<dyn NavigationHook>) {
        self.hooks.lock().push(hook);
    }

    /// Snapshot of the registered hooks.
    pub(crate) fn hooks(&self) -> Vec<Arc<dyn NavigationHook>> {
        self.hooks.lock().clone()
    }
}

// =============================================================================
// ComponentAgent
// =============================================================================

/// Wraps one instantiated routed component and drives its lifecycle hooks.
///
/// An agent belongs to exactly one viewport agent; the same instance is never
/// wrapped twice because the viewport agent owns the wrapping.
pub struct ComponentAgent {
    pub(crate) instance: Arc<dyn RouteComponent>,
    pub(crate) definition: Arc<ComponentDefinition>,
    route_node: Mutex<RouteNode>,
    hooks: Vec<Arc<dyn NavigationHook>>,
}

impl ComponentAgent {
    pub(crate) fn new(
        instance: Arc<dyn RouteComponent>,
        definition: Arc<ComponentDefinition>,
        route_node: RouteNode,
        hooks: Vec<Arc<dyn NavigationHook>>,
    ) -> Arc<Self> {
        Arc::new(Self {
            instance,
            definition,
            route_node: Mutex::new(route_node),
            hooks,
        })
    }

    /// The node this agent's component is currently bound to.
    pub fn route_node(&self) -> RouteNode {
        self.route_node.lock().clone()
    }

    pub(crate) fn set_route_node(&self, node: RouteNode) {
        *self.route_node.lock() = node;
    }

    /// Run the component's and the registered `can_unload` guards. A non-true
    /// result rejects the transition's guards.
    pub(crate) fn can_unload(
        self: &Arc<Self>,
        tr: &Arc<Transition>,
        next: Option<RouteNode>,
        b: &Batch,
    ) {
        b.push();
        let current = self.route_node();

        {
            let instance = Arc::clone(&self.instance);
            let next = next.clone();
            let current = current.clone();
            let b_in = b.clone();
            let b_out = b.clone();
            let tr_result = Arc::clone(tr);
            tr.run(
                move || {
                    b_in.push();
                    async move { instance.can_unload(next.as_ref(), &current).await }
                },
                move |permitted| {
                    if !permitted {
                        trace!("can_unload denied by component");
                        tr_result.set_guards_result(GuardsResult::Rejected);
                    }
                    b_out.pop();
                },
            );
        }

        for hook in &self.hooks {
            let hook = Arc::clone(hook);
            let next = next.clone();
            let current = current.clone();
            let b_in = b.clone();
            let b_out = b.clone();
            let tr_result = Arc::clone(tr);
            tr.run(
                move || {
                    b_in.push();
                    async move { hook.can_unload(&current, next.as_ref()).await }
                },
                move |permitted| {
                    if !permitted {
                        trace!("can_unload denied by navigation hook");
                        tr_result.set_guards_result(GuardsResult::Rejected);
                    }
                    b_out.pop();
                },
            );
        }

        b.pop();
    }

    /// Run the component's and the registered `can_load` guards. A deny
    /// rejects the guards; a redirect result becomes the transition's
    /// guard result (first non-true wins).
    pub(crate) fn can_load(self: &Arc<Self>, tr: &Arc<Transition>, next: RouteNode, b: &Batch) {
        b.push();
        let current = self.route_node();

        {
            let instance = Arc::clone(&self.instance);
            let next_in = next.clone();
            let current = current.clone();
            let b_in = b.clone();
            let b_out = b.clone();
            let tr_result = Arc::clone(tr);
            let redirect_node = next.clone();
            tr.run(
                move || {
                    b_in.push();
                    async move {
                        let params = next_in.params();
                        instance.can_load(&params, &next_in, Some(&current)).await
                    }
                },
                move |result| {
                    apply_can_load_result(&tr_result, &redirect_node, result);
                    b_out.pop();
                },
            );
        }

        for hook in &self.hooks {
            let hook = Arc::clone(hook);
            let next_in = next.clone();
            let b_in = b.clone();
            let b_out = b.clone();
            let tr_result = Arc::clone(tr);
            let redirect_node = next.clone();
            tr.run(
                move || {
                    b_in.push();
                    async move { hook.can_load(&next_in).await }
                },
                move |result| {
                    apply_can_load_result(&tr_result, &redirect_node, result);
                    b_out.pop();
                },
            );
        }

        b.pop();
    }

    /// Run the component's and the registered `unload` hooks.
    pub(crate) fn unload(
        self: &Arc<Self>,
        tr: &Arc<Transition>,
        next: Option<RouteNode>,
        b: &Batch,
    ) {
        b.push();
        let current = self.route_node();

        {
            let instance = Arc::clone(&self.instance);
            let next = next.clone();
            let current = current.clone();
            let b_in = b.clone();
            let b_out = b.clone();
            tr.run(
                move || {
                    b_in.push();
                    async move { instance.unload(next.as_ref(), &current).await }
                },
                move |()| b_out.pop(),
            );
        }

        for hook in &self.hooks {
            let hook = Arc::clone(hook);
            let next = next.clone();
            let current = current.clone();
            let b_in = b.clone();
            let b_out = b.clone();
            tr.run(
                move || {
                    b_in.push();
                    async move { hook.unload(&current, next.as_ref()).await }
                },
                move |()| b_out.pop(),
            );
        }

        b.pop();
    }

    /// Run the component's and the registered `load` hooks, and rebind the
    /// agent to the node being loaded.
    pub(crate) fn load(self: &Arc<Self>, tr: &Arc<Transition>, next: RouteNode, b: &Batch) {
        b.push();
        let current = self.route_node();
        self.set_route_node(next.clone());

        {
            let instance = Arc::clone(&self.instance);
            let next_in = next.clone();
            let current = current.clone();
            let b_in = b.clone();
            let b_out = b.clone();
            tr.run(
                move || {
                    b_in.push();
                    async move {
                        let params = next_in.params();
                        instance.load(&params, &next_in, Some(&current)).await
                    }
                },
                move |()| b_out.pop(),
            );
        }

        for hook in &self.hooks {
            let hook = Arc::clone(hook);
            let next_in = next.clone();
            let b_in = b.clone();
            let b_out = b.clone();
            tr.run(
                move || {
                    b_in.push();
                    async move { hook.load(&next_in).await }
                },
                move |()| b_out.pop(),
            );
        }

        b.pop();
    }

    /// Activate the component instance.
    pub(crate) fn activate(self: &Arc<Self>, tr: &Arc<Transition>, b: &Batch) {
        b.push();
        let instance = Arc::clone(&self.instance);
        let b_in = b.clone();
        let b_out = b.clone();
        tr.run(
            move || {
                b_in.push();
                async move { instance.activate().await }
            },
            move |()| b_out.pop(),
        );
        b.pop();
    }

    /// Deactivate the component instance, disposing it afterwards unless the
    /// owning viewport is stateful.
    pub(crate) fn deactivate(self: &Arc<Self>, tr: &Arc<Transition>, b: &Batch, dispose: bool) {
        b.push();
        let instance = Arc::clone(&self.instance);
        let for_disposal = Arc::clone(&self.instance);
        let b_in = b.clone();
        let b_out = b.clone();
        tr.run(
            move || {
                b_in.push();
                async move { instance.deactivate().await }
            },
            move |()| {
                if dispose {
                    trace!("disposing component instance");
                    for_disposal.dispose();
                }
                b_out.pop();
            },
        );
        b.pop();
    }

    /// Release the wrapped instance.
    pub(crate) fn dispose(&self) {
        self.instance.dispose();
    }
}

fn apply_can_load_result(tr: &Arc<Transition>, node: &RouteNode, result: CanLoadResult) {
    match result {
        CanLoadResult::Allow => {}
        CanLoadResult::Deny => {
            trace!("can_load denied");
            tr.set_guards_result(GuardsResult::Rejected);
        }
        CanLoadResult::Redirect(request) => {
            let mut options = tr.options.clone();
            // Resolve the redirect in the scope that recognized this
            // component, not in the component's own child scope.
            options.context = node.context().parent();
            match crate::instruction::ViewportInstructionTree::create(request, options) {
                Ok(tree) => {
                    trace!(target = %tree.to_url(), "can_load requested redirect");
                    tr.set_guards_result(GuardsResult::Redirect(tree));
                }
                Err(err) => tr.handle_error(err),
            }
        }
    }
}

impl fmt::Debug for ComponentAgent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ComponentAgent({})", self.definition.name)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    struct PlainComponent;
    impl RouteComponent for PlainComponent {}

    #[test]
    fn test_registry_resolution_and_aliases() {
        let registry = ComponentRegistry::new();
        registry.register(ComponentDefinition::simple("home", || {
            Arc::new(PlainComponent)
        }));

        assert!(registry.contains("home"));
        assert!(registry.resolve("home").is_ok());

        let err = registry.resolve("missing").unwrap_err();
        assert_eq!(err.code, crate::error::RouterErrorCode::ComponentNotFound);
        let details = err.details.unwrap();
        assert_eq!(details["available_components"][0], "home");
    }

    #[test]
    fn test_route_definition_is_cached() {
        let def = ComponentDefinition::simple("about", || Arc::new(PlainComponent));
        let first = def.route_definition();
        let second = def.route_definition();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_lazy_component_identity() {
        let lazy = LazyComponent::new(|| async {
            Ok(ComponentDefinition::simple("late", || Arc::new(PlainComponent)))
        });
        let same = lazy.clone();
        let other = LazyComponent::new(|| async {
            Ok(ComponentDefinition::simple("late", || Arc::new(PlainComponent)))
        });
        assert!(lazy.ptr_eq(&same));
        assert!(!lazy.ptr_eq(&other));
    }

    #[tokio::test]
    async fn test_lazy_component_load() {
        let lazy = LazyComponent::new(|| async {
            Ok(ComponentDefinition::simple("late", || Arc::new(PlainComponent)))
        });
        let def = lazy.load().await.unwrap();
        assert_eq!(def.name, "late");
    }
}
