//! Routing scopes
//!
//! A [`RouteContext`] is the routing scope of one routed component instance:
//! it owns the recognizer populated from the component's child routes, the
//! resolved child route definitions, and the set of live viewport agents
//! registered under the component. Every context has exactly one parent; only
//! the synthetic root context has none.
//!
//! Contexts are created (and cached by the router) when route-tree building
//! first drills into a component, which is also where child routes — and any
//! bare lazy routes among them — are resolved.

use crate::component::{ComponentAgent, ComponentDefinition, ComponentRegistry};
use crate::error::{RouterError, RouterResult};
use crate::instruction::NavigationInstruction;
use crate::recognizer::{RESIDUE_PARAM, RecognizedRoute, RouteRecognizer};
use crate::route_config::RouteDefinition;
use crate::tree::{RouteNode, RouteNodeWeak};
use crate::viewport::{Viewport, ViewportAgent, ViewportRequest};
use parking_lot::Mutex;
use std::fmt;
use std::sync::{Arc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, trace};

static CONTEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Per-component routing scope.
pub struct RouteContext {
    pub(crate) id: u64,
    is_root: bool,
    parent: Option<Arc<RouteContext>>,
    definition: Arc<RouteDefinition>,
    registry: Arc<ComponentRegistry>,
    friendly_path: String,
    recognizer: RouteRecognizer<Arc<RouteDefinition>>,
    child_routes: Vec<Arc<RouteDefinition>>,
    agents: Mutex<Vec<Arc<ViewportAgent>>>,
    vpa: Mutex<Weak<ViewportAgent>>,
    node: Mutex<Option<RouteNodeWeak>>,
}

impl RouteContext {
    /// Create a scope for `definition`, resolving its child routes.
    ///
    /// Each child path is registered twice: once plain and once with a
    /// `/*rest` suffix, so partial matches surface their unconsumed remainder
    /// as residue for deferred resolution.
    pub(crate) async fn create(
        registry: Arc<ComponentRegistry>,
        definition: Arc<RouteDefinition>,
        parent: Option<Arc<RouteContext>>,
    ) -> RouterResult<Arc<RouteContext>> {
        let is_root = parent.is_none();
        let scope_name = definition
            .component
            .as_ref()
            .map(|c| c.name.clone())
            .unwrap_or_else(|| definition.id.clone());
        let friendly_path = match &parent {
            None => scope_name,
            Some(parent) => format!("{}/{}", parent.friendly_path, scope_name),
        };

        let mut recognizer = RouteRecognizer::new();
        let mut child_routes = Vec::with_capacity(definition.routes.len());
        for routeable in &definition.routes {
            routeable.validate()?;
            let child = routeable.resolve(&registry).await?;
            for path in &child.path {
                recognizer.add(path, Arc::clone(&child), child.case_sensitive);
                let residue_pattern = if path.is_empty() {
                    format!("*{RESIDUE_PARAM}")
                } else {
                    format!("{path}/*{RESIDUE_PARAM}")
                };
                recognizer.add(&residue_pattern, Arc::clone(&child), child.case_sensitive);
            }
            child_routes.push(child);
        }

        debug!(
            scope = %friendly_path,
            routes = child_routes.len(),
            "created route context"
        );

        Ok(Arc::new(Self {
            id: CONTEXT_ID.fetch_add(1, Ordering::Relaxed),
            is_root,
            parent,
            definition,
            registry,
            friendly_path,
            recognizer,
            child_routes,
            agents: Mutex::new(Vec::new()),
            vpa: Mutex::new(Weak::new()),
            node: Mutex::new(None),
        }))
    }

    /// Whether this is the synthetic root scope.
    pub fn is_root(&self) -> bool {
        self.is_root
    }

    /// The parent scope; `None` only at the root.
    pub fn parent(&self) -> Option<Arc<RouteContext>> {
        self.parent.clone()
    }

    /// The resolved route definition of the component owning this scope.
    pub fn definition(&self) -> Arc<RouteDefinition> {
        Arc::clone(&self.definition)
    }

    /// The resolved child routes of this scope.
    pub fn child_routes(&self) -> &[Arc<RouteDefinition>] {
        &self.child_routes
    }

    /// Human-readable scope path, for error messages.
    pub fn friendly_path(&self) -> String {
        self.friendly_path.clone()
    }

    /// Registered path patterns, for diagnostics.
    pub fn patterns(&self) -> Vec<String> {
        self.recognizer.patterns()
    }

    // -------------------------------------------------------------------------
    // Node binding
    // -------------------------------------------------------------------------

    /// The route node currently bound to this scope.
    pub fn node(&self) -> Option<RouteNode> {
        self.node.lock().as_ref().and_then(RouteNodeWeak::upgrade)
    }

    pub(crate) fn set_node(&self, node: &RouteNode) {
        *self.node.lock() = Some(node.downgrade());
    }

    /// The viewport agent hosting this scope's component. `None` at the root.
    pub fn vpa(&self) -> Option<Arc<ViewportAgent>> {
        self.vpa.lock().upgrade()
    }

    pub(crate) fn set_vpa(&self, agent: &Arc<ViewportAgent>) {
        *self.vpa.lock() = Arc::downgrade(agent);
    }

    // -------------------------------------------------------------------------
    // Viewports
    // -------------------------------------------------------------------------

    /// Register a viewport rendered by this scope's component and return its
    /// agent. Registering the same viewport name again returns the existing
    /// agent, keeping re-registration idempotent.
    pub fn register_viewport(self: &Arc<Self>, viewport: Viewport) -> Arc<ViewportAgent> {
        let mut agents = self.agents.lock();
        if let Some(existing) = agents
            .iter()
            .find(|agent| agent.viewport().name == viewport.name)
        {
            trace!(scope = %self.friendly_path, viewport = %viewport.name, "viewport already registered");
            return Arc::clone(existing);
        }
        debug!(scope = %self.friendly_path, viewport = %viewport.name, "registering viewport");
        let agent = ViewportAgent::new(viewport, Arc::downgrade(self));
        agents.push(Arc::clone(&agent));
        agent
    }

    /// Remove a viewport agent (the viewport element left the document).
    pub fn unregister_viewport(&self, agent: &Arc<ViewportAgent>) {
        let mut agents = self.agents.lock();
        agents.retain(|candidate| !Arc::ptr_eq(candidate, agent));
        agent.dispose();
    }

    /// Viewport agents not yet claimed by the in-flight transition.
    pub(crate) fn available_viewport_agents(&self) -> Vec<Arc<ViewportAgent>> {
        self.agents
            .lock()
            .iter()
            .filter(|agent| agent.is_available())
            .cloned()
            .collect()
    }

    /// Find an available agent able to host the requested component in the
    /// requested viewport.
    pub(crate) fn resolve_viewport_agent(
        &self,
        request: &ViewportRequest,
    ) -> RouterResult<Arc<ViewportAgent>> {
        let agents = self.agents.lock();
        let found = agents
            .iter()
            .find(|agent| agent.is_available() && agent.handles(request));
        match found {
            Some(agent) => Ok(Arc::clone(agent)),
            None => {
                let registered: Vec<String> = agents
                    .iter()
                    .map(|agent| agent.viewport().name.clone())
                    .collect();
                Err(RouterError::viewport_unavailable(
                    &request.viewport_name,
                    &request.component_name,
                    &self.friendly_path,
                )
                .with_details(serde_json::json!({
                    "registered_viewports": registered,
                })))
            }
        }
    }

    /// The fallback component for a viewport in this scope: the viewport's
    /// own fallback if set, else the owning route's.
    pub(crate) fn fallback_for(&self, viewport_name: Option<&str>) -> Option<String> {
        let from_viewport = viewport_name.and_then(|name| {
            self.agents
                .lock()
                .iter()
                .find(|agent| agent.viewport().name == name)
                .and_then(|agent| agent.viewport().fallback.clone())
        });
        from_viewport.or_else(|| self.definition.fallback.clone())
    }

    // -------------------------------------------------------------------------
    // Recognition and component creation
    // -------------------------------------------------------------------------

    /// Match a path against this scope's route table.
    pub fn recognize(&self, path: &str) -> Option<RecognizedRoute<Arc<RouteDefinition>>> {
        self.recognizer.recognize(path)
    }

    /// Wrap a component instance for `node` in an agent. When the producing
    /// instruction carried a live instance, that instance is used; otherwise
    /// the component factory runs.
    pub(crate) fn create_component_agent(
        &self,
        node: RouteNode,
    ) -> RouterResult<Arc<ComponentAgent>> {
        let component = node.component().ok_or_else(|| {
            RouterError::internal("cannot create a component agent for a node without a component")
        })?;
        let instance = match node.instruction().map(|vi| vi.component) {
            Some(NavigationInstruction::Instance(existing)) => Arc::clone(&existing.instance),
            _ => component.create_instance(),
        };
        trace!(scope = %self.friendly_path, component = %component.name, "created component agent");
        Ok(ComponentAgent::new(
            instance,
            component,
            node,
            self.registry.hooks(),
        ))
    }

    /// The component registry (the resolution seam of the embedding).
    pub fn registry(&self) -> Arc<ComponentRegistry> {
        Arc::clone(&self.registry)
    }

    /// Dispose all viewport agents; the owning component is being discarded.
    pub(crate) fn dispose(&self) {
        for agent in self.agents.lock().drain(..) {
            agent.dispose();
        }
    }
}

impl fmt::Debug for RouteContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RouteContext")
            .field("scope", &self.friendly_path)
            .field("is_root", &self.is_root)
            .field("routes", &self.child_routes.len())
            .field("viewports", &self.agents.lock().len())
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::RouteComponent;
    use crate::route_config::{RouteConfig, Routeable};

    struct PlainComponent;
    impl RouteComponent for PlainComponent {}

    fn plain(name: &str, config: RouteConfig) -> Arc<ComponentDefinition> {
        ComponentDefinition::new(name, config, || Arc::new(PlainComponent))
    }

    async fn root_context(routes: Vec<Routeable>) -> Arc<RouteContext> {
        let registry = ComponentRegistry::new();
        let root = plain("app-root", RouteConfig::new().with_routes(routes));
        RouteContext::create(registry, root.route_definition(), None)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_child_paths_registered_plain_and_with_residue() {
        let detail = plain("detail", RouteConfig::new().with_path("items/:id"));
        let ctx = root_context(vec![Routeable::definition(detail)]).await;

        assert_eq!(
            ctx.patterns(),
            vec!["items/:id".to_string(), "items/:id/*rest".to_string()]
        );

        let full = ctx.recognize("items/7").unwrap();
        assert_eq!(full.params.get("id"), Some("7"));
        assert!(full.residue.is_none());

        let partial = ctx.recognize("items/7/deep/child").unwrap();
        assert_eq!(partial.params.get("id"), Some("7"));
        assert_eq!(partial.residue.as_deref(), Some("deep/child"));
    }

    #[tokio::test]
    async fn test_viewport_registration_is_idempotent_by_name() {
        let ctx = root_context(vec![]).await;
        let first = ctx.register_viewport(Viewport::default());
        let second = ctx.register_viewport(Viewport::default());
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(ctx.available_viewport_agents().len(), 1);
    }

    #[tokio::test]
    async fn test_resolve_viewport_agent_reports_candidates() {
        let ctx = root_context(vec![]).await;
        ctx.register_viewport(Viewport::named("main"));

        let err = ctx
            .resolve_viewport_agent(&ViewportRequest {
                viewport_name: "sidebar".into(),
                component_name: "nav".into(),
                resolution: crate::options::ResolutionMode::Dynamic,
                append: false,
            })
            .unwrap_err();
        assert_eq!(err.code, crate::error::RouterErrorCode::ViewportUnavailable);
        assert_eq!(err.details.unwrap()["registered_viewports"][0], "main");
    }

    #[tokio::test]
    async fn test_unspecified_viewport_matches_any_agent() {
        let ctx = root_context(vec![]).await;
        ctx.register_viewport(Viewport::named("main"));
        let agent = ctx
            .resolve_viewport_agent(&ViewportRequest {
                viewport_name: String::new(),
                component_name: "nav".into(),
                resolution: crate::options::ResolutionMode::Dynamic,
                append: false,
            })
            .unwrap();
        assert_eq!(agent.viewport().name, "main");
    }

    #[tokio::test]
    async fn test_fallback_prefers_viewport_over_definition() {
        let registry = ComponentRegistry::new();
        let root = plain(
            "app-root",
            RouteConfig::new().with_fallback("route-missing"),
        );
        let ctx = RouteContext::create(registry, root.route_definition(), None)
            .await
            .unwrap();
        assert_eq!(ctx.fallback_for(None).as_deref(), Some("route-missing"));

        let mut viewport = Viewport::named("main");
        viewport.fallback = Some("viewport-missing".into());
        ctx.register_viewport(viewport);
        assert_eq!(
            ctx.fallback_for(Some("main")).as_deref(),
            Some("viewport-missing")
        );
    }

    #[tokio::test]
    async fn test_invalid_child_route_fails_context_creation() {
        let registry = ComponentRegistry::new();
        let bad = Routeable::Redirect {
            config: RouteConfig::new().with_path("old"),
        };
        let root = plain("app-root", RouteConfig::new().with_routes([bad]));
        let result = RouteContext::create(registry, root.route_definition(), None).await;
        assert!(result.is_err());
    }
}
