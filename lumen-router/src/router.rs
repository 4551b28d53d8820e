//! The router
//!
//! Top-level transition coordinator: owns the current route tree, the
//! transition queue (at most one active transition plus at most one pending
//! "next"; the pending slot is latest-wins), the navigation event stream, and
//! the history side effects of committed navigations.
//!
//! The route tree, current instructions and transition slots are fields of
//! this one object with a single-writer invariant: only the currently
//! executing transition run mutates them, and a new run starts only after the
//! previous one's batch chain fully resolved.

use crate::batch::Batch;
use crate::component::{ComponentDefinition, ComponentRegistry};
use crate::context::RouteContext;
use crate::error::{RouterError, RouterResult};
use crate::events::{RouterEvent, RouterEventBus};
use crate::history::{LocationChange, LocationManager, NAV_ID_KEY};
use crate::instruction::{NavigationRequest, NavigationTrigger, ViewportInstructionTree};
use crate::options::{HistoryStrategy, NavigationOptions, RouterOptions, SameUrlStrategy};
use crate::route_config::RouteDefinition;
use crate::transition::{GuardsResult, Navigation, Transition};
use crate::tree::{RouteNode, RouteTree, merge_distinct, update_route_tree};
use crate::viewport::ViewportAgent;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{debug, trace, warn};

struct RouterState {
    route_tree: Option<RouteTree>,
    instructions: ViewportInstructionTree,
    current_tr: Option<Arc<Transition>>,
    next_tr: Option<Arc<Transition>>,
    transition_id: u64,
    navigated: bool,
    running: bool,
    active_navigation: Option<Navigation>,
    last_api_url: Option<String>,
    current_title: String,
}

/// The transition coordinator.
pub struct Router {
    registry: Arc<ComponentRegistry>,
    location: Arc<dyn LocationManager>,
    events: Arc<RouterEventBus>,
    options: RouterOptions,
    state: Mutex<RouterState>,
    context_cache: DashMap<(u64, u64), Arc<RouteContext>>,
    root_ctx: Mutex<Option<Arc<RouteContext>>>,
}

impl Router {
    /// Create a router over a component registry and a location collaborator.
    pub fn new(
        registry: Arc<ComponentRegistry>,
        location: Arc<dyn LocationManager>,
        options: RouterOptions,
    ) -> RouterResult<Arc<Self>> {
        options.validate()?;
        let instructions =
            ViewportInstructionTree::empty(NavigationOptions::from_router_options(&options));
        Ok(Arc::new(Self {
            registry,
            location,
            events: RouterEventBus::new(),
            options,
            state: Mutex::new(RouterState {
                route_tree: None,
                instructions,
                current_tr: None,
                next_tr: None,
                transition_id: 0,
                navigated: false,
                running: false,
                active_navigation: None,
                last_api_url: None,
                current_title: String::new(),
            }),
            context_cache: DashMap::new(),
            root_ctx: Mutex::new(None),
        }))
    }

    /// The navigation event bus.
    pub fn events(&self) -> Arc<RouterEventBus> {
        Arc::clone(&self.events)
    }

    /// The component registry.
    pub fn registry(&self) -> Arc<ComponentRegistry> {
        Arc::clone(&self.registry)
    }

    /// Router-wide options.
    pub fn options(&self) -> &RouterOptions {
        &self.options
    }

    /// The root routing scope. Available after [`start`](Self::start).
    pub fn root_context(&self) -> RouterResult<Arc<RouteContext>> {
        self.root_ctx.lock().clone().ok_or_else(|| {
            RouterError::missing_context("Router has not been started; no root scope exists")
        })
    }

    /// The currently committed instructions.
    pub fn current_instructions(&self) -> ViewportInstructionTree {
        self.state.lock().instructions.clone()
    }

    /// The currently committed route tree.
    pub fn route_tree(&self) -> Option<RouteTree> {
        self.state.lock().route_tree.clone()
    }

    /// The composed title of the committed navigation.
    pub fn current_title(&self) -> String {
        self.state.lock().current_title.clone()
    }

    /// The most recent navigation snapshot.
    pub fn active_navigation(&self) -> Option<Navigation> {
        self.state.lock().active_navigation.clone()
    }

    // -------------------------------------------------------------------------
    // Lifecycle
    // -------------------------------------------------------------------------

    /// Start routing: build the root scope for `root`, begin listening to the
    /// location collaborator, and optionally perform the initial navigation
    /// from the current location.
    pub async fn start(
        self: &Arc<Self>,
        root: Arc<ComponentDefinition>,
        perform_initial_navigation: bool,
    ) -> RouterResult<bool> {
        let definition = root.route_definition();
        let root_ctx =
            RouteContext::create(Arc::clone(&self.registry), definition, None).await?;
        *self.root_ctx.lock() = Some(Arc::clone(&root_ctx));

        let nav_options = NavigationOptions::from_router_options(&self.options);
        {
            let mut state = self.state.lock();
            state.route_tree = Some(RouteTree::new(root_ctx, nav_options));
            state.running = true;
        }

        let weak = Arc::downgrade(self);
        self.location.start_listening(Arc::new(move |change| {
            if let Some(router) = weak.upgrade() {
                router.handle_location_change(change);
            }
        }));

        debug!(initial = perform_initial_navigation, "router started");
        if !perform_initial_navigation {
            return Ok(true);
        }
        let path = self.location.get_path();
        let options = NavigationOptions::from_router_options(&self.options)
            .with_history_strategy(HistoryStrategy::Replace);
        self.load(NavigationRequest::Path(path), Some(options)).await
    }

    /// Stop listening to the location collaborator.
    pub fn stop(&self) {
        self.location.stop_listening();
        self.state.lock().running = false;
        debug!("router stopped");
    }

    // -------------------------------------------------------------------------
    // Public navigation API
    // -------------------------------------------------------------------------

    /// Navigate. Resolves `true` if the navigation committed, `false` if it
    /// was cancelled by a guard or short-circuited as a no-op; rejects with
    /// the original error if a hook failed.
    pub async fn load(
        self: &Arc<Self>,
        request: impl Into<NavigationRequest>,
        options: Option<NavigationOptions>,
    ) -> RouterResult<bool> {
        let options =
            options.unwrap_or_else(|| NavigationOptions::from_router_options(&self.options));
        let tree = ViewportInstructionTree::create(request.into(), options)?;
        let rx = self.enqueue(tree, NavigationTrigger::Api, None, None);
        match rx.await {
            Ok(outcome) => outcome,
            // The completion sender only disappears when the router is torn
            // down mid-flight; report the navigation as not committed.
            Err(_) => Ok(false),
        }
    }

    /// Whether the given instructions are active in the committed route tree.
    pub fn is_active(
        &self,
        request: impl Into<NavigationRequest>,
        context: Option<Arc<RouteContext>>,
    ) -> RouterResult<bool> {
        let mut options = NavigationOptions::from_router_options(&self.options);
        if let Some(ctx) = context {
            options = options.with_context(ctx);
        }
        let tree = ViewportInstructionTree::create(request.into(), options)?;
        let state = self.state.lock();
        Ok(state
            .route_tree
            .as_ref()
            .is_some_and(|route_tree| route_tree.contains(&tree)))
    }

    // -------------------------------------------------------------------------
    // Context cache
    // -------------------------------------------------------------------------

    /// Get or create the routing scope for a component hosted by a viewport
    /// agent. Cached by (agent, component) so a scope survives across
    /// transitions for as long as its viewport does.
    pub(crate) async fn get_route_context(
        &self,
        vpa: &Arc<ViewportAgent>,
        component: &Arc<ComponentDefinition>,
        definition: &Arc<RouteDefinition>,
        parent: Option<Arc<RouteContext>>,
    ) -> RouterResult<Arc<RouteContext>> {
        let key = (vpa.id, component.id);
        if let Some(existing) = self.context_cache.get(&key) {
            return Ok(Arc::clone(existing.value()));
        }
        let created = RouteContext::create(
            Arc::clone(&self.registry),
            Arc::clone(definition),
            parent,
        )
        .await?;
        self.context_cache.insert(key, Arc::clone(&created));
        Ok(created)
    }

    // -------------------------------------------------------------------------
    // Queue discipline
    // -------------------------------------------------------------------------

    fn enqueue(
        self: &Arc<Self>,
        instructions: ViewportInstructionTree,
        trigger: NavigationTrigger,
        managed_state: Option<serde_json::Value>,
        failed_tr: Option<&Arc<Transition>>,
    ) -> oneshot::Receiver<RouterResult<bool>> {
        let (tx, rx) = oneshot::channel();
        // A redirect transition settles the original caller's channel.
        let completion = failed_tr.and_then(|failed| failed.take_completion()).unwrap_or(tx);

        let (tr, run_now) = {
            let mut state = self.state.lock();
            state.transition_id += 1;
            let tr = Transition::new(
                state.transition_id,
                trigger,
                instructions.options.clone(),
                managed_state,
                state.instructions.clone(),
                instructions,
                completion,
                Arc::downgrade(self),
            );
            if let Some(superseded) = state.next_tr.take() {
                debug!(
                    superseded = superseded.id,
                    by = tr.id,
                    "superseding queued transition"
                );
                superseded.resolve(false);
            }
            state.next_tr = Some(Arc::clone(&tr));
            (tr, state.current_tr.is_none())
        };
        trace!(transition = tr.id, trigger = %trigger, "enqueued transition");
        if run_now {
            self.dequeue_and_run();
        }
        rx
    }

    fn dequeue_and_run(self: &Arc<Self>) {
        let tr = {
            let mut state = self.state.lock();
            match state.next_tr.take() {
                Some(tr) => {
                    state.current_tr = Some(Arc::clone(&tr));
                    tr
                }
                None => return,
            }
        };
        self.run_transition(tr);
    }

    /// Release the current-transition slot if `tr` still owns it. Returns
    /// whether it did, which is what gates each terminal path (finalize,
    /// cancel, error) to exactly one winner.
    fn release_current(&self, tr: &Arc<Transition>) -> bool {
        let mut state = self.state.lock();
        let is_current = state
            .current_tr
            .as_ref()
            .is_some_and(|current| Arc::ptr_eq(current, tr));
        if is_current {
            state.current_tr = None;
        }
        is_current
    }

    // -------------------------------------------------------------------------
    // Pipeline
    // -------------------------------------------------------------------------

    fn run_transition(self: &Arc<Self>, tr: Arc<Transition>) {
        debug!(
            transition = tr.id,
            trigger = %tr.trigger,
            instructions = %tr.instructions.to_url(),
            "running transition"
        );

        {
            let mut state = self.state.lock();
            let prev = state.active_navigation.take();
            state.active_navigation = Some(Navigation::new(
                tr.id,
                tr.instructions.clone(),
                tr.trigger,
                prev.as_ref(),
            ));
        }

        // No-op short-circuit: identical instructions with the default
        // same-URL strategy resolve `false` without firing any events.
        let same_url_strategy = tr.options.same_url_strategy.resolve(&tr.instructions);
        let is_noop = {
            let state = self.state.lock();
            state.navigated
                && same_url_strategy == SameUrlStrategy::Ignore
                && state
                    .route_tree
                    .as_ref()
                    .is_some_and(|route_tree| instructions_match_tree(&tr.instructions, route_tree))
        };
        if is_noop {
            trace!(transition = tr.id, "NOT processing route, instructions unchanged");
            if self.release_current(&tr) {
                tr.resolve(false);
                self.dequeue_and_run();
            }
            return;
        }

        self.events.publish(&RouterEvent::NavigationStart {
            id: self.events.next_id(),
            instructions: tr.instructions.clone(),
            trigger: tr.trigger,
        });

        // App code commonly calls load() from a navigation-start handler; if
        // that happened, abandon this run and dispatch the newer request.
        let superseded = self.state.lock().next_tr.is_some();
        if superseded {
            debug!(
                transition = tr.id,
                "abandoning run, a new transition was queued during navigation-start"
            );
            if self.release_current(&tr) {
                tr.resolve(false);
                self.dequeue_and_run();
            }
            return;
        }

        let current_tree = match self.state.lock().route_tree.clone() {
            Some(tree) => tree,
            None => {
                tr.handle_error(RouterError::missing_context(
                    "Router has not been started; no route tree exists",
                ));
                return;
            }
        };
        let next_tree = current_tree.deep_clone();
        tr.set_route_trees(current_tree, next_tree);

        let router = Arc::clone(self);
        let router_pipeline = Arc::clone(self);
        let tr_update = Arc::clone(&tr);
        let tr_pipeline = Arc::clone(&tr);
        tr.run(
            move || update_route_tree(router, tr_update),
            move |_| router_pipeline.run_pipeline(&tr_pipeline),
        );
    }

    fn run_pipeline(self: &Arc<Self>, tr: &Arc<Transition>) {
        if tr.erred() {
            return;
        }
        let (Some(prev_tree), Some(next_tree)) = (tr.previous_route_tree(), tr.route_tree())
        else {
            return;
        };
        let prev_children = prev_tree.root().children();
        let next_children = next_tree.root().children();
        let all = merge_distinct(&prev_children, &next_children);
        debug!(
            transition = tr.id,
            prev = prev_children.len(),
            next = next_children.len(),
            "starting guard/lifecycle pipeline"
        );

        let canunload_nodes = all.clone();
        let canload_nodes = next_children.clone();
        let unload_nodes = prev_children.clone();
        let load_nodes = next_children;
        let swap_nodes = all;
        let tr_can_unload = Arc::clone(tr);
        let tr_can_load = Arc::clone(tr);
        let tr_unload = Arc::clone(tr);
        let tr_load = Arc::clone(tr);
        let tr_swap = Arc::clone(tr);

        let router_cancel_1 = Arc::clone(self);
        let router_cancel_2 = Arc::clone(self);
        let router_final = Arc::clone(self);
        let tr_cancel_1 = Arc::clone(tr);
        let tr_cancel_2 = Arc::clone(tr);
        let tr_final = Arc::clone(tr);

        Batch::new(move |b| {
            for node in &canunload_nodes {
                if let Some(vpa) = node.context().vpa() {
                    vpa.can_unload(&tr_can_unload, b);
                }
            }
        })
        .continue_with(move |b| {
            if !tr_cancel_1.erred() && !tr_cancel_1.guards_accepted() {
                b.push();
                router_cancel_1.cancel_navigation(&tr_cancel_1);
                b.pop();
            }
        })
        .continue_with(move |b| {
            for node in &canload_nodes {
                if let Some(vpa) = node.context().vpa() {
                    vpa.can_load(&tr_can_load, b);
                }
            }
        })
        .continue_with(move |b| {
            if !tr_cancel_2.erred() && !tr_cancel_2.guards_accepted() {
                b.push();
                router_cancel_2.cancel_navigation(&tr_cancel_2);
                b.pop();
            }
        })
        .continue_with(move |b| {
            if !tr_unload.guards_accepted() {
                return;
            }
            for node in &unload_nodes {
                if let Some(vpa) = node.context().vpa() {
                    vpa.unload(&tr_unload, b);
                }
            }
        })
        .continue_with(move |b| {
            if !tr_load.guards_accepted() {
                return;
            }
            for node in &load_nodes {
                if let Some(vpa) = node.context().vpa() {
                    vpa.load(&tr_load, b);
                }
            }
        })
        .continue_with(move |b| {
            if !tr_swap.guards_accepted() {
                return;
            }
            for node in &swap_nodes {
                if let Some(vpa) = node.context().vpa() {
                    vpa.swap(&tr_swap, b);
                }
            }
        })
        .continue_with(move |_| {
            if tr_final.erred() {
                return;
            }
            if !tr_final.guards_accepted() {
                // A guard rejected during the just-in-time (dynamic) phase.
                router_final.cancel_navigation(&tr_final);
                return;
            }
            router_final.finalize_transition(&tr_final);
        })
        .start();
    }

    fn finalize_transition(self: &Arc<Self>, tr: &Arc<Transition>) {
        let Some(next_tree) = tr.route_tree() else {
            return;
        };
        let prev_children = tr
            .previous_route_tree()
            .map(|t| t.root().children())
            .unwrap_or_default();
        let next_children = next_tree.root().children();
        for node in merge_distinct(&prev_children, &next_children) {
            if let Some(vpa) = node.context().vpa() {
                vpa.end_transition();
            }
        }

        let final_instructions = next_tree.finalize_instructions();
        tr.set_final_instructions(final_instructions.clone());

        let title = if tr.options.build_title {
            tr.options
                .title
                .clone()
                .unwrap_or_else(|| next_tree.build_title(&tr.options.title_separator))
        } else {
            String::new()
        };

        let applied_url = self.apply_history_state(tr, &final_instructions, &title);
        {
            let mut state = self.state.lock();
            state.navigated = true;
            state.route_tree = Some(next_tree);
            state.instructions = final_instructions.clone();
            state.current_title = title;
            state.last_api_url = match tr.trigger {
                NavigationTrigger::Api => applied_url,
                _ => None,
            };
        }

        self.events.publish(&RouterEvent::NavigationEnd {
            id: self.events.next_id(),
            instructions: tr.instructions.clone(),
            final_instructions,
        });

        debug!(transition = tr.id, "transition committed");
        if self.release_current(tr) {
            tr.resolve(true);
            self.dequeue_and_run();
        }
    }

    /// Roll every affected viewport back, restore the pre-transition state,
    /// and either settle the caller (`false`) or re-enqueue a guard-requested
    /// redirect that inherits the caller's completion channel.
    fn cancel_navigation(self: &Arc<Self>, tr: &Arc<Transition>) {
        if !self.release_current(tr) {
            return;
        }
        debug!(transition = tr.id, "cancelling navigation");

        let prev_children = tr
            .previous_route_tree()
            .map(|t| t.root().children())
            .unwrap_or_default();
        let next_children = tr
            .route_tree()
            .map(|t| t.root().children())
            .unwrap_or_default();
        for node in merge_distinct(&prev_children, &next_children) {
            if let Some(vpa) = node.context().vpa() {
                vpa.cancel_update();
            }
        }

        {
            let mut state = self.state.lock();
            state.instructions = tr.prev_instructions.clone();
            if let Some(prev_tree) = tr.previous_route_tree() {
                state.route_tree = Some(prev_tree);
            }
        }

        match tr.guards_result() {
            GuardsResult::Redirect(redirect) => {
                self.events.publish(&RouterEvent::NavigationCancel {
                    id: self.events.next_id(),
                    instructions: tr.instructions.clone(),
                    reason: format!("guard redirected to '{}'", redirect.to_url()),
                });
                debug!(
                    transition = tr.id,
                    target = %redirect.to_url(),
                    "re-enqueueing guard redirect"
                );
                let _ = self.enqueue(redirect, NavigationTrigger::Api, None, Some(tr));
            }
            _ => {
                self.events.publish(&RouterEvent::NavigationCancel {
                    id: self.events.next_id(),
                    instructions: tr.instructions.clone(),
                    reason: "guard rejected".to_string(),
                });
                tr.resolve(false);
                self.dequeue_and_run();
            }
        }
    }

    /// Entry point for transition errors: publish, release the slot, move on.
    pub(crate) fn on_transition_error(self: &Arc<Self>, tr: &Arc<Transition>, err: RouterError) {
        warn!(transition = tr.id, error = %err, "transition errored");
        if !self.release_current(tr) {
            return;
        }
        self.events.publish(&RouterEvent::NavigationError {
            id: self.events.next_id(),
            instructions: tr.instructions.clone(),
            error: err,
        });
        self.dequeue_and_run();
    }

    // -------------------------------------------------------------------------
    // History
    // -------------------------------------------------------------------------

    fn apply_history_state(
        &self,
        tr: &Arc<Transition>,
        final_instructions: &ViewportInstructionTree,
        title: &str,
    ) -> Option<String> {
        let strategy = tr.options.history_strategy.resolve(&tr.instructions);
        if strategy == HistoryStrategy::None {
            return None;
        }
        let url = self.location.add_base_href(&final_instructions.to_url());

        let mut managed = match &tr.options.state {
            Some(serde_json::Value::Object(map)) => map.clone(),
            _ => serde_json::Map::new(),
        };
        managed.insert(NAV_ID_KEY.to_string(), serde_json::json!(tr.id));
        let state = serde_json::Value::Object(managed);

        match strategy {
            HistoryStrategy::Push => self.location.push_state(state, title, &url),
            HistoryStrategy::Replace => self.location.replace_state(state, title, &url),
            HistoryStrategy::None => {}
        }
        trace!(url = %url, strategy = ?strategy, "applied history state");
        Some(url)
    }

    fn handle_location_change(self: &Arc<Self>, change: LocationChange) {
        if !self.state.lock().running {
            return;
        }
        self.events.publish(&RouterEvent::LocationChange {
            id: self.events.next_id(),
            url: change.url.clone(),
            trigger: change.trigger,
        });

        // The history write of a just-committed api navigation echoes back as
        // a location event on some hosts; swallow exactly that echo.
        {
            let mut state = self.state.lock();
            if state.last_api_url.as_deref() == Some(change.url.as_str()) {
                trace!(url = %change.url, "ignoring location echo of api navigation");
                state.last_api_url = None;
                return;
            }
            state.last_api_url = None;
        }

        let options = NavigationOptions::from_router_options(&self.options)
            .with_history_strategy(HistoryStrategy::None);
        let path = self.location.remove_base_href(&change.url);
        let tree = match ViewportInstructionTree::create(NavigationRequest::Path(path), options) {
            Ok(tree) => tree,
            Err(err) => {
                warn!(url = %change.url, error = %err, "ignoring unparseable location change");
                return;
            }
        };
        let _ = self.enqueue(tree, change.trigger, change.state, None);
    }
}

/// Whether the requested instructions already describe the committed tree,
/// compared against each root child's original (pre-redirect) instruction.
fn instructions_match_tree(instructions: &ViewportInstructionTree, tree: &RouteTree) -> bool {
    let roots = tree.root().children();
    if instructions.children.len() != roots.len() {
        return false;
    }
    if instructions.query_params != tree.query_params() {
        return false;
    }
    instructions
        .children
        .iter()
        .zip(roots.iter())
        .all(|(vi, node)| {
            node.original_instruction()
                .is_some_and(|original| original.equals(vi))
        })
}
