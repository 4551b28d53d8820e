//! Viewport agents
//!
//! A [`ViewportAgent`] is the state machine owning exactly one viewport's
//! current and next routed component. The two sides progress independently:
//!
//! ```text
//! curr: IsEmpty ⇄ IsActive → CanUnload → CanUnloadDone → Unload → UnloadDone → Deactivate
//! next: IsEmpty → IsScheduled → CanLoad → CanLoadDone → Load → LoadDone → Activate
//! ```
//!
//! On success `end_transition` folds the next side into the current one; on
//! guard failure or redirect `cancel_update` rolls both sides back. Any state
//! an operation cannot accept is a fatal `UnexpectedState` error funneled
//! through the transition — never a silent no-op — because an unexpected
//! state here means a framework bug or an illegal concurrent mutation.

use crate::batch::Batch;
use crate::component::ComponentAgent;
use crate::context::RouteContext;
use crate::error::{RouterError, RouterResult};
use crate::options::{ResolutionMode, SwapStrategy};
use crate::route_config::TransitionPlan;
use crate::transition::Transition;
use crate::tree::{RouteNode, get_dynamic_children, merge_distinct};
use parking_lot::Mutex;
use std::fmt;
use std::sync::{Arc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, trace};

/// Name of the viewport routes target when none is specified.
pub const DEFAULT_VIEWPORT_NAME: &str = "default";

// =============================================================================
// Viewport
// =============================================================================

/// Configuration of one named slot where routed components mount.
///
/// Created by the rendering glue when a viewport element appears; this crate
/// only consumes it.
#[derive(Debug, Clone)]
pub struct Viewport {
    /// The viewport name routes target.
    pub name: String,
    /// When non-empty, only these components may use the viewport.
    pub used_by: Vec<String>,
    /// Component instantiated when no instruction claims the viewport.
    pub default_component: Option<String>,
    /// Component used when a child path cannot be recognized.
    pub fallback: Option<String>,
    /// Whether the outgoing component is kept alive instead of disposed.
    pub stateful: bool,
}

impl Viewport {
    /// A viewport with the given name and no further constraints.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            used_by: Vec::new(),
            default_component: None,
            fallback: None,
            stateful: false,
        }
    }
}

impl Default for Viewport {
    fn default() -> Self {
        Self::named(DEFAULT_VIEWPORT_NAME)
    }
}

/// A request for a viewport able to host a component, used during route-tree
/// construction.
#[derive(Debug, Clone)]
pub struct ViewportRequest {
    /// Requested viewport name; empty means "any available".
    pub viewport_name: String,
    /// The component that will be hosted.
    pub component_name: String,
    /// Resolution mode of the requesting navigation.
    pub resolution: ResolutionMode,
    /// Whether the instruction appends.
    pub append: bool,
}

// =============================================================================
// States
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CurrState {
    IsEmpty,
    IsActive,
    CanUnload,
    CanUnloadDone,
    Unload,
    UnloadDone,
    Deactivate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NextState {
    IsEmpty,
    IsScheduled,
    CanLoad,
    CanLoadDone,
    Load,
    LoadDone,
    Activate,
}

struct AgentState {
    curr: CurrState,
    next: NextState,
    plan: TransitionPlan,
    resolution: ResolutionMode,
    cur_ca: Option<Arc<ComponentAgent>>,
    next_ca: Option<Arc<ComponentAgent>>,
    curr_node: Option<RouteNode>,
    next_node: Option<RouteNode>,
    curr_transition: Option<u64>,
    prev_transition: Option<u64>,
}

static AGENT_ID: AtomicU64 = AtomicU64::new(1);

/// The state machine owning one viewport's routed component.
pub struct ViewportAgent {
    pub(crate) id: u64,
    viewport: Viewport,
    #[allow(dead_code)]
    ctx: Weak<RouteContext>,
    state: Mutex<AgentState>,
}

impl ViewportAgent {
    pub(crate) fn new(viewport: Viewport, ctx: Weak<RouteContext>) -> Arc<Self> {
        Arc::new(Self {
            id: AGENT_ID.fetch_add(1, Ordering::Relaxed),
            viewport,
            ctx,
            state: Mutex::new(AgentState {
                curr: CurrState::IsEmpty,
                next: NextState::IsEmpty,
                plan: TransitionPlan::Replace,
                resolution: ResolutionMode::Dynamic,
                cur_ca: None,
                next_ca: None,
                curr_node: None,
                next_node: None,
                curr_transition: None,
                prev_transition: None,
            }),
        })
    }

    /// The viewport this agent owns.
    pub fn viewport(&self) -> &Viewport {
        &self.viewport
    }

    /// The active component agent, if any.
    pub fn current_component(&self) -> Option<Arc<ComponentAgent>> {
        self.state.lock().cur_ca.clone()
    }

    /// The node currently mounted in this viewport.
    pub fn current_node(&self) -> Option<RouteNode> {
        self.state.lock().curr_node.clone()
    }

    fn describe(&self) -> String {
        let state = self.state.lock();
        format!(
            "ViewportAgent(viewport: '{}', state: {:?}/{:?}, plan: {:?})",
            self.viewport.name, state.curr, state.next, state.plan
        )
    }

    /// Whether this agent can accept a new scheduled component.
    pub(crate) fn is_available(&self) -> bool {
        self.state.lock().next == NextState::IsEmpty
    }

    /// Whether this viewport can host the requested component.
    pub(crate) fn handles(&self, request: &ViewportRequest) -> bool {
        if !self.viewport.used_by.is_empty()
            && !self.viewport.used_by.contains(&request.component_name)
        {
            return false;
        }
        request.viewport_name.is_empty() || request.viewport_name == self.viewport.name
    }

    // -------------------------------------------------------------------------
    // schedule_update
    // -------------------------------------------------------------------------

    /// Entry point called once per viewport per transition by route-tree
    /// building: records the next node and decides the transition plan.
    pub(crate) fn schedule_update(
        self: &Arc<Self>,
        tr: &Arc<Transition>,
        next_node: RouteNode,
    ) -> RouterResult<()> {
        let mut st = self.state.lock();
        match (st.curr, st.next) {
            (CurrState::IsEmpty | CurrState::IsActive, NextState::IsEmpty) => {}
            _ => {
                drop(st);
                return Err(RouterError::unexpected_state(
                    "schedule_update",
                    self.describe(),
                ));
            }
        }

        st.curr_transition = Some(tr.id);
        st.resolution = tr.options.resolution_mode;
        st.next = NextState::IsScheduled;
        st.next_node = Some(next_node.clone());

        st.plan = match (&st.cur_ca, st.curr) {
            (Some(ca), CurrState::IsActive) => {
                let same_component = next_node
                    .component()
                    .is_some_and(|next_def| Arc::ptr_eq(&ca.definition, &next_def));
                if same_component {
                    let current = st
                        .curr_node
                        .clone()
                        .unwrap_or_else(|| next_node.clone());
                    next_node
                        .context()
                        .definition()
                        .transition_plan_for(&current, &next_node)
                } else {
                    TransitionPlan::Replace
                }
            }
            _ => TransitionPlan::Replace,
        };

        trace!(
            viewport = %self.viewport.name,
            plan = ?st.plan,
            resolution = ?st.resolution,
            previous_transition = ?st.prev_transition,
            "scheduled viewport update"
        );
        Ok(())
    }

    // -------------------------------------------------------------------------
    // can_unload (bottom-up)
    // -------------------------------------------------------------------------

    /// Invoke `can_unload` guards, children before self.
    pub(crate) fn can_unload(self: &Arc<Self>, tr: &Arc<Transition>, b: &Batch) {
        if tr.erred() || !tr.guards_accepted() {
            return;
        }
        b.push();
        let children = {
            let mut st = self.state.lock();
            if st.curr_transition.is_none() {
                st.curr_transition = Some(tr.id);
            }
            st.curr_node
                .as_ref()
                .map(|n| n.children())
                .unwrap_or_default()
        };

        let this = Arc::clone(self);
        let tr_children = Arc::clone(tr);
        let tr_own = Arc::clone(tr);
        let b_outer = b.clone();

        Batch::new(move |b1| {
            for child in &children {
                if let Some(vpa) = child.context().vpa() {
                    vpa.can_unload(&tr_children, b1);
                }
            }
        })
        .continue_with(move |b1| {
            if tr_own.erred() {
                return;
            }
            enum Action {
                Nothing,
                RunHook(Arc<ComponentAgent>, Option<RouteNode>),
                Fail,
            }
            let action = {
                let mut st = this.state.lock();
                match st.curr {
                    CurrState::IsEmpty => Action::Nothing,
                    CurrState::IsActive => {
                        st.curr = CurrState::CanUnload;
                        // Nothing scheduled means the component is being
                        // removed outright, which always runs its guards.
                        let plan = if st.next == NextState::IsEmpty {
                            TransitionPlan::Replace
                        } else {
                            st.plan
                        };
                        match plan {
                            TransitionPlan::None => {
                                st.curr = CurrState::CanUnloadDone;
                                Action::Nothing
                            }
                            TransitionPlan::InvokeLifecycles | TransitionPlan::Replace => {
                                match st.cur_ca.clone() {
                                    Some(ca) => Action::RunHook(ca, st.next_node.clone()),
                                    None => Action::Fail,
                                }
                            }
                        }
                    }
                    _ => Action::Fail,
                }
            };
            match action {
                Action::Nothing => {}
                Action::Fail => {
                    tr_own
                        .handle_error(RouterError::unexpected_state("can_unload", this.describe()));
                }
                Action::RunHook(ca, next_node) => {
                    b1.push();
                    let this_done = Arc::clone(&this);
                    let tr_hook = Arc::clone(&tr_own);
                    let b1_done = b1.clone();
                    Batch::new(move |b2| {
                        ca.can_unload(&tr_hook, next_node, b2);
                    })
                    .continue_with(move |_| {
                        let mut st = this_done.state.lock();
                        if st.curr == CurrState::CanUnload {
                            st.curr = CurrState::CanUnloadDone;
                        }
                        drop(st);
                        b1_done.pop();
                    })
                    .start();
                }
            }
        })
        .continue_with(move |_| b_outer.pop())
        .start();
    }

    // -------------------------------------------------------------------------
    // can_load (top-down)
    // -------------------------------------------------------------------------

    /// Invoke `can_load` guards, self before children. For a `replace` plan
    /// the next component agent is created here; for `invoke-lifecycles` the
    /// current one is reused; a `none` plan runs no hook but still resolves
    /// residue so existing children are recursed into.
    pub(crate) fn can_load(self: &Arc<Self>, tr: &Arc<Transition>, b: &Batch) {
        if tr.erred() || !tr.guards_accepted() {
            return;
        }
        b.push();
        let this = Arc::clone(self);
        let tr_own = Arc::clone(tr);
        let tr_children = Arc::clone(tr);
        let this_children = Arc::clone(self);
        let this_final = Arc::clone(self);
        let tr_final = Arc::clone(tr);
        let b_outer = b.clone();

        Batch::new(move |b1| {
            enum Action {
                Nothing,
                RunHook(Arc<ComponentAgent>, RouteNode),
                Fail,
            }
            let action = {
                let mut st = this.state.lock();
                if st.curr_transition.is_none() {
                    st.curr_transition = Some(tr_own.id);
                }
                match st.next {
                    NextState::IsEmpty => Action::Nothing,
                    NextState::IsScheduled => {
                        st.next = NextState::CanLoad;
                        let next_node = match st.next_node.clone() {
                            Some(node) => node,
                            None => {
                                drop(st);
                                tr_own.handle_error(RouterError::unexpected_state(
                                    "can_load",
                                    this.describe(),
                                ));
                                return;
                            }
                        };
                        match st.plan {
                            TransitionPlan::None => Action::Nothing,
                            TransitionPlan::InvokeLifecycles => match st.cur_ca.clone() {
                                Some(ca) => Action::RunHook(ca, next_node),
                                None => Action::Fail,
                            },
                            TransitionPlan::Replace => {
                                match next_node.context().create_component_agent(next_node.clone())
                                {
                                    Ok(ca) => {
                                        st.next_ca = Some(Arc::clone(&ca));
                                        Action::RunHook(ca, next_node)
                                    }
                                    Err(err) => {
                                        drop(st);
                                        tr_own.handle_error(err);
                                        return;
                                    }
                                }
                            }
                        }
                    }
                    _ => Action::Fail,
                }
            };
            match action {
                Action::Nothing => {}
                Action::Fail => {
                    tr_own.handle_error(RouterError::unexpected_state("can_load", this.describe()));
                }
                Action::RunHook(ca, next_node) => ca.can_load(&tr_own, next_node, b1),
            }
        })
        .continue_with(move |b1| {
            if tr_children.erred() || !tr_children.guards_accepted() {
                return;
            }
            let (plan, next_node) = {
                let st = this_children.state.lock();
                (st.plan, st.next_node.clone())
            };
            let Some(next_node) = next_node else { return };
            match plan {
                TransitionPlan::None | TransitionPlan::InvokeLifecycles => {
                    // Children of a kept component come out of the node's
                    // residue; resolve it now, then guard the children.
                    let Some(router) = tr_children.router() else { return };
                    b1.push();
                    let tr_prepare = Arc::clone(&tr_children);
                    let tr_continue = Arc::clone(&tr_children);
                    let b1_done = b1.clone();
                    let node_prepare = next_node.clone();
                    let node_continue = next_node.clone();
                    tr_children.run(
                        move || crate::tree::process_residue(router, tr_prepare, node_prepare),
                        move |_| {
                            Batch::new(move |b2| {
                                for child in node_continue.children() {
                                    if let Some(vpa) = child.context().vpa() {
                                        vpa.can_load(&tr_continue, b2);
                                    }
                                }
                            })
                            .continue_with(move |_| b1_done.pop())
                            .start();
                        },
                    );
                }
                TransitionPlan::Replace => {
                    // Statically resolved children already exist; dynamic ones
                    // wait for activation.
                    for child in next_node.children() {
                        if let Some(vpa) = child.context().vpa() {
                            vpa.can_load(&tr_children, b1);
                        }
                    }
                }
            }
        })
        .continue_with(move |_| {
            if !tr_final.erred() {
                let mut st = this_final.state.lock();
                if st.next == NextState::CanLoad {
                    st.next = NextState::CanLoadDone;
                }
            }
            b_outer.pop();
        })
        .start();
    }

    // -------------------------------------------------------------------------
    // unload (bottom-up)
    // -------------------------------------------------------------------------

    /// Invoke `unload` hooks, children before self.
    pub(crate) fn unload(self: &Arc<Self>, tr: &Arc<Transition>, b: &Batch) {
        if tr.erred() {
            return;
        }
        b.push();
        let children = {
            let st = self.state.lock();
            st.curr_node
                .as_ref()
                .map(|n| n.children())
                .unwrap_or_default()
        };
        let this = Arc::clone(self);
        let tr_children = Arc::clone(tr);
        let tr_own = Arc::clone(tr);
        let b_outer = b.clone();

        Batch::new(move |b1| {
            for child in &children {
                if let Some(vpa) = child.context().vpa() {
                    vpa.unload(&tr_children, b1);
                }
            }
        })
        .continue_with(move |b1| {
            if tr_own.erred() {
                return;
            }
            enum Action {
                Nothing,
                RunHook(Arc<ComponentAgent>, Option<RouteNode>),
                Fail,
            }
            let action = {
                let mut st = this.state.lock();
                match st.curr {
                    CurrState::IsEmpty => Action::Nothing,
                    CurrState::CanUnloadDone => {
                        st.curr = CurrState::Unload;
                        let plan = if st.next == NextState::IsEmpty {
                            TransitionPlan::Replace
                        } else {
                            st.plan
                        };
                        match plan {
                            TransitionPlan::None => {
                                st.curr = CurrState::UnloadDone;
                                Action::Nothing
                            }
                            TransitionPlan::InvokeLifecycles | TransitionPlan::Replace => {
                                match st.cur_ca.clone() {
                                    Some(ca) => Action::RunHook(ca, st.next_node.clone()),
                                    None => Action::Fail,
                                }
                            }
                        }
                    }
                    _ => Action::Fail,
                }
            };
            match action {
                Action::Nothing => {}
                Action::Fail => {
                    tr_own.handle_error(RouterError::unexpected_state("unload", this.describe()));
                }
                Action::RunHook(ca, next_node) => {
                    b1.push();
                    let this_done = Arc::clone(&this);
                    let tr_hook = Arc::clone(&tr_own);
                    let b1_done = b1.clone();
                    Batch::new(move |b2| {
                        ca.unload(&tr_hook, next_node, b2);
                    })
                    .continue_with(move |_| {
                        let mut st = this_done.state.lock();
                        if st.curr == CurrState::Unload {
                            st.curr = CurrState::UnloadDone;
                        }
                        drop(st);
                        b1_done.pop();
                    })
                    .start();
                }
            }
        })
        .continue_with(move |_| b_outer.pop())
        .start();
    }

    // -------------------------------------------------------------------------
    // load (top-down)
    // -------------------------------------------------------------------------

    /// Invoke `load` hooks, self before children.
    pub(crate) fn load(self: &Arc<Self>, tr: &Arc<Transition>, b: &Batch) {
        if tr.erred() {
            return;
        }
        b.push();
        let this = Arc::clone(self);
        let tr_own = Arc::clone(tr);
        let tr_children = Arc::clone(tr);
        let this_children = Arc::clone(self);
        let this_final = Arc::clone(self);
        let tr_final = Arc::clone(tr);
        let b_outer = b.clone();

        Batch::new(move |b1| {
            enum Action {
                Nothing,
                RunHook(Arc<ComponentAgent>, RouteNode),
                Fail,
            }
            let action = {
                let mut st = this.state.lock();
                match st.next {
                    NextState::IsEmpty => Action::Nothing,
                    NextState::CanLoadDone => {
                        st.next = NextState::Load;
                        let next_node = st.next_node.clone();
                        match (st.plan, next_node) {
                            (TransitionPlan::None, _) => Action::Nothing,
                            (TransitionPlan::InvokeLifecycles, Some(node)) => {
                                match st.cur_ca.clone() {
                                    Some(ca) => Action::RunHook(ca, node),
                                    None => Action::Fail,
                                }
                            }
                            (TransitionPlan::Replace, Some(node)) => match st.next_ca.clone() {
                                Some(ca) => Action::RunHook(ca, node),
                                None => Action::Fail,
                            },
                            _ => Action::Fail,
                        }
                    }
                    _ => Action::Fail,
                }
            };
            match action {
                Action::Nothing => {}
                Action::Fail => {
                    tr_own.handle_error(RouterError::unexpected_state("load", this.describe()));
                }
                Action::RunHook(ca, next_node) => ca.load(&tr_own, next_node, b1),
            }
        })
        .continue_with(move |b1| {
            if tr_children.erred() {
                return;
            }
            let next_node = this_children.state.lock().next_node.clone();
            if let Some(node) = next_node {
                for child in node.children() {
                    if let Some(vpa) = child.context().vpa() {
                        vpa.load(&tr_children, b1);
                    }
                }
            }
        })
        .continue_with(move |_| {
            if !tr_final.erred() {
                let mut st = this_final.state.lock();
                if st.next == NextState::Load {
                    st.next = NextState::LoadDone;
                }
            }
            b_outer.pop();
        })
        .start();
    }

    // -------------------------------------------------------------------------
    // activate / deactivate
    // -------------------------------------------------------------------------

    /// Activate the next component. A dynamically resolved viewport that was
    /// only scheduled runs can_load → load → activate as one chain here (the
    /// just-in-time path for children of freshly activated components).
    pub(crate) fn activate(self: &Arc<Self>, tr: &Arc<Transition>, b: &Batch) {
        if tr.erred() {
            return;
        }
        {
            let st = self.state.lock();
            if st.resolution == ResolutionMode::Dynamic && st.next == NextState::IsScheduled {
                drop(st);
                b.push();
                let chain_1 = Arc::clone(self);
                let chain_2 = Arc::clone(self);
                let chain_3 = Arc::clone(self);
                let tr_1 = Arc::clone(tr);
                let tr_2 = Arc::clone(tr);
                let tr_3 = Arc::clone(tr);
                let b_done = b.clone();
                Batch::new(move |b1| chain_1.can_load(&tr_1, b1))
                    .continue_with(move |b1| chain_2.load(&tr_2, b1))
                    .continue_with(move |b1| chain_3.activate(&tr_3, b1))
                    .continue_with(move |_| b_done.pop())
                    .start();
                return;
            }
        }

        b.push();
        enum Action {
            Nothing,
            RunActivate(Arc<ComponentAgent>, RouteNode),
            RecurseOnly(RouteNode),
            Fail,
        }
        let action = {
            let mut st = self.state.lock();
            match st.next {
                NextState::IsEmpty => Action::Nothing,
                NextState::LoadDone => {
                    st.next = NextState::Activate;
                    match (st.plan, st.next_node.clone()) {
                        (TransitionPlan::Replace, Some(node)) => match st.next_ca.clone() {
                            Some(ca) => Action::RunActivate(ca, node),
                            None => Action::Fail,
                        },
                        (
                            TransitionPlan::None | TransitionPlan::InvokeLifecycles,
                            Some(node),
                        ) => Action::RecurseOnly(node),
                        _ => Action::Fail,
                    }
                }
                _ => Action::Fail,
            }
        };
        match action {
            Action::Nothing => {}
            Action::Fail => {
                tr.handle_error(RouterError::unexpected_state("activate", self.describe()));
            }
            Action::RecurseOnly(node) => {
                for child in node.children() {
                    if let Some(vpa) = child.context().vpa() {
                        vpa.activate(tr, b);
                    }
                }
            }
            Action::RunActivate(ca, node) => {
                b.push();
                let tr_hook = Arc::clone(tr);
                let tr_dyn = Arc::clone(tr);
                let b_done = b.clone();
                Batch::new(move |b1| {
                    ca.activate(&tr_hook, b1);
                })
                .continue_with(move |b1| {
                    // Resolve residue discovered by the activation and drive
                    // the resulting children through their own activation.
                    if tr_dyn.erred() {
                        return;
                    }
                    let Some(router) = tr_dyn.router() else { return };
                    b1.push();
                    let tr_prepare = Arc::clone(&tr_dyn);
                    let tr_continue = Arc::clone(&tr_dyn);
                    let b1_done = b1.clone();
                    let node_prepare = node.clone();
                    let node_continue = node.clone();
                    tr_dyn.run(
                        move || get_dynamic_children(router, tr_prepare, node_prepare),
                        move |_| {
                            Batch::new(move |b2| {
                                for child in node_continue.children() {
                                    if let Some(vpa) = child.context().vpa() {
                                        vpa.activate(&tr_continue, b2);
                                    }
                                }
                            })
                            .continue_with(move |_| b1_done.pop())
                            .start();
                        },
                    );
                })
                .continue_with(move |_| b_done.pop())
                .start();
            }
        }
        b.pop();
    }

    /// Deactivate the current component, children before self. The component
    /// is disposed unless the viewport is stateful.
    pub(crate) fn deactivate(self: &Arc<Self>, tr: &Arc<Transition>, b: &Batch) {
        if tr.erred() {
            return;
        }
        b.push();
        let children = {
            let st = self.state.lock();
            st.curr_node
                .as_ref()
                .map(|n| n.children())
                .unwrap_or_default()
        };
        let this = Arc::clone(self);
        let tr_children = Arc::clone(tr);
        let tr_own = Arc::clone(tr);
        let b_outer = b.clone();
        let stateful = self.viewport.stateful;

        Batch::new(move |b1| {
            for child in &children {
                if let Some(vpa) = child.context().vpa() {
                    vpa.deactivate(&tr_children, b1);
                }
            }
        })
        .continue_with(move |b1| {
            if tr_own.erred() {
                return;
            }
            enum Action {
                Nothing,
                RunDeactivate(Arc<ComponentAgent>),
                Fail,
            }
            let action = {
                let mut st = this.state.lock();
                match st.curr {
                    CurrState::IsEmpty => Action::Nothing,
                    CurrState::UnloadDone => {
                        st.curr = CurrState::Deactivate;
                        let plan = if st.next == NextState::IsEmpty {
                            TransitionPlan::Replace
                        } else {
                            st.plan
                        };
                        match plan {
                            TransitionPlan::Replace => match st.cur_ca.clone() {
                                Some(ca) => Action::RunDeactivate(ca),
                                None => Action::Fail,
                            },
                            _ => Action::Nothing,
                        }
                    }
                    _ => Action::Fail,
                }
            };
            match action {
                Action::Nothing => {}
                Action::Fail => {
                    tr_own.handle_error(RouterError::unexpected_state(
                        "deactivate",
                        this.describe(),
                    ));
                }
                Action::RunDeactivate(ca) => ca.deactivate(&tr_own, b1, !stateful),
            }
        })
        .continue_with(move |_| b_outer.pop())
        .start();
    }

    // -------------------------------------------------------------------------
    // swap
    // -------------------------------------------------------------------------

    /// Transition current and next together. Only a `replace` plan swaps at
    /// this level; `none`/`invoke-lifecycles` recurse into the merged
    /// children instead.
    pub(crate) fn swap(self: &Arc<Self>, tr: &Arc<Transition>, b: &Batch) {
        if tr.erred() {
            return;
        }
        b.push();
        let (plan, has_current, has_next, curr_children, next_children) = {
            let st = self.state.lock();
            (
                st.plan,
                st.curr != CurrState::IsEmpty,
                st.next != NextState::IsEmpty,
                st.curr_node
                    .as_ref()
                    .map(|n| n.children())
                    .unwrap_or_default(),
                st.next_node
                    .as_ref()
                    .map(|n| n.children())
                    .unwrap_or_default(),
            )
        };

        match (has_current, has_next) {
            (false, false) => {}
            (false, true) => self.activate(tr, b),
            (true, false) => self.deactivate(tr, b),
            (true, true) => match plan {
                TransitionPlan::None | TransitionPlan::InvokeLifecycles => {
                    for node in merge_distinct(&next_children, &curr_children) {
                        if let Some(vpa) = node.context().vpa() {
                            vpa.swap(tr, b);
                        }
                    }
                }
                TransitionPlan::Replace => {
                    debug!(
                        viewport = %self.viewport.name,
                        strategy = ?tr.options.swap_strategy,
                        "swapping viewport content"
                    );
                    match tr.options.swap_strategy {
                        SwapStrategy::SequentialRemoveFirst => {
                            b.push();
                            let first = Arc::clone(self);
                            let second = Arc::clone(self);
                            let tr_1 = Arc::clone(tr);
                            let tr_2 = Arc::clone(tr);
                            let b_done = b.clone();
                            Batch::new(move |b1| first.deactivate(&tr_1, b1))
                                .continue_with(move |b1| second.activate(&tr_2, b1))
                                .continue_with(move |_| b_done.pop())
                                .start();
                        }
                        SwapStrategy::SequentialAddFirst => {
                            b.push();
                            let first = Arc::clone(self);
                            let second = Arc::clone(self);
                            let tr_1 = Arc::clone(tr);
                            let tr_2 = Arc::clone(tr);
                            let b_done = b.clone();
                            Batch::new(move |b1| first.activate(&tr_1, b1))
                                .continue_with(move |b1| second.deactivate(&tr_2, b1))
                                .continue_with(move |_| b_done.pop())
                                .start();
                        }
                        SwapStrategy::ParallelRemoveFirst => {
                            self.deactivate(tr, b);
                            self.activate(tr, b);
                        }
                    }
                }
            },
        }
        b.pop();
    }

    // -------------------------------------------------------------------------
    // cancel / finalize
    // -------------------------------------------------------------------------

    /// Roll the agent back after a guard rejection or redirect: the current
    /// side returns to `IsActive`, the next side is cleared, and a component
    /// agent created for the abandoned next component is disposed.
    pub(crate) fn cancel_update(self: &Arc<Self>) {
        let (curr_children, next_children) = {
            let st = self.state.lock();
            (
                st.curr_node
                    .as_ref()
                    .map(|n| n.children())
                    .unwrap_or_default(),
                st.next_node
                    .as_ref()
                    .map(|n| n.children())
                    .unwrap_or_default(),
            )
        };
        for child in curr_children.iter().chain(next_children.iter()) {
            if let Some(vpa) = child.context().vpa() {
                vpa.cancel_update();
            }
        }

        let abandoned = {
            let mut st = self.state.lock();
            match st.curr {
                CurrState::CanUnload | CurrState::CanUnloadDone => {
                    st.curr = CurrState::IsActive;
                }
                _ => {}
            }
            st.next = NextState::IsEmpty;
            st.next_node = None;
            st.curr_transition = None;
            st.next_ca.take()
        };
        if let Some(ca) = abandoned {
            trace!(viewport = %self.viewport.name, "disposing abandoned next component");
            ca.dispose();
        }
    }

    /// Fold the next side into the current one after a committed transition,
    /// recursively finalizing both the outgoing and the incoming subtree.
    /// Disposal already happened during deactivation; this only reassigns
    /// ownership.
    pub(crate) fn end_transition(self: &Arc<Self>) {
        let outgoing_children = {
            let st = self.state.lock();
            st.curr_node
                .as_ref()
                .map(|n| n.children())
                .unwrap_or_default()
        };
        let incoming_children = {
            let mut st = self.state.lock();
            match st.next {
                NextState::IsEmpty => {
                    if st.curr == CurrState::Deactivate {
                        st.cur_ca = None;
                        st.curr = CurrState::IsEmpty;
                        st.curr_node = None;
                    }
                }
                NextState::Activate | NextState::LoadDone => {
                    match st.plan {
                        TransitionPlan::Replace => {
                            st.cur_ca = st.next_ca.take();
                        }
                        TransitionPlan::None | TransitionPlan::InvokeLifecycles => {
                            st.next_ca = None;
                        }
                    }
                    if let (Some(ca), Some(node)) = (&st.cur_ca, &st.next_node) {
                        ca.set_route_node(node.clone());
                    }
                    st.curr_node = st.next_node.take();
                    st.curr = CurrState::IsActive;
                    st.next = NextState::IsEmpty;
                }
                _ => {
                    trace!(
                        viewport = %self.viewport.name,
                        state = ?st.next,
                        "end_transition with unsettled next state"
                    );
                }
            }
            st.prev_transition = st.curr_transition.take();
            st.curr_node
                .as_ref()
                .map(|n| n.children())
                .unwrap_or_default()
        };
        for child in outgoing_children.iter().chain(incoming_children.iter()) {
            if let Some(vpa) = child.context().vpa() {
                vpa.end_transition();
            }
        }
    }

    /// Drop everything this agent holds; the viewport left the document.
    pub(crate) fn dispose(&self) {
        let (current, next) = {
            let mut st = self.state.lock();
            st.curr = CurrState::IsEmpty;
            st.next = NextState::IsEmpty;
            st.curr_node = None;
            st.next_node = None;
            (st.cur_ca.take(), st.next_ca.take())
        };
        if let Some(ca) = current {
            ca.dispose();
        }
        if let Some(ca) = next {
            ca.dispose();
        }
    }
}

impl fmt::Display for ViewportAgent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.describe())
    }
}

impl fmt::Debug for ViewportAgent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.describe())
    }
}
