//! Route tree
//!
//! The resolved, hierarchical navigation state. A [`RouteNode`] binds a
//! routing scope ([`RouteContext`]) to a matched path, parameters and
//! children; a [`RouteTree`] wraps the root node plus the navigation options
//! that produced it. Exactly one tree is current on the router; transitions
//! deep-clone it and mutate the clone incrementally as asynchronous
//! resolution completes.
//!
//! The free functions in this module implement tree construction: drilling
//! down to the target scope, creating nodes from instructions (configured,
//! redirect-following, or direct), deferring unresolved child instructions as
//! node residue, and resolving that residue just in time once the owning
//! component has loaded.

use crate::component::ComponentDefinition;
use crate::context::RouteContext;
use crate::error::{RouterError, RouterResult};
use crate::expression::{Expression, RouteExpression};
use crate::instruction::{
    NavigationInstruction, Params, ViewportInstruction, ViewportInstructionTree,
};
use crate::options::{NavigationOptions, ResolutionMode, RoutingMode};
use crate::recognizer::{RESIDUE_PARAM, RecognizedRoute};
use crate::route_config::RouteDefinition;
use crate::router::Router;
use crate::transition::Transition;
use crate::viewport::ViewportRequest;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, trace};

// =============================================================================
// RouteNode
// =============================================================================

pub(crate) struct RouteNodeInit {
    pub path: String,
    pub final_path: String,
    pub context: Arc<RouteContext>,
    pub instruction: Option<ViewportInstruction>,
    pub original_instruction: Option<ViewportInstruction>,
    pub params: Params,
    pub query_params: Params,
    pub fragment: Option<String>,
    pub data: serde_json::Map<String, serde_json::Value>,
    pub viewport: Option<String>,
    pub title: Option<String>,
    pub component: Option<Arc<ComponentDefinition>>,
    pub append: bool,
    pub residue: Vec<ViewportInstruction>,
}

struct NodeState {
    version: u64,
    path: String,
    final_path: String,
    context: Arc<RouteContext>,
    instruction: Option<ViewportInstruction>,
    original_instruction: Option<ViewportInstruction>,
    params: Params,
    query_params: Params,
    fragment: Option<String>,
    data: serde_json::Map<String, serde_json::Value>,
    viewport: Option<String>,
    title: Option<String>,
    component: Option<Arc<ComponentDefinition>>,
    append: bool,
    children: Vec<RouteNode>,
    residue: Vec<ViewportInstruction>,
}

/// One resolved position in the route tree.
///
/// Nodes are shared handles: clones address the same node. Nodes are mutated
/// in place for same-scope updates and rebuilt when resolution drills into a
/// different scope. A node with no children and no residue is fully resolved.
#[derive(Clone)]
pub struct RouteNode {
    state: Arc<Mutex<NodeState>>,
}

/// Weak handle to a node; contexts hold these so a context and the node
/// currently bound to it do not keep each other alive.
#[derive(Clone)]
pub(crate) struct RouteNodeWeak(std::sync::Weak<Mutex<NodeState>>);

impl RouteNodeWeak {
    pub(crate) fn upgrade(&self) -> Option<RouteNode> {
        self.0.upgrade().map(|state| RouteNode { state })
    }
}

impl RouteNode {
    pub(crate) fn downgrade(&self) -> RouteNodeWeak {
        RouteNodeWeak(Arc::downgrade(&self.state))
    }

    pub(crate) fn create(init: RouteNodeInit) -> RouteNode {
        let node = RouteNode {
            state: Arc::new(Mutex::new(NodeState {
                version: 1,
                path: init.path,
                final_path: init.final_path,
                context: init.context,
                instruction: init.instruction,
                original_instruction: init.original_instruction,
                params: init.params,
                query_params: init.query_params,
                fragment: init.fragment,
                data: init.data,
                viewport: init.viewport,
                title: init.title,
                component: init.component,
                append: init.append,
                children: Vec::new(),
                residue: init.residue,
            })),
        };
        node.context().set_node(&node);
        node
    }

    /// Identity comparison between node handles.
    pub fn ptr_eq(&self, other: &RouteNode) -> bool {
        Arc::ptr_eq(&self.state, &other.state)
    }

    /// The matched path pattern.
    pub fn path(&self) -> String {
        self.state.lock().path.clone()
    }

    /// The concrete matched path, post-redirect.
    pub fn final_path(&self) -> String {
        self.state.lock().final_path.clone()
    }

    /// The routing scope owning this node.
    pub fn context(&self) -> Arc<RouteContext> {
        Arc::clone(&self.state.lock().context)
    }

    /// Merged parameters (ancestor params layered under this node's own).
    pub fn params(&self) -> Params {
        self.state.lock().params.clone()
    }

    /// Query parameters of the producing navigation.
    pub fn query_params(&self) -> Params {
        self.state.lock().query_params.clone()
    }

    /// Fragment of the producing navigation.
    pub fn fragment(&self) -> Option<String> {
        self.state.lock().fragment.clone()
    }

    /// Route data.
    pub fn data(&self) -> serde_json::Map<String, serde_json::Value> {
        self.state.lock().data.clone()
    }

    /// The viewport this node is hosted in (`None` for the root).
    pub fn viewport_name(&self) -> Option<String> {
        self.state.lock().viewport.clone()
    }

    /// Title fragment contributed by this node.
    pub fn title(&self) -> Option<String> {
        self.state.lock().title.clone()
    }

    /// The routed component definition (`None` for the root).
    pub fn component(&self) -> Option<Arc<ComponentDefinition>> {
        self.state.lock().component.clone()
    }

    /// Whether this node was appended rather than replacing.
    pub fn append(&self) -> bool {
        self.state.lock().append
    }

    /// The instruction this node was created from.
    pub fn instruction(&self) -> Option<ViewportInstruction> {
        self.state.lock().instruction.clone()
    }

    /// The instruction as originally requested, pre-redirect.
    pub fn original_instruction(&self) -> Option<ViewportInstruction> {
        self.state.lock().original_instruction.clone()
    }

    /// Snapshot of the child nodes.
    pub fn children(&self) -> Vec<RouteNode> {
        self.state.lock().children.clone()
    }

    /// Unresolved child instructions awaiting just-in-time processing.
    pub fn residue(&self) -> Vec<ViewportInstruction> {
        self.state.lock().residue.clone()
    }

    /// Clone version; increments when a tree is cloned for a transition.
    pub fn version(&self) -> u64 {
        self.state.lock().version
    }

    pub(crate) fn take_residue(&self) -> Vec<ViewportInstruction> {
        std::mem::take(&mut self.state.lock().residue)
    }

    pub(crate) fn set_query_params(&self, query_params: Params) {
        self.state.lock().query_params = query_params;
    }

    pub(crate) fn set_fragment(&self, fragment: Option<String>) {
        self.state.lock().fragment = fragment;
    }

    pub(crate) fn append_child(&self, child: RouteNode) {
        self.state.lock().children.push(child);
    }

    /// Remove all children, recursively cancelling any viewport work they had
    /// scheduled for the in-flight transition.
    pub(crate) fn clear_children(&self) {
        let children: Vec<RouteNode> = std::mem::take(&mut self.state.lock().children);
        for child in children {
            child.clear_children();
            if let Some(vpa) = child.context().vpa() {
                vpa.cancel_update();
            }
        }
    }

    fn clone_subtree(&self) -> RouteNode {
        let (init, children, version) = {
            let state = self.state.lock();
            (
                RouteNodeInit {
                    path: state.path.clone(),
                    final_path: state.final_path.clone(),
                    context: Arc::clone(&state.context),
                    instruction: state.instruction.clone(),
                    original_instruction: state.original_instruction.clone(),
                    params: state.params.clone(),
                    query_params: state.query_params.clone(),
                    fragment: state.fragment.clone(),
                    data: state.data.clone(),
                    viewport: state.viewport.clone(),
                    title: state.title.clone(),
                    component: state.component.clone(),
                    append: state.append,
                    residue: state.residue.clone(),
                },
                state.children.clone(),
                state.version,
            )
        };
        // `create` rebinds context.node to the clone.
        let clone = RouteNode::create(init);
        {
            let mut state = clone.state.lock();
            state.version = version + 1;
        }
        for child in children {
            clone.append_child(child.clone_subtree());
        }
        clone
    }

    /// Whether this node satisfies the given instruction (used by
    /// `is_active`): component matches, requested params are a subset, the
    /// requested viewport (if any) matches, and every requested child is
    /// satisfied by some child node.
    pub(crate) fn satisfies(&self, vi: &ViewportInstruction) -> bool {
        let name_matches = match vi.component.component_name() {
            Some(requested) => {
                let state = self.state.lock();
                state
                    .component
                    .as_ref()
                    .is_some_and(|c| c.name == requested)
                    || state.path == requested
                    || state.final_path == requested
            }
            None => false,
        };
        name_matches
            && self.params().contains_all(&vi.params)
            && vi
                .viewport
                .as_ref()
                .is_none_or(|vp| self.viewport_name().as_ref() == Some(vp))
            && vi
                .children
                .iter()
                .all(|child_vi| self.children().iter().any(|child| child.satisfies(child_vi)))
    }

    /// Rebuild the instruction this node resolves to, preferring the concrete
    /// final path (which embeds parameter values) over the component name.
    pub(crate) fn to_final_instruction(&self) -> ViewportInstruction {
        let state = self.state.lock();
        let mut vi = if state.final_path.is_empty() {
            let name = state
                .component
                .as_ref()
                .map(|c| c.name.clone())
                .unwrap_or_default();
            ViewportInstruction::for_component(name).with_params(state.params.clone())
        } else {
            ViewportInstruction::for_component(state.final_path.clone())
        };
        vi.viewport = state.viewport.clone();
        vi.append = state.append;
        let children: Vec<RouteNode> = state.children.clone();
        drop(state);
        vi.children = children.iter().map(|c| c.to_final_instruction()).collect();
        vi
    }
}

impl fmt::Debug for RouteNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        write!(
            f,
            "RouteNode(path: '{}', viewport: {:?}, children: {})",
            state.path,
            state.viewport,
            state.children.len()
        )
    }
}

// =============================================================================
// RouteTree
// =============================================================================

struct TreeState {
    root: RouteNode,
    options: NavigationOptions,
    query_params: Params,
    fragment: Option<String>,
}

/// The resolved navigation state: a root node plus the options, query params
/// and fragment that produced it. Shared handle; deep-cloned per transition.
#[derive(Clone)]
pub struct RouteTree {
    state: Arc<Mutex<TreeState>>,
}

impl RouteTree {
    pub(crate) fn new(root_ctx: Arc<RouteContext>, options: NavigationOptions) -> RouteTree {
        let component = root_ctx.definition().component.clone();
        let root = RouteNode::create(RouteNodeInit {
            path: String::new(),
            final_path: String::new(),
            context: root_ctx,
            instruction: None,
            original_instruction: None,
            params: Params::new(),
            query_params: Params::new(),
            fragment: None,
            data: serde_json::Map::new(),
            viewport: None,
            title: None,
            component,
            append: false,
            residue: Vec::new(),
        });
        RouteTree {
            state: Arc::new(Mutex::new(TreeState {
                root,
                options,
                query_params: Params::new(),
                fragment: None,
            })),
        }
    }

    /// The root node. Its `viewport` is `None` and its context is the root
    /// scope.
    pub fn root(&self) -> RouteNode {
        self.state.lock().root.clone()
    }

    /// The options of the navigation that produced this tree.
    pub fn options(&self) -> NavigationOptions {
        self.state.lock().options.clone()
    }

    /// Query params of the producing navigation.
    pub fn query_params(&self) -> Params {
        self.state.lock().query_params.clone()
    }

    /// Fragment of the producing navigation.
    pub fn fragment(&self) -> Option<String> {
        self.state.lock().fragment.clone()
    }

    pub(crate) fn set_request_parts(
        &self,
        options: NavigationOptions,
        query_params: Params,
        fragment: Option<String>,
    ) {
        let mut state = self.state.lock();
        state.options = options;
        state.query_params = query_params;
        state.fragment = fragment;
    }

    /// Deep-clone the tree for a transition. Node versions increment and each
    /// context's node back-reference is rebound to its clone.
    pub fn deep_clone(&self) -> RouteTree {
        let state = self.state.lock();
        let root = state.root.clone_subtree();
        RouteTree {
            state: Arc::new(Mutex::new(TreeState {
                root,
                options: state.options.clone(),
                query_params: state.query_params.clone(),
                fragment: state.fragment.clone(),
            })),
        }
    }

    /// Whether every instruction of the request is satisfied by this tree.
    pub fn contains(&self, tree: &ViewportInstructionTree) -> bool {
        let start = match (&tree.options.context, tree.is_absolute) {
            (Some(ctx), false) => match ctx.node() {
                Some(node) => node.children(),
                None => return false,
            },
            _ => self.root().children(),
        };
        tree.children
            .iter()
            .all(|vi| start.iter().any(|node| node.satisfies(vi)))
    }

    /// Rebuild the final instruction tree from the resolved nodes.
    pub fn finalize_instructions(&self) -> ViewportInstructionTree {
        let state = self.state.lock();
        let children: Vec<ViewportInstruction> = state
            .root
            .children()
            .iter()
            .map(|node| node.to_final_instruction())
            .collect();
        ViewportInstructionTree {
            options: state.options.clone(),
            is_absolute: true,
            children,
            query_params: state.query_params.clone(),
            fragment: state.fragment.clone(),
        }
    }

    /// Compose the document title: deepest active nodes first, joined by the
    /// configured separator.
    pub fn build_title(&self, separator: &str) -> String {
        fn collect(node: &RouteNode, out: &mut Vec<String>) {
            for child in node.children() {
                collect(&child, out);
            }
            if let Some(title) = node.title() {
                out.push(title);
            }
        }
        let mut parts = Vec::new();
        collect(&self.root(), &mut parts);
        parts.join(separator)
    }
}

impl fmt::Debug for RouteTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RouteTree(root: {:?})", self.root())
    }
}

// =============================================================================
// Ordering of sibling viewports
// =============================================================================

/// Merge previous and next sibling nodes into the order in which their
/// viewport agents are driven through the transition.
///
/// For each `prev` item, every `next` item up to and including the one sharing
/// its viewport agent is spliced in before it; leftover `next` items are
/// appended at the end. This preserves relative order while interleaving
/// newly appearing viewports, and it is a correctness-sensitive ordering:
/// hook invocation order across siblings is part of the observable contract.
pub(crate) fn merge_distinct(prev: &[RouteNode], next: &[RouteNode]) -> Vec<RouteNode> {
    let mut next: Vec<RouteNode> = next.to_vec();
    let mut merged: Vec<RouteNode> = Vec::with_capacity(prev.len() + next.len());

    for p in prev {
        let p_vpa = p.context().vpa();
        let already_merged = merged.iter().any(|m| {
            match (m.context().vpa(), &p_vpa) {
                (Some(a), Some(b)) => Arc::ptr_eq(&a, b),
                _ => false,
            }
        });
        if already_merged {
            continue;
        }
        let index = next.iter().position(|n| match (n.context().vpa(), &p_vpa) {
            (Some(a), Some(b)) => Arc::ptr_eq(&a, b),
            _ => false,
        });
        match index {
            Some(i) => merged.extend(next.drain(0..=i)),
            None => merged.push(p.clone()),
        }
    }
    merged.extend(next);
    merged
}

// =============================================================================
// Tree construction
// =============================================================================

/// Build/refresh the transition's route tree so it reflects the requested
/// instructions down to (and including) the target scope, leaving deeper
/// levels in each leaf's residue.
pub(crate) fn update_route_tree(
    router: Arc<Router>,
    tr: Arc<Transition>,
) -> BoxFuture<'static, RouterResult<()>> {
    Box::pin(async move {
        let tree = tr
            .route_tree()
            .ok_or_else(|| RouterError::internal("transition has no route tree"))?;
        let vit = tr.instructions.clone();
        let target_ctx = if vit.is_absolute {
            router.root_context()?
        } else {
            match &tr.options.context {
                Some(ctx) => Arc::clone(ctx),
                None => router.root_context()?,
            }
        };
        debug!(
            transition = tr.id,
            target = %target_ctx.friendly_path(),
            instructions = %vit.to_url(),
            "updating route tree"
        );
        tree.set_request_parts(
            tr.options.clone(),
            vit.query_params.clone(),
            vit.fragment.clone(),
        );
        update_node(router, tr, target_ctx, tree.root()).await
    })
}

fn update_node(
    router: Arc<Router>,
    tr: Arc<Transition>,
    target_ctx: Arc<RouteContext>,
    node: RouteNode,
) -> BoxFuture<'static, RouterResult<()>> {
    Box::pin(async move {
        let vit = &tr.instructions;
        node.set_query_params(vit.query_params.clone());
        node.set_fragment(vit.fragment.clone());

        if Arc::ptr_eq(&node.context(), &target_ctx) {
            trace!(node = ?node, "reached target scope, rebuilding children");
            node.clear_children();
            for vi in vit.children.clone() {
                let append = tr.options.append || vi.append;
                create_and_append_nodes(router.clone(), tr.clone(), node.clone(), vi, append)
                    .await?;
            }
            append_default_nodes(router, tr, node).await?;
            return Ok(());
        }

        for child in node.children() {
            update_node(router.clone(), tr.clone(), Arc::clone(&target_ctx), child).await?;
        }
        Ok(())
    })
}

/// Create nodes for one instruction and append them under `node`, dispatching
/// on how the component was specified.
pub(crate) fn create_and_append_nodes(
    router: Arc<Router>,
    tr: Arc<Transition>,
    node: RouteNode,
    vi: ViewportInstruction,
    append: bool,
) -> BoxFuture<'static, RouterResult<()>> {
    Box::pin(async move {
        match &vi.component {
            NavigationInstruction::Path(value) => match value.as_str() {
                ".." => {
                    // Retarget to the parent scope's node.
                    node.clear_children();
                    let target = node
                        .context()
                        .parent()
                        .and_then(|parent| parent.node())
                        .unwrap_or_else(|| node.clone());
                    for child in vi.children.clone() {
                        let child_append = child.append;
                        create_and_append_nodes(
                            router.clone(),
                            tr.clone(),
                            target.clone(),
                            child,
                            child_append,
                        )
                        .await?;
                    }
                    Ok(())
                }
                "." => {
                    for child in vi.children.clone() {
                        let child_append = child.append;
                        create_and_append_nodes(
                            router.clone(),
                            tr.clone(),
                            node.clone(),
                            child,
                            child_append,
                        )
                        .await?;
                    }
                    Ok(())
                }
                _ => {
                    if let Some(child) =
                        create_node(router.clone(), tr.clone(), node.clone(), vi).await?
                    {
                        append_node(router, tr, node, child, append).await?;
                    }
                    Ok(())
                }
            },
            NavigationInstruction::Instruction(inner) => {
                let inner = (**inner).clone();
                create_and_append_nodes(router, tr, node, inner, append).await
            }
            NavigationInstruction::Definition(definition) => {
                let child = create_direct_node(
                    router.clone(),
                    tr.clone(),
                    node.clone(),
                    vi.clone(),
                    Arc::clone(definition),
                    append,
                )
                .await?;
                append_node(router, tr, node, child, append).await
            }
            NavigationInstruction::Lazy(loader) => {
                let definition = loader.load().await.map_err(|err| {
                    RouterError::component_load_failure(format!(
                        "Lazy component failed to load: {err}"
                    ))
                })?;
                let child = create_direct_node(
                    router.clone(),
                    tr.clone(),
                    node.clone(),
                    vi.clone(),
                    definition,
                    append,
                )
                .await?;
                append_node(router, tr, node, child, append).await
            }
            NavigationInstruction::Instance(instance) => {
                let child = create_direct_node(
                    router.clone(),
                    tr.clone(),
                    node.clone(),
                    vi.clone(),
                    Arc::clone(&instance.definition),
                    append,
                )
                .await?;
                append_node(router, tr, node, child, append).await
            }
        }
    })
}

/// Create a node for a string-specified component: collapse single-child
/// chains into a multi-segment path, recognize it, and fall back per the
/// routing mode when recognition fails.
fn create_node(
    router: Arc<Router>,
    tr: Arc<Transition>,
    node: RouteNode,
    vi: ViewportInstruction,
) -> BoxFuture<'static, RouterResult<Option<RouteNode>>> {
    Box::pin(async move {
        let ctx = node.context();
        let head_name = match vi.component.component_name() {
            Some(name) => name.to_string(),
            None => return Err(RouterError::internal("string instruction without a name")),
        };

        // Collapse single-child string chains so one route pattern can match
        // a multi-segment path (e.g. `a/b/c`).
        let mut path = head_name.clone();
        let mut tail = vi.clone();
        loop {
            if tail.children.len() != 1 {
                break;
            }
            let only = tail.children[0].clone();
            match only.component.component_name() {
                Some(segment) if matches!(only.component, NavigationInstruction::Path(_)) => {
                    path = format!("{path}/{segment}");
                    tail = only;
                }
                _ => break,
            }
        }

        if let Some(recognized) = ctx.recognize(&path) {
            let child = create_configured_node(
                router,
                tr,
                node,
                vi.clone(),
                recognized,
                vi.clone(),
                tail.children.clone(),
            )
            .await?;
            return Ok(Some(child));
        }

        // Recognition failed: the unconsumed chain stays with the head.
        match tr.options.routing_mode {
            RoutingMode::ConfiguredOnly => {
                if router.registry().contains(&head_name) {
                    Err(
                        RouterError::component_not_configured(&head_name, &ctx.friendly_path())
                            .with_details(serde_json::json!({
                                "registered_patterns": ctx.patterns(),
                            })),
                    )
                } else {
                    Err(RouterError::no_matching_route(&path, &ctx.friendly_path())
                        .with_details(serde_json::json!({
                            "registered_patterns": ctx.patterns(),
                        })))
                }
            }
            RoutingMode::ConfiguredFirst => {
                if let Ok(definition) = router.registry().resolve(&head_name) {
                    let append = vi.append;
                    let child =
                        create_direct_node(router, tr, node, vi, definition, append).await?;
                    return Ok(Some(child));
                }
                let fallback = ctx.fallback_for(vi.viewport.as_deref());
                match fallback {
                    Some(fallback_name) => {
                        debug!(
                            path = %path,
                            fallback = %fallback_name,
                            "using viewport fallback for unrecognized path"
                        );
                        let definition = router.registry().resolve(&fallback_name)?;
                        let mut fallback_vi = vi.clone();
                        fallback_vi.children.clear();
                        let append = vi.append;
                        let child =
                            create_direct_node(router, tr, node, fallback_vi, definition, append)
                                .await?;
                        Ok(Some(child))
                    }
                    None => Err(RouterError::no_matching_route(&path, &ctx.friendly_path())
                        .with_details(serde_json::json!({
                            "registered_patterns": ctx.patterns(),
                        }))),
                }
            }
        }
    })
}

/// Create a node from a recognized configured route, resolving redirect
/// chains first.
#[allow(clippy::too_many_arguments)]
fn create_configured_node(
    router: Arc<Router>,
    tr: Arc<Transition>,
    node: RouteNode,
    vi: ViewportInstruction,
    recognized: RecognizedRoute<Arc<RouteDefinition>>,
    original_vi: ViewportInstruction,
    tail_children: Vec<ViewportInstruction>,
) -> BoxFuture<'static, RouterResult<RouteNode>> {
    Box::pin(async move {
        let definition = Arc::clone(&recognized.handler);

        if let Some(redirect_to) = &definition.redirect_to {
            let ctx = node.context();
            let new_path =
                rewrite_redirect_path(&recognized.pattern, redirect_to, &recognized.params)?;
            debug!(
                from = %recognized.pattern,
                to = %new_path,
                "following route redirect"
            );
            let new_recognized = ctx.recognize(&new_path).ok_or_else(|| {
                RouterError::no_matching_route(&new_path, &ctx.friendly_path()).with_details(
                    serde_json::json!({
                        "redirect_from": recognized.pattern,
                    }),
                )
            })?;
            // A redirect may itself point at another redirect-bearing route.
            return create_configured_node(
                router,
                tr,
                node,
                vi,
                new_recognized,
                original_vi,
                tail_children,
            )
            .await;
        }

        let component = definition.component.clone().ok_or_else(|| {
            RouterError::internal("non-redirect route definition without a component")
        })?;
        let viewport_name = vi
            .viewport
            .clone()
            .unwrap_or_else(|| definition.viewport.clone());
        let ctx = node.context();
        let request = ViewportRequest {
            viewport_name: viewport_name.clone(),
            component_name: component.name.clone(),
            resolution: tr.options.resolution_mode,
            append: vi.append,
        };
        let vpa = ctx.resolve_viewport_agent(&request)?;
        let child_ctx = router
            .get_route_context(&vpa, &component, &definition, Some(Arc::clone(&ctx)))
            .await?;
        child_ctx.set_vpa(&vpa);

        let mut residue: Vec<ViewportInstruction> = Vec::new();
        if let Some(rest) = &recognized.residue {
            trace!(residue = %rest, "deferring unconsumed path segments");
            residue.push(ViewportInstruction::for_component(rest.clone()));
        }
        residue.extend(tail_children);

        let params = node
            .params()
            .merged_with(&vi.params)
            .merged_with(&recognized.params);
        // The residue registration suffix is matching machinery, not part of
        // the route's own path.
        let matched_pattern = recognized
            .pattern
            .trim_end_matches(&format!("/*{RESIDUE_PARAM}"))
            .trim_end_matches(&format!("*{RESIDUE_PARAM}"))
            .to_string();
        let final_path = substitute_params(&matched_pattern, &recognized.params);

        Ok(RouteNode::create(RouteNodeInit {
            path: matched_pattern,
            final_path,
            context: child_ctx,
            instruction: Some(vi),
            original_instruction: Some(original_vi),
            params,
            query_params: tr.instructions.query_params.clone(),
            fragment: tr.instructions.fragment.clone(),
            data: definition.data.clone(),
            viewport: Some(viewport_name),
            title: definition.title.clone(),
            component: Some(component),
            append: false,
            residue,
        }))
    })
}

/// Create a node for a directly-specified component (definition, lazy module,
/// instance, or convention-based string), bypassing the recognizer. The
/// instruction's children become residue, resolved against the new scope
/// later.
fn create_direct_node(
    router: Arc<Router>,
    tr: Arc<Transition>,
    node: RouteNode,
    vi: ViewportInstruction,
    component: Arc<ComponentDefinition>,
    append: bool,
) -> BoxFuture<'static, RouterResult<RouteNode>> {
    Box::pin(async move {
        let definition = component.route_definition();
        let viewport_name = vi
            .viewport
            .clone()
            .unwrap_or_else(|| definition.viewport.clone());
        let ctx = node.context();
        let request = ViewportRequest {
            viewport_name: viewport_name.clone(),
            component_name: component.name.clone(),
            resolution: tr.options.resolution_mode,
            append,
        };
        let vpa = ctx.resolve_viewport_agent(&request)?;
        let child_ctx = router
            .get_route_context(&vpa, &component, &definition, Some(Arc::clone(&ctx)))
            .await?;
        child_ctx.set_vpa(&vpa);

        let params = node.params().merged_with(&vi.params);
        trace!(component = %component.name, viewport = %viewport_name, "created direct node");

        Ok(RouteNode::create(RouteNodeInit {
            path: component.name.clone(),
            final_path: component.name.clone(),
            context: child_ctx,
            instruction: Some(vi.clone()),
            original_instruction: Some(vi.clone()),
            params,
            query_params: tr.instructions.query_params.clone(),
            fragment: tr.instructions.fragment.clone(),
            data: definition.data.clone(),
            viewport: Some(viewport_name),
            title: definition.title.clone(),
            component: Some(component),
            append,
            residue: vi.children,
        }))
    })
}

/// Attach a created node and schedule its viewport. With static resolution
/// the node's residue is resolved eagerly, all at once.
fn append_node(
    router: Arc<Router>,
    tr: Arc<Transition>,
    node: RouteNode,
    child: RouteNode,
    _append: bool,
) -> BoxFuture<'static, RouterResult<()>> {
    Box::pin(async move {
        node.append_child(child.clone());
        let vpa = child
            .context()
            .vpa()
            .ok_or_else(|| RouterError::internal("appended node has no viewport agent"))?;
        vpa.schedule_update(&tr, child.clone())?;
        if tr.options.resolution_mode == ResolutionMode::Static {
            process_residue(router, tr, child).await?;
        }
        Ok(())
    })
}

/// Resolve a node's deferred residue plus any default components of still
/// unclaimed viewports in its scope. Invoked after the owning component has
/// loaded (dynamic resolution) or eagerly at append time (static resolution).
pub(crate) fn process_residue(
    router: Arc<Router>,
    tr: Arc<Transition>,
    node: RouteNode,
) -> BoxFuture<'static, RouterResult<()>> {
    Box::pin(async move {
        let residue = node.take_residue();
        if !residue.is_empty() {
            trace!(node = ?node, count = residue.len(), "processing residue");
        }
        for vi in residue {
            let append = node.append() || vi.append;
            create_and_append_nodes(router.clone(), tr.clone(), node.clone(), vi, append).await?;
        }
        append_default_nodes(router, tr, node).await
    })
}

/// Resolve residue and report which children appeared, for dynamic child
/// activation.
pub(crate) fn get_dynamic_children(
    router: Arc<Router>,
    tr: Arc<Transition>,
    node: RouteNode,
) -> BoxFuture<'static, RouterResult<Vec<RouteNode>>> {
    Box::pin(async move {
        let before = node.children();
        process_residue(router, tr, node.clone()).await?;
        let after = node.children();
        Ok(after
            .into_iter()
            .filter(|candidate| !before.iter().any(|existing| existing.ptr_eq(candidate)))
            .collect())
    })
}

/// Instantiate default components for viewports that are still unclaimed
/// after the requested instructions were distributed. A viewport without an
/// explicit default falls back to the scope's empty route, when one exists.
fn append_default_nodes(
    router: Arc<Router>,
    tr: Arc<Transition>,
    node: RouteNode,
) -> BoxFuture<'static, RouterResult<()>> {
    Box::pin(async move {
        let ctx = node.context();
        let agents = ctx.available_viewport_agents();
        for vpa in agents {
            let viewport = vpa.viewport();
            let default_component = match viewport.default_component.clone() {
                Some(component) => component,
                None => {
                    if ctx.recognize("").is_none() {
                        continue;
                    }
                    String::new()
                }
            };
            trace!(
                viewport = %viewport.name,
                component = %default_component,
                "instantiating default component for unclaimed viewport"
            );
            let vi = ViewportInstruction::for_component(default_component)
                .with_viewport(viewport.name.clone());
            let append = node.append();
            create_and_append_nodes(router.clone(), tr.clone(), node.clone(), vi, append).await?;
        }
        Ok(())
    })
}

// =============================================================================
// Redirect path rewriting
// =============================================================================

/// Rewrite a matched path according to a redirect target by walking both
/// expression chains segment-by-segment and substituting dynamic parameter
/// values from the recognized params.
///
/// Both sides must be simple segment-or-scoped-segment chains; composite or
/// grouped expressions in a redirect pair are a configuration error.
fn rewrite_redirect_path(
    original_pattern: &str,
    redirect_to: &str,
    params: &Params,
) -> RouterResult<String> {
    // Validating the original side keeps malformed configs from matching
    // silently, even though substitution only reads the redirect side.
    chain_segment_names(original_pattern)?;
    let redirect_segments = chain_segment_names(redirect_to)?;

    let mut out: Vec<String> = Vec::with_capacity(redirect_segments.len());
    for segment in redirect_segments {
        if let Some(param_name) = segment.strip_prefix(':') {
            let value = params.get(param_name).ok_or_else(|| {
                RouterError::invalid_redirect_config(format!(
                    "Redirect '{redirect_to}' references parameter ':{param_name}' which the matched route '{original_pattern}' did not capture"
                ))
            })?;
            out.push(value.to_string());
        } else {
            out.push(segment);
        }
    }
    Ok(out.join("/"))
}

fn chain_segment_names(path: &str) -> RouterResult<Vec<String>> {
    let expression = RouteExpression::parse(path)?;
    let mut segments = Vec::new();
    let mut cursor = expression.root;
    while let Some(expr) = cursor {
        match expr {
            Expression::Segment(segment) => {
                segments.push(segment.component.name);
                cursor = None;
            }
            Expression::Scoped(scoped) => {
                match *scoped.left {
                    Expression::Segment(segment) => segments.push(segment.component.name),
                    _ => {
                        return Err(RouterError::invalid_redirect_config(format!(
                            "Redirect paths must be simple segment chains; '{path}' is not"
                        )));
                    }
                }
                cursor = Some(*scoped.right);
            }
            Expression::Composite(_) | Expression::Group(_) => {
                return Err(RouterError::invalid_redirect_config(format!(
                    "Redirect paths must be simple segment chains; '{path}' is not"
                )));
            }
        }
    }
    Ok(segments)
}

fn substitute_params(pattern: &str, params: &Params) -> String {
    pattern
        .split('/')
        .map(|segment| {
            if let Some(name) = segment.strip_prefix(':') {
                params.get(name).unwrap_or(segment).to_string()
            } else if let Some(name) = segment.strip_prefix('*') {
                params.get(name).unwrap_or_default().to_string()
            } else {
                segment.to_string()
            }
        })
        .collect::<Vec<_>>()
        .join("/")
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::{ComponentDefinition, ComponentRegistry, RouteComponent};
    use crate::viewport::Viewport;

    struct PlainComponent;
    impl RouteComponent for PlainComponent {}

    async fn node_in_viewport(name: &str) -> RouteNode {
        let registry = ComponentRegistry::new();
        let definition = ComponentDefinition::simple(name, || Arc::new(PlainComponent));
        let ctx = RouteContext::create(registry, definition.route_definition(), None)
            .await
            .unwrap();
        let vpa = ctx.register_viewport(Viewport::named(name));
        ctx.set_vpa(&vpa);
        RouteNode::create(RouteNodeInit {
            path: name.to_string(),
            final_path: name.to_string(),
            context: ctx,
            instruction: None,
            original_instruction: None,
            params: Params::new(),
            query_params: Params::new(),
            fragment: None,
            data: serde_json::Map::new(),
            viewport: Some(name.to_string()),
            title: None,
            component: Some(definition),
            append: false,
            residue: Vec::new(),
        })
    }

    fn node_sharing_agent(template: &RouteNode) -> RouteNode {
        RouteNode::create(RouteNodeInit {
            path: template.path(),
            final_path: template.final_path(),
            context: template.context(),
            instruction: None,
            original_instruction: None,
            params: Params::new(),
            query_params: Params::new(),
            fragment: None,
            data: serde_json::Map::new(),
            viewport: template.viewport_name(),
            title: None,
            component: template.component(),
            append: false,
            residue: Vec::new(),
        })
    }

    #[tokio::test]
    async fn test_merge_distinct_splices_interleaved_viewports() {
        // prev: [p1, p2]; next: [n3, n1] where n1 shares p1's viewport agent.
        let p1 = node_in_viewport("one").await;
        let p2 = node_in_viewport("two").await;
        let n3 = node_in_viewport("three").await;
        let n1 = node_sharing_agent(&p1);

        let merged = merge_distinct(&[p1.clone(), p2.clone()], &[n3.clone(), n1.clone()]);

        // For p1, all next items up to and including the one sharing its
        // agent come first; p2 has no next counterpart and follows.
        assert_eq!(merged.len(), 3);
        assert!(merged[0].ptr_eq(&n3));
        assert!(merged[1].ptr_eq(&n1));
        assert!(merged[2].ptr_eq(&p2));
    }

    #[tokio::test]
    async fn test_merge_distinct_appends_leftover_next() {
        let p1 = node_in_viewport("alpha").await;
        let n2 = node_in_viewport("beta").await;

        let merged = merge_distinct(&[p1.clone()], &[n2.clone()]);
        assert_eq!(merged.len(), 2);
        assert!(merged[0].ptr_eq(&p1));
        assert!(merged[1].ptr_eq(&n2));
    }

    #[test]
    fn test_rewrite_redirect_substitutes_params() {
        let params = Params::from_pairs([("id", "42")]);
        let rewritten = rewrite_redirect_path("old/:id", "new/:id", &params).unwrap();
        assert_eq!(rewritten, "new/42");
    }

    #[test]
    fn test_rewrite_redirect_literal_segments() {
        let rewritten = rewrite_redirect_path("legacy", "modern/home", &Params::new()).unwrap();
        assert_eq!(rewritten, "modern/home");
    }

    #[test]
    fn test_rewrite_redirect_missing_param_is_config_error() {
        let err = rewrite_redirect_path("old", "new/:id", &Params::new()).unwrap_err();
        assert_eq!(
            err.code,
            crate::error::RouterErrorCode::InvalidRedirectConfig
        );
    }

    #[test]
    fn test_rewrite_redirect_rejects_composite_targets() {
        let err = rewrite_redirect_path("old", "a+b", &Params::new()).unwrap_err();
        assert_eq!(
            err.code,
            crate::error::RouterErrorCode::InvalidRedirectConfig
        );

        let err = rewrite_redirect_path("(a)/b", "c", &Params::new()).unwrap_err();
        assert_eq!(
            err.code,
            crate::error::RouterErrorCode::InvalidRedirectConfig
        );
    }

    #[test]
    fn test_substitute_params_fills_dynamic_segments() {
        let params = Params::from_pairs([("id", "7"), ("tab", "specs")]);
        assert_eq!(
            substitute_params("product/:id/:tab", &params),
            "product/7/specs"
        );
        assert_eq!(substitute_params("plain/path", &params), "plain/path");
    }
}
