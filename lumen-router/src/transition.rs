//! Transitions
//!
//! A [`Transition`] captures one in-flight (or completed) navigation: the
//! requested instructions, the route trees being moved between, the guard
//! result, and the completion channel the original `load()` caller is
//! awaiting. Exactly one transition is current on the router at a time, with
//! at most one more queued behind it.
//!
//! [`Transition::run`] is the suspension-point bridge: hook futures that
//! complete immediately continue synchronously — a pipeline made entirely of
//! synchronous hooks never yields to the scheduler — while pending futures
//! are spawned and re-join the surrounding [`Batch`](crate::batch::Batch)
//! through the push/pop contract.

use crate::error::{RouterError, RouterResult};
use crate::instruction::{NavigationTrigger, ViewportInstructionTree};
use crate::options::NavigationOptions;
use crate::tree::RouteTree;
use parking_lot::Mutex;
use std::future::Future;
use std::sync::{Arc, Weak};
use std::task::Poll;
use tokio::sync::oneshot;
use tracing::{debug, trace, warn};

// =============================================================================
// Guard result
// =============================================================================

/// Cumulative result of the guard stages of one transition.
#[derive(Debug, Clone)]
pub enum GuardsResult {
    /// All guards so far permitted the navigation.
    Accepted,
    /// A guard denied the navigation.
    Rejected,
    /// A guard requested a redirect; the transition is cancelled and this
    /// tree is enqueued in its place.
    Redirect(ViewportInstructionTree),
}

impl GuardsResult {
    /// Whether the navigation is still permitted.
    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted)
    }
}

// =============================================================================
// Navigation snapshot
// =============================================================================

/// A one-level-deep snapshot of a navigation, published alongside events.
///
/// `prev` never carries its own `prev`, bounding the chain's memory.
#[derive(Debug, Clone)]
pub struct Navigation {
    /// The transition id.
    pub id: u64,
    /// The requested instructions.
    pub instructions: ViewportInstructionTree,
    /// What produced the navigation.
    pub trigger: NavigationTrigger,
    /// The previous navigation, flattened to one level.
    pub prev: Option<Box<Navigation>>,
}

impl Navigation {
    pub(crate) fn new(
        id: u64,
        instructions: ViewportInstructionTree,
        trigger: NavigationTrigger,
        prev: Option<&Navigation>,
    ) -> Self {
        Self {
            id,
            instructions,
            trigger,
            prev: prev.map(|p| {
                Box::new(Navigation {
                    id: p.id,
                    instructions: p.instructions.clone(),
                    trigger: p.trigger,
                    prev: None,
                })
            }),
        }
    }
}

// =============================================================================
// Transition
// =============================================================================

/// One in-flight or completed navigation.
pub struct Transition {
    /// Monotonically increasing transition id.
    pub id: u64,
    /// What produced the navigation.
    pub trigger: NavigationTrigger,
    /// The options the navigation was requested with.
    pub options: NavigationOptions,
    /// Managed history state carried by a traversal-triggered navigation.
    pub managed_state: Option<serde_json::Value>,
    /// The instructions that were current when this transition was enqueued.
    pub prev_instructions: ViewportInstructionTree,
    /// The requested instructions.
    pub instructions: ViewportInstructionTree,
    /// Whether the requested instructions differ from the previous ones.
    pub instructions_changed: bool,
    final_instructions: Mutex<Option<ViewportInstructionTree>>,
    previous_route_tree: Mutex<Option<RouteTree>>,
    route_tree: Mutex<Option<RouteTree>>,
    completion: Mutex<Option<oneshot::Sender<RouterResult<bool>>>>,
    guards_result: Mutex<GuardsResult>,
    error: Mutex<Option<RouterError>>,
    router: Weak<crate::router::Router>,
}

impl Transition {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        id: u64,
        trigger: NavigationTrigger,
        options: NavigationOptions,
        managed_state: Option<serde_json::Value>,
        prev_instructions: ViewportInstructionTree,
        instructions: ViewportInstructionTree,
        completion: oneshot::Sender<RouterResult<bool>>,
        router: Weak<crate::router::Router>,
    ) -> Arc<Self> {
        let instructions_changed = !prev_instructions.equals(&instructions);
        Arc::new(Self {
            id,
            trigger,
            options,
            managed_state,
            prev_instructions,
            instructions,
            instructions_changed,
            final_instructions: Mutex::new(None),
            previous_route_tree: Mutex::new(None),
            route_tree: Mutex::new(None),
            completion: Mutex::new(Some(completion)),
            guards_result: Mutex::new(GuardsResult::Accepted),
            error: Mutex::new(None),
            router,
        })
    }

    // -------------------------------------------------------------------------
    // Guard result
    // -------------------------------------------------------------------------

    /// The current guard result.
    pub fn guards_result(&self) -> GuardsResult {
        self.guards_result.lock().clone()
    }

    /// Whether all guards so far have permitted the navigation.
    pub fn guards_accepted(&self) -> bool {
        self.guards_result.lock().is_accepted()
    }

    /// Record a guard outcome. The first non-accepted result wins; anything
    /// arriving after that is ignored.
    pub(crate) fn set_guards_result(&self, result: GuardsResult) {
        let mut current = self.guards_result.lock();
        if current.is_accepted() && !result.is_accepted() {
            trace!(transition = self.id, result = ?result, "guards result set");
            *current = result;
        }
    }

    // -------------------------------------------------------------------------
    // Route trees
    // -------------------------------------------------------------------------

    pub(crate) fn set_route_trees(&self, previous: RouteTree, next: RouteTree) {
        *self.previous_route_tree.lock() = Some(previous);
        *self.route_tree.lock() = Some(next);
    }

    /// The tree being built by this transition.
    pub fn route_tree(&self) -> Option<RouteTree> {
        self.route_tree.lock().clone()
    }

    /// The tree that was current when this transition started.
    pub fn previous_route_tree(&self) -> Option<RouteTree> {
        self.previous_route_tree.lock().clone()
    }

    // -------------------------------------------------------------------------
    // Final instructions
    // -------------------------------------------------------------------------

    pub(crate) fn set_final_instructions(&self, instructions: ViewportInstructionTree) {
        *self.final_instructions.lock() = Some(instructions);
    }

    /// The instructions as finally resolved, set on completion.
    pub fn final_instructions(&self) -> Option<ViewportInstructionTree> {
        self.final_instructions.lock().clone()
    }

    // -------------------------------------------------------------------------
    // Completion
    // -------------------------------------------------------------------------

    /// Settle the transition's completion channel with a committed/cancelled
    /// outcome. Settling twice is a no-op.
    pub(crate) fn resolve(&self, committed: bool) {
        if let Some(sender) = self.completion.lock().take() {
            debug!(transition = self.id, committed, "transition settled");
            let _ = sender.send(Ok(committed));
        }
    }

    /// Move the completion channel out, so a redirect transition can settle
    /// the original caller.
    pub(crate) fn take_completion(&self) -> Option<oneshot::Sender<RouterResult<bool>>> {
        self.completion.lock().take()
    }

    // -------------------------------------------------------------------------
    // Errors
    // -------------------------------------------------------------------------

    /// The router driving this transition, while it is alive.
    pub(crate) fn router(&self) -> Option<Arc<crate::router::Router>> {
        self.router.upgrade()
    }

    /// Whether a hook error has already rejected this transition.
    pub fn erred(&self) -> bool {
        self.error.lock().is_some()
    }

    /// The error that rejected this transition, if any.
    pub fn error(&self) -> Option<RouterError> {
        self.error.lock().clone()
    }

    /// Reject the transition with a hook or pipeline error.
    ///
    /// The error propagates unwrapped through the caller's promise. Viewport
    /// state is *not* rolled back here: rollback is guaranteed only for guard
    /// rejection and redirects, which run through the cancellation path.
    pub(crate) fn handle_error(self: &Arc<Self>, err: RouterError) {
        {
            let mut slot = self.error.lock();
            if slot.is_some() {
                trace!(transition = self.id, "transition already erred, ignoring");
                return;
            }
            warn!(transition = self.id, error = %err, "transition failed");
            *slot = Some(err.clone());
        }
        if let Some(sender) = self.completion.lock().take() {
            let _ = sender.send(Err(err.clone()));
        }
        if let Some(router) = self.router.upgrade() {
            router.on_transition_error(self, err);
        }
    }

    // -------------------------------------------------------------------------
    // Suspension-point bridge
    // -------------------------------------------------------------------------

    /// Run one unit of hook work and feed its result to `next`.
    ///
    /// `prepare` is only invoked while the transition is still viable (guards
    /// accepted and no error); this is what lets a rejected transition skip
    /// the remaining hooks without unbalancing any batch counters, since the
    /// matching `push` happens inside `prepare`.
    ///
    /// The returned future is polled once inline: an immediately-ready result
    /// continues synchronously; a pending one is spawned and its result (or
    /// error) handled when it resolves.
    pub(crate) fn run<T, F, Fut, N>(self: &Arc<Self>, prepare: F, next: N)
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = RouterResult<T>> + Send + 'static,
        T: Send + 'static,
        N: FnOnce(T) + Send + 'static,
    {
        if self.erred() || !self.guards_accepted() {
            return;
        }
        let mut fut = Box::pin(prepare());
        let waker = futures::task::noop_waker();
        let mut cx = std::task::Context::from_waker(&waker);
        match fut.as_mut().poll(&mut cx) {
            Poll::Ready(Ok(value)) => next(value),
            Poll::Ready(Err(err)) => self.handle_error(err),
            Poll::Pending => {
                let tr = Arc::clone(self);
                tokio::spawn(async move {
                    match fut.await {
                        Ok(value) => next(value),
                        Err(err) => tr.handle_error(err),
                    }
                });
            }
        }
    }
}

impl std::fmt::Debug for Transition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transition")
            .field("id", &self.id)
            .field("trigger", &self.trigger)
            .field("instructions", &self.instructions)
            .field("guards_result", &*self.guards_result.lock())
            .field("erred", &self.erred())
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn test_transition() -> (Arc<Transition>, oneshot::Receiver<RouterResult<bool>>) {
        let (tx, rx) = oneshot::channel();
        let options = NavigationOptions::default();
        let tr = Transition::new(
            1,
            NavigationTrigger::Api,
            options.clone(),
            None,
            ViewportInstructionTree::empty(options.clone()),
            ViewportInstructionTree::empty(options),
            tx,
            Weak::new(),
        );
        (tr, rx)
    }

    #[tokio::test]
    async fn test_synchronous_hook_continues_inline() {
        let (tr, _rx) = test_transition();
        let hits = Arc::new(AtomicUsize::new(0));
        let hits2 = Arc::clone(&hits);
        tr.run(
            || async { Ok(21) },
            move |v| {
                assert_eq!(v, 21);
                hits2.fetch_add(1, Ordering::SeqCst);
            },
        );
        // No await between run() and this assertion: the continuation ran
        // synchronously.
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_pending_hook_is_spawned() {
        let (tr, _rx) = test_transition();
        let (signal_tx, signal_rx) = oneshot::channel::<()>();
        let (done_tx, done_rx) = oneshot::channel::<u32>();
        let done_tx = Mutex::new(Some(done_tx));
        tr.run(
            || async move {
                signal_rx.await.ok();
                Ok(7u32)
            },
            move |v| {
                if let Some(tx) = done_tx.lock().take() {
                    let _ = tx.send(v);
                }
            },
        );
        signal_tx.send(()).ok();
        assert_eq!(done_rx.await.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_hook_error_rejects_completion() {
        let (tr, rx) = test_transition();
        tr.run(
            || async { Err::<(), _>(RouterError::hook_error("boom")) },
            |_| panic!("continuation must not run on error"),
        );
        let err = rx.await.unwrap().unwrap_err();
        assert!(err.message.contains("boom"));
        assert!(tr.erred());
    }

    #[tokio::test]
    async fn test_rejected_guards_skip_further_work() {
        let (tr, _rx) = test_transition();
        tr.set_guards_result(GuardsResult::Rejected);
        let prepared = Arc::new(AtomicUsize::new(0));
        let prepared2 = Arc::clone(&prepared);
        tr.run(
            move || {
                prepared2.fetch_add(1, Ordering::SeqCst);
                async { Ok(()) }
            },
            |_| {},
        );
        assert_eq!(prepared.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_first_non_true_guard_result_wins() {
        let (tr, _rx) = test_transition();
        tr.set_guards_result(GuardsResult::Rejected);
        tr.set_guards_result(GuardsResult::Redirect(ViewportInstructionTree::empty(
            NavigationOptions::default(),
        )));
        assert!(matches!(tr.guards_result(), GuardsResult::Rejected));
    }

    #[test]
    fn test_resolve_settles_once() {
        let (tr, mut rx) = test_transition();
        tr.resolve(true);
        tr.resolve(false);
        assert_eq!(rx.try_recv().unwrap().unwrap(), true);
    }

    #[test]
    fn test_navigation_snapshot_is_one_level_deep() {
        let options = NavigationOptions::default();
        let root = Navigation::new(
            1,
            ViewportInstructionTree::empty(options.clone()),
            NavigationTrigger::Api,
            None,
        );
        let second = Navigation::new(
            2,
            ViewportInstructionTree::empty(options.clone()),
            NavigationTrigger::Api,
            Some(&root),
        );
        let third = Navigation::new(
            3,
            ViewportInstructionTree::empty(options),
            NavigationTrigger::Api,
            Some(&second),
        );
        let prev = third.prev.unwrap();
        assert_eq!(prev.id, 2);
        assert!(prev.prev.is_none());
    }
}
