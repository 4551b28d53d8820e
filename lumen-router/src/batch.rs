//! Continuation batching for tree-shaped lifecycle work
//!
//! A [`Batch`] runs a chain of callback steps where each step may fan out into
//! dynamically-registered asynchronous work. A step's continuation fires once
//! and only once, after every unit of work registered against it has
//! completed, even when registration happens while sibling work is already
//! running.
//!
//! # Model
//!
//! Every step in the chain carries a counter. [`Batch::push`] increments the
//! counter of the step it is called on and of every step after it;
//! [`Batch::pop`] decrements the same range, and any step whose counter
//! reaches zero fires its callback. A chain is assembled with
//! [`Batch::continue_with`] and kicked off with [`Batch::start`], which
//! performs one push/pop pair from the head: a chain whose steps register no
//! asynchronous work therefore runs to completion synchronously.
//!
//! Callers that perform asynchronous work inside a step must call `push()`
//! before yielding and `pop()` when the work resolves; purely synchronous
//! steps do nothing extra.
//!
//! # Example
//!
//! ```rust,ignore
//! Batch::new(|b| {
//!     for child in children {
//!         child.can_unload(&tr, b);
//!     }
//! })
//! .continue_with(move |_| finalize())
//! .start();
//! ```

use parking_lot::Mutex;
use std::sync::Arc;
use tracing::trace;

type StepCallback = Box<dyn FnOnce(&Batch) + Send>;

struct Step {
    stack: usize,
    cb: Option<StepCallback>,
    done: bool,
}

struct Chain {
    steps: Mutex<Vec<Step>>,
}

/// A handle onto one step of a continuation chain.
///
/// Handles are cheap to clone; all clones address the same underlying chain.
/// The handle passed into a step callback addresses that step, so `push`/`pop`
/// pairs issued from within a step gate that step's own continuation and
/// everything after it.
#[derive(Clone)]
pub struct Batch {
    chain: Arc<Chain>,
    index: usize,
}

impl Batch {
    /// Create a new chain whose head step runs `cb`.
    ///
    /// Nothing runs until [`start`](Self::start) is called.
    pub fn new(cb: impl FnOnce(&Batch) + Send + 'static) -> Batch {
        Batch {
            chain: Arc::new(Chain {
                steps: Mutex::new(vec![Step {
                    stack: 0,
                    cb: Some(Box::new(cb)),
                    done: false,
                }]),
            }),
            index: 0,
        }
    }

    /// Append a step to the end of the chain and return a handle to it.
    ///
    /// The new step inherits the current counter of the previous tail, so work
    /// still pending against earlier steps also gates the new one.
    pub fn continue_with(&self, cb: impl FnOnce(&Batch) + Send + 'static) -> Batch {
        let index = {
            let mut steps = self.chain.steps.lock();
            let inherited = steps.last().map(|s| s.stack).unwrap_or(0);
            steps.push(Step {
                stack: inherited,
                cb: Some(Box::new(cb)),
                done: false,
            });
            steps.len() - 1
        };
        Batch {
            chain: Arc::clone(&self.chain),
            index,
        }
    }

    /// Register one unit of pending work against this step and every step
    /// after it.
    pub fn push(&self) {
        let mut steps = self.chain.steps.lock();
        for step in steps.iter_mut().skip(self.index) {
            step.stack += 1;
        }
    }

    /// Resolve one unit of pending work. Any step whose counter reaches zero
    /// fires its callback immediately, before the walk continues downstream.
    pub fn pop(&self) {
        let mut i = self.index;
        loop {
            let fire = {
                let mut steps = self.chain.steps.lock();
                if i >= steps.len() {
                    break;
                }
                let step = &mut steps[i];
                step.stack = step
                    .stack
                    .checked_sub(1)
                    .expect("batch pop without matching push");
                if step.stack == 0 { step.cb.take() } else { None }
            };
            if let Some(cb) = fire {
                trace!(step = i, "batch step firing");
                let handle = Batch {
                    chain: Arc::clone(&self.chain),
                    index: i,
                };
                cb(&handle);
                self.chain.steps.lock()[i].done = true;
            }
            i += 1;
        }
    }

    /// Kick off the chain with one push/pop pair from the head.
    ///
    /// A chain is single-use: steps fire at most once and a finished chain
    /// stays finished.
    pub fn start(&self) {
        let head = Batch {
            chain: Arc::clone(&self.chain),
            index: 0,
        };
        head.push();
        head.pop();
    }

    /// Whether this step's callback has run.
    pub fn is_done(&self) -> bool {
        self.chain
            .steps
            .lock()
            .get(self.index)
            .map(|s| s.done)
            .unwrap_or(false)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn recorder() -> (Arc<Mutex<Vec<&'static str>>>, impl Fn(&'static str) + Clone) {
        let log: Arc<Mutex<Vec<&'static str>>> = Arc::new(Mutex::new(Vec::new()));
        let log2 = Arc::clone(&log);
        (log, move |entry| log2.lock().push(entry))
    }

    #[test]
    fn test_synchronous_chain_runs_in_order() {
        let (log, record) = recorder();
        let r1 = record.clone();
        let r2 = record.clone();
        let r3 = record;
        Batch::new(move |_| r1("a"))
            .continue_with(move |_| r2("b"))
            .continue_with(move |_| r3("c"))
            .start();
        assert_eq!(*log.lock(), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_pending_work_gates_continuation() {
        let (log, record) = recorder();
        let r1 = record.clone();
        let r2 = record.clone();
        let r3 = record;
        let deferred: Arc<Mutex<Option<Batch>>> = Arc::new(Mutex::new(None));
        let deferred2 = Arc::clone(&deferred);

        let tail = Batch::new(move |b| {
            r1("step");
            b.push();
            *deferred2.lock() = Some(b.clone());
        })
        .continue_with(move |_| r2("after"));
        tail.start();

        // The continuation must not have fired while work is outstanding.
        assert_eq!(*log.lock(), vec!["step"]);
        assert!(!tail.is_done());

        let handle = deferred.lock().take().unwrap();
        r3("resolve");
        handle.pop();
        assert_eq!(*log.lock(), vec!["step", "resolve", "after"]);
        assert!(tail.is_done());
    }

    #[test]
    fn test_fan_out_fires_once_after_all_pops() {
        let fired = Arc::new(AtomicUsize::new(0));
        let fired2 = Arc::clone(&fired);
        let handles: Arc<Mutex<Vec<Batch>>> = Arc::new(Mutex::new(Vec::new()));
        let handles2 = Arc::clone(&handles);

        Batch::new(move |b| {
            for _ in 0..3 {
                b.push();
                handles2.lock().push(b.clone());
            }
        })
        .continue_with(move |_| {
            fired2.fetch_add(1, Ordering::SeqCst);
        })
        .start();

        let taken: Vec<Batch> = handles.lock().drain(..).collect();
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        taken[0].pop();
        taken[1].pop();
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        taken[2].pop();
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_late_registration_still_gates() {
        // A step registered while earlier work is pending must not fire until
        // that work resolves.
        let (log, record) = recorder();
        let r1 = record.clone();
        let r2 = record;
        let pending: Arc<Mutex<Option<Batch>>> = Arc::new(Mutex::new(None));
        let pending2 = Arc::clone(&pending);

        let head = Batch::new(move |b| {
            b.push();
            *pending2.lock() = Some(b.clone());
            r1("head");
        });
        head.start();

        let tail = head.continue_with(move |_| r2("late"));
        assert!(!tail.is_done());

        pending.lock().take().unwrap().pop();
        assert_eq!(*log.lock(), vec!["head", "late"]);
    }

    #[test]
    fn test_nested_chain_within_step() {
        let (log, record) = recorder();
        let r1 = record.clone();
        let r2 = record.clone();
        let r3 = record;
        Batch::new(move |b| {
            b.push();
            let outer = b.clone();
            let r1 = r1.clone();
            Batch::new(move |_| r1("inner"))
                .continue_with(move |_| {
                    r2("inner-done");
                    outer.pop();
                })
                .start();
        })
        .continue_with(move |_| r3("outer-done"))
        .start();
        assert_eq!(*log.lock(), vec!["inner", "inner-done", "outer-done"]);
    }

    #[test]
    #[should_panic(expected = "batch pop without matching push")]
    fn test_unbalanced_pop_is_fatal() {
        let b = Batch::new(|_| {});
        b.start();
        b.pop();
    }
}
