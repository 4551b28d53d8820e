//! Router event bus
//!
//! Navigation progress is published on a synchronous event bus so that
//! embedding code (menus, progress bars, analytics) can observe transitions
//! without participating in them. Events are dispatched on the publishing
//! thread: a transition composed entirely of synchronous hooks publishes its
//! `navigation-end` without ever yielding to the scheduler.
//!
//! Payload ids increase monotonically per bus, so subscribers can correlate a
//! `navigation-start` with the `navigation-end`/`navigation-cancel`/
//! `navigation-error` that settles it.

use crate::error::RouterError;
use crate::instruction::{NavigationTrigger, ViewportInstructionTree};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::trace;

// =============================================================================
// Event Types
// =============================================================================

/// A navigation lifecycle event.
#[derive(Debug, Clone)]
pub enum RouterEvent {
    /// The location collaborator reported a URL change (popstate/hashchange).
    LocationChange {
        /// Monotonically increasing event id
        id: u64,
        /// The new URL
        url: String,
        /// What produced the change
        trigger: NavigationTrigger,
    },
    /// A transition started processing.
    NavigationStart {
        /// Monotonically increasing event id
        id: u64,
        /// The requested instructions
        instructions: ViewportInstructionTree,
        /// What produced the navigation
        trigger: NavigationTrigger,
    },
    /// A transition committed.
    NavigationEnd {
        /// Monotonically increasing event id
        id: u64,
        /// The requested instructions
        instructions: ViewportInstructionTree,
        /// The instructions as finally resolved (post-redirect)
        final_instructions: ViewportInstructionTree,
    },
    /// A transition was cancelled by a guard or superseded.
    NavigationCancel {
        /// Monotonically increasing event id
        id: u64,
        /// The requested instructions
        instructions: ViewportInstructionTree,
        /// Why the navigation did not commit
        reason: String,
    },
    /// A transition failed with an error.
    NavigationError {
        /// Monotonically increasing event id
        id: u64,
        /// The requested instructions
        instructions: ViewportInstructionTree,
        /// The error that rejected the transition
        error: RouterError,
    },
}

impl RouterEvent {
    /// The stable event name, usable as a subscription filter key.
    pub fn name(&self) -> &'static str {
        match self {
            Self::LocationChange { .. } => "lumen:router:location-change",
            Self::NavigationStart { .. } => "lumen:router:navigation-start",
            Self::NavigationEnd { .. } => "lumen:router:navigation-end",
            Self::NavigationCancel { .. } => "lumen:router:navigation-cancel",
            Self::NavigationError { .. } => "lumen:router:navigation-error",
        }
    }

    /// The event id carried by the payload.
    pub fn id(&self) -> u64 {
        match self {
            Self::LocationChange { id, .. }
            | Self::NavigationStart { id, .. }
            | Self::NavigationEnd { id, .. }
            | Self::NavigationCancel { id, .. }
            | Self::NavigationError { id, .. } => *id,
        }
    }
}

// =============================================================================
// Event Bus
// =============================================================================

type EventListener = Arc<dyn Fn(&RouterEvent) + Send + Sync>;

/// Synchronous publish/subscribe bus for [`RouterEvent`]s.
pub struct RouterEventBus {
    listeners: Mutex<Vec<(u64, EventListener)>>,
    next_key: AtomicU64,
    next_event_id: AtomicU64,
}

impl RouterEventBus {
    /// Create a new, empty bus.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            listeners: Mutex::new(Vec::new()),
            next_key: AtomicU64::new(1),
            next_event_id: AtomicU64::new(1),
        })
    }

    /// Reserve the next monotonically increasing event id.
    pub(crate) fn next_id(&self) -> u64 {
        self.next_event_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Subscribe to all events. Returns a handle that removes the listener
    /// when [`EventSubscription::unsubscribe`] is called.
    pub fn subscribe(
        self: &Arc<Self>,
        listener: impl Fn(&RouterEvent) + Send + Sync + 'static,
    ) -> EventSubscription {
        let key = self.next_key.fetch_add(1, Ordering::Relaxed);
        self.listeners.lock().push((key, Arc::new(listener)));
        EventSubscription {
            key,
            bus: Arc::downgrade(self),
        }
    }

    /// Publish an event to every subscriber, synchronously and in
    /// subscription order.
    pub fn publish(&self, event: &RouterEvent) {
        trace!(event = event.name(), id = event.id(), "publishing router event");
        let listeners: Vec<EventListener> = self
            .listeners
            .lock()
            .iter()
            .map(|(_, l)| Arc::clone(l))
            .collect();
        for listener in listeners {
            listener(event);
        }
    }

    /// Number of live subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.listeners.lock().len()
    }
}

/// Handle for one event-bus subscription.
pub struct EventSubscription {
    key: u64,
    bus: std::sync::Weak<RouterEventBus>,
}

impl EventSubscription {
    /// Remove the listener from the bus.
    pub fn unsubscribe(self) {
        if let Some(bus) = self.bus.upgrade() {
            bus.listeners.lock().retain(|(key, _)| *key != self.key);
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::NavigationOptions;

    fn empty_tree() -> ViewportInstructionTree {
        ViewportInstructionTree::empty(NavigationOptions::default())
    }

    #[test]
    fn test_publish_reaches_subscribers_in_order() {
        let bus = RouterEventBus::new();
        let log: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));

        let log1 = Arc::clone(&log);
        let _sub1 = bus.subscribe(move |ev| log1.lock().push(format!("a:{}", ev.name())));
        let log2 = Arc::clone(&log);
        let _sub2 = bus.subscribe(move |ev| log2.lock().push(format!("b:{}", ev.name())));

        bus.publish(&RouterEvent::NavigationStart {
            id: 1,
            instructions: empty_tree(),
            trigger: NavigationTrigger::Api,
        });

        assert_eq!(
            *log.lock(),
            vec![
                "a:lumen:router:navigation-start".to_string(),
                "b:lumen:router:navigation-start".to_string(),
            ]
        );
    }

    #[test]
    fn test_unsubscribe_removes_listener() {
        let bus = RouterEventBus::new();
        let count = Arc::new(AtomicU64::new(0));
        let count2 = Arc::clone(&count);
        let sub = bus.subscribe(move |_| {
            count2.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(bus.subscriber_count(), 1);

        sub.unsubscribe();
        assert_eq!(bus.subscriber_count(), 0);

        bus.publish(&RouterEvent::NavigationCancel {
            id: 7,
            instructions: empty_tree(),
            reason: "guard rejected".into(),
        });
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_event_ids_are_monotonic() {
        let bus = RouterEventBus::new();
        let first = bus.next_id();
        let second = bus.next_id();
        assert!(second > first);
    }
}
