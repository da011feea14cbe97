//! Event surface for mesh clients.
//!
//! Provides `MeshEvent` for the notifications the two services emit and
//! `EventBus` for subscriptions. Services publish copies of their state
//! changes here; subscribers never hold references into service state.

use crate::PeerAddr;
use serde::Serialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock, Weak};

/// Notifications emitted by the membership and dissemination services.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum MeshEvent {
    /// A peer entered the membership view.
    PeerUp {
        /// The peer's listen address
        peer: PeerAddr,
    },
    /// A peer left the membership view (or was never in it; removal is
    /// idempotent and still notifies).
    PeerDown {
        /// The peer's listen address
        peer: PeerAddr,
    },
    /// The shared channel is bound and ready; emitted once at startup.
    ChannelReady {
        /// Our own listen address
        local: PeerAddr,
    },
    /// A broadcast payload was delivered at this node.
    Delivered {
        /// Opaque application payload
        payload: Vec<u8>,
        /// The peer that handed us the message (ourselves for local origin)
        from: PeerAddr,
        /// Relay hops travelled since origination (0 = local origin)
        hops: u32,
    },
}

/// Subscription handle that unsubscribes automatically when dropped.
///
/// Follows the disposer pattern: hold this value to keep receiving events,
/// drop it (or let it go out of scope) to unsubscribe.
pub struct Subscription {
    bus: Weak<EventBus>,
    id: usize,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(bus) = self.bus.upgrade() {
            bus.unsubscribe(self.id);
        }
    }
}

/// Event bus for publishing mesh events to subscribers.
///
/// Thread-safe for use in a multi-threaded tokio runtime.
/// Wrap in `Arc` to enable subscriptions.
pub struct EventBus {
    callbacks: RwLock<Vec<(usize, Arc<dyn Fn(MeshEvent) + Send + Sync>)>>,
    next_id: AtomicUsize,
}

impl Default for EventBus {
    fn default() -> Self {
        Self {
            callbacks: RwLock::new(Vec::new()),
            next_id: AtomicUsize::new(0),
        }
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to events. Returns `Subscription` that unsubscribes on drop.
    ///
    /// Requires `self` to be wrapped in `Arc`.
    pub fn subscribe(
        self: &Arc<Self>,
        callback: impl Fn(MeshEvent) + Send + Sync + 'static,
    ) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.callbacks
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push((id, Arc::new(callback)));
        Subscription {
            bus: Arc::downgrade(self),
            id,
        }
    }

    fn unsubscribe(&self, id: usize) {
        // Use try_write to avoid deadlock if Drop runs during panic unwinding
        // while a read lock is held (e.g., during emit).
        if let Ok(mut guard) = self.callbacks.try_write() {
            guard.retain(|(i, _)| *i != id);
        }
    }

    /// Emit an event to all subscribers.
    pub fn emit(&self, event: MeshEvent) {
        // Clone the callback list to prevent deadlock if a callback calls subscribe.
        let callbacks: Vec<_> = self
            .callbacks
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|(_, cb)| Arc::clone(cb))
            .collect();

        for callback in callbacks {
            callback(event.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer() -> PeerAddr {
        "10.0.0.1:8000".parse().unwrap()
    }

    #[test]
    fn test_subscribe_and_emit() {
        let bus = Arc::new(EventBus::new());
        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = Arc::clone(&count);

        let _sub = bus.subscribe(move |_event| {
            count_clone.fetch_add(1, Ordering::Relaxed);
        });

        bus.emit(MeshEvent::PeerUp { peer: peer() });

        assert_eq!(count.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_subscription_unsubscribes_on_drop() {
        let bus = Arc::new(EventBus::new());
        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = Arc::clone(&count);

        {
            let _sub = bus.subscribe(move |_event| {
                count_clone.fetch_add(1, Ordering::Relaxed);
            });

            bus.emit(MeshEvent::PeerUp { peer: peer() });
            assert_eq!(count.load(Ordering::Relaxed), 1);
            // _sub dropped here
        }

        // After drop, callback should not be called
        bus.emit(MeshEvent::PeerDown { peer: peer() });
        assert_eq!(count.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_multiple_subscribers() {
        let bus = Arc::new(EventBus::new());
        let count1 = Arc::new(AtomicUsize::new(0));
        let count2 = Arc::new(AtomicUsize::new(0));

        let count1_clone = Arc::clone(&count1);
        let count2_clone = Arc::clone(&count2);

        let _sub1 = bus.subscribe(move |_| {
            count1_clone.fetch_add(1, Ordering::Relaxed);
        });
        let _sub2 = bus.subscribe(move |_| {
            count2_clone.fetch_add(1, Ordering::Relaxed);
        });

        bus.emit(MeshEvent::ChannelReady { local: peer() });

        assert_eq!(count1.load(Ordering::Relaxed), 1);
        assert_eq!(count2.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_peer_up_serialization() {
        let event = MeshEvent::PeerUp { peer: peer() };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"peerUp\""));
        assert!(json.contains("\"peer\":\"10.0.0.1:8000\""));
    }

    #[test]
    fn test_delivered_serialization() {
        let event = MeshEvent::Delivered {
            payload: b"hello".to_vec(),
            from: peer(),
            hops: 2,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"delivered\""));
        assert!(json.contains("\"from\":\"10.0.0.1:8000\""));
        assert!(json.contains("\"hops\":2"));
    }
}
