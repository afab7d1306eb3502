//! Dispatcher: non-blocking fan-out of inbound messages to plugins.
//!
//! Every subscribed plugin gets a private bounded channel. `dispatch()` tries
//! to push the message into each of them and drops it for any plugin whose
//! buffer is full, so a stalled plugin can never hold up the platform
//! connection or its siblings.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::debug;

use crate::events::ReceiveMessage;

/// Default per-plugin buffer size.
pub const DEFAULT_PLUGIN_BUFFER: usize = 32;

// ─────────────────────────────────────────────
// Stats
// ─────────────────────────────────────────────

#[derive(Debug, Default)]
struct Counters {
    delivered: AtomicU64,
    dropped: AtomicU64,
}

/// Delivery counters, shareable with whoever wants to observe drops.
#[derive(Clone, Debug, Default)]
pub struct DispatchStats {
    inner: Arc<Counters>,
}

impl DispatchStats {
    /// Messages successfully pushed into a plugin channel.
    pub fn delivered(&self) -> u64 {
        self.inner.delivered.load(Ordering::Relaxed)
    }

    /// Messages dropped because a plugin channel was full or closed.
    pub fn dropped(&self) -> u64 {
        self.inner.dropped.load(Ordering::Relaxed)
    }
}

// ─────────────────────────────────────────────
// Dispatcher
// ─────────────────────────────────────────────

struct Subscriber {
    name: String,
    tx: mpsc::Sender<ReceiveMessage>,
}

/// Maps each subscribed plugin to the sending half of its private channel.
///
/// Subscriptions are only added during setup; once the owning bot starts,
/// the dispatcher is moved into the decode task and only read from there.
pub struct Dispatcher {
    subscribers: Vec<Subscriber>,
    capacity: usize,
    stats: DispatchStats,
}

impl Dispatcher {
    /// Create a dispatcher whose plugin channels hold `capacity` messages.
    pub fn new(capacity: usize) -> Self {
        Self {
            subscribers: Vec::new(),
            capacity: capacity.max(1),
            stats: DispatchStats::default(),
        }
    }

    /// Register a plugin and return the receiving half of its channel.
    pub fn subscribe(&mut self, name: impl Into<String>) -> mpsc::Receiver<ReceiveMessage> {
        let (tx, rx) = mpsc::channel(self.capacity);
        let name = name.into();
        debug!(plugin = %name, capacity = self.capacity, "plugin subscribed");
        self.subscribers.push(Subscriber { name, tx });
        rx
    }

    /// Push `msg` to every subscriber without waiting.
    ///
    /// Returns the number of plugins the message was delivered to.
    pub fn dispatch(&self, msg: &ReceiveMessage) -> usize {
        let mut delivered = 0;
        for sub in &self.subscribers {
            match sub.tx.try_send(msg.clone()) {
                Ok(()) => {
                    debug!(plugin = %sub.name, kind = %msg.kind(), "notified plugin");
                    delivered += 1;
                }
                Err(TrySendError::Full(_)) => {
                    debug!(plugin = %sub.name, "plugin not ready, message dropped");
                    self.stats.inner.dropped.fetch_add(1, Ordering::Relaxed);
                }
                Err(TrySendError::Closed(_)) => {
                    debug!(plugin = %sub.name, "plugin channel closed, message dropped");
                    self.stats.inner.dropped.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
        self.stats
            .inner
            .delivered
            .fetch_add(delivered as u64, Ordering::Relaxed);
        delivered
    }

    pub fn stats(&self) -> DispatchStats {
        self.stats.clone()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Names of all subscribers, in registration order.
    pub fn subscriber_names(&self) -> Vec<&str> {
        self.subscribers.iter().map(|s| s.name.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.subscribers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscribers.is_empty()
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new(DEFAULT_PLUGIN_BUFFER)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::MessageType;

    fn msg(i: usize) -> ReceiveMessage {
        ReceiveMessage::new(MessageType::Message, "user", "chan", format!("msg-{i}"))
    }

    #[test]
    fn test_new_dispatcher_empty() {
        let d = Dispatcher::new(8);
        assert!(d.is_empty());
        assert_eq!(d.dispatch(&msg(0)), 0);
        assert_eq!(d.stats().delivered(), 0);
    }

    #[test]
    fn test_zero_capacity_is_clamped() {
        let d = Dispatcher::new(0);
        assert_eq!(d.capacity(), 1);
    }

    #[test]
    fn test_subscriber_names_in_order() {
        let mut d = Dispatcher::new(4);
        let _a = d.subscribe("echo");
        let _b = d.subscribe("version");
        assert_eq!(d.subscriber_names(), vec!["echo", "version"]);
        assert_eq!(d.len(), 2);
    }

    #[tokio::test]
    async fn test_drained_plugins_receive_all_in_order() {
        let mut d = Dispatcher::new(4);
        let mut rx1 = d.subscribe("p1");
        let mut rx2 = d.subscribe("p2");

        for i in 0..20 {
            assert_eq!(d.dispatch(&msg(i)), 2);
            // Drain promptly.
            assert_eq!(rx1.recv().await.unwrap().content(), format!("msg-{i}"));
            assert_eq!(rx2.recv().await.unwrap().content(), format!("msg-{i}"));
        }
        assert_eq!(d.stats().delivered(), 40);
        assert_eq!(d.stats().dropped(), 0);
    }

    #[tokio::test]
    async fn test_stalled_plugin_gets_at_most_capacity() {
        let mut d = Dispatcher::new(3);
        let mut fast = d.subscribe("fast");
        let mut stalled = d.subscribe("stalled");

        let mut fast_seen = Vec::new();
        for i in 0..10 {
            d.dispatch(&msg(i));
            fast_seen.push(fast.recv().await.unwrap().content().to_string());
        }

        let expected: Vec<String> = (0..10).map(|i| format!("msg-{i}")).collect();
        assert_eq!(fast_seen, expected);

        // The stalled plugin only holds the first `capacity` messages.
        let mut stalled_seen = Vec::new();
        while let Ok(m) = stalled.try_recv() {
            stalled_seen.push(m.content().to_string());
        }
        assert_eq!(stalled_seen, vec!["msg-0", "msg-1", "msg-2"]);
        assert_eq!(d.stats().dropped(), 7);
    }

    #[test]
    fn test_closed_subscriber_does_not_block_others() {
        let mut d = Dispatcher::new(2);
        let gone = d.subscribe("gone");
        let mut alive = d.subscribe("alive");
        drop(gone);

        assert_eq!(d.dispatch(&msg(1)), 1);
        assert_eq!(alive.try_recv().unwrap().content(), "msg-1");
        assert_eq!(d.stats().dropped(), 1);
    }
}
