//! Event Bus
//!
//! In-process fan-out of [`Event`]s to every connected observer. The bus is
//! built around three guarantees:
//!
//! 1. **Publishers never block.** [`EventBus::publish`] hands the event to a
//!    bus-owned dispatcher task over an unbounded channel and returns.
//! 2. **Per-publisher order per subscription.** The single dispatcher pushes
//!    events into every subscription in arrival order.
//! 3. **Slow observers lose oldest-first.** Each subscription holds a bounded
//!    ring buffer; on overflow the oldest event is dropped and one
//!    `bus:overflow{dropped}` marker is delivered to *that* subscriber before
//!    its next retained event. Other subscriptions are unaffected.
//!
//! Dropping a [`Subscription`] releases its slot; dropping every bus handle
//! shuts the dispatcher down and lets readers drain what remains.

use crate::inferflow::event::Event;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, Notify};

/// Default per-subscription buffer capacity.
pub const DEFAULT_SUBSCRIPTION_CAPACITY: usize = 256;

struct SubscriberQueue {
    events: VecDeque<Event>,
    /// Events dropped since the last overflow marker was delivered.
    dropped: u64,
}

struct SubscriberState {
    id: u64,
    capacity: usize,
    queue: Mutex<SubscriberQueue>,
    notify: Notify,
    closed: AtomicBool,
}

impl SubscriberState {
    fn push(&self, event: Event) {
        {
            let mut queue = self.queue.lock().unwrap();
            if queue.events.len() >= self.capacity {
                queue.events.pop_front();
                queue.dropped += 1;
            }
            queue.events.push_back(event);
        }
        self.notify.notify_one();
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.notify.notify_one();
    }
}

struct BusShared {
    subscribers: Mutex<Vec<Arc<SubscriberState>>>,
    next_subscriber_id: AtomicU64,
}

/// Handle to the process-wide event fan-out. Cheap to clone; all clones feed
/// the same dispatcher.
#[derive(Clone)]
pub struct EventBus {
    sender: mpsc::UnboundedSender<Event>,
    shared: Arc<BusShared>,
}

impl EventBus {
    /// Create a bus and spawn its dispatcher task on the current runtime.
    pub fn new() -> Self {
        let (sender, mut receiver) = mpsc::unbounded_channel::<Event>();
        let shared = Arc::new(BusShared {
            subscribers: Mutex::new(Vec::new()),
            next_subscriber_id: AtomicU64::new(1),
        });
        let dispatch_shared = shared.clone();
        tokio::spawn(async move {
            while let Some(event) = receiver.recv().await {
                let subscribers: Vec<Arc<SubscriberState>> = {
                    dispatch_shared.subscribers.lock().unwrap().clone()
                };
                for subscriber in subscribers {
                    subscriber.push(event.clone());
                }
            }
            // All bus handles dropped: wake readers so they can drain and end.
            let subscribers: Vec<Arc<SubscriberState>> =
                { dispatch_shared.subscribers.lock().unwrap().clone() };
            for subscriber in subscribers {
                subscriber.close();
            }
        });
        Self { sender, shared }
    }

    /// Publish an event. Never blocks; delivery happens on the dispatcher.
    pub fn publish(&self, event: Event) {
        if self.sender.send(event).is_err() {
            log::warn!("event published after bus shutdown was dropped");
        }
    }

    /// Subscribe with the default buffer capacity.
    pub fn subscribe(&self) -> Subscription {
        self.subscribe_with_capacity(DEFAULT_SUBSCRIPTION_CAPACITY)
    }

    /// Subscribe with an explicit buffer capacity (minimum 1).
    pub fn subscribe_with_capacity(&self, capacity: usize) -> Subscription {
        let state = Arc::new(SubscriberState {
            id: self.shared.next_subscriber_id.fetch_add(1, Ordering::SeqCst),
            capacity: capacity.max(1),
            queue: Mutex::new(SubscriberQueue {
                events: VecDeque::new(),
                dropped: 0,
            }),
            notify: Notify::new(),
            closed: AtomicBool::new(false),
        });
        self.shared.subscribers.lock().unwrap().push(state.clone());
        Subscription {
            state,
            shared: self.shared.clone(),
        }
    }

    /// Number of live subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.shared.subscribers.lock().unwrap().len()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// One observer's view of the event stream.
///
/// Delivery preserves publisher order; when the subscription's buffer
/// overflowed, the next [`Subscription::recv`] yields a
/// [`Event::BusOverflow`] marker before the retained events.
pub struct Subscription {
    state: Arc<SubscriberState>,
    shared: Arc<BusShared>,
}

impl Subscription {
    /// Receive the next event, waiting if none is buffered. Returns `None`
    /// once the bus has shut down and the buffer is drained.
    pub async fn recv(&mut self) -> Option<Event> {
        loop {
            if let Some(event) = self.try_recv() {
                return Some(event);
            }
            if self.state.closed.load(Ordering::SeqCst) {
                // Drain anything that raced in before the close.
                return self.try_recv();
            }
            self.state.notify.notified().await;
        }
    }

    /// Receive the next buffered event without waiting.
    pub fn try_recv(&mut self) -> Option<Event> {
        let mut queue = self.state.queue.lock().unwrap();
        if queue.dropped > 0 {
            let dropped = queue.dropped;
            queue.dropped = 0;
            return Some(Event::BusOverflow { dropped });
        }
        queue.events.pop_front()
    }

    /// Number of currently buffered events.
    pub fn buffered(&self) -> usize {
        self.state.queue.lock().unwrap().events.len()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        let mut subscribers = self.shared.subscribers.lock().unwrap();
        subscribers.retain(|s| s.id != self.state.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pong() -> Event {
        Event::Pong
    }

    fn completed(run_id: &str) -> Event {
        Event::ExecutionCompleted {
            run_id: run_id.to_string(),
        }
    }

    #[tokio::test]
    async fn delivers_in_publish_order() {
        let bus = EventBus::new();
        let mut subscription = bus.subscribe();
        for i in 0..5 {
            bus.publish(completed(&format!("r{}", i)));
        }
        for i in 0..5 {
            assert_eq!(subscription.recv().await.unwrap(), completed(&format!("r{}", i)));
        }
    }

    #[tokio::test]
    async fn fan_out_reaches_every_subscriber() {
        let bus = EventBus::new();
        let mut first = bus.subscribe();
        let mut second = bus.subscribe();
        bus.publish(pong());
        assert_eq!(first.recv().await.unwrap(), Event::Pong);
        assert_eq!(second.recv().await.unwrap(), Event::Pong);
    }

    #[tokio::test]
    async fn overflow_inserts_marker_only_for_the_slow_subscriber() {
        let bus = EventBus::new();
        let mut slow = bus.subscribe_with_capacity(2);
        let mut fast = bus.subscribe_with_capacity(64);

        for i in 0..6 {
            bus.publish(completed(&format!("r{}", i)));
        }
        // Wait until the dispatcher has delivered everything to the fast one,
        // then give it a beat to finish the slow subscriber's pushes too.
        for i in 0..6 {
            assert_eq!(fast.recv().await.unwrap(), completed(&format!("r{}", i)));
        }
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        // The slow subscriber sees one overflow marker, then the newest
        // retained events.
        assert_eq!(slow.recv().await.unwrap(), Event::BusOverflow { dropped: 4 });
        assert_eq!(slow.recv().await.unwrap(), completed("r4"));
        assert_eq!(slow.recv().await.unwrap(), completed("r5"));
    }

    #[tokio::test]
    async fn dropping_a_subscription_releases_its_slot() {
        let bus = EventBus::new();
        let subscription = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 1);
        drop(subscription);
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn publish_never_blocks_on_a_full_subscriber() {
        let bus = EventBus::new();
        let _stuck = bus.subscribe_with_capacity(1);
        // Publishing far beyond the buffer must return promptly.
        for _ in 0..1_000 {
            bus.publish(pong());
        }
    }
}
