//! In-process fanout of upload progress `Event`s to however many
//! subscribers (typically WebSocket connections) are watching a given
//! upload. Generalizes the teacher's `SurrealDbClient::listen` LIVE
//! SELECT fanout to a process-local broadcast: there is no DB round-trip
//! to make since the publisher (the assembler worker) and the subscriber
//! (the API server) share a process here.

use std::{
    collections::VecDeque,
    sync::{Arc, Mutex, Weak},
};

use common::storage::types::events::Event;
use dashmap::DashMap;
use tokio::sync::Notify;
use tracing::debug;

struct SubscriberInner {
    queue: Mutex<VecDeque<Event>>,
    notify: Notify,
    capacity: usize,
}

/// A live subscription to one upload's progress events. Dropping this
/// unsubscribes; the broadcaster detects the drop lazily on its next
/// publish to that upload.
pub struct Subscription {
    inner: Arc<SubscriberInner>,
}

impl Subscription {
    /// Waits for the next event, draining in FIFO order. Never returns
    /// `None` on its own — a subscription only ends when dropped.
    pub async fn recv(&mut self) -> Event {
        loop {
            {
                let mut queue = self.inner.queue.lock().expect("subscriber queue mutex poisoned");
                if let Some(event) = queue.pop_front() {
                    return event;
                }
            }
            self.inner.notify.notified().await;
        }
    }
}

struct Channel {
    subscribers: Vec<Weak<SubscriberInner>>,
    last: Option<Event>,
}

impl Channel {
    fn new() -> Self {
        Self { subscribers: Vec::new(), last: None }
    }
}

/// Per-upload subscribe/publish fanout with bounded, coalescing
/// per-subscriber queues (`progressQueueDepth`).
pub struct Broadcaster {
    channels: DashMap<String, Channel>,
    queue_depth: usize,
}

impl Broadcaster {
    pub fn new(queue_depth: usize) -> Self {
        Self {
            channels: DashMap::new(),
            queue_depth: queue_depth.max(1),
        }
    }

    /// Subscribes to `upload_id`'s events. If an event has already been
    /// published for this upload, the new subscriber's queue is
    /// pre-seeded with it so a late joiner sees the current state
    /// immediately instead of waiting for the next transition.
    pub fn subscribe(&self, upload_id: &str) -> Subscription {
        let mut queue = VecDeque::with_capacity(1);
        let mut channel = self.channels.entry(upload_id.to_string()).or_insert_with(Channel::new);
        if let Some(last) = channel.last.clone() {
            queue.push_back(last);
        }

        let inner = Arc::new(SubscriberInner {
            queue: Mutex::new(queue),
            notify: Notify::new(),
            capacity: self.queue_depth,
        });
        channel.subscribers.push(Arc::downgrade(&inner));

        Subscription { inner }
    }

    /// Publishes `event` to every live subscriber of `event.upload_id()`.
    /// Stale (dropped) subscribers are pruned from the channel as a side
    /// effect. A subscriber at capacity drops its oldest buffered
    /// non-terminal event to make room rather than dropping the new one;
    /// a terminal event is never dropped, even if that means the queue
    /// briefly exceeds its configured depth.
    pub fn publish(&self, event: Event) {
        let upload_id = event.upload_id().to_string();
        let mut channel = self.channels.entry(upload_id.clone()).or_insert_with(Channel::new);
        channel.last = Some(event.clone());

        channel.subscribers.retain(|weak| {
            let Some(inner) = weak.upgrade() else {
                return false;
            };

            {
                let mut guard = inner.queue.lock().expect("subscriber queue mutex poisoned");
                if guard.len() >= inner.capacity {
                    let oldest_is_terminal = guard.front().is_some_and(Event::is_terminal);
                    if !oldest_is_terminal {
                        guard.pop_front();
                    }
                }
                guard.push_back(event.clone());
            }
            inner.notify.notify_waiters();

            true
        });

        debug!(upload_id = %upload_id, subscriber_count = channel.subscribers.len(), "published progress event");
    }

    /// Drops the channel for `upload_id` entirely, e.g. once a terminal
    /// event has been delivered and no further events are expected.
    pub fn remove_channel(&self, upload_id: &str) {
        self.channels.remove(upload_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn progress(upload_id: &str, done: u32, total: u32) -> Event {
        Event::Progress {
            upload_id: upload_id.to_string(),
            uploaded_chunks_count: done,
            total_chunks: total,
        }
    }

    fn completed(upload_id: &str) -> Event {
        Event::Completed {
            upload_id: upload_id.to_string(),
            entry_id: "entry-1".to_string(),
        }
    }

    #[tokio::test]
    async fn subscriber_receives_published_events_in_order() {
        let broadcaster = Broadcaster::new(8);
        let mut sub = broadcaster.subscribe("u1");

        broadcaster.publish(progress("u1", 1, 4));
        broadcaster.publish(progress("u1", 2, 4));

        assert_eq!(sub.recv().await, progress("u1", 1, 4));
        assert_eq!(sub.recv().await, progress("u1", 2, 4));
    }

    #[tokio::test]
    async fn late_subscriber_gets_last_event_as_snapshot() {
        let broadcaster = Broadcaster::new(8);
        broadcaster.publish(progress("u2", 3, 4));

        let mut sub = broadcaster.subscribe("u2");
        assert_eq!(sub.recv().await, progress("u2", 3, 4));
    }

    #[tokio::test]
    async fn overflow_drops_oldest_progress_event_not_the_newest() {
        let broadcaster = Broadcaster::new(2);
        let mut sub = broadcaster.subscribe("u3");

        broadcaster.publish(progress("u3", 1, 10));
        broadcaster.publish(progress("u3", 2, 10));
        broadcaster.publish(progress("u3", 3, 10));

        // The queue held at most 2; the oldest (1/10) should have been dropped.
        assert_eq!(sub.recv().await, progress("u3", 2, 10));
        assert_eq!(sub.recv().await, progress("u3", 3, 10));
    }

    #[tokio::test]
    async fn terminal_event_is_never_dropped_even_at_capacity() {
        let broadcaster = Broadcaster::new(1);
        let mut sub = broadcaster.subscribe("u4");

        broadcaster.publish(progress("u4", 1, 10));
        broadcaster.publish(completed("u4"));

        // Oldest progress event is evicted to make room; the terminal event always lands.
        let next = sub.recv().await;
        assert!(next.is_terminal());
        assert_eq!(next, completed("u4"));
    }

    #[tokio::test]
    async fn dropped_subscriber_is_pruned_on_next_publish() {
        let broadcaster = Broadcaster::new(4);
        {
            let _sub = broadcaster.subscribe("u5");
            assert_eq!(broadcaster.channels.get("u5").unwrap().subscribers.len(), 1);
        }
        broadcaster.publish(progress("u5", 1, 1));
        assert_eq!(broadcaster.channels.get("u5").unwrap().subscribers.len(), 0);
    }
}
