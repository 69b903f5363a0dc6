//! Topic-keyed publish/subscribe bus
//!
//! `publish` awaits each subscriber in registration order before moving on to
//! the next one. The subscriber list is snapshotted when a publish begins, so
//! subscribing or unsubscribing from inside a callback never disturbs the
//! fan-out in flight.
//!
//! Failures of ordinary topics are logged and reported back in the
//! [`PublishReport`]; failures of the lifecycle topics (`init`, `run`, `exit`)
//! abort the publish with [`PumpError::Lifecycle`].

use crate::error::{PumpError, Result};
use async_trait::async_trait;
use futures::future::BoxFuture;
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, error, trace};

/// Topics published by the application governor
pub mod topics {
    pub const INIT: &str = "init";
    pub const RUN: &str = "run";
    pub const TICK: &str = "tick";
    pub const TICK_10: &str = "tick/10";
    pub const TICK_60: &str = "tick/60";
    pub const EXIT: &str = "exit";
    pub const PIPELINE_ERROR: &str = "pipeline.error";

    /// Topics whose subscriber failures are fatal
    pub const LIFECYCLE: [&str; 3] = [INIT, RUN, EXIT];

    pub fn is_lifecycle(topic: &str) -> bool {
        LIFECYCLE.contains(&topic)
    }
}

/// A callback registered for one or more topics
#[async_trait]
pub trait Subscriber: Send + Sync {
    async fn on_message(&self, topic: &str, payload: &Value) -> anyhow::Result<()>;
}

type CallbackFn = dyn Fn(String, Value) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync;

/// Adapter turning an async closure into a [`Subscriber`]
struct FnSubscriber {
    callback: Box<CallbackFn>,
}

#[async_trait]
impl Subscriber for FnSubscriber {
    async fn on_message(&self, topic: &str, payload: &Value) -> anyhow::Result<()> {
        (self.callback)(topic.to_string(), payload.clone()).await
    }
}

/// How the bus invokes a subscriber
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Awaited in order; the publish does not return before it completes
    Awaited,
    /// Spawned and not awaited; failures are only logged
    Detached,
}

/// Handle returned by `subscribe`, used to unsubscribe later
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Subscription {
    topic: String,
    id: u64,
}

impl Subscription {
    pub fn topic(&self) -> &str {
        &self.topic
    }
}

#[derive(Clone)]
struct Entry {
    id: u64,
    delivery: Delivery,
    subscriber: Arc<dyn Subscriber>,
}

/// Outcome of a single publish
#[derive(Debug, Default)]
pub struct PublishReport {
    /// Subscribers that ran (or were spawned) for this publish
    pub delivered: usize,
    /// Failures of awaited subscribers, in invocation order
    pub failed: Vec<anyhow::Error>,
}

impl PublishReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// The publish/subscribe register
#[derive(Default)]
pub struct PubSub {
    subscribers: RwLock<HashMap<String, Vec<Entry>>>,
    next_id: AtomicU64,
}

impl fmt::Debug for PubSub {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let topics: Vec<String> = self.subscribers.read().keys().cloned().collect();
        f.debug_struct("PubSub").field("topics", &topics).finish()
    }
}

impl PubSub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subscriber that is awaited on every publish of `topic`
    pub fn subscribe(&self, topic: &str, subscriber: Arc<dyn Subscriber>) -> Subscription {
        self.register(topic, subscriber, Delivery::Awaited)
    }

    /// Register a fire-and-forget subscriber
    ///
    /// Only meant for supervisory notifications: the publisher neither waits
    /// for it nor learns about its failure.
    pub fn subscribe_detached(&self, topic: &str, subscriber: Arc<dyn Subscriber>) -> Subscription {
        self.register(topic, subscriber, Delivery::Detached)
    }

    /// Register an async closure as an awaited subscriber
    ///
    /// # Example
    ///
    /// ```rust
    /// use eventpump::bus::PubSub;
    ///
    /// # async fn example() {
    /// let bus = PubSub::new();
    /// bus.subscribe_fn("tick", |_topic, payload| async move {
    ///     println!("tick {}", payload);
    ///     Ok(())
    /// });
    /// bus.publish("tick", serde_json::json!({"tick": 1})).await.unwrap();
    /// # }
    /// ```
    pub fn subscribe_fn<F, Fut>(&self, topic: &str, callback: F) -> Subscription
    where
        F: Fn(String, Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let subscriber = FnSubscriber {
            callback: Box::new(move |topic, payload| -> BoxFuture<'static, anyhow::Result<()>> {
                Box::pin(callback(topic, payload))
            }),
        };
        self.subscribe(topic, Arc::new(subscriber))
    }

    fn register(
        &self,
        topic: &str,
        subscriber: Arc<dyn Subscriber>,
        delivery: Delivery,
    ) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.subscribers
            .write()
            .entry(topic.to_string())
            .or_default()
            .push(Entry {
                id,
                delivery,
                subscriber,
            });

        trace!(topic = %topic, id, ?delivery, "Subscribed");
        Subscription {
            topic: topic.to_string(),
            id,
        }
    }

    /// Remove a subscription; returns false if it was already gone
    pub fn unsubscribe(&self, subscription: &Subscription) -> bool {
        let mut subscribers = self.subscribers.write();
        let Some(entries) = subscribers.get_mut(&subscription.topic) else {
            return false;
        };

        let before = entries.len();
        entries.retain(|entry| entry.id != subscription.id);
        let removed = entries.len() != before;

        if entries.is_empty() {
            subscribers.remove(&subscription.topic);
        }
        removed
    }

    /// Number of subscribers currently registered for `topic`
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.subscribers
            .read()
            .get(topic)
            .map(|entries| entries.len())
            .unwrap_or(0)
    }

    /// Deliver `payload` to every subscriber of `topic`, in registration order
    pub async fn publish(&self, topic: &str, payload: Value) -> Result<PublishReport> {
        // Snapshot so callbacks may (un)subscribe without affecting this fan-out
        let snapshot: Vec<Entry> = self
            .subscribers
            .read()
            .get(topic)
            .cloned()
            .unwrap_or_default();

        let lifecycle = topics::is_lifecycle(topic);
        let mut report = PublishReport::default();

        debug!(topic = %topic, subscribers = snapshot.len(), "Publishing");

        for entry in snapshot {
            match entry.delivery {
                Delivery::Awaited => {
                    report.delivered += 1;
                    if let Err(e) = entry.subscriber.on_message(topic, &payload).await {
                        if lifecycle {
                            error!(topic = %topic, error = %e, "Lifecycle subscriber failed");
                            return Err(PumpError::Lifecycle {
                                topic: topic.to_string(),
                                source: e,
                            });
                        }
                        error!(topic = %topic, error = %e, "Subscriber failed");
                        report.failed.push(e);
                    }
                }
                Delivery::Detached => {
                    report.delivered += 1;
                    let subscriber = Arc::clone(&entry.subscriber);
                    let topic = topic.to_string();
                    let payload = payload.clone();
                    tokio::spawn(async move {
                        if let Err(e) = subscriber.on_message(&topic, &payload).await {
                            error!(topic = %topic, error = %e, "Detached subscriber failed");
                        }
                    });
                }
            }
        }

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use serde_json::json;

    fn recorder(log: &Arc<Mutex<Vec<String>>>, name: &'static str) -> Arc<dyn Subscriber> {
        struct Recorder {
            log: Arc<Mutex<Vec<String>>>,
            name: &'static str,
        }

        #[async_trait]
        impl Subscriber for Recorder {
            async fn on_message(&self, _topic: &str, _payload: &Value) -> anyhow::Result<()> {
                tokio::task::yield_now().await;
                self.log.lock().push(self.name.to_string());
                Ok(())
            }
        }

        Arc::new(Recorder {
            log: Arc::clone(log),
            name,
        })
    }

    #[tokio::test]
    async fn test_publish_in_registration_order() {
        let bus = PubSub::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        bus.subscribe("tick", recorder(&log, "a"));
        bus.subscribe("tick", recorder(&log, "b"));
        bus.subscribe("tick", recorder(&log, "c"));
        bus.subscribe("other", recorder(&log, "x"));

        let report = bus.publish("tick", Value::Null).await.unwrap();
        assert_eq!(report.delivered, 3);
        assert!(report.is_clean());
        assert_eq!(*log.lock(), vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_publish_without_subscribers() {
        let bus = PubSub::new();
        let report = bus.publish("nobody", json!(1)).await.unwrap();
        assert_eq!(report.delivered, 0);
    }

    #[tokio::test]
    async fn test_failure_does_not_stop_other_subscribers() {
        let bus = PubSub::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        bus.subscribe("tick", recorder(&log, "first"));
        bus.subscribe_fn("tick", |_, _| async { Err(anyhow::anyhow!("broken")) });
        bus.subscribe("tick", recorder(&log, "last"));

        let report = bus.publish("tick", Value::Null).await.unwrap();
        assert_eq!(report.delivered, 3);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(*log.lock(), vec!["first", "last"]);
    }

    #[tokio::test]
    async fn test_lifecycle_failure_is_fatal() {
        let bus = PubSub::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        bus.subscribe_fn(topics::INIT, |_, _| async { Err(anyhow::anyhow!("no db")) });
        bus.subscribe(topics::INIT, recorder(&log, "after"));

        let err = bus.publish(topics::INIT, Value::Null).await.unwrap_err();
        assert!(err.is_fatal());
        assert!(log.lock().is_empty());
    }

    #[tokio::test]
    async fn test_snapshot_ignores_subscribe_during_publish() {
        let bus = Arc::new(PubSub::new());
        let log = Arc::new(Mutex::new(Vec::new()));

        let inner_bus = Arc::clone(&bus);
        let inner_log = Arc::clone(&log);
        bus.subscribe_fn("tick", move |_, _| {
            let bus = Arc::clone(&inner_bus);
            let log = Arc::clone(&inner_log);
            async move {
                log.lock().push("adder".to_string());
                bus.subscribe("tick", recorder(&log, "late"));
                Ok(())
            }
        });

        bus.publish("tick", Value::Null).await.unwrap();
        assert_eq!(*log.lock(), vec!["adder"]);
        assert_eq!(bus.subscriber_count("tick"), 2);

        bus.publish("tick", Value::Null).await.unwrap();
        assert_eq!(*log.lock(), vec!["adder", "adder", "late"]);
    }

    #[tokio::test]
    async fn test_snapshot_survives_unsubscribe_during_publish() {
        let bus = Arc::new(PubSub::new());
        let log = Arc::new(Mutex::new(Vec::new()));
        let victim: Arc<Mutex<Option<Subscription>>> = Arc::new(Mutex::new(None));

        let inner_bus = Arc::clone(&bus);
        let inner_victim = Arc::clone(&victim);
        bus.subscribe_fn("tick", move |_, _| {
            let bus = Arc::clone(&inner_bus);
            let victim = inner_victim.lock().clone();
            async move {
                if let Some(subscription) = victim {
                    bus.unsubscribe(&subscription);
                }
                Ok(())
            }
        });
        let subscription = bus.subscribe("tick", recorder(&log, "victim"));
        *victim.lock() = Some(subscription.clone());

        bus.publish("tick", Value::Null).await.unwrap();
        assert_eq!(*log.lock(), vec!["victim"]);

        bus.publish("tick", Value::Null).await.unwrap();
        assert_eq!(*log.lock(), vec!["victim"]);
        assert!(!bus.unsubscribe(&subscription));
    }

    #[tokio::test]
    async fn test_detached_subscriber_failure_is_not_reported() {
        let bus = PubSub::new();
        let (tx, mut rx) = tokio::sync::mpsc::channel(1);

        struct Notify(tokio::sync::mpsc::Sender<Value>);

        #[async_trait]
        impl Subscriber for Notify {
            async fn on_message(&self, _topic: &str, payload: &Value) -> anyhow::Result<()> {
                self.0.send(payload.clone()).await?;
                Err(anyhow::anyhow!("ignored"))
            }
        }

        bus.subscribe_detached("pipeline.error", Arc::new(Notify(tx)));
        let report = bus.publish("pipeline.error", json!({"pipeline": "p"})).await.unwrap();
        assert!(report.is_clean());
        assert_eq!(rx.recv().await, Some(json!({"pipeline": "p"})));
    }
}
