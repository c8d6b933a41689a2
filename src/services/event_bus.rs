//! EventBus service for in-process event routing.
//!
//! Publish/subscribe with wildcard name matching, bounded history, and
//! awaitable fan-out: `emit` completes only after every matched handler
//! has completed or failed. Handler failures are isolated; they never
//! fail the emit or starve later handlers.

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use regex::Regex;
use tokio::sync::RwLock;

use crate::domain::errors::{EngineError, EngineResult};
use crate::domain::models::event::BusEvent;

/// Future returned by a subscriber.
pub type HandlerFuture = Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>>;

/// Boxed subscriber callback.
pub type SubscriberFn = Arc<dyn Fn(BusEvent) -> HandlerFuture + Send + Sync>;

/// Disposer handle returned by `on`/`once`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

struct Subscription {
    id: SubscriptionId,
    pattern: String,
    /// Compiled wildcard matcher; `None` for exact patterns.
    regex: Option<Regex>,
    handler: SubscriberFn,
    once: bool,
}

impl Subscription {
    fn matches(&self, name: &str) -> bool {
        match &self.regex {
            Some(regex) => regex.is_match(name),
            None => self.pattern == name,
        }
    }
}

/// Whether `name` matches `pattern` under the wildcard rule: `*` matches
/// any run of characters (including `:`); everything else is literal.
pub fn pattern_matches(name: &str, pattern: &str) -> bool {
    if !pattern.contains('*') {
        return name == pattern;
    }
    match compile_pattern(pattern) {
        Ok(regex) => regex.is_match(name),
        Err(_) => false,
    }
}

fn compile_pattern(pattern: &str) -> Result<Regex, regex::Error> {
    let escaped: Vec<String> = pattern.split('*').map(regex::escape).collect();
    Regex::new(&format!("^{}$", escaped.join(".*")))
}

/// Configuration for the EventBus.
#[derive(Debug, Clone)]
pub struct EventBusConfig {
    /// Bounded history ring capacity.
    pub max_history: usize,
}

impl Default for EventBusConfig {
    fn default() -> Self {
        Self { max_history: 100 }
    }
}

/// Central event bus for the engine and its plugins.
pub struct EventBus {
    config: EventBusConfig,
    subscriptions: RwLock<Vec<Subscription>>,
    history: RwLock<VecDeque<BusEvent>>,
    next_id: AtomicU64,
    handler_failures: AtomicU64,
}

impl EventBus {
    pub fn new(config: EventBusConfig) -> Self {
        Self {
            config,
            subscriptions: RwLock::new(Vec::new()),
            history: RwLock::new(VecDeque::new()),
            next_id: AtomicU64::new(0),
            handler_failures: AtomicU64::new(0),
        }
    }

    /// Register a persistent subscription. Returns a disposer id.
    pub async fn on<F>(&self, pattern: &str, handler: F) -> EngineResult<SubscriptionId>
    where
        F: Fn(BusEvent) -> HandlerFuture + Send + Sync + 'static,
    {
        self.subscribe(pattern, Arc::new(handler), false).await
    }

    /// Register a subscription that fires at most once.
    pub async fn once<F>(&self, pattern: &str, handler: F) -> EngineResult<SubscriptionId>
    where
        F: Fn(BusEvent) -> HandlerFuture + Send + Sync + 'static,
    {
        self.subscribe(pattern, Arc::new(handler), true).await
    }

    async fn subscribe(
        &self,
        pattern: &str,
        handler: SubscriberFn,
        once: bool,
    ) -> EngineResult<SubscriptionId> {
        let regex = if pattern.contains('*') {
            Some(compile_pattern(pattern).map_err(|e| {
                EngineError::Validation(format!("invalid pattern {pattern:?}: {e}"))
            })?)
        } else {
            None
        };
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let mut subscriptions = self.subscriptions.write().await;
        subscriptions.push(Subscription {
            id,
            pattern: pattern.to_string(),
            regex,
            handler,
            once,
        });
        Ok(id)
    }

    /// Detach a subscription. Returns true if it was present.
    pub async fn off(&self, id: SubscriptionId) -> bool {
        let mut subscriptions = self.subscriptions.write().await;
        let before = subscriptions.len();
        subscriptions.retain(|s| s.id != id);
        subscriptions.len() != before
    }

    /// Emit an event and wait for every matched handler to complete.
    ///
    /// Dispatch order: persistent exact subscriptions in registration
    /// order, persistent wildcard subscriptions ordered by pattern
    /// string, then `once` subscriptions (removed from the table before
    /// invocation).
    pub async fn emit(&self, name: &str, data: serde_json::Value) -> BusEvent {
        let event = BusEvent::new(name, data);

        {
            let mut history = self.history.write().await;
            if history.len() >= self.config.max_history {
                history.pop_front();
            }
            history.push_back(event.clone());
        }

        // Snapshot matching handlers; once-subscriptions leave the table
        // here, before any handler runs.
        let handlers: Vec<(SubscriptionId, String, SubscriberFn)> = {
            let mut subscriptions = self.subscriptions.write().await;

            let mut exact = Vec::new();
            let mut wildcard = Vec::new();
            let mut once = Vec::new();
            for sub in subscriptions.iter() {
                if !sub.matches(&event.name) {
                    continue;
                }
                let entry = (sub.id, sub.pattern.clone(), sub.handler.clone());
                if sub.once {
                    once.push(entry);
                } else if sub.regex.is_some() {
                    wildcard.push(entry);
                } else {
                    exact.push(entry);
                }
            }
            wildcard.sort_by(|a, b| a.1.cmp(&b.1));

            let fired_once: Vec<SubscriptionId> = once.iter().map(|(id, _, _)| *id).collect();
            if !fired_once.is_empty() {
                subscriptions.retain(|s| !fired_once.contains(&s.id));
            }

            exact.into_iter().chain(wildcard).chain(once).collect()
        };

        for (id, pattern, handler) in handlers {
            if let Err(e) = handler(event.clone()).await {
                self.handler_failures.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    event = %event.name,
                    subscription = id.0,
                    pattern = %pattern,
                    error = %e,
                    "Event handler failed"
                );
            }
        }

        event
    }

    /// Wait for the next event matching `name`, or fail with a timeout.
    pub async fn wait_for(&self, name: &str, timeout: Duration) -> EngineResult<BusEvent> {
        let (tx, rx) = tokio::sync::oneshot::channel::<BusEvent>();
        let tx = Arc::new(std::sync::Mutex::new(Some(tx)));

        let id = self
            .once(name, move |event| {
                let tx = tx.clone();
                Box::pin(async move {
                    if let Some(sender) = tx.lock().ok().and_then(|mut guard| guard.take()) {
                        let _ = sender.send(event);
                    }
                    Ok(())
                })
            })
            .await?;

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(event)) => Ok(event),
            // Sender dropped without sending; treat like a timeout.
            Ok(Err(_)) | Err(_) => {
                self.off(id).await;
                Err(EngineError::Timeout {
                    subject: format!("wait_for({name})"),
                    secs: timeout.as_secs(),
                })
            }
        }
    }

    /// Snapshot of the bounded history, newest last, optionally filtered
    /// by pattern.
    pub async fn history(&self, filter: Option<&str>) -> Vec<BusEvent> {
        let history = self.history.read().await;
        match filter {
            Some(pattern) => history
                .iter()
                .filter(|e| pattern_matches(&e.name, pattern))
                .cloned()
                .collect(),
            None => history.iter().cloned().collect(),
        }
    }

    pub async fn history_len(&self) -> usize {
        self.history.read().await.len()
    }

    pub async fn subscription_count(&self) -> usize {
        self.subscriptions.read().await.len()
    }

    /// Total handler failures recorded since construction.
    pub fn handler_failures(&self) -> u64 {
        self.handler_failures.load(Ordering::Relaxed)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(EventBusConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;

    fn counter_handler(
        counter: Arc<AtomicUsize>,
    ) -> impl Fn(BusEvent) -> HandlerFuture + Send + Sync + 'static {
        move |_event| {
            let counter = counter.clone();
            Box::pin(async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
        }
    }

    #[test]
    fn test_star_matches_everything() {
        assert!(pattern_matches("autonomy:cycle:start", "*"));
        assert!(pattern_matches("x", "*"));
        assert!(pattern_matches("", "*"));
    }

    #[test]
    fn test_exact_match() {
        assert!(pattern_matches("autonomy:cycle:start", "autonomy:cycle:start"));
        assert!(!pattern_matches("autonomy:cycle:start", "autonomy:cycle:end"));
    }

    #[test]
    fn test_wildcard_spans_colons() {
        assert!(pattern_matches("foo:x:bar", "foo:*:bar"));
        assert!(pattern_matches("foo:x:y:bar", "foo:*:bar"));
        assert!(!pattern_matches("foo:bar", "foo:*:bar"));
        assert!(pattern_matches("autonomy:task:end", "autonomy:*"));
    }

    #[test]
    fn test_regex_metacharacters_are_literal() {
        assert!(pattern_matches("a.b", "a.b"));
        assert!(!pattern_matches("axb", "a.b"));
        assert!(pattern_matches("metrics(raw)", "metrics(raw)"));
    }

    #[tokio::test]
    async fn test_emit_delivers_to_matching_subscribers() {
        let bus = EventBus::default();
        let hits = Arc::new(AtomicUsize::new(0));
        bus.on("autonomy:*", counter_handler(hits.clone())).await.unwrap();
        bus.on("other:event", counter_handler(hits.clone())).await.unwrap();

        bus.emit("autonomy:cycle:start", json!({})).await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_once_fires_at_most_once() {
        let bus = EventBus::default();
        let hits = Arc::new(AtomicUsize::new(0));
        bus.once("ping", counter_handler(hits.clone())).await.unwrap();

        bus.emit("ping", json!({})).await;
        bus.emit("ping", json!({})).await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(bus.subscription_count().await, 0);
    }

    #[tokio::test]
    async fn test_off_detaches() {
        let bus = EventBus::default();
        let hits = Arc::new(AtomicUsize::new(0));
        let id = bus.on("ping", counter_handler(hits.clone())).await.unwrap();

        assert!(bus.off(id).await);
        assert!(!bus.off(id).await);

        bus.emit("ping", json!({})).await;
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_handler_failure_does_not_starve_later_handlers() {
        let bus = EventBus::default();
        let hits = Arc::new(AtomicUsize::new(0));

        bus.on("ping", |_event| {
            Box::pin(async move { Err(anyhow::anyhow!("handler exploded")) })
        })
        .await
        .unwrap();
        bus.on("ping", counter_handler(hits.clone())).await.unwrap();

        bus.emit("ping", json!({})).await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(bus.handler_failures(), 1);
    }

    #[tokio::test]
    async fn test_dispatch_order_exact_then_wildcard() {
        let bus = EventBus::default();
        let order = Arc::new(tokio::sync::Mutex::new(Vec::new()));

        let record = |tag: &'static str, order: Arc<tokio::sync::Mutex<Vec<&'static str>>>| {
            move |_event: BusEvent| -> HandlerFuture {
                let order = order.clone();
                Box::pin(async move {
                    order.lock().await.push(tag);
                    Ok(())
                })
            }
        };

        bus.on("ping:*", record("wildcard", order.clone())).await.unwrap();
        bus.on("ping:pong", record("exact", order.clone())).await.unwrap();
        bus.once("ping:pong", record("once", order.clone())).await.unwrap();

        bus.emit("ping:pong", json!({})).await;
        assert_eq!(*order.lock().await, vec!["exact", "wildcard", "once"]);
    }

    #[tokio::test]
    async fn test_history_bounded_newest_last() {
        let bus = EventBus::new(EventBusConfig { max_history: 3 });
        for i in 0..5 {
            bus.emit(&format!("event:{i}"), json!({})).await;
        }

        let history = bus.history(None).await;
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].name, "event:2");
        assert_eq!(history[2].name, "event:4");
    }

    #[tokio::test]
    async fn test_history_filter() {
        let bus = EventBus::default();
        bus.emit("autonomy:cycle:start", json!({})).await;
        bus.emit("metrics:sample", json!({})).await;
        bus.emit("autonomy:cycle:end", json!({})).await;

        let filtered = bus.history(Some("autonomy:*")).await;
        assert_eq!(filtered.len(), 2);
        assert_eq!(filtered[1].name, "autonomy:cycle:end");
    }

    #[tokio::test]
    async fn test_wait_for_resolves_on_match() {
        let bus = Arc::new(EventBus::default());

        let waiter = {
            let bus = bus.clone();
            tokio::spawn(async move { bus.wait_for("done", Duration::from_secs(5)).await })
        };
        // Give the waiter a chance to subscribe first.
        tokio::task::yield_now().await;
        bus.emit("done", json!({ "ok": true })).await;

        let event = waiter.await.unwrap().unwrap();
        assert_eq!(event.name, "done");
    }

    #[tokio::test]
    async fn test_wait_for_times_out() {
        let bus = EventBus::default();
        let result = bus.wait_for("never", Duration::from_millis(20)).await;
        assert!(matches!(result, Err(EngineError::Timeout { .. })));
        // The once-subscription is cleaned up on timeout.
        assert_eq!(bus.subscription_count().await, 0);
    }

    #[tokio::test]
    async fn test_event_name_never_rewritten() {
        let bus = EventBus::default();
        let seen = Arc::new(tokio::sync::Mutex::new(String::new()));
        {
            let seen = seen.clone();
            bus.on("autonomy:*", move |event| {
                let seen = seen.clone();
                Box::pin(async move {
                    *seen.lock().await = event.name.clone();
                    Ok(())
                })
            })
            .await
            .unwrap();
        }

        bus.emit("autonomy:task:start", json!({})).await;
        assert_eq!(*seen.lock().await, "autonomy:task:start");
    }
}
