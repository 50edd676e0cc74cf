//! Event bus with per-topic trailing debounce.

use crate::{EventPayload, Topic};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::time::{sleep_until, Duration, Instant};
use tracing::{debug, trace};

/// Default quiet period before a debounced topic fires.
pub const DEFAULT_DEBOUNCE_WINDOW: Duration = Duration::from_millis(300);

/// Handle returned by [`EventBus::on`], used to unsubscribe.
pub type HandlerId = u64;

type Handler = Arc<dyn Fn(Topic, &EventPayload) + Send + Sync>;

struct HandlerEntry {
    id: HandlerId,
    topic: Topic,
    handler: Handler,
}

/// Pending debounced emission for one topic.
///
/// At most one timer task exists per topic; repeated emits move the
/// deadline forward and replace the payload, so the handlers fire once
/// per burst with the latest payload.
struct Pending {
    payload: EventPayload,
    deadline: Instant,
    timer_running: bool,
}

#[derive(Default)]
struct Registry {
    handlers: Vec<HandlerEntry>,
    next_id: HandlerId,
}

/// Pub/sub hub for domain events.
///
/// Debounced topics coalesce bursts into a single trailing dispatch;
/// immediate topics (profile switch) dispatch inside `emit`.
pub struct EventBus {
    registry: Mutex<Registry>,
    pending: Arc<Mutex<HashMap<Topic, Pending>>>,
    window: Duration,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_window(DEFAULT_DEBOUNCE_WINDOW)
    }

    /// Build a bus with a non-default debounce window (tests mostly).
    pub fn with_window(window: Duration) -> Self {
        Self {
            registry: Mutex::new(Registry::default()),
            pending: Arc::new(Mutex::new(HashMap::new())),
            window,
        }
    }

    /// Register a handler for one topic.
    pub fn on(
        &self,
        topic: Topic,
        handler: impl Fn(Topic, &EventPayload) + Send + Sync + 'static,
    ) -> HandlerId {
        let mut registry = self.registry.lock().expect("lock poisoned");
        let id = registry.next_id;
        registry.next_id += 1;
        registry.handlers.push(HandlerEntry {
            id,
            topic,
            handler: Arc::new(handler),
        });
        id
    }

    /// Remove a handler. Unknown ids are ignored.
    pub fn off(&self, id: HandlerId) {
        let mut registry = self.registry.lock().expect("lock poisoned");
        registry.handlers.retain(|h| h.id != id);
    }

    /// Publish an event.
    ///
    /// Immediate topics dispatch before `emit` returns. Debounced topics
    /// arm (or extend) the topic's single trailing timer; the burst's
    /// most recent payload wins.
    pub fn emit(self: &Arc<Self>, topic: Topic, payload: EventPayload) {
        if !topic.is_debounced() {
            debug!(topic = %topic, "Dispatching immediate event");
            self.dispatch(topic, &payload);
            return;
        }

        let deadline = Instant::now() + self.window;
        let spawn_timer = {
            let mut pending = self.pending.lock().expect("lock poisoned");
            let entry = pending.entry(topic).or_insert_with(|| Pending {
                payload: payload.clone(),
                deadline,
                timer_running: false,
            });
            entry.payload = payload;
            entry.deadline = deadline;
            let spawn = !entry.timer_running;
            entry.timer_running = true;
            spawn
        };

        if spawn_timer {
            trace!(topic = %topic, "Armed debounce timer");
            let bus = self.clone();
            tokio::spawn(async move {
                bus.run_timer(topic).await;
            });
        }
    }

    /// Wait out the quiet period for a topic, then dispatch the latest
    /// payload. The deadline may move while we sleep; loop until it
    /// holds still.
    async fn run_timer(self: Arc<Self>, topic: Topic) {
        loop {
            let deadline = {
                let pending = self.pending.lock().expect("lock poisoned");
                match pending.get(&topic) {
                    Some(entry) => entry.deadline,
                    None => return,
                }
            };
            sleep_until(deadline).await;

            let ready = {
                let mut pending = self.pending.lock().expect("lock poisoned");
                match pending.get(&topic) {
                    Some(entry) if Instant::now() >= entry.deadline => {
                        pending.remove(&topic).map(|entry| entry.payload)
                    }
                    Some(_) => None, // deadline moved, keep waiting
                    None => return,
                }
            };

            if let Some(payload) = ready {
                debug!(topic = %topic, "Debounce window elapsed, dispatching");
                self.dispatch(topic, &payload);
                return;
            }
        }
    }

    fn dispatch(&self, topic: Topic, payload: &EventPayload) {
        let handlers: Vec<Handler> = {
            let registry = self.registry.lock().expect("lock poisoned");
            registry
                .handlers
                .iter()
                .filter(|h| h.topic == topic)
                .map(|h| h.handler.clone())
                .collect()
        };
        for handler in handlers {
            handler(topic, payload);
        }
    }

    /// Whether a debounced emission is still pending (tests).
    pub fn has_pending(&self, topic: Topic) -> bool {
        self.pending
            .lock()
            .expect("lock poisoned")
            .contains_key(&topic)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn payload_with_detail(detail: serde_json::Value) -> EventPayload {
        EventPayload {
            detail,
            ..EventPayload::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn burst_coalesces_to_one_trailing_dispatch() {
        let bus = Arc::new(EventBus::new());
        let fired = Arc::new(Mutex::new(Vec::new()));
        let fired_clone = fired.clone();

        bus.on(Topic::WalletMutated, move |_, payload| {
            fired_clone
                .lock()
                .unwrap()
                .push(payload.detail.clone());
        });

        // t=0ms and t=100ms, 300ms window.
        bus.emit(Topic::WalletMutated, payload_with_detail(json!("first")));
        tokio::time::advance(Duration::from_millis(100)).await;
        bus.emit(Topic::WalletMutated, payload_with_detail(json!("second")));

        // At t=350ms (window from the first emit elapsed, not the
        // second) nothing has fired yet.
        tokio::time::advance(Duration::from_millis(250)).await;
        assert!(fired.lock().unwrap().is_empty());

        // At t>=400ms exactly one dispatch, carrying the later payload.
        tokio::time::advance(Duration::from_millis(60)).await;
        tokio::task::yield_now().await;
        let seen = fired.lock().unwrap().clone();
        assert_eq!(seen, vec![json!("second")]);
        assert!(!bus.has_pending(Topic::WalletMutated));
    }

    #[tokio::test(start_paused = true)]
    async fn separate_bursts_fire_separately() {
        let bus = Arc::new(EventBus::new());
        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = count.clone();
        bus.on(Topic::MessageSent, move |_, _| {
            count_clone.fetch_add(1, Ordering::SeqCst);
        });

        bus.emit(Topic::MessageSent, EventPayload::default());
        tokio::time::advance(Duration::from_millis(350)).await;
        tokio::task::yield_now().await;
        assert_eq!(count.load(Ordering::SeqCst), 1);

        bus.emit(Topic::MessageSent, EventPayload::default());
        tokio::time::advance(Duration::from_millis(350)).await;
        tokio::task::yield_now().await;
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn topics_debounce_independently() {
        let bus = Arc::new(EventBus::new());
        let count = Arc::new(AtomicUsize::new(0));
        for topic in [Topic::MessageSent, Topic::WalletMutated] {
            let count_clone = count.clone();
            bus.on(topic, move |_, _| {
                count_clone.fetch_add(1, Ordering::SeqCst);
            });
        }

        bus.emit(Topic::MessageSent, EventPayload::default());
        bus.emit(Topic::WalletMutated, EventPayload::default());
        tokio::time::advance(Duration::from_millis(350)).await;
        tokio::task::yield_now().await;
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn profile_switch_dispatches_inline() {
        let bus = Arc::new(EventBus::new());
        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = count.clone();
        bus.on(Topic::ProfileSwitched, move |_, _| {
            count_clone.fetch_add(1, Ordering::SeqCst);
        });

        bus.emit(Topic::ProfileSwitched, EventPayload::default());
        // No timer involved; already dispatched.
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn off_removes_handler() {
        let bus = Arc::new(EventBus::new());
        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = count.clone();
        let id = bus.on(Topic::MessageSent, move |_, _| {
            count_clone.fetch_add(1, Ordering::SeqCst);
        });
        bus.off(id);

        bus.emit(Topic::MessageSent, EventPayload::default());
        tokio::time::advance(Duration::from_millis(350)).await;
        tokio::task::yield_now().await;
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn custom_window_is_respected() {
        let bus = Arc::new(EventBus::with_window(Duration::from_millis(50)));
        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = count.clone();
        bus.on(Topic::MessageSent, move |_, _| {
            count_clone.fetch_add(1, Ordering::SeqCst);
        });

        bus.emit(Topic::MessageSent, EventPayload::default());
        tokio::time::advance(Duration::from_millis(60)).await;
        tokio::task::yield_now().await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
