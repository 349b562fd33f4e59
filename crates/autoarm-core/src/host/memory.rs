// ── In-memory host ──
//
// A complete host platform held in memory: entity registry, event bus,
// calendar store, notification sink and issue list. State changes and bus
// events are dispatched by a single task, in order, one handler at a time,
// matching the cooperative delivery of a real automation platform.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::{Mutex, mpsc, oneshot};
use tracing::{debug, trace, warn};

use super::{
    Attributes, BELOW_HORIZON, CalendarSource, Clock, EntityState, EventBus, EventHandler,
    HostEvent, Issue, IssueReporter, NotifyPayload, NotifyService, SUN_ENTITY, StateChange,
    StateChangeHandler, StateRegistry, Subscription, SystemClock,
};
use crate::error::HostError;
use crate::model::CalendarEvent;

enum Dispatch {
    State(StateChange),
    Event(HostEvent),
    Barrier(oneshot::Sender<()>),
}

#[derive(Clone)]
enum Listener {
    State {
        entity_ids: Vec<String>,
        handler: StateChangeHandler,
    },
    Event {
        event_type: String,
        handler: EventHandler,
    },
}

/// A notification captured by the in-memory host.
#[derive(Debug, Clone, PartialEq)]
pub struct SentNotification {
    pub action: String,
    pub payload: NotifyPayload,
}

pub struct MemoryHost {
    clock: Arc<dyn Clock>,
    entities: DashMap<String, EntityState>,
    listeners: Arc<DashMap<u64, Listener>>,
    next_listener: AtomicU64,
    dispatch_tx: mpsc::UnboundedSender<Dispatch>,
    in_flight: Arc<AtomicUsize>,
    calendars: DashMap<String, Vec<CalendarEvent>>,
    notifications: Mutex<Vec<SentNotification>>,
    fail_notifications: AtomicBool,
    issues: DashMap<String, Issue>,
    writes: AtomicUsize,
}

impl MemoryHost {
    /// Create a host using the system clock. Must be called inside a Tokio
    /// runtime: the dispatcher task is spawned here.
    pub fn new() -> Arc<Self> {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Arc<Self> {
        let (dispatch_tx, dispatch_rx) = mpsc::unbounded_channel();
        let listeners = Arc::new(DashMap::new());
        let in_flight = Arc::new(AtomicUsize::new(0));
        tokio::spawn(dispatch_loop(
            dispatch_rx,
            Arc::clone(&listeners),
            Arc::clone(&in_flight),
        ));
        Arc::new(Self {
            clock,
            entities: DashMap::new(),
            listeners,
            next_listener: AtomicU64::new(1),
            dispatch_tx,
            in_flight,
            calendars: DashMap::new(),
            notifications: Mutex::new(Vec::new()),
            fail_notifications: AtomicBool::new(false),
            issues: DashMap::new(),
            writes: AtomicUsize::new(0),
        })
    }

    // ── Registry helpers ─────────────────────────────────────────

    /// Set an entity state as an outside actor would, replacing any
    /// attributes.
    pub fn set_state(&self, entity_id: &str, state: &str) {
        self.write(entity_id, state, Attributes::new());
    }

    /// Current raw state value of an entity.
    pub fn state_of(&self, entity_id: &str) -> Option<String> {
        self.entities.get(entity_id).map(|e| e.state.clone())
    }

    pub fn entity(&self, entity_id: &str) -> Option<EntityState> {
        self.entities.get(entity_id).map(|e| e.clone())
    }

    pub fn set_sun(&self, below_horizon: bool) {
        let state = if below_horizon {
            BELOW_HORIZON
        } else {
            "above_horizon"
        };
        self.write(SUN_ENTITY, state, Attributes::new());
    }

    /// Number of registry writes so far.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Fire a bus event to `on_event` listeners.
    pub fn fire_event(&self, event_type: &str, data: Value) {
        self.enqueue(Dispatch::Event(HostEvent {
            event_type: event_type.to_owned(),
            data,
        }));
    }

    /// Wait until every queued state change and event has been handled,
    /// including those queued by the handlers themselves.
    pub async fn settle(&self) {
        loop {
            let (tx, rx) = oneshot::channel();
            if self.dispatch_tx.send(Dispatch::Barrier(tx)).is_err() {
                return;
            }
            let _ = rx.await;
            if self.in_flight.load(Ordering::SeqCst) == 0 {
                return;
            }
        }
    }

    // ── Calendar helpers ─────────────────────────────────────────

    pub fn add_calendar_event(&self, calendar_id: &str, event: CalendarEvent) {
        self.calendars
            .entry(calendar_id.to_owned())
            .or_default()
            .push(event);
    }

    pub fn clear_calendar(&self, calendar_id: &str) {
        self.calendars.remove(calendar_id);
    }

    // ── Notification helpers ─────────────────────────────────────

    pub async fn notifications(&self) -> Vec<SentNotification> {
        self.notifications.lock().await.clone()
    }

    pub async fn clear_notifications(&self) {
        self.notifications.lock().await.clear();
    }

    /// Make every subsequent notification fail.
    pub fn fail_notifications(&self, fail: bool) {
        self.fail_notifications.store(fail, Ordering::SeqCst);
    }

    // ── Issue helpers ────────────────────────────────────────────

    pub fn issues(&self) -> Vec<Issue> {
        let mut issues: Vec<Issue> = self.issues.iter().map(|e| e.value().clone()).collect();
        issues.sort_by(|a, b| a.id.cmp(&b.id));
        issues
    }

    pub fn issue(&self, id: &str) -> Option<Issue> {
        self.issues.get(id).map(|e| e.clone())
    }

    // ── Internals ────────────────────────────────────────────────

    fn write(&self, entity_id: &str, state: &str, attributes: Attributes) {
        let now = self.clock.now();
        let old = self.entities.get(entity_id).map(|e| e.clone());
        let last_changed = match &old {
            Some(prev) if prev.state == state => prev.last_changed,
            _ => now,
        };
        let new = EntityState {
            state: state.to_owned(),
            attributes,
            last_changed,
        };
        self.entities.insert(entity_id.to_owned(), new.clone());
        self.writes.fetch_add(1, Ordering::SeqCst);
        trace!(entity_id, state, "registry write");
        self.enqueue(Dispatch::State(StateChange {
            entity_id: entity_id.to_owned(),
            old,
            new: Some(new),
        }));
    }

    fn enqueue(&self, dispatch: Dispatch) {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        if self.dispatch_tx.send(dispatch).is_err() {
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            warn!("dispatcher stopped, dropping event");
        }
    }

    fn subscribe(&self, listener: Listener) -> Subscription {
        let id = self.next_listener.fetch_add(1, Ordering::SeqCst);
        self.listeners.insert(id, listener);
        let listeners = Arc::downgrade(&self.listeners);
        Subscription::new(move || {
            if let Some(listeners) = listeners.upgrade() {
                listeners.remove(&id);
            }
        })
    }
}

async fn dispatch_loop(
    mut rx: mpsc::UnboundedReceiver<Dispatch>,
    listeners: Arc<DashMap<u64, Listener>>,
    in_flight: Arc<AtomicUsize>,
) {
    while let Some(dispatch) = rx.recv().await {
        match dispatch {
            Dispatch::Barrier(done) => {
                let _ = done.send(());
                continue;
            }
            Dispatch::State(change) => {
                for handler in matching_state_handlers(&listeners, &change.entity_id) {
                    handler(change.clone()).await;
                }
            }
            Dispatch::Event(event) => {
                for handler in matching_event_handlers(&listeners, &event.event_type) {
                    handler(event.clone()).await;
                }
            }
        }
        in_flight.fetch_sub(1, Ordering::SeqCst);
    }
    debug!("memory host dispatcher stopped");
}

fn matching_state_handlers(
    listeners: &DashMap<u64, Listener>,
    entity_id: &str,
) -> Vec<StateChangeHandler> {
    let mut found: Vec<(u64, StateChangeHandler)> = listeners
        .iter()
        .filter_map(|entry| match entry.value() {
            Listener::State {
                entity_ids,
                handler,
            } if entity_ids.iter().any(|id| id == entity_id) => {
                Some((*entry.key(), Arc::clone(handler)))
            }
            _ => None,
        })
        .collect();
    found.sort_by_key(|(id, _)| *id);
    found.into_iter().map(|(_, handler)| handler).collect()
}

fn matching_event_handlers(
    listeners: &DashMap<u64, Listener>,
    event_type: &str,
) -> Vec<EventHandler> {
    let mut found: Vec<(u64, EventHandler)> = listeners
        .iter()
        .filter_map(|entry| match entry.value() {
            Listener::Event {
                event_type: wanted,
                handler,
            } if wanted == event_type => Some((*entry.key(), Arc::clone(handler))),
            _ => None,
        })
        .collect();
    found.sort_by_key(|(id, _)| *id);
    found.into_iter().map(|(_, handler)| handler).collect()
}

// ── Port implementations ─────────────────────────────────────────

#[async_trait]
impl StateRegistry for MemoryHost {
    async fn get(&self, entity_id: &str) -> Option<EntityState> {
        self.entities.get(entity_id).map(|e| e.clone())
    }

    async fn set(
        &self,
        entity_id: &str,
        state: &str,
        attributes: Attributes,
    ) -> Result<(), HostError> {
        self.write(entity_id, state, attributes);
        Ok(())
    }
}

impl EventBus for MemoryHost {
    fn on_state_change(&self, entity_ids: &[String], handler: StateChangeHandler) -> Subscription {
        self.subscribe(Listener::State {
            entity_ids: entity_ids.to_vec(),
            handler,
        })
    }

    fn on_event(&self, event_type: &str, handler: EventHandler) -> Subscription {
        self.subscribe(Listener::Event {
            event_type: event_type.to_owned(),
            handler,
        })
    }
}

#[async_trait]
impl CalendarSource for MemoryHost {
    async fn get_events(
        &self,
        calendar_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<CalendarEvent>, HostError> {
        let Some(events) = self.calendars.get(calendar_id) else {
            return Err(HostError::CalendarUnavailable {
                calendar: calendar_id.to_owned(),
                reason: "no such calendar".into(),
            });
        };
        let mut matched: Vec<CalendarEvent> = events
            .iter()
            .filter(|ev| ev.overlaps(start, end))
            .cloned()
            .collect();
        matched.sort_by_key(|ev| ev.start);
        Ok(matched)
    }
}

#[async_trait]
impl NotifyService for MemoryHost {
    async fn send(&self, action: &str, payload: NotifyPayload) -> Result<(), HostError> {
        if self.fail_notifications.load(Ordering::SeqCst) {
            return Err(HostError::NotifyFailed {
                action: action.to_owned(),
                reason: "delivery failure injected".into(),
            });
        }
        self.notifications.lock().await.push(SentNotification {
            action: action.to_owned(),
            payload,
        });
        Ok(())
    }
}

impl IssueReporter for MemoryHost {
    fn raise_issue(&self, issue: Issue) {
        debug!(id = %issue.id, severity = %issue.severity, "issue raised");
        self.issues.insert(issue.id.clone(), issue);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn recording_handler(seen: &Arc<Mutex<Vec<String>>>) -> StateChangeHandler {
        let seen = seen.clone();
        Arc::new(move |change: StateChange| {
            let seen = seen.clone();
            Box::pin(async move {
                let state = change.new.map(|s| s.state).unwrap_or_default();
                seen.lock().await.push(format!("{}={state}", change.entity_id));
            })
        })
    }

    #[tokio::test]
    async fn state_changes_reach_matching_listeners_in_order() {
        let host = MemoryHost::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let _sub = host.on_state_change(&["person.a".to_owned()], recording_handler(&seen));

        host.set_state("person.a", "home");
        host.set_state("person.b", "home");
        host.set_state("person.a", "not_home");
        host.settle().await;

        assert_eq!(
            *seen.lock().await,
            vec!["person.a=home".to_owned(), "person.a=not_home".to_owned()]
        );
    }

    #[tokio::test]
    async fn cancelled_listener_stops_receiving() {
        let host = MemoryHost::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut sub = host.on_state_change(&["person.a".to_owned()], recording_handler(&seen));
        sub.cancel();

        host.set_state("person.a", "home");
        host.settle().await;
        assert!(seen.lock().await.is_empty());
    }

    #[tokio::test]
    async fn calendar_query_filters_by_overlap() {
        let host = MemoryHost::new();
        let now = Utc::now();
        host.add_calendar_event(
            "calendar.house",
            CalendarEvent::new("Later", now + Duration::days(3), now + Duration::days(4)),
        );
        host.add_calendar_event(
            "calendar.house",
            CalendarEvent::new("Now", now - Duration::hours(1), now + Duration::hours(1)),
        );

        let events = host
            .get_events("calendar.house", now, now + Duration::hours(2))
            .await
            .unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].summary, "Now");
        assert!(host.get_events("calendar.none", now, now).await.is_err());
    }

    #[tokio::test]
    async fn notification_failure_can_be_injected() {
        let host = MemoryHost::new();
        host.fail_notifications(true);
        let result = host.send("notify.mobile", NotifyPayload::default()).await;
        assert!(matches!(result, Err(HostError::NotifyFailed { .. })));
        assert!(host.notifications().await.is_empty());
    }
}
