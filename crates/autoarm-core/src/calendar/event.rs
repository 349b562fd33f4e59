// ── Tracked calendar event ──
//
// One matched event with its own start and end timers. Start and end each
// fire at most once; the status flag guards against a missed timer being
// replayed by the prune pass.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, OnceLock, Weak};

use chrono::{DateTime, Utc};
use serde::Serialize;
use strum::{AsRefStr, Display};
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::CalendarDelegate;
use crate::host::{Scheduler, Subscription, job};
use crate::model::{AlarmState, CalendarEvent, EventSummary};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display, AsRefStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum EventStatus {
    Pending,
    Started,
    Ended,
}

impl EventStatus {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::Pending,
            1 => Self::Started,
            _ => Self::Ended,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            Self::Pending => 0,
            Self::Started => 1,
            Self::Ended => 2,
        }
    }
}

pub struct TrackedCalendarEvent {
    id: String,
    calendar_id: String,
    event: CalendarEvent,
    target: AlarmState,
    previous_state: OnceLock<AlarmState>,
    status: AtomicU8,
    listeners: Mutex<Vec<Subscription>>,
    delegate: Arc<dyn CalendarDelegate>,
}

impl TrackedCalendarEvent {
    pub fn new(
        calendar_id: &str,
        event: CalendarEvent,
        target: AlarmState,
        delegate: Arc<dyn CalendarDelegate>,
    ) -> Arc<Self> {
        Arc::new(Self {
            id: event.tracking_id(calendar_id),
            calendar_id: calendar_id.to_owned(),
            event,
            target,
            previous_state: OnceLock::new(),
            status: AtomicU8::new(EventStatus::Pending.as_u8()),
            listeners: Mutex::new(Vec::new()),
            delegate,
        })
    }

    // ── Accessors ────────────────────────────────────────────────

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn calendar_id(&self) -> &str {
        &self.calendar_id
    }

    pub fn event(&self) -> &CalendarEvent {
        &self.event
    }

    /// State this event asks the panel to be in.
    pub fn target(&self) -> AlarmState {
        self.target
    }

    /// Panel state read just before the event started.
    pub fn previous_state(&self) -> Option<AlarmState> {
        self.previous_state.get().copied()
    }

    pub fn status(&self) -> EventStatus {
        EventStatus::from_u8(self.status.load(Ordering::SeqCst))
    }

    pub fn summary(&self) -> EventSummary {
        EventSummary::new(&self.calendar_id, &self.event)
    }

    pub fn is_current(&self, now: DateTime<Utc>) -> bool {
        self.status() != EventStatus::Ended && self.event.start <= now && now < self.event.end
    }

    pub fn is_future(&self, now: DateTime<Utc>) -> bool {
        self.status() != EventStatus::Ended && self.event.start > now
    }

    // ── Lifecycle ────────────────────────────────────────────────

    /// Bring the event in line with `now`: close it if already over, start
    /// it if already running, and schedule whatever is still ahead.
    pub async fn initialize(self: &Arc<Self>, now: DateTime<Utc>, scheduler: &dyn Scheduler) {
        if self.event.end <= now {
            debug!(event = %self.id, "event already over when matched");
            self.status
                .store(EventStatus::Ended.as_u8(), Ordering::SeqCst);
            return;
        }

        if self.event.start > now {
            let weak = Arc::downgrade(self);
            let sub = scheduler.schedule_once(self.event.start, event_job(weak, false));
            self.listeners.lock().await.push(sub);
        } else {
            self.start().await;
        }

        let weak = Arc::downgrade(self);
        let sub = scheduler.schedule_once(self.event.end, event_job(weak, true));
        self.listeners.lock().await.push(sub);
    }

    /// Fire the start callback, once.
    pub async fn start(&self) {
        if self.status.load(Ordering::SeqCst) != EventStatus::Pending.as_u8() {
            return;
        }
        let previous = self.delegate.armed_state().await;
        if self
            .status
            .compare_exchange(
                EventStatus::Pending.as_u8(),
                EventStatus::Started.as_u8(),
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_err()
        {
            return;
        }
        let _ = self.previous_state.set(previous);
        info!(
            event = %self.id,
            summary = %self.event.summary,
            target = %self.target,
            "calendar event started"
        );
        self.delegate.on_event_start(self).await;
    }

    /// Mark ended, cancel timers and fire the end callback, once.
    pub async fn end(&self) {
        let was = self
            .status
            .swap(EventStatus::Ended.as_u8(), Ordering::SeqCst);
        if was == EventStatus::Ended.as_u8() {
            return;
        }
        self.cancel_listeners().await;
        info!(event = %self.id, summary = %self.event.summary, "calendar event ended");
        self.delegate.on_event_end(self).await;
    }

    /// Cancel timers without firing any callback.
    pub async fn cancel_listeners(&self) {
        for mut sub in self.listeners.lock().await.drain(..) {
            sub.cancel();
        }
    }
}

impl PartialEq for TrackedCalendarEvent {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for TrackedCalendarEvent {}

impl std::fmt::Debug for TrackedCalendarEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrackedCalendarEvent")
            .field("id", &self.id)
            .field("summary", &self.event.summary)
            .field("target", &self.target)
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}

fn event_job(event: Weak<TrackedCalendarEvent>, is_end: bool) -> crate::host::Job {
    job(move || {
        let event = event.clone();
        async move {
            let Some(event) = event.upgrade() else {
                return;
            };
            if is_end {
                event.end().await;
            } else {
                event.start().await;
            }
        }
    })
}
