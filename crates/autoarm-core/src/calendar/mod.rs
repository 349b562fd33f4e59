// ── Calendar tracking ──
//
// Polls a calendar source, maps event text onto alarm states and keeps one
// `TrackedCalendarEvent` per matched event. The engine is reached only
// through `CalendarDelegate`, never owned.

pub mod event;

use std::sync::{Arc, Weak};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use indexmap::IndexMap;
use regex::Regex;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::CalendarConfig;
use crate::error::CoreError;
use crate::host::{CalendarSource, Clock, Scheduler, Subscription, job};
use crate::model::{AlarmState, CalendarEvent};

pub use event::{EventStatus, TrackedCalendarEvent};

/// Look-behind margin of the poll window.
const POLL_LOOKBEHIND_MINS: i64 = 15;
/// Look-ahead margin added past the next poll.
const POLL_LOOKAHEAD_MARGIN_MINS: i64 = 5;

/// Engine callbacks a calendar needs.
#[async_trait]
pub trait CalendarDelegate: Send + Sync {
    async fn armed_state(&self) -> AlarmState;

    async fn on_event_start(&self, event: &TrackedCalendarEvent);

    async fn on_event_end(&self, event: &TrackedCalendarEvent);
}

/// Ports a calendar uses.
#[derive(Clone)]
pub struct CalendarPorts {
    pub source: Arc<dyn CalendarSource>,
    pub scheduler: Arc<dyn Scheduler>,
    pub clock: Arc<dyn Clock>,
}

pub struct TrackedCalendar {
    config: CalendarConfig,
    patterns: IndexMap<AlarmState, Vec<Regex>>,
    ports: CalendarPorts,
    delegate: Arc<dyn CalendarDelegate>,
    events: Mutex<IndexMap<String, Arc<TrackedCalendarEvent>>>,
    poller: Mutex<Option<Subscription>>,
}

impl TrackedCalendar {
    /// Compile the calendar's patterns. Patterns match from the start of
    /// the text.
    pub fn new(
        config: CalendarConfig,
        ports: CalendarPorts,
        delegate: Arc<dyn CalendarDelegate>,
    ) -> Result<Arc<Self>, CoreError> {
        let patterns = compile_patterns(&config.state_patterns)?;
        Ok(Arc::new(Self {
            config,
            patterns,
            ports,
            delegate,
            events: Mutex::new(IndexMap::new()),
            poller: Mutex::new(None),
        }))
    }

    pub fn id(&self) -> &str {
        &self.config.entity_id
    }

    pub fn config(&self) -> &CalendarConfig {
        &self.config
    }

    /// Poll once now and then on the configured interval.
    pub async fn initialize(self: &Arc<Self>) -> Result<usize, CoreError> {
        let first = self.poll().await;
        let weak = Arc::downgrade(self);
        let sub = self
            .ports
            .scheduler
            .schedule_periodic(self.config.poll_period(), poll_job(weak));
        *self.poller.lock().await = Some(sub);
        info!(
            calendar = %self.id(),
            poll_minutes = self.config.poll_interval,
            "calendar tracking started"
        );
        first
    }

    /// State the event text maps to; first configured state wins.
    pub fn match_event(&self, event: &CalendarEvent) -> Option<AlarmState> {
        let texts = std::iter::once(event.summary.as_str()).chain(
            self.config
                .match_description
                .then_some(event.description.as_deref())
                .flatten(),
        );
        for text in texts {
            for (state, patterns) in &self.patterns {
                if patterns.iter().any(|re| re.is_match(text)) {
                    return Some(*state);
                }
            }
        }
        None
    }

    /// Fetch events in the poll window and start tracking new matches.
    /// Returns how many events were newly tracked.
    pub async fn poll(&self) -> Result<usize, CoreError> {
        let now = self.ports.clock.now();
        let start = now
            .checked_sub_signed(Duration::minutes(POLL_LOOKBEHIND_MINS))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        let end = Duration::from_std(self.config.poll_period())
            .ok()
            .and_then(|ahead| ahead.checked_add(&Duration::minutes(POLL_LOOKAHEAD_MARGIN_MINS)))
            .and_then(|ahead| now.checked_add_signed(ahead))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);

        let events = self
            .ports
            .source
            .get_events(self.id(), start, end)
            .await
            .map_err(|e| CoreError::Calendar {
                calendar: self.id().to_owned(),
                message: e.to_string(),
            })?;
        debug!(calendar = %self.id(), count = events.len(), "calendar polled");

        let mut added = 0;
        for event in events {
            let Some(target) = self.match_event(&event) else {
                continue;
            };
            let id = event.tracking_id(self.id());
            let tracked = {
                let mut tracked_events = self.events.lock().await;
                if tracked_events.contains_key(&id) {
                    continue;
                }
                let tracked =
                    TrackedCalendarEvent::new(self.id(), event, target, self.delegate.clone());
                tracked_events.insert(id, tracked.clone());
                tracked
            };
            info!(
                calendar = %self.id(),
                event = %tracked.id(),
                summary = %tracked.event().summary,
                target = %target,
                "tracking calendar event"
            );
            tracked
                .initialize(self.ports.clock.now(), self.ports.scheduler.as_ref())
                .await;
            added += 1;
        }
        Ok(added)
    }

    /// Drop events that are neither current nor future, firing the end
    /// callback for any that never ended. Returns how many were dropped.
    pub async fn prune(&self) -> usize {
        let now = self.ports.clock.now();
        let stale: Vec<Arc<TrackedCalendarEvent>> = {
            let mut events = self.events.lock().await;
            let stale_ids: Vec<String> = events
                .values()
                .filter(|e| !e.is_current(now) && !e.is_future(now))
                .map(|e| e.id().to_owned())
                .collect();
            stale_ids
                .iter()
                .filter_map(|id| events.shift_remove(id))
                .collect()
        };
        for event in &stale {
            debug!(calendar = %self.id(), event = %event.id(), "pruning calendar event");
            event.end().await;
        }
        stale.len()
    }

    /// Events in progress right now, in tracking order.
    pub async fn active_events(&self) -> Vec<Arc<TrackedCalendarEvent>> {
        let now = self.ports.clock.now();
        self.events
            .lock()
            .await
            .values()
            .filter(|e| e.is_current(now))
            .cloned()
            .collect()
    }

    pub async fn has_active_event(&self) -> bool {
        !self.active_events().await.is_empty()
    }

    pub async fn tracked_events(&self) -> Vec<Arc<TrackedCalendarEvent>> {
        self.events.lock().await.values().cloned().collect()
    }

    /// Stop polling and cancel every event timer, without end callbacks.
    pub async fn shutdown(&self) {
        if let Some(mut poller) = self.poller.lock().await.take() {
            poller.cancel();
        }
        let events: Vec<_> = self.events.lock().await.drain(..).map(|(_, e)| e).collect();
        for event in events {
            event.cancel_listeners().await;
        }
        debug!(calendar = %self.id(), "calendar tracking stopped");
    }
}

fn compile_patterns(
    raw: &IndexMap<AlarmState, Vec<String>>,
) -> Result<IndexMap<AlarmState, Vec<Regex>>, CoreError> {
    raw.iter()
        .map(|(state, patterns)| {
            let compiled = patterns
                .iter()
                .map(|p| {
                    Regex::new(&format!("^(?:{p})")).map_err(|e| CoreError::InvalidPattern {
                        state: state.to_string(),
                        pattern: p.clone(),
                        reason: e.to_string(),
                    })
                })
                .collect::<Result<Vec<_>, _>>()?;
            Ok((*state, compiled))
        })
        .collect()
}

fn poll_job(calendar: Weak<TrackedCalendar>) -> crate::host::Job {
    job(move || {
        let calendar = calendar.clone();
        async move {
            let Some(calendar) = calendar.upgrade() else {
                return;
            };
            if let Err(e) = calendar.poll().await {
                warn!(calendar = %calendar.id(), error = %e, "calendar poll failed");
            }
        }
    })
}
