// ── Runtime engine configuration ──
//
// These types describe *what* the engine reconciles and how. They never
// touch disk: the config crate (or a test) builds an `ArmerConfig` and
// hands it to the `Armer`.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::NaiveTime;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use strum::{AsRefStr, Display, EnumIter, EnumString};

use crate::condition::{Condition, default_transitions};
use crate::model::{AlarmState, ChangeSource};

pub const DEFAULT_ARM_AWAY_DELAY_SECS: u64 = 180;
pub const DEFAULT_INTERVENTION_TTL_MINS: u64 = 60;
pub const DEFAULT_THROTTLE_SECS: u64 = 60;
pub const DEFAULT_THROTTLE_CALLS: usize = 6;
pub const DEFAULT_POLL_INTERVAL_MINS: u64 = 30;
/// One day.
pub const MAX_POLL_INTERVAL_MINS: u64 = 24 * 60;
/// One year.
pub const MAX_INTERVENTION_TTL_MINS: u64 = 365 * 24 * 60;

// ── Calendar no-event policy ─────────────────────────────────────

/// What happens when no calendar event is active.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum NoEventMode {
    /// Fall back to the transition rules.
    #[default]
    Auto,
    /// Leave the panel alone.
    Manual,
    /// Always arm to this state.
    Fixed(AlarmState),
}

/// Where a no-event decision is being made.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoEventTrigger {
    /// A general reconciliation with no calendar event active.
    Reconcile,
    /// The last active calendar event just ended.
    EventEnded { previous: Option<AlarmState> },
}

/// The outcome of a no-event decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoEventAction {
    /// Leave the current state as it is.
    Keep,
    /// Arm straight to a state.
    Arm(AlarmState),
    /// Run the transition rules, first marking the panel pending when
    /// `via_pending` is set.
    Reconcile { via_pending: bool },
}

impl NoEventMode {
    pub fn decide(self, trigger: NoEventTrigger) -> NoEventAction {
        match (self, trigger) {
            (Self::Fixed(state), _) => NoEventAction::Arm(state),
            (Self::Manual, NoEventTrigger::Reconcile) => NoEventAction::Keep,
            (Self::Manual, NoEventTrigger::EventEnded { previous }) => {
                previous.map_or(NoEventAction::Keep, NoEventAction::Arm)
            }
            (Self::Auto, NoEventTrigger::Reconcile) => {
                NoEventAction::Reconcile { via_pending: false }
            }
            (Self::Auto, NoEventTrigger::EventEnded { .. }) => {
                NoEventAction::Reconcile { via_pending: true }
            }
        }
    }
}

impl fmt::Display for NoEventMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Auto => f.write_str("auto"),
            Self::Manual => f.write_str("manual"),
            Self::Fixed(state) => write!(f, "{state}"),
        }
    }
}

impl FromStr for NoEventMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "manual" => Ok(Self::Manual),
            other => AlarmState::parse(other)
                .map(Self::Fixed)
                .ok_or_else(|| format!("expected auto, manual or an alarm state, got {s:?}")),
        }
    }
}

impl TryFrom<String> for NoEventMode {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<NoEventMode> for String {
    fn from(mode: NoEventMode) -> Self {
        mode.to_string()
    }
}

/// Which event wins when several are active at once.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ActiveEventPolicy {
    /// First event in calendar order, then source order.
    #[default]
    First,
    /// The event that started most recently.
    LatestStart,
}

// ── Sections ─────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalendarConfig {
    pub entity_id: String,
    /// Minutes between polls.
    pub poll_interval: u64,
    /// Target state to patterns, in priority order.
    pub state_patterns: IndexMap<AlarmState, Vec<String>>,
    /// Also match patterns against the event description.
    pub match_description: bool,
}

impl CalendarConfig {
    pub fn new(entity_id: impl Into<String>) -> Self {
        Self {
            entity_id: entity_id.into(),
            poll_interval: DEFAULT_POLL_INTERVAL_MINS,
            state_patterns: default_state_patterns(),
            match_description: false,
        }
    }

    pub fn with_patterns(mut self, state: AlarmState, patterns: &[&str]) -> Self {
        self.state_patterns
            .insert(state, patterns.iter().map(|p| (*p).to_owned()).collect());
        self
    }

    pub fn poll_period(&self) -> Duration {
        Duration::from_secs(self.poll_interval.clamp(1, MAX_POLL_INTERVAL_MINS) * 60)
    }
}

/// Patterns used when a calendar names none.
pub fn default_state_patterns() -> IndexMap<AlarmState, Vec<String>> {
    IndexMap::from([
        (AlarmState::ArmedAway, vec!["Away".to_owned()]),
        (AlarmState::Disarmed, vec!["Disarmed".to_owned()]),
        (AlarmState::ArmedHome, vec!["Home".to_owned()]),
        (AlarmState::ArmedVacation, vec!["Vacation".to_owned()]),
        (AlarmState::ArmedNight, vec!["Night".to_owned()]),
    ])
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CalendarControl {
    pub no_event_mode: NoEventMode,
    pub active_event: ActiveEventPolicy,
    pub calendars: Vec<CalendarConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OccupancyConfig {
    pub entity_ids: Vec<String>,
    pub day_default: Option<AlarmState>,
    pub night_default: Option<AlarmState>,
    /// Seconds to wait before reconciling towards a target state.
    pub delay_time: IndexMap<AlarmState, u64>,
}

impl Default for OccupancyConfig {
    fn default() -> Self {
        Self {
            entity_ids: Vec::new(),
            day_default: Some(AlarmState::ArmedHome),
            night_default: None,
            delay_time: IndexMap::new(),
        }
    }
}

/// Physical or virtual button roles.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    EnumIter,
    AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ButtonAction {
    Reset,
    Away,
    Disarm,
    Vacation,
}

impl ButtonAction {
    /// State the button asks for; reset asks for a recalculation instead.
    pub fn target(self) -> Option<AlarmState> {
        match self {
            Self::Reset => None,
            Self::Away => Some(AlarmState::ArmedAway),
            Self::Disarm => Some(AlarmState::Disarmed),
            Self::Vacation => Some(AlarmState::ArmedVacation),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ButtonConfig {
    pub entity_ids: Vec<String>,
    /// Seconds before the button takes effect.
    pub delay: Option<u64>,
}

/// A notification routing profile.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotifyProfile {
    pub service: Option<String>,
    pub targets: Vec<String>,
    /// Only for changes from these sources; empty means any.
    pub source: Vec<ChangeSource>,
    /// Only when the from or to state is listed; empty means any.
    pub state: Vec<AlarmState>,
    pub supernotify: bool,
    pub scenario: Vec<String>,
    pub data: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NotifyConfig {
    pub action: Option<String>,
    pub targets: Vec<String>,
    pub profiles: IndexMap<String, NotifyProfile>,
}

// ── ArmerConfig ──────────────────────────────────────────────────

/// Everything the engine needs, already validated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArmerConfig {
    pub alarm_panel: String,
    /// Local time before which sunrise does not reconcile.
    pub sunrise_cutoff: Option<NaiveTime>,
    /// Seconds before the away button arms.
    pub arm_away_delay: u64,
    /// Minutes an intervention is remembered.
    pub intervention_ttl: u64,
    pub throttle_seconds: u64,
    pub throttle_calls: usize,
    pub occupancy: OccupancyConfig,
    pub calendar_control: CalendarControl,
    pub buttons: IndexMap<ButtonAction, ButtonConfig>,
    pub notify: NotifyConfig,
    pub transitions: IndexMap<AlarmState, Condition>,
}

impl ArmerConfig {
    pub fn new(alarm_panel: impl Into<String>) -> Self {
        Self {
            alarm_panel: alarm_panel.into(),
            sunrise_cutoff: None,
            arm_away_delay: DEFAULT_ARM_AWAY_DELAY_SECS,
            intervention_ttl: DEFAULT_INTERVENTION_TTL_MINS,
            throttle_seconds: DEFAULT_THROTTLE_SECS,
            throttle_calls: DEFAULT_THROTTLE_CALLS,
            occupancy: OccupancyConfig::default(),
            calendar_control: CalendarControl::default(),
            buttons: IndexMap::new(),
            notify: NotifyConfig::default(),
            transitions: default_transitions(),
        }
    }

    pub fn with_occupants(mut self, entity_ids: &[&str]) -> Self {
        self.occupancy.entity_ids = entity_ids.iter().map(|e| (*e).to_owned()).collect();
        self
    }

    pub fn with_calendar(mut self, calendar: CalendarConfig) -> Self {
        self.calendar_control.calendars.push(calendar);
        self
    }

    pub fn with_button(mut self, action: ButtonAction, entity_id: &str) -> Self {
        self.buttons
            .entry(action)
            .or_default()
            .entity_ids
            .push(entity_id.to_owned());
        self
    }

    pub fn throttle_window(&self) -> Duration {
        Duration::from_secs(self.throttle_seconds)
    }

    pub fn intervention_ttl(&self) -> chrono::Duration {
        let minutes = self.intervention_ttl.min(MAX_INTERVENTION_TTL_MINS);
        i64::try_from(minutes)
            .ok()
            .and_then(chrono::Duration::try_minutes)
            .unwrap_or(chrono::Duration::MAX)
    }

    /// Delay before a button takes effect.
    pub fn button_delay(&self, action: ButtonAction) -> Duration {
        let configured = self.buttons.get(&action).and_then(|b| b.delay);
        let secs = match (action, configured) {
            (_, Some(secs)) => secs,
            (ButtonAction::Away, None) => self.arm_away_delay,
            (_, None) => 0,
        };
        Duration::from_secs(secs)
    }

    pub fn occupancy_delay(&self, target: AlarmState) -> Option<Duration> {
        self.occupancy
            .delay_time
            .get(&target)
            .filter(|secs| **secs > 0)
            .map(|secs| Duration::from_secs(*secs))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn out_of_range_durations_are_clamped() {
        let mut config = ArmerConfig::new("alarm_control_panel.home");
        config.intervention_ttl = u64::MAX;
        assert_eq!(
            config.intervention_ttl(),
            chrono::Duration::minutes(i64::try_from(MAX_INTERVENTION_TTL_MINS).unwrap())
        );

        let mut calendar = CalendarConfig::new("calendar.house");
        calendar.poll_interval = u64::MAX;
        assert_eq!(
            calendar.poll_period(),
            Duration::from_secs(MAX_POLL_INTERVAL_MINS * 60)
        );
        calendar.poll_interval = 0;
        assert_eq!(calendar.poll_period(), Duration::from_secs(60));
    }

    #[test]
    fn no_event_mode_parses_keywords_and_states() {
        assert_eq!("auto".parse::<NoEventMode>().unwrap(), NoEventMode::Auto);
        assert_eq!("Manual".parse::<NoEventMode>().unwrap(), NoEventMode::Manual);
        assert_eq!(
            "armed_away".parse::<NoEventMode>().unwrap(),
            NoEventMode::Fixed(AlarmState::ArmedAway)
        );
        assert!("sometimes".parse::<NoEventMode>().is_err());
    }

    #[test]
    fn no_event_mode_round_trips_as_plain_string() {
        let json = serde_json::to_string(&NoEventMode::Fixed(AlarmState::Disarmed)).unwrap();
        assert_eq!(json, "\"disarmed\"");
    }

    #[test]
    fn decide_covers_both_call_sites() {
        use NoEventAction::{Arm, Keep, Reconcile};
        let ended = |previous| NoEventTrigger::EventEnded { previous };

        assert_eq!(
            NoEventMode::Auto.decide(NoEventTrigger::Reconcile),
            Reconcile { via_pending: false }
        );
        assert_eq!(NoEventMode::Auto.decide(ended(None)), Reconcile { via_pending: true });
        assert_eq!(NoEventMode::Manual.decide(NoEventTrigger::Reconcile), Keep);
        assert_eq!(
            NoEventMode::Manual.decide(ended(Some(AlarmState::ArmedHome))),
            Arm(AlarmState::ArmedHome)
        );
        assert_eq!(NoEventMode::Manual.decide(ended(None)), Keep);
        let fixed = NoEventMode::Fixed(AlarmState::ArmedAway);
        assert_eq!(fixed.decide(NoEventTrigger::Reconcile), Arm(AlarmState::ArmedAway));
        assert_eq!(fixed.decide(ended(None)), Arm(AlarmState::ArmedAway));
    }

    #[test]
    fn away_button_defaults_to_arm_away_delay() {
        let config = ArmerConfig::new("alarm_control_panel.home")
            .with_button(ButtonAction::Away, "binary_sensor.right")
            .with_button(ButtonAction::Reset, "binary_sensor.left");
        assert_eq!(config.button_delay(ButtonAction::Away), Duration::from_secs(180));
        assert_eq!(config.button_delay(ButtonAction::Reset), Duration::ZERO);
    }

    #[test]
    fn default_calendar_patterns_keep_priority_order() {
        let cal = CalendarConfig::new("calendar.house");
        let states: Vec<_> = cal.state_patterns.keys().copied().collect();
        assert_eq!(
            states,
            vec![
                AlarmState::ArmedAway,
                AlarmState::Disarmed,
                AlarmState::ArmedHome,
                AlarmState::ArmedVacation,
                AlarmState::ArmedNight,
            ]
        );
        assert_eq!(cal.poll_period(), Duration::from_secs(30 * 60));
    }
}
