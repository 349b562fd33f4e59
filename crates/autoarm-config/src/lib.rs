//! On-disk configuration for autoarm.
//!
//! A TOML or YAML file plus `AUTOARM_*` environment overrides, merged by
//! figment over built-in defaults, then validated and translated into the
//! core [`ArmerConfig`]. The engine never reads files itself.

use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use chrono::NaiveTime;
use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml, Yaml},
};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use autoarm_core::condition::{Condition, ConditionEvaluator, ExpressionEvaluator, ValidationMode};
use autoarm_core::config::{
    DEFAULT_ARM_AWAY_DELAY_SECS, DEFAULT_INTERVENTION_TTL_MINS, DEFAULT_POLL_INTERVAL_MINS,
    DEFAULT_THROTTLE_CALLS, DEFAULT_THROTTLE_SECS, MAX_INTERVENTION_TTL_MINS,
    MAX_POLL_INTERVAL_MINS, default_state_patterns,
};
use autoarm_core::{
    ActiveEventPolicy, AlarmState, ArmerConfig, ButtonAction, ButtonConfig, CalendarConfig,
    CalendarControl, ChangeSource, NoEventMode, NotifyConfig, NotifyProfile, OccupancyConfig,
};

/// Prefix for environment overrides. Nested keys use `__`, so
/// `AUTOARM_OCCUPANCY__DEFAULT_STATE__DAY=disarmed` reaches
/// `occupancy.default_state.day`.
pub const ENV_PREFIX: &str = "AUTOARM_";

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("unsupported config format '{extension}' for {}", path.display())]
    UnsupportedFormat { path: PathBuf, extension: String },

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

fn invalid(field: impl Into<String>, reason: impl Into<String>) -> ConfigError {
    ConfigError::Validation {
        field: field.into(),
        reason: reason.into(),
    }
}

// ── File structs ────────────────────────────────────────────────────

/// One entity id or a list of them.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum EntityIds {
    One(String),
    Many(Vec<String>),
}

impl EntityIds {
    pub fn to_vec(&self) -> Vec<String> {
        match self {
            Self::One(id) => vec![id.clone()],
            Self::Many(ids) => ids.clone(),
        }
    }
}

impl Default for EntityIds {
    fn default() -> Self {
        Self::Many(Vec::new())
    }
}

/// Top-level configuration file.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// The `alarm_control_panel` entity to manage. Required.
    pub alarm_panel: Option<String>,

    /// Local time (`HH:MM[:SS]`) before which sunrise does not reconcile.
    pub sunrise_cutoff: Option<String>,

    #[serde(default = "default_arm_away_delay")]
    pub arm_away_delay: u64,

    /// Minutes an intervention is remembered.
    #[serde(default = "default_intervention_ttl")]
    pub intervention_ttl: u64,

    #[serde(default = "default_throttle_seconds")]
    pub throttle_seconds: u64,

    #[serde(default = "default_throttle_calls")]
    pub throttle_calls: usize,

    #[serde(default)]
    pub occupancy: Occupancy,

    #[serde(default)]
    pub calendar_control: CalendarControlSection,

    #[serde(default)]
    pub buttons: IndexMap<String, Button>,

    #[serde(default)]
    pub notify: Notify,

    /// Per-state overrides of the default transition rules.
    #[serde(default)]
    pub transitions: IndexMap<String, Condition>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            alarm_panel: None,
            sunrise_cutoff: None,
            arm_away_delay: default_arm_away_delay(),
            intervention_ttl: default_intervention_ttl(),
            throttle_seconds: default_throttle_seconds(),
            throttle_calls: default_throttle_calls(),
            occupancy: Occupancy::default(),
            calendar_control: CalendarControlSection::default(),
            buttons: IndexMap::new(),
            notify: Notify::default(),
            transitions: IndexMap::new(),
        }
    }
}

fn default_arm_away_delay() -> u64 {
    DEFAULT_ARM_AWAY_DELAY_SECS
}
fn default_intervention_ttl() -> u64 {
    DEFAULT_INTERVENTION_TTL_MINS
}
fn default_throttle_seconds() -> u64 {
    DEFAULT_THROTTLE_SECS
}
fn default_throttle_calls() -> usize {
    DEFAULT_THROTTLE_CALLS
}
fn default_poll_interval() -> u64 {
    DEFAULT_POLL_INTERVAL_MINS
}
fn default_no_event_mode() -> String {
    "auto".into()
}
fn default_active_event() -> String {
    "first".into()
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Occupancy {
    #[serde(default)]
    pub entity_id: EntityIds,

    #[serde(default)]
    pub default_state: DefaultState,

    /// Seconds to wait before reconciling towards each target state.
    #[serde(default)]
    pub delay_time: IndexMap<String, u64>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DefaultState {
    pub day: Option<String>,
    pub night: Option<String>,
}

impl Default for DefaultState {
    fn default() -> Self {
        Self {
            day: Some("armed_home".into()),
            night: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CalendarControlSection {
    /// `auto`, `manual` or an alarm state.
    #[serde(default = "default_no_event_mode")]
    pub no_event_mode: String,

    /// `first` or `latest_start`.
    #[serde(default = "default_active_event")]
    pub active_event: String,

    #[serde(default)]
    pub calendars: Vec<Calendar>,
}

impl Default for CalendarControlSection {
    fn default() -> Self {
        Self {
            no_event_mode: default_no_event_mode(),
            active_event: default_active_event(),
            calendars: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Calendar {
    pub entity_id: String,

    /// Minutes between polls.
    #[serde(default = "default_poll_interval")]
    pub poll_interval: u64,

    /// Regex patterns per alarm state. Empty means the built-in set.
    #[serde(default)]
    pub state_patterns: IndexMap<String, EntityIds>,

    #[serde(default)]
    pub match_description: bool,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Button {
    #[serde(default)]
    pub entity_id: EntityIds,

    /// Seconds before the press takes effect.
    pub delay: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Notify {
    /// Default notify action.
    pub action: Option<String>,

    #[serde(default)]
    pub targets: Vec<String>,

    #[serde(default)]
    pub profiles: IndexMap<String, Profile>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Profile {
    pub service: Option<String>,

    #[serde(default)]
    pub targets: Vec<String>,

    #[serde(default)]
    pub source: Vec<String>,

    #[serde(default)]
    pub state: Vec<String>,

    #[serde(default)]
    pub supernotify: bool,

    #[serde(default)]
    pub scenario: Vec<String>,

    #[serde(default)]
    pub data: Map<String, Value>,
}

// ── Config file path ────────────────────────────────────────────────

/// Resolve the default config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    ProjectDirs::from("io", "rhizomatics", "autoarm").map_or_else(
        || {
            let mut p = dirs_fallback();
            p.push("config.toml");
            p
        },
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

fn dirs_fallback() -> PathBuf {
    let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
    p.push(".config");
    p.push("autoarm");
    p
}

// ── Config loading ──────────────────────────────────────────────────

/// Defaults, then `path` (format by extension), then the environment.
/// A missing file contributes nothing.
pub fn figment(path: &Path) -> Result<Figment, ConfigError> {
    let base = Figment::new().merge(Serialized::defaults(Config::default()));
    let with_file = match path.extension().and_then(OsStr::to_str) {
        None | Some("toml") => base.merge(Toml::file(path)),
        Some("yaml" | "yml") => base.merge(Yaml::file(path)),
        Some(other) => {
            return Err(ConfigError::UnsupportedFormat {
                path: path.to_path_buf(),
                extension: other.to_owned(),
            });
        }
    };
    Ok(with_file.merge(Env::prefixed(ENV_PREFIX).split("__")))
}

/// Load the raw configuration from `path` and the environment.
pub fn load_from(path: &Path) -> Result<Config, ConfigError> {
    let config: Config = figment(path)?.extract()?;
    Ok(config)
}

/// Load the raw configuration from the default path.
pub fn load_config() -> Result<Config, ConfigError> {
    load_from(&config_path())
}

/// Load and validate in one go.
pub fn load_armer_config(path: &Path) -> Result<ArmerConfig, ConfigError> {
    to_armer_config(&load_from(path)?)
}

// ── Validation ──────────────────────────────────────────────────────

/// Validate `config` and translate it for the engine.
pub fn to_armer_config(config: &Config) -> Result<ArmerConfig, ConfigError> {
    let alarm_panel = config
        .alarm_panel
        .as_deref()
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .ok_or_else(|| invalid("alarm_panel", "required"))?;
    entity_id("alarm_panel", alarm_panel)?;

    let mut armer = ArmerConfig::new(alarm_panel);
    armer.sunrise_cutoff = config
        .sunrise_cutoff
        .as_deref()
        .map(|s| parse_time("sunrise_cutoff", s))
        .transpose()?;
    armer.arm_away_delay = config.arm_away_delay;
    if !(1..=MAX_INTERVENTION_TTL_MINS).contains(&config.intervention_ttl) {
        return Err(invalid(
            "intervention_ttl",
            format!("must be between 1 and {MAX_INTERVENTION_TTL_MINS} minutes"),
        ));
    }
    armer.intervention_ttl = config.intervention_ttl;
    armer.throttle_seconds = config.throttle_seconds;
    if config.throttle_calls == 0 {
        return Err(invalid("throttle_calls", "must be at least 1"));
    }
    armer.throttle_calls = config.throttle_calls;

    armer.occupancy = occupancy(&config.occupancy)?;
    armer.calendar_control = calendar_control(&config.calendar_control)?;
    armer.buttons = buttons(&config.buttons)?;
    armer.notify = notify(&config.notify)?;

    for (state, condition) in &config.transitions {
        let state = parse_state(&format!("transitions.{state}"), state)?;
        armer.transitions.insert(state, condition.clone());
    }
    Ok(armer)
}

/// Transition rules that only pass lenient validation, as readable
/// warnings. The engine still runs them.
pub fn transition_warnings(config: &ArmerConfig) -> Vec<String> {
    let evaluator = ExpressionEvaluator;
    config
        .transitions
        .iter()
        .filter_map(|(state, condition)| {
            evaluator
                .validate(condition, ValidationMode::Strict)
                .err()
                .map(|e| format!("transitions.{state}: {e}"))
        })
        .collect()
}

fn occupancy(section: &Occupancy) -> Result<OccupancyConfig, ConfigError> {
    let mut entity_ids = Vec::new();
    for id in section.entity_id.to_vec() {
        entity_ids.push(entity_id("occupancy.entity_id", &id)?);
    }
    let day_default = section
        .default_state
        .day
        .as_deref()
        .map(|s| parse_state("occupancy.default_state.day", s))
        .transpose()?;
    let night_default = section
        .default_state
        .night
        .as_deref()
        .map(|s| parse_state("occupancy.default_state.night", s))
        .transpose()?;
    let mut delay_time = IndexMap::new();
    for (state, secs) in &section.delay_time {
        let state = parse_state(&format!("occupancy.delay_time.{state}"), state)?;
        delay_time.insert(state, *secs);
    }
    Ok(OccupancyConfig {
        entity_ids,
        day_default,
        night_default,
        delay_time,
    })
}

fn calendar_control(section: &CalendarControlSection) -> Result<CalendarControl, ConfigError> {
    let no_event_mode = NoEventMode::from_str(&section.no_event_mode)
        .map_err(|reason| invalid("calendar_control.no_event_mode", reason))?;
    let active_event = ActiveEventPolicy::from_str(section.active_event.trim()).map_err(|_| {
        invalid(
            "calendar_control.active_event",
            format!("expected first or latest_start, got {:?}", section.active_event),
        )
    })?;

    let mut calendars = Vec::new();
    for (index, calendar) in section.calendars.iter().enumerate() {
        let field = format!("calendar_control.calendars[{index}]");
        let id = entity_id(&format!("{field}.entity_id"), &calendar.entity_id)?;
        if !(1..=MAX_POLL_INTERVAL_MINS).contains(&calendar.poll_interval) {
            return Err(invalid(
                format!("{field}.poll_interval"),
                format!("must be between 1 and {MAX_POLL_INTERVAL_MINS} minutes"),
            ));
        }
        let state_patterns = if calendar.state_patterns.is_empty() {
            default_state_patterns()
        } else {
            let mut patterns = IndexMap::new();
            for (state, list) in &calendar.state_patterns {
                let pattern_field = format!("{field}.state_patterns.{state}");
                let state = parse_state(&pattern_field, state)?;
                let list = list.to_vec();
                for pattern in &list {
                    regex::Regex::new(pattern)
                        .map_err(|e| invalid(&pattern_field, format!("{pattern:?}: {e}")))?;
                }
                patterns.insert(state, list);
            }
            patterns
        };
        calendars.push(CalendarConfig {
            entity_id: id,
            poll_interval: calendar.poll_interval,
            state_patterns,
            match_description: calendar.match_description,
        });
    }

    Ok(CalendarControl {
        no_event_mode,
        active_event,
        calendars,
    })
}

fn buttons(
    section: &IndexMap<String, Button>,
) -> Result<IndexMap<ButtonAction, ButtonConfig>, ConfigError> {
    let mut buttons = IndexMap::new();
    for (name, button) in section {
        let field = format!("buttons.{name}");
        let action = ButtonAction::from_str(name.trim()).map_err(|_| {
            invalid(
                &field,
                "expected one of reset, away, disarm or vacation",
            )
        })?;
        let mut entity_ids = Vec::new();
        for id in button.entity_id.to_vec() {
            entity_ids.push(entity_id(&format!("{field}.entity_id"), &id)?);
        }
        if entity_ids.is_empty() {
            return Err(invalid(format!("{field}.entity_id"), "required"));
        }
        buttons.insert(
            action,
            ButtonConfig {
                entity_ids,
                delay: button.delay,
            },
        );
    }
    Ok(buttons)
}

fn notify(section: &Notify) -> Result<NotifyConfig, ConfigError> {
    let mut profiles = IndexMap::new();
    for (name, profile) in &section.profiles {
        let field = format!("notify.profiles.{name}");
        let source = profile
            .source
            .iter()
            .map(|s| {
                ChangeSource::from_str(s.trim())
                    .map_err(|_| invalid(format!("{field}.source"), format!("unknown source {s:?}")))
            })
            .collect::<Result<Vec<_>, _>>()?;
        let state = profile
            .state
            .iter()
            .map(|s| parse_state(&format!("{field}.state"), s))
            .collect::<Result<Vec<_>, _>>()?;
        profiles.insert(
            name.clone(),
            NotifyProfile {
                service: profile.service.clone(),
                targets: profile.targets.clone(),
                source,
                state,
                supernotify: profile.supernotify,
                scenario: profile.scenario.clone(),
                data: profile.data.clone(),
            },
        );
    }
    Ok(NotifyConfig {
        action: section.action.clone(),
        targets: section.targets.clone(),
        profiles,
    })
}

// ── Field parsers ───────────────────────────────────────────────────

fn parse_state(field: &str, value: &str) -> Result<AlarmState, ConfigError> {
    AlarmState::parse(value).ok_or_else(|| invalid(field, format!("unknown alarm state {value:?}")))
}

fn parse_time(field: &str, value: &str) -> Result<NaiveTime, ConfigError> {
    NaiveTime::parse_from_str(value.trim(), "%H:%M:%S")
        .or_else(|_| NaiveTime::parse_from_str(value.trim(), "%H:%M"))
        .map_err(|_| invalid(field, format!("expected HH:MM or HH:MM:SS, got {value:?}")))
}

fn entity_id(field: &str, value: &str) -> Result<String, ConfigError> {
    let value = value.trim();
    match value.split_once('.') {
        Some((domain, object)) if !domain.is_empty() && !object.is_empty() => Ok(value.to_owned()),
        _ => Err(invalid(
            field,
            format!("expected an entity id like domain.name, got {value:?}"),
        )),
    }
}
