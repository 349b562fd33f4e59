//! autoarm-core: alarm panel state reconciliation.
//!
//! The [`Armer`] decides which state an alarm control panel should be in
//! from occupancy, the sun, calendar events, button presses, mobile actions
//! and manual interventions, and commits it through a [`StateRegistry`].
//! Everything outside the engine is reached through the ports in [`host`],
//! and [`MemoryHost`] implements them in memory for tests and simulation.

pub mod armer;
pub mod calendar;
pub mod condition;
pub mod config;
pub mod error;
pub mod health;
pub mod host;
pub mod limiter;
pub mod model;
pub mod notify;
pub mod supervisor;

// ── Primary re-exports ──────────────────────────────────────────────
pub use armer::{Armer, CalculationRecord, Diagnostics};
pub use config::{
    ActiveEventPolicy, ArmerConfig, ButtonAction, ButtonConfig, CalendarConfig, CalendarControl,
    NoEventMode, NotifyConfig, NotifyProfile, OccupancyConfig,
};
pub use error::{CoreError, HostError};
pub use health::{HealthSnapshot, Stage};
pub use host::{
    Clock, EntityState, HostPorts, MemoryHost, StateRegistry, Subscription, SystemClock,
    TokioClock, TokioScheduler,
};
pub use limiter::Limiter;
pub use model::{AlarmState, CalendarEvent, ChangeSource, EventSummary, Intervention};
pub use supervisor::{ConfigLoader, NO_CHANGE, Supervisor};
