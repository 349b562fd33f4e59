// ── Domain model ──

pub mod alarm_state;
pub mod calendar;
pub mod intervention;
pub mod source;

pub use alarm_state::AlarmState;
pub use calendar::{CalendarEvent, EventSummary};
pub use intervention::{Intervention, InterventionLog};
pub use source::ChangeSource;
