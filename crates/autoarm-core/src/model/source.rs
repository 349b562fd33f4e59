// ── Change sources ──
//
// Attribution for every state change and intervention.

use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumIter, EnumString};

/// What caused a state change or intervention.
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
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum ChangeSource {
    Calendar,
    Mobile,
    Occupancy,
    AlarmPanel,
    Button,
    Action,
    Sunrise,
    Sunset,
    Zombification,
    Startup,
    Internal,
    Notify,
}

impl ChangeSource {
    /// Sources whose reconciliations override earlier manual interventions.
    pub fn overrides_interventions(self) -> bool {
        matches!(self, Self::Calendar | Self::Occupancy | Self::Sunset)
    }

    /// Source name with a leading capital, as used in notification text.
    pub fn capitalized(self) -> String {
        let name = self.as_ref();
        let mut chars = name.chars();
        match chars.next() {
            Some(first) => first.to_uppercase().chain(chars).collect(),
            None => String::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capitalizes_first_letter_only() {
        assert_eq!(ChangeSource::Button.capitalized(), "Button");
        assert_eq!(ChangeSource::AlarmPanel.capitalized(), "Alarm_panel");
    }

    #[test]
    fn calendar_occupancy_and_sunset_override() {
        assert!(ChangeSource::Calendar.overrides_interventions());
        assert!(ChangeSource::Occupancy.overrides_interventions());
        assert!(ChangeSource::Sunset.overrides_interventions());
        assert!(!ChangeSource::Button.overrides_interventions());
        assert!(!ChangeSource::Sunrise.overrides_interventions());
    }
}
