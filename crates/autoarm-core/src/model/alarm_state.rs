// ── Alarm panel states ──
//
// The fixed vocabulary of alarm panel values. Steady states are real
// arming modes; ephemeral states are transitions the panel passes through;
// zombie states mean the panel has not reported a real value yet.

use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumIter, EnumString, IntoEnumIterator};

/// A value the alarm panel can hold.
///
/// No ordering is implied: transitions are decided by rules, never by
/// stepping through the variants.
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
pub enum AlarmState {
    Disarmed,
    ArmedHome,
    ArmedAway,
    ArmedNight,
    ArmedVacation,
    ArmedCustomBypass,
    Pending,
    Arming,
    Disarming,
    Triggered,
    Unknown,
    Unavailable,
}

impl AlarmState {
    /// Short-lived states the panel moves through on its way somewhere else.
    pub fn is_ephemeral(self) -> bool {
        matches!(
            self,
            Self::Pending | Self::Arming | Self::Disarming | Self::Triggered
        )
    }

    /// Sentinels meaning the underlying device has not reported yet.
    pub fn is_zombie(self) -> bool {
        matches!(self, Self::Unknown | Self::Unavailable)
    }

    /// States only ever entered on explicit request.
    pub fn is_override(self) -> bool {
        matches!(self, Self::ArmedVacation | Self::ArmedCustomBypass)
    }

    pub fn is_steady(self) -> bool {
        !self.is_ephemeral() && !self.is_zombie()
    }

    /// Whether reconciliation has to run regardless of earlier interventions.
    pub fn must_change(self) -> bool {
        self == Self::Pending || self.is_zombie()
    }

    /// All steady states, in declaration order.
    pub fn steady_states() -> Vec<Self> {
        Self::iter().filter(|s| s.is_steady()).collect()
    }

    /// Parse a raw registry value, tolerating case differences.
    pub fn parse(raw: &str) -> Option<Self> {
        raw.trim().parse().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_snake_case_and_upper_case() {
        assert_eq!(AlarmState::parse("armed_home"), Some(AlarmState::ArmedHome));
        assert_eq!(AlarmState::parse("ARMED_AWAY"), Some(AlarmState::ArmedAway));
        assert_eq!(AlarmState::parse(" disarmed "), Some(AlarmState::Disarmed));
        assert_eq!(AlarmState::parse("sleepy"), None);
    }

    #[test]
    fn display_matches_registry_values() {
        assert_eq!(AlarmState::ArmedVacation.to_string(), "armed_vacation");
        assert_eq!(AlarmState::ArmedCustomBypass.as_ref(), "armed_custom_bypass");
    }

    #[test]
    fn classification_is_disjoint() {
        for state in AlarmState::iter() {
            let kinds = [state.is_ephemeral(), state.is_zombie(), state.is_steady()];
            assert_eq!(kinds.iter().filter(|k| **k).count(), 1, "{state}");
        }
    }

    #[test]
    fn pending_and_zombies_force_reconciliation() {
        assert!(AlarmState::Pending.must_change());
        assert!(AlarmState::Unknown.must_change());
        assert!(AlarmState::Unavailable.must_change());
        assert!(!AlarmState::ArmedHome.must_change());
        assert!(!AlarmState::Arming.must_change());
    }

    #[test]
    fn serde_uses_snake_case() {
        let json = serde_json::to_string(&AlarmState::ArmedNight).unwrap();
        assert_eq!(json, "\"armed_night\"");
        let back: AlarmState = serde_json::from_str("\"armed_custom_bypass\"").unwrap();
        assert_eq!(back, AlarmState::ArmedCustomBypass);
    }
}
