//! Reasons given for a late arrival.

use serde::{Deserialize, Serialize};

/// Why Adel was late, when anyone bothered to ask.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::EnumIter,
    strum::AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum LateReason {
    Traffic,
    FamilyEmergency,
    WorkEmergency,
    TechnicalDifficulties,
    Other,
}

#[cfg(test)]
mod tests {
    use core::str::FromStr;

    use strum::IntoEnumIterator;

    use super::*;

    #[test]
    fn test_reason_string_round_trip() {
        for reason in LateReason::iter() {
            let text = reason.to_string();
            assert_eq!(LateReason::from_str(&text).ok(), Some(reason));
        }
        assert_eq!(LateReason::FamilyEmergency.as_ref(), "family_emergency");
    }

    #[test]
    fn test_unknown_reason() {
        assert!(LateReason::from_str("alien_abduction").is_err());
    }

    #[test]
    fn test_reason_serde_matches_display() {
        let json = serde_json::to_string(&LateReason::WorkEmergency).expect("serialize");
        assert_eq!(json, "\"work_emergency\"");
    }
}
