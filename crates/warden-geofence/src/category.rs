use serde::{Deserialize, Serialize};
use std::fmt;

/// Permission category an action is checked against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionCategory {
    Entry,
    Building,
    ResourceExtraction,
    Observation,
}

const BUILDING_KEYWORDS: &[&str] = &["build", "place", "break", "construct", "destroy"];
const EXTRACTION_KEYWORDS: &[&str] = &["mine", "harvest", "extract", "gather", "collect", "chop"];
const OBSERVATION_KEYWORDS: &[&str] = &["observe", "watch", "record", "scan", "inspect", "look"];

impl ActionCategory {
    /// Keyword fallback for callers that only supply an action name.
    ///
    /// Matching is case-insensitive substring search, checked in the order
    /// building, resource extraction, observation. Anything unmatched is
    /// treated as entry.
    pub fn classify(action: &str) -> Self {
        let action = action.to_ascii_lowercase();
        let matches = |keywords: &[&str]| keywords.iter().any(|k| action.contains(k));

        if matches(BUILDING_KEYWORDS) {
            ActionCategory::Building
        } else if matches(EXTRACTION_KEYWORDS) {
            ActionCategory::ResourceExtraction
        } else if matches(OBSERVATION_KEYWORDS) {
            ActionCategory::Observation
        } else {
            tracing::debug!(action = %action, "action matched no category keyword, using entry");
            ActionCategory::Entry
        }
    }

    /// Explicit tag when present, keyword heuristic otherwise.
    pub fn resolve(explicit: Option<ActionCategory>, action: &str) -> Self {
        explicit.unwrap_or_else(|| Self::classify(action))
    }
}

impl fmt::Display for ActionCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActionCategory::Entry => write!(f, "entry"),
            ActionCategory::Building => write!(f, "building"),
            ActionCategory::ResourceExtraction => write!(f, "resource_extraction"),
            ActionCategory::Observation => write!(f, "observation"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_building() {
        assert_eq!(ActionCategory::classify("block_place"), ActionCategory::Building);
        assert_eq!(ActionCategory::classify("BreakBlock"), ActionCategory::Building);
        assert_eq!(ActionCategory::classify("build_house"), ActionCategory::Building);
    }

    #[test]
    fn test_classify_extraction_and_observation() {
        assert_eq!(ActionCategory::classify("mine_ore"), ActionCategory::ResourceExtraction);
        assert_eq!(ActionCategory::classify("harvest"), ActionCategory::ResourceExtraction);
        assert_eq!(ActionCategory::classify("screen_record"), ActionCategory::Observation);
    }

    #[test]
    fn test_unmatched_defaults_to_entry() {
        assert_eq!(ActionCategory::classify("enter"), ActionCategory::Entry);
        assert_eq!(ActionCategory::classify("chat"), ActionCategory::Entry);
        assert_eq!(ActionCategory::classify(""), ActionCategory::Entry);
    }

    #[test]
    fn test_building_wins_over_later_categories() {
        // "break" and "record" both match; building is checked first
        assert_eq!(ActionCategory::classify("record_break"), ActionCategory::Building);
    }

    #[test]
    fn test_explicit_category_overrides_keywords() {
        let category = ActionCategory::resolve(Some(ActionCategory::Observation), "place_block");
        assert_eq!(category, ActionCategory::Observation);
        assert_eq!(ActionCategory::resolve(None, "place_block"), ActionCategory::Building);
    }
}
