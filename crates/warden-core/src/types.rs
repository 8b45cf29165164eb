use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{CoreError, CoreResult};

// ---------------------------------------------------------------------------
// Timestamp: millisecond wall-clock time
// ---------------------------------------------------------------------------

/// Canonical time representation: milliseconds since the Unix epoch.
///
/// Rate limiting and violation decay work at millisecond resolution, so the
/// whole engine shares this single representation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp {
    pub millis_since_epoch: u64,
}

impl Timestamp {
    pub fn now() -> Self {
        let now = chrono::Utc::now();
        Self {
            millis_since_epoch: now.timestamp_millis().max(0) as u64,
        }
    }

    pub fn from_millis(millis: u64) -> Self {
        Self {
            millis_since_epoch: millis,
        }
    }

    pub fn from_seconds(seconds: u64) -> Self {
        Self {
            millis_since_epoch: seconds.saturating_mul(1000),
        }
    }

    /// Milliseconds elapsed from `earlier` to `self`, zero if `earlier` is later.
    pub fn millis_since(&self, earlier: Timestamp) -> u64 {
        self.millis_since_epoch
            .saturating_sub(earlier.millis_since_epoch)
    }

    pub fn plus_millis(&self, millis: u64) -> Self {
        Self {
            millis_since_epoch: self.millis_since_epoch.saturating_add(millis),
        }
    }

    pub fn minus_millis(&self, millis: u64) -> Self {
        Self {
            millis_since_epoch: self.millis_since_epoch.saturating_sub(millis),
        }
    }

    pub fn to_rfc3339(&self) -> String {
        chrono::DateTime::from_timestamp_millis(self.millis_since_epoch as i64)
            .map(|d| d.to_rfc3339())
            .unwrap_or_else(|| "invalid".to_string())
    }
}

impl From<chrono::DateTime<chrono::Utc>> for Timestamp {
    fn from(dt: chrono::DateTime<chrono::Utc>) -> Self {
        Self {
            millis_since_epoch: dt.timestamp_millis().max(0) as u64,
        }
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_rfc3339())
    }
}

// ---------------------------------------------------------------------------
// Typed identifiers
// ---------------------------------------------------------------------------

macro_rules! define_id {
    ($name:ident, $doc:expr) => {
        #[doc = $doc]
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }

            pub fn is_empty(&self) -> bool {
                self.0.trim().is_empty()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }
    };
}

define_id!(
    ActorId,
    "Identified party (human or agent) whose access and usage is governed."
);
define_id!(RegionId, "Unique identifier for a registered region.");
define_id!(
    ActionType,
    "Named category of throttled operation (e.g. `chat`, `block_place`)."
);
define_id!(WorldId, "World or dimension a location belongs to.");

// ---------------------------------------------------------------------------
// Location: transient 3D query key
// ---------------------------------------------------------------------------

/// A point in the shared environment, optionally tagged with a world.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub world: Option<WorldId>,
}

impl Location {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self {
            x,
            y,
            z,
            world: None,
        }
    }

    pub fn in_world(mut self, world: impl Into<WorldId>) -> Self {
        self.world = Some(world.into());
        self
    }

    /// Reject NaN and infinite coordinates.
    pub fn validate(&self) -> CoreResult<()> {
        if !(self.x.is_finite() && self.y.is_finite() && self.z.is_finite()) {
            return Err(CoreError::Validation(format!(
                "location coordinates must be finite, got ({}, {}, {})",
                self.x, self.y, self.z
            )));
        }
        Ok(())
    }

    /// Distance on the horizontal (x/z) plane.
    pub fn horizontal_distance(&self, other: &Location) -> f64 {
        let dx = self.x - other.x;
        let dz = self.z - other.z;
        (dx * dx + dz * dz).sqrt()
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.world {
            Some(w) => write!(f, "({}, {}, {}) in {}", self.x, self.y, self.z, w),
            None => write!(f, "({}, {}, {})", self.x, self.y, self.z),
        }
    }
}

// ---------------------------------------------------------------------------
// ViolationSeverity: derived from recent denial count
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationSeverity {
    Low,
    High,
}

impl fmt::Display for ViolationSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ViolationSeverity::Low => write!(f, "low"),
            ViolationSeverity::High => write!(f, "high"),
        }
    }
}
