use serde::{Deserialize, Serialize};
use std::fmt;
use warden_core::{ActorId, Location, RegionId, Timestamp, WorldId};

use crate::category::ActionCategory;
use crate::error::{GeofenceError, GeofenceResult};

// ---------------------------------------------------------------------------
// RegionKind: privacy sensitivity of a region
// ---------------------------------------------------------------------------

/// Kind of region. Evaluation visits overlapping regions most privacy
/// sensitive first:
///
/// PrivateArea > ProtectedRegion > RestrictedResource > SocialSpace
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegionKind {
    PrivateArea,
    ProtectedRegion,
    RestrictedResource,
    SocialSpace,
}

impl RegionKind {
    /// Evaluation priority; lower values are evaluated first.
    pub fn priority(self) -> u8 {
        match self {
            RegionKind::PrivateArea => 0,
            RegionKind::ProtectedRegion => 1,
            RegionKind::RestrictedResource => 2,
            RegionKind::SocialSpace => 3,
        }
    }
}

impl fmt::Display for RegionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegionKind::PrivateArea => write!(f, "private_area"),
            RegionKind::ProtectedRegion => write!(f, "protected_region"),
            RegionKind::RestrictedResource => write!(f, "restricted_resource"),
            RegionKind::SocialSpace => write!(f, "social_space"),
        }
    }
}

// ---------------------------------------------------------------------------
// Permissions
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionLevel {
    Allowed,
    Limited,
    Prohibited,
    /// Only valid for the entry category of an owned region.
    OwnerOnly,
}

impl fmt::Display for PermissionLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PermissionLevel::Allowed => write!(f, "allowed"),
            PermissionLevel::Limited => write!(f, "limited"),
            PermissionLevel::Prohibited => write!(f, "prohibited"),
            PermissionLevel::OwnerOnly => write!(f, "owner_only"),
        }
    }
}

/// Permission for each action category inside a region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionMatrix {
    #[serde(default = "allowed")]
    pub entry: PermissionLevel,
    #[serde(default = "allowed")]
    pub building: PermissionLevel,
    #[serde(default = "allowed")]
    pub resource_extraction: PermissionLevel,
    #[serde(default = "allowed")]
    pub observation: PermissionLevel,
}

fn allowed() -> PermissionLevel {
    PermissionLevel::Allowed
}

impl Default for PermissionMatrix {
    fn default() -> Self {
        Self {
            entry: PermissionLevel::Allowed,
            building: PermissionLevel::Allowed,
            resource_extraction: PermissionLevel::Allowed,
            observation: PermissionLevel::Allowed,
        }
    }
}

impl PermissionMatrix {
    pub fn get(&self, category: ActionCategory) -> PermissionLevel {
        match category {
            ActionCategory::Entry => self.entry,
            ActionCategory::Building => self.building,
            ActionCategory::ResourceExtraction => self.resource_extraction,
            ActionCategory::Observation => self.observation,
        }
    }

    /// Owner-only entry: everything open to the owner, nobody else may enter.
    pub fn owner_only() -> Self {
        Self {
            entry: PermissionLevel::OwnerOnly,
            ..Self::default()
        }
    }
}

// ---------------------------------------------------------------------------
// Privacy settings
// ---------------------------------------------------------------------------

/// How long activity records from a region may be kept. Ordered shortest
/// first, so the strictest of several classes is the minimum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetentionClass {
    Minimal,
    Standard,
    Extended,
}

impl fmt::Display for RetentionClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RetentionClass::Minimal => write!(f, "minimal"),
            RetentionClass::Standard => write!(f, "standard"),
            RetentionClass::Extended => write!(f, "extended"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrivacySettings {
    #[serde(default)]
    pub anonymize_activities: bool,
    #[serde(default = "standard_retention")]
    pub retention: RetentionClass,
    #[serde(default = "detailed_logging_default")]
    pub detailed_logging: bool,
}

fn standard_retention() -> RetentionClass {
    RetentionClass::Standard
}

fn detailed_logging_default() -> bool {
    true
}

impl Default for PrivacySettings {
    fn default() -> Self {
        Self {
            anonymize_activities: false,
            retention: standard_retention(),
            detailed_logging: detailed_logging_default(),
        }
    }
}

// ---------------------------------------------------------------------------
// Vec3 / BoundingBox
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Vec3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vec3 {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }
}

/// Axis-aligned box. Faces are inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min: Vec3,
    pub max: Vec3,
}

impl BoundingBox {
    pub fn new(min: Vec3, max: Vec3) -> Self {
        Self { min, max }
    }

    /// Box spanning `[origin, origin + size]` on every axis.
    pub fn from_origin(origin: Vec3, size: f64) -> Self {
        Self {
            min: origin,
            max: Vec3::new(origin.x + size, origin.y + size, origin.z + size),
        }
    }

    pub fn validate(&self) -> GeofenceResult<()> {
        if !self.min.is_finite() || !self.max.is_finite() {
            return Err(GeofenceError::InvalidBounds(
                "bounding box coordinates must be finite".to_string(),
            ));
        }
        for (axis, lo, hi) in [
            ("x", self.min.x, self.max.x),
            ("y", self.min.y, self.max.y),
            ("z", self.min.z, self.max.z),
        ] {
            if lo > hi {
                return Err(GeofenceError::InvalidBounds(format!(
                    "min.{axis} ({lo}) exceeds max.{axis} ({hi})"
                )));
            }
        }
        Ok(())
    }

    pub fn contains(&self, location: &Location) -> bool {
        location.x >= self.min.x
            && location.x <= self.max.x
            && location.y >= self.min.y
            && location.y <= self.max.y
            && location.z >= self.min.z
            && location.z <= self.max.z
    }

    pub fn center(&self) -> Location {
        Location::new(
            (self.min.x + self.max.x) / 2.0,
            (self.min.y + self.max.y) / 2.0,
            (self.min.z + self.max.z) / 2.0,
        )
    }
}

// ---------------------------------------------------------------------------
// Region
// ---------------------------------------------------------------------------

/// A named axis-aligned volume with an access-permission and privacy policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Region {
    pub id: RegionId,
    pub name: String,
    pub kind: RegionKind,
    pub bounds: BoundingBox,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub world: Option<WorldId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<ActorId>,
    #[serde(default)]
    pub permissions: PermissionMatrix,
    #[serde(default)]
    pub privacy: PrivacySettings,
    #[serde(default)]
    pub auto_detected: bool,
}

impl Region {
    pub fn new(
        id: impl Into<RegionId>,
        name: impl Into<String>,
        kind: RegionKind,
        bounds: BoundingBox,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            kind,
            bounds,
            world: None,
            owner: None,
            permissions: PermissionMatrix::default(),
            privacy: PrivacySettings::default(),
            auto_detected: false,
        }
    }

    pub fn with_owner(mut self, owner: impl Into<ActorId>) -> Self {
        self.owner = Some(owner.into());
        self
    }

    pub fn with_permissions(mut self, permissions: PermissionMatrix) -> Self {
        self.permissions = permissions;
        self
    }

    pub fn with_privacy(mut self, privacy: PrivacySettings) -> Self {
        self.privacy = privacy;
        self
    }

    pub fn in_world(mut self, world: impl Into<WorldId>) -> Self {
        self.world = Some(world.into());
        self
    }

    /// Whole-region validation, applied before anything is indexed.
    pub fn validate(&self) -> GeofenceResult<()> {
        if self.id.is_empty() {
            return Err(GeofenceError::InvalidRegion(
                "region id must not be empty".to_string(),
            ));
        }
        if self.name.trim().is_empty() {
            return Err(GeofenceError::InvalidRegion(format!(
                "region '{}' must have a name",
                self.id
            )));
        }
        self.bounds.validate()?;

        for (category, level) in [
            (ActionCategory::Building, self.permissions.building),
            (ActionCategory::ResourceExtraction, self.permissions.resource_extraction),
            (ActionCategory::Observation, self.permissions.observation),
        ] {
            if level == PermissionLevel::OwnerOnly {
                return Err(GeofenceError::InvalidRegion(format!(
                    "owner_only is only valid for entry, not {category}"
                )));
            }
        }
        if self.permissions.entry == PermissionLevel::OwnerOnly && self.owner.is_none() {
            return Err(GeofenceError::InvalidRegion(format!(
                "region '{}' has owner_only entry but no owner",
                self.id
            )));
        }
        if let Some(owner) = &self.owner {
            if owner.is_empty() {
                return Err(GeofenceError::InvalidRegion(
                    "owner id must not be empty".to_string(),
                ));
            }
        }
        Ok(())
    }

    /// Exact containment test including the world tag. An untagged region
    /// matches every world.
    pub fn contains(&self, location: &Location) -> bool {
        if let (Some(region_world), Some(location_world)) = (&self.world, &location.world) {
            if region_world != location_world {
                return false;
            }
        }
        self.bounds.contains(location)
    }

    pub fn is_owned_by(&self, actor: &ActorId) -> bool {
        self.owner.as_ref() == Some(actor)
    }
}

/// Registration metadata kept alongside each indexed region.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegisteredRegion {
    pub region: Region,
    pub registered_at: Timestamp,
}
