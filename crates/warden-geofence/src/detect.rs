use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use warden_core::{ActorId, Location, Timestamp};

use crate::error::{GeofenceError, GeofenceResult};
use crate::region::{
    BoundingBox, PermissionLevel, PermissionMatrix, PrivacySettings, Region, RegionKind, Vec3,
};

fn default_min_events() -> usize {
    10
}

fn default_radius() -> f64 {
    16.0
}

fn default_window_ms() -> u64 {
    600_000
}

fn default_margin() -> f64 {
    2.0
}

/// Tuning for building-cluster detection.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DetectionConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Events needed near the latest one before a region is proposed.
    #[serde(default = "default_min_events")]
    pub min_events: usize,
    /// Horizontal distance from the latest event that counts as "near".
    #[serde(default = "default_radius")]
    pub radius: f64,
    #[serde(default = "default_window_ms")]
    pub window_ms: u64,
    /// Padding added around the cluster on every axis.
    #[serde(default = "default_margin")]
    pub margin: f64,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            min_events: default_min_events(),
            radius: default_radius(),
            window_ms: default_window_ms(),
            margin: default_margin(),
        }
    }
}

impl DetectionConfig {
    pub fn validate(&self) -> GeofenceResult<()> {
        if self.min_events == 0 {
            return Err(GeofenceError::InvalidRegion(
                "detection min_events must be positive".into(),
            ));
        }
        if !(self.radius.is_finite() && self.radius > 0.0) {
            return Err(GeofenceError::InvalidRegion(format!(
                "detection radius must be positive, got {}",
                self.radius
            )));
        }
        if !(self.margin.is_finite() && self.margin >= 0.0) {
            return Err(GeofenceError::InvalidRegion(format!(
                "detection margin must be non-negative, got {}",
                self.margin
            )));
        }
        if self.window_ms == 0 {
            return Err(GeofenceError::InvalidRegion(
                "detection window must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// Proposes private areas where an actor keeps building in one spot.
#[derive(Debug, Default)]
pub struct RegionDetector {
    config: DetectionConfig,
    activity: HashMap<ActorId, VecDeque<(Timestamp, Location)>>,
}

impl RegionDetector {
    pub fn new(config: DetectionConfig) -> GeofenceResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            activity: HashMap::new(),
        })
    }

    pub fn config(&self) -> &DetectionConfig {
        &self.config
    }

    /// Record one building event and return a candidate region when the
    /// actor's recent activity clusters tightly enough.
    ///
    /// The candidate is not registered here; once the caller has acted on it
    /// (registered or discarded) it should call [`consume`](Self::consume).
    pub fn observe(&mut self, actor: &ActorId, location: Location, now: Timestamp) -> Option<Region> {
        if !self.config.enabled || location.validate().is_err() {
            return None;
        }

        let window_ms = self.config.window_ms;
        let events = self.activity.entry(actor.clone()).or_default();
        events.push_back((now, location.clone()));
        while let Some((t, _)) = events.front() {
            if now.millis_since(*t) >= window_ms {
                events.pop_front();
            } else {
                break;
            }
        }

        let cluster: Vec<&Location> = events
            .iter()
            .map(|(_, l)| l)
            .filter(|l| l.world == location.world)
            .filter(|l| l.horizontal_distance(&location) <= self.config.radius)
            .collect();

        if cluster.len() < self.config.min_events {
            return None;
        }

        let margin = self.config.margin;
        let mut min = Vec3::new(f64::INFINITY, f64::INFINITY, f64::INFINITY);
        let mut max = Vec3::new(f64::NEG_INFINITY, f64::NEG_INFINITY, f64::NEG_INFINITY);
        for l in &cluster {
            min = Vec3::new(min.x.min(l.x), min.y.min(l.y), min.z.min(l.z));
            max = Vec3::new(max.x.max(l.x), max.y.max(l.y), max.z.max(l.z));
        }
        let bounds = BoundingBox::new(
            Vec3::new(min.x - margin, min.y - margin, min.z - margin),
            Vec3::new(max.x + margin, max.y + margin, max.z + margin),
        );

        tracing::debug!(
            actor_id = %actor,
            events = cluster.len(),
            "building cluster detected"
        );

        let mut region = Region::new(
            format!("auto-{}", uuid::Uuid::new_v4()),
            format!("{actor}'s build site"),
            RegionKind::PrivateArea,
            bounds,
        )
        .with_owner(actor.clone())
        .with_permissions(PermissionMatrix {
            building: PermissionLevel::Limited,
            ..PermissionMatrix::default()
        })
        .with_privacy(PrivacySettings {
            anonymize_activities: true,
            ..PrivacySettings::default()
        });
        region.world = location.world;
        region.auto_detected = true;
        Some(region)
    }

    /// Drop the actor's accumulated events.
    pub fn consume(&mut self, actor: &ActorId) {
        self.activity.remove(actor);
    }

    pub fn erase_actor(&mut self, actor: &ActorId) -> bool {
        self.activity.remove(actor).is_some()
    }

    pub fn pending_events(&self, actor: &ActorId) -> usize {
        self.activity.get(actor).map(VecDeque::len).unwrap_or(0)
    }
}
