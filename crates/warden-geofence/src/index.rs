//! Grid-bucketed region index.
//!
//! Regions are bucketed into fixed-size cells on the horizontal (x/z) plane.
//! Registration inserts the region id into every cell its bounding box
//! covers, so a point query only needs the bucket of the point's own cell;
//! the exact box test then removes false positives. Lookup cost scales with
//! local region density, not the total number of regions.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use warden_core::{ActorId, Location, RegionId, Timestamp};

use crate::error::{GeofenceError, GeofenceResult};
use crate::region::{BoundingBox, RegisteredRegion, Region};

/// Default edge length of a grid cell, in world units.
pub const DEFAULT_CELL_SIZE: f64 = 16.0;

/// Default cap on the number of cells one region may cover.
pub const DEFAULT_MAX_CELLS_PER_REGION: u64 = 262_144;

/// Grid cell coordinate on the x/z plane.
pub type CellKey = (i64, i64);

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IndexConfig {
    #[serde(default = "default_cell_size")]
    pub cell_size: f64,
    #[serde(default = "default_max_cells")]
    pub max_cells_per_region: u64,
    /// Also gather candidates from the 8 cells around the query cell.
    #[serde(default)]
    pub neighbor_scan: bool,
}

fn default_cell_size() -> f64 {
    DEFAULT_CELL_SIZE
}

fn default_max_cells() -> u64 {
    DEFAULT_MAX_CELLS_PER_REGION
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            cell_size: default_cell_size(),
            max_cells_per_region: default_max_cells(),
            neighbor_scan: false,
        }
    }
}

impl IndexConfig {
    pub fn validate(&self) -> GeofenceResult<()> {
        if !self.cell_size.is_finite() || self.cell_size <= 0.0 {
            return Err(GeofenceError::InvalidRegion(format!(
                "cell_size must be a positive number, got {}",
                self.cell_size
            )));
        }
        if self.max_cells_per_region == 0 {
            return Err(GeofenceError::InvalidRegion(
                "max_cells_per_region must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// In-memory spatial index of registered regions.
///
/// Not internally synchronized: the owner serializes mutation against
/// queries (the orchestrator keeps it behind an `RwLock`), which makes every
/// register/remove atomic from a reader's point of view.
#[derive(Debug)]
pub struct RegionIndex {
    config: IndexConfig,
    regions: HashMap<RegionId, RegisteredRegion>,
    cells: HashMap<CellKey, BTreeSet<RegionId>>,
}

impl RegionIndex {
    pub fn new(config: IndexConfig) -> GeofenceResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            regions: HashMap::new(),
            cells: HashMap::new(),
        })
    }

    pub fn config(&self) -> &IndexConfig {
        &self.config
    }

    /// Cell containing the point `(x, z)`.
    pub fn cell_of(&self, x: f64, z: f64) -> CellKey {
        (
            (x / self.config.cell_size).floor() as i64,
            (z / self.config.cell_size).floor() as i64,
        )
    }

    /// Every cell a bounding box covers, bounded by `max_cells_per_region`.
    pub fn covering_cells(&self, bounds: &BoundingBox) -> GeofenceResult<Vec<CellKey>> {
        let (min_cx, min_cz) = self.cell_of(bounds.min.x, bounds.min.z);
        let (max_cx, max_cz) = self.cell_of(bounds.max.x, bounds.max.z);

        let span_x = (max_cx as i128 - min_cx as i128) + 1;
        let span_z = (max_cz as i128 - min_cz as i128) + 1;
        let cells = span_x.saturating_mul(span_z);
        if cells > self.config.max_cells_per_region as i128 {
            return Err(GeofenceError::RegionTooLarge {
                cells: u64::try_from(cells).unwrap_or(u64::MAX),
                max: self.config.max_cells_per_region,
            });
        }

        let mut keys = Vec::with_capacity(cells as usize);
        for cx in min_cx..=max_cx {
            for cz in min_cz..=max_cz {
                keys.push((cx, cz));
            }
        }
        Ok(keys)
    }

    /// Validate and index a region. Re-registering an existing id replaces
    /// the previous region and returns it.
    ///
    /// All validation (including the covering cell computation) happens
    /// before the index is touched, so a rejected region leaves no trace.
    pub fn register(&mut self, region: Region, now: Timestamp) -> GeofenceResult<Option<Region>> {
        region.validate()?;
        let cells = self.covering_cells(&region.bounds)?;

        let previous = if self.regions.contains_key(&region.id) {
            Some(self.remove(&region.id)?)
        } else {
            None
        };

        for key in &cells {
            self.cells.entry(*key).or_default().insert(region.id.clone());
        }
        tracing::debug!(
            region_id = %region.id,
            cells = cells.len(),
            replaced = previous.is_some(),
            "region indexed"
        );
        self.regions.insert(
            region.id.clone(),
            RegisteredRegion {
                region,
                registered_at: now,
            },
        );
        Ok(previous)
    }

    /// Remove a region and every bucket entry that references it. Buckets
    /// left empty are dropped, so repeated add/remove cycles do not grow
    /// the index.
    pub fn remove(&mut self, id: &RegionId) -> GeofenceResult<Region> {
        let entry = self
            .regions
            .remove(id)
            .ok_or_else(|| GeofenceError::RegionNotFound(id.to_string()))?;

        // Same cell size as at registration, so this is the same cell set.
        let cells = self.covering_cells(&entry.region.bounds)?;
        for key in cells {
            if let Some(bucket) = self.cells.get_mut(&key) {
                bucket.remove(id);
                if bucket.is_empty() {
                    self.cells.remove(&key);
                }
            }
        }
        Ok(entry.region)
    }

    /// Regions whose bounds contain `location`, ordered by region id.
    pub fn find_containing(&self, location: &Location) -> GeofenceResult<Vec<&Region>> {
        location.validate()?;
        let (cx, cz) = self.cell_of(location.x, location.z);

        let mut candidates: BTreeSet<&RegionId> = BTreeSet::new();
        let radius: i64 = if self.config.neighbor_scan { 1 } else { 0 };
        for dx in -radius..=radius {
            for dz in -radius..=radius {
                let key = (cx.saturating_add(dx), cz.saturating_add(dz));
                if let Some(bucket) = self.cells.get(&key) {
                    candidates.extend(bucket.iter());
                }
            }
        }

        Ok(candidates
            .into_iter()
            .filter_map(|id| self.regions.get(id))
            .map(|entry| &entry.region)
            .filter(|region| region.contains(location))
            .collect())
    }

    pub fn get(&self, id: &RegionId) -> Option<&Region> {
        self.regions.get(id).map(|entry| &entry.region)
    }

    pub fn registered_at(&self, id: &RegionId) -> Option<Timestamp> {
        self.regions.get(id).map(|entry| entry.registered_at)
    }

    pub fn contains_region(&self, id: &RegionId) -> bool {
        self.regions.contains_key(id)
    }

    pub fn regions(&self) -> impl Iterator<Item = &Region> {
        self.regions.values().map(|entry| &entry.region)
    }

    pub fn regions_owned_by<'a>(&'a self, actor: &'a ActorId) -> impl Iterator<Item = &'a Region> {
        self.regions().filter(move |r| r.is_owned_by(actor))
    }

    pub fn len(&self) -> usize {
        self.regions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }

    /// Number of non-empty grid buckets.
    pub fn bucket_count(&self) -> usize {
        self.cells.len()
    }

    /// Total region ids stored across all buckets.
    pub fn entry_count(&self) -> usize {
        self.cells.values().map(BTreeSet::len).sum()
    }
}

impl Default for RegionIndex {
    fn default() -> Self {
        Self {
            config: IndexConfig::default(),
            regions: HashMap::new(),
            cells: HashMap::new(),
        }
    }
}
