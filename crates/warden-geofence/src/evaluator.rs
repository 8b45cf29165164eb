use serde::{Deserialize, Serialize};
use warden_core::{ActorId, Location, RegionId};

use crate::category::ActionCategory;
use crate::region::{PermissionLevel, PrivacySettings, Region, RetentionClass};

// ---------------------------------------------------------------------------
// Request / decision types
// ---------------------------------------------------------------------------

/// One spatial permission query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccessRequest {
    pub actor_id: ActorId,
    pub action: String,
    /// Explicit category tag; the keyword heuristic on `action` is only
    /// used when this is absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<ActionCategory>,
    pub location: Location,
}

impl AccessRequest {
    pub fn new(actor_id: impl Into<ActorId>, action: impl Into<String>, location: Location) -> Self {
        Self {
            actor_id: actor_id.into(),
            action: action.into(),
            category: None,
            location,
        }
    }

    pub fn with_category(mut self, category: ActionCategory) -> Self {
        self.category = Some(category);
        self
    }

    pub fn resolved_category(&self) -> ActionCategory {
        ActionCategory::resolve(self.category, &self.action)
    }
}

/// Privacy handling requirements attached to an allowed action.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrivacyObligations {
    pub anonymize: bool,
    pub limit_logging: bool,
    /// Strictest retention class among contributing regions.
    pub retention: Option<RetentionClass>,
}

impl PrivacyObligations {
    /// Merge one region's settings; flags are OR-ed and the shortest
    /// retention wins.
    pub fn absorb(&mut self, settings: &PrivacySettings) {
        self.anonymize |= settings.anonymize_activities;
        self.limit_logging |= !settings.detailed_logging;
        self.retention = Some(match self.retention {
            Some(current) => current.min(settings.retention),
            None => settings.retention,
        });
    }

    pub fn merge(&mut self, other: &PrivacyObligations) {
        self.anonymize |= other.anonymize;
        self.limit_logging |= other.limit_logging;
        self.retention = match (self.retention, other.retention) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
    }

    pub fn requires_anonymization(&self) -> bool {
        self.anonymize
    }
}

/// A `limited` permission that applied to the action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Restriction {
    pub region_id: RegionId,
    pub category: ActionCategory,
}

impl Restriction {
    pub fn tag(&self) -> String {
        format!("limited:{}@{}", self.category, self.region_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DenialKind {
    OwnerOnly { owner: ActorId },
    Prohibited { category: ActionCategory },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessDenial {
    pub region_id: RegionId,
    pub region_name: String,
    #[serde(flatten)]
    pub kind: DenialKind,
}

/// Outcome of evaluating one action against the regions at a point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccessDecision {
    pub allowed: bool,
    pub category: ActionCategory,
    pub restrictions: Vec<Restriction>,
    pub reason: String,
    pub obligations: PrivacyObligations,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub denial: Option<AccessDenial>,
    /// Regions visited, in evaluation order.
    pub evaluated_regions: Vec<RegionId>,
}

impl AccessDecision {
    pub fn is_restricted(&self) -> bool {
        !self.restrictions.is_empty()
    }

    pub fn restriction_tags(&self) -> Vec<String> {
        self.restrictions.iter().map(Restriction::tag).collect()
    }

    pub fn denied_region(&self) -> Option<&RegionId> {
        self.denial.as_ref().map(|d| &d.region_id)
    }
}

// ---------------------------------------------------------------------------
// Evaluation
// ---------------------------------------------------------------------------

/// Resolve the regions containing a point into a single decision.
///
/// Regions are visited most privacy sensitive kind first (ties broken by
/// region id), so the outcome never depends on registration order. The
/// first denial ends evaluation; if every region allows, the obligations of
/// all of them are combined.
pub fn evaluate_access(regions: &[&Region], request: &AccessRequest) -> AccessDecision {
    let category = request.resolved_category();

    if regions.is_empty() {
        return AccessDecision {
            allowed: true,
            category,
            restrictions: Vec::new(),
            reason: "no applicable regions".to_string(),
            obligations: PrivacyObligations::default(),
            denial: None,
            evaluated_regions: Vec::new(),
        };
    }

    let mut ordered: Vec<&Region> = regions.to_vec();
    ordered.sort_by(|a, b| {
        a.kind
            .priority()
            .cmp(&b.kind.priority())
            .then_with(|| a.id.cmp(&b.id))
    });

    let mut restrictions = Vec::new();
    let mut obligations = PrivacyObligations::default();
    let mut evaluated = Vec::with_capacity(ordered.len());

    for region in ordered {
        evaluated.push(region.id.clone());

        if let Some(owner) = &region.owner {
            if owner != &request.actor_id && region.permissions.entry == PermissionLevel::OwnerOnly
            {
                return deny(
                    region,
                    category,
                    DenialKind::OwnerOnly {
                        owner: owner.clone(),
                    },
                    format!("owner-only access, owner={owner}"),
                    evaluated,
                );
            }
        }

        match region.permissions.get(category) {
            PermissionLevel::Prohibited => {
                return deny(
                    region,
                    category,
                    DenialKind::Prohibited { category },
                    format!(
                        "{category} prohibited in region '{}' ({})",
                        region.name, region.id
                    ),
                    evaluated,
                );
            }
            PermissionLevel::Limited => {
                restrictions.push(Restriction {
                    region_id: region.id.clone(),
                    category,
                });
                obligations.absorb(&region.privacy);
            }
            // Owner-only entry that reached here is the owner's own access.
            PermissionLevel::Allowed | PermissionLevel::OwnerOnly => {
                obligations.absorb(&region.privacy);
            }
        }
    }

    let reason = if restrictions.is_empty() {
        "allowed".to_string()
    } else {
        format!("allowed with restrictions in {} region(s)", restrictions.len())
    };

    AccessDecision {
        allowed: true,
        category,
        restrictions,
        reason,
        obligations,
        denial: None,
        evaluated_regions: evaluated,
    }
}

fn deny(
    region: &Region,
    category: ActionCategory,
    kind: DenialKind,
    reason: String,
    evaluated: Vec<RegionId>,
) -> AccessDecision {
    AccessDecision {
        allowed: false,
        category,
        restrictions: Vec::new(),
        reason,
        obligations: PrivacyObligations::default(),
        denial: Some(AccessDenial {
            region_id: region.id.clone(),
            region_name: region.name.clone(),
            kind,
        }),
        evaluated_regions: evaluated,
    }
}
