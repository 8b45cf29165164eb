//! Sequential, short-circuiting request pipeline.
//!
//! Stages: Consent -> Usage -> Spatial -> Transform -> Commit
//!
//! Collaborator calls are bounded by `pipeline.collaborator_timeout_ms`.
//! A timeout or any internal error ends the request as a denial with reason
//! `processing_error`; the pipeline never fails open.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, error, warn};
use warden_core::{ActionType, ActorId, Location};
use warden_geofence::{
    evaluate_access, AccessDecision, AccessDenial, AccessRequest, ActionCategory, DenialKind,
    PrivacyObligations,
};
use warden_throttle::UsageDecision;

use crate::audit::DecisionRecord;
use crate::collaborators::DataType;
use crate::error::{WardenError, WardenResult};
use crate::Warden;

pub const PROCESSING_ERROR: &str = "processing_error";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    Consent,
    Usage,
    Spatial,
    Transform,
    Commit,
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineStage::Consent => write!(f, "consent"),
            PipelineStage::Usage => write!(f, "usage"),
            PipelineStage::Spatial => write!(f, "spatial"),
            PipelineStage::Transform => write!(f, "transform"),
            PipelineStage::Commit => write!(f, "commit"),
        }
    }
}

/// One operation submitted by an actor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessRequest {
    pub actor_id: ActorId,
    /// Operation name; doubles as the throttled action type.
    pub operation: String,
    #[serde(default)]
    pub payload: Value,
    #[serde(default)]
    pub data_type: DataType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<Location>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<ActionCategory>,
    #[serde(default)]
    pub purpose: String,
}

impl ProcessRequest {
    pub fn new(actor_id: impl Into<ActorId>, operation: impl Into<String>, payload: Value) -> Self {
        Self {
            actor_id: actor_id.into(),
            operation: operation.into(),
            payload,
            data_type: DataType::Generic,
            location: None,
            category: None,
            purpose: String::new(),
        }
    }

    pub fn at(mut self, location: Location) -> Self {
        self.location = Some(location);
        self
    }

    pub fn with_data_type(mut self, data_type: DataType) -> Self {
        self.data_type = data_type;
        self
    }

    pub fn with_category(mut self, category: ActionCategory) -> Self {
        self.category = Some(category);
        self
    }

    pub fn with_purpose(mut self, purpose: impl Into<String>) -> Self {
        self.purpose = purpose.into();
        self
    }

    fn action_type(&self) -> ActionType {
        ActionType::new(self.operation.clone())
    }
}

/// Structured outcome of [`Warden::process`]. Always produced, allowed or
/// not.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessOutcome {
    pub allowed: bool,
    pub reason: String,
    /// Stage that denied, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub denied_at: Option<PipelineStage>,
    /// Payload after any required transform; only set when allowed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
    pub anonymized: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub missing_consents: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_after_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub restrictions: Vec<String>,
    /// Region denial behind a spatial-stage refusal.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub denial: Option<AccessDenial>,
    pub obligations: PrivacyObligations,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<UsageDecision>,
}

impl ProcessOutcome {
    fn denied(stage: PipelineStage, reason: impl Into<String>) -> Self {
        Self {
            allowed: false,
            reason: reason.into(),
            denied_at: Some(stage),
            payload: None,
            anonymized: false,
            missing_consents: Vec::new(),
            retry_after_ms: None,
            restrictions: Vec::new(),
            denial: None,
            obligations: PrivacyObligations::default(),
            usage: None,
        }
    }

    pub fn is_processing_error(&self) -> bool {
        !self.allowed && self.reason == PROCESSING_ERROR
    }
}

async fn bounded<T, F>(collaborator: &'static str, timeout_ms: u64, call: F) -> WardenResult<T>
where
    F: Future<Output = WardenResult<T>>,
{
    match tokio::time::timeout(Duration::from_millis(timeout_ms), call).await {
        Ok(result) => result,
        Err(_) => Err(WardenError::CollaboratorTimeout {
            collaborator,
            timeout_ms,
        }),
    }
}

impl Warden {
    /// Run a request through consent, usage, spatial and transform checks
    /// and, only if all pass, record the usage and release the payload.
    ///
    /// Never returns an error: faults are logged and become a denial with
    /// reason `processing_error`.
    pub async fn process(&self, request: ProcessRequest) -> ProcessOutcome {
        let (stage, result) = self.run_stages(&request).await;
        let outcome = match result {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(
                    actor_id = %request.actor_id,
                    operation = %request.operation,
                    stage = %stage,
                    error = %e,
                    "pipeline failed closed"
                );
                ProcessOutcome::denied(stage, PROCESSING_ERROR)
            }
        };

        if self.config().pipeline.audit_enabled {
            let record = DecisionRecord {
                entry_id: uuid::Uuid::new_v4().to_string(),
                timestamp: self.clock().now(),
                actor: request.actor_id.to_string(),
                operation: request.operation.clone(),
                purpose: request.purpose.clone(),
                allowed: outcome.allowed,
                reason: outcome.reason.clone(),
                denied_at: outcome.denied_at.map(|s| s.to_string()),
                restrictions: outcome.restrictions.clone(),
                related_actors: outcome
                    .denial
                    .iter()
                    .filter_map(|d| match &d.kind {
                        DenialKind::OwnerOnly { owner } => Some(owner.to_string()),
                        DenialKind::Prohibited { .. } => None,
                    })
                    .collect(),
                anonymized: outcome.anonymized,
            };
            if let Err(e) = self.audit_log().record(record) {
                warn!(error = %e, "failed to append decision record");
            }
        }
        outcome
    }

    // Returns the stage reached alongside the result so failures can be
    // attributed.
    async fn run_stages(
        &self,
        request: &ProcessRequest,
    ) -> (PipelineStage, WardenResult<ProcessOutcome>) {
        let timeout_ms = self.config().pipeline.collaborator_timeout_ms;
        let actor = &request.actor_id;
        let action = request.action_type();

        // 1. Consent
        let consent = bounded(
            "consent provider",
            timeout_ms,
            self.consent.check_status(actor, &request.operation),
        )
        .await;
        match consent {
            Ok(status) if !status.allowed => {
                debug!(actor_id = %actor, missing = ?status.missing_kinds, "consent missing");
                let mut outcome = ProcessOutcome::denied(
                    PipelineStage::Consent,
                    format!("missing consent: {}", status.missing_kinds.join(", ")),
                );
                outcome.missing_consents = status.missing_kinds;
                return (PipelineStage::Consent, Ok(outcome));
            }
            Ok(_) => {}
            Err(e) => return (PipelineStage::Consent, Err(e)),
        }

        // 2. Usage
        let usage = match self.check_usage(actor, &action) {
            Ok(usage) => usage,
            Err(e) => return (PipelineStage::Usage, Err(e)),
        };
        if !usage.allowed {
            if let Err(e) = self.escalate(actor, &action, &usage) {
                return (PipelineStage::Usage, Err(e));
            }
            let reason = usage
                .reason
                .map(|r| r.to_string())
                .unwrap_or_else(|| "throttled".to_string());
            let mut outcome = ProcessOutcome::denied(PipelineStage::Usage, reason);
            outcome.retry_after_ms = usage.retry_after_ms;
            outcome.usage = Some(usage);
            return (PipelineStage::Usage, Ok(outcome));
        }

        // 3. Spatial
        let mut restrictions = Vec::new();
        let mut obligations = PrivacyObligations::default();
        if let Some(location) = &request.location {
            let mut access = AccessRequest::new(actor.clone(), request.operation.clone(), location.clone());
            access.category = request.category;
            let query = match self.query_access(&access) {
                Ok(query) => query,
                Err(e) => return (PipelineStage::Spatial, Err(e)),
            };
            if !query.decision.allowed {
                let mut outcome =
                    ProcessOutcome::denied(PipelineStage::Spatial, query.decision.reason);
                outcome.denial = query.decision.denial;
                return (PipelineStage::Spatial, Ok(outcome));
            }
            restrictions = query.decision.restriction_tags();
            obligations = query.decision.obligations;
        }

        // 4. Transform
        let mut payload = request.payload.clone();
        let anonymized = obligations.requires_anonymization();
        if anonymized {
            let transformed = bounded(
                "anonymizer",
                timeout_ms,
                self.anonymizer.anonymize(request.data_type, actor, payload),
            )
            .await;
            payload = match transformed {
                Ok(p) => p,
                Err(e) => return (PipelineStage::Transform, Err(e)),
            };
        }

        // 5. Commit
        let committed = match self.record_usage(actor, &action) {
            Ok(decision) => decision,
            Err(e) => return (PipelineStage::Commit, Err(e)),
        };
        if !committed.allowed {
            // Another request took the last slot between check and commit
            let reason = committed
                .reason
                .map(|r| r.to_string())
                .unwrap_or_else(|| "throttled".to_string());
            let mut outcome = ProcessOutcome::denied(PipelineStage::Commit, reason);
            outcome.retry_after_ms = committed.retry_after_ms;
            outcome.usage = Some(committed);
            return (PipelineStage::Commit, Ok(outcome));
        }

        if let Some(location) = &request.location {
            let category = ActionCategory::resolve(request.category, &request.operation);
            if category == ActionCategory::Building {
                if let Err(e) = self.observe_building(actor, location) {
                    warn!(actor_id = %actor, error = %e, "region detection skipped");
                }
            }
        }

        let reason = if restrictions.is_empty() {
            "allowed".to_string()
        } else {
            format!("allowed with {} restriction(s)", restrictions.len())
        };
        (
            PipelineStage::Commit,
            Ok(ProcessOutcome {
                allowed: true,
                reason,
                denied_at: None,
                payload: Some(payload),
                anonymized,
                missing_consents: Vec::new(),
                retry_after_ms: None,
                restrictions,
                denial: None,
                obligations,
                usage: Some(committed),
            }),
        )
    }
}

impl Warden {
    /// Evaluate a request's spatial stage only, without recording a
    /// violation.
    pub fn preview_access(&self, request: &AccessRequest) -> WardenResult<AccessDecision> {
        let index = self.read_index()?;
        let found = index.find_containing(&request.location)?;
        Ok(evaluate_access(&found, request))
    }
}
