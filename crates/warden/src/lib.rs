//! Warden: spatial access control and usage throttling for shared 3D
//! environments.
//!
//! # Architecture
//!
//! [`Warden`] owns every piece of engine state: the region index, the
//! violation tracker, the usage ledger with its adaptive controller and
//! escalator, the region detector, the decision log and the event bus.
//! Nothing is global; embedders construct one `Warden` (usually behind an
//! `Arc`) and call into it from any number of tasks.
//!
//! Primitive operations are synchronous and never perform I/O. Only
//! [`Warden::process`] is async, because it awaits the consent and
//! anonymizer collaborators under a bounded timeout.

pub mod audit;
pub mod collaborators;
pub mod config;
pub mod error;
pub mod pipeline;

pub use audit::{ChainedRecord, DecisionLog, DecisionRecord};
pub use collaborators::{
    pseudonymize, Anonymizer, ConsentProvider, ConsentStatus, DataType, RedactingAnonymizer,
    StaticConsent,
};
pub use config::WardenConfig;
pub use error::{WardenError, WardenResult};
pub use pipeline::{PipelineStage, ProcessOutcome, ProcessRequest};

use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, info, warn};
use warden_core::{
    ActionType, ActorId, Clock, EventBus, EventSink, Location, RegionId, SystemClock,
    WardenEventKind,
};
use warden_geofence::{
    evaluate_access, AccessDecision, AccessRequest, RegionDetector, Region, RegionIndex,
    ViolationReport, ViolationSummary, ViolationTracker,
};
use warden_throttle::{
    AdaptiveController, LoadSignal, RateLimitPolicy, RateViolationEscalator, UsageDecision,
    UsageLedger, UsageSnapshot,
};

/// Result of a containment and permission query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccessQuery {
    /// Regions containing the location, ordered by id.
    pub regions: Vec<RegionId>,
    pub decision: AccessDecision,
    /// Present when the query was denied and recorded as a violation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub violation: Option<ViolationReport>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexStats {
    pub regions: usize,
    pub buckets: usize,
    pub entries: usize,
}

/// Builder for [`Warden`]; lets tests and embedders swap the clock and
/// collaborators before the bootstrap regions and policies are applied.
pub struct WardenBuilder {
    config: WardenConfig,
    clock: Arc<dyn Clock>,
    consent: Arc<dyn ConsentProvider>,
    anonymizer: Arc<dyn Anonymizer>,
    sinks: Vec<Arc<dyn EventSink>>,
    erasure_salt: Option<String>,
}

impl WardenBuilder {
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn consent(mut self, consent: Arc<dyn ConsentProvider>) -> Self {
        self.consent = consent;
        self
    }

    pub fn anonymizer(mut self, anonymizer: Arc<dyn Anonymizer>) -> Self {
        self.anonymizer = anonymizer;
        self
    }

    /// Subscribe a sink before bootstrap so it sees startup registrations.
    pub fn subscriber(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    /// Salt for erasure pseudonyms. Defaults to a random value per instance;
    /// set it only to keep pseudonyms stable across restarts, and keep it
    /// secret.
    pub fn erasure_salt(mut self, salt: impl Into<String>) -> Self {
        self.erasure_salt = Some(salt.into());
        self
    }

    pub fn build(self) -> WardenResult<Warden> {
        let config = self.config;
        config.validate()?;

        let events = EventBus::new();
        for sink in self.sinks {
            events.subscribe(sink);
        }

        let warden = Warden {
            index: RwLock::new(RegionIndex::new(config.index)?),
            violations: Mutex::new(ViolationTracker::new(
                config.violations.to_tracker_config(),
            )?),
            detector: Mutex::new(RegionDetector::new(
                config.detection.to_detection_config(),
            )?),
            ledger: UsageLedger::new(),
            adaptive: Mutex::new(AdaptiveController::new(config.throttle.load_history)?),
            escalator: Mutex::new(RateViolationEscalator::new(
                config.throttle.escalation_threshold,
            )?),
            audit: DecisionLog::new(),
            events,
            clock: self.clock,
            consent: self.consent,
            anonymizer: self.anonymizer,
            erasure_salt: self
                .erasure_salt
                .unwrap_or_else(|| uuid::Uuid::new_v4().simple().to_string()),
            config,
        };

        for region in warden.config.regions.clone() {
            warden.register_region(region)?;
        }
        for policy in warden.config.rate_limits.clone() {
            warden.configure_rate_limit(policy)?;
        }
        info!(
            regions = warden.config.regions.len(),
            rate_limits = warden.config.rate_limits.len(),
            "warden initialized"
        );
        Ok(warden)
    }
}

pub struct Warden {
    config: WardenConfig,
    clock: Arc<dyn Clock>,
    index: RwLock<RegionIndex>,
    violations: Mutex<ViolationTracker>,
    detector: Mutex<RegionDetector>,
    ledger: UsageLedger,
    adaptive: Mutex<AdaptiveController>,
    escalator: Mutex<RateViolationEscalator>,
    audit: DecisionLog,
    events: EventBus,
    consent: Arc<dyn ConsentProvider>,
    anonymizer: Arc<dyn Anonymizer>,
    erasure_salt: String,
}

fn poisoned(what: &str) -> WardenError {
    WardenError::Internal(format!("{what} lock poisoned"))
}

impl Warden {
    /// Engine with the system clock, an empty [`StaticConsent`] and the
    /// default [`RedactingAnonymizer`].
    pub fn new(config: WardenConfig) -> WardenResult<Self> {
        Self::builder(config).build()
    }

    pub fn builder(config: WardenConfig) -> WardenBuilder {
        WardenBuilder {
            config,
            clock: Arc::new(SystemClock),
            consent: Arc::new(StaticConsent::new()),
            anonymizer: Arc::new(RedactingAnonymizer::default()),
            sinks: Vec::new(),
            erasure_salt: None,
        }
    }

    pub fn config(&self) -> &WardenConfig {
        &self.config
    }

    pub fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }

    pub fn subscribe(&self, sink: Arc<dyn EventSink>) {
        self.events.subscribe(sink);
    }

    pub fn audit_log(&self) -> &DecisionLog {
        &self.audit
    }

    fn read_index(&self) -> WardenResult<RwLockReadGuard<'_, RegionIndex>> {
        self.index.read().map_err(|_| poisoned("region index"))
    }

    fn write_index(&self) -> WardenResult<RwLockWriteGuard<'_, RegionIndex>> {
        self.index.write().map_err(|_| poisoned("region index"))
    }

    fn violations(&self) -> WardenResult<MutexGuard<'_, ViolationTracker>> {
        self.violations.lock().map_err(|_| poisoned("violation tracker"))
    }

    fn detector(&self) -> WardenResult<MutexGuard<'_, RegionDetector>> {
        self.detector.lock().map_err(|_| poisoned("region detector"))
    }

    fn adaptive(&self) -> WardenResult<MutexGuard<'_, AdaptiveController>> {
        self.adaptive.lock().map_err(|_| poisoned("adaptive controller"))
    }

    fn escalator(&self) -> WardenResult<MutexGuard<'_, RateViolationEscalator>> {
        self.escalator.lock().map_err(|_| poisoned("rate escalator"))
    }

    // -----------------------------------------------------------------------
    // Regions
    // -----------------------------------------------------------------------

    /// Validate and index a region. An existing region with the same id is
    /// replaced in one step.
    pub fn register_region(&self, region: Region) -> WardenResult<()> {
        let now = self.clock.now();
        let kind = WardenEventKind::RegionRegistered {
            region_id: region.id.clone(),
            name: region.name.clone(),
            kind: region.kind.to_string(),
            auto_detected: region.auto_detected,
        };
        let region_id = region.id.clone();
        let replaced = self.write_index()?.register(region, now)?;
        info!(
            region_id = %region_id,
            replaced = replaced.is_some(),
            "region registered"
        );
        self.events.publish(now, kind);
        Ok(())
    }

    pub fn remove_region(&self, id: &RegionId) -> WardenResult<Region> {
        let removed = self.write_index()?.remove(id)?;
        info!(region_id = %id, "region removed");
        self.events.publish(
            self.clock.now(),
            WardenEventKind::RegionRemoved {
                region_id: id.clone(),
            },
        );
        Ok(removed)
    }

    pub fn region(&self, id: &RegionId) -> WardenResult<Option<Region>> {
        Ok(self.read_index()?.get(id).cloned())
    }

    /// All registered regions, ordered by id.
    pub fn regions(&self) -> WardenResult<Vec<Region>> {
        let mut regions: Vec<Region> = self.read_index()?.regions().cloned().collect();
        regions.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(regions)
    }

    pub fn regions_owned_by(&self, actor: &ActorId) -> WardenResult<Vec<Region>> {
        let index = self.read_index()?;
        let mut regions: Vec<Region> = index.regions_owned_by(actor).cloned().collect();
        regions.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(regions)
    }

    /// Regions containing `location`, ordered by id.
    pub fn regions_at(&self, location: &Location) -> WardenResult<Vec<Region>> {
        Ok(self
            .read_index()?
            .find_containing(location)?
            .into_iter()
            .cloned()
            .collect())
    }

    pub fn index_stats(&self) -> WardenResult<IndexStats> {
        let index = self.read_index()?;
        Ok(IndexStats {
            regions: index.len(),
            buckets: index.bucket_count(),
            entries: index.entry_count(),
        })
    }

    // -----------------------------------------------------------------------
    // Access
    // -----------------------------------------------------------------------

    /// Evaluate an action against the regions at its location. A denial is
    /// recorded against the denying region.
    pub fn query_access(&self, request: &AccessRequest) -> WardenResult<AccessQuery> {
        let now = self.clock.now();
        let (regions, decision) = {
            let index = self.read_index()?;
            let found = index.find_containing(&request.location)?;
            let ids: Vec<RegionId> = found.iter().map(|r| r.id.clone()).collect();
            (ids, evaluate_access(&found, request))
        };

        let violation = match decision.denied_region() {
            Some(region_id) => {
                warn!(
                    actor_id = %request.actor_id,
                    region_id = %region_id,
                    action = %request.action,
                    reason = %decision.reason,
                    "access denied"
                );
                Some(self.violations()?.record_denial(
                    &request.actor_id,
                    region_id,
                    now,
                    &self.events,
                ))
            }
            None => {
                debug!(
                    actor_id = %request.actor_id,
                    action = %request.action,
                    regions = regions.len(),
                    restricted = decision.is_restricted(),
                    "access allowed"
                );
                None
            }
        };

        Ok(AccessQuery {
            regions,
            decision,
            violation,
        })
    }

    pub fn violations_for(&self, actor: &ActorId) -> WardenResult<Vec<ViolationSummary>> {
        Ok(self.violations()?.violations_for(actor, self.clock.now()))
    }

    /// Feed a building event to the region detector and register the
    /// proposed area, unless one of the actor's regions already covers it.
    pub fn observe_building(
        &self,
        actor: &ActorId,
        location: &Location,
    ) -> WardenResult<Option<RegionId>> {
        let now = self.clock.now();
        let Some(proposal) = self.detector()?.observe(actor, location.clone(), now) else {
            return Ok(None);
        };

        let mut centre = proposal.bounds.center();
        centre.world = proposal.world.clone();
        let already_covered = self
            .read_index()?
            .find_containing(&centre)?
            .iter()
            .any(|r| r.is_owned_by(actor));
        self.detector()?.consume(actor);

        if already_covered {
            debug!(actor_id = %actor, "detected build site already covered by an owned region");
            return Ok(None);
        }
        let id = proposal.id.clone();
        self.register_region(proposal)?;
        info!(actor_id = %actor, region_id = %id, "auto-detected region registered");
        Ok(Some(id))
    }

    // -----------------------------------------------------------------------
    // Usage
    // -----------------------------------------------------------------------

    pub fn check_usage(&self, actor: &ActorId, action: &ActionType) -> WardenResult<UsageDecision> {
        Ok(self.ledger.check(actor, action, self.clock.now())?)
    }

    /// Record one action. A rejection feeds the rate-violation escalator.
    pub fn record_usage(&self, actor: &ActorId, action: &ActionType) -> WardenResult<UsageDecision> {
        let now = self.clock.now();
        let decision = self.ledger.record(actor, action, now)?;
        if !decision.allowed {
            self.escalate(actor, action, &decision)?;
        }
        Ok(decision)
    }

    pub(crate) fn escalate(
        &self,
        actor: &ActorId,
        action: &ActionType,
        decision: &UsageDecision,
    ) -> WardenResult<()> {
        let reason = decision
            .reason
            .map(|r| r.to_string())
            .unwrap_or_else(|| "throttled".to_string());
        self.escalator()?
            .record_failure(actor, action, &reason, self.clock.now(), &self.events);
        Ok(())
    }

    /// Store or overwrite a policy. Adaptive policies are handed to the
    /// controller, which decides the effective limits.
    pub fn configure_rate_limit(&self, policy: RateLimitPolicy) -> WardenResult<()> {
        policy.validate()?;
        let now = self.clock.now();
        {
            // Held through the ledger update so a concurrent load adjustment
            // cannot apply a rescale of the replaced base policy.
            let mut adaptive = self.adaptive()?;
            let effective = if policy.adaptive {
                adaptive.register(policy.clone())
            } else {
                adaptive.unregister(&policy.action_type);
                policy.clone()
            };
            self.ledger.configure(effective, now)?;
        }
        info!(
            action_type = %policy.action_type,
            limit = policy.limit,
            window_ms = policy.window_ms,
            adaptive = policy.adaptive,
            "rate limit configured"
        );
        self.events.publish(
            now,
            WardenEventKind::RateLimitConfigured {
                action_type: policy.action_type,
                limit: policy.limit,
                window_ms: policy.window_ms,
                adaptive: policy.adaptive,
            },
        );
        Ok(())
    }

    /// Effective policy currently enforced for an action type.
    pub fn policy(&self, action: &ActionType) -> WardenResult<Option<RateLimitPolicy>> {
        Ok(self.ledger.policy(action)?)
    }

    pub fn multiplier(&self, action: &ActionType) -> WardenResult<Option<f64>> {
        Ok(self.adaptive()?.multiplier(action))
    }

    /// Apply a load reading to every adaptive policy. Returns how many
    /// policies changed.
    pub fn adjust_for_load(&self, signal: LoadSignal) -> WardenResult<usize> {
        let now = self.clock.now();
        let adjustments = {
            let mut adaptive = self.adaptive()?;
            let adjustments = adaptive.observe(&signal)?;
            for adj in &adjustments {
                self.ledger.configure(adj.policy.clone(), now)?;
            }
            adjustments
        };
        for adj in &adjustments {
            self.events.publish(
                now,
                WardenEventKind::RateLimitAdjusted {
                    action_type: adj.policy.action_type.clone(),
                    multiplier: adj.multiplier,
                    limit: adj.policy.limit,
                },
            );
        }
        Ok(adjustments.len())
    }

    /// Clear one actor's tracker and escalation count for an action type.
    pub fn reset_usage(&self, actor: &ActorId, action: &ActionType) -> WardenResult<bool> {
        let tracker = self.ledger.reset(actor, action)?;
        let escalation = self.escalator()?.reset(actor, action);
        let reset = tracker || escalation;
        if reset {
            self.events.publish(
                self.clock.now(),
                WardenEventKind::RateLimitReset {
                    actor_id: actor.clone(),
                    action_type: action.clone(),
                },
            );
        }
        Ok(reset)
    }

    pub fn usage_snapshot(
        &self,
        actor: &ActorId,
        action: &ActionType,
    ) -> WardenResult<Option<UsageSnapshot>> {
        Ok(self.ledger.snapshot(actor, action, self.clock.now())?)
    }

    // -----------------------------------------------------------------------
    // Erasure
    // -----------------------------------------------------------------------

    /// Purge everything held about an actor: usage trackers, escalation
    /// counts, violation history and pending detector events. Decision log
    /// entries are kept but every mention of the actor, including as the
    /// owner behind another actor's denial, is pseudonymized. Returns whether
    /// anything was removed or rewritten.
    pub fn erase_actor(&self, actor: &ActorId) -> WardenResult<bool> {
        let ledger = self.ledger.erase_actor(actor)?;
        let violations = self.violations()?.erase_actor(actor);
        let escalations = self.escalator()?.erase_actor(actor);
        let detector = self.detector()?.erase_actor(actor);
        let pseudonym = pseudonymize(&self.erasure_salt, actor);
        let audit = self.audit.pseudonymize_actor(actor, &pseudonym)? > 0;

        let removed = ledger || violations || escalations || detector || audit;
        if removed {
            info!(actor_id = %actor, "actor erased");
            self.events.publish(
                self.clock.now(),
                WardenEventKind::ActorRemoved {
                    actor_id: actor.clone(),
                },
            );
        }
        Ok(removed)
    }
}
