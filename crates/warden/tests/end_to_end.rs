//! End-to-end tests driving the public `Warden` API.
//!
//! Journey 1: Private region owned by one actor, visited by another
//! Journey 2: Chat throttling through the pipeline
//! Journey 3: Consent, anonymization and fail-closed collaborators
//! Journey 4: Erasure and decision log integrity
//! Journey 5: Configuration on disk

use async_trait::async_trait;
use serde_json::json;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use warden::{
    Anonymizer, DataType, PipelineStage, ProcessRequest, StaticConsent, Warden, WardenConfig,
    WardenResult,
};
use warden_core::{
    ActionType, ActorId, InMemoryEventSink, Location, ManualClock, RegionId, Timestamp,
};
use warden_geofence::{
    AccessRequest, ActionCategory, BoundingBox, PermissionLevel, PermissionMatrix,
    PrivacySettings, Region, RegionKind, Vec3,
};
use warden_throttle::{LoadSignal, RateLimitPolicy, ThrottleReason};

static CONFIG_COUNTER: AtomicU64 = AtomicU64::new(0);

fn start() -> Arc<ManualClock> {
    Arc::new(ManualClock::new(Timestamp::from_seconds(1_700_000_000)))
}

fn alice_home() -> Region {
    Region::new(
        "alice-home",
        "Alice's home",
        RegionKind::PrivateArea,
        BoundingBox::from_origin(Vec3::new(0.0, 0.0, 0.0), 10.0),
    )
    .with_owner("alice")
    .with_permissions(PermissionMatrix::owner_only())
}

fn chat_limited() -> WardenConfig {
    let mut config = WardenConfig::default();
    config.regions.push(alice_home());
    config
        .rate_limits
        .push(RateLimitPolicy::new("chat", 10, 60_000));
    config
}

// ============================================================================
// Journey 1: Private region
// ============================================================================

#[test]
fn test_journey_owner_only_region() {
    let sink = Arc::new(InMemoryEventSink::new());
    let warden = Warden::builder(chat_limited())
        .clock(start())
        .subscriber(sink.clone())
        .build()
        .unwrap();
    let inside = Location::new(5.0, 5.0, 5.0);

    let bob = warden
        .query_access(&AccessRequest::new("bob", "enter", inside.clone()))
        .unwrap();
    assert!(!bob.decision.allowed);
    assert!(
        bob.decision.reason.contains("owner-only"),
        "unexpected reason: {}",
        bob.decision.reason
    );
    assert_eq!(bob.regions, vec![RegionId::new("alice-home")]);
    assert_eq!(bob.violation.as_ref().map(|v| v.count), Some(1));

    let alice = warden
        .query_access(&AccessRequest::new("alice", "enter", inside))
        .unwrap();
    assert!(alice.decision.allowed);
    assert!(alice.violation.is_none());

    // Outside the box nothing applies
    let outside = warden
        .query_access(&AccessRequest::new("bob", "enter", Location::new(10.5, 5.0, 5.0)))
        .unwrap();
    assert!(outside.decision.allowed);
    assert_eq!(outside.decision.reason, "no applicable regions");

    assert_eq!(sink.count("violation-detected"), 1);
}

#[test]
fn test_journey_overlapping_regions_most_restrictive_wins() {
    let clock = start();
    let warden = Warden::builder(WardenConfig::default())
        .clock(clock)
        .build()
        .unwrap();

    let market = Region::new(
        "market",
        "Market square",
        RegionKind::SocialSpace,
        BoundingBox::from_origin(Vec3::new(0.0, 0.0, 0.0), 50.0),
    )
    .with_permissions(PermissionMatrix {
        building: PermissionLevel::Limited,
        ..PermissionMatrix::default()
    });
    let mine = Region::new(
        "mine",
        "Quarry",
        RegionKind::RestrictedResource,
        BoundingBox::from_origin(Vec3::new(10.0, 0.0, 10.0), 10.0),
    )
    .with_permissions(PermissionMatrix {
        resource_extraction: PermissionLevel::Prohibited,
        ..PermissionMatrix::default()
    });
    warden.register_region(market).unwrap();
    warden.register_region(mine).unwrap();

    let at = Location::new(15.0, 5.0, 15.0);
    let build = warden
        .query_access(&AccessRequest::new("bob", "place_block", at.clone()))
        .unwrap();
    assert!(build.decision.allowed);
    assert_eq!(build.decision.restriction_tags(), vec!["limited:building@market"]);

    let dig = warden
        .query_access(&AccessRequest::new("bob", "mine_ore", at.clone()))
        .unwrap();
    assert!(!dig.decision.allowed);
    assert_eq!(dig.violation.unwrap().region_id, RegionId::new("mine"));

    // An explicit category overrides the keyword heuristic
    let tagged = warden
        .query_access(
            &AccessRequest::new("bob", "swing_pickaxe", at)
                .with_category(ActionCategory::ResourceExtraction),
        )
        .unwrap();
    assert!(!tagged.decision.allowed);
}

#[test]
fn test_journey_worlds_are_separate() {
    let warden = Warden::builder(WardenConfig::default())
        .clock(start())
        .build()
        .unwrap();
    warden
        .register_region(alice_home().in_world("overworld"))
        .unwrap();

    let nether = Location::new(5.0, 5.0, 5.0).in_world("nether");
    assert!(warden.regions_at(&nether).unwrap().is_empty());

    let overworld = Location::new(5.0, 5.0, 5.0).in_world("overworld");
    assert_eq!(warden.regions_at(&overworld).unwrap().len(), 1);
}

// ============================================================================
// Journey 2: Chat throttling
// ============================================================================

#[tokio::test]
async fn test_journey_chat_limit_through_pipeline() {
    let clock = start();
    let warden = Warden::builder(chat_limited())
        .clock(clock.clone())
        .build()
        .unwrap();

    for i in 0..10 {
        let outcome = warden
            .process(ProcessRequest::new("bob", "chat", json!({ "text": format!("msg {i}") })))
            .await;
        assert!(outcome.allowed, "message {i} denied: {}", outcome.reason);
        clock.advance(100);
    }

    let eleventh = warden
        .process(ProcessRequest::new("bob", "chat", json!({ "text": "one more" })))
        .await;
    assert!(!eleventh.allowed);
    assert_eq!(eleventh.denied_at, Some(PipelineStage::Usage));
    assert!(eleventh.retry_after_ms.unwrap() > 0);
    assert_eq!(
        eleventh.usage.as_ref().and_then(|u| u.reason),
        Some(ThrottleReason::RateLimited)
    );

    // Once the first message leaves the window a slot opens again
    clock.advance(eleventh.retry_after_ms.unwrap());
    assert!(
        warden
            .process(ProcessRequest::new("bob", "chat", json!({ "text": "later" })))
            .await
            .allowed
    );

    // Other actors have their own quota
    assert!(
        warden
            .process(ProcessRequest::new("carol", "chat", json!("hi")))
            .await
            .allowed
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_journey_concurrent_requests_never_exceed_limit() {
    let warden = Arc::new(
        Warden::builder(chat_limited())
            .clock(start())
            .build()
            .unwrap(),
    );

    let mut handles = Vec::new();
    for i in 0..40 {
        let warden = warden.clone();
        handles.push(tokio::spawn(async move {
            warden
                .process(ProcessRequest::new("bob", "chat", json!(i)))
                .await
                .allowed
        }));
    }
    let mut allowed = 0;
    for handle in handles {
        if handle.await.unwrap() {
            allowed += 1;
        }
    }
    assert_eq!(allowed, 10);

    let snapshot = warden
        .usage_snapshot(&ActorId::new("bob"), &ActionType::new("chat"))
        .unwrap()
        .unwrap();
    assert_eq!(snapshot.in_window, 10);
    assert_eq!(snapshot.total_actions, 10);
}

#[test]
fn test_journey_burst_cooldown_and_load() {
    let clock = start();
    let sink = Arc::new(InMemoryEventSink::new());
    let mut config = WardenConfig::default();
    config.throttle.escalation_threshold = 3;
    let warden = Warden::builder(config)
        .clock(clock.clone())
        .subscriber(sink.clone())
        .build()
        .unwrap();
    let bob = ActorId::new("bob");

    warden
        .configure_rate_limit(RateLimitPolicy::new("trade", 60, 60_000).with_cooldown(2_000))
        .unwrap();
    let trade = ActionType::new("trade");
    assert!(warden.record_usage(&bob, &trade).unwrap().allowed);
    let early = warden.record_usage(&bob, &trade).unwrap();
    assert_eq!(early.reason, Some(ThrottleReason::Cooldown));
    assert_eq!(early.retry_after_ms, Some(2_000));
    clock.advance(2_000);
    assert!(warden.record_usage(&bob, &trade).unwrap().allowed);

    warden
        .configure_rate_limit(RateLimitPolicy::new("emote", 60, 60_000).with_burst(3))
        .unwrap();
    let emote = ActionType::new("emote");
    for _ in 0..3 {
        assert!(warden.record_usage(&bob, &emote).unwrap().allowed);
    }
    let burst = warden.record_usage(&bob, &emote).unwrap();
    assert_eq!(burst.reason, Some(ThrottleReason::BurstExhausted));
    // One token per second refills
    clock.advance(1_000);
    assert!(warden.record_usage(&bob, &emote).unwrap().allowed);
    warden.record_usage(&bob, &emote).unwrap();

    // Escalation counts are kept per action type
    assert_eq!(sink.count("rate-violation"), 3);
    assert_eq!(sink.count("threshold-exceeded"), 0);

    warden
        .configure_rate_limit(RateLimitPolicy::new("chat", 10, 60_000).adaptive())
        .unwrap();
    warden.adjust_for_load(LoadSignal::new(0.9)).unwrap();
    warden.adjust_for_load(LoadSignal::new(0.9)).unwrap();
    let chat = ActionType::new("chat");
    assert_eq!(warden.multiplier(&chat).unwrap(), Some(0.8));
    assert_eq!(warden.policy(&chat).unwrap().map(|p| p.limit), Some(8));
}

// ============================================================================
// Journey 3: Consent, anonymization, fail-closed
// ============================================================================

struct StalledAnonymizer;

#[async_trait]
impl Anonymizer for StalledAnonymizer {
    async fn anonymize(
        &self,
        _: DataType,
        _: &ActorId,
        payload: serde_json::Value,
    ) -> WardenResult<serde_json::Value> {
        tokio::time::sleep(Duration::from_secs(60)).await;
        Ok(payload)
    }
}

fn plaza() -> Region {
    Region::new(
        "plaza",
        "Plaza",
        RegionKind::SocialSpace,
        BoundingBox::from_origin(Vec3::new(100.0, 0.0, 100.0), 30.0),
    )
    .with_privacy(PrivacySettings {
        anonymize_activities: true,
        ..PrivacySettings::default()
    })
}

#[tokio::test]
async fn test_journey_consent_gates_everything() {
    let consent = Arc::new(StaticConsent::new());
    consent.require("voice", &["voice_recording"]).unwrap();
    let warden = Warden::builder(chat_limited())
        .clock(start())
        .consent(consent.clone())
        .build()
        .unwrap();

    let request = ProcessRequest::new("bob", "voice", json!({ "clip": "..." }))
        .with_purpose("party chat");
    let denied = warden.process(request.clone()).await;
    assert!(!denied.allowed);
    assert_eq!(denied.denied_at, Some(PipelineStage::Consent));
    assert_eq!(denied.missing_consents, vec!["voice_recording".to_string()]);
    // Denied before usage: nothing recorded
    assert!(warden
        .usage_snapshot(&ActorId::new("bob"), &ActionType::new("voice"))
        .unwrap()
        .is_none());

    consent
        .grant(&ActorId::new("bob"), "voice_recording")
        .unwrap();
    assert!(warden.process(request).await.allowed);
}

#[tokio::test]
async fn test_journey_private_region_blocks_in_pipeline() {
    let warden = Warden::builder(chat_limited())
        .clock(start())
        .build()
        .unwrap();
    let outcome = warden
        .process(
            ProcessRequest::new("bob", "chat", json!("hello"))
                .at(Location::new(5.0, 5.0, 5.0)),
        )
        .await;
    assert!(!outcome.allowed);
    assert_eq!(outcome.denied_at, Some(PipelineStage::Spatial));
    assert!(outcome.reason.contains("owner-only"));
    // Spatial denial does not consume quota
    assert!(warden
        .usage_snapshot(&ActorId::new("bob"), &ActionType::new("chat"))
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn test_journey_anonymized_location_payload() {
    let mut config = WardenConfig::default();
    config.regions.push(plaza());
    let warden = Warden::builder(config).clock(start()).build().unwrap();

    let outcome = warden
        .process(
            ProcessRequest::new(
                "bob",
                "share_position",
                json!({ "x": 107.3, "y": 64.0, "z": 112.9, "who": "bob" }),
            )
                .with_data_type(DataType::Location)
                .at(Location::new(107.3, 10.0, 112.9)),
        )
        .await;
    assert!(outcome.allowed);
    assert!(outcome.anonymized);
    assert!(outcome.obligations.anonymize);
    let payload = outcome.payload.unwrap();
    assert_eq!(payload["x"], json!(100.0));
    assert_eq!(payload["z"], json!(110.0));
    assert_ne!(payload["who"], json!("bob"));
}

#[tokio::test(start_paused = true)]
async fn test_journey_stalled_anonymizer_fails_closed() {
    let mut config = WardenConfig::default();
    config.regions.push(plaza());
    config.pipeline.collaborator_timeout_ms = 250;
    let warden = Warden::builder(config)
        .clock(start())
        .anonymizer(Arc::new(StalledAnonymizer))
        .build()
        .unwrap();

    let outcome = warden
        .process(
            ProcessRequest::new("bob", "chat", json!("hi"))
                .with_data_type(DataType::Chat)
                .at(Location::new(100.0, 1.0, 100.0)),
        )
        .await;
    assert!(!outcome.allowed);
    assert_eq!(outcome.reason, "processing_error");
    assert_eq!(outcome.denied_at, Some(PipelineStage::Transform));
    assert!(outcome.payload.is_none());

    let log = warden.audit_log().entries().unwrap();
    assert_eq!(log.len(), 1);
    assert_eq!(log[0].record.reason, "processing_error");
}

// ============================================================================
// Journey 4: Erasure
// ============================================================================

#[tokio::test]
async fn test_journey_erasure_pseudonymizes_log() {
    let clock = start();
    let sink = Arc::new(InMemoryEventSink::new());
    let warden = Warden::builder(chat_limited())
        .clock(clock.clone())
        .subscriber(sink.clone())
        .build()
        .unwrap();
    let bob = ActorId::new("bob");

    for _ in 0..3 {
        warden
            .process(ProcessRequest::new("bob", "chat", json!("hi")))
            .await;
        clock.advance(10);
    }
    warden
        .process(ProcessRequest::new("carol", "chat", json!("hey")))
        .await;
    warden
        .process(ProcessRequest::new("bob", "enter", json!({})).at(Location::new(1.0, 1.0, 1.0)))
        .await;
    assert_eq!(warden.violations_for(&bob).unwrap().len(), 1);

    assert!(warden.erase_actor(&bob).unwrap());

    let log = warden.audit_log().entries().unwrap();
    assert_eq!(log.len(), 5);
    assert!(log.iter().all(|e| e.record.actor != "bob"));
    assert_eq!(log.iter().filter(|e| e.record.actor == "carol").count(), 1);
    assert!(warden.audit_log().verify_chain().unwrap());

    assert!(warden.violations_for(&bob).unwrap().is_empty());
    assert!(warden
        .usage_snapshot(&bob, &ActionType::new("chat"))
        .unwrap()
        .is_none());
    assert_eq!(sink.count("actor-removed"), 1);
}

#[tokio::test]
async fn test_journey_erasing_region_owner_scrubs_denials_of_others() {
    let warden = Warden::builder(chat_limited())
        .clock(start())
        .build()
        .unwrap();
    let outcome = warden
        .process(
            ProcessRequest::new("bob", "chat", json!("knock knock"))
                .at(Location::new(5.0, 5.0, 5.0)),
        )
        .await;
    assert!(!outcome.allowed);
    assert!(outcome.reason.contains("owner=alice"));
    let before = serde_json::to_string(&warden.audit_log().entries().unwrap()).unwrap();
    assert!(before.contains("alice"));

    // Alice never acted herself, yet the log names her
    assert!(warden.erase_actor(&ActorId::new("alice")).unwrap());

    let entries = warden.audit_log().entries().unwrap();
    let after = serde_json::to_string(&entries).unwrap();
    assert!(!after.contains("alice"));
    assert_eq!(entries[0].record.actor, "bob");
    assert!(entries[0].record.reason.contains("owner=anon-"));
    assert_eq!(entries[0].record.related_actors.len(), 1);
    assert!(entries[0].record.related_actors[0].starts_with("anon-"));
    assert!(warden.audit_log().verify_chain().unwrap());
}

// ============================================================================
// Journey 5: Configuration on disk
// ============================================================================

#[test]
fn test_journey_config_file_bootstraps_engine() {
    let id = CONFIG_COUNTER.fetch_add(1, Ordering::SeqCst);
    let dir = std::env::temp_dir().join(format!("warden-e2e-{}-{}", std::process::id(), id));
    let path = dir.join("config.toml");

    let mut config = chat_limited();
    config.pipeline.collaborator_timeout_ms = 500;
    config.save(&path).unwrap();

    let loaded = WardenConfig::load(&path).unwrap();
    assert_eq!(loaded, config);

    let warden = Warden::builder(loaded).clock(start()).build().unwrap();
    assert_eq!(warden.regions().unwrap().len(), 1);
    assert_eq!(
        warden
            .policy(&ActionType::new("chat"))
            .unwrap()
            .map(|p| p.limit),
        Some(10)
    );

    let _ = std::fs::remove_dir_all(&dir);
}
