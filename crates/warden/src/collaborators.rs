//! External collaborators the pipeline awaits: consent and anonymization.
//!
//! Both are traits so deployments can plug in remote services. The
//! in-memory implementations here are complete enough to run the pipeline
//! standalone and in tests.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::RwLock;
use warden_core::ActorId;

use crate::error::{WardenError, WardenResult};

/// Kind of payload flowing through the pipeline; selects the anonymizer
/// transform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataType {
    Chat,
    Location,
    Activity,
    #[default]
    Generic,
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataType::Chat => write!(f, "chat"),
            DataType::Location => write!(f, "location"),
            DataType::Activity => write!(f, "activity"),
            DataType::Generic => write!(f, "generic"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsentStatus {
    pub allowed: bool,
    /// Consent kinds the operation needs but the actor has not granted.
    #[serde(default)]
    pub missing_kinds: Vec<String>,
}

impl ConsentStatus {
    pub fn granted() -> Self {
        Self {
            allowed: true,
            missing_kinds: Vec::new(),
        }
    }
}

#[async_trait]
pub trait ConsentProvider: Send + Sync {
    async fn check_status(&self, actor: &ActorId, operation: &str) -> WardenResult<ConsentStatus>;
}

#[async_trait]
pub trait Anonymizer: Send + Sync {
    async fn anonymize(
        &self,
        data_type: DataType,
        actor: &ActorId,
        payload: Value,
    ) -> WardenResult<Value>;
}

/// Stable pseudonym for an actor: `anon-` plus the first 16 hex digits of
/// SHA-256 over salt and id.
pub fn pseudonymize(salt: &str, actor: &ActorId) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update([0u8]);
    hasher.update(actor.as_str().as_bytes());
    let digest = hex::encode(hasher.finalize());
    format!("anon-{}", &digest[..16])
}

// ---------------------------------------------------------------------------
// StaticConsent
// ---------------------------------------------------------------------------

/// In-memory consent registry: per-operation required kinds and per-actor
/// grants. Operations with no requirements are always allowed.
#[derive(Default)]
pub struct StaticConsent {
    requirements: RwLock<HashMap<String, BTreeSet<String>>>,
    grants: RwLock<HashMap<ActorId, BTreeSet<String>>>,
}

impl StaticConsent {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn require(&self, operation: &str, kinds: &[&str]) -> WardenResult<()> {
        let mut requirements = self
            .requirements
            .write()
            .map_err(|_| WardenError::Internal("consent requirements lock poisoned".into()))?;
        requirements
            .entry(operation.to_string())
            .or_default()
            .extend(kinds.iter().map(|k| k.to_string()));
        Ok(())
    }

    pub fn grant(&self, actor: &ActorId, kind: &str) -> WardenResult<()> {
        self.grants
            .write()
            .map_err(|_| WardenError::Internal("consent grants lock poisoned".into()))?
            .entry(actor.clone())
            .or_default()
            .insert(kind.to_string());
        Ok(())
    }

    pub fn revoke(&self, actor: &ActorId, kind: &str) -> WardenResult<bool> {
        let mut grants = self
            .grants
            .write()
            .map_err(|_| WardenError::Internal("consent grants lock poisoned".into()))?;
        Ok(grants.get_mut(actor).map(|g| g.remove(kind)).unwrap_or(false))
    }

    fn evaluate(&self, actor: &ActorId, operation: &str) -> WardenResult<ConsentStatus> {
        let requirements = self
            .requirements
            .read()
            .map_err(|_| WardenError::Internal("consent requirements lock poisoned".into()))?;
        let Some(required) = requirements.get(operation) else {
            return Ok(ConsentStatus::granted());
        };
        let grants = self
            .grants
            .read()
            .map_err(|_| WardenError::Internal("consent grants lock poisoned".into()))?;
        let granted = grants.get(actor);
        let missing_kinds: Vec<String> = required
            .iter()
            .filter(|kind| !granted.is_some_and(|g| g.contains(*kind)))
            .cloned()
            .collect();
        Ok(ConsentStatus {
            allowed: missing_kinds.is_empty(),
            missing_kinds,
        })
    }
}

#[async_trait]
impl ConsentProvider for StaticConsent {
    async fn check_status(&self, actor: &ActorId, operation: &str) -> WardenResult<ConsentStatus> {
        self.evaluate(actor, operation)
    }
}

// ---------------------------------------------------------------------------
// RedactingAnonymizer
// ---------------------------------------------------------------------------

const REDACTED: &str = "[redacted]";
const TEXT_FIELDS: &[&str] = &["text", "message", "content"];
const COORDINATE_FIELDS: &[&str] = &["x", "y", "z"];

/// Reference anonymizer.
///
/// Every variant replaces the actor's id wherever it appears as a string
/// value with its pseudonym. On top of that, chat payloads have their text
/// redacted and location payloads have coordinates snapped to the grid.
pub struct RedactingAnonymizer {
    salt: String,
    grid: f64,
}

impl Default for RedactingAnonymizer {
    fn default() -> Self {
        Self {
            salt: "warden".to_string(),
            grid: 10.0,
        }
    }
}

impl RedactingAnonymizer {
    pub fn new(salt: impl Into<String>) -> Self {
        Self {
            salt: salt.into(),
            ..Self::default()
        }
    }

    pub fn pseudonym(&self, actor: &ActorId) -> String {
        pseudonymize(&self.salt, actor)
    }

    fn fuzz(&self, v: f64) -> f64 {
        (v / self.grid).floor() * self.grid
    }

    fn transform(&self, data_type: DataType, actor: &ActorId, payload: Value) -> Value {
        let pseudonym = self.pseudonym(actor);
        let payload = replace_actor(payload, actor.as_str(), &pseudonym);
        match data_type {
            DataType::Chat => match payload {
                Value::String(_) => Value::String(REDACTED.to_string()),
                Value::Object(mut map) => {
                    for field in TEXT_FIELDS {
                        if let Some(v) = map.get_mut(*field) {
                            *v = Value::String(REDACTED.to_string());
                        }
                    }
                    Value::Object(map)
                }
                other => other,
            },
            DataType::Location => match payload {
                Value::Object(mut map) => {
                    for field in COORDINATE_FIELDS {
                        if let Some(v) = map.get_mut(*field) {
                            if let Some(n) = v.as_f64() {
                                *v = Value::from(self.fuzz(n));
                            }
                        }
                    }
                    Value::Object(map)
                }
                Value::Array(items) => Value::Array(
                    items
                        .into_iter()
                        .map(|v| match v.as_f64() {
                            Some(n) => Value::from(self.fuzz(n)),
                            None => v,
                        })
                        .collect(),
                ),
                other => other,
            },
            DataType::Activity | DataType::Generic => payload,
        }
    }
}

fn replace_actor(value: Value, actor: &str, pseudonym: &str) -> Value {
    match value {
        Value::String(s) if s == actor => Value::String(pseudonym.to_string()),
        Value::Array(items) => Value::Array(
            items
                .into_iter()
                .map(|v| replace_actor(v, actor, pseudonym))
                .collect(),
        ),
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(k, v)| (k, replace_actor(v, actor, pseudonym)))
                .collect(),
        ),
        other => other,
    }
}

#[async_trait]
impl Anonymizer for RedactingAnonymizer {
    async fn anonymize(
        &self,
        data_type: DataType,
        actor: &ActorId,
        payload: Value,
    ) -> WardenResult<Value> {
        Ok(self.transform(data_type, actor, payload))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_no_requirements_is_granted() {
        let consent = StaticConsent::new();
        let status = consent
            .check_status(&ActorId::new("bob"), "chat")
            .await
            .unwrap();
        assert_eq!(status, ConsentStatus::granted());
    }

    #[tokio::test]
    async fn test_missing_kinds_listed_in_order() {
        let consent = StaticConsent::new();
        let bob = ActorId::new("bob");
        consent.require("voice", &["voice_recording", "analytics"]).unwrap();
        consent.grant(&bob, "analytics").unwrap();

        let status = consent.check_status(&bob, "voice").await.unwrap();
        assert!(!status.allowed);
        assert_eq!(status.missing_kinds, vec!["voice_recording".to_string()]);

        consent.grant(&bob, "voice_recording").unwrap();
        assert!(consent.check_status(&bob, "voice").await.unwrap().allowed);

        assert!(consent.revoke(&bob, "analytics").unwrap());
        let status = consent.check_status(&bob, "voice").await.unwrap();
        assert_eq!(status.missing_kinds, vec!["analytics".to_string()]);
    }

    #[test]
    fn test_pseudonym_is_stable_and_salted() {
        let bob = ActorId::new("bob");
        let a = pseudonymize("s1", &bob);
        assert_eq!(a, pseudonymize("s1", &bob));
        assert_ne!(a, pseudonymize("s2", &bob));
        assert!(a.starts_with("anon-"));
        assert_eq!(a.len(), 5 + 16);
    }

    #[tokio::test]
    async fn test_chat_redaction() {
        let anonymizer = RedactingAnonymizer::default();
        let bob = ActorId::new("bob");
        let out = anonymizer
            .anonymize(
                DataType::Chat,
                &bob,
                json!({ "sender": "bob", "text": "meet me at my base", "channel": "global" }),
            )
            .await
            .unwrap();
        assert_eq!(out["text"], REDACTED);
        assert_eq!(out["channel"], "global");
        assert_eq!(out["sender"], anonymizer.pseudonym(&bob));

        let plain = anonymizer
            .anonymize(DataType::Chat, &bob, json!("hello"))
            .await
            .unwrap();
        assert_eq!(plain, json!(REDACTED));
    }

    #[tokio::test]
    async fn test_location_fuzzing() {
        let anonymizer = RedactingAnonymizer::default();
        let out = anonymizer
            .anonymize(
                DataType::Location,
                &ActorId::new("bob"),
                json!({ "x": 123.4, "y": 64.0, "z": -7.5, "world": "overworld" }),
            )
            .await
            .unwrap();
        assert_eq!(out["x"], json!(120.0));
        assert_eq!(out["y"], json!(60.0));
        assert_eq!(out["z"], json!(-10.0));
        assert_eq!(out["world"], "overworld");
    }

    #[tokio::test]
    async fn test_activity_pseudonymizes_nested_ids() {
        let anonymizer = RedactingAnonymizer::new("pepper");
        let bob = ActorId::new("bob");
        let out = anonymizer
            .anonymize(
                DataType::Activity,
                &bob,
                json!({ "participants": ["bob", "carol"], "detail": { "by": "bob" } }),
            )
            .await
            .unwrap();
        let p = anonymizer.pseudonym(&bob);
        assert_eq!(out["participants"], json!([p.clone(), "carol"]));
        assert_eq!(out["detail"]["by"], json!(p));
    }
}
