//! Decision log for pipeline outcomes.
//!
//! Records are hash-chained: each hash covers the previous hash and the
//! serialized record, so any in-place edit breaks verification.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::{Mutex, MutexGuard};
use warden_core::{ActorId, Timestamp};

use crate::error::{WardenError, WardenResult};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionRecord {
    pub entry_id: String,
    pub timestamp: Timestamp,
    /// Actor id, or its pseudonym once the actor has been erased.
    pub actor: String,
    pub operation: String,
    pub purpose: String,
    pub allowed: bool,
    pub reason: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub denied_at: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub restrictions: Vec<String>,
    /// Other actors the decision names, such as the owner of the region
    /// that denied it.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub related_actors: Vec<String>,
    pub anonymized: bool,
}

impl DecisionRecord {
    // Rewrites every reference to `actor`. Returns whether anything changed.
    fn pseudonymize(&mut self, actor: &str, pseudonym: &str) -> bool {
        let mut changed = false;
        if self.actor == actor {
            self.actor = pseudonym.to_string();
            changed = true;
        }
        for related in self.related_actors.iter_mut() {
            if related == actor {
                *related = pseudonym.to_string();
                changed = true;
            }
        }
        if let Some(reason) = replace_id(&self.reason, actor, pseudonym) {
            self.reason = reason;
            changed = true;
        }
        for tag in self.restrictions.iter_mut() {
            if let Some(rewritten) = replace_id(tag, actor, pseudonym) {
                *tag = rewritten;
                changed = true;
            }
        }
        changed
    }
}

fn is_id_char(c: char) -> bool {
    c.is_alphanumeric() || matches!(c, '_' | '-' | '.')
}

/// Replace whole-token occurrences of `id` in `text`. `None` when there
/// were none.
fn replace_id(text: &str, id: &str, replacement: &str) -> Option<String> {
    if id.is_empty() {
        return None;
    }
    let mut out = String::with_capacity(text.len());
    let mut changed = false;
    let mut start = 0;
    while let Some(found) = text[start..].find(id) {
        let pos = start + found;
        let end = pos + id.len();
        let bounded = !text[..pos].chars().next_back().is_some_and(is_id_char)
            && !text[end..].chars().next().is_some_and(is_id_char);
        out.push_str(&text[start..pos]);
        if bounded {
            out.push_str(replacement);
            changed = true;
        } else {
            out.push_str(id);
        }
        start = end;
    }
    out.push_str(&text[start..]);
    changed.then_some(out)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainedRecord {
    pub record: DecisionRecord,
    pub hash: String,
}

fn chain_hash(previous: Option<&str>, record: &DecisionRecord) -> WardenResult<String> {
    let json = serde_json::to_vec(record)?;
    let mut hasher = Sha256::new();
    if let Some(prev) = previous {
        hasher.update(prev.as_bytes());
    }
    hasher.update(&json);
    Ok(hex::encode(hasher.finalize()))
}

/// Thread-safe in-memory decision log.
#[derive(Default)]
pub struct DecisionLog {
    entries: Mutex<Vec<ChainedRecord>>,
}

impl DecisionLog {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> WardenResult<MutexGuard<'_, Vec<ChainedRecord>>> {
        self.entries
            .lock()
            .map_err(|_| WardenError::Internal("decision log lock poisoned".into()))
    }

    /// Append a record. Returns its chain hash.
    pub fn record(&self, record: DecisionRecord) -> WardenResult<String> {
        let mut entries = self.lock()?;
        let hash = chain_hash(entries.last().map(|e| e.hash.as_str()), &record)?;
        entries.push(ChainedRecord {
            record,
            hash: hash.clone(),
        });
        Ok(hash)
    }

    pub fn entries(&self) -> WardenResult<Vec<ChainedRecord>> {
        Ok(self.lock()?.clone())
    }

    /// The most recent `limit` records, oldest first.
    pub fn tail(&self, limit: usize) -> WardenResult<Vec<ChainedRecord>> {
        let entries = self.lock()?;
        let start = entries.len().saturating_sub(limit);
        Ok(entries[start..].to_vec())
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Recompute every hash and compare with the stored one.
    pub fn verify_chain(&self) -> WardenResult<bool> {
        let entries = self.lock()?;
        let mut previous: Option<&str> = None;
        for entry in entries.iter() {
            if chain_hash(previous, &entry.record)? != entry.hash {
                return Ok(false);
            }
            previous = Some(entry.hash.as_str());
        }
        Ok(true)
    }

    /// Replace the actor's id with `pseudonym` wherever a retained record
    /// names it (as the requester, a related actor, or inside the reason and
    /// restriction text) and reseal the chain. Returns how many records were
    /// rewritten.
    pub fn pseudonymize_actor(&self, actor: &ActorId, pseudonym: &str) -> WardenResult<usize> {
        let mut entries = self.lock()?;
        let mut rewritten = 0;
        for entry in entries.iter_mut() {
            if entry.record.pseudonymize(actor.as_str(), pseudonym) {
                rewritten += 1;
            }
        }
        if rewritten > 0 {
            let mut previous: Option<String> = None;
            for entry in entries.iter_mut() {
                entry.hash = chain_hash(previous.as_deref(), &entry.record)?;
                previous = Some(entry.hash.clone());
            }
            tracing::info!(records = rewritten, "decision log pseudonymized and resealed");
        }
        Ok(rewritten)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(actor: &str, allowed: bool) -> DecisionRecord {
        DecisionRecord {
            entry_id: uuid::Uuid::new_v4().to_string(),
            timestamp: Timestamp::from_seconds(1_700_000_000),
            actor: actor.to_string(),
            operation: "chat".to_string(),
            purpose: "social".to_string(),
            allowed,
            reason: if allowed { "allowed".into() } else { "rate limit exceeded".into() },
            denied_at: (!allowed).then(|| "usage".to_string()),
            restrictions: Vec::new(),
            related_actors: Vec::new(),
            anonymized: false,
        }
    }

    #[test]
    fn test_new_log_is_empty_and_valid() {
        let log = DecisionLog::new();
        assert!(log.is_empty());
        assert!(log.verify_chain().unwrap());
    }

    #[test]
    fn test_record_chains_hashes() {
        let log = DecisionLog::new();
        let h1 = log.record(record("bob", true)).unwrap();
        let h2 = log.record(record("bob", false)).unwrap();
        assert_eq!(h1.len(), 64);
        assert_ne!(h1, h2);
        assert_eq!(log.len(), 2);
        assert!(log.verify_chain().unwrap());
    }

    #[test]
    fn test_tampering_detected() {
        let log = DecisionLog::new();
        log.record(record("bob", false)).unwrap();
        log.record(record("carol", true)).unwrap();
        {
            let mut entries = log.entries.lock().unwrap();
            entries[0].record.allowed = true;
        }
        assert!(!log.verify_chain().unwrap());
    }

    #[test]
    fn test_pseudonymize_rewrites_and_reseals() {
        let log = DecisionLog::new();
        log.record(record("bob", true)).unwrap();
        log.record(record("carol", true)).unwrap();
        log.record(record("bob", false)).unwrap();

        let n = log
            .pseudonymize_actor(&ActorId::new("bob"), "anon-1234")
            .unwrap();
        assert_eq!(n, 2);
        let entries = log.entries().unwrap();
        assert!(entries.iter().all(|e| e.record.actor != "bob"));
        assert_eq!(entries[1].record.actor, "carol");
        assert!(log.verify_chain().unwrap());

        assert_eq!(
            log.pseudonymize_actor(&ActorId::new("bob"), "anon-1234")
                .unwrap(),
            0
        );
    }

    #[test]
    fn test_tail() {
        let log = DecisionLog::new();
        for i in 0..5 {
            log.record(record(&format!("actor-{i}"), true)).unwrap();
        }
        let tail = log.tail(2).unwrap();
        assert_eq!(tail.len(), 2);
        assert_eq!(tail[1].record.actor, "actor-4");
        assert_eq!(log.tail(10).unwrap().len(), 5);
    }

    #[test]
    fn test_pseudonymize_scrubs_related_actor_and_reason() {
        let log = DecisionLog::new();
        let mut denied = record("bob", false);
        denied.reason = "owner-only access, owner=alice".to_string();
        denied.related_actors = vec!["alice".to_string()];
        log.record(denied).unwrap();
        let mut other = record("carol", false);
        other.reason = "owner-only access, owner=alicent".to_string();
        log.record(other).unwrap();

        let n = log
            .pseudonymize_actor(&ActorId::new("alice"), "anon-feed")
            .unwrap();
        assert_eq!(n, 1);
        let entries = log.entries().unwrap();
        assert_eq!(entries[0].record.actor, "bob");
        assert_eq!(entries[0].record.reason, "owner-only access, owner=anon-feed");
        assert_eq!(entries[0].record.related_actors, vec!["anon-feed".to_string()]);
        // Only whole ids are replaced
        assert_eq!(entries[1].record.reason, "owner-only access, owner=alicent");
        assert!(log.verify_chain().unwrap());
    }

    #[test]
    fn test_replace_id_respects_token_boundaries() {
        assert_eq!(
            replace_id("alice's build site", "alice", "anon-1").as_deref(),
            Some("anon-1's build site")
        );
        assert_eq!(replace_id("malice", "alice", "anon-1"), None);
        assert_eq!(
            replace_id("alice,alice", "alice", "x").as_deref(),
            Some("x,x")
        );
        assert_eq!(replace_id("anything", "", "x"), None);
    }
}
