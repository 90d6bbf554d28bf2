//! Conflict-detection metadata: versioned, content-hashed, causality-tagged
//! records attached to every transaction, and the classifier that compares a
//! local/remote pair of them.

use crate::error::MetadataError;
use crate::hash;
use crate::payload::Payload;
use crate::transaction::TransactionId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConflictMetadata {
    pub transaction_id: TransactionId,
    pub version: u64,
    pub server_timestamp: Option<DateTime<Utc>>,
    pub device_timestamp: DateTime<Utc>,
    pub content_hash: String,
    pub parent_ids: Vec<TransactionId>,
    pub last_modified: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub user_id: String,
    pub device_id: String,
}

impl ConflictMetadata {
    /// `generate`: version=1, serverTimestamp=null, deviceTimestamp=createdAt=lastModified=now.
    pub fn generate(
        transaction_id: TransactionId,
        payload: &Payload,
        user_id: impl Into<String>,
        device_id: impl Into<String>,
        parent_ids: Vec<TransactionId>,
    ) -> Self {
        let now = Utc::now();
        Self {
            transaction_id,
            version: 1,
            server_timestamp: None,
            device_timestamp: now,
            content_hash: hash::hash(payload),
            parent_ids,
            last_modified: now,
            created_at: now,
            user_id: user_id.into(),
            device_id: device_id.into(),
        }
    }

    /// `update`: increments version, recomputes contentHash, refreshes
    /// deviceTimestamp/lastModified; preserves identity fields and serverTimestamp.
    pub fn update(&self, new_payload: &Payload) -> Self {
        let now = Utc::now();
        Self {
            transaction_id: self.transaction_id.clone(),
            version: self.version + 1,
            server_timestamp: self.server_timestamp,
            device_timestamp: now,
            content_hash: hash::hash(new_payload),
            parent_ids: self.parent_ids.clone(),
            last_modified: now,
            created_at: self.created_at,
            user_id: self.user_id.clone(),
            device_id: self.device_id.clone(),
        }
    }

    /// `validate`: enforces the data-model invariants, failing with a
    /// per-field reason.
    pub fn validate(&self) -> Result<(), MetadataError> {
        if self.version < 1 {
            return Err(MetadataError::ValidationFailed {
                field: "version".to_string(),
                reason: "version must be >= 1".to_string(),
            });
        }
        if !hash::is_valid_content_hash(&self.content_hash) {
            return Err(MetadataError::ValidationFailed {
                field: "content_hash".to_string(),
                reason: "must be 64 lowercase hex characters".to_string(),
            });
        }
        if self.user_id.is_empty() {
            return Err(MetadataError::ValidationFailed {
                field: "user_id".to_string(),
                reason: "must not be empty".to_string(),
            });
        }
        if self.device_id.is_empty() {
            return Err(MetadataError::ValidationFailed {
                field: "device_id".to_string(),
                reason: "must not be empty".to_string(),
            });
        }
        Ok(())
    }

    fn effective_timestamp(&self) -> DateTime<Utc> {
        self.server_timestamp.unwrap_or(self.last_modified)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictKind {
    NoConflict,
    VersionMismatch,
    HashMismatch,
    CausalityViolation,
    ConcurrentModification,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    /// No action required.
    None,
    UseLocal,
    UseRemote,
    /// Causality violations can't be resolved automatically.
    Manual,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConflictResult {
    pub kind: ConflictKind,
    pub resolution: Resolution,
}

impl ConflictResult {
    pub fn is_conflict(&self) -> bool {
        self.kind != ConflictKind::NoConflict
    }
}

const CONCURRENT_MODIFICATION_WINDOW_MS: i64 = 5000;

/// Last-write-wins tiebreak: compare `serverTimestamp ?? lastModified`;
/// strictly greater wins, ties broken by the larger deviceId lexicographically.
fn last_write_wins(local: &ConflictMetadata, remote: &ConflictMetadata) -> Resolution {
    let (lt, rt) = (local.effective_timestamp(), remote.effective_timestamp());
    match lt.cmp(&rt) {
        std::cmp::Ordering::Greater => Resolution::UseLocal,
        std::cmp::Ordering::Less => Resolution::UseRemote,
        std::cmp::Ordering::Equal => {
            if local.device_id >= remote.device_id {
                Resolution::UseLocal
            } else {
                Resolution::UseRemote
            }
        }
    }
}

/// Minimum-plus causality rule: a side's "known ancestry" is its own id plus
/// its `parent_ids`. Ordinary forward progress — either side's parent set is
/// empty, or one side's ancestry contains the other's id — is never a
/// violation. A violation is flagged only when both sides carry non-empty
/// parent sets, neither ancestry intersects the other, and the two versions
/// disagree by more than a single step (ruling out the case where one side
/// simply hasn't observed the other's most recent, directly-descended write).
fn causality_violated(local: &ConflictMetadata, remote: &ConflictMetadata) -> bool {
    if local.parent_ids.is_empty() || remote.parent_ids.is_empty() {
        return false;
    }

    let local_ancestry: std::collections::HashSet<&TransactionId> = std::iter::once(&local.transaction_id)
        .chain(local.parent_ids.iter())
        .collect();
    let remote_ancestry: std::collections::HashSet<&TransactionId> = std::iter::once(&remote.transaction_id)
        .chain(remote.parent_ids.iter())
        .collect();

    let intersects = local.parent_ids.iter().any(|p| remote_ancestry.contains(p))
        || remote.parent_ids.iter().any(|p| local_ancestry.contains(p));
    if intersects {
        return false;
    }

    let version_gap = (local.version as i64 - remote.version as i64).abs();
    version_gap > 1
}

/// `detect(local, remote) -> ConflictResult`, evaluated in this order: equal
/// version+hash, causality violation, version mismatch, concurrent
/// modification, hash mismatch, otherwise no conflict.
///
/// Causality is checked ahead of a plain version mismatch since a disjoint,
/// diverging history is the more serious condition and should win when both
/// would otherwise apply. Concurrent modification is checked ahead of hash
/// mismatch for the same reason: both fire on a same-version, different-hash
/// pair, and a same-version hash difference from another device within the
/// window is always a concurrent edit rather than a plain hash mismatch —
/// checking hash mismatch first would make concurrent modification
/// unreachable.
pub fn detect(local: &ConflictMetadata, remote: &ConflictMetadata) -> ConflictResult {
    if local.version == remote.version && local.content_hash == remote.content_hash {
        return ConflictResult {
            kind: ConflictKind::NoConflict,
            resolution: Resolution::None,
        };
    }

    if causality_violated(local, remote) {
        return ConflictResult {
            kind: ConflictKind::CausalityViolation,
            resolution: Resolution::Manual,
        };
    }

    if local.version != remote.version {
        return ConflictResult {
            kind: ConflictKind::VersionMismatch,
            resolution: last_write_wins(local, remote),
        };
    }

    let delta_ms = (local.last_modified - remote.last_modified).num_milliseconds().abs();
    if delta_ms < CONCURRENT_MODIFICATION_WINDOW_MS && local.device_id != remote.device_id {
        return ConflictResult {
            kind: ConflictKind::ConcurrentModification,
            resolution: last_write_wins(local, remote),
        };
    }

    if local.content_hash != remote.content_hash {
        return ConflictResult {
            kind: ConflictKind::HashMismatch,
            resolution: last_write_wins(local, remote),
        };
    }

    ConflictResult {
        kind: ConflictKind::NoConflict,
        resolution: Resolution::None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payload::Payload;
    use chrono::Duration;
    use serde_json::json;
    use uuid::Uuid;

    fn tx_id() -> TransactionId {
        TransactionId(Uuid::new_v4())
    }

    fn payload(name: &str) -> Payload {
        Payload::new("companies", "update", json!({"name": name}))
    }

    #[test]
    fn generate_sets_version_one_and_null_server_timestamp() {
        let meta = ConflictMetadata::generate(tx_id(), &payload("Acme"), "u1", "d1", vec![]);
        assert_eq!(meta.version, 1);
        assert!(meta.server_timestamp.is_none());
        assert_eq!(meta.device_timestamp, meta.created_at);
        assert_eq!(meta.device_timestamp, meta.last_modified);
    }

    #[test]
    fn update_increments_version_and_preserves_identity() {
        let meta = ConflictMetadata::generate(tx_id(), &payload("Acme"), "u1", "d1", vec![tx_id()]);
        let updated = meta.update(&payload("Acme Inc"));
        assert_eq!(updated.version, meta.version + 1);
        assert_eq!(updated.content_hash, hash::hash(&payload("Acme Inc")));
        assert_eq!(updated.user_id, meta.user_id);
        assert_eq!(updated.device_id, meta.device_id);
        assert_eq!(updated.created_at, meta.created_at);
        assert_eq!(updated.parent_ids, meta.parent_ids);
    }

    #[test]
    fn detect_no_conflict_when_version_and_hash_match() {
        let meta = ConflictMetadata::generate(tx_id(), &payload("Acme"), "u1", "d1", vec![]);
        let result = detect(&meta, &meta.clone());
        assert_eq!(result.kind, ConflictKind::NoConflict);
    }

    #[test]
    fn detect_version_mismatch_prefers_remote_when_newer() {
        let id = tx_id();
        let mut local = ConflictMetadata::generate(id.clone(), &payload("Acme"), "u1", "d1", vec![]);
        let mut remote = local.clone();
        remote.version = 2;
        local.last_modified = Utc::now() - Duration::seconds(10);
        remote.last_modified = Utc::now();

        let result = detect(&local, &remote);
        assert_eq!(result.kind, ConflictKind::VersionMismatch);
        assert_eq!(result.resolution, Resolution::UseRemote);
    }

    #[test]
    fn detect_hash_mismatch_same_version() {
        let id = tx_id();
        let local = ConflictMetadata::generate(id.clone(), &payload("Acme"), "u1", "d1", vec![]);
        let mut remote = local.clone();
        remote.content_hash = hash::hash(&payload("Acme Corp"));
        remote.last_modified = Utc::now() + Duration::seconds(5);

        let result = detect(&local, &remote);
        assert_eq!(result.kind, ConflictKind::HashMismatch);
    }

    #[test]
    fn detect_concurrent_modification_within_window_different_devices() {
        let id = tx_id();
        let mut local = ConflictMetadata::generate(id.clone(), &payload("Acme"), "u1", "d1", vec![]);
        let mut remote = local.clone();
        remote.device_id = "d2".to_string();
        remote.content_hash = hash::hash(&payload("different"));
        local.last_modified = Utc::now();
        remote.last_modified = local.last_modified + Duration::seconds(2);
        // same version so we don't hit version_mismatch first
        remote.version = local.version;

        let result = detect(&local, &remote);
        assert_eq!(result.kind, ConflictKind::ConcurrentModification);
    }

    #[test]
    fn forward_progress_with_no_parents_is_not_a_causality_violation() {
        let id = tx_id();
        let local = ConflictMetadata::generate(id.clone(), &payload("Acme"), "u1", "d1", vec![]);
        let mut remote = local.clone();
        remote.version = 5;
        remote.content_hash = hash::hash(&payload("newer"));

        let result = detect(&local, &remote);
        assert_ne!(result.kind, ConflictKind::CausalityViolation);
    }

    #[test]
    fn causality_violation_when_ancestries_disjoint_and_versions_diverge() {
        let local_id = tx_id();
        let remote_id = tx_id();
        let mut local = ConflictMetadata::generate(local_id.clone(), &payload("Acme"), "u1", "d1", vec![tx_id()]);
        let mut remote = ConflictMetadata::generate(remote_id.clone(), &payload("Acme"), "u2", "d2", vec![tx_id()]);
        local.transaction_id = local_id;
        remote.transaction_id = remote_id;
        local.version = 2;
        remote.version = 5;

        let result = detect(&local, &remote);
        assert_eq!(result.kind, ConflictKind::CausalityViolation);
        assert_eq!(result.resolution, Resolution::Manual);
    }

    #[test]
    fn validate_rejects_malformed_hash() {
        let mut meta = ConflictMetadata::generate(tx_id(), &payload("Acme"), "u1", "d1", vec![]);
        meta.content_hash = "not-a-hash".to_string();
        assert!(meta.validate().is_err());
    }
}
