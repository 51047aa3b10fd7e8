//! Lock documents and lock-owner identity.

use serde::{Deserialize, Serialize};

use crate::types::{RecordKey, RecordType, TimestampMs};

/// Advisory edit lock as stored in the shared document store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LockRecord {
    /// Document id, `"<recordType>_<recordId>"`.
    pub lock_id: String,
    /// Identity of the holder.
    pub owner_id: String,
    /// Display name of the holder, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_name: Option<String>,
    /// Budget the holder belongs to, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub budget_id: Option<String>,
    /// Kind of the locked record.
    pub record_type: RecordType,
    /// Id of the locked record.
    pub record_id: String,
    /// When the current holder first took the lock.
    pub acquired_at: TimestampMs,
    /// Last renewal time; expiry is measured from here.
    pub last_heartbeat_at: TimestampMs,
    /// Advisory expiry hint for readers, `last_heartbeat_at + ttl`.
    pub expires_at: TimestampMs,
    /// Set once the holder re-acquired its own lock.
    #[serde(default)]
    pub extended: bool,
}

impl LockRecord {
    /// Fresh lock for `key` held by `owner`.
    pub fn new(key: &RecordKey, owner: &LockOwner, now: TimestampMs, ttl_ms: u64) -> Self {
        Self {
            lock_id: key.lock_id(),
            owner_id: owner.id.clone(),
            owner_name: owner.display_name.clone(),
            budget_id: owner.budget_id.clone(),
            record_type: key.record_type,
            record_id: key.record_id.clone(),
            acquired_at: now,
            last_heartbeat_at: now,
            expires_at: now.saturating_add(ttl_ms),
            extended: false,
        }
    }

    /// Composite key of the locked record.
    pub fn key(&self) -> RecordKey {
        RecordKey::new(self.record_type, self.record_id.clone())
    }

    /// True once more than `ttl_ms` has passed since the last heartbeat.
    pub fn is_expired(&self, now: TimestampMs, ttl_ms: u64) -> bool {
        now.saturating_sub(self.last_heartbeat_at) > ttl_ms
    }

    /// Milliseconds left before expiry, zero if already expired.
    pub fn time_remaining(&self, now: TimestampMs, ttl_ms: u64) -> u64 {
        self.last_heartbeat_at
            .saturating_add(ttl_ms)
            .saturating_sub(now)
    }

    /// True when `owner_id` holds this lock.
    pub fn is_owned_by(&self, owner_id: &str) -> bool {
        !owner_id.is_empty() && self.owner_id == owner_id
    }

    /// Moves the heartbeat (and expiry hint) to `now`.
    pub fn renew(&mut self, now: TimestampMs, ttl_ms: u64) {
        self.last_heartbeat_at = now;
        self.expires_at = now.saturating_add(ttl_ms);
    }
}

/// The signed-in identity that takes locks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockOwner {
    /// Stable owner id written into lock records.
    pub id: String,
    /// Human-readable name shown to blocked collaborators.
    pub display_name: Option<String>,
    /// Budget the owner is working in.
    pub budget_id: Option<String>,
}

impl LockOwner {
    /// Owner with an explicit id.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_name: None,
            budget_id: None,
        }
    }

    /// Derives the owner id from whatever profile fields are present.
    ///
    /// Precedence: non-empty `id`, then non-empty `budget_id`, then
    /// `"user_"` plus the lowercased `user_name` with every character outside
    /// `[a-z0-9]` replaced by `_`, then `"anonymous"`.
    pub fn resolve(id: Option<&str>, budget_id: Option<&str>, user_name: Option<&str>) -> Self {
        let non_empty = |v: Option<&str>| v.filter(|s| !s.is_empty()).map(str::to_owned);

        let display_name = non_empty(user_name);
        let budget = non_empty(budget_id);
        let resolved = non_empty(id)
            .or_else(|| budget.clone())
            .or_else(|| display_name.as_deref().map(sanitize_user_name))
            .unwrap_or_else(|| "anonymous".to_string());

        Self {
            id: resolved,
            display_name,
            budget_id: budget,
        }
    }

    /// Attaches a display name.
    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }

    /// Attaches a budget id.
    pub fn with_budget(mut self, budget_id: impl Into<String>) -> Self {
        self.budget_id = Some(budget_id.into());
        self
    }
}

fn sanitize_user_name(name: &str) -> String {
    let body: String = name
        .to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_lowercase() || c.is_ascii_digit() { c } else { '_' })
        .collect();
    format!("user_{body}")
}
