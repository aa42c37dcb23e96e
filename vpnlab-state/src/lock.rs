//! State lock records
//!
//! A lock names the state it guards, the command holding it and the process
//! that took it, so a refused `apply` can tell the operator exactly which run
//! to wait for or which ID to pass to `force-unlock`.

use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Locks older than this are considered abandoned (15 minutes)
pub const DEFAULT_LOCK_TIMEOUT_SECS: i64 = 900;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockInfo {
    pub id: String,
    /// Command holding the lock ("apply" or "destroy")
    pub operation: String,
    /// Location of the guarded state file
    pub state: String,
    /// username@hostname
    pub who: String,
    pub pid: u32,
    pub created: DateTime<Utc>,
    pub expires: DateTime<Utc>,
}

impl LockInfo {
    /// Lock `state` for `operation` on behalf of this process
    pub fn new(operation: impl Into<String>, state: impl Into<String>) -> Self {
        Self::with_timeout(operation, state, DEFAULT_LOCK_TIMEOUT_SECS)
    }

    pub fn with_timeout(
        operation: impl Into<String>,
        state: impl Into<String>,
        timeout_secs: i64,
    ) -> Self {
        let created = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            operation: operation.into(),
            state: state.into(),
            who: lock_owner(),
            pid: std::process::id(),
            created,
            expires: created + Duration::seconds(timeout_secs),
        }
    }

    pub fn is_expired(&self) -> bool {
        Utc::now() > self.expires
    }
}

impl fmt::Display for LockInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} of {} by {} (pid {}) since {}",
            self.operation,
            self.state,
            self.who,
            self.pid,
            self.created.format("%Y-%m-%d %H:%M:%S UTC")
        )
    }
}

fn lock_owner() -> String {
    let username = std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_else(|_| "unknown".to_string());

    let hostname = hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "unknown".to_string());

    format!("{}@{}", username, hostname)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_records_state_and_process() {
        let lock = LockInfo::new("apply", "lab/vpnlab.tfstate.json");
        assert_eq!(lock.operation, "apply");
        assert_eq!(lock.state, "lab/vpnlab.tfstate.json");
        assert_eq!(lock.pid, std::process::id());
        assert!(lock.who.contains('@'));
        assert!(!lock.is_expired());
    }

    #[test]
    fn test_lock_expiry() {
        assert!(LockInfo::with_timeout("destroy", "s.json", -1).is_expired());

        let lock = LockInfo::with_timeout("apply", "s.json", 60);
        let remaining = (lock.expires - Utc::now()).num_seconds();
        assert!(remaining > 55 && remaining <= 60);
    }

    #[test]
    fn test_lock_display() {
        let mut lock = LockInfo::new("apply", "vpnlab.tfstate.json");
        lock.who = "ops@bastion".to_string();
        lock.pid = 4242;
        let shown = lock.to_string();
        assert!(shown.starts_with("apply of vpnlab.tfstate.json by ops@bastion (pid 4242) since "));
        assert!(shown.ends_with("UTC"));
    }

    #[test]
    fn test_lock_file_format() {
        let lock = LockInfo::new("apply", "vpnlab.tfstate.json");
        let json: serde_json::Value = serde_json::to_value(&lock).unwrap();
        assert_eq!(json["state"], "vpnlab.tfstate.json");
        assert_eq!(json["pid"], lock.pid);

        let back: LockInfo = serde_json::from_value(json).unwrap();
        assert_eq!(back.id, lock.id);
        assert_eq!(back.created, lock.created);
    }
}
