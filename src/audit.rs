//! Audit trail for health recalculations.
//!
//! Each recalculation records who triggered it and the row before and after.
//! `FileAudit` writes one JSON file per entry to `{audit_dir}/` and prunes
//! entries older than the retention period.

use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::types::{AccountHealth, OrgContext};
use crate::util::{atomic_write_str, sanitize_for_filename};

/// Default number of days to keep audit files before pruning.
pub const AUDIT_RETENTION_DAYS: u32 = 30;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthAuditEntry {
    pub action: String,
    pub org_id: String,
    pub account_id: String,
    pub actor: String,
    pub before: Option<AccountHealth>,
    pub after: AccountHealth,
    pub recorded_at: String,
}

impl HealthAuditEntry {
    pub fn recalculation(ctx: &OrgContext, before: Option<AccountHealth>, after: AccountHealth) -> Self {
        Self {
            action: "health.recalculate".to_string(),
            org_id: ctx.org_id.clone(),
            account_id: after.account_id.clone(),
            actor: ctx.actor_label().to_string(),
            before,
            after,
            recorded_at: crate::db::timestamp(Utc::now()),
        }
    }
}

/// Sink for audit entries. Failures are reported, never fatal to the caller.
pub trait HealthAudit {
    fn record(&self, entry: &HealthAuditEntry) -> Result<(), String>;
}

/// Discards every entry.
pub struct NoopAudit;

impl HealthAudit for NoopAudit {
    fn record(&self, _entry: &HealthAuditEntry) -> Result<(), String> {
        Ok(())
    }
}

/// JSON-file audit trail.
pub struct FileAudit {
    dir: PathBuf,
}

impl FileAudit {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl HealthAudit for FileAudit {
    fn record(&self, entry: &HealthAuditEntry) -> Result<(), String> {
        let json = serde_json::to_string_pretty(entry)
            .map_err(|e| format!("Audit serialization failed: {}", e))?;
        write_audit_entry(&self.dir, &entry.org_id, &entry.account_id, &json).map(|_| ())
    }
}

/// Write one audit entry.
///
/// Creates `{audit_dir}/{timestamp}_{org_id}_{account_id}_{nonce}.json`.
/// Uses atomic writes for crash safety. Returns the path of the written file.
pub fn write_audit_entry(
    audit_dir: &Path,
    org_id: &str,
    account_id: &str,
    content: &str,
) -> Result<PathBuf, String> {
    if !audit_dir.exists() {
        std::fs::create_dir_all(audit_dir)
            .map_err(|e| format!("Failed to create audit dir: {}", e))?;
    }

    let timestamp = Utc::now().format("%Y%m%dT%H%M%S%.3fZ");
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    let filename = format!(
        "{}_{}_{}_{}.json",
        timestamp,
        sanitize_for_filename(org_id),
        sanitize_for_filename(account_id),
        &suffix[..8]
    );
    let file_path = audit_dir.join(&filename);

    atomic_write_str(&file_path, content).map_err(|e| format!("Audit write failed: {}", e))?;

    Ok(file_path)
}

/// Delete audit files older than `retention_days`.
///
/// Returns the number of files pruned.
pub fn prune_audit_files(audit_dir: &Path, retention_days: u32) -> usize {
    if !audit_dir.exists() {
        return 0;
    }

    let cutoff = Utc::now() - chrono::Duration::days(retention_days as i64);
    let cutoff_ts = cutoff.timestamp();

    let entries = match std::fs::read_dir(audit_dir) {
        Ok(e) => e,
        Err(_) => return 0,
    };

    let mut pruned = 0;
    for entry in entries.flatten() {
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let mtime = match path.metadata().and_then(|m| m.modified()) {
            Ok(t) => t,
            Err(_) => continue,
        };
        let mtime_secs = mtime
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs() as i64;

        if mtime_secs < cutoff_ts && std::fs::remove_file(&path).is_ok() {
            pruned += 1;
        }
    }
    if pruned > 0 {
        log::info!("Pruned {} audit files from {}", pruned, audit_dir.display());
    }
    pruned
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{RiskLevel, SubScores};

    fn sample_health(score: u8) -> AccountHealth {
        AccountHealth {
            org_id: "org-1".into(),
            account_id: "acme".into(),
            score,
            previous_score: None,
            sub_scores: SubScores::uniform(score),
            risk_level: RiskLevel::Low,
            is_at_risk: false,
            risk_reasons: Vec::new(),
            degraded_dimensions: Vec::new(),
            last_login_at: None,
            last_contact_at: None,
            last_meeting_at: None,
            open_ticket_count: 0,
            calculated_at: "2025-06-01T00:00:00Z".into(),
            updated_at: "2025-06-01T00:00:00Z".into(),
        }
    }

    #[test]
    fn test_file_audit_records_actor_and_states() {
        let dir = tempfile::tempdir().expect("tempdir");
        let audit = FileAudit::new(dir.path().join("_audit"));
        let ctx = OrgContext::new("org-1").with_actor("jane@acme.test");
        let entry = HealthAuditEntry::recalculation(&ctx, Some(sample_health(60)), sample_health(72));

        audit.record(&entry).expect("record");

        let files: Vec<_> = std::fs::read_dir(audit.dir()).unwrap().flatten().collect();
        assert_eq!(files.len(), 1);
        let content = std::fs::read_to_string(files[0].path()).unwrap();
        let parsed: HealthAuditEntry = serde_json::from_str(&content).unwrap();
        assert_eq!(parsed.actor, "jane@acme.test");
        assert_eq!(parsed.before.map(|b| b.score), Some(60));
        assert_eq!(parsed.after.score, 72);
    }

    #[test]
    fn test_write_audit_entry_sanitizes_id() {
        let dir = tempfile::tempdir().expect("tempdir");

        let path = write_audit_entry(dir.path(), "org-1", "foo/bar baz\\qux", "{}")
            .expect("write should succeed");

        let filename = path.file_name().unwrap().to_str().unwrap();
        assert!(!filename.contains('/'));
        assert!(!filename.contains(' '));
        assert!(filename.contains("org-1_foo_bar_baz_qux"));
        assert!(filename.ends_with(".json"));
    }

    #[test]
    fn test_prune_removes_old_keeps_recent() {
        let dir = tempfile::tempdir().expect("tempdir");

        let recent = write_audit_entry(dir.path(), "org-1", "recent", "{}").expect("write");
        let old = write_audit_entry(dir.path(), "org-1", "old", "{}").expect("write");

        // Backdate the old file's mtime to 60 days ago
        let old_time =
            std::time::SystemTime::now() - std::time::Duration::from_secs(60 * 24 * 3600);
        filetime::set_file_mtime(&old, filetime::FileTime::from_system_time(old_time))
            .expect("set mtime");

        let pruned = prune_audit_files(dir.path(), AUDIT_RETENTION_DAYS);

        assert_eq!(pruned, 1);
        assert!(!old.exists(), "old file should be deleted");
        assert!(recent.exists(), "recent file should be kept");
    }

    #[test]
    fn test_prune_missing_dir_is_noop() {
        let dir = tempfile::tempdir().expect("tempdir");
        assert_eq!(prune_audit_files(&dir.path().join("absent"), 30), 0);
    }
}
