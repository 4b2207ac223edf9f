//! Per-run append-only network log.
//!
//! One JSON object per line, one `write` per entry on an `O_APPEND`
//! descriptor, so concurrent flows logging to the same run file never
//! interleave within a line. Write failures are logged and swallowed; audit
//! I/O must never affect the flow that triggered it.

use std::path::Path;

use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tracing::warn;

use vm0_policy::Action;

/// Which enforcement path produced the entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditMode {
    /// Pre-handshake decision from the ClientHello SNI.
    Sni,
    /// Post-decryption decision with full HTTP detail.
    Mitm,
}

/// One decision event.
#[derive(Debug, Clone, Serialize)]
pub struct AuditEntry {
    /// ISO-8601 UTC, second precision.
    pub timestamp: String,
    pub mode: AuditMode,
    pub action: Action,
    pub host: String,
    pub port: u16,
    pub rule_matched: Option<String>,

    // HTTP detail, present in MITM mode only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    /// Request path with the query stripped.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    /// Full original URL, before any rewrite.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_size: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_size: Option<usize>,
}

impl AuditEntry {
    pub fn new(
        mode: AuditMode,
        action: Action,
        host: impl Into<String>,
        port: u16,
        rule_matched: Option<String>,
    ) -> Self {
        Self {
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
            mode,
            action,
            host: host.into(),
            port,
            rule_matched,
            method: None,
            path: None,
            url: None,
            status: None,
            latency_ms: None,
            request_size: None,
            response_size: None,
        }
    }
}

/// Append one entry to the run's network log, creating it (mode 0644) if
/// absent. Never returns an error.
pub async fn append(path: &Path, entry: &AuditEntry) {
    let line = match serde_json::to_string(entry) {
        Ok(line) => line,
        Err(e) => {
            warn!(error = %e, "failed to serialize network log entry");
            return;
        }
    };

    let result = async {
        let mut opts = OpenOptions::new();
        opts.create(true).append(true);
        #[cfg(unix)]
        opts.mode(0o644);
        let mut file = opts.open(path).await?;
        file.write_all(format!("{line}\n").as_bytes()).await
    }
    .await;

    if let Err(e) = result {
        warn!(path = %path.display(), error = %e, "failed to write network log");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;
    use tempfile::TempDir;

    #[tokio::test]
    async fn appends_one_line_per_entry() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("net.jsonl");

        let sni = AuditEntry::new(
            AuditMode::Sni,
            Action::Allow,
            "api.example.com",
            443,
            Some("domain:*.example.com".to_string()),
        );
        let mut mitm = AuditEntry::new(
            AuditMode::Mitm,
            Action::Deny,
            "blocked.test",
            443,
            Some("default".to_string()),
        );
        mitm.method = Some("GET".to_string());
        mitm.status = Some(403);

        append(&path, &sni).await;
        append(&path, &mitm).await;

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<Value> = content
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["mode"], "sni");
        assert_eq!(lines[0]["action"], "ALLOW");
        assert_eq!(lines[0]["rule_matched"], "domain:*.example.com");
        // SNI entries carry no HTTP detail fields at all.
        assert!(lines[0].get("status").is_none());
        assert_eq!(lines[1]["mode"], "mitm");
        assert_eq!(lines[1]["status"], 403);
    }

    #[tokio::test]
    async fn write_failure_is_swallowed() {
        // A directory path cannot be opened for append; append must not panic.
        let dir = TempDir::new().unwrap();
        let entry = AuditEntry::new(AuditMode::Sni, Action::Deny, "x.test", 443, None);
        append(dir.path(), &entry).await;
    }

    #[test]
    fn timestamp_is_second_precision_utc() {
        let entry = AuditEntry::new(AuditMode::Sni, Action::Allow, "h", 443, None);
        assert!(entry.timestamp.ends_with('Z'));
        assert!(!entry.timestamp.contains('.'));
    }
}
