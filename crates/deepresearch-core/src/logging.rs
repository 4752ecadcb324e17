//! Structured, per-run event log (ยง4.5): one JSON-Lines file per run at
//! `logs/<run_id>.jsonl`, one line per event. Secrets are redacted before
//! a payload is written, and whole run-log files are pruned once they
//! age past the configured retention window.
//!
//! Logging failures must never block the pipeline: every public function
//! here swallows its own I/O errors after emitting a `tracing::warn!`.

use std::collections::HashSet;
use std::fs::{self, create_dir_all, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use chrono::Utc;
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde::Serialize;
use serde_json::Value;
use tracing::warn;

const LOG_DIR_ENV: &str = "HDRP_LOG_DIR";
const RETENTION_ENV: &str = "HDRP_LOG_RETENTION_DAYS";
const DEFAULT_LOG_DIR: &str = "logs";
const DEFAULT_RETENTION_DAYS: u64 = 90;

static REDACTION_PATTERNS: Lazy<Vec<(String, Regex)>> = Lazy::new(|| {
    vec![
        (
            "api_key".to_string(),
            Regex::new(r"(?i)(api[_-]?key\s*[:=]\s*)([A-Za-z0-9\-_.+/]+)")
                .expect("invalid api_key regex"),
        ),
        (
            "secret".to_string(),
            Regex::new(r"(?i)(secret\s*[:=]\s*)([A-Za-z0-9\-_.+/]+)")
                .expect("invalid secret regex"),
        ),
        (
            "bearer".to_string(),
            Regex::new(r"(?i)(bearer\s+)([A-Za-z0-9\-_.+=/]+)").expect("invalid bearer regex"),
        ),
        (
            "sk_token".to_string(),
            Regex::new(r"(sk-[A-Za-z0-9]{16,})").expect("invalid sk_token regex"),
        ),
    ]
});

/// A single structured log line (ยง4.5's `{timestamp, level, component,
/// run_id, event, payload}` shape).
#[derive(Debug, Serialize)]
pub struct RunLogEntry<'a> {
    pub timestamp: String,
    pub level: &'a str,
    pub component: &'a str,
    pub run_id: &'a str,
    pub event: &'a str,
    pub payload: Value,
}

fn log_base_dir() -> PathBuf {
    std::env::var(LOG_DIR_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_LOG_DIR))
}

fn retention_days() -> u64 {
    std::env::var(RETENTION_ENV)
        .ok()
        .and_then(|value| value.parse::<u64>().ok())
        .unwrap_or(DEFAULT_RETENTION_DAYS)
}

fn run_log_path(run_id: &str) -> PathBuf {
    log_base_dir().join(format!("{run_id}.jsonl"))
}

fn sanitize_value(value: Value, redactions: &mut HashSet<String>) -> Value {
    match value {
        Value::String(s) => Value::String(sanitize_text(&s, redactions)),
        Value::Array(items) => Value::Array(
            items
                .into_iter()
                .map(|item| sanitize_value(item, redactions))
                .collect(),
        ),
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(k, v)| (k, sanitize_value(v, redactions)))
                .collect(),
        ),
        other => other,
    }
}

fn sanitize_text(input: &str, redactions: &mut HashSet<String>) -> String {
    let mut output = input.to_string();
    for (name, regex) in REDACTION_PATTERNS.iter() {
        let mut matched = false;
        output = regex
            .replace_all(&output, |caps: &Captures| {
                matched = true;
                if caps.len() > 1 {
                    format!("{}[REDACTED]", &caps[1])
                } else {
                    "[REDACTED]".to_string()
                }
            })
            .to_string();
        if matched {
            redactions.insert(name.clone());
        }
    }
    output
}

/// Append one event to `logs/<run_id>.jsonl`. Never fails the caller;
/// I/O errors are logged via `tracing` and otherwise swallowed.
pub fn log_event(run_id: &str, level: &str, component: &str, event: &str, payload: Value) {
    let mut redactions = HashSet::new();
    let payload = sanitize_value(payload, &mut redactions);

    let entry = RunLogEntry {
        timestamp: Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
        level,
        component,
        run_id,
        event,
        payload,
    };

    if let Err(err) = append_json_line(&run_log_path(run_id), &entry) {
        warn!(run_id, event, error = %err, "failed to append run log entry");
    }

    if !redactions.is_empty() {
        warn!(run_id, fields = ?redactions, "redacted potential secrets from run log payload");
    }

    enforce_retention();
}

fn append_json_line<T: Serialize>(path: &Path, value: &T) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        create_dir_all(parent)?;
    }
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    let mut writer = BufWriter::new(file);
    let line = serde_json::to_string(value)?;
    writeln!(writer, "{line}")?;
    writer.flush()?;
    Ok(())
}

fn enforce_retention() {
    let retention = retention_days();
    if retention == 0 {
        return;
    }
    let base_dir = log_base_dir();
    if !base_dir.exists() {
        return;
    }
    let cutoff = match SystemTime::now().checked_sub(Duration::from_secs(retention.saturating_mul(86_400)))
    {
        Some(cutoff) => cutoff,
        None => return,
    };

    let entries = match fs::read_dir(&base_dir) {
        Ok(entries) => entries,
        Err(err) => {
            warn!(error = %err, "failed to read log directory for retention pruning");
            return;
        }
    };

    for entry in entries.flatten() {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("jsonl") {
            continue;
        }
        if let Ok(metadata) = entry.metadata() {
            if metadata
                .modified()
                .map(|modified| modified < cutoff)
                .unwrap_or(false)
            {
                let _ = fs::remove_file(&path);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn log_event_writes_one_jsonl_line() {
        let temp = TempDir::new().unwrap();
        unsafe {
            std::env::set_var(LOG_DIR_ENV, temp.path());
            std::env::set_var(RETENTION_ENV, "90");
        }

        log_event(
            "run-abc",
            "info",
            "planner",
            "decompose_success",
            serde_json::json!({ "node_count": 3 }),
        );

        let path = temp.path().join("run-abc.jsonl");
        assert!(path.exists());
        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents.lines().count(), 1);
        let parsed: Value = serde_json::from_str(contents.trim()).unwrap();
        assert_eq!(parsed["run_id"], "run-abc");
        assert_eq!(parsed["event"], "decompose_success");

        unsafe {
            std::env::remove_var(LOG_DIR_ENV);
            std::env::remove_var(RETENTION_ENV);
        }
    }

    #[test]
    fn log_event_redacts_secrets_in_payload() {
        let temp = TempDir::new().unwrap();
        unsafe {
            std::env::set_var(LOG_DIR_ENV, temp.path());
        }

        log_event(
            "run-redact",
            "warn",
            "search",
            "provider_error",
            serde_json::json!({ "detail": "api_key=abcd1234efgh" }),
        );

        let path = temp.path().join("run-redact.jsonl");
        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.contains("[REDACTED]"));
        assert!(!contents.contains("abcd1234efgh"));

        unsafe {
            std::env::remove_var(LOG_DIR_ENV);
        }
    }
}
