//! Artefact bundle writer (ยง4.5): `artifacts/<run_id>/report.md` and
//! `artifacts/<run_id>/metadata.json`. Failure to persist never fails the
//! run — every error here is logged and swallowed.

use std::fs;
use std::path::PathBuf;

use chrono::Utc;
use serde::Serialize;
use tracing::warn;

use crate::synthesiser::SourceSummary;

const ARTIFACT_DIR_ENV: &str = "HDRP_ARTIFACT_DIR";
const DEFAULT_ARTIFACT_DIR: &str = "artifacts";
const SYSTEM_NAME: &str = "hdrp";
const SYSTEM_VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct BundleStatistics {
    pub total_claims: usize,
    pub verified_claims: usize,
    pub rejected_claims: usize,
    pub unique_sources: usize,
}

#[derive(Serialize)]
struct BundleInfo {
    run_id: String,
    generated_at: String,
    query: String,
    report_title: String,
}

#[derive(Serialize)]
struct SourceRecord {
    url: String,
    title: String,
    rank: usize,
    claims: usize,
}

#[derive(Serialize)]
struct Provenance {
    system: &'static str,
    version: &'static str,
    pipeline: [&'static str; 4],
    verification_enabled: bool,
}

#[derive(Serialize)]
struct Metadata {
    bundle_info: BundleInfo,
    statistics: BundleStatistics,
    sources: Vec<SourceRecord>,
    provenance: Provenance,
}

fn artifact_base_dir() -> PathBuf {
    std::env::var(ARTIFACT_DIR_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_ARTIFACT_DIR))
}

/// Writes the artefact bundle for a completed run. Returns `true` if both
/// files were written; any failure (including an invalid `run_id`) is
/// logged and reported as `false` without propagating an error.
pub fn write_bundle(
    run_id: &str,
    query: &str,
    report_title: &str,
    report: &str,
    sources: &[SourceSummary],
    statistics: BundleStatistics,
    verification_enabled: bool,
) -> bool {
    if run_id.contains(std::path::MAIN_SEPARATOR) || run_id.contains('/') {
        warn!(run_id, "refusing to write artefacts for run_id containing a path separator");
        return false;
    }

    let run_dir = artifact_base_dir().join(run_id);
    if let Err(err) = fs::create_dir_all(&run_dir) {
        warn!(run_id, error = %err, "failed to create artefact directory");
        return false;
    }

    let report_path = run_dir.join("report.md");
    let normalized_report = report.replace("\r\n", "\n");
    if let Err(err) = fs::write(&report_path, &normalized_report) {
        warn!(run_id, error = %err, "failed to write report.md");
        return false;
    }

    let metadata = Metadata {
        bundle_info: BundleInfo {
            run_id: run_id.to_string(),
            generated_at: Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
            query: query.to_string(),
            report_title: report_title.to_string(),
        },
        statistics,
        sources: sources
            .iter()
            .map(|s| SourceRecord {
                url: s.url.clone(),
                title: s.title.clone(),
                rank: s.rank,
                claims: s.claims,
            })
            .collect(),
        provenance: Provenance {
            system: SYSTEM_NAME,
            version: SYSTEM_VERSION,
            pipeline: ["Planner", "Researcher", "Critic", "Synthesiser"],
            verification_enabled,
        },
    };

    let metadata_path = run_dir.join("metadata.json");
    let serialized = match serde_json::to_vec_pretty(&metadata) {
        Ok(bytes) => bytes,
        Err(err) => {
            warn!(run_id, error = %err, "failed to serialise metadata.json");
            return false;
        }
    };
    if let Err(err) = fs::write(&metadata_path, serialized) {
        warn!(run_id, error = %err, "failed to write metadata.json");
        return false;
    }

    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_report_and_metadata() {
        let temp = tempfile::tempdir().unwrap();
        unsafe {
            std::env::set_var(ARTIFACT_DIR_ENV, temp.path());
        }

        let sources = vec![SourceSummary {
            url: "https://example.invalid/a".to_string(),
            title: "Example".to_string(),
            rank: 1,
            claims: 1,
        }];
        let stats = BundleStatistics {
            total_claims: 1,
            verified_claims: 1,
            rejected_claims: 0,
            unique_sources: 1,
        };

        let ok = write_bundle(
            "run-artifact-1",
            "capital of France",
            "HDRP Research Report: capital of France",
            "# report\n",
            &sources,
            stats,
            true,
        );
        assert!(ok);

        let run_dir = temp.path().join("run-artifact-1");
        assert!(run_dir.join("report.md").exists());
        let metadata_raw = fs::read_to_string(run_dir.join("metadata.json")).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&metadata_raw).unwrap();
        assert_eq!(parsed["bundle_info"]["run_id"], "run-artifact-1");
        assert!(parsed["bundle_info"]["generated_at"]
            .as_str()
            .unwrap()
            .ends_with('Z'));
        assert_eq!(parsed["statistics"]["total_claims"], 1);
        assert_eq!(parsed["provenance"]["pipeline"][0], "Planner");

        unsafe {
            std::env::remove_var(ARTIFACT_DIR_ENV);
        }
    }

    #[test]
    fn rejects_run_id_with_path_separator() {
        let ok = write_bundle(
            "../escape",
            "q",
            "title",
            "report",
            &[],
            BundleStatistics::default(),
            true,
        );
        assert!(!ok);
    }
}
