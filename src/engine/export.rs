//! JSON export artifacts (`evaluation-<id>.json`).

use std::path::{Path, PathBuf};

use serde::Serialize;

use super::types::{ModelResult, TestRun};
use crate::error::AppError;

/// Pretty-printed JSON for any caller-assembled payload.
pub fn export_value<T: Serialize + ?Sized>(payload: &T) -> Result<Vec<u8>, AppError> {
    Ok(serde_json::to_vec_pretty(payload)?)
}

pub fn export_run(run: &TestRun) -> Result<Vec<u8>, AppError> {
    export_value(run)
}

/// A comparison set, wrapped as `{ "comparison": [...] }`.
pub fn export_comparison(results: &[ModelResult]) -> Result<Vec<u8>, AppError> {
    #[derive(Serialize)]
    struct ComparisonDoc<'a> {
        comparison: &'a [ModelResult],
    }
    export_value(&ComparisonDoc { comparison: results })
}

/// `evaluation-<testId>.json`, or `evaluation-<epoch-ms>.json` without an id.
pub fn export_filename(test_id: Option<&str>) -> String {
    let stem = match test_id.map(str::trim).filter(|id| !id.is_empty()) {
        Some(id) => id
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' { c } else { '_' })
            .collect::<String>(),
        None => chrono::Utc::now().timestamp_millis().to_string(),
    };
    format!("evaluation-{stem}.json")
}

/// Write `bytes` to `dir/file_name`, creating `dir` if needed. Returns the full path.
pub fn write_export(dir: &Path, file_name: &str, bytes: &[u8]) -> Result<PathBuf, AppError> {
    std::fs::create_dir_all(dir)?;
    let path = dir.join(file_name);
    std::fs::write(&path, bytes)?;
    tracing::info!(path = %path.display(), bytes = bytes.len(), "Wrote export");
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::types::{Latency, MetricKind, TokenUsage};
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    fn sample_run() -> TestRun {
        TestRun {
            test_id: "test_1700000000".into(),
            prompt: "What is the capital of France?".into(),
            ground_truth: Some("Paris".into()),
            use_rag: true,
            models: vec!["llama3.1".into(), "mistral".into()],
            metrics: vec![MetricKind::Ragas, MetricKind::ExactMatch],
            models_tested: 2,
            results: vec![
                ModelResult {
                    model: "llama3.1".into(),
                    response: Some("Paris".into()),
                    error: None,
                    latency: Some(Latency { total: 1.5, ttft: Some(0.25) }),
                    tokens: Some(TokenUsage { input: 10, output: 2, total: 12 }),
                    metrics: json!({
                        "ragas": { "ragas_score": 0.75, "faithfulness": 1.0 },
                        "exact_match": { "score": 1.0 }
                    })
                    .as_object()
                    .cloned(),
                },
                ModelResult::failed("mistral", "model not loaded"),
            ],
            total_time: 4.0,
            timestamp: Utc.timestamp_millis_opt(1_700_000_000_123).unwrap(),
        }
    }

    #[test]
    fn test_export_round_trip() {
        let run = sample_run();
        let bytes = export_run(&run).unwrap();
        let text = std::str::from_utf8(&bytes).unwrap();
        assert!(text.contains("\n  \"test_id\""), "expected pretty output: {text}");

        let back: TestRun = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(back, run);
    }

    #[test]
    fn test_export_comparison_shape() {
        let run = sample_run();
        let bytes = export_comparison(&run.results).unwrap();
        let v: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(v["comparison"].as_array().unwrap().len(), 2);
        assert_eq!(v["comparison"][1]["error"], "model not loaded");
    }

    #[test]
    fn test_export_filename() {
        assert_eq!(export_filename(Some("test_42")), "evaluation-test_42.json");
        assert_eq!(export_filename(Some("a/b")), "evaluation-a_b.json");

        let generated = export_filename(None);
        let stem = generated
            .strip_prefix("evaluation-")
            .and_then(|s| s.strip_suffix(".json"))
            .unwrap();
        assert!(stem.parse::<i64>().is_ok());
        assert!(export_filename(Some("  ")).starts_with("evaluation-"));
    }

    #[test]
    fn test_write_export() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("exports");
        let path = write_export(&out, "evaluation-x.json", b"{}").unwrap();
        assert_eq!(std::fs::read(path).unwrap(), b"{}");
    }
}
