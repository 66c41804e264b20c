use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::AppError;

// ============================================================================
// Metric vocabulary
// ============================================================================

/// Evaluation metrics the backend knows how to compute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    Ragas,
    Bleu,
    Rouge,
    Bertscore,
    ExactMatch,
}

impl MetricKind {
    pub const ALL: [MetricKind; 5] = [
        MetricKind::Ragas,
        MetricKind::Bleu,
        MetricKind::Rouge,
        MetricKind::Bertscore,
        MetricKind::ExactMatch,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MetricKind::Ragas => "ragas",
            MetricKind::Bleu => "bleu",
            MetricKind::Rouge => "rouge",
            MetricKind::Bertscore => "bertscore",
            MetricKind::ExactMatch => "exact_match",
        }
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MetricKind {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        MetricKind::ALL
            .into_iter()
            .find(|m| m.as_str() == wanted)
            .ok_or_else(|| {
                AppError::InvalidInput(format!(
                    "unknown metric '{s}' (expected one of: ragas, bleu, rouge, bertscore, exact_match)"
                ))
            })
    }
}

// ============================================================================
// Per-model outcome
// ============================================================================

/// Round-trip timing for one model, in seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Latency {
    pub total: f64,
    /// Time to first generated token.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttft: Option<f64>,
}

/// Token accounting as reported by the backend. `total` is taken verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input: u64,
    pub output: u64,
    pub total: u64,
}

/// Outcome for one model within a run.
///
/// Exactly one of `response` / `error` is meaningful. Optional measurements stay
/// `None` when the backend did not report them, so "not reported" never reads as zero.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelResult {
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latency: Option<Latency>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tokens: Option<TokenUsage>,
    /// Metric id -> metric-specific payload (scalar or nested object).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics: Option<serde_json::Map<String, serde_json::Value>>,
}

impl ModelResult {
    /// A result for a model that produced nothing but a failure description.
    pub fn failed(model: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            response: None,
            error: Some(error.into()),
            latency: None,
            tokens: None,
            metrics: None,
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

// ============================================================================
// Run
// ============================================================================

/// One evaluation submission across one or more models.
///
/// `results` lines up with `models`: same order, same length, failed models included.
/// Once persisted a run is never modified in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestRun {
    pub test_id: String,
    pub prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ground_truth: Option<String>,
    #[serde(default)]
    pub use_rag: bool,
    /// Requested model ids, in the order the caller selected them.
    pub models: Vec<String>,
    /// Requested metrics.
    #[serde(default)]
    pub metrics: Vec<MetricKind>,
    pub models_tested: u32,
    pub results: Vec<ModelResult>,
    /// Whole-run wall clock as reported by the backend, in seconds.
    pub total_time: f64,
    pub timestamp: DateTime<Utc>,
}

// ============================================================================
// Requests
// ============================================================================

/// What a caller asks the orchestrator to run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunRequest {
    pub prompt: String,
    #[serde(default)]
    pub ground_truth: Option<String>,
    #[serde(default)]
    pub use_rag: bool,
    pub models: Vec<String>,
    /// Metric ids; empty means every recognized metric.
    #[serde(default)]
    pub metrics: Vec<String>,
}

/// A model the backend offers, as listed by `GET /models`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AvailableModel {
    pub name: String,
    #[serde(default)]
    pub size: Option<String>,
    #[serde(default)]
    pub runner: Option<String>,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub format: Option<String>,
    #[serde(default)]
    pub architecture: Option<String>,
}
