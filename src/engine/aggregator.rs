//! Derived comparison statistics over a set of model results.
//!
//! Everything here is a pure function of its input slice. Errored results are kept
//! out of every numeric figure.

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::Value;

use super::types::{MetricKind, ModelResult, TestRun};

// ============================================================================
// Metric extraction
// ============================================================================

/// Where the backend puts the headline number for each metric.
/// BLEU and ROUGE share one block.
fn metric_path(metric: MetricKind) -> (&'static str, &'static str) {
    match metric {
        MetricKind::Ragas => ("ragas", "ragas_score"),
        MetricKind::Bleu => ("bleu_rouge", "bleu"),
        MetricKind::Rouge => ("bleu_rouge", "rouge_l"),
        MetricKind::Bertscore => ("bertscore", "f1"),
        MetricKind::ExactMatch => ("exact_match", "score"),
    }
}

/// The reported value of `metric` for `result`, or `None` when it was not reported.
pub fn metric_value(result: &ModelResult, metric: MetricKind) -> Option<f64> {
    let metrics = result.metrics.as_ref()?;
    let (block, field) = metric_path(metric);

    let from_block = metrics.get(block).and_then(|b| b.get(field)).and_then(Value::as_f64);
    from_block
        .or_else(|| {
            // Flat layout: the score stored directly under the metric id.
            match metrics.get(metric.as_str()) {
                Some(Value::Number(n)) => n.as_f64(),
                Some(obj @ Value::Object(_)) => obj.get(field).and_then(Value::as_f64),
                _ => None,
            }
        })
        .filter(|v| v.is_finite())
}

// ============================================================================
// Compare
// ============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct Comparison {
    pub metric: MetricKind,
    /// Highest-scoring result among those that report the metric. Ties go to the
    /// earliest result. `None` when no successful result reports it.
    pub best: Option<ModelResult>,
    /// Ranking value per successful model; non-reporting models show `0`.
    pub values: BTreeMap<String, f64>,
}

/// Rank `results` by `metric`.
pub fn compare(results: &[ModelResult], metric: MetricKind) -> Comparison {
    let mut values = BTreeMap::new();
    let mut best: Option<(&ModelResult, f64)> = None;

    for r in results.iter().filter(|r| !r.is_error()) {
        let reported = metric_value(r, metric);
        values.entry(r.model.clone()).or_insert(reported.unwrap_or(0.0));

        if let Some(v) = reported {
            match best {
                Some((_, best_v)) if v <= best_v => {}
                _ => best = Some((r, v)),
            }
        }
    }

    Comparison {
        metric,
        best: best.map(|(r, _)| r.clone()),
        values,
    }
}

// ============================================================================
// Summary
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SummaryStats {
    /// Mean `latency.total` over successful results that report latency.
    pub avg_latency: f64,
    /// Mean TTFT over successful results that report it.
    pub avg_ttft: Option<f64>,
    /// Sum of `tokens.total` over successful results.
    pub total_tokens: u64,
    /// Number of successful results.
    pub count: usize,
    /// Number of errored results.
    pub errored: usize,
}

pub fn summary_stats(results: &[ModelResult]) -> SummaryStats {
    let ok: Vec<&ModelResult> = results.iter().filter(|r| !r.is_error()).collect();

    let latencies: Vec<f64> = ok.iter().filter_map(|r| r.latency.as_ref().map(|l| l.total)).collect();
    let ttfts: Vec<f64> = ok
        .iter()
        .filter_map(|r| r.latency.as_ref().and_then(|l| l.ttft))
        .collect();

    SummaryStats {
        avg_latency: mean(&latencies).unwrap_or(0.0),
        avg_ttft: mean(&ttfts),
        total_tokens: ok.iter().filter_map(|r| r.tokens.as_ref()).map(|t| t.total).sum(),
        count: ok.len(),
        errored: results.len() - ok.len(),
    }
}

fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

// ============================================================================
// Side-by-side table
// ============================================================================

/// One row of the model comparison table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricRow {
    pub model: String,
    pub error: Option<String>,
    pub ragas: Option<f64>,
    pub bleu: Option<f64>,
    pub rouge: Option<f64>,
    pub bertscore: Option<f64>,
    pub exact_match: Option<f64>,
    pub latency: Option<f64>,
    pub ttft: Option<f64>,
    pub tokens: Option<u64>,
}

impl MetricRow {
    pub fn get(&self, metric: MetricKind) -> Option<f64> {
        match metric {
            MetricKind::Ragas => self.ragas,
            MetricKind::Bleu => self.bleu,
            MetricKind::Rouge => self.rouge,
            MetricKind::Bertscore => self.bertscore,
            MetricKind::ExactMatch => self.exact_match,
        }
    }
}

/// Every metric for every result, in `results` order. Errored rows carry only the error.
pub fn metric_table(results: &[ModelResult]) -> Vec<MetricRow> {
    results
        .iter()
        .map(|r| {
            let value = |m| if r.is_error() { None } else { metric_value(r, m) };
            MetricRow {
                model: r.model.clone(),
                error: r.error.clone(),
                ragas: value(MetricKind::Ragas),
                bleu: value(MetricKind::Bleu),
                rouge: value(MetricKind::Rouge),
                bertscore: value(MetricKind::Bertscore),
                exact_match: value(MetricKind::ExactMatch),
                latency: r.latency.as_ref().map(|l| l.total),
                ttft: r.latency.as_ref().and_then(|l| l.ttft),
                tokens: r.tokens.as_ref().map(|t| t.total),
            }
        })
        .collect()
}

// ============================================================================
// History overview
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct HistoryOverview {
    pub total_runs: usize,
    pub total_models_tested: u64,
    pub avg_run_time: f64,
}

pub fn history_overview(runs: &[TestRun]) -> HistoryOverview {
    let times: Vec<f64> = runs.iter().map(|r| r.total_time).collect();
    HistoryOverview {
        total_runs: runs.len(),
        total_models_tested: runs.iter().map(|r| u64::from(r.models_tested)).sum(),
        avg_run_time: mean(&times).unwrap_or(0.0),
    }
}
