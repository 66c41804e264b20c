//! Turns raw backend JSON into canonical [`ModelResult`]s.
//!
//! The backend is loosely typed: optional blocks may be missing, empty, or carry the
//! wrong shape. Anything optional that does not parse is dropped (never zero-filled).
//! The one hard failure is a result entry without a model id.

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

use super::types::{Latency, ModelResult, TokenUsage};
use crate::error::AppError;

/// Run-level fields read from a `/tests/run` response, with normalized results.
#[derive(Debug, Clone)]
pub struct NormalizedPayload {
    pub test_id: Option<String>,
    pub models_tested: Option<u32>,
    pub total_time: Option<f64>,
    pub timestamp: Option<DateTime<Utc>>,
    pub results: Vec<ModelResult>,
}

/// Normalize one entry of the backend's `results` array.
pub fn normalize(raw: &Value) -> Result<ModelResult, AppError> {
    let obj = raw
        .as_object()
        .ok_or_else(|| AppError::MalformedResponse("result entry is not an object".into()))?;

    let model = obj
        .get("model")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|m| !m.is_empty())
        .ok_or_else(|| AppError::MalformedResponse("result entry has no model identifier".into()))?
        .to_string();

    let error = obj.get("error").and_then(error_text);
    // Error wins over any stray response text.
    let response = match error {
        Some(_) => None,
        None => obj.get("response").and_then(Value::as_str).map(str::to_string),
    };

    Ok(ModelResult {
        model,
        response,
        error,
        latency: obj.get("latency").and_then(latency),
        tokens: obj.get("tokens").and_then(tokens),
        metrics: obj.get("metrics").and_then(metrics),
    })
}

/// Normalize a full `/tests/run` response body.
pub fn normalize_run_payload(payload: &Value) -> Result<NormalizedPayload, AppError> {
    let obj = payload.as_object().ok_or_else(|| malformed_payload("body is not a JSON object"))?;
    let raw_results = obj
        .get("results")
        .and_then(Value::as_array)
        .ok_or_else(|| malformed_payload("missing 'results' array"))?;

    let results = raw_results.iter().map(normalize).collect::<Result<Vec<_>, _>>()?;

    Ok(NormalizedPayload {
        test_id: obj.get("test_id").and_then(id_text),
        models_tested: obj
            .get("models_tested")
            .and_then(Value::as_u64)
            .and_then(|n| u32::try_from(n).ok()),
        total_time: obj.get("total_time").and_then(finite_f64),
        timestamp: obj
            .get("timestamp")
            .and_then(Value::as_str)
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc)),
        results,
    })
}

fn malformed_payload(detail: &str) -> AppError {
    AppError::Backend {
        status: None,
        detail: format!("malformed payload: {detail}"),
    }
}

fn error_text(v: &Value) -> Option<String> {
    match v {
        Value::Null => None,
        Value::String(s) if s.trim().is_empty() => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

fn id_text(v: &Value) -> Option<String> {
    match v {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn finite_f64(v: &Value) -> Option<f64> {
    v.as_f64().filter(|f| f.is_finite())
}

fn latency(v: &Value) -> Option<Latency> {
    let obj = v.as_object()?;
    let total = obj.get("total").and_then(finite_f64)?;
    Some(Latency {
        total,
        ttft: obj.get("ttft").and_then(finite_f64),
    })
}

fn tokens(v: &Value) -> Option<TokenUsage> {
    let obj = v.as_object()?;
    Some(TokenUsage {
        input: obj.get("input").and_then(Value::as_u64)?,
        output: obj.get("output").and_then(Value::as_u64)?,
        total: obj.get("total").and_then(Value::as_u64)?,
    })
}

fn metrics(v: &Value) -> Option<Map<String, Value>> {
    let obj = v.as_object()?;
    let kept: Map<String, Value> = obj
        .iter()
        .filter(|(_, value)| !value.is_null())
        .map(|(k, value)| (k.clone(), value.clone()))
        .collect();
    if kept.is_empty() {
        None
    } else {
        Some(kept)
    }
}
