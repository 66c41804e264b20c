use crate::engine::types::MetricKind;
use crate::error::AppError;

pub fn require_non_empty(field: &str, value: &str) -> Result<(), AppError> {
    if value.trim().is_empty() {
        return Err(AppError::InvalidInput(format!("{field} cannot be empty")));
    }
    Ok(())
}

/// Trim, drop blanks, and de-duplicate model ids keeping the first occurrence.
/// Fails when nothing is left.
pub fn require_models<I, S>(models: I) -> Result<Vec<String>, AppError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut out: Vec<String> = Vec::new();
    for m in models {
        let m = m.as_ref().trim();
        if m.is_empty() || out.iter().any(|seen| seen == m) {
            continue;
        }
        out.push(m.to_string());
    }
    if out.is_empty() {
        return Err(AppError::InvalidInput("at least one model must be selected".into()));
    }
    Ok(out)
}

/// Parse metric ids against the recognized vocabulary. An empty selection means all metrics.
pub fn require_metrics<I, S>(metrics: I) -> Result<Vec<MetricKind>, AppError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut out: Vec<MetricKind> = Vec::new();
    for m in metrics {
        let kind: MetricKind = m.as_ref().parse()?;
        if !out.contains(&kind) {
            out.push(kind);
        }
    }
    if out.is_empty() {
        out.extend_from_slice(&MetricKind::ALL);
    }
    Ok(out)
}
