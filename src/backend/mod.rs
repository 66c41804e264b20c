//! The evaluation backend seam.
//!
//! The orchestrator only sees [`EvalBackend`]; [`client::EvalClient`] is the HTTP
//! implementation, tests plug in fakes.

pub mod client;

use async_trait::async_trait;
use serde::Serialize;

use crate::engine::types::{AvailableModel, MetricKind};
use crate::error::AppError;

/// `POST /tests/run` request body.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunTestsBody {
    pub models: Vec<String>,
    pub prompt: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ground_truth: Option<String>,
    pub use_rag: bool,
    pub metrics: Vec<MetricKind>,
}

#[async_trait]
pub trait EvalBackend: Send + Sync {
    /// Execute every requested model and return the raw response body.
    /// One call per run; the backend owns per-model concurrency.
    async fn run_tests(&self, body: &RunTestsBody) -> Result<serde_json::Value, AppError>;

    /// Models the backend can evaluate.
    async fn list_models(&self) -> Result<Vec<AvailableModel>, AppError>;
}
