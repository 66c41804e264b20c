//! Run orchestration: validate, dispatch once, normalize, persist, return.
//!
//! A run is all-or-nothing in history. Validation failures never reach the network,
//! backend failures never reach the store, and a run that completes is persisted even
//! if the caller stopped waiting for it.
//!
//! History order follows completion, not submission: when two runs overlap, the one
//! whose backend call returns first is recorded first.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tokio::task::JoinHandle;

use super::history::HistoryStore;
use super::normalizer::normalize_run_payload;
use super::types::{AvailableModel, ModelResult, RunRequest, TestRun};
use crate::backend::{EvalBackend, RunTestsBody};
use crate::error::AppError;
use crate::validation::{require_metrics, require_models, require_non_empty};

/// Error recorded for a requested model the backend said nothing about.
pub const MISSING_RESULT_ERROR: &str = "no result returned by backend";

pub struct Orchestrator {
    backend: Arc<dyn EvalBackend>,
    history: Arc<HistoryStore>,
}

impl Orchestrator {
    pub fn new(backend: Arc<dyn EvalBackend>, history: Arc<HistoryStore>) -> Self {
        Self { backend, history }
    }

    pub fn history(&self) -> &Arc<HistoryStore> {
        &self.history
    }

    /// Submit one multi-model evaluation and record it on success.
    pub async fn submit_run(&self, request: RunRequest) -> Result<TestRun, AppError> {
        let submitted_at = Utc::now();
        let started = Instant::now();

        require_non_empty("prompt", &request.prompt)?;
        let models = require_models(&request.models)?;
        let metrics = require_metrics(&request.metrics)?;

        let body = RunTestsBody {
            models,
            prompt: request.prompt,
            ground_truth: request.ground_truth.filter(|g| !g.trim().is_empty()),
            use_rag: request.use_rag,
            metrics,
        };

        tracing::info!(
            models = ?body.models,
            use_rag = body.use_rag,
            has_ground_truth = body.ground_truth.is_some(),
            "Submitting test run"
        );

        let raw = self.backend.run_tests(&body).await.inspect_err(|e| {
            tracing::warn!(kind = ?e.kind(), "Test run failed: {}", e);
        })?;
        let payload = normalize_run_payload(&raw).inspect_err(|e| {
            tracing::warn!(kind = ?e.kind(), "Rejected backend payload: {}", e);
        })?;

        let results = align_results(&body.models, payload.results);
        let run = TestRun {
            test_id: payload
                .test_id
                .unwrap_or_else(|| format!("test_{}", submitted_at.timestamp_millis())),
            models_tested: payload
                .models_tested
                .unwrap_or(u32::try_from(body.models.len()).unwrap_or(u32::MAX)),
            total_time: payload
                .total_time
                .unwrap_or_else(|| started.elapsed().as_secs_f64()),
            timestamp: payload.timestamp.unwrap_or(submitted_at),
            prompt: body.prompt,
            ground_truth: body.ground_truth,
            use_rag: body.use_rag,
            models: body.models,
            metrics: body.metrics,
            results,
        };

        self.history.append(run.clone())?;

        let failed = run.results.iter().filter(|r| r.is_error()).count();
        tracing::info!(
            test_id = %run.test_id,
            models = run.results.len(),
            failed,
            total_time = run.total_time,
            "Test run recorded"
        );
        Ok(run)
    }

    /// Run [`submit_run`](Self::submit_run) on its own task. Dropping the handle does
    /// not cancel the run; a successful result is still recorded.
    pub fn spawn_run(self: &Arc<Self>, request: RunRequest) -> JoinHandle<Result<TestRun, AppError>> {
        let this = Arc::clone(self);
        tokio::spawn(async move { this.submit_run(request).await })
    }

    pub async fn list_models(&self) -> Result<Vec<AvailableModel>, AppError> {
        self.backend.list_models().await
    }
}

/// Line results up with the requested models: one entry per model, in request order.
/// Missing models get an errored placeholder; unrequested extras are dropped.
fn align_results(models: &[String], results: Vec<ModelResult>) -> Vec<ModelResult> {
    let mut pending: Vec<Option<ModelResult>> = results.into_iter().map(Some).collect();

    let aligned: Vec<ModelResult> = models
        .iter()
        .map(|model| {
            pending
                .iter_mut()
                .find(|slot| slot.as_ref().is_some_and(|r| &r.model == model))
                .and_then(Option::take)
                .unwrap_or_else(|| {
                    tracing::warn!(model = %model, "Backend returned no result for requested model");
                    ModelResult::failed(model.clone(), MISSING_RESULT_ERROR)
                })
        })
        .collect();

    for extra in pending.into_iter().flatten() {
        tracing::warn!(model = %extra.model, "Dropping result for a model that was not requested");
    }
    aligned
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::storage::MemoryStorage;
    use crate::engine::types::MetricKind;
    use crate::error::RequestErrorKind;
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    /// Replays canned responses in order and records every request body.
    #[derive(Default)]
    struct ScriptedBackend {
        responses: Mutex<VecDeque<Result<Value, AppError>>>,
        bodies: Mutex<Vec<RunTestsBody>>,
        calls: AtomicUsize,
    }

    impl ScriptedBackend {
        fn with(responses: Vec<Result<Value, AppError>>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses.into()),
                ..Default::default()
            })
        }
    }

    #[async_trait]
    impl EvalBackend for ScriptedBackend {
        async fn run_tests(&self, body: &RunTestsBody) -> Result<Value, AppError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.bodies.lock().unwrap().push(body.clone());
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(AppError::Internal("no scripted response".into())))
        }

        async fn list_models(&self) -> Result<Vec<AvailableModel>, AppError> {
            Ok(vec![AvailableModel {
                name: "mistral".into(),
                size: None,
                runner: None,
                source: None,
                format: None,
                architecture: None,
            }])
        }
    }

    /// Answers every request for its models, after a per-prompt delay.
    struct EchoBackend {
        delays_ms: Vec<(String, u64)>,
    }

    #[async_trait]
    impl EvalBackend for EchoBackend {
        async fn run_tests(&self, body: &RunTestsBody) -> Result<Value, AppError> {
            let delay = self
                .delays_ms
                .iter()
                .find(|(p, _)| *p == body.prompt)
                .map(|(_, ms)| *ms)
                .unwrap_or(0);
            tokio::time::sleep(Duration::from_millis(delay)).await;
            let results: Vec<Value> = body
                .models
                .iter()
                .map(|m| json!({ "model": m, "response": body.prompt }))
                .collect();
            Ok(json!({
                "test_id": format!("run-{}", body.prompt),
                "models_tested": body.models.len(),
                "total_time": delay as f64 / 1000.0,
                "results": results
            }))
        }

        async fn list_models(&self) -> Result<Vec<AvailableModel>, AppError> {
            Ok(Vec::new())
        }
    }

    fn orchestrator(backend: Arc<dyn EvalBackend>) -> Arc<Orchestrator> {
        let history = Arc::new(HistoryStore::new(Arc::new(MemoryStorage::new())));
        history.init().unwrap();
        Arc::new(Orchestrator::new(backend, history))
    }

    fn request(models: &[&str]) -> RunRequest {
        RunRequest {
            prompt: "What is the capital of France?".into(),
            ground_truth: Some("Paris".into()),
            use_rag: false,
            models: models.iter().map(|m| m.to_string()).collect(),
            metrics: vec!["ragas".into(), "exact_match".into()],
        }
    }

    #[tokio::test]
    async fn test_successful_run_is_recorded_once() {
        let backend = ScriptedBackend::with(vec![Ok(json!({
            "test_id": "test_1",
            "models_tested": 2,
            "total_time": 3.2,
            "results": [
                { "model": "llama3.1", "response": "Paris",
                  "latency": { "total": 1.1 },
                  "metrics": { "ragas": { "ragas_score": 0.9 } } },
                { "model": "mistral", "error": "model not loaded" }
            ]
        }))]);
        let orch = orchestrator(backend.clone());

        let run = orch.submit_run(request(&["llama3.1", "mistral"])).await.unwrap();
        assert_eq!(run.test_id, "test_1");
        assert_eq!(run.models, vec!["llama3.1", "mistral"]);
        assert_eq!(run.metrics, vec![MetricKind::Ragas, MetricKind::ExactMatch]);
        assert_eq!(run.results.len(), 2);
        assert!(run.results[1].is_error());
        assert_eq!(run.total_time, 3.2);

        let history = orch.history().list(None).unwrap();
        assert_eq!(history, vec![run]);
        assert_eq!(backend.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_request_body_carries_whole_request() {
        let backend = ScriptedBackend::with(vec![Ok(json!({ "results": [{ "model": "a" }] }))]);
        let orch = orchestrator(backend.clone());
        let mut req = request(&["a", "a", " "]);
        req.metrics = vec![];
        req.use_rag = true;
        orch.submit_run(req).await.unwrap();

        let bodies = backend.bodies.lock().unwrap();
        assert_eq!(bodies[0].models, vec!["a"]);
        assert_eq!(bodies[0].metrics, MetricKind::ALL.to_vec());
        assert!(bodies[0].use_rag);
        assert_eq!(bodies[0].ground_truth.as_deref(), Some("Paris"));
    }

    #[tokio::test]
    async fn test_invalid_input_never_calls_backend() {
        let backend = ScriptedBackend::with(vec![]);
        let orch = orchestrator(backend.clone());

        let mut empty_prompt = request(&["a"]);
        empty_prompt.prompt = "  ".into();
        let err = orch.submit_run(empty_prompt).await.unwrap_err();
        assert_eq!(err.kind(), Some(RequestErrorKind::InvalidInput));

        let err = orch.submit_run(request(&[])).await.unwrap_err();
        assert_eq!(err.kind(), Some(RequestErrorKind::InvalidInput));

        let mut bad_metric = request(&["a"]);
        bad_metric.metrics = vec!["perplexity".into()];
        assert!(orch.submit_run(bad_metric).await.is_err());

        assert_eq!(backend.calls.load(Ordering::SeqCst), 0);
        assert!(orch.history().list(None).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_backend_failures_record_nothing() {
        let backend = ScriptedBackend::with(vec![
            Err(AppError::BackendUnavailable("connection refused".into())),
            Err(AppError::Backend { status: Some(500), detail: "boom".into() }),
            Ok(json!({ "results": [{ "model": "a" }, { "response": "who am i" }] })),
            Ok(json!({ "status": "ok" })),
        ]);
        let orch = orchestrator(backend);
        let before = orch.history().list(None).unwrap().len();

        let kinds = [
            RequestErrorKind::BackendUnavailable,
            RequestErrorKind::BackendError,
            RequestErrorKind::MalformedResponse,
            RequestErrorKind::BackendError,
        ];
        for kind in kinds {
            let err = orch.submit_run(request(&["a"])).await.unwrap_err();
            assert_eq!(err.kind(), Some(kind));
        }
        assert_eq!(orch.history().list(None).unwrap().len(), before);
    }

    #[tokio::test]
    async fn test_missing_id_and_time_are_synthesized() {
        let backend = ScriptedBackend::with(vec![Ok(json!({ "results": [{ "model": "a" }] }))]);
        let orch = orchestrator(backend);
        let before = Utc::now();
        let run = orch.submit_run(request(&["a"])).await.unwrap();

        assert!(run.test_id.starts_with("test_"));
        assert!(run.timestamp >= before - chrono::Duration::seconds(1));
        assert!(run.timestamp <= Utc::now());
        assert_eq!(run.models_tested, 1);
        assert!(run.total_time >= 0.0);
        assert!(orch.history().get(&run.test_id).unwrap().is_some());
    }

    #[tokio::test]
    async fn test_results_aligned_to_request_order() {
        let backend = ScriptedBackend::with(vec![Ok(json!({
            "test_id": "t",
            "results": [
                { "model": "c", "response": "3" },
                { "model": "zzz", "response": "unrequested" },
                { "model": "a", "response": "1" }
            ]
        }))]);
        let orch = orchestrator(backend);
        let run = orch.submit_run(request(&["a", "b", "c"])).await.unwrap();

        let models: Vec<&str> = run.results.iter().map(|r| r.model.as_str()).collect();
        assert_eq!(models, vec!["a", "b", "c"]);
        assert_eq!(run.results[0].response.as_deref(), Some("1"));
        assert_eq!(run.results[1].error.as_deref(), Some(MISSING_RESULT_ERROR));
        assert_eq!(run.results[2].response.as_deref(), Some("3"));
    }

    #[tokio::test]
    async fn test_dropped_handle_still_persists() {
        let orch = orchestrator(Arc::new(EchoBackend { delays_ms: vec![("slow".into(), 50)] }));
        let mut req = request(&["a"]);
        req.prompt = "slow".into();
        drop(orch.spawn_run(req));

        for _ in 0..100 {
            if !orch.history().list(None).unwrap().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(orch.history().latest().unwrap().unwrap().test_id, "run-slow");
    }

    #[tokio::test]
    async fn test_history_follows_completion_order() {
        let orch = orchestrator(Arc::new(EchoBackend {
            delays_ms: vec![("first".into(), 150), ("second".into(), 10)],
        }));
        let mut first = request(&["a"]);
        first.prompt = "first".into();
        let mut second = request(&["a"]);
        second.prompt = "second".into();

        let h1 = orch.spawn_run(first);
        let h2 = orch.spawn_run(second);
        h1.await.unwrap().unwrap();
        h2.await.unwrap().unwrap();

        let ids: Vec<String> = orch.history().list(None).unwrap().into_iter().map(|r| r.test_id).collect();
        // Most recent first: "first" completed last.
        assert_eq!(ids, vec!["run-first", "run-second"]);
    }

    #[tokio::test]
    async fn test_list_models_passthrough() {
        let orch = orchestrator(ScriptedBackend::with(vec![]));
        let models = orch.list_models().await.unwrap();
        assert_eq!(models[0].name, "mistral");
    }
}
