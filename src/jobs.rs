//! Generation jobs: the PENDING → STARTED → {SUCCESS | FAILURE} record per request,
//! plus the service that submits generation runs to an async executor.
//!
//! Every transition is a conditional single-row update (`update_job_if`), so two
//! writers racing on the same job cannot both win and a terminal job never moves.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::domain::{GenerationJob, JobStatus};
use crate::error::{EngineError, EngineResult};
use crate::generation::{GenerationOrchestrator, GenerationRequest};
use crate::store::{JobStore, SharedStore};

pub const GENERATE_QUESTIONS_TASK: &str = "generate_questions";

#[derive(Clone)]
pub struct GenerationJobTracker {
    store: SharedStore,
}

impl GenerationJobTracker {
    pub fn new(store: SharedStore) -> Self {
        Self { store }
    }

    /// Create the record at submission time.
    #[instrument(level = "debug", skip(self), fields(%task_id))]
    pub async fn record_pending(
        &self,
        task_id: &str,
        task_name: &str,
        related_type: Option<String>,
        related_id: Option<String>,
    ) -> EngineResult<GenerationJob> {
        let now = Utc::now();
        let job = GenerationJob {
            task_id: task_id.to_string(),
            task_name: task_name.to_string(),
            status: JobStatus::Pending,
            result: None,
            error: None,
            related_type,
            related_id,
            created_at: now,
            updated_at: now,
        };
        self.store.insert_job(&job).await?;
        info!(target: "jobs", %task_id, %task_name, "Job recorded as PENDING");
        Ok(job)
    }

    pub async fn mark_started(&self, task_id: &str) -> EngineResult<GenerationJob> {
        self.transition(task_id, JobStatus::Started, None, None).await
    }

    pub async fn mark_succeeded(&self, task_id: &str, result: Value) -> EngineResult<GenerationJob> {
        self.transition(task_id, JobStatus::Success, Some(result), None).await
    }

    /// `partial` keeps whatever the run produced before failing.
    pub async fn mark_failed(
        &self,
        task_id: &str,
        error: impl Into<String>,
        partial: Option<Value>,
    ) -> EngineResult<GenerationJob> {
        self.transition(task_id, JobStatus::Failure, partial, Some(error.into())).await
    }

    #[instrument(level = "debug", skip(self, result, error), fields(%task_id, next = %next))]
    async fn transition(
        &self,
        task_id: &str,
        next: JobStatus,
        result: Option<Value>,
        error: Option<String>,
    ) -> EngineResult<GenerationJob> {
        let current = self
            .store
            .get_job(task_id)
            .await?
            .ok_or_else(|| EngineError::not_found("generation job", task_id))?;

        if !current.status.can_transition_to(next) {
            warn!(target: "jobs", %task_id, current = %current.status, requested = %next, "Rejected job transition");
            return Err(EngineError::JobTransition {
                task_id: task_id.to_string(),
                current: current.status.to_string(),
                requested: next.to_string(),
            });
        }

        let mut updated = current.clone();
        updated.status = next;
        updated.updated_at = Utc::now();
        if result.is_some() {
            updated.result = result;
        }
        if error.is_some() {
            updated.error = error;
        }

        if !self.store.update_job_if(current.status, &updated).await? {
            // Lost the race: someone moved the job after our read.
            let latest = self
                .store
                .get_job(task_id)
                .await?
                .map(|j| j.status.to_string())
                .unwrap_or_else(|| "missing".into());
            return Err(EngineError::JobTransition {
                task_id: task_id.to_string(),
                current: latest,
                requested: next.to_string(),
            });
        }

        info!(target: "jobs", %task_id, from = %current.status, to = %next, "Job transitioned");
        Ok(updated)
    }

    /// Exact task id first, then the newest job filed under `id` as its related entity.
    #[instrument(level = "debug", skip(self), fields(%id))]
    pub async fn lookup(&self, id: &str) -> EngineResult<GenerationJob> {
        if let Some(job) = self.store.get_job(id).await? {
            return Ok(job);
        }
        self.store
            .jobs_for_related(id)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| EngineError::not_found("generation job", id))
    }
}

pub type JobFuture = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Async execution collaborator: runs submitted work out of band.
pub trait JobExecutor: Send + Sync {
    fn submit(&self, task_id: &str, work: JobFuture);
}

/// Runs each job as its own tokio task.
#[derive(Clone, Default)]
pub struct TokioExecutor;

impl JobExecutor for TokioExecutor {
    fn submit(&self, task_id: &str, work: JobFuture) {
        info!(target: "jobs", %task_id, "Spawning job");
        tokio::spawn(work);
    }
}

/// Front door for asynchronous generation: record, submit, report.
#[derive(Clone)]
pub struct GenerationService {
    orchestrator: Arc<GenerationOrchestrator>,
    tracker: GenerationJobTracker,
    executor: Arc<dyn JobExecutor>,
}

impl GenerationService {
    pub fn new(
        orchestrator: Arc<GenerationOrchestrator>,
        tracker: GenerationJobTracker,
        executor: Arc<dyn JobExecutor>,
    ) -> Self {
        Self {
            orchestrator,
            tracker,
            executor,
        }
    }

    pub fn tracker(&self) -> &GenerationJobTracker {
        &self.tracker
    }

    /// Record a PENDING job and hand the run to the executor. Returns the fresh record.
    #[instrument(level = "info", skip(self, req), fields(count = req.count, mode = ?req.mode))]
    pub async fn start(&self, req: GenerationRequest) -> EngineResult<GenerationJob> {
        if req.rag_pct > 100 {
            return Err(EngineError::validation("rag_pct must be within 0-100"));
        }
        let related_type = if req.assessment_id.is_some() {
            Some("assessment".to_string())
        } else if req.topic.is_some() {
            Some("topic".to_string())
        } else {
            None
        };

        let task_id = Uuid::new_v4().to_string();
        let job = self
            .tracker
            .record_pending(&task_id, GENERATE_QUESTIONS_TASK, related_type, req.related_id())
            .await?;

        let work = run_generation_job(self.orchestrator.clone(), self.tracker.clone(), task_id.clone(), req);
        self.executor.submit(&task_id, Box::pin(work));
        Ok(job)
    }

    pub async fn status(&self, id: &str) -> EngineResult<GenerationJob> {
        self.tracker.lookup(id).await
    }
}

/// Worker body. Outcomes land on the job record; nothing is returned to the submitter.
async fn run_generation_job(
    orchestrator: Arc<GenerationOrchestrator>,
    tracker: GenerationJobTracker,
    task_id: String,
    req: GenerationRequest,
) {
    if let Err(e) = tracker.mark_started(&task_id).await {
        error!(target: "jobs", %task_id, error = %e, "Could not mark job STARTED; skipping run");
        return;
    }

    let (report, run) = orchestrator.generate_partial(&req).await;
    let outcome = match (run, serde_json::to_value(&report)) {
        (Ok(()), Ok(result)) => tracker.mark_succeeded(&task_id, result).await,
        (Ok(()), Err(e)) => tracker.mark_failed(&task_id, e.to_string(), None).await,
        (Err(e), partial) => {
            warn!(target: "jobs", %task_id, error = %e, created = report.created.len(), "Generation run failed");
            tracker.mark_failed(&task_id, e.to_string(), partial.ok()).await
        }
    };
    if let Err(e) = outcome {
        error!(target: "jobs", %task_id, error = %e, "Could not record job outcome");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Prompts;
    use crate::domain::GenerationMode;
    use crate::error::CollaboratorError;
    use crate::generation::LanguageModel;
    use crate::retrieval::NoRetriever;
    use crate::store::{MemoryStore, QuestionStore};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex;

    const GOOD: &str = r#"{"question_text":"Q?","options":{"A":"a","B":"b","C":"c","D":"d"},"correct_answer":"A"}"#;

    struct FixedModel(Result<&'static str, u16>);

    #[async_trait]
    impl LanguageModel for FixedModel {
        async fn complete(&self, _prompt: &str) -> Result<String, CollaboratorError> {
            match self.0 {
                Ok(text) => Ok(text.to_string()),
                Err(status) => Err(CollaboratorError::Status { status, message: "upstream down".into() }),
            }
        }

        fn name(&self) -> &str {
            "fixed"
        }
    }

    /// Answers once, then fails every later call.
    struct FailsAfterFirst(Mutex<u32>);

    #[async_trait]
    impl LanguageModel for FailsAfterFirst {
        async fn complete(&self, _prompt: &str) -> Result<String, CollaboratorError> {
            let mut calls = self.0.lock().unwrap();
            *calls += 1;
            if *calls == 1 {
                Ok(GOOD.to_string())
            } else {
                Err(CollaboratorError::Status { status: 503, message: "down".into() })
            }
        }

        fn name(&self) -> &str {
            "fails-after-first"
        }
    }

    /// Holds submitted work until the test drives it.
    #[derive(Default)]
    struct ManualExecutor {
        queued: Mutex<Vec<JobFuture>>,
    }

    impl JobExecutor for ManualExecutor {
        fn submit(&self, _task_id: &str, work: JobFuture) {
            self.queued.lock().unwrap().push(work);
        }
    }

    impl ManualExecutor {
        async fn run_all(&self) {
            let work: Vec<JobFuture> = std::mem::take(&mut *self.queued.lock().unwrap());
            for w in work {
                w.await;
            }
        }
    }

    fn service(store: SharedStore, model: impl LanguageModel + 'static) -> (GenerationService, Arc<ManualExecutor>) {
        let orchestrator = Arc::new(GenerationOrchestrator::new(
            store.clone(),
            Arc::new(model),
            Arc::new(NoRetriever),
            Prompts::default(),
            5,
            None,
        ));
        let executor = Arc::new(ManualExecutor::default());
        let svc = GenerationService::new(orchestrator, GenerationJobTracker::new(store), executor.clone());
        (svc, executor)
    }

    fn request(topic: &str) -> GenerationRequest {
        GenerationRequest {
            topic: Some(topic.into()),
            assessment_id: None,
            question_set_id: None,
            count: 2,
            mode: GenerationMode::Llm,
            rag_pct: 100,
            min_retrieval_score: None,
            difficulty: None,
        }
    }

    #[tokio::test]
    async fn job_is_pending_until_run_then_succeeds() {
        let store = MemoryStore::shared();
        let (svc, executor) = service(store, FixedModel(Ok(GOOD)));

        let job = svc.start(request("sql joins")).await.unwrap();
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(svc.status(&job.task_id).await.unwrap().status, JobStatus::Pending);

        executor.run_all().await;
        let done = svc.status(&job.task_id).await.unwrap();
        assert_eq!(done.status, JobStatus::Success);
        let result = done.result.unwrap();
        assert_eq!(result["created"].as_array().unwrap().len(), 2);
        assert_eq!(result["requested"], json!(2));
    }

    #[tokio::test]
    async fn worker_errors_are_recorded_not_thrown() {
        let store = MemoryStore::shared();
        let (svc, executor) = service(store, FixedModel(Err(503)));

        let job = svc.start(request("kafka")).await.unwrap();
        executor.run_all().await;

        let failed = svc.status(&job.task_id).await.unwrap();
        assert_eq!(failed.status, JobStatus::Failure);
        assert!(failed.error.unwrap().contains("503"));
        let partial = failed.result.unwrap();
        assert_eq!(partial["created"], json!([]));
    }

    #[tokio::test]
    async fn failed_run_reports_items_it_already_stored() {
        let store = MemoryStore::shared();
        let (svc, executor) = service(store.clone(), FailsAfterFirst(Mutex::new(0)));

        let mut req = request("tokio");
        req.count = 3;
        let job = svc.start(req).await.unwrap();
        executor.run_all().await;

        let failed = svc.status(&job.task_id).await.unwrap();
        assert_eq!(failed.status, JobStatus::Failure);
        assert!(failed.error.unwrap().contains("503"));
        let partial = failed.result.unwrap();
        assert_eq!(partial["requested"], json!(3));
        assert_eq!(partial["llm_attempts"], json!(2));
        let created = partial["created"].as_array().unwrap();
        assert_eq!(created.len(), 1);
        let id = created[0].as_str().unwrap();
        assert!(store.get_question(id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn terminal_jobs_reject_further_transitions() {
        let tracker = GenerationJobTracker::new(MemoryStore::shared());
        tracker.record_pending("t1", GENERATE_QUESTIONS_TASK, None, None).await.unwrap();
        tracker.mark_started("t1").await.unwrap();
        tracker.mark_succeeded("t1", json!({"created": ["q1"]})).await.unwrap();

        assert!(matches!(tracker.mark_failed("t1", "late worker", None).await, Err(EngineError::JobTransition { .. })));
        assert!(matches!(tracker.mark_started("t1").await, Err(EngineError::JobTransition { .. })));

        let job = tracker.lookup("t1").await.unwrap();
        assert_eq!(job.status, JobStatus::Success);
        assert!(job.error.is_none());
        assert_eq!(job.result, Some(json!({"created": ["q1"]})));
    }

    #[tokio::test]
    async fn pending_cannot_jump_to_success() {
        let tracker = GenerationJobTracker::new(MemoryStore::shared());
        tracker.record_pending("t1", GENERATE_QUESTIONS_TASK, None, None).await.unwrap();
        assert!(tracker.mark_succeeded("t1", json!({})).await.is_err());
        assert!(tracker.mark_failed("t1", "worker lost", None).await.is_ok());
    }

    #[tokio::test]
    async fn duplicate_task_ids_are_rejected() {
        let tracker = GenerationJobTracker::new(MemoryStore::shared());
        tracker.record_pending("t1", GENERATE_QUESTIONS_TASK, None, None).await.unwrap();
        assert!(matches!(
            tracker.record_pending("t1", GENERATE_QUESTIONS_TASK, None, None).await,
            Err(EngineError::Store(_))
        ));
    }

    #[tokio::test]
    async fn lookup_falls_back_to_related_id() {
        let store = MemoryStore::shared();
        let (svc, _executor) = service(store, FixedModel(Ok(GOOD)));

        let first = svc.start(request("graphql")).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        let second = svc.start(request("graphql")).await.unwrap();

        let found = svc.status("graphql").await.unwrap();
        assert_eq!(found.task_id, second.task_id);
        assert_ne!(found.task_id, first.task_id);
        assert_eq!(found.related_type.as_deref(), Some("topic"));

        assert!(matches!(svc.status("nothing").await, Err(EngineError::NotFound { .. })));
    }
}
