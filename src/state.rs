//! Application state: the store, the engine components wired to their collaborators,
//! and the admin-side operations on assessments and the question bank.
//!
//! Collaborators are chosen from the environment:
//!   - OPENAI_API_KEY set → chat-completions model, otherwise the offline stub
//!   - RETRIEVAL_URL set  → HTTP retriever, otherwise no retrieval (rag items fall back)

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::allocation::{plan_assessment, AssessmentPlan};
use crate::config::EngineConfig;
use crate::domain::{AssessmentConfig, QuestionItem, QuestionPayload, QuestionSet, Provenance, ReviewState, SourceType};
use crate::error::{EngineError, EngineResult};
use crate::generation::{passes_quality_gate, GenerationOrchestrator, LanguageModel, ParsedQuestion};
use crate::jobs::{GenerationJobTracker, GenerationService, JobExecutor, TokioExecutor};
use crate::openai::{OpenAI, StubModel};
use crate::protocol::{AssessmentIn, QuestionIn, QuestionSetIn};
use crate::release::TokioReleaseScheduler;
use crate::retrieval::{HttpRetriever, NoRetriever, Retriever};
use crate::seeds::seed_demo_content;
use crate::session::{SessionSettings, TestSessionEngine};
use crate::store::{AssessmentStore, MemoryStore, QuestionStore, SharedStore};

#[derive(Clone)]
pub struct AppState {
    pub store: SharedStore,
    pub config: EngineConfig,
    pub generation: GenerationService,
    pub sessions: Arc<TestSessionEngine>,
    pub model_name: String,
    pub retrieval_enabled: bool,
}

impl AppState {
    /// Build state from env: load config, pick collaborators, seed demo content.
    #[instrument(level = "info", skip_all)]
    pub async fn from_env() -> EngineResult<Self> {
        let config = EngineConfig::from_env();

        let model: Arc<dyn LanguageModel> = match OpenAI::from_env(&config.prompts.system) {
            Some(oa) => {
                info!(target: "skillcheck", base_url = %oa.base_url, model = %oa.model, "OpenAI enabled.");
                Arc::new(oa)
            }
            None => {
                info!(target: "skillcheck", "OpenAI disabled (no OPENAI_API_KEY). Using the offline stub model.");
                Arc::new(StubModel)
            }
        };

        let (retriever, retrieval_enabled): (Arc<dyn Retriever>, bool) = match HttpRetriever::from_env() {
            Some(r) => {
                info!(target: "skillcheck", base_url = %r.base_url(), "Retrieval enabled.");
                (Arc::new(r), true)
            }
            None => {
                info!(target: "skillcheck", "Retrieval disabled (no RETRIEVAL_URL). Rag items will fall back to topic-only.");
                (Arc::new(NoRetriever), false)
            }
        };

        let state = Self::build(MemoryStore::shared(), model, retriever, Arc::new(TokioExecutor), config, retrieval_enabled);
        seed_demo_content(&state.store).await?;
        info!(
            target: "skillcheck",
            release_policy = ?state.config.release.policy,
            release_delay_secs = state.config.release.delay_secs,
            top_k = state.config.generation.top_k,
            "Engine ready"
        );
        Ok(state)
    }

    /// Wire the engine over explicit collaborators.
    pub fn build(
        store: SharedStore,
        model: Arc<dyn LanguageModel>,
        retriever: Arc<dyn Retriever>,
        executor: Arc<dyn JobExecutor>,
        config: EngineConfig,
        retrieval_enabled: bool,
    ) -> Self {
        let model_name = model.name().to_string();
        let orchestrator = Arc::new(GenerationOrchestrator::new(
            store.clone(),
            model,
            retriever,
            config.prompts.clone(),
            config.generation.top_k,
            config.generation.default_min_retrieval_score,
        ));
        let generation = GenerationService::new(orchestrator, GenerationJobTracker::new(store.clone()), executor);

        let scheduler = Arc::new(TokioReleaseScheduler::new(store.clone()));
        let settings = SessionSettings {
            release_policy: config.release.policy,
            release_delay: Duration::from_secs(config.release.delay_secs),
            max_answer_len: config.answers.max_len,
        };
        let sessions = Arc::new(TestSessionEngine::new(store.clone(), scheduler, settings));

        Self {
            store,
            config,
            generation,
            sessions,
            model_name,
            retrieval_enabled,
        }
    }

    // --- Assessments ---

    #[instrument(level = "info", skip(self, body), fields(title = %body.title))]
    pub async fn create_assessment(&self, body: AssessmentIn) -> EngineResult<AssessmentConfig> {
        let now = Utc::now();
        let config = assessment_from(Uuid::new_v4().to_string(), body, now, now);
        self.check_assessment(&config).await?;
        self.store.insert_assessment(&config).await?;
        info!(target: "skillcheck", assessment_id = %config.assessment_id, "Assessment created");
        Ok(config)
    }

    pub async fn get_assessment(&self, assessment_id: &str) -> EngineResult<AssessmentConfig> {
        self.store
            .get_assessment(assessment_id)
            .await?
            .ok_or_else(|| EngineError::not_found("assessment", assessment_id))
    }

    /// Full replacement of the admin-authored fields; id and creation time are kept.
    #[instrument(level = "info", skip(self, body), fields(%assessment_id))]
    pub async fn update_assessment(&self, assessment_id: &str, body: AssessmentIn) -> EngineResult<AssessmentConfig> {
        let existing = self.get_assessment(assessment_id).await?;
        let config = assessment_from(existing.assessment_id, body, existing.created_at, Utc::now());
        self.check_assessment(&config).await?;
        self.store.update_assessment(&config).await?;
        info!(target: "skillcheck", %assessment_id, "Assessment updated");
        Ok(config)
    }

    pub async fn plan(&self, assessment_id: &str, experience: Option<&str>) -> EngineResult<AssessmentPlan> {
        let config = self.get_assessment(assessment_id).await?;
        Ok(plan_assessment(&config, experience))
    }

    async fn check_assessment(&self, config: &AssessmentConfig) -> EngineResult<()> {
        config.validate()?;
        if let Some(set_id) = &config.question_set_id {
            if self.store.get_question_set(set_id).await?.is_none() {
                return Err(EngineError::not_found("question set", set_id.clone()));
            }
        }
        Ok(())
    }

    // --- Question bank ---

    pub async fn create_question_set(&self, body: QuestionSetIn) -> EngineResult<QuestionSet> {
        if body.skill.trim().is_empty() {
            return Err(EngineError::validation("skill must not be empty"));
        }
        let set = QuestionSet {
            question_set_id: body.question_set_id.unwrap_or_else(|| Uuid::new_v4().to_string()),
            skill: body.skill.trim().to_string(),
            level: body.level.trim().to_string(),
            created_at: Utc::now(),
        };
        self.store.insert_question_set(&set).await?;
        info!(target: "skillcheck", question_set_id = %set.question_set_id, skill = %set.skill, "Question set created");
        Ok(set)
    }

    pub async fn questions_in_set(&self, question_set_id: &str) -> EngineResult<Vec<QuestionItem>> {
        if self.store.get_question_set(question_set_id).await?.is_none() {
            return Err(EngineError::not_found("question set", question_set_id));
        }
        Ok(self.store.questions_in_set(question_set_id).await?)
    }

    /// Manual entry of any question type. MCQs must pass the same structural gate as generated ones.
    #[instrument(level = "info", skip(self, body), fields(question_type = %body.payload.question_type()))]
    pub async fn add_question(&self, body: QuestionIn) -> EngineResult<QuestionItem> {
        if body.question_text.trim().is_empty() {
            return Err(EngineError::validation("question_text must not be empty"));
        }
        if let QuestionPayload::Mcq(m) = &body.payload {
            let candidate = ParsedQuestion {
                question_text: body.question_text.clone(),
                options: m.options.clone(),
                correct_answer: m.correct_answer.clone(),
            };
            if !passes_quality_gate(&candidate) {
                return Err(EngineError::validation(
                    "mcq needs options labelled exactly A, B, C, D and a correct_answer among them",
                ));
            }
        }
        if let Some(set_id) = &body.question_set_id {
            if self.store.get_question_set(set_id).await?.is_none() {
                return Err(EngineError::not_found("question set", set_id.clone()));
            }
        }

        let item = QuestionItem {
            id: Uuid::new_v4().to_string(),
            question_set_id: body.question_set_id,
            question_text: body.question_text.trim().to_string(),
            payload: body.payload,
            difficulty: body.difficulty,
            topic: body.topic,
            provenance: Provenance { source_type: SourceType::Manual, source_meta: serde_json::Value::Null },
            quality_score: None,
            review_state: ReviewState::Draft,
            created_at: Utc::now(),
        };
        self.store.insert_question(&item).await?;
        Ok(item)
    }

    /// Draft → published. Publishing a published item returns it unchanged.
    pub async fn publish_question(&self, id: &str) -> EngineResult<QuestionItem> {
        let item = self
            .store
            .get_question(id)
            .await?
            .ok_or_else(|| EngineError::not_found("question", id))?;
        if item.review_state == ReviewState::Published {
            return Ok(item);
        }
        let published = self.store.set_review_state(id, ReviewState::Published).await?;
        info!(target: "skillcheck", question_id = %id, "Question published");
        Ok(published)
    }
}

fn assessment_from(
    assessment_id: String,
    body: AssessmentIn,
    created_at: chrono::DateTime<Utc>,
    updated_at: chrono::DateTime<Utc>,
) -> AssessmentConfig {
    AssessmentConfig {
        assessment_id,
        title: body.title,
        question_set_id: body.question_set_id,
        context_text: body.context_text,
        total_questions: body.total_questions,
        question_type_mix: body.question_type_mix,
        difficulty_distribution: body.difficulty_distribution,
        passing_score_threshold: body.passing_score_threshold,
        auto_adjust_by_experience: body.auto_adjust_by_experience,
        generation_policy: body.generation_policy,
        created_at,
        updated_at,
    }
}
