//! HTTP endpoint handlers. These are thin wrappers that forward to the engine.
//! Each handler is instrumented; errors render through `EngineError`'s `IntoResponse`.

use std::sync::Arc;

use axum::{
  extract::{Path, Query, State},
  http::StatusCode,
  response::IntoResponse,
  Json,
};
use tracing::{info, instrument};

use crate::allocation::{allocate_by_skill, AssessmentPlan};
use crate::domain::{AssessmentConfig, QuestionItem, QuestionSet};
use crate::error::EngineResult;
use crate::experience::{policy_for_descriptor, ExperiencePolicy};
use crate::generation::GenerationRequest;
use crate::protocol::*;
use crate::session::{DeliveredQuestion, ResultsView, SessionStatus};
use crate::state::AppState;

#[instrument(level = "info", skip(state))]
pub async fn http_health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
  Json(HealthOut { ok: true, model: state.model_name.clone(), retrieval: state.retrieval_enabled })
}

// --- Policy & allocation ---

#[instrument(level = "info", fields(experience = %q.experience))]
pub async fn http_experience_policy(Query(q): Query<ExperienceQuery>) -> Json<ExperiencePolicy> {
  Json(policy_for_descriptor(&q.experience))
}

#[instrument(level = "info", skip(body), fields(total = body.total, skills = body.skills.len()))]
pub async fn http_allocate_skills(Json(body): Json<SkillSplitIn>) -> EngineResult<Json<SkillSplitOut>> {
  let allocations = allocate_by_skill(body.total, &body.skills)?
    .into_iter()
    .map(|(skill, count)| SkillCount { skill, count })
    .collect();
  Ok(Json(SkillSplitOut { allocations }))
}

// --- Assessments ---

#[instrument(level = "info", skip(state, body))]
pub async fn http_create_assessment(
  State(state): State<Arc<AppState>>,
  Json(body): Json<AssessmentIn>,
) -> EngineResult<(StatusCode, Json<AssessmentConfig>)> {
  let created = state.create_assessment(body).await?;
  Ok((StatusCode::CREATED, Json(created)))
}

#[instrument(level = "info", skip(state))]
pub async fn http_get_assessment(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> EngineResult<Json<AssessmentConfig>> {
  Ok(Json(state.get_assessment(&id).await?))
}

#[instrument(level = "info", skip(state, body))]
pub async fn http_update_assessment(
  State(state): State<Arc<AppState>>,
  Path(id): Path<String>,
  Json(body): Json<AssessmentIn>,
) -> EngineResult<Json<AssessmentConfig>> {
  Ok(Json(state.update_assessment(&id, body).await?))
}

#[instrument(level = "info", skip(state, q))]
pub async fn http_assessment_plan(
  State(state): State<Arc<AppState>>,
  Path(id): Path<String>,
  Query(q): Query<PlanQuery>,
) -> EngineResult<Json<AssessmentPlan>> {
  Ok(Json(state.plan(&id, q.experience.as_deref()).await?))
}

// --- Question bank ---

#[instrument(level = "info", skip(state, body), fields(skill = %body.skill))]
pub async fn http_create_question_set(
  State(state): State<Arc<AppState>>,
  Json(body): Json<QuestionSetIn>,
) -> EngineResult<(StatusCode, Json<QuestionSet>)> {
  Ok((StatusCode::CREATED, Json(state.create_question_set(body).await?)))
}

#[instrument(level = "info", skip(state))]
pub async fn http_list_set_questions(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> EngineResult<Json<Vec<QuestionItem>>> {
  Ok(Json(state.questions_in_set(&id).await?))
}

#[instrument(level = "info", skip(state, body))]
pub async fn http_add_question(
  State(state): State<Arc<AppState>>,
  Json(body): Json<QuestionIn>,
) -> EngineResult<(StatusCode, Json<QuestionItem>)> {
  Ok((StatusCode::CREATED, Json(state.add_question(body).await?)))
}

#[instrument(level = "info", skip(state))]
pub async fn http_publish_question(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> EngineResult<Json<QuestionItem>> {
  Ok(Json(state.publish_question(&id).await?))
}

// --- Generation jobs ---

#[instrument(level = "info", skip(state, body), fields(count = body.count, mode = ?body.mode))]
pub async fn http_start_generation(
  State(state): State<Arc<AppState>>,
  Json(body): Json<GenerationRequest>,
) -> EngineResult<(StatusCode, Json<JobOut>)> {
  let job = state.generation.start(body).await?;
  info!(target: "jobs", task_id = %job.task_id, "HTTP generation job accepted");
  Ok((StatusCode::ACCEPTED, Json(job.into())))
}

#[instrument(level = "info", skip(state))]
pub async fn http_generation_status(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> EngineResult<Json<JobOut>> {
  Ok(Json(state.generation.status(&id).await?.into()))
}

// --- Sessions ---

#[instrument(level = "info", skip(state, body), fields(question_set_id = ?body.question_set_id, assessment_id = ?body.assessment_id))]
pub async fn http_start_session(
  State(state): State<Arc<AppState>>,
  Json(body): Json<StartSessionIn>,
) -> EngineResult<(StatusCode, Json<StartSessionOut>)> {
  let session = match (&body.assessment_id, &body.question_set_id) {
    (Some(assessment_id), _) => {
      state
        .sessions
        .start_for_assessment(assessment_id, body.candidate, body.experience.as_deref())
        .await?
        .0
    }
    (None, Some(set_id)) => state.sessions.start(set_id, body.candidate).await?,
    (None, None) => {
      return Err(crate::error::EngineError::validation("question_set_id or assessment_id is required"));
    }
  };
  info!(target: "session", session_id = %session.session_id, total = session.total_questions, "HTTP session started");
  Ok((StatusCode::CREATED, Json(StartSessionOut::from(&session))))
}

#[instrument(level = "info", skip(state))]
pub async fn http_session_status(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> EngineResult<Json<SessionStatus>> {
  Ok(Json(state.sessions.status(&id).await?))
}

#[instrument(level = "info", skip(state))]
pub async fn http_session_questions(
  State(state): State<Arc<AppState>>,
  Path(id): Path<String>,
) -> EngineResult<Json<Vec<DeliveredQuestion>>> {
  Ok(Json(state.sessions.questions(&id).await?))
}

#[instrument(level = "info", skip(state, body))]
pub async fn http_submit_answers(
  State(state): State<Arc<AppState>>,
  Path(id): Path<String>,
  Json(body): Json<AnswersIn>,
) -> EngineResult<Json<AnswersOut>> {
  let stored = state.sessions.submit_answers(&id, body.into_vec()).await?;
  Ok(Json(AnswersOut {
    accepted: stored.len(),
    question_ids: stored.into_iter().map(|a| a.question_id).collect(),
  }))
}

#[instrument(level = "info", skip(state))]
pub async fn http_complete_session(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> EngineResult<Json<SessionStateOut>> {
  let done = state.sessions.complete(&id).await?;
  Ok(Json(SessionStateOut::new(&done)))
}

#[instrument(level = "info", skip(state, body), fields(answers = body.answers.len()))]
pub async fn http_submit_and_complete(
  State(state): State<Arc<AppState>>,
  Path(id): Path<String>,
  Json(body): Json<SubmitIn>,
) -> EngineResult<(StatusCode, Json<ResultsView>)> {
  let view = state.sessions.submit_and_complete(&id, body.answers).await?;
  Ok((results_status(&view), Json(view)))
}

/// 200 with full results, or 202 while a delayed score is still pending.
#[instrument(level = "info", skip(state))]
pub async fn http_session_results(
  State(state): State<Arc<AppState>>,
  Path(id): Path<String>,
) -> EngineResult<(StatusCode, Json<ResultsView>)> {
  let view = state.sessions.read_results(&id).await?;
  Ok((results_status(&view), Json(view)))
}

#[instrument(level = "info", skip(state))]
pub async fn http_release_session(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> EngineResult<Json<SessionStateOut>> {
  let session = state.sessions.release_now(&id).await?;
  info!(target: "release", session_id = %id, "HTTP release override");
  Ok(Json(SessionStateOut::new(&session)))
}

fn results_status(view: &ResultsView) -> StatusCode {
  if view.is_pending() { StatusCode::ACCEPTED } else { StatusCode::OK }
}
