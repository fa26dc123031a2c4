//! Public request/response DTOs for the HTTP API (serde ready).
//! Keep this small and stable to evolve backend and clients independently.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{
    CandidateIdentity, Difficulty, DifficultyDistribution, GenerationJob, GenerationPolicy, JobStatus, QuestionPayload,
    ReleasePolicy, TestSession, TypeMix,
};
use crate::session::AnswerSubmission;

#[derive(Serialize)]
pub struct HealthOut {
    pub ok: bool,
    pub model: String,
    pub retrieval: bool,
}

#[derive(Debug, Deserialize)]
pub struct ExperienceQuery {
    pub experience: String,
}

#[derive(Debug, Deserialize)]
pub struct PlanQuery {
    pub experience: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SkillSplitIn {
    pub total: u32,
    pub skills: Vec<String>,
}

#[derive(Serialize)]
pub struct SkillCount {
    pub skill: String,
    pub count: u32,
}

#[derive(Serialize)]
pub struct SkillSplitOut {
    pub allocations: Vec<SkillCount>,
}

/// Admin-authored assessment fields; ids and timestamps are assigned server-side.
#[derive(Debug, Clone, Deserialize)]
pub struct AssessmentIn {
    pub title: String,
    #[serde(default)]
    pub question_set_id: Option<String>,
    #[serde(default)]
    pub context_text: Option<String>,
    pub total_questions: u32,
    #[serde(default)]
    pub question_type_mix: TypeMix,
    pub difficulty_distribution: DifficultyDistribution,
    pub passing_score_threshold: u8,
    #[serde(default)]
    pub auto_adjust_by_experience: bool,
    #[serde(default)]
    pub generation_policy: GenerationPolicy,
}

#[derive(Debug, Deserialize)]
pub struct QuestionSetIn {
    #[serde(default)]
    pub question_set_id: Option<String>,
    pub skill: String,
    pub level: String,
}

/// Manual question entry. `payload` carries the `type` tag (defaults to mcq).
#[derive(Debug, Deserialize)]
pub struct QuestionIn {
    #[serde(default)]
    pub question_set_id: Option<String>,
    pub question_text: String,
    pub payload: QuestionPayload,
    #[serde(default)]
    pub difficulty: Option<Difficulty>,
    #[serde(default)]
    pub topic: Option<String>,
}

#[derive(Serialize)]
pub struct JobOut {
    pub task_id: String,
    pub status: JobStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub related_id: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl From<GenerationJob> for JobOut {
    fn from(j: GenerationJob) -> Self {
        JobOut {
            task_id: j.task_id,
            status: j.status,
            result: j.result,
            error: j.error,
            related_id: j.related_id,
            updated_at: j.updated_at,
        }
    }
}

/// Start by question set, or by assessment (then `experience` may adjust the threshold).
#[derive(Debug, Deserialize)]
pub struct StartSessionIn {
    #[serde(default)]
    pub question_set_id: Option<String>,
    #[serde(default)]
    pub assessment_id: Option<String>,
    #[serde(default)]
    pub experience: Option<String>,
    #[serde(default, flatten)]
    pub candidate: CandidateIdentity,
}

#[derive(Serialize)]
pub struct StartSessionOut {
    pub session_id: String,
    pub question_set_id: Option<String>,
    pub total_questions: u32,
    pub passing_threshold: Option<u8>,
    pub release_policy: ReleasePolicy,
    pub started_at: DateTime<Utc>,
}

impl From<&TestSession> for StartSessionOut {
    fn from(s: &TestSession) -> Self {
        StartSessionOut {
            session_id: s.session_id.clone(),
            question_set_id: s.question_set_id.clone(),
            total_questions: s.total_questions,
            passing_threshold: s.passing_threshold,
            release_policy: s.release_policy,
            started_at: s.started_at,
        }
    }
}

/// Either `{"answers": [...]}` or a single `{"question_id", "selected_answer"}`.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum AnswersIn {
    Batch { answers: Vec<AnswerSubmission> },
    Single(AnswerSubmission),
}

impl AnswersIn {
    pub fn into_vec(self) -> Vec<AnswerSubmission> {
        match self {
            AnswersIn::Batch { answers } => answers,
            AnswersIn::Single(one) => vec![one],
        }
    }
}

#[derive(Serialize)]
pub struct AnswersOut {
    pub accepted: usize,
    pub question_ids: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct SubmitIn {
    #[serde(default)]
    pub answers: Vec<AnswerSubmission>,
}

/// Completion/release summary. Scores only appear once they are released.
#[derive(Serialize)]
pub struct SessionStateOut {
    pub session_id: String,
    pub is_completed: bool,
    pub is_scored: bool,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_seconds: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score_percentage: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score_released_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub estimated_release_at: Option<DateTime<Utc>>,
}

impl SessionStateOut {
    pub fn new(s: &TestSession) -> Self {
        let estimated_release_at = if s.is_scored { None } else { s.release_due_at };
        SessionStateOut {
            session_id: s.session_id.clone(),
            is_completed: s.is_completed,
            is_scored: s.is_scored,
            completed_at: s.completed_at,
            duration_seconds: s.duration_seconds,
            score_percentage: if s.is_scored { s.score_percentage } else { None },
            score_released_at: s.score_released_at,
            estimated_release_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn answers_accept_single_or_batch() {
        let single: AnswersIn = serde_json::from_value(json!({"question_id": "q1", "selected_answer": "B"})).unwrap();
        assert_eq!(single.into_vec().len(), 1);

        let batch: AnswersIn = serde_json::from_value(json!({"answers": [
            {"question_id": "q1", "selected_answer": "B"},
            {"question_id": "q2", "selected_answer": 3}
        ]}))
        .unwrap();
        let v = batch.into_vec();
        assert_eq!(v.len(), 2);
        assert_eq!(v[1].selected_answer, json!(3));
    }

    #[test]
    fn guest_start_reads_flattened_identity() {
        let body: StartSessionIn =
            serde_json::from_value(json!({"question_set_id": "qs", "name": "Ada", "email": "ada@example.com"})).unwrap();
        assert_eq!(body.candidate.name.as_deref(), Some("Ada"));
        assert!(body.candidate.user_id.is_none());
    }
}
