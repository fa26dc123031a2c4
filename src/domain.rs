//! Domain models: question items and their typed payloads, assessment configuration,
//! test sessions with their answers, and generation jobs.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{EngineError, EngineResult};

/// Reserved answer meaning "no response provided". Never graded as correct.
pub const NOT_ANSWERED: &str = "NOT_ANSWERED";

/// The four labels an MCQ must carry, in display order.
pub const MCQ_LABELS: [&str; 4] = ["A", "B", "C", "D"];

/// Accepted window for a fraction map's sum, inclusive at both ends.
const SUM_WINDOW: std::ops::RangeInclusive<f64> = 0.99..=1.01;

fn sum_in_window(sum: f64) -> bool {
  // Float error on the bounds themselves (0.33 * 3) must not reject them.
  const EPS: f64 = 1e-9;
  (SUM_WINDOW.start() - EPS..=SUM_WINDOW.end() + EPS).contains(&sum)
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Difficulty {
  Easy,
  Medium,
  Hard,
}
impl Difficulty {
  /// Fixed bucket order used by allocation; the last bucket absorbs rounding.
  pub const ALL: [Difficulty; 3] = [Difficulty::Easy, Difficulty::Medium, Difficulty::Hard];
}

/// Fractions of questions per difficulty. Must sum to ~1.0.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Default)]
pub struct DifficultyDistribution {
  #[serde(default)] pub easy: f64,
  #[serde(default)] pub medium: f64,
  #[serde(default)] pub hard: f64,
}

impl DifficultyDistribution {
  pub const fn new(easy: f64, medium: f64, hard: f64) -> Self {
    Self { easy, medium, hard }
  }

  pub fn get(&self, d: Difficulty) -> f64 {
    match d {
      Difficulty::Easy => self.easy,
      Difficulty::Medium => self.medium,
      Difficulty::Hard => self.hard,
    }
  }

  pub fn sum(&self) -> f64 { self.easy + self.medium + self.hard }

  /// Sum within [0.99, 1.01] and no negative fractions.
  pub fn is_valid(&self) -> bool {
    let parts = [self.easy, self.medium, self.hard];
    parts.iter().all(|p| p.is_finite() && *p >= 0.0) && sum_in_window(self.sum())
  }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum QuestionType {
  Mcq,
  Coding,
  Architecture,
}
impl QuestionType {
  pub const ALL: [QuestionType; 3] = [QuestionType::Mcq, QuestionType::Coding, QuestionType::Architecture];

  pub fn as_str(&self) -> &'static str {
    match self {
      QuestionType::Mcq => "mcq",
      QuestionType::Coding => "coding",
      QuestionType::Architecture => "architecture",
    }
  }
}
impl fmt::Display for QuestionType {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

/// Fractions of questions per type. Must sum to ~1.0.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
pub struct TypeMix {
  #[serde(default)] pub mcq: f64,
  #[serde(default)] pub coding: f64,
  #[serde(default)] pub architecture: f64,
}
impl Default for TypeMix {
  fn default() -> Self { Self { mcq: 1.0, coding: 0.0, architecture: 0.0 } }
}
impl TypeMix {
  pub fn get(&self, t: QuestionType) -> f64 {
    match t {
      QuestionType::Mcq => self.mcq,
      QuestionType::Coding => self.coding,
      QuestionType::Architecture => self.architecture,
    }
  }

  pub fn is_valid(&self) -> bool {
    let parts = [self.mcq, self.coding, self.architecture];
    let sum: f64 = parts.iter().sum();
    parts.iter().all(|p| p.is_finite() && *p >= 0.0) && sum_in_window(sum)
  }
}

/// Where did a question come from?
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
  Rag,     // generated, grounded in retrieved snippets
  Llm,     // generated from the topic alone (or rag fallback)
  Manual,  // entered by an admin
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ReviewState {
  #[default]
  Draft,
  Published,
}

/// MCQ payload: exactly four labelled options plus the correct label.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct McqSpec {
  pub options: BTreeMap<String, String>,
  pub correct_answer: String,
}

impl McqSpec {
  pub fn has_label(&self, label: &str) -> bool { self.options.contains_key(label) }
}

/// Free-form spec for coding / architecture questions. No answer key.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Default)]
pub struct OpenSpec {
  #[serde(flatten)]
  pub fields: Map<String, Value>,
}

/// Type-specific question content, discriminated by a `type` tag.
///
/// Deserialization goes through `TryFrom<Value>` so that a payload without
/// a tag is read as an MCQ, while any unknown tag is rejected.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case", try_from = "Value")]
pub enum QuestionPayload {
  Mcq(McqSpec),
  Coding(OpenSpec),
  Architecture(OpenSpec),
}

impl QuestionPayload {
  pub fn question_type(&self) -> QuestionType {
    match self {
      QuestionPayload::Mcq(_) => QuestionType::Mcq,
      QuestionPayload::Coding(_) => QuestionType::Coding,
      QuestionPayload::Architecture(_) => QuestionType::Architecture,
    }
  }

  pub fn as_mcq(&self) -> Option<&McqSpec> {
    match self {
      QuestionPayload::Mcq(m) => Some(m),
      _ => None,
    }
  }
}

impl TryFrom<Value> for QuestionPayload {
  type Error = String;

  fn try_from(value: Value) -> Result<Self, Self::Error> {
    let Value::Object(mut map) = value else {
      return Err("question payload must be a JSON object".into());
    };
    let tag = match map.remove("type") {
      None | Some(Value::Null) => "mcq".to_string(),
      Some(Value::String(s)) => s,
      Some(other) => return Err(format!("question type tag must be a string, got {other}")),
    };
    let rest = Value::Object(map);
    match tag.as_str() {
      "mcq" => serde_json::from_value(rest).map(QuestionPayload::Mcq).map_err(|e| format!("invalid mcq payload: {e}")),
      "coding" => serde_json::from_value(rest).map(QuestionPayload::Coding).map_err(|e| e.to_string()),
      "architecture" => serde_json::from_value(rest).map(QuestionPayload::Architecture).map_err(|e| e.to_string()),
      other => Err(format!("unknown question type '{other}'")),
    }
  }
}

/// Provenance of a question item.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Provenance {
  pub source_type: SourceType,
  #[serde(default)]
  pub source_meta: Value,
}

/// One question in the bank.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct QuestionItem {
  pub id: String,
  #[serde(default)] pub question_set_id: Option<String>,
  pub question_text: String,
  pub payload: QuestionPayload,
  #[serde(default)] pub difficulty: Option<Difficulty>,
  #[serde(default)] pub topic: Option<String>,
  pub provenance: Provenance,
  #[serde(default)] pub quality_score: Option<f32>,
  #[serde(default)] pub review_state: ReviewState,
  pub created_at: DateTime<Utc>,
}

impl QuestionItem {
  pub fn question_type(&self) -> QuestionType { self.payload.question_type() }
}

/// A named, ordered group of questions a session is taken against.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct QuestionSet {
  pub question_set_id: String,
  pub skill: String,
  pub level: String,
  pub created_at: DateTime<Utc>,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum GenerationMode {
  #[default]
  Rag,
  Llm,
  Mix,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct GenerationPolicy {
  #[serde(default)] pub mode: GenerationMode,
  #[serde(default = "default_rag_pct")] pub rag_pct: u8,
}
fn default_rag_pct() -> u8 { 100 }
impl Default for GenerationPolicy {
  fn default() -> Self { Self { mode: GenerationMode::Rag, rag_pct: 100 } }
}

/// Admin-authored assessment configuration. Never touched by generation or scoring.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AssessmentConfig {
  pub assessment_id: String,
  pub title: String,
  #[serde(default)] pub question_set_id: Option<String>,
  /// Job-description text, preferred over the topic as the retrieval query.
  #[serde(default)] pub context_text: Option<String>,
  pub total_questions: u32,
  #[serde(default)] pub question_type_mix: TypeMix,
  pub difficulty_distribution: DifficultyDistribution,
  pub passing_score_threshold: u8,
  #[serde(default)] pub auto_adjust_by_experience: bool,
  #[serde(default)] pub generation_policy: GenerationPolicy,
  pub created_at: DateTime<Utc>,
  pub updated_at: DateTime<Utc>,
}

impl AssessmentConfig {
  pub fn validate(&self) -> EngineResult<()> {
    if self.title.trim().is_empty() {
      return Err(EngineError::validation("title must not be empty"));
    }
    if !self.difficulty_distribution.is_valid() {
      return Err(EngineError::validation(format!(
        "difficulty distribution must sum to 1.0 (got {:.3})",
        self.difficulty_distribution.sum()
      )));
    }
    if !self.question_type_mix.is_valid() {
      return Err(EngineError::validation("question type mix must sum to 1.0"));
    }
    if self.passing_score_threshold > 100 {
      return Err(EngineError::validation("passing score threshold must be within 0-100"));
    }
    if self.generation_policy.rag_pct > 100 {
      return Err(EngineError::validation("rag_pct must be within 0-100"));
    }
    Ok(())
  }
}

/// How a completed session's score becomes visible.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ReleasePolicy {
  /// Scored and visible at completion.
  #[default]
  Immediate,
  /// Hidden until the release scheduler fires.
  Delayed,
}

/// Whatever identity the caller supplied; all fields optional for guest starts.
#[derive(Clone, Debug, Serialize, Deserialize, Default)]
pub struct CandidateIdentity {
  #[serde(default)] pub user_id: Option<String>,
  #[serde(default)] pub name: Option<String>,
  #[serde(default)] pub email: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TestSession {
  pub session_id: String,
  pub question_set_id: Option<String>,
  pub candidate: CandidateIdentity,
  pub release_policy: ReleasePolicy,
  #[serde(default)] pub passing_threshold: Option<u8>,
  pub started_at: DateTime<Utc>,
  pub completed_at: Option<DateTime<Utc>>,
  pub duration_seconds: Option<i64>,
  pub total_questions: u32,
  pub correct_answers: u32,
  pub score_percentage: Option<f64>,
  pub is_completed: bool,
  pub is_scored: bool,
  pub score_released_at: Option<DateTime<Utc>>,
  /// Delayed policy only: when the release was scheduled for, fixed at completion.
  #[serde(default)] pub release_due_at: Option<DateTime<Utc>>,
}

/// Lifecycle phase derived from the session flags.
#[derive(Clone, Copy, Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
  InProgress,
  AwaitingRelease,
  Scored,
}

impl TestSession {
  pub fn phase(&self) -> SessionPhase {
    match (self.is_completed, self.is_scored) {
      (false, _) => SessionPhase::InProgress,
      (true, false) => SessionPhase::AwaitingRelease,
      (true, true) => SessionPhase::Scored,
    }
  }
}

/// One stored response. Unique per (session_id, question_id); never updated.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Answer {
  pub session_id: String,
  pub question_id: String,
  pub selected_answer: String,
  pub is_correct: Option<bool>,
  pub created_at: DateTime<Utc>,
}

impl Answer {
  pub fn is_sentinel(&self) -> bool { self.selected_answer == NOT_ANSWERED }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
  Pending,
  Started,
  Success,
  Failure,
}

impl JobStatus {
  pub fn is_terminal(&self) -> bool { matches!(self, JobStatus::Success | JobStatus::Failure) }

  /// Forward-only: PENDING → STARTED → {SUCCESS | FAILURE}; a pending job may also fail outright.
  pub fn can_transition_to(&self, next: JobStatus) -> bool {
    matches!(
      (self, next),
      (JobStatus::Pending, JobStatus::Started)
        | (JobStatus::Pending, JobStatus::Failure)
        | (JobStatus::Started, JobStatus::Success)
        | (JobStatus::Started, JobStatus::Failure)
    )
  }

  pub fn as_str(&self) -> &'static str {
    match self {
      JobStatus::Pending => "PENDING",
      JobStatus::Started => "STARTED",
      JobStatus::Success => "SUCCESS",
      JobStatus::Failure => "FAILURE",
    }
  }
}
impl fmt::Display for JobStatus {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

/// Lifecycle record of one asynchronous generation request.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GenerationJob {
  pub task_id: String,
  pub task_name: String,
  pub status: JobStatus,
  #[serde(default)] pub result: Option<Value>,
  #[serde(default)] pub error: Option<String>,
  #[serde(default)] pub related_type: Option<String>,
  #[serde(default)] pub related_id: Option<String>,
  pub created_at: DateTime<Utc>,
  pub updated_at: DateTime<Utc>,
}
