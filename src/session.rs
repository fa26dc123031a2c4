//! Test sessions: start, deliver questions, accept answers, complete, report results.
//!
//! One engine serves both release policies. The policy is stamped on the session at
//! start; completion either scores immediately or hands the session to the release
//! scheduler, and results read before release come back as `ResultsView::Pending`.
//!
//! Invariants upheld here (with the storage boundary doing the atomic parts):
//!   - at most one answer per (session, question); resubmission is rejected
//!   - nothing is accepted once a session is completed
//!   - the sentinel answer is never graded as correct

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::domain::{
  Answer, CandidateIdentity, QuestionItem, QuestionPayload, QuestionType, ReleasePolicy, SessionPhase, TestSession,
  NOT_ANSWERED,
};
use crate::error::{EngineError, EngineResult};
use crate::experience::{effective_policy, EffectivePolicy};
use crate::release::{release_score, ScoreReleaseScheduler};
use crate::store::{AnswerInsert, AssessmentStore, CompleteOutcome, QuestionStore, SessionStore, SharedStore};
use crate::util::{coerce_answer_value, normalize_answer_text};

const COMPLETE_ATTEMPTS: usize = 3;

#[derive(Clone, Debug)]
pub struct SessionSettings {
  pub release_policy: ReleasePolicy,
  pub release_delay: Duration,
  pub max_answer_len: usize,
}

impl Default for SessionSettings {
  fn default() -> Self {
    Self { release_policy: ReleasePolicy::Immediate, release_delay: Duration::from_secs(86_400), max_answer_len: 10_000 }
  }
}

/// A question as the candidate sees it: no answer key.
#[derive(Clone, Debug, Serialize)]
pub struct DeliveredQuestion {
  pub id: String,
  pub question_text: String,
  pub question_type: QuestionType,
  /// MCQ only.
  #[serde(skip_serializing_if = "Option::is_none")]
  pub options: Option<BTreeMap<String, String>>,
  /// Coding / architecture spec (language, constraints, focus areas, ...).
  #[serde(skip_serializing_if = "Option::is_none")]
  pub meta: Option<Map<String, Value>>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub topic: Option<String>,
}

impl From<&QuestionItem> for DeliveredQuestion {
  fn from(q: &QuestionItem) -> Self {
    let (options, meta) = match &q.payload {
      QuestionPayload::Mcq(m) => (Some(m.options.clone()), None),
      QuestionPayload::Coding(s) | QuestionPayload::Architecture(s) => (None, Some(s.fields.clone())),
    };
    Self {
      id: q.id.clone(),
      question_text: q.question_text.clone(),
      question_type: q.question_type(),
      options,
      meta,
      topic: q.topic.clone(),
    }
  }
}

/// One (question, answer) pair as submitted. The answer may be any JSON value.
#[derive(Clone, Debug, Deserialize)]
pub struct AnswerSubmission {
  pub question_id: String,
  #[serde(default)]
  pub selected_answer: Value,
}

#[derive(Clone, Debug, Serialize)]
pub struct SessionStatus {
  pub session_id: String,
  pub phase: SessionPhase,
  pub answered: usize,
  pub total_questions: u32,
  pub is_completed: bool,
  pub is_scored: bool,
}

#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct QuestionResult {
  pub question_id: String,
  pub question_text: String,
  pub question_type: QuestionType,
  pub your_answer: Option<String>,
  /// MCQ label; open-ended questions have no answer key.
  pub correct_answer: Option<String>,
  pub is_correct: bool,
}

#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct Remediation {
  pub question_id: String,
  pub suggestion: String,
}

#[derive(Clone, Copy, Debug, Serialize, PartialEq, Eq)]
pub enum LearningLevel {
  Beginner,
  Intermediate,
  Advanced,
}

pub fn learning_level(score_percentage: f64) -> LearningLevel {
  if score_percentage >= 80.0 {
    LearningLevel::Advanced
  } else if score_percentage >= 60.0 {
    LearningLevel::Intermediate
  } else {
    LearningLevel::Beginner
  }
}

#[derive(Clone, Debug, Serialize)]
pub struct SessionResults {
  pub session_id: String,
  pub candidate: CandidateIdentity,
  pub total_questions: u32,
  pub correct_answers: u32,
  pub score_percentage: f64,
  /// Present when the session was started with a passing threshold.
  pub passed: Option<bool>,
  pub learning_level: LearningLevel,
  pub duration_seconds: Option<i64>,
  pub completed_at: Option<DateTime<Utc>>,
  pub score_released_at: Option<DateTime<Utc>>,
  pub questions: Vec<QuestionResult>,
  pub remediation: Vec<Remediation>,
}

/// What a results read returns. `Pending` is a waiting state, not a failure.
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ResultsView {
  #[serde(rename = "processing")]
  Pending {
    session_id: String,
    message: String,
    completed_at: DateTime<Utc>,
    estimated_release_at: DateTime<Utc>,
  },
  Scored(Box<SessionResults>),
}

impl ResultsView {
  pub fn is_pending(&self) -> bool { matches!(self, ResultsView::Pending { .. }) }
}

pub struct TestSessionEngine {
  store: SharedStore,
  scheduler: Arc<dyn ScoreReleaseScheduler>,
  settings: SessionSettings,
}

impl TestSessionEngine {
  pub fn new(store: SharedStore, scheduler: Arc<dyn ScoreReleaseScheduler>, settings: SessionSettings) -> Self {
    Self { store, scheduler, settings }
  }

  /// Start a session over a question set. Guests may start with just a name/email.
  #[instrument(level = "info", skip(self, candidate), fields(%question_set_id))]
  pub async fn start(&self, question_set_id: &str, candidate: CandidateIdentity) -> EngineResult<TestSession> {
    self.start_with_threshold(question_set_id, candidate, None).await
  }

  /// Start against an assessment: its question set, plus the passing threshold the
  /// candidate's experience resolves to.
  #[instrument(level = "info", skip(self, candidate), fields(%assessment_id, ?experience))]
  pub async fn start_for_assessment(
    &self,
    assessment_id: &str,
    candidate: CandidateIdentity,
    experience: Option<&str>,
  ) -> EngineResult<(TestSession, EffectivePolicy)> {
    let config = self
      .store
      .get_assessment(assessment_id)
      .await?
      .ok_or_else(|| EngineError::not_found("assessment", assessment_id))?;
    let Some(set_id) = config.question_set_id.clone() else {
      return Err(EngineError::validation(format!("assessment {assessment_id} has no question set")));
    };
    let policy = effective_policy(&config, experience);
    let session = self.start_with_threshold(&set_id, candidate, Some(policy.passing_threshold)).await?;
    Ok((session, policy))
  }

  async fn start_with_threshold(
    &self,
    question_set_id: &str,
    candidate: CandidateIdentity,
    passing_threshold: Option<u8>,
  ) -> EngineResult<TestSession> {
    if self.store.get_question_set(question_set_id).await?.is_none() {
      return Err(EngineError::not_found("question set", question_set_id));
    }
    let total = self.store.questions_in_set(question_set_id).await?.len() as u32;
    if total == 0 {
      warn!(target: "session", %question_set_id, "Starting a session on an empty question set");
    }

    let session = TestSession {
      session_id: Uuid::new_v4().to_string(),
      question_set_id: Some(question_set_id.to_string()),
      candidate,
      release_policy: self.settings.release_policy,
      passing_threshold,
      started_at: Utc::now(),
      completed_at: None,
      duration_seconds: None,
      total_questions: total,
      correct_answers: 0,
      score_percentage: None,
      is_completed: false,
      is_scored: false,
      score_released_at: None,
      release_due_at: None,
    };
    self.store.insert_session(&session).await?;
    info!(target: "session", session_id = %session.session_id, total, policy = ?session.release_policy, "Session started");
    Ok(session)
  }

  async fn load(&self, session_id: &str) -> EngineResult<TestSession> {
    self.store.get_session(session_id).await?.ok_or_else(|| EngineError::not_found("session", session_id))
  }

  async fn questions_of(&self, session: &TestSession) -> EngineResult<Vec<QuestionItem>> {
    match &session.question_set_id {
      Some(set_id) => Ok(self.store.questions_in_set(set_id).await?),
      None => Ok(Vec::new()),
    }
  }

  /// Questions for an open session, answer keys stripped.
  #[instrument(level = "debug", skip(self), fields(%session_id))]
  pub async fn questions(&self, session_id: &str) -> EngineResult<Vec<DeliveredQuestion>> {
    let session = self.load(session_id).await?;
    if session.is_completed {
      return Err(EngineError::state("session is already completed"));
    }
    Ok(self.questions_of(&session).await?.iter().map(DeliveredQuestion::from).collect())
  }

  /// Validate and store one or more answers. The batch is stored whole or not at all.
  #[instrument(level = "info", skip(self, submissions), fields(%session_id, batch = submissions.len()))]
  pub async fn submit_answers(&self, session_id: &str, submissions: Vec<AnswerSubmission>) -> EngineResult<Vec<Answer>> {
    if submissions.is_empty() {
      return Err(EngineError::validation("no answers submitted"));
    }
    let session = self.load(session_id).await?;
    if session.is_completed {
      return Err(EngineError::state("cannot submit answers to a completed session"));
    }

    let questions: HashMap<String, QuestionItem> =
      self.questions_of(&session).await?.into_iter().map(|q| (q.id.clone(), q)).collect();

    let mut seen = HashSet::new();
    let mut graded = Vec::with_capacity(submissions.len());
    for sub in &submissions {
      if !seen.insert(sub.question_id.as_str()) {
        return Err(EngineError::DuplicateAnswer { session_id: session_id.to_string(), question_id: sub.question_id.clone() });
      }
      let question = questions
        .get(&sub.question_id)
        .ok_or_else(|| EngineError::validation(format!("question {} is not part of this session", sub.question_id)))?;
      let text = normalize_answer_text(&coerce_answer_value(&sub.selected_answer), self.settings.max_answer_len);
      let is_correct = grade(question, &text)?;
      graded.push(Answer {
        session_id: session_id.to_string(),
        question_id: sub.question_id.clone(),
        selected_answer: text,
        is_correct: Some(is_correct),
        created_at: Utc::now(),
      });
    }

    match self.store.insert_answers(&graded).await? {
      AnswerInsert::Stored => {}
      AnswerInsert::Duplicate { question_id } => {
        return Err(EngineError::DuplicateAnswer { session_id: session_id.to_string(), question_id });
      }
      AnswerInsert::SessionClosed => {
        return Err(EngineError::state("cannot submit answers to a completed session"));
      }
    }
    debug!(target: "session", %session_id, stored = graded.len(), "Answers stored");
    Ok(graded)
  }

  /// Score the session and apply its release policy. A session completes exactly once.
  #[instrument(level = "info", skip(self), fields(%session_id))]
  pub async fn complete(&self, session_id: &str) -> EngineResult<TestSession> {
    let session = self.load(session_id).await?;
    if session.is_completed {
      return Err(EngineError::state("session is already completed"));
    }
    if session.question_set_id.is_none() {
      return Err(EngineError::state("session has no linked question set"));
    }

    // A batch landing between the count and the write makes the store refuse; recount.
    for _ in 0..COMPLETE_ATTEMPTS {
      let answers = self.store.answers_for_session(session_id).await?;
      let done = self.scored(&session, &answers);
      match self.store.complete_session(&done, answers.len()).await? {
        CompleteOutcome::Completed => {}
        CompleteOutcome::AlreadyCompleted => return Err(EngineError::state("session is already completed")),
        CompleteOutcome::AnswersChanged => {
          debug!(target: "session", %session_id, "Answers arrived during completion; recounting");
          continue;
        }
      }
      if session.release_policy == ReleasePolicy::Delayed {
        self.scheduler.schedule(session_id, self.settings.release_delay).await;
      }
      info!(
        target: "session",
        %session_id,
        correct = done.correct_answers,
        total = done.total_questions,
        score = %format!("{:.1}", done.score_percentage.unwrap_or(0.0)),
        scored = done.is_scored,
        "Session completed"
      );
      return Ok(done);
    }
    Err(EngineError::state("answers kept arriving while completing; try again"))
  }

  /// The completed form of `session` over `answers`, with the release policy applied.
  fn scored(&self, session: &TestSession, answers: &[Answer]) -> TestSession {
    let correct = answers.iter().filter(|a| a.is_correct == Some(true) && !a.is_sentinel()).count() as u32;
    let correct = correct.min(session.total_questions);

    let now = Utc::now();
    let mut done = session.clone();
    done.completed_at = Some(now);
    done.duration_seconds = Some((now - session.started_at).num_seconds().max(0));
    done.correct_answers = correct;
    done.score_percentage = Some(score_percentage(correct, session.total_questions));
    done.is_completed = true;
    match session.release_policy {
      ReleasePolicy::Immediate => {
        done.is_scored = true;
        done.score_released_at = Some(now);
      }
      ReleasePolicy::Delayed => {
        done.is_scored = false;
        done.score_released_at = None;
        done.release_due_at = Some(now + release_delay(&self.settings));
      }
    }
    done
  }

  /// Batch submission followed by completion, then the results view.
  pub async fn submit_and_complete(&self, session_id: &str, submissions: Vec<AnswerSubmission>) -> EngineResult<ResultsView> {
    if !submissions.is_empty() {
      self.submit_answers(session_id, submissions).await?;
    }
    self.complete(session_id).await?;
    self.read_results(session_id).await
  }

  pub async fn status(&self, session_id: &str) -> EngineResult<SessionStatus> {
    let session = self.load(session_id).await?;
    let answered = self.store.answers_for_session(session_id).await?.len();
    Ok(SessionStatus {
      session_id: session.session_id.clone(),
      phase: session.phase(),
      answered,
      total_questions: session.total_questions,
      is_completed: session.is_completed,
      is_scored: session.is_scored,
    })
  }

  #[instrument(level = "info", skip(self), fields(%session_id))]
  pub async fn read_results(&self, session_id: &str) -> EngineResult<ResultsView> {
    let session = self.load(session_id).await?;
    let Some(completed_at) = session.completed_at.filter(|_| session.is_completed) else {
      return Err(EngineError::state("session is not completed"));
    };

    if !session.is_scored {
      let estimated_release_at = session.release_due_at.unwrap_or_else(|| completed_at + release_delay(&self.settings));
      debug!(target: "session", %session_id, "Results requested before release");
      return Ok(ResultsView::Pending {
        session_id: session.session_id.clone(),
        message: "Your test has been submitted. Results will be available after review.".into(),
        completed_at,
        estimated_release_at,
      });
    }

    let questions = self.questions_of(&session).await?;
    let answers: HashMap<String, Answer> = self
      .store
      .answers_for_session(session_id)
      .await?
      .into_iter()
      .map(|a| (a.question_id.clone(), a))
      .collect();

    let mut details = Vec::with_capacity(questions.len());
    let mut remediation = Vec::new();
    for q in &questions {
      let answer = answers.get(&q.id);
      let is_correct = answer.is_some_and(|a| a.is_correct == Some(true) && !a.is_sentinel());
      if !is_correct {
        remediation.push(Remediation { question_id: q.id.clone(), suggestion: remediation_for(q) });
      }
      details.push(QuestionResult {
        question_id: q.id.clone(),
        question_text: q.question_text.clone(),
        question_type: q.question_type(),
        your_answer: answer.map(|a| a.selected_answer.clone()),
        correct_answer: q.payload.as_mcq().map(|m| m.correct_answer.clone()),
        is_correct,
      });
    }

    let score = session.score_percentage.unwrap_or(0.0);
    Ok(ResultsView::Scored(Box::new(SessionResults {
      session_id: session.session_id.clone(),
      candidate: session.candidate.clone(),
      total_questions: session.total_questions,
      correct_answers: session.correct_answers,
      score_percentage: score,
      passed: session.passing_threshold.map(|t| score >= f64::from(t)),
      learning_level: learning_level(score),
      duration_seconds: session.duration_seconds,
      completed_at: session.completed_at,
      score_released_at: session.score_released_at,
      questions: details,
      remediation,
    })))
  }

  /// Administrative override: release a delayed score now. Safe to call repeatedly.
  #[instrument(level = "info", skip(self), fields(%session_id))]
  pub async fn release_now(&self, session_id: &str) -> EngineResult<TestSession> {
    let flipped = release_score(&self.store, session_id).await?;
    if !flipped {
      debug!(target: "session", %session_id, "Release override on an already scored session");
    }
    self.load(session_id).await
  }
}

fn release_delay(settings: &SessionSettings) -> chrono::Duration {
  chrono::Duration::from_std(settings.release_delay).unwrap_or_else(|_| chrono::Duration::days(1))
}

/// Grade one normalized answer against its question. Sentinels are valid and never correct.
fn grade(question: &QuestionItem, text: &str) -> EngineResult<bool> {
  if text == NOT_ANSWERED {
    return Ok(false);
  }
  match &question.payload {
    QuestionPayload::Mcq(mcq) => {
      if !mcq.has_label(text) {
        return Err(EngineError::validation(format!(
          "answer '{text}' is not an option of question {} (expected one of {})",
          question.id,
          mcq.options.keys().cloned().collect::<Vec<_>>().join(", ")
        )));
      }
      Ok(text == mcq.correct_answer)
    }
    // Open-ended answers are stored for human review and never auto-graded.
    QuestionPayload::Coding(_) | QuestionPayload::Architecture(_) => {
      if text.is_empty() {
        return Err(EngineError::validation(format!("answer to question {} must not be empty", question.id)));
      }
      Ok(false)
    }
  }
}

fn score_percentage(correct: u32, total: u32) -> f64 {
  if total == 0 {
    0.0
  } else {
    f64::from(correct) / f64::from(total) * 100.0
  }
}

fn remediation_for(q: &QuestionItem) -> String {
  if let Some(topic) = q.topic.as_deref().filter(|t| !t.trim().is_empty()) {
    return format!("Review the fundamentals of {topic} and practise a few focused exercises on it.");
  }
  match q.question_type() {
    QuestionType::Mcq => "Revisit the core concepts behind this question and compare each option carefully.".into(),
    QuestionType::Coding => "Practise implementing similar problems end to end, paying attention to edge cases and complexity.".into(),
    QuestionType::Architecture => "Study common system design trade-offs: scalability, consistency and failure handling.".into(),
  }
}
