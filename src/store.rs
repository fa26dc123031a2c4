//! Persistence collaborator: repository traits plus an in-memory backend.
//!
//! Uniqueness is enforced here, at the storage boundary:
//!   - one `Answer` per (session_id, question_id), insert-or-reject, and only
//!     while the owning session is still open
//!   - one `GenerationJob` per task_id
//! and state flips are single-record conditional updates, so several service
//! instances sharing a real backend need no in-process locking.
//!
//! `MemoryStore` keeps everything in process and is meant for development and tests.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::domain::{
    Answer, AssessmentConfig, GenerationJob, JobStatus, QuestionItem, QuestionSet, ReviewState, TestSession,
};
use crate::error::StoreError;

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompleteOutcome {
    Completed,
    /// Someone else completed it first; the stored record is untouched.
    AlreadyCompleted,
    /// The session's answer count is no longer the one the score was computed from.
    AnswersChanged,
}

/// Outcome of an all-or-nothing answer batch. Anything but `Stored` means nothing was written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnswerInsert {
    Stored,
    /// This pair already has an answer, stored or earlier in the same batch.
    Duplicate { question_id: String },
    /// The session completed before the batch landed.
    SessionClosed,
}

#[async_trait]
pub trait QuestionStore: Send + Sync {
    async fn insert_question_set(&self, set: &QuestionSet) -> StoreResult<()>;

    async fn get_question_set(&self, question_set_id: &str) -> StoreResult<Option<QuestionSet>>;

    async fn insert_question(&self, item: &QuestionItem) -> StoreResult<()>;

    async fn get_question(&self, id: &str) -> StoreResult<Option<QuestionItem>>;

    /// Questions of a set in insertion order.
    async fn questions_in_set(&self, question_set_id: &str) -> StoreResult<Vec<QuestionItem>>;

    async fn set_review_state(&self, id: &str, state: ReviewState) -> StoreResult<QuestionItem>;
}

#[async_trait]
pub trait AssessmentStore: Send + Sync {
    async fn insert_assessment(&self, config: &AssessmentConfig) -> StoreResult<()>;

    async fn get_assessment(&self, assessment_id: &str) -> StoreResult<Option<AssessmentConfig>>;

    async fn update_assessment(&self, config: &AssessmentConfig) -> StoreResult<()>;
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn insert_session(&self, session: &TestSession) -> StoreResult<()>;

    async fn get_session(&self, session_id: &str) -> StoreResult<Option<TestSession>>;

    /// Writes the completed session only if the stored one is still open and still
    /// has exactly `answers_seen` answers.
    async fn complete_session(&self, completed: &TestSession, answers_seen: usize) -> StoreResult<CompleteOutcome>;

    /// Flips a completed, unscored session to scored. Returns `false` if it was
    /// already released (or never completed); the stored record is then untouched.
    async fn release_session(&self, session_id: &str, released_at: DateTime<Utc>) -> StoreResult<bool>;

    /// Insert-or-reject on (session_id, question_id) for a whole batch. The batch is
    /// written only if every pair is new and every owning session is still open.
    async fn insert_answers(&self, batch: &[Answer]) -> StoreResult<AnswerInsert>;

    async fn answers_for_session(&self, session_id: &str) -> StoreResult<Vec<Answer>>;
}

#[async_trait]
pub trait JobStore: Send + Sync {
    /// Rejects a duplicate task_id with `StoreError::Conflict`.
    async fn insert_job(&self, job: &GenerationJob) -> StoreResult<()>;

    async fn get_job(&self, task_id: &str) -> StoreResult<Option<GenerationJob>>;

    /// Jobs recorded for an originating entity, newest first.
    async fn jobs_for_related(&self, related_id: &str) -> StoreResult<Vec<GenerationJob>>;

    /// Conditional single-row update: writes `next` only while the stored status is `expected`.
    async fn update_job_if(&self, expected: JobStatus, next: &GenerationJob) -> StoreResult<bool>;
}

/// Everything the engine persists, behind one handle.
pub trait Store: QuestionStore + AssessmentStore + SessionStore + JobStore {}
impl<T: QuestionStore + AssessmentStore + SessionStore + JobStore> Store for T {}

pub type SharedStore = Arc<dyn Store>;

#[derive(Default)]
struct Questions {
    sets: HashMap<String, QuestionSet>,
    by_id: HashMap<String, QuestionItem>,
    by_set: HashMap<String, Vec<String>>,
}

#[derive(Default)]
pub struct MemoryStore {
    questions: RwLock<Questions>,
    assessments: RwLock<HashMap<String, AssessmentConfig>>,
    sessions: RwLock<HashMap<String, TestSession>>,
    answers: RwLock<HashMap<(String, String), Answer>>,
    jobs: RwLock<HashMap<String, GenerationJob>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> SharedStore {
        Arc::new(Self::new())
    }
}

#[async_trait]
impl QuestionStore for MemoryStore {
    async fn insert_question_set(&self, set: &QuestionSet) -> StoreResult<()> {
        let mut q = self.questions.write().await;
        if q.sets.contains_key(&set.question_set_id) {
            return Err(StoreError::Conflict(format!("question set {} exists", set.question_set_id)));
        }
        q.sets.insert(set.question_set_id.clone(), set.clone());
        Ok(())
    }

    async fn get_question_set(&self, question_set_id: &str) -> StoreResult<Option<QuestionSet>> {
        Ok(self.questions.read().await.sets.get(question_set_id).cloned())
    }

    async fn insert_question(&self, item: &QuestionItem) -> StoreResult<()> {
        let mut q = self.questions.write().await;
        if q.by_id.contains_key(&item.id) {
            return Err(StoreError::Conflict(format!("question {} exists", item.id)));
        }
        if let Some(set_id) = &item.question_set_id {
            q.by_set.entry(set_id.clone()).or_default().push(item.id.clone());
        }
        q.by_id.insert(item.id.clone(), item.clone());
        Ok(())
    }

    async fn get_question(&self, id: &str) -> StoreResult<Option<QuestionItem>> {
        Ok(self.questions.read().await.by_id.get(id).cloned())
    }

    async fn questions_in_set(&self, question_set_id: &str) -> StoreResult<Vec<QuestionItem>> {
        let q = self.questions.read().await;
        let ids = q.by_set.get(question_set_id).cloned().unwrap_or_default();
        Ok(ids.iter().filter_map(|id| q.by_id.get(id).cloned()).collect())
    }

    async fn set_review_state(&self, id: &str, state: ReviewState) -> StoreResult<QuestionItem> {
        let mut q = self.questions.write().await;
        let item = q.by_id.get_mut(id).ok_or_else(|| StoreError::NotFound {
            entity: "question",
            id: id.to_string(),
        })?;
        item.review_state = state;
        Ok(item.clone())
    }
}

#[async_trait]
impl AssessmentStore for MemoryStore {
    async fn insert_assessment(&self, config: &AssessmentConfig) -> StoreResult<()> {
        let mut a = self.assessments.write().await;
        if a.contains_key(&config.assessment_id) {
            return Err(StoreError::Conflict(format!("assessment {} exists", config.assessment_id)));
        }
        a.insert(config.assessment_id.clone(), config.clone());
        Ok(())
    }

    async fn get_assessment(&self, assessment_id: &str) -> StoreResult<Option<AssessmentConfig>> {
        Ok(self.assessments.read().await.get(assessment_id).cloned())
    }

    async fn update_assessment(&self, config: &AssessmentConfig) -> StoreResult<()> {
        let mut a = self.assessments.write().await;
        match a.get_mut(&config.assessment_id) {
            Some(slot) => {
                *slot = config.clone();
                Ok(())
            }
            None => Err(StoreError::NotFound {
                entity: "assessment",
                id: config.assessment_id.clone(),
            }),
        }
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn insert_session(&self, session: &TestSession) -> StoreResult<()> {
        let mut s = self.sessions.write().await;
        if s.contains_key(&session.session_id) {
            return Err(StoreError::Conflict(format!("session {} exists", session.session_id)));
        }
        s.insert(session.session_id.clone(), session.clone());
        Ok(())
    }

    async fn get_session(&self, session_id: &str) -> StoreResult<Option<TestSession>> {
        Ok(self.sessions.read().await.get(session_id).cloned())
    }

    async fn complete_session(&self, completed: &TestSession, answers_seen: usize) -> StoreResult<CompleteOutcome> {
        let mut s = self.sessions.write().await;
        let stored = s.get_mut(&completed.session_id).ok_or_else(|| StoreError::NotFound {
            entity: "session",
            id: completed.session_id.clone(),
        })?;
        if stored.is_completed {
            return Ok(CompleteOutcome::AlreadyCompleted);
        }
        let answered = self
            .answers
            .read()
            .await
            .keys()
            .filter(|(session_id, _)| *session_id == completed.session_id)
            .count();
        if answered != answers_seen {
            return Ok(CompleteOutcome::AnswersChanged);
        }
        *stored = completed.clone();
        Ok(CompleteOutcome::Completed)
    }

    async fn release_session(&self, session_id: &str, released_at: DateTime<Utc>) -> StoreResult<bool> {
        let mut s = self.sessions.write().await;
        let stored = s.get_mut(session_id).ok_or_else(|| StoreError::NotFound {
            entity: "session",
            id: session_id.to_string(),
        })?;
        if !stored.is_completed || stored.is_scored {
            return Ok(false);
        }
        stored.is_scored = true;
        stored.score_released_at = Some(released_at);
        Ok(true)
    }

    async fn insert_answers(&self, batch: &[Answer]) -> StoreResult<AnswerInsert> {
        // Session read lock held across the write: completion waits for the batch.
        let sessions = self.sessions.read().await;
        for answer in batch {
            match sessions.get(&answer.session_id) {
                Some(session) if !session.is_completed => {}
                Some(_) => return Ok(AnswerInsert::SessionClosed),
                None => {
                    return Err(StoreError::NotFound {
                        entity: "session",
                        id: answer.session_id.clone(),
                    })
                }
            }
        }

        let mut a = self.answers.write().await;
        let mut batch_keys = HashSet::with_capacity(batch.len());
        for answer in batch {
            let key = (answer.session_id.clone(), answer.question_id.clone());
            if a.contains_key(&key) || !batch_keys.insert(key) {
                return Ok(AnswerInsert::Duplicate {
                    question_id: answer.question_id.clone(),
                });
            }
        }
        for answer in batch {
            a.insert((answer.session_id.clone(), answer.question_id.clone()), answer.clone());
        }
        Ok(AnswerInsert::Stored)
    }

    async fn answers_for_session(&self, session_id: &str) -> StoreResult<Vec<Answer>> {
        let a = self.answers.read().await;
        let mut out: Vec<Answer> = a.values().filter(|ans| ans.session_id == session_id).cloned().collect();
        out.sort_by(|x, y| x.created_at.cmp(&y.created_at));
        Ok(out)
    }
}

#[async_trait]
impl JobStore for MemoryStore {
    async fn insert_job(&self, job: &GenerationJob) -> StoreResult<()> {
        let mut j = self.jobs.write().await;
        if j.contains_key(&job.task_id) {
            return Err(StoreError::Conflict(format!("task {} exists", job.task_id)));
        }
        j.insert(job.task_id.clone(), job.clone());
        Ok(())
    }

    async fn get_job(&self, task_id: &str) -> StoreResult<Option<GenerationJob>> {
        Ok(self.jobs.read().await.get(task_id).cloned())
    }

    async fn jobs_for_related(&self, related_id: &str) -> StoreResult<Vec<GenerationJob>> {
        let j = self.jobs.read().await;
        let mut out: Vec<GenerationJob> = j
            .values()
            .filter(|job| job.related_id.as_deref() == Some(related_id))
            .cloned()
            .collect();
        out.sort_by(|x, y| y.created_at.cmp(&x.created_at));
        Ok(out)
    }

    async fn update_job_if(&self, expected: JobStatus, next: &GenerationJob) -> StoreResult<bool> {
        let mut j = self.jobs.write().await;
        match j.get_mut(&next.task_id) {
            Some(stored) if stored.status == expected => {
                *stored = next.clone();
                Ok(true)
            }
            Some(_) => Ok(false),
            None => Err(StoreError::NotFound {
                entity: "generation job",
                id: next.task_id.clone(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{CandidateIdentity, ReleasePolicy};

    fn session(id: &str) -> TestSession {
        TestSession {
            session_id: id.into(),
            question_set_id: Some("qs".into()),
            candidate: CandidateIdentity::default(),
            release_policy: ReleasePolicy::Delayed,
            passing_threshold: None,
            started_at: Utc::now(),
            completed_at: None,
            duration_seconds: None,
            total_questions: 1,
            correct_answers: 0,
            score_percentage: None,
            is_completed: false,
            is_scored: false,
            score_released_at: None,
            release_due_at: None,
        }
    }

    fn answer(session_id: &str, question_id: &str, text: &str) -> Answer {
        Answer {
            session_id: session_id.into(),
            question_id: question_id.into(),
            selected_answer: text.into(),
            is_correct: Some(false),
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn answer_pair_is_insert_or_reject() {
        let store = MemoryStore::new();
        store.insert_session(&session("s1")).await.unwrap();
        assert_eq!(store.insert_answers(&[answer("s1", "q1", "A")]).await.unwrap(), AnswerInsert::Stored);
        let dup = store.insert_answers(&[answer("s1", "q1", "B")]).await.unwrap();
        assert_eq!(dup, AnswerInsert::Duplicate { question_id: "q1".into() });
        let answers = store.answers_for_session("s1").await.unwrap();
        assert_eq!(answers.len(), 1);
        assert_eq!(answers[0].selected_answer, "A");
    }

    #[tokio::test]
    async fn rejected_batch_writes_nothing() {
        let store = MemoryStore::new();
        store.insert_session(&session("s1")).await.unwrap();
        store.insert_answers(&[answer("s1", "q1", "A")]).await.unwrap();

        let batch = [answer("s1", "q2", "B"), answer("s1", "q1", "C")];
        let outcome = store.insert_answers(&batch).await.unwrap();
        assert_eq!(outcome, AnswerInsert::Duplicate { question_id: "q1".into() });

        let again = [answer("s1", "q3", "B"), answer("s1", "q3", "C")];
        assert!(matches!(store.insert_answers(&again).await.unwrap(), AnswerInsert::Duplicate { .. }));

        let stored: Vec<String> = store.answers_for_session("s1").await.unwrap().into_iter().map(|a| a.question_id).collect();
        assert_eq!(stored, vec!["q1".to_string()]);
    }

    #[tokio::test]
    async fn answers_after_completion_are_refused() {
        let store = MemoryStore::new();
        store.insert_session(&session("s1")).await.unwrap();
        let mut done = session("s1");
        done.is_completed = true;
        done.completed_at = Some(Utc::now());
        assert_eq!(store.complete_session(&done, 0).await.unwrap(), CompleteOutcome::Completed);

        let outcome = store.insert_answers(&[answer("s1", "q1", "A")]).await.unwrap();
        assert_eq!(outcome, AnswerInsert::SessionClosed);
        assert!(store.answers_for_session("s1").await.unwrap().is_empty());
        assert!(matches!(
            store.insert_answers(&[answer("missing", "q1", "A")]).await,
            Err(StoreError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn completion_refuses_a_stale_answer_count() {
        let store = MemoryStore::new();
        store.insert_session(&session("s1")).await.unwrap();
        store.insert_answers(&[answer("s1", "q1", "A")]).await.unwrap();

        let mut done = session("s1");
        done.is_completed = true;
        done.completed_at = Some(Utc::now());
        assert_eq!(store.complete_session(&done, 0).await.unwrap(), CompleteOutcome::AnswersChanged);
        assert!(!store.get_session("s1").await.unwrap().unwrap().is_completed);
        assert_eq!(store.complete_session(&done, 1).await.unwrap(), CompleteOutcome::Completed);
    }

    #[tokio::test]
    async fn concurrent_duplicate_answers_leave_one_row() {
        let store = Arc::new(MemoryStore::new());
        store.insert_session(&session("s1")).await.unwrap();
        let mut handles = Vec::new();
        for i in 0..8 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.insert_answers(&[answer("s1", "q1", &format!("A{i}"))]).await.unwrap() == AnswerInsert::Stored
            }));
        }
        let mut accepted = 0;
        for h in handles {
            if h.await.unwrap() {
                accepted += 1;
            }
        }
        assert_eq!(accepted, 1);
        assert_eq!(store.answers_for_session("s1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn complete_only_once_and_release_only_once() {
        let store = MemoryStore::new();
        store.insert_session(&session("s1")).await.unwrap();

        let mut done = session("s1");
        done.is_completed = true;
        done.completed_at = Some(Utc::now());
        assert_eq!(store.complete_session(&done, 0).await.unwrap(), CompleteOutcome::Completed);
        assert_eq!(store.complete_session(&done, 0).await.unwrap(), CompleteOutcome::AlreadyCompleted);

        assert!(store.release_session("s1", Utc::now()).await.unwrap());
        let first = store.get_session("s1").await.unwrap().unwrap().score_released_at;
        assert!(!store.release_session("s1", Utc::now()).await.unwrap());
        let second = store.get_session("s1").await.unwrap().unwrap().score_released_at;
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn release_ignores_open_sessions() {
        let store = MemoryStore::new();
        store.insert_session(&session("s1")).await.unwrap();
        assert!(!store.release_session("s1", Utc::now()).await.unwrap());
        assert!(matches!(
            store.release_session("missing", Utc::now()).await,
            Err(StoreError::NotFound { .. })
        ));
    }
}
