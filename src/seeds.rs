//! Built-in content so the service is useful without any collaborator:
//! a small published demo question set and the offline model's canned reply.

use chrono::Utc;
use serde_json::{json, Map, Value};
use tracing::info;

use crate::domain::{
  Difficulty, McqSpec, OpenSpec, Provenance, QuestionItem, QuestionPayload, QuestionSet, ReviewState, SourceType,
};
use crate::error::EngineResult;
use crate::store::{QuestionStore, SharedStore};

pub const DEMO_QUESTION_SET_ID: &str = "demo-backend";

/// Reply of the offline stub model: always one valid MCQ.
pub fn stub_mcq_response() -> &'static str {
  r#"{"question_text":"Which HTTP status code indicates that a resource was created?","options":{"A":"200 OK","B":"201 Created","C":"204 No Content","D":"302 Found"},"correct_answer":"B"}"#
}

fn open_fields(v: Value) -> Map<String, Value> {
  match v {
    Value::Object(m) => m,
    _ => Map::new(),
  }
}

fn seed_item(n: usize, text: &str, payload: QuestionPayload, difficulty: Difficulty, topic: &str) -> QuestionItem {
  QuestionItem {
    id: format!("{DEMO_QUESTION_SET_ID}-q{n}"),
    question_set_id: Some(DEMO_QUESTION_SET_ID.to_string()),
    question_text: text.to_string(),
    payload,
    difficulty: Some(difficulty),
    topic: Some(topic.to_string()),
    provenance: Provenance { source_type: SourceType::Manual, source_meta: json!({ "seed": true }) },
    quality_score: None,
    review_state: ReviewState::Published,
    created_at: Utc::now(),
  }
}

pub fn demo_questions() -> Vec<QuestionItem> {
  let mcq = |pairs: [(&str, &str); 4], correct: &str| {
    QuestionPayload::Mcq(McqSpec {
      options: pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
      correct_answer: correct.to_string(),
    })
  };
  vec![
    seed_item(
      1,
      "Which SQL clause filters rows after aggregation?",
      mcq([("A", "WHERE"), ("B", "GROUP BY"), ("C", "HAVING"), ("D", "ORDER BY")], "C"),
      Difficulty::Easy,
      "SQL",
    ),
    seed_item(
      2,
      "What does an idempotent HTTP method guarantee?",
      mcq(
        [
          ("A", "The response is always cached"),
          ("B", "Repeating the request has the same effect as sending it once"),
          ("C", "The request body is never empty"),
          ("D", "The server processes it synchronously"),
        ],
        "B",
      ),
      Difficulty::Medium,
      "HTTP APIs",
    ),
    seed_item(
      3,
      "Implement a function that returns the k most frequent words in a text.",
      QuestionPayload::Coding(OpenSpec {
        fields: open_fields(json!({ "language": "any", "constraints": ["O(n log k) time", "ties broken alphabetically"] })),
      }),
      Difficulty::Medium,
      "algorithms",
    ),
    seed_item(
      4,
      "Design a URL shortener that handles 10k writes per second.",
      QuestionPayload::Architecture(OpenSpec {
        fields: open_fields(json!({ "focus_areas": ["id generation", "storage", "caching", "analytics"] })),
      }),
      Difficulty::Hard,
      "system design",
    ),
  ]
}

/// Insert the demo set unless it is already present.
pub async fn seed_demo_content(store: &SharedStore) -> EngineResult<()> {
  if store.get_question_set(DEMO_QUESTION_SET_ID).await?.is_some() {
    return Ok(());
  }
  store
    .insert_question_set(&QuestionSet {
      question_set_id: DEMO_QUESTION_SET_ID.to_string(),
      skill: "backend engineering".into(),
      level: "mixed".into(),
      created_at: Utc::now(),
    })
    .await?;
  let questions = demo_questions();
  for q in &questions {
    store.insert_question(q).await?;
  }
  info!(target: "skillcheck", question_set_id = DEMO_QUESTION_SET_ID, count = questions.len(), "Seeded demo question set");
  Ok(())
}
