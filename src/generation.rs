//! Question generation: blending retrieval-grounded and topic-only MCQ creation.
//!
//! Per item the orchestrator:
//!   1) builds a prompt (grounded in snippets, or topic-only)
//!   2) calls the language model once
//!   3) parses the reply leniently and runs the structural quality gate
//!   4) persists the item if it passes; otherwise drops it
//!
//! Dropped items are never retried within one invocation. The report keeps
//! `requested` and `created` apart so callers can see any shortfall.
//!
//! Collaborator failures behave differently by seam: a retrieval error counts as
//! "no hits" (the item falls back to topic-only), a model error aborts the run.
//! Items persisted before an abort stay as drafts and are listed in the partial report.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::config::Prompts;
use crate::domain::{
  Difficulty, GenerationMode, McqSpec, Provenance, QuestionItem, QuestionPayload, ReviewState, SourceType, MCQ_LABELS,
};
use crate::error::{CollaboratorError, EngineError, EngineResult};
use crate::retrieval::{RetrievedSnippet, Retriever};
use crate::store::{AssessmentStore, QuestionStore, SharedStore};
use crate::util::{fill_template, trunc_for_log};

/// Generation collaborator: one prompt in, raw text out. No structural guarantees.
#[async_trait]
pub trait LanguageModel: Send + Sync {
  async fn complete(&self, prompt: &str) -> Result<String, CollaboratorError>;

  /// Model name for logs.
  fn name(&self) -> &str;
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GenerationRequest {
  #[serde(default)] pub topic: Option<String>,
  /// Scopes retrieval to this document and supplies the context text and target set.
  #[serde(default)] pub assessment_id: Option<String>,
  #[serde(default)] pub question_set_id: Option<String>,
  pub count: u32,
  #[serde(default)] pub mode: GenerationMode,
  #[serde(default = "default_rag_pct")] pub rag_pct: u8,
  #[serde(default)] pub min_retrieval_score: Option<f32>,
  #[serde(default)] pub difficulty: Option<Difficulty>,
}
fn default_rag_pct() -> u8 { 100 }

impl GenerationRequest {
  /// Id jobs are filed under when the caller does not keep the task id.
  pub fn related_id(&self) -> Option<String> {
    self.assessment_id.clone().or_else(|| self.topic.clone())
  }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct GenerationReport {
  pub requested: u32,
  /// Ids of persisted items, in creation order.
  pub created: Vec<String>,
  pub rag_attempts: u32,
  pub llm_attempts: u32,
  /// Rag attempts that degraded to topic-only generation.
  pub fallbacks: u32,
  /// Items dropped by the parser or quality gate.
  pub rejected: u32,
}

impl GenerationReport {
  pub fn shortfall(&self) -> u32 {
    self.requested.saturating_sub(self.created.len() as u32)
  }
}

/// Model output after lenient parsing, before the quality gate.
#[derive(Clone, Debug, PartialEq)]
pub struct ParsedQuestion {
  pub question_text: String,
  pub options: BTreeMap<String, String>,
  pub correct_answer: String,
}

/// Parse a model reply: a JSON object, or the first `{...}` span embedded in prose.
/// `options` may be a label→text map or a list of `{option_id, text}`.
/// Returns None when any of question_text, options, correct_answer is missing.
pub fn parse_model_output(raw: &str) -> Option<ParsedQuestion> {
  let value = serde_json::from_str::<Value>(raw.trim()).ok().filter(Value::is_object).or_else(|| {
    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    if end <= start {
      return None;
    }
    serde_json::from_str::<Value>(&raw[start..=end]).ok()
  })?;
  let obj = value.as_object()?;

  let question_text = obj.get("question_text")?.as_str()?.to_string();
  let correct_answer = obj.get("correct_answer")?.as_str()?.trim().to_string();
  let options = match obj.get("options")? {
    Value::Object(map) => map
      .iter()
      .map(|(k, v)| Some((k.trim().to_string(), v.as_str()?.to_string())))
      .collect::<Option<BTreeMap<_, _>>>()?,
    Value::Array(list) => list
      .iter()
      .map(|entry| {
        let id = entry.get("option_id").or_else(|| entry.get("label"))?.as_str()?;
        let text = entry.get("text")?.as_str()?;
        Some((id.trim().to_string(), text.to_string()))
      })
      .collect::<Option<BTreeMap<_, _>>>()?,
    _ => return None,
  };

  Some(ParsedQuestion { question_text, options, correct_answer })
}

/// Structural gate: non-empty text, option labels exactly A-D, correct label among them.
pub fn passes_quality_gate(q: &ParsedQuestion) -> bool {
  if q.question_text.trim().is_empty() {
    return false;
  }
  let labels_ok = q.options.len() == MCQ_LABELS.len() && MCQ_LABELS.iter().all(|l| q.options.contains_key(*l));
  labels_ok && q.options.contains_key(&q.correct_answer)
}

/// Rag/llm split for `count` items. Mix rounds half to even like the allocator does.
pub fn split_counts(count: u32, mode: GenerationMode, rag_pct: u8) -> (u32, u32) {
  match mode {
    GenerationMode::Rag => (count, 0),
    GenerationMode::Llm => (0, count),
    GenerationMode::Mix => {
      let n_rag = (f64::from(count) * f64::from(rag_pct) / 100.0).round_ties_even() as u32;
      let n_rag = n_rag.min(count);
      (n_rag, count - n_rag)
    }
  }
}

/// Resolved per-run inputs shared by every item.
struct RunContext {
  label: String,
  query_text: String,
  scope: Option<String>,
  question_set_id: Option<String>,
  topic: Option<String>,
  difficulty: Option<Difficulty>,
  min_score: Option<f32>,
}

pub struct GenerationOrchestrator {
  store: SharedStore,
  model: Arc<dyn LanguageModel>,
  retriever: Arc<dyn Retriever>,
  prompts: Prompts,
  top_k: usize,
  default_min_score: Option<f32>,
}

impl GenerationOrchestrator {
  pub fn new(
    store: SharedStore,
    model: Arc<dyn LanguageModel>,
    retriever: Arc<dyn Retriever>,
    prompts: Prompts,
    top_k: usize,
    default_min_score: Option<f32>,
  ) -> Self {
    Self { store, model, retriever, prompts, top_k, default_min_score }
  }

  pub fn model_name(&self) -> &str { self.model.name() }

  /// Run one generation request to completion.
  pub async fn generate(&self, req: &GenerationRequest) -> EngineResult<GenerationReport> {
    let (report, outcome) = self.generate_partial(req).await;
    outcome.map(|()| report)
  }

  /// Like `generate`, but the report comes back even when the run aborts, listing
  /// whatever was persisted before the failure.
  #[instrument(level = "info", skip(self, req), fields(count = req.count, mode = ?req.mode, rag_pct = req.rag_pct, model = %self.model.name()))]
  pub async fn generate_partial(&self, req: &GenerationRequest) -> (GenerationReport, EngineResult<()>) {
    let mut report = GenerationReport { requested: req.count, ..Default::default() };
    let outcome = self.run(req, &mut report).await;
    if let Err(e) = &outcome {
      warn!(target: "generation", error = %e, created = report.created.len(), "Generation aborted");
    }
    (report, outcome)
  }

  async fn run(&self, req: &GenerationRequest, report: &mut GenerationReport) -> EngineResult<()> {
    if req.rag_pct > 100 {
      return Err(EngineError::validation("rag_pct must be within 0-100"));
    }
    let ctx = self.resolve_context(req).await?;
    let (n_rag, n_llm) = split_counts(req.count, req.mode, req.rag_pct);
    debug!(target: "generation", n_rag, n_llm, label = %ctx.label, scope = ?ctx.scope, "Generation split");

    for _ in 0..n_rag {
      report.rag_attempts += 1;
      let item = self.rag_item(&ctx, report).await?;
      self.keep_or_reject(item, report).await?;
    }
    for _ in 0..n_llm {
      report.llm_attempts += 1;
      let item = self.llm_item(&ctx, json!({ "assessment_id": ctx.scope })).await?;
      self.keep_or_reject(item, report).await?;
    }

    info!(
      target: "generation",
      requested = report.requested,
      created = report.created.len(),
      fallbacks = report.fallbacks,
      rejected = report.rejected,
      "Generation finished"
    );
    if report.shortfall() > 0 {
      warn!(target: "generation", shortfall = report.shortfall(), "Fewer items created than requested");
    }
    Ok(())
  }

  async fn resolve_context(&self, req: &GenerationRequest) -> EngineResult<RunContext> {
    let assessment = match &req.assessment_id {
      Some(id) => Some(self.store.get_assessment(id).await?.ok_or_else(|| EngineError::not_found("assessment", id.clone()))?),
      None => None,
    };

    let question_set_id = req
      .question_set_id
      .clone()
      .or_else(|| assessment.as_ref().and_then(|a| a.question_set_id.clone()));
    if let Some(set_id) = &question_set_id {
      if self.store.get_question_set(set_id).await?.is_none() {
        return Err(EngineError::not_found("question set", set_id.clone()));
      }
    }

    let label = req
      .topic
      .clone()
      .or_else(|| req.assessment_id.clone())
      .unwrap_or_else(|| "general".to_string());
    let query_text = assessment
      .as_ref()
      .and_then(|a| a.context_text.clone())
      .filter(|t| !t.trim().is_empty())
      .or_else(|| req.topic.clone())
      .unwrap_or_else(|| label.clone());

    Ok(RunContext {
      label,
      query_text,
      scope: req.assessment_id.clone(),
      question_set_id,
      topic: req.topic.clone(),
      difficulty: req.difficulty,
      // Zero means "no minimum", including an explicit zero overriding the default.
      min_score: req.min_retrieval_score.or(self.default_min_score).filter(|m| *m != 0.0),
    })
  }

  /// One rag-strategy item, degrading to topic-only when retrieval is empty or weak.
  async fn rag_item(&self, ctx: &RunContext, report: &mut GenerationReport) -> EngineResult<Option<QuestionItem>> {
    let hits = match self.retriever.query(&ctx.query_text, self.top_k, ctx.scope.as_deref()).await {
      Ok(h) => h,
      Err(e) => {
        warn!(target: "generation", error = %e, "Retrieval failed; treating as no hits");
        Vec::new()
      }
    };
    let hits: Vec<RetrievedSnippet> = match &ctx.scope {
      Some(scope) => hits.into_iter().filter(|h| &h.snippet.source_id == scope).collect(),
      None => hits,
    };
    let top_score = hits.iter().filter_map(|h| h.score).fold(None, |best: Option<f32>, s| {
      Some(best.map_or(s, |b| b.max(s)))
    });
    let too_weak = ctx.min_score.is_some_and(|min| top_score.map_or(true, |s| s < min));

    if hits.is_empty() || too_weak {
      report.fallbacks += 1;
      debug!(target: "generation", hits = hits.len(), ?top_score, min_score = ?ctx.min_score, "Rag item falling back to topic-only");
      let meta = json!({ "fallback": true, "assessment_id": ctx.scope, "hits": hits.len(), "top_score": top_score });
      return self.llm_item(ctx, meta).await;
    }

    let snippets = hits
      .iter()
      .enumerate()
      .map(|(i, h)| format!("[{}] {}", i + 1, h.snippet.text.trim()))
      .collect::<Vec<_>>()
      .join("\n");
    let prompt = fill_template(
      &self.prompts.rag_user_template,
      &[
        ("label", &ctx.label),
        ("difficulty", difficulty_word(ctx.difficulty)),
        ("snippets", &snippets),
        ("context", &ctx.query_text),
      ],
    );
    let raw = self.model.complete(&prompt).await?;
    let meta = json!({
      "snippets": hits.iter().map(|h| h.snippet.reference()).collect::<Vec<_>>(),
      "assessment_id": ctx.scope,
      "top_score": top_score,
    });
    Ok(self.build_item(ctx, &raw, SourceType::Rag, meta))
  }

  async fn llm_item(&self, ctx: &RunContext, meta: Value) -> EngineResult<Option<QuestionItem>> {
    let prompt = fill_template(
      &self.prompts.llm_user_template,
      &[
        ("label", &ctx.label),
        ("difficulty", difficulty_word(ctx.difficulty)),
        ("context", &ctx.query_text),
      ],
    );
    let raw = self.model.complete(&prompt).await?;
    Ok(self.build_item(ctx, &raw, SourceType::Llm, meta))
  }

  fn build_item(&self, ctx: &RunContext, raw: &str, source_type: SourceType, source_meta: Value) -> Option<QuestionItem> {
    let Some(parsed) = parse_model_output(raw) else {
      debug!(target: "generation", raw = %trunc_for_log(raw, 200), "Model output did not parse");
      return None;
    };
    if !passes_quality_gate(&parsed) {
      debug!(target: "generation", labels = ?parsed.options.keys().collect::<Vec<_>>(), "Quality gate rejected item");
      return None;
    }
    Some(QuestionItem {
      id: Uuid::new_v4().to_string(),
      question_set_id: ctx.question_set_id.clone(),
      question_text: parsed.question_text.trim().to_string(),
      payload: QuestionPayload::Mcq(McqSpec { options: parsed.options, correct_answer: parsed.correct_answer }),
      difficulty: ctx.difficulty,
      topic: ctx.topic.clone(),
      provenance: Provenance { source_type, source_meta },
      quality_score: None,
      review_state: ReviewState::Draft,
      created_at: Utc::now(),
    })
  }

  async fn keep_or_reject(&self, item: Option<QuestionItem>, report: &mut GenerationReport) -> EngineResult<()> {
    match item {
      Some(item) => {
        self.store.insert_question(&item).await?;
        report.created.push(item.id);
      }
      None => report.rejected += 1,
    }
    Ok(())
  }
}

fn difficulty_word(d: Option<Difficulty>) -> &'static str {
  match d {
    Some(Difficulty::Easy) => "easy",
    Some(Difficulty::Medium) | None => "medium",
    Some(Difficulty::Hard) => "hard",
  }
}
