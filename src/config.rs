//! Engine configuration: prompts, generation, release and answer settings from TOML,
//! with a handful of environment overrides on top.
//!
//! See `EngineConfig` for the expected schema. Every section is optional.

use serde::Deserialize;
use tracing::{error, info, warn};

use crate::domain::ReleasePolicy;

#[derive(Clone, Debug, Deserialize, Default)]
pub struct EngineConfig {
  #[serde(default)]
  pub prompts: Prompts,
  #[serde(default)]
  pub generation: GenerationSettings,
  #[serde(default)]
  pub release: ReleaseSettings,
  #[serde(default)]
  pub answers: AnswerSettings,
}

/// Prompts sent to the generation collaborator.
/// Placeholders: {label}, {difficulty}, {context}, {snippets}.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Prompts {
  pub system: String,
  // Topic-only generation (also used for per-item rag fallback)
  pub llm_user_template: String,
  // Grounded generation
  pub rag_user_template: String,
}

impl Default for Prompts {
  fn default() -> Self {
    Self {
      system: "You write technical assessment questions for hiring. Respond ONLY with strict JSON.".into(),
      llm_user_template: "Write one multiple-choice question about '{label}' at {difficulty} difficulty.\nContext: {context}\nReturn JSON with fields: question_text (string), options (object with keys A, B, C, D), correct_answer (one of A, B, C, D).".into(),
      rag_user_template: "Write one multiple-choice question about '{label}' at {difficulty} difficulty, grounded ONLY in the snippets below. The correct answer must be supported by them.\nSnippets:\n{snippets}\nReturn JSON with fields: question_text (string), options (object with keys A, B, C, D), correct_answer (one of A, B, C, D).".into(),
    }
  }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct GenerationSettings {
  pub top_k: usize,
  /// Applied when a request does not carry its own minimum.
  pub default_min_retrieval_score: Option<f32>,
}

impl Default for GenerationSettings {
  fn default() -> Self {
    Self { top_k: 5, default_min_retrieval_score: None }
  }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct ReleaseSettings {
  pub policy: ReleasePolicy,
  pub delay_secs: u64,
}

impl Default for ReleaseSettings {
  fn default() -> Self {
    Self { policy: ReleasePolicy::Immediate, delay_secs: 86_400 }
  }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct AnswerSettings {
  /// Stored answers are truncated to this many characters.
  pub max_len: usize,
}

impl Default for AnswerSettings {
  fn default() -> Self {
    Self { max_len: 10_000 }
  }
}

impl EngineConfig {
  /// TOML from ENGINE_CONFIG_PATH (defaults if unset or broken), then env overrides.
  pub fn from_env() -> Self {
    let mut cfg = load_engine_config_from_env().unwrap_or_default();
    cfg.apply_overrides(|key| std::env::var(key).ok());
    cfg
  }

  /// Apply SCORE_RELEASE_POLICY, SCORE_RELEASE_DELAY_SECS and RETRIEVAL_TOP_K.
  /// Unparseable values are logged and ignored.
  pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(raw) = lookup("SCORE_RELEASE_POLICY") {
      match raw.trim().to_ascii_lowercase().as_str() {
        "immediate" => self.release.policy = ReleasePolicy::Immediate,
        "delayed" => self.release.policy = ReleasePolicy::Delayed,
        other => warn!(target: "skillcheck", value = %other, "Ignoring unknown SCORE_RELEASE_POLICY"),
      }
    }
    if let Some(raw) = lookup("SCORE_RELEASE_DELAY_SECS") {
      match raw.trim().parse::<u64>() {
        Ok(secs) => self.release.delay_secs = secs,
        Err(e) => warn!(target: "skillcheck", value = %raw, error = %e, "Ignoring invalid SCORE_RELEASE_DELAY_SECS"),
      }
    }
    if let Some(raw) = lookup("RETRIEVAL_TOP_K") {
      match raw.trim().parse::<usize>() {
        Ok(k) if k > 0 => self.generation.top_k = k,
        _ => warn!(target: "skillcheck", value = %raw, "Ignoring invalid RETRIEVAL_TOP_K"),
      }
    }
  }
}

/// Attempt to load `EngineConfig` from ENGINE_CONFIG_PATH. On any parsing/IO error, returns None.
pub fn load_engine_config_from_env() -> Option<EngineConfig> {
  let path = std::env::var("ENGINE_CONFIG_PATH").ok()?;
  match std::fs::read_to_string(&path) {
    Ok(s) => match toml::from_str::<EngineConfig>(&s) {
      Ok(cfg) => {
        info!(target: "skillcheck", %path, "Loaded engine config (TOML)");
        Some(cfg)
      }
      Err(e) => {
        error!(target: "skillcheck", %path, error = %e, "Failed to parse TOML config");
        None
      }
    },
    Err(e) => {
      error!(target: "skillcheck", %path, error = %e, "Failed to read TOML config file");
      None
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::collections::HashMap;

  #[test]
  fn partial_toml_keeps_defaults_elsewhere() {
    let cfg: EngineConfig = toml::from_str(
      r#"
        [release]
        policy = "delayed"

        [prompts]
        system = "Be terse."
      "#,
    )
    .unwrap();
    assert_eq!(cfg.release.policy, ReleasePolicy::Delayed);
    assert_eq!(cfg.release.delay_secs, 86_400);
    assert_eq!(cfg.prompts.system, "Be terse.");
    assert!(cfg.prompts.rag_user_template.contains("{snippets}"));
    assert_eq!(cfg.generation.top_k, 5);
    assert_eq!(cfg.answers.max_len, 10_000);
  }

  #[test]
  fn env_overrides_win_and_bad_values_are_ignored() {
    let env: HashMap<&str, &str> = HashMap::from([
      ("SCORE_RELEASE_POLICY", "Delayed"),
      ("SCORE_RELEASE_DELAY_SECS", "90"),
      ("RETRIEVAL_TOP_K", "zero"),
    ]);
    let mut cfg = EngineConfig::default();
    cfg.apply_overrides(|k| env.get(k).map(|v| v.to_string()));
    assert_eq!(cfg.release.policy, ReleasePolicy::Delayed);
    assert_eq!(cfg.release.delay_secs, 90);
    assert_eq!(cfg.generation.top_k, 5);
  }
}
