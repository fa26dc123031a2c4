//! Small utility helpers used across modules.

use serde_json::Value;

/// Very small and safe string templating.
/// Replaces occurrences of `{key}` in the template with provided values.
pub fn fill_template(tpl: &str, pairs: &[(&str, &str)]) -> String {
  let mut out = tpl.to_string();
  for (k, v) in pairs {
    let needle = format!("{{{}}}", k);
    out = out.replace(&needle, v);
  }
  out
}

/// Log-safe truncation for large strings.
/// Avoids spamming logs with huge prompts or model outputs.
pub fn trunc_for_log(s: &str, max: usize) -> String {
  match s.char_indices().nth(max) {
    None => s.to_string(),
    Some((cut, _)) => format!("{}… ({} bytes total)", &s[..cut], s.len()),
  }
}

/// Coerce an arbitrary JSON answer value to text.
/// Strings pass through, `null` becomes empty, everything else is rendered as JSON.
pub fn coerce_answer_value(v: &Value) -> String {
  match v {
    Value::String(s) => s.clone(),
    Value::Null => String::new(),
    other => other.to_string(),
  }
}

/// Trim and cap answer text at `max_chars` characters before it reaches storage.
/// The cap tracks the width of the storage column, not any grading rule.
pub fn normalize_answer_text(raw: &str, max_chars: usize) -> String {
  let trimmed = raw.trim();
  match trimmed.char_indices().nth(max_chars) {
    None => trimmed.to_string(),
    Some((cut, _)) => trimmed[..cut].to_string(),
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn fills_every_occurrence() {
    let out = fill_template("{topic} / {topic} ({n})", &[("topic", "rust"), ("n", "1")]);
    assert_eq!(out, "rust / rust (1)");
  }

  #[test]
  fn normalize_trims_and_truncates_on_char_boundary() {
    assert_eq!(normalize_answer_text("  B \n", 10), "B");
    assert_eq!(normalize_answer_text("héllo wörld", 4), "héll");
    let long = "x".repeat(10_050);
    assert_eq!(normalize_answer_text(&long, 10_000).chars().count(), 10_000);
  }

  #[test]
  fn coerces_non_string_answers() {
    assert_eq!(coerce_answer_value(&json!("A")), "A");
    assert_eq!(coerce_answer_value(&json!(42)), "42");
    assert_eq!(coerce_answer_value(&Value::Null), "");
  }

  #[test]
  fn trunc_for_log_keeps_short_strings() {
    assert_eq!(trunc_for_log("abc", 10), "abc");
    assert!(trunc_for_log("abcdefgh", 3).starts_with("abc…"));
  }
}
