//! Experience bands: candidate experience → difficulty distribution, passing threshold, label.
//!
//! Everything here is a pure function of the parsed years. When an assessment has
//! `auto_adjust_by_experience = false` the admin-configured values are used verbatim
//! and the bands are never consulted.

use serde::Serialize;

use crate::domain::{AssessmentConfig, DifficultyDistribution};

/// Years assumed when the descriptor cannot be parsed (mid-level).
pub const DEFAULT_EXPERIENCE_YEARS: u32 = 5;

#[derive(Clone, Copy, Debug)]
pub struct ExperienceBand {
  pub min_years: u32,
  pub max_years: u32,
  pub distribution: DifficultyDistribution,
  pub passing_threshold: u8,
  pub label: &'static str,
}

/// Evaluated in order, first match wins. Years beyond the last band fall into it.
pub const EXPERIENCE_BANDS: [ExperienceBand; 4] = [
  ExperienceBand { min_years: 0, max_years: 3, distribution: DifficultyDistribution::new(1.0, 0.0, 0.0), passing_threshold: 60, label: "junior" },
  ExperienceBand { min_years: 4, max_years: 6, distribution: DifficultyDistribution::new(0.2, 0.7, 0.1), passing_threshold: 70, label: "mid-level" },
  ExperienceBand { min_years: 7, max_years: 11, distribution: DifficultyDistribution::new(0.0, 0.5, 0.5), passing_threshold: 75, label: "senior" },
  ExperienceBand { min_years: 12, max_years: 50, distribution: DifficultyDistribution::new(0.0, 0.3, 0.7), passing_threshold: 80, label: "expert" },
];

/// Parse a free-text descriptor such as "5 years", "7-11" or "12+" into whole years.
///
/// Never fails: anything unparseable yields [`DEFAULT_EXPERIENCE_YEARS`].
pub fn parse_experience(descriptor: &str) -> u32 {
  try_parse_experience(descriptor).unwrap_or(DEFAULT_EXPERIENCE_YEARS)
}

fn try_parse_experience(descriptor: &str) -> Option<u32> {
  let lowered = descriptor.to_lowercase();
  let clean = lowered.replace("years", "").replace("year", "");
  let clean = clean.trim();

  if clean.contains('+') {
    return clean.replace('+', "").trim().parse().ok();
  }
  if let Some((lo, hi)) = clean.split_once('-') {
    let lo: u32 = lo.trim().parse().ok()?;
    let hi: u32 = hi.trim().parse().ok()?;
    return lo.checked_add(hi).map(|sum| sum / 2);
  }
  clean.parse().ok()
}

/// Band for `years`; the catch-all is the last defined band.
pub fn band_for_years(years: u32) -> &'static ExperienceBand {
  EXPERIENCE_BANDS
    .iter()
    .find(|b| b.min_years <= years && years <= b.max_years)
    .unwrap_or(&EXPERIENCE_BANDS[EXPERIENCE_BANDS.len() - 1])
}

/// What the bands say for one candidate.
#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct ExperiencePolicy {
  pub years: u32,
  pub label: &'static str,
  pub distribution: DifficultyDistribution,
  pub passing_threshold: u8,
}

pub fn policy_for_years(years: u32) -> ExperiencePolicy {
  let band = band_for_years(years);
  ExperiencePolicy {
    years,
    label: band.label,
    distribution: band.distribution,
    passing_threshold: band.passing_threshold,
  }
}

pub fn policy_for_descriptor(descriptor: &str) -> ExperiencePolicy {
  policy_for_years(parse_experience(descriptor))
}

/// Distribution and threshold actually applied to a candidate's attempt.
#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct EffectivePolicy {
  pub distribution: DifficultyDistribution,
  pub passing_threshold: u8,
  /// Present only when the experience bands were applied.
  pub experience: Option<ExperiencePolicy>,
}

/// Bands when the assessment auto-adjusts and an experience descriptor is known,
/// otherwise the admin configuration as-is.
pub fn effective_policy(config: &AssessmentConfig, experience: Option<&str>) -> EffectivePolicy {
  match experience {
    Some(descriptor) if config.auto_adjust_by_experience => {
      let p = policy_for_descriptor(descriptor);
      EffectivePolicy { distribution: p.distribution, passing_threshold: p.passing_threshold, experience: Some(p) }
    }
    _ => EffectivePolicy {
      distribution: config.difficulty_distribution,
      passing_threshold: config.passing_score_threshold,
      experience: None,
    },
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::domain::{GenerationPolicy, TypeMix};
  use chrono::Utc;

  fn config(auto_adjust: bool) -> AssessmentConfig {
    AssessmentConfig {
      assessment_id: "a1".into(),
      title: "Backend".into(),
      question_set_id: None,
      context_text: None,
      total_questions: 10,
      question_type_mix: TypeMix::default(),
      difficulty_distribution: DifficultyDistribution::new(0.2, 0.5, 0.3),
      passing_score_threshold: 65,
      auto_adjust_by_experience: auto_adjust,
      generation_policy: GenerationPolicy::default(),
      created_at: Utc::now(),
      updated_at: Utc::now(),
    }
  }

  #[test]
  fn parses_descriptor_forms() {
    assert_eq!(parse_experience("5 years"), 5);
    assert_eq!(parse_experience("5"), 5);
    assert_eq!(parse_experience("5-7"), 6);
    assert_eq!(parse_experience("7-11"), 9);
    assert_eq!(parse_experience("12+ years"), 12);
    assert_eq!(parse_experience("1 Year"), 1);
  }

  #[test]
  fn unparseable_descriptor_defaults_to_mid_level() {
    assert_eq!(parse_experience("garbage"), 5);
    assert_eq!(parse_experience(""), 5);
    assert_eq!(parse_experience("3-"), 5);
    assert_eq!(parse_experience("-4"), 5);
  }

  #[test]
  fn junior_band() {
    let p = policy_for_years(2);
    assert_eq!(p.label, "junior");
    assert_eq!(p.passing_threshold, 60);
    assert_eq!(p.distribution, DifficultyDistribution::new(1.0, 0.0, 0.0));
  }

  #[test]
  fn band_edges_are_inclusive() {
    assert_eq!(policy_for_years(3).label, "junior");
    assert_eq!(policy_for_years(4).label, "mid-level");
    assert_eq!(policy_for_years(6).label, "mid-level");
    assert_eq!(policy_for_years(7).label, "senior");
    assert_eq!(policy_for_years(11).label, "senior");
    assert_eq!(policy_for_years(12).label, "expert");
  }

  #[test]
  fn years_beyond_last_band_fall_into_expert() {
    let p = policy_for_years(70);
    assert_eq!(p.label, "expert");
    assert_eq!(p.passing_threshold, 80);
  }

  #[test]
  fn every_band_distribution_sums_to_one() {
    for years in 0..=80 {
      let sum = policy_for_years(years).distribution.sum();
      assert!((sum - 1.0).abs() <= 0.01, "years={years} sum={sum}");
    }
  }

  #[test]
  fn effective_policy_respects_auto_adjust_flag() {
    let fixed = effective_policy(&config(false), Some("12+"));
    assert_eq!(fixed.passing_threshold, 65);
    assert!(fixed.experience.is_none());

    let adjusted = effective_policy(&config(true), Some("12+"));
    assert_eq!(adjusted.passing_threshold, 80);
    assert_eq!(adjusted.experience.as_ref().map(|e| e.label), Some("expert"));

    let unknown = effective_policy(&config(true), None);
    assert_eq!(unknown.passing_threshold, 65);
  }
}
