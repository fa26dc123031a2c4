//! Turning fractions into exact question counts.
//!
//! Every bucket but the last gets `round(total * fraction)` (ties to even) capped at
//! what is left; the last bucket takes the remainder, so counts always sum to `total`.

use serde::Serialize;

use crate::domain::{AssessmentConfig, Difficulty, DifficultyDistribution, QuestionType, TypeMix};
use crate::error::{EngineError, EngineResult};
use crate::experience::{effective_policy, EffectivePolicy};

#[derive(Clone, Copy, Debug, Serialize, PartialEq, Eq, Default)]
pub struct DifficultyCounts {
    pub easy: u32,
    pub medium: u32,
    pub hard: u32,
}

impl DifficultyCounts {
    pub fn total(&self) -> u32 {
        self.easy + self.medium + self.hard
    }

    pub fn get(&self, d: Difficulty) -> u32 {
        match d {
            Difficulty::Easy => self.easy,
            Difficulty::Medium => self.medium,
            Difficulty::Hard => self.hard,
        }
    }
}

#[derive(Clone, Copy, Debug, Serialize, PartialEq, Eq, Default)]
pub struct TypeCounts {
    pub mcq: u32,
    pub coding: u32,
    pub architecture: u32,
}

impl TypeCounts {
    pub fn total(&self) -> u32 {
        self.mcq + self.coding + self.architecture
    }
}

fn allocate_with_remainder(total: u32, fractions: &[f64]) -> Vec<u32> {
    let mut out = Vec::with_capacity(fractions.len());
    let mut remaining = total;
    for (i, fraction) in fractions.iter().enumerate() {
        if i + 1 == fractions.len() {
            out.push(remaining);
            break;
        }
        let wanted = (f64::from(total) * fraction).round_ties_even().max(0.0);
        // Over-allocation by earlier buckets must never drive the remainder negative.
        let count = (wanted as u32).min(remaining);
        remaining -= count;
        out.push(count);
    }
    out
}

/// Exact per-difficulty counts for `total` questions.
pub fn allocate_by_difficulty(total: u32, distribution: &DifficultyDistribution) -> DifficultyCounts {
    let fractions: Vec<f64> = Difficulty::ALL.iter().map(|d| distribution.get(*d)).collect();
    let counts = allocate_with_remainder(total, &fractions);
    DifficultyCounts {
        easy: counts[0],
        medium: counts[1],
        hard: counts[2],
    }
}

/// Exact per-type counts for `total` questions (mcq, coding, architecture order).
pub fn allocate_by_type(total: u32, mix: &TypeMix) -> TypeCounts {
    let fractions: Vec<f64> = QuestionType::ALL.iter().map(|t| mix.get(*t)).collect();
    let counts = allocate_with_remainder(total, &fractions);
    TypeCounts {
        mcq: counts[0],
        coding: counts[1],
        architecture: counts[2],
    }
}

/// Even split across skills in the order given; the first `total % n` skills get one extra.
pub fn allocate_by_skill(total: u32, skills: &[String]) -> EngineResult<Vec<(String, u32)>> {
    if skills.is_empty() {
        return Err(EngineError::validation("at least one skill is required to allocate questions"));
    }
    let n = skills.len() as u32;
    let base = total / n;
    let remainder = total % n;
    Ok(skills
        .iter()
        .enumerate()
        .map(|(i, skill)| {
            let extra = u32::from((i as u32) < remainder);
            (skill.clone(), base + extra)
        })
        .collect())
}

/// How many questions of each difficulty and type one attempt should get.
#[derive(Clone, Debug, Serialize)]
pub struct AssessmentPlan {
    pub total_questions: u32,
    pub policy: EffectivePolicy,
    pub by_difficulty: DifficultyCounts,
    pub by_type: TypeCounts,
}

pub fn plan_assessment(config: &AssessmentConfig, experience: Option<&str>) -> AssessmentPlan {
    let policy = effective_policy(config, experience);
    let by_difficulty = allocate_by_difficulty(config.total_questions, &policy.distribution);
    let by_type = allocate_by_type(config.total_questions, &config.question_type_mix);
    AssessmentPlan {
        total_questions: config.total_questions,
        policy,
        by_difficulty,
        by_type,
    }
}
