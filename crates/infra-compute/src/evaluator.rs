// Stand-in candidate scoring
//
// Domain scoring formulas are deployment-specific; this evaluator scores
// surface properties only so that ranking is meaningful out of the box.

use turnstile_core::domain::{Candidate, ScoreBreakdown};
use turnstile_core::error::{AppError, Result};
use turnstile_core::port::CandidateEvaluator;

const IDEAL_LENGTH: f64 = 5.0;

/// Weighted mix of length, letter variety and vowel balance, each in 0..=1
pub struct HeuristicEvaluator {
    length_weight: f64,
    variety_weight: f64,
    balance_weight: f64,
}

impl HeuristicEvaluator {
    pub fn new() -> Self {
        Self {
            length_weight: 0.4,
            variety_weight: 0.3,
            balance_weight: 0.3,
        }
    }
}

impl Default for HeuristicEvaluator {
    fn default() -> Self {
        Self::new()
    }
}

impl CandidateEvaluator for HeuristicEvaluator {
    fn evaluate(&self, candidate: &Candidate) -> Result<ScoreBreakdown> {
        let letters: Vec<char> = candidate
            .value
            .chars()
            .filter(|c| c.is_alphabetic())
            .flat_map(char::to_lowercase)
            .collect();
        if letters.is_empty() {
            return Err(AppError::Validation(format!(
                "Candidate '{}' has no letters to score",
                candidate.value
            )));
        }

        let count = letters.len() as f64;
        let length = (1.0 - (count - IDEAL_LENGTH).abs() / IDEAL_LENGTH).max(0.0);

        let mut distinct = letters.clone();
        distinct.sort_unstable();
        distinct.dedup();
        let variety = distinct.len() as f64 / count;

        let vowels = letters.iter().filter(|c| "aeiou".contains(**c)).count() as f64;
        let balance = 1.0 - ((vowels / count) - 0.5).abs() * 2.0;

        let overall = self.length_weight * length
            + self.variety_weight * variety
            + self.balance_weight * balance;

        Ok(ScoreBreakdown::new(round3(overall))
            .with_component("length", round3(length))
            .with_component("variety", round3(variety))
            .with_component("balance", round3(balance)))
    }
}

fn round3(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}
