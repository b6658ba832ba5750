// Fallback compute path: deterministic rule-based candidates
//
// Same inputs always give the same candidates, in the same order. Never
// touches the network, so it is the path of last resort.

use async_trait::async_trait;
use turnstile_core::domain::{Candidate, GenerationInput};
use turnstile_core::error::{AppError, Result};
use turnstile_core::port::CandidateGenerator;

const LEADING: &[&str] = &[
    "Da", "Ha", "Ji", "Min", "Seo", "Yu", "Ye", "Do", "Ga", "Su", "Eun", "Jun",
];
const TRAILING: &[&str] = &[
    "on", "in", "ah", "eun", "woo", "bin", "yun", "hee", "jin", "rin", "ho", "na",
];

/// Input keys folded into the seed, in this order
const SEED_KEYS: &[&str] = &["surname", "gender", "birthDate", "style", "seed"];

pub struct RuleBasedGenerator {
    max_candidates: usize,
}

impl RuleBasedGenerator {
    pub fn new() -> Self {
        Self {
            max_candidates: LEADING.len() * TRAILING.len(),
        }
    }

    fn seed(input: &GenerationInput) -> u64 {
        SEED_KEYS
            .iter()
            .filter_map(|key| input.inputs.get(*key))
            .fold(FNV_OFFSET, |hash, value| fnv1a(hash, value.to_string().as_bytes()))
    }
}

impl Default for RuleBasedGenerator {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CandidateGenerator for RuleBasedGenerator {
    fn name(&self) -> &str {
        "rule-based"
    }

    async fn generate(&self, input: &GenerationInput) -> Result<Vec<Candidate>> {
        if input.target_count == 0 {
            return Err(AppError::Validation("target count must be positive".to_string()));
        }
        let seed = Self::seed(input);

        // Seeded ordering over every syllable pair: stable, duplicate free
        let mut pairs: Vec<(u64, &str, &str)> = LEADING
            .iter()
            .flat_map(|lead| TRAILING.iter().map(move |trail| (*lead, *trail)))
            .map(|(lead, trail)| {
                let key = fnv1a(seed, format!("{}{}", lead, trail).as_bytes());
                (key, lead, trail)
            })
            .collect();
        pairs.sort_by_key(|(key, _, _)| *key);

        let candidates = pairs
            .into_iter()
            .take(input.target_count.min(self.max_candidates))
            .map(|(_, lead, trail)| {
                Candidate::new(format!("{}{}", lead, trail)).with_rationale(format!(
                    "Rule-based combination of '{}' and '{}'",
                    lead, trail
                ))
            })
            .collect();
        Ok(candidates)
    }
}

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

fn fnv1a(mut hash: u64, bytes: &[u8]) -> u64 {
    for byte in bytes {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}
