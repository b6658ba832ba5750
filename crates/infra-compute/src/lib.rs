// Turnstile Infrastructure - Compute Adapters
// Implements: CandidateGenerator (HTTP primary, rule-based fallback), CandidateEvaluator

mod evaluator;
mod http_generator;
mod rule_generator;

pub use evaluator::HeuristicEvaluator;
pub use http_generator::{map_reqwest_error, HttpCandidateGenerator};
pub use rule_generator::RuleBasedGenerator;
