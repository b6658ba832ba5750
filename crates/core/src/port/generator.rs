// Compute Ports: candidate generation and evaluation
//
// The domain scoring formulas live behind these traits; the pipeline only
// sequences them.

use crate::domain::{Candidate, GenerationInput, ScoreBreakdown};
use crate::error::Result;
use async_trait::async_trait;

/// Produces candidates for a job (primary path may fail, fallback should not)
#[async_trait]
pub trait CandidateGenerator: Send + Sync {
    /// Short label used in logs
    fn name(&self) -> &str;

    async fn generate(&self, input: &GenerationInput) -> Result<Vec<Candidate>>;
}

/// Scores a single candidate (pure)
pub trait CandidateEvaluator: Send + Sync {
    fn evaluate(&self, candidate: &Candidate) -> Result<ScoreBreakdown>;
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use crate::error::AppError;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Scripted generator behavior
    #[derive(Debug, Clone)]
    pub enum GeneratorBehavior {
        /// Return these candidate values
        Success(Vec<String>),
        /// Fail with message
        Fail(String),
        /// Panic with message (for panic isolation testing)
        Panic(String),
        /// Sleep, then return these values
        Delay(Duration, Vec<String>),
    }

    pub struct ScriptedGenerator {
        name: String,
        behavior: GeneratorBehavior,
        calls: AtomicUsize,
    }

    impl ScriptedGenerator {
        pub fn new(name: impl Into<String>, behavior: GeneratorBehavior) -> Self {
            Self {
                name: name.into(),
                behavior,
                calls: AtomicUsize::new(0),
            }
        }

        pub fn returning(name: impl Into<String>, values: &[&str]) -> Self {
            Self::new(
                name,
                GeneratorBehavior::Success(values.iter().map(|v| v.to_string()).collect()),
            )
        }

        pub fn failing(name: impl Into<String>, message: impl Into<String>) -> Self {
            Self::new(name, GeneratorBehavior::Fail(message.into()))
        }

        pub fn panicking(name: impl Into<String>, message: impl Into<String>) -> Self {
            Self::new(name, GeneratorBehavior::Panic(message.into()))
        }

        pub fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl CandidateGenerator for ScriptedGenerator {
        fn name(&self) -> &str {
            &self.name
        }

        async fn generate(&self, _input: &GenerationInput) -> Result<Vec<Candidate>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let values = match &self.behavior {
                GeneratorBehavior::Success(values) => values.clone(),
                GeneratorBehavior::Fail(msg) => return Err(AppError::Compute(msg.clone())),
                GeneratorBehavior::Panic(msg) => panic!("{}", msg),
                GeneratorBehavior::Delay(delay, values) => {
                    tokio::time::sleep(*delay).await;
                    values.clone()
                }
            };
            Ok(values.into_iter().map(Candidate::new).collect())
        }
    }

    /// Evaluator with fixed per-value scores
    pub struct MockEvaluator {
        scores: HashMap<String, f64>,
        default_score: f64,
        failing_value: Option<String>,
    }

    impl MockEvaluator {
        pub fn new(default_score: f64) -> Self {
            Self {
                scores: HashMap::new(),
                default_score,
                failing_value: None,
            }
        }

        pub fn with_score(mut self, value: impl Into<String>, score: f64) -> Self {
            self.scores.insert(value.into(), score);
            self
        }

        /// Evaluation of `value` returns an error
        pub fn failing_on(mut self, value: impl Into<String>) -> Self {
            self.failing_value = Some(value.into());
            self
        }
    }

    impl CandidateEvaluator for MockEvaluator {
        fn evaluate(&self, candidate: &Candidate) -> Result<ScoreBreakdown> {
            if self.failing_value.as_deref() == Some(candidate.value.as_str()) {
                return Err(AppError::Compute(format!(
                    "cannot evaluate {}",
                    candidate.value
                )));
            }
            let score = self
                .scores
                .get(&candidate.value)
                .copied()
                .unwrap_or(self.default_score);
            Ok(ScoreBreakdown::new(score))
        }
    }
}
