// Pipeline Domain Model

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::domain::error::{DomainError, ErrorCode, Result};
use crate::domain::job::{OwnerId, RequestId};

/// Input handed to a candidate generator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationInput {
    pub request_id: RequestId,
    pub inputs: serde_json::Map<String, serde_json::Value>,
    /// How many candidates the generator should aim for
    pub target_count: usize,
}

/// A single generated result, before scoring
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rationale: Option<String>,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub attributes: serde_json::Value,
}

impl Candidate {
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            rationale: None,
            attributes: serde_json::Value::Null,
        }
    }

    pub fn with_rationale(mut self, rationale: impl Into<String>) -> Self {
        self.rationale = Some(rationale.into());
        self
    }
}

/// Evaluation output for one candidate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    pub overall: f64,
    #[serde(default)]
    pub components: BTreeMap<String, f64>,
}

impl ScoreBreakdown {
    pub fn new(overall: f64) -> Self {
        Self {
            overall,
            components: BTreeMap::new(),
        }
    }

    pub fn with_component(mut self, name: impl Into<String>, score: f64) -> Self {
        self.components.insert(name.into(), score);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoredCandidate {
    #[serde(flatten)]
    pub candidate: Candidate,
    pub score: ScoreBreakdown,
    /// Position in generation order (tie-breaker when ranking)
    pub generation_index: usize,
}

/// Final product of a successful run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobResult {
    pub request_id: RequestId,
    pub owner_id: OwnerId,
    pub results: Vec<ScoredCandidate>,
    pub total_generated: usize,
    pub processing_time_ms: u64,
    pub used_fallback: bool,
    pub completed_at: i64, // epoch ms
}

/// Pipeline run state machine
///
/// `Starting -> Processing(1..N) -> {Completed | Error | Cancelled}`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Starting,
    Processing { stage: usize },
    Completed,
    Error,
    Cancelled,
}

impl RunState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunState::Completed | RunState::Error | RunState::Cancelled)
    }
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunState::Starting => write!(f, "STARTING"),
            RunState::Processing { stage } => write!(f, "PROCESSING({})", stage),
            RunState::Completed => write!(f, "COMPLETED"),
            RunState::Error => write!(f, "ERROR"),
            RunState::Cancelled => write!(f, "CANCELLED"),
        }
    }
}

/// Ephemeral state of one pipeline execution
#[derive(Debug)]
pub struct PipelineRun {
    pub request_id: RequestId,
    state: RunState,
    progress: u8,
    pub input: Option<GenerationInput>,
    pub candidates: Vec<Candidate>,
    pub scored: Vec<ScoredCandidate>,
    pub used_fallback: bool,
}

impl PipelineRun {
    pub fn new(request_id: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            state: RunState::Starting,
            progress: 0,
            input: None,
            candidates: Vec::new(),
            scored: Vec::new(),
            used_fallback: false,
        }
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    /// Cumulative progress percentage of completed stages
    pub fn progress(&self) -> u8 {
        self.progress
    }

    /// Enter stage `index` (1-based, strictly increasing)
    pub fn enter_stage(&mut self, index: usize) -> Result<()> {
        let allowed = match self.state {
            RunState::Starting => index == 1,
            RunState::Processing { stage } => index == stage + 1,
            _ => false,
        };
        if !allowed {
            return Err(DomainError::InvalidStateTransition {
                from: self.state.to_string(),
                to: RunState::Processing { stage: index }.to_string(),
            });
        }
        self.state = RunState::Processing { stage: index };
        Ok(())
    }

    pub fn complete_stage(&mut self, weight: u8) {
        self.progress = self.progress.saturating_add(weight).min(100);
    }

    /// Move to a terminal state; fires at most once per run
    pub fn finish(&mut self, terminal: RunState) -> Result<()> {
        if self.state.is_terminal() || !terminal.is_terminal() {
            return Err(DomainError::InvalidStateTransition {
                from: self.state.to_string(),
                to: terminal.to_string(),
            });
        }
        self.state = terminal;
        Ok(())
    }
}

/// How a run ended
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    Completed(JobResult),
    Failed { code: ErrorCode, error: String },
    Cancelled,
}

impl RunOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            RunOutcome::Completed(_) => "completed",
            RunOutcome::Failed { .. } => "failed",
            RunOutcome::Cancelled => "cancelled",
        }
    }
}
