// Pipeline stages and their progress weights

/// Ordered stages of a run; weights sum to 100
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Prepare,
    Generate,
    Evaluate,
    Rank,
    Finalize,
}

impl Stage {
    pub const ALL: [Stage; 5] = [
        Stage::Prepare,
        Stage::Generate,
        Stage::Evaluate,
        Stage::Rank,
        Stage::Finalize,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Stage::Prepare => "prepare",
            Stage::Generate => "generate",
            Stage::Evaluate => "evaluate",
            Stage::Rank => "rank",
            Stage::Finalize => "finalize",
        }
    }

    /// Share of total progress (percent)
    pub fn weight(&self) -> u8 {
        match self {
            Stage::Prepare => 10,
            Stage::Generate => 45,
            Stage::Evaluate => 30,
            Stage::Rank => 10,
            Stage::Finalize => 5,
        }
    }

    /// Client-facing progress message
    pub fn message(&self) -> &'static str {
        match self {
            Stage::Prepare => "Analyzing request inputs",
            Stage::Generate => "Generating candidates",
            Stage::Evaluate => "Evaluating candidates",
            Stage::Rank => "Ranking results",
            Stage::Finalize => "Finalizing results",
        }
    }
}
