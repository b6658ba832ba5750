// Job Pipeline - stage-sequenced, cancellable execution of one job
//
// prepare -> generate (primary, else fallback) -> evaluate -> rank -> finalize
// The cancel flag is checked before every stage. No queue lock is held here.

pub mod cancellation;
pub mod stages;

pub use cancellation::{CancelFlag, CancellationRegistry};
pub use stages::Stage;

use crate::application::worker::constants::{
    DEFAULT_CANDIDATE_TARGET, DEFAULT_PRIMARY_TIMEOUT, RESULT_LIMIT,
};
use crate::domain::{
    Candidate, ErrorCode, GenerationInput, JobRequest, JobResult, OutboundEvent, PipelineRun,
    RunOutcome, RunState, ScoredCandidate,
};
use crate::error::{AppError, Result};
use crate::port::{
    CandidateEvaluator, CandidateGenerator, EventSink, ResultRepository, TimeProvider,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{error, info, warn};

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Primary generation is abandoned after this long
    pub primary_timeout: Duration,
    /// Ranked results kept
    pub result_limit: usize,
    /// Candidates requested from the generators
    pub candidate_target: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            primary_timeout: DEFAULT_PRIMARY_TIMEOUT,
            result_limit: RESULT_LIMIT,
            candidate_target: DEFAULT_CANDIDATE_TARGET,
        }
    }
}

pub struct JobPipeline {
    /// None when no primary endpoint is configured (fallback only)
    primary: Option<Arc<dyn CandidateGenerator>>,
    fallback: Arc<dyn CandidateGenerator>,
    evaluator: Arc<dyn CandidateEvaluator>,
    results: Arc<dyn ResultRepository>,
    time_provider: Arc<dyn TimeProvider>,
    config: PipelineConfig,
}

/// Why a run stopped early
enum Interrupt {
    Cancelled,
    Failed(&'static str, AppError),
}

impl JobPipeline {
    pub fn new(
        primary: Option<Arc<dyn CandidateGenerator>>,
        fallback: Arc<dyn CandidateGenerator>,
        evaluator: Arc<dyn CandidateEvaluator>,
        results: Arc<dyn ResultRepository>,
        time_provider: Arc<dyn TimeProvider>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            primary,
            fallback,
            evaluator,
            results,
            time_provider,
            config,
        }
    }

    /// Execute `job`, pushing progress and exactly one terminal event to `sink`
    pub async fn run(
        &self,
        job: &JobRequest,
        cancel: &CancelFlag,
        sink: &dyn EventSink,
    ) -> RunOutcome {
        let started = Instant::now();
        let mut run = PipelineRun::new(&job.request_id);

        info!(request_id = %job.request_id, "Pipeline run started");
        sink.emit(OutboundEvent::JobProgress {
            request_id: job.request_id.clone(),
            step: 0,
            total_steps: Stage::ALL.len(),
            name: "starting".to_string(),
            progress: 0,
            message: "Starting job".to_string(),
            estimated_time_remaining: job.estimated_processing_time_secs,
        });

        match self.run_stages(job, &mut run, cancel, sink, started).await {
            Ok(()) => self.finish_completed(job, &mut run, sink, started),
            Err(Interrupt::Cancelled) => {
                let at = run.state();
                Self::finish(&mut run, RunState::Cancelled);
                info!(request_id = %job.request_id, at = %at, "Pipeline run cancelled");
                sink.emit(OutboundEvent::JobCancelled {
                    request_id: job.request_id.clone(),
                });
                RunOutcome::Cancelled
            }
            Err(Interrupt::Failed(message, cause)) => {
                Self::finish(&mut run, RunState::Error);
                error!(request_id = %job.request_id, error = %cause, "Pipeline run failed");
                sink.emit(OutboundEvent::JobError {
                    request_id: job.request_id.clone(),
                    error: message.to_string(),
                    code: ErrorCode::PipelineFailed,
                });
                RunOutcome::Failed {
                    code: ErrorCode::PipelineFailed,
                    error: message.to_string(),
                }
            }
        }
    }

    async fn run_stages(
        &self,
        job: &JobRequest,
        run: &mut PipelineRun,
        cancel: &CancelFlag,
        sink: &dyn EventSink,
        started: Instant,
    ) -> std::result::Result<(), Interrupt> {
        for (index, stage) in Stage::ALL.iter().enumerate() {
            if cancel.is_cancelled() {
                return Err(Interrupt::Cancelled);
            }
            run.enter_stage(index + 1)
                .map_err(|e| Interrupt::Failed("Job failed", e.into()))?;

            sink.emit(OutboundEvent::JobProgress {
                request_id: job.request_id.clone(),
                step: index + 1,
                total_steps: Stage::ALL.len(),
                name: stage.name().to_string(),
                progress: run.progress(),
                message: stage.message().to_string(),
                estimated_time_remaining: estimate_remaining(job, run.progress(), started),
            });

            self.execute_stage(*stage, job, run).await?;
            run.complete_stage(stage.weight());
        }
        Ok(())
    }

    async fn execute_stage(
        &self,
        stage: Stage,
        job: &JobRequest,
        run: &mut PipelineRun,
    ) -> std::result::Result<(), Interrupt> {
        match stage {
            Stage::Prepare => {
                run.input = Some(self.prepare(job));
            }
            Stage::Generate => {
                let input = run.input.as_ref().ok_or_else(|| {
                    Interrupt::Failed(
                        "Job failed",
                        AppError::Internal("generation input missing".to_string()),
                    )
                })?;
                let (candidates, used_fallback) = self
                    .generate(input)
                    .await
                    .map_err(|e| Interrupt::Failed("Candidate generation failed", e))?;
                run.candidates = candidates;
                run.used_fallback = used_fallback;
            }
            Stage::Evaluate => {
                run.scored = self
                    .evaluate(&run.candidates)
                    .map_err(|e| Interrupt::Failed("Candidate evaluation failed", e))?;
            }
            Stage::Rank => {
                rank(&mut run.scored, self.config.result_limit);
            }
            Stage::Finalize => {}
        }
        Ok(())
    }

    fn prepare(&self, job: &JobRequest) -> GenerationInput {
        let inputs = match job.metadata.as_value() {
            serde_json::Value::Object(map) => map.clone(),
            other => {
                let mut map = serde_json::Map::new();
                map.insert("value".to_string(), other.clone());
                map
            }
        };
        GenerationInput {
            request_id: job.request_id.clone(),
            inputs,
            target_count: self.config.candidate_target,
        }
    }

    /// Primary path in its own task (errors, panics and timeouts all fall back)
    async fn generate(&self, input: &GenerationInput) -> Result<(Vec<Candidate>, bool)> {
        if let Some(primary) = &self.primary {
            let generator = Arc::clone(primary);
            let owned = input.clone();
            let mut handle = tokio::spawn(async move { generator.generate(&owned).await });

            match tokio::time::timeout(self.config.primary_timeout, &mut handle).await {
                Ok(Ok(Ok(candidates))) if !candidates.is_empty() => {
                    return Ok((candidates, false));
                }
                Ok(Ok(Ok(_))) => {
                    warn!(
                        request_id = %input.request_id,
                        generator = primary.name(),
                        "Primary generator returned no candidates, using fallback"
                    );
                }
                Ok(Ok(Err(e))) => {
                    warn!(
                        request_id = %input.request_id,
                        generator = primary.name(),
                        error = %e,
                        "Primary generator failed, using fallback"
                    );
                }
                Ok(Err(join_err)) => {
                    warn!(
                        request_id = %input.request_id,
                        generator = primary.name(),
                        error = %join_err,
                        "Primary generator panicked, using fallback"
                    );
                }
                Err(_) => {
                    handle.abort();
                    warn!(
                        request_id = %input.request_id,
                        generator = primary.name(),
                        timeout_secs = self.config.primary_timeout.as_secs(),
                        "Primary generator timed out, using fallback"
                    );
                }
            }
        }

        let candidates = self.fallback.generate(input).await?;
        if candidates.is_empty() {
            return Err(AppError::Compute(format!(
                "{} produced no candidates",
                self.fallback.name()
            )));
        }
        Ok((candidates, true))
    }

    fn evaluate(&self, candidates: &[Candidate]) -> Result<Vec<ScoredCandidate>> {
        candidates
            .iter()
            .enumerate()
            .map(|(generation_index, candidate)| {
                Ok(ScoredCandidate {
                    score: self.evaluator.evaluate(candidate)?,
                    candidate: candidate.clone(),
                    generation_index,
                })
            })
            .collect()
    }

    fn finish_completed(
        &self,
        job: &JobRequest,
        run: &mut PipelineRun,
        sink: &dyn EventSink,
        started: Instant,
    ) -> RunOutcome {
        Self::finish(run, RunState::Completed);

        let result = JobResult {
            request_id: job.request_id.clone(),
            owner_id: job.owner_id.clone(),
            results: std::mem::take(&mut run.scored),
            total_generated: run.candidates.len(),
            processing_time_ms: started.elapsed().as_millis() as u64,
            used_fallback: run.used_fallback,
            completed_at: self.time_provider.now_millis(),
        };

        info!(
            request_id = %job.request_id,
            total_generated = result.total_generated,
            kept = result.results.len(),
            used_fallback = result.used_fallback,
            processing_time_ms = result.processing_time_ms,
            "Pipeline run completed"
        );
        sink.emit(OutboundEvent::JobComplete {
            request_id: job.request_id.clone(),
            results: result.results.clone(),
            total_generated: result.total_generated,
            processing_time_ms: result.processing_time_ms,
            used_fallback: result.used_fallback,
        });

        // Best effort: the client already has its results
        let results = Arc::clone(&self.results);
        let saved = result.clone();
        tokio::spawn(async move {
            if let Err(e) = results.save(&saved.owner_id, &saved).await {
                warn!(request_id = %saved.request_id, error = %e, "Failed to persist job result");
            }
        });

        RunOutcome::Completed(result)
    }

    fn finish(run: &mut PipelineRun, terminal: RunState) {
        if let Err(e) = run.finish(terminal) {
            error!(request_id = %run.request_id, error = %e, "Run reached a second terminal state");
        }
    }
}

/// Stable sort by overall score, descending; ties keep generation order
pub fn rank(scored: &mut Vec<ScoredCandidate>, limit: usize) {
    scored.sort_by(|a, b| b.score.overall.total_cmp(&a.score.overall));
    scored.truncate(limit);
}

fn estimate_remaining(job: &JobRequest, progress: u8, started: Instant) -> u64 {
    if progress == 0 {
        return job.estimated_processing_time_secs;
    }
    let elapsed = started.elapsed().as_secs_f64();
    (elapsed * (100 - progress.min(100)) as f64 / progress as f64).round() as u64
}

#[cfg(test)]
mod tests;
