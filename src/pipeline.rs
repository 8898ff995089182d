//! Job orchestration: plan, generate, count, load.
//!
//! ```text
//! Planned -> Generating -> Generated -> Counting -> Loaded -> Done
//!                 |                         |
//!                 +---------> Failed <------+
//! ```
//!
//! Nothing is retried across stages. A failed generating stage leaves its
//! partial artifact in place for inspection; the job has to be rerun from an
//! empty artifact because ids are positional.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{error, info, warn};

use crate::artifact;
use crate::config::JobConfig;
use crate::counter::{CountedResult, Counter, check_against_artifact};
use crate::error::{PipelineError, PlanningError};
use crate::generator::Generator;
use crate::planner::{PartitionDescriptor, plan};
use crate::{SHARD_BAR, progress_bar};
use crate::ramsey::ParameterPair;
use crate::runner::ShardRunner;
use crate::store::ResultStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Stage {
    Planned,
    Generating,
    Generated,
    Counting,
    Loaded,
    Done,
    Failed,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Planned => "planned",
            Self::Generating => "generating",
            Self::Generated => "generated",
            Self::Counting => "counting",
            Self::Loaded => "loaded",
            Self::Done => "done",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Where a run starts numbering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartMode {
    /// Truncate the artifact and number from 0.
    Fresh,
    /// Append after the records already in the artifact.
    Resume,
}

/// What a finished job produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunReport {
    pub artifact: PathBuf,
    pub shards: usize,
    pub first_id: u64,
    pub next_id: u64,
    pub records: u64,
    /// Shards cut at the record limit. Non-empty means the artifact is a
    /// sample of the vertex count, not a full enumeration.
    pub limited_shards: Vec<u32>,
    pub loaded: Vec<(String, usize)>,
}

pub struct Pipeline<'a> {
    generator: &'a dyn Generator,
    counter: &'a dyn Counter,
    store: &'a mut ResultStore,
    progress: bool,
    stage: Stage,
}

impl<'a> Pipeline<'a> {
    pub fn new(
        generator: &'a dyn Generator,
        counter: &'a dyn Counter,
        store: &'a mut ResultStore,
    ) -> Self {
        Self {
            generator,
            counter,
            store,
            progress: false,
            stage: Stage::Planned,
        }
    }

    pub fn with_progress(mut self, progress: bool) -> Self {
        self.progress = progress;
        self
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    /// Run one job through every stage. On error the pipeline is left in
    /// [`Stage::Failed`] and the error names the stage and shard or family.
    pub fn run(&mut self, job: &JobConfig, start: StartMode) -> Result<RunReport, PipelineError> {
        let result = self.run_stages(job, start);
        if let Err(err) = &result {
            error!(
                vertex_count = job.vertex_count,
                stage = err.stage(),
                %err,
                "job failed"
            );
            self.stage = Stage::Failed;
        }
        result
    }

    fn run_stages(&mut self, job: &JobConfig, start: StartMode) -> Result<RunReport, PipelineError> {
        let descriptors = plan_job(job)?;
        self.enter(Stage::Planned, job);

        let start_id = match start {
            StartMode::Fresh => {
                artifact::reset(&job.artifact)?;
                0
            }
            StartMode::Resume => artifact::prepare_resume(&job.artifact)?,
        };

        self.enter(Stage::Generating, job);
        let pb = progress_bar(descriptors.len() as u64, SHARD_BAR, self.progress);
        let generated = ShardRunner::new(self.generator).run_sequence(
            &descriptors,
            &job.artifact,
            start_id,
            &pb,
        )?;
        pb.finish_and_clear();
        if !generated.limited_shards.is_empty() {
            warn!(
                vertex_count = job.vertex_count,
                limited = generated.limited_shards.len(),
                "record limits truncated some shards; ids number a sample, not the full enumeration"
            );
        }
        self.enter(Stage::Generated, job);

        self.enter(Stage::Counting, job);
        let counted = self.count_all(job)?;
        let mut loaded = Vec::with_capacity(counted.len());
        for (pair, results) in &counted {
            let rows = self
                .store
                .upsert_all(*pair, results)
                .map_err(|source| PipelineError::Loading {
                    pair: *pair,
                    source,
                })?;
            info!(table = %pair.table_name(), rows, "loaded");
            loaded.push((pair.table_name(), rows));
        }
        self.enter(Stage::Loaded, job);
        self.enter(Stage::Done, job);

        Ok(RunReport {
            artifact: job.artifact.clone(),
            shards: descriptors.len(),
            first_id: generated.first_id,
            next_id: generated.next_start_id,
            records: generated.records,
            limited_shards: generated.limited_shards,
            loaded,
        })
    }

    /// Count every family before anything is loaded, so a counting failure
    /// leaves the store untouched.
    fn count_all(
        &self,
        job: &JobConfig,
    ) -> Result<Vec<(ParameterPair, Vec<CountedResult>)>, PipelineError> {
        let mut counted = Vec::with_capacity(job.families.len());
        for &pair in &job.families {
            let results = self.counter.count(pair, &job.artifact)?;
            check_against_artifact(pair, &results, &job.artifact)?;
            counted.push((pair, results));
        }
        Ok(counted)
    }

    fn enter(&mut self, stage: Stage, job: &JobConfig) {
        self.stage = stage;
        info!(
            vertex_count = job.vertex_count,
            artifact = %job.artifact.display(),
            %stage,
            "stage"
        );
    }
}

/// Validate a job and compute its shard plan.
pub fn plan_job(job: &JobConfig) -> Result<Vec<PartitionDescriptor>, PlanningError> {
    for &pair in &job.families {
        if pair.vertex_count() != job.vertex_count {
            return Err(PlanningError::FamilyMismatch {
                pair,
                expected: pair.vertex_count(),
                actual: job.vertex_count,
            });
        }
    }
    plan(job.vertex_count, job.shard_count, job.record_limit, job.scheme)
}

/// Load counted results for `pair` from an existing artifact, outside a full job.
pub fn count_and_load(
    counter: &dyn Counter,
    store: &mut ResultStore,
    pair: ParameterPair,
    artifact: &Path,
) -> Result<usize, PipelineError> {
    let results = counter.count(pair, artifact)?;
    check_against_artifact(pair, &results, artifact)?;
    store
        .upsert_all(pair, &results)
        .map_err(|source| PipelineError::Loading { pair, source })
}
