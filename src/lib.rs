//! Sharded enumeration of small graphs with stable global ids, clique
//! counting per Ramsey family, and a SQLite-backed read API.
//!
//! Data flows `planner -> runner (via generator) -> artifact -> counter ->
//! store -> server`; [`pipeline`] sequences the stages for one vertex count.

use indicatif::{ProgressBar, ProgressStyle};

pub mod artifact;
pub mod cliques;
pub mod config;
pub mod counter;
pub mod error;
pub mod generator;
pub mod graph6;
pub mod pipeline;
pub mod planner;
pub mod process;
pub mod ramsey;
pub mod runner;
pub mod server;
pub mod store;

pub use artifact::EnumeratedRecord;
pub use counter::CountedResult;
pub use error::{
    ArtifactError, ConfigError, CountingFailure, GenerationFailure, PipelineError, PlanningError,
    QueryValidationError, StoreError,
};
pub use planner::{PartitionDescriptor, PartitionScheme, plan};
pub use ramsey::ParameterPair;
pub use runner::ShardRunner;

/// =============== Progress ===============
/// Bar template for a shard sequence.
pub const SHARD_BAR: &str =
    "[shards] {msg} [{elapsed_precise}] {wide_bar:.green/white} {pos}/{len}";

/// Long loops report through an indicatif bar; hidden when `enabled` is false
/// so tests and the counter protocol stay quiet.
pub fn progress_bar(len: u64, template: &str, enabled: bool) -> ProgressBar {
    if !enabled {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new(len);
    match ProgressStyle::with_template(template) {
        Ok(style) => pb.set_style(style.progress_chars("█▉▊▋▌▍▎▏  ")),
        Err(err) => tracing::debug!(%err, "bad progress template, using default style"),
    }
    pb
}
