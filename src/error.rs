//! Error taxonomy shared by the pipeline stages and the read API.

use std::io;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::planner::PartitionDescriptor;
use crate::ramsey::ParameterPair;

/// Invalid shard plan or job definition. Raised before any state is created.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PlanningError {
    #[error("vertex count must be positive")]
    ZeroVertices,
    #[error("vertex count {0} is above the supported maximum of {max}", max = crate::graph6::MAX_VERTICES)]
    TooManyVertices(u32),
    #[error("shard count must be at least 1")]
    ZeroShards,
    #[error("record limit must be positive when set")]
    ZeroLimit,
    #[error(
        "edge-count partitioning of {vertex_count} vertices allows at most {max} shards, got {shard_count}"
    )]
    TooManyShards {
        vertex_count: u32,
        shard_count: u32,
        max: u64,
    },
    #[error("no Ramsey bound known for ({m}, {n})")]
    UnknownFamily { m: u32, n: u32 },
    #[error("family {pair} counts {expected}-vertex graphs but the job enumerates {actual} vertices")]
    FamilyMismatch {
        pair: ParameterPair,
        expected: u32,
        actual: u32,
    },
}

/// How an external process ended when it did not end cleanly.
#[derive(Debug, Error)]
pub enum ProcessEnd {
    #[error("exited with {}", .code.map_or_else(|| "a signal".to_string(), |c| format!("code {c}")))]
    Exited { code: Option<i32> },
    #[error("timed out after {0:?}")]
    TimedOut(Duration),
    #[error("wait failed: {0}")]
    Wait(#[from] io::Error),
}

/// The generator failed for one shard. The artifact keeps whatever was appended
/// before the failure and must be regenerated from empty.
#[derive(Debug, Error)]
pub enum GenerationFailure {
    #[error("could not start generator for {descriptor}: {source}")]
    Spawn {
        descriptor: PartitionDescriptor,
        #[source]
        source: io::Error,
    },
    #[error("generator for {descriptor} {source} ({bytes_written} bytes appended)")]
    Process {
        descriptor: PartitionDescriptor,
        #[source]
        source: ProcessEnd,
        bytes_written: u64,
    },
    #[error("generator for {descriptor} emitted malformed line {line}: {reason} ({bytes_written} bytes appended)")]
    Malformed {
        descriptor: PartitionDescriptor,
        line: u64,
        reason: String,
        bytes_written: u64,
    },
    #[error("i/o error on {descriptor} after {bytes_written} bytes: {source}")]
    Io {
        descriptor: PartitionDescriptor,
        #[source]
        source: io::Error,
        bytes_written: u64,
    },
}

impl GenerationFailure {
    pub fn descriptor(&self) -> &PartitionDescriptor {
        match self {
            Self::Spawn { descriptor, .. }
            | Self::Process { descriptor, .. }
            | Self::Malformed { descriptor, .. }
            | Self::Io { descriptor, .. } => descriptor,
        }
    }

    /// Bytes appended to the artifact by the failing shard before it stopped.
    pub fn bytes_written(&self) -> u64 {
        match self {
            Self::Spawn { .. } => 0,
            Self::Process { bytes_written, .. }
            | Self::Malformed { bytes_written, .. }
            | Self::Io { bytes_written, .. } => *bytes_written,
        }
    }
}

/// Reading or checking an artifact file failed.
#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("i/o error on artifact {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("artifact {} line {line} is malformed: {reason}", .path.display())]
    Malformed {
        path: PathBuf,
        line: u64,
        reason: String,
    },
    #[error("artifact {} line {line}: expected id {expected}, found {found}", .path.display())]
    Gap {
        path: PathBuf,
        line: u64,
        expected: u64,
        found: u64,
    },
}

/// The counting tool failed for one parameter pair. Nothing is loaded.
#[derive(Debug, Error)]
pub enum CountingFailure {
    #[error("could not start counter for {pair}: {source}")]
    Spawn {
        pair: ParameterPair,
        #[source]
        source: io::Error,
    },
    #[error("counter for {pair} {source}")]
    Process {
        pair: ParameterPair,
        #[source]
        source: ProcessEnd,
    },
    #[error("counter for {pair} emitted malformed line {line}: {reason}")]
    Malformed {
        pair: ParameterPair,
        line: u64,
        reason: String,
    },
    #[error("counter for {pair} could not decode record {id}: {reason}")]
    Record {
        pair: ParameterPair,
        id: u64,
        reason: String,
    },
    #[error("counter for {pair} returned id {id}, which is not in the artifact")]
    UnknownId { pair: ParameterPair, id: u64 },
    #[error("counter for {pair} returned id {id} more than once")]
    DuplicateId { pair: ParameterPair, id: u64 },
    #[error("counter for {pair} returned no result for record {id}")]
    MissingId { pair: ParameterPair, id: u64 },
    #[error("counter for {pair}: {source}")]
    Artifact {
        pair: ParameterPair,
        #[source]
        source: ArtifactError,
    },
    #[error("i/o error reading counter output for {pair}: {source}")]
    Io {
        pair: ParameterPair,
        #[source]
        source: io::Error,
    },
}

/// The result store is unreachable or rejected a statement.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("could not open result store {}: {source}", .path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: rusqlite::Error,
    },
    #[error("store error on {table}: {source}")]
    Sqlite {
        table: String,
        #[source]
        source: rusqlite::Error,
    },
    #[error("store still busy on {table} after {attempts} attempts: {source}")]
    Exhausted {
        table: String,
        attempts: u32,
        #[source]
        source: rusqlite::Error,
    },
    #[error("no row {id} in {table}")]
    NotFound { table: String, id: u64 },
}

/// Caller input to the read API that never reaches the store.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum QueryValidationError {
    #[error("unknown table {0:?}")]
    UnknownTable(String),
    #[error("malformed id {0:?}")]
    MalformedId(String),
}

/// A pipeline job halted. Names the stage and the shard or parameter pair.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("planning failed: {0}")]
    Planning(#[from] PlanningError),
    #[error("generating failed at {}: {0}", .0.descriptor())]
    Generating(#[from] GenerationFailure),
    #[error("counting failed: {0}")]
    Counting(#[from] CountingFailure),
    #[error("loading {pair} failed: {source}")]
    Loading {
        pair: ParameterPair,
        #[source]
        source: StoreError,
    },
    #[error("artifact preparation failed: {0}")]
    Artifact(#[from] ArtifactError),
}

impl PipelineError {
    pub fn stage(&self) -> &'static str {
        match self {
            Self::Planning(_) | Self::Artifact(_) => "planning",
            Self::Generating(_) => "generating",
            Self::Counting(_) => "counting",
            Self::Loading { .. } => "loading",
        }
    }
}

/// Configuration file could not be read or is inconsistent.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("could not parse config {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid config: {0}")]
    Invalid(String),
}
