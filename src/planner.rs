use std::fmt;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::PlanningError;
use crate::graph6::MAX_VERTICES;

/// How the generator splits one vertex count into shards.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum PartitionScheme {
    /// Shard `i` holds the graphs with exactly `i` edges (`geng n i:i`).
    #[default]
    EdgeCount,
    /// Shard `i` of `m` is a residue class of the generator's search tree (`geng n i/m`).
    Residue,
}

/// One generator invocation. Built by [`plan`], consumed once by the shard runner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PartitionDescriptor {
    pub vertex_count: u32,
    pub shard_index: u32,
    pub shard_count: u32,
    pub record_limit: Option<u64>,
    pub scheme: PartitionScheme,
}

impl PartitionDescriptor {
    /// The partition argument handed to the generator, `None` for a full enumeration.
    pub fn partition_arg(&self) -> Option<String> {
        if self.shard_count == 1 {
            return None;
        }
        Some(match self.scheme {
            PartitionScheme::EdgeCount => format!("{0}:{0}", self.shard_index),
            PartitionScheme::Residue => format!("{}/{}", self.shard_index, self.shard_count),
        })
    }

    /// Positional generator arguments: the vertex count, then the partition if any.
    pub fn generator_args(&self) -> Vec<String> {
        let mut args = vec![self.vertex_count.to_string()];
        args.extend(self.partition_arg());
        args
    }
}

impl fmt::Display for PartitionDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "n={} shard {}/{}",
            self.vertex_count, self.shard_index, self.shard_count
        )?;
        if let Some(arg) = self.partition_arg() {
            write!(f, " [{arg}]")?;
        }
        Ok(())
    }
}

/// Edges in the complete graph on `vertex_count` vertices.
pub fn max_edges(vertex_count: u32) -> u64 {
    let n = u64::from(vertex_count);
    n * n.saturating_sub(1) / 2
}

/// Split the enumeration of `vertex_count`-vertex graphs into `shard_count`
/// descriptors, in ascending shard order.
///
/// Global ids are assigned in exactly the returned order, so callers must run
/// the shards in sequence. The same inputs always give the same sequence.
///
/// With [`PartitionScheme::EdgeCount`] the plan is exhaustive only when
/// `shard_count == max_edges(vertex_count) + 1`; smaller counts enumerate the
/// sparsest graphs only and are logged as such.
pub fn plan(
    vertex_count: u32,
    shard_count: u32,
    record_limit: Option<u64>,
    scheme: PartitionScheme,
) -> Result<Vec<PartitionDescriptor>, PlanningError> {
    if vertex_count == 0 {
        return Err(PlanningError::ZeroVertices);
    }
    if vertex_count > MAX_VERTICES {
        return Err(PlanningError::TooManyVertices(vertex_count));
    }
    if shard_count == 0 {
        return Err(PlanningError::ZeroShards);
    }
    if record_limit == Some(0) {
        return Err(PlanningError::ZeroLimit);
    }
    if scheme == PartitionScheme::EdgeCount && shard_count > 1 {
        let classes = max_edges(vertex_count) + 1;
        if u64::from(shard_count) > classes {
            return Err(PlanningError::TooManyShards {
                vertex_count,
                shard_count,
                max: classes,
            });
        }
        if u64::from(shard_count) < classes {
            warn!(
                vertex_count,
                shard_count,
                edge_classes = classes,
                "edge-count plan does not cover every edge class"
            );
        }
    }

    Ok((0..shard_count)
        .map(|shard_index| PartitionDescriptor {
            vertex_count,
            shard_index,
            shard_count,
            record_limit,
            scheme,
        })
        .collect())
}
