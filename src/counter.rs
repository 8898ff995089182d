//! The counting tool: turns an artifact into per-record clique statistics.
//!
//! The pipeline only relies on the [`Counter`] contract. [`BuiltinCounter`]
//! does the work in process; [`ProcessCounter`] drives an external program
//! that speaks the same line protocol as this crate's `count` command.

use std::collections::HashSet;
use std::io::{BufRead, Write};
use std::path::Path;
use std::process::Command;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::artifact::{self, EnumeratedRecord};
use crate::cliques::{census, complement, edge_list, join_vertices};
use crate::error::CountingFailure;
use crate::graph6;
use crate::process::ChildStream;
use crate::progress_bar;
use crate::ramsey::ParameterPair;

/// Clique statistics for one enumerated graph, keyed by its global id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountedResult {
    pub id: u64,
    pub vertex_count: u32,
    /// Red `K_m` cliques in the graph.
    pub k_red_count: Option<u64>,
    /// First red clique, comma-separated vertices; empty when there is none.
    pub k_red: Option<String>,
    /// Blue `K_n` cliques, i.e. `K_n` in the complement.
    pub k_blue_count: Option<u64>,
    pub k_blue: Option<String>,
    /// Triangles in the graph.
    pub k3_count: Option<u64>,
    /// `K_4` in the complement.
    pub k4_count: Option<u64>,
    /// Edges of the graph as `u:v` pairs, comma-separated.
    pub red_edges: Option<String>,
    /// Edges of the complement, same format.
    pub blue_edges: Option<String>,
}

pub trait Counter {
    /// Count every record of `artifact` for `pair`. All or nothing.
    fn count(&self, pair: ParameterPair, artifact: &Path)
    -> Result<Vec<CountedResult>, CountingFailure>;
}

/// Count one graph6 record for `pair`.
pub fn count_record(pair: ParameterPair, record: &EnumeratedRecord) -> Result<CountedResult, String> {
    let (n, g) = graph6::decode(record.payload.as_bytes()).map_err(|err| err.to_string())?;
    if n != pair.vertex_count() {
        return Err(format!(
            "graph has {n} vertices, family {pair} needs {}",
            pair.vertex_count()
        ));
    }
    let gc = complement(&g, n);
    let red = census(&g, n, pair.m());
    let blue = census(&gc, n, pair.n());
    Ok(CountedResult {
        id: record.global_id,
        vertex_count: n,
        k_red_count: Some(red.count),
        k_red: Some(red.first.as_deref().map(join_vertices).unwrap_or_default()),
        k_blue_count: Some(blue.count),
        k_blue: Some(blue.first.as_deref().map(join_vertices).unwrap_or_default()),
        k3_count: Some(census(&g, n, 3).count),
        k4_count: Some(census(&gc, n, 4).count),
        red_edges: Some(edge_list(&g, n)),
        blue_edges: Some(edge_list(&gc, n)),
    })
}

/// In-process counter built on the clique census.
#[derive(Debug, Clone, Copy, Default)]
pub struct BuiltinCounter {
    pub progress: bool,
}

impl Counter for BuiltinCounter {
    fn count(
        &self,
        pair: ParameterPair,
        artifact: &Path,
    ) -> Result<Vec<CountedResult>, CountingFailure> {
        let records = artifact::read_records(artifact)
            .map_err(|source| CountingFailure::Artifact { pair, source })?;
        let pb = progress_bar(
            records.len() as u64,
            "[count] {msg} [{elapsed_precise}] {wide_bar:.cyan/blue} {pos}/{len}",
            self.progress,
        );
        pb.set_message(pair.table_name());

        let mut results = Vec::with_capacity(records.len());
        for record in &records {
            let result = count_record(pair, record).map_err(|reason| CountingFailure::Record {
                pair,
                id: record.global_id,
                reason,
            })?;
            results.push(result);
            pb.inc(1);
        }
        pb.finish_and_clear();
        info!(table = %pair.table_name(), records = results.len(), "counted");
        Ok(results)
    }
}

/// Write results in the counter line protocol: one JSON object per line.
pub fn write_results<W: Write>(out: &mut W, results: &[CountedResult]) -> std::io::Result<()> {
    for result in results {
        serde_json::to_writer(&mut *out, result)?;
        out.write_all(b"\n")?;
    }
    out.flush()
}

/// External counter invoked as `program args... <m> <n> <artifact>`.
#[derive(Debug, Clone)]
pub struct ProcessCounter {
    program: String,
    args: Vec<String>,
    timeout: Option<Duration>,
}

impl ProcessCounter {
    pub fn new(program: impl Into<String>, args: Vec<String>, timeout: Option<Duration>) -> Self {
        Self {
            program: program.into(),
            args,
            timeout,
        }
    }
}

impl Counter for ProcessCounter {
    fn count(
        &self,
        pair: ParameterPair,
        artifact: &Path,
    ) -> Result<Vec<CountedResult>, CountingFailure> {
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .arg(pair.m().to_string())
            .arg(pair.n().to_string())
            .arg(artifact);
        let mut stream = ChildStream::spawn(command, self.timeout)
            .map_err(|source| CountingFailure::Spawn { pair, source })?;

        let mut results = Vec::new();
        let mut failure = None;
        for (i, line) in stream.stdout().lines().enumerate() {
            let line = match line {
                Ok(line) => line,
                Err(source) => {
                    failure = Some(CountingFailure::Io { pair, source });
                    break;
                }
            };
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<CountedResult>(&line) {
                Ok(result) => results.push(result),
                Err(err) => {
                    failure = Some(CountingFailure::Malformed {
                        pair,
                        line: i as u64 + 1,
                        reason: err.to_string(),
                    });
                    break;
                }
            }
        }

        let stopped_early = failure.is_some();
        let ended = stream.finish(stopped_early);
        if let Some(failure) = failure {
            return Err(failure);
        }
        ended.map_err(|source| CountingFailure::Process { pair, source })?;
        debug!(table = %pair.table_name(), records = results.len(), "counter process finished");
        Ok(results)
    }
}

/// Require exactly one result per artifact record: no stray ids, no repeats,
/// none missing. Stored rows then always join back to their source graph and
/// a load is never a silent subset.
pub fn check_against_artifact(
    pair: ParameterPair,
    results: &[CountedResult],
    artifact: &Path,
) -> Result<(), CountingFailure> {
    let records = artifact::read_records(artifact)
        .map_err(|source| CountingFailure::Artifact { pair, source })?;
    let ids: HashSet<u64> = records.iter().map(|r| r.global_id).collect();

    let mut seen = HashSet::with_capacity(results.len());
    for result in results {
        if !ids.contains(&result.id) {
            return Err(CountingFailure::UnknownId { pair, id: result.id });
        }
        if !seen.insert(result.id) {
            return Err(CountingFailure::DuplicateId { pair, id: result.id });
        }
    }
    match records.iter().find(|r| !seen.contains(&r.global_id)) {
        Some(missing) => Err(CountingFailure::MissingId {
            pair,
            id: missing.global_id,
        }),
        None => Ok(()),
    }
}
