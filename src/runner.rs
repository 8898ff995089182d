//! Shard execution and global id assignment.
//!
//! Ids are never held in shared state. [`ShardRunner::run`] takes the first id
//! for its shard and hands back the first id for the next one; running the
//! shards of a plan in order while threading that value gives the same
//! numbering a single unpartitioned enumeration would.

use std::io::{BufWriter, Write};
use std::path::Path;

use indicatif::ProgressBar;
use tracing::{debug, info, warn};

use crate::artifact;
use crate::error::GenerationFailure;
use crate::generator::{Generator, ShardStream};
use crate::graph6;
use crate::planner::PartitionDescriptor;

/// What one shard appended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShardOutcome {
    /// First id for the next shard: `start_id + records`.
    pub next_start_id: u64,
    pub records: u64,
    pub bytes_written: u64,
    /// The record limit cut the generator off; the shard is a sample.
    pub hit_limit: bool,
}

/// Result of running a whole plan.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SequenceOutcome {
    pub first_id: u64,
    pub next_start_id: u64,
    pub records: u64,
    /// Shards whose output was cut at the record limit.
    pub limited_shards: Vec<u32>,
}

pub struct ShardRunner<'g> {
    generator: &'g dyn Generator,
}

impl<'g> ShardRunner<'g> {
    pub fn new(generator: &'g dyn Generator) -> Self {
        Self { generator }
    }

    /// Run one shard, appending `(start_id + k, record_k)` to `destination`.
    ///
    /// Never truncates `destination`. On failure the lines already appended
    /// stay in place and the failure carries the byte count.
    ///
    /// At the record limit the shard counts as truncated unless the stream
    /// is already known to be exhausted. That check never waits on a live
    /// generator, so a generator that is still running at the limit is always
    /// reported as cut off.
    pub fn run(
        &self,
        descriptor: &PartitionDescriptor,
        destination: &Path,
        start_id: u64,
    ) -> Result<ShardOutcome, GenerationFailure> {
        let io_failure = |source, bytes_written| GenerationFailure::Io {
            descriptor: *descriptor,
            source,
            bytes_written,
        };

        let file = artifact::open_append(destination).map_err(|source| io_failure(source, 0))?;
        let mut out = BufWriter::new(file);
        let mut stream =
            self.generator
                .open(descriptor)
                .map_err(|source| GenerationFailure::Spawn {
                    descriptor: *descriptor,
                    source,
                })?;

        debug!(shard = %descriptor, start_id, "shard started");
        let mut written = 0u64;
        let mut bytes_written = 0u64;
        let mut hit_limit = false;
        let mut line = Vec::new();

        loop {
            if descriptor.record_limit == Some(written) {
                hit_limit = !stream.exhausted();
                break;
            }
            line.clear();
            let read = stream.reader().read_until(b'\n', &mut line);
            let read = match read {
                Ok(read) => read,
                Err(source) => {
                    let _ = out.flush();
                    abandon(stream);
                    return Err(io_failure(source, bytes_written));
                }
            };
            if read == 0 {
                break;
            }
            let payload = trim_newline(&line);
            if let Err(err) = graph6::validate(payload, descriptor.vertex_count) {
                let flushed = out.flush();
                abandon(stream);
                if let Err(source) = flushed {
                    return Err(io_failure(source, bytes_written));
                }
                return Err(GenerationFailure::Malformed {
                    descriptor: *descriptor,
                    line: written + 1,
                    reason: err.to_string(),
                    bytes_written,
                });
            }
            match artifact::write_record(&mut out, start_id + written, payload) {
                Ok(n) => bytes_written += n,
                Err(source) => {
                    abandon(stream);
                    return Err(io_failure(source, bytes_written));
                }
            }
            written += 1;
        }

        if let Err(source) = out.flush() {
            abandon(stream);
            return Err(io_failure(source, bytes_written));
        }
        stream
            .finish(hit_limit)
            .map_err(|source| GenerationFailure::Process {
                descriptor: *descriptor,
                source,
                bytes_written,
            })?;

        if hit_limit {
            warn!(
                shard = %descriptor,
                limit = written,
                "record limit reached; shard output is a sample"
            );
        }
        debug!(shard = %descriptor, records = written, bytes_written, "shard finished");
        Ok(ShardOutcome {
            next_start_id: start_id + written,
            records: written,
            bytes_written,
            hit_limit,
        })
    }

    /// Run `descriptors` strictly in order, threading the next start id from
    /// each shard into the following one. Stops at the first failing shard.
    pub fn run_sequence(
        &self,
        descriptors: &[PartitionDescriptor],
        destination: &Path,
        start_id: u64,
        progress: &ProgressBar,
    ) -> Result<SequenceOutcome, GenerationFailure> {
        let mut outcome = SequenceOutcome {
            first_id: start_id,
            next_start_id: start_id,
            ..SequenceOutcome::default()
        };
        for descriptor in descriptors {
            progress.set_message(descriptor.to_string());
            let shard = self.run(descriptor, destination, outcome.next_start_id)?;
            outcome.next_start_id = shard.next_start_id;
            outcome.records += shard.records;
            if shard.hit_limit {
                outcome.limited_shards.push(descriptor.shard_index);
            }
            progress.inc(1);
        }
        info!(
            destination = %destination.display(),
            shards = descriptors.len(),
            records = outcome.records,
            first_id = outcome.first_id,
            next_id = outcome.next_start_id,
            "all shards generated"
        );
        Ok(outcome)
    }
}

/// Stop reading a shard that already failed; its exit status no longer matters.
fn abandon(stream: Box<dyn ShardStream>) {
    if let Err(err) = stream.finish(true) {
        debug!(%err, "abandoned generator did not exit cleanly");
    }
}

fn trim_newline(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProcessEnd;
    use crate::generator::testing::ScriptedGenerator;
    use crate::planner::{PartitionScheme, plan};
    use std::fs;
    use tempfile::tempdir;

    fn ids(path: &Path) -> Vec<u64> {
        artifact::read_records(path)
            .unwrap()
            .into_iter()
            .map(|r| r.global_id)
            .collect()
    }

    #[test]
    fn ids_are_contiguous_across_shards() {
        let generator = ScriptedGenerator::default()
            .shard(0, &["C?"])
            .shard(1, &["C_", "CO"])
            .shard(2, &[])
            .shard(3, &["Cw", "C~", "Cz"]);
        let descriptors = plan(4, 4, None, PartitionScheme::Residue).unwrap();
        let dir = tempdir().unwrap();
        let path = dir.path().join("4-graphs.csv");

        let outcome = ShardRunner::new(&generator)
            .run_sequence(&descriptors, &path, 0, &ProgressBar::hidden())
            .unwrap();

        assert_eq!(outcome.records, 6);
        assert_eq!(outcome.next_start_id, 6);
        assert!(outcome.limited_shards.is_empty());
        assert_eq!(ids(&path), (0..6).collect::<Vec<_>>());
        assert_eq!(*generator.opened.borrow(), vec![0, 1, 2, 3]);
        let text = fs::read_to_string(&path).unwrap();
        assert_eq!(text, "0,C?\n1,C_\n2,CO\n3,Cw\n4,C~\n5,Cz\n");
    }

    #[test]
    fn start_id_is_handed_back_for_the_next_shard() {
        let generator = ScriptedGenerator::default().shard(0, &["C?", "C_"]);
        let descriptor = plan(4, 1, None, PartitionScheme::EdgeCount).unwrap()[0];
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.csv");
        let runner = ShardRunner::new(&generator);

        let first = runner.run(&descriptor, &path, 10).unwrap();
        assert_eq!(first.next_start_id, 12);
        let second = runner.run(&descriptor, &path, first.next_start_id).unwrap();
        assert_eq!(second.next_start_id, 14);
        assert_eq!(ids(&path), vec![10, 11, 12, 13]);
    }

    #[test]
    fn record_limit_truncates_and_is_reported() {
        let generator = ScriptedGenerator::default()
            .shard(0, &["C?", "C_", "CO"])
            // exactly at the limit is not a truncation
            .shard(1, &["Cw", "Cz"])
            // a generator killed at the limit does not fail the shard
            .failing_shard(2, &["C~", "C~", "C~", "C~"], 141);
        let descriptors = plan(4, 3, Some(2), PartitionScheme::Residue).unwrap();
        let dir = tempdir().unwrap();
        let path = dir.path().join("limited.csv");

        let outcome = ShardRunner::new(&generator)
            .run_sequence(&descriptors, &path, 0, &ProgressBar::hidden())
            .unwrap();

        assert_eq!(outcome.records, 6);
        assert_eq!(outcome.limited_shards, vec![0, 2]);
        assert_eq!(ids(&path), (0..6).collect::<Vec<_>>());
    }

    #[test]
    fn later_shards_only_append() {
        let generator = ScriptedGenerator::default()
            .shard(0, &["C?", "C_"])
            .shard(1, &["CO"]);
        let descriptors = plan(4, 2, None, PartitionScheme::Residue).unwrap();
        let dir = tempdir().unwrap();
        let path = dir.path().join("append.csv");
        let runner = ShardRunner::new(&generator);

        let first = runner.run(&descriptors[0], &path, 0).unwrap();
        let before = fs::read(&path).unwrap();
        runner
            .run(&descriptors[1], &path, first.next_start_id)
            .unwrap();
        let after = fs::read(&path).unwrap();
        assert!(after.starts_with(&before));
        assert_eq!(&after[before.len()..], b"2,CO\n");
    }

    #[test]
    fn malformed_output_fails_and_keeps_partial_artifact() {
        let generator = ScriptedGenerator::default()
            .shard(0, &["C?"])
            .shard(1, &["C_", "not graph6", "CO"]);
        let descriptors = plan(4, 2, None, PartitionScheme::Residue).unwrap();
        let dir = tempdir().unwrap();
        let path = dir.path().join("broken.csv");

        let err = ShardRunner::new(&generator)
            .run_sequence(&descriptors, &path, 0, &ProgressBar::hidden())
            .unwrap_err();

        match &err {
            GenerationFailure::Malformed {
                descriptor,
                line,
                bytes_written,
                ..
            } => {
                assert_eq!(descriptor.shard_index, 1);
                assert_eq!(*line, 2);
                assert_eq!(*bytes_written, 5);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(err.bytes_written(), 5);
        assert_eq!(fs::read_to_string(&path).unwrap(), "0,C?\n1,C_\n");
    }

    #[test]
    fn wrong_vertex_count_is_malformed() {
        let generator = ScriptedGenerator::default().shard(0, &["E???"]);
        let descriptor = plan(4, 1, None, PartitionScheme::EdgeCount).unwrap()[0];
        let dir = tempdir().unwrap();
        let err = ShardRunner::new(&generator)
            .run(&descriptor, &dir.path().join("x.csv"), 0)
            .unwrap_err();
        assert!(matches!(err, GenerationFailure::Malformed { line: 1, .. }));
    }

    #[test]
    fn generator_exit_failure_is_surfaced_with_shard() {
        let generator = ScriptedGenerator::default()
            .shard(0, &["C?"])
            .failing_shard(1, &["C_"], 2)
            .shard(2, &["CO"]);
        let descriptors = plan(4, 3, None, PartitionScheme::Residue).unwrap();
        let dir = tempdir().unwrap();
        let path = dir.path().join("exit.csv");

        let err = ShardRunner::new(&generator)
            .run_sequence(&descriptors, &path, 0, &ProgressBar::hidden())
            .unwrap_err();

        match err {
            GenerationFailure::Process {
                descriptor, source, ..
            } => {
                assert_eq!(descriptor.shard_index, 1);
                assert!(matches!(source, ProcessEnd::Exited { code: Some(2) }));
            }
            other => panic!("unexpected {other:?}"),
        }
        // shard 2 never ran
        assert_eq!(*generator.opened.borrow(), vec![0, 1]);
        assert_eq!(ids(&path), vec![0, 1]);
    }
}
