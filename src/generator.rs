//! The external graph generator, seen only through its I/O contract.

use std::io::{self, BufRead};
use std::process::Command;
use std::time::Duration;

use crate::error::ProcessEnd;
use crate::planner::PartitionDescriptor;
use crate::process::ChildStream;

/// Something that can enumerate one shard as a stream of encoded graphs.
pub trait Generator {
    fn open(&self, descriptor: &PartitionDescriptor) -> io::Result<Box<dyn ShardStream>>;
}

/// The output of one generator invocation, one encoded graph per line.
pub trait ShardStream {
    fn reader(&mut self) -> &mut dyn BufRead;

    /// Whether the stream is known to hold no further records. Must not block
    /// on a source that is still producing.
    fn exhausted(&mut self) -> bool {
        matches!(self.reader().fill_buf(), Ok(rest) if rest.is_empty())
    }

    /// Release the source. `stopped_early` is set when the reader stopped
    /// before the end of the stream (record limit or a failure downstream).
    fn finish(self: Box<Self>, stopped_early: bool) -> Result<(), ProcessEnd>;
}

/// Runs `geng` (or a compatible program) as
/// `program args... <vertex count> [<partition>]`.
#[derive(Debug, Clone)]
pub struct GengProcess {
    program: String,
    args: Vec<String>,
    timeout: Option<Duration>,
}

impl GengProcess {
    pub fn new(program: impl Into<String>, args: Vec<String>, timeout: Option<Duration>) -> Self {
        Self {
            program: program.into(),
            args,
            timeout,
        }
    }

    pub fn command(&self, descriptor: &PartitionDescriptor) -> Command {
        let mut command = Command::new(&self.program);
        command.args(&self.args).args(descriptor.generator_args());
        command
    }
}

impl Generator for GengProcess {
    fn open(&self, descriptor: &PartitionDescriptor) -> io::Result<Box<dyn ShardStream>> {
        let stream = ChildStream::spawn(self.command(descriptor), self.timeout)?;
        Ok(Box::new(stream))
    }
}

impl ShardStream for ChildStream {
    fn reader(&mut self) -> &mut dyn BufRead {
        self.stdout()
    }

    fn exhausted(&mut self) -> bool {
        ChildStream::exhausted(self)
    }

    fn finish(self: Box<Self>, stopped_early: bool) -> Result<(), ProcessEnd> {
        ChildStream::finish(*self, stopped_early)
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::planner::{PartitionScheme, plan};

    #[test]
    fn command_appends_vertex_count_and_partition() {
        let geng = GengProcess::new("geng", vec!["-q".into()], None);
        let descriptors = plan(14, 92, Some(15_000), PartitionScheme::EdgeCount).unwrap();
        let command = geng.command(&descriptors[7]);
        let args: Vec<_> = command
            .get_args()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();
        assert_eq!(command.get_program(), "geng");
        assert_eq!(args, vec!["-q", "14", "7:7"]);
    }

    #[test]
    fn full_enumeration_passes_no_partition() {
        let geng = GengProcess::new("geng", Vec::new(), None);
        let descriptors = plan(6, 1, None, PartitionScheme::EdgeCount).unwrap();
        let command = geng.command(&descriptors[0]);
        assert_eq!(command.get_args().count(), 1);
    }
}
