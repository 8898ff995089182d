//! Line-oriented child processes with an optional kill deadline.

use std::io::{self, BufRead, BufReader};
use std::process::{Child, ChildStdout, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, warn};

use crate::error::ProcessEnd;

struct Watchdog {
    done: Sender<()>,
    fired: Arc<AtomicBool>,
    handle: JoinHandle<()>,
    timeout: Duration,
}

/// A spawned child whose stdout is read line by line.
///
/// Blocks only in reads and in [`ChildStream::finish`]. When a deadline is set
/// a watchdog thread kills the child once it passes, which ends the stdout
/// stream and makes `finish` report [`ProcessEnd::TimedOut`].
pub struct ChildStream {
    stdout: BufReader<ChildStdout>,
    child: Arc<Mutex<Child>>,
    watchdog: Option<Watchdog>,
}

impl ChildStream {
    pub fn spawn(mut command: Command, timeout: Option<Duration>) -> io::Result<Self> {
        command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit());
        debug!(?command, "spawning");
        let mut child = command.spawn()?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| io::Error::other("child stdout was not captured"))?;
        let child = Arc::new(Mutex::new(child));
        let watchdog = timeout.map(|timeout| start_watchdog(Arc::clone(&child), timeout));
        Ok(Self {
            stdout: BufReader::new(stdout),
            child,
            watchdog,
        })
    }

    pub fn stdout(&mut self) -> &mut BufReader<ChildStdout> {
        &mut self.stdout
    }

    /// True once the child has exited and every byte it wrote has been read.
    /// A running child is never waited on.
    pub fn exhausted(&mut self) -> bool {
        if !self.stdout.buffer().is_empty() {
            return false;
        }
        let exited = self
            .child
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .try_wait();
        match exited {
            // the write end is closed, so this read cannot block
            Ok(Some(_)) => matches!(self.stdout.fill_buf(), Ok(rest) if rest.is_empty()),
            Ok(None) => false,
            Err(err) => {
                debug!(%err, "could not poll child");
                false
            }
        }
    }

    /// Reap the child. With `stop` the child is killed first and its exit
    /// status is not held against it.
    pub fn finish(self, stop: bool) -> Result<(), ProcessEnd> {
        let Self {
            stdout,
            child,
            watchdog,
        } = self;
        drop(stdout);

        if stop {
            let mut child = child.lock().unwrap_or_else(PoisonError::into_inner);
            if let Err(err) = child.kill() {
                debug!(%err, "kill after early stop failed");
            }
        }

        let timed_out = match watchdog {
            Some(w) => {
                // a closed channel also releases the watchdog
                let _ = w.done.send(());
                if w.handle.join().is_err() {
                    warn!("watchdog thread panicked");
                }
                w.fired.load(Ordering::SeqCst).then_some(w.timeout)
            }
            None => None,
        };

        let status = child
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .wait()?;
        if let Some(timeout) = timed_out {
            return Err(ProcessEnd::TimedOut(timeout));
        }
        if stop || status.success() {
            Ok(())
        } else {
            Err(ProcessEnd::Exited {
                code: status.code(),
            })
        }
    }
}

fn start_watchdog(child: Arc<Mutex<Child>>, timeout: Duration) -> Watchdog {
    let (done, rx) = mpsc::channel::<()>();
    let fired = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&fired);
    let handle = thread::spawn(move || {
        if let Err(RecvTimeoutError::Timeout) = rx.recv_timeout(timeout) {
            flag.store(true, Ordering::SeqCst);
            let mut child = child.lock().unwrap_or_else(PoisonError::into_inner);
            if let Err(err) = child.kill() {
                warn!(%err, "could not kill child after deadline");
            }
        }
    });
    Watchdog {
        done,
        fired,
        handle,
        timeout,
    }
}
