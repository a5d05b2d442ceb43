use std::time::Duration;

use tokio::{
    io::{AsyncBufReadExt, BufReader},
    process::{Child, Command},
    select,
    sync::{mpsc::UnboundedSender, oneshot},
    time::Instant,
};
use tokio_stream::{wrappers::SplitStream, Stream, StreamExt};

use crate::job::JobId;
use crate::*;

/// A job that prints nothing for this long gets a warning in the log. Nothing
/// else happens to it.
const STALL_DURATION: Duration = Duration::from_secs(15);

#[derive(Debug)]
/// The reason why the downloader process terminated
pub enum ExitReason {
    /// Normal termination, exit code 0
    Finished,
    /// A non-zero exit code
    ExitCode(i32),
    /// User cancelled the download and the process was killed
    Cancelled,
    /// An IO error happened while reading one of the downloader's streams
    IOError(std::io::Error),
    /// The downloader was killed by an external signal (SIGTERM, SIGKILL)
    ExternalSignal,
}

impl std::fmt::Display for ExitReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExitReason::Finished => write!(f, "finished"),
            ExitReason::ExitCode(code) => write!(f, "exit code {code}"),
            ExitReason::Cancelled => write!(f, "cancelled"),
            ExitReason::IOError(e) => write!(f, "io error: {e}"),
            ExitReason::ExternalSignal => write!(f, "killed by signal"),
        }
    }
}

impl std::error::Error for ExitReason {}

impl ExitReason {
    pub fn into_result(self) -> error::Result<()> {
        match self {
            ExitReason::Finished => Ok(()),
            _ => Err(error::Error::ToolExit(self)),
        }
    }
}

/// One line of output, tagged with the pipe it came from
#[derive(Debug, Clone, PartialEq)]
pub enum Output {
    Stdout(String),
    Stderr(String),
}

#[derive(Debug)]
pub enum JobEventKind {
    Line(String),
    Exited(ExitReason),
}

/// Sent from a job's supervisor task to the orchestrator
#[derive(Debug)]
pub struct JobEvent {
    pub id: JobId,
    pub kind: JobEventKind,
}

fn lossy_line(bytes: Vec<u8>) -> String {
    let mut line = String::from_utf8_lossy(&bytes).into_owned();
    if line.ends_with('\r') {
        line.pop();
    }
    line
}

/// Spawns the given command and returns one newline separated stream holding
/// both stdout and stderr
pub fn spawn_downloader_command(
    mut cmd: Command,
) -> std::io::Result<(Child, impl Stream<Item = std::io::Result<Output>>)> {
    let mut child = cmd
        .stdout(std::process::Stdio::piped())
        .stderr(std::process::Stdio::piped())
        .spawn()?;
    let missing = |name| std::io::Error::new(std::io::ErrorKind::Other, format!("{name} not captured"));
    let out = child.stdout.take().ok_or_else(|| missing("stdout"))?;
    let err = child.stderr.take().ok_or_else(|| missing("stderr"))?;
    let out = SplitStream::new(BufReader::new(out).split(b'\n'))
        .map(|line| line.map(|b| Output::Stdout(lossy_line(b))));
    let err = SplitStream::new(BufReader::new(err).split(b'\n'))
        .map(|line| line.map(|b| Output::Stderr(lossy_line(b))));
    Ok((child, out.merge(err)))
}

/// Forwards a job's output to the orchestrator until the process exits or the
/// kill switch fires. Always finishes with exactly one `Exited` event.
pub async fn supervise(
    id: JobId,
    mut child: Child,
    st: impl Stream<Item = std::io::Result<Output>>,
    mut kill: oneshot::Receiver<()>,
    tx: UnboundedSender<JobEvent>,
) {
    debug!("Supervising job {id}");
    tokio::pin!(st);
    let mut reading_out = true;
    let mut stalled = false;
    let stall_timer = tokio::time::sleep(STALL_DURATION);
    tokio::pin!(stall_timer);
    let reason = loop {
        select! {
            _ = &mut stall_timer, if !stalled && reading_out => {
                stalled = true;
                warn!("Job {id} has printed nothing for {}s", STALL_DURATION.as_secs());
            },
            line = st.next(), if reading_out => {
                stalled = false;
                stall_timer.as_mut().reset(Instant::now() + STALL_DURATION);
                match line {
                    Some(Ok(Output::Stdout(line))) => {
                        trace!("[{id}] {line}");
                        let event = JobEvent { id: id.clone(), kind: JobEventKind::Line(line) };
                        if tx.send(event).is_err() {
                            // nobody is listening anymore
                            _ = child.kill().await;
                            return;
                        }
                    }
                    Some(Ok(Output::Stderr(line))) => {
                        warn!("[{id}] yt-dlp stderr: {line}");
                    }
                    Some(Err(e)) => {
                        error!("Reading output of job {id} failed: {e}");
                        _ = child.kill().await;
                        break ExitReason::IOError(e);
                    }
                    None => reading_out = false,
                }
            },
            stat = child.wait(), if !reading_out => {
                break match stat {
                    Ok(exit_status) => match exit_status.code() {
                        Some(0) => ExitReason::Finished,
                        Some(code) => ExitReason::ExitCode(code),
                        // no code means a signal ended the process
                        None => ExitReason::ExternalSignal,
                    },
                    Err(e) => ExitReason::IOError(e),
                };
            },
            _ = &mut kill => {
                debug!("Killing job {id}");
                _ = child.kill().await;
                break ExitReason::Cancelled;
            },
        }
    };
    info!("Job {id} ended: {reason}");
    _ = tx.send(JobEvent {
        id,
        kind: JobEventKind::Exited(reason),
    });
}
