use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::Serialize;
use tokio::{
    select,
    sync::{
        broadcast,
        mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender},
        oneshot,
    },
};

use crate::downloader::{spawn_downloader_command, supervise, ExitReason, JobEvent, JobEventKind};
use crate::error::{Error, Result, StoreError};
use crate::job::{IdGenerator, JobId, JobRecord, JobStatus};
use crate::settings::{Format, Settings};
use crate::store::Store;
use crate::ytdlp::{
    self,
    parser::{self, StreamEvent, StreamState},
    DownloadPlan, Metadata, ToolPaths,
};
use crate::*;

/// What a failed job shows; the tool's own output only goes to the log
pub const FAILED_MESSAGE: &str = "Download failed";
const INTERRUPTED_MESSAGE: &str = "Interrupted";

/// Pushed to every view whenever a job changes
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Notification {
    Progress {
        id: JobId,
        progress: f64,
        status: JobStatus,
    },
    #[serde(rename_all = "camelCase")]
    Complete {
        id: JobId,
        file_path: Option<PathBuf>,
        format: Format,
    },
    Error {
        id: JobId,
        message: String,
    },
    /// The whole history, sent after jobs are added or removed
    History { jobs: Vec<JobRecord> },
}

#[derive(Debug)]
pub enum Command {
    Start {
        url: String,
        title: Option<String>,
        thumbnail: Option<String>,
        reply: oneshot::Sender<JobId>,
    },
    Cancel {
        id: JobId,
        reply: oneshot::Sender<Result<Vec<JobRecord>>>,
    },
    Delete {
        id: JobId,
        reply: oneshot::Sender<Result<Vec<JobRecord>>>,
    },
    Clear {
        reply: oneshot::Sender<Result<Vec<JobRecord>>>,
    },
    List {
        reply: oneshot::Sender<Vec<JobRecord>>,
    },
    Metadata {
        url: String,
        reply: oneshot::Sender<Result<Metadata>>,
    },
    Settings {
        reply: oneshot::Sender<Settings>,
    },
    SaveSettings {
        settings: Settings,
        reply: oneshot::Sender<Result<()>>,
    },
}

/// Cloneable front door to a running orchestrator
#[derive(Debug, Clone)]
pub struct Handle {
    tx: UnboundedSender<Command>,
}

pub fn channel() -> (Handle, UnboundedReceiver<Command>) {
    let (tx, rx) = unbounded_channel();
    (Handle { tx }, rx)
}

impl Handle {
    async fn ask<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(make(reply)).map_err(|_| Error::Closed)?;
        rx.await.map_err(|_| Error::Closed)
    }

    pub async fn start_job(
        &self,
        url: impl Into<String>,
        title: Option<String>,
        thumbnail: Option<String>,
    ) -> Result<JobId> {
        let url = url.into();
        self.ask(|reply| Command::Start {
            url,
            title,
            thumbnail,
            reply,
        })
        .await
    }
    pub async fn cancel_job(&self, id: JobId) -> Result<Vec<JobRecord>> {
        self.ask(|reply| Command::Cancel { id, reply }).await?
    }
    pub async fn delete_job(&self, id: JobId) -> Result<Vec<JobRecord>> {
        self.ask(|reply| Command::Delete { id, reply }).await?
    }
    pub async fn clear_history(&self) -> Result<Vec<JobRecord>> {
        self.ask(|reply| Command::Clear { reply }).await?
    }
    pub async fn get_all_jobs(&self) -> Result<Vec<JobRecord>> {
        self.ask(|reply| Command::List { reply }).await
    }
    pub async fn fetch_metadata(&self, url: impl Into<String>) -> Result<Metadata> {
        let url = url.into();
        self.ask(|reply| Command::Metadata { url, reply }).await?
    }
    pub async fn settings(&self) -> Result<Settings> {
        self.ask(|reply| Command::Settings { reply }).await
    }
    pub async fn save_settings(&self, settings: Settings) -> Result<()> {
        self.ask(|reply| Command::SaveSettings { settings, reply }).await?
    }
}

struct ActiveJob {
    record: JobRecord,
    stream: StreamState,
    plan: DownloadPlan,
    kill: Option<oneshot::Sender<()>>,
}

impl ActiveJob {
    fn kill(&mut self) {
        if let Some(kill) = self.kill.take() {
            _ = kill.send(());
        }
    }
}

/// Owns the running jobs and the store. Everything that touches either runs
/// inside [`Orchestrator::run`], one command or event at a time.
pub struct Orchestrator<S> {
    store: S,
    tools: ToolPaths,
    active: HashMap<JobId, ActiveJob>,
    ids: IdGenerator,
    events_tx: UnboundedSender<JobEvent>,
    events_rx: UnboundedReceiver<JobEvent>,
    updates: broadcast::Sender<Notification>,
}

impl<S: Store> Orchestrator<S> {
    pub fn new(store: S, tools: ToolPaths, updates: broadcast::Sender<Notification>) -> Self {
        let (events_tx, events_rx) = unbounded_channel();
        let ids = IdGenerator::after(store.history().iter().map(|r| &r.id));
        let mut orchestrator = Self {
            store,
            tools,
            active: HashMap::new(),
            ids,
            events_tx,
            events_rx,
            updates,
        };
        orchestrator.reconcile_interrupted();
        orchestrator
    }

    /// Jobs still marked active in the history belong to a process that is
    /// gone. Nothing will ever finish them.
    fn reconcile_interrupted(&mut self) {
        let mut history = self.store.history();
        let mut changed = 0;
        for record in history.iter_mut().filter(|r| r.status.is_active()) {
            if record.fail(INTERRUPTED_MESSAGE).is_ok() {
                changed += 1;
            }
        }
        if changed > 0 {
            warn!("Marking {changed} interrupted job(s) as failed");
            self.save_history(history);
        }
    }

    pub async fn run(mut self, mut cmd_rx: UnboundedReceiver<Command>) {
        info!("Entering orchestrator loop");
        let mut accepting = true;
        loop {
            select! {
                cmd = cmd_rx.recv(), if accepting => {
                    match cmd {
                        Some(cmd) => self.handle_command(cmd),
                        None => {
                            debug!("command channel closed");
                            accepting = false;
                        }
                    }
                },
                Some(event) = self.events_rx.recv() => {
                    self.handle_event(event).await;
                },
                else => break,
            }
            if !accepting && self.active.is_empty() {
                break;
            }
        }
        info!("Orchestrator loop finished");
    }

    fn handle_command(&mut self, cmd: Command) {
        debug!("Command received: {cmd:?}");
        match cmd {
            Command::Start {
                url,
                title,
                thumbnail,
                reply,
            } => {
                let id = self.start_job(url, title, thumbnail);
                _ = reply.send(id);
                self.broadcast_history();
            }
            Command::Cancel { id, reply } => {
                _ = reply.send(self.cancel_job(&id).map_err(Error::from));
                self.broadcast_history();
            }
            Command::Delete { id, reply } => {
                _ = reply.send(self.delete_job(&id).map_err(Error::from));
                self.broadcast_history();
            }
            Command::Clear { reply } => {
                _ = reply.send(self.clear_history().map_err(Error::from));
                self.broadcast_history();
            }
            Command::List { reply } => {
                _ = reply.send(self.store.history());
            }
            Command::Metadata { url, reply } => {
                // runs on its own task so a slow lookup never holds up jobs
                let tools = self.tools.clone();
                tokio::spawn(async move {
                    let result = ytdlp::fetch_metadata(&tools, &url).await;
                    if let Err(e) = &result {
                        warn!("Metadata for {url} failed: {e}");
                    }
                    _ = reply.send(result);
                });
            }
            Command::Settings { reply } => {
                _ = reply.send(self.store.settings());
            }
            Command::SaveSettings { settings, reply } => {
                if let Err(e) = std::fs::create_dir_all(&settings.output_dir) {
                    warn!("Could not create {:?}: {e}", settings.output_dir);
                }
                _ = reply.send(self.store.replace_settings(settings).map_err(Error::from));
            }
        }
    }

    async fn handle_event(&mut self, event: JobEvent) {
        match event.kind {
            JobEventKind::Line(line) => self.handle_line(&event.id, &line),
            JobEventKind::Exited(reason) => self.finish_job(event.id, reason).await,
        }
    }

    fn notify(&self, note: Notification) {
        // no subscribers is fine
        _ = self.updates.send(note);
    }

    fn broadcast_history(&self) {
        self.notify(Notification::History {
            jobs: self.store.history(),
        });
    }

    fn save_history(&mut self, history: Vec<JobRecord>) {
        if let Err(e) = self.store.replace_history(history) {
            error!("Could not save history: {e}");
        }
    }

    /// Replaces the stored copy of `record`. A record that is no longer in
    /// the history stays deleted.
    fn write_record(&mut self, record: &JobRecord) {
        let mut history = self.store.history();
        match history.iter_mut().find(|r| r.id == record.id) {
            Some(slot) => *slot = record.clone(),
            None => {
                debug!("Job {} is gone from history, not saving", record.id);
                return;
            }
        }
        self.save_history(history);
    }

    pub fn start_job(
        &mut self,
        url: String,
        title: Option<String>,
        thumbnail: Option<String>,
    ) -> JobId {
        let settings = self.store.settings();
        let now = Utc::now();
        let id = self.ids.next(now);
        let plan = ytdlp::plan_download(&url, title.as_deref(), &settings, &self.tools);
        let mut record = JobRecord::new(id.clone(), url, title, thumbnail, plan.format, now);
        info!("Starting job {id} ({}) for {}", record.platform, record.url);

        let mut history = self.store.history();
        history.insert(0, record.clone());
        self.save_history(history);

        if let Err(e) = std::fs::create_dir_all(&plan.output_dir) {
            warn!("Could not create {:?}: {e}", plan.output_dir);
        }
        let cmd = ytdlp::ytdlp_command(&self.tools, &plan);
        match spawn_downloader_command(cmd) {
            Ok((child, st)) => {
                if let Err(e) = record.transition(JobStatus::Downloading) {
                    warn!("Job {id}: {e}");
                }
                let (kill_tx, kill_rx) = oneshot::channel();
                tokio::spawn(supervise(
                    id.clone(),
                    child,
                    st,
                    kill_rx,
                    self.events_tx.clone(),
                ));
                self.write_record(&record);
                self.active.insert(
                    id.clone(),
                    ActiveJob {
                        record,
                        stream: StreamState::default(),
                        plan,
                        kill: Some(kill_tx),
                    },
                );
            }
            Err(source) => {
                let e = Error::Spawn {
                    program: self.tools.ytdlp.clone(),
                    source,
                };
                error!("Job {id}: {e}");
                let message = e.to_string();
                if let Err(e) = record.fail(message.clone()) {
                    warn!("Job {id}: {e}");
                }
                self.write_record(&record);
                self.notify(Notification::Error { id: id.clone(), message });
            }
        }
        id
    }

    fn handle_line(&mut self, id: &JobId, line: &str) {
        let Some(job) = self.active.get_mut(id) else {
            trace!("Dropping output of inactive job {id}");
            return;
        };
        let step = parser::advance(job.stream, line);
        job.stream = step.state;
        if let Some(path) = step.destination {
            debug!("Job {id} writes to {path:?}");
            job.record.file_path = Some(path);
        }
        let note = match step.event {
            Some(StreamEvent::Converting) => match job.record.transition(JobStatus::Converting) {
                Ok(()) => Some(Notification::Progress {
                    id: id.clone(),
                    progress: job.record.progress,
                    status: JobStatus::Converting,
                }),
                Err(e) => {
                    warn!("Job {id}: {e}");
                    None
                }
            },
            Some(StreamEvent::Downloading(percent)) => {
                job.record.advance_progress(percent);
                Some(Notification::Progress {
                    id: id.clone(),
                    progress: job.record.progress,
                    status: job.record.status,
                })
            }
            None => None,
        };
        if let Some(note) = note {
            let record = job.record.clone();
            self.write_record(&record);
            self.notify(note);
        }
    }

    async fn finish_job(&mut self, id: JobId, reason: ExitReason) {
        let Some(mut job) = self.active.remove(&id) else {
            debug!("Job {id} is no longer tracked, ignoring exit ({reason})");
            return;
        };
        let note = match reason.into_result() {
            Ok(()) => {
                if let Some(path) = locate_output(&job.plan, job.record.file_path.as_deref()).await {
                    job.record.file_path = Some(path);
                }
                if let Err(e) = job.record.transition(JobStatus::Complete) {
                    warn!("Job {id}: {e}");
                }
                info!("Job {id} complete: {:?}", job.record.file_path);
                Notification::Complete {
                    id: id.clone(),
                    file_path: job.record.file_path.clone(),
                    format: job.record.format,
                }
            }
            Err(e) => {
                error!("Job {id} failed: {e}");
                if let Err(e) = job.record.fail(FAILED_MESSAGE) {
                    warn!("Job {id}: {e}");
                }
                Notification::Error {
                    id: id.clone(),
                    message: FAILED_MESSAGE.into(),
                }
            }
        };
        self.write_record(&job.record);
        self.notify(note);
    }

    /// Stops the job if it is running and marks it cancelled. Cancelling a
    /// finished job changes nothing.
    pub fn cancel_job(&mut self, id: &JobId) -> Result<Vec<JobRecord>, StoreError> {
        let cancelled = self.active.remove(id).and_then(|mut job| {
            job.kill();
            job.record.transition(JobStatus::Cancelled).ok()?;
            Some(job.record)
        });
        let mut history = self.store.history();
        let Some(slot) = history.iter_mut().find(|r| &r.id == id) else {
            return Ok(history);
        };
        match cancelled {
            Some(record) => *slot = record,
            None => {
                if let Err(e) = slot.transition(JobStatus::Cancelled) {
                    debug!("Not cancelling job {id}: {e}");
                    return Ok(history);
                }
            }
        }
        info!("Job {id} cancelled");
        self.store.replace_history(history.clone())?;
        Ok(history)
    }

    /// Forgets a job and removes its file if there is one
    pub fn delete_job(&mut self, id: &JobId) -> Result<Vec<JobRecord>, StoreError> {
        if let Some(mut job) = self.active.remove(id) {
            job.kill();
        }
        let mut history = self.store.history();
        if let Some(record) = history.iter().find(|r| &r.id == id) {
            remove_output(record);
        }
        history.retain(|r| &r.id != id);
        self.store.replace_history(history.clone())?;
        Ok(history)
    }

    /// Empties the history and stops running jobs. Downloaded files stay on
    /// disk.
    pub fn clear_history(&mut self) -> Result<Vec<JobRecord>, StoreError> {
        for (_, mut job) in self.active.drain() {
            job.kill();
        }
        self.store.replace_history(Vec::new())?;
        Ok(Vec::new())
    }
}

/// Best effort, a file that is already gone is fine
fn remove_output(record: &JobRecord) {
    let Some(path) = &record.file_path else {
        return;
    };
    match std::fs::remove_file(path) {
        Ok(()) => debug!("Removed {path:?}"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("Could not remove {path:?}: {e}"),
    }
}

async fn is_file(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .map(|m| m.is_file())
        .unwrap_or(false)
}

fn has_extension(path: &Path, ext: &str) -> bool {
    path.extension().is_some_and(|e| e == ext)
}

/// Newest file in `dir` with the given extension
async fn newest_with_extension(dir: &Path, ext: &str) -> Option<PathBuf> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) => {
            warn!("Could not scan {dir:?}: {e}");
            return None;
        }
    };
    let mut best: Option<(PathBuf, std::time::SystemTime)> = None;
    while let Ok(Some(entry)) = entries.next_entry().await {
        let path = entry.path();
        if !has_extension(&path, ext) {
            continue;
        }
        let Ok(meta) = entry.metadata().await else {
            continue;
        };
        let Ok(modified) = meta.modified() else {
            continue;
        };
        if !meta.is_file() {
            continue;
        }
        match &best {
            Some((_, t)) if *t >= modified => {}
            _ => best = Some((path, modified)),
        }
    }
    best.map(|(p, _)| p)
}

/// Finds the file a finished job produced: the path we asked for, else the
/// path the tool reported, else the newest file of the right type
async fn locate_output(plan: &DownloadPlan, reported: Option<&Path>) -> Option<PathBuf> {
    if is_file(&plan.predicted_path).await {
        return Some(plan.predicted_path.clone());
    }
    if let Some(reported) = reported {
        if has_extension(reported, plan.extension()) && is_file(reported).await {
            return Some(reported.to_path_buf());
        }
    }
    newest_with_extension(&plan.output_dir, plan.extension()).await
}
