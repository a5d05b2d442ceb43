use crate::commands::Request;
use crate::orchestrator::{Handle, Notification};
use crate::*;
use serde_json::{json, Value};
use std::path::Path;
use std::str::FromStr;
use tokio::{
    io::{AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader},
    net::{UnixListener, UnixStream},
    select,
    sync::broadcast::{self, error::RecvError},
};
mod parser;

pub async fn server(
    socket: UnixListener,
    handle: Handle,
    updates: broadcast::Sender<Notification>,
) -> Result<(), std::io::Error> {
    loop {
        let (stream, _) = socket.accept().await?;
        debug!("Control client connected");
        let handle = handle.clone();
        let updates = updates.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_stream(stream, handle, updates).await {
                debug!("Control client went away: {e}");
            }
        });
    }
}

async fn write_json(w: &mut (impl AsyncWrite + Unpin), value: &Value) -> std::io::Result<()> {
    let mut line = value.to_string();
    line.push('\n');
    w.write_all(line.as_bytes()).await?;
    w.flush().await
}

/// Answers one request per line. After `watch` the connection only carries
/// notifications until the client hangs up.
pub async fn handle_stream(
    stream: UnixStream,
    handle: Handle,
    updates: broadcast::Sender<Notification>,
) -> Result<(), std::io::Error> {
    let (read, mut write) = stream.into_split();
    let mut client = BufReader::new(read).lines();
    while let Some(line) = client.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let Ok(request) = Request::from_str(&line) else {
            write_json(&mut write, &json!({ "error": format!("unknown command: {}", line.trim()) }))
                .await?;
            continue;
        };
        if request == Request::Watch {
            let mut rx = updates.subscribe();
            write_json(&mut write, &json!({ "ok": "watching" })).await?;
            loop {
                select! {
                    note = rx.recv() => match note {
                        Ok(note) => {
                            let value = serde_json::to_value(&note).unwrap_or(Value::Null);
                            write_json(&mut write, &value).await?;
                        }
                        Err(RecvError::Lagged(n)) => warn!("Watcher skipped {n} notifications"),
                        Err(RecvError::Closed) => return Ok(()),
                    },
                    line = client.next_line() => {
                        // anything but end of input is ignored while watching
                        if line?.is_none() {
                            return Ok(());
                        }
                    }
                }
            }
        }
        let reply = match execute(request, &handle).await {
            Ok(value) => json!({ "ok": value }),
            Err(message) => json!({ "error": message }),
        };
        write_json(&mut write, &reply).await?;
    }
    Ok(())
}

/// Jobs are only started for something that parses as an absolute url
fn checked_url(raw: &str) -> Result<(), String> {
    url::Url::parse(raw)
        .map(|_| ())
        .map_err(|e| format!("invalid url {raw:?}: {e}"))
}

async fn execute(request: Request, handle: &Handle) -> Result<Value, String> {
    let as_json = |v: Result<Value, serde_json::Error>| v.map_err(|e| e.to_string());
    match request {
        Request::Add(url) => {
            checked_url(&url)?;
            let meta = handle.fetch_metadata(url.as_str()).await.map_err(|e| e.to_string())?;
            let id = handle
                .start_job(url, meta.title.clone(), meta.thumbnail.clone())
                .await
                .map_err(|e| e.to_string())?;
            Ok(json!({ "id": id, "title": meta.title }))
        }
        Request::Start { url, title } => {
            checked_url(&url)?;
            let id = handle.start_job(url, title, None).await.map_err(|e| e.to_string())?;
            Ok(json!({ "id": id }))
        }
        Request::Info(url) => {
            checked_url(&url)?;
            let meta = handle.fetch_metadata(url).await.map_err(|e| e.to_string())?;
            as_json(serde_json::to_value(meta))
        }
        Request::Cancel(id) => {
            let jobs = handle.cancel_job(id).await.map_err(|e| e.to_string())?;
            as_json(serde_json::to_value(jobs))
        }
        Request::Delete(id) => {
            let jobs = handle.delete_job(id).await.map_err(|e| e.to_string())?;
            as_json(serde_json::to_value(jobs))
        }
        Request::Clear => {
            let jobs = handle.clear_history().await.map_err(|e| e.to_string())?;
            as_json(serde_json::to_value(jobs))
        }
        Request::List(filter) => {
            let mut jobs = handle.get_all_jobs().await.map_err(|e| e.to_string())?;
            jobs.retain(|r| filter.matches(r));
            as_json(serde_json::to_value(jobs))
        }
        Request::Settings => {
            let settings = handle.settings().await.map_err(|e| e.to_string())?;
            as_json(serde_json::to_value(settings))
        }
        Request::Set { key, value } => {
            let mut settings = handle.settings().await.map_err(|e| e.to_string())?;
            settings.set(&key, &value)?;
            handle
                .save_settings(settings.clone())
                .await
                .map_err(|e| e.to_string())?;
            as_json(serde_json::to_value(settings))
        }
        Request::Watch => Ok(json!("watching")),
    }
}

pub async fn prep_socket_path(path: impl AsRef<Path>) -> std::io::Result<()> {
    let path = path.as_ref();
    if let Ok(true) = tokio::fs::try_exists(path).await {
        tokio::fs::remove_file(path).await?;
    }
    Ok(())
}

#[cfg(all(test, unix))]
mod checks {
    use super::*;
    use crate::job::{JobId, JobRecord, JobStatus};
    use crate::orchestrator::{self, Orchestrator};
    use crate::settings::{Format, Settings};
    use crate::store::{MemoryStore, Store};
    use crate::ytdlp::ToolPaths;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
    use tokio::net::unix::OwnedReadHalf;

    struct Client {
        lines: Lines<BufReader<OwnedReadHalf>>,
        write: tokio::net::unix::OwnedWriteHalf,
        _out: tempfile::TempDir,
    }

    impl Client {
        async fn ask(&mut self, line: &str) -> Value {
            self.write.write_all(format!("{line}\n").as_bytes()).await.unwrap();
            self.next().await
        }
        async fn next(&mut self) -> Value {
            let line = self.lines.next_line().await.unwrap().unwrap();
            serde_json::from_str(&line).unwrap()
        }
    }

    fn finished(id: &str) -> JobRecord {
        let mut r = JobRecord::new(
            JobId::from(id),
            "https://soundcloud.com/a".into(),
            Some("old".into()),
            None,
            Format::Audio,
            chrono::Utc::now(),
        );
        r.transition(JobStatus::Downloading).unwrap();
        r.transition(JobStatus::Complete).unwrap();
        r
    }

    fn connect() -> (Client, broadcast::Sender<Notification>) {
        let out = tempfile::tempdir().unwrap();
        let mut store = MemoryStore::with_settings(Settings {
            output_dir: out.path().to_path_buf(),
            ..Settings::default()
        });
        store.replace_history(vec![finished("5")]).unwrap();
        let tools = ToolPaths {
            ytdlp: "/definitely/not/here/yt-dlp".into(),
            ffmpeg: "/definitely/not/here/ffmpeg".into(),
        };
        let (updates, _) = broadcast::channel(64);
        let (handle, cmd_rx) = orchestrator::channel();
        tokio::spawn(Orchestrator::new(store, tools, updates.clone()).run(cmd_rx));
        let (ours, theirs) = UnixStream::pair().unwrap();
        tokio::spawn(handle_stream(theirs, handle, updates.clone()));
        let (read, write) = ours.into_split();
        let client = Client {
            lines: BufReader::new(read).lines(),
            write,
            _out: out,
        };
        (client, updates)
    }

    #[tokio::test]
    async fn check_list_and_filters() {
        let (mut c, _) = connect();
        let all = c.ask("list").await;
        assert_eq!(all["ok"][0]["id"], "5");
        assert_eq!(all["ok"][0]["status"], "complete");
        assert_eq!(c.ask("list complete").await["ok"].as_array().unwrap().len(), 1);
        assert_eq!(c.ask("list error").await["ok"].as_array().unwrap().len(), 0);
    }

    #[tokio::test]
    async fn check_unknown_command() {
        let (mut c, _) = connect();
        let reply = c.ask("make coffee").await;
        assert!(reply["error"].as_str().unwrap().contains("make coffee"));
        // the connection survives a bad line
        assert!(reply.get("ok").is_none());
        assert!(c.ask("list").await.get("ok").is_some());
    }

    #[tokio::test]
    async fn check_settings_roundtrip() {
        let (mut c, _) = connect();
        assert_eq!(c.ask("settings").await["ok"]["downloadFormat"], "audio");
        let reply = c.ask("set downloadFormat mp4").await;
        assert_eq!(reply["ok"]["downloadFormat"], "video");
        assert_eq!(c.ask("settings").await["ok"]["downloadFormat"], "video");
        let reply = c.ask("set colour blue").await;
        assert!(reply["error"].as_str().unwrap().contains("colour"));
    }

    #[tokio::test]
    async fn check_start_fails_without_tool() {
        let (mut c, _) = connect();
        let reply = c.ask("start https://youtu.be/zz Some Title").await;
        let id = reply["ok"]["id"].as_str().unwrap().to_string();
        let jobs = c.ask("list error").await;
        assert_eq!(jobs["ok"][0]["id"], id.as_str());
        assert_eq!(jobs["ok"][0]["title"], "Some Title");
        assert_eq!(jobs["ok"][0]["platform"], "YouTube");
    }

    #[tokio::test]
    async fn check_non_urls_are_refused() {
        let (mut c, _) = connect();
        for line in ["start not-a-url Title", "add youtube", "info /just/a/path"] {
            let reply = c.ask(line).await;
            assert!(reply["error"].as_str().unwrap().contains("invalid url"), "{line}");
        }
        // no job was created
        let jobs = c.ask("list").await;
        assert_eq!(jobs["ok"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn check_cancel_finished_and_delete() {
        let (mut c, _) = connect();
        let reply = c.ask("cancel 5").await;
        assert_eq!(reply["ok"][0]["status"], "complete");
        let reply = c.ask("delete 5").await;
        assert_eq!(reply["ok"], json!([]));
    }

    #[tokio::test]
    async fn check_watch_streams_notifications() {
        let (mut c, updates) = connect();
        assert_eq!(c.ask("watch").await["ok"], "watching");
        updates
            .send(Notification::Error {
                id: "77".into(),
                message: "Download failed".into(),
            })
            .unwrap();
        let note = c.next().await;
        assert_eq!(note["type"], "error");
        assert_eq!(note["id"], "77");
        assert_eq!(note["message"], "Download failed");
    }
}
