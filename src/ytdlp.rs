pub mod parser;

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::{Error, Result};
use crate::settings::{Format, Settings};
use crate::*;

/// Ceiling on the json `--dump-json` may print for a single item
const METADATA_LIMIT: u64 = 10 * 1024 * 1024;
/// How much of the tool's stderr is kept for the error message
const STDERR_KEEP: usize = 64 * 1024;
const TITLE_LIMIT: usize = 100;

/// Where the bundled binaries live
#[derive(Debug, Clone)]
pub struct ToolPaths {
    pub ytdlp: PathBuf,
    pub ffmpeg: PathBuf,
}

impl ToolPaths {
    /// Directory handed to `--ffmpeg-location`
    fn ffmpeg_dir(&self) -> &Path {
        match self.ffmpeg.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        }
    }
}

/// Everything needed to run one download
#[derive(Debug, Clone, PartialEq)]
pub struct DownloadPlan {
    pub args: Vec<String>,
    pub format: Format,
    pub output_dir: PathBuf,
    /// Where the file should end up if the tool names it the way we asked
    pub predicted_path: PathBuf,
}

impl DownloadPlan {
    pub fn extension(&self) -> &'static str {
        self.format.extension()
    }
}

/// Strips characters that are not allowed in file names on common systems
pub fn safe_title(title: Option<&str>) -> String {
    let cleaned: String = title
        .unwrap_or("audio")
        .chars()
        .filter(|c| !matches!(c, '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*'))
        .take(TITLE_LIMIT)
        .collect();
    if cleaned.trim().is_empty() {
        "audio".into()
    } else {
        cleaned
    }
}

/// Parses a height ceiling such as "720" or "1080p". `None` means no ceiling.
fn height_ceiling(quality: &str) -> Option<u32> {
    let q = quality.trim();
    if q.is_empty() || q.eq_ignore_ascii_case("best") {
        return None;
    }
    match q.trim_end_matches(['p', 'P']).parse::<u32>() {
        Ok(h) if h > 0 => Some(h),
        _ => {
            warn!("Unrecognised video quality {quality:?}, using best");
            None
        }
    }
}

fn video_selector(quality: &str) -> String {
    match height_ceiling(quality) {
        Some(h) => format!(
            "bestvideo[height<={h}][ext=mp4]+bestaudio[ext=m4a]/best[height<={h}][ext=mp4]/best"
        ),
        None => "bestvideo[ext=mp4]+bestaudio[ext=m4a]/best[ext=mp4]/best".into(),
    }
}

/// Builds the yt-dlp arguments for one job from a settings snapshot
pub fn plan_download(
    url: &str,
    title: Option<&str>,
    settings: &Settings,
    tools: &ToolPaths,
) -> DownloadPlan {
    let format = settings.download_format;
    let output_dir = settings.output_dir.clone();
    let stem = safe_title(title);
    let predicted_path = output_dir.join(format!("{stem}.{}", format.extension()));
    let template = output_dir.join(format!("{stem}.%(ext)s"));

    let mut args = vec![
        "--ffmpeg-location".to_string(),
        tools.ffmpeg_dir().to_string_lossy().into_owned(),
    ];
    match format {
        Format::Audio => {
            let quality = match settings.audio_quality.trim() {
                "" => "192",
                q => q,
            };
            args.extend(
                ["-x", "--audio-format", "mp3", "--audio-quality", quality].map(String::from),
            );
        }
        Format::Video => {
            args.push("-f".into());
            args.push(video_selector(&settings.video_quality));
            args.push("--merge-output-format".into());
            args.push("mp4".into());
        }
    }
    args.push("-o".into());
    args.push(template.to_string_lossy().into_owned());
    args.extend(["--no-playlist", "--newline", "--progress"].map(String::from));
    args.push(url.to_string());

    DownloadPlan {
        args,
        format,
        output_dir,
        predicted_path,
    }
}

pub fn ytdlp_command(tools: &ToolPaths, plan: &DownloadPlan) -> tokio::process::Command {
    let mut c = tokio::process::Command::new(&tools.ytdlp);
    c.args(&plan.args)
        .env("PYTHONIOENCODING", "utf-8")
        .stdin(Stdio::null())
        .kill_on_drop(true);
    c
}

/// Normalised `--dump-json` output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    pub id: Option<String>,
    pub title: Option<String>,
    pub thumbnail: Option<String>,
    pub duration: Option<f64>,
    pub channel: Option<String>,
    pub url: String,
}

#[derive(Deserialize)]
struct RawInfo {
    id: Option<String>,
    title: Option<String>,
    thumbnail: Option<String>,
    duration: Option<f64>,
    uploader: Option<String>,
    channel: Option<String>,
}

impl Metadata {
    pub fn from_json(url: &str, json: &[u8]) -> Result<Self> {
        let raw: RawInfo = serde_json::from_slice(json).map_err(Error::MetadataParse)?;
        Ok(Self {
            id: raw.id,
            title: raw.title,
            thumbnail: raw.thumbnail,
            duration: raw.duration,
            channel: raw.uploader.or(raw.channel),
            url: url.to_string(),
        })
    }
}

/// Reads `r` to the end but keeps only the first `keep` bytes
async fn read_capped(mut r: impl AsyncRead + Unpin, keep: usize) -> std::io::Result<Vec<u8>> {
    let mut kept = Vec::new();
    let mut chunk = [0u8; 8192];
    loop {
        let n = r.read(&mut chunk).await?;
        if n == 0 {
            return Ok(kept);
        }
        let room = keep.saturating_sub(kept.len());
        kept.extend_from_slice(&chunk[..n.min(room)]);
    }
}

/// Asks the tool for a single item's metadata and waits for the whole answer
pub async fn fetch_metadata(tools: &ToolPaths, url: &str) -> Result<Metadata> {
    debug!("Fetching metadata for {url}");
    let mut child = tokio::process::Command::new(&tools.ytdlp)
        .args(["--dump-json", "--no-playlist", url])
        .env("PYTHONIOENCODING", "utf-8")
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| Error::MetadataFetch(format!("could not start {:?}: {e}", tools.ytdlp)))?;

    let io_failure = |e: std::io::Error| Error::MetadataFetch(e.to_string());
    let mut out = child
        .stdout
        .take()
        .ok_or_else(|| Error::MetadataFetch("stdout not captured".into()))?
        .take(METADATA_LIMIT + 1);
    let err = child
        .stderr
        .take()
        .ok_or_else(|| Error::MetadataFetch("stderr not captured".into()))?;
    // stderr is drained on its own task so a chatty tool can never fill the pipe
    let stderr_task = tokio::spawn(read_capped(err, STDERR_KEEP));
    let mut stdout = Vec::new();
    if let Err(e) = out.read_to_end(&mut stdout).await {
        _ = child.kill().await;
        stderr_task.abort();
        return Err(io_failure(e));
    }

    if stdout.len() as u64 > METADATA_LIMIT {
        _ = child.kill().await;
        stderr_task.abort();
        return Err(Error::MetadataFetch(format!(
            "metadata output exceeded {METADATA_LIMIT} bytes"
        )));
    }

    let status = child.wait().await.map_err(io_failure)?;
    let stderr = match stderr_task.await {
        Ok(Ok(bytes)) => bytes,
        Ok(Err(e)) => return Err(io_failure(e)),
        Err(e) => return Err(Error::MetadataFetch(e.to_string())),
    };
    if !status.success() {
        let stderr = String::from_utf8_lossy(&stderr);
        let message = match stderr.trim() {
            "" => format!("yt-dlp exited with {status}"),
            s => s.to_string(),
        };
        return Err(Error::MetadataFetch(message));
    }
    Metadata::from_json(url, &stdout)
}
