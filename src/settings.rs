use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Format {
    #[default]
    #[serde(alias = "mp3")]
    Audio,
    #[serde(alias = "mp4")]
    Video,
}

impl Format {
    /// Extension of the file the tool leaves behind once it is done
    pub fn extension(self) -> &'static str {
        match self {
            Format::Audio => "mp3",
            Format::Video => "mp4",
        }
    }
}

impl std::str::FromStr for Format {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "audio" | "mp3" => Ok(Format::Audio),
            "video" | "mp4" => Ok(Format::Video),
            _ => Err(format!("unknown format {s:?}")),
        }
    }
}

impl std::fmt::Display for Format {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Format::Audio => write!(f, "audio"),
            Format::Video => write!(f, "video"),
        }
    }
}

/// User preferences, read from the store every time a job starts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    pub output_dir: PathBuf,
    pub download_format: Format,
    pub audio_quality: String,
    pub video_quality: String,
    pub show_splash: bool,
    pub minimize_to_tray: bool,
}

impl Default for Settings {
    fn default() -> Self {
        let downloads = dirs::download_dir()
            .or_else(dirs::home_dir)
            .unwrap_or_else(|| PathBuf::from("."));
        Self {
            output_dir: downloads.join("Video2MP3"),
            download_format: Format::Audio,
            audio_quality: "192".into(),
            video_quality: "best".into(),
            show_splash: true,
            minimize_to_tray: true,
        }
    }
}

impl Settings {
    /// Applies one `key value` pair as sent over the control socket
    pub fn set(&mut self, key: &str, value: &str) -> Result<(), String> {
        match key {
            "outputDir" | "output_dir" => self.output_dir = PathBuf::from(value),
            "format" | "downloadFormat" => self.download_format = value.parse()?,
            "audioQuality" | "audio_quality" => self.audio_quality = value.to_string(),
            "videoQuality" | "video_quality" => self.video_quality = value.to_string(),
            "showSplash" | "show_splash" => self.show_splash = parse_flag(value)?,
            "minimizeToTray" | "minimize_to_tray" => self.minimize_to_tray = parse_flag(value)?,
            _ => return Err(format!("unknown setting {key:?}")),
        }
        Ok(())
    }
}

fn parse_flag(value: &str) -> Result<bool, String> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "yes" | "on" | "1" => Ok(true),
        "false" | "no" | "off" | "0" => Ok(false),
        _ => Err(format!("expected a boolean, got {value:?}")),
    }
}
