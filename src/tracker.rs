use crate::job::{JobRecord, JobStatus};
use crate::orchestrator::Notification;
use askama::Template;

/// One line of the board, everything already formatted for display
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    pub id: String,
    pub title: String,
    pub platform: String,
    pub format: String,
    pub status: String,
    /// Lowercase status name, used as a css class
    pub state: String,
    pub percent: u32,
}

#[derive(Template, Default)]
#[template(path = "board.html")]
pub struct Board {
    pub rows: Vec<Row>,
}

/// Mirror of the job history, kept current from notifications
#[derive(Debug, Default)]
pub struct Tracker {
    jobs: Vec<JobRecord>,
}

pub fn status_text(record: &JobRecord) -> String {
    match record.status {
        JobStatus::Pending => "Starting...".into(),
        JobStatus::Downloading => format!("Downloading {:.0}%", record.progress),
        JobStatus::Converting => format!(
            "Converting to {}...",
            record.format.extension().to_uppercase()
        ),
        JobStatus::Complete => "Completed".into(),
        JobStatus::Error => "Failed".into(),
        JobStatus::Cancelled => "Cancelled".into(),
    }
}

impl Tracker {
    pub fn new(jobs: Vec<JobRecord>) -> Self {
        Self { jobs }
    }

    pub fn jobs(&self) -> &[JobRecord] {
        &self.jobs
    }

    pub fn update(&mut self, note: Notification) {
        use Notification::*;
        match note {
            History { jobs } => self.jobs = jobs,
            Progress {
                id,
                progress,
                status,
            } => {
                if let Some(r) = self.jobs.iter_mut().find(|r| r.id == id) {
                    r.status = status;
                    r.progress = progress;
                }
            }
            Complete { id, file_path, .. } => {
                if let Some(r) = self.jobs.iter_mut().find(|r| r.id == id) {
                    r.status = JobStatus::Complete;
                    r.progress = 100.0;
                    r.file_path = file_path;
                }
            }
            Error { id, message } => {
                if let Some(r) = self.jobs.iter_mut().find(|r| r.id == id) {
                    r.status = JobStatus::Error;
                    r.error = Some(message);
                }
            }
        }
    }

    pub fn board(&self) -> Board {
        let rows = self
            .jobs
            .iter()
            .map(|r| Row {
                id: r.id.to_string(),
                title: r.title.clone(),
                platform: r.platform.clone(),
                format: r.format.extension().to_uppercase(),
                status: status_text(r),
                state: r.status.to_string(),
                percent: r.progress.clamp(0.0, 100.0).round() as u32,
            })
            .collect();
        Board { rows }
    }
}

#[cfg(test)]
mod checks {
    use super::*;
    use crate::settings::Format;

    fn record(id: &str, title: &str, format: Format) -> JobRecord {
        JobRecord::new(
            id.into(),
            "https://www.youtube.com/watch?v=1".into(),
            Some(title.into()),
            None,
            format,
            chrono::Utc::now(),
        )
    }

    #[test]
    fn check_status_texts() {
        let mut r = record("1", "t", Format::Audio);
        assert_eq!(status_text(&r), "Starting...");
        r.transition(JobStatus::Downloading).unwrap();
        r.advance_progress(45.0);
        assert_eq!(status_text(&r), "Downloading 45%");
        r.transition(JobStatus::Converting).unwrap();
        assert_eq!(status_text(&r), "Converting to MP3...");
        r.transition(JobStatus::Complete).unwrap();
        assert_eq!(status_text(&r), "Completed");
        let mut v = record("2", "t", Format::Video);
        v.transition(JobStatus::Downloading).unwrap();
        v.transition(JobStatus::Converting).unwrap();
        assert_eq!(status_text(&v), "Converting to MP4...");
        v.fail("Download failed").unwrap();
        assert_eq!(status_text(&v), "Failed");
    }
    #[test]
    fn check_updates() {
        let mut t = Tracker::new(vec![record("2", "b", Format::Audio), record("1", "a", Format::Audio)]);
        t.update(Notification::Progress {
            id: "1".into(),
            progress: 12.5,
            status: JobStatus::Downloading,
        });
        t.update(Notification::Error {
            id: "2".into(),
            message: "Download failed".into(),
        });
        // unknown ids are ignored
        t.update(Notification::Complete {
            id: "9".into(),
            file_path: None,
            format: Format::Audio,
        });
        let board = t.board();
        assert_eq!(board.rows[0].status, "Failed");
        assert_eq!(board.rows[0].state, "error");
        assert_eq!(board.rows[1].percent, 13);
        t.update(Notification::History { jobs: Vec::new() });
        assert!(t.jobs().is_empty());
    }
    #[test]
    fn check_render_escapes_titles() {
        let mut t = Tracker::new(vec![record("1", "<b>loud</b>", Format::Audio)]);
        t.update(Notification::Complete {
            id: "1".into(),
            file_path: Some("/out/loud.mp3".into()),
            format: Format::Audio,
        });
        let html = t.board().render().unwrap();
        assert!(html.contains("&lt;b&gt;loud"));
        assert!(!html.contains("<b>loud"));
        assert!(html.contains("Completed"));
        assert!(html.contains("YouTube"));
    }
    #[test]
    fn check_render_empty() {
        let html = Tracker::default().board().render().unwrap();
        assert!(html.contains("No downloads yet"));
    }
}
