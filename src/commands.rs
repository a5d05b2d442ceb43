use crate::job::{JobId, JobRecord, JobStatus};

/// A request read from a control socket line
#[derive(PartialEq, Debug, Clone)]
pub enum Request {
    /// Look the url up first, then start it with the title found
    Add(String),
    Start { url: String, title: Option<String> },
    Info(String),
    Cancel(JobId),
    Delete(JobId),
    Clear,
    List(ListFilter),
    Settings,
    Set { key: String, value: String },
    Watch,
}

#[derive(PartialEq, Eq, Debug, Clone, Copy, Default)]
pub enum ListFilter {
    #[default]
    All,
    Complete,
    Error,
    Active,
}

impl ListFilter {
    pub fn matches(self, record: &JobRecord) -> bool {
        match self {
            ListFilter::All => true,
            ListFilter::Complete => record.status == JobStatus::Complete,
            ListFilter::Error => record.status == JobStatus::Error,
            ListFilter::Active => record.status.is_active(),
        }
    }
}
