//! Core data model shared by the resolver, executor and batch coordinator.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::TaskFailure;

pub const DEFAULT_SUBTITLE_LANGUAGES: [&str; 4] = ["az", "en", "fa", "tr"];
pub const DEFAULT_MAX_RESOLUTION: u32 = 1080;
pub const UNKNOWN_UPLOADER: &str = "unknown";

/// Live state reported by the listing capability. Only upcoming premieres
/// change behaviour; everything else downloads normally.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LiveStatus {
    #[default]
    NotLive,
    IsUpcoming,
    IsLive,
    WasLive,
    PostLive,
}

impl LiveStatus {
    pub fn from_label(label: Option<&str>) -> Self {
        match label.map(str::trim) {
            Some("is_upcoming") => LiveStatus::IsUpcoming,
            Some("is_live") => LiveStatus::IsLive,
            Some("was_live") => LiveStatus::WasLive,
            Some("post_live") => LiveStatus::PostLive,
            _ => LiveStatus::NotLive,
        }
    }
}

/// One downloadable remote item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RemoteItemRef {
    pub remote_id: String,
    pub url: String,
    pub title: String,
    pub uploader: String,
    /// 1-indexed position inside the parent collection (1 for standalone items).
    pub position: usize,
    pub live_status: LiveStatus,
}

impl RemoteItemRef {
    /// Builds a reference, filling missing title/uploader with stable fallbacks.
    pub fn new(
        remote_id: impl Into<String>,
        url: impl Into<String>,
        title: Option<String>,
        uploader: Option<String>,
        position: usize,
    ) -> Self {
        let remote_id = remote_id.into();
        let title = title
            .filter(|value| !value.trim().is_empty())
            .unwrap_or_else(|| remote_id.clone());
        let uploader = uploader
            .filter(|value| !value.trim().is_empty())
            .unwrap_or_else(|| UNKNOWN_UPLOADER.to_owned());
        Self {
            remote_id,
            url: url.into(),
            title,
            uploader,
            position,
            live_status: LiveStatus::NotLive,
        }
    }

    pub fn with_live_status(mut self, status: LiveStatus) -> Self {
        self.live_status = status;
        self
    }
}

/// A remote, ordered and mutable collection (playlist).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CollectionRef {
    pub remote_id: String,
    pub url: String,
    pub title: String,
    pub uploader: String,
    /// 1-indexed; members below this position are skipped.
    pub start: usize,
    /// Member count when the listing reports it up front.
    pub member_count: Option<usize>,
}

/// Policy flags shared by every task of a batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskPolicy {
    pub force_download: bool,
    pub skip_download: bool,
    pub reverse_download: bool,
}

/// Per-call options of [`crate::downloader::Downloader::download_video`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DownloadOptions {
    /// Offset applied to references that do not carry their own.
    pub playlist_start: usize,
    pub skip_download: bool,
    pub force_download: bool,
    pub reverse_download: bool,
    /// Keep a [`TaskReport`] for every task. Turn off for very large batches;
    /// counts and failures are always kept.
    pub task_reports: bool,
}

impl Default for DownloadOptions {
    fn default() -> Self {
        Self {
            playlist_start: 1,
            skip_download: false,
            force_download: false,
            reverse_download: false,
            task_reports: true,
        }
    }
}

impl DownloadOptions {
    pub fn policy(&self) -> TaskPolicy {
        TaskPolicy {
            force_download: self.force_download,
            skip_download: self.skip_download,
            reverse_download: self.reverse_download,
        }
    }
}

/// The unit of work handed to the executor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DownloadTask {
    pub item: RemoteItemRef,
    /// Directory name under the save directory (`{Title}_{Uploader}`).
    pub folder: String,
    /// 1-indexed position within the filtered, possibly reversed, sequence.
    pub sequence: usize,
    /// Reference the task was resolved from, kept for reporting.
    pub source: String,
    pub languages: Vec<String>,
    pub max_resolution: u32,
    pub policy: TaskPolicy,
}

impl DownloadTask {
    /// `NN_{ItemTitle}`, the stem every artifact of this task shares.
    pub fn file_stem(&self) -> String {
        format!(
            "{:02}_{}",
            self.sequence,
            crate::sanitize::sanitize_with_id(&self.item.title, &self.item.remote_id)
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum SkipReason {
    AlreadyCompleted,
    UpcomingPremiere,
}

/// Result of fetching one subtitle language.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "kebab-case")]
pub enum SubtitleState {
    Written { srt: PathBuf, txt: PathBuf },
    Unavailable,
    Failed { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubtitleReport {
    pub language: String,
    #[serde(flatten)]
    pub state: SubtitleState,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DownloadReport {
    pub directory: PathBuf,
    /// Files produced by the media fetch; empty when media was skipped.
    pub media: Vec<PathBuf>,
    pub subtitles: Vec<SubtitleReport>,
}

impl DownloadReport {
    pub fn unavailable_languages(&self) -> impl Iterator<Item = &str> {
        self.subtitles
            .iter()
            .filter(|report| report.state == SubtitleState::Unavailable)
            .map(|report| report.language.as_str())
    }
}

/// Per-task outcome.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "kebab-case")]
pub enum Outcome {
    Skipped { reason: SkipReason },
    Downloaded(DownloadReport),
    Failed(TaskFailure),
}

/// A failure row in the batch summary.
#[derive(Debug, Clone, Serialize)]
pub struct FailureEntry {
    pub reference: String,
    pub remote_id: Option<String>,
    pub failure: TaskFailure,
}

/// Aggregated outcome of one `download_video` call.
#[derive(Debug, Clone, Serialize)]
pub struct BatchResult {
    pub skipped: usize,
    pub downloaded: usize,
    pub failed: usize,
    pub failures: Vec<FailureEntry>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub reports: Vec<TaskReport>,
    #[serde(skip)]
    keep_reports: bool,
}

impl Default for BatchResult {
    fn default() -> Self {
        Self::new(true)
    }
}

/// Outcome of one task together with what it was.
#[derive(Debug, Clone, Serialize)]
pub struct TaskReport {
    pub remote_id: String,
    /// Absent when the item was skipped before it was resolved.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_stem: Option<String>,
    pub outcome: Outcome,
}

impl BatchResult {
    /// With `keep_reports` off only counts and failures accumulate.
    pub fn new(keep_reports: bool) -> Self {
        Self {
            skipped: 0,
            downloaded: 0,
            failed: 0,
            failures: Vec::new(),
            reports: Vec::new(),
            keep_reports,
        }
    }

    fn push_report(&mut self, report: TaskReport) {
        if self.keep_reports {
            self.reports.push(report);
        }
    }

    pub fn record(&mut self, task: &DownloadTask, outcome: Outcome) {
        match &outcome {
            Outcome::Skipped { .. } => self.skipped += 1,
            Outcome::Downloaded(_) => self.downloaded += 1,
            Outcome::Failed(failure) => {
                self.failed += 1;
                self.failures.push(FailureEntry {
                    reference: task.source.clone(),
                    remote_id: Some(task.item.remote_id.clone()),
                    failure: failure.clone(),
                });
            }
        }
        self.push_report(TaskReport {
            remote_id: task.item.remote_id.clone(),
            file_stem: Some(task.file_stem()),
            outcome,
        });
    }

    /// A bare item reference whose id is already in the ledger.
    pub fn record_already_completed(&mut self, remote_id: &str) {
        self.skipped += 1;
        self.push_report(TaskReport {
            remote_id: remote_id.to_owned(),
            file_stem: None,
            outcome: Outcome::Skipped {
                reason: SkipReason::AlreadyCompleted,
            },
        });
    }

    pub fn record_unresolved(&mut self, reference: &str, failure: TaskFailure) {
        self.failed += 1;
        self.failures.push(FailureEntry {
            reference: reference.to_owned(),
            remote_id: None,
            failure,
        });
    }

    pub fn is_success(&self) -> bool {
        self.failed == 0
    }

    pub fn total(&self) -> usize {
        self.skipped + self.downloaded + self.failed
    }
}
