//! Runs a single [`DownloadTask`] to an [`Outcome`].
//!
//! Nothing in here returns an error to the caller: every failure is folded into
//! `Outcome::Failed` so the batch keeps going.

use std::fs;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::backend::{Backends, Transcript};
use crate::error::{FetchError, TaskFailure};
use crate::layout::Layout;
use crate::ledger::CompletionLedger;
use crate::model::{
    DownloadReport, DownloadTask, LiveStatus, Outcome, SkipReason, SubtitleReport, SubtitleState,
};
use crate::subtitles::render_srt;

pub const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_secs(2);

/// How often a transient media failure is retried within one batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub extra_attempts: u32,
    /// Delay before the first retry; doubled for each one after.
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            extra_attempts: 0,
            backoff: DEFAULT_RETRY_BACKOFF,
        }
    }
}

impl RetryPolicy {
    pub fn new(extra_attempts: u32, backoff: Duration) -> Self {
        Self {
            extra_attempts,
            backoff,
        }
    }

    /// Delay before retry number `retry` (1-indexed).
    pub fn delay(&self, retry: u32) -> Duration {
        let factor = 1u32.checked_shl(retry.saturating_sub(1)).unwrap_or(u32::MAX);
        self.backoff.saturating_mul(factor)
    }
}

pub struct Executor<'a> {
    layout: &'a Layout,
    backends: &'a Backends,
    retry: RetryPolicy,
}

impl<'a> Executor<'a> {
    pub fn new(layout: &'a Layout, backends: &'a Backends, retry: RetryPolicy) -> Self {
        Self {
            layout,
            backends,
            retry,
        }
    }

    pub fn execute(&self, task: &DownloadTask, ledger: &mut CompletionLedger) -> Outcome {
        let stem = task.file_stem();
        info!(id = %task.item.remote_id, stem = %stem, folder = %task.folder, "processing item");

        let outcome = match self.run(task, &stem, ledger) {
            Ok(outcome) => outcome,
            Err(failure) => Outcome::Failed(failure),
        };
        match &outcome {
            Outcome::Skipped { reason } => {
                info!(id = %task.item.remote_id, ?reason, "skipped");
            }
            Outcome::Downloaded(report) => {
                info!(
                    id = %task.item.remote_id,
                    files = report.media.len(),
                    subtitles = report.subtitles.len(),
                    "downloaded"
                );
            }
            Outcome::Failed(failure) => {
                warn!(id = %task.item.remote_id, error = %failure, "failed");
            }
        }
        outcome
    }

    fn run(
        &self,
        task: &DownloadTask,
        stem: &str,
        ledger: &mut CompletionLedger,
    ) -> Result<Outcome, TaskFailure> {
        let folder = self
            .layout
            .ensure_folder(&task.folder)
            .map_err(|err| TaskFailure::filesystem("create directory", self.layout.folder(&task.folder), &err))?;

        if !task.policy.force_download && ledger.contains(&task.item.remote_id) {
            return Ok(Outcome::Skipped {
                reason: SkipReason::AlreadyCompleted,
            });
        }
        if task.item.live_status == LiveStatus::IsUpcoming {
            return Ok(Outcome::Skipped {
                reason: SkipReason::UpcomingPremiere,
            });
        }

        let mut report = DownloadReport {
            directory: folder.clone(),
            ..DownloadReport::default()
        };

        if !task.policy.skip_download {
            let prefix = Layout::media_prefix(&folder, stem);
            report.media = self.fetch_media(task, &prefix)?;
        }

        for language in &task.languages {
            let state = self.fetch_subtitle(task, &folder, stem, language)?;
            report.subtitles.push(SubtitleReport {
                language: language.clone(),
                state,
            });
        }

        self.layout
            .log_processed_url(&folder, &task.item.url)
            .map_err(|err| TaskFailure::filesystem("append url log", &folder, &err))?;
        ledger
            .record(&task.item.remote_id, &folder)
            .map_err(|err| TaskFailure::filesystem("record completion", ledger.path(), &err))?;

        Ok(Outcome::Downloaded(report))
    }

    fn fetch_media(&self, task: &DownloadTask, prefix: &Path) -> Result<Vec<PathBuf>, FetchError> {
        let mut retries = 0;
        loop {
            match self
                .backends
                .media
                .fetch(&task.item, task.max_resolution, prefix)
            {
                Ok(paths) => return Ok(paths),
                Err(err) if err.kind.is_transient() && retries < self.retry.extra_attempts => {
                    retries += 1;
                    let delay = self.retry.delay(retries);
                    warn!(
                        id = %task.item.remote_id,
                        error = %err,
                        retry = retries,
                        delay_ms = delay.as_millis() as u64,
                        "media fetch failed, retrying"
                    );
                    thread::sleep(delay);
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Transcript problems are soft; only local write failures fail the task.
    fn fetch_subtitle(
        &self,
        task: &DownloadTask,
        folder: &Path,
        stem: &str,
        language: &str,
    ) -> Result<SubtitleState, TaskFailure> {
        let cues = match self
            .backends
            .transcripts
            .fetch_transcript(&task.item, language)
        {
            Ok(Transcript::Cues(cues)) if !cues.is_empty() => cues,
            Ok(_) => {
                debug!(id = %task.item.remote_id, language, "no transcript");
                return Ok(SubtitleState::Unavailable);
            }
            Err(err) => {
                warn!(id = %task.item.remote_id, language, error = %err, "transcript fetch failed");
                return Ok(SubtitleState::Failed {
                    reason: err.to_string(),
                });
            }
        };

        let srt = Layout::subtitle_path(folder, stem, language);
        fs::write(&srt, render_srt(&cues))
            .map_err(|err| TaskFailure::filesystem("write subtitle", &srt, &err))?;

        let text = match self.backends.subtitles.to_plain_text(&srt) {
            Ok(text) => text,
            Err(err) => {
                warn!(path = %srt.display(), error = %err, "could not flatten subtitle");
                return Ok(SubtitleState::Failed {
                    reason: format!("{err:#}"),
                });
            }
        };
        let txt = Layout::text_path(folder, stem, language);
        fs::write(&txt, text).map_err(|err| TaskFailure::filesystem("write transcript", &txt, &err))?;

        Ok(SubtitleState::Written { srt, txt })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::fake::{FakeRemote, item};
    use crate::error::FetchFailureKind;
    use crate::ledger::read_records;
    use crate::model::TaskPolicy;
    use crate::subtitles::Cue;
    use anyhow::Result;
    use tempfile::{TempDir, tempdir};

    struct Fixture {
        _dir: TempDir,
        layout: Layout,
        remote: FakeRemote,
        backends: Backends,
        ledger: CompletionLedger,
    }

    impl Fixture {
        fn new() -> Result<Self> {
            let dir = tempdir()?;
            let layout = Layout::new(dir.path().join("save"));
            layout.prepare()?;
            let remote = FakeRemote::new();
            let backends = remote.backends();
            let ledger = CompletionLedger::load(layout.ledger_path())?;
            Ok(Self {
                _dir: dir,
                layout,
                remote,
                backends,
                ledger,
            })
        }

        fn execute(&mut self, task: &DownloadTask, retry: RetryPolicy) -> Outcome {
            Executor::new(&self.layout, &self.backends, retry).execute(task, &mut self.ledger)
        }

        fn folder(&self) -> PathBuf {
            self.layout.folder("Course_Owner")
        }
    }

    fn task(id: &str, languages: &[&str], policy: TaskPolicy) -> DownloadTask {
        DownloadTask {
            item: item(id, "Lesson", 1),
            folder: "Course_Owner".into(),
            sequence: 2,
            source: "https://www.youtube.com/playlist?list=PL1".into(),
            languages: languages.iter().map(|l| l.to_string()).collect(),
            max_resolution: 720,
            policy,
        }
    }

    fn quick_retries(extra_attempts: u32) -> RetryPolicy {
        RetryPolicy::new(extra_attempts, Duration::ZERO)
    }

    #[test]
    fn retry_delay_doubles() {
        let policy = RetryPolicy::new(3, Duration::from_millis(500));
        assert_eq!(policy.delay(1), Duration::from_millis(500));
        assert_eq!(policy.delay(2), Duration::from_millis(1000));
        assert_eq!(policy.delay(3), Duration::from_millis(2000));
        assert_eq!(RetryPolicy::default().extra_attempts, 0);
    }

    #[test]
    fn downloads_media_subtitles_and_records() -> Result<()> {
        let mut fx = Fixture::new()?;
        fx.remote
            .add_transcript("a1", "en", vec![Cue::new(0, 1_000, "hi"), Cue::new(1_000, 2_000, "there")]);
        let outcome = fx.execute(&task("a1", &["en", "fa"], TaskPolicy::default()), quick_retries(0));

        let Outcome::Downloaded(report) = outcome else {
            anyhow::bail!("unexpected outcome {outcome:?}");
        };
        let folder = fx.folder();
        assert_eq!(report.directory, folder);
        assert_eq!(
            report.media,
            vec![folder.join("02_Lesson.mp4"), folder.join("02_Lesson.description")]
        );
        assert_eq!(
            report.subtitles[0].state,
            SubtitleState::Written {
                srt: folder.join("02_Lesson.en.srt"),
                txt: folder.join("02_Lesson.en.txt"),
            }
        );
        assert_eq!(report.unavailable_languages().collect::<Vec<_>>(), vec!["fa"]);
        assert_eq!(
            fs::read_to_string(folder.join("02_Lesson.en.txt"))?,
            "hi\n*******\nthere"
        );
        assert!(!folder.join("02_Lesson.fa.srt").exists());

        let url = "https://www.youtube.com/watch?v=a1\n";
        assert_eq!(fs::read_to_string(folder.join("_url.txt"))?, url);
        assert_eq!(fs::read_to_string(fx.layout.urls_log())?, url);
        assert!(fx.ledger.contains("a1"));
        assert_eq!(fx.remote.media_requests()[0].1, 720);
        Ok(())
    }

    #[test]
    fn completed_items_skip_without_network() -> Result<()> {
        let mut fx = Fixture::new()?;
        let folder = fx.folder();
        fx.ledger.record("a1", &folder)?;

        let outcome = fx.execute(&task("a1", &["en"], TaskPolicy::default()), quick_retries(0));
        assert_eq!(
            outcome,
            Outcome::Skipped {
                reason: SkipReason::AlreadyCompleted
            }
        );
        assert_eq!(fx.remote.network_calls(), 0);
        Ok(())
    }

    #[test]
    fn force_refetches_without_duplicate_ledger_lines() -> Result<()> {
        let mut fx = Fixture::new()?;
        let policy = TaskPolicy {
            force_download: true,
            ..TaskPolicy::default()
        };
        let first = fx.execute(&task("a1", &[], policy), quick_retries(0));
        let second = fx.execute(&task("a1", &[], policy), quick_retries(0));
        assert!(matches!(first, Outcome::Downloaded(_)));
        assert!(matches!(second, Outcome::Downloaded(_)));
        assert_eq!(fx.remote.media_calls(), 2);
        assert_eq!(read_records(fx.layout.ledger_path())?.len(), 1);
        Ok(())
    }

    #[test]
    fn skip_download_fetches_only_subtitles() -> Result<()> {
        let mut fx = Fixture::new()?;
        fx.remote.add_transcript("a1", "en", vec![Cue::new(0, 1, "x")]);
        let policy = TaskPolicy {
            skip_download: true,
            ..TaskPolicy::default()
        };
        let outcome = fx.execute(&task("a1", &["en"], policy), quick_retries(0));

        let Outcome::Downloaded(report) = outcome else {
            anyhow::bail!("unexpected outcome {outcome:?}");
        };
        assert!(report.media.is_empty());
        assert_eq!(fx.remote.media_calls(), 0);
        assert!(fx.folder().join("02_Lesson.en.srt").exists());
        assert!(fx.ledger.contains("a1"));
        Ok(())
    }

    #[test]
    fn media_failure_is_not_recorded() -> Result<()> {
        let mut fx = Fixture::new()?;
        fx.remote.fail_media("a1", FetchFailureKind::RegionLocked);
        let outcome = fx.execute(&task("a1", &["en"], TaskPolicy::default()), quick_retries(3));

        let Outcome::Failed(TaskFailure::MediaFetch { kind, .. }) = outcome else {
            anyhow::bail!("unexpected outcome {outcome:?}");
        };
        assert_eq!(kind, FetchFailureKind::RegionLocked);
        assert_eq!(fx.remote.media_calls(), 1);
        assert_eq!(fx.remote.transcript_calls(), 0);
        assert!(!fx.ledger.contains("a1"));
        assert!(fs::read_to_string(fx.layout.urls_log())?.is_empty());
        Ok(())
    }

    #[test]
    fn transient_failures_are_retried_up_to_the_limit() -> Result<()> {
        let mut fx = Fixture::new()?;
        fx.remote.fail_media_times("a1", FetchFailureKind::Network, 2);
        let outcome = fx.execute(&task("a1", &[], TaskPolicy::default()), quick_retries(1));
        assert!(matches!(outcome, Outcome::Failed(_)));
        assert_eq!(fx.remote.media_calls(), 2);

        fx.remote.fail_media_times("a1", FetchFailureKind::Network, 2);
        let outcome = fx.execute(&task("a1", &[], TaskPolicy::default()), quick_retries(2));
        assert!(matches!(outcome, Outcome::Downloaded(_)));
        assert_eq!(fx.remote.media_calls(), 5);
        Ok(())
    }

    #[test]
    fn upcoming_premiere_is_skipped_and_not_recorded() -> Result<()> {
        let mut fx = Fixture::new()?;
        let mut upcoming = task("p1", &["en"], TaskPolicy::default());
        upcoming.item.live_status = LiveStatus::IsUpcoming;

        let outcome = fx.execute(&upcoming, quick_retries(0));
        assert_eq!(
            outcome,
            Outcome::Skipped {
                reason: SkipReason::UpcomingPremiere
            }
        );
        assert!(!fx.ledger.contains("p1"));
        assert_eq!(fx.remote.network_calls(), 0);
        Ok(())
    }

    #[test]
    fn unwritable_folder_fails_the_item() -> Result<()> {
        let mut fx = Fixture::new()?;
        fs::write(fx.folder(), "not a directory")?;
        let outcome = fx.execute(&task("a1", &[], TaskPolicy::default()), quick_retries(0));
        assert!(matches!(
            outcome,
            Outcome::Failed(TaskFailure::Filesystem {
                operation: "create directory",
                ..
            })
        ));
        assert_eq!(fx.remote.media_calls(), 0);
        Ok(())
    }
}
