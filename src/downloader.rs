//! Batch coordinator and the public entry point of the engine.

use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::backend::Backends;
use crate::config::Settings;
use crate::error::ConfigError;
use crate::executor::{Executor, RetryPolicy};
use crate::input::DownloadInput;
use crate::layout::Layout;
use crate::ledger::CompletionLedger;
use crate::model::{BatchResult, DEFAULT_MAX_RESOLUTION, DEFAULT_SUBTITLE_LANGUAGES, DownloadOptions};
use crate::resolver::{PAGE_SIZE, Resolver, watch_id};
use crate::ytdlp::YtDlp;

pub struct Downloader {
    save_directory: PathBuf,
    languages: Vec<String>,
    max_resolution: u32,
    retry: RetryPolicy,
    page_size: usize,
    backends: Backends,
}

impl Downloader {
    pub fn new(save_directory: impl Into<PathBuf>, backends: Backends) -> Self {
        Self {
            save_directory: save_directory.into(),
            languages: DEFAULT_SUBTITLE_LANGUAGES
                .iter()
                .map(|language| language.to_string())
                .collect(),
            max_resolution: DEFAULT_MAX_RESOLUTION,
            retry: RetryPolicy::default(),
            page_size: PAGE_SIZE,
            backends,
        }
    }

    /// A yt-dlp backed downloader configured from resolved settings.
    pub fn from_settings(settings: &Settings) -> Self {
        let ytdlp = YtDlp::new(&settings.yt_dlp).with_cookies(settings.cookies.clone());
        Self::new(&settings.save_directory, Backends::yt_dlp(ytdlp))
            .with_languages(settings.subtitle_languages.iter().cloned())
            .with_max_resolution(settings.max_resolution)
            .with_retry_policy(settings.retry_policy())
    }

    /// An empty list keeps the defaults.
    pub fn with_languages<I, S>(mut self, languages: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let languages: Vec<String> = languages.into_iter().map(Into::into).collect();
        if !languages.is_empty() {
            self.languages = languages;
        }
        self
    }

    pub fn with_max_resolution(mut self, max_resolution: u32) -> Self {
        self.max_resolution = max_resolution;
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    pub fn save_directory(&self) -> &Path {
        &self.save_directory
    }

    pub fn languages(&self) -> &[String] {
        &self.languages
    }

    /// Resolves every input and runs its tasks in order.
    ///
    /// Only configuration problems are returned as errors; a failing input or
    /// item is counted in the [`BatchResult`] and the batch moves on.
    pub fn download_video(
        &self,
        input: impl Into<DownloadInput>,
        options: DownloadOptions,
    ) -> Result<BatchResult, ConfigError> {
        if self.save_directory.as_os_str().is_empty()
            || self.save_directory.to_string_lossy().trim().is_empty()
        {
            return Err(ConfigError::EmptySaveDirectory);
        }
        let planned = input.into().plan(options.playlist_start)?;

        let layout = Layout::new(&self.save_directory);
        layout.prepare()?;
        let mut ledger =
            CompletionLedger::load(layout.ledger_path()).map_err(|source| ConfigError::Ledger {
                path: layout.ledger_path().to_path_buf(),
                source,
            })?;

        let policy = options.policy();
        let resolver = Resolver::new(
            self.backends.lister.as_ref(),
            &self.languages,
            self.max_resolution,
            policy,
        )
        .with_page_size(self.page_size);
        let executor = Executor::new(&layout, &self.backends, self.retry);

        info!(
            root = %layout.root().display(),
            inputs = planned.len(),
            known = ledger.len(),
            "starting batch"
        );

        let mut result = BatchResult::new(options.task_reports);
        for input in &planned {
            if !policy.force_download
                && let Some(id) = watch_id(&input.reference)
                && ledger.contains(&id)
            {
                info!(id = %id, "already completed");
                result.record_already_completed(&id);
                continue;
            }

            for resolved in resolver.resolve(input) {
                match resolved {
                    Ok(task) => {
                        let outcome = executor.execute(&task, &mut ledger);
                        result.record(&task, outcome);
                    }
                    Err(err) => {
                        warn!(reference = %err.reference, reason = %err.reason, "could not resolve input");
                        let reference = err.reference.clone();
                        result.record_unresolved(&reference, err.into());
                    }
                }
            }
        }

        info!(
            downloaded = result.downloaded,
            skipped = result.skipped,
            failed = result.failed,
            "batch finished"
        );
        Ok(result)
    }
}
