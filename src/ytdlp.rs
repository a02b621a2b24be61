//! Remote capabilities backed by the `yt-dlp` executable.

use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};

use serde::Deserialize;
use tracing::debug;

use crate::backend::{CollectionLister, Listing, MediaFetcher, Transcript, TranscriptFetcher};
use crate::error::{FetchError, FetchFailureKind};
use crate::model::{CollectionRef, LiveStatus, RemoteItemRef, UNKNOWN_UPLOADER};
use crate::subtitles::parse_vtt;

pub const DEFAULT_PROGRAM: &str = "yt-dlp";

/// Extensions that belong to the subtitle pipeline, not to the media fetch.
const SUBTITLE_EXTENSIONS: [&str; 3] = ["srt", "vtt", "txt"];

#[derive(Debug, Clone)]
pub struct YtDlp {
    program: PathBuf,
    cookies: Option<PathBuf>,
}

impl Default for YtDlp {
    fn default() -> Self {
        Self::new(DEFAULT_PROGRAM)
    }
}

impl YtDlp {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            cookies: None,
        }
    }

    pub fn with_cookies(mut self, cookies: Option<PathBuf>) -> Self {
        self.cookies = cookies;
        self
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    fn command(&self) -> Command {
        let mut command = Command::new(&self.program);
        command.stdin(Stdio::null());
        if let Some(cookies) = &self.cookies {
            command.arg("--cookies").arg(cookies);
        }
        command
    }

    fn run(&self, mut command: Command, target: &str) -> Result<Output, FetchError> {
        debug!(?command, "running yt-dlp");
        let output = command.output().map_err(|err| {
            FetchError::new(
                FetchFailureKind::Other,
                format!("could not run {}: {err}", self.program.display()),
            )
        })?;
        if output.status.success() {
            return Ok(output);
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        Err(FetchError::new(
            classify_failure(&stderr),
            format!("{target}: {}", error_message(&stderr, output.status.code())),
        ))
    }
}

#[derive(Debug, Default, Deserialize)]
struct FlatEntry {
    #[serde(rename = "_type")]
    kind: Option<String>,
    id: Option<String>,
    title: Option<String>,
    url: Option<String>,
    webpage_url: Option<String>,
    uploader: Option<String>,
    channel: Option<String>,
    live_status: Option<String>,
    playlist_index: Option<usize>,
    playlist_count: Option<usize>,
}

impl FlatEntry {
    fn owner(&self) -> Option<String> {
        self.uploader.clone().or_else(|| self.channel.clone())
    }

    fn into_item(self, fallback_uploader: Option<&str>, position: usize) -> Option<RemoteItemRef> {
        let id = self.id.clone().filter(|id| !id.is_empty())?;
        let uploader = self.owner().or_else(|| fallback_uploader.map(str::to_owned));
        let url = self
            .webpage_url
            .clone()
            .or_else(|| self.url.clone().filter(|url| url.contains("://")))
            .unwrap_or_else(|| watch_url(&id));
        let status = LiveStatus::from_label(self.live_status.as_deref());
        Some(
            RemoteItemRef::new(id, url, self.title, uploader, self.playlist_index.unwrap_or(position))
                .with_live_status(status),
        )
    }
}

pub fn watch_url(id: &str) -> String {
    format!("https://www.youtube.com/watch?v={id}")
}

fn parse_json<T: for<'de> Deserialize<'de>>(raw: &str, target: &str) -> Result<T, FetchError> {
    serde_json::from_str(raw).map_err(|err| {
        FetchError::new(
            FetchFailureKind::Other,
            format!("{target}: unreadable listing JSON: {err}"),
        )
    })
}

impl CollectionLister for YtDlp {
    fn describe(&self, reference: &str) -> Result<Listing, FetchError> {
        let mut command = self.command();
        command
            .arg("--flat-playlist")
            .arg("--dump-single-json")
            .arg("--playlist-items")
            .arg("1")
            .arg("--no-warnings")
            .arg(reference);
        let output = self.run(command, reference)?;
        let entry: FlatEntry = parse_json(&String::from_utf8_lossy(&output.stdout), reference)?;

        if entry.kind.as_deref() == Some("playlist") {
            let remote_id = entry.id.clone().unwrap_or_else(|| reference.to_owned());
            let uploader = entry.owner().unwrap_or_else(|| UNKNOWN_UPLOADER.to_owned());
            return Ok(Listing::Collection(CollectionRef {
                title: entry
                    .title
                    .filter(|title| !title.trim().is_empty())
                    .unwrap_or_else(|| remote_id.clone()),
                url: entry.webpage_url.unwrap_or_else(|| reference.to_owned()),
                remote_id,
                uploader,
                start: 1,
                member_count: entry.playlist_count,
            }));
        }

        entry.into_item(None, 1).map(Listing::Item).ok_or_else(|| {
            FetchError::new(
                FetchFailureKind::Unavailable,
                format!("{reference}: listing carries no identifier"),
            )
        })
    }

    fn list_page(
        &self,
        collection: &CollectionRef,
        start: usize,
        count: usize,
    ) -> Result<Vec<RemoteItemRef>, FetchError> {
        if count == 0 {
            return Ok(Vec::new());
        }
        let end = start + count - 1;
        let mut command = self.command();
        command
            .arg("--flat-playlist")
            .arg("--dump-json")
            .arg("--playlist-items")
            .arg(format!("{start}:{end}"))
            .arg("--no-warnings")
            .arg(&collection.url);
        let output = self.run(command, &collection.url)?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let mut members = Vec::new();
        for (offset, line) in stdout.lines().filter(|line| !line.trim().is_empty()).enumerate() {
            let entry: FlatEntry = parse_json(line, &collection.url)?;
            if let Some(item) = entry.into_item(Some(&collection.uploader), start + offset) {
                members.push(item);
            }
        }
        Ok(members)
    }
}

fn is_partial(name: &str) -> bool {
    name.ends_with(".part")
        || name.ends_with(".ytdl")
        || name.contains(".part-Frag")
        || name.contains(".temp.")
}

/// Files in the prefix's directory whose name starts with `{stem}.`.
fn files_with_stem(prefix: &Path) -> std::io::Result<Vec<PathBuf>> {
    let Some(folder) = prefix.parent() else {
        return Ok(Vec::new());
    };
    let Some(stem) = prefix.file_name().map(|name| name.to_string_lossy().into_owned()) else {
        return Ok(Vec::new());
    };
    let lead = format!("{stem}.");
    let mut found = Vec::new();
    for entry in fs::read_dir(folder)? {
        let entry = entry?;
        if entry.file_name().to_string_lossy().starts_with(&lead) {
            found.push(entry.path());
        }
    }
    found.sort();
    Ok(found)
}

fn remove_partials(prefix: &Path) {
    let Ok(files) = files_with_stem(prefix) else {
        return;
    };
    for path in files {
        let name = path.file_name().map(|name| name.to_string_lossy().into_owned());
        if name.as_deref().is_some_and(is_partial) {
            debug!(path = %path.display(), "removing partial download");
            let _ = fs::remove_file(&path);
        }
    }
}

fn extension(path: &Path) -> Option<String> {
    path.extension().map(|ext| ext.to_string_lossy().to_ascii_lowercase())
}

pub fn format_selector(max_resolution: u32) -> String {
    format!("bestvideo[height<={max_resolution}]+bestaudio/best[height<={max_resolution}]")
}

impl MediaFetcher for YtDlp {
    fn fetch(
        &self,
        item: &RemoteItemRef,
        max_resolution: u32,
        dest_prefix: &Path,
    ) -> Result<Vec<PathBuf>, FetchError> {
        let mut template = OsString::from(dest_prefix.as_os_str());
        template.push(".%(ext)s");

        let mut command = self.command();
        command
            .arg("--no-playlist")
            .arg("--format")
            .arg(format_selector(max_resolution))
            .arg("--merge-output-format")
            .arg("mp4")
            .arg("--write-description")
            .arg("--force-overwrites")
            .arg("--no-warnings")
            .arg("--no-progress")
            .arg("--output")
            .arg(&template)
            .arg(&item.url);

        if let Err(err) = self.run(command, &item.url) {
            remove_partials(dest_prefix);
            return Err(err);
        }

        let produced: Vec<PathBuf> = files_with_stem(dest_prefix)
            .map_err(|err| {
                FetchError::new(
                    FetchFailureKind::Other,
                    format!("{}: listing output: {err}", item.url),
                )
            })?
            .into_iter()
            .filter(|path| {
                let name = path.file_name().map(|name| name.to_string_lossy().into_owned());
                !name.as_deref().is_some_and(is_partial)
                    && !extension(path).is_some_and(|ext| SUBTITLE_EXTENSIONS.contains(&ext.as_str()))
            })
            .collect();

        if !produced
            .iter()
            .any(|path| extension(path).as_deref() != Some("description"))
        {
            remove_partials(dest_prefix);
            return Err(FetchError::new(
                FetchFailureKind::Other,
                format!("{}: yt-dlp finished without a media file", item.url),
            ));
        }
        Ok(produced)
    }
}

impl TranscriptFetcher for YtDlp {
    fn fetch_transcript(
        &self,
        item: &RemoteItemRef,
        language: &str,
    ) -> Result<Transcript, FetchError> {
        let scratch = tempfile::tempdir().map_err(|err| {
            FetchError::new(FetchFailureKind::Other, format!("creating scratch dir: {err}"))
        })?;

        let mut command = self.command();
        command
            .arg("--skip-download")
            .arg("--write-subs")
            .arg("--write-auto-subs")
            .arg("--sub-langs")
            .arg(language)
            .arg("--sub-format")
            .arg("vtt")
            .arg("--no-warnings")
            .arg("--output")
            .arg(scratch.path().join("subtitle"))
            .arg(&item.url);
        self.run(command, &item.url)?;

        let vtt = fs::read_dir(scratch.path())
            .map_err(|err| FetchError::new(FetchFailureKind::Other, err.to_string()))?
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .find(|path| extension(path).as_deref() == Some("vtt"));
        let Some(vtt) = vtt else {
            return Ok(Transcript::NotAvailable);
        };

        let content = fs::read_to_string(&vtt)
            .map_err(|err| FetchError::new(FetchFailureKind::Other, err.to_string()))?;
        let cues = parse_vtt(&content);
        if cues.is_empty() {
            return Ok(Transcript::NotAvailable);
        }
        Ok(Transcript::Cues(cues))
    }
}

/// Maps yt-dlp's stderr onto a failure kind.
pub fn classify_failure(stderr: &str) -> FetchFailureKind {
    let lower = stderr.to_lowercase();
    let has = |needle: &str| lower.contains(needle);

    if has("http error 429") || has("too many requests") {
        return FetchFailureKind::RateLimited;
    }
    if has("requested format") && has("not available") {
        return FetchFailureKind::ResolutionUnavailable;
    }
    if has("confirm your age") || has("age-restricted") || has("age restricted") {
        return FetchFailureKind::AgeRestricted;
    }
    if has("available in your country")
        || has("geo restricted")
        || (has("geo") && has("block"))
    {
        return FetchFailureKind::RegionLocked;
    }
    if has("sign in") || has("login required") || has("members-only") || has("--cookies") {
        return FetchFailureKind::LoginRequired;
    }
    if has("video unavailable")
        || has("private video")
        || has("has been removed")
        || has("does not exist")
        || has("http error 404")
        || has("unsupported url")
        || has("not available")
    {
        return FetchFailureKind::Unavailable;
    }
    if has("timed out")
        || has("timeout")
        || has("connection")
        || has("temporary failure in name resolution")
        || has("unable to download webpage")
    {
        return FetchFailureKind::Network;
    }
    FetchFailureKind::Other
}

/// Last `ERROR:` line, else the trimmed stderr, else the exit status.
fn error_message(stderr: &str, code: Option<i32>) -> String {
    if let Some(line) = stderr
        .lines()
        .rev()
        .map(str::trim)
        .find(|line| line.to_ascii_lowercase().starts_with("error:"))
    {
        return line["error:".len()..].trim().to_owned();
    }
    let trimmed = stderr.trim();
    if trimmed.is_empty() {
        return match code {
            Some(code) => format!("yt-dlp exited with status {code}"),
            None => "yt-dlp was terminated by a signal".to_owned(),
        };
    }
    trimmed.chars().take(300).collect()
}
