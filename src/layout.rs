//! Every filesystem location the engine writes under one save directory.

use std::ffi::OsString;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use crate::error::ConfigError;
use crate::ledger::LEDGER_FILE;

pub const URLS_FILE: &str = "_urls.txt";
pub const FOLDER_URL_FILE: &str = "_url.txt";
pub const COOKIES_FILE: &str = "cookies.txt";

#[derive(Debug, Clone)]
pub struct Layout {
    root: PathBuf,
    urls_log: PathBuf,
    ledger: PathBuf,
}

impl Layout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let urls_log = root.join(URLS_FILE);
        let ledger = root.join(LEDGER_FILE);
        Self {
            root,
            urls_log,
            ledger,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn ledger_path(&self) -> &Path {
        &self.ledger
    }

    pub fn urls_log(&self) -> &Path {
        &self.urls_log
    }

    /// Creates the root and proves it accepts writes by opening the URL log
    /// for appending. Failure here is fatal for the whole batch.
    pub fn prepare(&self) -> Result<(), ConfigError> {
        let not_writable = |source: io::Error| ConfigError::RootNotWritable {
            path: self.root.clone(),
            source,
        };
        fs::create_dir_all(&self.root).map_err(not_writable)?;
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.urls_log)
            .map_err(not_writable)?;
        Ok(())
    }

    pub fn folder(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    pub fn ensure_folder(&self, name: &str) -> io::Result<PathBuf> {
        let folder = self.folder(name);
        fs::create_dir_all(&folder)?;
        Ok(folder)
    }

    /// `{folder}/{stem}`; fetchers append their own extensions.
    pub fn media_prefix(folder: &Path, stem: &str) -> PathBuf {
        folder.join(stem)
    }

    pub fn subtitle_path(folder: &Path, stem: &str, language: &str) -> PathBuf {
        with_suffix(folder, stem, &format!(".{language}.srt"))
    }

    pub fn text_path(folder: &Path, stem: &str, language: &str) -> PathBuf {
        with_suffix(folder, stem, &format!(".{language}.txt"))
    }

    /// Appends to the root URL log. Duplicates are tolerated.
    pub fn append_url(&self, url: &str) -> io::Result<()> {
        append_line(&self.urls_log, url)
    }

    /// Appends `url` to both the root log and the folder's own `_url.txt`.
    pub fn log_processed_url(&self, folder: &Path, url: &str) -> io::Result<()> {
        self.append_url(url)?;
        append_line(&folder.join(FOLDER_URL_FILE), url)
    }
}

// `Path::with_extension` would eat a trailing `.something` in titles.
fn with_suffix(folder: &Path, stem: &str, suffix: &str) -> PathBuf {
    let mut name = OsString::from(stem);
    name.push(suffix);
    folder.join(name)
}

fn append_line(path: &Path, line: &str) -> io::Result<()> {
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    writeln!(file, "{line}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use tempfile::tempdir;

    #[test]
    fn prepare_creates_root_and_url_log() -> Result<()> {
        let dir = tempdir()?;
        let layout = Layout::new(dir.path().join("nested/save"));
        layout.prepare()?;
        assert!(layout.root().is_dir());
        assert!(layout.urls_log().exists());
        assert_eq!(layout.ledger_path(), dir.path().join("nested/save/_completed.txt"));
        Ok(())
    }

    #[test]
    fn prepare_fails_when_root_is_a_file() -> Result<()> {
        let dir = tempdir()?;
        let blocker = dir.path().join("blocker");
        fs::write(&blocker, "")?;
        let err = Layout::new(&blocker).prepare().unwrap_err();
        assert!(matches!(err, ConfigError::RootNotWritable { .. }));
        Ok(())
    }

    #[test]
    fn artifact_paths_keep_dots_in_stem() {
        let folder = Path::new("/save/List_Owner");
        assert_eq!(
            Layout::subtitle_path(folder, "01_v1.2", "en"),
            PathBuf::from("/save/List_Owner/01_v1.2.en.srt")
        );
        assert_eq!(
            Layout::text_path(folder, "01_v1.2", "fa"),
            PathBuf::from("/save/List_Owner/01_v1.2.fa.txt")
        );
        assert_eq!(
            Layout::media_prefix(folder, "01_x"),
            PathBuf::from("/save/List_Owner/01_x")
        );
    }

    #[test]
    fn url_logs_are_append_only() -> Result<()> {
        let dir = tempdir()?;
        let layout = Layout::new(dir.path());
        layout.prepare()?;
        let folder = layout.ensure_folder("List_Owner")?;
        layout.log_processed_url(&folder, "https://a")?;
        layout.log_processed_url(&folder, "https://a")?;
        assert_eq!(fs::read_to_string(layout.urls_log())?, "https://a\nhttps://a\n");
        assert_eq!(
            fs::read_to_string(folder.join(FOLDER_URL_FILE))?,
            "https://a\nhttps://a\n"
        );
        Ok(())
    }
}
