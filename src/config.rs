use anyhow::{Context, Result};
use std::{
    collections::HashMap,
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::error::ConfigError;
use crate::executor::{DEFAULT_RETRY_BACKOFF, RetryPolicy};
use crate::layout::COOKIES_FILE;
use crate::model::{DEFAULT_MAX_RESOLUTION, DEFAULT_SUBTITLE_LANGUAGES};
use crate::ytdlp::DEFAULT_PROGRAM;

pub const DEFAULT_ENV_PATH: &str = ".env";

pub const SAVE_DIR_KEY: &str = "GORENDIR_SAVE_DIR";
pub const SUBTITLE_LANGS_KEY: &str = "GORENDIR_SUBTITLE_LANGS";
pub const MAX_RESOLUTION_KEY: &str = "GORENDIR_MAX_RESOLUTION";
pub const MEDIA_RETRIES_KEY: &str = "GORENDIR_MEDIA_RETRIES";
pub const RETRY_BACKOFF_KEY: &str = "GORENDIR_RETRY_BACKOFF_MS";
pub const YT_DLP_KEY: &str = "GORENDIR_YT_DLP";
pub const COOKIES_KEY: &str = "GORENDIR_COOKIES";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub save_directory: PathBuf,
    pub subtitle_languages: Vec<String>,
    pub max_resolution: u32,
    pub media_retries: u32,
    pub retry_backoff: Duration,
    pub yt_dlp: PathBuf,
    pub cookies: Option<PathBuf>,
}

impl Settings {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.media_retries, self.retry_backoff)
    }
}

/// Values supplied on the command line. They win over everything else.
#[derive(Debug, Clone, Default)]
pub struct SettingsOverrides {
    pub save_directory: Option<PathBuf>,
    pub subtitle_languages: Option<Vec<String>>,
    pub max_resolution: Option<u32>,
    pub media_retries: Option<u32>,
    pub yt_dlp: Option<PathBuf>,
    pub cookies: Option<PathBuf>,
    pub env_path: Option<PathBuf>,
}

pub fn load_settings() -> Result<Settings> {
    resolve_settings(SettingsOverrides::default())
}

/// Merges overrides, the process environment, the `.env` file and defaults,
/// in that order of precedence.
pub fn resolve_settings(overrides: SettingsOverrides) -> Result<Settings> {
    let env_path = overrides
        .env_path
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_ENV_PATH));
    let file_vars = read_env_file(&env_path)?;
    build_settings(&file_vars, env_var_string, overrides)
}

fn build_settings(
    file_vars: &HashMap<String, String>,
    env_lookup: impl Fn(&str) -> Option<String>,
    overrides: SettingsOverrides,
) -> Result<Settings> {
    let lookup = |key: &str| lookup_value(key, file_vars, &env_lookup);

    let save_directory = overrides
        .save_directory
        .filter(|path| !path.as_os_str().is_empty())
        .or_else(|| lookup(SAVE_DIR_KEY).map(PathBuf::from))
        .ok_or(ConfigError::EmptySaveDirectory)
        .with_context(|| format!("set {SAVE_DIR_KEY} or pass --save-dir"))?;

    let subtitle_languages = overrides
        .subtitle_languages
        .map(|languages| normalize_languages(languages.iter().map(String::as_str)))
        .filter(|languages| !languages.is_empty())
        .or_else(|| {
            lookup(SUBTITLE_LANGS_KEY)
                .map(|value| normalize_languages(value.split(',')))
                .filter(|languages| !languages.is_empty())
        })
        .unwrap_or_else(default_languages);

    let max_resolution = overrides
        .max_resolution
        .filter(|value| *value > 0)
        .or_else(|| parse_number::<u32>(lookup(MAX_RESOLUTION_KEY)).filter(|value| *value > 0))
        .unwrap_or(DEFAULT_MAX_RESOLUTION);

    let media_retries = overrides
        .media_retries
        .or_else(|| parse_number::<u32>(lookup(MEDIA_RETRIES_KEY)))
        .unwrap_or(0);

    let retry_backoff = parse_number::<u64>(lookup(RETRY_BACKOFF_KEY))
        .map(Duration::from_millis)
        .unwrap_or(DEFAULT_RETRY_BACKOFF);

    let yt_dlp = overrides
        .yt_dlp
        .or_else(|| lookup(YT_DLP_KEY).map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_PROGRAM));

    let cookies = overrides
        .cookies
        .or_else(|| lookup(COOKIES_KEY).map(PathBuf::from))
        .or_else(|| {
            let candidate = save_directory.join(COOKIES_FILE);
            candidate.is_file().then_some(candidate)
        });

    Ok(Settings {
        save_directory,
        subtitle_languages,
        max_resolution,
        media_retries,
        retry_backoff,
        yt_dlp,
        cookies,
    })
}

fn default_languages() -> Vec<String> {
    DEFAULT_SUBTITLE_LANGUAGES
        .iter()
        .map(|language| language.to_string())
        .collect()
}

fn normalize_languages<'a>(values: impl Iterator<Item = &'a str>) -> Vec<String> {
    let mut languages: Vec<String> = Vec::new();
    for value in values {
        let value = value.trim();
        if !value.is_empty() && !languages.iter().any(|known| known == value) {
            languages.push(value.to_string());
        }
    }
    languages
}

fn parse_number<T: std::str::FromStr>(value: Option<String>) -> Option<T> {
    value.and_then(|value| value.trim().parse::<T>().ok())
}

/// Trimmed value, with blank treated as unset.
fn non_blank(value: &str) -> Option<String> {
    let value = value.trim();
    (!value.is_empty()).then(|| value.to_string())
}

fn env_var_string(key: &str) -> Option<String> {
    env::var(key).ok().as_deref().and_then(non_blank)
}

fn lookup_value(
    key: &str,
    file_vars: &HashMap<String, String>,
    env_lookup: &impl Fn(&str) -> Option<String>,
) -> Option<String> {
    env_lookup(key).or_else(|| file_vars.get(key).cloned())
}

/// One `KEY=value` line, or `None` for comments, blanks and malformed lines.
fn parse_env_line(line: &str) -> Option<(&str, String)> {
    let line = line.trim();
    if line.starts_with('#') {
        return None;
    }
    let line = line.strip_prefix("export ").unwrap_or(line);
    let (key, raw) = line.split_once('=')?;
    let key = key.trim();
    if key.is_empty() {
        return None;
    }
    let raw = raw.trim();
    let value = match raw.chars().next() {
        Some(quote @ ('"' | '\'')) => raw[1..].split(quote).next().unwrap_or_default(),
        Some('#') => "",
        _ => raw.split(" #").next().unwrap_or_default(),
    };
    non_blank(value).map(|value| (key, value))
}

/// Reads the settings file. Accepts `export`, single or double quotes and `#`
/// comments, including trailing ones after unquoted values. Blank values are
/// dropped so they fall through to the defaults. A missing file yields no
/// values.
pub fn read_env_file(path: &Path) -> Result<HashMap<String, String>> {
    if !path.exists() {
        return Ok(HashMap::new());
    }
    let content = fs::read_to_string(path)
        .with_context(|| format!("reading settings file {}", path.display()))?;
    Ok(content
        .lines()
        .filter_map(parse_env_line)
        .map(|(key, value)| (key.to_string(), value))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn make_config(contents: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "{}", contents).unwrap();
        file
    }

    fn settings_from(contents: &str) -> Settings {
        let cfg = make_config(contents);
        let vars = read_env_file(cfg.path()).unwrap();
        build_settings(&vars, |_| None, SettingsOverrides::default()).unwrap()
    }

    #[test]
    fn defaults_fill_everything_but_save_dir() {
        let settings = settings_from("GORENDIR_SAVE_DIR=\"/downloads\"\n");
        assert_eq!(settings.save_directory, PathBuf::from("/downloads"));
        assert_eq!(settings.subtitle_languages, vec!["az", "en", "fa", "tr"]);
        assert_eq!(settings.max_resolution, DEFAULT_MAX_RESOLUTION);
        assert_eq!(settings.media_retries, 0);
        assert_eq!(settings.retry_backoff, DEFAULT_RETRY_BACKOFF);
        assert_eq!(settings.yt_dlp, PathBuf::from("yt-dlp"));
        assert_eq!(settings.cookies, None);
    }

    #[test]
    fn missing_save_dir_is_a_config_error() {
        let err = build_settings(&HashMap::new(), |_| None, SettingsOverrides::default())
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ConfigError>(),
            Some(ConfigError::EmptySaveDirectory)
        ));
    }

    #[test]
    fn reads_every_key_from_file() {
        let settings = settings_from(
            "GORENDIR_SAVE_DIR=/d\nGORENDIR_SUBTITLE_LANGS=\" en, fa ,en,\"\nGORENDIR_MAX_RESOLUTION=720\n\
             GORENDIR_MEDIA_RETRIES=2\nGORENDIR_RETRY_BACKOFF_MS=50\nGORENDIR_YT_DLP=/opt/yt-dlp\n\
             GORENDIR_COOKIES=/secrets/cookies.txt\n",
        );
        assert_eq!(settings.subtitle_languages, vec!["en", "fa"]);
        assert_eq!(settings.max_resolution, 720);
        assert_eq!(settings.media_retries, 2);
        assert_eq!(settings.retry_backoff, Duration::from_millis(50));
        assert_eq!(settings.yt_dlp, PathBuf::from("/opt/yt-dlp"));
        assert_eq!(settings.cookies, Some(PathBuf::from("/secrets/cookies.txt")));
        assert_eq!(settings.retry_policy(), RetryPolicy::new(2, Duration::from_millis(50)));
    }

    #[test]
    fn unparsable_numbers_fall_back_to_defaults() {
        let settings = settings_from(
            "GORENDIR_SAVE_DIR=/d\nGORENDIR_MAX_RESOLUTION=hd\nGORENDIR_MEDIA_RETRIES=-1\nGORENDIR_SUBTITLE_LANGS=\" , \"\n",
        );
        assert_eq!(settings.max_resolution, DEFAULT_MAX_RESOLUTION);
        assert_eq!(settings.media_retries, 0);
        assert_eq!(settings.subtitle_languages.len(), 4);
    }

    #[test]
    fn env_wins_over_file() {
        let vars = read_env_file(
            make_config("GORENDIR_SAVE_DIR=\"/file\"\nGORENDIR_MAX_RESOLUTION=480\n").path(),
        )
        .unwrap();
        let settings = build_settings(
            &vars,
            |key| (key == SAVE_DIR_KEY).then(|| "/env".to_string()),
            SettingsOverrides::default(),
        )
        .unwrap();
        assert_eq!(settings.save_directory, PathBuf::from("/env"));
        assert_eq!(settings.max_resolution, 480);
    }

    #[test]
    fn overrides_win_over_env_and_file() {
        let mut vars = HashMap::new();
        vars.insert(SAVE_DIR_KEY.to_string(), "/file".to_string());
        vars.insert(SUBTITLE_LANGS_KEY.to_string(), "tr".to_string());
        vars.insert(MEDIA_RETRIES_KEY.to_string(), "4".to_string());

        let overrides = SettingsOverrides {
            save_directory: Some(PathBuf::from("/override")),
            subtitle_languages: Some(vec!["en".into()]),
            max_resolution: Some(360),
            media_retries: None,
            yt_dlp: Some(PathBuf::from("/bin/stub")),
            cookies: None,
            env_path: None,
        };
        let settings = build_settings(
            &vars,
            |key| (key == MEDIA_RETRIES_KEY).then(|| "1".to_string()),
            overrides,
        )
        .unwrap();

        assert_eq!(settings.save_directory, PathBuf::from("/override"));
        assert_eq!(settings.subtitle_languages, vec!["en"]);
        assert_eq!(settings.max_resolution, 360);
        assert_eq!(settings.media_retries, 1);
        assert_eq!(settings.yt_dlp, PathBuf::from("/bin/stub"));
    }

    #[test]
    fn cookies_default_to_save_dir_file_when_present() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let save = dir.path().display().to_string();
        let vars = HashMap::from([(SAVE_DIR_KEY.to_string(), save)]);

        let settings = build_settings(&vars, |_| None, SettingsOverrides::default())?;
        assert_eq!(settings.cookies, None);

        fs::write(dir.path().join(COOKIES_FILE), "# Netscape HTTP Cookie File\n")?;
        let settings = build_settings(&vars, |_| None, SettingsOverrides::default())?;
        assert_eq!(settings.cookies, Some(dir.path().join(COOKIES_FILE)));
        Ok(())
    }

    #[test]
    fn read_env_file_handles_export_and_quotes() {
        let cfg = make_config(
            r#"
            export GORENDIR_SAVE_DIR="/media"
            GORENDIR_YT_DLP='/usr/local/bin/yt-dlp'
            GORENDIR_SUBTITLE_LANGS =  "en,fa"
            GORENDIR_MAX_RESOLUTION=720
            # comment
            INVALID_LINE
            "#,
        );
        let vars = read_env_file(cfg.path()).unwrap();
        assert_eq!(vars.get(SAVE_DIR_KEY).unwrap(), "/media");
        assert_eq!(vars.get(YT_DLP_KEY).unwrap(), "/usr/local/bin/yt-dlp");
        assert_eq!(vars.get(SUBTITLE_LANGS_KEY).unwrap(), "en,fa");
        assert_eq!(vars.get(MAX_RESOLUTION_KEY).unwrap(), "720");
        assert!(!vars.contains_key("INVALID_LINE"));
    }

    #[test]
    fn read_env_file_missing_file_returns_empty() {
        let dir = tempfile::tempdir().unwrap();
        let vars = read_env_file(&dir.path().join("missing.env")).unwrap();
        assert!(vars.is_empty());
    }

    #[test]
    fn trailing_comments_are_stripped_outside_quotes() {
        let cfg = make_config(
            "GORENDIR_MEDIA_RETRIES=3 # per item\nGORENDIR_COOKIES=\"/c/#1 .txt\" # quoted\nGORENDIR_YT_DLP= # unset\n",
        );
        let vars = read_env_file(cfg.path()).unwrap();
        assert_eq!(vars.get(MEDIA_RETRIES_KEY).unwrap(), "3");
        assert_eq!(vars.get(COOKIES_KEY).unwrap(), "/c/#1 .txt");
        assert!(!vars.contains_key(YT_DLP_KEY));
    }

    #[test]
    fn blank_file_values_count_as_unset() {
        let settings = settings_from("GORENDIR_SAVE_DIR=/d\nGORENDIR_YT_DLP=\"  \"\n");
        assert_eq!(settings.yt_dlp, PathBuf::from(DEFAULT_PROGRAM));
    }

    #[test]
    fn resolve_settings_reads_custom_env_path() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let env_path = dir.path().join("custom.env");
        fs::write(&env_path, "GORENDIR_SAVE_DIR=/from-custom\n")?;
        let settings = resolve_settings(SettingsOverrides {
            save_directory: Some(PathBuf::from("/explicit")),
            env_path: Some(env_path),
            ..SettingsOverrides::default()
        })?;
        assert_eq!(settings.save_directory, PathBuf::from("/explicit"));
        Ok(())
    }
}
