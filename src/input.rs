//! Batch inputs: a bare reference, a reference with an embedded start offset,
//! or an ordered list mixing both.
//!
//! The serde shape mirrors what people write by hand: `"url"`,
//! `{ "url" = 3 }`, or `["url", { "url" = 3 }]`. The union is resolved once,
//! here, so inner layers only ever see [`PlannedInput`].

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::error::ConfigError;
use crate::model::DownloadOptions;

/// One entry of a batch, before the global `playlist_start` is applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputRef {
    pub reference: String,
    pub start: Option<usize>,
}

impl InputRef {
    pub fn new(reference: impl Into<String>) -> Self {
        Self {
            reference: reference.into(),
            start: None,
        }
    }

    pub fn with_start(reference: impl Into<String>, start: usize) -> Self {
        Self {
            reference: reference.into(),
            start: Some(start),
        }
    }

    /// Parses the command-line form `REF` or `REF@N`.
    pub fn parse_cli(value: &str) -> Self {
        if let Some((reference, start)) = value.rsplit_once('@')
            && !reference.is_empty()
            && !start.is_empty()
            && start.chars().all(|c| c.is_ascii_digit())
            && let Ok(start) = start.parse::<usize>()
        {
            return Self::with_start(reference, start);
        }
        Self::new(value)
    }
}

/// Everything `download_video` accepts.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(try_from = "RawInput")]
pub enum DownloadInput {
    Single(String),
    WithOffset { reference: String, start: usize },
    Batch(Vec<InputRef>),
}

/// A reference with its effective 1-indexed start offset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedInput {
    pub reference: String,
    pub start: usize,
}

impl DownloadInput {
    /// Flattens the union into planned inputs. An embedded offset always wins
    /// over `playlist_start`.
    pub fn plan(&self, playlist_start: usize) -> Result<Vec<PlannedInput>, ConfigError> {
        let refs = self.clone().into_refs();
        if refs.is_empty() {
            return Err(ConfigError::EmptyInput);
        }

        refs.into_iter()
            .map(|entry| {
                let reference = entry.reference.trim().to_owned();
                if reference.is_empty() {
                    return Err(ConfigError::Invalid("empty reference in input list".into()));
                }
                let start = entry.start.unwrap_or(playlist_start);
                if start == 0 {
                    return Err(ConfigError::InvalidStart(start));
                }
                Ok(PlannedInput { reference, start })
            })
            .collect()
    }

    pub fn into_refs(self) -> Vec<InputRef> {
        match self {
            DownloadInput::Single(reference) => vec![InputRef::new(reference)],
            DownloadInput::WithOffset { reference, start } => {
                vec![InputRef::with_start(reference, start)]
            }
            DownloadInput::Batch(entries) => entries,
        }
    }
}

impl From<&str> for DownloadInput {
    fn from(value: &str) -> Self {
        DownloadInput::Single(value.to_owned())
    }
}

impl From<String> for DownloadInput {
    fn from(value: String) -> Self {
        DownloadInput::Single(value)
    }
}

impl<S: Into<String>> From<(S, usize)> for DownloadInput {
    fn from((reference, start): (S, usize)) -> Self {
        DownloadInput::WithOffset {
            reference: reference.into(),
            start,
        }
    }
}

impl From<Vec<InputRef>> for DownloadInput {
    fn from(value: Vec<InputRef>) -> Self {
        DownloadInput::Batch(value)
    }
}

impl From<Vec<&str>> for DownloadInput {
    fn from(value: Vec<&str>) -> Self {
        DownloadInput::Batch(value.into_iter().map(InputRef::new).collect())
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawEntry {
    Reference(String),
    Offset(BTreeMap<String, usize>),
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawInput {
    Reference(String),
    Offset(BTreeMap<String, usize>),
    Many(Vec<RawEntry>),
}

fn single_offset(map: BTreeMap<String, usize>) -> Result<InputRef, ConfigError> {
    if map.len() != 1 {
        return Err(ConfigError::OffsetMapSize(map.len()));
    }
    let (reference, start) = map
        .into_iter()
        .next()
        .ok_or(ConfigError::OffsetMapSize(0))?;
    Ok(InputRef::with_start(reference, start))
}

impl TryFrom<RawInput> for DownloadInput {
    type Error = ConfigError;

    fn try_from(raw: RawInput) -> Result<Self, Self::Error> {
        match raw {
            RawInput::Reference(reference) => Ok(DownloadInput::Single(reference)),
            RawInput::Offset(map) => {
                let entry = single_offset(map)?;
                Ok(DownloadInput::WithOffset {
                    reference: entry.reference,
                    start: entry.start.unwrap_or(1),
                })
            }
            RawInput::Many(entries) => entries
                .into_iter()
                .map(|entry| match entry {
                    RawEntry::Reference(reference) => Ok(InputRef::new(reference)),
                    RawEntry::Offset(map) => single_offset(map),
                })
                .collect::<Result<Vec<_>, _>>()
                .map(DownloadInput::Batch),
        }
    }
}

/// A batch described in a TOML file.
///
/// ```toml
/// inputs = ["https://www.youtube.com/watch?v=abc", { "https://www.youtube.com/playlist?list=PL1" = 3 }]
/// reverse_download = true
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct BatchManifest {
    pub inputs: DownloadInput,
    #[serde(flatten)]
    pub options: DownloadOptions,
}

impl BatchManifest {
    pub fn load(path: &Path) -> Result<Self> {
        let content =
            fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        Self::from_toml(&content).with_context(|| format!("parsing {}", path.display()))
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }
}
