//! Capability seams for the external collaborators: collection listing, media
//! fetch, transcript fetch and subtitle flattening.
//!
//! The engine only talks to these traits. [`crate::ytdlp::YtDlp`] implements
//! the three remote ones by shelling out; tests use [`fake::FakeRemote`].

use std::path::{Path, PathBuf};

use anyhow::Result;

use crate::error::FetchError;
use crate::model::{CollectionRef, RemoteItemRef};
use crate::subtitles::{Cue, SrtFlattener};
use crate::ytdlp::YtDlp;

/// What a bare reference turned out to be.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Listing {
    Item(RemoteItemRef),
    Collection(CollectionRef),
}

pub trait CollectionLister {
    /// Classifies `reference` as a single item or a collection.
    fn describe(&self, reference: &str) -> Result<Listing, FetchError>;

    /// Returns up to `count` members starting at the 1-indexed `start`. A page
    /// may be shorter than asked for; callers continue after the last
    /// member's `position`. An empty page means the collection is exhausted.
    fn list_page(
        &self,
        collection: &CollectionRef,
        start: usize,
        count: usize,
    ) -> Result<Vec<RemoteItemRef>, FetchError>;
}

pub trait MediaFetcher {
    /// Downloads `item` capped at `max_resolution`, writing files that start
    /// with `dest_prefix`. Returns the produced paths.
    fn fetch(
        &self,
        item: &RemoteItemRef,
        max_resolution: u32,
        dest_prefix: &Path,
    ) -> Result<Vec<PathBuf>, FetchError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transcript {
    Cues(Vec<Cue>),
    NotAvailable,
}

pub trait TranscriptFetcher {
    fn fetch_transcript(&self, item: &RemoteItemRef, language: &str)
    -> Result<Transcript, FetchError>;
}

pub trait SubtitleFlattener {
    fn to_plain_text(&self, subtitle: &Path) -> Result<String>;
}

/// The full set of collaborators one downloader needs.
pub struct Backends {
    pub lister: Box<dyn CollectionLister>,
    pub media: Box<dyn MediaFetcher>,
    pub transcripts: Box<dyn TranscriptFetcher>,
    pub subtitles: Box<dyn SubtitleFlattener>,
}

impl Backends {
    pub fn yt_dlp(ytdlp: YtDlp) -> Self {
        Self {
            lister: Box::new(ytdlp.clone()),
            media: Box::new(ytdlp.clone()),
            transcripts: Box::new(ytdlp),
            subtitles: Box::new(SrtFlattener),
        }
    }
}
