//! Expands one planned input into a lazy stream of download tasks.
//!
//! Collections are paged through the listing capability instead of being
//! materialized, except when a reverse order is requested and the member count
//! is unknown up front.

use std::collections::VecDeque;

use tracing::debug;
use url::Url;

use crate::backend::{CollectionLister, Listing};
use crate::error::{FetchError, ResolutionError};
use crate::input::PlannedInput;
use crate::model::{CollectionRef, DownloadTask, RemoteItemRef, TaskPolicy};
use crate::sanitize::folder_name;
use crate::ytdlp::watch_url;

pub const PAGE_SIZE: usize = 100;

/// The video id a URL points at: the `v=` query parameter, a `youtu.be/<id>`
/// short link or a `/shorts/<id>` path.
pub fn watch_id(reference: &str) -> Option<String> {
    let parsed = Url::parse(reference.trim()).ok()?;
    let host = parsed.host_str()?.to_ascii_lowercase();
    let mut segments = parsed
        .path_segments()
        .into_iter()
        .flatten()
        .filter(|segment| !segment.is_empty());

    let id = if host == "youtu.be" || host.ends_with(".youtu.be") {
        segments.next().map(str::to_owned)
    } else if host.ends_with("youtube.com") && segments.next() == Some("shorts") {
        segments.next().map(str::to_owned)
    } else {
        parsed
            .query_pairs()
            .find(|(key, _)| key == "v")
            .map(|(_, value)| value.into_owned())
    };
    id.filter(|id| !id.is_empty())
}

/// Rewrites any reference naming a single video to the bare watch URL, so
/// `watch?v=X&list=Y` resolves to the single item `X`.
pub fn canonical_reference(reference: &str) -> String {
    match watch_id(reference) {
        Some(id) => watch_url(&id),
        None => reference.trim().to_owned(),
    }
}

/// Fields every task of one input shares.
#[derive(Debug, Clone)]
struct TaskTemplate {
    source: String,
    folder: String,
    languages: Vec<String>,
    max_resolution: u32,
    policy: TaskPolicy,
}

impl TaskTemplate {
    fn task(&self, item: RemoteItemRef, sequence: usize) -> DownloadTask {
        DownloadTask {
            item,
            folder: self.folder.clone(),
            sequence,
            source: self.source.clone(),
            languages: self.languages.clone(),
            max_resolution: self.max_resolution,
            policy: self.policy,
        }
    }
}

pub struct Resolver<'a> {
    lister: &'a dyn CollectionLister,
    languages: Vec<String>,
    max_resolution: u32,
    policy: TaskPolicy,
    page_size: usize,
}

impl<'a> Resolver<'a> {
    pub fn new(
        lister: &'a dyn CollectionLister,
        languages: &[String],
        max_resolution: u32,
        policy: TaskPolicy,
    ) -> Self {
        Self {
            lister,
            languages: languages.to_vec(),
            max_resolution,
            policy,
            page_size: PAGE_SIZE,
        }
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    fn template(&self, source: &str, folder: String) -> TaskTemplate {
        TaskTemplate {
            source: source.to_owned(),
            folder,
            languages: self.languages.clone(),
            max_resolution: self.max_resolution,
            policy: self.policy,
        }
    }

    /// Classifies the input and returns its tasks. A reference the listing
    /// capability rejects yields exactly one `Err`.
    pub fn resolve(&self, input: &PlannedInput) -> TaskStream<'a> {
        let reference = canonical_reference(&input.reference);
        debug!(reference = %reference, start = input.start, "resolving input");

        match self.lister.describe(&reference) {
            Err(err) => TaskStream::single(Err(ResolutionError {
                reference: input.reference.clone(),
                reason: err.to_string(),
            })),
            Ok(Listing::Item(item)) => {
                let folder = folder_name(&item.title, &item.uploader, &item.remote_id);
                let template = self.template(&input.reference, folder);
                TaskStream::single(Ok(template.task(item, 1)))
            }
            Ok(Listing::Collection(mut collection)) => {
                collection.start = input.start;
                let folder =
                    folder_name(&collection.title, &collection.uploader, &collection.remote_id);
                let template = self.template(&input.reference, folder);
                let cursor = match (self.policy.reverse_download, collection.member_count) {
                    (false, _) => Cursor::Forward { next: input.start },
                    (true, Some(count)) => Cursor::Backward { last: count },
                    (true, None) => Cursor::Materialize,
                };
                TaskStream::Members(MemberTasks {
                    lister: self.lister,
                    collection,
                    template,
                    page_size: self.page_size,
                    cursor,
                    buffer: VecDeque::new(),
                    sequence: 0,
                })
            }
        }
    }
}

pub enum TaskStream<'a> {
    Single(Option<Result<DownloadTask, ResolutionError>>),
    Members(MemberTasks<'a>),
}

impl TaskStream<'_> {
    fn single(result: Result<DownloadTask, ResolutionError>) -> Self {
        TaskStream::Single(Some(result))
    }
}

impl Iterator for TaskStream<'_> {
    type Item = Result<DownloadTask, ResolutionError>;

    fn next(&mut self) -> Option<Self::Item> {
        match self {
            TaskStream::Single(slot) => slot.take(),
            TaskStream::Members(members) => members.next(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Cursor {
    /// Next 1-indexed position to request.
    Forward { next: usize },
    /// Last position not yet requested, walking towards the start offset.
    Backward { last: usize },
    /// Reverse order without a known count: read everything, then flip.
    Materialize,
    Done,
}

/// Members of one collection, numbered as they are handed out.
pub struct MemberTasks<'a> {
    lister: &'a dyn CollectionLister,
    collection: CollectionRef,
    template: TaskTemplate,
    page_size: usize,
    cursor: Cursor,
    buffer: VecDeque<RemoteItemRef>,
    sequence: usize,
}

impl MemberTasks<'_> {
    fn page(&self, start: usize, count: usize) -> Result<Vec<RemoteItemRef>, FetchError> {
        debug!(collection = %self.collection.url, start, count, "listing page");
        self.lister.list_page(&self.collection, start, count)
    }

    /// Everything between positions `first` and `last`, re-requesting after a
    /// short page until the window is covered or the listing runs dry.
    fn span(&self, first: usize, last: usize) -> Result<Vec<RemoteItemRef>, FetchError> {
        let mut members = Vec::new();
        let mut next = first;
        while next <= last {
            let page = self.page(next, last - next + 1)?;
            let Some(tail) = page.last() else { break };
            next = after(tail, next);
            members.extend(page);
        }
        Ok(members)
    }

    fn fill(&mut self) -> Result<(), FetchError> {
        let start = self.collection.start;
        match self.cursor {
            Cursor::Forward { next } => {
                if let Some(count) = self.collection.member_count
                    && next > count
                {
                    self.cursor = Cursor::Done;
                    return Ok(());
                }
                let page = self.page(next, self.page_size)?;
                self.cursor = match (page.last(), self.collection.member_count) {
                    (Some(tail), _) => Cursor::Forward {
                        next: after(tail, next),
                    },
                    // Nothing listable in this window, but the count says more follow.
                    (None, Some(_)) => Cursor::Forward {
                        next: next + self.page_size,
                    },
                    (None, None) => Cursor::Done,
                };
                self.buffer.extend(page);
            }
            Cursor::Backward { last } => {
                if last < start {
                    self.cursor = Cursor::Done;
                    return Ok(());
                }
                let first = last.saturating_sub(self.page_size - 1).max(start);
                let page = self.span(first, last)?;
                self.cursor = if first <= start {
                    Cursor::Done
                } else {
                    Cursor::Backward { last: first - 1 }
                };
                self.buffer.extend(page.into_iter().rev());
            }
            Cursor::Materialize => {
                let mut all = Vec::new();
                let mut next = start;
                loop {
                    let page = self.page(next, self.page_size)?;
                    let Some(tail) = page.last() else { break };
                    next = after(tail, next);
                    all.extend(page);
                }
                all.reverse();
                self.buffer.extend(all);
                self.cursor = Cursor::Done;
            }
            Cursor::Done => {}
        }
        Ok(())
    }
}

/// Position to request after a page ending in `tail`. Pages may be shorter
/// than requested, so this follows the members' own positions.
fn after(tail: &RemoteItemRef, requested: usize) -> usize {
    (tail.position + 1).max(requested + 1)
}

impl Iterator for MemberTasks<'_> {
    type Item = Result<DownloadTask, ResolutionError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(item) = self.buffer.pop_front() {
                self.sequence += 1;
                return Some(Ok(self.template.task(item, self.sequence)));
            }
            if matches!(self.cursor, Cursor::Done) {
                return None;
            }
            if let Err(err) = self.fill() {
                self.cursor = Cursor::Done;
                return Some(Err(ResolutionError {
                    reference: self.template.source.clone(),
                    reason: format!("listing stopped after {} members: {err}", self.sequence),
                }));
            }
        }
    }
}
