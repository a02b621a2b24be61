//! Turns human-authored titles into filesystem-safe path segments.
//!
//! Letters and digits from any script survive, as do space, `-`, `_` and `.`.
//! Everything else becomes `_`, runs of separators collapse to one, and the
//! ends are trimmed. Names are capped at [`MAX_NAME_BYTES`] so that a prefix
//! like `01_` plus a `.fa.srt` suffix still fits in a 255 byte file name.

use std::fmt;
use std::path::Path;

use serde::Serialize;

pub const MAX_NAME_BYTES: usize = 200;
pub const FALLBACK_NAME: &str = "untitled";
const REPLACEMENT: char = '_';

/// A path segment that is safe on every filesystem we write to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct SanitizedName(String);

impl SanitizedName {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for SanitizedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for SanitizedName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl AsRef<Path> for SanitizedName {
    fn as_ref(&self) -> &Path {
        Path::new(&self.0)
    }
}

/// Sanitizes `raw`, mapping empty results to [`FALLBACK_NAME`].
pub fn sanitize(raw: &str) -> SanitizedName {
    let cleaned = truncate_bytes(&clean(raw), MAX_NAME_BYTES);
    if cleaned.is_empty() {
        SanitizedName(FALLBACK_NAME.to_owned())
    } else {
        SanitizedName(cleaned)
    }
}

/// Sanitizes `raw` for a name that must not collide with another item's.
///
/// When the cleaned text differs from `raw` (characters replaced, whitespace
/// collapsed, or truncated) the remote identifier is appended, so two distinct
/// titles that clean to the same text still land in distinct directories.
/// Empty results fall back to the identifier itself.
pub fn sanitize_with_id(raw: &str, remote_id: &str) -> SanitizedName {
    let cleaned = clean(raw);
    let id = clean(remote_id);

    if cleaned.is_empty() {
        return if id.is_empty() {
            SanitizedName(FALLBACK_NAME.to_owned())
        } else {
            SanitizedName(truncate_bytes(&id, MAX_NAME_BYTES))
        };
    }

    if cleaned == raw && cleaned.len() <= MAX_NAME_BYTES {
        return SanitizedName(cleaned);
    }

    if id.is_empty() {
        return SanitizedName(truncate_bytes(&cleaned, MAX_NAME_BYTES));
    }

    let suffix = format!("{REPLACEMENT}{id}");
    if suffix.len() >= MAX_NAME_BYTES {
        return SanitizedName(truncate_bytes(&id, MAX_NAME_BYTES));
    }
    let base = truncate_bytes(&cleaned, MAX_NAME_BYTES - suffix.len());
    if base.is_empty() {
        return SanitizedName(id);
    }
    SanitizedName(format!("{base}{suffix}"))
}

/// Directory name for a collection or standalone item: `{Title}_{Uploader}`.
pub fn folder_name(title: &str, uploader: &str, remote_id: &str) -> String {
    format!(
        "{}{REPLACEMENT}{}",
        sanitize_with_id(title, remote_id),
        sanitize(uploader)
    )
}

fn is_safe(c: char) -> bool {
    c.is_alphanumeric() || matches!(c, ' ' | '-' | '_' | '.')
}

fn is_edge_separator(c: char) -> bool {
    matches!(c, ' ' | '_' | '.')
}

fn clean(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut pending: Option<char> = None;

    for c in raw.chars() {
        let mapped = if c.is_whitespace() {
            ' '
        } else if is_safe(c) {
            c
        } else {
            REPLACEMENT
        };

        if mapped == ' ' || mapped == REPLACEMENT {
            pending = Some(if mapped == REPLACEMENT || pending == Some(REPLACEMENT) {
                REPLACEMENT
            } else {
                ' '
            });
            continue;
        }

        if let Some(separator) = pending.take()
            && !out.is_empty()
        {
            out.push(separator);
        }
        out.push(mapped);
    }

    out.trim_matches(is_edge_separator).to_owned()
}

fn truncate_bytes(value: &str, max: usize) -> String {
    if value.len() <= max {
        return value.to_owned();
    }
    let mut end = max;
    while !value.is_char_boundary(end) {
        end -= 1;
    }
    value[..end].trim_end_matches(is_edge_separator).to_owned()
}
