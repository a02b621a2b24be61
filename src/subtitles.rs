//! Subtitle handling: cue model, WebVTT cleanup, SRT rendering/parsing and
//! the flattening of timed cues into a plain-text transcript.

use std::collections::HashSet;
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::backend::SubtitleFlattener;

/// Line placed between cues in flattened transcripts.
pub const TEXT_SEPARATOR: &str = "*******";

/// One timed subtitle cue. Times are in milliseconds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cue {
    pub start_ms: u64,
    pub end_ms: u64,
    pub text: String,
}

impl Cue {
    pub fn new(start_ms: u64, end_ms: u64, text: impl Into<String>) -> Self {
        Self {
            start_ms,
            end_ms,
            text: text.into(),
        }
    }
}

/// Parses `HH:MM:SS.mmm`, `HH:MM:SS,mmm` or the hour-less `MM:SS.mmm`.
fn parse_timestamp(value: &str) -> Option<u64> {
    let value = value.trim();
    let (clock, millis) = value.rsplit_once(['.', ','])?;
    let millis: u64 = millis.parse().ok()?;
    let parts: Vec<u64> = clock
        .split(':')
        .map(|part| part.parse::<u64>().ok())
        .collect::<Option<_>>()?;
    let (hours, minutes, seconds) = match parts.as_slice() {
        [h, m, s] => (*h, *m, *s),
        [m, s] => (0, *m, *s),
        _ => return None,
    };
    Some(((hours * 60 + minutes) * 60 + seconds) * 1000 + millis)
}

/// Formats milliseconds as an SRT timestamp (`HH:MM:SS,mmm`).
fn format_timestamp(ms: u64) -> String {
    let seconds = ms / 1000;
    let milliseconds = ms % 1000;
    let minutes = seconds / 60;
    let hours = minutes / 60;
    format!(
        "{:02}:{:02}:{:02},{:03}",
        hours,
        minutes % 60,
        seconds % 60,
        milliseconds
    )
}

fn parse_timing(line: &str) -> Option<(u64, u64)> {
    let (start, rest) = line.split_once("-->")?;
    let end = rest.split_whitespace().next()?;
    Some((parse_timestamp(start)?, parse_timestamp(end)?))
}

/// Drops every `<...>` tag. A `<` without a closing `>` is kept verbatim.
fn strip_tags(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(open) = rest.find('<') {
        out.push_str(&rest[..open]);
        match rest[open..].find('>') {
            Some(close) => rest = &rest[open + close + 1..],
            None => {
                out.push_str(&rest[open..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}

fn decode_entities(text: &str) -> String {
    text.replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&")
}

fn split_blocks(content: &str) -> Vec<Vec<&str>> {
    let mut blocks = Vec::new();
    let mut current = Vec::new();
    for line in content.lines() {
        let line = line.trim_end_matches('\r');
        if line.trim().is_empty() {
            if !current.is_empty() {
                blocks.push(std::mem::take(&mut current));
            }
        } else {
            current.push(line);
        }
    }
    if !current.is_empty() {
        blocks.push(current);
    }
    blocks
}

/// Parses a WebVTT document into clean cues.
///
/// Auto-generated captions repeat every line in a "rolling" block marked with
/// `<c>` word timings followed by a plain copy, so blocks containing `<c>` are
/// dropped, inline tags are removed and consecutive duplicates collapse.
pub fn parse_vtt(content: &str) -> Vec<Cue> {
    let content = content.trim_start_matches('\u{feff}');
    let body = match content.split_once("\n\n") {
        Some((_, body)) => body,
        None => match content.split_once("\r\n\r\n") {
            Some((_, body)) => body,
            None => return Vec::new(),
        },
    };

    let mut cues = Vec::new();
    let mut last_text = String::new();

    for block in split_blocks(body) {
        if block.iter().any(|line| line.contains("<c>")) {
            continue;
        }
        let Some(timing_index) = block.iter().position(|line| line.contains("-->")) else {
            continue;
        };
        let Some((start_ms, end_ms)) = parse_timing(block[timing_index]) else {
            continue;
        };
        let raw = block[timing_index + 1..].join(" ");
        let text = decode_entities(strip_tags(&raw).trim());
        if text.is_empty() || text == last_text {
            continue;
        }
        last_text.clone_from(&text);
        cues.push(Cue::new(start_ms, end_ms, text));
    }

    cues
}

/// Parses an SRT document. Multi-line cue text keeps its line breaks.
pub fn parse_srt(content: &str) -> Vec<Cue> {
    let content = content.trim_start_matches('\u{feff}');
    split_blocks(content)
        .into_iter()
        .filter_map(|block| {
            let timing_index = block.iter().position(|line| line.contains("-->"))?;
            let (start_ms, end_ms) = parse_timing(block[timing_index])?;
            let text = block[timing_index + 1..].join("\n");
            Some(Cue::new(start_ms, end_ms, text))
        })
        .collect()
}

/// Renders cues as an SRT document, numbering from 1.
pub fn render_srt(cues: &[Cue]) -> String {
    let mut output = String::new();
    for (index, cue) in cues.iter().enumerate() {
        // Writing into a String cannot fail.
        let _ = writeln!(output, "{}", index + 1);
        let _ = writeln!(
            output,
            "{} --> {}",
            format_timestamp(cue.start_ms),
            format_timestamp(cue.end_ms)
        );
        let _ = writeln!(output, "{}\n", cue.text);
    }
    output
}

/// Joins unique cue texts into a readable transcript.
pub fn flatten_cues(cues: &[Cue]) -> String {
    let mut seen = HashSet::new();
    let mut texts = Vec::new();
    for cue in cues {
        let text = strip_tags(&cue.text.replace('\n', " "));
        let text = text.trim();
        if !text.is_empty() && seen.insert(text.to_owned()) {
            texts.push(text.to_owned());
        }
    }
    texts.join(&format!("\n{TEXT_SEPARATOR}\n"))
}

/// Flattens `.srt` files from disk.
#[derive(Debug, Clone, Copy, Default)]
pub struct SrtFlattener;

impl SubtitleFlattener for SrtFlattener {
    fn to_plain_text(&self, subtitle: &Path) -> Result<String> {
        let content = fs::read_to_string(subtitle)
            .with_context(|| format!("reading {}", subtitle.display()))?;
        Ok(flatten_cues(&parse_srt(&content)))
    }
}

/// Counters from [`sweep`].
#[derive(Debug, Default, Serialize)]
pub struct SweepReport {
    pub converted_vtt: usize,
    pub written_text: usize,
    pub failures: Vec<(PathBuf, String)>,
}

fn has_extension(path: &Path, ext: &str) -> bool {
    path.extension()
        .and_then(|value| value.to_str())
        .is_some_and(|value| value.eq_ignore_ascii_case(ext))
}

/// Walks `root`, turning every `.vtt` without an `.srt` sibling into a cleaned
/// `.srt`, then (re)writing the `.txt` transcript next to every `.srt`.
pub fn sweep(root: &Path, flattener: &dyn SubtitleFlattener) -> Result<SweepReport> {
    let mut report = SweepReport::default();
    let mut vtt_files = Vec::new();
    let mut srt_files = Vec::new();

    for entry in WalkDir::new(root).follow_links(false) {
        let entry = entry.with_context(|| format!("walking {}", root.display()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.into_path();
        if has_extension(&path, "vtt") {
            vtt_files.push(path);
        } else if has_extension(&path, "srt") {
            srt_files.push(path);
        }
    }

    for vtt in vtt_files {
        let srt = vtt.with_extension("srt");
        if srt.exists() {
            continue;
        }
        let converted = fs::read_to_string(&vtt)
            .map(|content| render_srt(&parse_vtt(&content)))
            .and_then(|rendered| fs::write(&srt, rendered));
        match converted {
            Ok(()) => {
                debug!(path = %srt.display(), "converted vtt");
                report.converted_vtt += 1;
                srt_files.push(srt);
            }
            Err(err) => {
                warn!(path = %vtt.display(), error = %err, "could not convert vtt");
                report.failures.push((vtt, err.to_string()));
            }
        }
    }

    for srt in srt_files {
        let txt = srt.with_extension("txt");
        let written = flattener
            .to_plain_text(&srt)
            .and_then(|text| fs::write(&txt, text).with_context(|| format!("writing {}", txt.display())));
        match written {
            Ok(()) => report.written_text += 1,
            Err(err) => {
                warn!(path = %srt.display(), error = %err, "could not flatten subtitle");
                report.failures.push((srt, format!("{err:#}")));
            }
        }
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const AUTO_VTT: &str = "WEBVTT\nKind: captions\nLanguage: en\n\n\
00:00:00.000 --> 00:00:02.000 align:start position:0%\n\
hello<00:00:00.500><c> world</c>\n\n\
00:00:02.000 --> 00:00:02.010 align:start position:0%\n\
hello world\n\n\
00:00:02.010 --> 00:00:04.000 align:start position:0%\n\
hello world\n\n\
00:00:04.000 --> 00:00:06.500\n\
second &amp; <i>last</i>\n";

    #[test]
    fn timestamps_parse_and_format() {
        assert_eq!(parse_timestamp("01:02:03.004"), Some(3_723_004));
        assert_eq!(parse_timestamp("01:02:03,004"), Some(3_723_004));
        assert_eq!(parse_timestamp("02:03.500"), Some(123_500));
        assert_eq!(parse_timestamp("nonsense"), None);
        assert_eq!(format_timestamp(3_723_004), "01:02:03,004");
        assert_eq!(format_timestamp(0), "00:00:00,000");
    }

    #[test]
    fn vtt_rolling_blocks_and_duplicates_are_dropped() {
        let cues = parse_vtt(AUTO_VTT);
        assert_eq!(
            cues,
            vec![
                Cue::new(2_000, 2_010, "hello world"),
                Cue::new(4_000, 6_500, "second & last"),
            ]
        );
    }

    #[test]
    fn vtt_without_body_is_empty() {
        assert!(parse_vtt("WEBVTT").is_empty());
    }

    #[test]
    fn srt_render_then_parse_keeps_cues() {
        let cues = vec![Cue::new(0, 1_500, "one"), Cue::new(1_500, 3_000, "two\nlines")];
        let rendered = render_srt(&cues);
        assert!(rendered.starts_with("1\n00:00:00,000 --> 00:00:01,500\none\n\n2\n"));
        assert_eq!(parse_srt(&rendered), cues);
    }

    #[test]
    fn flatten_joins_unique_texts_with_separator() {
        let cues = vec![
            Cue::new(0, 1, "<b>Hello</b>\nthere"),
            Cue::new(1, 2, "Hello there"),
            Cue::new(2, 3, "  "),
            Cue::new(3, 4, "Bye"),
        ];
        assert_eq!(flatten_cues(&cues), "Hello there\n*******\nBye");
    }

    #[test]
    fn srt_flattener_reads_file() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("01_intro.en.srt");
        fs::write(&path, render_srt(&[Cue::new(0, 10, "a"), Cue::new(10, 20, "b")]))?;
        assert_eq!(SrtFlattener.to_plain_text(&path)?, "a\n*******\nb");
        Ok(())
    }

    #[test]
    fn sweep_converts_vtt_and_writes_text() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let folder = dir.path().join("List_Owner");
        fs::create_dir_all(&folder)?;
        fs::write(folder.join("01_a.en.vtt"), AUTO_VTT)?;
        fs::write(
            folder.join("02_b.fa.srt"),
            render_srt(&[Cue::new(0, 10, "salam")]),
        )?;

        let report = sweep(dir.path(), &SrtFlattener)?;
        assert_eq!(report.converted_vtt, 1);
        assert_eq!(report.written_text, 2);
        assert!(report.failures.is_empty());
        assert!(folder.join("01_a.en.srt").exists());
        assert_eq!(
            fs::read_to_string(folder.join("01_a.en.txt"))?,
            "hello world\n*******\nsecond & last"
        );
        assert_eq!(fs::read_to_string(folder.join("02_b.fa.txt"))?, "salam");
        Ok(())
    }

    #[test]
    fn sweep_keeps_existing_srt() -> anyhow::Result<()> {
        let dir = tempdir()?;
        fs::write(dir.path().join("x.en.vtt"), AUTO_VTT)?;
        fs::write(dir.path().join("x.en.srt"), render_srt(&[Cue::new(0, 1, "kept")]))?;
        let report = sweep(dir.path(), &SrtFlattener)?;
        assert_eq!(report.converted_vtt, 0);
        assert_eq!(fs::read_to_string(dir.path().join("x.en.txt"))?, "kept");
        Ok(())
    }
}
