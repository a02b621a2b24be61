#![forbid(unsafe_code)]

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use gorendir::config::{SettingsOverrides, resolve_settings};
use gorendir::error::ConfigError;
use gorendir::model::{BatchResult, Outcome, SubtitleState};
use gorendir::subtitles::{SrtFlattener, sweep};
use gorendir::{BatchManifest, DownloadInput, DownloadOptions, Downloader, InputRef};
use std::path::{Path, PathBuf};
use std::process::{Command, ExitCode, Stdio};
use tracing_subscriber::EnvFilter;

const DEFAULT_LOG_FILTER: &str = "gorendir=info";

#[derive(Debug, Parser)]
#[command(name = "gorendir", version, about = "Download videos, playlists and their subtitles")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Download one or more videos or playlists.
    Download(DownloadArgs),
    /// Convert every .vtt/.srt below DIR into cleaned .srt and .txt files.
    Subtitles {
        dir: PathBuf,
        #[arg(long)]
        json: bool,
    },
}

#[derive(Debug, Args)]
struct DownloadArgs {
    /// URL or id; `URL@N` starts a playlist at member N.
    inputs: Vec<String>,
    /// TOML batch manifest.
    #[arg(long)]
    manifest: Option<PathBuf>,
    #[arg(long)]
    save_dir: Option<PathBuf>,
    /// Subtitle language; repeat for several.
    #[arg(long = "lang")]
    languages: Vec<String>,
    #[arg(long)]
    max_resolution: Option<u32>,
    /// Extra attempts after a transient media failure.
    #[arg(long)]
    media_retries: Option<u32>,
    #[arg(long)]
    playlist_start: Option<usize>,
    #[arg(long)]
    skip_download: bool,
    #[arg(long)]
    force: bool,
    #[arg(long)]
    reverse: bool,
    /// Print the batch result as JSON.
    #[arg(long)]
    json: bool,
    /// Keep only counts and failures, not a report per video.
    #[arg(long)]
    summary_only: bool,
    #[arg(long)]
    env_file: Option<PathBuf>,
}

fn main() -> ExitCode {
    init_tracing();
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Download(args) => run_download(args),
        Commands::Subtitles { dir, json } => run_subtitles(&dir, json),
    };

    match result {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(err) => {
            eprintln!("error: {err:#}");
            if err.downcast_ref::<ConfigError>().is_some() {
                ExitCode::from(2)
            } else {
                ExitCode::FAILURE
            }
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

/// Runs `<name> --version` to fail loudly when yt-dlp is missing.
fn ensure_program_available(name: &Path) -> Result<()> {
    let status = Command::new(name)
        .arg("--version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status();

    match status {
        Ok(status) if status.success() => Ok(()),
        Ok(_) => bail!(
            "{} is installed but returned a failure status",
            name.display()
        ),
        Err(err) => bail!("{} is not installed or not in PATH: {}", name.display(), err),
    }
}

/// Combines manifest and positional inputs. Flags given on the command line
/// are OR-ed with the manifest's; an explicit `--playlist-start` wins.
fn collect_inputs(args: &DownloadArgs) -> Result<(DownloadInput, DownloadOptions)> {
    let mut refs = Vec::new();
    let mut options = DownloadOptions::default();

    if let Some(path) = &args.manifest {
        let manifest = BatchManifest::load(path)?;
        refs.extend(manifest.inputs.into_refs());
        options = manifest.options;
    }
    refs.extend(args.inputs.iter().map(|value| InputRef::parse_cli(value)));

    if let Some(start) = args.playlist_start {
        options.playlist_start = start;
    }
    options.skip_download |= args.skip_download;
    options.force_download |= args.force;
    options.reverse_download |= args.reverse;
    options.task_reports &= !args.summary_only;

    Ok((DownloadInput::Batch(refs), options))
}

fn run_download(args: DownloadArgs) -> Result<bool> {
    let settings = resolve_settings(SettingsOverrides {
        save_directory: args.save_dir.clone(),
        subtitle_languages: (!args.languages.is_empty()).then(|| args.languages.clone()),
        max_resolution: args.max_resolution,
        media_retries: args.media_retries,
        env_path: args.env_file.clone(),
        ..SettingsOverrides::default()
    })?;
    let (inputs, options) = collect_inputs(&args)?;

    ensure_program_available(&settings.yt_dlp)?;

    if !args.json {
        println!("===================================");
        println!("GorEndir downloader");
        println!("===================================");
        println!("Save directory: {}", settings.save_directory.display());
        println!("Subtitles: {}", settings.subtitle_languages.join(", "));
        println!("Max resolution: {}p", settings.max_resolution);
        if let Some(cookies) = &settings.cookies {
            println!("Cookies: {}", cookies.display());
        }
        println!();
    }

    let downloader = Downloader::from_settings(&settings);
    let result = downloader
        .download_video(inputs, options)
        .context("batch aborted")?;

    if args.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&result).context("serializing batch result")?
        );
    } else {
        print_summary(&result);
    }
    Ok(result.is_success())
}

fn print_summary(result: &BatchResult) {
    for report in &result.reports {
        let label = report.file_stem.as_deref().unwrap_or(&report.remote_id);
        match &report.outcome {
            Outcome::Skipped { reason } => println!("  skipped     {label} ({reason:?})"),
            Outcome::Downloaded(download) => {
                let missing: Vec<_> = download.unavailable_languages().collect();
                let failed = download
                    .subtitles
                    .iter()
                    .filter(|subtitle| matches!(subtitle.state, SubtitleState::Failed { .. }))
                    .count();
                let mut note = String::new();
                if !missing.is_empty() {
                    note.push_str(&format!(" [no subtitles: {}]", missing.join(", ")));
                }
                if failed > 0 {
                    note.push_str(&format!(" [{failed} subtitle fetches failed]"));
                }
                println!("  downloaded  {label}{note}");
            }
            Outcome::Failed(_) => println!("  failed      {label}"),
        }
    }

    println!();
    println!("===================================");
    println!("Batch complete");
    println!("===================================");
    println!("Downloaded: {}", result.downloaded);
    println!("Skipped: {}", result.skipped);
    println!("Failed: {}", result.failed);
    if !result.failures.is_empty() {
        println!();
        println!("Failures:");
        for failure in &result.failures {
            match &failure.remote_id {
                Some(id) => println!("  - {} ({}): {}", failure.reference, id, failure.failure),
                None => println!("  - {}: {}", failure.reference, failure.failure),
            }
        }
    }
}

fn run_subtitles(dir: &Path, json: bool) -> Result<bool> {
    if !dir.is_dir() {
        bail!("{} is not a directory", dir.display());
    }
    let report = sweep(dir, &SrtFlattener)?;
    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&report).context("serializing sweep report")?
        );
    } else {
        println!("Converted .vtt files: {}", report.converted_vtt);
        println!("Written .txt files: {}", report.written_text);
        for (path, reason) in &report.failures {
            println!("  - {}: {}", path.display(), reason);
        }
    }
    Ok(report.failures.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use std::fs;
    use tempfile::tempdir;

    fn parse(args: &[&str]) -> DownloadArgs {
        let cli = Cli::try_parse_from(std::iter::once("gorendir").chain(args.iter().copied()))
            .unwrap();
        match cli.command {
            Commands::Download(args) => args,
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn download_flags_parse() {
        let args = parse(&[
            "download",
            "https://www.youtube.com/playlist?list=PL1@3",
            "--lang",
            "en",
            "--lang",
            "fa",
            "--max-resolution",
            "720",
            "--force",
            "--reverse",
        ]);
        assert_eq!(args.languages, vec!["en", "fa"]);
        assert_eq!(args.max_resolution, Some(720));
        assert!(args.force && args.reverse && !args.skip_download);
    }

    #[test]
    fn inputs_merge_manifest_and_cli() -> Result<()> {
        let dir = tempdir()?;
        let manifest = dir.path().join("batch.toml");
        fs::write(
            &manifest,
            "inputs = [\"a\", { \"b\" = 4 }]\nskip_download = true\nplaylist_start = 2\n",
        )?;
        let manifest_arg = manifest.display().to_string();
        let args = parse(&[
            "download",
            "c@5",
            "d",
            "--manifest",
            &manifest_arg,
            "--reverse",
        ]);

        let (inputs, options) = collect_inputs(&args)?;
        let planned = inputs.plan(options.playlist_start)?;
        let starts: Vec<_> = planned
            .iter()
            .map(|input| (input.reference.as_str(), input.start))
            .collect();
        assert_eq!(starts, vec![("a", 2), ("b", 4), ("c", 5), ("d", 2)]);
        assert!(options.skip_download);
        assert!(options.reverse_download);
        assert!(!options.force_download);
        assert!(options.task_reports);
        Ok(())
    }

    #[test]
    fn explicit_playlist_start_overrides_manifest() -> Result<()> {
        let dir = tempdir()?;
        let manifest = dir.path().join("batch.toml");
        fs::write(&manifest, "inputs = \"a\"\nplaylist_start = 2\n")?;
        let manifest_arg = manifest.display().to_string();
        let args = parse(&[
            "download",
            "--manifest",
            &manifest_arg,
            "--playlist-start",
            "7",
            "--summary-only",
        ]);
        let (_, options) = collect_inputs(&args)?;
        assert_eq!(options.playlist_start, 7);
        assert!(!options.task_reports);
        Ok(())
    }

    #[test]
    fn subtitles_command_parses_dir() {
        let cli = Cli::try_parse_from(["gorendir", "subtitles", "/tmp/x", "--json"]).unwrap();
        assert!(matches!(cli.command, Commands::Subtitles { json: true, .. }));
    }
}
