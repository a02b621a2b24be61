#![forbid(unsafe_code)]

//! Download orchestration for remote videos and playlists: resolves inputs
//! into ordered tasks, fetches media and subtitles through pluggable
//! capabilities, and keeps a per-directory ledger so reruns skip finished
//! items.

pub mod backend;
pub mod config;
pub mod downloader;
pub mod error;
pub mod executor;
pub mod input;
pub mod layout;
pub mod ledger;
pub mod model;
pub mod resolver;
pub mod sanitize;
pub mod subtitles;
pub mod ytdlp;

pub use downloader::Downloader;
pub use error::{ConfigError, TaskFailure};
pub use input::{BatchManifest, DownloadInput, InputRef};
pub use model::{BatchResult, DownloadOptions, Outcome};
