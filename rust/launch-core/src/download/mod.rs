// rust/launch-core/src/download/mod.rs

//! Shared artifact downloads.
//!
//! # Example
//!
//! ```no_run
//! use launch_core::config::{ConsoleConfig, DownloadConfig};
//! use launch_core::console::Console;
//! use launch_core::download::{HttpFetcher, SharedDownloader};
//! use std::sync::Arc;
//!
//! let config = DownloadConfig::default();
//! let fetcher = Arc::new(HttpFetcher::new(&config).unwrap());
//! let console = Arc::new(Console::stdio(&ConsoleConfig::default()));
//! let downloader = SharedDownloader::new("/tmp/cache", fetcher, console, &config);
//!
//! let path = downloader
//!     .ensure("https://example.com/words.txt", "words.txt")
//!     .unwrap();
//! println!("cached at {}", path.display());
//! ```

mod fetcher;
mod shared;

pub use fetcher::{Fetcher, HttpFetcher};
pub use shared::{DownloadTarget, SharedDownloader};
