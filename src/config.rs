//! Configuration management for untiler.
//!
//! This module provides the command-line configuration:
//! - Command-line arguments via clap
//! - Environment variables with `UNTILER_` prefix
//! - Sensible defaults for all optional settings
//!
//! # Example
//!
//! ```ignore
//! use untiler::config::Config;
//!
//! let config = Config::parse();
//! config.validate()?;
//! println!("Fetching {} with {} threads", config.url, config.threads);
//! ```
//!
//! # Environment Variables
//!
//! - `UNTILER_THREADS` - Concurrent tile fetches (default: 16)
//! - `UNTILER_RETRIES` - Attempts per tile (default: 3)
//! - `UNTILER_TIMEOUT` - Request timeout in seconds (default: 30)
//! - `UNTILER_STORE_TILES` - Directory to keep downloaded tiles in
//! - `UNTILER_TILE_TEMPLATE` - Tile address template
//! - `UNTILER_JPEG_QUALITY` - JPEG output quality (default: 90)

use std::path::PathBuf;
use std::time::Duration;

use clap::{ArgAction, Parser};

use crate::sink::{is_valid_quality, DEFAULT_JPEG_QUALITY};
use crate::tile::{RetryPolicy, DEFAULT_BASE_DELAY, DEFAULT_CONCURRENCY, DEFAULT_MAX_ATTEMPTS};
use crate::untiler::UntilerOptions;
use crate::zoomify::ReferenceKind;

// =============================================================================
// Default Values
// =============================================================================

/// Default request timeout in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

// =============================================================================
// CLI Arguments
// =============================================================================

/// untiler - Reassemble a zoomable tiled image into a single file.
///
/// Give it the page embedding a Zoomify viewer (or the URL of its
/// ImageProperties.xml) and it downloads every tile and writes the full
/// resolution image.
#[derive(Parser, Debug, Clone)]
#[command(name = "untiler")]
#[command(author, version, about, long_about = None)]
pub struct Config {
    /// Viewer page, properties document or tile directory URL.
    ///
    /// With --list, a file of URLs, one per line.
    pub url: String,

    /// Output image; the extension selects the format (.jpg or .png).
    pub output: PathBuf,

    // =========================================================================
    // Input Interpretation
    // =========================================================================
    /// Treat URL as the tile directory rather than a viewer page.
    #[arg(short, long, default_value_t = false, conflicts_with = "page")]
    pub base: bool,

    /// Always fetch URL as a viewer page, even if it names the properties document.
    #[arg(short, long, default_value_t = false)]
    pub page: bool,

    /// Treat URL as a list file of jobs (`URL` or `URL<TAB>NAME` per line).
    #[arg(short, long, default_value_t = false)]
    pub list: bool,

    /// Zoom level to fetch; negative values count down from the largest.
    #[arg(short = 'z', long, allow_negative_numbers = true)]
    pub zoom_level: Option<i32>,

    /// Tile address template, `{col}`, `{row}` and `{tier}` are substituted.
    ///
    /// Relative templates are resolved against the tile directory.
    #[arg(long, env = "UNTILER_TILE_TEMPLATE")]
    pub tile_template: Option<String>,

    // =========================================================================
    // Fetching
    // =========================================================================
    /// Number of concurrent tile fetches.
    #[arg(short, long, default_value_t = DEFAULT_CONCURRENCY, env = "UNTILER_THREADS")]
    pub threads: usize,

    /// Attempts per tile, first try included.
    #[arg(long, default_value_t = DEFAULT_MAX_ATTEMPTS, env = "UNTILER_RETRIES")]
    pub retries: u32,

    /// Request timeout in seconds.
    #[arg(long, default_value_t = DEFAULT_TIMEOUT_SECS, env = "UNTILER_TIMEOUT")]
    pub timeout: u64,

    /// Keep downloaded tiles in this directory.
    #[arg(short, long, env = "UNTILER_STORE_TILES")]
    pub store_tiles: Option<PathBuf>,

    /// Assemble from tiles kept by --store-tiles instead of downloading.
    #[arg(short = 'x', long, default_value_t = false)]
    pub no_download: bool,

    // =========================================================================
    // Output
    // =========================================================================
    /// JPEG output quality (1-100).
    #[arg(short = 'q', long, default_value_t = DEFAULT_JPEG_QUALITY, env = "UNTILER_JPEG_QUALITY")]
    pub jpeg_quality: u8,

    /// Write the image even when some tiles are missing.
    #[arg(long, default_value_t = false)]
    pub allow_missing: bool,

    /// Print a JSON report of every run to stdout.
    #[arg(long, default_value_t = false)]
    pub json: bool,

    // =========================================================================
    // Logging Configuration
    // =========================================================================
    /// Increase logging verbosity (-v info, -vv debug).
    #[arg(short, long, action = ArgAction::Count)]
    pub verbose: u8,
}

impl Config {
    /// Validate the configuration and return an error message if invalid.
    pub fn validate(&self) -> Result<(), String> {
        if self.threads == 0 {
            return Err("threads must be greater than 0".to_string());
        }

        if self.retries == 0 {
            return Err("retries must be greater than 0".to_string());
        }

        if self.timeout == 0 {
            return Err("timeout must be greater than 0".to_string());
        }

        if !is_valid_quality(self.jpeg_quality) {
            return Err("jpeg_quality must be between 1 and 100".to_string());
        }

        if self.no_download && self.store_tiles.is_none() {
            return Err(
                "--no-download reads tiles kept by a previous run. \
                 Set --store-tiles or UNTILER_STORE_TILES to their directory"
                    .to_string(),
            );
        }

        Ok(())
    }

    /// How the URL argument is interpreted.
    pub fn reference_kind(&self) -> ReferenceKind {
        if self.base {
            ReferenceKind::Base
        } else if self.page {
            ReferenceKind::Page
        } else {
            ReferenceKind::Auto
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.retries, DEFAULT_BASE_DELAY)
    }

    pub fn untiler_options(&self) -> UntilerOptions {
        UntilerOptions {
            concurrency: self.threads,
            tier: self.zoom_level,
            template: self.tile_template.clone(),
            ..UntilerOptions::default()
        }
    }

    /// Default log filter for the verbosity level.
    pub fn log_filter(&self) -> &'static str {
        match self.verbose {
            0 => "untiler=warn",
            1 => "untiler=info",
            _ => "untiler=debug",
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
