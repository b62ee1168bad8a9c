//! # untiler
//!
//! Reconstructs a single large raster image from a Zoomify tiled deployment.
//!
//! Given a viewer page, the library discovers the tiling scheme, fetches
//! every tile of the requested tier concurrently and assembles them into one
//! canvas with the exact pixel dimensions of the original image.
//!
//! ## Features
//!
//! - **Metadata discovery**: finds the tile directory in Flash, HTML5 and
//!   JavaScript viewer pages and parses `ImageProperties.xml`
//! - **Bounded concurrency**: a fixed pool of fetches with streaming results
//! - **Retry with classification**: transient failures are retried with
//!   exponential backoff, permanent ones are reported at once
//! - **Partial failure tolerance**: missing tiles are listed with their
//!   coordinates instead of aborting the run
//! - **Tile store**: downloaded tiles can be kept and reassembled offline
//!
//! ## Architecture
//!
//! - [`zoomify`] - Metadata resolution and tile addressing
//! - [`tile`] - Grid planning, fetching, coordination and canvas assembly
//! - [`io`] - HTTP transport and on-disk tile store
//! - [`sink`] - Encoding the finished image
//! - [`untiler`](mod@untiler) - The end-to-end pipeline
//! - [`batch`] - Job lists for batch mode
//! - [`config`] - CLI and configuration types
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use tokio_util::sync::CancellationToken;
//! use untiler::{
//!     HttpTransport, ImageFileSink, OutputSink, RemoteTileFetcher, RetryPolicy, Untiler,
//!     UntilerOptions, ZoomifyResolver,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let transport = Arc::new(HttpTransport::new(Duration::from_secs(30))?);
//!     let resolver = Arc::new(ZoomifyResolver::new(transport.clone()));
//!     let fetcher = Arc::new(RemoteTileFetcher::new(transport, RetryPolicy::default()));
//!
//!     let untiler = Untiler::new(resolver, fetcher, UntilerOptions::default());
//!     let outcome = untiler
//!         .untile("https://example.com/viewer.html", CancellationToken::new())
//!         .await?;
//!
//!     ImageFileSink::default().write(&outcome.image, "image.jpg".as_ref())?;
//!     Ok(())
//! }
//! ```

pub mod batch;
pub mod config;
pub mod error;
pub mod io;
pub mod sink;
pub mod tile;
pub mod untiler;
pub mod zoomify;

// Re-export commonly used types
pub use batch::{parse_job_list, read_job_list, Job};
pub use config::Config;
pub use error::{
    AssemblyError, FetchError, FetchReason, IoError, ResolveError, ResolveReason, SinkError,
    StoreError, UntileError,
};
pub use io::{HttpTransport, TileStore, Transport};
pub use sink::{ImageFileSink, OutputFormat, OutputSink, DEFAULT_JPEG_QUALITY};
pub use tile::{
    grid_dimensions, plan, AssembledImage, CanvasAssembler, FetchCoordinator, FetchResult,
    FetchRun, ImageProperties, Progress, RemoteTileFetcher, RetryPolicy, RetryState, RunSummary,
    StoredTileFetcher, TierPyramid, TileCoordinate, TileDescriptor, TileFetcher,
    DEFAULT_CONCURRENCY,
};
pub use untiler::{RunReport, UntileOutcome, Untiler, UntilerOptions};
pub use zoomify::{
    MetadataResolver, ReferenceKind, ResolvedImage, TemplateAddressBuilder, TileAddressBuilder,
    ZoomifyAddressBuilder, ZoomifyResolver,
};
