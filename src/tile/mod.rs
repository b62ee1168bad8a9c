//! Tile planning, fetching and assembly.
//!
//! This module holds the untiling engine proper. Once the image properties
//! are known, tiles flow through it like this:
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │   plan(): ImageProperties → descriptors │
//! └────────────────────┬────────────────────┘
//!                      │
//!                      ▼
//! ┌─────────────────────────────────────────┐
//! │            FetchCoordinator             │
//! │  ┌──────────────┐  ┌─────────────────┐  │
//! │  │ TileFetcher  │  │  RetryPolicy    │  │
//! │  │ (remote or   │  │  (transient vs  │  │
//! │  │  stored)     │  │   permanent)    │  │
//! │  └──────────────┘  └─────────────────┘  │
//! └────────────────────┬────────────────────┘
//!                      │ FetchResult stream
//!                      ▼
//! ┌─────────────────────────────────────────┐
//! │            CanvasAssembler              │
//! └─────────────────────────────────────────┘
//! ```
//!
//! # Components
//!
//! - [`plan`] and [`TierPyramid`]: grid geometry, pure and deterministic
//! - [`TileFetcher`]: one tile's bytes, [`RemoteTileFetcher`] or [`StoredTileFetcher`]
//! - [`RetryPolicy`] / [`RetryState`]: bounded retry state machine
//! - [`FetchCoordinator`]: bounded concurrent dispatch with progress and cancellation
//! - [`CanvasAssembler`]: decodes tiles and copies them onto the canvas

mod canvas;
mod coordinator;
mod fetcher;
mod grid;
mod retry;

pub use canvas::{AssembledImage, CanvasAssembler, DEFAULT_FILL};
pub use coordinator::{
    FetchCoordinator, FetchResult, FetchRun, Progress, RunSummary, DEFAULT_CONCURRENCY,
};
pub use fetcher::{RemoteTileFetcher, StoredTileFetcher, TileFetcher};
pub use grid::{
    grid_dimensions, plan, ImageProperties, TierPyramid, TileCoordinate, TileDescriptor,
};
pub use retry::{
    Attempted, RetryPolicy, RetryState, DEFAULT_BASE_DELAY, DEFAULT_MAX_ATTEMPTS,
};
