//! The untiling pipeline.
//!
//! [`Untiler`] wires the stages together for one page reference:
//!
//! ```text
//! resolve ─▶ select tier ─▶ address builder ─▶ plan ─▶ dispatch ─▶ write ─▶ finish
//! ```
//!
//! Results are written to the canvas by this task alone, in arrival order.

use std::sync::Arc;

use image::Rgb;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::{FetchError, FetchReason, ResolveError, UntileError};
use crate::tile::{
    plan, AssembledImage, CanvasAssembler, FetchCoordinator, Progress, TileFetcher,
    DEFAULT_CONCURRENCY, DEFAULT_FILL,
};
use crate::zoomify::{
    MetadataResolver, TemplateAddressBuilder, TileAddressBuilder, ZoomifyAddressBuilder,
};

/// Tunables of a run.
#[derive(Debug, Clone)]
pub struct UntilerOptions {
    /// Concurrent tile fetches
    pub concurrency: usize,

    /// Requested tier; `None` is the full resolution, negative counts from the top
    pub tier: Option<i32>,

    /// Tile address template overriding the Zoomify layout
    pub template: Option<String>,

    /// Colour of missing regions
    pub fill: Rgb<u8>,
}

impl Default for UntilerOptions {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            tier: None,
            template: None,
            fill: DEFAULT_FILL,
        }
    }
}

/// Machine-readable account of a run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub reference: String,
    pub base_url: String,
    pub tier: u32,
    pub tier_count: u32,
    pub width: u32,
    pub height: u32,
    pub tile_size: u32,
    pub tiles: usize,
    pub placed: usize,
    pub cancelled: bool,
    pub missing: Vec<FetchError>,
}

impl RunReport {
    pub fn is_complete(&self) -> bool {
        self.missing.is_empty()
    }
}

/// Canvas and report of a finished run.
#[derive(Debug)]
pub struct UntileOutcome {
    pub image: AssembledImage,
    pub report: RunReport,
}

/// Reconstructs images from their tiles.
pub struct Untiler<R: MetadataResolver + ?Sized, F: TileFetcher + ?Sized + 'static> {
    resolver: Arc<R>,
    fetcher: Arc<F>,
    options: UntilerOptions,
}

impl<R, F> Untiler<R, F>
where
    R: MetadataResolver + ?Sized,
    F: TileFetcher + ?Sized + 'static,
{
    pub fn new(resolver: Arc<R>, fetcher: Arc<F>, options: UntilerOptions) -> Self {
        Self {
            resolver,
            fetcher,
            options,
        }
    }

    pub fn options(&self) -> &UntilerOptions {
        &self.options
    }

    /// Untile the image behind `reference`.
    ///
    /// Missing tiles are not an error; they are listed in the outcome.
    pub async fn untile(
        &self,
        reference: &str,
        cancel: CancellationToken,
    ) -> Result<UntileOutcome, UntileError> {
        self.untile_observed(reference, cancel, |_| {}).await
    }

    /// Like [`untile`](Self::untile), calling `observe` after every tile.
    pub async fn untile_observed<O>(
        &self,
        reference: &str,
        cancel: CancellationToken,
        mut observe: O,
    ) -> Result<UntileOutcome, UntileError>
    where
        O: FnMut(&Progress) + Send,
    {
        let resolved = self.resolver.resolve(reference).await?;
        let pyramid = resolved.pyramid();

        let tier = match pyramid.select(self.options.tier) {
            Ok(tier) => tier,
            Err(max) => {
                warn!(
                    requested = ?self.options.tier,
                    available = pyramid.len(),
                    "Requested tier does not exist, using full resolution"
                );
                max
            }
        };
        let props = resolved.properties.at_tier(tier, pyramid.max_tier());

        let addresses: Box<dyn TileAddressBuilder> = match &self.options.template {
            Some(template) => Box::new(TemplateAddressBuilder::relative_to(
                &resolved.base_url,
                template,
                tier,
            )),
            None => Box::new(
                ZoomifyAddressBuilder::new(&resolved.base_url, &pyramid, tier).ok_or_else(
                    || ResolveError::MalformedDocument(format!("tier {} is not in the pyramid", tier)),
                )?,
            ),
        };

        let descriptors = plan(&props, addresses.as_ref());
        info!(
            tier,
            width = props.width,
            height = props.height,
            columns = props.columns(),
            rows = props.rows(),
            tiles = descriptors.len(),
            "Planned tile grid"
        );

        let mut assembler =
            CanvasAssembler::with_fill(&props, &descriptors, self.options.fill)?;
        let coordinator = FetchCoordinator::new(Arc::clone(&self.fetcher), self.options.concurrency)
            .with_cancellation(cancel);

        let mut run = coordinator.dispatch(descriptors);
        let progress = run.progress();
        while let Some(result) = run.next().await {
            assembler.write(result)?;
            observe(&progress);
        }
        let summary = run.finish().await;

        if summary.cancelled {
            assembler.mark_unreported(FetchReason::Aborted, "run cancelled before the tile was fetched");
        }
        if summary.lost > 0 {
            assembler.mark_unreported(FetchReason::Aborted, "fetch task died");
        }

        let image = assembler.finish()?;
        let report = RunReport {
            reference: reference.to_string(),
            base_url: resolved.base_url.to_string(),
            tier,
            tier_count: resolved.properties.tier_count,
            width: props.width,
            height: props.height,
            tile_size: props.tile_size,
            tiles: progress.total(),
            placed: progress.total().saturating_sub(image.missing.len()),
            cancelled: summary.cancelled,
            missing: image.missing.clone(),
        };

        if report.is_complete() {
            info!(tiles = report.tiles, "All tiles placed");
        } else {
            warn!(
                missing = report.missing.len(),
                tiles = report.tiles,
                "Image assembled with missing tiles"
            );
        }

        Ok(UntileOutcome { image, report })
    }
}
