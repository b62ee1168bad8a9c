//! Metadata resolution: from a page reference to image properties.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};
use url::Url;

use crate::error::ResolveError;
use crate::io::{escape_url, Transport};
use crate::tile::{ImageProperties, TierPyramid};

use super::page::{base_directory, find_image_path, with_trailing_slash};
use super::properties::{parse_properties, PROPERTIES_DOCUMENT};

// =============================================================================
// Resolver Trait
// =============================================================================

/// Result of resolving a page reference.
#[derive(Debug, Clone)]
pub struct ResolvedImage {
    /// Full-resolution properties of the image
    pub properties: ImageProperties,

    /// Directory holding the properties document and the tiles, ends with `/`
    pub base_url: Url,
}

impl ResolvedImage {
    /// Tile grid of every tier.
    pub fn pyramid(&self) -> TierPyramid {
        TierPyramid::for_properties(&self.properties)
    }
}

/// Discovers the tiling scheme behind a page reference.
#[async_trait]
pub trait MetadataResolver: Send + Sync {
    /// Resolve `reference` into the image properties and tile directory.
    ///
    /// No retries are attempted: a failure here aborts the run.
    async fn resolve(&self, reference: &str) -> Result<ResolvedImage, ResolveError>;
}

// =============================================================================
// Zoomify Resolver
// =============================================================================

/// How a page reference should be interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReferenceKind {
    /// Properties document if the URL names one, viewer page otherwise
    #[default]
    Auto,

    /// Viewer page embedding a Zoomify object
    Page,

    /// The tile directory itself
    Base,
}

/// Resolver for Zoomify deployments.
pub struct ZoomifyResolver<T: Transport + ?Sized> {
    transport: Arc<T>,
    kind: ReferenceKind,
}

impl<T: Transport + ?Sized> ZoomifyResolver<T> {
    pub fn new(transport: Arc<T>) -> Self {
        Self::with_kind(transport, ReferenceKind::Auto)
    }

    pub fn with_kind(transport: Arc<T>, kind: ReferenceKind) -> Self {
        Self { transport, kind }
    }

    /// Locate the tile directory for a reference.
    pub async fn base_directory(&self, reference: &str) -> Result<Url, ResolveError> {
        let url = escape_url(reference).map_err(|e| ResolveError::InvalidReference {
            reference: reference.to_string(),
            message: e.to_string(),
        })?;

        let names_document = url
            .path()
            .trim_end_matches('/')
            .ends_with(PROPERTIES_DOCUMENT);

        match self.kind {
            ReferenceKind::Base => Ok(directory_of(url, names_document)),
            ReferenceKind::Auto if names_document => Ok(directory_of(url, true)),
            ReferenceKind::Auto | ReferenceKind::Page => self.base_from_page(url).await,
        }
    }

    async fn base_from_page(&self, page_url: Url) -> Result<Url, ResolveError> {
        let body = self
            .transport
            .get(page_url.as_str())
            .await
            .map_err(|source| ResolveError::Unreachable {
                url: page_url.to_string(),
                source,
            })?;

        let content = String::from_utf8_lossy(&body);
        let image_path =
            find_image_path(&content).ok_or_else(|| ResolveError::ImagePathNotFound {
                url: page_url.to_string(),
            })?;

        info!(image_path = %image_path, "Found Zoomify image path");
        base_directory(&page_url, &image_path)
    }

    /// Fetch and parse the properties document of a tile directory.
    pub async fn properties(&self, base_url: &Url) -> Result<ImageProperties, ResolveError> {
        let document_url =
            base_url
                .join(PROPERTIES_DOCUMENT)
                .map_err(|e| ResolveError::InvalidReference {
                    reference: base_url.to_string(),
                    message: e.to_string(),
                })?;

        info!(url = %document_url, "Fetching image properties");
        let body = self
            .transport
            .get(document_url.as_str())
            .await
            .map_err(|source| ResolveError::Unreachable {
                url: document_url.to_string(),
                source,
            })?;

        parse_properties(&String::from_utf8_lossy(&body))
    }
}

#[async_trait]
impl<T: Transport + ?Sized> MetadataResolver for ZoomifyResolver<T> {
    async fn resolve(&self, reference: &str) -> Result<ResolvedImage, ResolveError> {
        let base_url = self.base_directory(reference).await?;
        debug!(base = %base_url, "Resolved tile directory");

        let properties = self.properties(&base_url).await?;
        info!(
            width = properties.width,
            height = properties.height,
            tile_size = properties.tile_size,
            tiers = properties.tier_count,
            "Image properties"
        );

        Ok(ResolvedImage {
            properties,
            base_url,
        })
    }
}

/// Directory URL of a reference, dropping a trailing properties document name.
fn directory_of(url: Url, names_document: bool) -> Url {
    if names_document {
        // Joining "." drops the last path segment.
        if let Ok(dir) = url.join(".") {
            return dir;
        }
    }
    with_trailing_slash(url)
}
