//! Test utilities for integration tests.
//!
//! This module provides a scripted mock transport and helpers that build a
//! complete Zoomify deployment (properties document plus tiles) in memory.

use async_trait::async_trait;
use bytes::Bytes;
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::{ImageEncoder, Rgb, RgbImage};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use url::Url;

use untiler::error::IoError;
use untiler::io::Transport;
use untiler::tile::{ImageProperties, RetryPolicy, TierPyramid, TileCoordinate};
use untiler::zoomify::{TileAddressBuilder, ZoomifyAddressBuilder};

// =============================================================================
// Scripted Mock Transport
// =============================================================================

/// One scripted answer of the mock transport.
#[derive(Debug, Clone)]
pub enum Reply {
    Body(Bytes),
    Status(u16),
    Timeout,
}

/// A mock transport that answers from a script and tracks every request.
///
/// Each URL has a sequence of replies; the n-th request gets the n-th reply
/// and the last reply repeats. Unknown URLs answer 404.
#[derive(Default)]
pub struct MockTransport {
    routes: HashMap<String, Vec<Reply>>,
    served: Mutex<HashMap<String, usize>>,
    request_count: Arc<AtomicUsize>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_body(self, url: impl Into<String>, body: impl Into<Bytes>) -> Self {
        self.with_script(url, vec![Reply::Body(body.into())])
    }

    pub fn with_script(mut self, url: impl Into<String>, replies: Vec<Reply>) -> Self {
        self.routes.insert(url.into(), replies);
        self
    }

    /// Serve every file of `site` below `base_url`.
    pub fn serving(mut self, base_url: &str, site: &TileSite) -> Self {
        for (path, body) in &site.files {
            self.routes.insert(
                format!("{}{}", base_url, path),
                vec![Reply::Body(body.clone())],
            );
        }
        self
    }

    pub fn request_count(&self) -> usize {
        self.request_count.load(Ordering::SeqCst)
    }

    pub fn requests_for(&self, url: &str) -> usize {
        self.served.lock().unwrap().get(url).copied().unwrap_or(0)
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn get(&self, url: &str) -> Result<Bytes, IoError> {
        self.request_count.fetch_add(1, Ordering::SeqCst);
        let index = {
            let mut served = self.served.lock().unwrap();
            let count = served.entry(url.to_string()).or_insert(0);
            *count += 1;
            *count - 1
        };

        let reply = self
            .routes
            .get(url)
            .and_then(|replies| replies.get(index).or_else(|| replies.last()))
            .cloned()
            .unwrap_or(Reply::Status(404));

        match reply {
            Reply::Body(body) => Ok(body),
            Reply::Status(status) => Err(IoError::Status {
                url: url.to_string(),
                status,
            }),
            Reply::Timeout => Err(IoError::Timeout {
                url: url.to_string(),
            }),
        }
    }
}

// =============================================================================
// Test Image Creation
// =============================================================================

/// Solid colour of the tile at `coordinate`, distinct for every tile.
pub fn tile_colour(coordinate: TileCoordinate) -> Rgb<u8> {
    Rgb([
        (20 + coordinate.col * 50) as u8,
        (30 + coordinate.row * 70) as u8,
        90,
    ])
}

/// Encode a solid tile as PNG (lossless).
pub fn create_png_tile(width: u32, height: u32, colour: Rgb<u8>) -> Bytes {
    let img = RgbImage::from_pixel(width, height, colour);
    let mut buf = Vec::new();
    PngEncoder::new(&mut buf)
        .write_image(img.as_raw(), width, height, image::ExtendedColorType::Rgb8)
        .unwrap();
    Bytes::from(buf)
}

/// Encode a solid tile as JPEG.
pub fn create_jpeg_tile(width: u32, height: u32, colour: Rgb<u8>) -> Bytes {
    let img = RgbImage::from_pixel(width, height, colour);
    let mut buf = Vec::new();
    let mut encoder = JpegEncoder::new_with_quality(&mut buf, 100);
    encoder.encode_image(&img).unwrap();
    Bytes::from(buf)
}

/// Whether two colours differ by at most `tolerance` per channel.
pub fn colour_close(a: Rgb<u8>, b: Rgb<u8>, tolerance: u8) -> bool {
    a.0.iter()
        .zip(b.0.iter())
        .all(|(x, y)| x.abs_diff(*y) <= tolerance)
}

/// Properties document for an image.
pub fn properties_xml(width: u32, height: u32, tile_size: u32) -> String {
    format!(
        r#"<IMAGE_PROPERTIES WIDTH="{}" HEIGHT="{}" NUMTILES="1" NUMIMAGES="1" VERSION="1.8" TILESIZE="{}" />"#,
        width, height, tile_size
    )
}

/// Retry policy with short delays for tests.
pub fn fast_retry() -> RetryPolicy {
    RetryPolicy::new(3, Duration::from_millis(1))
}

// =============================================================================
// Zoomify Site Builder
// =============================================================================

/// Encoding used for the tiles of a [`TileSite`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TileEncoding {
    Png,
    Jpeg,
}

/// An in-memory Zoomify deployment: relative path to file content.
pub struct TileSite {
    pub props: ImageProperties,
    pub files: HashMap<String, Bytes>,
}

impl TileSite {
    /// Build the properties document and every full-resolution tile.
    pub fn new(width: u32, height: u32, tile_size: u32, encoding: TileEncoding) -> Self {
        let props = ImageProperties::new(width, height, tile_size, None).unwrap();
        let mut files = HashMap::new();
        files.insert(
            "ImageProperties.xml".to_string(),
            Bytes::from(properties_xml(width, height, tile_size)),
        );

        let mut site = Self { props, files };
        for row in 0..props.rows() {
            for col in 0..props.columns() {
                let coordinate = TileCoordinate::new(col, row);
                let (w, h) = site.tile_size(coordinate);
                let body = match encoding {
                    TileEncoding::Png => create_png_tile(w, h, tile_colour(coordinate)),
                    TileEncoding::Jpeg => create_jpeg_tile(w, h, tile_colour(coordinate)),
                };
                let path = site.tile_path(coordinate);
                site.files.insert(path, body);
            }
        }
        site
    }

    /// Pixel size of a tile, cut at the right and bottom edges.
    pub fn tile_size(&self, coordinate: TileCoordinate) -> (u32, u32) {
        let ts = self.props.tile_size;
        (
            ts.min(self.props.width - coordinate.col * ts),
            ts.min(self.props.height - coordinate.row * ts),
        )
    }

    /// Path of a full-resolution tile relative to the tile directory.
    pub fn tile_path(&self, coordinate: TileCoordinate) -> String {
        let root = Url::parse("http://site.test/").unwrap();
        let pyramid = TierPyramid::for_properties(&self.props);
        let builder = ZoomifyAddressBuilder::new(&root, &pyramid, pyramid.max_tier()).unwrap();
        builder
            .address(coordinate)
            .trim_start_matches(root.as_str())
            .to_string()
    }

    /// Drop a tile so requests for it fail.
    pub fn remove_tile(&mut self, coordinate: TileCoordinate) {
        let path = self.tile_path(coordinate);
        self.files.remove(&path);
    }

    /// Replace the properties document.
    pub fn set_properties(&mut self, document: &str) {
        self.files.insert(
            "ImageProperties.xml".to_string(),
            Bytes::from(document.to_string()),
        );
    }
}
