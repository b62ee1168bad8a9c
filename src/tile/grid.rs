//! Tile grid geometry.
//!
//! Given the global properties of an image, this module computes which tiles
//! exist at a tier and which pixel rectangle each one covers on the final
//! canvas. Everything here is pure: no I/O, deterministic output.
//!
//! # Edge tiles
//!
//! Tiles are `tile_size` pixels square except along the right and bottom
//! edges, where they are cut to the remaining width or height:
//!
//! ```text
//!  width = 1000, height = 700, tile_size = 512
//!
//!  ┌──────────── 512 ───────────┬───── 488 ─────┐
//!  │ (0,0)                      │ (1,0)         │ 512
//!  ├────────────────────────────┼───────────────┤
//!  │ (0,1)                      │ (1,1)         │ 188
//!  └────────────────────────────┴───────────────┘
//! ```

use std::fmt;

use serde::Serialize;

use crate::error::ResolveError;
use crate::zoomify::TileAddressBuilder;

// =============================================================================
// Image Properties
// =============================================================================

/// Largest accepted image, in pixels.
pub const MAX_PIXELS: u64 = 1 << 32;

/// Largest accepted tile grid at full resolution.
pub const MAX_TILES: u64 = 1 << 24;

/// Global properties of a tiled image at one resolution tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ImageProperties {
    /// Image width in pixels
    pub width: u32,

    /// Image height in pixels
    pub height: u32,

    /// Edge length of a full tile in pixels
    pub tile_size: u32,

    /// Number of resolution tiers in the pyramid
    pub tier_count: u32,
}

impl ImageProperties {
    /// Create validated properties.
    ///
    /// `tier_count` of `None` derives the count from the image pyramid.
    pub fn new(
        width: u32,
        height: u32,
        tile_size: u32,
        tier_count: Option<u32>,
    ) -> Result<Self, ResolveError> {
        if width == 0 || height == 0 {
            return Err(ResolveError::MalformedDocument(format!(
                "image dimensions must be positive, got {}x{}",
                width, height
            )));
        }
        if tile_size == 0 {
            return Err(ResolveError::MalformedDocument(
                "tile size must be positive".to_string(),
            ));
        }
        let pixels = (width as u64).checked_mul(height as u64);
        if pixels.map_or(true, |p| p > MAX_PIXELS) {
            return Err(ResolveError::MalformedDocument(format!(
                "image of {}x{} pixels is too large",
                width, height
            )));
        }
        let tiles = (width.div_ceil(tile_size) as u64) * (height.div_ceil(tile_size) as u64);
        if tiles > MAX_TILES {
            return Err(ResolveError::MalformedDocument(format!(
                "{} tiles of {} pixels is too many",
                tiles, tile_size
            )));
        }
        if tier_count == Some(0) {
            return Err(ResolveError::MalformedDocument(
                "tier count must be positive".to_string(),
            ));
        }

        let tier_count = tier_count
            .unwrap_or_else(|| TierPyramid::for_image(width, height, tile_size).len() as u32);

        Ok(Self {
            width,
            height,
            tile_size,
            tier_count,
        })
    }

    /// Number of tile columns, `ceil(width / tile_size)`.
    pub fn columns(&self) -> u32 {
        self.width.div_ceil(self.tile_size)
    }

    /// Number of tile rows, `ceil(height / tile_size)`.
    pub fn rows(&self) -> u32 {
        self.height.div_ceil(self.tile_size)
    }

    /// Total number of tiles at this tier.
    pub fn tile_count(&self) -> usize {
        self.columns() as usize * self.rows() as usize
    }

    /// Whether a coordinate falls inside the tile grid.
    pub fn contains(&self, coordinate: TileCoordinate) -> bool {
        coordinate.col < self.columns() && coordinate.row < self.rows()
    }

    /// Properties of a lower tier of the pyramid.
    ///
    /// Each step down halves both dimensions (integer floor). `tier` counts
    /// from 0 (smallest); values at or above `max_tier` return `self`.
    pub fn at_tier(&self, tier: u32, max_tier: u32) -> ImageProperties {
        let shift = max_tier.saturating_sub(tier).min(31);
        ImageProperties {
            width: (self.width >> shift).max(1),
            height: (self.height >> shift).max(1),
            tile_size: self.tile_size,
            tier_count: self.tier_count,
        }
    }
}

// =============================================================================
// Tier Pyramid
// =============================================================================

/// Tile-grid dimensions of every tier, smallest tier first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TierPyramid {
    tiers: Vec<(u32, u32)>,
}

impl TierPyramid {
    /// Build the pyramid by halving the full-resolution size until a tier
    /// fits in a single tile.
    pub fn for_image(width: u32, height: u32, tile_size: u32) -> Self {
        let mut tiers = Vec::new();
        let mut w = width.max(1);
        let mut h = height.max(1);

        loop {
            let cols = w.div_ceil(tile_size).max(1);
            let rows = h.div_ceil(tile_size).max(1);
            tiers.push((cols, rows));

            if cols == 1 && rows == 1 {
                break;
            }

            w = (w / 2).max(1);
            h = (h / 2).max(1);
        }

        tiers.reverse();
        Self { tiers }
    }

    /// Pyramid of the given full-resolution properties.
    pub fn for_properties(props: &ImageProperties) -> Self {
        Self::for_image(props.width, props.height, props.tile_size)
    }

    /// Number of tiers.
    pub fn len(&self) -> usize {
        self.tiers.len()
    }

    /// Always false: every image has at least one tier.
    pub fn is_empty(&self) -> bool {
        self.tiers.is_empty()
    }

    /// Index of the full-resolution tier.
    pub fn max_tier(&self) -> u32 {
        self.tiers.len().saturating_sub(1) as u32
    }

    /// `(columns, rows)` at a tier.
    pub fn grid(&self, tier: u32) -> Option<(u32, u32)> {
        self.tiers.get(tier as usize).copied()
    }

    /// Number of tiles in all tiers strictly below `tier`.
    pub fn tiles_below(&self, tier: u32) -> u64 {
        self.tiers
            .iter()
            .take(tier as usize)
            .map(|&(c, r)| c as u64 * r as u64)
            .sum()
    }

    /// Map a requested tier onto a valid tier index.
    ///
    /// `None` selects the maximum tier. Negative values count down from the
    /// top (`-1` is the maximum tier). Out-of-range requests return `Err`
    /// carrying the maximum tier so callers can fall back to it.
    pub fn select(&self, requested: Option<i32>) -> Result<u32, u32> {
        let max = self.max_tier();
        let Some(requested) = requested else {
            return Ok(max);
        };

        let index = if requested < 0 {
            self.tiers.len() as i64 + requested as i64
        } else {
            requested as i64
        };

        if index >= 0 && index <= max as i64 {
            Ok(index as u32)
        } else {
            Err(max)
        }
    }
}

// =============================================================================
// Tile Coordinates and Descriptors
// =============================================================================

/// Zero-based position of a tile in the grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct TileCoordinate {
    pub col: u32,
    pub row: u32,
}

impl TileCoordinate {
    pub fn new(col: u32, row: u32) -> Self {
        Self { col, row }
    }
}

impl fmt::Display for TileCoordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(col {}, row {})", self.col, self.row)
    }
}

/// Everything needed to fetch one tile and place it on the canvas.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TileDescriptor {
    /// Grid position
    pub coordinate: TileCoordinate,

    /// Top-left pixel of the tile on the canvas
    pub origin: (u32, u32),

    /// Width of the tile in pixels
    pub width: u32,

    /// Height of the tile in pixels
    pub height: u32,

    /// Where the tile is fetched from
    pub source_address: String,
}

impl TileDescriptor {
    /// Exclusive bottom-right corner of the tile rectangle.
    pub fn end(&self) -> (u32, u32) {
        (self.origin.0 + self.width, self.origin.1 + self.height)
    }
}

// =============================================================================
// Planner
// =============================================================================

/// Grid size of the image as `(columns, rows)`.
pub fn grid_dimensions(props: &ImageProperties) -> (u32, u32) {
    (props.columns(), props.rows())
}

/// Compute every tile descriptor of the image, in row-major order.
pub fn plan(props: &ImageProperties, addresses: &dyn TileAddressBuilder) -> Vec<TileDescriptor> {
    let ts = props.tile_size;
    let cols = props.columns();
    let rows = props.rows();

    let mut descriptors = Vec::with_capacity(props.tile_count());
    for row in 0..rows {
        for col in 0..cols {
            let coordinate = TileCoordinate::new(col, row);
            let x = col * ts;
            let y = row * ts;
            descriptors.push(TileDescriptor {
                coordinate,
                origin: (x, y),
                width: ts.min(props.width - x),
                height: ts.min(props.height - y),
                source_address: addresses.address(coordinate),
            });
        }
    }

    descriptors
}

// =============================================================================
// Tests
// =============================================================================
