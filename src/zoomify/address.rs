//! Tile address builders.
//!
//! An address builder turns a grid coordinate into the URL of the tile. The
//! builder is chosen once per run; the planner calls it for every tile.

use url::Url;

use crate::tile::{TierPyramid, TileCoordinate};

/// Number of consecutive tile indices stored in one `TileGroupN` directory.
pub const TILES_PER_GROUP: u64 = 256;

/// Turns tile coordinates into fetchable addresses.
pub trait TileAddressBuilder: Send + Sync {
    /// Address of the tile at `coordinate`.
    fn address(&self, coordinate: TileCoordinate) -> String;
}

// =============================================================================
// Zoomify
// =============================================================================

/// Address builder for the Zoomify directory layout.
///
/// Tiles of every tier are numbered consecutively, smallest tier first and
/// row-major inside a tier, and grouped 256 to a directory:
///
/// ```text
/// <base>TileGroup<index / 256>/<tier>-<col>-<row>.jpg
/// ```
#[derive(Debug, Clone)]
pub struct ZoomifyAddressBuilder {
    base: String,
    tier: u32,
    columns: u32,
    tiles_below: u64,
}

impl ZoomifyAddressBuilder {
    /// Create a builder for one tier of the pyramid.
    ///
    /// Returns `None` if the tier does not exist.
    pub fn new(base_url: &Url, pyramid: &TierPyramid, tier: u32) -> Option<Self> {
        let (columns, _) = pyramid.grid(tier)?;
        let mut base = base_url.as_str().to_string();
        if !base.ends_with('/') {
            base.push('/');
        }

        Some(Self {
            base,
            tier,
            columns,
            tiles_below: pyramid.tiles_below(tier),
        })
    }

    /// Global index of a tile across the whole pyramid.
    pub fn tile_index(&self, coordinate: TileCoordinate) -> u64 {
        self.tiles_below + coordinate.row as u64 * self.columns as u64 + coordinate.col as u64
    }

    /// Tile group directory number of a tile.
    pub fn tile_group(&self, coordinate: TileCoordinate) -> u64 {
        self.tile_index(coordinate) / TILES_PER_GROUP
    }
}

impl TileAddressBuilder for ZoomifyAddressBuilder {
    fn address(&self, coordinate: TileCoordinate) -> String {
        format!(
            "{}TileGroup{}/{}-{}-{}.jpg",
            self.base,
            self.tile_group(coordinate),
            self.tier,
            coordinate.col,
            coordinate.row
        )
    }
}

// =============================================================================
// Template
// =============================================================================

/// Address builder driven by a user-supplied template.
///
/// Placeholders: `{col}` / `{x}`, `{row}` / `{y}`, `{tier}` / `{z}`.
#[derive(Debug, Clone)]
pub struct TemplateAddressBuilder {
    template: String,
    tier: u32,
}

impl TemplateAddressBuilder {
    pub fn new(template: impl Into<String>, tier: u32) -> Self {
        Self {
            template: template.into(),
            tier,
        }
    }

    /// Create a builder whose template may be relative to `base_url`.
    ///
    /// Absolute templates (`scheme://...`) are used as is, templates starting
    /// with `/` are relative to the origin, anything else to the base directory.
    pub fn relative_to(base_url: &Url, template: &str, tier: u32) -> Self {
        let template = if template.contains("://") {
            template.to_string()
        } else if template.starts_with('/') {
            format!("{}{}", base_url.origin().ascii_serialization(), template)
        } else {
            let mut base = base_url.as_str().to_string();
            if !base.ends_with('/') {
                base.push('/');
            }
            format!("{}{}", base, template)
        };
        Self::new(template, tier)
    }

    pub fn template(&self) -> &str {
        &self.template
    }
}

impl TileAddressBuilder for TemplateAddressBuilder {
    fn address(&self, coordinate: TileCoordinate) -> String {
        let col = coordinate.col.to_string();
        let row = coordinate.row.to_string();
        let tier = self.tier.to_string();

        self.template
            .replace("{col}", &col)
            .replace("{x}", &col)
            .replace("{row}", &row)
            .replace("{y}", &row)
            .replace("{tier}", &tier)
            .replace("{z}", &tier)
    }
}
