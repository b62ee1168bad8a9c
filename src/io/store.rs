use std::path::{Path, PathBuf};

use bytes::Bytes;
use tracing::debug;

use crate::error::StoreError;
use crate::tile::TileCoordinate;

/// Extension used for stored tiles.
pub const TILE_EXTENSION: &str = "jpg";

/// Directory of downloaded tiles, one file per tile named `<col>_<row>.jpg`.
///
/// Storing tiles lets a run be repeated (for instance after an assembly
/// problem) without downloading anything again.
#[derive(Debug, Clone)]
pub struct TileStore {
    root: PathBuf,
}

impl TileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Directory holding the tiles.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the file holding a tile.
    pub fn path(&self, coordinate: TileCoordinate) -> PathBuf {
        self.root.join(format!(
            "{}_{}.{}",
            coordinate.col, coordinate.row, TILE_EXTENSION
        ))
    }

    /// Create the directory if it does not exist yet.
    pub async fn ensure_dir(&self) -> Result<(), StoreError> {
        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|source| StoreError::Io {
                path: self.root.clone(),
                source,
            })
    }

    /// Write a tile, replacing any previous copy.
    pub async fn save(&self, coordinate: TileCoordinate, data: &[u8]) -> Result<(), StoreError> {
        let path = self.path(coordinate);
        tokio::fs::write(&path, data)
            .await
            .map_err(|source| StoreError::Io { path, source })?;
        debug!(col = coordinate.col, row = coordinate.row, "Stored tile");
        Ok(())
    }

    /// Read a stored tile, or `None` if it was never stored.
    pub async fn load(&self, coordinate: TileCoordinate) -> Result<Option<Bytes>, StoreError> {
        let path = self.path(coordinate);
        match tokio::fs::read(&path).await {
            Ok(data) => Ok(Some(Bytes::from(data))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(StoreError::Io { path, source }),
        }
    }
}
