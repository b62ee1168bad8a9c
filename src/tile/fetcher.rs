//! Single-tile retrieval.
//!
//! A [`TileFetcher`] turns one [`TileDescriptor`] into the raw bytes of the
//! tile. Two implementations exist:
//!
//! - [`RemoteTileFetcher`]: downloads through a [`Transport`] with bounded
//!   retry, optionally keeping a copy of every tile in a [`TileStore`]
//! - [`StoredTileFetcher`]: reads tiles kept by a previous run

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tracing::{debug, warn};

use crate::error::{FetchError, FetchReason, IoError};
use crate::io::{TileStore, Transport};

use super::grid::TileDescriptor;
use super::retry::RetryPolicy;

/// Retrieves the payload of one tile.
#[async_trait]
pub trait TileFetcher: Send + Sync {
    /// Fetch the bytes of `descriptor.source_address`.
    ///
    /// Failures are attributed to the descriptor's coordinate.
    async fn fetch(&self, descriptor: &TileDescriptor) -> Result<Bytes, FetchError>;
}

// =============================================================================
// Remote Fetcher
// =============================================================================

/// Downloads tiles with retry on transient failures.
pub struct RemoteTileFetcher<T: Transport + ?Sized> {
    transport: Arc<T>,
    policy: RetryPolicy,
    store: Option<TileStore>,
}

impl<T: Transport + ?Sized> RemoteTileFetcher<T> {
    pub fn new(transport: Arc<T>, policy: RetryPolicy) -> Self {
        Self {
            transport,
            policy,
            store: None,
        }
    }

    /// Also write every downloaded tile to `store`.
    pub fn with_store(mut self, store: TileStore) -> Self {
        self.store = Some(store);
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    async fn get_non_empty(&self, address: &str) -> Result<Bytes, IoError> {
        let bytes = self.transport.get(address).await?;
        if bytes.is_empty() {
            return Err(IoError::Empty {
                url: address.to_string(),
            });
        }
        Ok(bytes)
    }
}

#[async_trait]
impl<T: Transport + ?Sized> TileFetcher for RemoteTileFetcher<T> {
    async fn fetch(&self, descriptor: &TileDescriptor) -> Result<Bytes, FetchError> {
        let coordinate = descriptor.coordinate;
        let address = descriptor.source_address.as_str();

        let attempted = self
            .policy
            .execute(|attempt| {
                debug!(
                    col = coordinate.col,
                    row = coordinate.row,
                    attempt,
                    "Fetching tile"
                );
                self.get_non_empty(address)
            })
            .await;

        let bytes = attempted.outcome.map_err(|error| {
            FetchError::new(
                coordinate,
                address,
                error.fetch_reason(),
                attempted.attempts,
                error.to_string(),
            )
        })?;

        if let Some(store) = &self.store {
            if let Err(e) = store.save(coordinate, &bytes).await {
                warn!(
                    col = coordinate.col,
                    row = coordinate.row,
                    error = %e,
                    "Failed to store tile"
                );
            }
        }

        Ok(bytes)
    }
}

// =============================================================================
// Stored Fetcher
// =============================================================================

/// Reads tiles from a [`TileStore`] instead of the network.
#[derive(Debug, Clone)]
pub struct StoredTileFetcher {
    store: TileStore,
}

impl StoredTileFetcher {
    pub fn new(store: TileStore) -> Self {
        Self { store }
    }
}

#[async_trait]
impl TileFetcher for StoredTileFetcher {
    async fn fetch(&self, descriptor: &TileDescriptor) -> Result<Bytes, FetchError> {
        let coordinate = descriptor.coordinate;
        let path = self.store.path(coordinate);
        let address = path.display().to_string();

        match self.store.load(coordinate).await {
            Ok(Some(bytes)) if !bytes.is_empty() => Ok(bytes),
            Ok(Some(_)) => Err(FetchError::new(
                coordinate,
                address,
                FetchReason::Corrupt,
                1,
                "stored tile is empty",
            )),
            Ok(None) => Err(FetchError::new(
                coordinate,
                address,
                FetchReason::NotFound,
                1,
                "tile was not stored",
            )),
            Err(e) => Err(FetchError::new(
                coordinate,
                address,
                FetchReason::Corrupt,
                1,
                e.to_string(),
            )),
        }
    }
}
