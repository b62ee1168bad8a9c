use std::fmt;
use std::path::PathBuf;

use serde::Serialize;
use thiserror::Error;

use crate::tile::TileCoordinate;

/// Transport-level errors returned when fetching a remote resource.
#[derive(Debug, Clone, Error)]
pub enum IoError {
    /// The request did not complete within the configured timeout
    #[error("Request timed out: {url}")]
    Timeout { url: String },

    /// Connection could not be established or was reset
    #[error("Connection error for {url}: {message}")]
    Connection { url: String, message: String },

    /// Server answered with a non-success status code
    #[error("HTTP {status} for {url}")]
    Status { url: String, status: u16 },

    /// Response body could not be read to the end
    #[error("Failed to read body of {url}: {message}")]
    Body { url: String, message: String },

    /// Server answered with an empty payload
    #[error("Empty response body from {url}")]
    Empty { url: String },

    /// Address is not a valid URL
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
}

impl IoError {
    /// Whether retrying the same request might succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            IoError::Timeout { .. } | IoError::Connection { .. } | IoError::Body { .. } => true,
            IoError::Status { status, .. } => *status >= 500 || *status == 429,
            IoError::Empty { .. } | IoError::InvalidUrl(_) => false,
        }
    }

    /// Map a transport failure onto the per-tile failure taxonomy.
    pub fn fetch_reason(&self) -> FetchReason {
        match self {
            IoError::Timeout { .. } => FetchReason::Timeout,
            IoError::Connection { .. } => FetchReason::Connection,
            IoError::Status { status, .. } if *status >= 500 || *status == 429 => {
                FetchReason::ServerError
            }
            IoError::Status { .. } => FetchReason::NotFound,
            IoError::Body { .. } | IoError::Empty { .. } | IoError::InvalidUrl(_) => {
                FetchReason::Corrupt
            }
        }
    }
}

// =============================================================================
// Resolution
// =============================================================================

/// Coarse classification of a [`ResolveError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolveReason {
    Unreachable,
    MalformedDocument,
    MissingField,
}

/// Errors raised while discovering the tiling scheme of an image.
///
/// All of these are fatal: nothing downstream can run without the image
/// properties, so the run stops before any tile is requested.
#[derive(Debug, Clone, Error)]
pub enum ResolveError {
    /// The page reference is not a usable URL
    #[error("Invalid page reference '{reference}': {message}")]
    InvalidReference { reference: String, message: String },

    /// The viewer page or the properties document could not be fetched
    #[error("Could not fetch {url}: {source}")]
    Unreachable {
        url: String,
        #[source]
        source: IoError,
    },

    /// The viewer page does not reference any tiled image
    #[error("No tiled image found in page {url}")]
    ImagePathNotFound { url: String },

    /// The properties document could not be interpreted
    #[error("Malformed properties document: {0}")]
    MalformedDocument(String),

    /// A required attribute is absent from the properties document
    #[error("Properties document is missing required field {0}")]
    MissingField(&'static str),
}

impl ResolveError {
    pub fn reason(&self) -> ResolveReason {
        match self {
            ResolveError::Unreachable { .. } => ResolveReason::Unreachable,
            ResolveError::MissingField(_) => ResolveReason::MissingField,
            ResolveError::InvalidReference { .. }
            | ResolveError::ImagePathNotFound { .. }
            | ResolveError::MalformedDocument(_) => ResolveReason::MalformedDocument,
        }
    }
}

// =============================================================================
// Tile fetching
// =============================================================================

/// Why a single tile could not be placed on the canvas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchReason {
    Timeout,
    NotFound,
    ServerError,
    Corrupt,
    Connection,
    /// The tile was never reported, because the run was cancelled or its
    /// worker died.
    Aborted,
}

impl fmt::Display for FetchReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FetchReason::Timeout => "timeout",
            FetchReason::NotFound => "not found",
            FetchReason::ServerError => "server error",
            FetchReason::Corrupt => "corrupt payload",
            FetchReason::Connection => "connection failure",
            FetchReason::Aborted => "aborted",
        };
        f.write_str(name)
    }
}

/// A tile that could not be fetched or decoded, attributed to its coordinate.
#[derive(Debug, Clone, Error, Serialize)]
#[error("Tile (col {}, row {}) failed after {attempts} attempt(s): {reason}: {message}", .coordinate.col, .coordinate.row)]
pub struct FetchError {
    pub coordinate: TileCoordinate,
    pub address: String,
    pub reason: FetchReason,
    pub attempts: u32,
    pub message: String,
}

impl FetchError {
    pub fn new(
        coordinate: TileCoordinate,
        address: impl Into<String>,
        reason: FetchReason,
        attempts: u32,
        message: impl Into<String>,
    ) -> Self {
        Self {
            coordinate,
            address: address.into(),
            reason,
            attempts,
            message: message.into(),
        }
    }
}

// =============================================================================
// Assembly and output
// =============================================================================

/// Misuse of the canvas assembler.
///
/// Decoding problems are not reported here: a tile whose payload does not
/// decode to the expected size is recorded as a `Corrupt` [`FetchError`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AssemblyError {
    /// Descriptor rectangle does not lie inside the canvas
    #[error("Tile (col {col}, row {row}) lies outside the {width}x{height} canvas")]
    OutOfBounds {
        col: u32,
        row: u32,
        width: u32,
        height: u32,
    },

    /// The same tile was reported twice
    #[error("Tile (col {col}, row {row}) was already reported")]
    Duplicate { col: u32, row: u32 },

    /// Tile does not belong to the plan this assembler was built for
    #[error("Tile (col {col}, row {row}) is not part of the plan")]
    UnknownTile { col: u32, row: u32 },

    /// The canvas cannot be allocated
    #[error("A {width}x{height} canvas is too large to allocate")]
    CanvasTooLarge { width: u32, height: u32 },

    /// Some planned tiles were neither written nor marked failed
    #[error("{unreported} of {expected} tile(s) were never reported")]
    Incomplete { expected: usize, unreported: usize },
}

/// Errors from the tile store on disk.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Tile store I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Errors from writing the assembled image.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("Could not create {path}: {source}")]
    Create {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Could not encode {path}: {message}")]
    Encode { path: PathBuf, message: String },
}

/// Fatal errors of a complete untiling run.
#[derive(Debug, Error)]
pub enum UntileError {
    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error(transparent)]
    Assembly(#[from] AssemblyError),
}
