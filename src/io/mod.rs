mod store;
mod transport;

pub use store::{TileStore, TILE_EXTENSION};
pub use transport::{
    escape_url, HttpTransport, Transport, DEFAULT_REFERER, DEFAULT_REQUEST_TIMEOUT,
    DEFAULT_USER_AGENT,
};
