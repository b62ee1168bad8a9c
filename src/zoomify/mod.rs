//! Zoomify tiling scheme support.
//!
//! This module knows how a Zoomify deployment is laid out on a web server:
//!
//! ```text
//! viewer page ──(embedded image path)──▶ <base>/
//!                                         ├── ImageProperties.xml
//!                                         ├── TileGroup0/
//!                                         │   ├── 0-0-0.jpg
//!                                         │   └── ...
//!                                         └── TileGroupN/
//! ```
//!
//! # Components
//!
//! - [`MetadataResolver`] / [`ZoomifyResolver`]: page reference to
//!   [`ResolvedImage`] (properties + tile directory)
//! - [`parse_properties`]: `ImageProperties.xml` parsing
//! - [`find_image_path`]: image path extraction from viewer pages
//! - [`TileAddressBuilder`]: coordinate to tile URL, either
//!   [`ZoomifyAddressBuilder`] or a user [`TemplateAddressBuilder`]

mod address;
mod page;
mod properties;
mod resolver;

pub use address::{
    TemplateAddressBuilder, TileAddressBuilder, ZoomifyAddressBuilder, TILES_PER_GROUP,
};
pub use page::{base_directory, find_image_path, with_trailing_slash};
pub use properties::{parse_attributes, parse_properties, PROPERTIES_DOCUMENT};
pub use resolver::{MetadataResolver, ReferenceKind, ResolvedImage, ZoomifyResolver};
