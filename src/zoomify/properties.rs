//! `ImageProperties.xml` parsing.
//!
//! The document is a single element whose attributes describe the image:
//!
//! ```xml
//! <IMAGE_PROPERTIES WIDTH="2679" HEIGHT="4000" NUMTILES="241" NUMIMAGES="1"
//!                   VERSION="1.8" TILESIZE="256"/>
//! ```
//!
//! Only the attributes are read, in any order, with either quote style.
//! Attribute names are matched case-insensitively.

use std::collections::HashMap;
use std::sync::OnceLock;

use regex::Regex;
use tracing::{debug, warn};

use crate::error::ResolveError;
use crate::tile::{ImageProperties, TierPyramid};

/// File name of the properties document inside the tile directory.
pub const PROPERTIES_DOCUMENT: &str = "ImageProperties.xml";

const TIER_COUNT_ATTRIBUTES: [&str; 2] = ["NUMTIERS", "TIERCOUNT"];

fn attribute_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"\b(\w+)\s*=\s*(?:"([^"]*)"|'([^']*)')"#).expect("attribute regex is valid")
    })
}

/// Collect every `NAME="value"` attribute of a document, names upper-cased.
pub fn parse_attributes(content: &str) -> HashMap<String, String> {
    attribute_regex()
        .captures_iter(content)
        .filter_map(|caps| {
            let name = caps.get(1)?.as_str().to_ascii_uppercase();
            let value = caps.get(2).or_else(|| caps.get(3))?.as_str().trim();
            Some((name, value.to_string()))
        })
        .collect()
}

/// Parse a properties document into [`ImageProperties`].
///
/// # Errors
///
/// - [`ResolveError::MalformedDocument`] if the document has no attributes or
///   a value is not a positive integer
/// - [`ResolveError::MissingField`] if `WIDTH`, `HEIGHT` or `TILESIZE` is absent
pub fn parse_properties(content: &str) -> Result<ImageProperties, ResolveError> {
    let attributes = parse_attributes(content);
    if attributes.is_empty() {
        return Err(ResolveError::MalformedDocument(
            "no attributes found".to_string(),
        ));
    }

    let width = required(&attributes, "WIDTH")?;
    let height = required(&attributes, "HEIGHT")?;
    let tile_size = required(&attributes, "TILESIZE")?;

    let declared_tiers = match TIER_COUNT_ATTRIBUTES
        .iter()
        .find(|name| attributes.contains_key(**name))
    {
        Some(name) => Some(number(&attributes, name)?),
        None => None,
    };

    let props = ImageProperties::new(width, height, tile_size, declared_tiers)?;

    let pyramid = TierPyramid::for_properties(&props);
    if let Some(declared) = declared_tiers {
        if declared as usize != pyramid.len() {
            warn!(
                declared,
                derived = pyramid.len(),
                "Declared tier count differs from the image pyramid"
            );
        }
    }

    if let Some(num_tiles) = attributes.get("NUMTILES") {
        let expected: u64 = pyramid.tiles_below(pyramid.max_tier() + 1);
        if num_tiles.parse::<u64>().ok() != Some(expected) {
            debug!(
                num_tiles = %num_tiles,
                expected,
                "NUMTILES does not match the derived pyramid"
            );
        }
    }

    Ok(props)
}

fn required(attributes: &HashMap<String, String>, name: &'static str) -> Result<u32, ResolveError> {
    if !attributes.contains_key(name) {
        return Err(ResolveError::MissingField(name));
    }
    number(attributes, name)
}

fn number(attributes: &HashMap<String, String>, name: &str) -> Result<u32, ResolveError> {
    let raw = attributes.get(name).map(String::as_str).unwrap_or_default();
    raw.parse::<u32>().map_err(|_| {
        ResolveError::MalformedDocument(format!("{} is not a valid number: '{}'", name, raw))
    })
}
