//! Locating the tile directory from a viewer page.
//!
//! Zoomify viewers embed the image path in several ways depending on the
//! viewer generation (Flash parameters, cache paths, HTML5 tile URLs,
//! `showImage` calls). The patterns are tried in order and the first match
//! wins.

use std::sync::OnceLock;

use regex::Regex;
use url::Url;

use crate::error::ResolveError;

/// How to extract the image path from a match.
struct ImagePathPattern {
    regex: Regex,
    /// Capture groups holding the path; the first one that matched is used.
    groups: &'static [usize],
}

fn patterns() -> &'static [ImagePathPattern] {
    static PATTERNS: OnceLock<Vec<ImagePathPattern>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        let table: [(&str, &'static [usize]); 4] = [
            // Flash viewer parameter.
            (r#"zoomifyImagePath=([^'"&]*)['"&]"#, &[1]),
            // Cached copies served by some CMSs.
            (r#"ZoomifyCache/[^'"&.]+\.\d+x\d+"#, &[0]),
            // HTML5 viewer, any quoted string pointing inside the tile tree.
            (
                r#""([^"']+)/TileGroup0[^"']*"|'([^"']+)/TileGroup0[^"']*'"#,
                &[1, 2],
            ),
            // JavaScript viewer v1.8.
            (
                r#"showImage\([^,]+, *(?:"([^"']+)"|'([^"']+)')"#,
                &[1, 2],
            ),
        ];

        table
            .into_iter()
            .map(|(pattern, groups)| ImagePathPattern {
                regex: Regex::new(pattern).expect("image path regex is valid"),
                groups,
            })
            .collect()
    })
}

/// Find the tiled image path referenced by a viewer page.
pub fn find_image_path(content: &str) -> Option<String> {
    patterns().iter().find_map(|pattern| {
        let caps = pattern.regex.captures(content)?;
        pattern
            .groups
            .iter()
            .find_map(|&group| caps.get(group))
            .map(|m| m.as_str().to_string())
    })
}

/// Resolve an image path found in a page into the absolute tile directory.
///
/// The path is percent-decoded, joined against the page URL and always ends
/// with `/`.
pub fn base_directory(page_url: &Url, image_path: &str) -> Result<Url, ResolveError> {
    let decoded = urlencoding::decode(image_path)
        .map(|s| s.into_owned())
        .unwrap_or_else(|_| image_path.to_string());

    let joined = page_url
        .join(&decoded)
        .map_err(|e| ResolveError::InvalidReference {
            reference: decoded.clone(),
            message: e.to_string(),
        })?;

    Ok(with_trailing_slash(joined))
}

/// Ensure a directory URL ends with `/` so relative joins stay inside it.
pub fn with_trailing_slash(mut url: Url) -> Url {
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    url
}
