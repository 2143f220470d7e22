//! Resolution and comparison of resource locations.
//!
//! Comparison keys are for matching only and are never sent to a server.

use percent_encoding::percent_decode_str;
use url::Url;

use crate::error::{DavError, Result};

/// Resolve `target` against `base`.
///
/// Absolute targets are taken as-is; relative ones follow RFC 3986
/// reference resolution. With `assume_collection` the resulting path is
/// given a trailing `/` if it lacks one.
pub fn combine(base: &Url, target: &str, assume_collection: bool) -> Result<Url> {
    let mut url = match Url::parse(target) {
        Ok(url) => url,
        Err(url::ParseError::RelativeUrlWithoutBase) => base.join(target).map_err(|e| {
            DavError::InvalidInput(format!("Cannot resolve {:?} against {}: {}", target, base, e))
        })?,
        Err(e) => {
            return Err(DavError::InvalidInput(format!(
                "Invalid location {:?}: {}",
                target, e
            )))
        }
    };

    if assume_collection {
        ensure_collection(&mut url);
    }
    Ok(url)
}

/// Append a trailing `/` to the path of a hierarchical URL.
pub fn ensure_collection(url: &mut Url) {
    if url.cannot_be_a_base() || url.path().ends_with('/') {
        return;
    }
    let path = format!("{}/", url.path());
    url.set_path(&path);
}

/// Canonical key for prefix and equality tests: port removed,
/// percent-decoded, lower-cased, one trailing `/` removed.
pub fn normalize_for_compare(location: &str) -> String {
    let text = match Url::parse(location) {
        Ok(mut url) => {
            let _ = url.set_port(None);
            url.set_fragment(None);
            url.to_string()
        }
        Err(_) => location.to_string(),
    };

    let decoded = percent_decode_str(&text).decode_utf8_lossy().to_lowercase();
    match decoded.strip_suffix('/') {
        Some(stripped) => stripped.to_string(),
        None => decoded,
    }
}

/// Plain string-prefix containment of normalized keys.
///
/// Not segment aware: a root of `/a` also covers `/ab`.
pub fn is_under_or_equal(root: &str, target: &str) -> bool {
    normalize_for_compare(target).starts_with(&normalize_for_compare(root))
}

/// Whether two locations name the same resource after normalization.
pub fn same_resource(a: &str, b: &str) -> bool {
    normalize_for_compare(a) == normalize_for_compare(b)
}

/// Last non-empty path segment, percent-decoded.
pub fn last_segment(url: &Url) -> Option<String> {
    url.path_segments()?
        .rfind(|s| !s.is_empty())
        .map(|s| percent_decode_str(s).decode_utf8_lossy().into_owned())
}
