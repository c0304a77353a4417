//! Filename extraction from response headers and URLs.

use std::path::{Component, Path};

use tracing::debug;
use url::Url;

/// File name carried by a `Content-Disposition` value, if any.
///
/// Parameter names are matched case-insensitively. An RFC 5987
/// `filename*` (`UTF-8''na%C3%AFve.txt`) takes precedence over a plain
/// `filename`, which may be quoted or bare.
pub(crate) fn parse_content_disposition(header: &str) -> Option<String> {
    let mut plain = None;
    for param in header.split(';') {
        let Some((key, value)) = param.split_once('=') else {
            continue;
        };
        let value = value.trim();
        match key.trim().to_ascii_lowercase().as_str() {
            "filename*" => {
                if let Some(name) = decode_extended_value(value) {
                    return Some(name);
                }
            }
            "filename" if plain.is_none() => {
                let name = value.trim_matches('"');
                if !name.is_empty() {
                    plain = Some(name.to_string());
                }
            }
            _ => {}
        }
    }
    plain
}

/// `charset'language'percent-encoded` to its decoded text.
fn decode_extended_value(value: &str) -> Option<String> {
    let (_, encoded) = value.trim_matches('"').split_once("''")?;
    urlencoding::decode(encoded)
        .ok()
        .map(std::borrow::Cow::into_owned)
        .filter(|name| !name.is_empty())
}

const RESERVED_CHARS: &[char] = &['/', '\\', ':', '*', '?', '"', '<', '>', '|'];

/// Makes `name` usable as a single path component.
///
/// Reserved and control characters become `_`; a name that would still
/// resolve to `.` or `..` has its dots replaced as well.
pub(crate) fn sanitize_filename(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| {
            if c.is_control() || RESERVED_CHARS.contains(&c) {
                '_'
            } else {
                c
            }
        })
        .collect();

    if cleaned.is_empty() {
        "_".to_string()
    } else if is_safe_filename_segment(&cleaned) {
        cleaned
    } else {
        cleaned.replace('.', "_")
    }
}

fn is_safe_filename_segment(name: &str) -> bool {
    !Path::new(name).components().any(|component| {
        matches!(
            component,
            Component::CurDir | Component::ParentDir | Component::RootDir | Component::Prefix(_)
        )
    })
}

/// Last non-empty URL path segment, percent-decoded and sanitized.
pub(crate) fn filename_from_url(url: &Url) -> Option<String> {
    let mut segments = url.path_segments()?;
    let last = segments.next_back().filter(|s| !s.is_empty())?;
    let decoded = urlencoding::decode(last).unwrap_or_else(|e| {
        debug!(segment = %last, error = %e, "URL decoding failed, using raw segment");
        last.into()
    });
    Some(sanitize_filename(&decoded))
}

/// Prefers Content-Disposition, then the URL path.
pub(crate) fn resolve_filename(content_disposition: Option<&str>, url: &Url) -> Option<String> {
    content_disposition
        .and_then(parse_content_disposition)
        .map(|name| sanitize_filename(&name))
        .or_else(|| filename_from_url(url))
}
