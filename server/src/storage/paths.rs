//! Key and path semantics for the flat S3 key space.
//!
//! Keys use `/` as the only separator. A key ending in `/` is directory-like.

use percent_encoding::percent_decode_str;
use url::Url;

pub const SEPARATOR: char = '/';

/// Normalize a path coming from the browser: percent-decode and strip one leading `/`.
/// Returns `None` for an empty result.
pub fn fix_path(path: &str) -> Option<String> {
    let decoded = percent_decode_str(path).decode_utf8_lossy();
    let trimmed = decoded.strip_prefix(SEPARATOR).unwrap_or(&decoded);
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

pub fn is_dir(key: &str) -> bool {
    key.ends_with(SEPARATOR)
}

pub fn is_leaf(key: &str) -> bool {
    !is_dir(key)
}

/// True for keys at the top of a bucket: no separator, or only a trailing one.
pub fn is_top_level(key: &str) -> bool {
    match key.find(SEPARATOR) {
        None => !key.is_empty(),
        Some(idx) => idx == key.len() - 1,
    }
}

/// Containment test between a key and a parent path.
///
/// An empty parent accepts top-level keys only. A non-empty parent accepts any key
/// that strictly extends it, however deep.
pub fn is_child(key: &str, parent: &str) -> bool {
    if parent.is_empty() {
        is_top_level(key)
    } else {
        key.len() > parent.len() && key.starts_with(parent)
    }
}

/// [`is_child`] restricted to one level: the part after `parent` must itself be top-level.
///
/// Both listing and single-node lookup go through this predicate.
pub fn is_direct_child(key: &str, parent: &str) -> bool {
    is_child(key, parent) && is_top_level(&key[parent.len()..])
}

/// Key of the directory containing `key`, including its trailing separator.
/// `None` for top-level keys.
pub fn parent_key(key: &str) -> Option<&str> {
    let stem = key.strip_suffix(SEPARATOR).unwrap_or(key);
    stem.rfind(SEPARATOR).map(|idx| &key[..=idx])
}

/// Last path component, without a trailing separator.
pub fn basename(key: &str) -> &str {
    let stem = key.strip_suffix(SEPARATOR).unwrap_or(key);
    match stem.rfind(SEPARATOR) {
        Some(idx) => &stem[idx + 1..],
        None => stem,
    }
}

/// Virtual-hosted-style HTTPS URL for browser links.
pub fn create_url(bucket: &str, key: &str) -> Result<Url, url::ParseError> {
    let base = Url::parse(&format!("https://{bucket}.s3.amazonaws.com/"))?;
    base.join(key.trim_start_matches(SEPARATOR))
}

/// `s3://bucket/key` URI handed to the loader utility.
pub fn create_s3_uri(bucket: &str, key: &str) -> String {
    format!("s3://{bucket}/{}", key.trim_start_matches(SEPARATOR))
}
