//! Cache key construction for walked paths.
//!
//! Records are keyed by the path relative to the walked root, with `/`
//! separators and Unicode normalized to NFC, so that:
//!
//! - moving the whole tree (or mounting it elsewhere) keeps the cache valid;
//! - the same store works on Windows and Unix;
//! - macOS NFD filenames and NFC filenames from other systems map to the
//!   same key.
//!
//! # Example
//!
//! ```
//! use std::path::Path;
//! use filestamp::scanner::path_utils::cache_key;
//!
//! let root = Path::new("/srv/site");
//! let key = cache_key(root, Path::new("/srv/site/blog/cafe\u{0301}.html"));
//! assert_eq!(key.as_deref(), Some("blog/café.html"));
//! ```

use std::borrow::Cow;
use std::path::{Component, Path};
use unicode_normalization::UnicodeNormalization;

/// Normalize a path string to NFC (Composed) form.
#[must_use]
pub fn normalize_path_str(s: &str) -> String {
    s.nfc().collect()
}

/// Normalize to NFC, borrowing when the input already is.
#[must_use]
pub fn normalize_path_str_cow(s: &str) -> Cow<'_, str> {
    if unicode_normalization::is_nfc(s) {
        Cow::Borrowed(s)
    } else {
        Cow::Owned(normalize_path_str(s))
    }
}

/// Check if two path strings are equal after NFC normalization.
#[must_use]
pub fn paths_equal(a: &str, b: &str) -> bool {
    normalize_path_str_cow(a) == normalize_path_str_cow(b)
}

/// Cache key for `path` under `root`.
///
/// Returns `None` when `path` is not inside `root`, when it is `root`
/// itself, or when a component is not valid UTF-8 (such a key could not
/// round-trip through the store's TEXT column).
#[must_use]
pub fn cache_key(root: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;

    let mut parts = Vec::new();
    for component in relative.components() {
        match component {
            Component::Normal(part) => parts.push(normalize_path_str_cow(part.to_str()?).into_owned()),
            Component::CurDir => {}
            _ => return None,
        }
    }

    if parts.is_empty() {
        None
    } else {
        Some(parts.join("/"))
    }
}

/// Whether `key` is `prefix` or lies underneath it.
#[must_use]
pub fn key_is_within(key: &str, prefix: &str) -> bool {
    prefix.is_empty()
        || key == prefix
        || (key.starts_with(prefix) && key.as_bytes().get(prefix.len()) == Some(&b'/'))
}
