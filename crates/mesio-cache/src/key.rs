//! # Cache Keys
//!
//! Stable identities for cached resources. A key is a URL plus an optional
//! byte range; its hash names the files backing the entry.

use sha1::{Digest, Sha1};

use crate::config::CacheConfig;
use crate::error::{CacheError, CacheResult};

/// Longest extension (dot included) kept from the URL
const MAX_EXTENSION_LEN: usize = 5;

/// Cache key for identifying resources
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    /// URL of the resource
    pub url: String,
    /// Requested byte range, `None` for the whole resource
    pub range: Option<(u64, u64)>,
}

impl CacheKey {
    /// Create a new cache key. A `(0, 0)` range means the whole resource.
    pub fn new(url: impl Into<String>, range: Option<(u64, u64)>) -> Self {
        Self {
            url: url.into(),
            range: range.filter(|r| *r != (0, 0)),
        }
    }

    /// The range as stored on entries, `(0, 0)` for the whole resource
    pub fn range_or_default(&self) -> (u64, u64) {
        self.range.unwrap_or((0, 0))
    }

    /// String fed to the hash function
    pub fn hash_input(&self) -> String {
        match self.range {
            Some((start, end)) => format!("{}_{}-{}", self.url, start, end),
            None => self.url.clone(),
        }
    }

    /// Derive the hash and file name base for this key
    pub fn derive(&self, config: &CacheConfig) -> CacheResult<DerivedKey> {
        if self.url.is_empty() {
            return Err(CacheError::InvalidUrl("empty URL".to_string()));
        }

        let mut hasher = Sha1::new();
        hasher.update(self.hash_input().as_bytes());
        let hash_hex = hex::encode_upper(hasher.finalize());

        let extension =
            url_extension(&self.url).unwrap_or_else(|| config.default_extension.clone());
        let filename_base = format!("{}{}{}", config.file_prefix, hash_hex, extension);

        Ok(DerivedKey {
            hash_hex,
            filename_base,
        })
    }
}

/// Identity derived from a [`CacheKey`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DerivedKey {
    /// 40 character uppercase hex SHA-1 digest
    pub hash_hex: String,
    /// Data file name: prefix, hash and extension
    pub filename_base: String,
}

/// Compute the hash and file name base of `url` restricted to `range`
pub fn derive_key(
    url: &str,
    range: Option<(u64, u64)>,
    config: &CacheConfig,
) -> CacheResult<DerivedKey> {
    CacheKey::new(url, range).derive(config)
}

/// Extension of the last path segment, query and fragment excluded.
/// Only short alphanumeric extensions are kept so file names stay sane.
fn url_extension(url: &str) -> Option<String> {
    let segment = match url::Url::parse(url) {
        Ok(parsed) if !parsed.cannot_be_a_base() => {
            parsed.path().rsplit('/').next().unwrap_or_default().to_string()
        }
        _ => {
            let end = url.find(['?', '#']).unwrap_or(url.len());
            url[..end].rsplit('/').next().unwrap_or_default().to_string()
        }
    };

    let dot = segment.rfind('.')?;
    let ext = &segment[dot..];
    let valid = ext.len() > 1
        && ext.len() <= MAX_EXTENSION_LEN
        && ext[1..].chars().all(|c| c.is_ascii_alphanumeric());
    valid.then(|| ext.to_string())
}
