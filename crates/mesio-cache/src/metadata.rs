//! # Sidecar Metadata
//!
//! Disk entries keep their validators in a plain key/value file next to the
//! data file:
//!
//! ```text
//! [cache]
//! url=http://x/a.mp4
//! range=0-99
//! ETag="abc"
//! Content-Type=video/mp4
//! Content-Length=100
//! Last-Modified=Wed, 21 Oct 2015 07:28:00 GMT
//! ```

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::error::{CacheError, CacheResult};

/// Section holding all entry properties
pub const CACHE_SECTION: &str = "cache";

pub const KEY_URL: &str = "url";
pub const KEY_RANGE: &str = "range";
pub const KEY_ETAG: &str = "ETag";
pub const KEY_CONTENT_TYPE: &str = "Content-Type";
pub const KEY_CONTENT_LENGTH: &str = "Content-Length";
pub const KEY_LAST_MODIFIED: &str = "Last-Modified";
pub const KEY_MAX_AGE: &str = "MaxAge";
pub const KEY_MUST_REVALIDATE: &str = "MustRevalidate";
pub const KEY_NO_CACHE: &str = "NoCache";

/// Ordered sections of `key=value` properties
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Properties {
    sections: Vec<(String, Vec<(String, String)>)>,
}

impl Properties {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse the textual form. Blank lines and `#`/`;` comments are skipped.
    pub fn parse(text: &str) -> CacheResult<Self> {
        let mut properties = Self::new();
        let mut current: Option<String> = None;

        for (index, raw) in text.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
                continue;
            }

            if let Some(name) = line.strip_prefix('[') {
                let name = name.strip_suffix(']').ok_or_else(|| {
                    CacheError::Metadata(format!("line {}: unterminated section header", index + 1))
                })?;
                let name = name.trim().to_string();
                properties.section_mut(&name);
                current = Some(name);
                continue;
            }

            let (key, value) = line.split_once('=').ok_or_else(|| {
                CacheError::Metadata(format!("line {}: expected key=value", index + 1))
            })?;
            let section = current.as_deref().ok_or_else(|| {
                CacheError::Metadata(format!("line {}: property outside of a section", index + 1))
            })?;
            properties.set(section, key.trim(), value.trim());
        }

        Ok(properties)
    }

    /// Render back to the textual form
    pub fn render(&self) -> String {
        let mut out = String::new();
        for (name, entries) in &self.sections {
            out.push('[');
            out.push_str(name);
            out.push_str("]\n");
            for (key, value) in entries {
                out.push_str(key);
                out.push('=');
                out.push_str(value);
                out.push('\n');
            }
        }
        out
    }

    pub fn get(&self, section: &str, key: &str) -> Option<&str> {
        self.sections
            .iter()
            .find(|(name, _)| name == section)
            .and_then(|(_, entries)| entries.iter().find(|(k, _)| k == key))
            .map(|(_, v)| v.as_str())
    }

    /// Set a value, replacing any previous one for the same key
    pub fn set(&mut self, section: &str, key: &str, value: impl Into<String>) {
        let value = value.into();
        let entries = self.section_mut(section);
        match entries.iter_mut().find(|(k, _)| k == key) {
            Some((_, v)) => *v = value,
            None => entries.push((key.to_string(), value)),
        }
    }

    pub fn remove(&mut self, section: &str, key: &str) -> Option<String> {
        let (_, entries) = self.sections.iter_mut().find(|(name, _)| name == section)?;
        let index = entries.iter().position(|(k, _)| k == key)?;
        Some(entries.remove(index).1)
    }

    pub fn key_count(&self, section: &str) -> usize {
        self.sections
            .iter()
            .find(|(name, _)| name == section)
            .map_or(0, |(_, entries)| entries.len())
    }

    fn section_mut(&mut self, section: &str) -> &mut Vec<(String, String)> {
        let index = match self.sections.iter().position(|(name, _)| name == section) {
            Some(index) => index,
            None => {
                self.sections.push((section.to_string(), Vec::new()));
                self.sections.len() - 1
            }
        };
        &mut self.sections[index].1
    }
}

/// Typed view of the `[cache]` section
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SidecarMetadata {
    pub url: Option<String>,
    /// Raw `range` value, `start-end`
    pub range: Option<String>,
    pub etag: Option<String>,
    pub content_type: Option<String>,
    /// Raw `Content-Length` value
    pub content_length: Option<String>,
    pub last_modified: Option<String>,
    /// Absolute expiry in unix seconds
    pub max_age: Option<i64>,
    pub must_revalidate: bool,
    pub no_cache: bool,
}

impl SidecarMetadata {
    pub fn from_properties(properties: &Properties) -> Self {
        let get = |key: &str| properties.get(CACHE_SECTION, key).map(str::to_string);
        Self {
            url: get(KEY_URL),
            range: get(KEY_RANGE),
            etag: get(KEY_ETAG),
            content_type: get(KEY_CONTENT_TYPE),
            content_length: get(KEY_CONTENT_LENGTH),
            last_modified: get(KEY_LAST_MODIFIED),
            max_age: properties
                .get(CACHE_SECTION, KEY_MAX_AGE)
                .and_then(|v| v.parse().ok()),
            must_revalidate: properties.get(CACHE_SECTION, KEY_MUST_REVALIDATE) == Some("true"),
            no_cache: properties.get(CACHE_SECTION, KEY_NO_CACHE).is_some(),
        }
    }

    pub fn to_properties(&self) -> Properties {
        let mut properties = Properties::new();
        let mut set_opt = |key: &str, value: &Option<String>| {
            if let Some(value) = value {
                properties.set(CACHE_SECTION, key, value.as_str());
            }
        };
        set_opt(KEY_URL, &self.url);
        set_opt(KEY_RANGE, &self.range);
        set_opt(KEY_ETAG, &self.etag);
        set_opt(KEY_CONTENT_TYPE, &self.content_type);
        set_opt(KEY_CONTENT_LENGTH, &self.content_length);
        set_opt(KEY_LAST_MODIFIED, &self.last_modified);

        if let Some(max_age) = self.max_age {
            properties.set(CACHE_SECTION, KEY_MAX_AGE, max_age.to_string());
            properties.set(
                CACHE_SECTION,
                KEY_MUST_REVALIDATE,
                if self.must_revalidate { "true" } else { "false" },
            );
        }
        if self.no_cache {
            properties.set(CACHE_SECTION, KEY_NO_CACHE, "true");
        }
        properties
    }

    /// Parsed `range`. `None` when absent, `Some(None)` when malformed.
    pub fn parsed_range(&self) -> Option<Option<(u64, u64)>> {
        self.range.as_deref().map(parse_range)
    }

    /// Parsed `Content-Length`. `None` when absent or malformed.
    pub fn parsed_content_length(&self) -> Option<u64> {
        self.content_length.as_deref().and_then(|v| v.parse().ok())
    }
}

/// Parse a `start-end` pair
pub fn parse_range(value: &str) -> Option<(u64, u64)> {
    let (start, end) = value.trim().split_once('-')?;
    Some((start.trim().parse().ok()?, end.trim().parse().ok()?))
}

/// Format a `start-end` pair
pub fn format_range(range: (u64, u64)) -> String {
    format!("{}-{}", range.0, range.1)
}

/// Sidecar file backing a disk entry's metadata
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetadataStore {
    path: PathBuf,
}

impl MetadataStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    /// Load the sidecar. `Ok(None)` if it does not exist yet.
    pub fn load(&self) -> CacheResult<Option<SidecarMetadata>> {
        let text = match fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let properties = Properties::parse(&text)?;
        Ok(Some(SidecarMetadata::from_properties(&properties)))
    }

    /// Overwrite the sidecar with `metadata`. Written to a temporary file
    /// first, then renamed over the previous one.
    pub fn save(&self, metadata: &SidecarMetadata) -> CacheResult<()> {
        let mut temp_path = self.path.clone().into_os_string();
        temp_path.push(".tmp");
        let temp_path = PathBuf::from(temp_path);

        if let Err(e) = fs::write(&temp_path, metadata.to_properties().render()) {
            warn!(path = ?temp_path, error = %e, "Failed to write cache metadata file");
            return Err(e.into());
        }

        if let Err(e) = fs::rename(&temp_path, &self.path) {
            warn!(
                from = ?temp_path,
                to = ?self.path,
                error = %e,
                "Failed to rename temporary metadata file"
            );
            let _ = fs::remove_file(&temp_path);
            return Err(e.into());
        }

        debug!(path = ?self.path, "Flushed cache metadata");
        Ok(())
    }

    /// Remove the sidecar; a missing file is not an error
    pub fn remove(&self) -> io::Result<()> {
        match fs::remove_file(&self.path) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
            _ => Ok(()),
        }
    }
}
