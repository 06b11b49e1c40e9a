//! # HTTP Header Helpers
//!
//! Moves validators between HTTP responses/requests and cache entries.

use reqwest::header::{
    CACHE_CONTROL, CONTENT_LENGTH, CONTENT_TYPE, ETAG, HeaderMap, HeaderName, HeaderValue,
    IF_MODIFIED_SINCE, IF_NONE_MATCH, LAST_MODIFIED,
};
use tracing::debug;

use crate::entry::CacheEntry;

/// Directives of a `Cache-Control` header relevant to caching
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheControl {
    pub max_age: Option<u32>,
    pub must_revalidate: bool,
    /// `no-cache` or `no-store`
    pub no_cache: bool,
}

impl CacheControl {
    pub fn parse(value: &str) -> Self {
        let mut control = Self::default();
        for directive in value.split(',') {
            let directive = directive.trim();
            let (name, arg) = match directive.split_once('=') {
                Some((name, arg)) => (name.trim(), Some(arg.trim().trim_matches('"'))),
                None => (directive, None),
            };
            match name.to_ascii_lowercase().as_str() {
                "max-age" => control.max_age = arg.and_then(|v| v.parse().ok()),
                "must-revalidate" => control.must_revalidate = true,
                "no-cache" | "no-store" => control.no_cache = true,
                _ => {}
            }
        }
        control
    }
}

fn header_string(headers: &HeaderMap, name: HeaderName) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
}

/// Copy the response validators and freshness directives onto `entry`,
/// then mark its headers as processed
pub fn apply_response_headers(entry: &CacheEntry, headers: &HeaderMap) {
    let etag = header_string(headers, ETAG);
    let last_modified = header_string(headers, LAST_MODIFIED);
    let content_type = header_string(headers, CONTENT_TYPE);

    if etag.is_some() {
        entry.set_etag(etag);
    }
    if last_modified.is_some() {
        entry.set_last_modified(last_modified);
    }
    if content_type.is_some() {
        entry.set_mime_type(content_type);
    }
    if let Some(length) =
        header_string(headers, CONTENT_LENGTH).and_then(|v| v.trim().parse::<u64>().ok())
    {
        entry.set_content_length(length);
    }

    if let Some(value) = header_string(headers, CACHE_CONTROL) {
        let control = CacheControl::parse(&value);
        if control.max_age.is_some() || control.must_revalidate {
            entry.set_max_age(control.max_age.unwrap_or(0), control.must_revalidate);
        }
        if control.no_cache {
            entry.set_no_cache(true);
        }
    }

    entry.set_headers_done();
    debug!(url = %entry.url(), "Applied response headers to cache entry");
}

/// Add conditional request headers for `entry` to `headers`
pub fn append_revalidation_headers(entry: &CacheEntry, headers: &mut HeaderMap) {
    for (name, value) in entry.revalidation_headers() {
        let name = if name.eq_ignore_ascii_case(IF_NONE_MATCH.as_str()) {
            IF_NONE_MATCH
        } else {
            IF_MODIFIED_SINCE
        };
        match HeaderValue::from_str(&value) {
            Ok(value) => {
                headers.insert(name, value);
            }
            Err(_) => debug!(header = %name, "Skipping validator that is not a valid header value"),
        }
    }
}

/// Conditional request headers for `entry` as a fresh map
pub fn revalidation_header_map(entry: &CacheEntry) -> HeaderMap {
    let mut headers = HeaderMap::new();
    append_revalidation_headers(entry, &mut headers);
    headers
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionId;
    use crate::storage::StorageKind;
    use crate::test_utils::test_config;
    use tempfile::TempDir;

    fn response_headers() -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(ETAG, HeaderValue::from_static("\"abc\""));
        headers.insert(
            LAST_MODIFIED,
            HeaderValue::from_static("Wed, 21 Oct 2015 07:28:00 GMT"),
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("video/mp2t"));
        headers.insert(CONTENT_LENGTH, HeaderValue::from_static("4"));
        headers.insert(
            CACHE_CONTROL,
            HeaderValue::from_static("public, max-age=60, must-revalidate"),
        );
        headers
    }

    #[test]
    fn test_parse_cache_control() {
        assert_eq!(
            CacheControl::parse("max-age=3600, Must-Revalidate"),
            CacheControl {
                max_age: Some(3600),
                must_revalidate: true,
                no_cache: false,
            }
        );
        assert!(CacheControl::parse("no-store").no_cache);
        assert!(CacheControl::parse("private, no-cache=\"Set-Cookie\"").no_cache);
        assert_eq!(CacheControl::parse("max-age=\"10\"").max_age, Some(10));
        assert_eq!(CacheControl::parse("max-age=soon").max_age, None);
        assert_eq!(CacheControl::parse(""), CacheControl::default());
    }

    #[test]
    fn test_apply_then_revalidate() {
        let dir = TempDir::new().unwrap();
        let entry = CacheEntry::create(
            &test_config(dir.path()),
            "http://x/seg.ts",
            None,
            StorageKind::Disk,
        )
        .unwrap();

        apply_response_headers(&entry, &response_headers());
        assert_eq!(entry.etag_server().as_deref(), Some("\"abc\""));
        assert_eq!(entry.mime_type().as_deref(), Some("video/mp2t"));
        assert_eq!(entry.content_length(), 4);
        assert!(entry.flags().headers_done);
        assert!(entry.flags().must_revalidate);

        // Nothing on disk yet
        assert!(revalidation_header_map(&entry).is_empty());

        let session = SessionId::new();
        entry.open_write(session).unwrap();
        entry.write(session, b"data").unwrap();
        entry.close_write(session, true).unwrap();
        assert!(entry.can_reuse());

        let headers = revalidation_header_map(&entry);
        assert_eq!(headers.get(IF_NONE_MATCH).unwrap(), "\"abc\"");
        assert_eq!(
            headers.get(IF_MODIFIED_SINCE).unwrap(),
            "Wed, 21 Oct 2015 07:28:00 GMT"
        );
    }

    #[test]
    fn test_no_cache_is_persisted_and_poisons_reload() {
        let dir = TempDir::new().unwrap();
        let config = test_config(dir.path());
        let entry =
            CacheEntry::create(&config, "http://x/live.m3u", None, StorageKind::Disk).unwrap();

        let mut headers = HeaderMap::new();
        headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
        apply_response_headers(&entry, &headers);
        assert!(entry.flags().no_cache);

        let session = SessionId::new();
        entry.open_write(session).unwrap();
        entry.write(session, b"#EXTM3U").unwrap();
        entry.close_write(session, true).unwrap();

        let reloaded =
            CacheEntry::create(&config, "http://x/live.m3u", None, StorageKind::Disk).unwrap();
        assert!(reloaded.flags().corrupted);
        assert!(revalidation_header_map(&reloaded).is_empty());
    }

    #[test]
    fn test_append_keeps_existing_headers() {
        let dir = TempDir::new().unwrap();
        let entry = CacheEntry::create(
            &test_config(dir.path()),
            "http://x/a.mp4",
            None,
            StorageKind::Memory,
        )
        .unwrap();
        entry.set_persistent();
        entry.set_last_modified(Some("Thu, 01 Jan 1970 00:00:00 GMT".to_string()));

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("text/plain"));
        append_revalidation_headers(&entry, &mut headers);
        assert_eq!(headers.len(), 2);
        assert!(headers.get(IF_NONE_MATCH).is_none());
        assert!(headers.contains_key(IF_MODIFIED_SINCE));
    }
}
