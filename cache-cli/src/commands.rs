use std::collections::BTreeMap;
use std::fs::File;
use std::io::{self, BufReader, Read, Write};
use std::path::Path;

use anyhow::Context;
use mesio_cache::{CacheDirectory, CacheEntry, EntrySnapshot, SessionId, StorageKind};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::{CliError, Result};
use crate::utils::{ByteRange, format_bytes};

const IMPORT_CHUNK_SIZE: usize = 64 * 1024;

/// What `inspect` reports about an entry
#[derive(Debug, Serialize)]
pub struct InspectReport {
    pub entry: EntrySnapshot,
    pub corrupted: bool,
    pub can_reuse: bool,
    pub revalidation_headers: BTreeMap<String, String>,
}

pub struct CommandExecutor {
    directory: CacheDirectory,
}

impl CommandExecutor {
    pub fn new(directory: CacheDirectory) -> Self {
        Self { directory }
    }

    pub fn size(&self, out: &mut impl Write) -> Result<()> {
        let total = self
            .directory
            .total_size()
            .context("Failed to compute cache size")?;
        writeln!(out, "{} ({total} bytes)", format_bytes(total))?;
        Ok(())
    }

    pub fn list(&self, out: &mut impl Write) -> Result<()> {
        let files = self.directory.list().context("Failed to list cache files")?;
        if files.is_empty() {
            writeln!(out, "Cache is empty")?;
            return Ok(());
        }

        for file in &files {
            let name = file
                .path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            let declared = file
                .declared_length
                .map_or_else(|| "?".to_string(), |l| l.to_string());
            let status = if file.is_complete() { "ok" } else { "incomplete" };
            writeln!(
                out,
                "{name}  {:>12}  declared={declared}  {status}  {}",
                format_bytes(file.size),
                file.url.as_deref().unwrap_or("-")
            )?;
        }
        writeln!(out, "{} file(s)", files.len())?;
        Ok(())
    }

    pub fn sweep(&self, out: &mut impl Write) -> Result<()> {
        let removed = self.directory.sweep().context("Failed to sweep cache")?;
        writeln!(out, "Removed {removed} file(s)")?;
        Ok(())
    }

    pub fn inspect(
        &self,
        url: &str,
        range: Option<ByteRange>,
        json: bool,
        out: &mut impl Write,
    ) -> Result<()> {
        let entry = self.lookup(url, range)?;
        let report = InspectReport {
            corrupted: entry.is_corrupted(),
            can_reuse: entry.can_reuse(),
            revalidation_headers: entry.revalidation_headers().into_iter().collect(),
            entry: entry.snapshot(),
        };

        if json {
            serde_json::to_writer_pretty(&mut *out, &report)
                .context("Failed to serialize entry")?;
            writeln!(out)?;
            return Ok(());
        }

        let snapshot = &report.entry;
        writeln!(out, "URL:            {}", snapshot.url)?;
        writeln!(out, "Hash:           {}", snapshot.hash)?;
        if let Some(path) = &snapshot.data_path {
            writeln!(out, "Data file:      {}", path.display())?;
        }
        if let Some(path) = &snapshot.metadata_path {
            writeln!(out, "Metadata file:  {}", path.display())?;
        }
        writeln!(out, "Range:          {}-{}", snapshot.range.0, snapshot.range.1)?;
        writeln!(out, "Content-Length: {}", snapshot.content_length)?;
        writeln!(
            out,
            "Cached:         {} ({} bytes)",
            format_bytes(snapshot.cache_size),
            snapshot.cache_size
        )?;
        writeln!(
            out,
            "Content-Type:   {}",
            snapshot.mime_type.as_deref().unwrap_or("-")
        )?;
        writeln!(
            out,
            "ETag:           {}",
            snapshot.etag_disk.as_deref().unwrap_or("-")
        )?;
        writeln!(
            out,
            "Last-Modified:  {}",
            snapshot.last_modified_disk.as_deref().unwrap_or("-")
        )?;
        writeln!(out, "Corrupted:      {}", report.corrupted)?;
        writeln!(out, "Reusable:       {}", report.can_reuse)?;
        for (name, value) in &report.revalidation_headers {
            writeln!(out, "{name}: {value}")?;
        }
        Ok(())
    }

    pub fn import(
        &self,
        url: &str,
        path: &Path,
        range: Option<ByteRange>,
        validators: Validators,
        out: &mut impl Write,
    ) -> Result<()> {
        let file = File::open(path)
            .with_context(|| format!("Failed to open {}", path.display()))?;
        let length = file.metadata()?.len();

        let entry = self
            .directory
            .entry(url, range.map(|r| r.as_tuple()), StorageKind::Disk)
            .context("Failed to create cache entry")?;
        entry.set_mime_type(validators.mime);
        entry.set_etag(validators.etag);
        entry.set_last_modified(validators.last_modified);
        entry.set_content_length(length);

        let mut writer = entry
            .begin_write(SessionId::new())
            .context("Cache entry is busy")?;
        let mut reader = BufReader::new(file);
        let mut buf = vec![0u8; IMPORT_CHUNK_SIZE];
        loop {
            let n = reader.read(&mut buf)?;
            if n == 0 {
                break;
            }
            writer.write(&buf[..n]).context("Failed to write cache data")?;
        }
        writer.finish(true).context("Failed to finalize cache entry")?;

        if entry.is_corrupted() {
            warn!(url, "Imported entry does not match its declared length");
        }
        info!(url, bytes = entry.cache_size(), "Imported file into cache");
        writeln!(
            out,
            "Cached {} as {}",
            format_bytes(entry.cache_size()),
            entry
                .data_path()
                .map(|p| p.display().to_string())
                .unwrap_or_default()
        )?;
        Ok(())
    }

    pub fn cat(
        &self,
        url: &str,
        range: Option<ByteRange>,
        offset: u64,
        force: bool,
        out: &mut impl Write,
    ) -> Result<u64> {
        let entry = self.lookup(url, range)?;
        if force {
            if entry.is_corrupted() {
                warn!(url, "Cached data is incomplete or corrupted");
            }
        } else {
            entry.verify()?;
        }

        let mut cursor = entry.attach_reader().context("Failed to open cached data")?;
        cursor.seek(offset)?;
        let copied = io::copy(&mut cursor, out)?;
        out.flush()?;
        debug!(url, offset, copied, "Streamed cached bytes");
        Ok(copied)
    }

    fn lookup(&self, url: &str, range: Option<ByteRange>) -> Result<CacheEntry> {
        let entry = self
            .directory
            .entry(url, range.map(|r| r.as_tuple()), StorageKind::Disk)
            .context("Failed to load cache entry")?;
        if entry.cache_size() == 0 && !entry.data_path().is_some_and(|p| p.exists()) {
            return Err(CliError::NotCached(url.to_string()).into());
        }
        Ok(entry)
    }
}

/// Server validators recorded by `import`
#[derive(Debug, Default)]
pub struct Validators {
    pub mime: Option<String>,
    pub etag: Option<String>,
    pub last_modified: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use mesio_cache::CacheConfig;
    use tempfile::TempDir;

    fn executor(dir: &TempDir) -> CommandExecutor {
        let config = CacheConfig::with_dir(dir.path().join("cache"));
        CommandExecutor::new(CacheDirectory::new(config).unwrap())
    }

    fn output(buf: Vec<u8>) -> String {
        String::from_utf8(buf).unwrap()
    }

    #[test]
    fn test_import_cat_inspect() {
        let dir = TempDir::new().unwrap();
        let exec = executor(&dir);
        let source = dir.path().join("body.bin");
        std::fs::write(&source, b"0123456789").unwrap();

        let mut out = Vec::new();
        exec.import(
            "http://x/a.mp4",
            &source,
            None,
            Validators {
                mime: Some("video/mp4".to_string()),
                etag: Some("\"e1\"".to_string()),
                last_modified: None,
            },
            &mut out,
        )
        .unwrap();
        assert!(output(out).starts_with("Cached 10 bytes"));

        let mut out = Vec::new();
        assert_eq!(exec.cat("http://x/a.mp4", None, 4, false, &mut out).unwrap(), 6);
        assert_eq!(out, b"456789");

        let mut out = Vec::new();
        exec.inspect("http://x/a.mp4", None, true, &mut out).unwrap();
        let json: serde_json::Value = serde_json::from_slice(&out).unwrap();
        assert_eq!(json["corrupted"], false);
        assert_eq!(json["entry"]["cache_size"], 10);
        assert_eq!(json["entry"]["mime_type"], "video/mp4");
        assert_eq!(json["revalidation_headers"]["If-None-Match"], "\"e1\"");

        let mut out = Vec::new();
        exec.inspect("http://x/a.mp4", None, false, &mut out).unwrap();
        let text = output(out);
        assert!(text.contains("Corrupted:      false"));
        assert!(text.contains("If-None-Match: \"e1\""));
    }

    #[test]
    fn test_housekeeping_commands() {
        let dir = TempDir::new().unwrap();
        let exec = executor(&dir);
        let source = dir.path().join("body.bin");
        std::fs::write(&source, vec![7u8; 2048]).unwrap();
        exec.import(
            "http://x/seg.ts",
            &source,
            Some("0-2047".parse().unwrap()),
            Validators::default(),
            &mut Vec::new(),
        )
        .unwrap();

        let mut out = Vec::new();
        exec.list(&mut out).unwrap();
        let text = output(out);
        assert!(text.contains("declared=2048"));
        assert!(text.contains("http://x/seg.ts"));
        assert!(text.contains("1 file(s)"));

        let mut out = Vec::new();
        exec.size(&mut out).unwrap();
        assert!(output(out).starts_with("2."));

        let mut out = Vec::new();
        exec.sweep(&mut out).unwrap();
        assert_eq!(output(out), "Removed 2 file(s)\n");

        let mut out = Vec::new();
        exec.list(&mut out).unwrap();
        assert_eq!(output(out), "Cache is empty\n");
    }

    #[test]
    fn test_cat_refuses_corrupted_entry() {
        let dir = TempDir::new().unwrap();
        let exec = executor(&dir);
        let source = dir.path().join("body.bin");
        std::fs::write(&source, b"0123456789").unwrap();
        let mut out = Vec::new();
        exec.import("http://x/b.mp4", &source, None, Validators::default(), &mut out)
            .unwrap();
        let data_path = output(out)
            .trim_end()
            .rsplit(" as ")
            .next()
            .map(std::path::PathBuf::from)
            .unwrap();

        let file = std::fs::OpenOptions::new().write(true).open(&data_path).unwrap();
        file.set_len(4).unwrap();
        drop(file);

        let err = exec
            .cat("http://x/b.mp4", None, 0, false, &mut Vec::new())
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<mesio_cache::CacheError>(),
            Some(mesio_cache::CacheError::Corrupted(_))
        ));

        let mut out = Vec::new();
        assert_eq!(exec.cat("http://x/b.mp4", None, 0, true, &mut out).unwrap(), 4);
        assert_eq!(out, b"0123");
    }

    #[test]
    fn test_unknown_url_is_reported() {
        let dir = TempDir::new().unwrap();
        let exec = executor(&dir);
        let err = exec
            .cat("http://x/missing.mp4", None, 0, false, &mut Vec::new())
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<CliError>(),
            Some(CliError::NotCached(_))
        ));
    }
}
