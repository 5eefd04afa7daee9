use crate::analyzer::{AnalysisResult, PartAnalysis};
use crate::error::{RectoError, Result};
use crate::manifest::PageLayout;
use crate::pdfinfo;
use recto_cache_index::{CacheEntryRecord, PartFingerprint, read_record, sidecar_path, write_record};
use std::path::{Path, PathBuf};

/// Filesystem-safe form of a key: lowercase ASCII letters, digits and `-`.
pub fn sanitize_key(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut last_dash = true;
    for ch in raw.trim().chars() {
        if ch.is_ascii_alphanumeric() {
            out.push(ch.to_ascii_lowercase());
            last_dash = false;
        } else if !last_dash {
            out.push('-');
            last_dash = true;
        }
    }
    while out.ends_with('-') {
        out.pop();
    }
    if out.is_empty() {
        "untitled".to_string()
    } else {
        out
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedPart {
    pub key: String,
    pub path: PathBuf,
    pub record: Option<CacheEntryRecord>,
}

/// Rendered part PDFs of one book, keyed by stable part identity.
#[derive(Debug, Clone)]
pub struct PartCache {
    root: PathBuf,
}

impl PartCache {
    pub fn new(cache_dir: &Path, collection_id: &str) -> Self {
        Self {
            root: cache_dir.join(sanitize_key(collection_id)),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn part_path(&self, key: &str) -> PathBuf {
        self.root.join(format!("part-{}.pdf", sanitize_key(key)))
    }

    pub fn contains(&self, key: &str) -> bool {
        self.part_path(key).is_file()
    }

    pub fn lookup(&self, key: &str) -> Option<CachedPart> {
        let path = self.part_path(key);
        if !path.is_file() {
            return None;
        }
        let record = read_record(&path).ok();
        Some(CachedPart {
            key: key.to_string(),
            path,
            record,
        })
    }

    /// Copies a freshly rendered part into the cache, replacing any previous
    /// entry, and writes its index record next to it.
    pub fn store(&self, key: &str, rendered: &Path, record: &CacheEntryRecord) -> Result<PathBuf> {
        std::fs::create_dir_all(&self.root)?;
        let path = self.part_path(key);
        std::fs::copy(rendered, &path)
            .map_err(|err| RectoError::Cache(format!("{}: {err}", path.display())))?;
        write_record(&path, record)
            .map_err(|err| RectoError::Cache(format!("{}: {err}", sidecar_path(&path).display())))?;
        tracing::debug!(key, path = %path.display(), "part cached");
        Ok(path)
    }

    /// Checks that a cached part is still a readable PDF and returns its page
    /// count.
    pub fn verify(&self, cached: &CachedPart) -> Result<usize> {
        pdfinfo::page_count(&cached.path)
            .map_err(|err| RectoError::Cache(format!("part `{}`: {err}", cached.key)))
    }

    pub fn clear_part(&self, key: &str) -> Result<bool> {
        let path = self.part_path(key);
        let existed = path.is_file();
        for file in [path.clone(), sidecar_path(&path)] {
            match std::fs::remove_file(&file) {
                Ok(()) => {}
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                Err(err) => return Err(RectoError::Cache(format!("{}: {err}", file.display()))),
            }
        }
        if existed {
            tracing::info!(key, "cached part cleared");
        }
        Ok(existed)
    }

    pub fn clear_all(&self) -> Result<()> {
        match std::fs::remove_dir_all(&self.root) {
            Ok(()) => {
                tracing::info!(root = %self.root.display(), "part cache cleared");
                Ok(())
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(RectoError::Cache(format!("{}: {err}", self.root.display()))),
        }
    }

    /// Cached parts with their index records, ordered by file name.
    pub fn entries(&self) -> Result<Vec<CachedPart>> {
        let read_dir = match std::fs::read_dir(&self.root) {
            Ok(rd) => rd,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };
        let mut out = Vec::new();
        for entry in read_dir {
            let path = entry?.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            let Some(key) = name.strip_prefix("part-").and_then(|n| n.strip_suffix(".pdf")) else {
                continue;
            };
            let record = read_record(&path).ok();
            out.push(CachedPart {
                key: record
                    .as_ref()
                    .map(|r| r.part_key.clone())
                    .unwrap_or_else(|| key.to_string()),
                path,
                record,
            });
        }
        out.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(out)
    }
}

/// Digest of everything a rendered part depends on: the bytes of its source
/// PDFs, the layout it was stamped with and where it starts in the book.
pub fn part_fingerprint(
    analysis: &AnalysisResult,
    part: &PartAnalysis,
    layout: &PageLayout,
) -> Result<String> {
    let mut fp = PartFingerprint::new(&part.key);
    for item in &analysis.items[part.items.clone()] {
        match item.pdf.as_deref() {
            Some(path) => fp
                .add_source_file(path)
                .map_err(|err| RectoError::read(path, err.to_string()))?,
            None => fp.add_setting("blank", &item.start_page.to_string()),
        }
    }
    let typography = &layout.typography;
    fp.add_setting("book_title", &layout.book_title);
    fp.add_setting("part_title", &part.title);
    fp.add_setting("start_page", &part.start_page.to_string());
    fp.add_setting(
        "policy",
        &format!(
            "{:?}/{:?}/{:?}/{:?}",
            layout.page_number_position,
            layout.suppress_page_numbers,
            layout.verso_header,
            layout.recto_header
        ),
    );
    fp.add_setting(
        "typography",
        &format!(
            "{}@{}/{}@{}",
            typography.header_font,
            typography.header_size,
            typography.page_number_font,
            typography.page_number_size
        ),
    );
    Ok(fp.finish())
}

pub fn part_record(part: &PartAnalysis, fingerprint: String) -> CacheEntryRecord {
    CacheEntryRecord {
        part_key: part.key.clone(),
        part_title: part.title.clone(),
        fingerprint_sha256: fingerprint,
        page_count: part.page_count(),
        start_page: part.start_page,
    }
}
