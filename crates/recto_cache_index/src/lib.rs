use serde_json::{Value, json};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

pub const INDEX_SCHEMA: &str = "recto.part_cache";
pub const INDEX_VERSION: u64 = 1;

// Sources are framed with their length so that moving bytes between two
// adjacent sources can never produce the same digest.
const SOURCE_TAG: &[u8] = b"src";
const SETTING_TAG: &[u8] = b"set";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntryRecord {
    pub part_key: String,
    pub part_title: String,
    pub fingerprint_sha256: String,
    pub page_count: usize,
    pub start_page: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexError {
    pub message: String,
}

impl std::fmt::Display for IndexError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "cache index error: {}", self.message)
    }
}

impl std::error::Error for IndexError {}

fn index_err(message: impl Into<String>) -> IndexError {
    IndexError {
        message: message.into(),
    }
}

pub fn hex_sha256(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex_digest(hasher)
}

fn hex_digest(hasher: Sha256) -> String {
    let digest = hasher.finalize();
    let mut out = String::with_capacity(digest.len() * 2);
    for b in digest {
        use std::fmt::Write;
        let _ = write!(&mut out, "{:02x}", b);
    }
    out
}

/// Incremental SHA-256 over everything a cached part depends on: the bytes of
/// each source PDF, in book order, plus named settings (layout, typography,
/// starting page).
#[derive(Clone)]
pub struct PartFingerprint {
    hasher: Sha256,
    sources: usize,
}

impl PartFingerprint {
    pub fn new(part_key: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(INDEX_SCHEMA.as_bytes());
        hasher.update(INDEX_VERSION.to_le_bytes());
        hasher.update((part_key.len() as u64).to_le_bytes());
        hasher.update(part_key.as_bytes());
        Self { hasher, sources: 0 }
    }

    pub fn add_source(&mut self, bytes: &[u8]) {
        self.hasher.update(SOURCE_TAG);
        self.hasher.update((bytes.len() as u64).to_le_bytes());
        self.hasher.update(bytes);
        self.sources += 1;
    }

    pub fn add_source_file(&mut self, path: &Path) -> std::io::Result<()> {
        let bytes = std::fs::read(path)?;
        self.add_source(&bytes);
        Ok(())
    }

    pub fn add_setting(&mut self, key: &str, value: &str) {
        self.hasher.update(SETTING_TAG);
        for part in [key, value] {
            self.hasher.update((part.len() as u64).to_le_bytes());
            self.hasher.update(part.as_bytes());
        }
    }

    pub fn source_count(&self) -> usize {
        self.sources
    }

    pub fn finish(self) -> String {
        hex_digest(self.hasher)
    }
}

/// Sidecar index file stored next to a cached part PDF.
pub fn sidecar_path(part_pdf: &Path) -> PathBuf {
    part_pdf.with_extension("json")
}

pub fn record_to_json(record: &CacheEntryRecord) -> String {
    let value = json!({
        "schema": INDEX_SCHEMA,
        "version": INDEX_VERSION,
        "part_key": record.part_key,
        "part_title": record.part_title,
        "fingerprint_sha256": record.fingerprint_sha256,
        "page_count": record.page_count,
        "start_page": record.start_page,
    });
    serde_json::to_string_pretty(&value).unwrap_or_else(|_| "{}".to_string())
}

pub fn record_from_json(raw: &str) -> Result<CacheEntryRecord, IndexError> {
    let root: Value =
        serde_json::from_str(raw).map_err(|err| index_err(format!("invalid json: {err}")))?;
    let schema = root
        .get("schema")
        .and_then(Value::as_str)
        .ok_or_else(|| index_err("missing schema"))?;
    if schema != INDEX_SCHEMA {
        return Err(index_err(format!("unexpected schema: {schema}")));
    }
    let version = root.get("version").and_then(Value::as_u64).unwrap_or(0);
    if version != INDEX_VERSION {
        return Err(index_err(format!("unsupported version: {version}")));
    }
    let text = |key: &str| -> Result<String, IndexError> {
        root.get(key)
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| index_err(format!("missing field: {key}")))
    };
    let count = |key: &str| -> Result<usize, IndexError> {
        root.get(key)
            .and_then(Value::as_u64)
            .map(|v| v as usize)
            .ok_or_else(|| index_err(format!("missing field: {key}")))
    };
    Ok(CacheEntryRecord {
        part_key: text("part_key")?,
        part_title: text("part_title")?,
        fingerprint_sha256: text("fingerprint_sha256")?,
        page_count: count("page_count")?,
        start_page: count("start_page")?,
    })
}

pub fn write_record(part_pdf: &Path, record: &CacheEntryRecord) -> std::io::Result<PathBuf> {
    let path = sidecar_path(part_pdf);
    std::fs::write(&path, record_to_json(record))?;
    Ok(path)
}

pub fn read_record(part_pdf: &Path) -> Result<CacheEntryRecord, IndexError> {
    let path = sidecar_path(part_pdf);
    let raw = std::fs::read_to_string(&path)
        .map_err(|err| index_err(format!("{}: {err}", path.display())))?;
    record_from_json(&raw)
}
