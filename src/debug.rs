use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Instant;

/// JSON-lines build log. Cloning shares the underlying file.
#[derive(Clone)]
pub struct BuildLog {
    inner: Arc<Mutex<LogState>>,
}

struct LogState {
    writer: BufWriter<File>,
    path: PathBuf,
    counters: BTreeMap<String, u64>,
    stage_ms: BTreeMap<String, f64>,
}

impl std::fmt::Debug for BuildLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let path = self.path();
        f.debug_struct("BuildLog").field("path", &path).finish()
    }
}

impl BuildLog {
    pub fn create(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let file = File::create(&path)?;
        Ok(Self {
            inner: Arc::new(Mutex::new(LogState {
                writer: BufWriter::new(file),
                path,
                counters: BTreeMap::new(),
                stage_ms: BTreeMap::new(),
            })),
        })
    }

    pub fn path(&self) -> Option<PathBuf> {
        self.inner.lock().ok().map(|state| state.path.clone())
    }

    pub fn log_json(&self, record: &Value) {
        if let Ok(mut state) = self.inner.lock() {
            let _ = writeln!(state.writer, "{record}");
        }
    }

    pub fn increment(&self, key: &str, amount: u64) {
        if let Ok(mut state) = self.inner.lock() {
            let entry = state.counters.entry(key.to_string()).or_insert(0);
            *entry = entry.saturating_add(amount);
        }
    }

    pub fn log_stage_ms(&self, stage: &str, ms: f64) {
        if let Ok(mut state) = self.inner.lock() {
            *state.stage_ms.entry(stage.to_string()).or_insert(0.0) += ms;
            let record = json!({"type": "stage.ms", "stage": stage, "ms": (ms * 1000.0).round() / 1000.0});
            let _ = writeln!(state.writer, "{record}");
        }
    }

    /// Writes counters and stage totals collected so far, then resets them.
    pub fn emit_summary(&self, context: &str) {
        if let Ok(mut state) = self.inner.lock() {
            let counts = std::mem::take(&mut state.counters);
            let stages = std::mem::take(&mut state.stage_ms);
            let record = json!({
                "type": "build.summary",
                "context": context,
                "counts": counts,
                "stage_ms": stages,
            });
            let _ = writeln!(state.writer, "{record}");
        }
    }

    pub fn flush(&self) {
        if let Ok(mut state) = self.inner.lock() {
            let _ = state.writer.flush();
        }
    }
}

/// Times one build stage; the elapsed time is logged when it is dropped.
pub(crate) struct StageTimer<'a> {
    log: Option<&'a BuildLog>,
    stage: &'static str,
    started: Instant,
}

impl<'a> StageTimer<'a> {
    pub(crate) fn start(log: Option<&'a BuildLog>, stage: &'static str) -> Self {
        Self {
            log,
            stage,
            started: Instant::now(),
        }
    }
}

impl Drop for StageTimer<'_> {
    fn drop(&mut self) {
        let ms = self.started.elapsed().as_secs_f64() * 1000.0;
        tracing::debug!(stage = self.stage, ms, "stage finished");
        if let Some(log) = self.log {
            log.log_stage_ms(self.stage, ms);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn records(path: &Path) -> Vec<Value> {
        std::fs::read_to_string(path)
            .expect("read log")
            .lines()
            .map(|line| serde_json::from_str(line).expect("json line"))
            .collect()
    }

    #[test]
    fn summary_reports_sorted_counters_and_resets() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("logs/build.jsonl");
        let log = BuildLog::create(&path).expect("create");
        log.increment("pages.stamped", 3);
        log.increment("parts.cached", 1);
        log.increment("pages.stamped", 2);
        log.emit_summary("first");
        log.emit_summary("second");
        log.flush();

        let lines = records(&path);
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["type"], "build.summary");
        assert_eq!(lines[0]["counts"]["pages.stamped"], 5);
        assert_eq!(lines[0]["counts"]["parts.cached"], 1);
        assert_eq!(lines[1]["context"], "second");
        assert_eq!(lines[1]["counts"], json!({}));
    }

    #[test]
    fn stage_timer_writes_on_drop() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("build.jsonl");
        let log = BuildLog::create(&path).expect("create");
        {
            let _timer = StageTimer::start(Some(&log), "merge");
        }
        log.log_json(&json!({"type": "part.decision", "part": 0, "state": "rebuilt"}));
        log.flush();
        let lines = records(&path);
        assert_eq!(lines[0]["type"], "stage.ms");
        assert_eq!(lines[0]["stage"], "merge");
        assert_eq!(lines[1]["state"], "rebuilt");
        assert_eq!(log.path(), Some(path));
    }
}
