use crate::errors::TmuxumError;
use serde::Serialize;
use serde_json::Value;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

pub const DEFAULT_DISK_BUDGET_BYTES: u64 = 10 * 1024 * 1024;
pub const DEFAULT_MAX_PAYLOAD_BYTES: usize = 4096;

static RUN_LOG: Mutex<Option<JsonlLogger>> = Mutex::new(None);

#[derive(Debug, Clone)]
pub struct JsonlLogger {
    pub path: PathBuf,
    pub max_payload_bytes: usize,
    pub budget_bytes: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct LogEvent<'a> {
    pub ts_unix_ms: u128,
    pub level: &'a str,
    pub event_type: &'a str,
    pub payload: Value,
}

impl JsonlLogger {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            max_payload_bytes: DEFAULT_MAX_PAYLOAD_BYTES,
            budget_bytes: DEFAULT_DISK_BUDGET_BYTES,
        }
    }

    pub fn append(&self, event: &LogEvent<'_>) -> Result<(), TmuxumError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| TmuxumError::Io(e.to_string()))?;
        }
        let line = serde_json::to_string(&LogEvent {
            ts_unix_ms: event.ts_unix_ms,
            level: event.level,
            event_type: event.event_type,
            payload: truncate_json(event.payload.clone(), self.max_payload_bytes),
        })
        .map_err(|e| TmuxumError::Io(e.to_string()))?;
        self.rotate_if_full(line.len() as u64 + 1)?;

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| TmuxumError::Io(e.to_string()))?;
        file.write_all(line.as_bytes())
            .map_err(|e| TmuxumError::Io(e.to_string()))?;
        file.write_all(b"\n")
            .map_err(|e| TmuxumError::Io(e.to_string()))?;

        if let Some(parent) = self.path.parent() {
            enforce_total_budget(parent, &self.path, self.budget_bytes)?;
        }
        Ok(())
    }

    /// Moves the active file aside to `<stem>.1.jsonl` when `incoming` more
    /// bytes would push it past the budget. The rotated file is then just
    /// another old log for `enforce_total_budget`.
    fn rotate_if_full(&self, incoming: u64) -> Result<(), TmuxumError> {
        let current = match fs::metadata(&self.path) {
            Ok(meta) => meta.len(),
            Err(_) => return Ok(()),
        };
        if current == 0 || current.saturating_add(incoming) <= self.budget_bytes {
            return Ok(());
        }
        fs::rename(&self.path, self.path.with_extension("1.jsonl"))
            .map_err(|e| TmuxumError::Io(e.to_string()))
    }
}

/// Installs the process-wide run log. Until this is called (and in tests that
/// never call it) `append_run_log` is a no-op.
pub fn init_run_log(logger: JsonlLogger) {
    if let Ok(mut slot) = RUN_LOG.lock() {
        *slot = Some(logger);
    }
}

/// Appends one event to the run log. Logging failures never abort a save or
/// load, so errors are swallowed here.
pub fn append_run_log(level: &str, event_type: &str, payload: Value) {
    let Ok(slot) = RUN_LOG.lock() else {
        return;
    };
    let Some(logger) = slot.as_ref() else {
        return;
    };
    let ts_unix_ms = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0);
    let _ = logger.append(&LogEvent {
        ts_unix_ms,
        level,
        event_type,
        payload,
    });
}

/// Deletes the oldest `.jsonl` files in `dir` (never `active`) until the
/// directory's log files fit in `budget_bytes`.
pub fn enforce_total_budget(
    dir: &Path,
    active: &Path,
    budget_bytes: u64,
) -> Result<Vec<PathBuf>, TmuxumError> {
    let mut logs = fs::read_dir(dir)
        .map_err(|e| TmuxumError::Io(e.to_string()))?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_file() && path.extension().is_some_and(|ext| ext == "jsonl"))
        .filter_map(|path| {
            let meta = fs::metadata(&path).ok()?;
            Some((meta.modified().ok(), meta.len(), path))
        })
        .collect::<Vec<_>>();
    logs.sort_by(|a, b| a.0.cmp(&b.0));

    let mut total = logs.iter().map(|(_, len, _)| *len).sum::<u64>();
    let mut deleted = Vec::new();
    for (_, len, path) in logs {
        if total <= budget_bytes {
            break;
        }
        if path == active {
            continue;
        }
        fs::remove_file(&path).map_err(|e| TmuxumError::Io(e.to_string()))?;
        total = total.saturating_sub(len);
        deleted.push(path);
    }
    Ok(deleted)
}

fn truncate_json(value: Value, max_bytes: usize) -> Value {
    let rendered = serde_json::to_string(&value).unwrap_or_default();
    if rendered.len() <= max_bytes {
        return value;
    }
    let mut cut = max_bytes.saturating_sub(3);
    while cut > 0 && !rendered.is_char_boundary(cut) {
        cut -= 1;
    }
    Value::String(format!("{}...", &rendered[..cut]))
}
