use crate::errors::TmuxumError;
use crate::logging::append_run_log;
use crate::record::{SessionRecord, RECORD_FILE_NAME};
use crate::runtime::FileSystem;
use chrono::{DateTime, Local};
use serde_json::json;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

pub const TIMESTAMP_FORMAT: &str = "%Y%m%d-%H%M%S";

/// `<root>/<session>/<YYYYmmdd-HHMMSS>` in local time. The format sorts
/// lexicographically in chronological order.
pub fn snapshot_dir(root: &Path, session: &str, at: SystemTime) -> PathBuf {
    let stamp = DateTime::<Local>::from(at).format(TIMESTAMP_FORMAT);
    root.join(session).join(stamp.to_string())
}

pub fn scrollback_path(snapshot_dir: &Path, pane_id: &str) -> PathBuf {
    snapshot_dir.join(format!("scrollback-{pane_id}.txt"))
}

pub fn editor_session_path(snapshot_dir: &Path, pid: u32) -> PathBuf {
    snapshot_dir.join(format!("session-{pid}.vim"))
}

/// Saved snapshot directories for `session`, oldest first.
pub fn list_snapshots(
    fs: &dyn FileSystem,
    root: &Path,
    session: &str,
) -> Result<Vec<PathBuf>, TmuxumError> {
    let session_dir = root.join(session);
    if !fs.exists(&session_dir) {
        return Ok(Vec::new());
    }
    let mut snapshots = fs.list_dir(&session_dir)?;
    snapshots.sort();
    Ok(snapshots)
}

/// Names of every session with a directory under `root`.
pub fn list_saved_sessions(fs: &dyn FileSystem, root: &Path) -> Result<Vec<String>, TmuxumError> {
    if !fs.exists(root) {
        return Ok(Vec::new());
    }
    let mut names = fs
        .list_dir(root)?
        .iter()
        .filter_map(|path| path.file_name())
        .filter_map(|name| name.to_str())
        .map(str::to_string)
        .collect::<Vec<_>>();
    names.sort();
    Ok(names)
}

pub fn latest_snapshot(
    fs: &dyn FileSystem,
    root: &Path,
    session: &str,
) -> Result<PathBuf, TmuxumError> {
    list_snapshots(fs, root, session)?
        .pop()
        .ok_or_else(|| TmuxumError::SavedSessionNotFound(session.to_string()))
}

/// Default record location inside a snapshot directory.
pub fn record_path(snapshot_dir: &Path) -> PathBuf {
    snapshot_dir.join(RECORD_FILE_NAME)
}

/// Writes `<path>.tmp` and renames it over `path`, so a reader never sees a
/// half-written record.
pub fn write_record(
    fs: &dyn FileSystem,
    path: &Path,
    record: &SessionRecord,
) -> Result<(), TmuxumError> {
    let yaml = record.to_yaml()?;
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    if let Some(parent) = path.parent() {
        fs.create_dir_all(parent)?;
    }
    fs.write_string(&tmp, &yaml)?;
    fs.rename(&tmp, path)?;
    append_run_log(
        "info",
        "storage.record.written",
        json!({
            "path": path.display().to_string(),
            "session": record.session_name,
            "windows": record.windows.len(),
            "panes": record.pane_count()
        }),
    );
    Ok(())
}

pub fn read_record(fs: &dyn FileSystem, path: &Path) -> Result<SessionRecord, TmuxumError> {
    let text = fs.read_to_string(path)?;
    SessionRecord::from_yaml(&text)
        .map_err(|e| TmuxumError::Record(format!("{}: {e}", path.display())))
}
