use crate::runtime::FileSystem;
use std::path::{Path, PathBuf};

/// Per-pane "last command" files written by a shell preexec hook, one file
/// per tmux pane id, e.g. `/tmp/tmux-pane-cmds/%3`.
pub struct PaneCommandLog<'a> {
    fs: &'a dyn FileSystem,
    dir: PathBuf,
}

impl<'a> PaneCommandLog<'a> {
    pub fn new(fs: &'a dyn FileSystem, dir: impl AsRef<Path>) -> Self {
        Self {
            fs,
            dir: dir.as_ref().to_path_buf(),
        }
    }

    pub fn path_for(&self, pane_id: &str) -> PathBuf {
        self.dir.join(pane_id)
    }

    /// The last command typed in `pane_id`, trimmed. Missing, unreadable and
    /// blank files all mean "no command".
    pub fn last_command(&self, pane_id: &str) -> Option<String> {
        let path = self.path_for(pane_id);
        if !self.fs.exists(&path) {
            return None;
        }
        let text = self.fs.read_to_string(&path).ok()?;
        let trimmed = text.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    }
}
