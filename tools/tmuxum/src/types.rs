use std::collections::BTreeMap;
use std::path::PathBuf;

pub type EnvMap = BTreeMap<String, String>;

/// Per-invocation inputs that used to be read from the environment ad hoc.
/// They are resolved once at startup and handed to capture and replay.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunScope {
    /// Explicit `--session`.
    pub session: Option<String>,
    /// Explicit `--file`, absolutized against the working directory.
    pub record_file: Option<PathBuf>,
    /// The pane tmuxum itself runs in; capture skips it.
    pub controlling_pane: Option<String>,
}
