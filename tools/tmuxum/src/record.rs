//! Serializable description of a captured tmux session.
//!
//! A record is written once by capture and read once by replay. The pane's
//! launch variant is flattened into the pane mapping, so a YAML pane looks
//! either like `{id, active, scrollback, command, cwd}` or like
//! `{id, active, scrollback, cwd, cmdline, children}`.

use crate::errors::TmuxumError;
use crate::procinfo::ProcessStatus;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

pub const RECORD_FILE_NAME: &str = "session.yaml";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub session_name: String,
    pub windows: Vec<WindowRecord>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowRecord {
    pub id: String,
    pub index: u32,
    pub name: String,
    pub layout: String,
    pub active: bool,
    pub panes: Vec<PaneRecord>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaneRecord {
    pub id: String,
    pub active: bool,
    pub scrollback: PathBuf,
    #[serde(flatten)]
    pub launch: PaneLaunch,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PaneLaunch {
    /// The shell hook reported a command and exactly one live child runs it.
    Command { command: String, cwd: PathBuf },
    /// Anything else: the shell itself plus every direct child.
    Process {
        cwd: Option<PathBuf>,
        cmdline: Vec<String>,
        children: BTreeMap<u32, ChildRecord>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        last_command: Option<String>,
    },
}

impl PaneLaunch {
    pub fn empty() -> Self {
        Self::Process {
            cwd: None,
            cmdline: Vec::new(),
            children: BTreeMap::new(),
            last_command: None,
        }
    }

    /// Short human description used in progress output.
    pub fn describe(&self) -> String {
        match self {
            Self::Command { command, .. } => command.clone(),
            Self::Process { cmdline, .. } if cmdline.is_empty() => "EMPTY".to_string(),
            Self::Process { cmdline, .. } => format!("{cmdline:?}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChildRecord {
    pub status: ProcessStatus,
    pub cwd: Option<PathBuf>,
    pub cmdline: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub editor_session: Option<PathBuf>,
}

impl SessionRecord {
    pub fn to_yaml(&self) -> Result<String, TmuxumError> {
        serde_yaml::to_string(self).map_err(|e| TmuxumError::Record(e.to_string()))
    }

    pub fn from_yaml(text: &str) -> Result<Self, TmuxumError> {
        serde_yaml::from_str(text).map_err(|e| TmuxumError::Record(e.to_string()))
    }

    pub fn pane_count(&self) -> usize {
        self.windows.iter().map(|w| w.panes.len()).sum()
    }
}
