//! Process inspection for pane shells and their children.
//!
//! Linux reads `/proc/<pid>/{stat,cmdline,cwd}` directly. The procfs root is
//! configurable so tests can point the inspector at a synthetic tree.

use crate::errors::TmuxumError;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProcessStatus {
    Running,
    Sleeping,
    DiskSleep,
    Stopped,
    TracingStop,
    Zombie,
    Dead,
    Idle,
    Unknown,
}

impl ProcessStatus {
    pub fn from_linux_state(state: &str) -> Self {
        match state {
            "R" => Self::Running,
            "S" => Self::Sleeping,
            "D" => Self::DiskSleep,
            "T" => Self::Stopped,
            "t" => Self::TracingStop,
            "Z" => Self::Zombie,
            "X" | "x" => Self::Dead,
            "I" => Self::Idle,
            _ => Self::Unknown,
        }
    }

    /// Job-control stopped (`^Z`). Such children are parked in the
    /// background and are not what the pane is showing.
    pub fn is_stopped(self) -> bool {
        self == Self::Stopped
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Sleeping => "sleeping",
            Self::DiskSleep => "disk-sleep",
            Self::Stopped => "stopped",
            Self::TracingStop => "tracing-stop",
            Self::Zombie => "zombie",
            Self::Dead => "dead",
            Self::Idle => "idle",
            Self::Unknown => "unknown",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessInfo {
    pub pid: u32,
    /// The COMM name, truncated by the kernel to 15 bytes.
    pub name: String,
    pub status: ProcessStatus,
    /// `None` when the cwd link is unreadable (other user, exited).
    pub cwd: Option<PathBuf>,
    pub cmdline: Vec<String>,
}

pub trait ProcessInspector: Send + Sync {
    fn process(&self, pid: u32) -> Result<ProcessInfo, TmuxumError>;
    /// Direct children of `pid`, ascending by pid.
    fn children(&self, pid: u32) -> Result<Vec<u32>, TmuxumError>;
}

#[derive(Debug, Clone)]
pub struct ProcfsInspector {
    root: PathBuf,
}

impl ProcfsInspector {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn pid_dir(&self, pid: u32) -> PathBuf {
        self.root.join(pid.to_string())
    }
}

impl Default for ProcfsInspector {
    fn default() -> Self {
        Self::new("/proc")
    }
}

impl ProcessInspector for ProcfsInspector {
    fn process(&self, pid: u32) -> Result<ProcessInfo, TmuxumError> {
        let dir = self.pid_dir(pid);
        let stat = std::fs::read_to_string(dir.join("stat"))
            .map_err(|e| TmuxumError::Process(format!("no such process {pid}: {e}")))?;
        let parsed = parse_stat(&stat)
            .ok_or_else(|| TmuxumError::Process(format!("malformed stat for pid {pid}")))?;
        let cmdline = std::fs::read(dir.join("cmdline"))
            .map(|raw| parse_cmdline(&raw))
            .unwrap_or_default();
        let cwd = std::fs::read_link(dir.join("cwd")).ok();

        Ok(ProcessInfo {
            pid,
            name: parsed.name,
            status: parsed.status,
            cwd,
            cmdline,
        })
    }

    fn children(&self, pid: u32) -> Result<Vec<u32>, TmuxumError> {
        let entries = std::fs::read_dir(&self.root)
            .map_err(|e| TmuxumError::Process(format!("{}: {e}", self.root.display())))?;

        let mut children = Vec::new();
        for entry in entries.flatten() {
            let name = entry.file_name();
            let Some(child_pid) = name.to_str().and_then(|s| s.parse::<u32>().ok()) else {
                continue;
            };
            let Ok(stat) = std::fs::read_to_string(entry.path().join("stat")) else {
                continue;
            };
            if parse_stat(&stat).map(|s| s.ppid) == Some(pid) {
                children.push(child_pid);
            }
        }
        children.sort_unstable();
        Ok(children)
    }
}

struct StatFields {
    name: String,
    status: ProcessStatus,
    ppid: u32,
}

/// Parses "pid (comm) state ppid ...". The comm may itself contain spaces
/// and parens, so the name ends at the last ')'.
fn parse_stat(stat: &str) -> Option<StatFields> {
    let name_start = stat.find('(')?;
    let name_end = stat.rfind(')')?;
    if name_end < name_start {
        return None;
    }
    let name = stat[name_start + 1..name_end].to_string();
    let mut fields = stat.get(name_end + 1..)?.split_whitespace();
    let status = ProcessStatus::from_linux_state(fields.next()?);
    let ppid = fields.next()?.parse::<u32>().ok()?;
    Some(StatFields { name, status, ppid })
}

fn parse_cmdline(raw: &[u8]) -> Vec<String> {
    raw.split(|b| *b == 0)
        .filter(|part| !part.is_empty())
        .map(|part| String::from_utf8_lossy(part).into_owned())
        .collect()
}

/// Returns the executable base name of a command line's first word.
pub fn program_name(cmdline: &[String]) -> Option<&str> {
    let first = cmdline.first()?;
    Path::new(first).file_name().and_then(|name| name.to_str())
}

#[derive(Default, Clone)]
pub struct FakeProcessInspector {
    processes: Arc<Mutex<HashMap<u32, ProcessInfo>>>,
    children: Arc<Mutex<BTreeMap<u32, Vec<u32>>>>,
}

impl FakeProcessInspector {
    pub fn insert(&self, parent: Option<u32>, info: ProcessInfo) {
        if let Some(parent) = parent {
            let mut children = self.children.lock().expect("children lock");
            let entry = children.entry(parent).or_default();
            entry.push(info.pid);
            entry.sort_unstable();
        }
        self.processes
            .lock()
            .expect("processes lock")
            .insert(info.pid, info);
    }
}

impl ProcessInspector for FakeProcessInspector {
    fn process(&self, pid: u32) -> Result<ProcessInfo, TmuxumError> {
        self.processes
            .lock()
            .expect("processes lock")
            .get(&pid)
            .cloned()
            .ok_or_else(|| TmuxumError::Process(format!("no such process {pid}")))
    }

    fn children(&self, pid: u32) -> Result<Vec<u32>, TmuxumError> {
        Ok(self
            .children
            .lock()
            .expect("children lock")
            .get(&pid)
            .cloned()
            .unwrap_or_default())
    }
}
