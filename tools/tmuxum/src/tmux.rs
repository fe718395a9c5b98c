use crate::errors::TmuxumError;
use crate::logging::append_run_log;
use crate::runtime::{ProcessOutput, ProcessRequest, ProcessRunner};
use serde_json::json;
use std::path::PathBuf;

/// Separates fields in `-F` formats. Window names and paths may contain tabs
/// and spaces, so a plain whitespace delimiter is not safe.
pub const FIELD_DELIM: &str = "__TMUXUM_FIELD__";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowInfo {
    pub id: String,
    pub index: u32,
    pub name: String,
    pub layout: String,
    pub active: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaneInfo {
    pub id: String,
    pub active: bool,
    /// Pid of the pane's shell; 0 when tmux reports none.
    pub pid: u32,
    pub current_path: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewWindow {
    pub window_id: String,
    pub pane_id: String,
}

pub struct TmuxClient<'a> {
    runner: &'a dyn ProcessRunner,
    socket_name: Option<String>,
}

impl<'a> TmuxClient<'a> {
    pub fn new(runner: &'a dyn ProcessRunner, socket_name: Option<String>) -> Self {
        Self {
            runner,
            socket_name,
        }
    }

    pub fn list_sessions(&self) -> Result<Vec<String>, TmuxumError> {
        let out = self.run(["list-sessions", "-F", "#{session_name}"])?;
        Ok(out
            .stdout
            .lines()
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(str::to_string)
            .collect())
    }

    pub fn has_session(&self, name: &str) -> Result<bool, TmuxumError> {
        Ok(self.list_sessions()?.iter().any(|session| session == name))
    }

    /// Name of the session the calling client is attached to.
    pub fn current_session_name(&self) -> Result<String, TmuxumError> {
        let out = self.run(["display-message", "-p", "#S"])?;
        let name = out.stdout.trim();
        if name.is_empty() {
            return Err(TmuxumError::Tmux(
                "no current session; pass --session".to_string(),
            ));
        }
        Ok(name.to_string())
    }

    /// `name` is the value of `-s`, which tmux takes verbatim even when it
    /// starts with a dash.
    pub fn new_session(&self, name: &str) -> Result<(), TmuxumError> {
        append_run_log("info", "tmux.session.create", json!({ "session": name }));
        self.run(["new-session", "-d", "-s", name])?;
        Ok(())
    }

    pub fn list_windows(&self, session: &str) -> Result<Vec<WindowInfo>, TmuxumError> {
        let format = format!(
            "#{{window_id}}{d}#{{window_index}}{d}#{{window_name}}{d}#{{window_layout}}{d}#{{window_active}}",
            d = FIELD_DELIM
        );
        let target = exact_session(session);
        let out = self.run(["list-windows", "-t", target.as_str(), "-F", format.as_str()])?;
        parse_windows(&out.stdout)
    }

    pub fn list_panes(&self, window_id: &str) -> Result<Vec<PaneInfo>, TmuxumError> {
        let format = format!(
            "#{{pane_id}}{d}#{{pane_active}}{d}#{{pane_pid}}{d}#{{pane_current_path}}",
            d = FIELD_DELIM
        );
        let out = self.run(["list-panes", "-t", window_id, "-F", format.as_str()])?;
        parse_panes(&out.stdout)
    }

    /// Full joined history of a pane, exactly as tmux prints it.
    pub fn capture_pane(&self, pane_id: &str) -> Result<String, TmuxumError> {
        let out = self.run(["capture-pane", "-p", "-J", "-S", "-", "-t", pane_id])?;
        Ok(out.stdout)
    }

    /// Creates a detached window at the end of `session` and returns its id and
    /// the id of its only pane.
    pub fn new_window(&self, session: &str) -> Result<NewWindow, TmuxumError> {
        let format = format!("#{{window_id}}{FIELD_DELIM}#{{pane_id}}");
        let target = format!("{}:", exact_session(session));
        let out = self.run(["new-window", "-d", "-t", target.as_str(), "-P", "-F", format.as_str()])?;
        let line = out.stdout.trim();
        let (window_id, pane_id) = line.split_once(FIELD_DELIM).ok_or_else(|| {
            TmuxumError::Tmux(format!("unexpected new-window output: {line:?}"))
        })?;
        Ok(NewWindow {
            window_id: window_id.to_string(),
            pane_id: pane_id.to_string(),
        })
    }

    pub fn rename_window(&self, window_id: &str, name: &str) -> Result<(), TmuxumError> {
        self.run(["rename-window", "-t", window_id, "--", name])?;
        Ok(())
    }

    /// Splits `pane_id` and returns the new pane's id.
    pub fn split_window(&self, pane_id: &str) -> Result<String, TmuxumError> {
        let out = self.run(["split-window", "-t", pane_id, "-P", "-F", "#{pane_id}"])?;
        let new_pane = out.stdout.trim();
        if new_pane.is_empty() {
            return Err(TmuxumError::Tmux(format!(
                "split-window of {pane_id} returned no pane id"
            )));
        }
        Ok(new_pane.to_string())
    }

    /// Spreads the window's panes out evenly so further splits have room.
    pub fn spread_layout(&self, window_id: &str) -> Result<(), TmuxumError> {
        self.run(["select-layout", "-t", window_id, "-E"])?;
        Ok(())
    }

    pub fn select_layout(&self, window_id: &str, layout: &str) -> Result<(), TmuxumError> {
        self.run(["select-layout", "-t", window_id, "--", layout])?;
        Ok(())
    }

    pub fn select_pane(&self, pane_id: &str) -> Result<(), TmuxumError> {
        self.run(["select-pane", "-t", pane_id])?;
        Ok(())
    }

    pub fn select_window(&self, window_id: &str) -> Result<(), TmuxumError> {
        self.run(["select-window", "-t", window_id])?;
        Ok(())
    }

    pub fn kill_pane(&self, pane_id: &str) -> Result<(), TmuxumError> {
        self.run(["kill-pane", "-t", pane_id])?;
        Ok(())
    }

    pub fn kill_window(&self, window_id: &str) -> Result<(), TmuxumError> {
        self.run(["kill-window", "-t", window_id])?;
        Ok(())
    }

    /// Types `text` into the pane without key-name lookup, then optionally
    /// presses Enter.
    pub fn send_literal(&self, pane_id: &str, text: &str, enter: bool) -> Result<(), TmuxumError> {
        if !text.is_empty() {
            self.run(["send-keys", "-t", pane_id, "-l", "--", text])?;
        }
        if enter {
            self.send_key(pane_id, "Enter")?;
        }
        Ok(())
    }

    /// Sends a named key such as `C-c` or `Enter`.
    pub fn send_key(&self, pane_id: &str, key: &str) -> Result<(), TmuxumError> {
        self.run(["send-keys", "-t", pane_id, key])?;
        Ok(())
    }

    fn run<I, S>(&self, args: I) -> Result<ProcessOutput, TmuxumError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut argv = Vec::new();
        if let Some(socket) = &self.socket_name {
            argv.push("-L".to_string());
            argv.push(socket.clone());
        }
        argv.extend(args.into_iter().map(|s| s.as_ref().to_string()));

        let out = self.runner.run(ProcessRequest {
            program: "tmux".to_string(),
            args: argv.clone(),
            cwd: None,
        })?;
        if out.exit_code != 0 {
            append_run_log(
                "error",
                "tmux.command.failed",
                json!({
                    "args": argv,
                    "exit_code": out.exit_code,
                    "stderr": out.stderr
                }),
            );
            let command = argv
                .iter()
                .find(|arg| !arg.starts_with('-') && Some(*arg) != self.socket_name.as_ref())
                .cloned()
                .unwrap_or_default();
            return Err(TmuxumError::Tmux(format!(
                "{command} failed: {}",
                out.stderr.trim()
            )));
        }
        Ok(out)
    }
}

fn exact_session(name: &str) -> String {
    format!("={name}")
}

fn split_fields(line: &str, expected: usize, what: &str) -> Result<Vec<String>, TmuxumError> {
    let parts = line
        .split(FIELD_DELIM)
        .map(str::to_string)
        .collect::<Vec<_>>();
    if parts.len() != expected {
        return Err(TmuxumError::Tmux(format!(
            "unexpected {what} field count {}, line: {line}",
            parts.len()
        )));
    }
    Ok(parts)
}

fn parse_flag(value: &str) -> bool {
    value.trim() == "1"
}

pub fn parse_windows(output: &str) -> Result<Vec<WindowInfo>, TmuxumError> {
    output
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| {
            let parts = split_fields(line, 5, "list-windows")?;
            let index = parts[1].trim().parse::<u32>().map_err(|e| {
                TmuxumError::Tmux(format!("invalid window_index {:?}: {e}", parts[1]))
            })?;
            Ok(WindowInfo {
                id: parts[0].clone(),
                index,
                name: parts[2].clone(),
                layout: parts[3].clone(),
                active: parse_flag(&parts[4]),
            })
        })
        .collect()
}

pub fn parse_panes(output: &str) -> Result<Vec<PaneInfo>, TmuxumError> {
    output
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| {
            let parts = split_fields(line, 4, "list-panes")?;
            let pid = match parts[2].trim() {
                "" => 0,
                raw => raw.parse::<u32>().map_err(|e| {
                    TmuxumError::Tmux(format!("invalid pane_pid {raw:?}: {e}"))
                })?,
            };
            Ok(PaneInfo {
                id: parts[0].clone(),
                active: parse_flag(&parts[1]),
                pid,
                current_path: PathBuf::from(&parts[3]),
            })
        })
        .collect()
}
