use crate::config::AppConfig;
use crate::errors::TmuxumError;
use crate::logging::append_run_log;
use crate::pane_commands::PaneCommandLog;
use crate::procinfo::{ProcessInfo, ProcessInspector};
use crate::record::{ChildRecord, PaneLaunch, PaneRecord, SessionRecord, WindowRecord};
use crate::runtime::{FileSystem, ProductionRuntime, Terminal};
use crate::storage::{editor_session_path, record_path, scrollback_path, snapshot_dir, write_record};
use crate::tmux::{PaneInfo, TmuxClient, WindowInfo};
use crate::types::RunScope;
use serde_json::json;
use std::collections::BTreeMap;
use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureOutcome {
    pub session: String,
    pub snapshot_dir: PathBuf,
    pub record_path: PathBuf,
    pub record: SessionRecord,
}

pub fn capture_session(
    runtime: &ProductionRuntime,
    cfg: &AppConfig,
    scope: &RunScope,
) -> Result<CaptureOutcome, TmuxumError> {
    let tmux = TmuxClient::new(runtime.process_runner.as_ref(), cfg.tmux.socket_name.clone());
    let session = match &scope.session {
        Some(name) => name.clone(),
        None => tmux.current_session_name()?,
    };
    if !tmux.has_session(&session)? {
        return Err(TmuxumError::SessionNotFound(session));
    }

    let dir = snapshot_dir(&cfg.storage.sessions_dir, &session, runtime.clock.now());
    let output = scope
        .record_file
        .clone()
        .unwrap_or_else(|| record_path(&dir));
    runtime.file_system.create_dir_all(&dir)?;
    append_run_log(
        "info",
        "capture.started",
        json!({
            "session": session,
            "snapshot_dir": dir.display().to_string(),
            "record": output.display().to_string()
        }),
    );

    let capturer = Capturer {
        tmux,
        inspector: runtime.inspector.as_ref(),
        fs: runtime.file_system.as_ref(),
        terminal: runtime.terminal.as_ref(),
        commands: PaneCommandLog::new(
            runtime.file_system.as_ref(),
            &cfg.storage.pane_commands_dir,
        ),
        cfg,
        snapshot_dir: dir.clone(),
        controlling_pane: scope.controlling_pane.as_deref(),
    };

    let mut windows = Vec::new();
    for window in capturer.tmux.list_windows(&session)? {
        windows.push(capturer.capture_window(window)?);
    }
    let record = SessionRecord {
        session_name: session.clone(),
        windows,
    };

    write_record(runtime.file_system.as_ref(), &output, &record)?;
    runtime.terminal.write_line(&format!(
        "saved session {session:?} to file {}",
        output.display()
    ))?;
    append_run_log(
        "info",
        "capture.completed",
        json!({
            "session": session,
            "windows": record.windows.len(),
            "panes": record.pane_count()
        }),
    );

    Ok(CaptureOutcome {
        session,
        snapshot_dir: dir,
        record_path: output,
        record,
    })
}

struct Capturer<'a> {
    tmux: TmuxClient<'a>,
    inspector: &'a dyn ProcessInspector,
    fs: &'a dyn FileSystem,
    terminal: &'a dyn Terminal,
    commands: PaneCommandLog<'a>,
    cfg: &'a AppConfig,
    snapshot_dir: PathBuf,
    controlling_pane: Option<&'a str>,
}

impl Capturer<'_> {
    fn capture_window(&self, window: WindowInfo) -> Result<WindowRecord, TmuxumError> {
        self.terminal
            .write_line(&format!("* saving window: {}", window.name))?;
        let mut panes = Vec::new();
        for pane in self.tmux.list_panes(&window.id)? {
            if Some(pane.id.as_str()) == self.controlling_pane {
                continue;
            }
            panes.push(self.capture_pane(&pane)?);
        }
        Ok(WindowRecord {
            id: window.id,
            index: window.index,
            name: window.name,
            layout: window.layout,
            active: window.active,
            panes,
        })
    }

    fn capture_pane(&self, pane: &PaneInfo) -> Result<PaneRecord, TmuxumError> {
        let scrollback = scrollback_path(&self.snapshot_dir, &pane.id);
        let text = normalize_scrollback(&self.tmux.capture_pane(&pane.id)?);
        self.fs.write_string(&scrollback, &text)?;

        let launch = if pane.pid == 0 {
            self.terminal.write_line("  * saving pane: EMPTY")?;
            PaneLaunch::empty()
        } else {
            self.capture_launch(pane)?
        };
        append_run_log(
            "debug",
            "capture.pane",
            json!({
                "pane": pane.id,
                "pid": pane.pid,
                "scrollback_bytes": text.len(),
                "launch": launch.describe()
            }),
        );

        Ok(PaneRecord {
            id: pane.id.clone(),
            active: pane.active,
            scrollback,
            launch,
        })
    }

    fn capture_launch(&self, pane: &PaneInfo) -> Result<PaneLaunch, TmuxumError> {
        let shell = self.inspector.process(pane.pid)?;
        // A child may exit between listing and inspection; it is simply gone.
        let children = self
            .inspector
            .children(pane.pid)?
            .into_iter()
            .filter_map(|pid| self.inspector.process(pid).ok())
            .collect::<Vec<_>>();
        let command = self.commands.last_command(&pane.id);

        if let Some(command) = command.as_deref() {
            if self.is_simple_command(command, &children) {
                self.terminal.write_line(&format!(
                    "  * saving pane at {}: {command}",
                    pane.current_path.display()
                ))?;
                return Ok(PaneLaunch::Command {
                    command: command.to_string(),
                    cwd: pane.current_path.clone(),
                });
            }
        }

        self.terminal.write_line(&format!(
            "  * saving pane at {}: {:?}",
            display_cwd(&shell.cwd),
            shell.cmdline
        ))?;
        let mut child_records = BTreeMap::new();
        for child in &children {
            child_records.insert(child.pid, self.capture_child(pane, child)?);
        }
        let snapshot_dir = self.snapshot_dir.to_string_lossy().into_owned();
        let last_command = command
            .filter(|c| !c.starts_with("cd ") && !c.contains(snapshot_dir.as_str()));

        Ok(PaneLaunch::Process {
            cwd: shell.cwd,
            cmdline: shell.cmdline,
            children: child_records,
            last_command,
        })
    }

    /// The hook's command describes the pane only when exactly one child is
    /// live and nothing live is an editor; editors get a session file instead.
    fn is_simple_command(&self, command: &str, children: &[ProcessInfo]) -> bool {
        let live = children
            .iter()
            .filter(|child| !child.status.is_stopped())
            .collect::<Vec<_>>();
        live.len() == 1
            && !self
                .cfg
                .capture
                .editors
                .iter()
                .any(|editor| command.starts_with(&format!("{editor} ")))
            && !live.iter().any(|child| self.cfg.is_editor(&child.name))
    }

    fn capture_child(&self, pane: &PaneInfo, child: &ProcessInfo) -> Result<ChildRecord, TmuxumError> {
        let mut record = ChildRecord {
            status: child.status,
            cwd: child.cwd.clone(),
            cmdline: child.cmdline.clone(),
            editor_session: None,
        };
        if child.status.is_stopped() {
            return Ok(record);
        }

        if self.cfg.is_editor(&child.name) {
            let session_file = editor_session_path(&self.snapshot_dir, child.pid);
            self.tmux.send_key(&pane.id, "C-c")?;
            self.tmux.send_literal(&pane.id, ":wall!", true)?;
            self.tmux.send_literal(
                &pane.id,
                &format!(":mksession! {}", session_file.display()),
                true,
            )?;
            self.terminal.write_line(&format!(
                "    * saving editor session ({}, at {}): {}",
                child.pid,
                display_cwd(&child.cwd),
                session_file.display()
            ))?;
            append_run_log(
                "info",
                "capture.editor_session",
                json!({
                    "pane": pane.id,
                    "pid": child.pid,
                    "editor": child.name,
                    "session_file": session_file.display().to_string()
                }),
            );
            record.editor_session = Some(session_file);
        } else {
            self.terminal.write_line(&format!(
                "    * saving command ({}, at {}): {:?}",
                child.pid,
                display_cwd(&child.cwd),
                child.cmdline
            ))?;
        }
        Ok(record)
    }
}

/// Strips trailing whitespace from every line and drops trailing blank lines,
/// which tmux pads the visible area with.
pub fn normalize_scrollback(raw: &str) -> String {
    let mut lines = raw.lines().map(str::trim_end).collect::<Vec<_>>();
    while lines.last().is_some_and(|line| line.is_empty()) {
        lines.pop();
    }
    lines.join("\n")
}

fn display_cwd(cwd: &Option<PathBuf>) -> String {
    cwd.as_ref()
        .map(|path| path.display().to_string())
        .unwrap_or_else(|| "?".to_string())
}

#[cfg(test)]
mod tests {
    use super::normalize_scrollback;

    #[test]
    fn scrollback_strips_trailing_whitespace_per_line() {
        let raw = "$ ls   \nCargo.toml  src\t\n\n$ \n\n\n";
        assert_eq!(normalize_scrollback(raw), "$ ls\nCargo.toml  src\n\n$");
    }

    #[test]
    fn blank_scrollback_is_empty() {
        assert_eq!(normalize_scrollback("   \n\n"), "");
    }
}
