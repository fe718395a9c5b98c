use crate::config::AppConfig;
use crate::errors::TmuxumError;
use crate::logging::append_run_log;
use crate::procinfo::program_name;
use crate::record::{PaneLaunch, PaneRecord, SessionRecord, WindowRecord};
use crate::runtime::{Clock, ProductionRuntime, Terminal};
use crate::storage::{latest_snapshot, read_record, record_path};
use crate::tmux::TmuxClient;
use crate::types::RunScope;
use serde_json::json;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_EDITOR: &str = "vim";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplayOutcome {
    pub session: String,
    pub record_path: PathBuf,
    pub created_session: bool,
    pub created_windows: Vec<String>,
    pub skipped_windows: Vec<String>,
}

pub fn replay_session(
    runtime: &ProductionRuntime,
    cfg: &AppConfig,
    scope: &RunScope,
) -> Result<ReplayOutcome, TmuxumError> {
    let fs = runtime.file_system.as_ref();
    let path = match (&scope.record_file, &scope.session) {
        (Some(file), _) => file.clone(),
        (None, Some(session)) => {
            record_path(&latest_snapshot(fs, &cfg.storage.sessions_dir, session)?)
        }
        (None, None) => {
            return Err(TmuxumError::Cli(
                "you must provide a session name (--session) or a record (--file)".to_string(),
            ))
        }
    };
    let record = read_record(fs, &path)?;
    let session = scope
        .session
        .clone()
        .unwrap_or_else(|| record.session_name.clone());

    runtime.terminal.write_line(&format!(
        "loading session {session:?} from file {}",
        path.display()
    ))?;
    append_run_log(
        "info",
        "replay.started",
        json!({
            "session": session,
            "record": path.display().to_string(),
            "windows": record.windows.len(),
            "execute_commands": cfg.replay.execute_commands
        }),
    );

    let tmux = TmuxClient::new(runtime.process_runner.as_ref(), cfg.tmux.socket_name.clone());
    let bootstrapped = ensure_server(&tmux, &session)?;

    let replayer = Replayer {
        tmux,
        clock: runtime.clock.as_ref(),
        terminal: runtime.terminal.as_ref(),
        cfg,
    };
    let mut outcome = replayer.replay(&session, &record, bootstrapped)?;
    outcome.record_path = path;

    append_run_log(
        "info",
        "replay.completed",
        json!({
            "session": outcome.session,
            "created_session": outcome.created_session,
            "created_windows": outcome.created_windows,
            "skipped_windows": outcome.skipped_windows
        }),
    );
    Ok(outcome)
}

/// Starts `session` once when no server answers, then retries the lookup.
/// A second failure is fatal. Returns whether the session was started here.
fn ensure_server(tmux: &TmuxClient<'_>, session: &str) -> Result<bool, TmuxumError> {
    let Err(err) = tmux.list_sessions() else {
        return Ok(false);
    };
    append_run_log(
        "warn",
        "replay.server.unreachable",
        json!({ "session": session, "error": err.to_string() }),
    );
    tmux.new_session(session)?;
    tmux.list_sessions()?;
    Ok(true)
}

struct Replayer<'a> {
    tmux: TmuxClient<'a>,
    clock: &'a dyn Clock,
    terminal: &'a dyn Terminal,
    cfg: &'a AppConfig,
}

impl Replayer<'_> {
    fn replay(
        &self,
        session: &str,
        record: &SessionRecord,
        bootstrapped: bool,
    ) -> Result<ReplayOutcome, TmuxumError> {
        let updating = !bootstrapped && self.tmux.has_session(session)?;
        let bootstrap_window = if updating {
            None
        } else {
            if !bootstrapped {
                self.tmux.new_session(session)?;
            }
            self.tmux
                .list_windows(session)?
                .into_iter()
                .next()
                .map(|window| window.id)
        };

        // The bootstrap window is auto-named after the shell and is about to be
        // killed, so its name must not shadow a recorded window.
        let mut existing = self
            .tmux
            .list_windows(session)?
            .into_iter()
            .filter(|window| Some(&window.id) != bootstrap_window.as_ref())
            .map(|window| window.name)
            .collect::<BTreeSet<_>>();
        let mut created_windows = Vec::new();
        let mut skipped_windows = Vec::new();
        let mut active_window = None;

        for window in &record.windows {
            if existing.contains(&window.name) {
                self.terminal
                    .write_line(&format!("already exists window {}", window.name))?;
                skipped_windows.push(window.name.clone());
                continue;
            }
            self.terminal
                .write_line(&format!("* creating window: {}", window.name))?;
            let window_id = self.replay_window(session, window)?;
            existing.insert(window.name.clone());
            created_windows.push(window.name.clone());
            if window.active {
                active_window = Some(window_id);
            }
        }

        if let Some(window_id) = &active_window {
            self.tmux.select_window(window_id)?;
        }
        if let Some(bootstrap) = bootstrap_window.filter(|_| !created_windows.is_empty()) {
            self.tmux.kill_window(&bootstrap)?;
        }

        Ok(ReplayOutcome {
            session: session.to_string(),
            record_path: PathBuf::new(),
            created_session: !updating,
            created_windows,
            skipped_windows,
        })
    }

    fn replay_window(&self, session: &str, window: &WindowRecord) -> Result<String, TmuxumError> {
        let created = self.tmux.new_window(session)?;
        self.tmux.rename_window(&created.window_id, &window.name)?;
        if window.panes.is_empty() {
            return Ok(created.window_id);
        }

        let mut current = created.pane_id.clone();
        let mut active_pane = None;
        for pane in &window.panes {
            self.terminal
                .write_line(&format!("  * creating pane: {}", pane.launch.describe()))?;
            current = self.tmux.split_window(&current)?;
            self.tmux.spread_layout(&created.window_id)?;
            self.replay_pane(&current, pane)?;
            if pane.active {
                active_pane = Some(current.clone());
            }
            self.pause()?;
        }

        self.tmux.kill_pane(&created.pane_id)?;
        if let Err(err) = self.tmux.select_layout(&created.window_id, &window.layout) {
            // The recorded layout still counts the pane tmuxum ran in, which
            // capture skips; tmux then rejects it and the spread layout stays.
            self.terminal
                .write_line(&format!("  ! keeping even layout for {}: {err}", window.name))?;
            append_run_log(
                "warn",
                "replay.layout.rejected",
                json!({ "window": window.name, "layout": window.layout, "error": err.to_string() }),
            );
        }
        if let Some(pane_id) = &active_pane {
            self.tmux.select_pane(pane_id)?;
        }
        Ok(created.window_id)
    }

    fn replay_pane(&self, pane_id: &str, pane: &PaneRecord) -> Result<(), TmuxumError> {
        // A leading space keeps injected lines out of shell history.
        self.tmux
            .send_literal(pane_id, &format!(" cat {}", shell_quote_path(&pane.scrollback)), true)?;

        match &pane.launch {
            PaneLaunch::Command { command, cwd } => {
                self.change_dir(pane_id, cwd)?;
                self.type_command(pane_id, command)?;
            }
            PaneLaunch::Process {
                cwd,
                children,
                last_command,
                ..
            } => {
                if let Some(child) = children.values().find(|c| !c.status.is_stopped()) {
                    if let Some(child_cwd) = &child.cwd {
                        self.change_dir(pane_id, child_cwd)?;
                    }
                    match &child.editor_session {
                        Some(session_file) => {
                            let editor = program_name(&child.cmdline).unwrap_or(DEFAULT_EDITOR);
                            self.tmux.send_literal(
                                pane_id,
                                &format!(" {editor} -S {}", shell_quote_path(session_file)),
                                true,
                            )?;
                            self.terminal.write_line(&format!(
                                "    * loading editor session: {}",
                                session_file.display()
                            ))?;
                        }
                        None => self.type_command(pane_id, &child.cmdline.join(" "))?,
                    }
                } else {
                    if let Some(cwd) = cwd {
                        self.change_dir(pane_id, cwd)?;
                    }
                    if let Some(last) = last_command {
                        self.tmux.send_literal(pane_id, &format!("  {last}"), false)?;
                    }
                }
            }
        }
        Ok(())
    }

    fn change_dir(&self, pane_id: &str, dir: &Path) -> Result<(), TmuxumError> {
        self.tmux
            .send_literal(pane_id, &format!(" cd {}", shell_quote_path(dir)), true)
    }

    fn type_command(&self, pane_id: &str, command: &str) -> Result<(), TmuxumError> {
        let execute = self.cfg.replay.execute_commands;
        self.tmux.send_literal(pane_id, command, execute)?;
        let verb = if execute { "executed:" } else { "typed:" };
        self.terminal.write_line(&format!("    {verb} {command}"))
    }

    fn pause(&self) -> Result<(), TmuxumError> {
        let delay = self.cfg.replay.delay_seconds;
        if delay <= 0.0 {
            return Ok(());
        }
        let deadline = Duration::try_from_secs_f64(delay)
            .ok()
            .and_then(|pause| self.clock.now().checked_add(pause))
            .ok_or_else(|| {
                TmuxumError::InvalidConfig(format!(
                    "replay.delay_seconds {delay} is too large to sleep for"
                ))
            })?;
        self.clock.sleep_until(deadline)
    }
}

/// Single-quotes a path for the shell unless it is made only of characters
/// that never need quoting.
pub fn shell_quote_path(path: &Path) -> String {
    let raw = path.to_string_lossy();
    let safe = !raw.is_empty()
        && raw
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "_@%+=:,./-".contains(c));
    if safe {
        raw.into_owned()
    } else {
        format!("'{}'", raw.replace('\'', r"'\''"))
    }
}
