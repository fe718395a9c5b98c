#![allow(dead_code)]

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tmuxum::config::{load_config, AppConfig, CliOverrides};
use tmuxum::errors::TmuxumError;
use tmuxum::procinfo::{FakeProcessInspector, ProcessInfo, ProcessStatus};
use tmuxum::runtime::{
    FakeClock, FakeFileSystem, FakeTerminal, ProcessOutput, ProcessRequest, ProcessRunner,
    ProductionRuntime,
};
use tmuxum::tmux::FIELD_DELIM;
use tmuxum::types::{EnvMap, RunScope};

pub const HOME: &str = "/home/dev";

#[derive(Debug, Clone)]
pub struct FakePane {
    pub id: String,
    pub pid: u32,
    pub current_path: PathBuf,
    pub active: bool,
}

#[derive(Debug, Clone)]
pub struct FakeWindow {
    pub id: String,
    pub name: String,
    pub layout: String,
    pub active: bool,
    pub panes: Vec<FakePane>,
}

#[derive(Debug, Clone)]
pub struct FakeSession {
    pub name: String,
    pub windows: Vec<FakeWindow>,
}

#[derive(Default)]
struct ServerState {
    running: bool,
    refuse_new_session: bool,
    reject_layouts: bool,
    sessions: Vec<FakeSession>,
    attached: Option<String>,
    scrollback: HashMap<String, String>,
    next_window: u32,
    next_pane: u32,
    calls: Vec<Vec<String>>,
}

/// An in-memory tmux server that answers the exact argument lists the client
/// issues. Sessions, windows and panes behave like tmux closely enough for
/// save/load round trips: splits activate the new pane, killing the last pane
/// removes its window and the server stops with its last session.
#[derive(Clone, Default)]
pub struct FakeTmux {
    state: Arc<Mutex<ServerState>>,
    outputs: Arc<Mutex<HashMap<u64, ProcessOutput>>>,
    next_handle: Arc<Mutex<u64>>,
}

impl FakeTmux {
    pub fn running() -> Self {
        let tmux = Self::default();
        tmux.state.lock().expect("state").running = true;
        tmux
    }

    pub fn stopped() -> Self {
        Self::default()
    }

    pub fn refuse_new_session(&self) {
        self.state.lock().expect("state").refuse_new_session = true;
    }

    pub fn reject_layouts(&self) {
        self.state.lock().expect("state").reject_layouts = true;
    }

    pub fn attach(&self, session: &str) {
        self.state.lock().expect("state").attached = Some(session.to_string());
    }

    /// Adds a session whose windows are `(name, panes)` with panes given as
    /// `(pid, cwd)`. The first window and each window's first pane are active.
    pub fn add_session(&self, name: &str, windows: &[(&str, &[(u32, &str)])]) -> Vec<Vec<String>> {
        let mut state = self.state.lock().expect("state");
        state.running = true;
        let mut ids = Vec::new();
        let mut session = FakeSession {
            name: name.to_string(),
            windows: Vec::new(),
        };
        for (index, (window_name, panes)) in windows.iter().enumerate() {
            let window_id = next_window_id(&mut state);
            let mut pane_ids = Vec::new();
            let mut window = FakeWindow {
                id: window_id,
                name: window_name.to_string(),
                layout: format!("b25d,80x24,0,0{{{}}}", panes.len()),
                active: index == 0,
                panes: Vec::new(),
            };
            for (pane_index, (pid, cwd)) in panes.iter().enumerate() {
                let pane_id = next_pane_id(&mut state);
                pane_ids.push(pane_id.clone());
                window.panes.push(FakePane {
                    id: pane_id,
                    pid: *pid,
                    current_path: PathBuf::from(cwd),
                    active: pane_index == 0,
                });
            }
            session.windows.push(window);
            ids.push(pane_ids);
        }
        state.sessions.push(session);
        ids
    }

    pub fn set_scrollback(&self, pane_id: &str, text: &str) {
        self.state
            .lock()
            .expect("state")
            .scrollback
            .insert(pane_id.to_string(), text.to_string());
    }

    pub fn set_active_pane(&self, pane_id: &str) {
        let mut state = self.state.lock().expect("state");
        activate_pane(&mut state, pane_id);
    }

    pub fn set_active_window(&self, session: &str, window_name: &str) {
        let mut state = self.state.lock().expect("state");
        if let Some(session) = state.sessions.iter_mut().find(|s| s.name == session) {
            for window in &mut session.windows {
                window.active = window.name == window_name;
            }
        }
    }

    pub fn kill_session(&self, name: &str) {
        let mut state = self.state.lock().expect("state");
        state.sessions.retain(|session| session.name != name);
        if state.sessions.is_empty() {
            state.running = false;
        }
    }

    pub fn session(&self, name: &str) -> Option<FakeSession> {
        self.state
            .lock()
            .expect("state")
            .sessions
            .iter()
            .find(|session| session.name == name)
            .cloned()
    }

    /// Every tmux invocation, with any `-L <socket>` prefix left in place.
    pub fn calls(&self) -> Vec<Vec<String>> {
        self.state.lock().expect("state").calls.clone()
    }

    pub fn calls_to(&self, subcommand: &str) -> Vec<Vec<String>> {
        self.calls()
            .into_iter()
            .filter(|args| strip_socket(args).first().map(String::as_str) == Some(subcommand))
            .collect()
    }

    /// The `send-keys` arguments after `-t <pane>` for one pane, in order.
    pub fn keys_sent_to(&self, pane_id: &str) -> Vec<Vec<String>> {
        self.calls_to("send-keys")
            .into_iter()
            .map(|args| strip_socket(&args).to_vec())
            .filter(|args| args.get(2).map(String::as_str) == Some(pane_id))
            .map(|args| args[3..].to_vec())
            .collect()
    }

    fn respond(&self, args: &[String]) -> ProcessOutput {
        let mut state = self.state.lock().expect("state");
        state.calls.push(args.to_vec());
        let args = strip_socket(args);
        let Some((subcommand, rest)) = args.split_first() else {
            return ProcessOutput::failure("usage: tmux [-L socket-name] command");
        };

        if !state.running && subcommand != "new-session" {
            return ProcessOutput::failure("no server running on /tmp/tmux-1000/default");
        }

        match subcommand.as_str() {
            "list-sessions" => {
                let names = state
                    .sessions
                    .iter()
                    .map(|session| format!("{}\n", session.name))
                    .collect::<String>();
                ProcessOutput::success(names)
            }
            "display-message" => match &state.attached {
                Some(name) => ProcessOutput::success(format!("{name}\n")),
                None => ProcessOutput::failure("no current client"),
            },
            "new-session" => {
                let name = flag_value(rest, "-s").unwrap_or_default();
                if state.refuse_new_session {
                    return ProcessOutput::failure("server exited unexpectedly");
                }
                if state.sessions.iter().any(|session| session.name == name) {
                    return ProcessOutput::failure(format!("duplicate session: {name}"));
                }
                let window = new_fake_window(&mut state, true);
                state.sessions.push(FakeSession {
                    name,
                    windows: vec![window],
                });
                state.running = true;
                ProcessOutput::success("")
            }
            "list-windows" => {
                let target = flag_value(rest, "-t").unwrap_or_default();
                let name = target.trim_start_matches('=');
                let Some(session) = state.sessions.iter().find(|s| s.name == name) else {
                    return ProcessOutput::failure(format!("can't find session: {name}"));
                };
                let lines = session
                    .windows
                    .iter()
                    .enumerate()
                    .map(|(index, window)| {
                        format!(
                            "{id}{d}{index}{d}{name}{d}{layout}{d}{active}\n",
                            id = window.id,
                            name = window.name,
                            layout = window.layout,
                            active = u8::from(window.active),
                            d = FIELD_DELIM
                        )
                    })
                    .collect::<String>();
                ProcessOutput::success(lines)
            }
            "list-panes" => {
                let target = flag_value(rest, "-t").unwrap_or_default();
                let Some(window) = find_window(&state, &target) else {
                    return ProcessOutput::failure(format!("can't find window: {target}"));
                };
                let lines = window
                    .panes
                    .iter()
                    .map(|pane| {
                        format!(
                            "{id}{d}{active}{d}{pid}{d}{path}\n",
                            id = pane.id,
                            active = u8::from(pane.active),
                            pid = pane.pid,
                            path = pane.current_path.display(),
                            d = FIELD_DELIM
                        )
                    })
                    .collect::<String>();
                ProcessOutput::success(lines)
            }
            "capture-pane" => {
                let target = flag_value(rest, "-t").unwrap_or_default();
                let text = state.scrollback.get(&target).cloned().unwrap_or_default();
                ProcessOutput::success(text)
            }
            "new-window" => {
                let target = flag_value(rest, "-t").unwrap_or_default();
                let name = target.trim_start_matches('=').trim_end_matches(':').to_string();
                if !state.sessions.iter().any(|s| s.name == name) {
                    return ProcessOutput::failure(format!("can't find session: {name}"));
                }
                let window = new_fake_window(&mut state, false);
                let out = format!("{}{}{}\n", window.id, FIELD_DELIM, window.panes[0].id);
                if let Some(session) = state.sessions.iter_mut().find(|s| s.name == name) {
                    session.windows.push(window);
                }
                ProcessOutput::success(out)
            }
            "rename-window" => {
                let target = flag_value(rest, "-t").unwrap_or_default();
                let new_name = rest.last().cloned().unwrap_or_default();
                match find_window_mut(&mut state, &target) {
                    Some(window) => {
                        window.name = new_name;
                        ProcessOutput::success("")
                    }
                    None => ProcessOutput::failure(format!("can't find window: {target}")),
                }
            }
            "split-window" => {
                let target = flag_value(rest, "-t").unwrap_or_default();
                let pane_id = next_pane_id(&mut state);
                let Some(window) = window_of_pane_mut(&mut state, &target) else {
                    return ProcessOutput::failure(format!("can't find pane: {target}"));
                };
                for pane in &mut window.panes {
                    pane.active = false;
                }
                window.panes.push(FakePane {
                    id: pane_id.clone(),
                    pid: 0,
                    current_path: PathBuf::from(HOME),
                    active: true,
                });
                ProcessOutput::success(format!("{pane_id}\n"))
            }
            "select-layout" => {
                let target = flag_value(rest, "-t").unwrap_or_default();
                let layout = rest.last().cloned().unwrap_or_default();
                let reject = state.reject_layouts;
                let Some(window) = find_window_mut(&mut state, &target) else {
                    return ProcessOutput::failure(format!("can't find window: {target}"));
                };
                if layout == "-E" {
                    return ProcessOutput::success("");
                }
                if reject {
                    return ProcessOutput::failure("invalid layout");
                }
                window.layout = layout;
                ProcessOutput::success("")
            }
            "select-pane" => {
                let target = flag_value(rest, "-t").unwrap_or_default();
                if activate_pane(&mut state, &target) {
                    ProcessOutput::success("")
                } else {
                    ProcessOutput::failure(format!("can't find pane: {target}"))
                }
            }
            "select-window" => {
                let target = flag_value(rest, "-t").unwrap_or_default();
                let Some(session) = state
                    .sessions
                    .iter_mut()
                    .find(|s| s.windows.iter().any(|w| w.id == target))
                else {
                    return ProcessOutput::failure(format!("can't find window: {target}"));
                };
                for window in &mut session.windows {
                    window.active = window.id == target;
                }
                ProcessOutput::success("")
            }
            "kill-pane" => {
                let target = flag_value(rest, "-t").unwrap_or_default();
                let Some(window) = window_of_pane_mut(&mut state, &target) else {
                    return ProcessOutput::failure(format!("can't find pane: {target}"));
                };
                let was_active = window.panes.iter().any(|p| p.id == target && p.active);
                window.panes.retain(|pane| pane.id != target);
                if was_active {
                    if let Some(first) = window.panes.first_mut() {
                        first.active = true;
                    }
                }
                drop_empty_windows(&mut state);
                ProcessOutput::success("")
            }
            "kill-window" => {
                let target = flag_value(rest, "-t").unwrap_or_default();
                let Some(session) = state
                    .sessions
                    .iter_mut()
                    .find(|s| s.windows.iter().any(|w| w.id == target))
                else {
                    return ProcessOutput::failure(format!("can't find window: {target}"));
                };
                let was_active = session.windows.iter().any(|w| w.id == target && w.active);
                session.windows.retain(|window| window.id != target);
                if was_active {
                    if let Some(first) = session.windows.first_mut() {
                        first.active = true;
                    }
                }
                drop_empty_windows(&mut state);
                ProcessOutput::success("")
            }
            "send-keys" => {
                let target = flag_value(rest, "-t").unwrap_or_default();
                if window_of_pane_mut(&mut state, &target).is_none() {
                    return ProcessOutput::failure(format!("can't find pane: {target}"));
                }
                ProcessOutput::success("")
            }
            other => ProcessOutput::failure(format!("unknown command: {other}")),
        }
    }
}

impl ProcessRunner for FakeTmux {
    fn spawn(&self, request: ProcessRequest) -> Result<u64, TmuxumError> {
        if request.program != "tmux" {
            return Err(TmuxumError::Process(format!(
                "unexpected program {}",
                request.program
            )));
        }
        let output = self.respond(&request.args);
        let mut next = self.next_handle.lock().expect("handle");
        let handle = *next;
        *next += 1;
        self.outputs.lock().expect("outputs").insert(handle, output);
        Ok(handle)
    }

    fn wait(&self, handle: u64) -> Result<ProcessOutput, TmuxumError> {
        self.outputs
            .lock()
            .expect("outputs")
            .remove(&handle)
            .ok_or_else(|| TmuxumError::Process(format!("unknown handle {handle}")))
    }
}

fn strip_socket(args: &[String]) -> &[String] {
    if args.first().map(String::as_str) == Some("-L") && args.len() >= 2 {
        &args[2..]
    } else {
        args
    }
}

fn flag_value(args: &[String], flag: &str) -> Option<String> {
    args.iter()
        .position(|arg| arg == flag)
        .and_then(|index| args.get(index + 1))
        .cloned()
}

fn next_window_id(state: &mut ServerState) -> String {
    let id = format!("@{}", state.next_window);
    state.next_window += 1;
    id
}

fn next_pane_id(state: &mut ServerState) -> String {
    let id = format!("%{}", state.next_pane);
    state.next_pane += 1;
    id
}

fn new_fake_window(state: &mut ServerState, active: bool) -> FakeWindow {
    let id = next_window_id(state);
    let pane_id = next_pane_id(state);
    FakeWindow {
        id,
        name: "zsh".to_string(),
        layout: "c0de,80x24,0,0,0".to_string(),
        active,
        panes: vec![FakePane {
            id: pane_id,
            pid: 0,
            current_path: PathBuf::from(HOME),
            active: true,
        }],
    }
}

fn find_window<'a>(state: &'a ServerState, id: &str) -> Option<&'a FakeWindow> {
    state
        .sessions
        .iter()
        .flat_map(|session| session.windows.iter())
        .find(|window| window.id == id)
}

fn find_window_mut<'a>(state: &'a mut ServerState, id: &str) -> Option<&'a mut FakeWindow> {
    state
        .sessions
        .iter_mut()
        .flat_map(|session| session.windows.iter_mut())
        .find(|window| window.id == id)
}

fn window_of_pane_mut<'a>(state: &'a mut ServerState, pane_id: &str) -> Option<&'a mut FakeWindow> {
    state
        .sessions
        .iter_mut()
        .flat_map(|session| session.windows.iter_mut())
        .find(|window| window.panes.iter().any(|pane| pane.id == pane_id))
}

fn activate_pane(state: &mut ServerState, pane_id: &str) -> bool {
    let Some(window) = window_of_pane_mut(state, pane_id) else {
        return false;
    };
    for pane in &mut window.panes {
        pane.active = pane.id == pane_id;
    }
    true
}

fn drop_empty_windows(state: &mut ServerState) {
    for session in &mut state.sessions {
        session.windows.retain(|window| !window.panes.is_empty());
    }
    state.sessions.retain(|session| !session.windows.is_empty());
    if state.sessions.is_empty() {
        state.running = false;
    }
}

pub fn process(pid: u32, name: &str, status: ProcessStatus, cwd: &str, argv: &[&str]) -> ProcessInfo {
    ProcessInfo {
        pid,
        name: name.to_string(),
        status,
        cwd: Some(PathBuf::from(cwd)),
        cmdline: argv.iter().map(|arg| arg.to_string()).collect(),
    }
}

/// Registers a login shell for a pane.
pub fn shell(inspector: &FakeProcessInspector, pid: u32, cwd: &str) {
    inspector.insert(None, process(pid, "zsh", ProcessStatus::Sleeping, cwd, &["-zsh"]));
}

pub struct Harness {
    pub tmux: FakeTmux,
    pub fs: FakeFileSystem,
    pub inspector: FakeProcessInspector,
    pub clock: FakeClock,
    pub terminal: FakeTerminal,
}

impl Harness {
    pub fn new(tmux: FakeTmux) -> Self {
        Self {
            tmux,
            fs: FakeFileSystem::default(),
            inspector: FakeProcessInspector::default(),
            clock: FakeClock::default(),
            terminal: FakeTerminal::default(),
        }
    }

    pub fn runtime(&self) -> ProductionRuntime {
        ProductionRuntime {
            clock: Arc::new(self.clock.clone()),
            file_system: Arc::new(self.fs.clone()),
            process_runner: Arc::new(self.tmux.clone()),
            inspector: Arc::new(self.inspector.clone()),
            terminal: Arc::new(self.terminal.clone()),
        }
    }

    /// Resolves config exactly like the binary does, with `HOME` pinned and
    /// an optional controlling pane.
    pub fn config(
        &self,
        overrides: CliOverrides,
        controlling_pane: Option<&str>,
    ) -> (AppConfig, RunScope) {
        let mut env = EnvMap::new();
        env.insert("HOME".to_string(), HOME.to_string());
        if let Some(pane) = controlling_pane {
            env.insert("TMUX_PANE".to_string(), pane.to_string());
        }
        load_config(&overrides, Path::new(HOME), &env, &self.fs).expect("config")
    }

    pub fn session_overrides(session: &str) -> CliOverrides {
        CliOverrides {
            session: Some(session.to_string()),
            ..CliOverrides::default()
        }
    }

    pub fn output(&self) -> Vec<String> {
        self.terminal.written_lines()
    }
}
