pub mod capture;
pub mod config;
pub mod errors;
pub mod logging;
pub mod pane_commands;
pub mod procinfo;
pub mod record;
pub mod replay;
pub mod runtime;
pub mod storage;
pub mod tmux;
pub mod types;

use capture::capture_session;
use clap::{error::ErrorKind, Parser, Subcommand};
use config::{load_config, AppConfig, CliOverrides};
use errors::TmuxumError;
use logging::{append_run_log, init_run_log, JsonlLogger};
use replay::replay_session;
use runtime::ProductionRuntime;
use serde_json::json;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use types::{EnvMap, RunScope};

#[derive(Debug, Clone, Parser)]
#[command(name = "tmuxum", version)]
#[command(about = "Save and restore tmux sessions: layout, commands and scrollback")]
pub struct Cli {
    /// Read settings from this TOML file
    #[arg(long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,
    /// Session to save or load (default for save is the attached session)
    #[arg(short = 's', long, global = true)]
    pub session: Option<String>,
    /// Load session from / save session to FILE
    #[arg(short = 'f', long = "file", global = true, value_name = "FILE")]
    pub file: Option<PathBuf>,
    /// Write session related files under DIR
    #[arg(short = 't', long = "sessions-directory", global = true, value_name = "DIR")]
    pub sessions_dir: Option<PathBuf>,
    /// Auto-execute previously running commands in panes
    #[arg(short = 'x', long = "execute", global = true, default_value_t = false)]
    pub execute: bool,
    /// Delay between creating panes, in seconds
    #[arg(short = 'd', long = "delay", global = true, value_name = "SECONDS")]
    pub delay: Option<f64>,
    /// tmux server socket name (tmux -L)
    #[arg(short = 'L', long = "socket-name", global = true)]
    pub socket_name: Option<String>,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Subcommand)]
pub enum Command {
    /// Snapshot a running session
    Save,
    /// Recreate a session from its latest (or a given) snapshot
    Load,
    /// List saved snapshots
    List,
}

struct Invocation {
    command: Command,
    cfg: AppConfig,
    scope: RunScope,
}

pub fn run() -> Result<i32, TmuxumError> {
    let args = std::env::args_os().collect::<Vec<_>>();
    let env = std::env::vars_os().collect::<Vec<_>>();
    let cwd = std::env::current_dir().map_err(|e| TmuxumError::Io(e.to_string()))?;
    let runtime = ProductionRuntime::new();

    let Some(invocation) = prepare(&args, &env, &cwd, &runtime)? else {
        return Ok(0);
    };
    init_run_log(JsonlLogger {
        budget_bytes: invocation.cfg.logging.budget_bytes,
        ..JsonlLogger::new(&invocation.cfg.logging.path)
    });
    execute(&invocation, &runtime)
}

/// Same as [`run`] but against an injected runtime and without installing the
/// on-disk run log.
pub fn run_with_runtime(
    args: &[OsString],
    env: &[(OsString, OsString)],
    cwd: &Path,
    runtime: &ProductionRuntime,
) -> Result<i32, TmuxumError> {
    match prepare(args, env, cwd, runtime)? {
        Some(invocation) => execute(&invocation, runtime),
        None => Ok(0),
    }
}

fn prepare(
    args: &[OsString],
    env: &[(OsString, OsString)],
    cwd: &Path,
    runtime: &ProductionRuntime,
) -> Result<Option<Invocation>, TmuxumError> {
    let cli = match Cli::try_parse_from(args) {
        Ok(cli) => cli,
        Err(error) => match error.kind() {
            ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => {
                print!("{error}");
                return Ok(None);
            }
            _ => return Err(TmuxumError::Cli(error.to_string())),
        },
    };

    let overrides = CliOverrides {
        config_path: cli.config.clone(),
        session: cli.session.clone(),
        file: cli.file.clone(),
        sessions_dir: cli.sessions_dir.clone(),
        execute_commands: cli.execute,
        delay_seconds: cli.delay,
        socket_name: cli.socket_name.clone(),
    };
    let env_map = env_to_map(env);
    let (cfg, scope) = load_config(&overrides, cwd, &env_map, runtime.file_system.as_ref())?;
    Ok(Some(Invocation {
        command: cli.command,
        cfg,
        scope,
    }))
}

fn execute(invocation: &Invocation, runtime: &ProductionRuntime) -> Result<i32, TmuxumError> {
    let Invocation {
        command,
        cfg,
        scope,
    } = invocation;
    append_run_log(
        "info",
        "cli.command",
        json!({
            "command": format!("{command:?}").to_ascii_lowercase(),
            "session": scope.session,
            "sessions_dir": cfg.storage.sessions_dir.display().to_string()
        }),
    );

    match command {
        Command::Save => {
            capture_session(runtime, cfg, scope)?;
        }
        Command::Load => {
            replay_session(runtime, cfg, scope)?;
        }
        Command::List => list_snapshots(runtime, cfg, scope)?,
    }
    Ok(0)
}

fn list_snapshots(
    runtime: &ProductionRuntime,
    cfg: &AppConfig,
    scope: &RunScope,
) -> Result<(), TmuxumError> {
    let fs = runtime.file_system.as_ref();
    let root = &cfg.storage.sessions_dir;
    let sessions = match &scope.session {
        Some(session) => vec![session.clone()],
        None => storage::list_saved_sessions(fs, root)?,
    };
    if sessions.is_empty() {
        runtime
            .terminal
            .write_line(&format!("no saved sessions under {}", root.display()))?;
        return Ok(());
    }
    for session in sessions {
        let snapshots = storage::list_snapshots(fs, root, &session)?;
        if snapshots.is_empty() {
            runtime
                .terminal
                .write_line(&format!("{session}: no saved snapshots"))?;
            continue;
        }
        runtime.terminal.write_line(&format!("{session}:"))?;
        for snapshot in snapshots {
            runtime
                .terminal
                .write_line(&format!("  {}", snapshot.display()))?;
        }
    }
    Ok(())
}

fn env_to_map(env: &[(OsString, OsString)]) -> EnvMap {
    let mut map = EnvMap::new();
    for (key, value) in env {
        if let (Some(key), Some(value)) = (key.to_str(), value.to_str()) {
            map.insert(key.to_string(), value.to_string());
        }
    }
    map
}
