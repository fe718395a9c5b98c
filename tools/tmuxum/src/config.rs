use crate::errors::TmuxumError;
use crate::logging::DEFAULT_DISK_BUDGET_BYTES;
use crate::runtime::FileSystem;
use crate::types::{EnvMap, RunScope};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const DEFAULT_PANE_COMMANDS_DIR: &str = "/tmp/tmux-pane-cmds";
/// Upper bound for the pause between panes.
pub const MAX_DELAY_SECONDS: f64 = 3600.0;

#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub config_path: Option<PathBuf>,
    pub session: Option<String>,
    pub file: Option<PathBuf>,
    pub sessions_dir: Option<PathBuf>,
    pub execute_commands: bool,
    pub delay_seconds: Option<f64>,
    pub socket_name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AppConfig {
    pub storage: StorageConfig,
    pub capture: CaptureConfig,
    pub replay: ReplayConfig,
    pub tmux: TmuxConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StorageConfig {
    pub sessions_dir: PathBuf,
    pub pane_commands_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CaptureConfig {
    /// Process names treated as editors that can dump a `:mksession` file.
    pub editors: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReplayConfig {
    pub execute_commands: bool,
    pub delay_seconds: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TmuxConfig {
    pub socket_name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LoggingConfig {
    pub path: PathBuf,
    pub budget_bytes: u64,
}

impl AppConfig {
    pub fn for_home(home: &Path) -> Self {
        let state_dir = home.join(".tmuxumt");
        Self {
            storage: StorageConfig {
                sessions_dir: state_dir.join("sessions"),
                pane_commands_dir: PathBuf::from(DEFAULT_PANE_COMMANDS_DIR),
            },
            capture: CaptureConfig {
                editors: vec!["vim".to_string(), "nvim".to_string()],
            },
            replay: ReplayConfig {
                execute_commands: false,
                delay_seconds: 0.0,
            },
            tmux: TmuxConfig { socket_name: None },
            logging: LoggingConfig {
                path: state_dir.join("logs").join("run.jsonl"),
                budget_bytes: DEFAULT_DISK_BUDGET_BYTES,
            },
        }
    }

    pub fn is_editor(&self, process_name: &str) -> bool {
        self.capture.editors.iter().any(|e| e == process_name)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self::for_home(&dirs::home_dir().unwrap_or_else(|| PathBuf::from("/")))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct PartialAppConfig {
    storage: Option<PartialStorageConfig>,
    capture: Option<PartialCaptureConfig>,
    replay: Option<PartialReplayConfig>,
    tmux: Option<PartialTmuxConfig>,
    logging: Option<PartialLoggingConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct PartialStorageConfig {
    sessions_dir: Option<PathBuf>,
    pane_commands_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct PartialCaptureConfig {
    editors: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct PartialReplayConfig {
    execute_commands: Option<bool>,
    delay_seconds: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct PartialTmuxConfig {
    socket_name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct PartialLoggingConfig {
    path: Option<PathBuf>,
    budget_bytes: Option<u64>,
}

/// Resolves the home directory from the passed environment, falling back to
/// the platform lookup only when `HOME` is absent.
pub fn resolve_home(env: &EnvMap) -> PathBuf {
    env.get("HOME")
        .filter(|home| !home.trim().is_empty())
        .map(PathBuf::from)
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("/"))
}

pub fn default_config_path(home: &Path) -> PathBuf {
    home.join(".config").join("tmuxum").join("config.toml")
}

pub fn load_config(
    overrides: &CliOverrides,
    process_cwd: &Path,
    env: &EnvMap,
    fs: &dyn FileSystem,
) -> Result<(AppConfig, RunScope), TmuxumError> {
    let home = resolve_home(env);
    let mut cfg = AppConfig::for_home(&home);

    let config_path = match &overrides.config_path {
        Some(path) => Some(absolutize_path(process_cwd, path)),
        None => Some(default_config_path(&home)).filter(|path| fs.exists(path)),
    };
    if let Some(path) = config_path {
        let file_contents = fs.read_to_string(&path)?;
        let partial: PartialAppConfig = toml::from_str(&file_contents)
            .map_err(|e| TmuxumError::ConfigParse(format!("{}: {e}", path.display())))?;
        merge_partial_config(&mut cfg, partial, &home);
    }

    apply_cli_overrides(&mut cfg, overrides, process_cwd);
    validate_config(&cfg)?;

    let scope = RunScope {
        session: overrides
            .session
            .clone()
            .filter(|name| !name.trim().is_empty()),
        record_file: overrides
            .file
            .as_ref()
            .map(|path| absolutize_path(process_cwd, path)),
        controlling_pane: env
            .get("TMUX_PANE")
            .filter(|pane| !pane.is_empty())
            .cloned(),
    };
    Ok((cfg, scope))
}

fn merge_partial_config(cfg: &mut AppConfig, partial: PartialAppConfig, home: &Path) {
    if let Some(storage) = partial.storage {
        if let Some(value) = storage.sessions_dir {
            cfg.storage.sessions_dir = expand_home(home, &value);
        }
        if let Some(value) = storage.pane_commands_dir {
            cfg.storage.pane_commands_dir = expand_home(home, &value);
        }
    }

    if let Some(capture) = partial.capture {
        if let Some(editors) = capture.editors {
            cfg.capture.editors = editors;
        }
    }

    if let Some(replay) = partial.replay {
        if let Some(value) = replay.execute_commands {
            cfg.replay.execute_commands = value;
        }
        if let Some(value) = replay.delay_seconds {
            cfg.replay.delay_seconds = value;
        }
    }

    if let Some(tmux) = partial.tmux {
        if let Some(socket_name) = tmux.socket_name {
            cfg.tmux.socket_name = Some(socket_name);
        }
    }

    if let Some(logging) = partial.logging {
        if let Some(value) = logging.path {
            cfg.logging.path = expand_home(home, &value);
        }
        if let Some(value) = logging.budget_bytes {
            cfg.logging.budget_bytes = value;
        }
    }
}

fn apply_cli_overrides(cfg: &mut AppConfig, overrides: &CliOverrides, process_cwd: &Path) {
    if let Some(dir) = &overrides.sessions_dir {
        cfg.storage.sessions_dir = absolutize_path(process_cwd, dir);
    }
    if overrides.execute_commands {
        cfg.replay.execute_commands = true;
    }
    if let Some(delay) = overrides.delay_seconds {
        cfg.replay.delay_seconds = delay;
    }
    if let Some(socket) = &overrides.socket_name {
        cfg.tmux.socket_name = Some(socket.clone());
    }
}

fn validate_config(cfg: &AppConfig) -> Result<(), TmuxumError> {
    if cfg.storage.sessions_dir.as_os_str().is_empty() {
        return Err(TmuxumError::InvalidConfig(
            "storage.sessions_dir must not be empty".to_string(),
        ));
    }
    let delay = cfg.replay.delay_seconds;
    if !delay.is_finite() || !(0.0..=MAX_DELAY_SECONDS).contains(&delay) {
        return Err(TmuxumError::InvalidConfig(format!(
            "replay.delay_seconds must be between 0 and {MAX_DELAY_SECONDS}, got {delay}"
        )));
    }
    if cfg.capture.editors.iter().any(|name| name.trim().is_empty()) {
        return Err(TmuxumError::InvalidConfig(
            "capture.editors must not contain empty names".to_string(),
        ));
    }
    if cfg
        .tmux
        .socket_name
        .as_deref()
        .is_some_and(|socket| socket.trim().is_empty())
    {
        return Err(TmuxumError::InvalidConfig(
            "tmux.socket_name must not be empty when set".to_string(),
        ));
    }
    Ok(())
}

fn absolutize_path(base: &Path, value: &Path) -> PathBuf {
    if value.is_absolute() {
        value.to_path_buf()
    } else {
        base.join(value)
    }
}

fn expand_home(home: &Path, value: &Path) -> PathBuf {
    match value.strip_prefix("~") {
        Ok(rest) => home.join(rest),
        Err(_) => value.to_path_buf(),
    }
}
