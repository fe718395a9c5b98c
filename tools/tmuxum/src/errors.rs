use thiserror::Error;

#[derive(Debug, Error)]
pub enum TmuxumError {
    #[error("io error: {0}")]
    Io(String),
    #[error("config parse error: {0}")]
    ConfigParse(String),
    #[error("invalid config: {0}")]
    InvalidConfig(String),
    #[error("cli error: {0}")]
    Cli(String),
    #[error("process error: {0}")]
    Process(String),
    #[error("tmux error: {0}")]
    Tmux(String),
    #[error("session record error: {0}")]
    Record(String),
    #[error("tmux session {0:?} not found")]
    SessionNotFound(String),
    #[error("cant find saved session {0:?}")]
    SavedSessionNotFound(String),
}
