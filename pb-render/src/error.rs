use thiserror::Error;

pub type Result<T> = std::result::Result<T, RenderError>;

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("failed to launch renderer: {0}")]
    Launch(String),

    #[error("renderer exited with status {status}: {stderr}")]
    Failed { status: i32, stderr: String },

    #[error("renderer timed out after {0} seconds")]
    TimedOut(u64),

    #[error("renderer produced no output at {0}")]
    MissingOutput(String),
}
