use std::process::ExitStatus;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("panel source error: {0}")]
    PanelSource(String),

    #[error("provider '{provider}' error: {message}")]
    Provider {
        provider: &'static str,
        message: String,
    },

    #[error("generation job still unfinished after {attempts} polls")]
    PollTimeout { attempts: u32 },

    #[error("surface navigation timed out after {0:?}")]
    NavigationTimeout(Duration),

    #[error("frame capture channel disconnected before recording finished")]
    CaptureChannel,

    #[error("captured frame count exceeded the {0}-frame buffer ceiling")]
    FrameOverflow(usize),

    #[error("{tool} exited with {status}: {stderr}")]
    Subprocess {
        tool: &'static str,
        status: ExitStatus,
        stderr: String,
    },

    #[error("run canceled")]
    Canceled,

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Wav(#[from] hound::Error),
}

pub type Result<T> = std::result::Result<T, PipelineError>;
