use std::{error::Error, fmt, io, path::PathBuf};

use machine_learning::MlErr;
use safetensors::SafeTensorError;
use tokio::task::JoinError;

/// The trainer module's result type.
pub type Result<T> = std::result::Result<T, TrainErr>;

/// Training runtime failures.
#[derive(Debug)]
pub enum TrainErr {
    Io(io::Error),
    Ml(MlErr),
    Json(serde_json::Error),
    Safetensors(SafeTensorError),
    Join(JoinError),
    Config(String),
    EmptyDataset {
        what: &'static str,
        tokens: usize,
        needed: usize,
    },
    Checkpoint {
        path: PathBuf,
        reason: String,
    },
}

impl TrainErr {
    pub(crate) fn checkpoint(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::Checkpoint {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

impl fmt::Display for TrainErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrainErr::Io(e) => write!(f, "io error: {e}"),
            TrainErr::Ml(e) => write!(f, "model error: {e}"),
            TrainErr::Json(e) => write!(f, "invalid config: {e}"),
            TrainErr::Safetensors(e) => write!(f, "safetensors error: {e:?}"),
            TrainErr::Join(e) => write!(f, "compute join error: {e}"),
            TrainErr::Config(reason) => write!(f, "invalid config: {reason}"),
            TrainErr::EmptyDataset {
                what,
                tokens,
                needed,
            } => write!(
                f,
                "{what} dataset is empty: got {tokens} tokens, need at least {needed}"
            ),
            TrainErr::Checkpoint { path, reason } => {
                write!(f, "bad checkpoint {}: {reason}", path.display())
            }
        }
    }
}

impl Error for TrainErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            TrainErr::Io(e) => Some(e),
            TrainErr::Ml(e) => Some(e),
            TrainErr::Json(e) => Some(e),
            TrainErr::Join(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for TrainErr {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<MlErr> for TrainErr {
    fn from(value: MlErr) -> Self {
        Self::Ml(value)
    }
}

impl From<serde_json::Error> for TrainErr {
    fn from(value: serde_json::Error) -> Self {
        Self::Json(value)
    }
}

impl From<SafeTensorError> for TrainErr {
    fn from(value: SafeTensorError) -> Self {
        Self::Safetensors(value)
    }
}

impl From<JoinError> for TrainErr {
    fn from(value: JoinError) -> Self {
        Self::Join(value)
    }
}

/// Boundary conversion for binaries / I/O APIs.
impl From<TrainErr> for io::Error {
    fn from(value: TrainErr) -> Self {
        match value {
            TrainErr::Io(e) => e,
            other => io::Error::new(io::ErrorKind::InvalidData, other),
        }
    }
}
