use thiserror::Error;

use crate::capture::CaptureError;

#[derive(Debug, Error)]
pub enum ReplayError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("capture file parse error ({context}): {message}")]
    Parse {
        context: &'static str,
        message: String,
    },
}

impl From<ReplayError> for CaptureError {
    fn from(value: ReplayError) -> Self {
        match value {
            ReplayError::Io(err) => CaptureError::Io(err),
            parse @ ReplayError::Parse { .. } => CaptureError::Loop(parse.to_string()),
        }
    }
}
