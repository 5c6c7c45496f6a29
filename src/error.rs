use reqwest::StatusCode;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("missing {missing}; pass it explicitly, export it, or add it to credentials.txt")]
    CredentialsMissing { missing: &'static str },

    #[error("Error: {status}, {body}")]
    Transport { status: StatusCode, body: String },

    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{0}")]
    Validation(String),

    #[error("unsupported file format for {0}; provide a .csv or .json file")]
    UnsupportedFormat(String),

    #[error("job {session_id} failed: {response}")]
    JobFailed {
        session_id: String,
        response: serde_json::Value,
    },

    #[error("job {session_id} still {last_status:?} after {elapsed:?}")]
    PollDeadlineExceeded {
        session_id: String,
        last_status: String,
        elapsed: Duration,
    },

    #[error("malformed response: {0}")]
    MalformedResponse(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Csv(#[from] csv::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error("invalid base64 image payload: {0}")]
    Base64(#[from] base64::DecodeError),
}

impl ClientError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        Self::MalformedResponse(message.into())
    }

    /// Process exit code used by the CLI for this error kind.
    pub fn exit_code(&self) -> u8 {
        match self {
            ClientError::CredentialsMissing { .. } => 2,
            ClientError::Validation(_) => 3,
            ClientError::UnsupportedFormat(_) => 4,
            ClientError::Transport { .. } | ClientError::Http(_) => 5,
            ClientError::JobFailed { .. } => 6,
            ClientError::PollDeadlineExceeded { .. } => 7,
            _ => 1,
        }
    }
}

pub type ClientResult<T> = Result<T, ClientError>;
