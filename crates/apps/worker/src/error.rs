use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use compute::ProcessError;
use serde_json::json;

/// Job failures as seen by the invoker.
#[derive(Debug)]
pub enum JobError {
    /// The request lacks a required field; the job never starts.
    MissingParameter(&'static str),
    InvalidParameter(String),
    Download(String),
    Process(ProcessError),
    Upload(String),
    Raster(String),
    Io(std::io::Error),
}

impl JobError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::MissingParameter(_) | Self::InvalidParameter(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl std::fmt::Display for JobError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingParameter(name) => write!(f, "Missing required parameter: {name}"),
            Self::InvalidParameter(msg) => write!(f, "Invalid parameter: {msg}"),
            Self::Download(msg) => write!(f, "download failed: {msg}"),
            Self::Process(e) => write!(f, "{e}"),
            Self::Upload(msg) => write!(f, "upload failed: {msg}"),
            Self::Raster(msg) => write!(f, "raster processing failed: {msg}"),
            Self::Io(e) => write!(f, "io error: {e}"),
        }
    }
}

impl std::error::Error for JobError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Process(e) => Some(e),
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<ProcessError> for JobError {
    fn from(e: ProcessError) -> Self {
        match e {
            ProcessError::BudgetTooSmall { .. } => Self::InvalidParameter(e.to_string()),
            e => Self::Process(e),
        }
    }
}

impl From<std::io::Error> for JobError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

impl IntoResponse for JobError {
    fn into_response(self) -> axum::response::Response {
        let body = match &self {
            Self::MissingParameter(_) | Self::InvalidParameter(_) => {
                json!({ "error": self.to_string() })
            }
            _ => json!({ "ok": false, "error": self.to_string() }),
        };
        (self.status(), Json(body)).into_response()
    }
}
