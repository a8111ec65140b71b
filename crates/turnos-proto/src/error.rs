use std::io;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProtoError {
    #[error("invalid json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("unsupported encounter version {0}")]
    UnsupportedVersion(u64),
    #[error("payload is neither an encounter file nor a session state")]
    NotAnEncounter,
    #[error("timestamp formatting failed: {0}")]
    Timestamp(String),
}

pub type ProtoResult<T> = Result<T, ProtoError>;
