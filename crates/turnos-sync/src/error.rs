use thiserror::Error;
use tokio_tungstenite::tungstenite;
use turnos_proto::ProtoError;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("websocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),
    #[error("link closed")]
    Closed,
    #[error("connect refused: {0}")]
    Refused(String),
    #[error(transparent)]
    Proto(#[from] ProtoError),
    #[error("sync agent stopped")]
    Stopped,
}

pub type SyncResult<T> = Result<T, SyncError>;
