//! Error type for the editor embedder and XDND proxy.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum EditorError {
    #[error("X11 connection error: {0}")]
    Connection(String),

    #[error("X11 protocol error: {0}")]
    Protocol(String),

    #[error("foreign window system error: {0}")]
    ForeignWindowSystem(String),

    #[error("editor is already open")]
    AlreadyOpen,

    #[error("editor is not open")]
    NotOpen,

    #[error("drag-and-drop target did not respond within the timeout")]
    DndTimedOut,

    #[error("drag-and-drop session already in progress")]
    DndAlreadyActive,
}

pub type Result<T> = std::result::Result<T, EditorError>;

impl From<EditorError> for bridge_proto::error::BridgeError {
    fn from(err: EditorError) -> Self {
        bridge_proto::error::BridgeError::EditorError(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn converts_into_bridge_error() {
        let err: bridge_proto::error::BridgeError = EditorError::AlreadyOpen.into();
        assert!(err.to_string().contains("already open"));
    }
}
