use thiserror::Error;

use crate::session_id::SessionId;

/// Action-level failures reported back to the caller as a structured
/// `failed` result. None of these propagate as panics; the dispatch layer
/// renders each into a human-readable message.
#[derive(Debug, Error)]
pub enum ProcessToolError {
    #[error("No session found for {session_id}")]
    NotFound { session_id: SessionId },

    #[error("No active session found for {session_id}")]
    NoActiveSession { session_id: SessionId },

    #[error("No finished session found for {session_id}")]
    NoFinishedSession { session_id: SessionId },

    #[error("Session {session_id} is not backgrounded.")]
    NotBackgrounded { session_id: SessionId },

    #[error("Session {session_id} stdin is not writable.")]
    StdinClosed { session_id: SessionId },

    #[error("Failed to write to session {session_id} stdin: {source}")]
    WriteFailed {
        session_id: SessionId,
        #[source]
        source: std::io::Error,
    },

    #[error("No key data provided.")]
    EmptyKeyData,

    #[error("No paste text provided.")]
    EmptyPasteText,
}

#[derive(Debug, Error)]
pub enum SpawnError {
    #[error("Failed to create exec session: {source}")]
    CreateSession {
        #[source]
        source: std::io::Error,
    },
}

impl SpawnError {
    pub(crate) fn create_session(source: std::io::Error) -> Self {
        Self::CreateSession { source }
    }
}
