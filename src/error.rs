use thiserror::Error;

/// Precondition failures surfaced to the caller of the trainer core.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TrainerError {
    #[error("corpus is empty")]
    EmptyCorpus,

    #[error("unknown text id {0}")]
    UnknownText(u32),

    #[error("session {0} not found")]
    SessionNotFound(u64),

    #[error("session {session_id} belongs to another user (expected {owner}, got {uid})")]
    UserMismatch {
        session_id: u64,
        owner: String,
        uid: String,
    },

    #[error("session {0} is already finished")]
    SessionAlreadyFinished(u64),

    #[error("session {0} is closed and no longer accepts events")]
    SessionClosed(u64),
}

pub type Result<T> = std::result::Result<T, TrainerError>;
