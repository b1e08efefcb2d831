use thiserror::Error;

use courant_shared::types::MessageId;

/// Errors surfaced by the hub's message store collaborator.
///
/// Busy call rejections and duplicate pushes are normal protocol outcomes,
/// not errors; they never appear here.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Message not found: {0}")]
    MessageNotFound(MessageId),

    #[error("Message {0} is deleted")]
    MessageDeleted(MessageId),
}

pub type Result<T> = std::result::Result<T, ServerError>;
