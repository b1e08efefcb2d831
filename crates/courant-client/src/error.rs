use thiserror::Error;

use crate::call::CallError;

#[derive(Error, Debug)]
pub enum ClientError {
    /// Local cache failure.
    #[error("Cache error: {0}")]
    Cache(#[from] courant_store::StoreError),

    /// Call state machine refused the operation.
    #[error("Call error: {0}")]
    Call(#[from] CallError),

    /// The live channel to the hub is gone mid-operation.
    #[error("Transport error: {0}")]
    Transport(String),
}

pub type Result<T> = std::result::Result<T, ClientError>;
