use thiserror::Error;

#[derive(Error, Debug)]
pub enum WireError {
    #[error("Frame encode/decode error: {0}")]
    Codec(#[from] bincode::Error),

    #[error("Protocol violation: {0}")]
    Protocol(String),
}
