//! Shared vocabulary of the Courant synchronization engine: identity
//! newtypes, the message model and its status lifecycle, and the bincode
//! wire protocol spoken between clients and the hub.

pub mod error;
pub mod message;
pub mod protocol;
pub mod types;
