//! Client-side engine: conversation state, call session and local cache.
//!
//! The crate is UI-agnostic. An embedding shell owns the hub connection,
//! pumps decoded frames through [`session::ClientSession::handle_frame`],
//! sends the frames it returns, and renders [`events::ClientEvent`]s.

pub mod call;
pub mod conversation;
pub mod error;
pub mod events;
pub mod session;
pub mod sync;

pub use error::{ClientError, Result};
pub use session::ClientSession;

use tracing_subscriber::{fmt, EnvFilter};

/// Install the default tracing subscriber for a client shell.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("courant_client=debug,courant_store=info,warn"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();
}
