//! WebSocket transport.
//!
//! One socket per connection. The first frame must be `Register`; after
//! that the socket is split into a writer task draining the connection's
//! outbox channel and a read loop feeding decoded frames to the hub.
//! Any transport failure ends in `Hub::disconnect`, which is what makes
//! a lost connection an implicit deregister.

use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    http::Method,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use futures::{SinkExt, StreamExt};
use serde::Serialize;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, warn};

use courant_shared::protocol::{ClientFrame, ServerFrame};
use courant_shared::types::{ConnectionId, UserId};

use crate::config::ServerConfig;
use crate::hub::Hub;

#[derive(Clone)]
pub struct AppState {
    pub hub: Arc<Hub>,
    pub config: Arc<ServerConfig>,
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_check))
        .route("/info", get(server_info))
        .route("/ws", get(ws_upgrade))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

#[derive(Serialize)]
struct ServerInfoResponse {
    name: String,
    version: &'static str,
    online_users: usize,
}

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn server_info(State(state): State<AppState>) -> Json<ServerInfoResponse> {
    Json(ServerInfoResponse {
        name: state.config.instance_name.clone(),
        version: env!("CARGO_PKG_VERSION"),
        online_users: state.hub.registry().online_users().await.len(),
    })
}

async fn ws_upgrade(State(state): State<AppState>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(state, socket))
}

async fn handle_socket(state: AppState, socket: WebSocket) {
    let (mut sink, mut stream) = socket.split();

    // Handshake: the first binary frame must be Register.
    let user = match read_register(&mut stream).await {
        Some(user) => user,
        None => {
            debug!("socket closed before registering");
            return;
        }
    };

    let conn = ConnectionId::new();
    let (tx, mut rx) =
        tokio::sync::mpsc::channel::<ServerFrame>(state.config.channel_capacity);

    // Writer task: drains the connection outbox until the hub drops the
    // sender or the socket errors.
    let writer = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            let bytes = match frame.to_bytes() {
                Ok(bytes) => bytes,
                Err(e) => {
                    warn!(error = %e, "failed to encode server frame");
                    continue;
                }
            };
            if sink.send(Message::Binary(bytes)).await.is_err() {
                break;
            }
        }
    });

    state.hub.connect(user, conn, tx).await;
    debug!(user = %user.short(), conn = %conn, "websocket session open");

    while let Some(incoming) = stream.next().await {
        match incoming {
            Ok(Message::Binary(bytes)) => match ClientFrame::from_bytes(&bytes) {
                Ok(frame) => state.hub.handle_frame(user, frame).await,
                Err(e) => {
                    warn!(user = %user.short(), error = %e, "undecodable frame, closing");
                    break;
                }
            },
            Ok(Message::Close(_)) | Err(_) => break,
            // Text/ping/pong are not part of the protocol; axum answers
            // pings itself.
            Ok(_) => {}
        }
    }

    state.hub.disconnect(conn).await;
    writer.abort();
    debug!(user = %user.short(), conn = %conn, "websocket session closed");
}

async fn read_register(
    stream: &mut futures::stream::SplitStream<WebSocket>,
) -> Option<UserId> {
    while let Some(incoming) = stream.next().await {
        match incoming {
            Ok(Message::Binary(bytes)) => {
                return match ClientFrame::from_bytes(&bytes) {
                    Ok(ClientFrame::Register { user }) => Some(user),
                    Ok(other) => {
                        warn!(frame = ?other, "first frame was not Register");
                        None
                    }
                    Err(e) => {
                        warn!(error = %e, "undecodable handshake frame");
                        None
                    }
                };
            }
            Ok(Message::Close(_)) | Err(_) => return None,
            Ok(_) => {}
        }
    }
    None
}
