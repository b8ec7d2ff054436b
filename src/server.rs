//! WebSocket surface.
//!
//! `GET /ws` upgrades to a live connection. Each socket is split: a writer task
//! drains the connection's frame channel into the socket, while the read half feeds
//! the connection's [`CommandDispatcher`](crate::dispatcher::CommandDispatcher).

use crate::error::{AppResult, DaqError};
use crate::hub::{ChannelConnection, LiveConnection};
use crate::service::ControlServer;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use futures::{SinkExt, StreamExt};
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;

/// Router exposing the live endpoint.
pub fn router(server: Arc<ControlServer>) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .layer(CorsLayer::permissive())
        .with_state(server)
}

/// Serve until `shutdown` resolves, then shut the control server down.
///
/// Live connections are closed by the control server before the listener drains,
/// so open sockets never hold up the exit.
pub async fn serve<F>(listener: TcpListener, server: Arc<ControlServer>, shutdown: F) -> AppResult<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let addr = listener.local_addr()?;
    tracing::info!(%addr, "Live endpoint listening on ws://{addr}/ws");

    let app = router(server.clone());
    let stopping = server.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown.await;
            if let Err(e) = stopping.shutdown().await {
                tracing::error!(error = %e, "Control server shutdown reported errors");
            }
        })
        .await?;

    // Covers the listener failing before the shutdown future ran
    server.shutdown().await
}

async fn ws_handler(ws: WebSocketUpgrade, State(server): State<Arc<ControlServer>>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, server))
}

async fn handle_socket(socket: WebSocket, server: Arc<ControlServer>) {
    let (mut sink, stream) = socket.split();
    let (conn, mut frames) = ChannelConnection::new(server.subscriber_buffer());
    let id = conn.id();

    let writer = tokio::spawn(async move {
        while let Some(frame) = frames.recv().await {
            if sink.send(Message::Text(frame.to_string())).await.is_err() {
                break;
            }
        }
        let _ = sink.send(Message::Close(None)).await;
    });

    let dispatcher = match server.attach(conn.clone()).await {
        Ok(dispatcher) => dispatcher,
        Err(e) => {
            tracing::warn!(connection_id = %id, error = %e, "Live connection rejected");
            conn.close();
            let _ = writer.await;
            return;
        }
    };

    let inbound = Box::pin(stream.filter_map(|msg| async move {
        match msg {
            Ok(Message::Text(text)) => Some(Ok(text)),
            Ok(Message::Close(_)) => Some(Err(DaqError::ConnectionClosed)),
            Ok(_) => None,
            Err(e) => Some(Err(DaqError::Transport(e.to_string()))),
        }
    }));
    dispatcher.run(inbound).await;

    conn.close();
    let _ = writer.await;
    tracing::debug!(connection_id = %id, "Live connection finished");
}
