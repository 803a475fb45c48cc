//! WebSocket Handler
//!
//! Per-connection dispatch loop for the share service. Each connection is
//! one session in the registry; the session and all of its blobs are
//! purged when the socket goes away, for any reason.

use axum::extract::ws::{Message, WebSocket};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use futures::{sink::SinkExt, stream::StreamExt};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use share_registry::{ShareError, ShareRegistry};

use super::protocol::{ClientMessage, ServerMessage};
use crate::metrics::ServerMetrics;

/// Frames queued for the outbound half of the socket.
enum Outbound {
    Control(ServerMessage),
    Archive(Vec<u8>),
}

/// Handle one share-service WebSocket connection.
pub async fn handle_share_ws(
    socket: WebSocket,
    registry: Arc<ShareRegistry>,
    metrics: Arc<ServerMetrics>,
    raw_name: String,
) {
    metrics.connection_opened();

    let session = registry.connect(&raw_name).await;
    let connection_id = session.connection_id.clone();
    info!(
        "New share connection {} ({:?})",
        connection_id, session.display_name
    );

    let (mut ws_sender, mut ws_receiver) = socket.split();

    // Channel for sending frames to the WebSocket
    let (tx, mut rx) = mpsc::channel::<Outbound>(32);

    // First message: tell the client its connection id and assigned name.
    if tx
        .send(Outbound::Control(ServerMessage::Connected {
            connection_id: connection_id.clone(),
            display_name: session.display_name.clone(),
        }))
        .await
        .is_err()
    {
        warn!("Failed to queue Connected message - channel closed");
    }

    // Task to send frames to the WebSocket
    let sender_task = async move {
        while let Some(out) = rx.recv().await {
            let frame = match out {
                Outbound::Control(msg) => match serde_json::to_string(&msg) {
                    Ok(json) => Message::Text(json.into()),
                    Err(e) => {
                        error!("Failed to serialize message: {}", e);
                        continue;
                    }
                },
                Outbound::Archive(bytes) => Message::Binary(bytes.into()),
            };
            if ws_sender.send(frame).await.is_err() {
                break;
            }
        }
    };

    // Task to handle incoming messages
    let tx_input = tx.clone();
    let registry_input = registry.clone();
    let metrics_input = metrics.clone();
    let conn = connection_id.clone();

    let input_task = async move {
        while let Some(msg) = ws_receiver.next().await {
            match msg {
                Ok(Message::Text(text)) => {
                    let client_msg = match serde_json::from_str::<ClientMessage>(&text) {
                        Ok(m) => m,
                        Err(e) => {
                            debug!("Ignoring unparseable message: {}", e);
                            continue;
                        }
                    };
                    match client_msg {
                        ClientMessage::UploadImage { filename, filedata } => {
                            let payload = match BASE64.decode(filedata.as_bytes()) {
                                Ok(p) => p,
                                Err(e) => {
                                    metrics_input.client_error();
                                    send(
                                        &tx_input,
                                        ServerMessage::Error {
                                            code: "invalid_payload".to_string(),
                                            message: format!("filedata is not valid base64: {e}"),
                                        },
                                    )
                                    .await;
                                    continue;
                                }
                            };
                            let size = payload.len();
                            // Fire-and-forget: success has no reply.
                            match registry_input.upload_image(&conn, &filename, payload).await {
                                Ok(()) => metrics_input.upload_stored(size),
                                Err(err) => {
                                    metrics_input.client_error();
                                    send_share_error(&tx_input, &err).await;
                                }
                            }
                        }
                        ClientMessage::Search { query } => {
                            match registry_input.search(&conn, &query).await {
                                Ok(hits) => {
                                    metrics_input.search_served();
                                    let keys = hits.into_iter().map(|h| h.key).collect();
                                    send(&tx_input, ServerMessage::SearchResults { keys }).await;
                                }
                                Err(err) => {
                                    metrics_input.client_error();
                                    send_share_error(&tx_input, &err).await;
                                }
                            }
                        }
                        ClientMessage::DownloadImages { keys } => {
                            match registry_input.download_images(&conn, &keys).await {
                                Ok(bytes) => {
                                    metrics_input.archive_built(bytes.len());
                                    send(
                                        &tx_input,
                                        ServerMessage::ArchiveReady {
                                            byte_len: bytes.len(),
                                        },
                                    )
                                    .await;
                                    if tx_input.send(Outbound::Archive(bytes)).await.is_err() {
                                        break;
                                    }
                                }
                                Err(err) => {
                                    metrics_input.client_error();
                                    send_share_error(&tx_input, &err).await;
                                }
                            }
                        }
                    }
                }
                Ok(Message::Binary(_)) => {
                    debug!("Ignoring unexpected binary frame");
                }
                Ok(Message::Close(_)) | Err(_) => break,
                // Ping/Pong are answered by axum itself.
                Ok(_) => {}
            }
        }
    };

    tokio::select! {
        _ = sender_task => {},
        _ = input_task => {},
    }

    // Transport teardown: drop the session and purge everything it shared.
    registry.disconnect(&connection_id).await;
    metrics.connection_closed();
    info!("Share connection {} closed", connection_id);
}

async fn send(tx: &mpsc::Sender<Outbound>, msg: ServerMessage) {
    if tx.send(Outbound::Control(msg)).await.is_err() {
        warn!("Failed to send message - channel closed");
    }
}

async fn send_share_error(tx: &mpsc::Sender<Outbound>, err: &ShareError) {
    send(
        tx,
        ServerMessage::Error {
            code: err.error_code().to_string(),
            message: err.to_string(),
        },
    )
    .await;
}
