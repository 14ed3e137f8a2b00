//! Guardian push channel socket handling
//!
//! Each upgraded socket gets one writer task, which owns the sink and
//! drains the connection's queue, and one reader loop. The reader enforces
//! the heartbeat timeout; either side failing closes the connection.

use bytes::Bytes;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use crate::broker::{parse_inbound, ConnectionState, Frame, GuardianConnection, Inbound, NotificationBroker, PONG};
use crate::routes::json_response;
use crate::server::AppState;

/// WebSocket type after upgrade
type HyperWebSocket = hyper_tungstenite::WebSocketStream<TokioIo<hyper::upgrade::Upgraded>>;

/// `GET /ws/guardian/{guardian_id}` upgrade
pub fn handle_guardian_upgrade(
    state: Arc<AppState>,
    req: Request<Incoming>,
    guardian_id: String,
) -> Response<Full<Bytes>> {
    if guardian_id.trim().is_empty() {
        return json_response(
            StatusCode::BAD_REQUEST,
            &serde_json::json!({ "error": "guardian_id must not be empty" }),
        );
    }

    let (response, websocket) = match hyper_tungstenite::upgrade(req, None) {
        Ok(upgrade) => upgrade,
        Err(e) => {
            warn!("Guardian WebSocket upgrade failed: {}", e);
            return json_response(
                StatusCode::BAD_REQUEST,
                &serde_json::json!({ "error": "WebSocket upgrade failed" }),
            );
        }
    };

    let broker = Arc::clone(&state.broker);
    let (conn, rx) = broker.pending(&guardian_id);

    tokio::spawn(async move {
        match websocket.await {
            Ok(ws) => {
                if broker.open(&conn) {
                    run_guardian_socket(broker, conn, rx, ws).await;
                }
            }
            Err(e) => {
                conn.transition(ConnectionState::Closed);
                warn!(guardian_id = %guardian_id, "Guardian WebSocket handshake failed: {}", e);
            }
        }
    });

    let (parts, _body) = response.into_parts();
    Response::from_parts(parts, Full::new(Bytes::new()))
}

async fn run_guardian_socket(
    broker: Arc<NotificationBroker>,
    conn: Arc<GuardianConnection>,
    rx: mpsc::Receiver<Frame>,
    ws: HyperWebSocket,
) {
    let (sink, stream) = ws.split();
    let write_timeout = broker.config().write_timeout;

    let writer = tokio::spawn(write_loop(
        Arc::clone(&broker),
        Arc::clone(&conn),
        rx,
        sink,
        write_timeout,
    ));

    read_loop(&broker, &conn, stream).await;
    broker.close(&conn);

    if let Err(e) = writer.await {
        warn!("Guardian writer task failed: {}", e);
    }

    info!(
        guardian_id = %conn.guardian_id(),
        connection_id = %conn.id(),
        "Guardian connection closed"
    );
}

async fn read_loop(
    broker: &NotificationBroker,
    conn: &Arc<GuardianConnection>,
    mut stream: SplitStream<HyperWebSocket>,
) {
    let heartbeat_timeout = broker.config().heartbeat_timeout;
    let mut state_rx = conn.subscribe();

    loop {
        let next = tokio::select! {
            next = tokio::time::timeout(heartbeat_timeout, stream.next()) => next,
            changed = state_rx.changed() => {
                if changed.is_ok() && conn.state().is_live() {
                    continue;
                }
                break;
            }
        };

        let message = match next {
            Err(_) => {
                broker.expire(conn);
                break;
            }
            Ok(None) => break,
            Ok(Some(Err(e))) => {
                debug!(connection_id = %conn.id(), "Guardian socket read error: {}", e);
                break;
            }
            Ok(Some(Ok(message))) => message,
        };

        conn.touch();
        match message {
            Message::Text(text) => match parse_inbound(&text) {
                Inbound::Ping => broker.record_heartbeat(conn),
                Inbound::Pong => {}
                Inbound::Other(other) => {
                    debug!(connection_id = %conn.id(), "Ignoring guardian message: {}", other);
                }
            },
            Message::Close(_) => {
                debug!(connection_id = %conn.id(), "Guardian closed the socket");
                break;
            }
            _ => {}
        }
    }
}

async fn write_loop(
    broker: Arc<NotificationBroker>,
    conn: Arc<GuardianConnection>,
    mut rx: mpsc::Receiver<Frame>,
    mut sink: SplitSink<HyperWebSocket, Message>,
    write_timeout: Duration,
) {
    let mut state_rx = conn.subscribe();

    loop {
        tokio::select! {
            frame = rx.recv() => {
                let message = match frame {
                    Some(Frame::Text(text)) => Message::Text(text),
                    Some(Frame::Pong) => Message::Text(PONG.to_string()),
                    Some(Frame::Close) | None => break,
                };

                match tokio::time::timeout(write_timeout, sink.send(message)).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => {
                        debug!(connection_id = %conn.id(), "Guardian socket write failed: {}", e);
                        broker.close(&conn);
                        break;
                    }
                    Err(_) => {
                        warn!(connection_id = %conn.id(), "Guardian socket write timed out after {:?}", write_timeout);
                        broker.close(&conn);
                        break;
                    }
                }
            }
            changed = state_rx.changed() => {
                if changed.is_err() || !conn.state().is_live() {
                    break;
                }
            }
        }
    }

    let _ = tokio::time::timeout(write_timeout, sink.send(Message::Close(None))).await;
}
