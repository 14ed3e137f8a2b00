//! Push channel: connect, heartbeat, reconnect with fixed backoff

use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use super::surface::{SurfacedAlert, Surfacer};
use super::ClientConfig;
use crate::broker::{parse_inbound, Inbound, PushMessage, PING, PONG};

type ClientSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// How a socket session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionEnd {
    /// Closed, failed or went silent; reconnect after backoff
    Dropped,
    /// Client unmounted; do not reconnect
    Unmounted,
}

pub(crate) async fn run_push(
    config: Arc<ClientConfig>,
    surfacer: Arc<Surfacer>,
    mut shutdown: watch::Receiver<bool>,
) {
    let url = config.push_url();

    loop {
        if *shutdown.borrow() {
            break;
        }

        match connect_async(url.as_str()).await {
            Ok((ws, _)) => {
                info!(guardian_id = %config.guardian_id, "Push channel connected to {}", url);
                surfacer.sink().connection_changed(true);
                let end = session(&config, &surfacer, ws, &mut shutdown).await;
                surfacer.sink().connection_changed(false);
                if end == SessionEnd::Unmounted {
                    break;
                }
                warn!("Push channel dropped, reconnecting in {:?}", config.reconnect_backoff);
            }
            Err(e) => {
                warn!("Push channel connect to {} failed: {}. Retrying in {:?}", url, e, config.reconnect_backoff);
            }
        }

        tokio::select! {
            _ = tokio::time::sleep(config.reconnect_backoff) => {}
            _ = shutdown.changed() => break,
        }
    }

    debug!("Push channel stopped");
}

async fn session(
    config: &ClientConfig,
    surfacer: &Surfacer,
    ws: ClientSocket,
    shutdown: &mut watch::Receiver<bool>,
) -> SessionEnd {
    let (mut sink, mut stream) = ws.split();
    let mut ticker = tokio::time::interval(config.heartbeat_interval);
    let dead_after = config.heartbeat_interval * 2;
    let mut last_pong = Instant::now();

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if last_pong.elapsed() > dead_after {
                    warn!("No pong within {:?}, dropping push channel", dead_after);
                    return SessionEnd::Dropped;
                }
                if let Err(e) = sink.send(Message::Text(PING.to_string())).await {
                    debug!("Heartbeat send failed: {}", e);
                    return SessionEnd::Dropped;
                }
            }
            msg = stream.next() => match msg {
                Some(Ok(Message::Text(text))) => match parse_inbound(&text) {
                    Inbound::Pong => last_pong = Instant::now(),
                    Inbound::Ping => {
                        if let Err(e) = sink.send(Message::Text(PONG.to_string())).await {
                            debug!("Pong send failed: {}", e);
                            return SessionEnd::Dropped;
                        }
                    }
                    Inbound::Other(text) => handle_push(surfacer, &text),
                },
                Some(Ok(Message::Close(_))) | None => return SessionEnd::Dropped,
                Some(Err(e)) => {
                    debug!("Push channel read failed: {}", e);
                    return SessionEnd::Dropped;
                }
                Some(Ok(_)) => {}
            },
            _ = shutdown.changed() => {
                let _ = sink.send(Message::Close(None)).await;
                return SessionEnd::Unmounted;
            }
        }
    }
}

fn handle_push(surfacer: &Surfacer, text: &str) {
    match serde_json::from_str::<PushMessage>(text) {
        Ok(PushMessage::Alert {
            level,
            message,
            context,
            timestamp,
            requires_action,
        }) => {
            surfacer.offer(SurfacedAlert::from_push(level, message, context, timestamp, requires_action));
        }
        Ok(PushMessage::ActivityUpdate {
            session_id,
            activity_type,
            duration_minutes,
            ..
        }) => surfacer.sink().activity(&session_id, &activity_type, duration_minutes),
        Err(e) => debug!("Ignoring unrecognised push frame: {}", e),
    }
}
