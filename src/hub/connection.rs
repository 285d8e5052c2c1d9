//! WebSocket subscriber pumps.
//!
//! Each attached connection runs two cooperative tasks: a writer draining
//! the hub-fed outbound queue (plus a periodic keepalive), and a reader that
//! only watches for disconnection, since the protocol is push-only from
//! server to subscriber.

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, stream::StreamExt};
use tokio::sync::mpsc;
use tokio::time::{self, Duration};
use tracing::{debug, info};

use super::{HubHandle, SUBSCRIBER_QUEUE_SIZE};

const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(50);

/// Attach an upgraded socket to the hub and pump it until either side ends.
pub async fn serve_subscriber(socket: WebSocket, hub: HubHandle) {
    let (mut sender, mut receiver) = socket.split();

    let (tx, mut rx) = mpsc::channel(SUBSCRIBER_QUEUE_SIZE);
    let subscriber = hub.subscriber(tx);
    let id = subscriber.id();
    hub.register(subscriber).await;
    info!(subscriber = id, "subscriber connected");

    let mut send_task = tokio::spawn(async move {
        let start = time::Instant::now() + KEEPALIVE_INTERVAL;
        let mut keepalive = time::interval_at(start, KEEPALIVE_INTERVAL);
        loop {
            tokio::select! {
                frame = rx.recv() => match frame {
                    Some(payload) => {
                        if sender.send(Message::Text(payload)).await.is_err() {
                            debug!(subscriber = id, "send failed, subscriber disconnected");
                            break;
                        }
                    }
                    // Queue closed: evicted by the hub or hub shutdown.
                    None => {
                        let _ = sender.send(Message::Close(None)).await;
                        break;
                    }
                },
                _ = keepalive.tick() => {
                    if sender.send(Message::Text("ping".to_string())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    let reader_hub = hub.clone();
    let mut recv_task = tokio::spawn(async move {
        // Inbound frames are accepted but never interpreted.
        while let Some(Ok(frame)) = receiver.next().await {
            if matches!(frame, Message::Close(_)) {
                break;
            }
        }
        reader_hub.unregister(id).await;
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    // Covers the writer-first exit; duplicate unregisters are ignored.
    hub.unregister(id).await;
    info!(subscriber = id, "subscriber disconnected");
}
