//! One subscriber session per connected WebSocket client.
//!
//! A session subscribes to the relay when the client connects and forwards
//! every received change as a text frame. The session ends when the client
//! goes away, a write fails, or the relay signals that the upstream broker
//! connection is gone; in the last case the client gets one final
//! explanatory frame before the socket closes. The relay subscription is
//! owned by the session task, so teardown removes it exactly once no matter
//! which side initiates the close.

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::relay::{Received, Relay};

/// Final frame sent when the upstream broker connection is lost for good.
pub const DISCONNECT_NOTICE: &str = "The connection terminated due to an upstream broker error.";

pub async fn run(socket: WebSocket, relay: Relay) {
    let session_id = Uuid::new_v4();
    let mut subscription = relay.subscribe();
    let (mut ws_tx, mut ws_rx) = socket.split();

    info!(%session_id, topic = relay.name(), "subscriber connected");

    loop {
        tokio::select! {
            received = subscription.next() => match received {
                Received::Change(event) => {
                    if ws_tx
                        .send(Message::Text(event.to_frame().into()))
                        .await
                        .is_err()
                    {
                        debug!(%session_id, "client write failed");
                        break;
                    }
                }
                Received::Lagged(skipped) => {
                    warn!(%session_id, skipped, "slow subscriber, dropped oldest frames");
                }
                Received::Terminated => {
                    let _ = ws_tx.send(Message::Text(DISCONNECT_NOTICE.into())).await;
                    let _ = ws_tx.close().await;
                    info!(%session_id, "session closed, upstream gone");
                    break;
                }
            },
            incoming = ws_rx.next() => match incoming {
                Some(Ok(Message::Close(_))) | None => {
                    debug!(%session_id, "client disconnected");
                    break;
                }
                Some(Err(e)) => {
                    debug!(%session_id, "client transport error: {e}");
                    break;
                }
                // This relay never expects data frames from its clients.
                Some(Ok(_)) => {}
            },
        }
    }

    info!(%session_id, "subscriber removed");
    // `subscription` drops here, which is the unsubscribe.
}
