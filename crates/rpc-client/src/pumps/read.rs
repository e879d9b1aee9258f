//! WebSocket read pump: routes replies and stream frames by request id.

use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use filemesh_protocol::binary::{BinaryMessage, parse_binary_message};
use filemesh_protocol::constants::WS_PONG_WAIT;
use filemesh_protocol::envelope::Message;

use crate::client::{PendingMap, StreamEvent, StreamMap};

/// Reads messages from the WebSocket and dispatches them.
///
/// Any incoming message resets the pong deadline; if nothing arrives within
/// [`WS_PONG_WAIT`] the connection is considered dead. On exit every waiting
/// request and open stream is released so callers observe the disconnect.
pub(crate) async fn read_pump<S>(
    mut read: S,
    pending: PendingMap,
    streams: StreamMap,
    write_tx: mpsc::Sender<tungstenite::Message>,
    cancel: CancellationToken,
) where
    S: StreamExt<Item = Result<tungstenite::Message, tungstenite::Error>> + Unpin,
{
    let pong_deadline = tokio::time::sleep(WS_PONG_WAIT);
    tokio::pin!(pong_deadline);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,

            () = &mut pong_deadline => {
                warn!("pong timeout, connection dead");
                break;
            }

            msg = read.next() => {
                match msg {
                    Some(Ok(msg)) => {
                        pong_deadline.as_mut().reset(tokio::time::Instant::now() + WS_PONG_WAIT);

                        match msg {
                            tungstenite::Message::Text(text) => {
                                handle_text_message(&text, &pending, &streams).await;
                            }
                            tungstenite::Message::Binary(data) => {
                                handle_binary_message(&data, &streams).await;
                            }
                            tungstenite::Message::Ping(data) => {
                                trace!("received ping, sending pong");
                                let _ = write_tx.send(tungstenite::Message::Pong(data)).await;
                            }
                            tungstenite::Message::Close(_) => {
                                debug!("received close frame");
                                break;
                            }
                            _ => {}
                        }
                    }
                    Some(Err(e)) => {
                        warn!("WebSocket read error: {e}");
                        break;
                    }
                    None => {
                        debug!("WebSocket stream ended");
                        break;
                    }
                }
            }
        }
    }

    // Dropping the senders wakes every waiter with a closed-channel error.
    pending.lock().await.clear();
    streams.lock().await.clear();
}

/// Routes a text reply to its waiting request or terminates its stream.
async fn handle_text_message(text: &str, pending: &PendingMap, streams: &StreamMap) {
    let msg: Message = match serde_json::from_str(text) {
        Ok(m) => m,
        Err(e) => {
            warn!("failed to parse message: {e}");
            return;
        }
    };

    trace!(msg_type = ?msg.msg_type, id = %msg.id, "received message");

    if let Some(tx) = pending.lock().await.remove(&msg.id) {
        let _ = tx.send(msg);
        return;
    }

    let stream = streams.lock().await.remove(&msg.id);
    match stream {
        Some(tx) => {
            let _ = tx.send(StreamEvent::End(msg)).await;
        }
        None => {
            warn!(msg_type = ?msg.msg_type, id = %msg.id, "reply for unknown request, dropping");
        }
    }
}

/// Routes a binary chunk to the stream named in its header.
async fn handle_binary_message(data: &[u8], streams: &StreamMap) {
    let (header, data) = match parse_binary_message(data) {
        Ok(BinaryMessage::DownloadChunk { header, data }) => (header, data),
        Ok(BinaryMessage::UploadChunk { header, .. }) => {
            warn!(upload_id = %header.upload_id, "unexpected upload chunk from server, dropping");
            return;
        }
        Err(e) => {
            warn!("failed to parse binary message: {e}");
            return;
        }
    };

    // Clone the route out so the map is not locked while we wait on a slow
    // consumer.
    let Some(tx) = streams.lock().await.get(&header.id).cloned() else {
        warn!(id = %header.id, "chunk for unknown stream, dropping");
        return;
    };

    let id = header.id.clone();
    if tx.send(StreamEvent::Chunk { header, data }).await.is_err() {
        debug!(id = %id, "stream consumer gone, dropping route");
        streams.lock().await.remove(&id);
    }
}
