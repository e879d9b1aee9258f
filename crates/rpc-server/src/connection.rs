//! Peer connection management: read/write pumps, ping/pong, send buffering.

use std::net::SocketAddr;
use std::sync::Arc;

use filemesh_protocol::binary::{BinaryMessage, parse_binary_message};
use filemesh_protocol::constants::{
    MessageType, WS_ERR_CODE_NOT_IMPLEMENTED, WS_PING_PERIOD, WS_PONG_WAIT,
};
use filemesh_protocol::envelope::Message;
use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::Message as WsMessage;
use tokio_util::sync::CancellationToken;

use crate::SEND_BUFFER_SIZE;
use crate::handler::Handler;

/// Handle for sending messages to a connected peer.
///
/// Cloneable and cheap. Sends wait for buffer space rather than dropping,
/// so a reply is only lost when the connection itself is gone.
#[derive(Clone)]
pub struct Sender {
    tx: mpsc::Sender<WsMessage>,
}

impl Sender {
    /// Sends a protocol [`Message`] as JSON text.
    pub async fn send_msg(&self, msg: Message) -> Result<(), SendError> {
        let json = serde_json::to_string(&msg)?;
        self.tx
            .send(WsMessage::Text(json.into()))
            .await
            .map_err(|_| SendError::Closed)
    }

    /// Sends a typed reply to the given request.
    pub async fn reply<T: Serialize>(
        &self,
        req: &Message,
        msg_type: MessageType,
        payload: &T,
    ) -> Result<(), SendError> {
        self.send_msg(req.reply(msg_type, Some(payload))?).await
    }

    /// Sends an error response for the given request message.
    pub async fn send_error(
        &self,
        req: &Message,
        code: i32,
        message: &str,
    ) -> Result<(), SendError> {
        self.send_msg(req.reply_error(code, message)).await
    }

    /// Sends a raw binary frame.
    pub async fn send_binary(&self, data: Vec<u8>) -> Result<(), SendError> {
        self.tx
            .send(WsMessage::Binary(data.into()))
            .await
            .map_err(|_| SendError::Closed)
    }

    /// Returns `true` if the send channel is still open.
    pub fn is_connected(&self) -> bool {
        !self.tx.is_closed()
    }
}

/// Error returned when a message cannot be queued for the peer.
#[derive(Debug, thiserror::Error)]
pub enum SendError {
    #[error("send failed: connection closed")]
    Closed,

    #[error("send failed: {0}")]
    Json(#[from] serde_json::Error),
}

/// Runs the read and write pumps for a WebSocket connection.
///
/// The pumps run as background tokio tasks and stop when the connection is
/// closed or the server's cancel token is triggered.
pub(crate) fn spawn_connection<S, H>(
    ws_stream: S,
    peer_addr: SocketAddr,
    handler: Arc<H>,
    server_cancel: CancellationToken,
) where
    S: futures_util::Stream<Item = Result<WsMessage, tokio_tungstenite::tungstenite::Error>>
        + futures_util::Sink<WsMessage, Error = tokio_tungstenite::tungstenite::Error>
        + Send
        + 'static,
    H: Handler,
{
    let (tx, rx) = mpsc::channel::<WsMessage>(SEND_BUFFER_SIZE);
    let cancel = server_cancel.child_token();
    let sender = Sender { tx };

    let (ws_sink, ws_stream) = ws_stream.split();

    // Write pump.
    tokio::spawn(write_pump(ws_sink, rx, cancel.clone()));

    // Read pump.
    tokio::spawn(async move {
        let session = read_pump(ws_stream, sender, handler.clone(), cancel.clone()).await;
        // When read pump exits, cancel the write pump too.
        cancel.cancel();
        handler.on_disconnected(session).await;
        tracing::debug!(%peer_addr, "peer disconnected");
    });
}

/// Write pump: drains the send channel and sends WS pings.
async fn write_pump<S>(mut sink: S, mut rx: mpsc::Receiver<WsMessage>, cancel: CancellationToken)
where
    S: futures_util::Sink<WsMessage, Error = tokio_tungstenite::tungstenite::Error> + Send + Unpin,
{
    let mut ping_interval = tokio::time::interval(WS_PING_PERIOD);
    ping_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,

            msg = rx.recv() => {
                match msg {
                    Some(ws_msg) => {
                        if let Err(e) = sink.send(ws_msg).await {
                            tracing::warn!("write pump send error: {e}");
                            break;
                        }
                    }
                    None => break, // Channel closed.
                }
            }

            _ = ping_interval.tick() => {
                if let Err(e) = sink.send(WsMessage::Ping(Vec::new().into())).await {
                    tracing::warn!("write pump ping error: {e}");
                    break;
                }
            }
        }
    }

    // Best-effort close frame.
    let _ = sink.close().await;
}

/// Read pump: reads WS frames and dispatches to the handler.
///
/// Returns the connection's upload session so the handler can release it.
async fn read_pump<S, H>(
    mut stream: S,
    sender: Sender,
    handler: Arc<H>,
    cancel: CancellationToken,
) -> H::Session
where
    S: futures_util::Stream<Item = Result<WsMessage, tokio_tungstenite::tungstenite::Error>>
        + Send
        + Unpin,
    H: Handler,
{
    let mut session = H::Session::default();

    // Any incoming frame resets the deadline. If nothing arrives within
    // WS_PONG_WAIT the peer is considered dead.
    let pong_deadline = tokio::time::sleep(WS_PONG_WAIT);
    tokio::pin!(pong_deadline);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,

            () = &mut pong_deadline => {
                tracing::warn!("pong timeout, closing connection");
                break;
            }

            frame = stream.next() => {
                match frame {
                    Some(Ok(ws_msg)) => {
                        pong_deadline.as_mut().reset(tokio::time::Instant::now() + WS_PONG_WAIT);

                        match ws_msg {
                            WsMessage::Text(text) => {
                                dispatch_text(&handler, &mut session, &sender, &text).await;
                            }
                            WsMessage::Binary(data) => {
                                dispatch_binary(&handler, &mut session, &data).await;
                            }
                            WsMessage::Ping(data) => {
                                let _ = sender.tx.send(WsMessage::Pong(data)).await;
                            }
                            WsMessage::Pong(_) => {}
                            WsMessage::Close(_) => {
                                tracing::debug!("received close frame");
                                break;
                            }
                            WsMessage::Frame(_) => {} // Raw frames ignored.
                        }
                    }
                    Some(Err(e)) => {
                        tracing::warn!("read pump error: {e}");
                        break;
                    }
                    None => break, // Stream ended.
                }
            }
        }
    }

    session
}

/// Dispatches a text (JSON) message.
///
/// `upload_stream_end` runs inline so it observes every chunk that arrived
/// before it; all other requests are spawned.
async fn dispatch_text<H: Handler>(
    handler: &Arc<H>,
    session: &mut H::Session,
    sender: &Sender,
    text: &str,
) {
    let msg: Message = match serde_json::from_str(text) {
        Ok(m) => m,
        Err(e) => {
            tracing::warn!("invalid message JSON: {e}");
            return;
        }
    };

    if msg.msg_type == MessageType::UploadStreamEnd {
        handler
            .on_upload_stream_end(session, sender.clone(), msg)
            .await;
        return;
    }

    let handler = Arc::clone(handler);
    let s = sender.clone();
    tokio::spawn(async move {
        dispatch_request(&*handler, s, msg).await;
    });
}

async fn dispatch_request<H: Handler>(handler: &H, s: Sender, msg: Message) {
    match msg.msg_type {
        MessageType::InitiateUpload => handler.on_initiate_upload(s, msg).await,
        MessageType::FinalizeUpload => handler.on_finalize_upload(s, msg).await,
        MessageType::InitiateDownload => handler.on_initiate_download(s, msg).await,
        MessageType::GetUploadStatus => handler.on_get_upload_status(s, msg).await,
        MessageType::ReportProgress => handler.on_report_progress(s, msg).await,
        MessageType::RegisterNode => handler.on_register_node(s, msg).await,
        MessageType::UnregisterNode => handler.on_unregister_node(s, msg).await,
        MessageType::Heartbeat => handler.on_heartbeat(s, msg).await,
        MessageType::DownloadStream => handler.on_download_stream(s, msg).await,
        MessageType::DeleteUpload => handler.on_delete_upload(s, msg).await,
        MessageType::GetUploadStats => handler.on_get_upload_stats(s, msg).await,
        other => {
            tracing::warn!(msg_type = ?other, "unhandled message type");
            let _ = s
                .send_error(&msg, WS_ERR_CODE_NOT_IMPLEMENTED, "unknown message type")
                .await;
        }
    }
}

/// Dispatches a binary WebSocket frame.
async fn dispatch_binary<H: Handler>(handler: &Arc<H>, session: &mut H::Session, data: &[u8]) {
    match parse_binary_message(data) {
        Ok(BinaryMessage::UploadChunk { header, data }) => {
            handler.on_upload_chunk(session, header, data).await;
        }
        Ok(BinaryMessage::DownloadChunk { header, .. }) => {
            tracing::warn!(id = %header.id, "unexpected download chunk from peer, dropping");
        }
        Err(e) => {
            tracing::warn!("failed to parse binary message: {e}");
        }
    }
}
