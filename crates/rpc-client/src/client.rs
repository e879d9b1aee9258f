//! WebSocket client with request-response correlation.
//!
//! Requests carry a UUID; the read pump routes replies back by that id,
//! either to a single waiting caller or to an open response stream.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio_tungstenite::tungstenite;

use filemesh_protocol::binary::{DownloadChunkHeader, encode_binary_message};
use filemesh_protocol::constants::{
    MessageType, WS_MAX_MESSAGE_SIZE, WS_PING_PERIOD, WS_REQUEST_TIMEOUT,
};
use filemesh_protocol::envelope::{Message, WsError};

/// Outbound queue depth.
const WRITE_BUFFER_SIZE: usize = 256;

/// Buffered events per open response stream.
const STREAM_BUFFER_SIZE: usize = 16;

/// Errors from the RPC client.
#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    #[error("WebSocket error: {0}")]
    Ws(#[from] tungstenite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("request timed out")]
    Timeout,

    #[error("connection closed")]
    Closed,

    #[error("remote error {code}: {message}")]
    Remote { code: i32, message: String },

    #[error("protocol error: {0}")]
    Protocol(String),
}

impl From<WsError> for RpcError {
    fn from(err: WsError) -> Self {
        RpcError::Remote {
            code: err.code,
            message: err.message,
        }
    }
}

/// One event on a server-to-client stream.
#[derive(Debug)]
pub enum StreamEvent {
    /// A binary chunk tagged with the stream's request id.
    Chunk {
        header: DownloadChunkHeader,
        data: Vec<u8>,
    },
    /// The terminating text reply (success payload or error).
    End(Message),
}

pub(crate) type PendingMap = Arc<Mutex<HashMap<String, oneshot::Sender<Message>>>>;
pub(crate) type StreamMap = Arc<Mutex<HashMap<String, mpsc::Sender<StreamEvent>>>>;

/// Receiving half of a server-to-client stream opened with
/// [`RpcClient::open_stream`].
pub struct ResponseStream {
    id: String,
    rx: mpsc::Receiver<StreamEvent>,
}

impl ResponseStream {
    /// Request id the stream answers.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Next event, or `None` once the connection is gone.
    ///
    /// Nothing follows a [`StreamEvent::End`].
    pub async fn next(&mut self) -> Option<StreamEvent> {
        self.rx.recv().await
    }
}

/// WebSocket client connected to a single coordinator or storage node.
pub struct RpcClient {
    write_tx: mpsc::Sender<tungstenite::Message>,
    pending: PendingMap,
    streams: StreamMap,
    _read_handle: tokio::task::JoinHandle<()>,
    _write_handle: tokio::task::JoinHandle<()>,
    _ping_handle: tokio::task::JoinHandle<()>,
    cancel: tokio_util::sync::CancellationToken,
}

impl RpcClient {
    /// Connects to `address` (`host:port`, or a full `ws://` URL).
    pub async fn connect(address: &str) -> Result<Self, RpcError> {
        let url = if address.starts_with("ws://") || address.starts_with("wss://") {
            address.to_string()
        } else {
            format!("ws://{address}")
        };

        let mut ws_config = tokio_tungstenite::tungstenite::protocol::WebSocketConfig::default();
        ws_config.max_message_size = Some(WS_MAX_MESSAGE_SIZE);
        ws_config.max_frame_size = Some(WS_MAX_MESSAGE_SIZE);
        let (ws_stream, _) =
            tokio_tungstenite::connect_async_with_config(url.as_str(), Some(ws_config), false)
                .await?;
        let (write, read) = ws_stream.split();

        let (write_tx, write_rx) = mpsc::channel::<tungstenite::Message>(WRITE_BUFFER_SIZE);
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let streams: StreamMap = Arc::new(Mutex::new(HashMap::new()));
        let cancel = tokio_util::sync::CancellationToken::new();

        let write_handle = {
            let cancel = cancel.clone();
            tokio::spawn(crate::pumps::write::write_pump(write, write_rx, cancel))
        };

        let read_handle = {
            let pending = pending.clone();
            let streams = streams.clone();
            let cancel = cancel.clone();
            let write_tx = write_tx.clone();
            tokio::spawn(crate::pumps::read::read_pump(
                read, pending, streams, write_tx, cancel,
            ))
        };

        let ping_handle = {
            let write_tx = write_tx.clone();
            let cancel = cancel.clone();
            tokio::spawn(crate::pumps::ping::ping_pump(
                write_tx,
                WS_PING_PERIOD,
                cancel,
            ))
        };

        Ok(Self {
            write_tx,
            pending,
            streams,
            _read_handle: read_handle,
            _write_handle: write_handle,
            _ping_handle: ping_handle,
            cancel,
        })
    }

    /// Sends a request and waits up to [`WS_REQUEST_TIMEOUT`] for the response.
    pub async fn send_request<T: Serialize>(
        &self,
        msg_type: MessageType,
        payload: Option<&T>,
    ) -> Result<Message, RpcError> {
        self.request(msg_type, payload, Some(WS_REQUEST_TIMEOUT))
            .await
    }

    /// Sends a request and waits for the response without a deadline.
    ///
    /// Used where the peer first has to drain queued work (an upload stream
    /// end); a dead peer still resolves the wait through the pong deadline.
    pub async fn send_request_unbounded<T: Serialize>(
        &self,
        msg_type: MessageType,
        payload: Option<&T>,
    ) -> Result<Message, RpcError> {
        self.request(msg_type, payload, None).await
    }

    /// Sends a typed request and decodes the typed response payload.
    pub async fn call<Req, Resp>(&self, msg_type: MessageType, req: &Req) -> Result<Resp, RpcError>
    where
        Req: Serialize,
        Resp: DeserializeOwned,
    {
        let resp = self.send_request(msg_type, Some(req)).await?;
        decode_payload(&resp)
    }

    async fn request<T: Serialize>(
        &self,
        msg_type: MessageType,
        payload: Option<&T>,
        timeout: Option<Duration>,
    ) -> Result<Message, RpcError> {
        let id = uuid::Uuid::new_v4().to_string();
        let msg = Message::new(&id, msg_type, payload)?;
        let json = serde_json::to_string(&msg)?;

        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id.clone(), tx);

        if self
            .write_tx
            .send(tungstenite::Message::Text(json.into()))
            .await
            .is_err()
        {
            self.pending.lock().await.remove(&id);
            return Err(RpcError::Closed);
        }

        let result = match timeout {
            Some(limit) => tokio::time::timeout(limit, rx)
                .await
                .map_err(|_| RpcError::Timeout),
            None => Ok(rx.await),
        };

        // Clean up pending entry on any exit path.
        self.pending.lock().await.remove(&id);

        match result? {
            Ok(resp) => remote_error(resp),
            Err(_) => Err(RpcError::Closed),
        }
    }

    /// Queues a binary frame without waiting for any reply.
    ///
    /// Wire format: `[4 bytes big-endian header length][JSON header bytes][binary data]`.
    /// Waits for queue space, so a fast producer is paced by the socket.
    pub async fn send_frame<H: Serialize>(&self, header: &H, data: &[u8]) -> Result<(), RpcError> {
        let frame = encode_binary_message(header, data)?;
        self.write_tx
            .send(tungstenite::Message::Binary(frame.into()))
            .await
            .map_err(|_| RpcError::Closed)
    }

    /// Sends a request whose answer is a sequence of binary chunks followed
    /// by a terminating text reply.
    pub async fn open_stream<T: Serialize>(
        &self,
        msg_type: MessageType,
        payload: Option<&T>,
    ) -> Result<ResponseStream, RpcError> {
        let id = uuid::Uuid::new_v4().to_string();
        let msg = Message::new(&id, msg_type, payload)?;
        let json = serde_json::to_string(&msg)?;

        let (tx, rx) = mpsc::channel(STREAM_BUFFER_SIZE);
        self.streams.lock().await.insert(id.clone(), tx);

        if self
            .write_tx
            .send(tungstenite::Message::Text(json.into()))
            .await
            .is_err()
        {
            self.streams.lock().await.remove(&id);
            return Err(RpcError::Closed);
        }

        Ok(ResponseStream { id, rx })
    }

    /// Gracefully closes the connection.
    pub async fn close(&self) {
        let _ = self.write_tx.send(tungstenite::Message::Close(None)).await;
        self.cancel.cancel();
    }
}

impl Drop for RpcClient {
    fn drop(&mut self) {
        self.cancel.cancel();
        self._read_handle.abort();
        self._write_handle.abort();
        self._ping_handle.abort();
    }
}

/// Turns an error envelope into [`RpcError::Remote`].
pub(crate) fn remote_error(resp: Message) -> Result<Message, RpcError> {
    Ok(resp.into_result()?)
}

/// Decodes a reply payload, treating a missing payload as a protocol error.
pub fn decode_payload<T: DeserializeOwned>(resp: &Message) -> Result<T, RpcError> {
    resp.parse_payload()?.ok_or_else(|| {
        RpcError::Protocol(format!("{:?} reply carried no payload", resp.msg_type))
    })
}
