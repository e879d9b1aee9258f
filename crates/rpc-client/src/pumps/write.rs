//! Outbound pump: the only task that touches the socket's write half.

use futures_util::SinkExt;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite;
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Forwards queued messages to the socket in order.
///
/// Stops on cancellation, when every sender is dropped, or on the first
/// write error, and always tries to leave with a close frame.
pub(crate) async fn write_pump<S>(
    mut write: S,
    mut write_rx: mpsc::Receiver<tungstenite::Message>,
    cancel: CancellationToken,
) where
    S: SinkExt<tungstenite::Message, Error = tungstenite::Error> + Unpin,
{
    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => None,
            msg = write_rx.recv() => msg,
        };
        let Some(msg) = next else { break };

        let closing = matches!(msg, tungstenite::Message::Close(_));
        if let Err(e) = write.send(msg).await {
            warn!("WebSocket write error: {e}");
            return;
        }
        if closing {
            return;
        }
    }

    let _ = write.send(tungstenite::Message::Close(None)).await;
}
