//! Handler trait for processing RPC messages.
//!
//! Implementors provide domain logic (upload coordination, chunk storage)
//! while the server framework handles connection management, routing, and
//! the binary protocol.

use std::future::Future;
use std::pin::Pin;

use filemesh_protocol::binary::UploadChunkHeader;
use filemesh_protocol::constants::WS_ERR_CODE_NOT_IMPLEMENTED;
use filemesh_protocol::envelope::Message;

use crate::connection::Sender;

/// A boxed future returned by handler methods.
pub type HandlerFuture<'a> = Pin<Box<dyn Future<Output = ()> + Send + 'a>>;

fn not_implemented<'a>(sender: Sender, msg: Message) -> HandlerFuture<'a> {
    Box::pin(async move {
        let _ = sender
            .send_error(&msg, WS_ERR_CODE_NOT_IMPLEMENTED, "not implemented")
            .await;
    })
}

/// Trait for handling RPC messages from a peer.
///
/// Request methods receive a `sender` bound to the peer's connection and
/// the parsed envelope; each request runs on its own task, so a slow
/// request never holds up others on the same connection.
///
/// Upload stream methods are the exception: chunks and the terminating
/// `upload_stream_end` are applied inline, in arrival order, against the
/// connection's [`Handler::Session`].
///
/// Default implementations reply with "not implemented" so handlers only
/// need to override the message types they serve.
pub trait Handler: Send + Sync + 'static {
    /// Per-connection state carried across an upload stream.
    type Session: Default + Send + 'static;

    /// Called for `initiate_upload`.
    fn on_initiate_upload(&self, sender: Sender, msg: Message) -> HandlerFuture<'_> {
        not_implemented(sender, msg)
    }

    /// Called for `finalize_upload`.
    fn on_finalize_upload(&self, sender: Sender, msg: Message) -> HandlerFuture<'_> {
        not_implemented(sender, msg)
    }

    /// Called for `initiate_download`.
    fn on_initiate_download(&self, sender: Sender, msg: Message) -> HandlerFuture<'_> {
        not_implemented(sender, msg)
    }

    /// Called for `get_upload_status`.
    fn on_get_upload_status(&self, sender: Sender, msg: Message) -> HandlerFuture<'_> {
        not_implemented(sender, msg)
    }

    /// Called for `report_progress`.
    fn on_report_progress(&self, sender: Sender, msg: Message) -> HandlerFuture<'_> {
        not_implemented(sender, msg)
    }

    /// Called for `register_node`.
    fn on_register_node(&self, sender: Sender, msg: Message) -> HandlerFuture<'_> {
        not_implemented(sender, msg)
    }

    /// Called for `unregister_node`.
    fn on_unregister_node(&self, sender: Sender, msg: Message) -> HandlerFuture<'_> {
        not_implemented(sender, msg)
    }

    /// Called for `heartbeat`.
    fn on_heartbeat(&self, sender: Sender, msg: Message) -> HandlerFuture<'_> {
        not_implemented(sender, msg)
    }

    /// Called for `download_stream`. The handler sends binary frames followed
    /// by a terminating text reply.
    fn on_download_stream(&self, sender: Sender, msg: Message) -> HandlerFuture<'_> {
        not_implemented(sender, msg)
    }

    /// Called for `delete_upload`.
    fn on_delete_upload(&self, sender: Sender, msg: Message) -> HandlerFuture<'_> {
        not_implemented(sender, msg)
    }

    /// Called for `get_upload_stats`.
    fn on_get_upload_stats(&self, sender: Sender, msg: Message) -> HandlerFuture<'_> {
        not_implemented(sender, msg)
    }

    /// Called for each binary upload chunk. No reply is sent per chunk.
    fn on_upload_chunk<'a>(
        &'a self,
        session: &'a mut Self::Session,
        header: UploadChunkHeader,
        data: Vec<u8>,
    ) -> HandlerFuture<'a> {
        let _ = (session, data);
        Box::pin(async move {
            // No message ID available for binary; log and drop.
            tracing::warn!(upload_id = %header.upload_id, "upload chunk received but handler not implemented");
        })
    }

    /// Called for `upload_stream_end` once every earlier chunk was applied.
    fn on_upload_stream_end<'a>(
        &'a self,
        session: &'a mut Self::Session,
        sender: Sender,
        msg: Message,
    ) -> HandlerFuture<'a> {
        let _ = session;
        not_implemented(sender, msg)
    }

    /// Called when the peer disconnects (cleanup hook).
    fn on_disconnected(&self, session: Self::Session) -> HandlerFuture<'_> {
        drop(session);
        Box::pin(async {})
    }
}
