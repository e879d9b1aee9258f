//! RPC surface of a storage node.

use std::sync::Arc;

use filemesh_chunk_store::{ChunkStore, ChunkStoreError, UploadStreamSession};
use filemesh_protocol::binary::{DownloadChunkHeader, UploadChunkHeader, encode_binary_message};
use filemesh_protocol::constants::{
    MessageType, WS_ERR_CODE_BAD_REQUEST, WS_ERR_CODE_INTERNAL, WS_ERR_CODE_NOT_FOUND,
};
use filemesh_protocol::envelope::Message;
use filemesh_protocol::messages::{
    DeleteUploadRequest, DeleteUploadResponse, DownloadStreamEnd, DownloadStreamRequest,
    GetUploadStatsRequest, UploadStatsResponse,
};
use filemesh_rpc_server::{Handler, HandlerFuture, Sender};
use tracing::{debug, info, warn};

/// Serves uploads, downloads and control calls against one [`ChunkStore`].
pub struct NodeService {
    store: Arc<ChunkStore>,
    download_chunk_size: usize,
}

impl NodeService {
    /// `download_chunk_size` applies when a download request names none.
    pub fn new(store: Arc<ChunkStore>, download_chunk_size: usize) -> Self {
        Self {
            store,
            download_chunk_size,
        }
    }

    async fn stream_download(&self, sender: &Sender, msg: &Message, req: DownloadStreamRequest) {
        let chunk_size = req
            .chunk_size
            .filter(|&size| size > 0)
            .map(|size| size as usize)
            .unwrap_or(self.download_chunk_size);

        let mut reader = match self.store.read_chunks(&req.upload_id, chunk_size).await {
            Ok(reader) => reader,
            Err(e) => {
                let _ = sender.send_error(msg, store_error_code(&e), &e.to_string()).await;
                return;
            }
        };

        let mut chunks: u32 = 0;
        loop {
            let chunk = match reader.next_chunk().await {
                Ok(Some(chunk)) => chunk,
                Ok(None) => break,
                Err(e) => {
                    warn!(upload_id = %req.upload_id, "download read failed: {e}");
                    let _ = sender.send_error(msg, store_error_code(&e), &e.to_string()).await;
                    return;
                }
            };

            let header = DownloadChunkHeader::new(&msg.id, chunk.index, chunk.is_last);
            let frame = match encode_binary_message(&header, &chunk.data) {
                Ok(frame) => frame,
                Err(e) => {
                    let _ = sender
                        .send_error(msg, WS_ERR_CODE_INTERNAL, &e.to_string())
                        .await;
                    return;
                }
            };
            if sender.send_binary(frame).await.is_err() {
                debug!(upload_id = %req.upload_id, "peer left mid-download");
                return;
            }
            chunks += 1;
        }

        debug!(upload_id = %req.upload_id, chunks, "download stream complete");
        let end = DownloadStreamEnd {
            upload_id: req.upload_id,
            chunks,
        };
        let _ = sender
            .reply(msg, MessageType::DownloadStreamEnd, &end)
            .await;
    }
}

fn store_error_code(e: &ChunkStoreError) -> i32 {
    match e {
        ChunkStoreError::NotFound(_) => WS_ERR_CODE_NOT_FOUND,
        ChunkStoreError::InvalidUploadId(_)
        | ChunkStoreError::ChecksumMismatch { .. }
        | ChunkStoreError::ChunkIndexOverflow { .. } => WS_ERR_CODE_BAD_REQUEST,
        ChunkStoreError::Io(_) => WS_ERR_CODE_INTERNAL,
    }
}

async fn parse_request<T: serde::de::DeserializeOwned>(
    sender: &Sender,
    msg: &Message,
) -> Option<T> {
    match msg.parse_payload() {
        Ok(Some(req)) => Some(req),
        _ => {
            let _ = sender
                .send_error(msg, WS_ERR_CODE_BAD_REQUEST, "invalid payload")
                .await;
            None
        }
    }
}

impl Handler for NodeService {
    type Session = UploadStreamSession;

    fn on_upload_chunk<'a>(
        &'a self,
        session: &'a mut Self::Session,
        header: UploadChunkHeader,
        data: Vec<u8>,
    ) -> HandlerFuture<'a> {
        Box::pin(async move {
            session
                .accept(
                    &self.store,
                    &header.upload_id,
                    header.chunk_index,
                    &data,
                    &header.checksum,
                )
                .await;
        })
    }

    fn on_upload_stream_end<'a>(
        &'a self,
        session: &'a mut Self::Session,
        sender: Sender,
        msg: Message,
    ) -> HandlerFuture<'a> {
        Box::pin(async move {
            let summary = session.finish();
            info!(
                upload_id = %summary.upload_id,
                chunks = summary.uploaded_chunks,
                bytes = summary.uploaded_bytes,
                success = summary.success,
                "upload stream finished"
            );
            if let Err(e) = sender
                .reply(&msg, MessageType::UploadStreamResult, &summary)
                .await
            {
                warn!(upload_id = %summary.upload_id, "failed to send stream result: {e}");
            }
        })
    }

    fn on_download_stream(&self, sender: Sender, msg: Message) -> HandlerFuture<'_> {
        Box::pin(async move {
            let Some(req) = parse_request::<DownloadStreamRequest>(&sender, &msg).await else {
                return;
            };
            self.stream_download(&sender, &msg, req).await;
        })
    }

    fn on_delete_upload(&self, sender: Sender, msg: Message) -> HandlerFuture<'_> {
        Box::pin(async move {
            let Some(req) = parse_request::<DeleteUploadRequest>(&sender, &msg).await else {
                return;
            };
            self.store.delete_upload(&req.upload_id).await;
            info!(upload_id = %req.upload_id, "upload deleted on request");
            let resp = DeleteUploadResponse { success: true };
            let _ = sender
                .reply(&msg, MessageType::DeleteUploadResponse, &resp)
                .await;
        })
    }

    fn on_get_upload_stats(&self, sender: Sender, msg: Message) -> HandlerFuture<'_> {
        Box::pin(async move {
            let Some(req) = parse_request::<GetUploadStatsRequest>(&sender, &msg).await else {
                return;
            };
            let stats = self.store.get_stats(&req.upload_id);
            let resp = UploadStatsResponse {
                upload_id: stats.upload_id,
                chunks_count: stats.chunks_written,
                bytes_written: stats.bytes_written,
            };
            let _ = sender.reply(&msg, MessageType::UploadStats, &resp).await;
        })
    }

    fn on_disconnected(&self, session: Self::Session) -> HandlerFuture<'_> {
        Box::pin(async move {
            let mut session = session;
            let summary = session.finish();
            if !summary.upload_id.is_empty() {
                debug!(
                    upload_id = %summary.upload_id,
                    chunks = summary.uploaded_chunks,
                    "connection closed with an unfinished upload stream"
                );
            }
        })
    }
}
