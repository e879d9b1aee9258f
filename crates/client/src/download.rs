use std::path::Path;

use filemesh_protocol::MessageType;
use filemesh_protocol::messages::{
    DownloadStreamEnd, DownloadStreamRequest, InitiateDownloadRequest, InitiateDownloadResponse,
};
use filemesh_rpc_client::{RpcClient, RpcError, StreamEvent, decode_payload};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::{debug, info};

use crate::ClientError;
use crate::client::StorageClient;

impl StorageClient {
    /// Downloads a finalized file into memory.
    pub async fn download_bytes(&self, remote_path: &str) -> Result<Vec<u8>, ClientError> {
        let mut out = Vec::new();
        self.download_to(remote_path, &mut out).await?;
        Ok(out)
    }

    /// Downloads a finalized file to `local_path`, replacing it.
    /// Returns the number of bytes written.
    pub async fn download_file(&self, remote_path: &str, local_path: &Path) -> Result<u64, ClientError> {
        if let Some(parent) = local_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = tokio::fs::File::create(local_path).await?;
        let written = self.download_to(remote_path, &mut file).await?;
        file.sync_all().await?;
        Ok(written)
    }

    /// Streams a finalized file from its node into `sink`.
    pub async fn download_to<W>(&self, remote_path: &str, sink: &mut W) -> Result<u64, ClientError>
    where
        W: AsyncWrite + Unpin,
    {
        let req = InitiateDownloadRequest {
            file_path: remote_path.to_string(),
        };
        let ticket: InitiateDownloadResponse = self
            .coordinator
            .call(MessageType::InitiateDownload, &req)
            .await?;
        debug!(upload_id = %ticket.upload_id, node_address = %ticket.node_address, "download resolved");

        let node = RpcClient::connect(&ticket.node_address).await?;
        let result = receive(&node, &ticket, sink).await;
        node.close().await;
        let written = result?;

        if written != ticket.file_size {
            return Err(ClientError::Protocol(format!(
                "received {written} bytes, expected {}",
                ticket.file_size
            )));
        }
        info!(upload_id = %ticket.upload_id, bytes = written, "download complete");
        Ok(written)
    }
}

async fn receive<W>(
    node: &RpcClient,
    ticket: &InitiateDownloadResponse,
    sink: &mut W,
) -> Result<u64, ClientError>
where
    W: AsyncWrite + Unpin,
{
    let req = DownloadStreamRequest {
        upload_id: ticket.upload_id.clone(),
        chunk_size: Some(ticket.chunk_size),
    };
    let mut stream = node
        .open_stream(MessageType::DownloadStream, Some(&req))
        .await?;

    let mut expected_index: u32 = 0;
    let mut written: u64 = 0;
    while let Some(event) = stream.next().await {
        match event {
            StreamEvent::Chunk { header, data } => {
                if header.chunk_index != expected_index {
                    return Err(ClientError::Protocol(format!(
                        "chunk {} arrived, expected {expected_index}",
                        header.chunk_index
                    )));
                }
                sink.write_all(&data).await?;
                written += data.len() as u64;
                expected_index += 1;
            }
            StreamEvent::End(msg) => {
                let msg = msg.into_result().map_err(RpcError::from)?;
                let end: DownloadStreamEnd = decode_payload(&msg)?;
                if end.chunks != expected_index {
                    return Err(ClientError::Protocol(format!(
                        "stream announced {} chunks, received {expected_index}",
                        end.chunks
                    )));
                }
                sink.flush().await?;
                return Ok(written);
            }
        }
    }
    Err(RpcError::Closed.into())
}
