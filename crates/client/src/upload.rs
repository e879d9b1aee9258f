//! Upload orchestration: initiate, optionally resume, stream, report,
//! finalize.

use std::path::Path;

use filemesh_chunk_store::{ChunkReader, checksum_bytes};
use filemesh_protocol::binary::UploadChunkHeader;
use filemesh_protocol::messages::{
    FinalizeUploadRequest, FinalizeUploadResponse, GetUploadStatsRequest,
    InitiateUploadRequest, InitiateUploadResponse, ReportProgressRequest, ReportProgressResponse,
    UploadStatsResponse,
};
use filemesh_protocol::{MessageType, UploadSummary};
use filemesh_rpc_client::{RpcClient, decode_payload};
use tracing::{debug, info, warn};

use crate::ClientError;
use crate::client::StorageClient;

/// Outcome of a finalized upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadReport {
    pub upload_id: String,
    pub node_address: String,
    pub resumed: bool,
    /// Summary of the stream sent in this call. On a resumed upload the
    /// byte count covers only what this call sent.
    pub summary: UploadSummary,
}

/// Where the bytes of an upload come from.
enum ChunkSource<'a> {
    Memory {
        data: &'a [u8],
        chunk_size: usize,
        offset: usize,
        index: u32,
    },
    File(ChunkReader),
}

impl ChunkSource<'_> {
    async fn next(&mut self) -> Result<Option<(u32, Vec<u8>)>, ClientError> {
        match self {
            ChunkSource::Memory {
                data,
                chunk_size,
                offset,
                index,
            } => {
                let bytes: &[u8] = *data;
                if *offset >= bytes.len() {
                    return Ok(None);
                }
                let end = (*offset + *chunk_size).min(bytes.len());
                let piece = (*index, bytes[*offset..end].to_vec());
                *offset = end;
                *index += 1;
                Ok(Some(piece))
            }
            ChunkSource::File(reader) => Ok(reader.next_chunk().await?.map(|c| (c.index, c.data))),
        }
    }
}

/// Where a (possibly resumed) stream starts.
struct StartPoint {
    offset: u64,
    next_index: u32,
}

impl StorageClient {
    /// Uploads `data` as `remote_path`.
    pub async fn upload_bytes(
        &self,
        remote_path: &str,
        data: &[u8],
        resume: bool,
    ) -> Result<UploadReport, ClientError> {
        let size = data.len() as u64;
        let init = self.initiate(remote_path, size, resume).await?;
        let node = RpcClient::connect(&init.node_address).await?;

        let result = async {
            let start = start_point(&node, &init, size).await?;
            let chunk_size = effective_chunk_size(init.chunk_size);
            let source = ChunkSource::Memory {
                data,
                chunk_size,
                offset: start.offset as usize,
                index: start.next_index,
            };
            self.transfer(&node, remote_path, &init, size, start, source)
                .await
        }
        .await;
        node.close().await;
        result
    }

    /// Uploads the file at `local_path` as `remote_path`.
    pub async fn upload_file(
        &self,
        remote_path: &str,
        local_path: &Path,
        resume: bool,
    ) -> Result<UploadReport, ClientError> {
        let size = tokio::fs::metadata(local_path).await?.len();
        let init = self.initiate(remote_path, size, resume).await?;
        let node = RpcClient::connect(&init.node_address).await?;

        let result = async {
            let start = start_point(&node, &init, size).await?;
            let mut reader =
                ChunkReader::open(local_path, effective_chunk_size(init.chunk_size)).await?;
            reader.seek_to(start.offset, start.next_index).await?;
            self.transfer(
                &node,
                remote_path,
                &init,
                size,
                start,
                ChunkSource::File(reader),
            )
            .await
        }
        .await;
        node.close().await;
        result
    }

    async fn initiate(
        &self,
        remote_path: &str,
        size: u64,
        resume: bool,
    ) -> Result<InitiateUploadResponse, ClientError> {
        let req = InitiateUploadRequest {
            file_path: remote_path.to_string(),
            file_size: size,
            resume,
        };
        let init: InitiateUploadResponse =
            self.coordinator.call(MessageType::InitiateUpload, &req).await?;
        info!(
            upload_id = %init.upload_id,
            node_address = %init.node_address,
            resumed = init.resumed,
            "upload initiated"
        );
        Ok(init)
    }

    /// Streams the remaining chunks, reports progress, then finalizes.
    async fn transfer(
        &self,
        node: &RpcClient,
        remote_path: &str,
        init: &InitiateUploadResponse,
        size: u64,
        start: StartPoint,
        mut source: ChunkSource<'_>,
    ) -> Result<UploadReport, ClientError> {
        let mut sent_chunks: u32 = 0;
        let mut sent_bytes: u64 = 0;
        while let Some((index, data)) = source.next().await? {
            let header = UploadChunkHeader::new(&init.upload_id, index, checksum_bytes(&data));
            node.send_frame(&header, &data).await?;
            sent_chunks += 1;
            sent_bytes += data.len() as u64;
        }
        // An empty file still needs its data file on the node.
        if size == 0 && start.offset == 0 && start.next_index == 0 {
            let header = UploadChunkHeader::new(&init.upload_id, 0, checksum_bytes(&[]));
            node.send_frame(&header, &[]).await?;
            sent_chunks = 1;
        }
        debug!(upload_id = %init.upload_id, sent_chunks, sent_bytes, "chunks queued");

        let resp = node
            .send_request_unbounded::<()>(MessageType::UploadStreamEnd, None)
            .await?;
        let summary: UploadSummary = decode_payload(&resp)?;
        if !summary.success {
            return Err(ClientError::StreamFailed(
                summary
                    .error_message
                    .unwrap_or_else(|| "unknown error".to_string()),
            ));
        }

        let last_chunk_index = i64::from(start.next_index) + i64::from(sent_chunks) - 1;
        let progress = ReportProgressRequest {
            upload_id: init.upload_id.clone(),
            last_chunk_index,
            bytes_uploaded: start.offset + sent_bytes,
        };
        let recorded: Result<ReportProgressResponse, _> = self
            .coordinator
            .call(MessageType::ReportProgress, &progress)
            .await;
        if let Err(e) = recorded {
            warn!(upload_id = %init.upload_id, "progress report failed: {e}");
        }

        let req = FinalizeUploadRequest {
            upload_id: init.upload_id.clone(),
            file_path: remote_path.to_string(),
        };
        let fin: FinalizeUploadResponse = self
            .coordinator
            .call(MessageType::FinalizeUpload, &req)
            .await?;
        if !fin.success {
            return Err(ClientError::Rejected {
                code: fin.error_code,
                message: fin.error_message.unwrap_or_default(),
            });
        }

        info!(upload_id = %init.upload_id, bytes = size, "upload finalized");
        Ok(UploadReport {
            upload_id: init.upload_id.clone(),
            node_address: init.node_address.clone(),
            resumed: init.resumed,
            summary,
        })
    }
}

/// Asks the node where a resumed upload stands; fresh uploads start at zero.
async fn start_point(
    node: &RpcClient,
    init: &InitiateUploadResponse,
    size: u64,
) -> Result<StartPoint, ClientError> {
    if !init.resumed {
        return Ok(StartPoint {
            offset: 0,
            next_index: 0,
        });
    }

    let req = GetUploadStatsRequest {
        upload_id: init.upload_id.clone(),
    };
    let stats: UploadStatsResponse = node.call(MessageType::GetUploadStats, &req).await?;
    if stats.bytes_written > size {
        return Err(ClientError::Protocol(format!(
            "node holds {} bytes of a {size}-byte upload",
            stats.bytes_written
        )));
    }
    info!(
        upload_id = %init.upload_id,
        offset = stats.bytes_written,
        next_index = stats.chunks_count,
        "resuming from node stats"
    );
    Ok(StartPoint {
        offset: stats.bytes_written,
        next_index: stats.chunks_count,
    })
}

fn effective_chunk_size(chunk_size: u32) -> usize {
    if chunk_size == 0 {
        filemesh_protocol::DEFAULT_CHUNK_SIZE as usize
    } else {
        chunk_size as usize
    }
}
