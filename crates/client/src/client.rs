use filemesh_protocol::MessageType;
use filemesh_protocol::messages::{GetUploadStatusRequest, UploadStatusResponse};
use filemesh_rpc_client::RpcClient;

use crate::ClientError;

/// Handle on one coordinator.
///
/// Node connections are opened per transfer, to whichever node the
/// coordinator assigns.
pub struct StorageClient {
    pub(crate) coordinator: RpcClient,
}

impl StorageClient {
    /// Connects to the coordinator at `address` (`host:port` or `ws://` URL).
    pub async fn connect(address: &str) -> Result<Self, ClientError> {
        let coordinator = RpcClient::connect(address).await?;
        Ok(Self { coordinator })
    }

    /// Status of an upload as the coordinator records it.
    pub async fn upload_status(&self, upload_id: &str) -> Result<UploadStatusResponse, ClientError> {
        let req = GetUploadStatusRequest {
            upload_id: upload_id.to_string(),
        };
        Ok(self
            .coordinator
            .call(MessageType::GetUploadStatus, &req)
            .await?)
    }

    pub async fn close(&self) {
        self.coordinator.close().await;
    }
}
