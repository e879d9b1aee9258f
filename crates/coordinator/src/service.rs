//! RPC surface of the coordinator.
//!
//! `CoordinatorService` implements the server `Handler` and turns each
//! request into a call on the upload, download or membership components.

use std::sync::Arc;

use filemesh_protocol::constants::{MessageType, WS_ERR_CODE_BAD_REQUEST};
use filemesh_protocol::envelope::Message;
use filemesh_protocol::messages::{
    FinalizeUploadRequest, FinalizeUploadResponse, GetUploadStatusRequest, HeartbeatRequest,
    HeartbeatResponse, InitiateDownloadRequest, InitiateDownloadResponse, InitiateUploadRequest,
    InitiateUploadResponse, RegisterNodeRequest, RegisterNodeResponse, ReportProgressRequest,
    ReportProgressResponse, UnregisterNodeRequest, UploadStatusResponse,
};
use filemesh_rpc_server::{Handler, HandlerFuture, Sender};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::CoordinatorError;
use crate::download::DownloadCoordinator;
use crate::node_control::NodeControl;
use crate::registry::NodeRegistry;
use crate::upload::UploadCoordinator;

pub struct CoordinatorService<C> {
    registry: Arc<NodeRegistry>,
    uploads: UploadCoordinator<C>,
    downloads: DownloadCoordinator,
}

impl<C: NodeControl> CoordinatorService<C> {
    pub fn new(
        registry: Arc<NodeRegistry>,
        uploads: UploadCoordinator<C>,
        downloads: DownloadCoordinator,
    ) -> Self {
        Self {
            registry,
            uploads,
            downloads,
        }
    }
}

/// Decodes a request payload, answering 400 when it is missing or malformed.
async fn parse_request<T: DeserializeOwned>(sender: &Sender, msg: &Message) -> Option<T> {
    match msg.parse_payload() {
        Ok(Some(req)) => Some(req),
        Ok(None) => {
            let _ = sender
                .send_error(msg, WS_ERR_CODE_BAD_REQUEST, "missing payload")
                .await;
            None
        }
        Err(e) => {
            debug!(msg_type = ?msg.msg_type, "invalid payload: {e}");
            let _ = sender
                .send_error(msg, WS_ERR_CODE_BAD_REQUEST, &format!("invalid payload: {e}"))
                .await;
            None
        }
    }
}

/// Sends either the typed reply or the error envelope for `result`.
async fn respond<T: Serialize>(
    sender: &Sender,
    msg: &Message,
    msg_type: MessageType,
    result: Result<T, CoordinatorError>,
) {
    let sent = match result {
        Ok(payload) => sender.reply(msg, msg_type, &payload).await,
        Err(e) => sender.send_error(msg, e.code(), &e.to_string()).await,
    };
    if let Err(e) = sent {
        warn!(msg_type = ?msg_type, "failed to send reply: {e}");
    }
}

impl<C: NodeControl> Handler for CoordinatorService<C> {
    type Session = ();

    fn on_initiate_upload(&self, sender: Sender, msg: Message) -> HandlerFuture<'_> {
        Box::pin(async move {
            let Some(req) = parse_request::<InitiateUploadRequest>(&sender, &msg).await else {
                return;
            };
            let result = self
                .uploads
                .initiate_upload(&req.file_path, req.file_size, req.resume)
                .map(InitiateUploadResponse::from);
            respond(&sender, &msg, MessageType::InitiateUploadResponse, result).await;
        })
    }

    fn on_finalize_upload(&self, sender: Sender, msg: Message) -> HandlerFuture<'_> {
        Box::pin(async move {
            let Some(req) = parse_request::<FinalizeUploadRequest>(&sender, &msg).await else {
                return;
            };
            // Finalize reports failures in-band rather than as an error envelope.
            let resp = match self
                .uploads
                .finalize_upload(&req.upload_id, &req.file_path)
                .await
            {
                Ok(()) => FinalizeUploadResponse {
                    success: true,
                    error_message: None,
                    error_code: None,
                },
                Err(e) => FinalizeUploadResponse {
                    success: false,
                    error_message: Some(e.to_string()),
                    error_code: Some(e.code()),
                },
            };
            respond(&sender, &msg, MessageType::FinalizeUploadResponse, Ok(resp)).await;
        })
    }

    fn on_initiate_download(&self, sender: Sender, msg: Message) -> HandlerFuture<'_> {
        Box::pin(async move {
            let Some(req) = parse_request::<InitiateDownloadRequest>(&sender, &msg).await else {
                return;
            };
            let result = self
                .downloads
                .initiate_download(&req.file_path)
                .map(InitiateDownloadResponse::from);
            respond(&sender, &msg, MessageType::InitiateDownloadResponse, result).await;
        })
    }

    fn on_get_upload_status(&self, sender: Sender, msg: Message) -> HandlerFuture<'_> {
        Box::pin(async move {
            let Some(req) = parse_request::<GetUploadStatusRequest>(&sender, &msg).await else {
                return;
            };
            let result = self
                .uploads
                .get_upload_status(&req.upload_id)
                .map(UploadStatusResponse::from);
            respond(&sender, &msg, MessageType::UploadStatus, result).await;
        })
    }

    fn on_report_progress(&self, sender: Sender, msg: Message) -> HandlerFuture<'_> {
        Box::pin(async move {
            let Some(req) = parse_request::<ReportProgressRequest>(&sender, &msg).await else {
                return;
            };
            let result = self
                .uploads
                .record_progress(&req.upload_id, req.last_chunk_index, req.bytes_uploaded)
                .map(|()| ReportProgressResponse { recorded: true });
            respond(&sender, &msg, MessageType::ReportProgressResponse, result).await;
        })
    }

    fn on_register_node(&self, sender: Sender, msg: Message) -> HandlerFuture<'_> {
        Box::pin(async move {
            let Some(req) = parse_request::<RegisterNodeRequest>(&sender, &msg).await else {
                return;
            };
            if req.host.is_empty() {
                let _ = sender
                    .send_error(&msg, WS_ERR_CODE_BAD_REQUEST, "host is required")
                    .await;
                return;
            }
            let node_id = self.registry.register(&req.host, req.port);
            let resp = RegisterNodeResponse { node_id };
            respond(&sender, &msg, MessageType::RegisterNodeResponse, Ok(resp)).await;
        })
    }

    fn on_unregister_node(&self, sender: Sender, msg: Message) -> HandlerFuture<'_> {
        Box::pin(async move {
            let Some(req) = parse_request::<UnregisterNodeRequest>(&sender, &msg).await else {
                return;
            };
            self.registry.unregister(&req.node_id);
            let empty = serde_json::Map::new();
            respond(&sender, &msg, MessageType::UnregisterNodeResponse, Ok(empty)).await;
        })
    }

    fn on_heartbeat(&self, sender: Sender, msg: Message) -> HandlerFuture<'_> {
        Box::pin(async move {
            let Some(req) = parse_request::<HeartbeatRequest>(&sender, &msg).await else {
                return;
            };
            let known = self.registry.heartbeat(&req.node_id);
            if !known {
                debug!(node_id = %req.node_id, "heartbeat from unknown node");
            }
            let resp = HeartbeatResponse { known };
            respond(&sender, &msg, MessageType::HeartbeatResponse, Ok(resp)).await;
        })
    }
}
