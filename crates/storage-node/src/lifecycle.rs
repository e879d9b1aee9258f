//! Membership of a storage node in the coordinator's registry.
//!
//! The node registers on start, heartbeats while it runs and unregisters on
//! shutdown. A coordinator restart forgets every node; the next heartbeat
//! comes back `known: false` and the node registers again.

use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use filemesh_protocol::MessageType;
use filemesh_protocol::messages::{
    HeartbeatRequest, HeartbeatResponse, RegisterNodeRequest, RegisterNodeResponse,
    UnregisterNodeRequest,
};
use filemesh_rpc_client::{RpcClient, RpcError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, thiserror::Error)]
pub enum LifecycleError {
    #[error("coordinator RPC failed: {0}")]
    Rpc(#[from] RpcError),
}

/// Registration state of this node with one coordinator.
pub struct NodeMembership {
    coordinator_address: String,
    host: String,
    port: u16,
    node_id: Mutex<Option<String>>,
}

impl NodeMembership {
    /// `host` and `port` are what the coordinator hands to clients.
    pub fn new(coordinator_address: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        Self {
            coordinator_address: coordinator_address.into(),
            host: host.into(),
            port,
            node_id: Mutex::new(None),
        }
    }

    /// Id assigned by the coordinator, once registered.
    pub fn node_id(&self) -> Option<String> {
        self.node_id
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn set_node_id(&self, id: Option<String>) {
        *self.node_id.lock().unwrap_or_else(PoisonError::into_inner) = id;
    }

    async fn connect(&self) -> Result<RpcClient, LifecycleError> {
        Ok(RpcClient::connect(&self.coordinator_address).await?)
    }

    /// Registers with the coordinator and remembers the assigned id.
    pub async fn register(&self) -> Result<String, LifecycleError> {
        let client = self.connect().await?;
        let req = RegisterNodeRequest {
            host: self.host.clone(),
            port: self.port,
        };
        let result: Result<RegisterNodeResponse, _> =
            client.call(MessageType::RegisterNode, &req).await;
        client.close().await;
        let resp = result?;

        info!(
            node_id = %resp.node_id,
            coordinator = %self.coordinator_address,
            address = %format!("{}:{}", self.host, self.port),
            "registered with coordinator"
        );
        self.set_node_id(Some(resp.node_id.clone()));
        Ok(resp.node_id)
    }

    /// Sends one heartbeat, registering first if there is no id or the
    /// coordinator no longer knows it.
    pub async fn heartbeat_once(&self) -> Result<(), LifecycleError> {
        let Some(node_id) = self.node_id() else {
            self.register().await?;
            return Ok(());
        };

        let client = self.connect().await?;
        let req = HeartbeatRequest {
            node_id: node_id.clone(),
        };
        let result: Result<HeartbeatResponse, _> =
            client.call(MessageType::Heartbeat, &req).await;
        client.close().await;

        if result?.known {
            debug!(node_id = %node_id, "heartbeat acknowledged");
        } else {
            warn!(node_id = %node_id, "coordinator forgot this node, registering again");
            self.set_node_id(None);
            self.register().await?;
        }
        Ok(())
    }

    /// Heartbeats every `interval` until `cancel` fires. Failures are logged
    /// and retried on the next tick.
    pub async fn run_heartbeats(&self, interval: Duration, cancel: CancellationToken) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(interval) => {
                    if let Err(e) = self.heartbeat_once().await {
                        warn!(coordinator = %self.coordinator_address, "heartbeat failed: {e}");
                    }
                }
            }
        }
        debug!("heartbeat loop stopped");
    }

    /// Best-effort removal from the coordinator.
    pub async fn unregister(&self) {
        let Some(node_id) = self.node_id() else {
            return;
        };
        let outcome = async {
            let client = self.connect().await?;
            let req = UnregisterNodeRequest {
                node_id: node_id.clone(),
            };
            let result = client
                .send_request(MessageType::UnregisterNode, Some(&req))
                .await;
            client.close().await;
            result.map(|_| ()).map_err(LifecycleError::from)
        }
        .await;

        match outcome {
            Ok(()) => {
                info!(node_id = %node_id, "unregistered from coordinator");
                self.set_node_id(None);
            }
            Err(e) => warn!(node_id = %node_id, "failed to unregister: {e}"),
        }
    }
}
