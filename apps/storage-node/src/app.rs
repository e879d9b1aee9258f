//! Wires the storage node together: chunk store, RPC server, membership.

use std::sync::Arc;

use filemesh_chunk_store::ChunkStore;
use filemesh_rpc_server::{RpcServer, ServerConfig};
use filemesh_storage_node::{NodeMembership, NodeService};
use tokio_util::sync::CancellationToken;

use crate::config::Config;

pub async fn run(config: Config) -> anyhow::Result<()> {
    let cancel = CancellationToken::new();

    tokio::fs::create_dir_all(&config.storage_path).await?;
    let store = Arc::new(ChunkStore::new(&config.storage_path));
    let service = NodeService::new(store, config.download_chunk_size as usize);

    let server = RpcServer::new(
        ServerConfig {
            port: config.listen_port,
        },
        Arc::new(service),
    );
    let server_run = Arc::clone(&server);
    let server_task = tokio::spawn(async move { server_run.run().await });
    let port = server.wait_bound().await;
    tracing::info!(port, "storage node listening");

    let membership = Arc::new(NodeMembership::new(
        &config.coordinator_address,
        &config.advertised_host,
        port,
    ));
    // The heartbeat loop registers on its first tick if this attempt fails.
    if let Err(e) = membership.register().await {
        tracing::warn!("initial registration failed: {e}");
    }
    let heartbeat_task = {
        let membership = Arc::clone(&membership);
        let cancel = cancel.clone();
        let interval = config.heartbeat_interval();
        tokio::spawn(async move { membership.run_heartbeats(interval, cancel).await })
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("SIGINT received, shutting down");
        }
        result = server_task => {
            match result {
                Ok(Ok(())) => tracing::warn!("rpc server stopped unexpectedly"),
                Ok(Err(e)) => tracing::error!("rpc server failed: {e}"),
                Err(e) => tracing::error!("rpc server task panicked: {e}"),
            }
        }
    }

    cancel.cancel();
    if let Err(e) = heartbeat_task.await {
        tracing::warn!("heartbeat task ended abnormally: {e}");
    }
    membership.unregister().await;
    server.shutdown();
    Ok(())
}
