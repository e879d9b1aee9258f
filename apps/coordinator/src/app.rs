//! Wires the coordinator components together and runs them until Ctrl-C.

use std::sync::Arc;

use filemesh_coordinator::{
    CleanupReaper, CoordinatorService, DownloadCoordinator, MetadataStore, NodeRegistry,
    RpcNodeControl, UploadCoordinator,
};
use filemesh_rpc_server::{RpcServer, ServerConfig};
use tokio_util::sync::CancellationToken;

use crate::config::Config;

pub async fn run(config: Config) -> anyhow::Result<()> {
    let cancel = CancellationToken::new();

    let registry = Arc::new(NodeRegistry::new(config.node_timeout()));
    let metadata = Arc::new(MetadataStore::open(&config.metadata_path));
    let nodes = Arc::new(RpcNodeControl::new());

    let service = CoordinatorService::new(
        Arc::clone(&registry),
        UploadCoordinator::new(
            Arc::clone(&registry),
            Arc::clone(&metadata),
            Arc::clone(&nodes),
            config.chunk_size,
        ),
        DownloadCoordinator::new(Arc::clone(&metadata), config.chunk_size),
    );

    let server = RpcServer::new(
        ServerConfig {
            port: config.listen_port,
        },
        Arc::new(service),
    );
    let server_run = Arc::clone(&server);
    let server_task = tokio::spawn(async move { server_run.run().await });
    let port = server.wait_bound().await;
    tracing::info!(port, "coordinator listening");

    let reaper = CleanupReaper::new(metadata, nodes, config.cleanup_timeout());
    let reaper_task = {
        let cancel = cancel.clone();
        let interval = config.cleanup_interval();
        tokio::spawn(async move { reaper.run(interval, cancel).await })
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
    server.shutdown();
    if let Err(e) = reaper_task.await {
        tracing::warn!("cleanup task ended abnormally: {e}");
    }
    Ok(())
}
