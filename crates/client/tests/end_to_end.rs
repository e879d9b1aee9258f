//! Coordinator, storage node and client talking over loopback WebSockets.

use std::sync::Arc;
use std::time::Duration;

use filemesh_chunk_store::{ChunkStore, checksum_bytes};
use filemesh_client::{ClientError, StorageClient};
use filemesh_coordinator::{
    CleanupReaper, CoordinatorService, DownloadCoordinator, MetadataStore, NodeRegistry,
    RpcNodeControl, UploadCoordinator,
};
use filemesh_protocol::binary::UploadChunkHeader;
use filemesh_protocol::messages::{InitiateUploadRequest, InitiateUploadResponse};
use filemesh_protocol::{FileStatus, MessageType};
use filemesh_rpc_client::{RpcClient, RpcError};
use filemesh_rpc_server::{RpcServer, ServerConfig};
use filemesh_storage_node::{NodeMembership, NodeService};
use tempfile::TempDir;

const PAYLOAD: &[u8] = b"abcdefghijklmnopqrstuvwxyz";

struct Cluster {
    _dir: TempDir,
    metadata: Arc<MetadataStore>,
    node_store: Arc<ChunkStore>,
    coordinator: Arc<RpcServer<CoordinatorService<RpcNodeControl>>>,
    node: Arc<RpcServer<NodeService>>,
    coordinator_address: String,
}

impl Cluster {
    async fn start() -> Self {
        let dir = TempDir::new().unwrap();

        let registry = Arc::new(NodeRegistry::new(Duration::from_secs(30)));
        let metadata = Arc::new(MetadataStore::open(dir.path().join("coordinator/metadata.json")));
        let service = CoordinatorService::new(
            Arc::clone(&registry),
            UploadCoordinator::new(
                Arc::clone(&registry),
                Arc::clone(&metadata),
                Arc::new(RpcNodeControl::new()),
                4,
            ),
            DownloadCoordinator::new(Arc::clone(&metadata), 4),
        );
        let coordinator = RpcServer::new(ServerConfig { port: 0 }, Arc::new(service));
        let runner = Arc::clone(&coordinator);
        tokio::spawn(async move { runner.run().await });
        let coordinator_address = format!("127.0.0.1:{}", coordinator.wait_bound().await);

        let node_store = Arc::new(ChunkStore::new(dir.path().join("node")));
        let node = RpcServer::new(
            ServerConfig { port: 0 },
            Arc::new(NodeService::new(Arc::clone(&node_store), 4)),
        );
        let runner = Arc::clone(&node);
        tokio::spawn(async move { runner.run().await });
        let node_port = node.wait_bound().await;

        NodeMembership::new(&coordinator_address, "127.0.0.1", node_port)
            .register()
            .await
            .unwrap();

        Self {
            _dir: dir,
            metadata,
            node_store,
            coordinator,
            node,
            coordinator_address,
        }
    }

    async fn client(&self) -> StorageClient {
        StorageClient::connect(&self.coordinator_address).await.unwrap()
    }

    fn stop(&self) {
        self.coordinator.shutdown();
        self.node.shutdown();
    }
}

#[tokio::test]
async fn upload_finalize_and_download() {
    let cluster = Cluster::start().await;
    let client = cluster.client().await;

    let report = client.upload_bytes("/docs/alphabet.txt", PAYLOAD, false).await.unwrap();
    assert!(!report.resumed);
    assert!(report.summary.success);
    assert_eq!(report.summary.uploaded_bytes, 26);
    assert_eq!(report.summary.uploaded_chunks, 7);

    let status = client.upload_status(&report.upload_id).await.unwrap();
    assert_eq!(status.status, FileStatus::Finalized);
    assert_eq!(status.bytes_uploaded, 26);
    assert_eq!(status.last_chunk_index, 6);

    let bytes = client.download_bytes("/docs/alphabet.txt").await.unwrap();
    assert_eq!(bytes, PAYLOAD);

    cluster.stop();
}

#[tokio::test]
async fn finalized_path_cannot_be_uploaded_again() {
    let cluster = Cluster::start().await;
    let client = cluster.client().await;
    client.upload_bytes("/a", PAYLOAD, false).await.unwrap();

    let err = client.upload_bytes("/a", b"other", false).await.unwrap_err();
    assert!(matches!(err, ClientError::Rpc(RpcError::Remote { code: 409, .. })));

    cluster.stop();
}

#[tokio::test]
async fn interrupted_upload_resumes_from_node_stats() {
    let cluster = Cluster::start().await;

    // First attempt: initiate and send only three chunks.
    let coordinator = RpcClient::connect(&cluster.coordinator_address).await.unwrap();
    let init: InitiateUploadResponse = coordinator
        .call(
            MessageType::InitiateUpload,
            &InitiateUploadRequest {
                file_path: "/big".into(),
                file_size: 26,
                resume: false,
            },
        )
        .await
        .unwrap();
    let node = RpcClient::connect(&init.node_address).await.unwrap();
    for (i, piece) in PAYLOAD.chunks(4).take(3).enumerate() {
        let header = UploadChunkHeader::new(&init.upload_id, i as u32, checksum_bytes(piece));
        node.send_frame(&header, piece).await.unwrap();
    }
    node.send_request_unbounded::<()>(MessageType::UploadStreamEnd, None)
        .await
        .unwrap();
    node.close().await;
    assert_eq!(cluster.node_store.get_stats(&init.upload_id).bytes_written, 12);

    // Second attempt resumes where the node left off.
    let client = cluster.client().await;
    let report = client.upload_bytes("/big", PAYLOAD, true).await.unwrap();
    assert!(report.resumed);
    assert_eq!(report.upload_id, init.upload_id);
    assert_eq!(report.summary.uploaded_bytes, 14);
    assert_eq!(report.summary.uploaded_chunks, 7);

    assert_eq!(client.download_bytes("/big").await.unwrap(), PAYLOAD);
    cluster.stop();
}

#[tokio::test]
async fn download_of_unfinished_upload_is_refused() {
    let cluster = Cluster::start().await;
    let coordinator = RpcClient::connect(&cluster.coordinator_address).await.unwrap();
    let _: InitiateUploadResponse = coordinator
        .call(
            MessageType::InitiateUpload,
            &InitiateUploadRequest {
                file_path: "/partial".into(),
                file_size: 26,
                resume: false,
            },
        )
        .await
        .unwrap();

    let client = cluster.client().await;
    let err = client.download_bytes("/partial").await.unwrap_err();
    assert!(matches!(err, ClientError::Rpc(RpcError::Remote { code: 409, .. })));

    let err = client.download_bytes("/never").await.unwrap_err();
    assert!(matches!(err, ClientError::Rpc(RpcError::Remote { code: 404, .. })));
    cluster.stop();
}

#[tokio::test]
async fn file_round_trip() {
    let cluster = Cluster::start().await;
    let client = cluster.client().await;
    let local = TempDir::new().unwrap();

    let source = local.path().join("in.bin");
    let content: Vec<u8> = (0..=255u8).cycle().take(1000).collect();
    std::fs::write(&source, &content).unwrap();

    let report = client.upload_file("/bin/data", &source, false).await.unwrap();
    assert_eq!(report.summary.uploaded_chunks, 250);

    let target = local.path().join("out").join("data.bin");
    let written = client.download_file("/bin/data", &target).await.unwrap();
    assert_eq!(written, 1000);
    assert_eq!(std::fs::read(&target).unwrap(), content);

    cluster.stop();
}

#[tokio::test]
async fn empty_file_round_trip() {
    let cluster = Cluster::start().await;
    let client = cluster.client().await;

    let report = client.upload_bytes("/empty", b"", false).await.unwrap();
    assert_eq!(report.summary.uploaded_bytes, 0);
    assert!(client.download_bytes("/empty").await.unwrap().is_empty());

    cluster.stop();
}

#[tokio::test]
async fn reaper_clears_abandoned_upload_on_node_and_coordinator() {
    let cluster = Cluster::start().await;
    let coordinator = RpcClient::connect(&cluster.coordinator_address).await.unwrap();
    let init: InitiateUploadResponse = coordinator
        .call(
            MessageType::InitiateUpload,
            &InitiateUploadRequest {
                file_path: "/abandoned".into(),
                file_size: 26,
                resume: false,
            },
        )
        .await
        .unwrap();
    let node = RpcClient::connect(&init.node_address).await.unwrap();
    let header = UploadChunkHeader::new(&init.upload_id, 0, String::new());
    node.send_frame(&header, b"abcd").await.unwrap();
    node.send_request_unbounded::<()>(MessageType::UploadStreamEnd, None)
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(20)).await;
    let reaper = CleanupReaper::new(
        Arc::clone(&cluster.metadata),
        Arc::new(RpcNodeControl::new()),
        Duration::from_millis(1),
    );
    assert_eq!(reaper.reap_once().await, 1);

    assert!(cluster.metadata.find_by_upload_id(&init.upload_id).is_none());
    assert_eq!(cluster.node_store.get_stats(&init.upload_id).bytes_written, 0);
    assert!(!cluster.node_store.data_path(&init.upload_id).exists());
    cluster.stop();
}
