//! Network status probe backing the `ping` command.

use futures_util::stream::{FuturesUnordered, StreamExt};
use serde::Serialize;
use std::time::Instant;
use towns_core::{Context, Err, Result, RiverError};
use towns_crypto::checksum_hex;
use towns_registry::{NodeRegistry, NodeStatus};

#[derive(Debug, Serialize)]
pub struct NodeReport {
    pub address: String,
    pub url: String,
    pub status: NodeStatus,
    pub elapsed_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub graffiti: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct NetworkStatus {
    pub total_nodes: usize,
    pub responding_nodes: usize,
    pub nodes: Vec<NodeReport>,
}

impl NetworkStatus {
    pub fn to_pretty_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|err| {
            RiverError::with_base(Err::Internal, "failed to serialize network status", err)
        })
    }
}

/// Probes every registered node concurrently and reports per-node latency,
/// version and errors. Individual probe failures do not fail the sweep.
pub async fn get_network_status(ctx: &Context, registry: &NodeRegistry) -> Result<NetworkStatus> {
    let mut probes = FuturesUnordered::new();
    for record in registry.all_nodes() {
        let client = registry.get_node_to_node_client(record.address)?;
        let ctx = ctx.clone();
        probes.push(async move {
            let started = Instant::now();
            let result = client.info(&ctx).await;
            let elapsed_ms = started.elapsed().as_millis() as u64;
            match result {
                Ok(info) => NodeReport {
                    address: checksum_hex(record.address),
                    url: record.url,
                    status: record.status,
                    elapsed_ms,
                    version: Some(info.version),
                    graffiti: Some(info.graffiti),
                    error: None,
                },
                Err(err) => NodeReport {
                    address: checksum_hex(record.address),
                    url: record.url,
                    status: record.status,
                    elapsed_ms,
                    version: None,
                    graffiti: None,
                    error: Some(err.to_string()),
                },
            }
        });
    }

    let mut nodes = Vec::new();
    while let Some(report) = probes.next().await {
        nodes.push(report);
    }
    nodes.sort_by(|a, b| a.address.cmp(&b.address));

    let responding_nodes = nodes.iter().filter(|report| report.error.is_none()).count();
    Ok(NetworkStatus { total_nodes: nodes.len(), responding_nodes, nodes })
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use primitive_types::H160;
    use std::sync::Arc;
    use towns_core::protocol::{
        AllocateStreamRequest, AllocateStreamResponse, GetMiniblocksRequest,
        GetMiniblocksResponse, StreamAndCookie, SyncCookie,
    };
    use towns_core::traits::{NodeClient, NodeInfo};
    use towns_registry::registry::{NodeRecord, NodeRegistry};

    struct FakeClient {
        healthy: bool,
    }

    #[async_trait]
    impl NodeClient for FakeClient {
        async fn allocate_stream(
            &self,
            _ctx: &Context,
            _req: AllocateStreamRequest,
        ) -> Result<AllocateStreamResponse> {
            unreachable!()
        }

        async fn get_miniblocks(
            &self,
            _ctx: &Context,
            _req: GetMiniblocksRequest,
        ) -> Result<GetMiniblocksResponse> {
            unreachable!()
        }

        async fn sync_streams(
            &self,
            _ctx: &Context,
            _cookies: Vec<SyncCookie>,
        ) -> Result<Vec<StreamAndCookie>> {
            unreachable!()
        }

        async fn info(&self, _ctx: &Context) -> Result<NodeInfo> {
            if self.healthy {
                Ok(NodeInfo {
                    version: "towns/0.1.0".into(),
                    graffiti: "test".into(),
                    start_time_epoch_ms: 0,
                })
            } else {
                Err(RiverError::new(Err::Unavailable, "connection refused"))
            }
        }
    }

    #[tokio::test]
    async fn sweep_reports_mixed_health() {
        let records = vec![
            NodeRecord {
                address: H160::repeat_byte(1),
                url: "https://one.towns.example".into(),
                status: NodeStatus::Operational,
                operator: H160::repeat_byte(9),
            },
            NodeRecord {
                address: H160::repeat_byte(2),
                url: "https://two.towns.example".into(),
                status: NodeStatus::Failed,
                operator: H160::repeat_byte(9),
            },
        ];
        let factory: towns_registry::NodeClientFactory =
            Arc::new(|record: &NodeRecord| -> Arc<dyn NodeClient> {
                Arc::new(FakeClient { healthy: record.status == NodeStatus::Operational })
            });
        let registry = NodeRegistry::new(H160::zero(), records, factory);

        let status = get_network_status(&Context::background(), &registry).await.unwrap();
        assert_eq!(status.total_nodes, 2);
        assert_eq!(status.responding_nodes, 1);
        assert!(status.nodes[0].error.is_none());
        assert_eq!(status.nodes[0].version.as_deref(), Some("towns/0.1.0"));
        assert!(status.nodes[1].error.is_some());

        let json = status.to_pretty_json().unwrap();
        assert!(json.contains("\"responding_nodes\": 1"));
    }
}
