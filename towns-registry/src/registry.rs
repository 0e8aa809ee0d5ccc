//! Read-mostly view of the on-chain node fleet.
//!
//! The registry holds an immutable snapshot behind an [`ArcSwap`]; the chain
//! monitor applies membership events off the request path by building a new
//! snapshot and swapping it in. Readers never block writers and vice versa.

use arc_swap::ArcSwap;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::broadcast;
use towns_core::traits::NodeClient;
use towns_core::{Address, Err, Result, RiverError};
use towns_crypto::checksum_hex;

/// On-chain lifecycle status of a registered node.
#[derive(Clone, Copy, Debug, Eq, PartialEq, serde::Serialize)]
pub enum NodeStatus {
    NotInitialized,
    RemoteOnly,
    Operational,
    Failed,
    Departed,
}

impl NodeStatus {
    pub const fn from_contract(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::NotInitialized),
            1 => Some(Self::RemoteOnly),
            2 => Some(Self::Operational),
            3 => Some(Self::Failed),
            4 => Some(Self::Departed),
            _ => None,
        }
    }
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::NotInitialized => "not_initialized",
            Self::RemoteOnly => "remote_only",
            Self::Operational => "operational",
            Self::Failed => "failed",
            Self::Departed => "departed",
        };
        f.write_str(name)
    }
}

/// A registered node as recorded on chain.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct NodeRecord {
    pub address: Address,
    pub url: String,
    pub status: NodeStatus,
    pub operator: Address,
}

/// Membership change emitted by the chain monitor.
#[derive(Clone, Debug)]
pub enum NodeEvent {
    Added(NodeRecord),
    Updated(NodeRecord),
    Removed(Address),
}

/// Factory injected at construction that turns a node record into an RPC
/// stub. The transport lives behind it.
pub type NodeClientFactory = Arc<dyn Fn(&NodeRecord) -> Arc<dyn NodeClient> + Send + Sync>;

struct NodeEntry {
    record: NodeRecord,
    client: Arc<dyn NodeClient>,
}

type Snapshot = BTreeMap<Address, Arc<NodeEntry>>;

/// Snapshot of registered nodes and their RPC stubs, sourced from chain.
pub struct NodeRegistry {
    local_address: Address,
    nodes: ArcSwap<Snapshot>,
    client_factory: NodeClientFactory,
    events: broadcast::Sender<NodeEvent>,
}

impl NodeRegistry {
    pub fn new(
        local_address: Address,
        initial: Vec<NodeRecord>,
        client_factory: NodeClientFactory,
    ) -> Self {
        let mut snapshot = Snapshot::new();
        for record in initial {
            let client = client_factory(&record);
            snapshot.insert(record.address, Arc::new(NodeEntry { record, client }));
        }
        let (events, _) = broadcast::channel(64);
        Self { local_address, nodes: ArcSwap::from_pointee(snapshot), client_factory, events }
    }

    pub const fn local_address(&self) -> Address {
        self.local_address
    }

    pub fn is_local(&self, address: Address) -> bool {
        address == self.local_address
    }

    /// All currently registered nodes, in address order.
    pub fn all_nodes(&self) -> Vec<NodeRecord> {
        self.nodes.load().values().map(|entry| entry.record.clone()).collect()
    }

    pub fn get_node(&self, address: Address) -> Option<NodeRecord> {
        self.nodes.load().get(&address).map(|entry| entry.record.clone())
    }

    /// RPC stub for a remote node.
    pub fn get_node_to_node_client(&self, address: Address) -> Result<Arc<dyn NodeClient>> {
        self.nodes.load().get(&address).map(|entry| entry.client.clone()).ok_or_else(|| {
            RiverError::new(Err::NotFound, "no such node")
                .tag("nodeAddress", checksum_hex(address))
                .func("get_node_to_node_client")
        })
    }

    /// Subscribes to membership changes. Slow receivers may observe lagged
    /// events and should re-read the snapshot.
    pub fn subscribe(&self) -> broadcast::Receiver<NodeEvent> {
        self.events.subscribe()
    }

    /// Applies a chain-monitor event by swapping in a rebuilt snapshot. The
    /// slot is never held across I/O.
    pub fn apply(&self, event: NodeEvent) {
        let current = self.nodes.load_full();
        let mut next = (*current).clone();
        match &event {
            NodeEvent::Added(record) | NodeEvent::Updated(record) => {
                let client = (self.client_factory)(record);
                log::info!(
                    "Node registry updated. nodeAddress={} url={} status={}",
                    checksum_hex(record.address),
                    record.url,
                    record.status,
                );
                next.insert(
                    record.address,
                    Arc::new(NodeEntry { record: record.clone(), client }),
                );
            },
            NodeEvent::Removed(address) => {
                log::info!("Node removed from registry. nodeAddress={}", checksum_hex(*address));
                next.remove(address);
            },
        }
        self.nodes.store(Arc::new(next));
        let _ = self.events.send(event);
    }
}

/// A stream's committee partitioned relative to the local wallet.
#[derive(Clone, Debug)]
pub struct StreamNodes {
    remotes: Vec<Address>,
    is_local: bool,
}

impl StreamNodes {
    pub fn new(committee: &[Address], local_address: Address) -> Self {
        let mut remotes = Vec::with_capacity(committee.len());
        let mut is_local = false;
        for &address in committee {
            if address == local_address {
                is_local = true;
            } else {
                remotes.push(address);
            }
        }
        Self { remotes, is_local }
    }

    /// Remote committee members in allocation order, and whether the local
    /// node is a member.
    pub fn remotes_and_is_local(&self) -> (&[Address], bool) {
        (&self.remotes, self.is_local)
    }

    pub fn num_members(&self) -> usize {
        self.remotes.len() + usize::from(self.is_local)
    }
}
