//! On-chain surfaces of the Towns node: the node registry view, the River
//! registry contract adapter, the on-chain configuration snapshot and the
//! entitlement oracle.

pub mod chain_config;
pub mod entitlement;
pub mod registry;
pub mod river_registry;

pub use chain_config::{OnChainConfig, OnChainSettings};
pub use entitlement::{CachingChainAuth, ChainAuth, EntitlementQuery, IsEntitledResult, Permission};
pub use registry::{NodeClientFactory, NodeEvent, NodeRecord, NodeRegistry, NodeStatus, StreamNodes};
pub use river_registry::{ChainWriter, RiverRegistry, RiverRegistryContract};
