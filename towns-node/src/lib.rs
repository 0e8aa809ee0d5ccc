//! Stream creation for the Towns node: admission rules, the write-quorum
//! pool and the replicated allocator, plus the pieces the command line needs
//! (config, node RPC stubs, the network status probe).

pub mod config;
pub mod events;
pub mod ping;
pub mod quorum;
pub mod rpc_client;
pub mod rules;
pub mod service;

pub use config::Config;
pub use quorum::{QuorumMode, QuorumPool};
pub use rules::{can_create_stream, CreationRules, DerivedEvent};
pub use service::Service;
