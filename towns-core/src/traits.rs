//! Capability traits at the seams between the creation path and its
//! collaborators: peer nodes, the local stream cache and the event appender.

use crate::context::Context;
use crate::error::Result;
use crate::protocol::{
    AllocateStreamRequest, AllocateStreamResponse, EventRef, GetMiniblocksRequest,
    GetMiniblocksResponse, StreamAndCookie, StreamPayload, SyncCookie, Tags,
};
use crate::stream_id::StreamId;
use crate::view::StreamView;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Status data returned by a node's info endpoint.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct NodeInfo {
    pub version: String,
    pub graffiti: String,
    pub start_time_epoch_ms: u64,
}

/// Capability set a peer node exposes to other nodes.
#[async_trait]
pub trait NodeClient: Send + Sync + 'static {
    async fn allocate_stream(
        &self,
        ctx: &Context,
        req: AllocateStreamRequest,
    ) -> Result<AllocateStreamResponse>;

    async fn get_miniblocks(
        &self,
        ctx: &Context,
        req: GetMiniblocksRequest,
    ) -> Result<GetMiniblocksResponse>;

    async fn sync_streams(
        &self,
        ctx: &Context,
        cookies: Vec<SyncCookie>,
    ) -> Result<Vec<StreamAndCookie>>;

    async fn info(&self, ctx: &Context) -> Result<NodeInfo>;
}

impl std::fmt::Debug for dyn NodeClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("dyn NodeClient")
    }
}

/// A locally resident stream handle.
#[async_trait]
pub trait Stream: Send + Sync {
    async fn get_view(&self, ctx: &Context) -> Result<Arc<StreamView>>;
}

/// Local stream cache.
#[async_trait]
pub trait StreamCache: Send + Sync {
    /// Non-blocking probe: returns the stream only if it is already
    /// resident, `NotFound` otherwise.
    async fn get_stream_no_wait(
        &self,
        ctx: &Context,
        stream_id: StreamId,
    ) -> Result<Arc<dyn Stream>>;

    /// Loads the stream, fetching from storage or peers as needed.
    async fn load_stream(&self, ctx: &Context, stream_id: StreamId) -> Result<Arc<dyn Stream>>;
}

/// Appends an event payload to a pre-existing stream.
#[async_trait]
pub trait EventAppender: Send + Sync {
    async fn add_event_payload(
        &self,
        ctx: &Context,
        stream_id: StreamId,
        payload: StreamPayload,
        tags: Tags,
    ) -> Result<Vec<EventRef>>;
}
