//! JSON-RPC stub for the node-to-node capability set.
//!
//! Binary payloads travel as hex-encoded SCALE strings; `info` is plain
//! JSON. The stub is constructed by the registry's client factory and never
//! fails at construction time: an unreachable or misconfigured endpoint
//! surfaces on first use.

use async_trait::async_trait;
use jsonrpsee::core::client::ClientT;
use jsonrpsee::http_client::{HttpClient, HttpClientBuilder};
use jsonrpsee::rpc_params;
use parity_scale_codec::{Decode, Encode};
use towns_core::protocol::{
    AllocateStreamRequest, AllocateStreamResponse, GetMiniblocksRequest, GetMiniblocksResponse,
    StreamAndCookie, SyncCookie,
};
use towns_core::traits::{NodeClient, NodeInfo};
use towns_core::{Context, Err, Result, RiverError};

pub struct JsonRpcNodeClient {
    url: String,
    client: std::result::Result<HttpClient, String>,
}

impl JsonRpcNodeClient {
    pub fn connect(url: &str) -> Self {
        let client = HttpClientBuilder::default()
            .build(url)
            .map_err(|err| err.to_string());
        Self { url: url.to_string(), client }
    }

    fn client(&self) -> Result<&HttpClient> {
        self.client.as_ref().map_err(|cause| {
            RiverError::new(Err::Unavailable, "node endpoint misconfigured")
                .tag("url", &self.url)
                .tag("cause", cause)
        })
    }

    async fn call_scale<Req: Encode, Resp: Decode>(
        &self,
        ctx: &Context,
        method: &str,
        req: &Req,
    ) -> Result<Resp> {
        let client = self.client()?;
        let payload = hex::encode(req.encode());
        let request = client.request::<String, _>(method, rpc_params![payload]);
        let raw = tokio::select! {
            result = request => result.map_err(|err| {
                RiverError::with_base(Err::Unavailable, "node rpc failed", err)
                    .tag("url", &self.url)
                    .tag("method", method.to_string())
            })?,
            () = ctx.done() => return Err(ctx.error()),
        };
        let bytes = hex::decode(raw).map_err(|err| {
            RiverError::with_base(Err::Internal, "malformed node rpc response", err)
                .tag("url", &self.url)
        })?;
        Resp::decode(&mut bytes.as_slice()).map_err(|err| {
            RiverError::with_base(Err::Internal, "failed to decode node rpc response", err)
                .tag("url", &self.url)
        })
    }
}

#[async_trait]
impl NodeClient for JsonRpcNodeClient {
    async fn allocate_stream(
        &self,
        ctx: &Context,
        req: AllocateStreamRequest,
    ) -> Result<AllocateStreamResponse> {
        self.call_scale(ctx, "towns_allocateStream", &req).await
    }

    async fn get_miniblocks(
        &self,
        ctx: &Context,
        req: GetMiniblocksRequest,
    ) -> Result<GetMiniblocksResponse> {
        self.call_scale(ctx, "towns_getMiniblocks", &req).await
    }

    async fn sync_streams(
        &self,
        ctx: &Context,
        cookies: Vec<SyncCookie>,
    ) -> Result<Vec<StreamAndCookie>> {
        self.call_scale(ctx, "towns_syncStreams", &cookies).await
    }

    async fn info(&self, ctx: &Context) -> Result<NodeInfo> {
        let client = self.client()?;
        let request = client.request::<NodeInfo, _>("towns_info", rpc_params![]);
        tokio::select! {
            result = request => result.map_err(|err| {
                RiverError::with_base(Err::Unavailable, "node info failed", err)
                    .tag("url", &self.url)
            }),
            () = ctx.done() => Err(ctx.error()),
        }
    }
}
