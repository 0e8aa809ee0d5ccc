//! The createStream path: admission checks, quorum-replicated allocation
//! and derived-event application.

use crate::events::{make_genesis_miniblock, parse_events};
use crate::quorum::{QuorumMode, QuorumPool};
use crate::rules::can_create_stream;
use once_cell::sync::OnceCell;
use parity_scale_codec::Encode;
use std::sync::Arc;
use towns_core::protocol::{
    AllocateStreamRequest, CreateStreamRequest, CreateStreamResponse, ParsedEvent,
    StreamAndCookie, SyncCookie,
};
use towns_core::traits::{EventAppender, StreamCache};
use towns_core::{Context, Err, Result, RiverError, StreamId};
use towns_crypto::{checksum_hex, Wallet};
use towns_registry::{ChainAuth, NodeRegistry, OnChainConfig, RiverRegistry, StreamNodes};

/// Node-side service driving stream creation end to end.
pub struct Service {
    wallet: Arc<Wallet>,
    cache: Arc<dyn StreamCache>,
    node_registry: Arc<NodeRegistry>,
    stream_registry: Arc<dyn RiverRegistry>,
    chain_auth: Arc<dyn ChainAuth>,
    chain_config: Arc<OnChainConfig>,
    appender: Arc<dyn EventAppender>,
}

impl Service {
    pub fn new(
        wallet: Arc<Wallet>,
        cache: Arc<dyn StreamCache>,
        node_registry: Arc<NodeRegistry>,
        stream_registry: Arc<dyn RiverRegistry>,
        chain_auth: Arc<dyn ChainAuth>,
        chain_config: Arc<OnChainConfig>,
        appender: Arc<dyn EventAppender>,
    ) -> Self {
        Self { wallet, cache, node_registry, stream_registry, chain_auth, chain_config, appender }
    }

    /// Public RPC entry point.
    pub async fn create_stream(
        &self,
        ctx: &Context,
        req: &CreateStreamRequest,
    ) -> Result<CreateStreamResponse> {
        self.create_stream_impl(ctx, req).await.map_err(|err| err.func("create_stream"))
    }

    async fn create_stream_impl(
        &self,
        ctx: &Context,
        req: &CreateStreamRequest,
    ) -> Result<CreateStreamResponse> {
        let stream_id = StreamId::from_bytes(&req.stream_id).map_err(|err| {
            RiverError::with_base(Err::BadStreamCreationParams, "invalid stream id", err)
        })?;
        if req.events.is_empty() {
            return Err(RiverError::new(Err::BadStreamCreationParams, "no events"));
        }
        let parsed_events = parse_events(&req.events)?;
        log::debug!("createStream streamId={stream_id} events={}", parsed_events.len());

        let rules = can_create_stream(
            &self.chain_config.get(),
            now_epoch_ms(),
            stream_id,
            &parsed_events,
            &req.metadata,
        )?;

        // Streams targeted by derived events must already be resident; a
        // non-blocking probe is enough, staleness is retried above us.
        for derived in &rules.derived_events {
            if let Err(err) = self.cache.get_stream_no_wait(ctx, derived.stream_id).await {
                return Err(RiverError::with_base(Err::PermissionDenied, "stream does not exist", err)
                    .tag("streamId", derived.stream_id));
            }
        }

        if !rules.required_memberships.is_empty() {
            let creator_stream_id = rules.creator_stream_id.ok_or_else(|| {
                RiverError::new(Err::Internal, "rules require memberships without a creator stream")
                    .tag("streamId", stream_id)
            })?;
            let view = match self.cache.load_stream(ctx, creator_stream_id).await {
                Ok(stream) => stream.get_view(ctx).await,
                Err(err) => Err(err),
            }
            .map_err(|err| {
                RiverError::with_base(Err::PermissionDenied, "failed to load creator stream", err)
                    .tag("streamId", stream_id)
                    .tag("creatorStreamId", creator_stream_id)
            })?;
            for required in &rules.required_memberships {
                if !view.is_member_of(*required) {
                    return Err(RiverError::new(Err::PermissionDenied, "not a member of")
                        .tag("requiredStreamId", *required));
                }
            }
        }

        for user_address in &rules.required_user_addrs {
            let user_stream_id = StreamId::user_stream_from_addr(*user_address);
            if let Err(err) = self.cache.get_stream_no_wait(ctx, user_stream_id).await {
                return Err(RiverError::with_base(Err::PermissionDenied, "user does not exist", err)
                    .tag("requiredUser", checksum_hex(*user_address)));
            }
        }

        if let Some(query) = &rules.chain_auth {
            let result = self.chain_auth.is_entitled(ctx, query).await?;
            if !result.is_entitled() {
                return Err(RiverError::new(Err::PermissionDenied, "IsEntitled failed")
                    .tag("reason", result.reason())
                    .tag("chainAuthArgs", query));
            }
        }

        let stream = match self.create_replicated_stream(ctx, stream_id, &parsed_events).await {
            Ok(stream) => Some(stream),
            Err(err) if err.is_kind_with_bases(Err::AlreadyExists) => {
                // Idempotent success: skip the fan-out, answer from the
                // local view when this node holds the stream.
                log::info!("createStream: stream already allocated. streamId={stream_id}");
                self.existing_stream_view(ctx, stream_id).await
            },
            Err(err) => return Err(err),
        };

        // Derived events are applied in rules order. A failure does not
        // invalidate the stream: the partial list is returned and the error
        // reported here.
        let mut derived_events = Vec::new();
        for derived in &rules.derived_events {
            match self
                .appender
                .add_event_payload(ctx, derived.stream_id, derived.payload.clone(), derived.tags.clone())
                .await
            {
                Ok(mut refs) => derived_events.append(&mut refs),
                Err(err) => {
                    let err =
                        RiverError::with_base(Err::Internal, "failed to add derived event", err)
                            .tag("streamId", derived.stream_id)
                            .func("create_stream");
                    log::error!("createStream returning partial derived events. error={err}");
                    return Ok(CreateStreamResponse { stream, derived_events });
                },
            }
        }

        Ok(CreateStreamResponse { stream, derived_events })
    }

    /// Builds the genesis miniblock, records the stream on chain and fans
    /// the genesis out to the committee in write-quorum mode.
    async fn create_replicated_stream(
        &self,
        ctx: &Context,
        stream_id: StreamId,
        parsed_events: &[ParsedEvent],
    ) -> Result<StreamAndCookie> {
        let miniblock = make_genesis_miniblock(&self.wallet, parsed_events, now_epoch_ms())?;
        let miniblock_bytes = miniblock.encode();

        let committee = self
            .stream_registry
            .allocate_stream(ctx, stream_id, miniblock.hash, miniblock_bytes)
            .await?;

        let nodes = StreamNodes::new(&committee, self.wallet.address());
        let (remotes, is_local) = nodes.remotes_and_is_local();

        let mut sender = QuorumPool::new(ctx, QuorumMode::Write)
            .tag("method", "create_replicated_stream")
            .tag("streamId", stream_id);

        let local_cookie: Arc<OnceCell<SyncCookie>> = Arc::new(OnceCell::new());
        if is_local {
            let cache = self.cache.clone();
            let slot = local_cookie.clone();
            let local_address = self.wallet.address();
            sender.add_task(move |ctx| async move {
                let stream = cache.get_stream_no_wait(&ctx, stream_id).await?;
                let view = stream.get_view(&ctx).await?;
                let _ = slot.set(view.sync_cookie(local_address));
                Ok(())
            });
        }

        let remote_cookie: Arc<OnceCell<SyncCookie>> = Arc::new(OnceCell::new());
        if !remotes.is_empty() {
            let registry = self.node_registry.clone();
            let slot = remote_cookie.clone();
            let miniblock = Arc::new(miniblock.clone());
            sender.add_node_tasks(remotes, move |ctx, node| {
                let registry = registry.clone();
                let slot = slot.clone();
                let miniblock = miniblock.clone();
                async move {
                    let stub = registry.get_node_to_node_client(node)?;
                    let resp = stub
                        .allocate_stream(
                            &ctx,
                            AllocateStreamRequest { stream_id, miniblock: (*miniblock).clone() },
                        )
                        .await?;
                    let _ = slot.set(resp.sync_cookie);
                    Ok(())
                }
            });
        }

        sender.wait().await?;

        let cookie = local_cookie.get().cloned().or_else(|| remote_cookie.get().cloned());
        Ok(StreamAndCookie { miniblocks: vec![miniblock], next_sync_cookie: cookie })
    }

    async fn existing_stream_view(
        &self,
        ctx: &Context,
        stream_id: StreamId,
    ) -> Option<StreamAndCookie> {
        let stream = self.cache.get_stream_no_wait(ctx, stream_id).await.ok()?;
        let view = stream.get_view(ctx).await.ok()?;
        Some(StreamAndCookie {
            miniblocks: vec![],
            next_sync_cookie: Some(view.sync_cookie(self.wallet.address())),
        })
    }
}

fn now_epoch_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map_or(0, |elapsed| elapsed.as_millis() as u64)
}
