//! Entitlement oracle: asks the chain whether a caller satisfies a policy.

use async_trait::async_trait;
use dashmap::DashMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use towns_core::{Address, Context, Result, StreamId};
use towns_crypto::checksum_hex;

/// Permission a caller must hold for the queried scope.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Permission {
    CreateSpace,
    AddRemoveChannels,
    Read,
    Write,
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::CreateSpace => "create_space",
            Self::AddRemoveChannels => "add_remove_channels",
            Self::Read => "read",
            Self::Write => "write",
        };
        f.write_str(name)
    }
}

/// Structured policy query handed to the oracle.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct EntitlementQuery {
    pub principal: Address,
    pub permission: Permission,
    pub space_id: Option<StreamId>,
    pub channel_id: Option<StreamId>,
}

impl fmt::Display for EntitlementQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "principal={} permission={}", checksum_hex(self.principal), self.permission)?;
        if let Some(space_id) = self.space_id {
            write!(f, " spaceId={space_id}")?;
        }
        if let Some(channel_id) = self.channel_id {
            write!(f, " channelId={channel_id}")?;
        }
        Ok(())
    }
}

/// The oracle's verdict with a human-readable reason for denials.
#[derive(Clone, Debug)]
pub struct IsEntitledResult {
    entitled: bool,
    reason: String,
}

impl IsEntitledResult {
    pub fn entitled() -> Self {
        Self { entitled: true, reason: String::new() }
    }

    pub fn not_entitled(reason: impl Into<String>) -> Self {
        Self { entitled: false, reason: reason.into() }
    }

    pub const fn is_entitled(&self) -> bool {
        self.entitled
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }
}

/// The chain-backed policy check. Opaque to the creation path.
#[async_trait]
pub trait ChainAuth: Send + Sync {
    async fn is_entitled(&self, ctx: &Context, query: &EntitlementQuery)
        -> Result<IsEntitledResult>;
}

struct CachedVerdict {
    result: IsEntitledResult,
    inserted_at: Instant,
}

/// Caching front for a [`ChainAuth`] implementation.
///
/// Verdicts are keyed by the full query at the chain head observed when the
/// check ran. Eviction: positive entries live for `positive_ttl`, negative
/// entries for `negative_ttl`; expired entries are swept opportunistically
/// on insert.
pub struct CachingChainAuth {
    inner: Arc<dyn ChainAuth>,
    cache: DashMap<(EntitlementQuery, u64), CachedVerdict>,
    block_of: Arc<dyn Fn() -> u64 + Send + Sync>,
    positive_ttl: Duration,
    negative_ttl: Duration,
}

impl CachingChainAuth {
    pub fn new(inner: Arc<dyn ChainAuth>, block_of: Arc<dyn Fn() -> u64 + Send + Sync>) -> Self {
        Self {
            inner,
            cache: DashMap::new(),
            block_of,
            positive_ttl: Duration::from_secs(15 * 60),
            negative_ttl: Duration::from_secs(2),
        }
    }

    fn ttl_of(&self, result: &IsEntitledResult) -> Duration {
        if result.is_entitled() {
            self.positive_ttl
        } else {
            self.negative_ttl
        }
    }

    fn sweep(&self) {
        let now = Instant::now();
        let positive_ttl = self.positive_ttl;
        let negative_ttl = self.negative_ttl;
        self.cache.retain(|_, cached| {
            let ttl = if cached.result.is_entitled() { positive_ttl } else { negative_ttl };
            now.duration_since(cached.inserted_at) < ttl
        });
    }
}

#[async_trait]
impl ChainAuth for CachingChainAuth {
    async fn is_entitled(
        &self,
        ctx: &Context,
        query: &EntitlementQuery,
    ) -> Result<IsEntitledResult> {
        let key = (query.clone(), (self.block_of)());
        if let Some(cached) = self.cache.get(&key) {
            if cached.inserted_at.elapsed() < self.ttl_of(&cached.result) {
                return Ok(cached.result.clone());
            }
        }
        let result = self.inner.is_entitled(ctx, query).await?;
        self.sweep();
        self.cache.insert(
            key,
            CachedVerdict { result: result.clone(), inserted_at: Instant::now() },
        );
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use primitive_types::H160;
    use std::sync::atomic::{AtomicU64, Ordering};

    struct CountingAuth {
        calls: AtomicU64,
    }

    #[async_trait]
    impl ChainAuth for CountingAuth {
        async fn is_entitled(
            &self,
            _ctx: &Context,
            query: &EntitlementQuery,
        ) -> Result<IsEntitledResult> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if query.permission == Permission::CreateSpace {
                Ok(IsEntitledResult::entitled())
            } else {
                Ok(IsEntitledResult::not_entitled("missing role"))
            }
        }
    }

    fn query(permission: Permission) -> EntitlementQuery {
        EntitlementQuery {
            principal: H160::repeat_byte(1),
            permission,
            space_id: None,
            channel_id: None,
        }
    }

    #[tokio::test]
    async fn positive_verdicts_are_cached_per_block() {
        let inner = Arc::new(CountingAuth { calls: AtomicU64::new(0) });
        let auth = CachingChainAuth::new(inner.clone(), Arc::new(|| 100));
        let ctx = Context::background();

        let q = query(Permission::CreateSpace);
        assert!(auth.is_entitled(&ctx, &q).await.unwrap().is_entitled());
        assert!(auth.is_entitled(&ctx, &q).await.unwrap().is_entitled());
        assert_eq!(inner.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn denial_carries_reason() {
        let inner = Arc::new(CountingAuth { calls: AtomicU64::new(0) });
        let auth = CachingChainAuth::new(inner, Arc::new(|| 100));
        let ctx = Context::background();

        let result = auth.is_entitled(&ctx, &query(Permission::Write)).await.unwrap();
        assert!(!result.is_entitled());
        assert_eq!(result.reason(), "missing role");
    }
}
