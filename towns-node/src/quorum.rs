//! Concurrent task runner with read/write quorum verdicts.
//!
//! Tasks are spawned onto the runtime as they are added; `wait` drives them
//! to a verdict. Write mode succeeds once a strict majority of all tasks
//! (local and remote alike) has succeeded and fails as soon as a majority
//! becomes unreachable. Read mode resolves on the first success. Losing
//! tasks are cancelled best-effort when the pool is dropped. There is no
//! ordering between concurrent tasks.

use std::fmt;
use std::future::Future;
use tokio::task::JoinSet;
use towns_core::{Address, Context, Err, Result, RiverError};
use towns_crypto::checksum_hex;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum QuorumMode {
    /// First success resolves the pool.
    Read,
    /// A strict majority of successes resolves the pool.
    Write,
}

struct TaskOutcome {
    node: Option<Address>,
    result: Result<()>,
}

pub struct QuorumPool {
    ctx: Context,
    mode: QuorumMode,
    tags: Vec<(&'static str, String)>,
    tasks: JoinSet<TaskOutcome>,
    total: usize,
}

impl QuorumPool {
    pub fn new(ctx: &Context, mode: QuorumMode) -> Self {
        Self { ctx: ctx.clone(), mode, tags: Vec::new(), tasks: JoinSet::new(), total: 0 }
    }

    /// Attaches an observability tag included in logs and verdict errors.
    #[must_use]
    pub fn tag(mut self, key: &'static str, value: impl fmt::Display) -> Self {
        self.tags.push((key, value.to_string()));
        self
    }

    /// Adds a task pinned to the local node.
    pub fn add_task<F, Fut>(&mut self, task: F)
    where
        F: FnOnce(Context) -> Fut + Send + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let ctx = self.ctx.clone();
        self.total += 1;
        self.tasks.spawn(async move { TaskOutcome { node: None, result: task(ctx).await } });
    }

    /// Adds one task per remote node, each receiving its node address.
    pub fn add_node_tasks<F, Fut>(&mut self, nodes: &[Address], task: F)
    where
        F: Fn(Context, Address) -> Fut,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        for &node in nodes {
            let fut = task(self.ctx.clone(), node);
            self.total += 1;
            self.tasks.spawn(async move { TaskOutcome { node: Some(node), result: fut.await } });
        }
    }

    /// Drives the tasks to a verdict. Returns once the verdict is reached or
    /// the context is cancelled; remaining tasks are aborted on drop.
    pub async fn wait(mut self) -> Result<()> {
        let total = self.total;
        if total == 0 {
            return Ok(());
        }
        let majority = match self.mode {
            QuorumMode::Read => 1,
            QuorumMode::Write => total / 2 + 1,
        };
        let mut succeeded = 0usize;
        let mut failed = 0usize;
        let mut last_error: Option<RiverError> = None;

        loop {
            let joined = tokio::select! {
                joined = self.tasks.join_next() => joined,
                () = self.ctx.done() => {
                    return Err(self.verdict_error(Err::Canceled, "quorum cancelled", last_error, succeeded, failed));
                },
            };
            let Some(joined) = joined else { break };
            let outcome = joined.unwrap_or_else(|err| TaskOutcome {
                node: None,
                result: Err(RiverError::with_base(Err::Internal, "quorum task aborted", err)),
            });
            match outcome.result {
                Ok(()) => {
                    succeeded += 1;
                    if succeeded >= majority {
                        log::debug!(
                            "Quorum reached. mode={:?} succeeded={succeeded} total={total}{}",
                            self.mode,
                            self.format_tags(),
                        );
                        return Ok(());
                    }
                },
                Err(err) => {
                    failed += 1;
                    log::warn!(
                        "Quorum task failed. node={} error={err}{}",
                        outcome.node.map_or_else(|| "local".to_string(), checksum_hex),
                        self.format_tags(),
                    );
                    last_error = Some(err);
                    if total - failed < majority {
                        return Err(self.verdict_error(
                            Err::Unavailable,
                            "quorum not reached",
                            last_error,
                            succeeded,
                            failed,
                        ));
                    }
                },
            }
        }
        // All tasks drained without reaching the failure bound; only
        // possible when the verdict was already decided above.
        Err(self.verdict_error(Err::Internal, "quorum pool drained", last_error, succeeded, failed))
    }

    fn verdict_error(
        &self,
        kind: Err,
        message: &'static str,
        last_error: Option<RiverError>,
        succeeded: usize,
        failed: usize,
    ) -> RiverError {
        let mut err = match last_error {
            Some(base) => RiverError::with_base(kind, message, base),
            None => RiverError::new(kind, message),
        };
        err = err.tag("succeeded", succeeded).tag("failed", failed).tag("total", self.total);
        for (key, value) in &self.tags {
            err = err.tag(key, value.clone());
        }
        err.func("quorum_wait")
    }

    fn format_tags(&self) -> String {
        let mut out = String::new();
        for (key, value) in &self.tags {
            out.push(' ');
            out.push_str(key);
            out.push('=');
            out.push_str(value);
        }
        out
    }
}
