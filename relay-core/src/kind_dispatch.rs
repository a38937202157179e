use std::sync::Arc;

use async_trait::async_trait;

use relay_shared::RelayResult;

use crate::command_result::ConnectionContext;
use crate::event::Event;

/// Resolves a kind to its persistence strategy; real persistence strategies
/// live outside this crate. Resolved by a [`KindHandlerFactory`] from the
/// event's `kind`. These built-ins exist so the pipeline is exercisable
/// end-to-end without a storage backend plugged in.
///
/// A successful handler is responsible for emitting its own `OK` result
/// through `ctx` (pipeline stage 10); the pipeline never emits on its
/// behalf.
#[async_trait]
pub trait KindHandler: Send + Sync {
    async fn execute(&self, event: &Event, ctx: &ConnectionContext) -> anyhow::Result<()>;
}

/// Stores every event it receives without deduplication — the common class
/// for ephemeral, non-replaceable relay-protocol event kinds.
pub struct EphemeralHandler;

#[async_trait]
impl KindHandler for EphemeralHandler {
    async fn execute(&self, event: &Event, ctx: &ConnectionContext) -> anyhow::Result<()> {
        tracing::debug!(event_id = %event.id, kind = event.kind, "ephemeral event accepted");
        ctx.emit_ok(&event.id, true, "").await;
        Ok(())
    }
}

/// Replaces any prior event from the same pubkey at the same kind — the
/// common class for "latest wins" relay-protocol event kinds (e.g. profile
/// metadata). Replacement itself is a persistence-layer concern out of
/// scope for this core; this handler only models the dispatch contract.
pub struct ReplaceableHandler;

#[async_trait]
impl KindHandler for ReplaceableHandler {
    async fn execute(&self, event: &Event, ctx: &ConnectionContext) -> anyhow::Result<()> {
        tracing::debug!(event_id = %event.id, kind = event.kind, "replaceable event accepted");
        ctx.emit_ok(&event.id, true, "").await;
        Ok(())
    }
}

/// Resolves `kind → Arc<dyn KindHandler>` (pipeline stage 8). A `None`
/// result rejects with `"error: event not supported"`.
pub trait KindHandlerFactory: Send + Sync {
    fn resolve(&self, kind: u16) -> Option<Arc<dyn KindHandler>>;
}

/// Default factory: ephemeral for kinds in `[20000, 30000)`, replaceable
/// for `[10000, 20000)` and exact kind `0`, everything else unsupported.
/// These ranges mirror the conventional relay-protocol kind classes, where
/// numeric ranges carry semantic meaning; a real deployment would register
/// per-kind strategies behind a richer factory.
pub struct DefaultKindHandlerFactory {
    ephemeral: Arc<dyn KindHandler>,
    replaceable: Arc<dyn KindHandler>,
}

impl Default for DefaultKindHandlerFactory {
    fn default() -> Self {
        Self {
            ephemeral: Arc::new(EphemeralHandler),
            replaceable: Arc::new(ReplaceableHandler),
        }
    }
}

impl KindHandlerFactory for DefaultKindHandlerFactory {
    fn resolve(&self, kind: u16) -> Option<Arc<dyn KindHandler>> {
        match kind {
            0 | 3 | 10_000..=19_999 => Some(self.replaceable.clone()),
            1..=9_999 | 20_000..=29_999 => Some(self.ephemeral.clone()),
            _ => None,
        }
    }
}
