//! Caching token provider.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, instrument};

use super::{Result, Token, TokenSource, TokenTarget};

type Slot = Arc<Mutex<Option<Token>>>;

/// Hands out tokens, reusing each one until its ttl runs out.
///
/// Each target has its own slot behind an async mutex. Callers for the same
/// target queue on that slot, so an expired token is re-acquired once no matter
/// how many tasks asked for it at the same time. Callers for different targets
/// do not wait on each other.
///
/// Adding a slot for a new target first drops every slot whose token has
/// expired and that no caller holds, so the map tracks recently active targets
/// rather than every target ever seen.
#[derive(Debug)]
pub struct TokenProvider<S> {
    source: S,
    ttl: Duration,
    slots: Mutex<HashMap<TokenTarget, Slot>>,
}

impl<S: TokenSource> TokenProvider<S> {
    pub fn new(source: S, ttl: Duration) -> Self {
        TokenProvider {
            source,
            ttl,
            slots: Mutex::new(HashMap::new()),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    async fn slot(&self, target: &TokenTarget) -> Slot {
        let mut slots = self.slots.lock().await;
        if let Some(slot) = slots.get(target) {
            return slot.clone();
        }

        let now = Instant::now();
        let before = slots.len();
        slots.retain(|_, slot| slot_in_use(slot, now));
        if slots.len() < before {
            debug!(swept = before - slots.len(), "Dropped expired token slots");
        }

        let slot = Slot::default();
        slots.insert(target.clone(), slot.clone());
        slot
    }

    /// Returns a valid token for `target`, acquiring one if needed.
    #[instrument(skip(self, target), fields(target = %target))]
    pub async fn get_token(&self, target: &TokenTarget) -> Result<Token> {
        let slot = self.slot(target).await;
        let mut cached = slot.lock().await;

        let now = Instant::now();
        if let Some(token) = cached.as_ref()
            && token.is_valid_at(now)
        {
            debug!("Reusing cached token");
            return Ok(token.clone());
        }

        let value = self.source.acquire(target).await?;
        let token = Token::new(value, Instant::now(), self.ttl);
        *cached = Some(token.clone());
        debug!(ttl_secs = self.ttl.as_secs(), "Cached new token");
        Ok(token)
    }

    /// Drops the cached token for `target`, e.g. after the backend refused it.
    pub async fn invalidate(&self, target: &TokenTarget) {
        let slot = self.slot(target).await;
        let mut cached = slot.lock().await;
        if cached.take().is_some() {
            info!(target = %target, "Invalidated cached token");
        }
    }
}

/// A slot stays while someone holds it or its token is still good.
fn slot_in_use(slot: &Slot, now: Instant) -> bool {
    // The map's own reference is the only one when no caller has the slot.
    if Arc::strong_count(slot) > 1 {
        return true;
    }
    match slot.try_lock() {
        Ok(cached) => cached.as_ref().is_some_and(|token| token.is_valid_at(now)),
        Err(_) => true,
    }
}
