//! Nonce and block-context management for transaction signing.
//!
//! One instance exists per login session. It caches the access-key nonce and
//! final block data with a 5 s staleness window, coalesces concurrent
//! refreshes into a single RPC fetch, and hands out strictly-increasing
//! nonce reservations so concurrent signers never collide.

use futures::future::{LocalBoxFuture, Shared};
use futures::FutureExt;
use log::{debug, warn};
use std::cell::{Cell, RefCell};
use std::collections::BTreeSet;
use std::rc::Rc;

use wasm_signer_worker::TransactionContext;

use crate::config::{BLOCK_DATA_STALENESS_MS, NONCE_STALENESS_MS, PREFETCH_DEBOUNCE_MS};
use crate::rpc::{NearRpcClient, RpcTransport};
use crate::utils::now_ms;

type SharedFetch = Shared<LocalBoxFuture<'static, Result<FetchedChainData, String>>>;

/// What one coalesced refresh brings back.
#[derive(Debug, Clone)]
struct FetchedChainData {
    access_key_nonce: Option<u64>,
    block_hash: Option<String>,
    block_height: Option<u64>,
}

/// An in-flight fetch plus the fields it covers. Callers needing a field it
/// does not cover must not join it; a block-only prefetch must never satisfy
/// a forced nonce refresh.
struct InflightFetch {
    covers_nonce: bool,
    covers_block: bool,
    generation: u64,
    future: SharedFetch,
}

/// Join the in-flight fetch, or start a new one widened to the union of the
/// in-flight and requested fields. Returns `None` to join, `Some(union)` to
/// start.
fn plan_fetch(
    inflight: Option<(bool, bool)>,
    fetch_nonce: bool,
    fetch_block: bool,
) -> Option<(bool, bool)> {
    match inflight {
        Some((covers_nonce, covers_block))
            if (covers_nonce || !fetch_nonce) && (covers_block || !fetch_block) =>
        {
            None
        }
        Some((covers_nonce, covers_block)) => {
            Some((covers_nonce || fetch_nonce, covers_block || fetch_block))
        }
        None => Some((fetch_nonce, fetch_block)),
    }
}

#[derive(Default)]
struct NonceState {
    account_id: Option<String>,
    public_key: Option<String>,

    access_key_nonce: Option<u64>,
    next_nonce: u64,
    nonce_fetched_at_ms: f64,

    block_hash: Option<String>,
    block_height: Option<u64>,
    block_fetched_at_ms: f64,

    reserved: BTreeSet<u64>,
    last_reserved: u64,

    last_prefetch_ms: f64,
}

pub struct NonceManager<T: RpcTransport> {
    client: Rc<NearRpcClient<T>>,
    state: RefCell<NonceState>,
    inflight_fetch: RefCell<Option<InflightFetch>>,
    fetch_generation: Cell<u64>,
}

impl<T: RpcTransport + 'static> NonceManager<T> {
    pub fn new(client: Rc<NearRpcClient<T>>) -> Self {
        Self {
            client,
            state: RefCell::new(NonceState::default()),
            inflight_fetch: RefCell::new(None),
            fetch_generation: Cell::new(0),
        }
    }

    /// Bind the manager to a signing identity. Called on login.
    pub fn initialize(&self, account_id: &str, public_key: &str) {
        let mut state = self.state.borrow_mut();
        *state = NonceState::default();
        state.account_id = Some(account_id.to_string());
        state.public_key = Some(public_key.to_string());
    }

    /// Drop all state. Called on logout and config change.
    pub fn clear(&self) {
        *self.state.borrow_mut() = NonceState::default();
        *self.inflight_fetch.borrow_mut() = None;
    }

    pub fn is_initialized(&self) -> bool {
        self.state.borrow().account_id.is_some()
    }

    /// Produce a fresh transaction context. `force` always refetches;
    /// otherwise only what is actually stale is fetched. Concurrent callers
    /// share one in-flight RPC fetch.
    pub async fn get_nonce_block_hash_and_height(
        &self,
        force: bool,
    ) -> Result<TransactionContext, String> {
        let (account_id, public_key) = self.identity()?;

        let (nonce_stale, block_stale) = {
            let state = self.state.borrow();
            let now = now_ms();
            (
                force
                    || state.access_key_nonce.is_none()
                    || now - state.nonce_fetched_at_ms > NONCE_STALENESS_MS,
                force
                    || state.block_hash.is_none()
                    || now - state.block_fetched_at_ms > BLOCK_DATA_STALENESS_MS,
            )
        };

        if nonce_stale || block_stale {
            let fetched = self
                .coalesced_fetch(account_id.clone(), public_key.clone(), nonce_stale, block_stale)
                .await?;
            self.apply_fetched(fetched);
        }

        self.context_from_state()
    }

    /// Debounced, non-throwing background refresh of the block data.
    pub async fn prefetch_blockheight(&self) {
        {
            let mut state = self.state.borrow_mut();
            let now = now_ms();
            if now - state.last_prefetch_ms < PREFETCH_DEBOUNCE_MS {
                return;
            }
            state.last_prefetch_ms = now;

            let block_fresh = state.block_hash.is_some()
                && now - state.block_fetched_at_ms <= BLOCK_DATA_STALENESS_MS;
            if block_fresh {
                return;
            }
        }

        if let Err(e) = self.get_nonce_block_hash_and_height(false).await {
            debug!("prefetch_blockheight refresh failed (ignored): {}", e);
        }
    }

    /// Reserve `count` contiguous nonces. Two-phase: the plan validates the
    /// whole run against the reservation set without mutating anything, the
    /// commit installs it atomically.
    pub fn reserve_nonces(&self, count: u64) -> Result<Vec<u64>, String> {
        if count == 0 {
            return Err("Cannot reserve zero nonces".to_string());
        }

        let mut state = self.state.borrow_mut();
        if state.account_id.is_none() {
            return Err("Nonce manager is not initialized".to_string());
        }

        // Plan
        let start = std::cmp::max(state.last_reserved + 1, state.next_nonce.max(1));
        let candidates: Vec<u64> = (start..start + count).collect();
        if let Some(taken) = candidates.iter().find(|n| state.reserved.contains(n)) {
            return Err(format!("Nonce {} is already reserved", taken));
        }

        // Commit
        for n in &candidates {
            state.reserved.insert(*n);
        }
        state.last_reserved = *candidates.last().expect("count >= 1");

        debug!(
            "Reserved nonces {:?} (last_reserved={})",
            candidates, state.last_reserved
        );
        Ok(candidates)
    }

    pub fn get_next_nonce(&self) -> Result<u64, String> {
        Ok(self.reserve_nonces(1)?[0])
    }

    /// Idempotent: releasing an unreserved nonce is a no-op.
    pub fn release_nonce(&self, nonce: u64) {
        self.state.borrow_mut().reserved.remove(&nonce);
    }

    pub fn release_all_nonces(&self) {
        self.state.borrow_mut().reserved.clear();
    }

    pub fn reserved_count(&self) -> usize {
        self.state.borrow().reserved.len()
    }

    /// Reconcile with the chain after a broadcast. Re-reads the access key,
    /// advances `next_nonce` monotonically, and prunes reservations the
    /// chain has already consumed. Missing access keys (just-created or
    /// just-rotated accounts) are tolerated by advancing optimistically
    /// from `actual_nonce`.
    pub async fn update_nonce_from_blockchain(&self, actual_nonce: u64) -> Result<u64, String> {
        let (account_id, public_key) = self.identity()?;

        let chain_nonce = match self.client.view_access_key(&account_id, &public_key).await {
            Ok(info) => info.get("nonce").and_then(|n| n.as_u64()),
            Err(e) => {
                warn!(
                    "Access key not visible on-chain for {} (advancing optimistically): {}",
                    account_id, e
                );
                None
            }
        };

        let mut state = self.state.borrow_mut();

        let floor = chain_nonce.unwrap_or(actual_nonce);
        state.reserved.retain(|n| *n > floor);

        let next = [
            chain_nonce.map(|n| n + 1).unwrap_or(0),
            actual_nonce + 1,
            state.next_nonce,
            state.last_reserved + 1,
        ]
        .into_iter()
        .max()
        .unwrap_or(1)
        .max(1);

        state.next_nonce = next;
        if let Some(n) = chain_nonce {
            state.access_key_nonce = Some(n);
            state.nonce_fetched_at_ms = now_ms();
        }

        debug!(
            "Reconciled nonce state: chain={:?} actual={} next={}",
            chain_nonce, actual_nonce, next
        );
        Ok(next)
    }

    /// Force a full refresh, for post-rotation and INVALID_NONCE recovery.
    pub async fn refresh_now(&self, clear_reservations: bool) -> Result<TransactionContext, String> {
        if clear_reservations {
            // last_reserved is kept: issued nonces stay burned so a recovery
            // never re-issues a nonce already handed out this session.
            self.state.borrow_mut().reserved.clear();
        }
        self.get_nonce_block_hash_and_height(true).await
    }

    // === INTERNAL ===

    fn identity(&self) -> Result<(String, String), String> {
        let state = self.state.borrow();
        match (&state.account_id, &state.public_key) {
            (Some(a), Some(p)) => Ok((a.clone(), p.clone())),
            _ => Err("Nonce manager is not initialized".to_string()),
        }
    }

    /// Join an in-flight fetch that covers the requested fields, or start a
    /// new one. A narrower in-flight fetch (say, a block-only prefetch) is
    /// never joined by a caller that also needs the nonce; the new fetch is
    /// widened to the union so later callers can still share it.
    async fn coalesced_fetch(
        &self,
        account_id: String,
        public_key: String,
        fetch_nonce: bool,
        fetch_block: bool,
    ) -> Result<FetchedChainData, String> {
        let (shared, generation) = {
            let mut slot = self.inflight_fetch.borrow_mut();
            let inflight = slot.as_ref().map(|f| (f.covers_nonce, f.covers_block));
            match plan_fetch(inflight, fetch_nonce, fetch_block) {
                None => {
                    let existing = slot.as_ref().expect("join requires an in-flight fetch");
                    (existing.future.clone(), existing.generation)
                }
                Some((covers_nonce, covers_block)) => {
                    let generation = self.fetch_generation.get() + 1;
                    self.fetch_generation.set(generation);
                    let client = self.client.clone();
                    let fut = async move {
                        fetch_chain_data(client, account_id, public_key, covers_nonce, covers_block)
                            .await
                    }
                    .boxed_local()
                    .shared();
                    *slot = Some(InflightFetch {
                        covers_nonce,
                        covers_block,
                        generation,
                        future: fut.clone(),
                    });
                    (fut, generation)
                }
            }
        };

        let result = shared.await;
        // Only clear our own entry; a wider fetch may have replaced it.
        let mut slot = self.inflight_fetch.borrow_mut();
        if slot.as_ref().map(|f| f.generation) == Some(generation) {
            *slot = None;
        }
        result
    }

    fn apply_fetched(&self, fetched: FetchedChainData) {
        let mut state = self.state.borrow_mut();
        let now = now_ms();

        if let Some(nonce) = fetched.access_key_nonce {
            state.access_key_nonce = Some(nonce);
            state.nonce_fetched_at_ms = now;
            state.next_nonce = state.next_nonce.max(nonce + 1);
        }
        if let Some(hash) = fetched.block_hash {
            state.block_hash = Some(hash);
            state.block_height = fetched.block_height;
            state.block_fetched_at_ms = now;
        }
    }

    fn context_from_state(&self) -> Result<TransactionContext, String> {
        let state = self.state.borrow();

        let public_key = state
            .public_key
            .clone()
            .ok_or("Nonce manager is not initialized")?;
        let block_hash = state
            .block_hash
            .clone()
            .ok_or("Block hash is not available")?;
        let block_height = state.block_height.ok_or("Block height is not available")?;

        let chain_next = state.access_key_nonce.map(|n| n + 1).unwrap_or(1);
        let next_nonce = chain_next
            .max(state.next_nonce)
            .max(state.last_reserved + 1)
            .max(1);

        Ok(TransactionContext {
            near_public_key_str: public_key,
            next_nonce: next_nonce.to_string(),
            tx_block_height: block_height.to_string(),
            tx_block_hash: block_hash,
        })
    }
}

/// The actual RPC round trips for one refresh. Fetches only what the caller
/// marked stale.
async fn fetch_chain_data<T: RpcTransport>(
    client: Rc<NearRpcClient<T>>,
    account_id: String,
    public_key: String,
    fetch_nonce: bool,
    fetch_block: bool,
) -> Result<FetchedChainData, String> {
    let mut fetched = FetchedChainData {
        access_key_nonce: None,
        block_hash: None,
        block_height: None,
    };

    if fetch_nonce {
        let info = client.view_access_key(&account_id, &public_key).await?;
        fetched.access_key_nonce = info.get("nonce").and_then(|n| n.as_u64());
        if fetched.access_key_nonce.is_none() {
            return Err("Access key response is missing a nonce".to_string());
        }
    }

    if fetch_block {
        let block = client.block_final().await?;
        fetched.block_hash = block
            .pointer("/header/hash")
            .and_then(|h| h.as_str())
            .map(|s| s.to_string());
        fetched.block_height = block.pointer("/header/height").and_then(|h| h.as_u64());
        if fetched.block_hash.is_none() {
            return Err("Block response is missing a header hash".to_string());
        }
    }

    Ok(fetched)
}

#[cfg(test)]
mod tests {
    use super::plan_fetch;

    #[test]
    fn joins_only_a_fetch_that_covers_the_request() {
        // Full in-flight fetch covers everything.
        assert_eq!(plan_fetch(Some((true, true)), true, true), None);
        assert_eq!(plan_fetch(Some((true, true)), false, true), None);
        assert_eq!(plan_fetch(Some((true, true)), true, false), None);

        // Matching narrow fetches are joinable too.
        assert_eq!(plan_fetch(Some((false, true)), false, true), None);
        assert_eq!(plan_fetch(Some((true, false)), true, false), None);
    }

    #[test]
    fn forced_nonce_refresh_never_joins_a_block_only_prefetch() {
        // The INVALID_NONCE recovery scenario: a block-only prefetch is in
        // flight and a forced refresh needs the nonce. Joining would hand
        // back a stale nonce; a fresh fetch widened to the union starts
        // instead.
        assert_eq!(plan_fetch(Some((false, true)), true, true), Some((true, true)));
        assert_eq!(plan_fetch(Some((false, true)), true, false), Some((true, true)));

        // And the mirror image: a nonce-only fetch cannot satisfy a caller
        // that needs block data.
        assert_eq!(plan_fetch(Some((true, false)), false, true), Some((true, true)));
    }

    #[test]
    fn no_inflight_fetch_starts_with_exactly_the_requested_fields() {
        assert_eq!(plan_fetch(None, true, true), Some((true, true)));
        assert_eq!(plan_fetch(None, false, true), Some((false, true)));
        assert_eq!(plan_fetch(None, true, false), Some((true, false)));
    }
}
