//! A set of sync peers with their health bookkeeping.
//!
//! `PeerSet` only tracks peers and evicts unusable ones. Choosing which
//! blocks to ask which peer for is left to the caller.

use crate::{
    config::PeerConfig,
    error::{PeerError, PoolError, Result},
    metrics::PeerMetrics,
    peer::{OnFailure, PeerId, PeerRecord},
};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::{runtime::Handle, sync::mpsc};
use tracing::{debug, warn};

pub struct PeerSet {
    config: PeerConfig,
    peers: HashMap<PeerId, PeerRecord>,
    on_failure: OnFailure,
    failures_rx: mpsc::UnboundedReceiver<(PeerError, PeerId)>,
    metrics: PeerMetrics,
    runtime: Handle,
}

impl PeerSet {
    /// # Panics
    /// Outside a Tokio runtime; use [`with_runtime`](Self::with_runtime) there.
    pub fn new(config: PeerConfig, metrics: PeerMetrics) -> Self {
        Self::with_runtime(config, metrics, Handle::current())
    }

    /// Peer watchdogs are spawned on `runtime`.
    pub fn with_runtime(config: PeerConfig, metrics: PeerMetrics, runtime: Handle) -> Self {
        let (tx, failures_rx) = mpsc::unbounded_channel();
        let on_failure: OnFailure = Arc::new(move |err, id| {
            // Receiver gone means the set was dropped; nothing left to evict.
            let _ = tx.send((err, id));
        });
        Self { config, peers: HashMap::new(), on_failure, failures_rx, metrics, runtime }
    }

    pub fn config(&self) -> &PeerConfig {
        &self.config
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    pub fn contains(&self, id: &PeerId) -> bool {
        self.peers.contains_key(id)
    }

    pub fn peer(&self, id: &PeerId) -> Option<&PeerRecord> {
        self.peers.get(id)
    }

    pub fn peer_ids(&self) -> impl Iterator<Item = &PeerId> {
        self.peers.keys()
    }

    /// Highest height claimed by any tracked peer, 0 when empty.
    pub fn max_peer_height(&self) -> i64 {
        self.peers.values().map(PeerRecord::claimed_height).max().unwrap_or(0)
    }

    pub fn add_peer(&mut self, id: PeerId, claimed_height: i64) -> Result<()> {
        if self.peers.contains_key(&id) {
            return Err(PoolError::DuplicatePeer(id));
        }
        debug!(peer = %id, height = claimed_height, "adding sync peer");
        let record = PeerRecord::with_runtime(
            id.clone(),
            claimed_height,
            self.on_failure.clone(),
            self.config.clone(),
            self.runtime.clone(),
        );
        self.peers.insert(id, record);
        self.metrics.peers.set(self.peers.len() as i64);
        Ok(())
    }

    /// Drop `id` and release its watchdog and monitor. Returns false if the
    /// peer was not tracked.
    pub fn remove_peer(&mut self, id: &PeerId) -> bool {
        let Some(record) = self.peers.remove(id) else { return false };
        record.cleanup();
        debug!(peer = %id, pending = record.num_pending(), "removed sync peer");
        self.metrics.removed.inc();
        self.metrics.peers.set(self.peers.len() as i64);
        true
    }

    pub fn request_sent(&self, id: &PeerId) -> Result<()> {
        self.get(id)?.increment_pending();
        Ok(())
    }

    pub fn response_received(&self, id: &PeerId, bytes: u64) -> Result<()> {
        self.get(id)?.decrement_pending(bytes);
        Ok(())
    }

    /// Poll every peer and evict the slow and the timed out ones.
    pub fn remove_bad_peers(&mut self) -> Vec<(PeerId, PeerError)> {
        let bad: Vec<(PeerId, PeerError)> = self
            .peers
            .values()
            .filter_map(|p| {
                if p.did_timeout() {
                    return Some((p.id().clone(), PeerError::NoResponse));
                }
                p.is_good().err().map(|e| (p.id().clone(), e))
            })
            .collect();
        for (id, err) in &bad {
            self.evict(id, *err);
        }
        bad
    }

    /// Wait for the next failure reported by a peer's watchdog.
    pub async fn next_failure(&mut self) -> Option<(PeerError, PeerId)> {
        self.failures_rx.recv().await
    }

    pub fn try_next_failure(&mut self) -> Option<(PeerError, PeerId)> {
        self.failures_rx.try_recv().ok()
    }

    /// Evict the peer a failure was reported for. Returns false if it had
    /// already been removed.
    pub fn handle_failure(&mut self, err: PeerError, id: &PeerId) -> bool {
        self.evict(id, err)
    }

    fn evict(&mut self, id: &PeerId, err: PeerError) -> bool {
        if !self.contains(id) {
            return false;
        }
        match err {
            PeerError::NoResponse => self.metrics.timeouts.inc(),
            PeerError::SlowPeer => self.metrics.slow_peers.inc(),
        }
        warn!(peer = %id, error = %err, "evicting sync peer");
        self.remove_peer(id)
    }

    fn get(&self, id: &PeerId) -> Result<&PeerRecord> {
        self.peers.get(id).ok_or_else(|| PoolError::UnknownPeer(id.clone()))
    }
}

impl Drop for PeerSet {
    fn drop(&mut self) {
        for record in self.peers.values() {
            record.cleanup();
        }
    }
}
