use anyhow::Result;
use prometheus::{Encoder, IntCounter, IntGauge, Registry, TextEncoder};
use std::thread;

/// Counters kept by a [`crate::pool::PeerSet`].
#[derive(Clone, Debug)]
pub struct PeerMetrics {
    pub peers: IntGauge,
    pub timeouts: IntCounter,
    pub slow_peers: IntCounter,
    pub removed: IntCounter,
}

impl PeerMetrics {
    pub fn new(registry: &Registry) -> Result<Self> {
        // Prefix metrics with `fastsync_` for namespacing.
        let peers = IntGauge::new("fastsync_peer_count", "Peers tracked for block sync")?;
        let timeouts = IntCounter::new("fastsync_peer_timeouts_total", "Peers that stopped answering requests")?;
        let slow_peers = IntCounter::new("fastsync_slow_peers_total", "Peers evicted for low receive rate")?;
        let removed = IntCounter::new("fastsync_peers_removed_total", "Peers removed from the sync set")?;
        registry.register(Box::new(peers.clone()))?;
        registry.register(Box::new(timeouts.clone()))?;
        registry.register(Box::new(slow_peers.clone()))?;
        registry.register(Box::new(removed.clone()))?;
        Ok(Self { peers, timeouts, slow_peers, removed })
    }

    /// Metrics that are counted but not exported anywhere.
    pub fn unregistered() -> Result<Self> {
        Self::new(&Registry::new())
    }
}

/// Serve `registry` in the text exposition format from a background thread.
pub fn serve(bind: &str, registry: Registry) -> Result<()> {
    let server = tiny_http::Server::http(bind)
        .map_err(|e| anyhow::anyhow!("could not start metrics server on {bind}: {e}"))?;
    let content_type: tiny_http::Header = "Content-Type: text/plain; version=0.0.4; charset=utf-8"
        .parse()
        .map_err(|_| anyhow::anyhow!("invalid content-type header"))?;

    thread::spawn(move || {
        for request in server.incoming_requests() {
            let mut buffer = vec![];
            let encoder = TextEncoder::new();
            if let Err(e) = encoder.encode(&registry.gather(), &mut buffer) {
                tracing::warn!("could not encode metrics: {e}");
                continue;
            }
            let response = tiny_http::Response::from_data(buffer).with_header(content_type.clone());
            let _ = request.respond(response);
        }
    });

    Ok(())
}
