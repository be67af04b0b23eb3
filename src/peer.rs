//! Health tracking for one sync peer.

use crate::{
    config::PeerConfig,
    error::PeerError,
    flowrate::RateMonitor,
    watchdog::{Ticket, Watchdog},
};
use rand::RngCore;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tokio::runtime::Handle;

/// Opaque identity of a remote peer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerId(String);

impl PeerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Random 12-hex-character id.
    pub fn random() -> Self {
        let mut bytes = [0u8; 6];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(hex::encode(bytes))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PeerId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Failure reporter shared by every peer of a pool. May be called from many
/// watchdog tasks at once.
pub type OnFailure = Arc<dyn Fn(PeerError, PeerId) + Send + Sync>;

#[derive(Debug, Default)]
struct PeerState {
    num_pending: u32,
    did_timeout: bool,
    removed: bool,
    recv_monitor: Option<RateMonitor>,
    watchdog: Option<Watchdog>,
}

struct Inner {
    id: PeerId,
    claimed_height: i64,
    config: PeerConfig,
    on_failure: OnFailure,
    runtime: Handle,
    state: Mutex<PeerState>,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, PeerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Request accounting, response watchdog and receive-rate monitor for one
/// peer.
///
/// Lifecycle: `Idle` (nothing pending, watchdog disarmed) → `Awaiting`
/// (requests pending, watchdog armed) → back to `Idle` once everything is
/// answered, or timed out if the watchdog fires first. [`cleanup`] releases
/// everything from any state.
///
/// [`cleanup`]: PeerRecord::cleanup
pub struct PeerRecord {
    inner: Arc<Inner>,
}

impl fmt::Debug for PeerRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.lock();
        f.debug_struct("PeerRecord")
            .field("id", &self.inner.id)
            .field("claimed_height", &self.inner.claimed_height)
            .field("num_pending", &state.num_pending)
            .field("did_timeout", &state.did_timeout)
            .finish()
    }
}

impl PeerRecord {
    /// # Panics
    /// Must be called from within a Tokio runtime; the watchdog runs there.
    /// Use [`with_runtime`](Self::with_runtime) from synchronous code.
    pub fn new(id: PeerId, claimed_height: i64, on_failure: OnFailure, config: PeerConfig) -> Self {
        Self::with_runtime(id, claimed_height, on_failure, config, Handle::current())
    }

    /// Like [`new`](Self::new), with the watchdog spawned on `runtime`.
    pub fn with_runtime(
        id: PeerId,
        claimed_height: i64,
        on_failure: OnFailure,
        config: PeerConfig,
        runtime: Handle,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                id,
                claimed_height,
                config,
                on_failure,
                runtime,
                state: Mutex::new(PeerState::default()),
            }),
        }
    }

    pub fn id(&self) -> &PeerId {
        &self.inner.id
    }

    pub fn claimed_height(&self) -> i64 {
        self.inner.claimed_height
    }

    pub fn config(&self) -> &PeerConfig {
        &self.inner.config
    }

    pub fn num_pending(&self) -> u32 {
        self.inner.lock().num_pending
    }

    pub fn did_timeout(&self) -> bool {
        self.inner.lock().did_timeout
    }

    pub fn has_monitor(&self) -> bool {
        self.inner.lock().recv_monitor.is_some()
    }

    pub fn has_watchdog(&self) -> bool {
        self.inner.lock().watchdog.is_some()
    }

    /// Record one new outstanding request.
    ///
    /// Coming out of idle restarts the rate monitor and arms the watchdog.
    /// Further requests leave an armed watchdog's deadline alone.
    pub fn increment_pending(&self) {
        let mut state = self.inner.lock();
        if state.num_pending == 0 {
            reset_monitor(&self.inner, &mut state);
            reset_timeout(&self.inner, &mut state);
        }
        state.num_pending += 1;
    }

    /// Record one answered request carrying `recv_size` bytes.
    ///
    /// # Panics
    /// If nothing is pending: the response belongs to a request this peer
    /// was never sent.
    pub fn decrement_pending(&self, recv_size: u64) {
        let mut state = self.inner.lock();
        if state.num_pending == 0 {
            drop(state);
            panic!("peer {}: cannot decrement, no pending requests", self.inner.id);
        }
        if let Some(monitor) = state.recv_monitor.as_mut() {
            monitor.update(recv_size);
        }
        state.num_pending -= 1;
        if state.num_pending == 0 {
            if let Some(watchdog) = state.watchdog.as_mut() {
                watchdog.disarm();
            }
        } else {
            reset_timeout(&self.inner, &mut state);
        }
    }

    /// `Err(SlowPeer)` once the smoothed receive rate drops below the
    /// configured minimum. A monitor still in its grace period reports 0 and
    /// is never slow.
    pub fn is_good(&self) -> Result<(), PeerError> {
        let mut state = self.inner.lock();
        let Some(monitor) = state.recv_monitor.as_mut() else { return Ok(()) };
        let cur_rate = monitor.current_rate();
        if cur_rate != 0 && cur_rate < self.inner.config.min_recv_rate {
            return Err(PeerError::SlowPeer);
        }
        Ok(())
    }

    /// Current smoothed receive rate, if a monitor exists.
    pub fn recv_rate(&self) -> Option<i64> {
        self.inner.lock().recv_monitor.as_mut().map(RateMonitor::current_rate)
    }

    /// Stop the response watchdog. Returns whether it was running.
    pub fn stop_watchdog(&self) -> bool {
        self.inner.lock().watchdog.as_mut().map_or(false, Watchdog::disarm)
    }

    /// Release the watchdog and rate monitor. Once this returns no failure
    /// can be reported for this peer unless the watchdog had already fired.
    pub fn cleanup(&self) {
        let mut state = self.inner.lock();
        if let Some(mut watchdog) = state.watchdog.take() {
            watchdog.disarm();
        }
        state.recv_monitor = None;
        state.removed = true;
    }
}

fn reset_monitor(inner: &Inner, state: &mut PeerState) {
    if state.removed {
        return;
    }
    let cfg = &inner.config;
    let mut monitor = RateMonitor::new(cfg.sample_rate(), cfg.window_size());
    // Start well above the minimum so a new peer isn't judged before it has
    // had a chance to deliver.
    monitor.set_rema(cfg.min_recv_rate as f64 * std::f64::consts::E);
    state.recv_monitor = Some(monitor);
}

fn reset_timeout(inner: &Arc<Inner>, state: &mut PeerState) {
    if state.removed {
        return;
    }
    let weak = Arc::downgrade(inner);
    state
        .watchdog
        .get_or_insert_with(|| Watchdog::new(inner.runtime.clone()))
        .arm(inner.config.timeout(), move |ticket| on_timeout(weak, ticket));
}

fn on_timeout(weak: Weak<Inner>, ticket: Ticket) {
    let Some(inner) = weak.upgrade() else { return };
    {
        let mut state = inner.lock();
        let fired = state.watchdog.as_mut().map_or(false, |w| w.claim(ticket));
        if !fired {
            return;
        }
        state.did_timeout = true;
    }
    (inner.on_failure)(PeerError::NoResponse, inner.id.clone());
}
