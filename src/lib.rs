// Peer health and flow control for block fast-sync.
// Tracks outstanding requests per peer, times out silent peers and flags
// slow ones for the pool manager to evict.

pub mod config;
pub mod error;
pub mod flowrate;
pub mod watchdog;
pub mod peer;
pub mod pool;
pub mod metrics;

pub use config::{Config, PeerConfig};
pub use error::{PeerError, PoolError};
pub use flowrate::{RateMonitor, RateStatus};
pub use peer::{OnFailure, PeerId, PeerRecord};
pub use pool::PeerSet;
pub use watchdog::Watchdog;
