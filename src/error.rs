//! Failure classifications reported for tracked peers.

use crate::peer::PeerId;
use thiserror::Error;

/// Why a peer should no longer be used for sync.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerError {
    /// An outstanding request went unanswered for the whole response timeout.
    #[error("peer did not send us anything")]
    NoResponse,

    /// The smoothed receive rate fell below the configured minimum.
    #[error("peer is not sending us data fast enough")]
    SlowPeer,
}

/// Errors from [`crate::pool::PeerSet`] bookkeeping.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PoolError {
    #[error("peer {0} is already tracked")]
    DuplicatePeer(PeerId),

    #[error("peer {0} is not tracked")]
    UnknownPeer(PeerId),
}

pub type Result<T> = std::result::Result<T, PoolError>;
