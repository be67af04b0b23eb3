//! Cancellable single-shot response alarm backed by a Tokio timer task.
//!
//! The watchdog never touches its owner's state itself. On expiry it hands
//! the arm's [`Ticket`] to the callback, and the callback must [`claim`] the
//! ticket under the same lock that guards the watchdog before acting. A
//! disarm or re-arm that got the lock first invalidates the ticket, so a
//! racing expiry and cancellation always resolve to exactly one outcome.
//!
//! [`claim`]: Watchdog::claim

use std::time::Duration;
use tokio::{runtime::Handle, task::JoinHandle, time::Instant};

/// Identifies one arm cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ticket(u64);

#[derive(Debug)]
pub struct Watchdog {
    handle: Handle,
    generation: u64,
    pending: Option<JoinHandle<()>>,
}

impl Watchdog {
    pub fn new(handle: Handle) -> Self {
        Self { handle, generation: 0, pending: None }
    }

    /// Schedule `on_expire` to run once after `after`. Any earlier schedule
    /// is cancelled first.
    pub fn arm<F>(&mut self, after: Duration, on_expire: F)
    where
        F: FnOnce(Ticket) + Send + 'static,
    {
        self.disarm();
        let ticket = Ticket(self.generation);
        // Deadline counts from now, not from when the task is first polled.
        let deadline = Instant::now() + after;
        self.pending = Some(self.handle.spawn(async move {
            tokio::time::sleep_until(deadline).await;
            on_expire(ticket);
        }));
    }

    /// Cancel a pending expiry. Returns whether one was pending.
    pub fn disarm(&mut self) -> bool {
        self.generation = self.generation.wrapping_add(1);
        match self.pending.take() {
            Some(task) => {
                task.abort();
                true
            }
            None => false,
        }
    }

    /// Consume the expiry for `ticket`. Returns false when the arm cycle it
    /// belongs to was cancelled or replaced.
    pub fn claim(&mut self, ticket: Ticket) -> bool {
        if ticket.0 != self.generation || self.pending.is_none() {
            return false;
        }
        // Detach rather than abort: the caller is running inside this task.
        self.pending = None;
        true
    }

    pub fn is_armed(&self) -> bool {
        self.pending.is_some()
    }
}

impl Drop for Watchdog {
    fn drop(&mut self) {
        if let Some(task) = self.pending.take() {
            task.abort();
        }
    }
}
