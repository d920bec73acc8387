//! TID allocation and response correlation (§4.D).

use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU16, Ordering};

use dashmap::DashMap;
use tokio::sync::oneshot;

use crate::wire::{Esv, Eoj, Frame};

/// Outcome of awaiting a pending transaction's reply.
pub enum TransactionOutcome {
    Reply { from: SocketAddr, frame: Frame },
    Cancelled,
}

struct Entry {
    source_filter: Option<SocketAddr>,
    /// Expected SEOJ of the reply: the object the request's DEOJ
    /// named.
    object_filter: Eoj,
    expected_esv: Vec<Esv>,
    tx: oneshot::Sender<(SocketAddr, Frame)>,
}

/// Allocates TIDs and correlates inbound Format-1 frames to the
/// outbound request awaiting a reply.
pub struct TransactionTracker {
    next_tid: AtomicU16,
    pending: DashMap<u16, Entry>,
}

impl TransactionTracker {
    pub fn new() -> Self {
        Self {
            next_tid: AtomicU16::new(0),
            pending: DashMap::new(),
        }
    }

    /// Pre-increment with 16-bit wraparound: the returned TID is always
    /// the post-increment value, never the one handed out last time.
    pub fn next_tid(&self) -> u16 {
        let prev = self.next_tid.fetch_add(1, Ordering::Relaxed);
        prev.wrapping_add(1)
    }

    /// Register a pending transaction before the request is sent.
    /// Returns the receiver side; the sender is owned by the tracker
    /// until a matching reply arrives or the caller cancels.
    pub fn register(
        &self,
        tid: u16,
        source_filter: Option<SocketAddr>,
        object_filter: Eoj,
        expected_esv: Vec<Esv>,
    ) -> oneshot::Receiver<(SocketAddr, Frame)> {
        let (tx, rx) = oneshot::channel();
        self.pending.insert(
            tid,
            Entry {
                source_filter,
                object_filter,
                expected_esv,
                tx,
            },
        );
        rx
    }

    pub fn deregister(&self, tid: u16) -> bool {
        self.pending.remove(&tid).is_some()
    }

    /// Called from the receive path for every inbound Format-1 frame.
    /// Returns `true` if a pending transaction matched and was
    /// completed (consuming the frame); `false` if nothing was
    /// listening for it (the caller should fall through to the inbound
    /// service dispatcher, since unsolicited INF/SetI/etc. frames also
    /// arrive here).
    pub fn dispatch(&self, from: SocketAddr, tid: u16, seoj: Eoj, esv: Esv, frame: &Frame) -> bool {
        let removed = self.pending.remove_if(&tid, |_, entry| {
            let addr_ok = entry.source_filter.map(|want| want == from).unwrap_or(true);
            addr_ok && entry.object_filter == seoj && entry.expected_esv.contains(&esv)
        });
        match removed {
            Some((_, entry)) => entry.tx.send((from, frame.clone())).is_ok(),
            None => false,
        }
    }

    /// Await a pending transaction's reply, honoring `cancel`. On
    /// cancellation, deregisters the filter (so a subsequent matching
    /// frame does not complete this slot) and resolves `Cancelled`.
    /// Resolving the receiver first makes cancellation afterward a
    /// no-op, since `select!` only runs one branch.
    pub async fn await_reply(
        &self,
        tid: u16,
        rx: oneshot::Receiver<(SocketAddr, Frame)>,
        cancel: impl Future<Output = ()>,
    ) -> TransactionOutcome {
        tokio::select! {
            result = rx => match result {
                Ok((from, frame)) => TransactionOutcome::Reply { from, frame },
                Err(_) => TransactionOutcome::Cancelled,
            },
            _ = cancel => {
                self.deregister(tid);
                TransactionOutcome::Cancelled
            }
        }
    }
}

impl Default for TransactionTracker {
    fn default() -> Self {
        Self::new()
    }
}
