use std::collections::BTreeMap;
use std::mem;

use tokio::sync::oneshot;

use crate::entity::Entity;
use crate::error::{Error, Result};

pub(crate) type Completion = oneshot::Sender<Result<http::Response<Entity>>>;

/// Restores admission order on the pool output.
///
/// Slots complete exchanges in whatever order their connections finish; the
/// sequencer holds each outcome until every earlier sequence number has been
/// released, then fulfills the completion handles strictly in order.
pub(crate) struct Sequencer {
    next_emit: u64,
    pending: BTreeMap<u64, Pending>,
    released: Vec<Released>,
}

struct Pending {
    completion: Completion,
    result: Result<http::Response<Entity>>,
    watch: Option<usize>,
}

/// A response that just went downstream.
pub(crate) struct Released {
    pub(crate) seq: u64,
    /// The slot to notify, for responses whose entity gates slot reuse.
    pub(crate) slot: Option<usize>,
}

impl Sequencer {
    pub(crate) fn new() -> Sequencer {
        Sequencer {
            next_emit: 0,
            pending: BTreeMap::new(),
            released: Vec::new(),
        }
    }

    /// Record the outcome for `seq` and release everything now in order.
    ///
    /// `watch` names the slot to notify once the response actually goes
    /// downstream; pass it only when the slot waits on entity consumption.
    pub(crate) fn complete(
        &mut self,
        seq: u64,
        completion: Completion,
        result: Result<http::Response<Entity>>,
        watch: Option<usize>,
    ) {
        self.pending.insert(
            seq,
            Pending {
                completion,
                result,
                watch,
            },
        );
        while let Some(pending) = self.pending.remove(&self.next_emit) {
            let seq = self.next_emit;
            self.next_emit += 1;
            // If the caller dropped its future the response (and entity) is
            // dropped here, which releases the slot through the entity gate.
            let _ = pending.completion.send(pending.result);
            self.released.push(Released {
                seq,
                slot: pending.watch,
            });
        }
    }

    pub(crate) fn take_released(&mut self) -> Vec<Released> {
        mem::take(&mut self.released)
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Send every held outcome regardless of order gaps; used on shutdown.
    pub(crate) fn flush(&mut self) {
        for (_, pending) in mem::take(&mut self.pending) {
            let _ = pending.completion.send(pending.result);
        }
        self.released.clear();
    }

    /// Fail an admitted request that never reached a slot.
    pub(crate) fn reject(&mut self, seq: u64, completion: Completion, error: Error) {
        self.complete(seq, completion, Err(error), None);
    }
}
