use std::time::Duration;

use tokio::sync::mpsc;

use super::inner::{Event, TimerKind};

/// One-shot timers for the pool loop.
///
/// Every armed timer posts a [`Event::Timer`] back onto the loop when it
/// fires; the loop discards fires whose epoch no longer matches the slot, so
/// rearming is just bumping the slot's epoch and scheduling again.
pub(crate) struct Timers {
    events: mpsc::UnboundedSender<Event>,
}

impl Timers {
    pub(crate) fn new(events: mpsc::UnboundedSender<Event>) -> Timers {
        Timers { events }
    }

    pub(crate) fn schedule(&self, after: Duration, slot: usize, epoch: u64, kind: TimerKind) {
        let events = self.events.clone();
        tokio::spawn(async move {
            tokio::time::sleep(after).await;
            let _ = events.send(Event::Timer { slot, epoch, kind });
        });
    }
}
