use std::collections::VecDeque;

use log::{debug, trace};
use tokio::sync::{mpsc, oneshot};

use crate::body::Body;
use crate::config::Config;
use crate::connect::{Connect, Connection, FlowEvent};
use crate::error::{BoxError, Error};

use super::backoff::Backoff;
use super::sequence::{Completion, Sequencer};
use super::slot::Slot;
use super::timer::Timers;
use super::Incoming;

/// Everything that can happen to the pool, serialized onto one channel.
///
/// Connection futures, flow forwarders, body/entity instrumentation and
/// timers all post here; the loop is the only place state changes.
pub(crate) enum Event {
    ConnectFinished {
        slot: usize,
        generation: u64,
        result: Result<Connection, BoxError>,
    },
    Flow {
        slot: usize,
        generation: u64,
        event: FlowEvent,
    },
    RequestBody {
        slot: usize,
        seq: u64,
        event: BodyEvent,
    },
    Entity {
        slot: usize,
        seq: u64,
        event: EntityEvent,
    },
    Timer {
        slot: usize,
        epoch: u64,
        kind: TimerKind,
    },
    Shutdown {
        done: oneshot::Sender<()>,
    },
}

/// Progress of a streamed request body on the wire.
pub(crate) enum BodyEvent {
    /// A first chunk was pulled; the request is no longer replayable.
    Observed,
    Completed,
    /// The user's stream yielded an error.
    Failed(BoxError),
    /// The connection dropped the body before the end.
    Aborted,
}

/// Progress of a response entity at its consumer.
pub(crate) enum EntityEvent {
    Subscribed,
    Drained,
    Failed,
    Dropped,
}

#[derive(Clone, Copy, Debug)]
pub(crate) enum TimerKind {
    Backoff,
    KeepAlive,
    SubscriptionTimeout,
}

/// An admitted request, carrying its place in the output order.
pub(crate) struct RequestContext {
    pub(crate) seq: u64,
    pub(crate) retries_left: u32,
    pub(crate) request: http::Request<Body>,
    pub(crate) completion: Completion,
}

/// The loop's shared services, split from the slots so a slot handler can
/// borrow both at once.
pub(crate) struct Ctx {
    pub(crate) events: mpsc::UnboundedSender<Event>,
    pub(crate) timers: Timers,
    pub(crate) sequencer: Sequencer,
    /// Requests waiting for a slot: requeued retries first, raced
    /// admissions behind them.
    pub(crate) retries: VecDeque<RequestContext>,
    pub(crate) backoff: Backoff,
    pub(crate) config: Config,
}

enum Choice {
    Idle(usize),
    Connecting(usize),
    Unconnected(usize),
}

pub(crate) struct PoolLoop<C> {
    connector: C,
    slots: Vec<Slot>,
    incoming: mpsc::Receiver<Incoming>,
    events_rx: mpsc::UnboundedReceiver<Event>,
    ctx: Ctx,
    next_seq: u64,
    intake_closed: bool,
    stopped: bool,
}

impl<C: Connect> PoolLoop<C> {
    pub(crate) fn new(
        config: Config,
        connector: C,
        incoming: mpsc::Receiver<Incoming>,
        events_tx: mpsc::UnboundedSender<Event>,
        events_rx: mpsc::UnboundedReceiver<Event>,
    ) -> PoolLoop<C> {
        let slots = (0..config.max_connections).map(Slot::new).collect();
        let backoff = Backoff::new(
            config.base_connection_backoff,
            config.max_connection_backoff,
        );
        PoolLoop {
            connector,
            slots,
            incoming,
            events_rx,
            ctx: Ctx {
                events: events_tx.clone(),
                timers: Timers::new(events_tx),
                sequencer: Sequencer::new(),
                retries: VecDeque::new(),
                backoff,
                config,
            },
            next_seq: 0,
            intake_closed: false,
            stopped: false,
        }
    }

    pub(crate) async fn run(mut self) {
        trace!(
            "pool loop started ({} slots, {} warm)",
            self.slots.len(),
            self.ctx.config.min_connections
        );
        loop {
            self.pump();
            self.drain_releases();
            if self.stopped || self.finished() {
                break;
            }
            let can_accept = !self.intake_closed && self.pick_slot().is_some();
            tokio::select! {
                biased;
                event = self.events_rx.recv() => {
                    match event {
                        Some(event) => self.handle_event(event),
                        // Unreachable while the loop holds a sender clone,
                        // but do not spin if it somehow closes.
                        None => return,
                    }
                    self.drain_releases();
                }
                incoming = self.incoming.recv(), if can_accept => {
                    match incoming {
                        Some(incoming) => {
                            self.admit(incoming);
                            self.drain_releases();
                        }
                        None => {
                            trace!("all pool handles dropped, draining in-flight work");
                            self.intake_closed = true;
                        }
                    }
                }
            }
        }
        trace!("pool loop finished");
    }

    /// Match waiting work and the warm floor against available slots.
    fn pump(&mut self) {
        while !self.ctx.retries.is_empty() {
            match self.pick_slot() {
                Some(choice) => {
                    let req = self
                        .ctx
                        .retries
                        .pop_front()
                        .expect("checked non-empty above");
                    self.dispatch_to(choice, req);
                }
                None => break,
            }
        }
        if !self.intake_closed {
            while self.alive_slots() < self.ctx.config.min_connections {
                match self.slots.iter().position(Slot::is_unconnected) {
                    Some(index) => self.begin_connect(index, None),
                    None => break,
                }
            }
        }
    }

    fn alive_slots(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_alive()).count()
    }

    fn pick_slot(&self) -> Option<Choice> {
        if let Some(index) = self.slots.iter().position(Slot::is_idle) {
            return Some(Choice::Idle(index));
        }
        if let Some(index) = self.slots.iter().position(Slot::is_connecting_unassigned) {
            return Some(Choice::Connecting(index));
        }
        if let Some(index) = self.slots.iter().position(Slot::is_unconnected) {
            return Some(Choice::Unconnected(index));
        }
        None
    }

    fn dispatch_to(&mut self, choice: Choice, req: RequestContext) {
        match choice {
            Choice::Idle(index) => self.slots[index].dispatch(&mut self.ctx, req),
            Choice::Connecting(index) => self.slots[index].assign(&mut self.ctx, req),
            Choice::Unconnected(index) => self.begin_connect(index, Some(req)),
        }
    }

    fn admit(&mut self, incoming: Incoming) {
        let Incoming {
            request,
            retries,
            completion,
        } = incoming;
        let seq = self.next_seq;
        self.next_seq += 1;
        trace!(
            "admitted {} {} as seq {} ({} retries)",
            request.method(),
            request.uri().path(),
            seq,
            retries
        );
        let req = RequestContext {
            seq,
            retries_left: retries,
            request,
            completion,
        };
        match self.pick_slot() {
            Some(choice) => self.dispatch_to(choice, req),
            // The slot vanished between the guard and now; wait in line.
            None => self.ctx.retries.push_back(req),
        }
    }

    fn begin_connect(&mut self, index: usize, assigned: Option<RequestContext>) {
        let slot = &mut self.slots[index];
        slot.set_connecting(assigned);
        let generation = slot.generation;
        trace!("slot {index}: connecting (generation {generation})");
        let fut = self.connector.connect();
        let events = self.ctx.events.clone();
        tokio::spawn(async move {
            let result = fut.await;
            let _ = events.send(Event::ConnectFinished {
                slot: index,
                generation,
                result,
            });
        });
    }

    fn handle_event(&mut self, event: Event) {
        match event {
            Event::ConnectFinished {
                slot,
                generation,
                result,
            } => {
                let slot = &mut self.slots[slot];
                if slot.generation == generation {
                    slot.on_connect_finished(&mut self.ctx, result);
                }
                // Otherwise a stale attempt resolved; dropping the result
                // releases the connection, if there was one.
            }
            Event::Flow {
                slot,
                generation,
                event,
            } => {
                let slot = &mut self.slots[slot];
                if slot.generation == generation {
                    slot.on_flow(&mut self.ctx, event);
                }
            }
            Event::RequestBody { slot, seq, event } => {
                let slot = &mut self.slots[slot];
                if slot.current_seq() == Some(seq) {
                    slot.on_request_body(&mut self.ctx, event);
                }
            }
            Event::Entity { slot, seq, event } => {
                let slot = &mut self.slots[slot];
                if slot.current_seq() == Some(seq) {
                    slot.on_entity(&mut self.ctx, event);
                }
            }
            Event::Timer { slot, epoch, kind } => {
                let slot = &mut self.slots[slot];
                if slot.timer_epoch == epoch {
                    slot.on_timer(&mut self.ctx, kind);
                }
            }
            Event::Shutdown { done } => {
                self.force_shutdown();
                let _ = done.send(());
            }
        }
    }

    fn drain_releases(&mut self) {
        for released in self.ctx.sequencer.take_released() {
            if let Some(index) = released.slot {
                self.slots[index].on_response_released(&mut self.ctx, released.seq);
            }
        }
    }

    fn finished(&self) -> bool {
        self.intake_closed
            && self.ctx.retries.is_empty()
            && self.ctx.sequencer.is_empty()
            && self.slots.iter().all(|slot| !slot.is_busy())
    }

    fn force_shutdown(&mut self) {
        debug!("pool shutting down, failing in-flight requests");
        self.incoming.close();
        while let Ok(incoming) = self.incoming.try_recv() {
            let _ = incoming.completion.send(Err(Error::shutdown()));
        }
        let waiting: Vec<RequestContext> = self.ctx.retries.drain(..).collect();
        for req in waiting {
            self.ctx
                .sequencer
                .reject(req.seq, req.completion, Error::shutdown());
        }
        for index in 0..self.slots.len() {
            self.slots[index].shutdown(&mut self.ctx);
        }
        self.ctx.sequencer.flush();
        self.intake_closed = true;
        self.stopped = true;
    }
}
