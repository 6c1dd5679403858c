use std::mem;
use std::time::Duration;

use http::header::CONNECTION;
use http::{HeaderMap, Method, StatusCode};
use log::{debug, trace, warn};
use tokio::sync::{mpsc, oneshot};

use crate::body::{Body, BodySummary, OutgoingBody};
use crate::connect::{Connection, ConnectionInfo, FlowEvent};
use crate::entity;
use crate::error::{BoxError, Error};

use super::inner::{BodyEvent, Ctx, EntityEvent, Event, RequestContext, TimerKind};
use super::sequence::Completion;

/// One lane of the pool: owns at most one connection and serves at most one
/// in-flight request at a time.
///
/// All transitions run on the pool loop, one event at a time. Events from
/// connections, timers and entity consumers are tagged with the generation,
/// sequence number or epoch they belong to, and the loop drops anything
/// stale before it reaches the slot, so every handler here only has to
/// consider events for the connection and exchange it currently owns.
pub(crate) struct Slot {
    pub(crate) index: usize,
    pub(crate) state: State,
    /// Bumped for every connection attempt; events carry the generation
    /// they were produced under.
    pub(crate) generation: u64,
    /// Bumped whenever an armed timer becomes irrelevant.
    pub(crate) timer_epoch: u64,
    /// Consecutive failed connect attempts on this slot.
    pub(crate) attempts: u32,
}

pub(crate) enum State {
    /// No connection, no request.
    Unconnected,
    /// A connect attempt is in flight, possibly with a request waiting on
    /// its outcome.
    Connecting { assigned: Option<RequestContext> },
    /// Connection established, nothing in flight.
    Idle { conn: ConnTx },
    /// Request written, awaiting the response head.
    WaitingForResponse { conn: ConnTx, exchange: Exchange },
    /// Response handed downstream, awaiting the consumer's first read of
    /// the entity.
    WaitingForResponseEntitySubscription { conn: ConnTx, exchange: Exchange },
    /// Entity subscribed and streaming.
    WaitingForEndOfResponseEntity { conn: ConnTx, exchange: Exchange },
    /// Response fully consumed but the request body upload is still going.
    WaitingForEndOfRequestEntity { conn: ConnTx, exchange: Exchange },
    /// The last connect attempt failed; waiting out the backoff delay.
    Failed,
}

/// The write half of the slot's current connection.
pub(crate) struct ConnTx {
    requests: mpsc::Sender<http::Request<OutgoingBody>>,
    opened_at: tokio::time::Instant,
}

/// Everything the slot tracks about the request it is serving.
pub(crate) struct Exchange {
    seq: u64,
    retries_left: u32,
    /// A replayable copy of the request; present only for strict bodies.
    retry_copy: Option<http::Request<Body>>,
    /// Present until the response (or a terminal error) went to the
    /// sequencer.
    completion: Option<Completion>,
    method: Method,
    path: String,
    req_summary: BodySummary,
    req_body_done: bool,
    /// A chunk of the streamed request body was pulled onto the wire; the
    /// request can no longer be replayed safely.
    req_body_observed: bool,
    response: Option<ResponseMeta>,
    /// Lets the slot fail the entity stream after handing it downstream.
    entity_abort: Option<oneshot::Sender<Error>>,
    /// The response asked for the connection not to be reused.
    close_after: bool,
}

struct ResponseMeta {
    status: StatusCode,
    summary: BodySummary,
}

// ===== impl Slot =====

impl Slot {
    pub(crate) fn new(index: usize) -> Slot {
        Slot {
            index,
            state: State::Unconnected,
            generation: 0,
            timer_epoch: 0,
            attempts: 0,
        }
    }

    pub(crate) fn is_idle(&self) -> bool {
        matches!(self.state, State::Idle { .. })
    }

    pub(crate) fn is_unconnected(&self) -> bool {
        matches!(self.state, State::Unconnected)
    }

    pub(crate) fn is_connecting_unassigned(&self) -> bool {
        matches!(self.state, State::Connecting { assigned: None })
    }

    /// True for states that count toward the warm-connection floor.
    pub(crate) fn is_alive(&self) -> bool {
        !matches!(
            self.state,
            State::Unconnected | State::Failed
        )
    }

    /// True when the slot is working on a request.
    pub(crate) fn is_busy(&self) -> bool {
        match self.state {
            State::Connecting { ref assigned } => assigned.is_some(),
            State::Unconnected | State::Idle { .. } | State::Failed => false,
            _ => true,
        }
    }

    pub(crate) fn current_seq(&self) -> Option<u64> {
        self.exchange().map(|exchange| exchange.seq)
    }

    pub(crate) fn bump_epoch(&mut self) {
        self.timer_epoch += 1;
    }

    fn exchange(&self) -> Option<&Exchange> {
        match &self.state {
            State::WaitingForResponse { exchange, .. }
            | State::WaitingForResponseEntitySubscription { exchange, .. }
            | State::WaitingForEndOfResponseEntity { exchange, .. }
            | State::WaitingForEndOfRequestEntity { exchange, .. } => Some(exchange),
            _ => None,
        }
    }

    fn exchange_mut(&mut self) -> Option<&mut Exchange> {
        match &mut self.state {
            State::WaitingForResponse { exchange, .. }
            | State::WaitingForResponseEntitySubscription { exchange, .. }
            | State::WaitingForEndOfResponseEntity { exchange, .. }
            | State::WaitingForEndOfRequestEntity { exchange, .. } => Some(exchange),
            _ => None,
        }
    }

    fn state_name(&self) -> &'static str {
        match self.state {
            State::Unconnected => "Unconnected",
            State::Connecting { .. } => "Connecting",
            State::Idle { .. } => "Idle",
            State::WaitingForResponse { .. } => "WaitingForResponse",
            State::WaitingForResponseEntitySubscription { .. } => {
                "WaitingForResponseEntitySubscription"
            }
            State::WaitingForEndOfResponseEntity { .. } => "WaitingForEndOfResponseEntity",
            State::WaitingForEndOfRequestEntity { .. } => "WaitingForEndOfRequestEntity",
            State::Failed => "Failed",
        }
    }

    pub(crate) fn set_connecting(&mut self, assigned: Option<RequestContext>) {
        self.generation += 1;
        self.bump_epoch();
        self.state = State::Connecting { assigned };
    }

    /// Attach a request to a connect attempt already in flight.
    pub(crate) fn assign(&mut self, ctx: &mut Ctx, req: RequestContext) {
        match &mut self.state {
            State::Connecting { assigned } if assigned.is_none() => {
                trace!(
                    "slot {}: request (seq {}) joins the pending connect",
                    self.index,
                    req.seq
                );
                *assigned = Some(req);
            }
            _ => ctx.retries.push_front(req),
        }
    }

    // ===== connecting =====

    pub(crate) fn on_connect_finished(
        &mut self,
        ctx: &mut Ctx,
        result: Result<Connection, BoxError>,
    ) {
        let assigned = match mem::replace(&mut self.state, State::Unconnected) {
            State::Connecting { assigned } => assigned,
            other => {
                // The slot moved on (e.g. shutdown) while the attempt was
                // resolving; whatever we got is of no use anymore.
                self.state = other;
                return;
            }
        };
        match result {
            Ok(connection) => {
                self.attempts = 0;
                ctx.backoff.reset();
                let conn = self.adopt(ctx, connection);
                debug!(
                    "slot {}: connection established (generation {})",
                    self.index, self.generation
                );
                match assigned {
                    Some(req) => self.dispatch_on(ctx, conn, req),
                    None => self.enter_idle(ctx, conn),
                }
            }
            Err(cause) => {
                self.attempts += 1;
                let delay = ctx.backoff.next_delay();
                debug!(
                    "slot {}: connect attempt {} failed: {}; next attempt in {:?}",
                    self.index, self.attempts, cause, delay
                );
                if let Some(req) = assigned {
                    self.retry_or_fail(ctx, req, Error::connect(cause));
                }
                self.state = State::Failed;
                self.bump_epoch();
                ctx.timers
                    .schedule(delay, self.index, self.timer_epoch, TimerKind::Backoff);
            }
        }
    }

    /// Split an established connection and forward its events to the loop.
    fn adopt(&self, ctx: &Ctx, connection: Connection) -> ConnTx {
        let Connection {
            requests,
            mut events,
        } = connection;
        let forward = ctx.events.clone();
        let (slot, generation) = (self.index, self.generation);
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                if forward
                    .send(Event::Flow {
                        slot,
                        generation,
                        event,
                    })
                    .is_err()
                {
                    return;
                }
            }
            // Remote dropped without an explicit close.
            let _ = forward.send(Event::Flow {
                slot,
                generation,
                event: FlowEvent::Closed,
            });
        });
        ConnTx {
            requests,
            opened_at: tokio::time::Instant::now(),
        }
    }

    // ===== dispatch =====

    /// Dispatch a request onto this slot's idle connection.
    pub(crate) fn dispatch(&mut self, ctx: &mut Ctx, req: RequestContext) {
        match mem::replace(&mut self.state, State::Unconnected) {
            State::Idle { conn } => self.dispatch_on(ctx, conn, req),
            other => {
                debug_assert!(false, "dispatch on a non-idle slot");
                self.state = other;
                ctx.retries.push_front(req);
            }
        }
    }

    fn dispatch_on(&mut self, ctx: &mut Ctx, conn: ConnTx, req: RequestContext) {
        let RequestContext {
            seq,
            retries_left,
            request,
            completion,
        } = req;
        let retry_copy = try_clone_request(&request);
        let (parts, body) = request.into_parts();
        let method = parts.method.clone();
        let path = parts.uri.path().to_string();
        let req_summary = body.summary();
        let (wire_body, upload_done) = body.into_outgoing(&ctx.events, self.index, seq);
        let wire_req = http::Request::from_parts(parts, wire_body);

        match conn.requests.try_send(wire_req) {
            Ok(()) => {
                trace!("slot {}: dispatched {} {} (seq {})", self.index, method, path, seq);
                self.bump_epoch();
                self.state = State::WaitingForResponse {
                    conn,
                    exchange: Exchange {
                        seq,
                        retries_left,
                        retry_copy,
                        completion: Some(completion),
                        method,
                        path,
                        req_summary,
                        req_body_done: upload_done,
                        req_body_observed: false,
                        response: None,
                        entity_abort: None,
                        close_after: false,
                    },
                };
            }
            Err(err) => {
                // The connection went away between selection and dispatch.
                // Recover the request and run it through the retry policy;
                // the wire never saw it.
                debug!(
                    "slot {}: connection lost at dispatch (seq {}), reconnecting",
                    self.index, seq
                );
                let wire_req = match err {
                    mpsc::error::TrySendError::Closed(req)
                    | mpsc::error::TrySendError::Full(req) => req,
                };
                let (parts, wire_body) = wire_req.into_parts();
                let request = http::Request::from_parts(parts, wire_body.into_body());
                self.bump_epoch();
                self.state = State::Unconnected;
                self.retry_or_fail(
                    ctx,
                    RequestContext {
                        seq,
                        retries_left,
                        request,
                        completion,
                    },
                    Error::connection("connection closed before the request could be written"),
                );
            }
        }
    }

    /// Requeue a request that never made it onto the wire, or fail it once
    /// the budget is spent.
    fn retry_or_fail(&mut self, ctx: &mut Ctx, mut req: RequestContext, error: Error) {
        if req.retries_left > 0 {
            req.retries_left -= 1;
            trace!(
                "slot {}: requeueing request (seq {}, {} retries left)",
                self.index,
                req.seq,
                req.retries_left
            );
            ctx.retries.push_back(req);
        } else {
            ctx.sequencer.reject(req.seq, req.completion, error);
        }
    }

    fn enter_idle(&mut self, ctx: &mut Ctx, conn: ConnTx) {
        if let Some(lifetime) = ctx.config.max_connection_lifetime {
            if conn.opened_at.elapsed() >= lifetime {
                trace!(
                    "slot {}: connection outlived {:?}, discarding",
                    self.index,
                    lifetime
                );
                self.bump_epoch();
                self.state = State::Unconnected;
                return;
            }
        }
        self.bump_epoch();
        if let Some(keep_alive) = ctx.config.keep_alive_timeout {
            ctx.timers
                .schedule(keep_alive, self.index, self.timer_epoch, TimerKind::KeepAlive);
        }
        self.state = State::Idle { conn };
    }

    // ===== connection events =====

    pub(crate) fn on_flow(&mut self, ctx: &mut Ctx, event: FlowEvent) {
        match event {
            FlowEvent::Response(res) => self.on_response(ctx, res),
            FlowEvent::Closed => self.on_connection_lost(ctx, None),
            FlowEvent::Failed(cause) => self.on_connection_lost(ctx, Some(cause)),
        }
    }

    fn on_response(&mut self, ctx: &mut Ctx, res: http::Response<Body>) {
        match mem::replace(&mut self.state, State::Unconnected) {
            State::WaitingForResponse { conn, mut exchange } => {
                exchange.close_after = wants_close(res.headers());
                let is_head = exchange.method == Method::HEAD;
                let (mut parts, body) = res.into_parts();
                let wire =
                    entity::wire_entity(body, is_head, &ctx.events, self.index, exchange.seq);
                exchange.response = Some(ResponseMeta {
                    status: parts.status,
                    summary: wire.summary,
                });
                exchange.entity_abort = wire.abort;
                parts.extensions.insert(ConnectionInfo::new(
                    self.index,
                    self.generation,
                    conn.opened_at.into_std(),
                ));
                let response = http::Response::from_parts(parts, wire.entity);
                trace!(
                    "slot {}: response {} for seq {}",
                    self.index,
                    response.status(),
                    exchange.seq
                );
                let completion = exchange
                    .completion
                    .take()
                    .expect("exchange completed before its response");
                let watch = if wire.drained { None } else { Some(self.index) };
                ctx.sequencer
                    .complete(exchange.seq, completion, Ok(response), watch);
                if wire.drained {
                    self.after_entity_drained(ctx, conn, exchange);
                } else {
                    self.state = State::WaitingForResponseEntitySubscription { conn, exchange };
                }
            }
            State::Idle { .. } => {
                warn!(
                    "slot {}: response with no request outstanding, discarding connection",
                    self.index
                );
                self.bump_epoch();
            }
            other => {
                // A second response before the previous exchange finished
                // breaks the one-in-flight contract; tear the connection
                // down through the regular failure path.
                self.state = other;
                warn!(
                    "slot {}: pipelined response in state {}",
                    self.index,
                    self.state_name()
                );
                self.on_connection_lost(ctx, Some("unexpected pipelined response".into()));
            }
        }
    }

    fn on_connection_lost(&mut self, ctx: &mut Ctx, cause: Option<BoxError>) {
        match mem::replace(&mut self.state, State::Unconnected) {
            State::Idle { .. } => {
                trace!("slot {}: connection closed while idle", self.index);
                self.bump_epoch();
            }
            State::WaitingForResponse { mut exchange, .. } => {
                // Nothing of the response was seen; replay the request if it
                // is safe, otherwise this is the request's outcome.
                self.bump_epoch();
                let error = match cause {
                    Some(cause) => Error::connection(cause),
                    None => Error::connection("connection closed before a response arrived"),
                };
                let completion = exchange
                    .completion
                    .take()
                    .expect("exchange completed before its response");
                let replayable = exchange.retry_copy.take().filter(|_| {
                    !exchange.req_body_observed && exchange.retries_left > 0
                });
                match replayable {
                    Some(request) => self.retry_or_fail(
                        ctx,
                        RequestContext {
                            seq: exchange.seq,
                            retries_left: exchange.retries_left,
                            request,
                            completion,
                        },
                        error,
                    ),
                    None => ctx.sequencer.reject(exchange.seq, completion, error),
                }
            }
            State::WaitingForResponseEntitySubscription { mut exchange, .. }
            | State::WaitingForEndOfResponseEntity { mut exchange, .. } => {
                // The response is already out; fail its entity stream and
                // report nothing further.
                debug!(
                    "slot {}: connection lost while streaming the response entity (seq {})",
                    self.index, exchange.seq
                );
                self.bump_epoch();
                if let Some(abort) = exchange.entity_abort.take() {
                    let error = match cause {
                        Some(cause) => Error::connection(cause),
                        None => {
                            Error::connection("connection closed during the response entity")
                        }
                    };
                    let _ = abort.send(error);
                }
            }
            State::WaitingForEndOfRequestEntity { .. } => {
                trace!(
                    "slot {}: connection lost while finishing the request body",
                    self.index
                );
                self.bump_epoch();
            }
            other => {
                // Stale report for a connection this slot no longer owns.
                self.state = other;
            }
        }
    }

    fn after_entity_drained(&mut self, ctx: &mut Ctx, conn: ConnTx, exchange: Exchange) {
        if !exchange.req_body_done {
            self.state = State::WaitingForEndOfRequestEntity { conn, exchange };
        } else if exchange.close_after {
            trace!("slot {}: honoring `Connection: close`", self.index);
            self.bump_epoch();
            self.state = State::Unconnected;
        } else {
            self.enter_idle(ctx, conn);
        }
    }

    // ===== entity events =====

    pub(crate) fn on_entity(&mut self, ctx: &mut Ctx, event: EntityEvent) {
        match (mem::replace(&mut self.state, State::Unconnected), event) {
            (
                State::WaitingForResponseEntitySubscription { conn, exchange },
                EntityEvent::Subscribed,
            ) => {
                trace!("slot {}: entity subscribed (seq {})", self.index, exchange.seq);
                self.bump_epoch();
                self.state = State::WaitingForEndOfResponseEntity { conn, exchange };
            }
            (
                State::WaitingForResponseEntitySubscription { conn, mut exchange }
                | State::WaitingForEndOfResponseEntity { conn, mut exchange },
                EntityEvent::Drained,
            ) => {
                trace!("slot {}: entity drained (seq {})", self.index, exchange.seq);
                exchange.entity_abort = None;
                self.bump_epoch();
                self.after_entity_drained(ctx, conn, exchange);
            }
            (
                State::WaitingForResponseEntitySubscription { .. }
                | State::WaitingForEndOfResponseEntity { .. },
                EntityEvent::Failed,
            ) => {
                debug!(
                    "slot {}: response entity failed, discarding connection",
                    self.index
                );
                self.bump_epoch();
            }
            (
                State::WaitingForResponseEntitySubscription { .. }
                | State::WaitingForEndOfResponseEntity { .. },
                EntityEvent::Dropped,
            ) => {
                debug!(
                    "slot {}: response entity dropped before end of stream, aborting connection",
                    self.index
                );
                self.bump_epoch();
            }
            (other, _) => {
                // Gate events for an exchange the slot already left behind.
                self.state = other;
            }
        }
    }

    /// The sequencer just handed this slot's response downstream.
    pub(crate) fn on_response_released(&mut self, ctx: &mut Ctx, seq: u64) {
        let waiting = matches!(
            &self.state,
            State::WaitingForResponseEntitySubscription { exchange, .. } if exchange.seq == seq
        );
        if !waiting {
            return;
        }
        if let Some(timeout) = ctx.config.response_entity_subscription_timeout {
            self.bump_epoch();
            ctx.timers.schedule(
                timeout,
                self.index,
                self.timer_epoch,
                TimerKind::SubscriptionTimeout,
            );
        }
    }

    // ===== request body events =====

    pub(crate) fn on_request_body(&mut self, ctx: &mut Ctx, event: BodyEvent) {
        match event {
            BodyEvent::Observed => {
                if let Some(exchange) = self.exchange_mut() {
                    exchange.req_body_observed = true;
                }
            }
            BodyEvent::Completed => {
                if let Some(exchange) = self.exchange_mut() {
                    exchange.req_body_done = true;
                }
                match mem::replace(&mut self.state, State::Unconnected) {
                    State::WaitingForEndOfRequestEntity { conn, exchange } => {
                        trace!(
                            "slot {}: request body finished after the response (seq {})",
                            self.index,
                            exchange.seq
                        );
                        if exchange.close_after {
                            self.bump_epoch();
                        } else {
                            self.enter_idle(ctx, conn);
                        }
                    }
                    other => self.state = other,
                }
            }
            BodyEvent::Aborted => {
                // The connection stopped consuming the upload; whether that
                // dooms the connection is its own report to make, unless the
                // response is already complete.
                if let Some(exchange) = self.exchange_mut() {
                    exchange.req_body_done = true;
                }
                if matches!(self.state, State::WaitingForEndOfRequestEntity { .. }) {
                    debug!(
                        "slot {}: request body abandoned by the connection, not reusing it",
                        self.index
                    );
                    self.bump_epoch();
                    self.state = State::Unconnected;
                }
            }
            BodyEvent::Failed(cause) => self.on_request_body_failed(ctx, cause),
        }
    }

    fn on_request_body_failed(&mut self, ctx: &mut Ctx, cause: BoxError) {
        match mem::replace(&mut self.state, State::Unconnected) {
            State::WaitingForResponse { mut exchange, .. } => {
                // The user's stream broke before a response arrived: that
                // failure is the request's outcome.
                debug!(
                    "slot {}: request body failed before the response (seq {}): {}",
                    self.index, exchange.seq, cause
                );
                self.bump_epoch();
                let completion = exchange
                    .completion
                    .take()
                    .expect("exchange completed before its response");
                ctx.sequencer
                    .reject(exchange.seq, completion, Error::request_entity(cause));
            }
            State::WaitingForResponseEntitySubscription { mut exchange, .. }
            | State::WaitingForEndOfResponseEntity { mut exchange, .. } => {
                // The response was already surfaced; fail the entity stream
                // and tear the connection down.
                debug!(
                    "slot {}: request body failed mid-response (seq {}): {}",
                    self.index, exchange.seq, cause
                );
                self.bump_epoch();
                if let Some(abort) = exchange.entity_abort.take() {
                    let _ = abort.send(Error::request_entity(cause));
                }
            }
            State::WaitingForEndOfRequestEntity { exchange, .. } => {
                debug!(
                    "slot {}: request body failed after the response completed (seq {})",
                    self.index, exchange.seq
                );
                self.bump_epoch();
            }
            other => {
                self.state = other;
            }
        }
    }

    // ===== timers =====

    pub(crate) fn on_timer(&mut self, ctx: &mut Ctx, kind: TimerKind) {
        match kind {
            TimerKind::Backoff => {
                if matches!(self.state, State::Failed) {
                    trace!("slot {}: backoff expired", self.index);
                    self.state = State::Unconnected;
                }
            }
            TimerKind::KeepAlive => {
                if matches!(self.state, State::Idle { .. }) {
                    debug!(
                        "slot {}: keep-alive timeout, closing idle connection",
                        self.index
                    );
                    self.bump_epoch();
                    self.state = State::Unconnected;
                }
            }
            TimerKind::SubscriptionTimeout => {
                match mem::replace(&mut self.state, State::Unconnected) {
                    State::WaitingForResponseEntitySubscription { mut exchange, .. } => {
                        let timeout = ctx
                            .config
                            .response_entity_subscription_timeout
                            .unwrap_or_default();
                        let message = subscription_timeout_message(timeout, &exchange);
                        warn!("slot {}: {}", self.index, message);
                        self.bump_epoch();
                        if let Some(abort) = exchange.entity_abort.take() {
                            let _ = abort.send(Error::subscription_timeout(message));
                        }
                    }
                    other => self.state = other,
                }
            }
        }
    }

    // ===== shutdown =====

    pub(crate) fn shutdown(&mut self, ctx: &mut Ctx) {
        self.bump_epoch();
        match mem::replace(&mut self.state, State::Unconnected) {
            State::Connecting {
                assigned: Some(req),
            } => {
                ctx.sequencer.reject(req.seq, req.completion, Error::shutdown());
            }
            State::WaitingForResponse { mut exchange, .. } => {
                let completion = exchange
                    .completion
                    .take()
                    .expect("exchange completed before its response");
                ctx.sequencer.reject(exchange.seq, completion, Error::shutdown());
            }
            State::WaitingForResponseEntitySubscription { mut exchange, .. }
            | State::WaitingForEndOfResponseEntity { mut exchange, .. } => {
                if let Some(abort) = exchange.entity_abort.take() {
                    let _ = abort.send(Error::shutdown());
                }
            }
            _ => {}
        }
    }
}

fn wants_close(headers: &HeaderMap) -> bool {
    headers
        .get(CONNECTION)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.eq_ignore_ascii_case("close"))
        .unwrap_or(false)
}

fn subscription_timeout_message(timeout: Duration, exchange: &Exchange) -> String {
    let (status, res_summary) = match exchange.response.as_ref() {
        Some(meta) => (meta.status, meta.summary),
        None => (StatusCode::OK, BodySummary::Empty),
    };
    format!(
        "Response entity was not subscribed after {:?}. Make sure to read the response \
         `entity` body or call `entity.discard_bytes()`. {} {} {} -> {} {} {}",
        timeout,
        exchange.method,
        exchange.path,
        exchange.req_summary,
        status.as_str(),
        status.canonical_reason().unwrap_or("unknown"),
        res_summary,
    )
}

fn try_clone_request(req: &http::Request<Body>) -> Option<http::Request<Body>> {
    let body = req.body().try_clone()?;
    let mut clone = http::Request::new(body);
    *clone.method_mut() = req.method().clone();
    *clone.uri_mut() = req.uri().clone();
    *clone.version_mut() = req.version();
    *clone.headers_mut() = req.headers().clone();
    Some(clone)
}
