// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! The conversation engine.
//!
//! Turns a logical multi-field request into one or more wire exchanges and
//! assembles the per-field outcomes once every exchange has resolved.
//!
//! ```text
//! converse(request)
//!   │
//!   ├─ plan ──► [exchange A] [exchange B] [exchange C]   (fan-out or batches)
//!   │               │             │            │
//!   │           key → encode → register → send → wait(deadline)
//!   │               │             │            │
//!   └─ join ◄── outcomes ◄────────┴────────────┘
//! ```
//!
//! Each exchange owns its own deadline, so one silent field never delays
//! the result of the others beyond that field's own timeout.

use crate::pending::{Completion, Deadline, PendingRegistry, Routing};
use crate::protocol::{DispatchMode, Protocol};
use crate::stats::EngineStats;
use futures::future::join_all;
use plcwire_config::EngineConfig;
use plcwire_core::{
    ConnectionError, Exchange, FieldError, FieldOutcome, Request, RequestItem, Response,
    Transport,
};
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, error, trace, warn};

/// Pending registry specialized to a protocol.
pub type ProtocolRegistry<P> =
    PendingRegistry<<P as plcwire_core::Codec>::Key, <P as plcwire_core::Codec>::Frame>;

// =============================================================================
// ConversationEngine
// =============================================================================

/// Correlates requests and replies for one connection.
pub struct ConversationEngine<P: Protocol> {
    protocol: Arc<P>,
    transport: Arc<dyn Transport>,
    pending: Arc<ProtocolRegistry<P>>,
    config: EngineConfig,
    stats: Arc<EngineStats>,
}

impl<P: Protocol> ConversationEngine<P> {
    /// Creates an engine over a protocol and a transport.
    pub fn new(protocol: Arc<P>, transport: Arc<dyn Transport>, config: EngineConfig) -> Self {
        let pending = Arc::new(PendingRegistry::new(
            config.max_pending,
            config.duplicate_history,
        ));
        Self {
            protocol,
            transport,
            pending,
            config,
            stats: Arc::new(EngineStats::new()),
        }
    }

    /// The protocol.
    #[inline]
    pub fn protocol(&self) -> &Arc<P> {
        &self.protocol
    }

    /// The transport.
    #[inline]
    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    /// The engine settings.
    #[inline]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// The engine counters.
    #[inline]
    pub fn stats(&self) -> &Arc<EngineStats> {
        &self.stats
    }

    /// The pending registry.
    #[inline]
    pub fn pending(&self) -> &Arc<ProtocolRegistry<P>> {
        &self.pending
    }

    /// Runs every field of `request` and pairs each with its outcome.
    ///
    /// Never fails as a whole: transport, timeout and device errors are
    /// reported per field.
    pub async fn converse(&self, request: &Request) -> Response {
        let outcomes = self.converse_items(request.items()).await;
        Response::from_outcomes(request, outcomes)
    }

    /// Runs a list of items and returns their outcomes in the same order.
    pub async fn converse_items(&self, items: &[RequestItem]) -> Vec<FieldOutcome> {
        let groups = plan(self.protocol.dispatch_mode(), items, |item| {
            self.protocol.is_batchable(item)
        });
        debug!(
            protocol = %self.protocol.kind(),
            fields = items.len(),
            exchanges = groups.len(),
            "starting conversation"
        );

        let exchanges = groups.iter().map(|group| {
            let batch = group.iter().map(|&i| items[i].clone()).collect();
            self.exchange(Exchange::batch(batch))
        });
        let results = join_all(exchanges).await;

        let mut outcomes: Vec<Option<FieldOutcome>> = vec![None; items.len()];
        for (group, result) in groups.iter().zip(results) {
            for (&index, outcome) in group.iter().zip(result) {
                outcomes[index] = Some(outcome);
            }
        }
        outcomes
            .into_iter()
            .map(|o| o.unwrap_or_else(|| Err(FieldError::decode("no outcome for field"))))
            .collect()
    }

    /// Runs one exchange: key, encode, register, send, wait.
    ///
    /// Returns exactly one outcome per exchange item.
    pub async fn exchange(&self, exchange: Exchange) -> Vec<FieldOutcome> {
        if exchange.is_empty() {
            return Vec::new();
        }
        let deadline = Deadline::after(self.config.request_timeout());

        if self.pending.is_closed() {
            return fail_all(&exchange, FieldError::ConnectionClosed);
        }

        let key = self.protocol.correlation_key(&exchange);
        let bytes = match self.protocol.encode(&exchange, &key) {
            Ok(bytes) => bytes,
            Err(e) => {
                debug!(key = ?key, error = %e, "failed to encode exchange");
                return fail_all(&exchange, FieldError::from(e));
            }
        };

        let predicate = self.protocol.predicate(&key, &exchange);
        let handle = match self.pending.register(key.clone(), predicate, deadline).await {
            Ok(handle) => handle,
            Err(e) => {
                if matches!(e, FieldError::Timeout { .. }) {
                    self.stats.record_timeout();
                }
                return fail_all(&exchange, e);
            }
        };

        let started = Instant::now();
        trace!(key = ?key, bytes = bytes.len(), "sending exchange");
        if let Err(e) = self.transport.send(bytes).await {
            handle.release();
            self.stats.record_transport_failure();
            let field_error = match e {
                ConnectionError::Closed => FieldError::ConnectionClosed,
                other => {
                    error!(
                        key = ?key,
                        transport = %self.transport.describe(),
                        error = %other,
                        "transport send failed"
                    );
                    FieldError::transport(other.to_string())
                }
            };
            return fail_all(&exchange, field_error);
        }
        self.stats.record_sent();

        match handle.wait(deadline).await {
            Completion::Matched(frame) => {
                self.stats.record_completed(started.elapsed());
                let outcomes = self.protocol.interpret(&exchange, frame);
                fit(&exchange, outcomes)
            }
            Completion::Aborted(info) => {
                self.stats.record_aborted();
                debug!(key = ?key, abort = %info, "exchange aborted by device");
                exchange
                    .items()
                    .iter()
                    .map(|item| Err(self.protocol.abort_error(item, &info)))
                    .collect()
            }
            Completion::Failed(e) => {
                if matches!(e, FieldError::Timeout { .. }) {
                    self.stats.record_timeout();
                }
                fail_all(&exchange, e)
            }
        }
    }

    /// Decodes and routes one inbound frame.
    ///
    /// Returns the frame back when no pending entry wanted it, so the
    /// caller can offer it to event subscribers.
    pub fn on_frame(&self, bytes: &[u8]) -> Option<P::Frame> {
        let frame = match self.protocol.decode(bytes) {
            Ok(frame) => frame,
            Err(e) => {
                self.stats.record_decode_failure();
                warn!(bytes = bytes.len(), error = %e, "dropping undecodable frame");
                return None;
            }
        };

        let hint = self.protocol.frame_key(&frame);
        match self.pending.route(frame, hint.as_ref()) {
            Routing::Completed(key) => {
                trace!(key = ?key, "frame resolved pending entry");
                None
            }
            Routing::Duplicate(key) => {
                self.stats.record_duplicate();
                warn!(key = ?key, "dropping duplicate reply for resolved exchange");
                None
            }
            Routing::Unmatched(frame) => Some(frame),
        }
    }

    /// Cancels the exchange registered under `key`.
    pub fn cancel(&self, key: &P::Key) -> bool {
        self.pending.cancel(key)
    }

    /// Fails every outstanding exchange and refuses new ones.
    pub fn close(&self) -> usize {
        self.pending.close()
    }

    /// Returns `true` once the engine has been closed.
    pub fn is_closed(&self) -> bool {
        self.pending.is_closed()
    }
}

// =============================================================================
// Planning
// =============================================================================

/// Groups item indices into exchanges.
///
/// In fan-out mode every item is its own exchange. In batched mode the
/// batchable items are chunked in request order and every other item goes
/// alone.
pub fn plan(
    mode: DispatchMode,
    items: &[RequestItem],
    batchable: impl Fn(&RequestItem) -> bool,
) -> Vec<Vec<usize>> {
    match mode {
        DispatchMode::FanOut => (0..items.len()).map(|i| vec![i]).collect(),
        DispatchMode::Batched { max_items } => {
            let max_items = max_items.max(1);
            let mut groups = Vec::new();
            let mut batch = Vec::new();
            for (index, item) in items.iter().enumerate() {
                if batchable(item) {
                    batch.push(index);
                    if batch.len() == max_items {
                        groups.push(std::mem::take(&mut batch));
                    }
                } else {
                    groups.push(vec![index]);
                }
            }
            if !batch.is_empty() {
                groups.push(batch);
            }
            groups
        }
    }
}

fn fail_all(exchange: &Exchange, error: FieldError) -> Vec<FieldOutcome> {
    exchange.items().iter().map(|_| Err(error.clone())).collect()
}

fn fit(exchange: &Exchange, mut outcomes: Vec<FieldOutcome>) -> Vec<FieldOutcome> {
    if outcomes.len() != exchange.len() {
        warn!(
            expected = exchange.len(),
            actual = outcomes.len(),
            "reply carried the wrong number of results"
        );
        outcomes.resize_with(exchange.len(), || {
            Err(FieldError::decode("reply carried no result for field"))
        });
    }
    outcomes
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{device_reply, DeviceAction, TestProtocol, TestTransport};
    use plcwire_core::{FieldOperation, ResponseCode, Value};
    use std::time::Duration;

    fn item(name: &str, offset: u32) -> RequestItem {
        RequestItem::new(name, TestProtocol::address(offset), FieldOperation::Read)
    }

    fn engine(
        protocol: TestProtocol,
        transport: Arc<TestTransport>,
        timeout: Duration,
    ) -> Arc<ConversationEngine<TestProtocol>> {
        let config = EngineConfig::default().with_request_timeout(timeout);
        let engine = Arc::new(ConversationEngine::new(Arc::new(protocol), transport.clone(), config));
        transport.attach(Arc::clone(&engine));
        engine
    }

    #[test]
    fn test_plan_modes() {
        let items: Vec<RequestItem> = (0..5).map(|i| item(&format!("f{}", i), i)).collect();
        assert_eq!(plan(DispatchMode::FanOut, &items, |_| true).len(), 5);

        let groups = plan(DispatchMode::Batched { max_items: 2 }, &items, |_| true);
        assert_eq!(groups, vec![vec![0, 1], vec![2, 3], vec![4]]);

        let groups = plan(DispatchMode::Batched { max_items: 8 }, &items, |i| {
            i.name != "f1"
        });
        assert_eq!(groups, vec![vec![1], vec![0, 2, 3, 4]]);
    }

    #[tokio::test]
    async fn test_fan_out_all_ok() {
        let transport = TestTransport::new(|_| DeviceAction::Reply);
        let engine = engine(TestProtocol::fan_out(), transport, Duration::from_secs(1));

        let items = vec![item("A", 1), item("B", 2), item("C", 3)];
        let outcomes = engine.converse_items(&items).await;
        assert_eq!(
            outcomes,
            vec![
                Ok(Some(Value::Int32(1))),
                Ok(Some(Value::Int32(2))),
                Ok(Some(Value::Int32(3))),
            ]
        );
        assert!(engine.pending().is_empty());
        assert_eq!(engine.stats().snapshot().exchanges_completed, 3);
    }

    #[tokio::test]
    async fn test_batched_not_found_is_per_field() {
        let transport = TestTransport::new(|_| DeviceAction::Reply);
        let engine = engine(TestProtocol::batched(8), transport.clone(), Duration::from_secs(1));

        let items = vec![item("A", 1), item("Missing", TestProtocol::MISSING), item("B", 2)];
        let outcomes = engine.converse_items(&items).await;
        assert_eq!(outcomes[0], Ok(Some(Value::Int32(1))));
        assert_eq!(outcomes[1].as_ref().unwrap_err().response_code(), ResponseCode::NotFound);
        assert_eq!(outcomes[2], Ok(Some(Value::Int32(2))));
        assert_eq!(transport.sent_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_field_times_out_alone() {
        let transport = TestTransport::new(|offset| {
            if offset == 2 {
                DeviceAction::Ignore
            } else {
                DeviceAction::Reply
            }
        });
        let engine = engine(TestProtocol::fan_out(), transport, Duration::from_millis(200));

        let items = vec![item("A", 1), item("B", 2)];
        let outcomes = engine.converse_items(&items).await;
        assert_eq!(outcomes[0], Ok(Some(Value::Int32(1))));
        assert!(matches!(outcomes[1], Err(FieldError::Timeout { .. })));
        assert!(engine.pending().is_empty());
        assert_eq!(engine.stats().snapshot().timeouts, 1);
    }

    #[tokio::test]
    async fn test_abort_maps_to_field_error() {
        let transport = TestTransport::new(|_| DeviceAction::Abort(0x0601_0000));
        let engine = engine(TestProtocol::fan_out(), transport, Duration::from_secs(1));

        let outcomes = engine.converse_items(&[item("A", 1)]).await;
        assert_eq!(
            outcomes[0].as_ref().unwrap_err().abort_code(),
            Some(0x0601_0000)
        );
    }

    #[tokio::test]
    async fn test_transport_failure_removes_entry() {
        let transport = TestTransport::new(|_| DeviceAction::Reply);
        transport.fail_sends(true);
        let engine = engine(TestProtocol::fan_out(), transport, Duration::from_secs(1));

        let outcomes = engine.converse_items(&[item("A", 1)]).await;
        assert!(matches!(outcomes[0], Err(FieldError::Transport { .. })));
        assert!(engine.pending().is_empty());
    }

    #[tokio::test]
    async fn test_encode_failure_sends_nothing() {
        let transport = TestTransport::new(|_| DeviceAction::Reply);
        let engine = engine(TestProtocol::fan_out(), transport.clone(), Duration::from_secs(1));

        let bad = RequestItem::new(
            "W",
            TestProtocol::address(1),
            FieldOperation::Write(Value::String("text".into())),
        );
        let outcomes = engine.converse_items(&[bad]).await;
        assert!(matches!(outcomes[0], Err(FieldError::Encode { .. })));
        assert_eq!(transport.sent_count(), 0);
    }

    #[tokio::test]
    async fn test_undecodable_and_duplicate_frames() {
        let transport = TestTransport::new(|_| DeviceAction::Reply);
        let engine = engine(TestProtocol::fan_out(), transport, Duration::from_secs(1));

        assert!(engine.on_frame(&[0xFF]).is_none());
        assert_eq!(engine.stats().snapshot().decode_failures, 1);

        let outcomes = engine.converse_items(&[item("A", 4)]).await;
        assert!(outcomes[0].is_ok());

        // Replaying the reply of the finished exchange is a duplicate.
        let replay = device_reply(0, &[Some(4)]);
        assert!(engine.on_frame(&replay).is_none());
        assert_eq!(engine.stats().snapshot().duplicate_frames, 1);
    }

    #[tokio::test]
    async fn test_closed_engine_fails_fields() {
        let transport = TestTransport::new(|_| DeviceAction::Reply);
        let engine = engine(TestProtocol::fan_out(), transport, Duration::from_secs(1));
        engine.close();
        assert!(engine.is_closed());

        let outcomes = engine.converse_items(&[item("A", 1)]).await;
        assert_eq!(outcomes, vec![Err(FieldError::ConnectionClosed)]);
    }
}
