// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Connections.
//!
//! A [`Connection`] ties one protocol, one transport and one conversation
//! engine together and is the entry point for building requests.
//!
//! ```text
//!              ┌──────────────────── Connection ─────────────────────┐
//!  builders ──►│ RequestExecutor ──► ConversationEngine ──► Transport │──► wire
//!              │                          ▲                           │
//!              │ SubscriptionRegistry ◄── dispatch loop ◄── InboundSink│◄── wire
//!              └──────────────────────────────────────────────────────┘
//! ```
//!
//! Closing a connection (explicitly or because the transport went away)
//! fails every outstanding exchange with `CONNECTION_CLOSED` and tears down
//! every subscription.

use crate::dispatch;
use crate::engine::ConversationEngine;
use crate::protocol::{Establishment, Protocol};
use crate::stats::EngineStatsSnapshot;
use crate::subscription::{spawn_poller, ActiveField, Delivery, PollMode, SubscriptionRegistry};
use async_trait::async_trait;
use parking_lot::Mutex;
use plcwire_config::{ConnectionString, EngineConfig, UnifiedAddressParser};
use plcwire_core::{
    AddressResolver, ConnectionError, ConnectionResult, Exchange, FieldError, FieldOperation,
    FieldResult,
    InboundSink, ProtocolKind, ReadRequestBuilder, Request, RequestExecutor, RequestItem,
    Response, SubscriptionEvent, SubscriptionField, SubscriptionId, SubscriptionKind,
    SubscriptionRequest, SubscriptionRequestBuilder, SubscriptionResponse, Transport,
    WriteRequestBuilder,
};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

// =============================================================================
// ConnectionState
// =============================================================================

/// Lifecycle state of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Accepting requests.
    Open,
    /// Closed; every request fails with `CONNECTION_CLOSED`.
    Closed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Open => write!(f, "open"),
            ConnectionState::Closed => write!(f, "closed"),
        }
    }
}

// =============================================================================
// Shared state
// =============================================================================

pub(crate) struct Shared<P: Protocol> {
    id: Uuid,
    engine: Arc<ConversationEngine<P>>,
    subscriptions: SubscriptionRegistry,
    resolver: Arc<UnifiedAddressParser>,
    uri: Option<ConnectionString>,
    closed: AtomicBool,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
}

impl<P: Protocol> Shared<P> {
    /// Routes one inbound frame: pending entries first, then subscribers.
    pub(crate) fn handle_frame(&self, bytes: &[u8]) {
        let Some(frame) = self.engine.on_frame(bytes) else {
            return;
        };
        let stats = self.engine.stats();

        let notifications = self.engine.protocol().notifications(&frame);
        if notifications.is_empty() {
            stats.record_unmatched();
            warn!(connection = %self.id, frame = ?frame, "dropping frame nothing was waiting for");
            return;
        }

        for notification in notifications {
            if self.subscriptions.route(&notification) > 0 {
                stats.record_routed();
            } else {
                stats.record_unmatched();
                debug!(
                    connection = %self.id,
                    address = %notification.address,
                    "no subscriber for notification"
                );
            }
        }
    }

    /// Runs the close cascade once. Returns `false` if already closed.
    pub(crate) fn shutdown(&self, reason: &str) -> bool {
        if self.closed.swap(true, Ordering::SeqCst) {
            return false;
        }
        let failed = self.engine.close();
        let removed = self.subscriptions.clear();
        info!(
            connection = %self.id,
            reason,
            failed_exchanges = failed,
            removed_fields = removed,
            "connection closed"
        );
        true
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl<P: Protocol> Drop for Shared<P> {
    fn drop(&mut self) {
        if let Some(task) = self.dispatcher.get_mut().take() {
            task.abort();
        }
        self.engine.close();
        self.subscriptions.clear();
    }
}

// =============================================================================
// Connection
// =============================================================================

/// A live conversation with one device.
///
/// Cheap to clone; clones share the same engine.
///
/// # Examples
///
/// ```rust,ignore
/// let connection = Connection::open_uri("ads:tcp://10.0.0.5", AdsProtocol::new(AmsRoute::default()), transport, config)?;
///
/// let mut builder = connection.read_request_builder();
/// builder.add_item("counter", "MAIN.counter:DINT");
/// let response = builder.build()?.execute().await?;
/// ```
pub struct Connection<P: Protocol> {
    shared: Arc<Shared<P>>,
}

impl<P: Protocol> Clone for Connection<P> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<P: Protocol> Connection<P> {
    /// Opens a connection over an already established transport.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn open(protocol: P, transport: Arc<dyn Transport>, config: EngineConfig) -> Self {
        Self::open_with(protocol, transport, config, None)
    }

    /// Opens a connection after validating its connection string.
    pub fn open_uri(
        uri: &str,
        protocol: P,
        transport: Arc<dyn Transport>,
        config: EngineConfig,
    ) -> ConnectionResult<Self> {
        let parsed = ConnectionString::parse(uri)?;
        if parsed.protocol() != protocol.kind() {
            return Err(ConnectionError::invalid_uri(
                uri,
                format!(
                    "connection string is for {} but the protocol is {}",
                    parsed.protocol(),
                    protocol.kind()
                ),
            ));
        }
        Ok(Self::open_with(protocol, transport, config, Some(parsed)))
    }

    fn open_with(
        protocol: P,
        transport: Arc<dyn Transport>,
        config: EngineConfig,
        uri: Option<ConnectionString>,
    ) -> Self {
        let id = Uuid::new_v4();
        let kind = protocol.kind();
        let (sink, rx) = InboundSink::channel(config.inbound_buffer);
        let engine = Arc::new(ConversationEngine::new(
            Arc::new(protocol),
            Arc::clone(&transport),
            config,
        ));

        let shared = Arc::new(Shared {
            id,
            engine,
            subscriptions: SubscriptionRegistry::new(),
            resolver: Arc::new(UnifiedAddressParser::for_protocol(kind)),
            uri,
            closed: AtomicBool::new(false),
            dispatcher: Mutex::new(None),
        });
        let task = dispatch::spawn(Arc::downgrade(&shared), rx);
        *shared.dispatcher.lock() = Some(task);
        transport.bind(sink);

        info!(
            connection = %id,
            protocol = %kind,
            transport = %transport.describe(),
            "connection opened"
        );
        Self { shared }
    }

    /// Unique connection ID used in logs.
    pub fn id(&self) -> Uuid {
        self.shared.id
    }

    /// The protocol family.
    pub fn protocol_kind(&self) -> ProtocolKind {
        self.shared.engine.protocol().kind()
    }

    /// The protocol.
    pub fn protocol(&self) -> &Arc<P> {
        self.shared.engine.protocol()
    }

    /// The connection string the connection was opened with, if any.
    pub fn connection_string(&self) -> Option<&ConnectionString> {
        self.shared.uri.as_ref()
    }

    /// The conversation engine.
    pub fn engine(&self) -> &Arc<ConversationEngine<P>> {
        &self.shared.engine
    }

    /// Current state.
    pub fn state(&self) -> ConnectionState {
        if self.shared.is_closed() {
            ConnectionState::Closed
        } else {
            ConnectionState::Open
        }
    }

    /// Returns `true` once closed.
    pub fn is_closed(&self) -> bool {
        self.shared.is_closed()
    }

    /// Engine counters.
    pub fn stats(&self) -> EngineStatsSnapshot {
        self.shared.engine.stats().snapshot()
    }

    /// Number of exchanges waiting for a reply.
    pub fn pending_count(&self) -> usize {
        self.shared.engine.pending().len()
    }

    /// Number of live subscriptions.
    pub fn subscription_count(&self) -> usize {
        self.shared.subscriptions.len()
    }

    fn resolver(&self) -> Arc<dyn AddressResolver> {
        self.shared.resolver.clone()
    }

    fn executor(&self) -> Arc<dyn RequestExecutor> {
        Arc::new(self.clone())
    }

    /// A read request builder bound to this connection.
    pub fn read_request_builder(&self) -> ReadRequestBuilder {
        ReadRequestBuilder::new(self.resolver()).with_executor(self.executor())
    }

    /// A write request builder bound to this connection.
    pub fn write_request_builder(&self) -> WriteRequestBuilder {
        WriteRequestBuilder::new(self.resolver()).with_executor(self.executor())
    }

    /// A subscription request builder bound to this connection.
    pub fn subscription_request_builder(&self) -> SubscriptionRequestBuilder {
        SubscriptionRequestBuilder::new(self.resolver()).with_executor(self.executor())
    }

    /// Runs a request on this connection.
    pub async fn converse(&self, request: &Request) -> Response {
        self.shared.engine.converse(request).await
    }

    /// Establishes every field of a subscription request.
    ///
    /// Fields that fail to establish are reported in the response and are
    /// not delivered; the others start delivering immediately.
    pub async fn subscribe(&self, request: &SubscriptionRequest) -> SubscriptionResponse {
        let shared = &self.shared;
        let engine = &shared.engine;
        let id = shared.subscriptions.allocate_id();
        let (tx, rx) = mpsc::channel(engine.config().subscription_buffer.max(1));

        let fields = request.fields();
        let mut outcomes: Vec<Option<FieldResult<()>>> = vec![None; fields.len()];
        let mut remote = Vec::new();
        for (index, field) in fields.iter().enumerate() {
            if shared.is_closed() {
                outcomes[index] = Some(Err(FieldError::ConnectionClosed));
                continue;
            }
            let operation = match engine.protocol().establishment(field) {
                Establishment::Local => {
                    outcomes[index] = Some(Ok(()));
                    continue;
                }
                Establishment::Unsupported => {
                    outcomes[index] = Some(Err(FieldError::unsupported(format!(
                        "{} subscription on {}",
                        field.kind, field.address
                    ))));
                    continue;
                }
                Establishment::Probe => FieldOperation::Read,
                Establishment::Exchange => FieldOperation::Subscribe(field.kind.clone()),
            };
            remote.push((
                index,
                RequestItem::new(field.name.clone(), field.address.clone(), operation),
            ));
        }

        if !remote.is_empty() {
            let items: Vec<RequestItem> = remote.iter().map(|(_, item)| item.clone()).collect();
            let results = engine.converse_items(&items).await;
            for ((index, _), result) in remote.iter().zip(results) {
                outcomes[*index] = Some(result.map(|_| ()));
            }
        }

        let mut active = Vec::new();
        let mut results = Vec::with_capacity(fields.len());
        for (field, outcome) in fields.iter().zip(outcomes) {
            let outcome =
                outcome.unwrap_or_else(|| Err(FieldError::decode("no outcome for field")));
            match &outcome {
                Ok(()) => active.push(self.activate(field, tx.clone())),
                Err(e) => warn!(
                    subscription = %id,
                    field = %field.name,
                    address = %field.address,
                    error = %e,
                    "subscription field not established"
                ),
            }
            results.push((field.name.clone(), outcome));
        }

        if !active.is_empty() {
            shared.subscriptions.insert(id, tx, active);
            if shared.is_closed() {
                shared.subscriptions.remove(id, None);
            }
        }
        SubscriptionResponse::new(id, results, rx)
    }

    fn activate(&self, field: &SubscriptionField, sender: mpsc::Sender<SubscriptionEvent>) -> ActiveField {
        let engine = &self.shared.engine;
        let poll = |interval, mode| {
            Delivery::Polled(spawn_poller(
                Arc::clone(engine),
                field.name.clone(),
                field.address.clone(),
                interval,
                mode,
                sender.clone(),
            ))
        };

        let delivery = match &field.kind {
            SubscriptionKind::Cyclic(interval) => poll(*interval, PollMode::Every),
            SubscriptionKind::ChangeOfState
                if engine.protocol().native_change_notification(&field.address) =>
            {
                Delivery::Passive
            }
            SubscriptionKind::ChangeOfState => {
                poll(engine.config().change_of_state_poll(), PollMode::OnChange)
            }
            SubscriptionKind::Event => Delivery::Passive,
        };
        debug!(field = %field.name, kind = %field.kind, passive = matches!(delivery, Delivery::Passive), "field activated");

        let active = ActiveField::new(
            field.name.clone(),
            field.address.clone(),
            field.kind.clone(),
            delivery,
        );
        match engine.protocol().establishment(field) {
            Establishment::Exchange => active.registered_on_device(),
            _ => active,
        }
    }

    /// Stops one field, or the whole subscription when `field` is `None`.
    /// Returns the number of fields torn down.
    ///
    /// Fields the device holds a subscription for are released with an
    /// unsubscribe exchange in the background.
    pub fn unsubscribe(&self, id: SubscriptionId, field: Option<&str>) -> usize {
        let removed = self.shared.subscriptions.take(id, field);
        if !self.shared.is_closed() {
            for active in removed.iter().filter(|f| f.is_registered()) {
                let engine = Arc::clone(&self.shared.engine);
                let item = RequestItem::new(
                    active.name.clone(),
                    active.address.clone(),
                    FieldOperation::Unsubscribe,
                );
                tokio::spawn(async move {
                    let name = item.name.clone();
                    if let Some(Err(e)) = engine.exchange(Exchange::single(item)).await.pop() {
                        warn!(field = %name, error = %e, "device subscription not released");
                    }
                });
            }
        }
        removed.len()
    }

    /// Closes the connection. Idempotent.
    pub async fn close(&self) {
        if !self.shared.shutdown("closed by caller") {
            return;
        }
        self.shared.engine.transport().close().await;
        let task = self.shared.dispatcher.lock().take();
        if let Some(task) = task {
            task.abort();
        }
    }
}

impl<P: Protocol> fmt::Debug for Connection<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.shared.id)
            .field("protocol", &self.protocol_kind())
            .field("state", &self.state())
            .finish()
    }
}

#[async_trait]
impl<P: Protocol> RequestExecutor for Connection<P> {
    async fn execute(&self, request: &Request) -> ConnectionResult<Response> {
        Ok(self.converse(request).await)
    }

    async fn subscribe(&self, request: &SubscriptionRequest) -> ConnectionResult<SubscriptionResponse> {
        Ok(Connection::subscribe(self, request).await)
    }

    async fn unsubscribe(&self, id: SubscriptionId, field: Option<&str>) -> usize {
        Connection::unsubscribe(self, id, field)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{notification, DeviceAction, TestProtocol, TestTransport};
    use plcwire_core::{ResponseCode, Value};
    use std::time::Duration;

    fn open(transport: Arc<TestTransport>) -> Connection<TestProtocol> {
        let config = EngineConfig::default().with_request_timeout(Duration::from_millis(500));
        Connection::open(TestProtocol::fan_out(), transport, config)
    }

    #[tokio::test]
    async fn test_read_through_builder() {
        let connection = open(TestTransport::new(|_| DeviceAction::Reply));
        let mut builder = connection.read_request_builder();
        builder.add_item("A", "0x4020/0x1:DINT").add_item("B", "0x4020/0x2:DINT");
        let response = builder.build().unwrap().execute().await.unwrap();
        assert!(response.is_all_ok());
        assert_eq!(response.value("B"), Some(&Value::Int32(2)));
    }

    #[tokio::test]
    async fn test_open_uri_checks_protocol() {
        let transport = TestTransport::new(|_| DeviceAction::Reply);
        let result = Connection::open_uri(
            "opcua:tcp://localhost",
            TestProtocol::fan_out(),
            transport,
            EngineConfig::default(),
        );
        assert!(matches!(result, Err(ConnectionError::InvalidUri { .. })));
    }

    #[tokio::test]
    async fn test_close_cascade() {
        let transport = TestTransport::new(|_| DeviceAction::Ignore);
        let connection = open(transport);

        let mut builder = connection.read_request_builder();
        builder.add_item("A", "0x4020/0x1:DINT");
        let request = builder.build().unwrap();
        let in_flight = tokio::spawn(async move { request.execute().await });

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(connection.pending_count(), 1);
        connection.close().await;
        connection.close().await;

        let response = in_flight.await.unwrap().unwrap();
        assert_eq!(response.response_code("A"), Some(ResponseCode::ConnectionClosed));
        assert_eq!(connection.state(), ConnectionState::Closed);
    }

    #[tokio::test]
    async fn test_transport_close_triggers_cascade() {
        let transport = TestTransport::new(|_| DeviceAction::Reply);
        let connection = open(transport.clone());
        transport.disconnect().await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(connection.is_closed());
    }

    #[tokio::test]
    async fn test_event_subscription_receives_notification() {
        let transport = TestTransport::new(|_| DeviceAction::Reply);
        let connection = open(transport.clone());

        let mut builder = connection.subscription_request_builder();
        builder.add_event("alarm", "0x4020/0x7:DINT").unwrap();
        let mut subscription = builder.build().unwrap().execute().await.unwrap();
        assert_eq!(subscription.response_code("alarm"), Some(ResponseCode::Ok));

        transport.push(notification(7, 42)).await;
        let event = tokio::time::timeout(Duration::from_secs(1), subscription.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event.field, "alarm");
        assert_eq!(event.value, Value::Int32(42));
        assert_eq!(connection.stats().routed_notifications, 1);
    }

    #[tokio::test]
    async fn test_unsubscribe_stops_delivery() {
        let transport = TestTransport::new(|_| DeviceAction::Reply);
        let connection = open(transport.clone());

        let mut builder = connection.subscription_request_builder();
        builder.add_event("alarm", "0x4020/0x7:DINT").unwrap();
        let mut subscription = builder.build().unwrap().execute().await.unwrap();

        assert_eq!(connection.unsubscribe(subscription.id(), None), 1);
        assert_eq!(connection.subscription_count(), 0);
        transport.push(notification(7, 1)).await;
        let next = tokio::time::timeout(Duration::from_millis(200), subscription.recv()).await;
        assert_eq!(next.unwrap(), None);
    }
}
