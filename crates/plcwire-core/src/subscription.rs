// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Subscription requests.
//!
//! Three delivery models are supported:
//!
//! | Kind | Delivery |
//! |------|----------|
//! | [`SubscriptionKind::Cyclic`] | the engine polls at a fixed interval |
//! | [`SubscriptionKind::ChangeOfState`] | native change notification, or polling with value diffing |
//! | [`SubscriptionKind::Event`] | passive, unsolicited frames routed by address |
//!
//! Event deliveries are demultiplexed purely by field name, so
//! [`SubscriptionRequestBuilder::add_event`] rejects a name that is already
//! present. Cyclic and change-of-state fields replace earlier entries of the
//! same name.

use crate::address::FieldAddress;
use crate::error::{BuildError, BuildResult, ConnectionError, ConnectionResult, FieldResult};
use crate::request::{AddressQuery, AddressResolver, FieldMap, RequestExecutor};
use crate::types::{ResponseCode, Value};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

// =============================================================================
// Subscription Kind
// =============================================================================

/// How values of a subscribed field are delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "interval", rename_all = "snake_case")]
pub enum SubscriptionKind {
    /// Poll at the given interval (strictly positive).
    Cyclic(Duration),

    /// Deliver when the value changes.
    ChangeOfState,

    /// Deliver unsolicited frames addressed to the field.
    Event,
}

impl SubscriptionKind {
    /// Returns the polling interval for cyclic subscriptions.
    pub fn interval(&self) -> Option<Duration> {
        match self {
            SubscriptionKind::Cyclic(interval) => Some(*interval),
            _ => None,
        }
    }

    /// Returns the kind name for logging.
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionKind::Cyclic(_) => "cyclic",
            SubscriptionKind::ChangeOfState => "change_of_state",
            SubscriptionKind::Event => "event",
        }
    }
}

impl fmt::Display for SubscriptionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubscriptionKind::Cyclic(interval) => write!(f, "cyclic({:?})", interval),
            other => f.write_str(other.as_str()),
        }
    }
}

// =============================================================================
// Subscription Id
// =============================================================================

/// Identifies an established subscription on a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SubscriptionId(pub u64);

impl SubscriptionId {
    /// Creates a subscription ID.
    #[inline]
    pub fn new(id: u64) -> Self {
        Self(id)
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

// =============================================================================
// Subscription Request
// =============================================================================

/// One resolved subscription field.
#[derive(Debug, Clone, PartialEq)]
pub struct SubscriptionField {
    /// Field name
    pub name: String,
    /// Resolved address
    pub address: FieldAddress,
    /// Delivery model
    pub kind: SubscriptionKind,
}

/// An immutable, ordered set of subscription fields.
#[derive(Clone)]
pub struct SubscriptionRequest {
    fields: Arc<[SubscriptionField]>,
    executor: Option<Arc<dyn RequestExecutor>>,
}

impl SubscriptionRequest {
    /// Returns the fields in insertion order.
    #[inline]
    pub fn fields(&self) -> &[SubscriptionField] {
        &self.fields
    }

    /// Returns the field with the given name.
    pub fn get(&self, name: &str) -> Option<&SubscriptionField> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Returns the field names in insertion order.
    pub fn field_names(&self) -> Vec<&str> {
        self.fields.iter().map(|f| f.name.as_str()).collect()
    }

    /// Number of fields.
    #[inline]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Always `false`; empty requests cannot be built.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Establishes the subscription on the connection it was built for.
    pub async fn execute(&self) -> ConnectionResult<SubscriptionResponse> {
        match &self.executor {
            Some(executor) => executor.subscribe(self).await,
            None => Err(ConnectionError::NotBound),
        }
    }
}

impl fmt::Debug for SubscriptionRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionRequest")
            .field("fields", &self.fields)
            .field("bound", &self.executor.is_some())
            .finish()
    }
}

/// Builds subscription requests.
///
/// # Examples
///
/// ```rust,ignore
/// let mut builder = connection.subscription_request_builder();
/// builder
///     .add_cyclic("temperature", "SDO:5:0x6000/0x1:INTEGER16", Duration::from_millis(100))?
///     .add_event("state", "NMT")?;
///
/// assert!(builder.add_event("state", "NMT:5").is_err());
/// let subscription = builder.build()?.execute().await?;
/// ```
pub struct SubscriptionRequestBuilder {
    resolver: Arc<dyn AddressResolver>,
    executor: Option<Arc<dyn RequestExecutor>>,
    fields: FieldMap<(AddressQuery, SubscriptionKind)>,
}

impl fmt::Debug for SubscriptionRequestBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionRequestBuilder")
            .field("fields", &self.fields)
            .field("bound", &self.executor.is_some())
            .finish()
    }
}

impl SubscriptionRequestBuilder {
    /// Creates a builder that parses addresses with `resolver`.
    pub fn new(resolver: Arc<dyn AddressResolver>) -> Self {
        Self {
            resolver,
            executor: None,
            fields: FieldMap::new(),
        }
    }

    /// Binds built requests to an executor.
    pub fn with_executor(mut self, executor: Arc<dyn RequestExecutor>) -> Self {
        self.executor = Some(executor);
        self
    }

    /// Adds a cyclic field polled every `interval`.
    pub fn add_cyclic(
        &mut self,
        name: impl Into<String>,
        address: impl Into<AddressQuery>,
        interval: Duration,
    ) -> BuildResult<&mut Self> {
        let name = name.into();
        if interval.is_zero() {
            return Err(BuildError::invalid_interval(name, "interval must be greater than zero"));
        }
        self.fields
            .insert(name, (address.into(), SubscriptionKind::Cyclic(interval)));
        Ok(self)
    }

    /// Adds a change-of-state field.
    pub fn add_change_of_state(
        &mut self,
        name: impl Into<String>,
        address: impl Into<AddressQuery>,
    ) -> BuildResult<&mut Self> {
        self.fields
            .insert(name.into(), (address.into(), SubscriptionKind::ChangeOfState));
        Ok(self)
    }

    /// Adds an event field. Fails if `name` is already present.
    pub fn add_event(
        &mut self,
        name: impl Into<String>,
        address: impl Into<AddressQuery>,
    ) -> BuildResult<&mut Self> {
        let name = name.into();
        if self.fields.contains(&name) {
            return Err(BuildError::duplicate_field(name));
        }
        self.fields.insert(name, (address.into(), SubscriptionKind::Event));
        Ok(self)
    }

    /// Returns the field names added so far.
    pub fn field_names(&self) -> Vec<&str> {
        self.fields.names().collect()
    }

    /// Resolves every address and freezes the request.
    pub fn build(self) -> BuildResult<SubscriptionRequest> {
        if self.fields.len() == 0 {
            return Err(BuildError::EmptyRequest);
        }
        let mut fields = Vec::with_capacity(self.fields.len());
        for (name, (query, kind)) in self.fields.into_entries() {
            let address = query.resolve(self.resolver.as_ref())?;
            fields.push(SubscriptionField { name, address, kind });
        }
        Ok(SubscriptionRequest {
            fields: fields.into(),
            executor: self.executor,
        })
    }
}

// =============================================================================
// Deliveries
// =============================================================================

/// A value delivered to a subscriber, tagged with its field name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscriptionEvent {
    /// Subscribed field name
    pub field: String,
    /// Address the value came from
    pub address: FieldAddress,
    /// Delivered value
    pub value: Value,
    /// When the value was received
    pub timestamp: DateTime<Utc>,
}

impl SubscriptionEvent {
    /// Creates an event stamped with the current time.
    pub fn new(field: impl Into<String>, address: FieldAddress, value: Value) -> Self {
        Self {
            field: field.into(),
            address,
            value,
            timestamp: Utc::now(),
        }
    }
}

/// Establishment results plus the delivery channel of a subscription.
#[derive(Debug)]
pub struct SubscriptionResponse {
    id: SubscriptionId,
    results: Vec<(String, FieldResult<()>)>,
    receiver: mpsc::Receiver<SubscriptionEvent>,
}

impl SubscriptionResponse {
    /// Creates a subscription response.
    pub fn new(
        id: SubscriptionId,
        results: Vec<(String, FieldResult<()>)>,
        receiver: mpsc::Receiver<SubscriptionEvent>,
    ) -> Self {
        Self { id, results, receiver }
    }

    /// Returns the subscription ID.
    #[inline]
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Returns the establishment code of a field.
    pub fn response_code(&self, name: &str) -> Option<ResponseCode> {
        self.results.iter().find(|(n, _)| n == name).map(|(_, r)| match r {
            Ok(()) => ResponseCode::Ok,
            Err(e) => e.response_code(),
        })
    }

    /// Returns the establishment results in request order.
    pub fn results(&self) -> &[(String, FieldResult<()>)] {
        &self.results
    }

    /// Returns the names of the fields that were established.
    pub fn established_fields(&self) -> Vec<&str> {
        self.results
            .iter()
            .filter(|(_, r)| r.is_ok())
            .map(|(n, _)| n.as_str())
            .collect()
    }

    /// Receives the next delivery. Returns `None` once the subscription is
    /// torn down and every queued delivery has been consumed.
    pub async fn recv(&mut self) -> Option<SubscriptionEvent> {
        self.receiver.recv().await
    }

    /// Receives a delivery without waiting.
    pub fn try_recv(&mut self) -> Option<SubscriptionEvent> {
        self.receiver.try_recv().ok()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::CanOpenAddress;

    struct NmtResolver;

    impl AddressResolver for NmtResolver {
        fn resolve(&self, address: &str) -> BuildResult<FieldAddress> {
            match address {
                "NMT" => Ok(CanOpenAddress::nmt(0).into()),
                _ => match address.strip_prefix("NMT:").and_then(|n| n.parse().ok()) {
                    Some(node) => Ok(CanOpenAddress::nmt(node).into()),
                    None => Err(BuildError::invalid_address(address, "expected NMT[:<node>]")),
                },
            }
        }
    }

    fn builder() -> SubscriptionRequestBuilder {
        SubscriptionRequestBuilder::new(Arc::new(NmtResolver))
    }

    #[test]
    fn test_duplicate_event_rejected() {
        let mut b = builder();
        b.add_event("X", "NMT").unwrap();
        let err = b.add_event("X", "NMT:4").unwrap_err();
        assert_eq!(err, BuildError::duplicate_field("X"));

        let request = b.build().unwrap();
        assert_eq!(request.len(), 1);
        assert_eq!(request.get("X").unwrap().address, CanOpenAddress::nmt(0).into());
    }

    #[test]
    fn test_cyclic_and_change_of_state_overwrite() {
        let mut b = builder();
        b.add_cyclic("a", "NMT:1", Duration::from_millis(100))
            .unwrap()
            .add_change_of_state("b", "NMT:2")
            .unwrap()
            .add_change_of_state("a", "NMT:3")
            .unwrap();
        let request = b.build().unwrap();
        assert_eq!(request.field_names(), vec!["a", "b"]);
        assert_eq!(request.get("a").unwrap().kind, SubscriptionKind::ChangeOfState);
    }

    #[test]
    fn test_event_after_cyclic_with_same_name_rejected() {
        let mut b = builder();
        b.add_cyclic("a", "NMT:1", Duration::from_secs(1)).unwrap();
        assert!(b.add_event("a", "NMT").is_err());
    }

    #[test]
    fn test_zero_interval_rejected() {
        let mut b = builder();
        let err = b.add_cyclic("a", "NMT:1", Duration::ZERO).unwrap_err();
        assert!(matches!(err, BuildError::InvalidInterval { .. }));
        assert!(b.field_names().is_empty());
    }

    #[test]
    fn test_lazy_parse_fails_at_build() {
        let mut b = builder();
        b.add_event("bad", "NMT:xyz").unwrap();
        assert!(matches!(b.build(), Err(BuildError::InvalidAddress { .. })));
    }

    #[test]
    fn test_subscription_id_display() {
        assert_eq!(SubscriptionId::new(3).to_string(), "sub-3");
        assert_eq!(
            SubscriptionKind::Cyclic(Duration::from_millis(100)).interval(),
            Some(Duration::from_millis(100))
        );
        assert_eq!(SubscriptionKind::Event.interval(), None);
    }

    #[tokio::test]
    async fn test_response_drains_queued_events() {
        let (tx, rx) = mpsc::channel(4);
        let mut response = SubscriptionResponse::new(
            SubscriptionId::new(1),
            vec![("state".to_string(), Ok(()))],
            rx,
        );
        tx.send(SubscriptionEvent::new("state", CanOpenAddress::nmt(2).into(), Value::UInt8(5)))
            .await
            .unwrap();
        drop(tx);
        assert_eq!(response.recv().await.unwrap().field, "state");
        assert!(response.recv().await.is_none());
        assert_eq!(response.established_fields(), vec!["state"]);
        assert_eq!(response.response_code("state"), Some(ResponseCode::Ok));
    }
}
