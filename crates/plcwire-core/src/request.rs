// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Read/write requests, their builders and responses.
//!
//! A [`Request`] is an immutable, ordered list of named field operations.
//! Builders accumulate fields into a local ordered map and parse address
//! strings only inside `build()`, so building is the single point where
//! address grammar errors surface. A [`Response`] has exactly one entry per
//! field name of the request that produced it, in request order.
//!
//! # Examples
//!
//! ```rust,ignore
//! let mut builder = connection.read_request_builder();
//! builder
//!     .add_item("A", "ns=2;s=HelloWorld/ScalarTypes/Int32")
//!     .add_item("Missing", "ns=2;i=12512623");
//! let response = builder.build()?.execute().await?;
//!
//! assert_eq!(response.response_code("A"), Some(ResponseCode::Ok));
//! assert_eq!(response.response_code("Missing"), Some(ResponseCode::NotFound));
//! ```

use crate::address::FieldAddress;
use crate::error::{BuildError, BuildResult, ConnectionError, ConnectionResult, FieldError, FieldResult};
use crate::subscription::{SubscriptionKind, SubscriptionRequest, SubscriptionResponse, SubscriptionId};
use crate::types::{ProtocolKind, ResponseCode, Value};
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;

// =============================================================================
// Seams
// =============================================================================

/// Turns address strings into [`FieldAddress`] values.
///
/// Implemented by the address parsers in `plcwire-config`.
pub trait AddressResolver: Send + Sync {
    /// Parses an address string.
    fn resolve(&self, address: &str) -> BuildResult<FieldAddress>;

    /// The only protocol this resolver accepts, if restricted.
    fn protocol(&self) -> Option<ProtocolKind> {
        None
    }
}

/// Executes built requests. Implemented by connections.
#[async_trait]
pub trait RequestExecutor: Send + Sync {
    /// Runs a read/write request to completion.
    async fn execute(&self, request: &Request) -> ConnectionResult<Response>;

    /// Establishes the fields of a subscription request.
    async fn subscribe(&self, request: &SubscriptionRequest) -> ConnectionResult<SubscriptionResponse>;

    /// Stops delivery for one field, or for the whole subscription when
    /// `field` is `None`. Returns the number of fields torn down.
    async fn unsubscribe(&self, id: SubscriptionId, field: Option<&str>) -> usize;
}

// =============================================================================
// Field Operation
// =============================================================================

/// What to do with one field.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldOperation {
    /// Read the current value.
    Read,

    /// Write the given value.
    Write(Value),

    /// Establish a subscription of the given kind.
    Subscribe(SubscriptionKind),

    /// Release a subscription the device holds for this field.
    Unsubscribe,
}

impl FieldOperation {
    /// Returns the operation name for logging.
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldOperation::Read => "read",
            FieldOperation::Write(_) => "write",
            FieldOperation::Subscribe(_) => "subscribe",
            FieldOperation::Unsubscribe => "unsubscribe",
        }
    }
}

/// One named field operation of a request.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestItem {
    /// Field name, unique within its request
    pub name: String,
    /// Resolved address
    pub address: FieldAddress,
    /// Operation to perform
    pub operation: FieldOperation,
}

impl RequestItem {
    /// Creates a request item.
    pub fn new(name: impl Into<String>, address: FieldAddress, operation: FieldOperation) -> Self {
        Self {
            name: name.into(),
            address,
            operation,
        }
    }
}

// =============================================================================
// Address Query
// =============================================================================

/// An address as given to a builder: either text parsed at `build()`, or an
/// already resolved value.
#[derive(Debug, Clone, PartialEq)]
pub enum AddressQuery {
    /// Unparsed address string
    Text(String),
    /// Already parsed address
    Resolved(FieldAddress),
}

impl AddressQuery {
    pub(crate) fn resolve(self, resolver: &dyn AddressResolver) -> BuildResult<FieldAddress> {
        let (address, text) = match self {
            AddressQuery::Text(text) => (resolver.resolve(&text)?, text),
            AddressQuery::Resolved(address) => {
                let text = address.to_string();
                (address, text)
            }
        };
        match resolver.protocol() {
            Some(expected) if expected != address.protocol() => Err(BuildError::WrongProtocol {
                address: text,
                expected,
                actual: address.protocol(),
            }),
            _ => Ok(address),
        }
    }
}

impl From<&str> for AddressQuery {
    fn from(s: &str) -> Self {
        AddressQuery::Text(s.to_string())
    }
}

impl From<String> for AddressQuery {
    fn from(s: String) -> Self {
        AddressQuery::Text(s)
    }
}

impl From<FieldAddress> for AddressQuery {
    fn from(address: FieldAddress) -> Self {
        AddressQuery::Resolved(address)
    }
}

// =============================================================================
// Ordered field map
// =============================================================================

/// Insertion-ordered map keyed by field name. Re-inserting a name replaces
/// the value in place and keeps the original position.
#[derive(Debug, Clone)]
pub(crate) struct FieldMap<T> {
    entries: Vec<(String, T)>,
}

impl<T> FieldMap<T> {
    pub(crate) fn new() -> Self {
        Self { entries: Vec::new() }
    }

    pub(crate) fn insert(&mut self, name: String, value: T) {
        match self.entries.iter_mut().find(|(n, _)| *n == name) {
            Some(slot) => slot.1 = value,
            None => self.entries.push((name, value)),
        }
    }

    pub(crate) fn contains(&self, name: &str) -> bool {
        self.entries.iter().any(|(n, _)| n == name)
    }

    pub(crate) fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(n, _)| n.as_str())
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn into_entries(self) -> Vec<(String, T)> {
        self.entries
    }
}

// =============================================================================
// Request
// =============================================================================

/// An immutable, ordered collection of named field operations.
#[derive(Clone)]
pub struct Request {
    items: Arc<[RequestItem]>,
    executor: Option<Arc<dyn RequestExecutor>>,
}

impl Request {
    /// Creates an unbound request from resolved items.
    ///
    /// Later items replace earlier ones with the same name, keeping the
    /// earlier position.
    pub fn from_items(items: impl IntoIterator<Item = RequestItem>) -> BuildResult<Self> {
        let mut map = FieldMap::new();
        for item in items {
            map.insert(item.name.clone(), item);
        }
        Self::from_map(map, None)
    }

    fn from_map(
        map: FieldMap<RequestItem>,
        executor: Option<Arc<dyn RequestExecutor>>,
    ) -> BuildResult<Self> {
        if map.len() == 0 {
            return Err(BuildError::EmptyRequest);
        }
        let items: Vec<RequestItem> = map.into_entries().into_iter().map(|(_, item)| item).collect();
        Ok(Self {
            items: items.into(),
            executor,
        })
    }

    /// Returns the items in insertion order.
    #[inline]
    pub fn items(&self) -> &[RequestItem] {
        &self.items
    }

    /// Returns the item with the given name.
    pub fn get(&self, name: &str) -> Option<&RequestItem> {
        self.items.iter().find(|item| item.name == name)
    }

    /// Returns the field names in insertion order.
    pub fn field_names(&self) -> Vec<&str> {
        self.items.iter().map(|item| item.name.as_str()).collect()
    }

    /// Number of fields.
    #[inline]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Always `false`; empty requests cannot be built.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Executes the request on the connection it was built for.
    pub async fn execute(&self) -> ConnectionResult<Response> {
        match &self.executor {
            Some(executor) => executor.execute(self).await,
            None => Err(ConnectionError::NotBound),
        }
    }
}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("items", &self.items)
            .field("bound", &self.executor.is_some())
            .finish()
    }
}

// =============================================================================
// Builders
// =============================================================================

/// Builds read requests.
pub struct ReadRequestBuilder {
    resolver: Arc<dyn AddressResolver>,
    executor: Option<Arc<dyn RequestExecutor>>,
    fields: FieldMap<AddressQuery>,
}

impl ReadRequestBuilder {
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

    /// Adds a field to read. A repeated name replaces the earlier address.
    pub fn add_item(&mut self, name: impl Into<String>, address: impl Into<AddressQuery>) -> &mut Self {
        self.fields.insert(name.into(), address.into());
        self
    }

    /// Returns the field names added so far.
    pub fn field_names(&self) -> Vec<&str> {
        self.fields.names().collect()
    }

    /// Resolves every address and freezes the request.
    pub fn build(self) -> BuildResult<Request> {
        let mut items = FieldMap::new();
        for (name, query) in self.fields.into_entries() {
            let address = query.resolve(self.resolver.as_ref())?;
            items.insert(name.clone(), RequestItem::new(name, address, FieldOperation::Read));
        }
        Request::from_map(items, self.executor)
    }
}

/// Builds write requests.
pub struct WriteRequestBuilder {
    resolver: Arc<dyn AddressResolver>,
    executor: Option<Arc<dyn RequestExecutor>>,
    fields: FieldMap<(AddressQuery, Value)>,
}

impl WriteRequestBuilder {
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

    /// Adds a field to write. A repeated name replaces the earlier entry.
    pub fn add_item(
        &mut self,
        name: impl Into<String>,
        address: impl Into<AddressQuery>,
        value: impl Into<Value>,
    ) -> &mut Self {
        self.fields.insert(name.into(), (address.into(), value.into()));
        self
    }

    /// Returns the field names added so far.
    pub fn field_names(&self) -> Vec<&str> {
        self.fields.names().collect()
    }

    /// Resolves every address and freezes the request.
    pub fn build(self) -> BuildResult<Request> {
        let mut items = FieldMap::new();
        for (name, (query, value)) in self.fields.into_entries() {
            let address = query.resolve(self.resolver.as_ref())?;
            items.insert(
                name.clone(),
                RequestItem::new(name, address, FieldOperation::Write(value)),
            );
        }
        Request::from_map(items, self.executor)
    }
}

// =============================================================================
// Response
// =============================================================================

/// Result of one field: the read value (if any) or the failure.
pub type FieldOutcome = FieldResult<Option<Value>>;

/// Outcome of one field of a request.
#[derive(Debug, Clone, PartialEq)]
pub struct ResponseItem {
    /// Field name
    pub name: String,
    /// Address the field was sent to
    pub address: FieldAddress,
    /// Value or failure
    pub outcome: FieldOutcome,
}

impl ResponseItem {
    /// Returns the response code of this field.
    pub fn code(&self) -> ResponseCode {
        match &self.outcome {
            Ok(_) => ResponseCode::Ok,
            Err(e) => e.response_code(),
        }
    }

    /// Returns the value for successful reads.
    pub fn value(&self) -> Option<&Value> {
        self.outcome.as_ref().ok().and_then(|v| v.as_ref())
    }

    /// Returns the failure, if any.
    pub fn error(&self) -> Option<&FieldError> {
        self.outcome.as_ref().err()
    }
}

/// Per-field outcomes of a request, in request order.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    items: Vec<ResponseItem>,
}

impl Response {
    /// Pairs each request item with its outcome.
    ///
    /// Items without an outcome are reported as
    /// [`FieldError::Decode`] so the response always covers every field.
    pub fn from_outcomes(request: &Request, outcomes: Vec<FieldOutcome>) -> Self {
        let mut outcomes = outcomes.into_iter();
        let items = request
            .items()
            .iter()
            .map(|item| ResponseItem {
                name: item.name.clone(),
                address: item.address.clone(),
                outcome: outcomes
                    .next()
                    .unwrap_or_else(|| Err(FieldError::decode("no outcome for field"))),
            })
            .collect();
        Self { items }
    }

    /// Fails every field of `request` with the same error.
    pub fn failed(request: &Request, error: FieldError) -> Self {
        let outcomes = request.items().iter().map(|_| Err(error.clone())).collect();
        Self::from_outcomes(request, outcomes)
    }

    /// Returns the entry for a field.
    pub fn get(&self, name: &str) -> Option<&ResponseItem> {
        self.items.iter().find(|item| item.name == name)
    }

    /// Returns the response code of a field.
    pub fn response_code(&self, name: &str) -> Option<ResponseCode> {
        self.get(name).map(ResponseItem::code)
    }

    /// Returns the read value of a field.
    pub fn value(&self, name: &str) -> Option<&Value> {
        self.get(name).and_then(ResponseItem::value)
    }

    /// Returns the field names in request order.
    pub fn field_names(&self) -> Vec<&str> {
        self.items.iter().map(|item| item.name.as_str()).collect()
    }

    /// Iterates over the entries in request order.
    pub fn iter(&self) -> impl Iterator<Item = &ResponseItem> {
        self.items.iter()
    }

    /// Number of entries.
    #[inline]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Returns `true` when the response has no entries.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Returns `true` when every field succeeded.
    pub fn is_all_ok(&self) -> bool {
        self.items.iter().all(|item| item.outcome.is_ok())
    }
}

// =============================================================================
// Tests
// =============================================================================
