// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # plcwire-core
//!
//! Core abstractions and shared types for the plcwire PLC communication
//! library.
//!
//! This crate provides the foundational types and traits used by every
//! plcwire component:
//!
//! - **Types**: `Value`, `ProtocolKind`, `ResponseCode`
//! - **Address**: Parsed CANopen, OPC UA and ADS field addresses
//! - **Error**: Build-time, per-field, connection and codec errors
//! - **Request**: Read/write requests, builders and responses
//! - **Subscription**: Cyclic, change-of-state and event subscriptions
//! - **Codec**: Codec and transport capabilities implemented per protocol
//!
//! ## Example
//!
//! ```rust,ignore
//! use plcwire_core::{ReadRequestBuilder, ResponseCode};
//!
//! let mut builder = connection.read_request_builder();
//! builder.add_item("A", "ns=2;s=HelloWorld/ScalarTypes/Int32");
//! let response = builder.build()?.execute().await?;
//! assert_eq!(response.response_code("A"), Some(ResponseCode::Ok));
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]
#![deny(unsafe_code)]

// =============================================================================
// Core Modules
// =============================================================================

pub mod address;
pub mod error;
pub mod types;

// =============================================================================
// Request Modules
// =============================================================================

pub mod codec;
pub mod request;
pub mod subscription;

// =============================================================================
// Re-exports for convenience
// =============================================================================

pub use address::*;
pub use error::*;
pub use types::*;

pub use codec::{Codec, Exchange, InboundEvent, InboundSink, Transport};
pub use request::{
    AddressQuery, AddressResolver, FieldOperation, FieldOutcome, ReadRequestBuilder, Request,
    RequestExecutor, RequestItem, Response, ResponseItem, WriteRequestBuilder,
};
pub use subscription::{
    SubscriptionEvent, SubscriptionField, SubscriptionId, SubscriptionKind, SubscriptionRequest,
    SubscriptionRequestBuilder, SubscriptionResponse,
};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
