// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # plcwire-conversation
//!
//! The conversation and correlation engine shared by every plcwire protocol
//! driver.
//!
//! Industrial protocols pair replies with requests in different ways: ADS
//! echoes an invoke ID, CANopen SDO is identified by node and service, and
//! some frames are never requested at all. This crate turns all of them into
//! one model:
//!
//! - **Pending registry**: one entry per outstanding exchange, registered
//!   before the frame is sent and removed atomically by whoever resolves it
//! - **Predicates**: identity and "expected type OR abort" matching
//! - **Engine**: fan-out or batched conversations with per-field outcomes
//!   and per-exchange deadlines
//! - **Subscriptions**: cyclic and change-of-state polling plus routing of
//!   unsolicited frames to event subscribers
//! - **Connection**: protocol + transport + engine behind request builders
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐    ┌────────────────────┐    ┌─────────────────┐
//! │  Builders   │───►│ ConversationEngine │───►│    Transport    │
//! └─────────────┘    └────────────────────┘    └─────────────────┘
//!                       │ PendingRegistry ▲              │
//!                       ▼                 │ route        ▼
//!              ┌──────────────────┐    ┌──┴─────────────────────┐
//!              │ Subscription     │◄───│ Dispatch loop          │
//!              │ Registry         │    │ (one per connection)   │
//!              └──────────────────┘    └────────────────────────┘
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]
#![deny(unsafe_code)]

pub mod connection;
mod dispatch;
pub mod engine;
pub mod pending;
pub mod predicate;
pub mod protocol;
pub mod stats;
pub mod subscription;

#[cfg(test)]
pub(crate) mod testing;

pub use connection::{Connection, ConnectionState};
pub use engine::{plan, ConversationEngine};
pub use pending::{Completion, Deadline, PendingHandle, PendingRegistry, Routing};
pub use predicate::{
    classify, AbortInfo, BoxPredicate, Classification, MatchPredicate, ResponsePredicate, Verdict,
};
pub use protocol::{DispatchMode, Establishment, Notification, Protocol};
pub use stats::{EngineStats, EngineStatsSnapshot};
pub use subscription::{PollMode, SubscriptionRegistry};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
