// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # Custom Test Assertions
//!
//! Domain-specific assertion helpers for plcwire integration tests.
//!
//! ## Design Principles
//!
//! - Failure messages name the field and show the whole outcome
//! - Subscription helpers collect deliveries over a bounded window

use std::time::Duration;

use plcwire_conversation::EngineStatsSnapshot;
use plcwire_core::{
    ResponseCode, Response, SubscriptionEvent, SubscriptionResponse, Value,
};

// =============================================================================
// Response Assertions
// =============================================================================

/// Assertion extensions for [`Response`].
pub trait ResponseAssertions {
    /// Assert that `name` succeeded with `expected`.
    fn assert_value(&self, name: &str, expected: &Value);

    /// Assert the response code of `name`.
    fn assert_code(&self, name: &str, expected: ResponseCode);

    /// Assert that every field succeeded.
    fn assert_all_ok(&self);
}

impl ResponseAssertions for Response {
    fn assert_value(&self, name: &str, expected: &Value) {
        let item = self
            .get(name)
            .unwrap_or_else(|| panic!("field '{}' missing from response {:?}", name, self));
        assert_eq!(
            item.value(),
            Some(expected),
            "Expected {:?} for '{}', but got {:?}",
            expected,
            name,
            item.outcome
        );
    }

    fn assert_code(&self, name: &str, expected: ResponseCode) {
        assert_eq!(
            self.response_code(name),
            Some(expected),
            "Expected {} for '{}', but got {:?}",
            expected.as_str(),
            name,
            self.get(name).map(|item| &item.outcome)
        );
    }

    fn assert_all_ok(&self) {
        for item in self.iter() {
            assert!(
                item.code().is_ok(),
                "Expected every field OK, but '{}' ({}) failed: {:?}",
                item.name,
                item.address,
                item.outcome
            );
        }
    }
}

// =============================================================================
// Subscription Assertions
// =============================================================================

/// Assertion extensions for [`SubscriptionResponse`].
pub trait SubscriptionAssertions {
    /// Assert the exact set of established fields, in request order.
    fn assert_established(&self, expected: &[&str]);

    /// Assert the establishment code of `name`.
    fn assert_field_code(&self, name: &str, expected: ResponseCode);
}

impl SubscriptionAssertions for SubscriptionResponse {
    fn assert_established(&self, expected: &[&str]) {
        assert_eq!(
            self.established_fields(),
            expected,
            "Unexpected established fields; results: {:?}",
            self.results()
        );
    }

    fn assert_field_code(&self, name: &str, expected: ResponseCode) {
        assert_eq!(
            self.response_code(name),
            Some(expected),
            "Expected {} for subscription field '{}'; results: {:?}",
            expected.as_str(),
            name,
            self.results()
        );
    }
}

/// Collects every delivery that arrives within `window`.
pub async fn collect_events(
    subscription: &mut SubscriptionResponse,
    window: Duration,
) -> Vec<SubscriptionEvent> {
    let deadline = tokio::time::Instant::now() + window;
    let mut events = Vec::new();
    while let Ok(Some(event)) = tokio::time::timeout_at(deadline, subscription.recv()).await {
        events.push(event);
    }
    events
}

/// Distinct values of `events` in first-seen order.
pub fn distinct_values(events: &[SubscriptionEvent]) -> Vec<Value> {
    let mut values: Vec<Value> = Vec::new();
    for event in events {
        if !values.contains(&event.value) {
            values.push(event.value.clone());
        }
    }
    values
}

/// Events delivered for the field `name`.
pub fn events_for<'a>(events: &'a [SubscriptionEvent], name: &str) -> Vec<&'a SubscriptionEvent> {
    events.iter().filter(|e| e.field == name).collect()
}

// =============================================================================
// Stats Assertions
// =============================================================================

/// Assertion extensions for [`EngineStatsSnapshot`].
pub trait StatsAssertions {
    /// Assert the number of duplicate replies dropped.
    fn assert_duplicates(&self, expected: u64);

    /// Assert the number of exchanges that timed out.
    fn assert_timeouts(&self, expected: u64);
}

impl StatsAssertions for EngineStatsSnapshot {
    fn assert_duplicates(&self, expected: u64) {
        assert_eq!(
            self.duplicate_frames, expected,
            "Expected {} duplicate frames, stats: {:?}",
            expected, self
        );
    }

    fn assert_timeouts(&self, expected: u64) {
        assert_eq!(
            self.timeouts, expected,
            "Expected {} timeouts, stats: {:?}",
            expected, self
        );
    }
}
