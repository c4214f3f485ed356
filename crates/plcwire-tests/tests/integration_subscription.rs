// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # Subscription Integration Tests
//!
//! Subscriptions through a real connection and a simulated device:
//!
//! - Cyclic fields polled against a changing device
//! - Change-of-state fields, native (ADS notifications, NMT) and emulated
//! - Event fields fed by unsolicited frames
//! - Builder validation, establishment results and unsubscribe
//!
//! ## Test Categories
//!
//! - `test_cyclic_*`: Cyclic polling
//! - `test_change_*`: Change-of-state delivery
//! - `test_event_*`: Event delivery
//! - `test_builder_*`: Builder validation
//! - `test_unsubscribe_*`: Teardown

use std::time::Duration;

use plcwire_canopen::NmtState;
use plcwire_core::{AdsTarget, BuildError, CanOpenAddress, FieldAddress, ResponseCode, Value};
use plcwire_tests::prelude::*;

fn counter_target() -> AdsTarget {
    AdsTarget::Direct {
        index_group: 0x4020,
        index_offset: 0,
    }
}

// =============================================================================
// Cyclic
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_cyclic_sees_device_changes() {
    let device = AdsDeviceBuilder::new()
        .ramp(AddressFixtures::ADS_COUNTER, Duration::from_millis(250))
        .build();
    let harness = TestHarness::ads(device);

    let mut builder = harness.subscribe();
    builder
        .add_cyclic("counter", AddressFixtures::ADS_COUNTER, Duration::from_millis(100))
        .unwrap();
    let mut subscription = builder.build().unwrap().execute().await.unwrap();
    subscription.assert_established(&["counter"]);

    let events = collect_events(&mut subscription, Duration::from_millis(600)).await;

    assert!(events.len() >= 5, "expected a delivery per cycle, got {:?}", events);
    assert!(events.iter().all(|e| e.field == "counter"));
    let values = distinct_values(&events);
    assert!(values.len() >= 2, "expected at least two distinct values, got {:?}", values);
}

#[tokio::test(start_paused = true)]
async fn test_cyclic_repeats_unchanged_values() {
    let device = CanOpenDeviceBuilder::new()
        .object(AddressFixtures::SDO_DEVICE_TYPE, Value::UInt32(0x191))
        .build();
    let harness = TestHarness::canopen(device);

    let mut builder = harness.subscribe();
    builder
        .add_cyclic("type", AddressFixtures::SDO_DEVICE_TYPE, Duration::from_millis(50))
        .unwrap();
    let mut subscription = builder.build().unwrap().execute().await.unwrap();

    let events = collect_events(&mut subscription, Duration::from_millis(220)).await;
    assert!(events.len() >= 4, "got {:?}", events);
    assert_eq!(distinct_values(&events), vec![Value::UInt32(0x191)]);
}

#[tokio::test(start_paused = true)]
async fn test_cyclic_missing_field_not_established() {
    let device = AdsDeviceBuilder::new()
        .ramp(AddressFixtures::ADS_COUNTER, Duration::from_millis(250))
        .build();
    let harness = TestHarness::ads(device);

    let mut builder = harness.subscribe();
    builder
        .add_cyclic("counter", AddressFixtures::ADS_COUNTER, Duration::from_millis(100))
        .unwrap()
        .add_cyclic("ghost", AddressFixtures::ADS_MISSING, Duration::from_millis(100))
        .unwrap();
    let mut subscription = builder.build().unwrap().execute().await.unwrap();

    subscription.assert_established(&["counter"]);
    subscription.assert_field_code("counter", ResponseCode::Ok);
    subscription.assert_field_code("ghost", ResponseCode::NotFound);

    let events = collect_events(&mut subscription, Duration::from_millis(250)).await;
    assert!(!events.is_empty());
    assert!(events.iter().all(|e| e.field == "counter"));
}

// =============================================================================
// Change of State
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_change_emulated_delivers_each_change_once() {
    let device = CanOpenDeviceBuilder::new()
        .ramp(AddressFixtures::SDO_DEVICE_TYPE, Duration::from_millis(100))
        .build();
    let harness = TestHarness::canopen(device);

    let mut builder = harness.subscribe();
    builder
        .add_change_of_state("type", AddressFixtures::SDO_DEVICE_TYPE)
        .unwrap();
    let mut subscription = builder.build().unwrap().execute().await.unwrap();
    subscription.assert_established(&["type"]);

    let events = collect_events(&mut subscription, Duration::from_millis(340)).await;
    let values: Vec<Value> = events.iter().map(|e| e.value.clone()).collect();
    assert!(values.len() >= 3, "got {:?}", values);
    assert_eq!(values, distinct_values(&events), "repeated value delivered");
}

#[tokio::test(start_paused = true)]
async fn test_change_native_ads_notification() {
    let device = AdsDeviceBuilder::new()
        .variable(AddressFixtures::ADS_COUNTER, Value::Int32(1))
        .build();
    let harness = TestHarness::ads(device);

    let mut builder = harness.subscribe();
    builder
        .add_change_of_state("counter", AddressFixtures::ADS_COUNTER)
        .unwrap();
    let mut subscription = builder.build().unwrap().execute().await.unwrap();
    subscription.assert_established(&["counter"]);
    assert_eq!(harness.device.handle_count(), 1);
    assert_eq!(harness.connection.protocol().notification_count(), 1);

    harness.device.set_value(&counter_target(), Value::Int32(2));
    assert!(harness.transport.push(harness.device.notification_frame()).await);
    let event = subscription.recv().await.unwrap();
    assert_eq!(event.field, "counter");
    assert_eq!(event.value, Value::Int32(2));

    // same value again is not a change
    assert!(harness.transport.push(harness.device.notification_frame()).await);
    harness.device.set_value(&counter_target(), Value::Int32(3));
    assert!(harness.transport.push(harness.device.notification_frame()).await);
    let event = subscription.recv().await.unwrap();
    assert_eq!(event.value, Value::Int32(3));
    assert!(subscription.try_recv().is_none());
}

#[tokio::test(start_paused = true)]
async fn test_change_nmt_state_per_node() {
    let harness = TestHarness::canopen(CanOpenDeviceBuilder::new().build());

    let mut builder = harness.subscribe();
    builder.add_change_of_state("states", AddressFixtures::NMT_ANY).unwrap();
    let mut subscription = builder.build().unwrap().execute().await.unwrap();
    assert_eq!(harness.transport.sent_count(), 0);

    for (node, state) in [
        (3, NmtState::Operational),
        (3, NmtState::Operational),
        (5, NmtState::Operational),
        (3, NmtState::Stopped),
    ] {
        harness
            .transport
            .push(MockCanOpenDevice::heartbeat_frame(node, state))
            .await;
    }

    let events = collect_events(&mut subscription, Duration::from_millis(50)).await;
    let seen: Vec<(String, Value)> = events
        .iter()
        .map(|e| (e.address.to_string(), e.value.clone()))
        .collect();
    assert_eq!(
        seen,
        vec![
            ("NMT:3".to_string(), Value::UInt8(5)),
            ("NMT:5".to_string(), Value::UInt8(5)),
            ("NMT:3".to_string(), Value::UInt8(4)),
        ]
    );
}

// =============================================================================
// Events
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_event_wildcard_and_node_fields() {
    let harness = TestHarness::canopen(CanOpenDeviceBuilder::new().build());

    let mut builder = harness.subscribe();
    builder
        .add_event("nodes", AddressFixtures::NMT_ANY)
        .unwrap()
        .add_event("node1", AddressFixtures::NMT_NODE_1)
        .unwrap();
    let mut subscription = builder.build().unwrap().execute().await.unwrap();
    subscription.assert_established(&["nodes", "node1"]);

    harness
        .transport
        .push(MockCanOpenDevice::heartbeat_frame(1, NmtState::BootUp))
        .await;
    harness
        .transport
        .push(MockCanOpenDevice::heartbeat_frame(7, NmtState::PreOperational))
        .await;

    let events = collect_events(&mut subscription, Duration::from_millis(50)).await;
    let node1 = events_for(&events, "node1");
    assert_eq!(node1.len(), 1);
    assert_eq!(node1[0].value, Value::UInt8(0));
    assert_eq!(node1[0].address.to_string(), "NMT:1");
    assert_eq!(events_for(&events, "nodes").len(), 2);

    let node7 = events_for(&events, "nodes")
        .into_iter()
        .find(|e| e.address == FieldAddress::from(CanOpenAddress::nmt(7)))
        .expect("heartbeat of node 7");
    assert_eq!(node7.value, Value::UInt8(0x7F));
}

#[tokio::test(start_paused = true)]
async fn test_event_repeats_are_delivered() {
    let harness = TestHarness::canopen(CanOpenDeviceBuilder::new().build());

    let mut builder = harness.subscribe();
    builder.add_event("node1", AddressFixtures::NMT_NODE_1).unwrap();
    let mut subscription = builder.build().unwrap().execute().await.unwrap();

    for _ in 0..3 {
        harness
            .transport
            .push(MockCanOpenDevice::heartbeat_frame(1, NmtState::Operational))
            .await;
    }
    let events = collect_events(&mut subscription, Duration::from_millis(50)).await;
    assert_eq!(events.len(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_event_ads_registers_device_notification() {
    let device = AdsDeviceBuilder::new()
        .variable(AddressFixtures::ADS_COUNTER, Value::Int32(1))
        .build();
    let harness = TestHarness::ads(device);

    let mut builder = harness.subscribe();
    builder.add_event("alarm", AddressFixtures::ADS_COUNTER).unwrap();
    let mut subscription = builder.build().unwrap().execute().await.unwrap();
    subscription.assert_established(&["alarm"]);
    assert_eq!(harness.transport.sent_count(), 1);
    assert_eq!(harness.device.handle_count(), 1);

    // events are not deduplicated: the same sample twice is two deliveries
    for _ in 0..2 {
        assert!(harness.transport.push(harness.device.notification_frame()).await);
    }
    let events = collect_events(&mut subscription, Duration::from_millis(50)).await;
    assert_eq!(events.len(), 2, "got {:?}", events);
    assert!(events
        .iter()
        .all(|e| e.field == "alarm" && e.value == Value::Int32(1)));

    assert_eq!(harness.connection.unsubscribe(subscription.id(), None), 1);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(harness.device.handle_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_event_ads_symbol_unsupported() {
    let device = AdsDeviceBuilder::new()
        .variable(AddressFixtures::ADS_SYMBOL, 21.5f32)
        .build();
    let harness = TestHarness::ads(device);

    let mut builder = harness.subscribe();
    builder.add_event("temp", AddressFixtures::ADS_SYMBOL).unwrap();
    let subscription = builder.build().unwrap().execute().await.unwrap();

    subscription.assert_established(&[]);
    subscription.assert_field_code("temp", ResponseCode::Unsupported);
    assert_eq!(harness.transport.sent_count(), 0);
    assert_eq!(harness.connection.subscription_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_event_sdo_address_unsupported() {
    let device = CanOpenDeviceBuilder::new()
        .object(AddressFixtures::SDO_DEVICE_TYPE, Value::UInt32(0x191))
        .build();
    let harness = TestHarness::canopen(device);

    let mut builder = harness.subscribe();
    builder
        .add_event("type", AddressFixtures::SDO_DEVICE_TYPE)
        .unwrap()
        .add_event("nodes", AddressFixtures::NMT_ANY)
        .unwrap();
    let subscription = builder.build().unwrap().execute().await.unwrap();

    subscription.assert_established(&["nodes"]);
    subscription.assert_field_code("type", ResponseCode::Unsupported);
    assert_eq!(harness.transport.sent_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_event_unclaimed_frame_is_counted() {
    let harness = TestHarness::canopen(CanOpenDeviceBuilder::new().build());

    harness
        .transport
        .push(MockCanOpenDevice::heartbeat_frame(9, NmtState::Operational))
        .await;
    tokio::time::sleep(Duration::from_millis(10)).await;

    let stats = harness.connection.stats();
    assert_eq!(stats.unmatched_frames, 1);
    assert_eq!(stats.routed_notifications, 0);
}

// =============================================================================
// Builder Validation
// =============================================================================

#[tokio::test]
async fn test_builder_duplicate_event_rejected() {
    let harness = TestHarness::canopen(CanOpenDeviceBuilder::new().build());

    let mut builder = harness.subscribe();
    builder.add_event("nodes", AddressFixtures::NMT_ANY).unwrap();
    let err = builder.add_event("nodes", AddressFixtures::NMT_NODE_1).unwrap_err();
    assert!(matches!(err, BuildError::DuplicateFieldName { ref name } if name == "nodes"));

    // the first definition is kept
    let request = builder.build().unwrap();
    assert_eq!(request.field_names(), vec!["nodes"]);
    assert_eq!(request.get("nodes").unwrap().address.to_string(), "NMT");
}

#[tokio::test]
async fn test_builder_zero_interval_rejected() {
    let harness = TestHarness::ads(AdsDeviceBuilder::new().build());

    let mut builder = harness.subscribe();
    let err = builder
        .add_cyclic("counter", AddressFixtures::ADS_COUNTER, Duration::ZERO)
        .unwrap_err();
    assert!(matches!(err, BuildError::InvalidInterval { .. }));
}

#[tokio::test]
async fn test_builder_address_of_other_protocol_rejected() {
    let harness = TestHarness::ads(AdsDeviceBuilder::new().build());

    let mut builder = harness.subscribe();
    builder.add_event("nodes", AddressFixtures::NMT_ANY).unwrap();
    let err = builder.build().unwrap_err();
    assert!(matches!(err, BuildError::WrongProtocol { .. }));
}

#[tokio::test]
async fn test_builder_empty_request_rejected() {
    let harness = TestHarness::ads(AdsDeviceBuilder::new().build());
    let err = harness.subscribe().build().unwrap_err();
    assert_eq!(err, BuildError::EmptyRequest);
}

// =============================================================================
// Unsubscribe
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_unsubscribe_one_field() {
    let harness = TestHarness::canopen(CanOpenDeviceBuilder::new().build());

    let mut builder = harness.subscribe();
    builder
        .add_event("nodes", AddressFixtures::NMT_ANY)
        .unwrap()
        .add_event("node1", AddressFixtures::NMT_NODE_1)
        .unwrap();
    let mut subscription = builder.build().unwrap().execute().await.unwrap();

    assert_eq!(harness.connection.unsubscribe(subscription.id(), Some("node1")), 1);
    assert_eq!(harness.connection.subscription_count(), 1);

    harness
        .transport
        .push(MockCanOpenDevice::heartbeat_frame(1, NmtState::Operational))
        .await;
    let events = collect_events(&mut subscription, Duration::from_millis(50)).await;
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].field, "nodes");
}

#[tokio::test(start_paused = true)]
async fn test_unsubscribe_stops_polling_and_closes_channel() {
    let device = AdsDeviceBuilder::new()
        .ramp(AddressFixtures::ADS_COUNTER, Duration::from_millis(250))
        .build();
    let harness = TestHarness::ads(device);

    let mut builder = harness.subscribe();
    builder
        .add_cyclic("counter", AddressFixtures::ADS_COUNTER, Duration::from_millis(100))
        .unwrap();
    let mut subscription = builder.build().unwrap().execute().await.unwrap();
    let _ = collect_events(&mut subscription, Duration::from_millis(150)).await;

    assert_eq!(harness.connection.unsubscribe(subscription.id(), None), 1);
    assert_eq!(harness.connection.subscription_count(), 0);

    let requests = harness.device.request_count();
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(harness.device.request_count(), requests);

    while subscription.recv().await.is_some() {}
    assert_eq!(harness.connection.unsubscribe(subscription.id(), None), 0);
}

#[tokio::test(start_paused = true)]
async fn test_unsubscribe_on_close() {
    let harness = TestHarness::canopen(CanOpenDeviceBuilder::new().build());

    let mut builder = harness.subscribe();
    builder.add_event("nodes", AddressFixtures::NMT_ANY).unwrap();
    let mut subscription = builder.build().unwrap().execute().await.unwrap();
    assert_eq!(harness.connection.subscription_count(), 1);

    harness.connection.close().await;
    assert_eq!(harness.connection.subscription_count(), 0);
    assert!(subscription.recv().await.is_none());

    let mut builder = harness.subscribe();
    builder.add_cyclic("type", AddressFixtures::SDO_DEVICE_TYPE, Duration::from_millis(10)).unwrap();
    let late = builder.build().unwrap().execute().await.unwrap();
    late.assert_field_code("type", ResponseCode::ConnectionClosed);
    assert!(late.established_fields().is_empty());
}
