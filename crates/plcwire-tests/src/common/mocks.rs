// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # Mock Implementations
//!
//! An in-process transport plus simulated ADS and CANopen devices.
//!
//! ## Design Principles
//!
//! - Devices speak the real wire format: requests are decoded and replies
//!   are encoded with the driver crates' own frame types
//! - Faults are injected per object (silence, missing objects) or per
//!   transport (send failures, duplicated replies, latency)
//! - Replies are delivered from spawned tasks, so they race each other and
//!   the caller exactly like frames from a socket
//! - Time is read from `tokio::time`, so tests can run with paused time

use async_trait::async_trait;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use plcwire_ads::types::{INDEX_GROUP_SUM_READ, INDEX_GROUP_SYM_VALUE_BY_NAME};
use plcwire_ads::value::{decode_value as decode_ads, encode_value as encode_ads};
use plcwire_ads::{
    AdsCommand, AdsFrame, AdsPayload, AmsHeader, AmsRoute, NotificationSample, NotificationStamp,
};
use plcwire_canopen::value::{decode_value as decode_sdo, encode_value as encode_sdo};
use plcwire_canopen::{
    CanOpenFrame, CanOpenService, NmtState, SdoPayload, ABORT_OBJECT_DOES_NOT_EXIST,
};
use plcwire_core::{
    AdsAddress, AdsTarget, CanOpenDataType, ConnectionError, ConnectionResult, InboundSink,
    Transport, Value,
};

// =============================================================================
// Simulated Device
// =============================================================================

/// One reply produced by a simulated device.
#[derive(Debug, Clone)]
pub struct Reply {
    /// Encoded frame.
    pub frame: Bytes,
    /// How long the device takes to answer.
    pub delay: Duration,
}

impl Reply {
    /// A reply sent immediately.
    pub fn now(frame: Bytes) -> Self {
        Self {
            frame,
            delay: Duration::ZERO,
        }
    }

    /// A reply sent after `delay`.
    pub fn after(frame: Bytes, delay: Duration) -> Self {
        Self { frame, delay }
    }
}

/// A device answering encoded request frames.
pub trait SimulatedDevice: Send + Sync + 'static {
    /// Answers one request. An empty result means the device stays silent.
    fn handle(&self, request: &[u8]) -> Vec<Reply>;

    /// Short name used in transport descriptions.
    fn name(&self) -> &'static str {
        "device"
    }
}

/// A device value: fixed, or a counter advancing with time.
#[derive(Debug, Clone, PartialEq)]
pub enum Variable {
    /// Holds a value until written.
    Fixed(Value),
    /// `Int32` counting elapsed `period`s since `start`.
    Ramp {
        /// When the counter was zero.
        start: Instant,
        /// Time between increments.
        period: Duration,
    },
}

impl Variable {
    /// A counter starting now.
    pub fn ramp(period: Duration) -> Self {
        Variable::Ramp {
            start: Instant::now(),
            period,
        }
    }

    /// The value the device reports right now.
    pub fn current(&self) -> Value {
        match self {
            Variable::Fixed(value) => value.clone(),
            Variable::Ramp { start, period } => {
                let steps = start.elapsed().as_nanos() / period.as_nanos().max(1);
                Value::Int32(i32::try_from(steps).unwrap_or(i32::MAX))
            }
        }
    }
}

// =============================================================================
// Mock Transport
// =============================================================================

/// An in-process transport in front of a [`SimulatedDevice`].
pub struct MockTransport<D: SimulatedDevice> {
    device: Arc<D>,
    sink: Mutex<Option<InboundSink>>,
    sent: Mutex<Vec<Bytes>>,
    latency: Mutex<Duration>,
    fail_sends: AtomicBool,
    duplicate_replies: AtomicBool,
    closed: AtomicBool,
}

impl<D: SimulatedDevice> MockTransport<D> {
    /// Creates a transport talking to `device`.
    pub fn new(device: Arc<D>) -> Arc<Self> {
        Arc::new(Self {
            device,
            sink: Mutex::new(None),
            sent: Mutex::new(Vec::new()),
            latency: Mutex::new(Duration::ZERO),
            fail_sends: AtomicBool::new(false),
            duplicate_replies: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        })
    }

    /// The simulated device.
    pub fn device(&self) -> &Arc<D> {
        &self.device
    }

    /// Makes every send fail with a transport error.
    pub fn fail_sends(&self, fail: bool) {
        self.fail_sends.store(fail, Ordering::SeqCst);
    }

    /// Delivers every reply twice.
    pub fn duplicate_replies(&self, enabled: bool) {
        self.duplicate_replies.store(enabled, Ordering::SeqCst);
    }

    /// Adds `latency` to every reply.
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock() = latency;
    }

    /// Number of frames written so far.
    pub fn sent_count(&self) -> usize {
        self.sent.lock().len()
    }

    /// Frames written so far.
    pub fn sent_frames(&self) -> Vec<Bytes> {
        self.sent.lock().clone()
    }

    /// Returns `true` once the connection closed the transport.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Pushes an unsolicited frame. Returns `false` if nobody is listening.
    pub async fn push(&self, frame: Bytes) -> bool {
        let sink = self.sink.lock().clone();
        match sink {
            Some(sink) => sink.on_frame(frame).await,
            None => false,
        }
    }

    /// Simulates the link going away underneath the connection.
    pub async fn disconnect(&self, reason: &str) {
        let sink = self.sink.lock().take();
        if let Some(sink) = sink {
            sink.on_close(Some(reason.to_string())).await;
        }
    }
}

#[async_trait]
impl<D: SimulatedDevice> Transport for MockTransport<D> {
    async fn send(&self, frame: Bytes) -> ConnectionResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ConnectionError::Closed);
        }
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(ConnectionError::transport("simulated send failure"));
        }
        self.sent.lock().push(frame.clone());

        let replies = self.device.handle(&frame);
        let Some(sink) = self.sink.lock().clone() else {
            return Ok(());
        };
        let latency = *self.latency.lock();
        let copies = if self.duplicate_replies.load(Ordering::SeqCst) { 2 } else { 1 };

        for reply in replies {
            let sink = sink.clone();
            tokio::spawn(async move {
                let delay = latency + reply.delay;
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                for _ in 0..copies {
                    sink.on_frame(reply.frame.clone()).await;
                }
            });
        }
        Ok(())
    }

    fn bind(&self, sink: InboundSink) {
        *self.sink.lock() = Some(sink);
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.sink.lock().take();
    }

    fn describe(&self) -> String {
        format!("mock://{}", self.device.name())
    }
}

impl<D: SimulatedDevice> fmt::Debug for MockTransport<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MockTransport")
            .field("device", &self.device.name())
            .field("sent", &self.sent_count())
            .field("closed", &self.is_closed())
            .finish()
    }
}

// =============================================================================
// Simulated ADS Device
// =============================================================================

/// ADS return code for an unknown index group.
pub const ADS_INVALID_INDEX_GROUP: u32 = 0x702;

/// ADS return code for an unknown index offset.
pub const ADS_INVALID_INDEX_OFFSET: u32 = 0x703;

/// ADS return code for a size mismatch.
pub const ADS_INVALID_SIZE: u32 = 0x705;

/// ADS return code for an unknown symbol.
pub const ADS_SYMBOL_NOT_FOUND: u32 = 0x710;

/// A TwinCAT-like ADS server with a flat table of variables.
#[derive(Debug, Default)]
pub struct MockAdsDevice {
    variables: Mutex<HashMap<AdsTarget, (AdsAddress, Variable)>>,
    silent: Mutex<HashSet<AdsTarget>>,
    handles: Mutex<HashMap<u32, AdsTarget>>,
    next_handle: AtomicU32,
    requests: AtomicUsize,
}

impl MockAdsDevice {
    /// Creates an empty device.
    pub fn new() -> Self {
        Self {
            next_handle: AtomicU32::new(1),
            ..Default::default()
        }
    }

    /// Adds or replaces a variable.
    pub fn insert(&self, address: AdsAddress, variable: Variable) {
        self.variables
            .lock()
            .insert(address.target.clone(), (address, variable));
    }

    /// Stops answering any request that touches `target`.
    pub fn silence(&self, target: AdsTarget) {
        self.silent.lock().insert(target);
    }

    /// Sets a variable to a fixed value.
    pub fn set_value(&self, target: &AdsTarget, value: Value) {
        if let Some((_, variable)) = self.variables.lock().get_mut(target) {
            *variable = Variable::Fixed(value);
        }
    }

    /// Current value of a variable.
    pub fn value(&self, target: &AdsTarget) -> Option<Value> {
        self.variables.lock().get(target).map(|(_, v)| v.current())
    }

    /// Notification handle registered for `target`, if any.
    pub fn handle_for(&self, target: &AdsTarget) -> Option<u32> {
        self.handles
            .lock()
            .iter()
            .find(|(_, t)| *t == target)
            .map(|(handle, _)| *handle)
    }

    /// Number of active notification handles.
    pub fn handle_count(&self) -> usize {
        self.handles.lock().len()
    }

    /// Number of requests received.
    pub fn request_count(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }

    /// A device notification carrying the current value of every target
    /// with a registered handle.
    pub fn notification_frame(&self) -> Bytes {
        let handles = self.handles.lock();
        let variables = self.variables.lock();
        let samples = handles
            .iter()
            .filter_map(|(handle, target)| {
                let (address, variable) = variables.get(target)?;
                let data = encode_ads(address, &variable.current()).ok()?;
                Some(NotificationSample {
                    handle: *handle,
                    data,
                })
            })
            .collect();

        let route = AmsRoute::default().reversed();
        let header = AmsHeader::request(&route, AdsCommand::DeviceNotification, 0);
        let payload = AdsPayload::Notification {
            stamps: vec![NotificationStamp {
                timestamp: 0,
                samples,
            }],
        };
        AdsFrame::new(header, payload).encode()
    }

    fn is_silent(&self, target: &AdsTarget) -> bool {
        self.silent.lock().contains(target)
    }

    fn read(&self, target: &AdsTarget, length: u32, missing: u32) -> Result<Bytes, u32> {
        let variables = self.variables.lock();
        let (address, variable) = variables.get(target).ok_or(missing)?;
        let data = encode_ads(address, &variable.current()).map_err(|_| ADS_INVALID_SIZE)?;
        if data.len() != length as usize {
            return Err(ADS_INVALID_SIZE);
        }
        Ok(data)
    }

    fn write(&self, target: &AdsTarget, data: &[u8]) -> u32 {
        let mut variables = self.variables.lock();
        let Some((address, variable)) = variables.get_mut(target) else {
            return ADS_INVALID_INDEX_OFFSET;
        };
        match decode_ads(address, data) {
            Ok(value) => {
                *variable = Variable::Fixed(value);
                0
            }
            Err(_) => ADS_INVALID_SIZE,
        }
    }

    /// Answers a sum read. `None` if any entry is silenced.
    fn sum_read(&self, mut entries: &[u8]) -> Option<Bytes> {
        let mut results = BytesMut::new();
        let mut values = BytesMut::new();
        while entries.remaining() >= 12 {
            let index_group = entries.get_u32_le();
            let index_offset = entries.get_u32_le();
            let length = entries.get_u32_le();
            let target = AdsTarget::Direct {
                index_group,
                index_offset,
            };
            if self.is_silent(&target) {
                return None;
            }
            match self.read(&target, length, ADS_INVALID_INDEX_OFFSET) {
                Ok(data) => {
                    results.put_u32_le(0);
                    values.put_slice(&data);
                }
                Err(code) => {
                    results.put_u32_le(code);
                    values.put_bytes(0, length as usize);
                }
            }
        }
        results.unsplit(values);
        Some(results.freeze())
    }

    fn answer(&self, payload: AdsPayload) -> Option<AdsPayload> {
        let reply = match payload {
            AdsPayload::Read {
                index_group,
                index_offset,
                length,
            } => {
                let target = AdsTarget::Direct {
                    index_group,
                    index_offset,
                };
                if self.is_silent(&target) {
                    return None;
                }
                match self.read(&target, length, ADS_INVALID_INDEX_OFFSET) {
                    Ok(data) => AdsPayload::ReadResponse { result: 0, data },
                    Err(result) => AdsPayload::ReadResponse {
                        result,
                        data: Bytes::new(),
                    },
                }
            }
            AdsPayload::ReadWrite {
                index_group: INDEX_GROUP_SUM_READ,
                data,
                ..
            } => AdsPayload::ReadResponse {
                result: 0,
                data: self.sum_read(&data)?,
            },
            AdsPayload::ReadWrite {
                index_group: INDEX_GROUP_SYM_VALUE_BY_NAME,
                read_length,
                data,
                ..
            } => {
                let end = data.iter().position(|b| *b == 0).unwrap_or(data.len());
                let target = AdsTarget::Symbolic(String::from_utf8_lossy(&data[..end]).into_owned());
                if self.is_silent(&target) {
                    return None;
                }
                match self.read(&target, read_length, ADS_SYMBOL_NOT_FOUND) {
                    Ok(data) => AdsPayload::ReadResponse { result: 0, data },
                    Err(result) => AdsPayload::ReadResponse {
                        result,
                        data: Bytes::new(),
                    },
                }
            }
            AdsPayload::ReadWrite { .. } => AdsPayload::ReadResponse {
                result: ADS_INVALID_INDEX_GROUP,
                data: Bytes::new(),
            },
            AdsPayload::Write {
                index_group,
                index_offset,
                data,
            } => AdsPayload::Status {
                result: self.write(
                    &AdsTarget::Direct {
                        index_group,
                        index_offset,
                    },
                    &data,
                ),
            },
            AdsPayload::AddNotification {
                index_group,
                index_offset,
                ..
            } => {
                let target = AdsTarget::Direct {
                    index_group,
                    index_offset,
                };
                if !self.variables.lock().contains_key(&target) {
                    return Some(AdsPayload::AddNotificationResponse {
                        result: ADS_INVALID_INDEX_OFFSET,
                        handle: 0,
                    });
                }
                let handle = self.next_handle.fetch_add(1, Ordering::SeqCst);
                self.handles.lock().insert(handle, target);
                AdsPayload::AddNotificationResponse { result: 0, handle }
            }
            AdsPayload::DeleteNotification { handle } => {
                self.handles.lock().remove(&handle);
                AdsPayload::Status { result: 0 }
            }
            _ => return None,
        };
        Some(reply)
    }
}

impl SimulatedDevice for MockAdsDevice {
    fn handle(&self, request: &[u8]) -> Vec<Reply> {
        let Ok(request) = AdsFrame::decode(request) else {
            return Vec::new();
        };
        if request.header.is_response() {
            return Vec::new();
        }
        self.requests.fetch_add(1, Ordering::SeqCst);

        let header = AmsHeader::reply_to(&request.header);
        match self.answer(request.payload) {
            Some(payload) => vec![Reply::now(AdsFrame::new(header, payload).encode())],
            None => Vec::new(),
        }
    }

    fn name(&self) -> &'static str {
        "ads"
    }
}

// =============================================================================
// Simulated CANopen Network
// =============================================================================

/// SDO abort code for a general error.
pub const SDO_GENERAL_ERROR: u32 = 0x0800_0000;

/// SDO abort code for a length mismatch.
pub const SDO_LENGTH_MISMATCH: u32 = 0x0607_0010;

type ObjectKey = (u8, u16, u8);

/// A CAN bus with one or more SDO servers on it.
#[derive(Debug, Default)]
pub struct MockCanOpenDevice {
    objects: Mutex<HashMap<ObjectKey, (CanOpenDataType, Variable)>>,
    silent: Mutex<HashSet<ObjectKey>>,
    latency: Mutex<HashMap<u8, Duration>>,
    requests: AtomicUsize,
}

impl MockCanOpenDevice {
    /// Creates an empty bus.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces an object dictionary entry.
    pub fn insert(
        &self,
        node_id: u8,
        index: u16,
        subindex: u8,
        data_type: CanOpenDataType,
        variable: Variable,
    ) {
        self.objects
            .lock()
            .insert((node_id, index, subindex), (data_type, variable));
    }

    /// Stops answering requests for one object.
    pub fn silence(&self, node_id: u8, index: u16, subindex: u8) {
        self.silent.lock().insert((node_id, index, subindex));
    }

    /// Delays every reply of `node_id`.
    pub fn set_latency(&self, node_id: u8, latency: Duration) {
        self.latency.lock().insert(node_id, latency);
    }

    /// Current value of an object.
    pub fn value(&self, node_id: u8, index: u16, subindex: u8) -> Option<Value> {
        self.objects
            .lock()
            .get(&(node_id, index, subindex))
            .map(|(_, v)| v.current())
    }

    /// Number of SDO requests received.
    pub fn request_count(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }

    /// A heartbeat frame as `node_id` would send it.
    pub fn heartbeat_frame(node_id: u8, state: NmtState) -> Bytes {
        CanOpenFrame::heartbeat(node_id, state).encode()
    }

    fn answer(&self, node_id: u8, sdo: &SdoPayload) -> Option<SdoPayload> {
        let (index, subindex) = sdo.object();
        let key = (node_id, index, subindex);
        if self.silent.lock().contains(&key) {
            return None;
        }
        let abort = |code| SdoPayload::Abort {
            index,
            subindex,
            code,
        };

        let mut objects = self.objects.lock();
        let Some((data_type, variable)) = objects.get_mut(&key) else {
            return Some(abort(ABORT_OBJECT_DOES_NOT_EXIST));
        };
        let reply = match sdo {
            SdoPayload::InitiateUpload { .. } => match encode_sdo(*data_type, &variable.current()) {
                Ok(data) => SdoPayload::UploadResponse {
                    index,
                    subindex,
                    data,
                },
                Err(_) => abort(SDO_GENERAL_ERROR),
            },
            SdoPayload::InitiateDownload { data, .. } => match decode_sdo(*data_type, data) {
                Ok(value) => {
                    *variable = Variable::Fixed(value);
                    SdoPayload::DownloadResponse { index, subindex }
                }
                Err(_) => abort(SDO_LENGTH_MISMATCH),
            },
            _ => return None,
        };
        Some(reply)
    }
}

impl SimulatedDevice for MockCanOpenDevice {
    fn handle(&self, request: &[u8]) -> Vec<Reply> {
        let Ok(frame) = CanOpenFrame::decode(request) else {
            return Vec::new();
        };
        if frame.service != CanOpenService::ReceiveSdo {
            return Vec::new();
        }
        let Some(sdo) = frame.sdo() else {
            return Vec::new();
        };
        self.requests.fetch_add(1, Ordering::SeqCst);

        let Some(reply) = self.answer(frame.node_id, sdo) else {
            return Vec::new();
        };
        let delay = self
            .latency
            .lock()
            .get(&frame.node_id)
            .copied()
            .unwrap_or_default();
        vec![Reply::after(
            CanOpenFrame::sdo_response(frame.node_id, reply).encode(),
            delay,
        )]
    }

    fn name(&self) -> &'static str {
        "canopen"
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_ramp_advances_with_time() {
        let ramp = Variable::ramp(Duration::from_millis(250));
        assert_eq!(ramp.current(), Value::Int32(0));
        tokio::time::advance(Duration::from_millis(260)).await;
        assert_eq!(ramp.current(), Value::Int32(1));
        tokio::time::advance(Duration::from_millis(250)).await;
        assert_eq!(ramp.current(), Value::Int32(2));
    }

    #[test]
    fn test_canopen_device_aborts_unknown_object() {
        let device = MockCanOpenDevice::new();
        let request = CanOpenFrame::sdo_request(
            4,
            SdoPayload::InitiateUpload {
                index: 0x2000,
                subindex: 0,
            },
        );
        let replies = device.handle(&request.encode());
        assert_eq!(replies.len(), 1);

        let reply = CanOpenFrame::decode(&replies[0].frame).unwrap();
        assert_eq!(reply.service, CanOpenService::TransmitSdo);
        assert!(matches!(
            reply.sdo(),
            Some(SdoPayload::Abort {
                code: ABORT_OBJECT_DOES_NOT_EXIST,
                ..
            })
        ));
    }

    #[test]
    fn test_ads_device_ignores_replies() {
        let device = MockAdsDevice::new();
        let header = AmsHeader::reply_to(&AmsHeader::request(
            &AmsRoute::default(),
            AdsCommand::Read,
            9,
        ));
        let frame = AdsFrame::new(header, AdsPayload::Status { result: 0 });
        assert!(device.handle(&frame.encode()).is_empty());
        assert_eq!(device.request_count(), 0);
    }
}
