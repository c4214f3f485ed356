// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! In-crate test protocol and loopback device.
//!
//! Wire format (little endian):
//!
//! ```text
//! request : id:u32 count:u8 { op:u8 offset:u32 [value:i32 if op == WRITE] }*
//! reply   : id:u32 0:u8 count:u8 { found:u8 value:i32 }*
//! abort   : id:u32 1:u8 code:u32
//! notify  : 0xFFFFFFFF 2:u8 offset:u32 value:i32
//! ```

use crate::engine::ConversationEngine;
use crate::predicate::{AbortInfo, BoxPredicate, MatchPredicate};
use crate::protocol::{DispatchMode, Notification, Protocol};
use async_trait::async_trait;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use parking_lot::Mutex;
use plcwire_core::{
    AdsAddress, AdsDataType, AdsTarget, Codec, CodecError, CodecResult, ConnectionError,
    ConnectionResult, Exchange, FieldAddress, FieldError, FieldOperation, FieldOutcome,
    InboundSink, ProtocolKind, Transport, Value,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;

const OP_READ: u8 = 0;
const OP_WRITE: u8 = 1;
const OP_SUBSCRIBE: u8 = 2;
const OP_UNSUBSCRIBE: u8 = 3;
const STATUS_REPLY: u8 = 0;
const STATUS_ABORT: u8 = 1;
const STATUS_NOTIFY: u8 = 2;
const NOTIFY_ID: u32 = u32::MAX;
const INDEX_GROUP: u32 = 0x4020;

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum TestFrame {
    Reply { id: u32, results: Vec<Option<i32>> },
    Abort { id: u32, code: u32 },
    Notify { offset: u32, value: i32 },
}

impl TestFrame {
    fn id(&self) -> Option<u32> {
        match self {
            TestFrame::Reply { id, .. } | TestFrame::Abort { id, .. } => Some(*id),
            TestFrame::Notify { .. } => None,
        }
    }
}

// =============================================================================
// TestProtocol
// =============================================================================

pub(crate) struct TestProtocol {
    mode: DispatchMode,
    next_id: AtomicU32,
}

impl TestProtocol {
    /// Offset the device never knows.
    pub(crate) const MISSING: u32 = 0xFFFF;

    pub(crate) fn fan_out() -> Self {
        Self {
            mode: DispatchMode::FanOut,
            next_id: AtomicU32::new(0),
        }
    }

    pub(crate) fn batched(max_items: usize) -> Self {
        Self {
            mode: DispatchMode::Batched { max_items },
            next_id: AtomicU32::new(0),
        }
    }

    pub(crate) fn address(offset: u32) -> FieldAddress {
        AdsAddress::direct(INDEX_GROUP, offset, AdsDataType::Dint).into()
    }

    fn offset_of(address: &FieldAddress) -> CodecResult<u32> {
        match address.as_ads().map(|a| &a.target) {
            Some(AdsTarget::Direct { index_offset, .. }) => Ok(*index_offset),
            _ => Err(CodecError::encode(format!("unsupported address {}", address))),
        }
    }
}

impl Codec for TestProtocol {
    type Key = u32;
    type Frame = TestFrame;

    fn encode(&self, exchange: &Exchange, key: &u32) -> CodecResult<Bytes> {
        let mut buf = BytesMut::new();
        buf.put_u32_le(*key);
        buf.put_u8(exchange.len() as u8);
        for item in exchange.items() {
            let offset = Self::offset_of(&item.address)?;
            match &item.operation {
                FieldOperation::Read => {
                    buf.put_u8(OP_READ);
                    buf.put_u32_le(offset);
                }
                FieldOperation::Write(Value::Int32(v)) => {
                    buf.put_u8(OP_WRITE);
                    buf.put_u32_le(offset);
                    buf.put_i32_le(*v);
                }
                FieldOperation::Write(other) => {
                    return Err(CodecError::encode(format!(
                        "cannot encode {} as DINT",
                        other.type_name()
                    )))
                }
                FieldOperation::Subscribe(_) => {
                    buf.put_u8(OP_SUBSCRIBE);
                    buf.put_u32_le(offset);
                }
                FieldOperation::Unsubscribe => {
                    buf.put_u8(OP_UNSUBSCRIBE);
                    buf.put_u32_le(offset);
                }
            }
        }
        Ok(buf.freeze())
    }

    fn decode(&self, bytes: &[u8]) -> CodecResult<TestFrame> {
        CodecError::ensure_len(5, bytes.len())?;
        let mut buf = bytes;
        let id = buf.get_u32_le();
        match buf.get_u8() {
            STATUS_REPLY => {
                CodecError::ensure_len(1, buf.remaining())?;
                let count = buf.get_u8() as usize;
                CodecError::ensure_len(count * 5, buf.remaining())?;
                let results = (0..count)
                    .map(|_| {
                        let found = buf.get_u8() != 0;
                        let value = buf.get_i32_le();
                        found.then_some(value)
                    })
                    .collect();
                Ok(TestFrame::Reply { id, results })
            }
            STATUS_ABORT => {
                CodecError::ensure_len(4, buf.remaining())?;
                Ok(TestFrame::Abort {
                    id,
                    code: buf.get_u32_le(),
                })
            }
            STATUS_NOTIFY => {
                CodecError::ensure_len(8, buf.remaining())?;
                Ok(TestFrame::Notify {
                    offset: buf.get_u32_le(),
                    value: buf.get_i32_le(),
                })
            }
            other => Err(CodecError::malformed(format!("unknown status {}", other))),
        }
    }
}

impl Protocol for TestProtocol {
    fn kind(&self) -> ProtocolKind {
        ProtocolKind::Ads
    }

    fn dispatch_mode(&self) -> DispatchMode {
        self.mode
    }

    fn correlation_key(&self, _exchange: &Exchange) -> u32 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    fn frame_key(&self, frame: &TestFrame) -> Option<u32> {
        frame.id()
    }

    fn predicate(&self, key: &u32, _exchange: &Exchange) -> BoxPredicate<TestFrame> {
        let key = *key;
        MatchPredicate::new(format!("id {}", key), move |f: &TestFrame| f.id() == Some(key))
            .expecting(|f| matches!(f, TestFrame::Reply { .. }))
            .or_abort(|f| match f {
                TestFrame::Abort { code, .. } => Some(AbortInfo::new(*code, "device abort")),
                _ => None,
            })
            .boxed()
    }

    fn interpret(&self, exchange: &Exchange, frame: TestFrame) -> Vec<FieldOutcome> {
        let TestFrame::Reply { results, .. } = frame else {
            return Vec::new();
        };
        exchange
            .items()
            .iter()
            .zip(results)
            .map(|(item, result)| match (result, &item.operation) {
                (None, _) => Err(FieldError::not_found(item.address.to_string())),
                (Some(v), FieldOperation::Read) => Ok(Some(Value::Int32(v))),
                (Some(_), _) => Ok(None),
            })
            .collect()
    }

    fn notifications(&self, frame: &TestFrame) -> Vec<Notification> {
        match frame {
            TestFrame::Notify { offset, value } => {
                vec![Notification::new(Self::address(*offset), Value::Int32(*value))]
            }
            _ => Vec::new(),
        }
    }
}

// =============================================================================
// Loopback device
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DeviceAction {
    Reply,
    Ignore,
    Abort(u32),
}

type Behavior = Box<dyn Fn(u32) -> DeviceAction + Send + Sync>;

/// Answers requests like a device holding `offset` at every offset.
pub(crate) struct TestTransport {
    behavior: Behavior,
    values: Mutex<HashMap<u32, i32>>,
    engine: Mutex<Option<Arc<ConversationEngine<TestProtocol>>>>,
    sink: Mutex<Option<InboundSink>>,
    fail: AtomicBool,
    sent: AtomicUsize,
}

impl TestTransport {
    pub(crate) fn new(behavior: impl Fn(u32) -> DeviceAction + Send + Sync + 'static) -> Arc<Self> {
        Arc::new(Self {
            behavior: Box::new(behavior),
            values: Mutex::new(HashMap::new()),
            engine: Mutex::new(None),
            sink: Mutex::new(None),
            fail: AtomicBool::new(false),
            sent: AtomicUsize::new(0),
        })
    }

    /// Delivers replies straight into an engine instead of a sink.
    pub(crate) fn attach(&self, engine: Arc<ConversationEngine<TestProtocol>>) {
        *self.engine.lock() = Some(engine);
    }

    pub(crate) fn fail_sends(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub(crate) fn sent_count(&self) -> usize {
        self.sent.load(Ordering::SeqCst)
    }

    pub(crate) async fn push(&self, frame: Bytes) {
        let sink = self.sink.lock().clone();
        if let Some(sink) = sink {
            sink.on_frame(frame).await;
        }
    }

    pub(crate) async fn disconnect(&self) {
        let sink = self.sink.lock().take();
        if let Some(sink) = sink {
            sink.on_close(Some("device went away".into())).await;
        }
    }

    fn answer(&self, request: &[u8]) -> Option<Bytes> {
        let mut buf = request;
        let id = buf.get_u32_le();
        let count = buf.get_u8() as usize;
        let mut results = Vec::with_capacity(count);
        let mut first = None;
        for _ in 0..count {
            let op = buf.get_u8();
            let offset = buf.get_u32_le();
            first.get_or_insert(offset);
            let mut values = self.values.lock();
            results.push(match op {
                OP_WRITE => {
                    values.insert(offset, buf.get_i32_le());
                    Some(0)
                }
                _ if offset == TestProtocol::MISSING => None,
                _ => Some(*values.get(&offset).unwrap_or(&(offset as i32))),
            });
        }

        match (self.behavior)(first.unwrap_or(0)) {
            DeviceAction::Reply => Some(device_reply(id, &results)),
            DeviceAction::Ignore => None,
            DeviceAction::Abort(code) => {
                let mut buf = BytesMut::new();
                buf.put_u32_le(id);
                buf.put_u8(STATUS_ABORT);
                buf.put_u32_le(code);
                Some(buf.freeze())
            }
        }
    }
}

#[async_trait]
impl Transport for TestTransport {
    async fn send(&self, frame: Bytes) -> ConnectionResult<()> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(ConnectionError::transport("simulated send failure"));
        }
        self.sent.fetch_add(1, Ordering::SeqCst);

        let Some(reply) = self.answer(&frame) else {
            return Ok(());
        };
        let engine = self.engine.lock().clone();
        let sink = self.sink.lock().clone();
        tokio::spawn(async move {
            if let Some(engine) = engine {
                engine.on_frame(&reply);
            } else if let Some(sink) = sink {
                sink.on_frame(reply).await;
            }
        });
        Ok(())
    }

    fn bind(&self, sink: InboundSink) {
        *self.sink.lock() = Some(sink);
    }

    async fn close(&self) {
        self.sink.lock().take();
    }
}

pub(crate) fn device_reply(id: u32, results: &[Option<i32>]) -> Bytes {
    let mut buf = BytesMut::new();
    buf.put_u32_le(id);
    buf.put_u8(STATUS_REPLY);
    buf.put_u8(results.len() as u8);
    for result in results {
        buf.put_u8(result.is_some() as u8);
        buf.put_i32_le(result.unwrap_or(0));
    }
    buf.freeze()
}

pub(crate) fn notification(offset: u32, value: i32) -> Bytes {
    let mut buf = BytesMut::new();
    buf.put_u32_le(NOTIFY_ID);
    buf.put_u8(STATUS_NOTIFY);
    buf.put_u32_le(offset);
    buf.put_i32_le(value);
    buf.freeze()
}
