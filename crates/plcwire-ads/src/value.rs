// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Conversion between PLC memory images and [`Value`].
//!
//! ADS data is little endian. An address with `count > 1` maps to
//! [`Value::Array`] of `count` elements.
//!
//! | PLC type        | Value       |
//! |-----------------|-------------|
//! | BOOL            | `Bool`      |
//! | BYTE, USINT     | `UInt8`     |
//! | SINT            | `Int8`      |
//! | WORD, UINT      | `UInt16`    |
//! | INT             | `Int16`     |
//! | DWORD, UDINT    | `UInt32`    |
//! | DINT            | `Int32`     |
//! | ULINT           | `UInt64`    |
//! | LINT            | `Int64`     |
//! | REAL            | `Float32`   |
//! | LREAL           | `Float64`   |

use crate::error::{AdsError, AdsResult};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use plcwire_core::{AdsAddress, AdsDataType, CodecError, CodecResult, Value};

// =============================================================================
// Decoding
// =============================================================================

/// Decodes the data read for `address`.
///
/// `data` must hold exactly [`AdsAddress::byte_len`] bytes.
pub fn decode_value(address: &AdsAddress, data: &[u8]) -> CodecResult<Value> {
    let expected = address.byte_len();
    if data.len() != expected {
        return Err(CodecError::LengthMismatch {
            declared: expected,
            actual: data.len(),
        });
    }

    let mut buf = data;
    if address.count == 1 {
        return Ok(decode_element(address.data_type, &mut buf));
    }
    let values = (0..address.count)
        .map(|_| decode_element(address.data_type, &mut buf))
        .collect();
    Ok(Value::Array(values))
}

fn decode_element(data_type: AdsDataType, buf: &mut &[u8]) -> Value {
    match data_type {
        AdsDataType::Bool => Value::Bool(buf.get_u8() != 0),
        AdsDataType::Byte | AdsDataType::Usint => Value::UInt8(buf.get_u8()),
        AdsDataType::Sint => Value::Int8(buf.get_i8()),
        AdsDataType::Word | AdsDataType::Uint => Value::UInt16(buf.get_u16_le()),
        AdsDataType::Int => Value::Int16(buf.get_i16_le()),
        AdsDataType::Dword | AdsDataType::Udint => Value::UInt32(buf.get_u32_le()),
        AdsDataType::Dint => Value::Int32(buf.get_i32_le()),
        AdsDataType::Ulint => Value::UInt64(buf.get_u64_le()),
        AdsDataType::Lint => Value::Int64(buf.get_i64_le()),
        AdsDataType::Real => Value::Float32(buf.get_f32_le()),
        AdsDataType::Lreal => Value::Float64(buf.get_f64_le()),
    }
}

// =============================================================================
// Encoding
// =============================================================================

/// Encodes `value` as the memory image of `address`.
///
/// Integer values are accepted for any integer type they fit into; floats
/// are accepted for REAL and LREAL only.
pub fn encode_value(address: &AdsAddress, value: &Value) -> AdsResult<Bytes> {
    let mut buf = BytesMut::with_capacity(address.byte_len());
    match (address.count, value) {
        (1, Value::Array(_)) => return Err(mismatch(value, address.data_type)),
        (1, value) => encode_element(address.data_type, value, &mut buf)?,
        (count, Value::Array(values)) if values.len() == count as usize => {
            for v in values {
                encode_element(address.data_type, v, &mut buf)?;
            }
        }
        _ => return Err(mismatch(value, address.data_type)),
    }
    Ok(buf.freeze())
}

fn encode_element(data_type: AdsDataType, value: &Value, buf: &mut BytesMut) -> AdsResult<()> {
    let err = || mismatch(value, data_type);
    match data_type {
        AdsDataType::Bool => buf.put_u8(value.as_bool().ok_or_else(err)? as u8),
        AdsDataType::Real => buf.put_f32_le(float(value).ok_or_else(err)? as f32),
        AdsDataType::Lreal => buf.put_f64_le(float(value).ok_or_else(err)?),
        AdsDataType::Ulint => buf.put_u64_le(
            is_integer(value)
                .then(|| value.as_u64())
                .flatten()
                .ok_or_else(err)?,
        ),
        AdsDataType::Lint => buf.put_i64_le(
            is_integer(value)
                .then(|| value.as_i64())
                .flatten()
                .ok_or_else(err)?,
        ),
        integer => {
            let n = is_integer(value)
                .then(|| value.as_i64())
                .flatten()
                .ok_or_else(err)?;
            put_integer(integer, n, buf).ok_or_else(err)?;
        }
    }
    Ok(())
}

fn put_integer(data_type: AdsDataType, n: i64, buf: &mut BytesMut) -> Option<()> {
    match data_type {
        AdsDataType::Byte | AdsDataType::Usint => buf.put_u8(u8::try_from(n).ok()?),
        AdsDataType::Sint => buf.put_i8(i8::try_from(n).ok()?),
        AdsDataType::Word | AdsDataType::Uint => buf.put_u16_le(u16::try_from(n).ok()?),
        AdsDataType::Int => buf.put_i16_le(i16::try_from(n).ok()?),
        AdsDataType::Dword | AdsDataType::Udint => buf.put_u32_le(u32::try_from(n).ok()?),
        AdsDataType::Dint => buf.put_i32_le(i32::try_from(n).ok()?),
        _ => return None,
    }
    Some(())
}

fn is_integer(value: &Value) -> bool {
    matches!(
        value,
        Value::Int8(_)
            | Value::Int16(_)
            | Value::Int32(_)
            | Value::Int64(_)
            | Value::UInt8(_)
            | Value::UInt16(_)
            | Value::UInt32(_)
            | Value::UInt64(_)
    )
}

fn float(value: &Value) -> Option<f64> {
    match value {
        Value::Bool(_) | Value::String(_) | Value::Bytes(_) | Value::Array(_) | Value::Null => None,
        other => other.as_f64(),
    }
}

fn mismatch(value: &Value, data_type: AdsDataType) -> AdsError {
    AdsError::ValueType {
        value_type: value.type_name(),
        data_type: data_type.as_str(),
    }
}
