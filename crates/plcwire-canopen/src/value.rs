// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Object dictionary values carried by expedited SDO transfers.

use crate::error::CanOpenError;
use bytes::{Buf, Bytes};
use plcwire_core::{CanOpenDataType, CodecError, CodecResult, Value};

/// Decodes SDO data as `data_type`.
///
/// Fixed-size types need at least their size; extra bytes of an unsized
/// expedited reply are ignored. Strings have trailing NULs removed.
pub fn decode_value(data_type: CanOpenDataType, data: &[u8]) -> CodecResult<Value> {
    if let Some(size) = data_type.size() {
        if data.len() < size {
            return Err(CodecError::LengthMismatch {
                declared: size,
                actual: data.len(),
            });
        }
    }

    let mut buf = data;
    Ok(match data_type {
        CanOpenDataType::Boolean => Value::Bool(buf.get_u8() != 0),
        CanOpenDataType::Integer8 => Value::Int8(buf.get_i8()),
        CanOpenDataType::Integer16 => Value::Int16(buf.get_i16_le()),
        CanOpenDataType::Integer32 => Value::Int32(buf.get_i32_le()),
        CanOpenDataType::Unsigned8 => Value::UInt8(buf.get_u8()),
        CanOpenDataType::Unsigned16 => Value::UInt16(buf.get_u16_le()),
        CanOpenDataType::Unsigned32 => Value::UInt32(buf.get_u32_le()),
        CanOpenDataType::Real32 => Value::Float32(buf.get_f32_le()),
        CanOpenDataType::VisibleString => {
            let end = data.iter().rposition(|b| *b != 0).map_or(0, |i| i + 1);
            Value::String(String::from_utf8_lossy(&data[..end]).into_owned())
        }
    })
}

/// Encodes `value` for an expedited download of `data_type`.
pub fn encode_value(data_type: CanOpenDataType, value: &Value) -> Result<Bytes, CanOpenError> {
    let mismatch = || CanOpenError::ValueType {
        value_type: value.type_name(),
        data_type: data_type.as_str(),
    };
    let int = || match value {
        Value::Bool(_) | Value::Float32(_) | Value::Float64(_) => None,
        other => other.as_i64(),
    };

    let bytes: Vec<u8> = match data_type {
        CanOpenDataType::Boolean => vec![value.as_bool().ok_or_else(mismatch)? as u8],
        CanOpenDataType::Integer8 => i8::try_from(int().ok_or_else(mismatch)?)
            .map_err(|_| mismatch())?
            .to_le_bytes()
            .to_vec(),
        CanOpenDataType::Integer16 => i16::try_from(int().ok_or_else(mismatch)?)
            .map_err(|_| mismatch())?
            .to_le_bytes()
            .to_vec(),
        CanOpenDataType::Integer32 => i32::try_from(int().ok_or_else(mismatch)?)
            .map_err(|_| mismatch())?
            .to_le_bytes()
            .to_vec(),
        CanOpenDataType::Unsigned8 => u8::try_from(int().ok_or_else(mismatch)?)
            .map_err(|_| mismatch())?
            .to_le_bytes()
            .to_vec(),
        CanOpenDataType::Unsigned16 => u16::try_from(int().ok_or_else(mismatch)?)
            .map_err(|_| mismatch())?
            .to_le_bytes()
            .to_vec(),
        CanOpenDataType::Unsigned32 => u32::try_from(int().ok_or_else(mismatch)?)
            .map_err(|_| mismatch())?
            .to_le_bytes()
            .to_vec(),
        CanOpenDataType::Real32 => match value {
            Value::Bool(_) => return Err(mismatch()),
            other => (other.as_f64().ok_or_else(mismatch)? as f32).to_le_bytes().to_vec(),
        },
        CanOpenDataType::VisibleString => {
            let text = value.as_str().ok_or_else(mismatch)?;
            if text.is_empty() || text.len() > 4 {
                return Err(CanOpenError::Unsupported {
                    operation: "expedited download of a string longer than 4 bytes or empty",
                    address: format!("{:?}", text),
                });
            }
            text.as_bytes().to_vec()
        }
    };
    Ok(Bytes::from(bytes))
}
