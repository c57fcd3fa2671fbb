//! Deterministic key encoding.
//!
//! Partition keys are serialized to bytes so that the key a read was issued
//! for can be compared byte-for-byte with the key the store echoes back.
//! Each component is written as a 2-byte big-endian length followed by its
//! encoded body.
//!
//! # Encoding Strategies
//!
//! - **`Int` / `BigInt`**: Sign-flip encoding (XOR the high bit), big-endian
//! - **`Double`**: Total-order encoding (negatives fully inverted)
//! - **`Text`**: UTF-8 bytes as-is
//! - **`Blob`**: Raw bytes as-is
//! - **`Uuid`**: The 16 RFC 4122 bytes
//! - **`Timestamp`**: Sign-flipped microseconds since the epoch. Finer
//!   precision is dropped, so timestamps within one microsecond collide
//! - **`Boolean`**: 0x00 for false, 0x01 for true
//!
//! The integer, double and timestamp encodings also preserve ordering under
//! lexicographic byte comparison.

use bytes::{BufMut, Bytes, BytesMut};
use thiserror::Error;

use crate::value::Value;

/// Errors produced while encoding a key.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KeyEncodingError {
    /// Key columns can never be null.
    #[error("key component {index} is null")]
    NullComponent { index: usize },

    /// A single component exceeds the 2-byte length prefix.
    #[error("key component {index} is {len} bytes (max {max})")]
    ComponentTooLarge { index: usize, len: usize, max: usize },
}

/// Encodes an `Int` (i32) for lexicographic ordering.
#[allow(clippy::cast_sign_loss)]
pub fn encode_int(value: i32) -> [u8; 4] {
    let unsigned = (value as u32) ^ (1u32 << 31);
    unsigned.to_be_bytes()
}

/// Encodes a `BigInt` for lexicographic ordering.
///
/// ```text
/// i64::MIN -> 0x00_00_00_00_00_00_00_00
/// -1       -> 0x7F_FF_FF_FF_FF_FF_FF_FF
///  0       -> 0x80_00_00_00_00_00_00_00
/// i64::MAX -> 0xFF_FF_FF_FF_FF_FF_FF_FF
/// ```
#[allow(clippy::cast_sign_loss)]
pub fn encode_bigint(value: i64) -> [u8; 8] {
    let unsigned = (value as u64) ^ (1u64 << 63);
    unsigned.to_be_bytes()
}

/// Decodes a `BigInt` from sign-flip encoding.
pub fn decode_bigint(bytes: [u8; 8]) -> i64 {
    let unsigned = u64::from_be_bytes(bytes);
    (unsigned ^ (1u64 << 63)) as i64
}

/// Encodes a `Double` with total ordering.
///
/// NaN < -Inf < negative values < -0.0 < +0.0 < positive values < +Inf
pub fn encode_double(value: f64) -> [u8; 8] {
    let bits = value.to_bits();
    let key = if value.is_sign_negative() {
        !bits
    } else {
        bits ^ (1u64 << 63)
    };
    key.to_be_bytes()
}

/// Encodes one value without the length prefix.
fn encode_component(value: &Value, index: usize) -> Result<Vec<u8>, KeyEncodingError> {
    let body = match value {
        Value::Null => return Err(KeyEncodingError::NullComponent { index }),
        Value::Boolean(b) => vec![u8::from(*b)],
        Value::Int(v) => encode_int(*v).to_vec(),
        Value::BigInt(v) => encode_bigint(*v).to_vec(),
        Value::Double(v) => encode_double(*v).to_vec(),
        Value::Text(s) => s.as_bytes().to_vec(),
        Value::Blob(b) => b.to_vec(),
        Value::Uuid(u) => u.as_bytes().to_vec(),
        Value::Timestamp(t) => encode_bigint(t.timestamp_micros()).to_vec(),
    };
    Ok(body)
}

/// Encodes a (possibly composite) key into its canonical byte form.
pub fn encode_key(components: &[Value]) -> Result<Bytes, KeyEncodingError> {
    let mut out = BytesMut::new();
    for (index, value) in components.iter().enumerate() {
        let body = encode_component(value, index)?;
        let len = u16::try_from(body.len()).map_err(|_| KeyEncodingError::ComponentTooLarge {
            index,
            len: body.len(),
            max: u16::MAX as usize,
        })?;
        out.put_u16(len);
        out.put_slice(&body);
    }
    Ok(out.freeze())
}
