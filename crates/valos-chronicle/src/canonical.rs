// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Deterministic CBOR encoding (canonical subset) for signing and chain hashing.
//!
//! Rules:
//!
//! - definite lengths only, shortest-width integer and length headers
//! - map entries sorted by the bytes of their encoded keys; duplicates rejected
//! - integral floats encode as integers; other floats as `f32` when exact,
//!   otherwise `f64`
//! - no tags
//!
//! The byte layout is part of the authorship protocol: any change breaks every
//! existing signature and chain hash.

use ciborium::value::{Integer, Value};

/// Encoding failures.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum CanonError {
    /// CBOR tags are not allowed.
    #[error("tags not allowed")]
    Tag,
    /// Two map keys encode to the same bytes.
    #[error("duplicate map key")]
    MapKeyDuplicate,
    /// Non-finite float (not representable in JSON input anyway).
    #[error("non-finite float")]
    NonFiniteFloat,
    /// A value outside the supported subset.
    #[error("unsupported value: {0}")]
    Unsupported(String),
}

type Result<T> = std::result::Result<T, CanonError>;

/// Canonical bytes of a JSON value.
pub fn encode_json(value: &serde_json::Value) -> Result<Vec<u8>> {
    encode_value(&json_to_cbor(value)?)
}

/// Canonical bytes of a CBOR value.
pub fn encode_value(val: &Value) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    enc_value(val, &mut out)?;
    Ok(out)
}

fn json_to_cbor(value: &serde_json::Value) -> Result<Value> {
    use serde_json::Value as J;
    Ok(match value {
        J::Null => Value::Null,
        J::Bool(b) => Value::Bool(*b),
        J::Number(n) => {
            if let Some(u) = n.as_u64() {
                Value::Integer(Integer::from(u))
            } else if let Some(i) = n.as_i64() {
                Value::Integer(Integer::from(i))
            } else {
                let f = n
                    .as_f64()
                    .ok_or_else(|| CanonError::Unsupported(format!("number {n}")))?;
                Value::Float(f)
            }
        }
        J::String(s) => Value::Text(s.clone()),
        J::Array(items) => Value::Array(
            items
                .iter()
                .map(json_to_cbor)
                .collect::<Result<Vec<_>>>()?,
        ),
        J::Object(map) => Value::Map(
            map.iter()
                .map(|(k, v)| Ok((Value::Text(k.clone()), json_to_cbor(v)?)))
                .collect::<Result<Vec<_>>>()?,
        ),
    })
}

fn enc_value(v: &Value, out: &mut Vec<u8>) -> Result<()> {
    match v {
        Value::Bool(b) => out.push(if *b { 0xf5 } else { 0xf4 }),
        Value::Null => out.push(0xf6),
        Value::Integer(n) => enc_int(i128::from(*n), out),
        Value::Float(f) => enc_float(*f, out)?,
        Value::Text(s) => {
            enc_len(3, s.len() as u64, out);
            out.extend_from_slice(s.as_bytes());
        }
        Value::Bytes(b) => {
            enc_len(2, b.len() as u64, out);
            out.extend_from_slice(b);
        }
        Value::Array(items) => {
            enc_len(4, items.len() as u64, out);
            for it in items {
                enc_value(it, out)?;
            }
        }
        Value::Map(entries) => {
            let mut buf: Vec<(Vec<u8>, &Value)> = Vec::with_capacity(entries.len());
            for (k, v) in entries {
                let mut kb = Vec::new();
                enc_value(k, &mut kb)?;
                buf.push((kb, v));
            }
            buf.sort_by(|a, b| a.0.cmp(&b.0));
            if buf.windows(2).any(|win| win[0].0 == win[1].0) {
                return Err(CanonError::MapKeyDuplicate);
            }
            enc_len(5, buf.len() as u64, out);
            for (kb, v) in buf {
                out.extend_from_slice(&kb);
                enc_value(v, out)?;
            }
        }
        Value::Tag(_, _) => return Err(CanonError::Tag),
        _ => return Err(CanonError::Unsupported("simple value".into())),
    }
    Ok(())
}

fn enc_len(major: u8, len: u64, out: &mut Vec<u8>) {
    write_major(major, u128::from(len), out);
}

#[allow(clippy::cast_sign_loss)]
fn enc_int(n: i128, out: &mut Vec<u8>) {
    if n >= 0 {
        write_major(0, n as u128, out);
    } else {
        write_major(1, (-1 - n) as u128, out);
    }
}

#[allow(clippy::cast_possible_truncation, clippy::float_cmp)]
fn enc_float(f: f64, out: &mut Vec<u8>) -> Result<()> {
    if !f.is_finite() {
        return Err(CanonError::NonFiniteFloat);
    }
    if f.fract() == 0.0 {
        let i = f as i128;
        if i as f64 == f {
            enc_int(i, out);
            return Ok(());
        }
    }
    let narrow = f as f32;
    if f64::from(narrow) == f {
        out.push(0xfa);
        out.extend_from_slice(&narrow.to_be_bytes());
    } else {
        out.push(0xfb);
        out.extend_from_slice(&f.to_be_bytes());
    }
    Ok(())
}

#[allow(clippy::cast_possible_truncation)]
fn write_major(major: u8, n: u128, out: &mut Vec<u8>) {
    debug_assert!(major <= 7);
    match n {
        0..=23 => out.push((major << 5) | n as u8),
        24..=0xff => {
            out.push((major << 5) | 24);
            out.push(n as u8);
        }
        0x100..=0xffff => {
            out.push((major << 5) | 25);
            out.extend_from_slice(&(n as u16).to_be_bytes());
        }
        0x1_0000..=0xffff_ffff => {
            out.push((major << 5) | 26);
            out.extend_from_slice(&(n as u32).to_be_bytes());
        }
        _ => {
            out.push((major << 5) | 27);
            out.extend_from_slice(&(n as u64).to_be_bytes());
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use serde_json::json;

    #[test]
    fn key_order_does_not_matter() {
        let a = encode_json(&json!({"b": 1, "a": [true, null]})).unwrap();
        let b = encode_json(&json!({"a": [true, null], "b": 1})).unwrap();
        assert_eq!(a, b);
        // map(2) "a" array(2) true null "b" 1
        assert_eq!(a, vec![0xa2, 0x61, b'a', 0x82, 0xf5, 0xf6, 0x61, b'b', 0x01]);
    }

    #[test]
    fn integers_use_shortest_width() {
        assert_eq!(encode_json(&json!(23)).unwrap(), vec![0x17]);
        assert_eq!(encode_json(&json!(24)).unwrap(), vec![0x18, 24]);
        assert_eq!(encode_json(&json!(-1)).unwrap(), vec![0x20]);
        assert_eq!(encode_json(&json!(1000)).unwrap(), vec![0x19, 0x03, 0xe8]);
        assert_eq!(encode_json(&json!(2.0)).unwrap(), vec![0x02]);
    }

    #[test]
    fn floats_narrow_only_when_exact() {
        assert_eq!(encode_json(&json!(0.5)).unwrap()[0], 0xfa);
        assert_eq!(encode_json(&json!(0.1)).unwrap()[0], 0xfb);
    }

    #[test]
    fn tags_are_rejected() {
        let tagged = Value::Tag(1, Box::new(Value::Null));
        assert_eq!(encode_value(&tagged), Err(CanonError::Tag));
    }
}
