//! Order-preserving tuple packing.
//!
//! The KV itself only knows about byte strings; everything above this
//! layer (row keys, directory paths) needs tuples of typed values to
//! encode into bytes whose lexicographic order matches the tuple's
//! natural order. This is the concrete stand-in for the tuple layer the
//! specification treats as an external collaborator (§1, GLOSSARY).

use common::error::Error;
use common::value::Value;
use common::CResult;

const TAG_TINYINT: u8 = 0x01;
const TAG_SMALLINT: u8 = 0x02;
const TAG_INT: u8 = 0x03;
const TAG_BIGINT: u8 = 0x04;
const TAG_DOUBLE: u8 = 0x05;
const TAG_FLOAT: u8 = 0x06;
const TAG_TIMESTAMP: u8 = 0x07;
const TAG_BOOLEAN: u8 = 0x08;
const TAG_TEXT: u8 = 0x09;

/// Pack a tuple of values into its order-preserving byte encoding.
/// Packing a strict prefix of a table's primary key yields a byte string
/// that is itself a valid prefix of every full key sharing that prefix --
/// this is what makes equal-prefix range scans (§4.4) work.
pub fn pack(values: &[Value]) -> Vec<u8> {
    let mut out = Vec::new();
    for v in values {
        pack_one(v, &mut out);
    }
    out
}

fn pack_one(v: &Value, out: &mut Vec<u8>) {
    match *v {
        Value::TinyInt(i) => {
            out.push(TAG_TINYINT);
            out.push((i as u8) ^ 0x80);
        }
        Value::SmallInt(i) => {
            out.push(TAG_SMALLINT);
            out.extend_from_slice(&((i as u16) ^ 0x8000).to_be_bytes());
        }
        Value::Int(i) => {
            out.push(TAG_INT);
            out.extend_from_slice(&((i as u32) ^ 0x8000_0000).to_be_bytes());
        }
        Value::BigInt(i) => {
            out.push(TAG_BIGINT);
            out.extend_from_slice(&((i as u64) ^ 0x8000_0000_0000_0000).to_be_bytes());
        }
        Value::Double(f) => {
            out.push(TAG_DOUBLE);
            out.extend_from_slice(&order_preserving_f64(f).to_be_bytes());
        }
        Value::Float(f) => {
            out.push(TAG_FLOAT);
            out.extend_from_slice(&order_preserving_f32(f).to_be_bytes());
        }
        Value::Timestamp(secs, nanos) => {
            out.push(TAG_TIMESTAMP);
            out.extend_from_slice(&((secs as u64) ^ 0x8000_0000_0000_0000).to_be_bytes());
            out.extend_from_slice(&(nanos as u32).to_be_bytes());
        }
        Value::Boolean(b) => {
            out.push(TAG_BOOLEAN);
            out.push(b as u8);
        }
        Value::Text(ref s) => {
            out.push(TAG_TEXT);
            for &b in s.as_bytes() {
                if b == 0x00 {
                    out.push(0x00);
                    out.push(0xFF);
                } else {
                    out.push(b);
                }
            }
            out.push(0x00);
            out.push(0x00);
        }
    }
}

fn order_preserving_f64(v: f64) -> u64 {
    let bits = v.to_bits();
    if bits >> 63 == 1 {
        !bits
    } else {
        bits | 0x8000_0000_0000_0000
    }
}

fn order_preserving_f32(v: f32) -> u32 {
    let bits = v.to_bits();
    if bits >> 31 == 1 {
        !bits
    } else {
        bits | 0x8000_0000
    }
}

fn decode_order_preserving_f64(bits: u64) -> f64 {
    let raw = if bits >> 63 == 1 {
        bits & 0x7FFF_FFFF_FFFF_FFFF
    } else {
        !bits
    };
    f64::from_bits(raw)
}

fn decode_order_preserving_f32(bits: u32) -> f32 {
    let raw = if bits >> 31 == 1 {
        bits & 0x7FFF_FFFF
    } else {
        !bits
    };
    f32::from_bits(raw)
}

/// Unpack a full byte string previously produced by [`pack`] back into its
/// tuple of values.
pub fn unpack(mut bytes: &[u8]) -> CResult<Vec<Value>> {
    let mut out = Vec::new();
    while !bytes.is_empty() {
        let (value, rest) = unpack_one(bytes)?;
        out.push(value);
        bytes = rest;
    }
    Ok(out)
}

fn unpack_one(bytes: &[u8]) -> CResult<(Value, &[u8])> {
    let incomplete = || Error::internal("truncated tuple encoding");
    let (tag, rest) = bytes.split_first().ok_or_else(incomplete)?;
    match *tag {
        TAG_TINYINT => {
            let (b, rest) = take::<1>(rest)?;
            Ok((Value::TinyInt((b[0] ^ 0x80) as i8), rest))
        }
        TAG_SMALLINT => {
            let (b, rest) = take::<2>(rest)?;
            let u = u16::from_be_bytes(b) ^ 0x8000;
            Ok((Value::SmallInt(u as i16), rest))
        }
        TAG_INT => {
            let (b, rest) = take::<4>(rest)?;
            let u = u32::from_be_bytes(b) ^ 0x8000_0000;
            Ok((Value::Int(u as i32), rest))
        }
        TAG_BIGINT => {
            let (b, rest) = take::<8>(rest)?;
            let u = u64::from_be_bytes(b) ^ 0x8000_0000_0000_0000;
            Ok((Value::BigInt(u as i64), rest))
        }
        TAG_DOUBLE => {
            let (b, rest) = take::<8>(rest)?;
            Ok((Value::Double(decode_order_preserving_f64(u64::from_be_bytes(b))), rest))
        }
        TAG_FLOAT => {
            let (b, rest) = take::<4>(rest)?;
            Ok((Value::Float(decode_order_preserving_f32(u32::from_be_bytes(b))), rest))
        }
        TAG_TIMESTAMP => {
            let (sb, rest) = take::<8>(rest)?;
            let (nb, rest) = take::<4>(rest)?;
            let secs = (u64::from_be_bytes(sb) ^ 0x8000_0000_0000_0000) as i64;
            let nanos = u32::from_be_bytes(nb) as i32;
            Ok((Value::Timestamp(secs, nanos), rest))
        }
        TAG_BOOLEAN => {
            let (b, rest) = take::<1>(rest)?;
            Ok((Value::Boolean(b[0] != 0), rest))
        }
        TAG_TEXT => {
            let mut decoded = Vec::new();
            let mut i = 0;
            loop {
                if i + 1 >= rest.len() {
                    return Err(incomplete());
                }
                match (rest[i], rest.get(i + 1)) {
                    (0x00, Some(0x00)) => {
                        i += 2;
                        break;
                    }
                    (0x00, Some(0xFF)) => {
                        decoded.push(0x00);
                        i += 2;
                    }
                    (b, _) => {
                        decoded.push(b);
                        i += 1;
                    }
                }
            }
            let s = String::from_utf8(decoded).map_err(|e| Error::internal(e.to_string()))?;
            Ok((Value::Text(s), &rest[i..]))
        }
        other => Err(Error::internal(format!("unknown tuple tag {other:#x}"))),
    }
}

fn take<const N: usize>(bytes: &[u8]) -> CResult<([u8; N], &[u8])> {
    if bytes.len() < N {
        return Err(Error::internal("truncated tuple encoding"));
    }
    let mut arr = [0u8; N];
    arr.copy_from_slice(&bytes[..N]);
    Ok((arr, &bytes[N..]))
}

/// The smallest byte string strictly greater than every string with the
/// given prefix -- the exclusive upper bound of a prefix range scan.
pub fn strinc(prefix: &[u8]) -> Vec<u8> {
    let mut out = prefix.to_vec();
    while let Some(&last) = out.last() {
        if last == 0xFF {
            out.pop();
        } else {
            *out.last_mut().unwrap() += 1;
            return out;
        }
    }
    // All bytes were 0xFF (or prefix empty): no finite exclusive bound.
    // Callers are expected to special-case this; in practice no valid
    // row key prefix produced by this crate ever hits it.
    out.push(0xFF)
}
