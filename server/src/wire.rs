//! The request/reply envelope (§6): BSON by default, JSON after the
//! `protocol=json` opt-in, both keyed by the string-integer field names
//! the wire format specifies.

use common::error::Error;
use common::value::{RawValue, Value};
use common::CResult;

/// An untyped scalar or array as it travels on the wire, independent of
/// whether the connection speaks BSON or JSON.
#[derive(Debug, Clone, PartialEq)]
pub enum WireValue {
    Int(i64),
    Float(f64),
    Text(String),
    Bool(bool),
    Array(Vec<WireValue>),
    Null,
}

impl WireValue {
    pub fn from_value(v: &Value) -> WireValue {
        match v {
            Value::TinyInt(i) => WireValue::Int(*i as i64),
            Value::SmallInt(i) => WireValue::Int(*i as i64),
            Value::Int(i) => WireValue::Int(*i as i64),
            Value::BigInt(i) => WireValue::Int(*i),
            Value::Double(f) => WireValue::Float(*f),
            Value::Float(f) => WireValue::Float(*f as f64),
            Value::Timestamp(s, n) => WireValue::Array(vec![WireValue::Int(*s), WireValue::Int(*n as i64)]),
            Value::Boolean(b) => WireValue::Bool(*b),
            Value::Text(s) => WireValue::Text(s.clone()),
        }
    }

    /// Lower a wire argument into the untyped shape the resolver/executor
    /// coercion path expects. A two-element numeric array is taken as a
    /// `[seconds, nanoseconds]` timestamp (§4.3); no other array shape is
    /// a valid scalar argument.
    pub fn into_raw(self) -> CResult<RawValue> {
        match self {
            WireValue::Int(v) => Ok(RawValue::Integer(v)),
            WireValue::Float(v) => Ok(RawValue::Float(v)),
            WireValue::Text(v) => Ok(RawValue::Text(v)),
            WireValue::Bool(v) => Ok(RawValue::Boolean(v)),
            WireValue::Null => Ok(RawValue::Null),
            WireValue::Array(items) => match items.as_slice() {
                [WireValue::Int(s), WireValue::Int(n)] => Ok(RawValue::TimestampPair(*s, *n)),
                _ => Err(Error::plan("array arguments are only accepted as [seconds, nanoseconds] timestamps")),
            },
        }
    }

    fn from_bson(b: &bson::Bson) -> CResult<WireValue> {
        use bson::Bson;
        Ok(match b {
            Bson::Int32(v) => WireValue::Int(*v as i64),
            Bson::Int64(v) => WireValue::Int(*v),
            Bson::Double(v) => WireValue::Float(*v),
            Bson::String(v) => WireValue::Text(v.clone()),
            Bson::Boolean(v) => WireValue::Bool(*v),
            Bson::Null => WireValue::Null,
            Bson::Array(items) => WireValue::Array(items.iter().map(WireValue::from_bson).collect::<CResult<_>>()?),
            other => return Err(Error::internal(format!("unsupported bson value: {other:?}"))),
        })
    }

    fn to_bson(&self) -> bson::Bson {
        use bson::Bson;
        match self {
            WireValue::Int(v) => Bson::Int64(*v),
            WireValue::Float(v) => Bson::Double(*v),
            WireValue::Text(v) => Bson::String(v.clone()),
            WireValue::Bool(v) => Bson::Boolean(*v),
            WireValue::Null => Bson::Null,
            WireValue::Array(items) => Bson::Array(items.iter().map(WireValue::to_bson).collect()),
        }
    }

    fn from_json(v: &serde_json::Value) -> CResult<WireValue> {
        use serde_json::Value as J;
        Ok(match v {
            J::Number(n) => {
                if let Some(i) = n.as_i64() {
                    WireValue::Int(i)
                } else if let Some(f) = n.as_f64() {
                    WireValue::Float(f)
                } else {
                    return Err(Error::internal("unrepresentable json number"));
                }
            }
            J::String(s) => WireValue::Text(s.clone()),
            J::Bool(b) => WireValue::Bool(*b),
            J::Null => WireValue::Null,
            J::Array(items) => WireValue::Array(items.iter().map(WireValue::from_json).collect::<CResult<_>>()?),
            J::Object(_) => return Err(Error::internal("nested objects are not a supported argument shape")),
        })
    }

    fn to_json(&self) -> serde_json::Value {
        use serde_json::Value as J;
        match self {
            WireValue::Int(v) => J::from(*v),
            WireValue::Float(v) => J::from(*v),
            WireValue::Text(v) => J::from(v.clone()),
            WireValue::Bool(v) => J::from(*v),
            WireValue::Null => J::Null,
            WireValue::Array(items) => J::Array(items.iter().map(WireValue::to_json).collect()),
        }
    }
}

/// A decoded request envelope, still holding wire-shaped values -- the
/// dispatcher is the one that knows how to interpret `"2"`/`"3"` for a
/// given command.
#[derive(Debug, Clone)]
pub struct Request {
    pub id: i64,
    pub cmd: String,
    pub arg2: Option<WireValue>,
    pub arg3: Vec<WireValue>,
    pub use_cache: bool,
}

/// What a reply carries in its `"1"`/`"2"` field (§6).
pub enum ReplyBody {
    Result(WireValue),
    Error(String),
    Raw(Vec<u8>),
}

pub struct Reply {
    pub id: i64,
    pub body: ReplyBody,
}

pub fn decode_request(bytes: &[u8], use_json: bool) -> CResult<Request> {
    if use_json {
        decode_request_json(bytes)
    } else {
        decode_request_bson(bytes)
    }
}

fn decode_request_bson(bytes: &[u8]) -> CResult<Request> {
    let doc: bson::Document = bson::from_slice(bytes).map_err(|e| Error::internal(format!("malformed bson request: {e}")))?;
    let id = doc
        .get_i64("0")
        .or_else(|_| doc.get_i32("0").map(i64::from))
        .map_err(|_| Error::internal("request missing id field \"0\""))?;
    let cmd = doc
        .get_str("1")
        .map_err(|_| Error::internal("request missing command field \"1\""))?
        .to_string();
    let arg2 = match doc.get("2") {
        Some(v) => Some(WireValue::from_bson(v)?),
        None => None,
    };
    let arg3 = match doc.get_array("3") {
        Ok(items) => items.iter().map(WireValue::from_bson).collect::<CResult<_>>()?,
        Err(_) => Vec::new(),
    };
    let use_cache = doc.get_i32("4").map(|v| v > 0).unwrap_or(false);
    Ok(Request { id, cmd, arg2, arg3, use_cache })
}

fn decode_request_json(bytes: &[u8]) -> CResult<Request> {
    let v: serde_json::Value =
        serde_json::from_slice(bytes).map_err(|e| Error::internal(format!("malformed json request: {e}")))?;
    let obj = v.as_object().ok_or_else(|| Error::internal("json request is not an object"))?;
    let id = obj
        .get("0")
        .and_then(|v| v.as_i64())
        .ok_or_else(|| Error::internal("request missing id field \"0\""))?;
    let cmd = obj
        .get("1")
        .and_then(|v| v.as_str())
        .ok_or_else(|| Error::internal("request missing command field \"1\""))?
        .to_string();
    let arg2 = match obj.get("2") {
        Some(v) => Some(WireValue::from_json(v)?),
        None => None,
    };
    let arg3 = match obj.get("3").and_then(|v| v.as_array()) {
        Some(items) => items.iter().map(WireValue::from_json).collect::<CResult<_>>()?,
        None => Vec::new(),
    };
    let use_cache = obj.get("4").and_then(|v| v.as_i64()).map(|v| v > 0).unwrap_or(false);
    Ok(Request { id, cmd, arg2, arg3, use_cache })
}

pub fn encode_reply(reply: &Reply, use_json: bool) -> CResult<Vec<u8>> {
    if use_json {
        encode_reply_json(reply)
    } else {
        encode_reply_bson(reply)
    }
}

fn encode_reply_bson(reply: &Reply) -> CResult<Vec<u8>> {
    let mut doc = bson::Document::new();
    doc.insert("0", reply.id);
    match &reply.body {
        ReplyBody::Result(v) => {
            doc.insert("1", v.to_bson());
        }
        ReplyBody::Error(msg) => {
            doc.insert("1", msg.clone());
        }
        ReplyBody::Raw(bytes) => {
            doc.insert("2", bson::Bson::Binary(bson::Binary { subtype: bson::spec::BinarySubtype::Generic, bytes: bytes.clone() }));
        }
    }
    bson::to_vec(&doc).map_err(|e| Error::internal(format!("bson encode error: {e}")))
}

fn encode_reply_json(reply: &Reply) -> CResult<Vec<u8>> {
    let mut obj = serde_json::Map::new();
    obj.insert("0".to_string(), serde_json::Value::from(reply.id));
    match &reply.body {
        ReplyBody::Result(v) => {
            obj.insert("1".to_string(), v.to_json());
        }
        ReplyBody::Error(msg) => {
            obj.insert("1".to_string(), serde_json::Value::from(msg.clone()));
        }
        ReplyBody::Raw(bytes) => {
            let array: Vec<serde_json::Value> = bytes.iter().map(|b| serde_json::Value::from(*b)).collect();
            obj.insert("2".to_string(), serde_json::Value::Array(array));
        }
    }
    serde_json::to_vec(&serde_json::Value::Object(obj)).map_err(|e| Error::internal(format!("json encode error: {e}")))
}

pub fn rows_to_wire(rows: &[Vec<Value>]) -> WireValue {
    WireValue::Array(rows.iter().map(|row| WireValue::Array(row.iter().map(WireValue::from_value).collect())).collect())
}
