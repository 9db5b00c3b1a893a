//! The on-disk schema encoding (§4.2): big-endian, length-prefixed, and
//! versioned so a future format change can add a branch here without
//! touching `Schema` itself.

use byteorder::{BigEndian, ByteOrder};

use common::error::Error;
use common::value::DataType;
use common::CResult;

use crate::schema::Schema;

const SCHEMA_VERSION: u32 = 1;

pub fn encode(schema: &Schema) -> Vec<u8> {
    let mut out = Vec::new();
    let mut buf = [0u8; 4];

    BigEndian::write_u32(&mut buf, SCHEMA_VERSION);
    out.extend_from_slice(&buf);

    BigEndian::write_u32(&mut buf, schema.columns.len() as u32);
    out.extend_from_slice(&buf);
    for col in &schema.columns {
        BigEndian::write_u32(&mut buf, col.name.len() as u32);
        out.extend_from_slice(&buf);
        out.extend_from_slice(col.name.as_bytes());
        BigEndian::write_u32(&mut buf, u32::from(col.data_type));
        out.extend_from_slice(&buf);
    }

    BigEndian::write_u32(&mut buf, schema.keys.len() as u32);
    out.extend_from_slice(&buf);
    for key in &schema.keys {
        BigEndian::write_u32(&mut buf, key.column_index);
        out.extend_from_slice(&buf);
    }

    out
}

pub fn decode(bytes: &[u8]) -> CResult<Schema> {
    let corrupt = || Error::internal("corrupt schema encoding");
    let mut cursor = bytes;

    let _version = read_u32(&mut cursor, corrupt)?;

    let column_count = read_u32(&mut cursor, corrupt)? as usize;
    let mut column_defs = Vec::with_capacity(column_count);
    for _ in 0..column_count {
        let name_len = read_u32(&mut cursor, corrupt)? as usize;
        if cursor.len() < name_len {
            return Err(corrupt());
        }
        let name = String::from_utf8(cursor[..name_len].to_vec()).map_err(|_| corrupt())?;
        cursor = &cursor[name_len..];
        let type_tag = read_u32(&mut cursor, corrupt)?;
        let data_type = DataType::try_from(type_tag).map_err(|_| corrupt())?;
        column_defs.push((name, data_type));
    }

    let key_count = read_u32(&mut cursor, corrupt)? as usize;
    let mut primary_key = Vec::with_capacity(key_count);
    for _ in 0..key_count {
        let idx = read_u32(&mut cursor, corrupt)? as usize;
        let (name, _) = column_defs.get(idx).ok_or_else(corrupt)?;
        primary_key.push(name.clone());
    }

    Schema::build(&column_defs, &primary_key)
}

fn read_u32(cursor: &mut &[u8], err: impl Fn() -> Error) -> CResult<u32> {
    if cursor.len() < 4 {
        return Err(err());
    }
    let v = BigEndian::read_u32(cursor);
    *cursor = &cursor[4..];
    Ok(v)
}
