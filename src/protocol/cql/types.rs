//! CQL v4 notation primitives (`[string]`, `[long string]`, `[bytes]`, ...), column types
//! and cell values.

use std::collections::HashMap;
use std::fmt;

use bytes::Buf;
use bytes::BufMut;
use bytes::Bytes;
use bytes::BytesMut;
use serde::Deserialize;
use serde::Serialize;

use crate::constants::TABULAR;
use crate::ProtocolError;

type Result<T> = std::result::Result<T, ProtocolError>;

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[repr(u16)]
pub enum Consistency {
    Any = 0x0000,
    #[default]
    One = 0x0001,
    Two = 0x0002,
    Three = 0x0003,
    Quorum = 0x0004,
    All = 0x0005,
    LocalQuorum = 0x0006,
    EachQuorum = 0x0007,
    Serial = 0x0008,
    LocalSerial = 0x0009,
    LocalOne = 0x000A,
}

impl TryFrom<u16> for Consistency {
    type Error = ProtocolError;

    fn try_from(value: u16) -> Result<Self> {
        Ok(match value {
            0x0000 => Consistency::Any,
            0x0001 => Consistency::One,
            0x0002 => Consistency::Two,
            0x0003 => Consistency::Three,
            0x0004 => Consistency::Quorum,
            0x0005 => Consistency::All,
            0x0006 => Consistency::LocalQuorum,
            0x0007 => Consistency::EachQuorum,
            0x0008 => Consistency::Serial,
            0x0009 => Consistency::LocalSerial,
            0x000A => Consistency::LocalOne,
            other => {
                return Err(ProtocolError::malformed(
                    TABULAR,
                    format!("unknown consistency {other:#06x}"),
                ))
            }
        })
    }
}

/// Column type option as carried in rows metadata
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ColumnType {
    Custom(String),
    Ascii,
    Bigint,
    Blob,
    Boolean,
    Counter,
    Decimal,
    Double,
    Float,
    Int,
    Timestamp,
    Uuid,
    Varchar,
    Varint,
    Timeuuid,
    Inet,
    Date,
    Time,
    Smallint,
    Tinyint,
    List(Box<ColumnType>),
    Map(Box<ColumnType>, Box<ColumnType>),
    Set(Box<ColumnType>),
    Udt {
        keyspace: String,
        name: String,
        fields: Vec<(String, ColumnType)>,
    },
    Tuple(Vec<ColumnType>),
}

/// Decoded cell. Types the harness never compares stay as raw bytes.
#[derive(Debug, Clone, PartialEq)]
pub enum CqlValue {
    Null,
    Boolean(bool),
    Tinyint(i8),
    Smallint(i16),
    Int(i32),
    Bigint(i64),
    Float(f32),
    Double(f64),
    /// Milliseconds since the epoch
    Timestamp(i64),
    Text(String),
    Blob(Bytes),
    Raw(Bytes),
}

// -
// Primitive readers

fn need(
    src: &Bytes,
    n: usize,
    what: &str,
) -> Result<()> {
    if src.remaining() < n {
        return Err(ProtocolError::malformed(
            TABULAR,
            format!("truncated {what}: need {n} bytes, have {}", src.remaining()),
        ));
    }
    Ok(())
}

pub fn get_u8(src: &mut Bytes) -> Result<u8> {
    need(src, 1, "byte")?;
    Ok(src.get_u8())
}

pub fn get_short(src: &mut Bytes) -> Result<u16> {
    need(src, 2, "short")?;
    Ok(src.get_u16())
}

pub fn get_int(src: &mut Bytes) -> Result<i32> {
    need(src, 4, "int")?;
    Ok(src.get_i32())
}

pub fn get_string(src: &mut Bytes) -> Result<String> {
    let len = get_short(src)? as usize;
    take_utf8(src, len)
}

pub fn get_long_string(src: &mut Bytes) -> Result<String> {
    let len = get_int(src)?;
    if len < 0 {
        return Err(ProtocolError::malformed(
            TABULAR,
            "negative long string length",
        ));
    }
    take_utf8(src, len as usize)
}

/// `[bytes]`: negative length is null
pub fn get_bytes(src: &mut Bytes) -> Result<Option<Bytes>> {
    let len = get_int(src)?;
    if len < 0 {
        return Ok(None);
    }
    let len = len as usize;
    need(src, len, "bytes")?;
    Ok(Some(src.split_to(len)))
}

pub fn get_short_bytes(src: &mut Bytes) -> Result<Bytes> {
    let len = get_short(src)? as usize;
    need(src, len, "short bytes")?;
    Ok(src.split_to(len))
}

pub fn get_string_list(src: &mut Bytes) -> Result<Vec<String>> {
    let n = get_short(src)?;
    (0..n).map(|_| get_string(src)).collect()
}

pub fn get_string_map(src: &mut Bytes) -> Result<HashMap<String, String>> {
    let n = get_short(src)?;
    let mut map = HashMap::with_capacity(n as usize);
    for _ in 0..n {
        let k = get_string(src)?;
        let v = get_string(src)?;
        map.insert(k, v);
    }
    Ok(map)
}

pub fn get_string_multimap(src: &mut Bytes) -> Result<HashMap<String, Vec<String>>> {
    let n = get_short(src)?;
    let mut map = HashMap::with_capacity(n as usize);
    for _ in 0..n {
        let k = get_string(src)?;
        let v = get_string_list(src)?;
        map.insert(k, v);
    }
    Ok(map)
}

fn take_utf8(
    src: &mut Bytes,
    len: usize,
) -> Result<String> {
    need(src, len, "string")?;
    let raw = src.split_to(len);
    String::from_utf8(raw.to_vec())
        .map_err(|e| ProtocolError::malformed(TABULAR, format!("invalid utf-8 string: {e}")))
}

// -
// Primitive writers

pub fn put_string(
    dst: &mut BytesMut,
    s: &str,
) {
    dst.put_u16(s.len() as u16);
    dst.put_slice(s.as_bytes());
}

pub fn put_long_string(
    dst: &mut BytesMut,
    s: &str,
) {
    dst.put_i32(s.len() as i32);
    dst.put_slice(s.as_bytes());
}

pub fn put_bytes(
    dst: &mut BytesMut,
    b: Option<&[u8]>,
) {
    match b {
        Some(b) => {
            dst.put_i32(b.len() as i32);
            dst.put_slice(b);
        }
        None => dst.put_i32(-1),
    }
}

pub fn put_short_bytes(
    dst: &mut BytesMut,
    b: &[u8],
) {
    dst.put_u16(b.len() as u16);
    dst.put_slice(b);
}

pub fn put_string_list(
    dst: &mut BytesMut,
    items: &[String],
) {
    dst.put_u16(items.len() as u16);
    for item in items {
        put_string(dst, item);
    }
}

pub fn put_string_map<'a>(
    dst: &mut BytesMut,
    entries: impl ExactSizeIterator<Item = (&'a str, &'a str)>,
) {
    dst.put_u16(entries.len() as u16);
    for (k, v) in entries {
        put_string(dst, k);
        put_string(dst, v);
    }
}

pub fn put_string_multimap(
    dst: &mut BytesMut,
    map: &HashMap<String, Vec<String>>,
) {
    dst.put_u16(map.len() as u16);
    for (k, v) in map {
        put_string(dst, k);
        put_string_list(dst, v);
    }
}

// -
// Column types

impl ColumnType {
    pub fn decode(src: &mut Bytes) -> Result<ColumnType> {
        let id = get_short(src)?;
        Ok(match id {
            0x0000 => ColumnType::Custom(get_string(src)?),
            0x0001 => ColumnType::Ascii,
            0x0002 => ColumnType::Bigint,
            0x0003 => ColumnType::Blob,
            0x0004 => ColumnType::Boolean,
            0x0005 => ColumnType::Counter,
            0x0006 => ColumnType::Decimal,
            0x0007 => ColumnType::Double,
            0x0008 => ColumnType::Float,
            0x0009 => ColumnType::Int,
            0x000B => ColumnType::Timestamp,
            0x000C => ColumnType::Uuid,
            0x000D => ColumnType::Varchar,
            0x000E => ColumnType::Varint,
            0x000F => ColumnType::Timeuuid,
            0x0010 => ColumnType::Inet,
            0x0011 => ColumnType::Date,
            0x0012 => ColumnType::Time,
            0x0013 => ColumnType::Smallint,
            0x0014 => ColumnType::Tinyint,
            0x0020 => ColumnType::List(Box::new(ColumnType::decode(src)?)),
            0x0021 => {
                let key = ColumnType::decode(src)?;
                let value = ColumnType::decode(src)?;
                ColumnType::Map(Box::new(key), Box::new(value))
            }
            0x0022 => ColumnType::Set(Box::new(ColumnType::decode(src)?)),
            0x0030 => {
                let keyspace = get_string(src)?;
                let name = get_string(src)?;
                let n = get_short(src)?;
                let mut fields = Vec::with_capacity(n as usize);
                for _ in 0..n {
                    let field = get_string(src)?;
                    fields.push((field, ColumnType::decode(src)?));
                }
                ColumnType::Udt {
                    keyspace,
                    name,
                    fields,
                }
            }
            0x0031 => {
                let n = get_short(src)?;
                let items = (0..n)
                    .map(|_| ColumnType::decode(src))
                    .collect::<Result<Vec<_>>>()?;
                ColumnType::Tuple(items)
            }
            other => {
                return Err(ProtocolError::malformed(
                    TABULAR,
                    format!("unknown column type id {other:#06x}"),
                ))
            }
        })
    }

    pub fn encode(
        &self,
        dst: &mut BytesMut,
    ) {
        match self {
            ColumnType::Custom(class) => {
                dst.put_u16(0x0000);
                put_string(dst, class);
            }
            ColumnType::Ascii => dst.put_u16(0x0001),
            ColumnType::Bigint => dst.put_u16(0x0002),
            ColumnType::Blob => dst.put_u16(0x0003),
            ColumnType::Boolean => dst.put_u16(0x0004),
            ColumnType::Counter => dst.put_u16(0x0005),
            ColumnType::Decimal => dst.put_u16(0x0006),
            ColumnType::Double => dst.put_u16(0x0007),
            ColumnType::Float => dst.put_u16(0x0008),
            ColumnType::Int => dst.put_u16(0x0009),
            ColumnType::Timestamp => dst.put_u16(0x000B),
            ColumnType::Uuid => dst.put_u16(0x000C),
            ColumnType::Varchar => dst.put_u16(0x000D),
            ColumnType::Varint => dst.put_u16(0x000E),
            ColumnType::Timeuuid => dst.put_u16(0x000F),
            ColumnType::Inet => dst.put_u16(0x0010),
            ColumnType::Date => dst.put_u16(0x0011),
            ColumnType::Time => dst.put_u16(0x0012),
            ColumnType::Smallint => dst.put_u16(0x0013),
            ColumnType::Tinyint => dst.put_u16(0x0014),
            ColumnType::List(inner) => {
                dst.put_u16(0x0020);
                inner.encode(dst);
            }
            ColumnType::Map(k, v) => {
                dst.put_u16(0x0021);
                k.encode(dst);
                v.encode(dst);
            }
            ColumnType::Set(inner) => {
                dst.put_u16(0x0022);
                inner.encode(dst);
            }
            ColumnType::Udt {
                keyspace,
                name,
                fields,
            } => {
                dst.put_u16(0x0030);
                put_string(dst, keyspace);
                put_string(dst, name);
                dst.put_u16(fields.len() as u16);
                for (field, ty) in fields {
                    put_string(dst, field);
                    ty.encode(dst);
                }
            }
            ColumnType::Tuple(items) => {
                dst.put_u16(0x0031);
                dst.put_u16(items.len() as u16);
                for ty in items {
                    ty.encode(dst);
                }
            }
        }
    }
}

// -
// Values

fn fixed<const N: usize>(
    raw: &Bytes,
    ty: &ColumnType,
) -> Result<[u8; N]> {
    raw.as_ref().try_into().map_err(|_| {
        ProtocolError::malformed(
            TABULAR,
            format!("{ty:?} cell must be {N} bytes, got {}", raw.len()),
        )
    })
}

impl CqlValue {
    /// Decode a cell of type `ty`; `None` is the null cell
    pub fn decode(
        ty: &ColumnType,
        raw: Option<Bytes>,
    ) -> Result<CqlValue> {
        let Some(raw) = raw else {
            return Ok(CqlValue::Null);
        };
        Ok(match ty {
            ColumnType::Boolean => CqlValue::Boolean(fixed::<1>(&raw, ty)?[0] != 0),
            ColumnType::Tinyint => CqlValue::Tinyint(i8::from_be_bytes(fixed(&raw, ty)?)),
            ColumnType::Smallint => CqlValue::Smallint(i16::from_be_bytes(fixed(&raw, ty)?)),
            ColumnType::Int => CqlValue::Int(i32::from_be_bytes(fixed(&raw, ty)?)),
            ColumnType::Bigint | ColumnType::Counter => {
                CqlValue::Bigint(i64::from_be_bytes(fixed(&raw, ty)?))
            }
            ColumnType::Timestamp => CqlValue::Timestamp(i64::from_be_bytes(fixed(&raw, ty)?)),
            ColumnType::Float => CqlValue::Float(f32::from_be_bytes(fixed(&raw, ty)?)),
            ColumnType::Double => CqlValue::Double(f64::from_be_bytes(fixed(&raw, ty)?)),
            ColumnType::Ascii | ColumnType::Varchar => CqlValue::Text(
                String::from_utf8(raw.to_vec()).map_err(|e| {
                    ProtocolError::malformed(TABULAR, format!("invalid utf-8 cell: {e}"))
                })?,
            ),
            ColumnType::Blob => CqlValue::Blob(raw),
            _ => CqlValue::Raw(raw),
        })
    }

    /// Cell bytes, `None` for null
    pub fn encode(&self) -> Option<Bytes> {
        let bytes = match self {
            CqlValue::Null => return None,
            CqlValue::Boolean(b) => Bytes::copy_from_slice(&[u8::from(*b)]),
            CqlValue::Tinyint(v) => Bytes::copy_from_slice(&v.to_be_bytes()),
            CqlValue::Smallint(v) => Bytes::copy_from_slice(&v.to_be_bytes()),
            CqlValue::Int(v) => Bytes::copy_from_slice(&v.to_be_bytes()),
            CqlValue::Bigint(v) | CqlValue::Timestamp(v) => Bytes::copy_from_slice(&v.to_be_bytes()),
            CqlValue::Float(v) => Bytes::copy_from_slice(&v.to_be_bytes()),
            CqlValue::Double(v) => Bytes::copy_from_slice(&v.to_be_bytes()),
            CqlValue::Text(s) => Bytes::copy_from_slice(s.as_bytes()),
            CqlValue::Blob(b) | CqlValue::Raw(b) => b.clone(),
        };
        Some(bytes)
    }

    pub fn is_null(&self) -> bool {
        matches!(self, CqlValue::Null)
    }

    pub fn as_int(&self) -> Option<i32> {
        match self {
            CqlValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bigint(&self) -> Option<i64> {
        match self {
            CqlValue::Bigint(v) | CqlValue::Timestamp(v) => Some(*v),
            CqlValue::Int(v) => Some(i64::from(*v)),
            CqlValue::Smallint(v) => Some(i64::from(*v)),
            CqlValue::Tinyint(v) => Some(i64::from(*v)),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            CqlValue::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for CqlValue {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        match self {
            CqlValue::Null => write!(f, "null"),
            CqlValue::Boolean(v) => write!(f, "{v}"),
            CqlValue::Tinyint(v) => write!(f, "{v}"),
            CqlValue::Smallint(v) => write!(f, "{v}"),
            CqlValue::Int(v) => write!(f, "{v}"),
            CqlValue::Bigint(v) | CqlValue::Timestamp(v) => write!(f, "{v}"),
            CqlValue::Float(v) => write!(f, "{v}"),
            CqlValue::Double(v) => write!(f, "{v}"),
            CqlValue::Text(s) => write!(f, "'{s}'"),
            CqlValue::Blob(b) | CqlValue::Raw(b) => {
                write!(f, "0x")?;
                for byte in b.iter() {
                    write!(f, "{byte:02x}")?;
                }
                Ok(())
            }
        }
    }
}
