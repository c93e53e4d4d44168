use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{NaiveDate, NaiveDateTime, NaiveTime, Timelike};

use crate::dbf::column::{Column, ColumnType};
use crate::dbf::error::{XbaseError, XbaseResult};
use crate::util;

/// Host-side value of one field.
///
/// The admissible tags for a field are a function of its column type code;
/// `decode` only ever produces the tags listed per code below and `encode`
/// rejects the rest.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Character(String),
    Integer(i64),
    Float(f64),
    Logical(bool),
    Date(NaiveDate),
    DateTime(NaiveDateTime),
    /// Resolved textual memo content
    Memo(String),
    /// Resolved binary memo content, and opaque varchar/varbinary buffers
    Blob(Vec<u8>),
    /// Unresolved memo block id (no memo store attached)
    Block(u32),
    Null,
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Character(_) => "character",
            Value::Integer(_) => "integer",
            Value::Float(_) => "float",
            Value::Logical(_) => "logical",
            Value::Date(_) => "date",
            Value::DateTime(_) => "datetime",
            Value::Memo(_) => "memo",
            Value::Blob(_) => "blob",
            Value::Block(_) => "block",
            Value::Null => "null",
        }
    }

    /// Strip leading and trailing ascii whitespace from string-shaped values;
    /// everything else passes through untouched.
    pub fn trimmed(self) -> Value {
        match self {
            Value::Character(s) => Value::Character(s.trim().to_string()),
            Value::Memo(s) => Value::Memo(s.trim().to_string()),
            other => other,
        }
    }
}

fn decode_err(index: usize, col: &Column, reason: impl Into<String>) -> XbaseError {
    XbaseError::ValueDecode {
        index,
        name: col.name().to_string(),
        reason: reason.into(),
    }
}

fn encode_err(index: usize, col: &Column, reason: impl Into<String>) -> XbaseError {
    XbaseError::ValueEncode {
        index,
        name: col.name().to_string(),
        reason: reason.into(),
    }
}

fn too_long(index: usize, col: &Column) -> XbaseError {
    XbaseError::ValueTooLong {
        index,
        name: col.name().to_string(),
        length: col.length as usize,
    }
}

/// Decode one slot into its host value. The slot is exactly
/// `col.length` bytes; memo codes decode to the raw block id here and are
/// resolved by the row codec when a memo store is attached.
pub fn decode(col: &Column, index: usize, slot: &[u8]) -> XbaseResult<Value> {
    debug_assert_eq!(slot.len(), col.length as usize);

    match col.col_type {
        ColumnType::Character => Ok(Value::Character(String::from_utf8_lossy(slot).into_owned())),
        ColumnType::Numeric => decode_numeric(col, index, slot, col.decimals > 0),
        ColumnType::Float => decode_numeric(col, index, slot, true),
        ColumnType::Integer => {
            if slot.len() != 4 {
                return Err(decode_err(index, col, "integer slot must be 4 bytes"));
            }
            Ok(Value::Integer(util::i32_val(slot, 0) as i64))
        }
        ColumnType::Logical => match slot[0] {
            b'T' | b't' | b'Y' | b'y' => Ok(Value::Logical(true)),
            b'F' | b'f' | b'N' | b'n' => Ok(Value::Logical(false)),
            b'?' | b' ' | 0 => Ok(Value::Null),
            other => Err(decode_err(index, col, format!("unknown logical byte 0x{:02x}", other))),
        },
        ColumnType::Date => decode_date(col, index, slot),
        ColumnType::DateTime => decode_datetime(col, index, slot),
        ColumnType::Memo | ColumnType::General | ColumnType::Picture | ColumnType::Blob => {
            decode_block_ref(col, index, slot)
        }
        ColumnType::Currency => {
            if slot.len() != 8 {
                return Err(decode_err(index, col, "currency slot must be 8 bytes"));
            }
            Ok(Value::Float(util::i64_val(slot, 0) as f64 / 10_000.0))
        }
        ColumnType::Varchar | ColumnType::Varbinary | ColumnType::NullFlags => {
            Ok(Value::Blob(slot.to_vec()))
        }
        ColumnType::UNDEF => Err(decode_err(index, col, "undefined column type")),
    }
}

fn decode_numeric(col: &Column, index: usize, slot: &[u8], float: bool) -> XbaseResult<Value> {
    let text = std::str::from_utf8(slot)
        .map_err(|_| decode_err(index, col, "numeric slot is not ascii"))?
        .trim();
    if text.is_empty() {
        return Ok(Value::Null);
    }
    if float || text.contains('.') {
        text.parse::<f64>()
            .map(Value::Float)
            .map_err(|e| decode_err(index, col, format!("bad float {:?}: {}", text, e)))
    } else {
        text.parse::<i64>()
            .map(Value::Integer)
            .map_err(|e| decode_err(index, col, format!("bad integer {:?}: {}", text, e)))
    }
}

fn decode_date(col: &Column, index: usize, slot: &[u8]) -> XbaseResult<Value> {
    let text = std::str::from_utf8(slot)
        .map_err(|_| decode_err(index, col, "date slot is not ascii"))?;
    // an empty date is either space-padded or all zero digits
    if text.trim().is_empty() || text.bytes().all(|b| b == b'0') {
        return Ok(Value::Null);
    }
    NaiveDate::parse_from_str(text, "%Y%m%d")
        .map(Value::Date)
        .map_err(|e| decode_err(index, col, format!("bad date {:?}: {}", text, e)))
}

fn decode_datetime(col: &Column, index: usize, slot: &[u8]) -> XbaseResult<Value> {
    if slot.len() != 8 {
        return Err(decode_err(index, col, "datetime slot must be 8 bytes"));
    }
    let jdn = util::u32_val(slot, 0);
    let millis = util::u32_val(slot, 4);
    if jdn == 0 && millis == 0 {
        return Ok(Value::Null);
    }
    let date = util::julian_to_date(jdn)
        .ok_or_else(|| decode_err(index, col, format!("julian day {} out of range", jdn)))?;
    let time = NaiveTime::from_num_seconds_from_midnight_opt(millis / 1000, (millis % 1000) * 1_000_000)
        .ok_or_else(|| decode_err(index, col, format!("milliseconds {} out of range", millis)))?;
    Ok(Value::DateTime(NaiveDateTime::new(date, time)))
}

fn decode_block_ref(col: &Column, index: usize, slot: &[u8]) -> XbaseResult<Value> {
    if col.length == 4 {
        let id = util::u32_val(slot, 0);
        return Ok(if id == 0 { Value::Null } else { Value::Block(id) });
    }
    // dBase layout: right-justified ascii digits
    let text = std::str::from_utf8(slot)
        .map_err(|_| decode_err(index, col, "memo slot is not ascii"))?
        .trim();
    if text.is_empty() {
        return Ok(Value::Null);
    }
    text.parse::<u32>()
        .map(Value::Block)
        .map_err(|e| decode_err(index, col, format!("bad block id {:?}: {}", text, e)))
}

/// Encode one host value into its `col.length`-byte slot. The encoder never
/// writes past the slot: anything over-long fails with `ValueTooLong`.
pub fn encode(col: &Column, index: usize, value: &Value) -> XbaseResult<Vec<u8>> {
    let width = col.length as usize;

    match col.col_type {
        ColumnType::Character => match value {
            Value::Null => Ok(vec![b' '; width]),
            Value::Character(s) => {
                if s.len() > width {
                    return Err(too_long(index, col));
                }
                let mut slot = vec![b' '; width];
                slot[..s.len()].copy_from_slice(s.as_bytes());
                Ok(slot)
            }
            other => Err(type_mismatch(index, col, "character", other)),
        },
        ColumnType::Numeric | ColumnType::Float => encode_numeric(col, index, value),
        ColumnType::Integer => match value {
            Value::Null => Ok(vec![0u8; 4]),
            Value::Integer(i) => {
                let v = i32::try_from(*i)
                    .map_err(|_| encode_err(index, col, format!("{} does not fit in an i32 slot", i)))?;
                Ok(v.to_le_bytes().to_vec())
            }
            other => Err(type_mismatch(index, col, "integer", other)),
        },
        ColumnType::Logical => {
            let byte = match value {
                Value::Logical(true) => b'T',
                Value::Logical(false) => b'F',
                Value::Null => b'?',
                other => return Err(type_mismatch(index, col, "logical", other)),
            };
            let mut slot = vec![b' '; width];
            slot[0] = byte;
            Ok(slot)
        }
        ColumnType::Date => match value {
            Value::Null => Ok(vec![b' '; 8]),
            Value::Date(d) => Ok(d.format("%Y%m%d").to_string().into_bytes()),
            Value::DateTime(dt) => Ok(dt.date().format("%Y%m%d").to_string().into_bytes()),
            other => Err(type_mismatch(index, col, "date", other)),
        },
        ColumnType::DateTime => match value {
            Value::Null => Ok(vec![0u8; 8]),
            Value::DateTime(dt) => {
                let mut slot = Vec::with_capacity(8);
                slot.extend_from_slice(&util::date_to_julian(dt.date()).to_le_bytes());
                let millis =
                    dt.time().num_seconds_from_midnight() * 1000 + dt.time().nanosecond() / 1_000_000;
                slot.extend_from_slice(&millis.to_le_bytes());
                Ok(slot)
            }
            Value::Date(d) => {
                let mut slot = Vec::with_capacity(8);
                slot.extend_from_slice(&util::date_to_julian(*d).to_le_bytes());
                slot.extend_from_slice(&0u32.to_le_bytes());
                Ok(slot)
            }
            other => Err(type_mismatch(index, col, "datetime", other)),
        },
        ColumnType::Memo | ColumnType::General | ColumnType::Picture | ColumnType::Blob => {
            encode_block_ref(col, index, value)
        }
        ColumnType::Currency => match value {
            Value::Null => Ok(vec![0u8; 8]),
            Value::Float(f) => {
                let raw = (f * 10_000.0).round();
                if !raw.is_finite() || raw < i64::MIN as f64 || raw > i64::MAX as f64 {
                    return Err(encode_err(index, col, format!("{} out of currency range", f)));
                }
                Ok((raw as i64).to_le_bytes().to_vec())
            }
            Value::Integer(i) => {
                let raw = i
                    .checked_mul(10_000)
                    .ok_or_else(|| encode_err(index, col, format!("{} out of currency range", i)))?;
                Ok(raw.to_le_bytes().to_vec())
            }
            other => Err(type_mismatch(index, col, "currency", other)),
        },
        ColumnType::Varchar | ColumnType::Varbinary | ColumnType::NullFlags => match value {
            Value::Null => Ok(vec![0u8; width]),
            Value::Blob(b) => {
                if b.len() > width {
                    return Err(too_long(index, col));
                }
                let mut slot = vec![0u8; width];
                slot[..b.len()].copy_from_slice(b);
                Ok(slot)
            }
            other => Err(type_mismatch(index, col, "blob", other)),
        },
        ColumnType::UNDEF => Err(encode_err(index, col, "undefined column type")),
    }
}

fn type_mismatch(index: usize, col: &Column, want: &str, got: &Value) -> XbaseError {
    encode_err(index, col, format!("expected {}, got {}", want, got.type_name()))
}

fn encode_numeric(col: &Column, index: usize, value: &Value) -> XbaseResult<Vec<u8>> {
    let width = col.length as usize;
    let text = match value {
        Value::Null => return Ok(vec![b' '; width]),
        Value::Integer(i) => {
            if col.decimals > 0 {
                format!("{:.*}", col.decimals as usize, *i as f64)
            } else {
                i.to_string()
            }
        }
        Value::Float(f) => format!("{:.*}", col.decimals as usize, f),
        other => return Err(type_mismatch(index, col, "numeric", other)),
    };
    if text.len() > width {
        return Err(too_long(index, col));
    }
    let mut slot = vec![b' '; width];
    slot[width - text.len()..].copy_from_slice(text.as_bytes());
    Ok(slot)
}

fn encode_block_ref(col: &Column, index: usize, value: &Value) -> XbaseResult<Vec<u8>> {
    let width = col.length as usize;
    match value {
        Value::Null => Ok(if col.length == 4 { vec![0u8; 4] } else { vec![b' '; width] }),
        Value::Block(id) => {
            if col.length == 4 {
                Ok(id.to_le_bytes().to_vec())
            } else {
                let text = id.to_string();
                if text.len() > width {
                    return Err(too_long(index, col));
                }
                let mut slot = vec![b' '; width];
                slot[width - text.len()..].copy_from_slice(text.as_bytes());
                Ok(slot)
            }
        }
        Value::Memo(_) | Value::Blob(_) => Err(encode_err(
            index,
            col,
            "unresolved memo content, write the row through a table with a memo store",
        )),
        other => Err(type_mismatch(index, col, "memo block", other)),
    }
}

/// Map a host value onto the JSON-equivalent tagged tree. Dates, timestamps
/// and memo content have no exact JSON shape; strict mode rejects them
/// instead of degrading to strings.
pub fn value_to_json(value: &Value, strict: bool) -> Result<serde_json::Value, String> {
    let lossy = |what: &str| Err(format!("{} to JSON is lossy", what));
    match value {
        Value::Character(s) => Ok(serde_json::Value::String(s.clone())),
        Value::Integer(i) => Ok(serde_json::Value::from(*i)),
        Value::Float(f) => serde_json::Number::from_f64(*f)
            .map(serde_json::Value::Number)
            .ok_or_else(|| format!("{} is not a finite number", f)),
        Value::Logical(b) => Ok(serde_json::Value::Bool(*b)),
        Value::Null => Ok(serde_json::Value::Null),
        Value::Date(_) if strict => lossy("date"),
        Value::Date(d) => Ok(serde_json::Value::String(d.format("%Y-%m-%d").to_string())),
        Value::DateTime(_) if strict => lossy("datetime"),
        Value::DateTime(dt) => Ok(serde_json::Value::String(
            dt.format("%Y-%m-%dT%H:%M:%S%.3f").to_string(),
        )),
        Value::Memo(_) if strict => lossy("memo"),
        Value::Memo(s) => Ok(serde_json::Value::String(s.clone())),
        Value::Blob(_) if strict => lossy("blob"),
        Value::Blob(b) => Ok(serde_json::Value::String(BASE64.encode(b))),
        Value::Block(_) if strict => lossy("memo block id"),
        Value::Block(id) => Ok(serde_json::Value::from(*id)),
    }
}

/// Inverse tree mapping. No slot typing is applied here; the value codec
/// polices tags when the row is encoded back to bytes.
pub fn json_to_value(json: &serde_json::Value) -> Result<Value, String> {
    match json {
        serde_json::Value::Null => Ok(Value::Null),
        serde_json::Value::Bool(b) => Ok(Value::Logical(*b)),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Ok(Value::Integer(i))
            } else {
                n.as_f64()
                    .map(Value::Float)
                    .ok_or_else(|| format!("{} is not representable", n))
            }
        }
        serde_json::Value::String(s) => Ok(Value::Character(s.clone())),
        serde_json::Value::Array(_) | serde_json::Value::Object(_) => {
            Err("nested JSON values are not representable in a slot".into())
        }
    }
}
