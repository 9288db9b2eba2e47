// Copyright 2025 Stoolap Contributors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Spill files for CTE tables
//!
//! A spilled table keeps its batches in an anonymous temp file. Each batch is
//! written as one contiguous record so it can be read back with a single
//! positioned read:
//!
//! ```text
//! batch  := row_count:u32 row*
//! row    := value_count:u32 (value_len:u32 value)*
//! value  := tag:u8 payload            (see encode_value)
//! ```
//!
//! All integers are little-endian. The value encoding doubles as the
//! fingerprint of correlated values, so it must be deterministic.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};
use std::sync::Arc;

use crate::core::{DataType, Error, Result, Row, RowBatch, Value};

/// Location of one batch inside a spill file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpillExtent {
    pub offset: u64,
    pub len: u32,
}

/// Append-only temp file holding encoded batches
pub struct SpillFile {
    file: File,
    len: u64,
}

impl SpillFile {
    /// Create a new anonymous temp file; it is removed when dropped
    pub fn new() -> Result<Self> {
        let file = tempfile::tempfile()?;
        Ok(Self { file, len: 0 })
    }

    /// Total bytes written
    #[inline]
    pub fn len(&self) -> u64 {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Encode and append a batch (logical rows only)
    pub fn append(&mut self, batch: &RowBatch) -> Result<SpillExtent> {
        let buf = encode_batch(batch)?;
        let len = u32::try_from(buf.len())
            .map_err(|_| Error::internal("batch too large to spill"))?;
        self.file.seek(SeekFrom::Start(self.len))?;
        self.file.write_all(&buf)?;
        let extent = SpillExtent {
            offset: self.len,
            len,
        };
        self.len += len as u64;
        Ok(extent)
    }

    /// Read back the batch stored at `extent`
    pub fn read(&mut self, extent: SpillExtent, capacity: usize) -> Result<RowBatch> {
        let mut buf = vec![0u8; extent.len as usize];
        self.file.seek(SeekFrom::Start(extent.offset))?;
        self.file.read_exact(&mut buf)?;
        decode_batch(&buf, capacity)
    }
}

/// Encode the logical rows of a batch
pub fn encode_batch(batch: &RowBatch) -> Result<Vec<u8>> {
    let mut buf = Vec::with_capacity(64);
    buf.extend_from_slice(&(batch.num_rows() as u32).to_le_bytes());
    for row in batch.iter() {
        buf.extend_from_slice(&(row.len() as u32).to_le_bytes());
        for value in row.iter() {
            let start = buf.len();
            buf.extend_from_slice(&0u32.to_le_bytes());
            encode_value(&mut buf, value);
            let value_len = (buf.len() - start - 4) as u32;
            buf[start..start + 4].copy_from_slice(&value_len.to_le_bytes());
        }
    }
    Ok(buf)
}

/// Decode a batch written by [`encode_batch`]
pub fn decode_batch(data: &[u8], capacity: usize) -> Result<RowBatch> {
    let mut pos = 0;
    let row_count = read_u32(data, &mut pos, "missing row count")? as usize;
    let mut batch = RowBatch::new(capacity.max(row_count));
    for _ in 0..row_count {
        let value_count = read_u32(data, &mut pos, "missing value count")? as usize;
        let mut values = Vec::with_capacity(value_count);
        for _ in 0..value_count {
            let value_len = read_u32(data, &mut pos, "missing value length")? as usize;
            if pos + value_len > data.len() {
                return Err(Error::internal("missing value data"));
            }
            values.push(decode_value(&data[pos..pos + value_len])?);
            pos += value_len;
        }
        batch.push(Row::from_values(values));
    }
    Ok(batch)
}

/// Append the binary encoding of a value to `buf`
pub fn encode_value(buf: &mut Vec<u8>, value: &Value) {
    match value {
        Value::Null(dt) => {
            buf.push(0);
            buf.push(dt.as_u8());
        }
        Value::Boolean(b) => {
            buf.push(1);
            buf.push(if *b { 1 } else { 0 });
        }
        Value::Integer(i) => {
            buf.push(2);
            buf.extend_from_slice(&i.to_le_bytes());
        }
        Value::Float(f) => {
            buf.push(3);
            buf.extend_from_slice(&f.to_le_bytes());
        }
        Value::Text(s) => {
            buf.push(4);
            buf.extend_from_slice(&(s.len() as u32).to_le_bytes());
            buf.extend_from_slice(s.as_bytes());
        }
        Value::Json(j) => {
            buf.push(6);
            buf.extend_from_slice(&(j.len() as u32).to_le_bytes());
            buf.extend_from_slice(j.as_bytes());
        }
        Value::Timestamp(ts) => {
            // seconds + subsec nanos keeps full precision
            buf.push(8);
            buf.extend_from_slice(&ts.timestamp().to_le_bytes());
            buf.extend_from_slice(&ts.timestamp_subsec_nanos().to_le_bytes());
        }
    }
}

/// Decode a single value written by [`encode_value`]
pub fn decode_value(data: &[u8]) -> Result<Value> {
    let (&type_tag, rest) = data
        .split_first()
        .ok_or_else(|| Error::internal("empty value data"))?;

    match type_tag {
        0 => {
            let dt = rest
                .first()
                .and_then(|&b| DataType::from_u8(b))
                .unwrap_or(DataType::Null);
            Ok(Value::Null(dt))
        }
        1 => {
            let b = rest
                .first()
                .ok_or_else(|| Error::internal("missing boolean value"))?;
            Ok(Value::Boolean(*b != 0))
        }
        2 => Ok(Value::Integer(i64::from_le_bytes(fixed::<8>(
            rest,
            "missing integer value",
        )?))),
        3 => Ok(Value::Float(f64::from_le_bytes(fixed::<8>(
            rest,
            "missing float value",
        )?))),
        4 => Ok(Value::Text(read_str(rest, "text")?)),
        6 => Ok(Value::Json(read_str(rest, "json")?)),
        8 => {
            let secs = i64::from_le_bytes(fixed::<8>(rest, "missing timestamp data")?);
            let nsecs = u32::from_le_bytes(fixed::<4>(
                rest.get(8..).unwrap_or_default(),
                "missing timestamp data",
            )?);
            let ts = chrono::DateTime::from_timestamp(secs, nsecs)
                .ok_or_else(|| Error::internal("invalid timestamp"))?;
            Ok(Value::Timestamp(ts))
        }
        _ => Err(Error::internal(format!(
            "unknown value type tag: {}",
            type_tag
        ))),
    }
}

#[inline]
fn fixed<const N: usize>(data: &[u8], what: &str) -> Result<[u8; N]> {
    data.get(..N)
        .and_then(|s| s.try_into().ok())
        .ok_or_else(|| Error::internal(what))
}

fn read_u32(data: &[u8], pos: &mut usize, what: &str) -> Result<u32> {
    let bytes = fixed::<4>(data.get(*pos..).unwrap_or_default(), what)?;
    *pos += 4;
    Ok(u32::from_le_bytes(bytes))
}

fn read_str(rest: &[u8], what: &str) -> Result<Arc<str>> {
    let len = u32::from_le_bytes(fixed::<4>(rest, "missing string length")?) as usize;
    let bytes = rest
        .get(4..4 + len)
        .ok_or_else(|| Error::internal(format!("missing {} data", what)))?;
    let s = std::str::from_utf8(bytes)
        .map_err(|e| Error::internal(format!("invalid {}: {}", what, e)))?;
    Ok(Arc::from(s))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample_batch() -> RowBatch {
        let ts = chrono::Utc.with_ymd_and_hms(2024, 1, 15, 10, 30, 0).unwrap();
        let rows = vec![
            Row::from_values(vec![
                Value::integer(-7),
                Value::text("héllo"),
                Value::null(DataType::Float),
            ]),
            Row::from_values(vec![
                Value::float(2.5),
                Value::json("{\"a\":1}"),
                Value::timestamp(ts),
            ]),
            Row::from_values(vec![Value::boolean(true)]),
        ];
        RowBatch::from_rows(rows, 4)
    }

    #[test]
    fn test_spill_file_append_and_read() {
        let mut file = SpillFile::new().unwrap();
        let first = sample_batch();
        let mut second = sample_batch();
        second.set_sel(vec![2]);

        let e1 = file.append(&first).unwrap();
        let e2 = file.append(&second).unwrap();
        assert_eq!(e1.offset, 0);
        assert_eq!(e2.offset, e1.len as u64);
        assert_eq!(file.len(), (e1.len + e2.len) as u64);

        let back2 = file.read(e2, 4).unwrap();
        assert_eq!(back2.num_rows(), 1);
        assert_eq!(back2.row(0), second.row(0));

        let back1 = file.read(e1, 4).unwrap();
        assert_eq!(back1.into_rows(), first.into_rows());
    }

    #[test]
    fn test_null_keeps_type_hint() {
        let mut buf = Vec::new();
        encode_value(&mut buf, &Value::null(DataType::Text));
        match decode_value(&buf).unwrap() {
            Value::Null(dt) => assert_eq!(dt, DataType::Text),
            other => panic!("expected NULL, got {:?}", other),
        }
    }

    #[test]
    fn test_truncated_data_is_an_error() {
        let encoded = encode_batch(&sample_batch()).unwrap();
        assert!(decode_batch(&encoded[..encoded.len() - 3], 4).is_err());
        assert!(decode_value(&[]).is_err());
        assert!(decode_value(&[2, 1, 2]).is_err());
        assert!(decode_value(&[99]).is_err());
    }
}
