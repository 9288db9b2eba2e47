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

//! Value type for cteflow - runtime values with type information
//!
//! Values are what rows are made of and what correlated (outer-scope)
//! references resolve to.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use chrono::{DateTime, Utc};

use super::types::DataType;

/// A runtime value with type information
///
/// Note: Text and Json use Arc<str> for cheap cloning, batches are copied
/// every time a consumer reads the shared result table.
#[derive(Debug, Clone)]
pub enum Value {
    /// NULL value with optional type hint
    Null(DataType),

    /// 64-bit signed integer
    Integer(i64),

    /// 64-bit floating point
    Float(f64),

    /// UTF-8 text string (Arc for cheap cloning)
    Text(Arc<str>),

    /// Boolean value
    Boolean(bool),

    /// Timestamp (UTC)
    Timestamp(DateTime<Utc>),

    /// JSON document (Arc for cheap cloning)
    Json(Arc<str>),
}

impl Value {
    // =========================================================================
    // Constructors
    // =========================================================================

    /// Create a NULL value with a type hint
    pub fn null(data_type: DataType) -> Self {
        Value::Null(data_type)
    }

    /// Create a NULL value with unknown type
    pub fn null_unknown() -> Self {
        Value::Null(DataType::Null)
    }

    /// Create an integer value
    pub fn integer(value: i64) -> Self {
        Value::Integer(value)
    }

    /// Create a float value
    pub fn float(value: f64) -> Self {
        Value::Float(value)
    }

    /// Create a text value
    pub fn text(value: impl Into<String>) -> Self {
        Value::Text(Arc::from(value.into().as_str()))
    }

    /// Create a boolean value
    pub fn boolean(value: bool) -> Self {
        Value::Boolean(value)
    }

    /// Create a timestamp value
    pub fn timestamp(value: DateTime<Utc>) -> Self {
        Value::Timestamp(value)
    }

    /// Create a JSON value
    pub fn json(value: impl Into<String>) -> Self {
        Value::Json(Arc::from(value.into().as_str()))
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    /// Returns the data type of this value
    pub fn data_type(&self) -> DataType {
        match self {
            Value::Null(dt) => *dt,
            Value::Integer(_) => DataType::Integer,
            Value::Float(_) => DataType::Float,
            Value::Text(_) => DataType::Text,
            Value::Boolean(_) => DataType::Boolean,
            Value::Timestamp(_) => DataType::Timestamp,
            Value::Json(_) => DataType::Json,
        }
    }

    /// Returns true if this value is NULL
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null(_))
    }

    /// Extract as i64, with numeric coercion
    pub fn as_int64(&self) -> Option<i64> {
        match self {
            Value::Integer(v) => Some(*v),
            Value::Float(v) => Some(*v as i64),
            Value::Boolean(b) => Some(if *b { 1 } else { 0 }),
            Value::Text(s) => s.parse::<i64>().ok(),
            _ => None,
        }
    }


    /// Approximate heap plus inline footprint, used for memory tracking
    #[inline]
    pub fn mem_size(&self) -> usize {
        let inline = std::mem::size_of::<Value>();
        match self {
            Value::Text(s) | Value::Json(s) => inline + s.len(),
            _ => inline,
        }
    }
}

// =========================================================================
// Trait implementations
// =========================================================================

impl Default for Value {
    fn default() -> Self {
        Value::Null(DataType::Null)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null(_) => write!(f, "NULL"),
            Value::Integer(v) => write!(f, "{}", v),
            Value::Float(v) => write!(f, "{}", format_float(*v)),
            Value::Text(s) => write!(f, "{}", s),
            Value::Boolean(b) => write!(f, "{}", if *b { "true" } else { "false" }),
            Value::Timestamp(t) => write!(f, "{}", t.to_rfc3339()),
            Value::Json(s) => write!(f, "{}", s),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        // NULL equals NULL here: set operations treat NULLs as not distinct
        if self.is_null() && other.is_null() {
            return true;
        }
        if self.is_null() || other.is_null() {
            return false;
        }

        match (self, other) {
            (Value::Integer(a), Value::Integer(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => {
                if a.is_nan() && b.is_nan() {
                    true
                } else {
                    a == b
                }
            }
            (Value::Integer(i), Value::Float(f)) | (Value::Float(f), Value::Integer(i)) => {
                cmp_int_float(*i, *f) == Ordering::Equal
            }
            (Value::Text(a), Value::Text(b)) => a == b,
            (Value::Boolean(a), Value::Boolean(b)) => a == b,
            (Value::Timestamp(a), Value::Timestamp(b)) => a == b,
            (Value::Json(a), Value::Json(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        // Equal values must hash the same: Integer(5) == Float(5.0) and every
        // NULL equals every other NULL regardless of its type hint.
        match self {
            Value::Null(_) => {
                0u8.hash(state);
            }
            Value::Integer(v) => {
                1u8.hash(state);
                (*v as f64).to_bits().hash(state);
            }
            Value::Float(v) => {
                1u8.hash(state);
                // -0.0 == 0.0 and NaN == NaN
                let v = if *v == 0.0 {
                    0.0
                } else if v.is_nan() {
                    f64::NAN
                } else {
                    *v
                };
                v.to_bits().hash(state);
            }
            Value::Text(s) => {
                2u8.hash(state);
                s.hash(state);
            }
            Value::Boolean(b) => {
                3u8.hash(state);
                b.hash(state);
            }
            Value::Timestamp(t) => {
                4u8.hash(state);
                t.timestamp_nanos_opt().hash(state);
            }
            Value::Json(s) => {
                5u8.hash(state);
                s.hash(state);
            }
        }
    }
}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Total ordering: NULLs first, numerics by value, then by type discriminant.
/// Consistent with `PartialEq`.
impl Ord for Value {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self.is_null(), other.is_null()) {
            (true, true) => return Ordering::Equal,
            (true, false) => return Ordering::Less,
            (false, true) => return Ordering::Greater,
            (false, false) => {}
        }

        fn type_discriminant(v: &Value) -> u8 {
            match v {
                Value::Null(_) => 0,
                Value::Boolean(_) => 1,
                Value::Integer(_) | Value::Float(_) => 2,
                Value::Text(_) => 3,
                Value::Timestamp(_) => 4,
                Value::Json(_) => 5,
            }
        }

        let self_disc = type_discriminant(self);
        let other_disc = type_discriminant(other);
        if self_disc != other_disc {
            return self_disc.cmp(&other_disc);
        }

        match (self, other) {
            (Value::Integer(a), Value::Integer(b)) => a.cmp(b),
            (Value::Integer(i), Value::Float(f)) => cmp_int_float(*i, *f),
            (Value::Float(f), Value::Integer(i)) => cmp_int_float(*i, *f).reverse(),
            (Value::Float(a), Value::Float(b)) => match (a.is_nan(), b.is_nan()) {
                (true, true) => Ordering::Equal,
                (true, false) => Ordering::Greater,
                (false, true) => Ordering::Less,
                (false, false) => a.partial_cmp(b).unwrap_or(Ordering::Equal),
            },
            (Value::Text(a), Value::Text(b)) => a.cmp(b),
            (Value::Boolean(a), Value::Boolean(b)) => a.cmp(b),
            (Value::Timestamp(a), Value::Timestamp(b)) => a.cmp(b),
            (Value::Json(a), Value::Json(b)) => a.cmp(b),
            _ => Ordering::Equal,
        }
    }
}

/// Exact comparison of an integer with a float, without rounding the
/// integer to f64. NaN sorts above every number.
fn cmp_int_float(i: i64, f: f64) -> Ordering {
    // 2^63, the first float above i64::MAX
    const I64_END: f64 = 9_223_372_036_854_775_808.0;
    if f.is_nan() || f >= I64_END {
        return Ordering::Less;
    }
    if f < -I64_END {
        return Ordering::Greater;
    }
    let whole = f.trunc();
    match i.cmp(&(whole as i64)) {
        Ordering::Equal if f > whole => Ordering::Less,
        Ordering::Equal if f < whole => Ordering::Greater,
        ord => ord,
    }
}

// =========================================================================
// From implementations for convenient construction
// =========================================================================

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Integer(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Integer(v as i64)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(Arc::from(v))
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(Arc::from(v.as_str()))
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Boolean(v)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(v: DateTime<Utc>) -> Self {
        Value::Timestamp(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        match v {
            Some(v) => v.into(),
            None => Value::null_unknown(),
        }
    }
}

fn format_float(v: f64) -> String {
    if v.fract() == 0.0 && v.abs() < 1e15 {
        format!("{:.0}", v)
    } else {
        let s = format!("{:?}", v);
        if s.contains('.') && !s.contains('e') && !s.contains('E') {
            s.trim_end_matches('0').trim_end_matches('.').to_string()
        } else {
            s
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rustc_hash::FxHasher;

    fn fx_hash(v: &Value) -> u64 {
        let mut hasher = FxHasher::default();
        v.hash(&mut hasher);
        hasher.finish()
    }

    #[test]
    fn test_null_equality_ignores_type_hint() {
        let a = Value::null(DataType::Integer);
        let b = Value::null(DataType::Text);
        assert_eq!(a, b);
        assert_eq!(fx_hash(&a), fx_hash(&b));
        assert_ne!(a, Value::integer(0));
    }

    #[test]
    fn test_cross_numeric_equality_and_hash() {
        assert_eq!(Value::integer(5), Value::float(5.0));
        assert_eq!(fx_hash(&Value::integer(5)), fx_hash(&Value::float(5.0)));
        assert_ne!(Value::integer(5), Value::float(5.5));
    }

    #[test]
    fn test_int_float_equality_is_exact_beyond_f64_precision() {
        let big = 1i64 << 53;
        let f = Value::float(big as f64);
        assert_eq!(Value::integer(big), f);
        assert_ne!(Value::integer(big + 1), f);
        assert!(Value::integer(big + 1) > f);
        assert!(f < Value::integer(big + 1));

        assert_ne!(Value::integer(i64::MAX), Value::float(i64::MAX as f64));
        assert!(Value::integer(i64::MAX) < Value::float(i64::MAX as f64));
        assert_eq!(Value::integer(i64::MIN), Value::float(i64::MIN as f64));
        assert!(Value::integer(-3) > Value::float(-3.5));
        assert!(Value::integer(3) < Value::float(f64::NAN));
        assert_eq!(Value::integer(0), Value::float(-0.0));
    }

    #[test]
    fn test_ordering() {
        let mut values = vec![
            Value::text("b"),
            Value::integer(3),
            Value::null_unknown(),
            Value::float(1.5),
            Value::boolean(true),
        ];
        values.sort();
        assert_eq!(
            values,
            vec![
                Value::null_unknown(),
                Value::boolean(true),
                Value::float(1.5),
                Value::integer(3),
                Value::text("b"),
            ]
        );
    }

    #[test]
    fn test_display() {
        assert_eq!(Value::integer(42).to_string(), "42");
        assert_eq!(Value::float(2.50).to_string(), "2.5");
        assert_eq!(Value::float(3.0).to_string(), "3");
        assert_eq!(Value::null_unknown().to_string(), "NULL");
        assert_eq!(Value::from("abc").to_string(), "abc");
    }

    #[test]
    fn test_mem_size_counts_text() {
        let small = Value::text("a");
        let large = Value::text("a".repeat(100));
        assert_eq!(large.mem_size() - small.mem_size(), 99);
    }
}
