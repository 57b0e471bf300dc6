// used for persistence
use rusqlite::types::{FromSql, FromSqlResult, ToSql, ToSqlOutput, ValueRef};

// used for timestamps in the database
use chrono::{Local, NaiveDate, NaiveDateTime};

// used to (de)serialize values when exporting
use serde::{Deserialize, Serialize};

// used to print out readable forms of a value
use std::fmt;

/// Text longer than this is stored as a blob.
pub const TEXT_THRESHOLD: usize = 65_535;

// ------------- Value -------------
/// A scalar property value. Parent references and bean lists are kept
/// separately by the bean itself, so this is all a column can hold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(untagged)]
pub enum Value {
    #[default]
    Null,
    Integer(i64),
    Float(f64),
    Text(String),
    Blob(Vec<u8>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            Value::Float(f) if f.fract() == 0.0 => Some(*f as i64),
            Value::Text(s) => s.parse().ok(),
            _ => None,
        }
    }
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Integer(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            Value::Text(s) => s.parse().ok(),
            _ => None,
        }
    }
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Blob(b) => Some(b),
            Value::Text(s) => Some(s.as_bytes()),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Value::Null => Ok(()),
            Value::Integer(i) => write!(f, "{}", i),
            Value::Float(x) => write!(f, "{}", x),
            Value::Text(s) => write!(f, "{}", s),
            Value::Blob(b) => write!(f, "{}", String::from_utf8_lossy(b)),
        }
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Integer(i)
    }
}
impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Integer(i64::from(i))
    }
}
impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Integer(i64::from(b))
    }
}
impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}
impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_owned())
    }
}
impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}
impl From<Vec<u8>> for Value {
    fn from(b: Vec<u8>) -> Self {
        Value::Blob(b)
    }
}
impl From<NaiveDate> for Value {
    fn from(d: NaiveDate) -> Self {
        Value::Text(iso_date(Some(d)))
    }
}
impl From<NaiveDateTime> for Value {
    fn from(t: NaiveDateTime) -> Self {
        Value::Text(iso_date_time(Some(t)))
    }
}
impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(o: Option<T>) -> Self {
        o.map_or(Value::Null, Into::into)
    }
}

impl ToSql for Value {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            Value::Null => ToSqlOutput::Borrowed(ValueRef::Null),
            Value::Integer(i) => ToSqlOutput::Borrowed(ValueRef::Integer(*i)),
            Value::Float(f) => ToSqlOutput::Borrowed(ValueRef::Real(*f)),
            Value::Text(s) => ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes())),
            Value::Blob(b) => ToSqlOutput::Borrowed(ValueRef::Blob(b)),
        })
    }
}
impl FromSql for Value {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        Ok(match value {
            ValueRef::Null => Value::Null,
            ValueRef::Integer(i) => Value::Integer(i),
            ValueRef::Real(f) => Value::Float(f),
            ValueRef::Text(t) => Value::Text(String::from_utf8_lossy(t).into_owned()),
            ValueRef::Blob(b) => Value::Blob(b.to_vec()),
        })
    }
}

// ------------- TypeRank -------------
/// Storage types ordered by width. A column holding rank `r` can hold every
/// value inferring to a rank `<= r`. `Specified` marks a column declared
/// outside of this engine, which is never touched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TypeRank {
    Null,
    Bool,
    Int32,
    Int64,
    Double,
    Text,
    Blob,
    Specified,
}

// Declared column types produced for each rank. Each spelling contains "blob"
// and no other affinity keyword, so SQLite keeps values as they were bound.
const DECLARED: [(TypeRank, &str); 6] = [
    (TypeRank::Bool, "bool blob"),
    (TypeRank::Int32, "i32 blob"),
    (TypeRank::Int64, "i64 blob"),
    (TypeRank::Double, "f64 blob"),
    (TypeRank::Text, "str blob"),
    (TypeRank::Blob, "blob"),
];

impl TypeRank {
    /// The declared column type used when creating or widening to this rank.
    /// A null value gets the narrowest real column.
    pub fn declared(&self) -> &'static str {
        let rank = (*self).max(TypeRank::Bool);
        DECLARED
            .iter()
            .find(|(r, _)| *r == rank)
            .map_or("blob", |(_, declared)| declared)
    }
}

impl fmt::Display for TypeRank {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

fn rank_of_integer(i: i64) -> TypeRank {
    if i == 0 || i == 1 {
        TypeRank::Bool
    } else if i32::try_from(i).is_ok() {
        TypeRank::Int32
    } else {
        TypeRank::Int64
    }
}

/// The cheapest rank able to hold `value` without losing anything.
pub fn infer(value: &Value) -> TypeRank {
    match value {
        Value::Null => TypeRank::Null,
        Value::Integer(i) => rank_of_integer(*i),
        Value::Float(_) => TypeRank::Double,
        Value::Blob(_) => TypeRank::Blob,
        Value::Text(s) => {
            if s.len() > TEXT_THRESHOLD {
                return TypeRank::Blob;
            }
            // only canonical renderings count as numbers, "007" must stay text
            if let Ok(i) = s.parse::<i64>() {
                if i.to_string() == *s {
                    return rank_of_integer(i);
                }
            }
            if let Ok(f) = s.parse::<f64>() {
                if f.is_finite() && f.to_string() == *s {
                    return TypeRank::Double;
                }
            }
            TypeRank::Text
        }
    }
}

/// Maps a declared column type back onto the ranks.
pub fn rank_of(declared: &str) -> TypeRank {
    let declared = declared.trim().to_lowercase();
    DECLARED
        .iter()
        .find(|(_, d)| *d == declared)
        .map_or(TypeRank::Specified, |(rank, _)| *rank)
}

pub fn widen(a: TypeRank, b: TypeRank) -> TypeRank {
    a.max(b)
}

// ------------- Dates -------------
/// Formats a date (today when `None`) the way it is stored.
pub fn iso_date(date: Option<NaiveDate>) -> String {
    date.unwrap_or_else(|| Local::now().date_naive())
        .format("%Y-%m-%d")
        .to_string()
}

/// Formats a timestamp (now when `None`) the way it is stored.
pub fn iso_date_time(time: Option<NaiveDateTime>) -> String {
    time.unwrap_or_else(|| Local::now().naive_local())
        .format("%Y-%m-%d %H:%M:%S")
        .to_string()
}
