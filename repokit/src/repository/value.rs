//! Property values used as sort keys
//!
//! A [`Value`] is what a property accessor extracts from an entity at runtime.
//! Values of orderable kinds have a total order, so any resolved property can
//! drive a stable sort without type-specific glue code.
//!
//! # Example
//!
//! ```rust
//! use std::cmp::Ordering;
//! use repokit::repository::Value;
//!
//! let a: Value = "alice".into();
//! let b: Value = "bob".into();
//! assert_eq!(a.compare(&b), Ordering::Less);
//!
//! // Nulls sort before everything else
//! assert_eq!(Value::Null.compare(&Value::from(0_i64)), Ordering::Less);
//! ```

use std::cmp::Ordering;
use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Kind of a declared property
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueKind {
    /// true / false
    Boolean,
    /// Signed or unsigned integer up to 64 bits
    Integer,
    /// 64-bit floating point
    Float,
    /// UTF-8 text
    String,
    /// UTC timestamp
    Timestamp,
    /// Calendar date without a time zone
    Date,
    /// UUID
    Uuid,
    /// Arbitrary JSON document (not orderable)
    Json,
}

impl ValueKind {
    /// Whether values of this kind can be used as a sort key
    pub const fn is_orderable(self) -> bool {
        !matches!(self, Self::Json)
    }

    const fn rank(self) -> u8 {
        match self {
            Self::Boolean => 0,
            Self::Integer | Self::Float => 1,
            Self::String => 2,
            Self::Timestamp => 3,
            Self::Date => 4,
            Self::Uuid => 5,
            Self::Json => 6,
        }
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Boolean => write!(f, "boolean"),
            Self::Integer => write!(f, "integer"),
            Self::Float => write!(f, "float"),
            Self::String => write!(f, "string"),
            Self::Timestamp => write!(f, "timestamp"),
            Self::Date => write!(f, "date"),
            Self::Uuid => write!(f, "uuid"),
            Self::Json => write!(f, "json"),
        }
    }
}

/// A property value extracted from an entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    /// Absent value
    Null,
    /// Boolean value
    Boolean(bool),
    /// 64-bit integer value
    Integer(i64),
    /// Unsigned 64-bit integer value, for `u64` and `usize` fields
    Unsigned(u64),
    /// 64-bit floating point value
    Float(f64),
    /// String value
    String(String),
    /// Timestamp value
    Timestamp(DateTime<Utc>),
    /// Date value
    Date(NaiveDate),
    /// UUID value
    Uuid(Uuid),
    /// JSON document value
    Json(serde_json::Value),
}

impl Value {
    /// Kind of this value, `None` for [`Value::Null`]
    pub fn kind(&self) -> Option<ValueKind> {
        match self {
            Self::Null => None,
            Self::Boolean(_) => Some(ValueKind::Boolean),
            Self::Integer(_) | Self::Unsigned(_) => Some(ValueKind::Integer),
            Self::Float(_) => Some(ValueKind::Float),
            Self::String(_) => Some(ValueKind::String),
            Self::Timestamp(_) => Some(ValueKind::Timestamp),
            Self::Date(_) => Some(ValueKind::Date),
            Self::Uuid(_) => Some(ValueKind::Uuid),
            Self::Json(_) => Some(ValueKind::Json),
        }
    }

    /// Whether this is [`Value::Null`]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Total order over values
    ///
    /// `Null` sorts first. Signed, unsigned and float numbers compare
    /// numerically, floats use IEEE total ordering. Other mixed kinds order by kind. JSON documents
    /// compare equal to each other.
    pub fn compare(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Self::Null, Self::Null) => Ordering::Equal,
            (Self::Null, _) => Ordering::Less,
            (_, Self::Null) => Ordering::Greater,
            (Self::Boolean(a), Self::Boolean(b)) => a.cmp(b),
            (Self::Integer(a), Self::Integer(b)) => a.cmp(b),
            (Self::Unsigned(a), Self::Unsigned(b)) => a.cmp(b),
            (Self::Integer(a), Self::Unsigned(b)) => signed_cmp_unsigned(*a, *b),
            (Self::Unsigned(a), Self::Integer(b)) => signed_cmp_unsigned(*b, *a).reverse(),
            (Self::Float(a), Self::Float(b)) => a.total_cmp(b),
            (Self::Integer(a), Self::Float(b)) => (*a as f64).total_cmp(b),
            (Self::Float(a), Self::Integer(b)) => a.total_cmp(&(*b as f64)),
            (Self::Unsigned(a), Self::Float(b)) => (*a as f64).total_cmp(b),
            (Self::Float(a), Self::Unsigned(b)) => a.total_cmp(&(*b as f64)),
            (Self::String(a), Self::String(b)) => a.cmp(b),
            (Self::Timestamp(a), Self::Timestamp(b)) => a.cmp(b),
            (Self::Date(a), Self::Date(b)) => a.cmp(b),
            (Self::Uuid(a), Self::Uuid(b)) => a.cmp(b),
            (Self::Json(_), Self::Json(_)) => Ordering::Equal,
            (a, b) => match (a.kind(), b.kind()) {
                (Some(a), Some(b)) => a.rank().cmp(&b.rank()),
                _ => Ordering::Equal,
            },
        }
    }
}

fn signed_cmp_unsigned(a: i64, b: u64) -> Ordering {
    u64::try_from(a).map_or(Ordering::Less, |a| a.cmp(&b))
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "null"),
            Self::Boolean(b) => write!(f, "{}", b),
            Self::Integer(n) => write!(f, "{}", n),
            Self::Unsigned(n) => write!(f, "{}", n),
            Self::Float(n) => write!(f, "{}", n),
            Self::String(s) => write!(f, "{}", s),
            Self::Timestamp(t) => write!(f, "{}", t.to_rfc3339()),
            Self::Date(d) => write!(f, "{}", d),
            Self::Uuid(u) => write!(f, "{}", u),
            Self::Json(j) => write!(f, "{}", j),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Self::Integer(n)
    }
}

macro_rules! from_narrow_integer {
    ($($ty:ty),*) => {
        $(impl From<$ty> for Value {
            fn from(n: $ty) -> Self {
                Self::Integer(i64::from(n))
            }
        })*
    };
}

from_narrow_integer!(i8, i16, i32, u8, u16, u32);

impl From<u64> for Value {
    fn from(n: u64) -> Self {
        Self::Unsigned(n)
    }
}

impl From<usize> for Value {
    fn from(n: usize) -> Self {
        // usize is at most 64 bits on every supported target
        Self::Unsigned(n as u64)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Self::Float(n)
    }
}

impl From<f32> for Value {
    fn from(n: f32) -> Self {
        Self::Float(f64::from(n))
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Boolean(b)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(t: DateTime<Utc>) -> Self {
        Self::Timestamp(t)
    }
}

impl From<NaiveDate> for Value {
    fn from(d: NaiveDate) -> Self {
        Self::Date(d)
    }
}

impl From<Uuid> for Value {
    fn from(u: Uuid) -> Self {
        Self::Uuid(u)
    }
}

impl From<serde_json::Value> for Value {
    fn from(j: serde_json::Value) -> Self {
        Self::Json(j)
    }
}

impl<V: Into<Value>> From<Option<V>> for Value {
    fn from(v: Option<V>) -> Self {
        v.map_or(Self::Null, Into::into)
    }
}

/// A Rust type that can back a declared property
///
/// The kind is known statically, which lets the schema reject non-orderable
/// sort properties before any row is read.
pub trait FieldType: Into<Value> {
    /// Kind of values produced by this type
    const KIND: ValueKind;
}

macro_rules! field_type {
    ($($ty:ty => $kind:ident),* $(,)?) => {
        $(impl FieldType for $ty {
            const KIND: ValueKind = ValueKind::$kind;
        })*
    };
}

field_type! {
    bool => Boolean,
    i8 => Integer,
    i16 => Integer,
    i32 => Integer,
    i64 => Integer,
    u8 => Integer,
    u16 => Integer,
    u32 => Integer,
    u64 => Integer,
    usize => Integer,
    f32 => Float,
    f64 => Float,
    String => String,
    &'static str => String,
    DateTime<Utc> => Timestamp,
    NaiveDate => Date,
    Uuid => Uuid,
    serde_json::Value => Json,
}

impl<F: FieldType> FieldType for Option<F> {
    const KIND: ValueKind = F::KIND;
}
