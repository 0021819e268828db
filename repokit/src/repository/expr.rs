//! Predicates and projections over entities
//!
//! A [`Filter`] is an opaque, thread-safe predicate and a [`Projection`] an
//! opaque mapping to a result shape. Both are evaluated in-process against
//! materialised rows, so any storage backend that can enumerate its rows can
//! honour them.
//!
//! Filters can also be built from named conditions, which are checked against
//! the entity schema:
//!
//! ```rust
//! use repokit::repository::{FilterCondition, Filter};
//! # use repokit::repository::{Entity, Schema};
//! # use serde::{Deserialize, Serialize};
//! # #[derive(Debug, Clone, Serialize, Deserialize)]
//! # struct User { id: u32, age: i64 }
//! # impl Entity for User {
//! #     type Key = u32;
//! #     const NAME: &'static str = "User";
//! #     fn key(&self) -> u32 { self.id }
//! #     fn schema() -> Schema<Self> {
//! #         Schema::builder("User").property("age", |u: &User| u.age).build()
//! #     }
//! # }
//!
//! let adults = FilterCondition::gte("age", 18).compile(&User::schema()).unwrap();
//! assert!(adults.matches(&User { id: 1, age: 30 }));
//! assert!(!adults.matches(&User { id: 2, age: 12 }));
//!
//! let even = Filter::new(|u: &User| u.id % 2 == 0);
//! assert!(adults.and(even).matches(&User { id: 2, age: 40 }));
//! ```

use std::cmp::Ordering;
use std::fmt;
use std::ops::Not;
use std::sync::Arc;

use super::schema::Schema;
use super::traits::RepositoryResult;
use super::value::Value;

/// Predicate over entities of type `T`
pub struct Filter<T> {
    predicate: Arc<dyn Fn(&T) -> bool + Send + Sync>,
}

impl<T: 'static> Filter<T> {
    /// Wrap a predicate closure
    pub fn new(predicate: impl Fn(&T) -> bool + Send + Sync + 'static) -> Self {
        Self {
            predicate: Arc::new(predicate),
        }
    }

    /// Evaluate the predicate against one entity
    pub fn matches(&self, item: &T) -> bool {
        (self.predicate)(item)
    }

    /// Both predicates must hold (short-circuits)
    #[must_use]
    pub fn and(self, other: Filter<T>) -> Self {
        Self::new(move |item| self.matches(item) && other.matches(item))
    }

    /// Either predicate must hold (short-circuits)
    #[must_use]
    pub fn or(self, other: Filter<T>) -> Self {
        Self::new(move |item| self.matches(item) || other.matches(item))
    }
}

impl<T: 'static> Not for Filter<T> {
    type Output = Filter<T>;

    fn not(self) -> Self::Output {
        Filter::new(move |item| !self.matches(item))
    }
}

impl<T> Clone for Filter<T> {
    fn clone(&self) -> Self {
        Self {
            predicate: Arc::clone(&self.predicate),
        }
    }
}

impl<T> fmt::Debug for Filter<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Filter(..)")
    }
}

/// Mapping from an entity to a result shape `R`
pub struct Projection<T, R> {
    map: Arc<dyn Fn(&T) -> R + Send + Sync>,
}

impl<T: 'static, R: 'static> Projection<T, R> {
    /// Wrap a mapping closure
    pub fn new(map: impl Fn(&T) -> R + Send + Sync + 'static) -> Self {
        Self { map: Arc::new(map) }
    }

    /// Map one entity
    pub fn apply(&self, item: &T) -> R {
        (self.map)(item)
    }
}

impl<T: Clone + 'static> Projection<T, T> {
    /// Return entities unchanged
    pub fn identity() -> Self {
        Self::new(T::clone)
    }
}

impl<T, R> Clone for Projection<T, R> {
    fn clone(&self) -> Self {
        Self {
            map: Arc::clone(&self.map),
        }
    }
}

impl<T, R> fmt::Debug for Projection<T, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Projection(..)")
    }
}

/// Comparison operators for filter conditions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOperator {
    /// Equal to (=)
    Equal,
    /// Not equal to (!=)
    NotEqual,
    /// Greater than (>)
    GreaterThan,
    /// Greater than or equal to (>=)
    GreaterThanOrEqual,
    /// Less than (<)
    LessThan,
    /// Less than or equal to (<=)
    LessThanOrEqual,
    /// Pattern matching with `%` and `_` wildcards (LIKE)
    Like,
    /// Value is null (IS NULL)
    IsNull,
    /// Value is not null (IS NOT NULL)
    IsNotNull,
}

impl FilterOperator {
    fn holds(self, actual: &Value, expected: &Value) -> bool {
        match self {
            Self::IsNull => actual.is_null(),
            Self::IsNotNull => !actual.is_null(),
            Self::Like => match (actual, expected) {
                (Value::String(text), Value::String(pattern)) => like(text, pattern),
                _ => false,
            },
            // Comparisons against null never hold, as in SQL
            _ if actual.is_null() || expected.is_null() => false,
            Self::Equal => actual.compare(expected) == Ordering::Equal && same_kind(actual, expected),
            Self::NotEqual => actual.compare(expected) != Ordering::Equal || !same_kind(actual, expected),
            Self::GreaterThan => actual.compare(expected) == Ordering::Greater,
            Self::GreaterThanOrEqual => actual.compare(expected) != Ordering::Less,
            Self::LessThan => actual.compare(expected) == Ordering::Less,
            Self::LessThanOrEqual => actual.compare(expected) != Ordering::Greater,
        }
    }
}

impl fmt::Display for FilterOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Equal => write!(f, "="),
            Self::NotEqual => write!(f, "!="),
            Self::GreaterThan => write!(f, ">"),
            Self::GreaterThanOrEqual => write!(f, ">="),
            Self::LessThan => write!(f, "<"),
            Self::LessThanOrEqual => write!(f, "<="),
            Self::Like => write!(f, "LIKE"),
            Self::IsNull => write!(f, "IS NULL"),
            Self::IsNotNull => write!(f, "IS NOT NULL"),
        }
    }
}

// JSON documents compare equal to each other under `Value::compare`, so
// equality on them falls back to structural equality.
fn same_kind(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Json(a), Value::Json(b)) => a == b,
        _ => true,
    }
}

/// SQL LIKE: `%` matches any run of characters, `_` exactly one
fn like(text: &str, pattern: &str) -> bool {
    let text: Vec<char> = text.chars().collect();
    let pattern: Vec<char> = pattern.chars().collect();
    let (mut t, mut p) = (0, 0);
    let mut backtrack: Option<(usize, usize)> = None;

    while t < text.len() {
        match pattern.get(p) {
            Some('%') => {
                backtrack = Some((p, t));
                p += 1;
            }
            Some(&c) if c == '_' || c == text[t] => {
                t += 1;
                p += 1;
            }
            _ => match backtrack {
                Some((star, matched)) => {
                    p = star + 1;
                    t = matched + 1;
                    backtrack = Some((star, matched + 1));
                }
                None => return false,
            },
        }
    }

    pattern[p..].iter().all(|c| *c == '%')
}

/// A named condition, compiled into a [`Filter`] against a schema
#[derive(Debug, Clone, PartialEq)]
pub struct FilterCondition {
    /// The property name to filter on
    pub field: String,
    /// The comparison operator
    pub operator: FilterOperator,
    /// The value to compare against
    pub value: Value,
}

impl FilterCondition {
    /// Create a new filter condition
    pub fn new(field: impl Into<String>, operator: FilterOperator, value: impl Into<Value>) -> Self {
        Self {
            field: field.into(),
            operator,
            value: value.into(),
        }
    }

    /// field = value
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new(field, FilterOperator::Equal, value)
    }

    /// field != value
    pub fn ne(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new(field, FilterOperator::NotEqual, value)
    }

    /// field > value
    pub fn gt(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new(field, FilterOperator::GreaterThan, value)
    }

    /// field >= value
    pub fn gte(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new(field, FilterOperator::GreaterThanOrEqual, value)
    }

    /// field < value
    pub fn lt(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new(field, FilterOperator::LessThan, value)
    }

    /// field <= value
    pub fn lte(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new(field, FilterOperator::LessThanOrEqual, value)
    }

    /// field LIKE pattern
    pub fn like(field: impl Into<String>, pattern: impl Into<String>) -> Self {
        Self::new(field, FilterOperator::Like, pattern.into())
    }

    /// field IS NULL
    pub fn is_null(field: impl Into<String>) -> Self {
        Self::new(field, FilterOperator::IsNull, Value::Null)
    }

    /// field IS NOT NULL
    pub fn is_not_null(field: impl Into<String>) -> Self {
        Self::new(field, FilterOperator::IsNotNull, Value::Null)
    }

    /// Compile into a predicate for entities described by `schema`
    ///
    /// # Errors
    ///
    /// `UnknownProperty` if the field is not declared. Ordering operators on
    /// a non-orderable property fail with `NotOrderable`.
    pub fn compile<T: 'static>(&self, schema: &Schema<T>) -> RepositoryResult<Filter<T>> {
        let accessor = match self.operator {
            FilterOperator::GreaterThan
            | FilterOperator::GreaterThanOrEqual
            | FilterOperator::LessThan
            | FilterOperator::LessThanOrEqual => schema.resolve(&self.field)?,
            _ => schema.property(&self.field)?,
        };
        let operator = self.operator;
        let expected = self.value.clone();
        Ok(Filter::new(move |item| operator.holds(&accessor.get(item), &expected)))
    }
}
