use std::{fmt, hash::{Hash, Hasher}, sync::Arc};

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

/// A single attribute value of a feature.
///
/// `Null` is its own equality class: two missing values compare equal,
/// a missing value never equals a concrete one.
#[derive(Debug, Clone, Default)]
pub enum AttrValue {
    #[default]
    Null,
    Number(f64),
    Text(Arc<str>),
}

impl AttrValue {
    /// Create a text value.
    #[inline] pub fn text(s: impl AsRef<str>) -> Self { Self::Text(Arc::from(s.as_ref())) }

    #[inline] pub fn is_null(&self) -> bool { matches!(self, Self::Null) }

    #[inline]
    pub fn as_str(&self) -> Option<&str> {
        match self { Self::Text(s) => Some(s), _ => None }
    }

    #[inline]
    pub fn as_f64(&self) -> Option<f64> {
        match self { Self::Number(n) => Some(*n), _ => None }
    }

    /// Canonical bit pattern for a number, so that equal values hash equally.
    #[inline]
    fn number_bits(n: f64) -> u64 {
        if n == 0.0 { 0 } else if n.is_nan() { f64::NAN.to_bits() } else { n.to_bits() }
    }

    /// Check whether this value fits into a column of the given type.
    pub fn conforms_to(&self, ty: ColumnType) -> bool {
        match (self, ty) {
            (Self::Null, _) => true,
            (Self::Text(_), ColumnType::Text) => true,
            (Self::Number(_), ColumnType::Number) => true,
            (Self::Number(n), ColumnType::Integer) => n.fract() == 0.0,
            _ => false,
        }
    }
}

impl PartialEq for AttrValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Null, Self::Null) => true,
            (Self::Text(a), Self::Text(b)) => a == b,
            (Self::Number(a), Self::Number(b)) => Self::number_bits(*a) == Self::number_bits(*b),
            _ => false,
        }
    }
}

impl Eq for AttrValue {}

impl Hash for AttrValue {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Self::Null => (),
            Self::Number(n) => Self::number_bits(*n).hash(state),
            Self::Text(s) => s.hash(state),
        }
    }
}

impl fmt::Display for AttrValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "null"),
            Self::Number(n) => write!(f, "{n}"),
            Self::Text(s) => write!(f, "{s}"),
        }
    }
}

impl From<&str> for AttrValue {
    fn from(s: &str) -> Self { Self::text(s) }
}

impl From<String> for AttrValue {
    fn from(s: String) -> Self { Self::Text(Arc::from(s)) }
}

impl From<f64> for AttrValue {
    fn from(n: f64) -> Self { Self::Number(n) }
}

impl From<i64> for AttrValue {
    fn from(n: i64) -> Self { Self::Number(n as f64) }
}

impl<T: Into<AttrValue>> From<Option<T>> for AttrValue {
    fn from(v: Option<T>) -> Self { v.map_or(Self::Null, Into::into) }
}

/// An ordered tuple of attribute values (category, keep or dissolve key).
pub type Key = SmallVec<[AttrValue; 4]>;

/// Declared type of an attribute column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType { Text, Number, Integer }

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub ty: ColumnType,
}

/// Ordered list of attribute columns shared by all records of a layer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schema {
    columns: Vec<Column>,
}

impl Schema {
    pub fn new(columns: Vec<Column>) -> Self { Self { columns } }

    /// Convenience constructor from `(name, type)` pairs.
    pub fn from_pairs<'a>(pairs: impl IntoIterator<Item = (&'a str, ColumnType)>) -> Self {
        Self::new(pairs.into_iter().map(|(name, ty)| Column { name: name.to_string(), ty }).collect())
    }

    #[inline] pub fn len(&self) -> usize { self.columns.len() }

    #[inline] pub fn is_empty(&self) -> bool { self.columns.is_empty() }

    #[inline] pub fn columns(&self) -> &[Column] { &self.columns }

    /// Position of the column called `name`, if any.
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    /// Resolve a list of column names to positions, failing on the first unknown name.
    pub fn resolve(&self, names: &[String]) -> Result<Vec<usize>> {
        names.iter()
            .map(|name| self.index_of(name)
                .ok_or_else(|| anyhow!("Unknown attribute column: {:?}", name)))
            .collect()
    }
}

/// Extract the values at `cols` from an attribute row.
#[inline]
pub fn key_of(attrs: &[AttrValue], cols: &[usize]) -> Key {
    cols.iter().map(|&c| attrs[c].clone()).collect()
}
