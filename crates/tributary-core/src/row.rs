//! Row and scalar value model for merged result sets.
//!
//! Pages deliver batches of [`Row`]s from remote sources. Rows are
//! immutable and cheap to clone (`Arc`-backed) because the same row may
//! be handed to the executor, appended to the fetch cache, and replayed
//! by a later cursor without copying the payload.
//!
//! [`KeyComparator`] defines the total order used by the sorted merge
//! variant and by range filtering in `find(first, last)`.

use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

use bytes::Bytes;

/// A scalar value inside a result row.
///
/// Intentionally small: only the types that cross the wire between
/// source nodes and the reducer are included.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// SQL NULL
    Null,
    /// Boolean
    Bool(bool),
    /// 64-bit signed integer (covers i8/i16/i32/i64)
    Int64(i64),
    /// 64-bit float (covers f32/f64)
    Float64(f64),
    /// UTF-8 string
    Utf8(String),
    /// Raw binary data
    Binary(Bytes),
    /// Timestamp as microseconds since Unix epoch
    Timestamp(i64),
}

impl Value {
    /// Total order over values.
    ///
    /// NULL sorts first. `Int64` and `Float64` compare numerically with
    /// each other; all other cross-type comparisons fall back to a fixed
    /// type rank. Floats use IEEE-754 total ordering, so NaN is ordered
    /// rather than poisoning the merge.
    #[must_use]
    pub fn compare(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Self::Null, Self::Null) => Ordering::Equal,
            (Self::Bool(a), Self::Bool(b)) => a.cmp(b),
            (Self::Int64(a), Self::Int64(b)) => a.cmp(b),
            (Self::Float64(a), Self::Float64(b)) => a.total_cmp(b),
            #[allow(clippy::cast_precision_loss)]
            (Self::Int64(a), Self::Float64(b)) => (*a as f64).total_cmp(b),
            #[allow(clippy::cast_precision_loss)]
            (Self::Float64(a), Self::Int64(b)) => a.total_cmp(&(*b as f64)),
            (Self::Utf8(a), Self::Utf8(b)) => a.cmp(b),
            (Self::Binary(a), Self::Binary(b)) => a.cmp(b),
            (Self::Timestamp(a), Self::Timestamp(b)) => a.cmp(b),
            _ => self.type_rank().cmp(&other.type_rank()),
        }
    }

    /// Rank used for cross-type comparisons.
    fn type_rank(&self) -> u8 {
        match self {
            Self::Null => 0,
            Self::Bool(_) => 1,
            Self::Int64(_) | Self::Float64(_) => 2,
            Self::Timestamp(_) => 3,
            Self::Utf8(_) => 4,
            Self::Binary(_) => 5,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "NULL"),
            Self::Bool(v) => write!(f, "{v}"),
            Self::Int64(v) => write!(f, "{v}"),
            Self::Float64(v) => write!(f, "{v}"),
            Self::Utf8(v) => write!(f, "'{v}'"),
            Self::Binary(v) => write!(f, "X'{}'", hex_encode(v)),
            Self::Timestamp(us) => write!(f, "TIMESTAMP '{us}'"),
        }
    }
}

/// Encode bytes as lowercase hex string.
fn hex_encode(bytes: &[u8]) -> String {
    use std::fmt::Write;
    bytes
        .iter()
        .fold(String::with_capacity(bytes.len() * 2), |mut s, b| {
            let _ = write!(s, "{b:02x}");
            s
        })
}

/// An immutable result row.
///
/// Cloning is O(1); the value slice is shared.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    values: Arc<[Value]>,
}

impl Row {
    /// Create a row from its values.
    #[must_use]
    pub fn new(values: Vec<Value>) -> Self {
        Self {
            values: values.into(),
        }
    }

    /// Value at column `idx`, or `None` if out of range.
    #[must_use]
    pub fn get(&self, idx: usize) -> Option<&Value> {
        self.values.get(idx)
    }

    /// Number of columns.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether the row has no columns.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// All values, in column order.
    #[must_use]
    pub fn values(&self) -> &[Value] {
        &self.values
    }
}

impl From<Vec<Value>> for Row {
    fn from(values: Vec<Value>) -> Self {
        Self::new(values)
    }
}

impl fmt::Display for Row {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        for (i, v) in self.values.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{v}")?;
        }
        write!(f, ")")
    }
}

/// One key column of an index ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyColumn {
    /// Ordinal of the column inside the row.
    pub column: usize,
    /// `true` for descending order.
    pub descending: bool,
}

impl KeyColumn {
    /// Ascending key on the given column.
    #[must_use]
    pub const fn asc(column: usize) -> Self {
        Self {
            column,
            descending: false,
        }
    }

    /// Descending key on the given column.
    #[must_use]
    pub const fn desc(column: usize) -> Self {
        Self {
            column,
            descending: true,
        }
    }
}

/// Comparator over the key columns of an index.
///
/// The first column is the primary key of the ordering; remaining
/// columns break ties in declaration order. A missing column (row
/// shorter than the ordinal) sorts first, like NULL.
#[derive(Debug, Clone, Default)]
pub struct KeyComparator {
    columns: Vec<KeyColumn>,
}

impl KeyComparator {
    /// Comparator over the given key columns.
    #[must_use]
    pub fn new(columns: Vec<KeyColumn>) -> Self {
        Self { columns }
    }

    /// The key columns, in precedence order.
    #[must_use]
    pub fn columns(&self) -> &[KeyColumn] {
        &self.columns
    }

    /// Compare two rows under this ordering.
    #[must_use]
    pub fn compare(&self, a: &Row, b: &Row) -> Ordering {
        for key in &self.columns {
            let va = a.get(key.column).unwrap_or(&Value::Null);
            let vb = b.get(key.column).unwrap_or(&Value::Null);
            let ord = va.compare(vb);
            let ord = if key.descending { ord.reverse() } else { ord };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    }
}
