use roaring::RoaringBitmap;
use std::fmt;

/// Logical column types seen by the aggregate planner.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DataType {
    Bool,
    Int8,
    Int16,
    Int32,
    Int64,
    Float64,
    /// Variable-length string
    Utf8,
    /// Fixed-length string
    Char(u32),
    Bitmap,
    UInt64,
    Nullable(Box<DataType>),
}

impl DataType {
    /// Strip any `Nullable` wrapper.
    pub fn remove_nullable(&self) -> &DataType {
        match self {
            DataType::Nullable(inner) => inner.remove_nullable(),
            other => other,
        }
    }

    pub fn is_nullable(&self) -> bool {
        matches!(self, DataType::Nullable(_))
    }

    pub fn is_integer(&self) -> bool {
        matches!(
            self.remove_nullable(),
            DataType::Int8 | DataType::Int16 | DataType::Int32 | DataType::Int64
        )
    }

    pub fn is_string_or_fixed_string(&self) -> bool {
        matches!(self.remove_nullable(), DataType::Utf8 | DataType::Char(_))
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataType::Bool => write!(f, "BOOLEAN"),
            DataType::Int8 => write!(f, "TINYINT"),
            DataType::Int16 => write!(f, "SMALLINT"),
            DataType::Int32 => write!(f, "INT"),
            DataType::Int64 => write!(f, "BIGINT"),
            DataType::Float64 => write!(f, "DOUBLE"),
            DataType::Utf8 => write!(f, "VARCHAR"),
            DataType::Char(len) => write!(f, "CHAR({})", len),
            DataType::Bitmap => write!(f, "BITMAP"),
            DataType::UInt64 => write!(f, "UNSIGNED BIGINT"),
            DataType::Nullable(inner) => write!(f, "Nullable({})", inner),
        }
    }
}

/// A single scalar value, used for constant (literal) function arguments.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int8(i8),
    Int16(i16),
    Int32(i32),
    Int64(i64),
    UInt64(u64),
    Float64(f64),
    Text(String),
    Bitmap(RoaringBitmap),
}

impl Value {
    pub fn data_type(&self) -> DataType {
        match self {
            Value::Null => DataType::Nullable(Box::new(DataType::Utf8)),
            Value::Bool(_) => DataType::Bool,
            Value::Int8(_) => DataType::Int8,
            Value::Int16(_) => DataType::Int16,
            Value::Int32(_) => DataType::Int32,
            Value::Int64(_) => DataType::Int64,
            Value::UInt64(_) => DataType::UInt64,
            Value::Float64(_) => DataType::Float64,
            Value::Text(_) => DataType::Utf8,
            Value::Bitmap(_) => DataType::Bitmap,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int64(v) => Some(*v),
            Value::Int32(v) => Some(*v as i64),
            Value::Int16(v) => Some(*v as i64),
            Value::Int8(v) => Some(*v as i64),
            _ => None,
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int64(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int32(v)
    }
}

/// One column of a row batch. `None` cells are SQL NULLs.
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnData {
    Bool(Vec<Option<bool>>),
    Int8(Vec<Option<i8>>),
    Int16(Vec<Option<i16>>),
    Int32(Vec<Option<i32>>),
    Int64(Vec<Option<i64>>),
    Float64(Vec<Option<f64>>),
    /// Backs both `Utf8` and `Char(n)` columns
    Utf8(Vec<Option<String>>),
    Bitmap(Vec<Option<RoaringBitmap>>),
}

impl ColumnData {
    pub fn len(&self) -> usize {
        match self {
            ColumnData::Bool(v) => v.len(),
            ColumnData::Int8(v) => v.len(),
            ColumnData::Int16(v) => v.len(),
            ColumnData::Int32(v) => v.len(),
            ColumnData::Int64(v) => v.len(),
            ColumnData::Float64(v) => v.len(),
            ColumnData::Utf8(v) => v.len(),
            ColumnData::Bitmap(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Physical type of the stored cells.
    pub fn data_type(&self) -> DataType {
        match self {
            ColumnData::Bool(_) => DataType::Bool,
            ColumnData::Int8(_) => DataType::Int8,
            ColumnData::Int16(_) => DataType::Int16,
            ColumnData::Int32(_) => DataType::Int32,
            ColumnData::Int64(_) => DataType::Int64,
            ColumnData::Float64(_) => DataType::Float64,
            ColumnData::Utf8(_) => DataType::Utf8,
            ColumnData::Bitmap(_) => DataType::Bitmap,
        }
    }

    /// Build a string column from non-null values.
    pub fn utf8<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        ColumnData::Utf8(values.into_iter().map(|s| Some(s.into())).collect())
    }

    /// Build a bitmap column, one bitmap per row, from id lists.
    pub fn bitmaps<I, R>(rows: I) -> Self
    where
        I: IntoIterator<Item = R>,
        R: IntoIterator<Item = u32>,
    {
        ColumnData::Bitmap(
            rows.into_iter()
                .map(|ids| Some(ids.into_iter().collect::<RoaringBitmap>()))
                .collect(),
        )
    }

    pub fn as_bitmaps(&self) -> Option<&[Option<RoaringBitmap>]> {
        match self {
            ColumnData::Bitmap(v) => Some(v),
            _ => None,
        }
    }
}
