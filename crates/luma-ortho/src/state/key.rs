use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::fmt;
use std::hash::Hash;
use std::io::{self, Write};

use crate::types::{ColumnData, Value};

/// Broad class of a bucket key column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyKind {
    Integer,
    String,
    /// No key column; every row lands in one anonymous bucket.
    Implicit,
}

/// A bucket key type. Each implementation is one monomorphic specialization
/// selected by the factory from the key column's type.
pub trait BucketKey: Clone + Eq + Hash + Ord + fmt::Debug + Send + Sync + 'static {
    const KIND: KeyKind;
    /// Wire tag written in front of every serialized state.
    const TAG: u8;

    fn type_name() -> &'static str;

    /// Typed cells of a key column, or `None` when the column holds another type.
    fn column_cells(column: &ColumnData) -> Option<&[Option<Self>]>;

    /// Convert a constant filter argument.
    fn from_literal(value: &Value) -> Option<Self>;

    /// Convert a bucket name written inside an expression.
    fn parse_name(name: &str) -> Option<Self>;

    /// Inverse of [`parse_name`](Self::parse_name), before escaping.
    fn to_name(&self) -> String;

    fn encode<W: Write>(&self, writer: &mut W) -> io::Result<()>;

    fn decode(reader: &mut &[u8]) -> io::Result<Self>;
}

impl BucketKey for () {
    const KIND: KeyKind = KeyKind::Implicit;
    const TAG: u8 = 0;

    fn type_name() -> &'static str {
        "implicit"
    }

    fn column_cells(_column: &ColumnData) -> Option<&[Option<Self>]> {
        None
    }

    fn from_literal(_value: &Value) -> Option<Self> {
        Some(())
    }

    fn parse_name(_name: &str) -> Option<Self> {
        Some(())
    }

    fn to_name(&self) -> String {
        String::new()
    }

    fn encode<W: Write>(&self, _writer: &mut W) -> io::Result<()> {
        Ok(())
    }

    fn decode(_reader: &mut &[u8]) -> io::Result<Self> {
        Ok(())
    }
}

impl BucketKey for i8 {
    const KIND: KeyKind = KeyKind::Integer;
    const TAG: u8 = 1;

    fn type_name() -> &'static str {
        "i8"
    }

    fn column_cells(column: &ColumnData) -> Option<&[Option<Self>]> {
        match column {
            ColumnData::Int8(cells) => Some(cells),
            _ => None,
        }
    }

    fn from_literal(value: &Value) -> Option<Self> {
        value.as_i64().and_then(|v| i8::try_from(v).ok())
    }

    fn parse_name(name: &str) -> Option<Self> {
        name.parse().ok()
    }

    fn to_name(&self) -> String {
        self.to_string()
    }

    fn encode<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        writer.write_i8(*self)
    }

    fn decode(reader: &mut &[u8]) -> io::Result<Self> {
        reader.read_i8()
    }
}

macro_rules! impl_integer_key {
    ($t:ty, $variant:ident, $tag:expr, $write:ident, $read:ident) => {
        impl BucketKey for $t {
            const KIND: KeyKind = KeyKind::Integer;
            const TAG: u8 = $tag;

            fn type_name() -> &'static str {
                stringify!($t)
            }

            fn column_cells(column: &ColumnData) -> Option<&[Option<Self>]> {
                match column {
                    ColumnData::$variant(cells) => Some(cells),
                    _ => None,
                }
            }

            fn from_literal(value: &Value) -> Option<Self> {
                value.as_i64().and_then(|v| <$t>::try_from(v).ok())
            }

            fn parse_name(name: &str) -> Option<Self> {
                name.parse().ok()
            }

            fn to_name(&self) -> String {
                self.to_string()
            }

            fn encode<W: Write>(&self, writer: &mut W) -> io::Result<()> {
                writer.$write::<LittleEndian>(*self)
            }

            fn decode(reader: &mut &[u8]) -> io::Result<Self> {
                reader.$read::<LittleEndian>()
            }
        }
    };
}

impl_integer_key!(i16, Int16, 2, write_i16, read_i16);
impl_integer_key!(i32, Int32, 3, write_i32, read_i32);
impl_integer_key!(i64, Int64, 4, write_i64, read_i64);

impl BucketKey for String {
    const KIND: KeyKind = KeyKind::String;
    const TAG: u8 = 5;

    fn type_name() -> &'static str {
        "string"
    }

    fn column_cells(column: &ColumnData) -> Option<&[Option<Self>]> {
        match column {
            ColumnData::Utf8(cells) => Some(cells),
            _ => None,
        }
    }

    fn from_literal(value: &Value) -> Option<Self> {
        value.as_text().map(str::to_string)
    }

    fn parse_name(name: &str) -> Option<Self> {
        Some(name.to_string())
    }

    fn to_name(&self) -> String {
        self.clone()
    }

    fn encode<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        let len = u32::try_from(self.len())
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "bucket key too long"))?;
        writer.write_u32::<LittleEndian>(len)?;
        writer.write_all(self.as_bytes())
    }

    fn decode(reader: &mut &[u8]) -> io::Result<Self> {
        let len = reader.read_u32::<LittleEndian>()? as usize;
        if len > reader.len() {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("key length {} exceeds remaining {} bytes", len, reader.len()),
            ));
        }
        let data: &[u8] = *reader;
        let (bytes, rest) = data.split_at(len);
        let key = std::str::from_utf8(bytes)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?
            .to_string();
        *reader = rest;
        Ok(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_literal_range_checked() {
        assert_eq!(i8::from_literal(&Value::Int64(100)), Some(100));
        assert_eq!(i8::from_literal(&Value::Int64(300)), None);
        assert_eq!(i64::from_literal(&Value::Int8(-3)), Some(-3));
        assert_eq!(i32::from_literal(&Value::Text("1".into())), None);
        assert_eq!(String::from_literal(&Value::Int32(1)), None);
    }

    #[test]
    fn test_parse_name() {
        assert_eq!(i16::parse_name("-12"), Some(-12));
        assert_eq!(i16::parse_name("g1"), None);
        assert_eq!(String::parse_name("g1"), Some("g1".to_string()));
    }

    #[test]
    fn test_string_key_encoding() {
        let mut buf = Vec::new();
        "bucket".to_string().encode(&mut buf).unwrap();
        assert_eq!(buf.len(), 4 + 6);

        let mut reader = buf.as_slice();
        assert_eq!(String::decode(&mut reader).unwrap(), "bucket");
        assert!(reader.is_empty());
    }

    #[test]
    fn test_string_key_length_overrun() {
        let buf = [255u8, 0, 0, 0, b'a'];
        let mut reader = &buf[..];
        assert!(String::decode(&mut reader).is_err());
    }

    #[test]
    fn test_column_cells_type_checked() {
        let column = ColumnData::Int32(vec![Some(1), None]);
        assert_eq!(i32::column_cells(&column).unwrap().len(), 2);
        assert!(i64::column_cells(&column).is_none());
        assert!(String::column_cells(&column).is_none());
    }
}
