//! Binary encoding of a [`BucketedState`], used to ship partial states between
//! execution units and nodes.
//!
//! Layout (integers little-endian):
//!
//! ```text
//! [version: u8][key tag: u8][bucket count: u32]
//! repeated bucket count times:
//!     [key][bitmap length: u32][bitmap: roaring portable format]
//! ```
//!
//! Buckets are written in key order, so equal states encode to equal bytes.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use roaring::RoaringBitmap;
use std::collections::HashMap;
use std::io::{self, Write};

use super::{BucketKey, BucketedState};
use crate::{OrthError, Result};

pub const STATE_FORMAT_VERSION: u8 = 1;

/// Smallest possible encoded bucket: an empty key plus the bitmap length.
const MIN_BUCKET_BYTES: usize = 4;

fn corrupt(err: io::Error) -> OrthError {
    OrthError::Corrupt(err.to_string())
}

impl<K: BucketKey> BucketedState<K> {
    pub fn serialize_into<W: Write>(&self, writer: &mut W) -> Result<()> {
        let count = u32::try_from(self.len())
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "too many buckets"))?;
        writer.write_u8(STATE_FORMAT_VERSION)?;
        writer.write_u8(K::TAG)?;
        writer.write_u32::<LittleEndian>(count)?;

        for (key, bitmap) in self.sorted() {
            key.encode(writer)?;
            let len = u32::try_from(bitmap.serialized_size())
                .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "bitmap too large"))?;
            writer.write_u32::<LittleEndian>(len)?;
            bitmap.serialize_into(&mut *writer)?;
        }
        Ok(())
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        self.serialize_into(&mut buf)?;
        Ok(buf)
    }

    /// Decode a state. Any malformed input is reported as [`OrthError::Corrupt`].
    pub fn deserialize(bytes: &[u8], max_buckets: usize) -> Result<Self> {
        let mut reader = bytes;

        let version = reader.read_u8().map_err(corrupt)?;
        if version != STATE_FORMAT_VERSION {
            return Err(OrthError::Corrupt(format!(
                "unsupported state format version {}",
                version
            )));
        }
        let tag = reader.read_u8().map_err(corrupt)?;
        if tag != K::TAG {
            return Err(OrthError::Corrupt(format!(
                "key tag {} does not match {} keys (tag {})",
                tag,
                K::type_name(),
                K::TAG
            )));
        }

        let count = reader.read_u32::<LittleEndian>().map_err(corrupt)? as usize;
        if count > max_buckets {
            return Err(OrthError::Corrupt(format!(
                "bucket count {} exceeds limit {}",
                count, max_buckets
            )));
        }
        if count.saturating_mul(MIN_BUCKET_BYTES) > reader.len() {
            return Err(OrthError::Corrupt(format!(
                "bucket count {} does not fit in {} remaining bytes",
                count,
                reader.len()
            )));
        }

        let mut buckets = HashMap::with_capacity(count);
        for _ in 0..count {
            let key = K::decode(&mut reader).map_err(corrupt)?;
            let len = reader.read_u32::<LittleEndian>().map_err(corrupt)? as usize;
            if len > reader.len() {
                return Err(OrthError::Corrupt(format!(
                    "bitmap length {} exceeds remaining {} bytes",
                    len,
                    reader.len()
                )));
            }
            let (mut payload, rest) = reader.split_at(len);
            let bitmap = RoaringBitmap::deserialize_from(&mut payload).map_err(corrupt)?;
            if !payload.is_empty() {
                return Err(OrthError::Corrupt(format!(
                    "{} unread bytes in bitmap for bucket {:?}",
                    payload.len(),
                    key
                )));
            }
            reader = rest;

            if buckets.contains_key(&key) {
                return Err(OrthError::Corrupt(format!("duplicate bucket {:?}", key)));
            }
            buckets.insert(key, bitmap);
        }

        if !reader.is_empty() {
            return Err(OrthError::Corrupt(format!(
                "{} trailing bytes after state",
                reader.len()
            )));
        }
        Ok(Self { buckets })
    }
}
