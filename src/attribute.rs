//! Bidirectional mapping between attribute paths and dense integer ids.
//!
//! Every attribute the store sees ("System/CPU0/CurrentProcess", ...) is
//! assigned a small id in first-seen order. Ids index the state vectors of
//! the projections and are what the on-disk interval records carry.

use std::collections::HashMap;
use std::io::{Cursor, Read};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use crate::encoding::bincode;
use crate::error::Result;
use crate::{Error, Hasher};

pub type AttributeId = u32;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Interner {
    ids: HashMap<String, AttributeId>,
    paths: Vec<String>,
}

impl Interner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the id for `path`, assigning the next free one if the path
    /// has not been seen before.
    pub fn intern(&mut self, path: &str) -> AttributeId {
        if let Some(&id) = self.ids.get(path) {
            return id;
        }
        self.push(path)
    }

    /// Adds a path that must not already be interned.
    pub fn add(&mut self, path: &str) -> Result<AttributeId> {
        if self.ids.contains_key(path) {
            return Err(Error::DuplicateAttribute(path.to_string()));
        }
        Ok(self.push(path))
    }

    pub fn contains(&self, path: &str) -> bool {
        self.ids.contains_key(path)
    }

    pub fn get(&self, path: &str) -> Option<AttributeId> {
        self.ids.get(path).copied()
    }

    pub fn resolve(&self, id: AttributeId) -> Result<&str> {
        self.paths
            .get(id as usize)
            .map(String::as_str)
            .ok_or(Error::UnknownAttribute(id))
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    /// Iterates over `(id, path)` pairs in id order.
    pub fn iter(&self) -> impl Iterator<Item = (AttributeId, &str)> {
        self.paths
            .iter()
            .enumerate()
            .map(|(id, path)| (id as AttributeId, path.as_str()))
    }

    fn push(&mut self, path: &str) -> AttributeId {
        let id = self.paths.len() as AttributeId;
        self.paths.push(path.to_string());
        self.ids.insert(path.to_string(), id);
        id
    }

    /// Serializes the table as `[len: u32][bincode paths][crc64: u64]`.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let body = bincode::serialize(&self.paths)?;

        let mut hasher = Hasher::new();
        hasher.write(&body);

        let mut buf = Vec::with_capacity(4 + body.len() + 8);
        buf.write_u32::<BigEndian>(body.len() as u32)
            .map_err(|e| Error::Encode("attribute table length", e))?;
        buf.extend_from_slice(&body);
        buf.write_u64::<BigEndian>(hasher.checksum())
            .map_err(|e| Error::Encode("attribute table checksum", e))?;
        Ok(buf)
    }

    /// Rebuilds a table written by [`Interner::encode`].
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let mut cursor = Cursor::new(bytes);
        let len = cursor
            .read_u32::<BigEndian>()
            .map_err(|e| Error::Decode("attribute table length", e))? as usize;

        let mut body = vec![0u8; len];
        cursor
            .read_exact(&mut body)
            .map_err(|e| Error::Decode("attribute table", e))?;
        let stored = cursor
            .read_u64::<BigEndian>()
            .map_err(|e| Error::Decode("attribute table checksum", e))?;

        let mut hasher = Hasher::new();
        hasher.write(&body);
        if hasher.checksum() != stored {
            return Err(Error::ChecksumMismatch);
        }

        let paths: Vec<String> = bincode::deserialize(&body)?;
        let mut interner = Interner::new();
        for path in &paths {
            interner.add(path).map_err(|_| {
                Error::Corruption(format!("attribute {:?} stored twice", path))
            })?;
        }
        Ok(interner)
    }
}
