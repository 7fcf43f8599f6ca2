use std::io::Cursor;

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use crate::error::Result;
use crate::time::Timestamp;
use crate::Error;

// 48 bytes, padded to one block on disk
pub const HEADER_SIZE: usize = 48;
pub const MAGIC: u32 = 0x05FF_A900;
pub const VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TreeHeader {
    pub magic: u32,
    pub version: u32,
    pub block_size: u32,
    pub max_children: u32,
    pub start: Timestamp,
    pub end: Timestamp,
    pub node_count: u32,
    pub depth: u32,
    pub root_seq: u32,
    pub latest_leaf_seq: u32,
}

impl TreeHeader {
    pub fn validate(&self) -> Result<()> {
        if self.magic != MAGIC {
            return Err(Error::InvalidHeader(format!(
                "bad magic number {:#010x}",
                self.magic
            )));
        }
        if self.version != VERSION {
            return Err(Error::InvalidHeader(format!(
                "unsupported format version {}",
                self.version
            )));
        }
        if self.node_count == 0 || self.depth == 0 {
            return Err(Error::InvalidHeader(
                "tree has no root node".to_string(),
            ));
        }
        if self.root_seq >= self.node_count || self.latest_leaf_seq >= self.node_count {
            return Err(Error::InvalidHeader(format!(
                "root {} or latest leaf {} beyond node count {}",
                self.root_seq, self.latest_leaf_seq, self.node_count
            )));
        }
        if self.end < self.start {
            return Err(Error::InvalidHeader(format!(
                "tree end {} precedes start {}",
                self.end, self.start
            )));
        }
        Ok(())
    }

    pub fn encode(&self) -> Result<[u8; HEADER_SIZE]> {
        let mut buf = [0u8; HEADER_SIZE];
        let mut cursor = Cursor::new(&mut buf[..]);

        cursor
            .write_u32::<BigEndian>(self.magic)
            .map_err(|e| Error::Encode("magic_number", e))?;
        cursor
            .write_u32::<BigEndian>(self.version)
            .map_err(|e| Error::Encode("version", e))?;
        cursor
            .write_u32::<BigEndian>(self.block_size)
            .map_err(|e| Error::Encode("block_size", e))?;
        cursor
            .write_u32::<BigEndian>(self.max_children)
            .map_err(|e| Error::Encode("max_children", e))?;
        cursor
            .write_i64::<BigEndian>(self.start.as_nanos())
            .map_err(|e| Error::Encode("tree_start", e))?;
        cursor
            .write_i64::<BigEndian>(self.end.as_nanos())
            .map_err(|e| Error::Encode("tree_end", e))?;
        cursor
            .write_u32::<BigEndian>(self.node_count)
            .map_err(|e| Error::Encode("node_count", e))?;
        cursor
            .write_u32::<BigEndian>(self.depth)
            .map_err(|e| Error::Encode("depth", e))?;
        cursor
            .write_u32::<BigEndian>(self.root_seq)
            .map_err(|e| Error::Encode("root_seq", e))?;
        cursor
            .write_u32::<BigEndian>(self.latest_leaf_seq)
            .map_err(|e| Error::Encode("latest_leaf_seq", e))?;

        Ok(buf)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_SIZE {
            return Err(Error::InvalidHeader(format!(
                "expected {} bytes, found {}",
                HEADER_SIZE,
                bytes.len()
            )));
        }
        let mut cursor = Cursor::new(bytes);

        let magic = cursor
            .read_u32::<BigEndian>()
            .map_err(|e| Error::Decode("magic_number", e))?;
        let version = cursor
            .read_u32::<BigEndian>()
            .map_err(|e| Error::Decode("version", e))?;
        let block_size = cursor
            .read_u32::<BigEndian>()
            .map_err(|e| Error::Decode("block_size", e))?;
        let max_children = cursor
            .read_u32::<BigEndian>()
            .map_err(|e| Error::Decode("max_children", e))?;
        let start = cursor
            .read_i64::<BigEndian>()
            .map_err(|e| Error::Decode("tree_start", e))?;
        let end = cursor
            .read_i64::<BigEndian>()
            .map_err(|e| Error::Decode("tree_end", e))?;
        let node_count = cursor
            .read_u32::<BigEndian>()
            .map_err(|e| Error::Decode("node_count", e))?;
        let depth = cursor
            .read_u32::<BigEndian>()
            .map_err(|e| Error::Decode("depth", e))?;
        let root_seq = cursor
            .read_u32::<BigEndian>()
            .map_err(|e| Error::Decode("root_seq", e))?;
        let latest_leaf_seq = cursor
            .read_u32::<BigEndian>()
            .map_err(|e| Error::Decode("latest_leaf_seq", e))?;

        let header = Self {
            magic,
            version,
            block_size,
            max_children,
            start: Timestamp::new(start),
            end: Timestamp::new(end),
            node_count,
            depth,
            root_seq,
            latest_leaf_seq,
        };
        header.validate()?;
        Ok(header)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> TreeHeader {
        TreeHeader {
            magic: MAGIC,
            version: VERSION,
            block_size: 4096,
            max_children: 50,
            start: Timestamp::new(-100),
            end: Timestamp::new(9_000),
            node_count: 12,
            depth: 3,
            root_seq: 4,
            latest_leaf_seq: 11,
        }
    }

    #[test]
    fn test_header_encoding_decoding() {
        let header = sample();
        let encoded = header.encode().expect("Failed to encode header");
        assert_eq!(encoded.len(), HEADER_SIZE);

        let decoded = TreeHeader::decode(&encoded).expect("Failed to decode header");
        assert_eq!(header, decoded);
    }

    #[test]
    fn test_invalid_magic() {
        let mut header = sample();
        header.magic = 0xDEAD_BEEF;
        let encoded = header.encode().unwrap();

        assert!(matches!(
            TreeHeader::decode(&encoded),
            Err(Error::InvalidHeader(_))
        ));
    }

    #[test]
    fn test_unsupported_version() {
        let mut header = sample();
        header.version = 999;
        let encoded = header.encode().unwrap();

        assert!(matches!(
            TreeHeader::decode(&encoded),
            Err(Error::InvalidHeader(_))
        ));
    }

    #[test]
    fn test_root_beyond_node_count() {
        let mut header = sample();
        header.root_seq = 12;
        assert!(matches!(header.validate(), Err(Error::InvalidHeader(_))));
    }

    #[test]
    fn test_header_decoding_invalid_length() {
        let encoded = sample().encode().unwrap();
        let result = TreeHeader::decode(&encoded[..HEADER_SIZE - 2]);
        assert!(matches!(result, Err(Error::InvalidHeader(_))));
    }
}
