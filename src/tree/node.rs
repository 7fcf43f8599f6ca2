//! A fixed-size block of the history tree.
//!
//! ## Block Layout
//!
//! ```text
//! +----------------------------------------------+  0
//! | Header (38 bytes)                            |
//! |   start i64 | end i64 | seq u32 | parent i32 |
//! |   children u32 | intervals u32               |
//! |   closed u8 | full u8 | string offset u32    |
//! +----------------------------------------------+
//! | Child seqs    (children x u32)               |
//! | Child starts  (children x i64)               |
//! +----------------------------------------------+  header + max_children * 12
//! | Interval records (intervals x 25 bytes) -->  |
//! |                                              |
//! |                  <-- String payloads         |
//! +----------------------------------------------+  block_size
//! ```
//!
//! Space for `max_children` child entries is reserved in every node, so
//! linking a child never eats into interval capacity. Interval records grow
//! forward from the reserved area while string payloads grow backward from
//! the end of the block; the two must never cross.

use std::io::{Cursor, Write};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use crate::error::Result;
use crate::interval::{Interval, INTERVAL_RECORD_SIZE};
use crate::time::Timestamp;
use crate::Error;

pub type SequenceNumber = u32;

/// Size of the fixed node header.
pub const NODE_HEADER_SIZE: usize = 8 + 8 + 4 + 4 + 4 + 4 + 1 + 1 + 4;

/// Bytes reserved per child entry (sequence number + start time).
pub(crate) const CHILD_ENTRY_SIZE: usize = 4 + 8;

const ROOT_PARENT: i32 = -1;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    seq: SequenceNumber,
    parent: Option<SequenceNumber>,
    start: Timestamp,
    /// `None` while the node is still open.
    end: Option<Timestamp>,
    full: bool,
    children: Vec<(SequenceNumber, Timestamp)>,
    intervals: Vec<Interval>,
    /// Lowest byte used by string payloads; starts at the block size.
    string_offset: usize,
    block_size: usize,
    max_children: usize,
}

impl Node {
    pub fn new(
        seq: SequenceNumber,
        parent: Option<SequenceNumber>,
        start: Timestamp,
        block_size: usize,
        max_children: usize,
    ) -> Self {
        Self {
            seq,
            parent,
            start,
            end: None,
            full: false,
            children: Vec::new(),
            intervals: Vec::new(),
            string_offset: block_size,
            block_size,
            max_children,
        }
    }

    /// Bytes available for intervals in an empty node of this geometry.
    pub fn capacity(block_size: usize, max_children: usize) -> usize {
        block_size.saturating_sub(Self::data_start(max_children))
    }

    fn data_start(max_children: usize) -> usize {
        NODE_HEADER_SIZE + max_children * CHILD_ENTRY_SIZE
    }

    pub fn seq(&self) -> SequenceNumber {
        self.seq
    }

    pub fn parent(&self) -> Option<SequenceNumber> {
        self.parent
    }

    /// Re-parents a former root under a newly created one.
    pub(crate) fn set_parent(&mut self, parent: SequenceNumber) {
        self.parent = Some(parent);
    }

    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }

    pub fn start(&self) -> Timestamp {
        self.start
    }

    pub fn end(&self) -> Option<Timestamp> {
        self.end
    }

    pub fn is_closed(&self) -> bool {
        self.end.is_some()
    }

    pub fn is_full(&self) -> bool {
        self.full
    }

    pub fn mark_full(&mut self) {
        self.full = true;
    }

    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    pub fn child_count(&self) -> usize {
        self.children.len()
    }

    pub fn has_child_capacity(&self) -> bool {
        self.children.len() < self.max_children
    }

    pub fn children(&self) -> &[(SequenceNumber, Timestamp)] {
        &self.children
    }

    pub fn latest_child(&self) -> Option<SequenceNumber> {
        self.children.last().map(|&(seq, _)| seq)
    }

    pub fn intervals(&self) -> &[Interval] {
        &self.intervals
    }

    pub fn free_space(&self) -> usize {
        let used = Self::data_start(self.max_children) + self.intervals.len() * INTERVAL_RECORD_SIZE;
        self.string_offset.saturating_sub(used)
    }

    /// Appends an interval. The caller must have checked `free_space`.
    pub fn add_interval(&mut self, interval: Interval) -> Result<()> {
        if self.is_closed() {
            return Err(Error::Corruption(format!(
                "interval added to closed node {}",
                self.seq
            )));
        }
        if interval.size() > self.free_space() {
            return Err(Error::Corruption(format!(
                "interval of {} bytes exceeds free space {} of node {}",
                interval.size(),
                self.free_space(),
                self.seq
            )));
        }
        self.string_offset -= interval.value().variable_size();
        self.intervals.push(interval);
        Ok(())
    }

    pub fn link_child(&mut self, child: SequenceNumber, start: Timestamp) -> Result<()> {
        if self.is_closed() {
            return Err(Error::Corruption(format!(
                "child {} linked under closed node {}",
                child, self.seq
            )));
        }
        if !self.has_child_capacity() {
            return Err(Error::Corruption(format!(
                "node {} already has {} children",
                self.seq, self.max_children
            )));
        }
        if let Some(&(_, last)) = self.children.last() {
            if start < last {
                return Err(Error::Corruption(format!(
                    "child {} starts at {} before its sibling at {}",
                    child, start, last
                )));
            }
        }
        self.children.push((child, start));
        Ok(())
    }

    /// Assigns the end time. Closing an already closed node is a no-op.
    pub fn close(&mut self, end: Timestamp) -> Result<()> {
        if self.is_closed() {
            return Ok(());
        }
        if end < self.start {
            return Err(Error::Corruption(format!(
                "node {} closed at {} before its start {}",
                self.seq, end, self.start
            )));
        }
        self.end = Some(end);
        Ok(())
    }

    /// The last child whose recorded start is at or before `t`.
    pub fn child_at(&self, t: Timestamp) -> Option<SequenceNumber> {
        self.children
            .iter()
            .take_while(|&&(_, start)| start <= t)
            .last()
            .map(|&(seq, _)| seq)
    }

    /// Intervals of this node holding at `t`.
    pub fn intervals_at(&self, t: Timestamp) -> impl Iterator<Item = &Interval> {
        self.intervals.iter().filter(move |i| i.contains(t))
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut block = vec![0u8; self.block_size];

        // Payload offsets are recomputed in insertion order, which reproduces
        // the offsets handed out by `add_interval`.
        let mut offset = self.block_size;
        let offsets: Vec<usize> = self
            .intervals
            .iter()
            .map(|interval| {
                offset -= interval.value().variable_size();
                offset
            })
            .collect();
        if offset != self.string_offset {
            return Err(Error::Corruption(format!(
                "node {} string section ends at {}, expected {}",
                self.seq, offset, self.string_offset
            )));
        }

        {
            let mut cursor = Cursor::new(&mut block[..]);
            self.encode_header(&mut cursor)?;

            for &(seq, _) in &self.children {
                cursor
                    .write_u32::<BigEndian>(seq)
                    .map_err(|e| Error::Encode("child sequence number", e))?;
            }
            for &(_, start) in &self.children {
                cursor
                    .write_i64::<BigEndian>(start.as_nanos())
                    .map_err(|e| Error::Encode("child start", e))?;
            }

            cursor.set_position(Self::data_start(self.max_children) as u64);
            for (interval, &offset) in self.intervals.iter().zip(&offsets) {
                interval.encode_record(&mut cursor, offset as u32)?;
            }
        }

        for (interval, &offset) in self.intervals.iter().zip(&offsets) {
            interval.encode_payload(&mut block, offset);
        }

        Ok(block)
    }

    fn encode_header<W: Write>(&self, writer: &mut W) -> Result<()> {
        let parent = self.parent.map_or(ROOT_PARENT, |p| p as i32);
        writer
            .write_i64::<BigEndian>(self.start.as_nanos())
            .map_err(|e| Error::Encode("node start", e))?;
        writer
            .write_i64::<BigEndian>(self.end.map_or(0, Timestamp::as_nanos))
            .map_err(|e| Error::Encode("node end", e))?;
        writer
            .write_u32::<BigEndian>(self.seq)
            .map_err(|e| Error::Encode("sequence number", e))?;
        writer
            .write_i32::<BigEndian>(parent)
            .map_err(|e| Error::Encode("parent sequence number", e))?;
        writer
            .write_u32::<BigEndian>(self.children.len() as u32)
            .map_err(|e| Error::Encode("child count", e))?;
        writer
            .write_u32::<BigEndian>(self.intervals.len() as u32)
            .map_err(|e| Error::Encode("interval count", e))?;
        writer
            .write_u8(self.is_closed() as u8)
            .map_err(|e| Error::Encode("closed flag", e))?;
        writer
            .write_u8(self.full as u8)
            .map_err(|e| Error::Encode("full flag", e))?;
        writer
            .write_u32::<BigEndian>(self.string_offset as u32)
            .map_err(|e| Error::Encode("string offset", e))?;
        Ok(())
    }

    pub fn decode(block: &[u8], max_children: usize) -> Result<Self> {
        let block_size = block.len();
        let data_start = Self::data_start(max_children);
        if block_size < data_start {
            return Err(Error::Corruption(format!(
                "block of {} bytes is smaller than a node header",
                block_size
            )));
        }

        let mut cursor = Cursor::new(block);
        let start = cursor
            .read_i64::<BigEndian>()
            .map_err(|e| Error::Decode("node start", e))?;
        let end = cursor
            .read_i64::<BigEndian>()
            .map_err(|e| Error::Decode("node end", e))?;
        let seq = cursor
            .read_u32::<BigEndian>()
            .map_err(|e| Error::Decode("sequence number", e))?;
        let parent = cursor
            .read_i32::<BigEndian>()
            .map_err(|e| Error::Decode("parent sequence number", e))?;
        let child_count = cursor
            .read_u32::<BigEndian>()
            .map_err(|e| Error::Decode("child count", e))? as usize;
        let interval_count = cursor
            .read_u32::<BigEndian>()
            .map_err(|e| Error::Decode("interval count", e))? as usize;
        let closed = cursor
            .read_u8()
            .map_err(|e| Error::Decode("closed flag", e))?
            != 0;
        let full = cursor
            .read_u8()
            .map_err(|e| Error::Decode("full flag", e))?
            != 0;
        let string_offset = cursor
            .read_u32::<BigEndian>()
            .map_err(|e| Error::Decode("string offset", e))? as usize;

        if child_count > max_children {
            return Err(Error::Corruption(format!(
                "node {} claims {} children, limit is {}",
                seq, child_count, max_children
            )));
        }
        let records_end = data_start + interval_count * INTERVAL_RECORD_SIZE;
        if records_end > string_offset || string_offset > block_size {
            return Err(Error::Corruption(format!(
                "node {} data section [{}, {}) overlaps string section at {}",
                seq, data_start, records_end, string_offset
            )));
        }

        let mut seqs = Vec::with_capacity(child_count);
        for _ in 0..child_count {
            seqs.push(
                cursor
                    .read_u32::<BigEndian>()
                    .map_err(|e| Error::Decode("child sequence number", e))?,
            );
        }
        let mut children = Vec::with_capacity(child_count);
        for seq in seqs {
            let start = cursor
                .read_i64::<BigEndian>()
                .map_err(|e| Error::Decode("child start", e))?;
            children.push((seq, Timestamp::new(start)));
        }

        cursor.set_position(data_start as u64);
        let mut intervals = Vec::with_capacity(interval_count);
        for _ in 0..interval_count {
            intervals.push(Interval::decode_record(&mut cursor, block)?);
        }

        Ok(Self {
            seq,
            parent: (parent != ROOT_PARENT).then_some(parent as u32),
            start: Timestamp::new(start),
            end: closed.then_some(Timestamp::new(end)),
            full,
            children,
            intervals,
            string_offset,
            block_size,
            max_children,
        })
    }
}
