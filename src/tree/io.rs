//! Block store for history tree nodes.
//!
//! Owns the history file and a cache of decoded nodes. Nodes are addressed
//! by sequence number at `block_size + seq * block_size` (the first block is
//! the file header). Mutations happen on the cached copy and only reach disk
//! when the node is evicted or on [`BlockStore::commit_all`].

use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};

use super::node::{Node, SequenceNumber};
use crate::cache::Cache;
use crate::error::Result;
use crate::time::Timestamp;
use crate::Error;

struct CachedNode {
    node: Node,
    dirty: bool,
}

pub struct BlockStore {
    file: File,
    block_size: usize,
    max_children: usize,
    node_count: u32,
    cache: Cache<SequenceNumber, CachedNode>,
}

impl BlockStore {
    pub fn new(
        file: File,
        block_size: usize,
        max_children: usize,
        node_count: u32,
        cache_size: usize,
    ) -> Self {
        Self {
            file,
            block_size,
            max_children,
            node_count,
            cache: Cache::new(cache_size),
        }
    }

    pub fn node_count(&self) -> u32 {
        self.node_count
    }

    /// Cache `(hits, misses)`.
    pub fn stats(&self) -> (usize, usize) {
        self.cache.stats()
    }

    /// Offset of the first byte after the node region.
    pub fn end_of_nodes(&self) -> u64 {
        self.block_offset(self.node_count)
    }

    fn block_offset(&self, seq: SequenceNumber) -> u64 {
        (1 + seq as u64) * self.block_size as u64
    }

    /// Returns the node, loading it from disk on a cache miss.
    pub fn read_node(&mut self, seq: SequenceNumber) -> Result<&Node> {
        self.load(seq)?;
        self.cache
            .peek(&seq)
            .map(|cached| &cached.node)
            .ok_or_else(|| Error::Corruption(format!("node {} vanished from cache", seq)))
    }

    /// Returns the node for modification and marks it dirty.
    pub fn node_mut(&mut self, seq: SequenceNumber) -> Result<&mut Node> {
        self.load(seq)?;
        let cached = self
            .cache
            .peek_mut(&seq)
            .ok_or_else(|| Error::Corruption(format!("node {} vanished from cache", seq)))?;
        cached.dirty = true;
        Ok(&mut cached.node)
    }

    /// Stores a node in the cache as dirty. Disk is touched only if this
    /// evicts another dirty node.
    pub fn write_node(&mut self, node: Node) -> Result<()> {
        if node.seq() >= self.node_count {
            return Err(Error::Corruption(format!(
                "write of node {} beyond node count {}",
                node.seq(),
                self.node_count
            )));
        }
        let seq = node.seq();
        self.cache_insert(seq, CachedNode { node, dirty: true })
    }

    /// Creates a new empty node with the next sequence number.
    pub fn allocate(
        &mut self,
        parent: Option<SequenceNumber>,
        start: Timestamp,
    ) -> Result<SequenceNumber> {
        let seq = self.node_count;
        self.node_count = self
            .node_count
            .checked_add(1)
            .ok_or_else(|| Error::InvalidOperation("node count overflow".to_string()))?;
        let node = Node::new(seq, parent, start, self.block_size, self.max_children);
        self.write_node(node)?;
        Ok(seq)
    }

    /// Flushes every dirty cached node to disk.
    pub fn commit_all(&mut self) -> Result<()> {
        let mut dirty = Vec::new();
        for (&seq, cached) in self.cache.iter() {
            if cached.dirty {
                dirty.push((seq, cached.node.encode()?));
            }
        }
        for (seq, block) in &dirty {
            self.write_block(*seq, block)?;
        }
        self.file
            .flush()
            .map_err(|e| Error::WriteError("node blocks", e))?;

        for (_, cached) in self.cache.iter_mut() {
            cached.dirty = false;
        }
        tracing::trace!(blocks = dirty.len(), "Committed dirty nodes");
        Ok(())
    }

    /// Commits everything and hands back the file.
    pub fn close(mut self) -> Result<File> {
        self.commit_all()?;
        Ok(self.file)
    }

    /// Makes sure `seq` is cached, counting the lookup as a hit or miss.
    fn load(&mut self, seq: SequenceNumber) -> Result<()> {
        if self.cache.get(&seq).is_some() {
            return Ok(());
        }
        if seq >= self.node_count {
            return Err(Error::Corruption(format!(
                "node {} requested but only {} exist",
                seq, self.node_count
            )));
        }

        let mut block = vec![0u8; self.block_size];
        self.file
            .seek(SeekFrom::Start(self.block_offset(seq)))
            .map_err(|e| Error::ReadError("node block", e))?;
        self.file
            .read_exact(&mut block)
            .map_err(|e| Error::ReadError("node block", e))?;

        let node = Node::decode(&block, self.max_children)?;
        if node.seq() != seq {
            tracing::error!(expected = seq, found = node.seq(), "Node block mismatch");
            return Err(Error::Corruption(format!(
                "block {} holds node {}",
                seq,
                node.seq()
            )));
        }
        self.cache_insert(seq, CachedNode { node, dirty: false })
    }

    fn cache_insert(&mut self, seq: SequenceNumber, cached: CachedNode) -> Result<()> {
        if let Some((victim, evicted)) = self.cache.insert(seq, cached) {
            if evicted.dirty {
                tracing::trace!(seq = victim, "Writing back evicted node");
                let block = evicted.node.encode()?;
                self.write_block(victim, &block)?;
            }
        }
        Ok(())
    }

    fn write_block(&mut self, seq: SequenceNumber, block: &[u8]) -> Result<()> {
        self.file
            .seek(SeekFrom::Start(self.block_offset(seq)))
            .map_err(|e| Error::WriteError("node block", e))?;
        self.file
            .write_all(block)
            .map_err(|e| Error::WriteError("node block", e))?;
        Ok(())
    }

    /// Writes `bytes` at an absolute file offset.
    pub fn write_at(&mut self, offset: u64, bytes: &[u8], context: &'static str) -> Result<()> {
        write_at(&mut self.file, offset, bytes, context)
    }

    /// Reads everything from `offset` to the end of the file.
    pub fn read_from(&mut self, offset: u64, context: &'static str) -> Result<Vec<u8>> {
        let mut bytes = Vec::new();
        self.file
            .seek(SeekFrom::Start(offset))
            .map_err(|e| Error::ReadError(context, e))?;
        self.file
            .read_to_end(&mut bytes)
            .map_err(|e| Error::ReadError(context, e))?;
        Ok(bytes)
    }
}

pub(crate) fn write_at(
    file: &mut File,
    offset: u64,
    bytes: &[u8],
    context: &'static str,
) -> Result<()> {
    file.seek(SeekFrom::Start(offset))
        .map_err(|e| Error::WriteError(context, e))?;
    file.write_all(bytes)
        .map_err(|e| Error::WriteError(context, e))?;
    Ok(())
}
