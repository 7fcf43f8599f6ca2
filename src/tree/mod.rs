//! The on-disk history tree.
//!
//! Intervals are appended at the right edge of the tree: into the latest
//! leaf when they fit, or into the nearest ancestor whose start precedes
//! them. A full node is closed together with its open descendants and a
//! fresh branch is grown next to it, adding a new root when every level is
//! at capacity. All leaves stay at depth `depth - 1`.
//!
//! ## File Layout
//!
//! ```text
//! +-------------------+  0
//! | TreeHeader        |  one block, zero padded
//! +-------------------+  block_size
//! | Node 0            |
//! | Node 1            |
//! | ...               |
//! +-------------------+  block_size * (1 + node_count)
//! | Trailer           |  owned by the caller
//! +-------------------+
//! ```

pub mod header;
pub mod io;
pub mod node;

use std::fs::{File, OpenOptions};
use std::io::Read;
use std::path::{Path, PathBuf};

use crate::config::HistoryConfig;
use crate::error::Result;
use crate::interval::{Interval, INTERVAL_RECORD_SIZE};
use crate::time::Timestamp;
use crate::value::{StateValue, MAX_STRING_LEN};
use crate::Error;

use header::{TreeHeader, HEADER_SIZE, MAGIC, VERSION};
use io::BlockStore;
use node::{Node, SequenceNumber, CHILD_ENTRY_SIZE, NODE_HEADER_SIZE};

/// Smallest block able to hold the file header and, in an empty node, the
/// largest interval a producer can record.
pub fn min_block_size(max_children: usize) -> usize {
    let node = NODE_HEADER_SIZE
        + max_children * CHILD_ENTRY_SIZE
        + INTERVAL_RECORD_SIZE
        + MAX_STRING_LEN
        + 2;
    node.max(HEADER_SIZE)
}

pub struct HistoryTree {
    path: PathBuf,
    io: BlockStore,
    block_size: usize,
    max_children: usize,
    start: Timestamp,
    /// Largest interval end inserted so far, or the final end once closed.
    end: Timestamp,
    depth: u32,
    root_seq: SequenceNumber,
    latest_leaf_seq: SequenceNumber,
    closed: bool,
}

impl HistoryTree {
    /// Creates a new history file holding a single empty root, replacing
    /// any file already at the configured path.
    pub fn create(config: &HistoryConfig) -> Result<Self> {
        config.validate()?;

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&config.path)?;

        let mut io = BlockStore::new(
            file,
            config.block_size,
            config.max_children,
            0,
            config.cache_size,
        );
        let root = io.allocate(None, config.start_time)?;

        let mut tree = Self {
            path: config.path.clone(),
            io,
            block_size: config.block_size,
            max_children: config.max_children,
            start: config.start_time,
            end: config.start_time,
            depth: 1,
            root_seq: root,
            latest_leaf_seq: root,
            closed: false,
        };

        // Pad the header to a full block so node 0 lands on its boundary.
        let padding = vec![0u8; tree.block_size];
        tree.io.write_at(0, &padding, "header block")?;
        tree.commit()?;

        tracing::info!(
            path = %tree.path.display(),
            block_size = tree.block_size,
            max_children = tree.max_children,
            start = %tree.start,
            "Created history tree"
        );
        Ok(tree)
    }

    /// Opens an existing history file read-only. Block size and fan-out
    /// come from the file header; only the cache size is taken from
    /// `config`.
    pub fn open(config: &HistoryConfig) -> Result<Self> {
        if config.cache_size == 0 {
            return Err(Error::InvalidConfig(
                "cache_size must be positive".to_string(),
            ));
        }

        let mut file = File::open(&config.path)?;
        let mut bytes = [0u8; HEADER_SIZE];
        file.read_exact(&mut bytes)
            .map_err(|e| Error::ReadError("tree header", e))?;
        let header = TreeHeader::decode(&bytes)?;

        let block_size = header.block_size as usize;
        let max_children = header.max_children as usize;
        if max_children < 2 || block_size < min_block_size(max_children) {
            return Err(Error::InvalidHeader(format!(
                "block size {} too small for {} children",
                block_size, max_children
            )));
        }

        let io = BlockStore::new(
            file,
            block_size,
            max_children,
            header.node_count,
            config.cache_size,
        );
        let mut tree = Self {
            path: config.path.clone(),
            io,
            block_size,
            max_children,
            start: header.start,
            end: header.end,
            depth: header.depth,
            root_seq: header.root_seq,
            latest_leaf_seq: header.latest_leaf_seq,
            closed: false,
        };

        let root = tree.io.read_node(tree.root_seq)?;
        if !root.is_root() {
            tracing::error!(seq = tree.root_seq, "Header root has a parent");
            return Err(Error::Corruption(format!(
                "root node {} has a parent",
                tree.root_seq
            )));
        }
        tree.closed = root.is_closed();

        tracing::info!(
            path = %tree.path.display(),
            nodes = header.node_count,
            depth = tree.depth,
            closed = tree.closed,
            "Opened history tree"
        );
        Ok(tree)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn start(&self) -> Timestamp {
        self.start
    }

    pub fn end(&self) -> Timestamp {
        self.end
    }

    pub fn depth(&self) -> u32 {
        self.depth
    }

    pub fn node_count(&self) -> u32 {
        self.io.node_count()
    }

    pub fn root_seq(&self) -> SequenceNumber {
        self.root_seq
    }

    pub fn latest_leaf_seq(&self) -> SequenceNumber {
        self.latest_leaf_seq
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    pub fn max_children(&self) -> usize {
        self.max_children
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Cache `(hits, misses)` of the underlying block store.
    pub fn cache_stats(&self) -> (usize, usize) {
        self.io.stats()
    }

    pub fn node(&mut self, seq: SequenceNumber) -> Result<&Node> {
        self.io.read_node(seq)
    }

    /// Stores a closed interval. Intervals must arrive with non-decreasing
    /// end times.
    pub fn insert(&mut self, interval: Interval) -> Result<()> {
        if self.closed {
            return Err(Error::InvalidOperation(
                "cannot insert into a closed history tree".to_string(),
            ));
        }
        if interval.start() < self.start {
            return Err(Error::TimeOutOfRange {
                time: interval.start(),
                start: self.start,
            });
        }
        if interval.end() < self.end {
            return Err(Error::InvalidInterval(format!(
                "interval ends at {} before the latest end {}",
                interval.end(),
                self.end
            )));
        }
        let capacity = Node::capacity(self.block_size, self.max_children);
        if interval.size() > capacity {
            return Err(Error::ValueTooLarge {
                size: interval.size(),
                capacity,
            });
        }

        let mut target = self.latest_leaf_seq;
        loop {
            let node = self.io.read_node(target)?;
            let fits = interval.size() <= node.free_space();
            let node_start = node.start();
            let parent = node.parent();

            if !fits {
                self.add_sibling(target, interval.end())?;
                target = self.latest_leaf_seq;
            } else if interval.start() < node_start {
                target = match parent {
                    Some(parent) => parent,
                    None => {
                        tracing::error!(
                            start = %interval.start(),
                            root_start = %node_start,
                            "Interval predates the root"
                        );
                        return Err(Error::Corruption(format!(
                            "interval starting at {} predates root start {}",
                            interval.start(),
                            node_start
                        )));
                    }
                };
            } else {
                self.end = self.end.max(interval.end());
                return self.io.node_mut(target)?.add_interval(interval);
            }
        }
    }

    /// Closes `full` and grows a new branch starting at `split`.
    fn add_sibling(&mut self, full: SequenceNumber, split: Timestamp) -> Result<()> {
        self.close_branch(full, split)?;
        self.io.node_mut(full)?.mark_full();

        let mut current = full;
        loop {
            let parent = match self.io.read_node(current)?.parent() {
                Some(parent) => parent,
                None => return self.add_new_root(split),
            };

            if self.io.read_node(parent)?.has_child_capacity() {
                let level = self.level_of(parent)?;
                self.latest_leaf_seq = self.build_branch(parent, level, split)?;
                tracing::debug!(
                    parent,
                    leaf = self.latest_leaf_seq,
                    split = %split,
                    "Added sibling branch"
                );
                return Ok(());
            }

            self.io.node_mut(parent)?.close(split)?;
            current = parent;
        }
    }

    fn add_new_root(&mut self, split: Timestamp) -> Result<()> {
        let old_root = self.root_seq;
        let old_start = self.io.read_node(old_root)?.start();

        let new_root = self.io.allocate(None, self.start)?;
        self.io.node_mut(new_root)?.link_child(old_root, old_start)?;
        self.io.node_mut(old_root)?.set_parent(new_root);

        self.root_seq = new_root;
        self.depth += 1;
        self.latest_leaf_seq = self.build_branch(new_root, 0, split)?;

        tracing::debug!(
            root = new_root,
            depth = self.depth,
            leaf = self.latest_leaf_seq,
            split = %split,
            "Added new root"
        );
        Ok(())
    }

    /// Creates one open node per level below `parent` down to leaf depth,
    /// all starting at `split`. Returns the new leaf.
    fn build_branch(
        &mut self,
        parent: SequenceNumber,
        parent_level: u32,
        split: Timestamp,
    ) -> Result<SequenceNumber> {
        let mut parent = parent;
        for _ in parent_level + 1..self.depth {
            let child = self.io.allocate(Some(parent), split)?;
            self.io.node_mut(parent)?.link_child(child, split)?;
            parent = child;
        }
        Ok(parent)
    }

    /// Closes `seq` and its latest descendants at `end`.
    fn close_branch(&mut self, seq: SequenceNumber, end: Timestamp) -> Result<()> {
        let mut current = Some(seq);
        while let Some(seq) = current {
            let node = self.io.node_mut(seq)?;
            node.close(end)?;
            current = node.latest_child();
        }
        Ok(())
    }

    fn level_of(&mut self, seq: SequenceNumber) -> Result<u32> {
        let mut level = 0;
        let mut current = seq;
        while let Some(parent) = self.io.read_node(current)?.parent() {
            level += 1;
            current = parent;
            if level >= self.depth {
                return Err(Error::Corruption(format!(
                    "node {} is deeper than the tree depth {}",
                    seq, self.depth
                )));
            }
        }
        Ok(level)
    }

    /// Overwrites `values` with the state at `t`, indexed by attribute id.
    /// Attributes with no interval holding at `t` are reset to `Null`.
    pub fn query(&mut self, t: Timestamp, values: &mut Vec<StateValue>) -> Result<()> {
        if t < self.start {
            return Err(Error::TimeOutOfRange {
                time: t,
                start: self.start,
            });
        }
        values.iter_mut().for_each(|v| *v = StateValue::Null);

        let mut current = self.root_seq;
        loop {
            let node = self.io.read_node(current)?;
            for interval in node.intervals_at(t) {
                let slot = interval.attribute() as usize;
                if slot >= values.len() {
                    values.resize(slot + 1, StateValue::Null);
                }
                values[slot] = interval.value().clone();
            }
            if node.is_leaf() {
                return Ok(());
            }
            current = match node.child_at(t) {
                Some(child) => child,
                None => {
                    tracing::error!(seq = current, time = %t, "Query found no child");
                    return Err(Error::Corruption(format!(
                        "no child of node {} covers {}",
                        current, t
                    )));
                }
            };
        }
    }

    /// Writes the header and every dirty node.
    pub fn commit(&mut self) -> Result<()> {
        let header = self.header()?.encode()?;
        self.io.write_at(0, &header, "tree header")?;
        self.io.commit_all()
    }

    fn header(&self) -> Result<TreeHeader> {
        Ok(TreeHeader {
            magic: MAGIC,
            version: VERSION,
            block_size: u32::try_from(self.block_size).map_err(|_| {
                Error::InvalidConfig(format!("block size {} exceeds 32 bits", self.block_size))
            })?,
            max_children: self.max_children as u32,
            start: self.start,
            end: self.end,
            node_count: self.io.node_count(),
            depth: self.depth,
            root_seq: self.root_seq,
            latest_leaf_seq: self.latest_leaf_seq,
        })
    }

    /// Closes the latest branch at `end`, persists the tree and appends
    /// `trailer` after the node region.
    pub fn close(mut self, end: Timestamp, trailer: &[u8]) -> Result<()> {
        if self.closed {
            return Err(Error::InvalidOperation(
                "history tree is already closed".to_string(),
            ));
        }
        if end < self.end {
            return Err(Error::InvalidInterval(format!(
                "tree end {} precedes the latest interval end {}",
                end, self.end
            )));
        }

        self.close_branch(self.root_seq, end)?;
        self.end = end;
        self.closed = true;
        self.commit()?;
        self.collect_metrics();

        let trailer_offset = self.io.end_of_nodes();
        let mut file = self.io.close()?;
        io::write_at(&mut file, trailer_offset, trailer, "trailer")?;
        file.set_len(trailer_offset + trailer.len() as u64)
            .map_err(|e| Error::WriteError("trailer", e))?;
        file.sync_all()
            .map_err(|e| Error::WriteError("history file", e))?;

        tracing::info!(path = %self.path.display(), end = %end, "Closed history tree");
        Ok(())
    }

    /// Bytes stored after the node region by [`HistoryTree::close`].
    pub fn read_trailer(&mut self) -> Result<Vec<u8>> {
        let offset = self.io.end_of_nodes();
        self.io.read_from(offset, "trailer")
    }

    pub fn collect_metrics(&self) {
        let (hits, misses) = self.io.stats();
        tracing::info!(
            path = %self.path.display(),
            nodes = self.io.node_count(),
            depth = self.depth,
            root = self.root_seq,
            latest_leaf = self.latest_leaf_seq,
            cache_hits = hits,
            cache_misses = misses,
            "History tree metrics"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Seek, SeekFrom, Write};
    use tempfile::tempdir;

    fn ts(n: i64) -> Timestamp {
        Timestamp::new(n)
    }

    fn int(start: i64, end: i64, attribute: u32, value: i32) -> Interval {
        Interval::new(ts(start), ts(end), attribute, StateValue::Integer(value)).unwrap()
    }

    /// Smallest legal block for `max_children`; holds 11 integer intervals
    /// when `max_children` is 3.
    fn small_config(path: &Path, max_children: usize) -> HistoryConfig {
        HistoryConfig::new(path)
            .block_size(min_block_size(max_children))
            .max_children(max_children)
            .cache_size(2)
    }

    fn state_at(tree: &mut HistoryTree, t: i64) -> Vec<StateValue> {
        let mut values = Vec::new();
        tree.query(ts(t), &mut values).unwrap();
        values
    }

    /// Depth of every leaf reachable from the root.
    fn leaf_depths(tree: &mut HistoryTree) -> Vec<u32> {
        let mut depths = Vec::new();
        let mut stack = vec![(tree.root_seq(), 0u32)];
        while let Some((seq, level)) = stack.pop() {
            let node = tree.node(seq).unwrap();
            if node.is_leaf() {
                depths.push(level);
            }
            for &(child, _) in node.children() {
                stack.push((child, level + 1));
            }
        }
        depths
    }

    #[test]
    fn test_min_block_size() {
        assert_eq!(min_block_size(50), 38 + 600 + 25 + 257);
        assert_eq!(min_block_size(0), 38 + 25 + 257);
    }

    #[test]
    fn test_half_open_boundaries() -> Result<()> {
        let dir = tempdir()?;
        let mut tree = HistoryTree::create(&HistoryConfig::new(dir.path().join("a.ht")))?;
        tree.insert(int(0, 10, 0, 1))?;
        tree.insert(int(10, 20, 0, 2))?;

        assert_eq!(state_at(&mut tree, 5), vec![StateValue::Integer(1)]);
        assert_eq!(state_at(&mut tree, 10), vec![StateValue::Integer(2)]);
        assert_eq!(state_at(&mut tree, 15), vec![StateValue::Integer(2)]);
        assert!(state_at(&mut tree, 25).iter().all(StateValue::is_null));
        Ok(())
    }

    #[test]
    fn test_query_resets_stale_slots() -> Result<()> {
        let dir = tempdir()?;
        let mut tree = HistoryTree::create(&HistoryConfig::new(dir.path().join("a.ht")))?;
        tree.insert(int(0, 5, 2, 7))?;

        let mut values = vec![StateValue::from("stale"); 4];
        tree.query(ts(9), &mut values)?;
        assert!(values.iter().all(StateValue::is_null));
        Ok(())
    }

    #[test]
    fn test_sibling_and_root_growth() -> Result<()> {
        let dir = tempdir()?;
        let mut tree = HistoryTree::create(&small_config(&dir.path().join("g.ht"), 3))?;
        let per_node = Node::capacity(tree.block_size(), 3) / INTERVAL_RECORD_SIZE;
        assert_eq!(per_node, 11);

        // Fill the root leaf; the overflowing interval triggers a new root.
        for i in 0..=per_node as i64 {
            tree.insert(int(i, i + 1, 0, i as i32))?;
        }
        assert_eq!(tree.depth(), 2);
        assert_eq!(tree.node_count(), 3);

        // Fill the second leaf; this time a plain sibling is enough.
        for i in per_node as i64 + 1..=2 * per_node as i64 + 1 {
            tree.insert(int(i, i + 1, 0, i as i32))?;
        }
        assert_eq!(tree.depth(), 2);
        assert_eq!(tree.node_count(), 4);
        assert_eq!(tree.latest_leaf_seq(), 3);

        let root = tree.root_seq();
        assert_eq!(root, 1);
        let children: Vec<_> = tree.node(root)?.children().iter().map(|c| c.0).collect();
        assert_eq!(children, vec![0, 2, 3]);
        // Intervals spanning a split live in the root.
        assert_eq!(tree.node(root)?.intervals().len(), 2);

        for t in 0..2 * per_node as i64 + 2 {
            assert_eq!(state_at(&mut tree, t), vec![StateValue::Integer(t as i32)]);
        }
        Ok(())
    }

    #[test]
    fn test_tree_stays_balanced() -> Result<()> {
        let dir = tempdir()?;
        let mut tree = HistoryTree::create(&small_config(&dir.path().join("b.ht"), 2))?;

        // Three attributes with staggered lifetimes so some intervals span
        // many leaves and end up in upper nodes.
        let mut since = [0i64; 3];
        for t in 1..600i64 {
            let attribute = (t % 3) as usize;
            if t % 7 == 0 || attribute != 0 {
                tree.insert(int(since[attribute], t, attribute as u32, t as i32))?;
                since[attribute] = t;
            }
            let depths = leaf_depths(&mut tree);
            assert!(depths.iter().all(|&d| d == tree.depth() - 1));
        }
        assert!(tree.depth() > 3);
        assert_eq!(tree.node(tree.latest_leaf_seq())?.child_count(), 0);
        Ok(())
    }

    #[test]
    fn test_insert_before_start_fails() -> Result<()> {
        let dir = tempdir()?;
        let config = HistoryConfig::new(dir.path().join("s.ht")).start_time(100);
        let mut tree = HistoryTree::create(&config)?;

        let result = tree.insert(int(50, 150, 0, 1));
        assert!(matches!(result, Err(Error::TimeOutOfRange { .. })));
        assert!(matches!(
            tree.query(ts(99), &mut Vec::new()),
            Err(Error::TimeOutOfRange { .. })
        ));

        // The tree is untouched.
        assert_eq!(tree.node(tree.root_seq())?.intervals().len(), 0);
        Ok(())
    }

    #[test]
    fn test_insert_rejects_decreasing_ends() -> Result<()> {
        let dir = tempdir()?;
        let mut tree = HistoryTree::create(&HistoryConfig::new(dir.path().join("d.ht")))?;
        tree.insert(int(0, 20, 0, 1))?;
        assert!(matches!(
            tree.insert(int(0, 10, 1, 1)),
            Err(Error::InvalidInterval(_))
        ));
        Ok(())
    }

    #[test]
    fn test_close_and_reopen() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("r.ht");
        let config = small_config(&path, 3);

        let mut tree = HistoryTree::create(&config)?;
        for i in 0..100i64 {
            let value = StateValue::String(format!("proc-{}", i));
            tree.insert(Interval::new(ts(i), ts(i + 1), 1, value)?)?;
        }
        let depth = tree.depth();
        let nodes = tree.node_count();
        tree.close(ts(120), b"trailer bytes")?;

        let mut reopened = HistoryTree::open(&config)?;
        assert!(reopened.is_closed());
        assert_eq!(reopened.depth(), depth);
        assert_eq!(reopened.node_count(), nodes);
        assert_eq!(reopened.end(), ts(120));
        assert_eq!(reopened.read_trailer()?, b"trailer bytes");

        assert_eq!(
            state_at(&mut reopened, 42),
            vec![StateValue::Null, StateValue::from("proc-42")]
        );
        assert!(state_at(&mut reopened, 110).iter().all(StateValue::is_null));

        let depths = leaf_depths(&mut reopened);
        assert!(depths.iter().all(|&d| d == depth - 1));
        Ok(())
    }

    #[test]
    fn test_closed_tree_rejects_inserts() -> Result<()> {
        let dir = tempdir()?;
        let config = HistoryConfig::new(dir.path().join("c.ht"));
        let mut tree = HistoryTree::create(&config)?;
        tree.insert(int(0, 10, 0, 1))?;
        tree.close(ts(10), &[])?;

        let mut reopened = HistoryTree::open(&config)?;
        assert!(matches!(
            reopened.insert(int(10, 20, 0, 2)),
            Err(Error::InvalidOperation(_))
        ));
        Ok(())
    }

    #[test]
    fn test_open_rejects_bad_magic() -> Result<()> {
        let dir = tempdir()?;
        let config = HistoryConfig::new(dir.path().join("m.ht"));
        HistoryTree::create(&config)?.close(ts(0), &[])?;

        let mut file = OpenOptions::new().write(true).open(&config.path)?;
        file.seek(SeekFrom::Start(0))?;
        file.write_all(&[0xDE, 0xAD, 0xBE, 0xEF])?;
        drop(file);

        assert!(matches!(
            HistoryTree::open(&config),
            Err(Error::InvalidHeader(_))
        ));
        Ok(())
    }

    #[test]
    fn test_create_rejects_invalid_config() {
        let dir = tempdir().unwrap();
        let config = HistoryConfig::new(dir.path().join("x.ht")).block_size(64);
        assert!(matches!(
            HistoryTree::create(&config),
            Err(Error::InvalidConfig(_))
        ));
    }
}
