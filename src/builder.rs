//! Write-side projection of the state history.
//!
//! The builder keeps the live value of every attribute along with the time
//! it became effective. Replacing a value closes the previous one as an
//! [`Interval`] and hands it to the [`HistoryTree`]; values still live when
//! the builder is finished are closed at the end time.

use crate::attribute::{AttributeId, Interner};
use crate::config::HistoryConfig;
use crate::error::Result;
use crate::flock::FileLock;
use crate::interval::Interval;
use crate::time::Timestamp;
use crate::tree::HistoryTree;
use crate::value::{StateValue, MAX_STRING_LEN};
use crate::Error;

pub struct StateBuilder {
    config: HistoryConfig,
    tree: HistoryTree,
    interner: Interner,
    /// Live value per attribute id.
    values: Vec<StateValue>,
    /// Time each live value became effective, same indexing as `values`.
    since: Vec<Timestamp>,
    latest: Timestamp,
    _lock: FileLock,
}

impl StateBuilder {
    /// Creates a new history file and takes the writer lock next to it.
    pub fn create(config: HistoryConfig) -> Result<Self> {
        config.validate()?;
        let lock = FileLock::lock(FileLock::path_for(&config.path))?;
        let tree = HistoryTree::create(&config)?;

        Ok(Self {
            latest: tree.start(),
            config,
            tree,
            interner: Interner::new(),
            values: Vec::new(),
            since: Vec::new(),
            _lock: lock,
        })
    }

    pub fn config(&self) -> &HistoryConfig {
        &self.config
    }

    /// Sets `path` to `value` from `time` onwards. Times must not decrease
    /// from one call to the next.
    pub fn record(
        &mut self,
        path: &str,
        value: impl Into<StateValue>,
        time: impl Into<Timestamp>,
    ) -> Result<AttributeId> {
        let value = value.into();
        let time = time.into();

        if time < self.tree.start() {
            return Err(Error::TimeOutOfRange {
                time,
                start: self.tree.start(),
            });
        }
        if time < self.latest {
            return Err(Error::TimeOutOfOrder {
                time,
                latest: self.latest,
            });
        }
        if let StateValue::String(s) = &value {
            if s.len() > MAX_STRING_LEN {
                return Err(Error::ValueTooLarge {
                    size: s.len(),
                    capacity: MAX_STRING_LEN,
                });
            }
        }

        let id = self.interner.intern(path);
        let slot = id as usize;
        if slot < self.values.len() {
            let since = self.since[slot];
            if since < time {
                let previous = Interval::new(since, time, id, self.values[slot].clone())?;
                self.tree.insert(previous)?;
            }
            self.values[slot] = value;
            self.since[slot] = time;
        } else {
            self.values.push(value);
            self.since.push(time);
        }

        self.latest = time;
        Ok(id)
    }

    /// Live value of `path`, if it was ever recorded.
    pub fn value(&self, path: &str) -> Option<&StateValue> {
        self.interner
            .get(path)
            .and_then(|id| self.values.get(id as usize))
    }

    /// Live values indexed by attribute id.
    pub fn current_values(&self) -> &[StateValue] {
        &self.values
    }

    pub fn attributes(&self) -> &Interner {
        &self.interner
    }

    pub fn latest_time(&self) -> Timestamp {
        self.latest
    }

    pub fn tree(&self) -> &HistoryTree {
        &self.tree
    }

    /// Closes every live value at `end_time`, persists the tree with the
    /// attribute table and releases the writer lock.
    pub fn finish(mut self, end_time: impl Into<Timestamp>) -> Result<()> {
        let end = end_time.into();
        if end < self.latest {
            return Err(Error::TimeOutOfOrder {
                time: end,
                latest: self.latest,
            });
        }

        for (slot, value) in self.values.iter().enumerate() {
            let since = self.since[slot];
            if since < end {
                let interval = Interval::new(since, end, slot as AttributeId, value.clone())?;
                self.tree.insert(interval)?;
            }
        }

        let trailer = self.interner.encode()?;
        let attributes = self.interner.len();
        self.tree.close(end, &trailer)?;

        tracing::info!(
            path = %self.config.path.display(),
            attributes,
            end = %end,
            "Finished state history"
        );
        Ok(())
    }
}
