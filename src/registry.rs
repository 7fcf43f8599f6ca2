//! Index-addressed collection of state histories.
//!
//! Each history is either being built or finished. Recording is only
//! possible while building, querying only once finished; `finish` moves a
//! history from one state to the other.

use crate::builder::StateBuilder;
use crate::config::HistoryConfig;
use crate::error::Result;
use crate::reader::{HistoryReader, Snapshot};
use crate::time::Timestamp;
use crate::value::StateValue;
use crate::Error;

pub enum History {
    Building(StateBuilder),
    Finished(HistoryReader),
}

impl History {
    pub fn is_finished(&self) -> bool {
        matches!(self, History::Finished(_))
    }
}

#[derive(Default)]
pub struct StateStore {
    /// `None` marks a history lost to a failed `finish`.
    histories: Vec<Option<History>>,
}

impl StateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts building a new history, returning its index.
    pub fn create(&mut self, config: HistoryConfig) -> Result<usize> {
        let builder = StateBuilder::create(config)?;
        Ok(self.push(History::Building(builder)))
    }

    /// Opens a finished history file for querying, returning its index.
    pub fn open(&mut self, config: &HistoryConfig) -> Result<usize> {
        let reader = HistoryReader::open(config)?;
        Ok(self.push(History::Finished(reader)))
    }

    fn push(&mut self, history: History) -> usize {
        self.histories.push(Some(history));
        self.histories.len() - 1
    }

    pub fn len(&self) -> usize {
        self.histories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.histories.is_empty()
    }

    pub fn get(&self, index: usize) -> Result<&History> {
        self.histories
            .get(index)
            .ok_or(Error::UnknownHistory(index))?
            .as_ref()
            .ok_or_else(|| lost(index))
    }

    fn get_mut(&mut self, index: usize) -> Result<&mut History> {
        self.histories
            .get_mut(index)
            .ok_or(Error::UnknownHistory(index))?
            .as_mut()
            .ok_or_else(|| lost(index))
    }

    /// Records `value` for `path` at `time` in a history being built.
    pub fn record(
        &mut self,
        index: usize,
        path: &str,
        value: impl Into<StateValue>,
        time: impl Into<Timestamp>,
    ) -> Result<()> {
        match self.get_mut(index)? {
            History::Building(builder) => builder.record(path, value, time).map(|_| ()),
            History::Finished(_) => Err(Error::InvalidOperation(format!(
                "Cannot record into finished history {}",
                index
            ))),
        }
    }

    /// Finishes a history at `end_time` and reopens it for querying.
    pub fn finish(&mut self, index: usize, end_time: impl Into<Timestamp>) -> Result<()> {
        let end = end_time.into();
        let slot = self
            .histories
            .get_mut(index)
            .ok_or(Error::UnknownHistory(index))?;

        // Reject an early end before the builder is consumed.
        if let Some(History::Building(builder)) = slot.as_ref() {
            if end < builder.latest_time() {
                return Err(Error::TimeOutOfOrder {
                    time: end,
                    latest: builder.latest_time(),
                });
            }
        }

        match slot.take() {
            Some(History::Building(builder)) => {
                let config = builder.config().clone();
                builder.finish(end)?;
                *slot = Some(History::Finished(HistoryReader::open(&config)?));
                Ok(())
            }
            Some(finished @ History::Finished(_)) => {
                *slot = Some(finished);
                Err(Error::InvalidOperation(format!(
                    "History {} is already finished",
                    index
                )))
            }
            None => Err(lost(index)),
        }
    }

    /// Value of every attribute of a finished history at `time`.
    pub fn query_at(&mut self, index: usize, time: impl Into<Timestamp>) -> Result<Snapshot> {
        match self.get_mut(index)? {
            History::Finished(reader) => reader.snapshot_at(time),
            History::Building(_) => Err(Error::InvalidOperation(format!(
                "Cannot query history {} while it is being built",
                index
            ))),
        }
    }
}

fn lost(index: usize) -> Error {
    Error::InvalidOperation(format!(
        "History {} failed to finish and is no longer usable",
        index
    ))
}
