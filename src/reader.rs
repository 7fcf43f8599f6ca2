//! Read-side projection of a finished state history.

use std::collections::BTreeMap;
use std::fmt;

use itertools::Itertools;

use crate::attribute::{AttributeId, Interner};
use crate::config::HistoryConfig;
use crate::error::Result;
use crate::time::Timestamp;
use crate::tree::HistoryTree;
use crate::value::StateValue;
use crate::Error;

/// Value of every attribute at one instant, indexed by attribute id.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CurrentState {
    values: Vec<StateValue>,
}

impl CurrentState {
    /// A state of `len` attributes, all `Null`.
    pub fn new(len: usize) -> Self {
        Self {
            values: vec![StateValue::Null; len],
        }
    }

    pub fn get(&self, id: AttributeId) -> Result<&StateValue> {
        self.values
            .get(id as usize)
            .ok_or(Error::UnknownAttribute(id))
    }

    pub fn values(&self) -> &[StateValue] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Pairs every value with its attribute path.
    pub fn snapshot(&self, interner: &Interner) -> Result<Snapshot> {
        let values: BTreeMap<String, StateValue> = self
            .values
            .iter()
            .enumerate()
            .map(|(id, value)| {
                let path = interner.resolve(id as AttributeId)?;
                Ok((path.to_string(), value.clone()))
            })
            .collect::<Result<_>>()?;
        Ok(Snapshot { values })
    }
}

/// Path-keyed view of a [`CurrentState`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Snapshot {
    values: BTreeMap<String, StateValue>,
}

impl Snapshot {
    /// Value of `path`, or `Null` if the attribute is unknown.
    pub fn get(&self, path: &str) -> &StateValue {
        static NULL: StateValue = StateValue::Null;
        self.values.get(path).unwrap_or(&NULL)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.values.contains_key(path)
    }

    /// Iterates over `(path, value)` pairs in path order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &StateValue)> {
        self.values.iter().map(|(path, value)| (path.as_str(), value))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl fmt::Display for Snapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{{{}}}",
            self.values
                .iter()
                .map(|(path, value)| format!("{}: {}", path, value))
                .join(", ")
        )
    }
}

/// Point-in-time queries over a finished history file.
pub struct HistoryReader {
    tree: HistoryTree,
    interner: Interner,
}

impl HistoryReader {
    pub fn open(config: &HistoryConfig) -> Result<Self> {
        let mut tree = HistoryTree::open(config)?;
        if !tree.is_closed() {
            tracing::error!(path = %config.path.display(), "History was never finished");
            return Err(Error::Corruption(format!(
                "history {} was never finished",
                config.path.display()
            )));
        }
        let trailer = tree.read_trailer()?;
        let interner = Interner::decode(&trailer)?;

        Ok(Self { tree, interner })
    }

    pub fn attributes(&self) -> &Interner {
        &self.interner
    }

    pub fn start(&self) -> Timestamp {
        self.tree.start()
    }

    pub fn end(&self) -> Timestamp {
        self.tree.end()
    }

    pub fn tree(&self) -> &HistoryTree {
        &self.tree
    }

    /// State of every attribute at `t`. Times at or past the end of the
    /// history yield `Null` everywhere.
    pub fn query(&mut self, t: impl Into<Timestamp>) -> Result<CurrentState> {
        let mut state = CurrentState::new(self.interner.len());
        self.query_into(t, &mut state)?;
        Ok(state)
    }

    /// Overwrites `state` in place with the values at `t`.
    pub fn query_into(&mut self, t: impl Into<Timestamp>, state: &mut CurrentState) -> Result<()> {
        self.tree.query(t.into(), &mut state.values)?;
        state.values.resize(self.interner.len(), StateValue::Null);
        Ok(())
    }

    /// Value of a single attribute at `t`; `Null` if the path is unknown.
    pub fn value_at(&mut self, path: &str, t: impl Into<Timestamp>) -> Result<StateValue> {
        let Some(id) = self.interner.get(path) else {
            return Ok(StateValue::Null);
        };
        let state = self.query(t)?;
        state.get(id).cloned()
    }

    pub fn snapshot_at(&mut self, t: impl Into<Timestamp>) -> Result<Snapshot> {
        let state = self.query(t)?;
        state.snapshot(&self.interner)
    }
}
