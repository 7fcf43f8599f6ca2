pub mod attribute;
pub mod builder;
pub mod cache;
pub mod config;
pub mod encoding;
pub mod error;
pub mod flock;
pub mod hasher;
pub mod interval;
pub mod reader;
pub mod registry;
pub mod time;
pub mod tree;
pub mod value;

pub use attribute::{AttributeId, Interner};
pub use builder::StateBuilder;
pub use config::HistoryConfig;
pub use error::{Error, Result};
pub use hasher::Hasher;
pub use interval::Interval;
pub use reader::{CurrentState, HistoryReader, Snapshot};
pub use registry::{History, StateStore};
pub use time::Timestamp;
pub use tree::HistoryTree;
pub use value::StateValue;
