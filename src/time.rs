use std::fmt;

use serde::{Deserialize, Serialize};

/// A point in time, in nanoseconds since an arbitrary epoch.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Timestamp(i64);

impl Timestamp {
    pub const MIN: Timestamp = Timestamp(i64::MIN);
    pub const MAX: Timestamp = Timestamp(i64::MAX);

    pub const fn new(nanos: i64) -> Self {
        Timestamp(nanos)
    }

    pub const fn as_nanos(self) -> i64 {
        self.0
    }
}

impl From<i64> for Timestamp {
    fn from(nanos: i64) -> Self {
        Timestamp(nanos)
    }
}

impl From<i32> for Timestamp {
    fn from(nanos: i32) -> Self {
        Timestamp(nanos as i64)
    }
}

impl From<Timestamp> for i64 {
    fn from(ts: Timestamp) -> Self {
        ts.0
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}ns", self.0)
    }
}
