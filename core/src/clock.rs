//! Run clock: the single notion of "now" for one analysis run.
//!
//! RULE: no pipeline stage reads the wall clock. Staleness checks and
//! decay are measured against `as_of`, which defaults to the newest
//! timestamp in the feed so replays of the same feed are identical.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct RunClock {
    pub as_of: DateTime<Utc>,
}

impl RunClock {
    pub fn at(as_of: DateTime<Utc>) -> Self {
        Self { as_of }
    }

    /// Clock pinned to the newest timestamp in `stamps`, or `fallback`
    /// when there are none.
    pub fn from_feed<I>(stamps: I, fallback: DateTime<Utc>) -> Self
    where
        I: IntoIterator<Item = DateTime<Utc>>,
    {
        Self {
            as_of: stamps.into_iter().max().unwrap_or(fallback),
        }
    }

    /// Whole minutes elapsed since `t`. Never negative.
    pub fn minutes_since(&self, t: DateTime<Utc>) -> i64 {
        (self.as_of - t).num_minutes().max(0)
    }

    pub fn is_older_than(&self, t: DateTime<Utc>, hours: i64) -> bool {
        self.as_of - t > Duration::hours(hours)
    }
}
