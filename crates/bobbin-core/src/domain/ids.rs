//! Domain identifiers.
//!
//! Job ids are assigned by the backing table (`BIGSERIAL`), so unlike
//! generated ids they are plain integers wrapped in a newtype.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a queued job.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(i64);

impl JobId {
    pub fn new(value: i64) -> Self {
        Self(value)
    }

    /// Raw value as stored in the queue table.
    pub fn get(self) -> i64 {
        self.0
    }
}

impl From<i64> for JobId {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "job-{}", self.0)
    }
}
