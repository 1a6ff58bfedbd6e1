//! Probe outcomes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// A decoded result that breaks the status/unreachable invariant.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResultError {
    #[error("unreachable result carries status {0}")]
    StatusOnUnreachable(u16),
    #[error("unreachable result carries a match outcome")]
    MatchOnUnreachable,
    #[error("completed result has no status")]
    MissingStatus,
}

/// The outcome of one HTTP check.
///
/// Exactly one of `status` and `unreachable` carries the outcome: a
/// completed request has a status, a timed out one is unreachable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "ProbeResultRecord")]
pub struct ProbeResult {
    /// Wall-clock duration of the attempt, encoded as nanoseconds.
    #[serde(with = "duration_nanos")]
    pub elapsed: Duration,
    pub status: Option<u16>,
    /// Whether the body matched the target pattern, if one is configured.
    pub matched: Option<bool>,
    pub unreachable: bool,
    pub at: DateTime<Utc>,
}

impl ProbeResult {
    /// A request that completed with a response.
    pub fn completed(elapsed: Duration, status: u16, matched: Option<bool>) -> Self {
        Self {
            elapsed,
            status: Some(status),
            matched,
            unreachable: false,
            at: Utc::now(),
        }
    }

    /// A request that did not complete before its deadline.
    pub fn unreachable(elapsed: Duration) -> Self {
        Self {
            elapsed,
            status: None,
            matched: None,
            unreachable: true,
            at: Utc::now(),
        }
    }
}

/// Wire shape of a result, checked before it becomes a [`ProbeResult`].
#[derive(Debug, Deserialize)]
pub struct ProbeResultRecord {
    #[serde(with = "duration_nanos")]
    pub elapsed: Duration,
    pub status: Option<u16>,
    pub matched: Option<bool>,
    pub unreachable: bool,
    pub at: DateTime<Utc>,
}

impl TryFrom<ProbeResultRecord> for ProbeResult {
    type Error = ResultError;

    fn try_from(record: ProbeResultRecord) -> Result<Self, Self::Error> {
        match (record.unreachable, record.status) {
            (true, Some(status)) => return Err(ResultError::StatusOnUnreachable(status)),
            (true, None) if record.matched.is_some() => return Err(ResultError::MatchOnUnreachable),
            (false, None) => return Err(ResultError::MissingStatus),
            _ => {}
        }

        Ok(Self {
            elapsed: record.elapsed,
            status: record.status,
            matched: record.matched,
            unreachable: record.unreachable,
            at: record.at,
        })
    }
}

mod duration_nanos {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(u64::try_from(d.as_nanos()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_nanos)
    }
}
