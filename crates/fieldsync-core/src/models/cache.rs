//! Cache metadata attached to every stored record

use std::fmt;
use std::str::FromStr;

use chrono::Duration;
use serde::{Deserialize, Serialize};

use super::Record;

/// Cache tier controlling TTL and eviction order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Normal,
    Important,
    Critical,
}

impl Priority {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::Important => "important",
            Self::Critical => "critical",
        }
    }

    /// Time-to-live applied at write time
    pub fn ttl(self) -> Duration {
        match self {
            Self::Critical => Duration::hours(24),
            Self::Important => Duration::hours(12),
            Self::Normal => Duration::hours(6),
        }
    }

    /// Expiry instant (unix ms) for a record written at `now`
    pub fn expires_at(self, now: i64) -> i64 {
        now.saturating_add(self.ttl().num_milliseconds())
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "normal" => Ok(Self::Normal),
            "important" => Ok(Self::Important),
            "critical" => Ok(Self::Critical),
            other => Err(format!("unknown priority '{other}'")),
        }
    }
}

/// Metadata the local store keeps next to each record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CacheMetadata {
    /// Last write (unix ms)
    pub last_updated: i64,
    pub priority: Priority,
    /// Derived from `priority` at write time; `None` pins the record
    pub expires_at: Option<i64>,
    /// Incremented on every write
    pub version: i64,
}

impl CacheMetadata {
    pub fn is_expired(&self, now: i64) -> bool {
        self.expires_at.is_some_and(|expires_at| expires_at <= now)
    }
}

/// A record together with its cache metadata
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CachedRecord {
    pub record: Record,
    pub meta: CacheMetadata,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ttl_table_matches_tiers() {
        assert_eq!(Priority::Critical.ttl(), Duration::hours(24));
        assert_eq!(Priority::Important.ttl(), Duration::hours(12));
        assert_eq!(Priority::Normal.ttl(), Duration::hours(6));
        assert_eq!(Priority::Normal.expires_at(1_000), 1_000 + 6 * 3_600_000);
    }

    #[test]
    fn priorities_order_by_importance() {
        assert!(Priority::Critical > Priority::Important);
        assert!(Priority::Important > Priority::Normal);
    }

    #[test]
    fn pinned_metadata_never_expires() {
        let meta = CacheMetadata {
            last_updated: 0,
            priority: Priority::Normal,
            expires_at: None,
            version: 1,
        };
        assert!(!meta.is_expired(i64::MAX));

        let expiring = CacheMetadata {
            expires_at: Some(10),
            ..meta
        };
        assert!(expiring.is_expired(10));
        assert!(!expiring.is_expired(9));
    }
}
