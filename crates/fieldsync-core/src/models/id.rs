//! Entity identifiers

use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::EntityType;

/// Client-issued identifier for a record the server has not acknowledged yet.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TempId {
    /// Entity type the id was issued for
    pub entity_type: EntityType,
    /// Issue time (unix seconds)
    pub created_at: i64,
    /// Random suffix making the id unique on this device
    pub suffix: String,
}

impl TempId {
    /// Issue a fresh temporary id for the given entity type
    #[must_use]
    pub fn new(entity_type: EntityType) -> Self {
        let simple = Uuid::now_v7().simple().to_string();
        // v7 puts the random bits at the end
        let suffix = simple[simple.len() - 9..].to_string();
        Self {
            entity_type,
            created_at: chrono::Utc::now().timestamp(),
            suffix,
        }
    }

    /// Build a temporary id from known parts
    pub fn from_parts(entity_type: EntityType, created_at: i64, suffix: impl Into<String>) -> Self {
        Self {
            entity_type,
            created_at,
            suffix: suffix.into(),
        }
    }
}

impl fmt::Display for TempId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "temp_{}_{}_{}",
            self.entity_type, self.created_at, self.suffix
        )
    }
}

fn temp_id_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^temp_([a-z]+)_(\d+)_([A-Za-z0-9]+)$").expect("Invalid regex")
    })
}

impl FromStr for TempId {
    type Err = String;

    /// Parse the printable form, e.g. `temp_customer_1700000000_abc`.
    ///
    /// Only used for identifiers typed by a user; stored records keep
    /// their id kind explicitly.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let captures = temp_id_pattern()
            .captures(s.trim())
            .ok_or_else(|| format!("'{s}' is not a temporary id"))?;
        let entity_type = captures[1].parse::<EntityType>()?;
        let created_at = captures[2]
            .parse::<i64>()
            .map_err(|error| format!("invalid timestamp in '{s}': {error}"))?;
        Ok(Self::from_parts(entity_type, created_at, &captures[3]))
    }
}

/// Storage discriminator for [`EntityId`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IdKind {
    Temporary,
    Permanent,
}

impl IdKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Temporary => "temp",
            Self::Permanent => "perm",
        }
    }
}

impl FromStr for IdKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "temp" => Ok(Self::Temporary),
            "perm" => Ok(Self::Permanent),
            other => Err(format!("unknown id kind '{other}'")),
        }
    }
}

/// Identifier of a domain record.
///
/// Permanent ids serialize as plain strings so payloads stay
/// wire-compatible; temporary ids serialize as a structured object.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EntityId {
    /// Server-issued identifier
    Permanent(String),
    /// Client-issued identifier awaiting server acknowledgement
    Temporary(TempId),
}

impl EntityId {
    pub fn permanent(id: impl Into<String>) -> Self {
        Self::Permanent(id.into())
    }

    pub const fn is_temporary(&self) -> bool {
        matches!(self, Self::Temporary(_))
    }

    pub const fn as_temporary(&self) -> Option<&TempId> {
        match self {
            Self::Temporary(temp) => Some(temp),
            Self::Permanent(_) => None,
        }
    }

    pub fn as_permanent(&self) -> Option<&str> {
        match self {
            Self::Permanent(id) => Some(id),
            Self::Temporary(_) => None,
        }
    }

    pub const fn kind(&self) -> IdKind {
        match self {
            Self::Temporary(_) => IdKind::Temporary,
            Self::Permanent(_) => IdKind::Permanent,
        }
    }

    /// The string key used by the local store alongside [`Self::kind`].
    pub fn key(&self) -> String {
        self.to_string()
    }

    /// Rebuild an id from its stored kind and key.
    pub fn from_storage(kind: IdKind, key: &str) -> Result<Self, String> {
        match kind {
            IdKind::Permanent => Ok(Self::Permanent(key.to_string())),
            IdKind::Temporary => key.parse().map(Self::Temporary),
        }
    }

    /// Replace this id with `permanent` when it refers to `temp`.
    pub fn remap(&mut self, temp: &TempId, permanent: &str) -> bool {
        if self.as_temporary() == Some(temp) {
            *self = Self::permanent(permanent);
            true
        } else {
            false
        }
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Permanent(id) => f.write_str(id),
            Self::Temporary(temp) => temp.fmt(f),
        }
    }
}

impl From<TempId> for EntityId {
    fn from(value: TempId) -> Self {
        Self::Temporary(value)
    }
}
