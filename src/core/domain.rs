//! Layer 2: Domain enums
//!
//! ResourceKind: the five record families the engine reconciles.
//! Phase: the status a live record is in. `Merged` is legal only for
//! patches; the state machine enforces that.

use serde::{Deserialize, Serialize};

use super::error::EventError;

/// Resource family of a record collection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Repository,
    Issue,
    Patch,
    Discussion,
    Commit,
}

impl ResourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Repository => "repository",
            Self::Issue => "issue",
            Self::Patch => "patch",
            Self::Discussion => "discussion",
            Self::Commit => "commit",
        }
    }

    pub fn all() -> [ResourceKind; 5] {
        [
            Self::Repository,
            Self::Issue,
            Self::Patch,
            Self::Discussion,
            Self::Commit,
        ]
    }
}

/// Status of a live record.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    #[default]
    Open,
    Closed,
    Merged,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Closed => "closed",
            Self::Merged => "merged",
        }
    }

    /// Parse a status string as delivered by events or the polled API.
    pub fn parse(s: &str) -> Result<Self, EventError> {
        match s {
            "open" | "opened" | "reopened" => Ok(Self::Open),
            "closed" | "resolved" => Ok(Self::Closed),
            "merged" | "applied" => Ok(Self::Merged),
            other => Err(EventError::UnknownStatus {
                raw: other.to_string(),
            }),
        }
    }

    pub fn valid_for(&self, kind: ResourceKind) -> bool {
        !matches!(self, Self::Merged) || kind == ResourceKind::Patch
    }
}
