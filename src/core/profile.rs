//! Layer 12: Profiles and display projection
//!
//! Profile metadata arrives over the same unordered network as everything
//! else, so the directory keeps the newer-stamped profile per identity.
//! `display_label` is a pure function of its inputs - no hidden state, so
//! resolver output is reproducible in tests.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::identity::IdentityKey;
use super::time::EventTime;

/// Profile metadata for one identity.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub display_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub handle: Option<String>,
    /// Stamp of the profile event this was taken from.
    pub updated: EventTime,
}

/// All known profiles, keyed by identity.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileDirectory {
    profiles: BTreeMap<IdentityKey, Profile>,
}

impl ProfileDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &IdentityKey) -> Option<&Profile> {
        self.profiles.get(key)
    }

    /// Keep the newer profile; out-of-order arrivals must not regress.
    pub fn upsert(&mut self, key: IdentityKey, profile: Profile) -> bool {
        match self.profiles.get(&key) {
            Some(existing) if existing.updated >= profile.updated => false,
            _ => {
                self.profiles.insert(key, profile);
                true
            }
        }
    }

    pub fn keys(&self) -> impl Iterator<Item = &IdentityKey> {
        self.profiles.keys()
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }
}

/// Project an identity to a human-readable label.
///
/// Priority: profile display name, profile handle, truncated encoded form,
/// then `fallback` when there is no identity at all.
pub fn display_label(
    identity: Option<&IdentityKey>,
    profiles: &ProfileDirectory,
    fallback: &str,
) -> String {
    let Some(key) = identity else {
        return fallback.to_string();
    };
    if let Some(profile) = profiles.get(key) {
        if let Some(name) = profile.display_name.as_deref().filter(|n| !n.is_empty()) {
            return name.to_string();
        }
        if let Some(handle) = profile.handle.as_deref().filter(|h| !h.is_empty()) {
            return handle.to_string();
        }
    }
    key.truncated()
}
