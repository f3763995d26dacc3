//! Layer 7: Permission evaluation
//!
//! Effective role of an identity against a repository's contributor list.
//! Weights are 0-100; 100 is the owner tier, the maintainer tier is
//! configurable (default 50-99), any other non-zero weight is a
//! contributor. The one hard invariant: a repository can never lose its
//! last owner through a demotion or removal.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::error::{PermissionError, RangeError};
use super::identity::IdentityKey;

/// Contributor weight: 0-100 inclusive.
///
/// Validated at construction - invalid values are unrepresentable.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Weight(u8);

impl Weight {
    pub const OWNER: Weight = Weight(100);

    pub fn new(n: u8) -> Result<Self, RangeError> {
        if n > 100 {
            Err(RangeError {
                field: "weight",
                value: n,
                min: 0,
                max: 100,
            })
        } else {
            Ok(Self(n))
        }
    }

    pub fn value(&self) -> u8 {
        self.0
    }
}

/// Maintainer weight tier bounds, inclusive.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaintainerTier {
    pub min: u8,
    pub max: u8,
}

impl Default for MaintainerTier {
    fn default() -> Self {
        Self { min: 50, max: 99 }
    }
}

impl MaintainerTier {
    pub fn contains(&self, weight: Weight) -> bool {
        (self.min..=self.max).contains(&weight.value())
    }
}

/// Effective role, strongest first.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    None,
    Contributor,
    Maintainer,
    Owner,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Contributor => "contributor",
            Self::Maintainer => "maintainer",
            Self::Owner => "owner",
        }
    }
}

/// Explicit role tag, overriding the weight-derived tier upward.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoleTag {
    Maintainer,
}

/// One contributor-list entry.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContributorEntry {
    pub weight: Weight,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub tag: Option<RoleTag>,
}

impl ContributorEntry {
    pub fn weighted(weight: Weight) -> Self {
        Self { weight, tag: None }
    }
}

/// A repository's contributor list: the designated owner plus weighted
/// entries. The designated owner is structural and always an owner.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contributors {
    designated: IdentityKey,
    entries: BTreeMap<IdentityKey, ContributorEntry>,
}

impl Contributors {
    pub fn solo(designated: IdentityKey) -> Self {
        Self {
            designated,
            entries: BTreeMap::new(),
        }
    }

    pub fn designated(&self) -> &IdentityKey {
        &self.designated
    }

    pub fn entries(&self) -> impl Iterator<Item = (&IdentityKey, &ContributorEntry)> {
        self.entries.iter()
    }

    pub fn get(&self, id: &IdentityKey) -> Option<&ContributorEntry> {
        self.entries.get(id)
    }

    /// Effective role of `id` against this list.
    pub fn role_of(&self, id: &IdentityKey, tier: MaintainerTier) -> Role {
        if *id == self.designated {
            return Role::Owner;
        }
        let Some(entry) = self.entries.get(id) else {
            return Role::None;
        };
        if entry.weight == Weight::OWNER {
            Role::Owner
        } else if entry.tag == Some(RoleTag::Maintainer) || tier.contains(entry.weight) {
            Role::Maintainer
        } else if entry.weight.value() > 0 {
            Role::Contributor
        } else {
            Role::None
        }
    }

    fn owner_count(&self) -> usize {
        1 + self
            .entries
            .iter()
            .filter(|(id, e)| **id != self.designated && e.weight == Weight::OWNER)
            .count()
    }

    /// Set or update a contributor's entry.
    ///
    /// Fails (list unchanged) if this would demote the last remaining owner.
    pub fn set_entry(
        &mut self,
        id: IdentityKey,
        entry: ContributorEntry,
    ) -> Result<(), PermissionError> {
        let was_owner = id == self.designated
            || self.entries.get(&id).is_some_and(|e| e.weight == Weight::OWNER);
        let stays_owner = entry.weight == Weight::OWNER;
        if was_owner && !stays_owner && self.owner_count() == 1 {
            return Err(PermissionError::LastOwner);
        }
        if id == self.designated && !stays_owner {
            // Demoting the designated owner: hand designation to another
            // full-weight entry (deterministically, the smallest key).
            let successor = self
                .entries
                .iter()
                .find(|(k, e)| **k != id && e.weight == Weight::OWNER)
                .map(|(k, _)| *k)
                .ok_or(PermissionError::LastOwner)?;
            self.designated = successor;
            self.entries.remove(&successor);
        }
        self.entries.insert(id, entry);
        Ok(())
    }

    /// Remove a contributor entirely.
    ///
    /// Fails (list unchanged) if this would leave zero owners.
    pub fn remove(&mut self, id: &IdentityKey) -> Result<(), PermissionError> {
        let is_designated = *id == self.designated;
        if !is_designated && !self.entries.contains_key(id) {
            return Err(PermissionError::UnknownContributor {
                identity: id.to_hex(),
            });
        }
        let is_owner = is_designated
            || self.entries.get(id).is_some_and(|e| e.weight == Weight::OWNER);
        if is_owner && self.owner_count() == 1 {
            return Err(PermissionError::LastOwner);
        }
        if is_designated {
            let successor = self
                .entries
                .iter()
                .find(|(k, e)| **k != *id && e.weight == Weight::OWNER)
                .map(|(k, _)| *k)
                .ok_or(PermissionError::LastOwner)?;
            self.designated = successor;
            self.entries.remove(&successor);
        }
        self.entries.remove(id);
        Ok(())
    }
}

/// Require at least `required` or fail with an actionable error.
pub fn require_role(
    identity: &IdentityKey,
    contributors: &Contributors,
    tier: MaintainerTier,
    required: Role,
) -> Result<Role, PermissionError> {
    let role = contributors.role_of(identity, tier);
    if role >= required {
        Ok(role)
    } else {
        Err(PermissionError::Denied {
            identity: identity.truncated(),
            role: role.as_str(),
            required: required.as_str(),
        })
    }
}
