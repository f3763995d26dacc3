//! Layer 5: Containers and the ownership/ambiguity guard
//!
//! A container is (owner identity, repository name). Containers key every
//! collection, so a corrupt one would poison stored state; the guard here is
//! the single choke point every write path goes through before the store is
//! touched. Call sites must not re-implement these checks.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::error::GuardError;
use super::identity::{self, IdentityKey};

/// Owner values that are host names of centralized forges, not identities.
/// Historic data contains them where an owner key belongs; writes against
/// them must fail closed.
pub const RESERVED_OWNERS: &[&str] = &[
    "github.com",
    "gitlab.com",
    "codeberg.org",
    "bitbucket.org",
    "sr.ht",
];

/// Repository name - non-empty, single path segment.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RepoName(String);

impl RepoName {
    pub fn parse(s: impl Into<String>) -> Result<Self, GuardError> {
        let s = s.into().trim().to_string();
        if s.is_empty() {
            return Err(GuardError::InvalidName {
                raw: s,
                reason: "empty".into(),
            });
        }
        if s.contains('/') || s.contains(char::is_whitespace) {
            return Err(GuardError::InvalidName {
                raw: s,
                reason: "cannot contain `/` or whitespace".into(),
            });
        }
        Ok(Self(s))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for RepoName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RepoName({:?})", self.0)
    }
}

impl fmt::Display for RepoName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for RepoName {
    type Error = GuardError;
    fn try_from(s: String) -> Result<Self, Self::Error> {
        RepoName::parse(s)
    }
}

impl From<RepoName> for String {
    fn from(n: RepoName) -> String {
        n.0
    }
}

/// (owner identity, repository name) - the key of every collection.
///
/// Well-formed by construction: the only way to obtain one from untrusted
/// input is [`vet_container`].
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ContainerRef {
    pub owner: IdentityKey,
    pub name: RepoName,
}

impl ContainerRef {
    pub fn new(owner: IdentityKey, name: RepoName) -> Self {
        Self { owner, name }
    }
}

impl fmt::Display for ContainerRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner.to_hex(), self.name)
    }
}

/// Vet an owner entity reference.
///
/// Rejects reserved forge host names, dotted values that are not decodable
/// identities, and anything the resolver cannot canonicalize.
pub fn vet_owner(
    entity: &str,
    known: &BTreeSet<IdentityKey>,
    reserved: &[String],
) -> Result<IdentityKey, GuardError> {
    let trimmed = entity.trim();
    let lowered = trimmed.to_ascii_lowercase();

    if RESERVED_OWNERS.contains(&lowered.as_str()) || reserved.iter().any(|r| *r == lowered) {
        return Err(GuardError::ReservedOwner {
            raw: trimmed.to_string(),
        });
    }

    if trimmed.contains('.') {
        // A dot is only legal in an owner ref when the whole thing still
        // resolves to an identity; otherwise it is hostname-shaped noise.
        return match identity::resolve(trimmed, known) {
            Ok(key) => Ok(key),
            Err(_) => Err(GuardError::HostnameOwner {
                raw: trimmed.to_string(),
            }),
        };
    }

    identity::resolve(trimmed, known).map_err(GuardError::from)
}

/// Vet a full container reference. The single entry point for turning
/// untrusted (owner, name) strings into a store key.
pub fn vet_container(
    owner_entity: &str,
    name: &str,
    known: &BTreeSet<IdentityKey>,
    reserved: &[String],
) -> Result<ContainerRef, GuardError> {
    let owner = vet_owner(owner_entity, known, reserved)?;
    let name = RepoName::parse(name)?;
    Ok(ContainerRef::new(owner, name))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(fill: u8) -> IdentityKey {
        IdentityKey::from_bytes([fill; 32])
    }

    #[test]
    fn repo_name_validation() {
        assert_eq!(RepoName::parse("  tools  ").unwrap().as_str(), "tools");
        assert!(RepoName::parse("").is_err());
        assert!(RepoName::parse("a/b").is_err());
        assert!(RepoName::parse("a b").is_err());
    }

    #[test]
    fn reserved_owner_fails_closed() {
        let known = BTreeSet::new();
        let err = vet_owner("github.com", &known, &[]).unwrap_err();
        assert!(matches!(err, GuardError::ReservedOwner { .. }));

        let extra = vec!["example.forge".to_string()];
        let err = vet_owner("example.forge", &known, &extra).unwrap_err();
        assert!(matches!(err, GuardError::ReservedOwner { .. }));
    }

    #[test]
    fn dotted_non_identity_is_rejected_as_hostname() {
        let known = BTreeSet::new();
        let err = vet_owner("some.host.example", &known, &[]).unwrap_err();
        assert!(matches!(err, GuardError::HostnameOwner { .. }));
    }

    #[test]
    fn valid_owner_forms_pass() {
        let k = key(0x42);
        let known: BTreeSet<_> = [k].into();
        assert_eq!(vet_owner(&k.to_hex(), &known, &[]).unwrap(), k);
        assert_eq!(vet_owner(&k.encode_display(), &known, &[]).unwrap(), k);
    }

    #[test]
    fn unresolved_owner_fails_closed() {
        let known = BTreeSet::new();
        let err = vet_container("deadbeef", "tools", &known, &[]).unwrap_err();
        assert!(matches!(err, GuardError::UnresolvedOwner(_)));
    }
}
