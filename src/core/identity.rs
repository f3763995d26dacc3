//! Layer 1: Identity atoms
//!
//! IdentityKey: a participant's 32-byte public key. The raw lowercase-hex
//! form is canonical everywhere inside the engine - comparisons, storage
//! keys, serde. The bech32 `weft1...` form is display-only and must decode
//! back to the same bytes. Legacy 8-character truncations are accepted only
//! as an ambiguous fallback, resolved by unique prefix match.

use std::collections::BTreeSet;
use std::fmt;

use super::error::IdentityError;

/// Human-readable prefix of the encoded display form.
pub const ENCODED_HRP: &str = "weft";

/// Length of the legacy truncated identity form.
const LEGACY_LEN: usize = 8;

/// A participant's public key - 32 bytes, hex canonical.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct IdentityKey([u8; 32]);

impl IdentityKey {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{:02x}", b)).collect()
    }

    /// Parse from the canonical lowercase hex form.
    pub fn from_hex(s: &str) -> Result<Self, IdentityError> {
        if s.len() != 64 {
            return Err(IdentityError::Unresolved {
                raw: s.to_string(),
                reason: format!("must be 64 hex chars (got {})", s.len()),
            });
        }
        let mut bytes = [0u8; 32];
        for (i, chunk) in s.as_bytes().chunks(2).enumerate() {
            let hex = std::str::from_utf8(chunk).map_err(|_| IdentityError::Unresolved {
                raw: s.to_string(),
                reason: "contains invalid UTF-8".into(),
            })?;
            bytes[i] = u8::from_str_radix(hex, 16).map_err(|_| IdentityError::Unresolved {
                raw: s.to_string(),
                reason: format!("contains invalid hex: {}", hex),
            })?;
        }
        Ok(Self(bytes))
    }

    /// Encode to the human-readable `weft1...` display form.
    pub fn encode_display(&self) -> String {
        bech32::encode(ENCODED_HRP, &self.0)
    }

    /// Decode the `weft1...` display form back to the raw key.
    ///
    /// Decode failure is an error. The raw string is never silently adopted
    /// as an identity.
    pub fn from_encoded(s: &str) -> Result<Self, IdentityError> {
        let (hrp, data) = bech32::decode(s).map_err(|reason| IdentityError::Unresolved {
            raw: s.to_string(),
            reason,
        })?;
        if hrp != ENCODED_HRP {
            return Err(IdentityError::Unresolved {
                raw: s.to_string(),
                reason: format!("expected `{}` prefix, got `{}`", ENCODED_HRP, hrp),
            });
        }
        if data.len() != 32 {
            return Err(IdentityError::Unresolved {
                raw: s.to_string(),
                reason: format!("decoded to {} bytes, expected 32", data.len()),
            });
        }
        let mut bytes = [0u8; 32];
        bytes.copy_from_slice(&data);
        Ok(Self(bytes))
    }

    /// Shortened display form: leading and trailing slice of the encoding.
    pub fn truncated(&self) -> String {
        let enc = self.encode_display();
        format!("{}:{}", &enc[..12], &enc[enc.len() - 4..])
    }
}

impl fmt::Debug for IdentityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "IdentityKey({})", self.to_hex())
    }
}

impl fmt::Display for IdentityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl serde::Serialize for IdentityKey {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> serde::Deserialize<'de> for IdentityKey {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        IdentityKey::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

/// Resolve an opaque entity reference to a canonical identity.
///
/// Accepted shapes, tried in order:
/// - raw hex (64 lowercase hex chars) - returned unchanged
/// - encoded display form (`weft1...`) - decoded and validated
/// - legacy truncation (8 hex chars) - unique prefix match against `known`
///
/// Zero or multiple prefix matches are failures, never a guess.
pub fn resolve(entity: &str, known: &BTreeSet<IdentityKey>) -> Result<IdentityKey, IdentityError> {
    let entity = entity.trim();
    if entity.is_empty() {
        return Err(IdentityError::Unresolved {
            raw: entity.to_string(),
            reason: "empty".into(),
        });
    }

    if entity.len() == 64 && is_lower_hex(entity) {
        return IdentityKey::from_hex(entity);
    }

    if entity.starts_with(ENCODED_HRP) && entity[ENCODED_HRP.len()..].starts_with('1') {
        return IdentityKey::from_encoded(entity);
    }

    if entity.len() == LEGACY_LEN && is_lower_hex(entity) {
        let mut matches = known
            .iter()
            .filter(|key| key.to_hex().starts_with(entity));
        return match (matches.next(), matches.next()) {
            (Some(key), None) => Ok(*key),
            (None, _) => Err(IdentityError::Unresolved {
                raw: entity.to_string(),
                reason: "no known identity with this prefix".into(),
            }),
            (Some(_), Some(_)) => Err(IdentityError::Ambiguous {
                raw: entity.to_string(),
                candidates: 2 + matches.count(),
            }),
        };
    }

    Err(IdentityError::Unresolved {
        raw: entity.to_string(),
        reason: "not a hex key, encoded key, or legacy truncation".into(),
    })
}

fn is_lower_hex(s: &str) -> bool {
    s.bytes()
        .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}

/// Minimal bech32 codec for the display encoding.
///
/// Only what the identity form needs: 8-to-5 bit regrouping plus the
/// standard checksum. Kept in-module the same way the id alphabets are.
mod bech32 {
    const CHARSET: &[u8] = b"qpzry9x8gf2tvdw0s3jn54khce6mua7l";
    const GENERATOR: [u32; 5] = [0x3b6a_57b2, 0x2650_8e6d, 0x1ea1_19fa, 0x3d42_33dd, 0x2a14_62b3];

    fn polymod(values: &[u8]) -> u32 {
        let mut chk: u32 = 1;
        for &v in values {
            let top = chk >> 25;
            chk = ((chk & 0x1ff_ffff) << 5) ^ u32::from(v);
            for (i, r#gen) in GENERATOR.iter().enumerate() {
                if (top >> i) & 1 == 1 {
                    chk ^= r#gen;
                }
            }
        }
        chk
    }

    fn hrp_expand(hrp: &str) -> Vec<u8> {
        let mut out = Vec::with_capacity(hrp.len() * 2 + 1);
        out.extend(hrp.bytes().map(|b| b >> 5));
        out.push(0);
        out.extend(hrp.bytes().map(|b| b & 31));
        out
    }

    fn checksum(hrp: &str, data: &[u8]) -> [u8; 6] {
        let mut values = hrp_expand(hrp);
        values.extend_from_slice(data);
        values.extend_from_slice(&[0; 6]);
        let m = polymod(&values) ^ 1;
        let mut out = [0u8; 6];
        for (i, slot) in out.iter_mut().enumerate() {
            *slot = ((m >> (5 * (5 - i))) & 31) as u8;
        }
        out
    }

    fn to_base32(bytes: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(bytes.len() * 8 / 5 + 1);
        let mut acc: u32 = 0;
        let mut bits = 0u32;
        for &b in bytes {
            acc = (acc << 8) | u32::from(b);
            bits += 8;
            while bits >= 5 {
                bits -= 5;
                out.push(((acc >> bits) & 31) as u8);
            }
        }
        if bits > 0 {
            out.push(((acc << (5 - bits)) & 31) as u8);
        }
        out
    }

    fn from_base32(data: &[u8]) -> Result<Vec<u8>, String> {
        let mut out = Vec::with_capacity(data.len() * 5 / 8);
        let mut acc: u32 = 0;
        let mut bits = 0u32;
        for &v in data {
            acc = (acc << 5) | u32::from(v);
            bits += 5;
            if bits >= 8 {
                bits -= 8;
                out.push(((acc >> bits) & 0xff) as u8);
            }
        }
        // Leftover bits must be padding zeros.
        if bits >= 5 || (acc & ((1 << bits) - 1)) != 0 {
            return Err("invalid padding".into());
        }
        Ok(out)
    }

    pub fn encode(hrp: &str, bytes: &[u8]) -> String {
        let data = to_base32(bytes);
        let check = checksum(hrp, &data);
        let mut out = String::with_capacity(hrp.len() + 1 + data.len() + 6);
        out.push_str(hrp);
        out.push('1');
        for v in data.iter().chain(check.iter()) {
            out.push(CHARSET[*v as usize] as char);
        }
        out
    }

    pub fn decode(s: &str) -> Result<(String, Vec<u8>), String> {
        let sep = s.rfind('1').ok_or_else(|| "missing separator".to_string())?;
        if sep == 0 || sep + 7 > s.len() {
            return Err("separator misplaced".into());
        }
        let hrp = &s[..sep];
        let mut data = Vec::with_capacity(s.len() - sep - 1);
        for c in s[sep + 1..].bytes() {
            let v = CHARSET
                .iter()
                .position(|&x| x == c.to_ascii_lowercase())
                .ok_or_else(|| format!("invalid character `{}`", c as char))?;
            data.push(v as u8);
        }
        let mut values = hrp_expand(hrp);
        values.extend_from_slice(&data);
        if polymod(&values) != 1 {
            return Err("checksum mismatch".into());
        }
        data.truncate(data.len() - 6);
        Ok((hrp.to_string(), from_base32(&data)?))
    }
}
