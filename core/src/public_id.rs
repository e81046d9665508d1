//! Opaque, URL-safe petition identifiers.
//!
//! New identifiers are the 32-char lowercase hex form of a random UUIDv4
//! (122 random bits, no sequential component). Older deployments issued
//! 12-char hex identifiers, and some imported petitions carry cuid-style
//! identifiers (`c` followed by lowercase alphanumerics); both still parse.

use serde::{Deserialize, Serialize};

use crate::errors::{PetitionError, Result};

const CURRENT_LEN: usize = 32;
const LEGACY_LEN: usize = 12;
const CUID_LEN: std::ops::RangeInclusive<usize> = 11..=36;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String")]
pub struct PublicId(String);

impl TryFrom<String> for PublicId {
    type Error = PetitionError;

    fn try_from(raw: String) -> Result<Self> {
        if is_valid(&raw) {
            Ok(Self(raw))
        } else {
            Err(PetitionError::validation("invalid petition id"))
        }
    }
}

impl PublicId {
    /// Generate a fresh identifier
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().simple().to_string())
    }

    /// Validate an identifier received from a caller
    pub fn parse(raw: &str) -> Result<Self> {
        if is_valid(raw) {
            Ok(Self(raw.to_string()))
        } else {
            Err(PetitionError::validation("invalid petition id"))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Wrap a value read back from the store
    pub(crate) fn from_stored(raw: String) -> Self {
        Self(raw)
    }
}

impl std::fmt::Display for PublicId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

fn is_valid(raw: &str) -> bool {
    is_hex_id(raw) || is_cuid(raw)
}

fn is_hex_id(raw: &str) -> bool {
    (raw.len() == CURRENT_LEN || raw.len() == LEGACY_LEN)
        && raw
            .bytes()
            .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}

fn is_cuid(raw: &str) -> bool {
    raw.starts_with('c')
        && CUID_LEN.contains(&raw.len())
        && raw
            .bytes()
            .all(|b| b.is_ascii_digit() || b.is_ascii_lowercase())
}
