//! Identity atoms.
//!
//! ActorId: client self-identification, carried inside every stamp.
//! BoardId: shared-document identifier.
//! ElementId: board element identifier with prefix.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::error::{CoreError, InvalidId};

/// Actor identifier - non-empty string.
///
/// Clients name themselves. No validation beyond non-empty.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActorId(String);

impl ActorId {
    pub fn new(s: impl Into<String>) -> Result<Self, CoreError> {
        let s = s.into();
        if s.is_empty() {
            Err(InvalidId::Actor {
                raw: s,
                reason: "empty".into(),
            }
            .into())
        } else {
            Ok(Self(s))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ActorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ActorId({:?})", self.0)
    }
}

impl fmt::Display for ActorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Board (shared document) identifier.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BoardId(Uuid);

impl BoardId {
    pub fn new(id: Uuid) -> Self {
        Self(id)
    }

    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Debug for BoardId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BoardId({})", self.0)
    }
}

impl fmt::Display for BoardId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Alphabet for element ID suffixes.
const ELEMENT_ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// Default suffix length for generated element IDs.
const ELEMENT_SUFFIX_LEN: usize = 10;

/// Element identifier - "el-{suffix}" format.
///
/// Suffix is lowercase alphanumeric.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ElementId(String);

impl ElementId {
    /// Parse and validate an element ID string.
    pub fn parse(s: &str) -> Result<Self, CoreError> {
        let Some(rest) = s.strip_prefix("el-") else {
            return Err(InvalidId::Element {
                raw: s.to_string(),
                reason: "must start with 'el-'".into(),
            }
            .into());
        };
        if rest.is_empty() {
            return Err(InvalidId::Element {
                raw: s.to_string(),
                reason: "missing suffix".into(),
            }
            .into());
        }

        let suffix = rest.to_lowercase();
        for c in suffix.bytes() {
            if !ELEMENT_ALPHABET.contains(&c) {
                return Err(InvalidId::Element {
                    raw: s.to_string(),
                    reason: "contains non-alphanumeric character".into(),
                }
                .into());
            }
        }

        Ok(Self(format!("el-{suffix}")))
    }

    /// Generate a fresh element ID.
    pub fn generate() -> Self {
        use rand::Rng;
        let mut rng = rand::rng();
        let suffix: String = (0..ELEMENT_SUFFIX_LEN)
            .map(|_| {
                let idx = rng.random_range(0..ELEMENT_ALPHABET.len());
                ELEMENT_ALPHABET[idx] as char
            })
            .collect();
        Self(format!("el-{suffix}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ElementId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ElementId({:?})", self.0)
    }
}

impl fmt::Display for ElementId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
