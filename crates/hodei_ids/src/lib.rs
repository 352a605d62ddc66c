//! Opaque identifier wrappers for Hodei Pipelines entities.
//!
//! Ids are opaque strings on the wire: consumers compare them, they never
//! inspect structure. New ids are minted as UUIDv4 text, but parsing
//! deliberately does NOT demand UUID shape -- an id minted by an older
//! deployment (or a future scheme) must keep round-tripping. The only
//! constraints are wire safety: non-empty, bounded, token characters.
//!
//! Holding references by id (not by pointer) is also what breaks the
//! Worker <-> Execution ownership cycle: the registries own the lookup
//! tables, everything else carries ids.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

/// Longest accepted id, in bytes. Roomy next to the 36 chars a UUID needs,
/// tight enough to bound log lines and storage keys.
pub const MAX_ID_LEN: usize = 128;

/// Rejection reasons for ids arriving from the wire or the CLI.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IdError {
    #[error("{0} must not be empty")]
    Empty(&'static str),

    #[error("{label} is {len} bytes, over the {max}-byte cap")]
    TooLong {
        label: &'static str,
        len: usize,
        max: usize,
    },

    #[error("{label} contains {ch:?}; ids are limited to token characters")]
    ForbiddenChar { label: &'static str, ch: char },
}

/// Wire-safety check shared by every id kind: non-empty, bounded, and made
/// of token characters (alphanumerics plus `-`, `_`, `.`, `:`).
fn check_opaque(label: &'static str, value: &str) -> Result<(), IdError> {
    if value.is_empty() {
        return Err(IdError::Empty(label));
    }
    if value.len() > MAX_ID_LEN {
        return Err(IdError::TooLong {
            label,
            len: value.len(),
            max: MAX_ID_LEN,
        });
    }
    if let Some(ch) = value
        .chars()
        .find(|c| !c.is_ascii_alphanumeric() && !matches!(c, '-' | '_' | '.' | ':'))
    {
        return Err(IdError::ForbiddenChar { label, ch });
    }
    Ok(())
}

macro_rules! opaque_id {
    ($name:ident, $label:literal) => {
        #[doc = concat!("Opaque ", $label, ". Minted as UUIDv4 text, compared as a string.")]
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Mint a fresh id.
            pub fn new() -> Self {
                Self(Uuid::new_v4().to_string())
            }

            /// Accept an existing id, enforcing wire safety only. Structure
            /// beyond that is nobody's business, by design.
            pub fn parse(value: &str) -> Result<Self, IdError> {
                check_opaque($label, value)?;
                Ok(Self(value.to_string()))
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl std::str::FromStr for $name {
            type Err = IdError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::parse(s)
            }
        }
    };
}

opaque_id!(JobId, "job id");
opaque_id!(ExecutionId, "execution id");
opaque_id!(WorkerId, "worker id");
opaque_id!(PoolId, "pool id");
opaque_id!(QuotaId, "quota id");
opaque_id!(EventId, "event id");
opaque_id!(TemplateId, "template id");

/// Opaque credential bound to a single worker registration.
///
/// Unlike the entity ids above this is never parsed back by callers;
/// equality against the registry's copy is the only operation that matters.
/// A re-registration mints a fresh token and invalidates the old one.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionToken(String);

impl SessionToken {
    pub fn mint() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for SessionToken {
    fn from(value: String) -> Self {
        Self(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_are_unique() {
        assert_ne!(JobId::new(), JobId::new());
        assert_ne!(SessionToken::mint(), SessionToken::mint());
    }

    #[test]
    fn test_minted_id_round_trips() {
        let id = WorkerId::new();
        let parsed = WorkerId::parse(id.as_str()).unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn test_non_uuid_tokens_are_accepted() {
        // Opaque means opaque: a foreign scheme must keep working.
        assert!(ExecutionId::parse("exec-2024.11-0042").is_ok());
        assert!(PoolId::parse("pool:eu-west:bare_metal").is_ok());
    }

    #[test]
    fn test_wire_safety_enforced() {
        assert_eq!(JobId::parse("").unwrap_err(), IdError::Empty("job id"));
        assert!(matches!(
            JobId::parse("has space").unwrap_err(),
            IdError::ForbiddenChar { ch: ' ', .. }
        ));
        assert!(matches!(
            JobId::parse("newline\n").unwrap_err(),
            IdError::ForbiddenChar { ch: '\n', .. }
        ));
        let oversized = "a".repeat(MAX_ID_LEN + 1);
        assert!(matches!(
            JobId::parse(&oversized).unwrap_err(),
            IdError::TooLong { .. }
        ));
    }

    #[test]
    fn test_max_len_is_inclusive() {
        let at_cap = "b".repeat(MAX_ID_LEN);
        assert!(QuotaId::parse(&at_cap).is_ok());
    }

    #[test]
    fn test_serde_transparent() {
        let id = PoolId::new();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{}\"", id.as_str()));
    }

    #[test]
    fn test_ids_order_stably() {
        let mut ids = vec![
            JobId::parse("cc").unwrap(),
            JobId::parse("aa").unwrap(),
            JobId::parse("bb").unwrap(),
        ];
        ids.sort();
        let texts: Vec<&str> = ids.iter().map(|id| id.as_str()).collect();
        assert_eq!(texts, vec!["aa", "bb", "cc"]);
    }
}
