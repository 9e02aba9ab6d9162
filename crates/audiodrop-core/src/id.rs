// Artifact identifiers
//
// Every file the service writes is namespaced by an ArtifactId. Ids are only
// ever minted by an IdAllocator; ids read back from clients go through
// parse_canonical before they are allowed near a filesystem path.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Length of the canonical hyphenated textual form.
pub const CANONICAL_LEN: usize = 36;

/// Byte offsets of the hyphens in the canonical form.
const HYPHEN_OFFSETS: [usize; 4] = [8, 13, 18, 23];

/// Opaque 128-bit random identifier for one conversion job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ArtifactId(Uuid);

impl ArtifactId {
    /// Parses the canonical lowercase hyphenated form (`8-4-4-4-12`).
    ///
    /// This is a format check only. Braced, URN, uppercase and unhyphenated
    /// spellings are rejected so that a parsed id always renders back to the
    /// exact string it was parsed from.
    pub fn parse_canonical(s: &str) -> Option<Self> {
        let bytes = s.as_bytes();
        if bytes.len() != CANONICAL_LEN {
            return None;
        }

        for (i, b) in bytes.iter().enumerate() {
            let ok = if HYPHEN_OFFSETS.contains(&i) {
                *b == b'-'
            } else {
                matches!(b, b'0'..=b'9' | b'a'..=b'f')
            };
            if !ok {
                return None;
            }
        }

        Uuid::parse_str(s).ok().map(ArtifactId)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl From<Uuid> for ArtifactId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl fmt::Display for ArtifactId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.as_hyphenated())
    }
}

/// Source of fresh artifact identifiers.
///
/// Implementations must never repeat an id within the lifetime of the
/// service. `Send + Sync` so one allocator can be shared across request tasks.
pub trait IdAllocator: Send + Sync {
    fn allocate(&self) -> ArtifactId;
}

/// Allocator backed by UUID v4 (122 random bits from the OS CSPRNG).
#[derive(Debug, Clone, Copy, Default)]
pub struct RandomIdAllocator;

impl IdAllocator for RandomIdAllocator {
    fn allocate(&self) -> ArtifactId {
        ArtifactId(Uuid::new_v4())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_allocated_ids_are_unique() {
        let allocator = RandomIdAllocator;
        let ids: HashSet<ArtifactId> = (0..1000).map(|_| allocator.allocate()).collect();
        assert_eq!(ids.len(), 1000);
    }

    #[test]
    fn test_display_is_canonical_and_round_trips() {
        let id = RandomIdAllocator.allocate();
        let text = id.to_string();

        assert_eq!(text.len(), CANONICAL_LEN);
        assert_eq!(ArtifactId::parse_canonical(&text), Some(id));
    }

    #[test]
    fn test_parse_canonical_accepts_lowercase_hyphenated() {
        let id = ArtifactId::parse_canonical("550e8400-e29b-41d4-a716-446655440000");
        assert!(id.is_some());
    }

    #[test]
    fn test_parse_canonical_rejects_other_spellings() {
        let rejected = [
            "",
            "550E8400-E29B-41D4-A716-446655440000",
            "550e8400e29b41d4a716446655440000",
            "{550e8400-e29b-41d4-a716-446655440000}",
            "urn:uuid:550e8400-e29b-41d4-a716-446655440000",
            "550e8400-e29b-41d4-a716-44665544000",
            "550e8400-e29b-41d4-a716-4466554400000",
            "550e8400-e29b-41d4-a716_446655440000",
            "../../../../../../etc/passwd/00000000",
            "550e8400-e29b-41d4-a716-44665544000g",
        ];
        for s in rejected {
            assert!(ArtifactId::parse_canonical(s).is_none(), "accepted {:?}", s);
        }
    }

    #[test]
    fn test_serde_is_transparent() {
        let id = ArtifactId::parse_canonical("550e8400-e29b-41d4-a716-446655440000").unwrap();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"550e8400-e29b-41d4-a716-446655440000\"");
    }
}
