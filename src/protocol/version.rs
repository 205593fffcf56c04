//! Protocol versions and per-field version gating.
//!
//! Every exchange on a connection happens under one [`ProtocolVersion`], agreed during the
//! handshake. Fields that were added to or removed from the wire format carry a [`VersionSpan`]
//! and are only encoded (and decoded) when the exchange version falls inside it. Encoders and
//! decoders consult the same span, so a conditional write always has its matching conditional
//! read.
use std::fmt;

use super::codec::CodecError;

/// Wire format revisions, oldest first. Ordering follows the revision history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ProtocolVersion {
    V1 = 1,
    V2 = 2,
    V3 = 3,
    V4 = 4,
    V5 = 5,
    V6 = 6,
    V7 = 7,
    V8 = 8,
}

impl ProtocolVersion {
    /// Oldest revision this client can still talk to.
    pub const OLDEST: ProtocolVersion = ProtocolVersion::V1;
    /// Revision this client is built for.
    pub const CURRENT: ProtocolVersion = ProtocolVersion::V8;

    /// Every known revision, oldest first.
    pub const ALL: [ProtocolVersion; 8] = [
        ProtocolVersion::V1,
        ProtocolVersion::V2,
        ProtocolVersion::V3,
        ProtocolVersion::V4,
        ProtocolVersion::V5,
        ProtocolVersion::V6,
        ProtocolVersion::V7,
        ProtocolVersion::V8,
    ];

    pub fn code(self) -> u32 {
        self as u32
    }

    pub fn from_code(code: u32) -> Result<Self, CodecError> {
        Self::ALL
            .into_iter()
            .find(|v| v.code() == code)
            .ok_or(CodecError::UnknownVersion(code))
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.code())
    }
}

/// Range of protocol versions in which a field is present on the wire.
///
/// `since` is inclusive, `removed_in` exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VersionSpan {
    pub since: ProtocolVersion,
    pub removed_in: Option<ProtocolVersion>,
}

impl VersionSpan {
    /// Present in every version.
    pub const ALWAYS: VersionSpan = VersionSpan {
        since: ProtocolVersion::OLDEST,
        removed_in: None,
    };

    pub const fn since(version: ProtocolVersion) -> Self {
        Self {
            since: version,
            removed_in: None,
        }
    }

    pub const fn between(since: ProtocolVersion, removed_in: ProtocolVersion) -> Self {
        Self {
            since,
            removed_in: Some(removed_in),
        }
    }

    pub fn contains(&self, version: ProtocolVersion) -> bool {
        version >= self.since && self.removed_in.is_none_or(|removed| version < removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn versions_are_ordered() {
        assert!(ProtocolVersion::V5 < ProtocolVersion::V7);
        assert_eq!(ProtocolVersion::CURRENT, *ProtocolVersion::ALL.last().unwrap());
        assert_eq!(ProtocolVersion::OLDEST, ProtocolVersion::ALL[0]);
    }

    #[test]
    fn version_codes_roundtrip() {
        for version in ProtocolVersion::ALL {
            assert_eq!(ProtocolVersion::from_code(version.code()).unwrap(), version);
        }
    }

    #[test]
    #[should_panic(expected = "UnknownVersion")]
    fn unknown_version_code() {
        ProtocolVersion::from_code(42).unwrap();
    }

    #[test]
    fn span_gates_versions() {
        let added = VersionSpan::since(ProtocolVersion::V7);
        assert!(!added.contains(ProtocolVersion::V5));
        assert!(added.contains(ProtocolVersion::V7));
        assert!(added.contains(ProtocolVersion::V8));

        let dropped = VersionSpan::between(ProtocolVersion::V2, ProtocolVersion::V4);
        assert!(!dropped.contains(ProtocolVersion::V1));
        assert!(dropped.contains(ProtocolVersion::V3));
        assert!(!dropped.contains(ProtocolVersion::V4));

        assert!(ProtocolVersion::ALL.iter().all(|v| VersionSpan::ALWAYS.contains(*v)));
    }
}
