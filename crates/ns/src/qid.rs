//! Device-issued file identity (spec §3, "Qid").

use bitflags::bitflags;

bitflags! {
    /// Bits of `Qid::kind`. `DIR` marks directories; the remaining bits are
    /// left for devices to use as they see fit (append-only files, mount
    /// points, exclusive-use files, ...).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct QidType: u8 {
        const DIR       = 0b1000_0000;
        const APPEND    = 0b0100_0000;
        const EXCLUSIVE = 0b0010_0000;
        const MOUNT     = 0b0001_0000;
        const AUTH      = 0b0000_1000;
        const TMP       = 0b0000_0100;
        const FILE      = 0b0000_0000;
    }
}

/// A device-issued unique identifier for a file.
///
/// Two Qids are equal (`==`) iff both `path` and `version` match. Identity
/// *ignoring* version ("is this the same underlying file, possibly after a
/// write bumped its version") is [`Qid::same_file`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Qid {
    pub path: u64,
    pub version: u32,
    pub kind: QidType,
}

impl Qid {
    pub fn new(path: u64, version: u32, kind: QidType) -> Self {
        Self {
            path,
            version,
            kind,
        }
    }

    pub fn is_dir(&self) -> bool {
        self.kind.contains(QidType::DIR)
    }

    /// True if `self` and `other` name the same file, regardless of version.
    pub fn same_file(&self, other: &Qid) -> bool {
        self.path == other.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn equality_requires_version_match() {
        let a = Qid::new(1, 0, QidType::DIR);
        let b = Qid::new(1, 1, QidType::DIR);
        assert_ne!(a, b);
        assert!(a.same_file(&b));
    }

    #[test]
    fn different_path_is_never_same_file() {
        let a = Qid::new(1, 0, QidType::FILE);
        let b = Qid::new(2, 0, QidType::FILE);
        assert!(!a.same_file(&b));
    }
}
