//! Standard and plugin version identification.
//!
//! Two separate versions cross the boundary: the *standard* version (the
//! revision of this ABI the plugin was built against) and the plugin's own
//! build version. Hosts gate optional-export lookups on the standard
//! version: "is this plugin at least standard vX.Y before I resolve export Z".

/// A 4-component version, laid out as four little-endian u16s.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StandardVersion {
    pub major: u16,
    pub minor: u16,
    pub patch: u16,
    pub build: u16,
}

/// The revision of the keel plugin standard this crate implements.
pub const STANDARD_VERSION: StandardVersion = StandardVersion::new(0, 3, 0, 0);

impl StandardVersion {
    pub const fn new(major: u16, minor: u16, patch: u16, build: u16) -> Self {
        Self { major, minor, patch, build }
    }

    /// Gate check: true if `self` is at least `other`.
    pub fn at_least(&self, other: StandardVersion) -> bool {
        *self >= other
    }
}

impl std::fmt::Display for StandardVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}.{}.{}", self.major, self.minor, self.patch, self.build)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ordering_is_lexicographic_over_components() {
        let v = StandardVersion::new(1, 2, 3, 4);
        assert!(v.at_least(StandardVersion::new(1, 2, 3, 4)));
        assert!(v.at_least(StandardVersion::new(1, 2, 2, 9)));
        assert!(v.at_least(StandardVersion::new(0, 9, 9, 9)));
        assert!(!v.at_least(StandardVersion::new(1, 2, 4, 0)));
        assert!(!v.at_least(StandardVersion::new(2, 0, 0, 0)));
    }

    #[test]
    fn layout_is_eight_bytes() {
        assert_eq!(std::mem::size_of::<StandardVersion>(), 8);
    }
}
