//! Flag sets accepted by query and install entry points.

use serde::{Deserialize, Serialize};

bitflags::bitflags! {
    /// Standard query flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct QueryFlags: u32 {
        /// Include declared meta-data in results.
        const GET_META_DATA = 1 << 0;
        /// Include component lists in package results.
        const GET_COMPONENTS = 1 << 1;
        /// Match components that run before the user unlocks storage.
        const MATCH_DIRECT_BOOT_AWARE = 1 << 2;
        /// Match components that require unlocked storage.
        const MATCH_DIRECT_BOOT_UNAWARE = 1 << 3;
        /// Also match components disabled for the user.
        const MATCH_DISABLED_COMPONENTS = 1 << 4;
        /// Only match components flagged as default.
        const MATCH_DEFAULT_ONLY = 1 << 5;
    }
}

impl QueryFlags {
    /// Callers that name neither direct-boot mode get both.
    #[must_use]
    pub fn normalized(self) -> Self {
        let both = Self::MATCH_DIRECT_BOOT_AWARE | Self::MATCH_DIRECT_BOOT_UNAWARE;
        if self.intersects(both) {
            self
        } else {
            self | both
        }
    }

    /// Whether a component with the given direct-boot awareness passes.
    #[must_use]
    pub fn matches_direct_boot(self, direct_boot_aware: bool) -> bool {
        let flags = self.normalized();
        if direct_boot_aware {
            flags.contains(Self::MATCH_DIRECT_BOOT_AWARE)
        } else {
            flags.contains(Self::MATCH_DIRECT_BOOT_UNAWARE)
        }
    }
}

bitflags::bitflags! {
    /// Install option flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    #[serde(transparent)]
    pub struct InstallFlags: u32 {
        /// Provided by the host image rather than installed by a user.
        const SYSTEM = 1 << 0;
        /// Copy the artifact into managed storage.
        const STORAGE = 1 << 1;
        /// The source is a content locator, staged into a temporary file.
        const URI_FILE = 1 << 2;
    }
}
