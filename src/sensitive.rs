//! Sensitive content package registry.

use indexmap::IndexSet;
use tracing::debug;

/// One package owning sensitive content, identified by name and uid.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct PackageInfo {
    pub package: String,
    pub uid: u32,
}

impl PackageInfo {
    pub fn new(package: impl Into<String>, uid: u32) -> Self {
        Self { package: package.into(), uid }
    }
}

/// Set of packages whose windows must be excluded from capture.
///
/// Consulted during screenshot and screen-capture decisions.
#[derive(Debug, Default)]
pub struct SensitiveContentPackages {
    packages: IndexSet<PackageInfo>,
}

impl SensitiveContentPackages {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add packages to the block list; reports whether the set changed.
    pub fn add_block_screen_capture(&mut self, packages: impl IntoIterator<Item = PackageInfo>) -> bool {
        let mut changed = false;
        for package in packages {
            changed |= self.packages.insert(package);
        }

        if changed {
            debug!("sensitive package set grew to {}", self.packages.len());
        }
        changed
    }

    /// Remove packages from the block list; reports whether the set changed.
    pub fn remove_block_screen_capture(
        &mut self,
        packages: impl IntoIterator<Item = PackageInfo>,
    ) -> bool {
        let mut changed = false;
        for package in packages {
            changed |= self.packages.shift_remove(&package);
        }
        changed
    }

    /// Drop every entry, e.g. on feature shutdown.
    pub fn clear(&mut self) {
        self.packages.clear();
    }

    /// Check if capture must be blocked for a (package, uid) pair.
    pub fn should_block_screen_capture(&self, package: &str, uid: u32) -> bool {
        self.packages.contains(&PackageInfo::new(package, uid))
    }

    pub fn len(&self) -> usize {
        self.packages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packages.is_empty()
    }
}
