//! Mount-namespace filter map.
//!
//! The filter is owned by the registry, which keeps its contents in sync
//! with the tracer's selector. Instrumentation borrows it for the duration
//! of a run and consults it before emitting events.

use std::collections::BTreeSet;
use std::sync::{Arc, PoisonError, RwLock};

use kubetrace_common::types::MountNsId;
use serde::{Deserialize, Serialize};

/// Default name of the mount-namespace filter map.
pub const MNTNS_FILTER_MAP_NAME: &str = "gadget_mntns_filter_map";

/// Declaration by an instrumentation instance that it wants a filter map.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterRequest {
    /// Name of the map the instrumentation expects.
    pub map_name: String,
}

impl Default for FilterRequest {
    fn default() -> Self {
        Self {
            map_name: MNTNS_FILTER_MAP_NAME.into(),
        }
    }
}

#[derive(Debug)]
struct FilterMap {
    name: String,
    entries: RwLock<BTreeSet<MountNsId>>,
}

/// Shared handle to a mount-namespace filter map.
///
/// Clones refer to the same underlying map.
#[derive(Debug, Clone)]
pub struct MountNsFilter {
    inner: Arc<FilterMap>,
}

impl MountNsFilter {
    /// Creates an empty filter map.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(FilterMap {
                name: name.into(),
                entries: RwLock::new(BTreeSet::new()),
            }),
        }
    }

    /// Returns the map name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Adds a mount namespace. Returns `false` if it was already present.
    pub fn insert(&self, mntns: MountNsId) -> bool {
        self.inner
            .entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(mntns)
    }

    /// Removes a mount namespace. Returns `false` if it was absent.
    pub fn remove(&self, mntns: MountNsId) -> bool {
        self.inner
            .entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&mntns)
    }

    /// Returns whether events from `mntns` pass the filter.
    #[must_use]
    pub fn contains(&self, mntns: MountNsId) -> bool {
        self.inner
            .entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&mntns)
    }

    /// Returns the number of mount namespaces in the map.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner
            .entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Returns whether the map is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns whether both handles refer to the same map.
    #[must_use]
    pub fn same_map(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}
