//! Best-effort container identity for captured events.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use kubetrace_ebpf::enrich::Enrichable;

use crate::registry::ContainerRegistry;

/// Counters of namespace lookups made by the enrichment adapter.
///
/// Unresolved lookups are not errors; they are only counted here.
#[derive(Debug, Default)]
pub struct EnrichmentStats {
    resolved: AtomicU64,
    unresolved: AtomicU64,
}

impl EnrichmentStats {
    /// Number of lookups that found a container.
    #[must_use]
    pub fn resolved(&self) -> u64 {
        self.resolved.load(Ordering::Relaxed)
    }

    /// Number of lookups for unknown namespaces.
    #[must_use]
    pub fn unresolved(&self) -> u64 {
        self.unresolved.load(Ordering::Relaxed)
    }

    fn record(&self, resolved: bool) {
        let counter = if resolved { &self.resolved } else { &self.unresolved };
        let _ = counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Resolves namespace identifiers in captured events through the registry.
pub struct EnrichmentAdapter {
    registry: Arc<dyn ContainerRegistry>,
    stats: EnrichmentStats,
}

impl EnrichmentAdapter {
    /// Creates an adapter backed by `registry`.
    #[must_use]
    pub fn new(registry: Arc<dyn ContainerRegistry>) -> Self {
        Self {
            registry,
            stats: EnrichmentStats::default(),
        }
    }

    /// Fills in whatever identity the event's capabilities allow.
    pub fn enrich(&self, event: &mut dyn Enrichable) {
        if let Some(target) = event.mount_ns() {
            let mntns = target.mount_ns_id();
            let resolved = self.registry.enrich_by_mount_ns(target);
            if !resolved {
                tracing::trace!(%mntns, "mount namespace not resolved");
            }
            self.stats.record(resolved);
        }
        if let Some(target) = event.net_ns() {
            let netns = target.net_ns_id();
            let resolved = self.registry.enrich_by_net_ns(target);
            if !resolved {
                tracing::trace!(%netns, "network namespace not resolved");
            }
            self.stats.record(resolved);
        }
    }

    /// Returns the lookup counters.
    #[must_use]
    pub const fn stats(&self) -> &EnrichmentStats {
        &self.stats
    }
}
