//! In-process container registry.
//!
//! Implements both consumed interfaces over a single locked state, so a
//! subscription's snapshot and its registration as a subscriber happen
//! atomically with respect to container additions and removals. Events are
//! sent after the state lock is released, under a delivery lock held from
//! the state change until every subscriber queue has taken its event, so
//! each queue sees the changes in the order they were applied.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use kubetrace_common::error::{KubetraceError, Result};
use kubetrace_common::types::{Container, ContainerId, ContainerIdentity, TracerId};
use kubetrace_ebpf::enrich::{WithMountNsId, WithNetNsId};
use kubetrace_ebpf::filter::{MNTNS_FILTER_MAP_NAME, MountNsFilter};

use crate::registry::{ContainerEvent, ContainerRegistry, EventSender, EventType, FilterManager};
use crate::selector::ContainerSelector;

struct Subscriber {
    selector: ContainerSelector,
    events: EventSender,
}

struct TracerEntry {
    selector: ContainerSelector,
    filter: MountNsFilter,
}

#[derive(Default)]
struct State {
    containers: BTreeMap<ContainerId, Arc<Container>>,
    subscribers: HashMap<TracerId, Subscriber>,
    tracers: HashMap<TracerId, TracerEntry>,
}

impl State {
    fn deliveries(&self, kind: EventType, container: &Arc<Container>) -> Vec<(EventSender, ContainerEvent)> {
        self.subscribers
            .values()
            .filter(|sub| sub.selector.matches(container))
            .map(|sub| {
                (
                    sub.events.clone(),
                    ContainerEvent {
                        kind,
                        container: Arc::clone(container),
                    },
                )
            })
            .collect()
    }
}

/// Container registry kept in memory.
#[derive(Default)]
pub struct ContainerCollection {
    state: Mutex<State>,
    delivery: tokio::sync::Mutex<()>,
}

impl ContainerCollection {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Adds a running container and notifies matching subscribers.
    ///
    /// Returns `false` if a container with the same ID is already known.
    pub async fn add_container(&self, container: Container) -> bool {
        let container = Arc::new(container);
        let _delivery = self.delivery.lock().await;
        let deliveries = {
            let mut state = self.lock();
            if state.containers.contains_key(&container.id) {
                tracing::debug!(container = %container.id, "container already registered");
                return false;
            }
            let _ = state
                .containers
                .insert(container.id.clone(), Arc::clone(&container));
            for entry in state.tracers.values() {
                if entry.selector.matches(&container) {
                    let _ = entry.filter.insert(container.mntns);
                }
            }
            state.deliveries(EventType::Add, &container)
        };
        deliver(deliveries).await;
        true
    }

    /// Announces a container that is being created but not yet runnable.
    pub async fn pre_create_container(&self, container: Container) {
        let container = Arc::new(container);
        let _delivery = self.delivery.lock().await;
        let deliveries = self.lock().deliveries(EventType::PreCreate, &container);
        deliver(deliveries).await;
    }

    /// Removes a container and notifies matching subscribers.
    ///
    /// Returns `false` if the container is unknown.
    pub async fn remove_container(&self, id: &ContainerId) -> bool {
        let _delivery = self.delivery.lock().await;
        let deliveries = {
            let mut state = self.lock();
            let Some(container) = state.containers.remove(id) else {
                return false;
            };
            for entry in state.tracers.values() {
                if entry.selector.matches(&container) {
                    let _ = entry.filter.remove(container.mntns);
                }
            }
            state.deliveries(EventType::Remove, &container)
        };
        deliver(deliveries).await;
        true
    }

    /// Returns all known containers ordered by ID.
    #[must_use]
    pub fn containers(&self) -> Vec<Arc<Container>> {
        self.lock().containers.values().cloned().collect()
    }

    /// Returns the number of active subscriptions.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.lock().subscribers.len()
    }

    /// Returns the number of registered tracers.
    #[must_use]
    pub fn tracer_count(&self) -> usize {
        self.lock().tracers.len()
    }
}

async fn deliver(deliveries: Vec<(EventSender, ContainerEvent)>) {
    for (sender, event) in deliveries {
        if sender.send(event).await.is_err() {
            tracing::debug!("subscriber queue closed, dropping event");
        }
    }
}

impl ContainerRegistry for ContainerCollection {
    fn subscribe(
        &self,
        tracer: &TracerId,
        selector: &ContainerSelector,
        events: EventSender,
    ) -> Result<Vec<Arc<Container>>> {
        let mut state = self.lock();
        if state.subscribers.contains_key(tracer) {
            return Err(KubetraceError::InvalidState {
                message: format!("tracer {tracer} already subscribed"),
            });
        }
        let snapshot: Vec<_> = state
            .containers
            .values()
            .filter(|c| selector.matches(c))
            .cloned()
            .collect();
        let _ = state.subscribers.insert(
            tracer.clone(),
            Subscriber {
                selector: selector.clone(),
                events,
            },
        );
        tracing::debug!(%tracer, containers = snapshot.len(), "subscriber added");
        Ok(snapshot)
    }

    fn unsubscribe(&self, tracer: &TracerId) {
        if self.lock().subscribers.remove(tracer).is_some() {
            tracing::debug!(%tracer, "subscriber removed");
        }
    }

    fn enrich_by_mount_ns(&self, event: &mut dyn WithMountNsId) -> bool {
        let mntns = event.mount_ns_id();
        let identity = self
            .lock()
            .containers
            .values()
            .find(|c| c.mntns == mntns)
            .map(|c| c.identity());
        identity.is_some_and(|identity| {
            event.set_container_identity(identity);
            true
        })
    }

    fn enrich_by_net_ns(&self, event: &mut dyn WithNetNsId) -> bool {
        let netns = event.net_ns_id();
        let identity = {
            let state = self.lock();
            let members: Vec<_> = state.containers.values().filter(|c| c.netns == netns).collect();
            pod_identity(&members)
        };
        identity.is_some_and(|identity| {
            event.set_network_identity(identity);
            true
        })
    }
}

/// Identity shared by every container of a network namespace.
///
/// A namespace shared by several pods (host networking) resolves to
/// nothing; several containers of one pod resolve to the pod only.
fn pod_identity(members: &[&Arc<Container>]) -> Option<ContainerIdentity> {
    let (first, rest) = members.split_first()?;
    let same_pod = rest
        .iter()
        .all(|c| c.k8s.namespace == first.k8s.namespace && c.k8s.pod_name == first.k8s.pod_name);
    if !same_pod {
        return None;
    }
    let mut identity = first.identity();
    if !rest.is_empty() {
        identity.container_name.clear();
    }
    Some(identity)
}

impl FilterManager for ContainerCollection {
    fn add_tracer(&self, tracer: &TracerId, selector: &ContainerSelector) -> Result<()> {
        let mut state = self.lock();
        if state.tracers.contains_key(tracer) {
            return Err(KubetraceError::InvalidState {
                message: format!("tracer {tracer} already exists"),
            });
        }
        let filter = MountNsFilter::new(MNTNS_FILTER_MAP_NAME);
        for container in state.containers.values().filter(|c| selector.matches(c)) {
            let _ = filter.insert(container.mntns);
        }
        let _ = state.tracers.insert(
            tracer.clone(),
            TracerEntry {
                selector: selector.clone(),
                filter,
            },
        );
        Ok(())
    }

    fn tracer_filter(&self, tracer: &TracerId) -> Result<MountNsFilter> {
        self.lock()
            .tracers
            .get(tracer)
            .map(|entry| entry.filter.clone())
            .ok_or_else(|| KubetraceError::NotFound {
                kind: "tracer",
                id: tracer.to_string(),
            })
    }

    fn remove_tracer(&self, tracer: &TracerId) {
        let _ = self.lock().tracers.remove(tracer);
    }
}
