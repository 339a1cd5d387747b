//! Attachment lifecycle controller.
//!
//! Keeps an instrumentation instance attached to exactly the containers
//! that match a run's selector. The registry delivers lifecycle events
//! into a bounded queue; a single consumer task owns the tracked set and
//! is the only code that attaches or detaches while the run is live.
//!
//! Teardown stops the consumer first. The consumer closes its queue and
//! processes whatever was already delivered; only then are the remaining
//! containers detached and the subscription dropped. The tracked set is
//! shared with the controller, so a consumer that panicked inside the
//! attacher still leaves teardown the containers it had attached.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use kubetrace_common::error::{KubetraceError, Result};
use kubetrace_common::types::{Container, ContainerId, TracerId};
use kubetrace_ebpf::error::EbpfError;
use kubetrace_ebpf::instance::ContainerAttacher;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::registry::{ContainerEvent, ContainerRegistry, EventType};
use crate::selector::ContainerSelector;

/// Containers currently attached, keyed by container ID.
type Attached = Arc<Mutex<BTreeMap<ContainerId, Arc<Container>>>>;

fn lock(attached: &Attached) -> MutexGuard<'_, BTreeMap<ContainerId, Arc<Container>>> {
    attached.lock().unwrap_or_else(PoisonError::into_inner)
}

struct Tracker {
    tracer: TracerId,
    attacher: Arc<dyn ContainerAttacher>,
    attached: Attached,
}

impl Tracker {
    fn handle(&self, event: ContainerEvent) {
        tracing::debug!(
            tracer = %self.tracer,
            kind = %event.kind,
            container = %event.container.id,
            "container event"
        );
        match event.kind {
            EventType::Add => self.attach(event.container),
            EventType::Remove => self.detach(&event.container),
            EventType::PreCreate => {}
            EventType::Unknown(code) => {
                tracing::error!(
                    tracer = %self.tracer,
                    code,
                    "unknown event type, expected either {}, {} or {}",
                    EventType::PreCreate,
                    EventType::Add,
                    EventType::Remove
                );
            }
        }
    }

    fn attach(&self, container: Arc<Container>) {
        if lock(&self.attached).contains_key(&container.id) {
            tracing::debug!(container = %container.id, "container already attached");
            return;
        }
        if let Err(e) = self.attacher.attach_container(&container) {
            if let EbpfError::Verifier { log, .. } = &e {
                tracing::debug!(
                    container = %container.k8s.container_name,
                    verifier_log = %log,
                    "start tracing container: verifier error"
                );
            }
            tracing::warn!(
                container = %container.k8s.container_name,
                id = %container.id,
                error = %e,
                "start tracing container failed"
            );
            return;
        }
        tracing::debug!(
            container = %container.k8s.container_name,
            pid = container.pid,
            mntns = %container.mntns,
            netns = %container.netns,
            "tracer attached"
        );
        let _ = lock(&self.attached).insert(container.id.clone(), container);
    }

    fn detach(&self, container: &Container) {
        let Some(tracked) = lock(&self.attached).remove(&container.id) else {
            return;
        };
        detach_tracked(self.attacher.as_ref(), &tracked);
    }

    async fn consume(
        self,
        mut events: mpsc::Receiver<ContainerEvent>,
        mut shutdown: oneshot::Receiver<()>,
    ) {
        loop {
            tokio::select! {
                biased;
                _ = &mut shutdown => break,
                event = events.recv() => match event {
                    Some(event) => self.handle(event),
                    None => break,
                },
            }
        }
        events.close();
        while let Ok(event) = events.try_recv() {
            self.handle(event);
        }
    }
}

fn detach_tracked(attacher: &dyn ContainerAttacher, container: &Container) {
    match attacher.detach_container(container) {
        Ok(()) => tracing::debug!(
            container = %container.k8s.container_name,
            pid = container.pid,
            mntns = %container.mntns,
            netns = %container.netns,
            "tracer detached"
        ),
        Err(e) => tracing::warn!(
            container = %container.k8s.container_name,
            id = %container.id,
            error = %e,
            "stop tracing container failed"
        ),
    }
}

enum Phase {
    Idle,
    Subscribed {
        worker: JoinHandle<()>,
        shutdown: oneshot::Sender<()>,
        attached: Attached,
    },
    TornDown,
}

/// Drives attach/detach of one instrumentation instance from the
/// registry's lifecycle events.
///
/// Phases move `Idle -> Subscribed -> TornDown`; `TornDown` is terminal.
pub struct AttachmentController {
    tracer: TracerId,
    selector: ContainerSelector,
    registry: Arc<dyn ContainerRegistry>,
    attacher: Arc<dyn ContainerAttacher>,
    buffer: usize,
    phase: Phase,
}

impl AttachmentController {
    /// Creates an idle controller.
    #[must_use]
    pub fn new(
        tracer: TracerId,
        selector: ContainerSelector,
        registry: Arc<dyn ContainerRegistry>,
        attacher: Arc<dyn ContainerAttacher>,
        buffer: usize,
    ) -> Self {
        Self {
            tracer,
            selector,
            registry,
            attacher,
            buffer: buffer.max(1),
            phase: Phase::Idle,
        }
    }

    /// Subscribes to the registry, attaches the current snapshot in the
    /// order supplied, and starts consuming lifecycle events.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns an error if the controller is not idle or if the registry
    /// rejects the subscription; in the latter case the controller stays
    /// idle and teardown is a no-op.
    pub fn start(&mut self) -> Result<()> {
        if !matches!(self.phase, Phase::Idle) {
            return Err(KubetraceError::InvalidState {
                message: format!("attachment controller for tracer {} already started", self.tracer),
            });
        }

        let (tx, rx) = mpsc::channel(self.buffer);
        tracing::debug!(tracer = %self.tracer, "add subscription to registry");
        let snapshot = self
            .registry
            .subscribe(&self.tracer, &self.selector, tx)
            .map_err(|e| KubetraceError::resource("subscribing to container events", e))?;

        let attached = Attached::default();
        let tracker = Tracker {
            tracer: self.tracer.clone(),
            attacher: Arc::clone(&self.attacher),
            attached: Arc::clone(&attached),
        };
        for container in snapshot {
            tracker.attach(container);
        }

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let worker = tokio::spawn(tracker.consume(rx, shutdown_rx));
        self.phase = Phase::Subscribed {
            worker,
            shutdown: shutdown_tx,
            attached,
        };
        Ok(())
    }

    /// Returns whether the controller is currently subscribed.
    #[must_use]
    pub const fn is_subscribed(&self) -> bool {
        matches!(self.phase, Phase::Subscribed { .. })
    }

    /// Detaches every tracked container once and unsubscribes.
    ///
    /// Returns the IDs detached by this call. Calling it on an idle or
    /// already torn-down controller does nothing. Containers attached
    /// before a failure of the event consumer are still detached.
    pub async fn teardown(&mut self) -> Vec<ContainerId> {
        let Phase::Subscribed {
            worker,
            shutdown,
            attached,
        } = std::mem::replace(&mut self.phase, Phase::TornDown)
        else {
            return Vec::new();
        };

        let _ = shutdown.send(());
        if let Err(e) = worker.await {
            tracing::error!(tracer = %self.tracer, error = %e, "event consumer failed");
        }
        let remaining = std::mem::take(&mut *lock(&attached));
        for container in remaining.values() {
            detach_tracked(self.attacher.as_ref(), container);
        }
        let detached = remaining.into_keys().collect();

        tracing::debug!(tracer = %self.tracer, "unsubscribing from registry");
        self.registry.unsubscribe(&self.tracer);
        detached
    }
}

impl Drop for AttachmentController {
    fn drop(&mut self) {
        if let Phase::Subscribed { .. } = self.phase {
            tracing::warn!(
                tracer = %self.tracer,
                "attachment controller dropped without teardown"
            );
            self.registry.unsubscribe(&self.tracer);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use kubetrace_common::types::{K8sMetadata, MountNsId, NetNsId};
    use kubetrace_ebpf::enrich::{WithMountNsId, WithNetNsId};

    use super::*;

    fn container(id: &str) -> Arc<Container> {
        Arc::new(Container {
            id: ContainerId::new(id),
            pid: 1,
            mntns: MountNsId(1),
            netns: NetNsId(1),
            k8s: K8sMetadata::default(),
        })
    }

    #[derive(Default)]
    struct StubRegistry {
        snapshot: Vec<Arc<Container>>,
        fail: bool,
        sender: Mutex<Option<mpsc::Sender<ContainerEvent>>>,
        unsubscribed: Mutex<usize>,
    }

    impl StubRegistry {
        async fn deliver(&self, kind: EventType, c: &Arc<Container>) {
            let sender = self.sender.lock().unwrap().clone().unwrap();
            sender
                .send(ContainerEvent {
                    kind,
                    container: Arc::clone(c),
                })
                .await
                .unwrap();
        }
    }

    impl ContainerRegistry for StubRegistry {
        fn subscribe(
            &self,
            _: &TracerId,
            _: &ContainerSelector,
            events: mpsc::Sender<ContainerEvent>,
        ) -> Result<Vec<Arc<Container>>> {
            if self.fail {
                return Err(KubetraceError::Config {
                    message: "down".into(),
                });
            }
            *self.sender.lock().unwrap() = Some(events);
            Ok(self.snapshot.clone())
        }

        fn unsubscribe(&self, _: &TracerId) {
            *self.unsubscribed.lock().unwrap() += 1;
            *self.sender.lock().unwrap() = None;
        }

        fn enrich_by_mount_ns(&self, _: &mut dyn WithMountNsId) -> bool {
            false
        }

        fn enrich_by_net_ns(&self, _: &mut dyn WithNetNsId) -> bool {
            false
        }
    }

    #[derive(Default)]
    struct CountingAttacher {
        reject: Vec<&'static str>,
        crash_on: Option<&'static str>,
        attaches: Mutex<Vec<String>>,
        detaches: Mutex<Vec<String>>,
    }

    impl ContainerAttacher for CountingAttacher {
        #[allow(clippy::panic)]
        fn attach_container(&self, c: &Container) -> kubetrace_ebpf::error::Result<()> {
            self.attaches.lock().unwrap().push(c.id.to_string());
            if self.crash_on == Some(c.id.as_str()) {
                panic!("attacher crashed on {}", c.id);
            }
            if self.reject.contains(&c.id.as_str()) {
                return Err(EbpfError::Verifier {
                    program: "test".into(),
                    log: "invalid mem access".into(),
                });
            }
            Ok(())
        }

        fn detach_container(&self, c: &Container) -> kubetrace_ebpf::error::Result<()> {
            self.detaches.lock().unwrap().push(c.id.to_string());
            Ok(())
        }
    }

    fn controller(
        registry: &Arc<StubRegistry>,
        attacher: &Arc<CountingAttacher>,
    ) -> AttachmentController {
        AttachmentController::new(
            TracerId::new("t1"),
            ContainerSelector::default(),
            Arc::clone(registry) as Arc<dyn ContainerRegistry>,
            Arc::clone(attacher) as Arc<dyn ContainerAttacher>,
            8,
        )
    }

    #[tokio::test]
    async fn snapshot_is_attached_in_order() {
        let registry = Arc::new(StubRegistry {
            snapshot: vec![container("b"), container("a")],
            ..StubRegistry::default()
        });
        let attacher = Arc::new(CountingAttacher::default());
        let mut ctl = controller(&registry, &attacher);
        ctl.start().unwrap();

        assert_eq!(*attacher.attaches.lock().unwrap(), ["b", "a"]);
        let detached = ctl.teardown().await;
        assert_eq!(detached, [ContainerId::new("a"), ContainerId::new("b")]);
    }

    #[tokio::test]
    async fn add_remove_add_ends_attached() {
        let registry = Arc::new(StubRegistry::default());
        let attacher = Arc::new(CountingAttacher::default());
        let mut ctl = controller(&registry, &attacher);
        ctl.start().unwrap();

        let c1 = container("c1");
        registry.deliver(EventType::Add, &c1).await;
        registry.deliver(EventType::Remove, &c1).await;
        registry.deliver(EventType::Add, &c1).await;

        let detached = ctl.teardown().await;
        assert_eq!(detached, [ContainerId::new("c1")]);
        assert_eq!(attacher.attaches.lock().unwrap().len(), 2);
        // One detach from the Remove event, one from teardown.
        assert_eq!(attacher.detaches.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn failed_attach_is_never_tracked() {
        let registry = Arc::new(StubRegistry {
            snapshot: vec![container("c1"), container("c2")],
            ..StubRegistry::default()
        });
        let attacher = Arc::new(CountingAttacher {
            reject: vec!["c1"],
            ..CountingAttacher::default()
        });
        let mut ctl = controller(&registry, &attacher);
        ctl.start().unwrap();

        registry.deliver(EventType::Remove, &container("c1")).await;

        let detached = ctl.teardown().await;
        assert_eq!(detached, [ContainerId::new("c2")]);
        assert_eq!(*attacher.detaches.lock().unwrap(), ["c2"]);
    }

    #[tokio::test]
    async fn teardown_detaches_after_consumer_panic() {
        let registry = Arc::new(StubRegistry {
            snapshot: vec![container("c1"), container("c2")],
            ..StubRegistry::default()
        });
        let attacher = Arc::new(CountingAttacher {
            crash_on: Some("c3"),
            ..CountingAttacher::default()
        });
        let mut ctl = controller(&registry, &attacher);
        ctl.start().unwrap();

        registry.deliver(EventType::Add, &container("c3")).await;

        let detached = ctl.teardown().await;
        assert_eq!(detached, [ContainerId::new("c1"), ContainerId::new("c2")]);
        assert_eq!(*attacher.detaches.lock().unwrap(), ["c1", "c2"]);
        assert_eq!(*registry.unsubscribed.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn teardown_twice_detaches_once() {
        let registry = Arc::new(StubRegistry {
            snapshot: vec![container("c1")],
            ..StubRegistry::default()
        });
        let attacher = Arc::new(CountingAttacher::default());
        let mut ctl = controller(&registry, &attacher);
        ctl.start().unwrap();

        assert_eq!(ctl.teardown().await.len(), 1);
        assert!(ctl.teardown().await.is_empty());
        assert_eq!(attacher.detaches.lock().unwrap().len(), 1);
        assert_eq!(*registry.unsubscribed.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn teardown_before_start_is_noop() {
        let registry = Arc::new(StubRegistry::default());
        let attacher = Arc::new(CountingAttacher::default());
        let mut ctl = controller(&registry, &attacher);
        assert!(ctl.teardown().await.is_empty());
        assert_eq!(*registry.unsubscribed.lock().unwrap(), 0);
    }

    #[tokio::test]
    async fn failed_subscribe_leaves_controller_idle() {
        let registry = Arc::new(StubRegistry {
            fail: true,
            ..StubRegistry::default()
        });
        let attacher = Arc::new(CountingAttacher::default());
        let mut ctl = controller(&registry, &attacher);
        let err = ctl.start().unwrap_err();
        assert!(err.to_string().contains("subscribing"), "got: {err}");
        assert!(!ctl.is_subscribed());
        assert!(ctl.teardown().await.is_empty());
        assert_eq!(*registry.unsubscribed.lock().unwrap(), 0);
    }

    #[tokio::test]
    async fn precreate_and_unknown_events_cause_no_transition() {
        let registry = Arc::new(StubRegistry::default());
        let attacher = Arc::new(CountingAttacher::default());
        let mut ctl = controller(&registry, &attacher);
        ctl.start().unwrap();

        let c1 = container("c1");
        registry.deliver(EventType::PreCreate, &c1).await;
        registry.deliver(EventType::Unknown(9), &c1).await;

        assert!(ctl.teardown().await.is_empty());
        assert!(attacher.attaches.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn duplicate_add_attaches_once() {
        let registry = Arc::new(StubRegistry {
            snapshot: vec![container("c1")],
            ..StubRegistry::default()
        });
        let attacher = Arc::new(CountingAttacher::default());
        let mut ctl = controller(&registry, &attacher);
        ctl.start().unwrap();
        registry.deliver(EventType::Add, &container("c1")).await;

        assert_eq!(ctl.teardown().await.len(), 1);
        assert_eq!(attacher.attaches.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn start_after_teardown_is_rejected() {
        let registry = Arc::new(StubRegistry::default());
        let attacher = Arc::new(CountingAttacher::default());
        let mut ctl = controller(&registry, &attacher);
        ctl.start().unwrap();
        let _ = ctl.teardown().await;
        assert!(matches!(ctl.start(), Err(KubetraceError::InvalidState { .. })));
    }
}
