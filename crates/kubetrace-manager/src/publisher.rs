//! Containers data source.
//!
//! Publishes the run's matching containers as structured records: the
//! current population first, then additions and removals as they happen.
//! The publisher has its own registry subscription; a failing sink stops
//! the publisher without affecting attachment.

use std::io::Write;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use kubetrace_common::constants::VAR_CONTAINERS_SINK;
use kubetrace_common::error::{KubetraceError, Result};
use kubetrace_common::types::{Container, ContainerId, MountNsId, NetNsId, TracerId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::context::RunContext;
use crate::registry::{ContainerEvent, ContainerRegistry, EventType};
use crate::selector::ContainerSelector;

/// Why a container record was emitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordKind {
    /// Container was already running when publishing started.
    Existing,
    /// Container started.
    Added,
    /// Container went away.
    Removed,
}

/// One row of the containers data source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerRecord {
    /// Why the record was emitted.
    pub kind: RecordKind,
    /// When the record was emitted.
    pub timestamp: DateTime<Utc>,
    /// Runtime-assigned container ID.
    pub container_id: ContainerId,
    /// PID of the container's init process.
    pub pid: u32,
    /// Mount namespace.
    pub mntns: MountNsId,
    /// Network namespace.
    pub netns: NetNsId,
    /// Pod namespace.
    pub namespace: String,
    /// Pod name.
    pub pod_name: String,
    /// Container name.
    pub container_name: String,
    /// Pod labels.
    pub labels: BTreeMap<String, String>,
}

impl ContainerRecord {
    /// Builds a record for `container`, stamped with the current time.
    #[must_use]
    pub fn new(kind: RecordKind, container: &Container) -> Self {
        Self {
            kind,
            timestamp: Utc::now(),
            container_id: container.id.clone(),
            pid: container.pid,
            mntns: container.mntns,
            netns: container.netns,
            namespace: container.k8s.namespace.clone(),
            pod_name: container.k8s.pod_name.clone(),
            container_name: container.k8s.container_name.clone(),
            labels: container.k8s.pod_labels.clone(),
        }
    }
}

/// Downstream consumer of container records.
pub trait RecordSink: Send + Sync {
    /// Delivers one record.
    ///
    /// # Errors
    ///
    /// Returns an error if the record cannot be delivered; the publisher
    /// stops on the first failure.
    fn emit(&self, record: &ContainerRecord) -> Result<()>;
}

/// Writes each record as one line of JSON.
pub struct JsonLinesSink<W> {
    out: Mutex<W>,
}

impl<W: Write + Send> JsonLinesSink<W> {
    /// Creates a sink writing to `out`.
    pub const fn new(out: W) -> Self {
        Self {
            out: Mutex::new(out),
        }
    }

    /// Returns the underlying writer.
    pub fn into_inner(self) -> W {
        self.out.into_inner().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<W: Write + Send> RecordSink for JsonLinesSink<W> {
    fn emit(&self, record: &ContainerRecord) -> Result<()> {
        let mut out = self.out.lock().unwrap_or_else(PoisonError::into_inner);
        serde_json::to_writer(&mut *out, record)?;
        writeln!(out).and_then(|()| out.flush()).map_err(|e| KubetraceError::Publish {
            message: e.to_string(),
        })
    }
}

/// Forwards records into a Tokio channel.
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<ContainerRecord>,
}

impl ChannelSink {
    /// Creates a sink and the receiver its records arrive on.
    #[must_use]
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ContainerRecord>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl RecordSink for ChannelSink {
    fn emit(&self, record: &ContainerRecord) -> Result<()> {
        self.tx.send(record.clone()).map_err(|_| KubetraceError::Publish {
            message: "record receiver dropped".into(),
        })
    }
}

struct Forwarder {
    id: TracerId,
    sink: Arc<dyn RecordSink>,
}

impl Forwarder {
    fn emit(&self, kind: RecordKind, container: &Container) -> bool {
        match self.sink.emit(&ContainerRecord::new(kind, container)) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(publisher = %self.id, error = %e, "containers data source stopped");
                false
            }
        }
    }

    async fn run(
        self,
        snapshot: Vec<Arc<Container>>,
        mut events: mpsc::Receiver<ContainerEvent>,
        mut shutdown: oneshot::Receiver<()>,
    ) {
        for container in &snapshot {
            if !self.emit(RecordKind::Existing, container) {
                return;
            }
        }
        loop {
            let event = tokio::select! {
                biased;
                _ = &mut shutdown => return,
                event = events.recv() => match event {
                    Some(event) => event,
                    None => return,
                },
            };
            let kind = match event.kind {
                EventType::Add => RecordKind::Added,
                EventType::Remove => RecordKind::Removed,
                EventType::PreCreate | EventType::Unknown(_) => continue,
            };
            if !self.emit(kind, &event.container) {
                return;
            }
        }
    }
}

/// Publishes matching containers to the run's `containers` sink.
pub struct ContainersPublisher {
    id: TracerId,
    registry: Arc<dyn ContainerRegistry>,
    sink: Arc<dyn RecordSink>,
    buffer: usize,
    worker: Option<(JoinHandle<()>, oneshot::Sender<()>)>,
}

impl ContainersPublisher {
    /// Creates a publisher writing to the sink registered in `ctx`.
    ///
    /// # Errors
    ///
    /// Returns [`KubetraceError::Config`] if the run has no containers sink.
    pub fn new(ctx: &RunContext, registry: Arc<dyn ContainerRegistry>, buffer: usize) -> Result<Self> {
        let sink = ctx.get_sink(VAR_CONTAINERS_SINK).ok_or_else(|| KubetraceError::Config {
            message: format!("no {VAR_CONTAINERS_SINK:?} data source sink in run context"),
        })?;
        Ok(Self {
            id: TracerId::generate(),
            registry,
            sink,
            buffer: buffer.max(1),
            worker: None,
        })
    }

    /// Starts publishing containers matching `selector`.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns an error if already publishing or if the registry rejects
    /// the subscription.
    pub fn publish(&mut self, selector: &ContainerSelector) -> Result<()> {
        if self.worker.is_some() {
            return Err(KubetraceError::InvalidState {
                message: "containers publisher already started".into(),
            });
        }
        let (tx, rx) = mpsc::channel(self.buffer);
        let snapshot = self
            .registry
            .subscribe(&self.id, selector, tx)
            .map_err(|e| KubetraceError::resource("subscribing containers publisher", e))?;
        tracing::debug!(publisher = %self.id, containers = snapshot.len(), "publishing containers");

        let forwarder = Forwarder {
            id: self.id.clone(),
            sink: Arc::clone(&self.sink),
        };
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let handle = tokio::spawn(forwarder.run(snapshot, rx, shutdown_rx));
        self.worker = Some((handle, shutdown_tx));
        Ok(())
    }

    /// Stops publishing and drops the registry subscription. Idempotent.
    pub async fn unsubscribe(&mut self) {
        let Some((handle, shutdown)) = self.worker.take() else {
            return;
        };
        self.registry.unsubscribe(&self.id);
        let _ = shutdown.send(());
        if let Err(e) = handle.await {
            tracing::error!(publisher = %self.id, error = %e, "containers publisher failed");
        }
    }
}
