//! End-to-end tests for the container manager.
//!
//! These tests drive a full run against the in-process registry:
//! 1. Selector parameters (namespace precedence, label validation)
//! 2. Filter registration and hand-over to the instrumentation
//! 3. Attachment following container lifecycle events
//! 4. Per-container failure isolation
//! 5. Teardown idempotence
//! 6. Event enrichment
//! 7. Containers data source

#![allow(clippy::expect_used, clippy::unwrap_used, clippy::panic)]

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use kubetrace_common::config::KubetraceConfig;
use kubetrace_common::constants::{
    VAR_CONFIG, VAR_CONTAINERS_SINK, VAR_EVENT_WRAPPERS, VAR_FILTER_BY_MNTNS,
    VAR_INSTRUMENTATION, VAR_MNTNS_FILTER_MAP, VAR_NEED_CONTAINER_EVENTS,
};
use kubetrace_common::types::{Container, ContainerId, K8sMetadata, MountNsId, NetNsId};
use kubetrace_ebpf::error::EbpfError;
use kubetrace_ebpf::file_monitor::FileOpenEvent;
use kubetrace_ebpf::filter::FilterRequest;
use kubetrace_ebpf::instance::{ContainerAttacher, FilterConsumer, InstrumentationHandle};
use kubetrace_ebpf::net_monitor::{NetworkEvent, NetworkMonitor};
use kubetrace_ebpf::tracer::{SyscallEvent, SyscallTracer};
use kubetrace_manager::context::{ContextValue, RunContext};
use kubetrace_manager::memory::ContainerCollection;
use kubetrace_manager::operator::{KubeManager, KubeManagerInstance};
use kubetrace_manager::publisher::{ChannelSink, RecordKind};
use kubetrace_manager::registry::{ContainerRegistry, FilterManager};

// ── Helpers ──────────────────────────────────────────────────────────

fn container(id: &str, pod: &str, pid: u32, ns: u64) -> Container {
    Container {
        id: ContainerId::new(id),
        pid,
        mntns: MountNsId(ns),
        netns: NetNsId(ns + 1000),
        k8s: K8sMetadata {
            namespace: "default".into(),
            pod_name: pod.into(),
            container_name: id.into(),
            pod_labels: BTreeMap::from([("app".to_string(), pod.to_string())]),
        },
    }
}

fn operator(registry: &Arc<ContainerCollection>) -> KubeManager {
    KubeManager::new(
        Arc::clone(registry) as Arc<dyn ContainerRegistry>,
        Arc::clone(registry) as Arc<dyn FilterManager>,
    )
}

fn run_context(instrumentation: InstrumentationHandle) -> RunContext {
    let mut ctx = RunContext::new();
    let _ = ctx.set_var(VAR_CONFIG, ContextValue::Config(KubetraceConfig::default()));
    let _ = ctx.set_var(VAR_NEED_CONTAINER_EVENTS, ContextValue::Bool(true));
    let _ = ctx.set_var(VAR_INSTRUMENTATION, ContextValue::Instrumentation(instrumentation));
    ctx
}

fn params(pairs: &[(&str, &str)]) -> HashMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
        .collect()
}

async fn start_run(
    registry: &Arc<ContainerCollection>,
    ctx: &mut RunContext,
    pairs: &[(&str, &str)],
) -> KubeManagerInstance {
    let mut instance = operator(registry)
        .instantiate(ctx, &params(pairs))
        .expect("instantiate should succeed")
        .expect("run should engage the manager");
    instance.pre_start(ctx).expect("pre-start should succeed");
    instance.start().expect("start should succeed");
    instance
}

/// Polls `condition` until it holds, letting the consumer task run.
async fn eventually(what: &str, condition: impl Fn() -> bool) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("timed out waiting for {what}");
}

/// Attacher recording every call, failing attach for chosen containers.
#[derive(Default)]
struct RecordingAttacher {
    fail: Vec<String>,
    calls: Mutex<Vec<(String, String)>>,
}

impl RecordingAttacher {
    fn failing(ids: &[&str]) -> Self {
        Self {
            fail: ids.iter().map(ToString::to_string).collect(),
            ..Self::default()
        }
    }

    fn count(&self, op: &str, id: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(o, i)| o == op && i == id)
            .count()
    }
}

impl ContainerAttacher for RecordingAttacher {
    fn attach_container(&self, c: &Container) -> Result<(), EbpfError> {
        self.calls
            .lock()
            .unwrap()
            .push(("attach".into(), c.id.to_string()));
        if self.fail.iter().any(|id| id == c.id.as_str()) {
            return Err(EbpfError::Verifier {
                program: "test".into(),
                log: "invalid mem access".into(),
            });
        }
        Ok(())
    }

    fn detach_container(&self, c: &Container) -> Result<(), EbpfError> {
        self.calls
            .lock()
            .unwrap()
            .push(("detach".into(), c.id.to_string()));
        Ok(())
    }
}

// ── Selector parameters ──────────────────────────────────────────────

#[tokio::test]
async fn all_namespaces_overrides_namespace() {
    let registry = Arc::new(ContainerCollection::new());
    let mut ctx = run_context(InstrumentationHandle::new("none"));
    let mut instance = start_run(
        &registry,
        &mut ctx,
        &[("namespace", "kube-system"), ("all-namespaces", "true")],
    )
    .await;

    assert_eq!(instance.selector().namespace, "");
    let _ = instance.close().await;
}

#[tokio::test]
async fn selector_built_from_labels_and_namespace() {
    let registry = Arc::new(ContainerCollection::new());
    let mut ctx = run_context(InstrumentationHandle::new("none"));
    let mut instance = start_run(
        &registry,
        &mut ctx,
        &[
            ("selector", "app=foo,env=prod"),
            ("all-namespaces", "false"),
            ("namespace", "default"),
        ],
    )
    .await;

    let selector = instance.selector();
    assert_eq!(selector.namespace, "default");
    assert_eq!(
        selector.labels,
        BTreeMap::from([
            ("app".to_string(), "foo".to_string()),
            ("env".to_string(), "prod".to_string()),
        ])
    );
    let _ = instance.close().await;
}

#[test]
fn malformed_selector_fails_before_any_registration() {
    let registry = Arc::new(ContainerCollection::new());
    let ctx = run_context(InstrumentationHandle::new("none"));

    for bad in ["bad", "a=b,c", "a=b=c"] {
        let err = operator(&registry)
            .instantiate(&ctx, &params(&[("selector", bad)]))
            .err()
            .expect("selector should be rejected");
        assert!(
            err.to_string().contains("key=value[,key=value,...]"),
            "got: {err}"
        );
    }
    assert_eq!(registry.tracer_count(), 0);
    assert_eq!(registry.subscriber_count(), 0);
}

// ── Filtering and attachment ─────────────────────────────────────────

#[tokio::test]
async fn run_follows_matching_containers() {
    let registry = Arc::new(ContainerCollection::new());
    let _ = registry.add_container(container("web-1", "web", 11, 1)).await;
    let _ = registry.add_container(container("db-1", "db", 12, 2)).await;

    let tracer = Arc::new(SyscallTracer::new());
    let mut ctx = run_context(
        InstrumentationHandle::new("trace_exec")
            .with_filter_consumer(Arc::clone(&tracer) as Arc<dyn FilterConsumer>)
            .with_attacher(Arc::clone(&tracer) as Arc<dyn ContainerAttacher>),
    );
    let _ = ctx.set_var(
        VAR_MNTNS_FILTER_MAP,
        ContextValue::FilterRequest(tracer.filter_request()),
    );

    let mut instance = start_run(&registry, &mut ctx, &[("selector", "app=web")]).await;
    assert_eq!(ctx.get_bool(VAR_FILTER_BY_MNTNS), Some(true));
    assert_eq!(tracer.attached_pids(), [11]);
    assert!(tracer.should_trace(MountNsId(1)));
    assert!(!tracer.should_trace(MountNsId(2)));

    let _ = registry.add_container(container("web-2", "web", 13, 3)).await;
    eventually("web-2 attached", || tracer.attached_pids() == [11, 13]).await;
    assert!(tracer.should_trace(MountNsId(3)));

    assert!(registry.remove_container(&ContainerId::new("web-1")).await);
    eventually("web-1 detached", || tracer.attached_pids() == [13]).await;
    assert!(!tracer.should_trace(MountNsId(1)));

    let detached = instance.close().await;
    assert_eq!(detached, [ContainerId::new("web-2")]);
    assert!(tracer.attached_pids().is_empty());
    assert_eq!(registry.tracer_count(), 0);
    assert_eq!(registry.subscriber_count(), 0);
}

#[tokio::test]
async fn add_remove_add_reattaches() {
    let registry = Arc::new(ContainerCollection::new());
    let attacher = Arc::new(RecordingAttacher::default());
    let mut ctx = run_context(
        InstrumentationHandle::new("trace")
            .with_attacher(Arc::clone(&attacher) as Arc<dyn ContainerAttacher>),
    );
    let mut instance = start_run(&registry, &mut ctx, &[]).await;

    let c1 = ContainerId::new("c1");
    let _ = registry.add_container(container("c1", "web", 5, 1)).await;
    let _ = registry.remove_container(&c1).await;
    let _ = registry.add_container(container("c1", "web", 6, 1)).await;
    eventually("second attach", || attacher.count("attach", "c1") == 2).await;

    assert_eq!(attacher.count("detach", "c1"), 1);
    let detached = instance.close().await;
    assert_eq!(detached, [c1]);
    assert_eq!(attacher.count("detach", "c1"), 2);
}

#[tokio::test]
async fn pre_created_container_is_attached_only_once_running() {
    let registry = Arc::new(ContainerCollection::new());
    let attacher = Arc::new(RecordingAttacher::default());
    let mut ctx = run_context(
        InstrumentationHandle::new("trace")
            .with_attacher(Arc::clone(&attacher) as Arc<dyn ContainerAttacher>),
    );
    let mut instance = start_run(&registry, &mut ctx, &[]).await;

    registry.pre_create_container(container("c1", "web", 5, 1)).await;
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(attacher.count("attach", "c1"), 0);
    assert!(registry.containers().is_empty());

    assert!(registry.add_container(container("c1", "web", 5, 1)).await);
    eventually("c1 attached", || attacher.count("attach", "c1") == 1).await;

    assert_eq!(instance.close().await, [ContainerId::new("c1")]);
    assert_eq!(attacher.count("attach", "c1"), 1);
}

#[tokio::test]
async fn failed_attach_is_isolated_to_one_container() {
    let registry = Arc::new(ContainerCollection::new());
    let _ = registry.add_container(container("c1", "web", 5, 1)).await;
    let _ = registry.add_container(container("c2", "web", 6, 2)).await;

    let attacher = Arc::new(RecordingAttacher::failing(&["c1"]));
    let mut ctx = run_context(
        InstrumentationHandle::new("trace")
            .with_attacher(Arc::clone(&attacher) as Arc<dyn ContainerAttacher>),
    );
    let mut instance = start_run(&registry, &mut ctx, &[]).await;
    assert_eq!(attacher.count("attach", "c1"), 1);
    assert_eq!(attacher.count("attach", "c2"), 1);

    let _ = registry.remove_container(&ContainerId::new("c1")).await;
    let _ = registry.add_container(container("c3", "web", 7, 3)).await;
    eventually("c3 attached", || attacher.count("attach", "c3") == 1).await;
    assert_eq!(attacher.count("detach", "c1"), 0);

    let mut detached = instance.close().await;
    detached.sort();
    assert_eq!(detached, [ContainerId::new("c2"), ContainerId::new("c3")]);
    assert_eq!(attacher.count("detach", "c1"), 0);
}

#[tokio::test]
async fn teardown_twice_detaches_once() {
    let registry = Arc::new(ContainerCollection::new());
    let _ = registry.add_container(container("c1", "web", 5, 1)).await;
    let attacher = Arc::new(RecordingAttacher::default());
    let mut ctx = run_context(
        InstrumentationHandle::new("trace")
            .with_attacher(Arc::clone(&attacher) as Arc<dyn ContainerAttacher>),
    );
    let mut instance = start_run(&registry, &mut ctx, &[]).await;

    assert_eq!(instance.close().await.len(), 1);
    assert!(instance.close().await.is_empty());
    assert_eq!(attacher.count("detach", "c1"), 1);
}

#[tokio::test]
async fn network_monitor_attaches_per_namespace() {
    let registry = Arc::new(ContainerCollection::new());
    let mut app = container("app", "web", 5, 1);
    let mut sidecar = container("sidecar", "web", 6, 2);
    app.netns = NetNsId(42);
    sidecar.netns = NetNsId(42);
    let _ = registry.add_container(app).await;
    let _ = registry.add_container(sidecar).await;

    let monitor = Arc::new(NetworkMonitor::new());
    let mut ctx = run_context(
        InstrumentationHandle::new("trace_tcp")
            .with_attacher(Arc::clone(&monitor) as Arc<dyn ContainerAttacher>),
    );
    let mut instance = start_run(&registry, &mut ctx, &[("podname", "web")]).await;
    assert!(monitor.is_monitored(NetNsId(42)));

    let _ = registry.remove_container(&ContainerId::new("app")).await;
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(monitor.is_monitored(NetNsId(42)));

    let _ = instance.close().await;
    assert!(!monitor.is_monitored(NetNsId(42)));
}

// ── Enrichment ───────────────────────────────────────────────────────

#[tokio::test]
async fn events_are_enriched_when_wrappers_are_registered() {
    let registry = Arc::new(ContainerCollection::new());
    let _ = registry.add_container(container("nginx", "web", 5, 7)).await;

    let mut ctx = run_context(InstrumentationHandle::new("trace"));
    let _ = ctx.set_var(
        VAR_EVENT_WRAPPERS,
        ContextValue::EventWrappers(vec!["trace".into()]),
    );
    let mut instance = start_run(&registry, &mut ctx, &[]).await;

    let mut syscall = SyscallEvent {
        pid: 5,
        mntns: MountNsId(7),
        syscall_nr: 59,
        timestamp_ns: 1,
        container: None,
    };
    instance.enrich_event(&mut syscall);
    let identity = syscall.container.expect("mount ns should resolve");
    assert_eq!(identity.pod_name, "web");
    assert_eq!(identity.container_name, "nginx");

    let mut net = NetworkEvent {
        pid: 5,
        netns: NetNsId(9999),
        src_addr: "10.0.0.1".into(),
        dst_addr: "10.0.0.2".into(),
        dst_port: 80,
        protocol: "TCP".into(),
        pod: None,
    };
    instance.enrich_event(&mut net);
    assert!(net.pod.is_none());

    let mut open = FileOpenEvent {
        pid: 5,
        mntns: MountNsId(7),
        path: "/etc/nginx/nginx.conf".into(),
        flags: 0,
        container: None,
    };
    instance.enrich_event(&mut open);
    assert_eq!(open.container.map(|c| c.pod_name), Some("web".to_string()));

    let stats = instance.enrichment_stats().expect("enrichment enabled");
    assert_eq!(stats.resolved(), 2);
    assert_eq!(stats.unresolved(), 1);
    let _ = instance.close().await;
}

#[tokio::test]
async fn filter_request_alone_registers_without_attaching() {
    let registry = Arc::new(ContainerCollection::new());
    let mut ctx = RunContext::new();
    let _ = ctx.set_var(VAR_CONFIG, ContextValue::Config(KubetraceConfig::default()));
    let _ = ctx.set_var(
        VAR_MNTNS_FILTER_MAP,
        ContextValue::FilterRequest(FilterRequest::default()),
    );
    let mut instance = start_run(&registry, &mut ctx, &[]).await;

    assert!(ctx.get_filter(VAR_MNTNS_FILTER_MAP).is_some());
    assert_eq!(registry.tracer_count(), 1);
    assert_eq!(registry.subscriber_count(), 0);
    let _ = instance.close().await;
    assert_eq!(registry.tracer_count(), 0);
}

// ── Containers data source ───────────────────────────────────────────

#[tokio::test]
async fn containers_are_published_independently_of_attachment() {
    let registry = Arc::new(ContainerCollection::new());
    let _ = registry.add_container(container("c1", "web", 5, 1)).await;

    let attacher = Arc::new(RecordingAttacher::default());
    let mut ctx = run_context(
        InstrumentationHandle::new("trace")
            .with_attacher(Arc::clone(&attacher) as Arc<dyn ContainerAttacher>),
    );
    let config = KubetraceConfig {
        enable_containers_datasource: true,
        ..KubetraceConfig::default()
    };
    let (sink, mut records) = ChannelSink::new();
    let _ = ctx.set_var(VAR_CONFIG, ContextValue::Config(config));
    let _ = ctx.set_var(VAR_CONTAINERS_SINK, ContextValue::Sink(Arc::new(sink)));
    let mut instance = start_run(&registry, &mut ctx, &[]).await;

    let first = records.recv().await.expect("snapshot record");
    assert_eq!(first.kind, RecordKind::Existing);
    assert_eq!(first.container_id.as_str(), "c1");

    drop(records);
    let _ = registry.add_container(container("c2", "web", 6, 2)).await;
    eventually("c2 attached", || attacher.count("attach", "c2") == 1).await;

    let _ = instance.close().await;
    assert_eq!(registry.subscriber_count(), 0);
}
