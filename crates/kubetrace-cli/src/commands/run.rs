//! `kubetrace run`: Trace the selected containers.
//!
//! Seeds an in-process registry from a containers file, instantiates the
//! container manager for a syscall tracer and keeps it running until
//! Ctrl+C. Container records go to stdout as JSON lines when the
//! containers data source is enabled.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::Args;
use kubetrace_common::config::KubetraceConfig;
use kubetrace_common::constants::{
    VAR_CONFIG, VAR_CONTAINERS_SINK, VAR_INSTRUMENTATION, VAR_MNTNS_FILTER_MAP,
    VAR_NEED_CONTAINER_EVENTS,
};
use kubetrace_common::types::Container;
use kubetrace_ebpf::instance::{ContainerAttacher, FilterConsumer, InstrumentationHandle};
use kubetrace_ebpf::tracer::{SYSCALL_PROGRAM_NAME, SyscallTracer};
use kubetrace_manager::context::{ContextValue, RunContext};
use kubetrace_manager::memory::ContainerCollection;
use kubetrace_manager::operator::KubeManager;
use kubetrace_manager::publisher::JsonLinesSink;
use kubetrace_manager::registry::{ContainerRegistry, FilterManager};

use crate::commands::filter::FilterArgs;
use crate::output;

/// Arguments for the `run` command.
#[derive(Args, Debug)]
pub struct RunArgs {
    /// Container filter flags.
    #[command(flatten)]
    pub filter: FilterArgs,

    /// JSON file listing the node's running containers.
    #[arg(long, default_value = "containers.json")]
    pub containers: PathBuf,

    /// JSON configuration file.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Publish container records to stdout, overriding the configuration.
    #[arg(long)]
    pub containers_datasource: bool,

    /// Tear down right after setup instead of waiting for Ctrl+C.
    #[arg(long)]
    pub once: bool,
}

/// Executes the `run` command.
///
/// # Errors
///
/// Returns an error if the input files cannot be read or the container
/// manager cannot be set up.
pub async fn execute(args: RunArgs) -> anyhow::Result<()> {
    let mut config = match &args.config {
        Some(path) => KubetraceConfig::load(path)?,
        None => KubetraceConfig::default(),
    };
    config.enable_containers_datasource |= args.containers_datasource;

    let registry = Arc::new(ContainerCollection::new());
    for container in load_containers(&args.containers)? {
        let _ = registry.add_container(container).await;
    }

    let tracer = Arc::new(SyscallTracer::new());
    let mut ctx = run_context(&tracer, config);
    let operator = KubeManager::new(
        Arc::clone(&registry) as Arc<dyn ContainerRegistry>,
        Arc::clone(&registry) as Arc<dyn FilterManager>,
    );
    let params: HashMap<String, String> = args.filter.to_params();
    let Some(mut instance) = operator.instantiate(&ctx, &params)? else {
        tracing::info!("no container awareness requested");
        return Ok(());
    };

    let setup = instance.pre_start(&mut ctx).and_then(|()| instance.start());
    if let Err(e) = setup {
        let _ = instance.close().await;
        return Err(e).context("setting up container manager");
    }
    tracing::info!(
        program = SYSCALL_PROGRAM_NAME,
        tracer = %instance.tracer(),
        attached = tracer.attached_pids().len(),
        "tracing started"
    );
    #[allow(clippy::print_stderr)]
    {
        eprint!(
            "{}",
            output::container_table(&registry.containers(), instance.selector())
        );
    }

    if !args.once {
        tokio::signal::ctrl_c().await.context("waiting for Ctrl+C")?;
    }

    instance.stop();
    let detached = instance.close().await;
    tracing::info!(detached = detached.len(), "tracing stopped");
    Ok(())
}

fn run_context(tracer: &Arc<SyscallTracer>, config: KubetraceConfig) -> RunContext {
    let mut ctx = RunContext::new();
    let publish = config.enable_containers_datasource;
    let _ = ctx.set_var(VAR_CONFIG, ContextValue::Config(config));
    let _ = ctx.set_var(VAR_NEED_CONTAINER_EVENTS, ContextValue::Bool(true));
    let _ = ctx.set_var(
        VAR_MNTNS_FILTER_MAP,
        ContextValue::FilterRequest(tracer.filter_request()),
    );
    let _ = ctx.set_var(
        VAR_INSTRUMENTATION,
        ContextValue::Instrumentation(
            InstrumentationHandle::new(SYSCALL_PROGRAM_NAME)
                .with_filter_consumer(Arc::clone(tracer) as Arc<dyn FilterConsumer>)
                .with_attacher(Arc::clone(tracer) as Arc<dyn ContainerAttacher>),
        ),
    );
    if publish {
        let _ = ctx.set_var(
            VAR_CONTAINERS_SINK,
            ContextValue::Sink(Arc::new(JsonLinesSink::new(std::io::stdout()))),
        );
    }
    ctx
}

/// Reads the node's containers from a JSON array.
fn load_containers(path: &Path) -> anyhow::Result<Vec<Container>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading containers from {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("parsing {}", path.display()))
}
