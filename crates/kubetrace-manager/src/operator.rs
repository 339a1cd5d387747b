//! The `KubeManager` operator and its per-run instance.
//!
//! The operator holds explicit handles to the container registry and the
//! filter manager and creates one instance per run. An instance owns the
//! run's filter registration, attachment controller, enrichment adapter
//! and containers publisher, and releases all of them on close.

use std::collections::HashMap;
use std::sync::Arc;

use kubetrace_common::config::KubetraceConfig;
use kubetrace_common::constants::{
    OPERATOR_NAME, VAR_CONFIG, VAR_FILTER_BY_MNTNS, VAR_INSTRUMENTATION, VAR_MNTNS_FILTER_MAP,
};
use kubetrace_common::error::{KubetraceError, Result};
use kubetrace_common::types::{ContainerId, TracerId};
use kubetrace_ebpf::enrich::Enrichable;

use crate::activation::{self, ActivationSignals, Capabilities};
use crate::context::{ContextValue, RunContext};
use crate::enrich::{EnrichmentAdapter, EnrichmentStats};
use crate::lifecycle::AttachmentController;
use crate::params::{KubeManagerParams, PARAM_DESCS, ParamDesc};
use crate::publisher::ContainersPublisher;
use crate::registration::FilterRegistration;
use crate::registry::{ContainerRegistry, FilterManager};
use crate::selector::ContainerSelector;

/// Operator making runs container-aware.
pub struct KubeManager {
    registry: Arc<dyn ContainerRegistry>,
    filters: Arc<dyn FilterManager>,
}

impl KubeManager {
    /// Creates the operator over a registry and a filter manager.
    #[must_use]
    pub fn new(registry: Arc<dyn ContainerRegistry>, filters: Arc<dyn FilterManager>) -> Self {
        Self { registry, filters }
    }

    /// Operator name.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        OPERATOR_NAME
    }

    /// One-line description.
    #[must_use]
    pub const fn description(&self) -> &'static str {
        "KubeManager handles container/pod/namespace information using Container-Collection and TracerCollection."
    }

    /// Ordering among operators; runs before the default priority of 0.
    #[must_use]
    pub const fn priority(&self) -> i32 {
        -1
    }

    /// Parameters accepted by [`Self::instantiate`].
    #[must_use]
    pub const fn param_descs(&self) -> &'static [ParamDesc] {
        &PARAM_DESCS
    }

    /// Creates the instance for one run.
    ///
    /// Returns `Ok(None)` when nothing in `ctx` asks for container
    /// awareness; no registry resource is touched in that case.
    ///
    /// # Errors
    ///
    /// Returns an error if a parameter is invalid, if the run has no
    /// configuration, or if the containers publisher cannot be built.
    pub fn instantiate(
        &self,
        ctx: &RunContext,
        params: &HashMap<String, String>,
    ) -> Result<Option<KubeManagerInstance>> {
        let params = KubeManagerParams::from_map(params)?;
        let Some(signals) = activation::decide(ctx) else {
            tracing::debug!("container manager not needed for this run");
            return Ok(None);
        };
        let config = ctx
            .get_config(VAR_CONFIG)
            .cloned()
            .ok_or_else(|| KubetraceError::Config {
                message: format!("run context has no {VAR_CONFIG:?}"),
            })?;

        let publisher = if config.enable_containers_datasource {
            Some(ContainersPublisher::new(
                ctx,
                Arc::clone(&self.registry),
                config.event_buffer,
            )?)
        } else {
            None
        };

        let tracer = TracerId::generate();
        let selector = ContainerSelector::from_params(&params);
        tracing::info!(%tracer, ?selector, "container manager instantiated");
        Ok(Some(KubeManagerInstance {
            registration: FilterRegistration::new(tracer.clone(), Arc::clone(&self.filters)),
            tracer,
            selector,
            signals,
            config,
            registry: Arc::clone(&self.registry),
            capabilities: Capabilities::default(),
            controller: None,
            enricher: None,
            publisher,
        }))
    }
}

/// Container awareness of one run.
pub struct KubeManagerInstance {
    tracer: TracerId,
    selector: ContainerSelector,
    signals: ActivationSignals,
    config: KubetraceConfig,
    registry: Arc<dyn ContainerRegistry>,
    capabilities: Capabilities,
    registration: FilterRegistration,
    controller: Option<AttachmentController>,
    enricher: Option<EnrichmentAdapter>,
    publisher: Option<ContainersPublisher>,
}

impl KubeManagerInstance {
    /// Tracer ID of this run.
    #[must_use]
    pub const fn tracer(&self) -> &TracerId {
        &self.tracer
    }

    /// Selector built from the run's parameters.
    #[must_use]
    pub const fn selector(&self) -> &ContainerSelector {
        &self.selector
    }

    /// Capabilities resolved by [`Self::pre_start`].
    #[must_use]
    pub const fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    /// Enrichment counters, if enrichment is enabled.
    #[must_use]
    pub fn enrichment_stats(&self) -> Option<&EnrichmentStats> {
        self.enricher.as_ref().map(EnrichmentAdapter::stats)
    }

    /// Sets up filtering and attachment before the instrumentation runs.
    ///
    /// Registers the mount-namespace filter and publishes it in `ctx` when
    /// wanted, then attaches the instrumentation to the current matching
    /// containers. The filter consumer receives the filter once the run is
    /// fully set up.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns an error if the filter cannot be registered or the
    /// attachment controller cannot subscribe. Nothing stays registered
    /// and `ctx` is left as it was when this fails.
    pub fn pre_start(&mut self, ctx: &mut RunContext) -> Result<()> {
        let instrumentation = ctx.get_instrumentation(VAR_INSTRUMENTATION).cloned();
        self.capabilities = Capabilities::resolve(
            &self.signals,
            instrumentation.as_ref(),
            self.publisher.is_some(),
        );
        tracing::debug!(tracer = %self.tracer, capabilities = ?self.capabilities, "pre-start");

        let mut published = None;
        if self.capabilities.wants_filter {
            let filter = self.registration.register(&self.selector)?;
            let previous = [
                (
                    VAR_MNTNS_FILTER_MAP,
                    ctx.set_var(VAR_MNTNS_FILTER_MAP, ContextValue::Filter(filter.clone())),
                ),
                (
                    VAR_FILTER_BY_MNTNS,
                    ctx.set_var(VAR_FILTER_BY_MNTNS, ContextValue::Bool(true)),
                ),
            ];
            published = Some((filter, previous));
        }

        if let Some(attacher) = instrumentation
            .as_ref()
            .and_then(|i| i.attacher())
            .filter(|_| self.capabilities.wants_attach_detach)
        {
            let mut controller = AttachmentController::new(
                self.tracer.clone(),
                self.selector.clone(),
                Arc::clone(&self.registry),
                Arc::clone(attacher),
                self.config.event_buffer,
            );
            if let Err(e) = controller.start() {
                if let Some((_, previous)) = published {
                    for (key, value) in previous {
                        let _ = match value {
                            Some(value) => ctx.set_var(key, value),
                            None => ctx.remove_var(key),
                        };
                    }
                }
                self.registration.unregister();
                return Err(e);
            }
            self.controller = Some(controller);
        }

        let consumer = instrumentation.as_ref().and_then(|i| i.filter_consumer());
        if let Some(((filter, _), consumer)) = published.zip(consumer) {
            consumer.set_mount_ns_filter(filter);
        }

        if self.capabilities.wants_enrichment {
            self.enricher = Some(EnrichmentAdapter::new(Arc::clone(&self.registry)));
        }
        Ok(())
    }

    /// Starts publishing containers when the data source is enabled.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns an error if the publisher cannot subscribe.
    pub fn start(&mut self) -> Result<()> {
        match self.publisher.as_mut() {
            Some(publisher) => publisher.publish(&self.selector),
            None => Ok(()),
        }
    }

    /// Nothing to do when the run stops; resources are released on close.
    pub fn stop(&mut self) {
        tracing::trace!(tracer = %self.tracer, "stop");
    }

    /// Fills in container identity on a captured event.
    ///
    /// Does nothing unless the run registered data sources for enrichment.
    pub fn enrich_event(&self, event: &mut dyn Enrichable) {
        if let Some(enricher) = &self.enricher {
            enricher.enrich(event);
        }
    }

    /// Releases everything the run holds.
    ///
    /// Detaches the remaining containers, unsubscribes, unregisters the
    /// filter and stops the publisher. Safe after any failure and more
    /// than once. Returns the containers detached by this call.
    pub async fn close(&mut self) -> Vec<ContainerId> {
        let detached = match self.controller.as_mut() {
            Some(controller) => controller.teardown().await,
            None => Vec::new(),
        };
        self.registration.unregister();
        if let Some(publisher) = self.publisher.as_mut() {
            publisher.unsubscribe().await;
        }
        if !detached.is_empty() {
            tracing::info!(tracer = %self.tracer, containers = detached.len(), "detached containers");
        }
        detached
    }
}
