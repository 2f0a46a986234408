//! Agent orchestration: build, start, drive, stop.
//!
//! The agent owns every component through one shared context. Starting it
//! spawns two driver threads next to the router's dispatch thread:
//! - the pull driver ticks the [`ThreadPool`] once per scheduler tick
//! - the publish driver publishes all buckets and emits heartbeats
//!
//! Start and stop serialize on the lifecycle lock, so a stop never observes a
//! half-started agent.

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::bucket::{BucketRegistry, DataBucket, PublishSummary};
use crate::config::AgentConfig;
use crate::connector::{Connector, FanOutReport, MessageRouter, Receiver};
use crate::source::{Ingest, MonitorData, PullSource, PushSource, SourceHeader, ThreadPool};

use super::context::{AgentContext, ArchiveHook};
use super::error::AgentError;
use super::handle::AgentHandle;
use super::plugin::Plugin;
use super::system_receiver::SystemReceiver;

/// Agent version reported to plugins and in logs.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// =============================================================================
// Shutdown Signal
// =============================================================================

/// Wakes the driver threads when the agent stops.
#[derive(Default)]
struct Shutdown {
    triggered: Mutex<bool>,
    cv: Condvar,
}

impl Shutdown {
    fn trigger(&self) {
        *self.triggered.lock() = true;
        self.cv.notify_all();
    }

    fn reset(&self) {
        *self.triggered.lock() = false;
    }

    /// Sleep for `timeout` or until triggered. Returns `true` if triggered.
    fn wait(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut triggered = self.triggered.lock();
        while !*triggered {
            if self.cv.wait_until(&mut triggered, deadline).timed_out() {
                break;
            }
        }
        *triggered
    }
}

struct Lifecycle {
    drivers: Vec<JoinHandle<()>>,
    shutdown: Arc<Shutdown>,
}

// =============================================================================
// Builder
// =============================================================================

/// Builder wiring plugins, connectors and receivers into an [`Agent`].
pub struct AgentBuilder {
    config: AgentConfig,
    plugins: Vec<Arc<dyn Plugin>>,
    connectors: Vec<Arc<dyn Connector>>,
    receivers: Vec<Arc<dyn Receiver>>,
}

impl AgentBuilder {
    pub fn new(config: AgentConfig) -> Self {
        Self {
            config,
            plugins: Vec::new(),
            connectors: Vec::new(),
            receivers: Vec::new(),
        }
    }

    /// Add a plugin. Its position becomes its provider id.
    pub fn plugin(mut self, plugin: impl Plugin) -> Self {
        self.plugins.push(Arc::new(plugin));
        self
    }

    /// Add a shared plugin.
    pub fn plugin_arc(mut self, plugin: Arc<dyn Plugin>) -> Self {
        self.plugins.push(plugin);
        self
    }

    /// Add a connector registered on every start.
    pub fn connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connectors.push(connector);
        self
    }

    /// Add a receiver registered on every start.
    pub fn receiver(mut self, receiver: Arc<dyn Receiver>) -> Self {
        self.receivers.push(receiver);
        self
    }

    /// Initialize plugins, collect their sources and create one bucket per
    /// source (push sources first, then pull sources).
    ///
    /// # Errors
    /// Returns `AgentError::Config` if the configuration is invalid.
    pub fn build(self) -> Result<Agent, AgentError> {
        self.config.validate()?;

        let properties = self.config.properties_blob();
        let context = Arc::new(AgentContext::new(self.config));
        let handle = AgentHandle::new(&context);

        let mut plugins = Vec::new();
        for (index, plugin) in self.plugins.into_iter().enumerate() {
            let provider_id = u32::try_from(index).unwrap_or(u32::MAX);
            match plugin.init(&properties) {
                Ok(()) => {
                    tracing::info!(plugin = %plugin.name(), version = %plugin.version(),
                        provider_id, "Plugin initialized");
                    plugins.push((provider_id, plugin));
                }
                Err(e) => {
                    tracing::warn!(plugin = %plugin.name(), error = %e, "Plugin init failed, skipping")
                }
            }
        }

        let mut push_sources: Vec<(u32, Arc<dyn PushSource>)> = Vec::new();
        let mut pull_sources: Vec<(u32, Arc<dyn PullSource>)> = Vec::new();
        for (provider_id, plugin) in &plugins {
            for source in plugin.push_sources(*provider_id, &handle) {
                push_sources.push((*provider_id, source));
            }
            for source in plugin.pull_sources(*provider_id) {
                pull_sources.push((*provider_id, source));
            }
        }

        let mut registry = BucketRegistry::new();
        let headers = push_sources
            .iter()
            .map(|(id, s)| (*id, s.header()))
            .chain(pull_sources.iter().map(|(id, s)| (*id, s.header())));
        for (provider_id, header) in headers {
            let bucket = bucket_for(&context.config, provider_id, header);
            if let Err(e) = registry.register(bucket) {
                tracing::warn!(source = %header.name, error = %e, "Source skipped");
            }
        }
        let registry = Arc::new(registry);
        // Set exactly once, right after creation
        let _ = context.registry.set(Arc::clone(&registry));

        let mut receivers = self.receivers;
        receivers.push(Arc::new(SystemReceiver::new(handle)));

        tracing::info!(
            plugins = plugins.len(),
            push_sources = push_sources.len(),
            pull_sources = pull_sources.len(),
            buckets = registry.len(),
            "Agent initialized"
        );

        Ok(Agent {
            context,
            registry,
            plugins,
            properties,
            pull_sources: pull_sources.into_iter().map(|(_, s)| s).collect(),
            push_sources: push_sources.into_iter().map(|(_, s)| s).collect(),
            connectors: self.connectors,
            receivers,
            lifecycle: Mutex::new(Lifecycle {
                drivers: Vec::new(),
                shutdown: Arc::new(Shutdown::default()),
            }),
        })
    }
}

fn bucket_for(config: &AgentConfig, provider_id: u32, header: &SourceHeader) -> DataBucket {
    let bucket = DataBucket::new(provider_id, header.source_id, header.capacity, &header.name)
        .with_publish_size_limit(config.publisher.size_limit);
    match config.publisher.persistent_limit {
        Some(limit) => bucket.with_persistent_limit(limit.min(header.capacity)),
        None => bucket,
    }
}

// =============================================================================
// Agent
// =============================================================================

/// The agent runtime.
pub struct Agent {
    context: Arc<AgentContext>,
    registry: Arc<BucketRegistry>,
    plugins: Vec<(u32, Arc<dyn Plugin>)>,
    properties: String,
    pull_sources: Vec<Arc<dyn PullSource>>,
    push_sources: Vec<Arc<dyn PushSource>>,
    connectors: Vec<Arc<dyn Connector>>,
    receivers: Vec<Arc<dyn Receiver>>,
    lifecycle: Mutex<Lifecycle>,
}

impl Agent {
    pub fn builder(config: AgentConfig) -> AgentBuilder {
        AgentBuilder::new(config)
    }

    /// Wire receivers and connectors, start the router and plugins, then the
    /// pull workers and both drivers.
    ///
    /// # Errors
    /// Any spawn failure stops everything started so far and leaves the agent
    /// not running.
    pub fn start(&self) -> Result<(), AgentError> {
        let mut lifecycle = self.lifecycle.lock();
        if self.context.running.load(Ordering::Acquire) {
            return Err(AgentError::AlreadyRunning);
        }
        let router = &self.context.router;

        for receiver in self.receivers.iter().cloned().chain(self.plugin_receivers()) {
            router.add_receiver(receiver);
        }

        let configuration: Arc<dyn Connector> = self.context.configuration.clone();
        router.add_connector(configuration);
        for connector in self.connectors.iter().cloned().chain(self.plugin_connectors()) {
            connector.register_receiver(router.inbound_handle());
            router.add_connector(connector);
        }

        if let Err(e) = router.start() {
            router.remove_all_receivers();
            router.remove_all_connectors();
            return Err(e.into());
        }

        for (_, plugin) in &self.plugins {
            if let Err(e) = plugin.start() {
                tracing::warn!(plugin = %plugin.name(), error = %e, "Plugin start failed");
            }
        }

        self.context.running.store(true, Ordering::Release);
        lifecycle.shutdown.reset();

        if let Err(e) = self.spawn_drivers(&mut lifecycle) {
            tracing::warn!(error = %e, "Agent start failed");
            self.teardown(&mut lifecycle);
            return Err(e);
        }

        tracing::info!(version = VERSION, buckets = self.registry.len(), "Agent started");
        Ok(())
    }

    fn spawn_drivers(&self, lifecycle: &mut Lifecycle) -> Result<(), AgentError> {
        let scheduler = &self.context.config.scheduler;
        let ingest: Arc<dyn Ingest> = self.registry.clone();
        let mut pool = ThreadPool::new(ingest)
            .with_immediate_threshold(scheduler.immediate_threshold)
            .with_stop_timeout(scheduler.stop_timeout, scheduler.stop_poll);
        for source in &self.pull_sources {
            pool.add_pull_source(Arc::clone(source));
        }
        if let Err(e) = pool.start_all() {
            pool.stop_all();
            return Err(e.into());
        }

        let context = Arc::clone(&self.context);
        let shutdown = Arc::clone(&lifecycle.shutdown);
        let tick = scheduler.tick;
        let pull = thread::Builder::new()
            .name("agent-pull".to_string())
            .spawn(move || pull_driver(context, pool, shutdown, tick))
            .map_err(|source| AgentError::Spawn {
                name: "pull",
                source,
            })?;
        lifecycle.drivers.push(pull);

        let context = Arc::clone(&self.context);
        let shutdown = Arc::clone(&lifecycle.shutdown);
        let publish = thread::Builder::new()
            .name("agent-publish".to_string())
            .spawn(move || publish_driver(context, shutdown))
            .map_err(|source| AgentError::Spawn {
                name: "publish",
                source,
            })?;
        lifecycle.drivers.push(publish);
        Ok(())
    }

    /// Stop drivers, router and plugins. A no-op if not running.
    pub fn stop(&self) {
        let mut lifecycle = self.lifecycle.lock();
        if !self.context.running.load(Ordering::Acquire) {
            return;
        }
        self.teardown(&mut lifecycle);
        tracing::info!("Agent stopped");
    }

    fn teardown(&self, lifecycle: &mut Lifecycle) {
        self.context.running.store(false, Ordering::Release);
        lifecycle.shutdown.trigger();

        for driver in lifecycle.drivers.drain(..) {
            if driver.join().is_err() {
                tracing::warn!("Agent driver thread panicked");
            }
        }

        // Final pass after the pull workers are done, while connectors still run
        let summary = self.context.publish();
        if summary.entries > 0 || !summary.is_ok() {
            tracing::info!(entries = summary.entries, deferred = summary.deferred,
                failures = summary.failures.len(), "Final publish before stop");
        }

        let report = self.context.router.stop();
        if !report.is_ok() {
            tracing::warn!(failed = report.failures.len(), "Some connectors failed to stop");
        }

        for (_, plugin) in &self.plugins {
            if let Err(e) = plugin.stop() {
                tracing::warn!(plugin = %plugin.name(), error = %e, "Plugin stop failed");
            }
        }

        self.context.router.remove_all_receivers();
        self.context.router.remove_all_connectors();
    }

    fn plugin_receivers(&self) -> impl Iterator<Item = Arc<dyn Receiver>> + '_ {
        self.plugins.iter().filter_map(|(_, p)| p.receiver())
    }

    fn plugin_connectors(&self) -> impl Iterator<Item = Arc<dyn Connector>> + '_ {
        self.plugins
            .iter()
            .filter_map(|(_, p)| p.connector(&self.properties))
    }

    // -------------------------------------------------------------------------
    // Data path
    // -------------------------------------------------------------------------

    /// Store a record in its bucket. Returns `false` if it was dropped.
    pub fn add_data(&self, data: &MonitorData) -> bool {
        self.context.add_data(data)
    }

    /// Publish every bucket now.
    pub fn publish(&self) -> PublishSummary {
        self.context.publish()
    }

    /// Replay all published history under `prefix`.
    pub fn republish(&self, prefix: &str) -> PublishSummary {
        self.context.republish(prefix)
    }

    /// Pull every source whose next pull is far away on the next tick.
    pub fn immediate_update(&self) {
        self.context.immediate_update();
    }

    pub fn send_message(&self, topic: &str, data: &[u8]) -> FanOutReport {
        self.context.router.send_message(topic, data)
    }

    pub fn receive_message(&self, id: &str, data: &[u8]) {
        self.context.router.receive_message(id, data);
    }

    pub fn process_message(&self, id: &str, data: &[u8]) {
        self.context.router.process_message(id, data);
    }

    // -------------------------------------------------------------------------
    // Accessors
    // -------------------------------------------------------------------------

    pub fn is_running(&self) -> bool {
        self.context.running.load(Ordering::Acquire)
    }

    pub fn handle(&self) -> AgentHandle {
        AgentHandle::new(&self.context)
    }

    pub fn registry(&self) -> &Arc<BucketRegistry> {
        &self.registry
    }

    pub fn router(&self) -> &MessageRouter {
        &self.context.router
    }

    pub fn config(&self) -> &AgentConfig {
        &self.context.config
    }

    pub fn bucket_ids(&self) -> Vec<String> {
        self.registry.unique_ids()
    }

    /// Latest configuration string published for `source`.
    pub fn config_for(&self, source: &str) -> String {
        self.context.config_for(source)
    }

    pub fn property(&self, key: &str) -> Option<String> {
        self.context.property(key)
    }

    pub fn set_property(&self, key: impl Into<String>, value: impl Into<String>) {
        self.context.properties.write().insert(key.into(), value.into());
    }

    /// Register the callback for `headless` archive requests.
    pub fn set_archive_hook(&self, hook: impl Fn(&str) + Send + Sync + 'static) {
        let hook: ArchiveHook = Arc::new(hook);
        *self.context.archive_hook.write() = Some(hook);
    }

    pub fn version(&self) -> &'static str {
        VERSION
    }

    /// Names of initialized plugins in provider-id order.
    pub fn plugin_names(&self) -> Vec<String> {
        self.plugins.iter().map(|(_, p)| p.name().to_string()).collect()
    }

    pub fn push_source_count(&self) -> usize {
        self.push_sources.len()
    }

    pub fn pull_source_count(&self) -> usize {
        self.pull_sources.len()
    }

    /// Driver threads currently alive.
    pub fn active_threads(&self) -> usize {
        self.lifecycle
            .lock()
            .drivers
            .iter()
            .filter(|d| !d.is_finished())
            .count()
    }

    /// Bucket summary, one line per bucket.
    pub fn describe(&self) -> String {
        self.registry.describe()
    }
}

impl std::fmt::Debug for Agent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Agent")
            .field("plugins", &self.plugin_names())
            .field("buckets", &self.registry.len())
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

impl Drop for Agent {
    fn drop(&mut self) {
        // Fallback if stop() was never called
        self.stop();
    }
}

// =============================================================================
// Drivers
// =============================================================================

fn pull_driver(
    context: Arc<AgentContext>,
    mut pool: ThreadPool,
    shutdown: Arc<Shutdown>,
    tick: Duration,
) {
    tracing::debug!(workers = pool.len(), "Pull driver started");
    loop {
        pool.process(context.update_now.swap(false, Ordering::AcqRel));
        if shutdown.wait(tick) {
            break;
        }
    }
    pool.stop_all();
    tracing::debug!("Pull driver exited");
}

fn publish_driver(context: Arc<AgentContext>, shutdown: Arc<Shutdown>) {
    let publisher = &context.config.publisher;
    let mut last_heartbeat = Instant::now();
    tracing::debug!("Publish driver started");

    while !shutdown.wait(publisher.interval) {
        context.publish();
        if last_heartbeat.elapsed() >= publisher.heartbeat_interval {
            let report = context.router.send_message(&publisher.heartbeat_topic, &[]);
            tracing::debug!(connectors = report.succeeded, "Heartbeat sent");
            last_heartbeat = Instant::now();
        }
    }
    tracing::debug!("Publish driver exited");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shutdown_wait_times_out() {
        let shutdown = Shutdown::default();
        assert!(!shutdown.wait(Duration::from_millis(10)));
    }

    #[test]
    fn test_shutdown_trigger_wakes_waiter() {
        let shutdown = Arc::new(Shutdown::default());
        let waiter = {
            let shutdown = Arc::clone(&shutdown);
            thread::spawn(move || shutdown.wait(Duration::from_secs(5)))
        };
        thread::sleep(Duration::from_millis(20));
        shutdown.trigger();
        assert!(waiter.join().unwrap());

        shutdown.reset();
        assert!(!shutdown.wait(Duration::from_millis(5)));
    }

    #[test]
    fn test_bucket_for_applies_limits() {
        let mut config = AgentConfig::default();
        config.publisher.persistent_limit = Some(4096);
        let header = SourceHeader::new(2, 1024, "cpu", "cpu usage");
        let bucket = bucket_for(&config, 1, &header);
        assert_eq!(bucket.unique_id(), "cpu");
        assert_eq!(bucket.capacity(), 1024);
        assert_eq!(bucket.persistent_limit(), 1024);
        assert!(bucket.matches(1, 2));
    }
}
