//! Owned agent context shared by the drivers, handles and built-in receivers.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use parking_lot::RwLock;

use crate::bucket::{BucketRegistry, PublishSummary};
use crate::config::AgentConfig;
use crate::connector::MessageRouter;
use crate::source::MonitorData;

use super::config_connector::ConfigurationConnector;

/// Callback receiving `headless` archive requests.
pub type ArchiveHook = Arc<dyn Fn(&str) + Send + Sync>;

pub(crate) struct AgentContext {
    pub(crate) config: AgentConfig,
    pub(crate) registry: OnceLock<Arc<BucketRegistry>>,
    pub(crate) router: MessageRouter,
    pub(crate) configuration: Arc<ConfigurationConnector>,
    pub(crate) properties: RwLock<BTreeMap<String, String>>,
    pub(crate) running: AtomicBool,
    pub(crate) update_now: AtomicBool,
    pub(crate) archive_hook: RwLock<Option<ArchiveHook>>,
}

impl AgentContext {
    pub(crate) fn new(config: AgentConfig) -> Self {
        let router = MessageRouter::with_dispatch_interval(config.router.dispatch_interval);
        let properties = config.properties.clone();
        Self {
            config,
            registry: OnceLock::new(),
            router,
            configuration: Arc::new(ConfigurationConnector::new()),
            properties: RwLock::new(properties),
            running: AtomicBool::new(false),
            update_now: AtomicBool::new(false),
            archive_hook: RwLock::new(None),
        }
    }

    pub(crate) fn add_data(&self, data: &MonitorData) -> bool {
        match self.registry.get() {
            Some(registry) => registry.route(data).is_ok(),
            None => {
                tracing::warn!(
                    provider_id = data.provider_id,
                    source_id = data.source_id,
                    "Data pushed before buckets were created"
                );
                false
            }
        }
    }

    pub(crate) fn publish(&self) -> PublishSummary {
        self.registry
            .get()
            .map(|r| r.publish_all(&self.router))
            .unwrap_or_default()
    }

    pub(crate) fn republish(&self, prefix: &str) -> PublishSummary {
        self.registry
            .get()
            .map(|r| r.republish_all(prefix, &self.router))
            .unwrap_or_default()
    }

    pub(crate) fn immediate_update(&self) {
        self.update_now.store(true, Ordering::Release);
    }

    pub(crate) fn bucket_ids(&self) -> Vec<String> {
        self.registry
            .get()
            .map(|r| r.unique_ids())
            .unwrap_or_default()
    }

    pub(crate) fn config_for(&self, source: &str) -> String {
        self.configuration.config(source).unwrap_or_default()
    }

    pub(crate) fn property(&self, key: &str) -> Option<String> {
        self.properties.read().get(key).cloned()
    }

    pub(crate) fn archive(&self, request: &str) {
        let hook = self.archive_hook.read().clone();
        match hook {
            Some(hook) => hook(request),
            None => tracing::info!(request = %request, "Archive requested but no hook registered"),
        }
    }
}
