//! Message router fanning data out to connectors and messages in to receivers.

use std::collections::VecDeque;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use bytes::Bytes;
use parking_lot::{Mutex, RwLock};

use crate::bucket::{BucketSink, PersistentHistory};
use crate::source::Semaphore;

use super::error::{ConnectorError, RouterError};
use super::traits::{Connector, Receiver};

// =============================================================================
// Constants
// =============================================================================

/// Delay between inbound dispatch passes (1 second).
pub const DEFAULT_DISPATCH_INTERVAL: Duration = Duration::from_secs(1);

// =============================================================================
// Reports
// =============================================================================

/// An inbound message waiting for dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedMessage {
    pub id: String,
    pub data: Bytes,
}

/// One connector's failure within a fan-out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SinkFailure {
    /// Connector id.
    pub connector: String,
    pub error: ConnectorError,
}

/// Per-connector outcome of a fan-out call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FanOutReport {
    /// Connectors that succeeded.
    pub succeeded: usize,
    /// Connectors that failed, in registration order.
    pub failures: Vec<SinkFailure>,
}

impl FanOutReport {
    /// A report of `count` successful sends and no failures.
    pub fn delivered(count: usize) -> Self {
        Self {
            succeeded: count,
            failures: Vec::new(),
        }
    }

    /// Returns `true` if no connector failed.
    pub fn is_ok(&self) -> bool {
        self.failures.is_empty()
    }

    /// Number of connectors the call reached.
    pub fn attempted(&self) -> usize {
        self.succeeded + self.failures.len()
    }
}

// =============================================================================
// Shared Inbound State
// =============================================================================

struct Inbound {
    running: AtomicBool,
    queue: Mutex<VecDeque<ReceivedMessage>>,
    receivers: RwLock<Vec<Arc<dyn Receiver>>>,
    // Serializes queued and synchronous delivery
    dispatch_lock: Mutex<()>,
    wake: Semaphore,
}

impl Inbound {
    fn enqueue(&self, id: &str, data: &[u8]) {
        if !self.running.load(Ordering::Acquire) {
            tracing::debug!(id = %id, "Router not running, inbound message dropped");
            return;
        }
        self.queue.lock().push_back(ReceivedMessage {
            id: id.to_string(),
            data: Bytes::copy_from_slice(data),
        });
    }

    fn deliver(&self, messages: &[ReceivedMessage]) {
        let _dispatch = self.dispatch_lock.lock();
        let receivers = self.receivers.read().clone();
        for message in messages {
            for receiver in &receivers {
                let outcome = catch_unwind(AssertUnwindSafe(|| {
                    receiver.receive(&message.id, &message.data)
                }));
                if let Err(payload) = outcome {
                    tracing::warn!(id = %message.id, panic = %panic_message(payload.as_ref()),
                        "Receiver panicked");
                }
            }
        }
    }

    /// Deliver everything queued so far. Returns the number of messages.
    fn drain(&self) -> usize {
        let batch: Vec<ReceivedMessage> = self.queue.lock().drain(..).collect();
        if !batch.is_empty() {
            self.deliver(&batch);
            tracing::debug!(messages = batch.len(), "Inbound messages dispatched");
        }
        batch.len()
    }
}

/// Handle given to connectors for inbound traffic; enqueues only.
struct InboundHandle(Arc<Inbound>);

impl Receiver for InboundHandle {
    fn receive(&self, id: &str, data: &[u8]) {
        self.0.enqueue(id, data);
    }
}

// =============================================================================
// Router
// =============================================================================

/// Fans outbound data to connectors and inbound messages to receivers.
///
/// The outbound path takes a send lock; the inbound path uses its own queue
/// lock and dispatch lock, so a slow connector never stalls inbound dispatch.
pub struct MessageRouter {
    connectors: RwLock<Vec<Arc<dyn Connector>>>,
    send_lock: Mutex<()>,
    inbound: Arc<Inbound>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
    dispatch_interval: Duration,
}

impl MessageRouter {
    /// Create a stopped router with the default dispatch interval.
    pub fn new() -> Self {
        Self::with_dispatch_interval(DEFAULT_DISPATCH_INTERVAL)
    }

    /// Create a stopped router with a custom dispatch interval.
    pub fn with_dispatch_interval(dispatch_interval: Duration) -> Self {
        Self {
            connectors: RwLock::new(Vec::new()),
            send_lock: Mutex::new(()),
            inbound: Arc::new(Inbound {
                running: AtomicBool::new(false),
                queue: Mutex::new(VecDeque::new()),
                receivers: RwLock::new(Vec::new()),
                dispatch_lock: Mutex::new(()),
                wake: Semaphore::binary(),
            }),
            dispatcher: Mutex::new(None),
            dispatch_interval,
        }
    }

    // -------------------------------------------------------------------------
    // Registration
    // -------------------------------------------------------------------------

    /// Register a connector. Returns `false` if its id is already taken.
    pub fn add_connector(&self, connector: Arc<dyn Connector>) -> bool {
        let mut connectors = self.connectors.write();
        if connectors.iter().any(|c| c.id() == connector.id()) {
            tracing::warn!(connector = %connector.id(), "Connector already registered");
            return false;
        }
        tracing::debug!(connector = %connector.id(), "Connector added");
        connectors.push(connector);
        true
    }

    /// Unregister the connector with `id`.
    pub fn remove_connector(&self, id: &str) -> Option<Arc<dyn Connector>> {
        let mut connectors = self.connectors.write();
        let index = connectors.iter().position(|c| c.id() == id)?;
        Some(connectors.remove(index))
    }

    pub fn remove_all_connectors(&self) {
        self.connectors.write().clear();
    }

    /// Look up a connector by id.
    pub fn connector(&self, id: &str) -> Option<Arc<dyn Connector>> {
        self.connectors.read().iter().find(|c| c.id() == id).cloned()
    }

    /// Registered connector ids in order.
    pub fn connector_ids(&self) -> Vec<String> {
        self.connectors.read().iter().map(|c| c.id().to_string()).collect()
    }

    /// Register a receiver. Returns `false` if it is already registered.
    pub fn add_receiver(&self, receiver: Arc<dyn Receiver>) -> bool {
        let mut receivers = self.inbound.receivers.write();
        if receivers.iter().any(|r| same_receiver(r, &receiver)) {
            return false;
        }
        receivers.push(receiver);
        true
    }

    /// Unregister a receiver. Returns `false` if it was not registered.
    pub fn remove_receiver(&self, receiver: &Arc<dyn Receiver>) -> bool {
        let mut receivers = self.inbound.receivers.write();
        let before = receivers.len();
        receivers.retain(|r| !same_receiver(r, receiver));
        receivers.len() != before
    }

    pub fn remove_all_receivers(&self) {
        self.inbound.receivers.write().clear();
    }

    pub fn receiver_count(&self) -> usize {
        self.inbound.receivers.read().len()
    }

    /// Receiver that queues messages into this router.
    ///
    /// Connectors get this through [`Connector::register_receiver`].
    pub fn inbound_handle(&self) -> Arc<dyn Receiver> {
        Arc::new(InboundHandle(Arc::clone(&self.inbound)))
    }

    // -------------------------------------------------------------------------
    // Outbound
    // -------------------------------------------------------------------------

    /// Send `data` on `topic` to every connector.
    ///
    /// Returns an empty report while the router is stopped.
    pub fn send_message(&self, topic: &str, data: &[u8]) -> FanOutReport {
        if !self.is_running() {
            return FanOutReport::default();
        }
        let _send = self.send_lock.lock();
        self.fan_out("send", |c| c.send(topic, data))
    }

    /// Send a bucket batch to every connector through
    /// [`Connector::send_published`].
    pub fn publish_message(
        &self,
        topic: &str,
        data: &[u8],
        history: &PersistentHistory<'_>,
    ) -> FanOutReport {
        if !self.is_running() {
            return FanOutReport::default();
        }
        let _send = self.send_lock.lock();
        self.fan_out("send", |c| c.send_published(topic, data, history))
    }

    fn fan_out(
        &self,
        operation: &str,
        call: impl Fn(&dyn Connector) -> Result<(), ConnectorError>,
    ) -> FanOutReport {
        let connectors = self.connectors.read().clone();
        let mut report = FanOutReport::default();

        for connector in &connectors {
            let outcome = catch_unwind(AssertUnwindSafe(|| call(connector.as_ref())))
                .unwrap_or_else(|payload| {
                    Err(ConnectorError::Panicked(panic_message(payload.as_ref())))
                });
            match outcome {
                Ok(()) => report.succeeded += 1,
                Err(error) => {
                    tracing::warn!(connector = %connector.id(), operation, error = %error,
                        "Connector call failed");
                    report.failures.push(SinkFailure {
                        connector: connector.id().to_string(),
                        error,
                    });
                }
            }
        }
        report
    }

    // -------------------------------------------------------------------------
    // Inbound
    // -------------------------------------------------------------------------

    /// Queue a message for the dispatch thread. Dropped while stopped.
    pub fn receive_message(&self, id: &str, data: &[u8]) {
        self.inbound.enqueue(id, data);
    }

    /// Deliver a message to every receiver on the calling thread.
    ///
    /// Shares the dispatch lock with the dispatch thread, so receivers are
    /// never called concurrently. Messages still queued may be delivered
    /// before or after this one.
    pub fn process_message(&self, id: &str, data: &[u8]) {
        self.inbound.deliver(&[ReceivedMessage {
            id: id.to_string(),
            data: Bytes::copy_from_slice(data),
        }]);
    }

    /// Messages waiting for dispatch.
    pub fn pending(&self) -> usize {
        self.inbound.queue.lock().len()
    }

    // -------------------------------------------------------------------------
    // Lifecycle
    // -------------------------------------------------------------------------

    /// Spawn the dispatch thread and start every connector.
    ///
    /// A second call while running is a no-op returning an empty report.
    ///
    /// # Errors
    /// Returns `RouterError::Spawn` if the dispatch thread cannot be created;
    /// the router stays stopped and no connector is started.
    pub fn start(&self) -> Result<FanOutReport, RouterError> {
        if self.inbound.running.swap(true, Ordering::AcqRel) {
            return Ok(FanOutReport::default());
        }

        let inbound = Arc::clone(&self.inbound);
        let interval = self.dispatch_interval;
        let handle = thread::Builder::new()
            .name("router-dispatch".to_string())
            .spawn(move || dispatch_loop(inbound, interval))
            .inspect_err(|_| self.inbound.running.store(false, Ordering::Release))?;
        *self.dispatcher.lock() = Some(handle);

        let report = self.fan_out("start", |c| c.start());
        tracing::info!(connectors = report.attempted(), failed = report.failures.len(),
            "Message router started");
        Ok(report)
    }

    /// Stop every connector and the dispatch thread.
    ///
    /// Messages still queued are discarded. A no-op while stopped.
    pub fn stop(&self) -> FanOutReport {
        if !self.inbound.running.swap(false, Ordering::AcqRel) {
            return FanOutReport::default();
        }
        self.inbound.wake.signal();

        let report = self.fan_out("stop", |c| c.stop());

        if let Some(handle) = self.dispatcher.lock().take()
            && handle.join().is_err()
        {
            tracing::warn!("Dispatch thread panicked");
        }

        let discarded = {
            let mut queue = self.inbound.queue.lock();
            let n = queue.len();
            queue.clear();
            n
        };
        tracing::info!(discarded, "Message router stopped");
        report
    }

    pub fn is_running(&self) -> bool {
        self.inbound.running.load(Ordering::Acquire)
    }
}

impl Default for MessageRouter {
    fn default() -> Self {
        Self::new()
    }
}

impl BucketSink for MessageRouter {
    fn send(&self, topic: &str, data: &[u8], history: &PersistentHistory<'_>) -> FanOutReport {
        self.publish_message(topic, data, history)
    }
}

impl std::fmt::Debug for MessageRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageRouter")
            .field("connectors", &self.connector_ids())
            .field("receivers", &self.receiver_count())
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

impl Drop for MessageRouter {
    fn drop(&mut self) {
        // Fallback if stop() was never called
        if self.inbound.running.swap(false, Ordering::AcqRel) {
            self.inbound.wake.signal();
        }
    }
}

fn dispatch_loop(inbound: Arc<Inbound>, interval: Duration) {
    tracing::debug!("Dispatch thread started");
    while inbound.running.load(Ordering::Acquire) {
        inbound.drain();
        inbound.wake.wait(interval);
    }
    tracing::debug!("Dispatch thread exited");
}

fn same_receiver(a: &Arc<dyn Receiver>, b: &Arc<dyn Receiver>) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::bucket::{BucketRegistry, DataBucket};
    use crate::source::MonitorData;
    use std::sync::atomic::AtomicUsize;
    use std::time::Instant;

    pub(crate) struct TestConnector {
        id: String,
        fail: bool,
        pub sent: Mutex<Vec<(String, Vec<u8>)>>,
        pub started: AtomicUsize,
        pub stopped: AtomicUsize,
        pub inbound: Mutex<Option<Arc<dyn Receiver>>>,
    }

    impl TestConnector {
        pub(crate) fn new(id: &str) -> Self {
            Self {
                id: id.to_string(),
                fail: false,
                sent: Mutex::new(Vec::new()),
                started: AtomicUsize::new(0),
                stopped: AtomicUsize::new(0),
                inbound: Mutex::new(None),
            }
        }

        pub(crate) fn failing(id: &str) -> Self {
            Self {
                fail: true,
                ..Self::new(id)
            }
        }

        pub(crate) fn topics(&self) -> Vec<String> {
            self.sent.lock().iter().map(|(t, _)| t.clone()).collect()
        }
    }

    impl Connector for TestConnector {
        fn id(&self) -> &str {
            &self.id
        }

        fn send(&self, topic: &str, data: &[u8]) -> Result<(), ConnectorError> {
            if self.fail {
                return Err(ConnectorError::Send("broker unavailable".to_string()));
            }
            self.sent.lock().push((topic.to_string(), data.to_vec()));
            Ok(())
        }

        fn register_receiver(&self, receiver: Arc<dyn Receiver>) {
            *self.inbound.lock() = Some(receiver);
        }

        fn start(&self) -> Result<(), ConnectorError> {
            self.started.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn stop(&self) -> Result<(), ConnectorError> {
            self.stopped.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct PanickingConnector;

    impl Connector for PanickingConnector {
        fn id(&self) -> &str {
            "panicking"
        }

        fn send(&self, _topic: &str, _data: &[u8]) -> Result<(), ConnectorError> {
            panic!("socket closed");
        }
    }

    #[derive(Default)]
    pub(crate) struct TestReceiver {
        pub messages: Mutex<Vec<(String, Vec<u8>)>>,
    }

    impl Receiver for TestReceiver {
        fn receive(&self, id: &str, data: &[u8]) {
            self.messages.lock().push((id.to_string(), data.to_vec()));
        }
    }

    fn wait_for(mut condition: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        condition()
    }

    fn running_router() -> MessageRouter {
        let router = MessageRouter::with_dispatch_interval(Duration::from_millis(20));
        router.start().unwrap();
        router
    }

    #[test]
    fn test_send_without_connectors_reports_zero() {
        let router = running_router();
        let report = router.send_message("cpu", b"data");
        assert_eq!(report.succeeded, 0);
        assert!(report.is_ok());
        router.stop();
    }

    #[test]
    fn test_send_isolates_failing_connector() {
        let router = running_router();
        let good = Arc::new(TestConnector::new("good"));
        router.add_connector(Arc::new(TestConnector::failing("bad")));
        router.add_connector(good.clone());

        let report = router.send_message("cpu", b"data");
        assert_eq!(report.succeeded, 1);
        assert_eq!(report.attempted(), 2);
        assert_eq!(report.failures[0].connector, "bad");
        assert!(matches!(report.failures[0].error, ConnectorError::Send(_)));
        assert_eq!(good.topics(), vec!["cpu"]);
        router.stop();
    }

    #[test]
    fn test_send_isolates_panicking_connector() {
        let router = running_router();
        let good = Arc::new(TestConnector::new("good"));
        router.add_connector(Arc::new(PanickingConnector));
        router.add_connector(good.clone());

        let report = router.send_message("cpu", b"data");
        assert_eq!(report.succeeded, 1);
        assert_eq!(
            report.failures[0].error,
            ConnectorError::Panicked("socket closed".to_string())
        );
        assert_eq!(good.sent.lock().len(), 1);
        router.stop();
    }

    #[test]
    fn test_send_while_stopped_is_noop() {
        let router = MessageRouter::new();
        let good = Arc::new(TestConnector::new("good"));
        router.add_connector(good.clone());
        assert_eq!(router.send_message("cpu", b"x").attempted(), 0);
        assert!(good.sent.lock().is_empty());
    }

    #[test]
    fn test_add_connector_rejects_duplicate_id() {
        let router = MessageRouter::new();
        assert!(router.add_connector(Arc::new(TestConnector::new("mqtt"))));
        assert!(!router.add_connector(Arc::new(TestConnector::new("mqtt"))));
        assert!(router.connector("mqtt").is_some());
        assert!(router.remove_connector("mqtt").is_some());
        assert!(router.connector("mqtt").is_none());
    }

    #[test]
    fn test_start_is_idempotent() {
        let router = MessageRouter::with_dispatch_interval(Duration::from_millis(20));
        let connector = Arc::new(TestConnector::new("mqtt"));
        router.add_connector(connector.clone());

        assert_eq!(router.start().unwrap().succeeded, 1);
        assert_eq!(router.start().unwrap().attempted(), 0);
        assert_eq!(connector.started.load(Ordering::SeqCst), 1);

        assert_eq!(router.stop().succeeded, 1);
        assert_eq!(router.stop().attempted(), 0);
        assert_eq!(connector.stopped.load(Ordering::SeqCst), 1);
        assert!(!router.is_running());
    }

    #[test]
    fn test_queued_messages_reach_every_receiver() {
        let router = running_router();
        let first = Arc::new(TestReceiver::default());
        let second = Arc::new(TestReceiver::default());
        router.add_receiver(first.clone());
        router.add_receiver(second.clone());

        router.receive_message("history", b"client1");
        router.receive_message("headless", b"");
        assert!(wait_for(|| second.messages.lock().len() == 2));

        let ids: Vec<String> = first.messages.lock().iter().map(|(id, _)| id.clone()).collect();
        assert_eq!(ids, vec!["history", "headless"]);
        assert_eq!(router.pending(), 0);
        router.stop();
    }

    #[test]
    fn test_inbound_handle_enqueues() {
        let router = running_router();
        let receiver = Arc::new(TestReceiver::default());
        router.add_receiver(receiver.clone());
        let connector = Arc::new(TestConnector::new("mqtt"));
        connector.register_receiver(router.inbound_handle());

        let handle = connector.inbound.lock().clone().unwrap();
        handle.receive("datasources", b"client1");
        assert!(wait_for(|| receiver.messages.lock().len() == 1));
        router.stop();
    }

    #[test]
    fn test_receive_while_stopped_is_dropped() {
        let router = MessageRouter::new();
        router.receive_message("history", b"x");
        assert_eq!(router.pending(), 0);
    }

    #[test]
    fn test_process_message_is_synchronous() {
        let router = MessageRouter::new();
        let receiver = Arc::new(TestReceiver::default());
        router.add_receiver(receiver.clone());
        router.process_message("headless", b"");
        assert_eq!(receiver.messages.lock().len(), 1);
    }

    #[test]
    fn test_receiver_registration_dedupes() {
        let router = MessageRouter::new();
        let receiver: Arc<dyn Receiver> = Arc::new(TestReceiver::default());
        assert!(router.add_receiver(receiver.clone()));
        assert!(!router.add_receiver(receiver.clone()));
        assert_eq!(router.receiver_count(), 1);
        assert!(router.remove_receiver(&receiver));
        assert!(!router.remove_receiver(&receiver));
    }

    #[test]
    fn test_stop_discards_queue() {
        let router = MessageRouter::with_dispatch_interval(Duration::from_secs(60));
        router.start().unwrap();
        // Let the dispatcher finish its first (empty) pass
        thread::sleep(Duration::from_millis(20));
        router.receive_message("history", b"x");
        router.stop();
        assert_eq!(router.pending(), 0);
    }

    #[test]
    fn test_publish_message_uses_send_published() {
        let router = running_router();
        let connector = Arc::new(TestConnector::new("file"));
        router.add_connector(connector.clone());
        let report = BucketSink::send(&router, "cpu", b"batch", &PersistentHistory::none());
        assert_eq!(report, FanOutReport::delivered(1));
        assert_eq!(connector.topics(), vec!["cpu"]);
        router.stop();
    }

    #[test]
    fn test_publish_all_reports_failing_connector() {
        let router = running_router();
        let good = Arc::new(TestConnector::new("good"));
        router.add_connector(Arc::new(TestConnector::failing("bad")));
        router.add_connector(good.clone());

        let mut registry = BucketRegistry::new();
        registry.register(DataBucket::new(0, 1, 100, "cpu")).unwrap();
        registry.register(DataBucket::new(0, 2, 100, "memory")).unwrap();
        registry.route(&MonitorData::new(0, 1, "c")).unwrap();
        registry.route(&MonitorData::new(0, 2, "m")).unwrap();

        let summary = registry.publish_all(&router);
        assert_eq!(summary.batches, 2);
        assert_eq!(summary.deliveries, 2);
        assert_eq!(summary.failures.len(), 2);
        assert!(summary.failures.iter().all(|f| f.connector == "bad"));
        assert_eq!(summary.deferred, 0);
        assert_eq!(good.topics(), vec!["cpu", "memory"]);
        router.stop();
    }

    #[test]
    fn test_publish_while_stopped_keeps_entries_unpublished() {
        let router = MessageRouter::new();
        router.add_connector(Arc::new(TestConnector::new("good")));
        let bucket = DataBucket::new(0, 1, 100, "cpu");
        bucket.add(&MonitorData::new(0, 1, "x")).unwrap();

        let summary = bucket.publish(&router);
        assert_eq!(summary.batches, 0);
        assert_eq!(summary.deferred, 1);
        assert_eq!(bucket.stats().last_published, 0);
    }
}
