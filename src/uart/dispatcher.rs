// Routes framed lines to registered consumers
//
// Consumers register under a unique name with optional originator/type
// filters. Dispatch order is registration order; a consumer re-registered
// under the same name keeps its slot.

use serde::Serialize;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, error, warn};

use super::error::{LinkError, Result};
use super::message::{KEEPALIVE_ACK, MessageType, Originator, WireMessage};
use super::transport::LineWriter;

/// Capability of receiving dispatched wire messages
pub trait MessageConsumer: Send + Sync {
    /// Handle one message. Runs on the read loop, so it must not block.
    fn receive(&self, message: &WireMessage<'_>) -> Result<()>;
}

struct Registration {
    name: String,
    consumer: Arc<dyn MessageConsumer>,
    originator: Option<Originator>,
    message_type: Option<MessageType>,
}

impl Registration {
    fn matches(&self, message: &WireMessage<'_>) -> bool {
        self.originator.is_none_or(|o| message.is_from(o))
            && self.message_type.is_none_or(|t| message.is_type(t))
    }
}

/// Counters for dispatched traffic
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DispatchStats {
    pub dispatched: u64,
    pub malformed: u64,
    pub consumer_failures: u64,
}

#[derive(Default)]
struct Counters {
    dispatched: AtomicU64,
    malformed: AtomicU64,
    consumer_failures: AtomicU64,
}

pub struct Dispatcher {
    registry: RwLock<Vec<Registration>>,
    writer: Arc<dyn LineWriter>,
    counters: Counters,
}

impl Dispatcher {
    /// `writer` is where keepalive acknowledgments go
    pub fn new(writer: Arc<dyn LineWriter>) -> Self {
        Self {
            registry: RwLock::new(Vec::new()),
            writer,
            counters: Counters::default(),
        }
    }

    /// Register (or replace) a consumer under `name`
    pub fn register(
        &self,
        name: &str,
        consumer: Arc<dyn MessageConsumer>,
        originator: Option<Originator>,
        message_type: Option<MessageType>,
    ) {
        let registration = Registration {
            name: name.to_string(),
            consumer,
            originator,
            message_type,
        };

        let mut registry = self.registry.write().unwrap_or_else(PoisonError::into_inner);
        match registry.iter_mut().find(|r| r.name == name) {
            Some(existing) => *existing = registration,
            None => registry.push(registration),
        }
        debug!(
            "Registered consumer {} (originator={:?}, type={:?})",
            name, originator, message_type
        );
    }

    /// Remove a consumer; unknown names are ignored
    pub fn unregister(&self, name: &str) {
        let mut registry = self.registry.write().unwrap_or_else(PoisonError::into_inner);
        registry.retain(|r| r.name != name);
    }

    pub fn consumer_names(&self) -> Vec<String> {
        let registry = self.registry.read().unwrap_or_else(PoisonError::into_inner);
        registry.iter().map(|r| r.name.clone()).collect()
    }

    /// Parse a line and hand it to every matching consumer.
    ///
    /// Malformed lines are logged and dropped. Keepalive probes are answered
    /// before any consumer runs. Returns the number of consumers invoked.
    pub fn dispatch(&self, line: &str) -> usize {
        let message = match WireMessage::parse(line) {
            Ok(message) => message,
            Err(e) => {
                self.counters.malformed.fetch_add(1, Ordering::Relaxed);
                warn!("Dropping line: {}", e);
                return 0;
            }
        };
        self.counters.dispatched.fetch_add(1, Ordering::Relaxed);

        if message.is_from(Originator::Keepalive) {
            self.writer.send(KEEPALIVE_ACK);
        }

        // Snapshot the matching consumers so none runs under the registry lock
        let targets: Vec<(String, Arc<dyn MessageConsumer>)> = {
            let registry = self.registry.read().unwrap_or_else(PoisonError::into_inner);
            registry
                .iter()
                .filter(|r| r.matches(&message))
                .map(|r| (r.name.clone(), Arc::clone(&r.consumer)))
                .collect()
        };

        for (name, consumer) in &targets {
            match catch_unwind(AssertUnwindSafe(|| consumer.receive(&message))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => self.record_failure(name, &e),
                Err(_) => {
                    self.counters.consumer_failures.fetch_add(1, Ordering::Relaxed);
                    error!("Consumer {} panicked on {:?}", name, line);
                }
            }
        }

        targets.len()
    }

    fn record_failure(&self, name: &str, e: &LinkError) {
        self.counters.consumer_failures.fetch_add(1, Ordering::Relaxed);
        warn!("Consumer {} rejected message: {}", name, e);
    }

    pub fn stats(&self) -> DispatchStats {
        DispatchStats {
            dispatched: self.counters.dispatched.load(Ordering::Relaxed),
            malformed: self.counters.malformed.load(Ordering::Relaxed),
            consumer_failures: self.counters.consumer_failures.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::uart::testing::RecordingWriter;
    use std::sync::Mutex;

    /// Remembers (originator, type, payload) of every message
    #[derive(Default)]
    struct Probe {
        seen: Mutex<Vec<(String, String, Vec<String>)>>,
    }

    impl Probe {
        fn count(&self) -> usize {
            self.seen.lock().unwrap().len()
        }
    }

    impl MessageConsumer for Probe {
        fn receive(&self, message: &WireMessage<'_>) -> Result<()> {
            self.seen.lock().unwrap().push((
                message.originator.to_string(),
                message.message_type.to_string(),
                message.payload.iter().map(|f| f.to_string()).collect(),
            ));
            Ok(())
        }
    }

    struct Failing;

    impl MessageConsumer for Failing {
        fn receive(&self, message: &WireMessage<'_>) -> Result<()> {
            Err(LinkError::malformed(message.originator, "always fails"))
        }
    }

    struct Panicking;

    impl MessageConsumer for Panicking {
        fn receive(&self, _message: &WireMessage<'_>) -> Result<()> {
            panic!("consumer bug");
        }
    }

    /// Appends its tag to a shared log, to observe dispatch order
    struct Tagged {
        tag: &'static str,
        log: Arc<Mutex<Vec<&'static str>>>,
    }

    impl MessageConsumer for Tagged {
        fn receive(&self, _message: &WireMessage<'_>) -> Result<()> {
            self.log.lock().unwrap().push(self.tag);
            Ok(())
        }
    }

    fn dispatcher() -> (Arc<RecordingWriter>, Dispatcher) {
        let writer = Arc::new(RecordingWriter::default());
        let dispatcher = Dispatcher::new(writer.clone());
        (writer, dispatcher)
    }

    #[test]
    fn test_filtered_and_unfiltered_consumers() {
        let (_, dispatcher) = dispatcher();
        let motor = Arc::new(Probe::default());
        let all = Arc::new(Probe::default());
        dispatcher.register(
            "motor",
            motor.clone(),
            Some(Originator::Motor),
            Some(MessageType::Status),
        );
        dispatcher.register("all", all.clone(), None, None);

        assert_eq!(dispatcher.dispatch("M:S:1:2"), 2);
        assert_eq!(motor.count(), 1);
        assert_eq!(all.count(), 1);

        assert_eq!(dispatcher.dispatch("B:S:7"), 1);
        assert_eq!(motor.count(), 1);
        assert_eq!(all.count(), 2);

        let seen = all.seen.lock().unwrap();
        assert_eq!(seen[1], ("B".to_string(), "S".to_string(), vec!["7".to_string()]));
    }

    #[test]
    fn test_type_filter_only() {
        let (_, dispatcher) = dispatcher();
        let status = Arc::new(Probe::default());
        dispatcher.register("status", status.clone(), None, Some(MessageType::Status));

        dispatcher.dispatch("B:S:12.1");
        dispatcher.dispatch("M:X:1");
        assert_eq!(status.count(), 1);
    }

    #[test]
    fn test_keepalive_always_acknowledged() {
        let (writer, dispatcher) = dispatcher();
        assert_eq!(dispatcher.dispatch("K:PING"), 0);
        assert_eq!(writer.lines(), vec![KEEPALIVE_ACK]);

        // a motor-only consumer does not change anything for keepalives
        let motor = Arc::new(Probe::default());
        dispatcher.register("motor", motor.clone(), Some(Originator::Motor), None);
        dispatcher.dispatch("K:1:2");
        assert_eq!(writer.lines(), vec![KEEPALIVE_ACK, KEEPALIVE_ACK]);
        assert_eq!(motor.count(), 0);

        // and an unfiltered one still sees the probe
        let all = Arc::new(Probe::default());
        dispatcher.register("all", all.clone(), None, None);
        dispatcher.dispatch("K:PING");
        assert_eq!(writer.lines().len(), 3);
        assert_eq!(all.count(), 1);
    }

    #[test]
    fn test_malformed_line_dropped() {
        let (writer, dispatcher) = dispatcher();
        let all = Arc::new(Probe::default());
        dispatcher.register("all", all.clone(), None, None);

        assert_eq!(dispatcher.dispatch("M"), 0);
        assert_eq!(dispatcher.dispatch("K"), 0);
        assert_eq!(dispatcher.dispatch(""), 0);
        assert_eq!(all.count(), 0);
        assert!(writer.lines().is_empty());

        let stats = dispatcher.stats();
        assert_eq!(stats.malformed, 3);
        assert_eq!(stats.dispatched, 0);
    }

    #[test]
    fn test_failing_consumers_are_isolated() {
        let (_, dispatcher) = dispatcher();
        let probe = Arc::new(Probe::default());
        dispatcher.register("failing", Arc::new(Failing), None, None);
        dispatcher.register("panicking", Arc::new(Panicking), None, None);
        dispatcher.register("probe", probe.clone(), None, None);

        assert_eq!(dispatcher.dispatch("M:S:1"), 3);
        assert_eq!(probe.count(), 1);
        assert_eq!(dispatcher.stats().consumer_failures, 2);

        // the dispatcher keeps working after a panic
        dispatcher.dispatch("M:S:2");
        assert_eq!(probe.count(), 2);
    }

    #[test]
    fn test_reregister_replaces_in_place() {
        let (_, dispatcher) = dispatcher();
        let log = Arc::new(Mutex::new(Vec::new()));
        let tagged = |tag| Arc::new(Tagged { tag, log: log.clone() });

        dispatcher.register("a", tagged("a1"), None, None);
        dispatcher.register("b", tagged("b"), None, None);
        dispatcher.register("a", tagged("a2"), None, None);
        assert_eq!(dispatcher.consumer_names(), vec!["a", "b"]);

        dispatcher.dispatch("M:S");
        assert_eq!(*log.lock().unwrap(), vec!["a2", "b"]);
    }

    #[test]
    fn test_unregister() {
        let (_, dispatcher) = dispatcher();
        let probe = Arc::new(Probe::default());
        dispatcher.register("probe", probe.clone(), None, None);
        dispatcher.unregister("probe");
        dispatcher.unregister("never-registered");

        assert_eq!(dispatcher.dispatch("M:S:1"), 0);
        assert_eq!(probe.count(), 0);
        assert!(dispatcher.consumer_names().is_empty());
    }
}
