//! Entry point for raw events coming off the administrative session.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::warn;

use super::bus::EventBus;
use super::event::AmiEvent;
use super::tracer::EventTracer;

/// Handle a client pushes normalized events into.
///
/// Each event is first appended to the attached tracer (if any), then
/// published on the bus. Both happen synchronously on the caller's task.
#[derive(Debug, Clone)]
pub struct EventSink {
    inner: Arc<SinkInner>,
}

#[derive(Debug)]
struct SinkInner {
    bus: Arc<EventBus>,
    tracer: Mutex<Option<EventTracer>>,
}

impl EventSink {
    /// Create a sink publishing onto `bus`.
    pub fn new(bus: Arc<EventBus>) -> Self {
        Self {
            inner: Arc::new(SinkInner {
                bus,
                tracer: Mutex::new(None),
            }),
        }
    }

    /// The bus events are published on.
    #[must_use]
    pub fn bus(&self) -> &Arc<EventBus> {
        &self.inner.bus
    }

    /// Start tracing every dispatched event.
    pub fn attach_tracer(&self, tracer: EventTracer) {
        *self.inner.tracer.lock() = Some(tracer);
    }

    /// Stop tracing and hand back the tracer for finalization.
    pub fn detach_tracer(&self) -> Option<EventTracer> {
        self.inner.tracer.lock().take()
    }

    /// Trace and publish one event. Returns the number of bus listeners invoked.
    ///
    /// Trace write failures are logged; they never block delivery.
    pub fn dispatch(&self, event: &AmiEvent) -> usize {
        if let Some(tracer) = self.inner.tracer.lock().as_mut()
            && let Err(e) = tracer.append(event)
        {
            warn!(error = %e, "Failed to trace AMI event");
        }
        self.inner.bus.publish(event)
    }
}
