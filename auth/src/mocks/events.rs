//! Recording security event sink for testing.

use crate::events::{SecurityEvent, SecurityEventKind, SecurityEventSink};
use std::future::Future;
use std::sync::{Mutex, PoisonError};

/// Sink that keeps every event in memory.
#[derive(Debug, Default)]
pub struct RecordingSecurityEventSink {
    events: Mutex<Vec<SecurityEvent>>,
}

impl RecordingSecurityEventSink {
    /// Create an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// All recorded events, oldest first.
    #[must_use]
    pub fn events(&self) -> Vec<SecurityEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Kinds of all recorded events, oldest first.
    #[must_use]
    pub fn kinds(&self) -> Vec<SecurityEventKind> {
        self.events().into_iter().map(|e| e.kind).collect()
    }

    /// Number of events of `kind`.
    #[must_use]
    pub fn count(&self, kind: SecurityEventKind) -> usize {
        self.kinds().into_iter().filter(|k| *k == kind).count()
    }

    /// Forget all events.
    pub fn clear(&self) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

impl SecurityEventSink for RecordingSecurityEventSink {
    fn record(&self, event: SecurityEvent) -> impl Future<Output = ()> + Send {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
        async {}
    }
}
