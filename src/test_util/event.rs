use std::sync::{Arc, Mutex};
use crate::events::{EventSink, ProtocolEvent};

#[derive(Debug, Default, Clone)]
pub struct TrackingEventSink {
    tracker: Arc<Mutex<Vec<ProtocolEvent>>>,
}

impl TrackingEventSink {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn events(&self) -> Vec<ProtocolEvent> {
        self.lock().clone()
    }

    pub fn count(&self, predicate: impl Fn(&ProtocolEvent) -> bool) -> usize {
        self.lock().iter()
            .filter(|e| predicate(e))
            .count()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    pub fn assert_event_recorded(&self, event: &ProtocolEvent) {
        let events = self.lock();
        if !events.contains(event) {
            panic!("expected event {:?}, recorded were {:?}", event, *events);
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<ProtocolEvent>> {
        self.tracker.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl EventSink for TrackingEventSink {
    fn on_event(&self, event: ProtocolEvent) {
        self.lock().push(event);
    }
}
