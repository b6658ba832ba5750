// Event Sink Port - where pipeline events go

use crate::domain::OutboundEvent;

/// Push channel towards the client that owns a run
pub trait EventSink: Send + Sync {
    fn emit(&self, event: OutboundEvent);
}

pub mod mocks {
    use super::*;
    use std::sync::Mutex;

    /// Records emitted events in order
    #[derive(Default)]
    pub struct RecordingEventSink {
        events: Mutex<Vec<OutboundEvent>>,
    }

    impl RecordingEventSink {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn events(&self) -> Vec<OutboundEvent> {
            self.events.lock().unwrap().clone()
        }

        pub fn names(&self) -> Vec<&'static str> {
            self.events.lock().unwrap().iter().map(|e| e.name()).collect()
        }
    }

    impl EventSink for RecordingEventSink {
        fn emit(&self, event: OutboundEvent) {
            self.events.lock().unwrap().push(event);
        }
    }
}
