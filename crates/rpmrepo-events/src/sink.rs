use std::sync::{
    mpsc::{self, Receiver, Sender},
    Mutex, PoisonError,
};

use crate::RepoEvent;

/// Consumer of pipeline events.
///
/// Invocations run concurrently, so sinks must tolerate interleaved events
/// from different operations.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: RepoEvent);
}

/// Forwards events through an mpsc channel.
pub struct ChannelSink {
    sender: Mutex<Sender<RepoEvent>>,
}

impl ChannelSink {
    pub fn new() -> (Self, Receiver<RepoEvent>) {
        let (sender, receiver) = mpsc::channel();
        (
            Self {
                sender: Mutex::new(sender),
            },
            receiver,
        )
    }
}

impl EventSink for ChannelSink {
    fn emit(&self, event: RepoEvent) {
        let sender = self.sender.lock().unwrap_or_else(PoisonError::into_inner);
        // A dropped receiver just means nobody is listening anymore.
        let _ = sender.send(event);
    }
}

/// Discards every event.
pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&self, _event: RepoEvent) {}
}

/// Keeps every event in memory for later inspection.
#[derive(Default)]
pub struct CollectorSink {
    events: Mutex<Vec<RepoEvent>>,
}

impl CollectorSink {
    pub fn events(&self) -> Vec<RepoEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn len(&self) -> usize {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

impl EventSink for CollectorSink {
    fn emit(&self, event: RepoEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
    }
}
