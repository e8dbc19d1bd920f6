//! Typed progress events of an extraction run
//!
//! The pipeline reports ordered checkpoints to an injected [`ProgressSink`];
//! the CLI drains them from an mpsc channel into a progress bar.

use serde::Serialize;
use std::sync::mpsc::Sender;

/// A checkpoint of the extraction pipeline
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProgressEvent {
    pub percent: u8,
    pub message: String,
}

impl ProgressEvent {
    pub fn new(percent: u8, message: impl Into<String>) -> Self {
        Self {
            percent: percent.min(100),
            message: message.into(),
        }
    }
}

/// Receiver of progress events
pub trait ProgressSink {
    fn report(&self, event: ProgressEvent);
}

/// Discards every event
impl ProgressSink for () {
    fn report(&self, _event: ProgressEvent) {}
}

/// A dropped receiver is not an error; the run continues silently
impl ProgressSink for Sender<ProgressEvent> {
    fn report(&self, event: ProgressEvent) {
        let _ = self.send(event);
    }
}

impl<F> ProgressSink for F
where
    F: Fn(ProgressEvent),
{
    fn report(&self, event: ProgressEvent) {
        self(event)
    }
}
