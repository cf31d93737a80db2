//! Data-ready event listener for hardware-synchronized acquisitions.
//!
//! The device server pushes one event per point written into the buffered
//! `MeanValues` attribute. The listener turns those events into point indices
//! (`counter - 1`) and hands the controller the newest one on demand. Error
//! events are logged and dropped: a lost notification only delays reading,
//! since the next event carries a higher counter.

use tokio::sync::mpsc::error::TryRecvError;
use tracing::{debug, error, warn};

use crate::device::{DataReadyEvent, DataReadyReceiver};

/// Queue of data-ready indices received from one subscription.
#[derive(Debug)]
pub struct DataReadyListener {
    attribute: String,
    receiver: DataReadyReceiver,
    received: u64,
    errors: u64,
}

impl DataReadyListener {
    /// Listen on `receiver` for events of `attribute`.
    pub fn new(attribute: impl Into<String>, receiver: DataReadyReceiver) -> Self {
        Self {
            attribute: attribute.into(),
            receiver,
            received: 0,
            errors: 0,
        }
    }

    /// Attribute this listener is subscribed to.
    pub fn attribute(&self) -> &str {
        &self.attribute
    }

    /// Number of successful events processed.
    pub fn received(&self) -> u64 {
        self.received
    }

    /// Number of error events processed.
    pub fn errors(&self) -> u64 {
        self.errors
    }

    /// Process every queued event and return the newest index, if any.
    ///
    /// Never blocks.
    pub fn drain_latest(&mut self) -> Option<i64> {
        let mut latest = None;
        loop {
            match self.receiver.try_recv() {
                Ok(event) => {
                    if let Some(index) = self.handle(event) {
                        latest = Some(latest.map_or(index, |l: i64| l.max(index)));
                    }
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    warn!(attribute = %self.attribute, "Data-ready subscription closed by the device");
                    break;
                }
            }
        }
        latest
    }

    fn handle(&mut self, event: DataReadyEvent) -> Option<i64> {
        match (&event.error, event.index()) {
            (None, Some(index)) => {
                self.received += 1;
                debug!(attribute = %self.attribute, index, "DataReadyEvent received");
                Some(index)
            }
            (Some(err), _) => {
                self.errors += 1;
                error!(
                    attribute = %self.attribute,
                    reason = %err.reason,
                    desc = %err.description,
                    "Event error"
                );
                None
            }
            (None, None) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;
    use tracing_test::traced_test;

    #[test]
    fn test_drain_returns_newest_index() {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut listener = DataReadyListener::new("C00_MeanValues", rx);

        assert_eq!(listener.drain_latest(), None);

        tx.send(DataReadyEvent::ready(1)).unwrap();
        tx.send(DataReadyEvent::ready(3)).unwrap();
        tx.send(DataReadyEvent::ready(2)).unwrap();
        assert_eq!(listener.drain_latest(), Some(2));
        assert_eq!(listener.received(), 3);

        // Queue is empty after draining
        assert_eq!(listener.drain_latest(), None);
    }

    #[test]
    #[traced_test]
    fn test_error_events_are_logged_not_fatal() {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut listener = DataReadyListener::new("C01_MeanValues", rx);

        tx.send(DataReadyEvent::failed("API_EventTimeout", "event channel lost"))
            .unwrap();
        tx.send(DataReadyEvent::ready(4)).unwrap();

        assert_eq!(listener.drain_latest(), Some(3));
        assert_eq!(listener.errors(), 1);
        assert!(logs_contain("Event error"));
        assert!(logs_contain("API_EventTimeout"));
    }

    #[test]
    fn test_disconnected_sender() {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut listener = DataReadyListener::new("C00_MeanValues", rx);
        tx.send(DataReadyEvent::ready(1)).unwrap();
        drop(tx);
        assert_eq!(listener.drain_latest(), Some(0));
        assert_eq!(listener.drain_latest(), None);
    }
}
