//! Progress events emitted by a push.
//!
//! Warnings, change results and upload progress travel on a bounded channel
//! and are never dropped (except progress ticks when the consumer lags).
//! Instance snapshots go through a single-value slot where the latest
//! snapshot replaces any unread one, so the poller never blocks on a slow
//! consumer.

use futures::Stream;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::trace;

use crate::planner::{Change, ChangeResult};
use crate::platform::InstanceSnapshot;

/// Default capacity of the event channel.
pub const DEFAULT_EVENT_BUFFER: usize = 64;

/// An event produced while pushing.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ExecutionEvent {
    /// A platform warning, verbatim.
    Warning {
        /// Warning text.
        message: String,
    },
    /// A change was applied.
    Changed {
        /// The applied change.
        change: Change,
        /// What the platform returned.
        result: ChangeResult,
    },
    /// The full current instance set at one poll.
    InstanceSnapshot {
        /// One entry per instance.
        instances: Vec<InstanceSnapshot>,
    },
    /// Bytes of the bits archive sent so far.
    UploadProgress {
        /// Bytes sent.
        sent: u64,
        /// Archive size.
        total: u64,
    },
}

#[derive(Debug, Clone, Default)]
struct SnapshotSlot {
    seq: u64,
    instances: Vec<InstanceSnapshot>,
}

/// Producer side of the event stream.
#[derive(Debug, Clone)]
pub struct EventSender {
    events: mpsc::Sender<ExecutionEvent>,
    snapshots: Arc<watch::Sender<SnapshotSlot>>,
}

/// Consumer side of the event stream.
///
/// The stream ends once every [`EventSender`] has been dropped and all
/// buffered events have been read.
#[derive(Debug)]
pub struct EventStream {
    events: mpsc::Receiver<ExecutionEvent>,
    snapshots: watch::Receiver<SnapshotSlot>,
    last_snapshot: u64,
    events_closed: bool,
    snapshots_closed: bool,
}

/// Creates a connected sender and stream.
#[must_use]
pub fn channel(buffer: usize) -> (EventSender, EventStream) {
    let (events_tx, events_rx) = mpsc::channel(buffer.max(1));
    let (snapshots_tx, snapshots_rx) = watch::channel(SnapshotSlot::default());

    (
        EventSender {
            events: events_tx,
            snapshots: Arc::new(snapshots_tx),
        },
        EventStream {
            events: events_rx,
            snapshots: snapshots_rx,
            last_snapshot: 0,
            events_closed: false,
            snapshots_closed: false,
        },
    )
}

impl EventSender {
    /// Sends an event, waiting for buffer space.
    ///
    /// A consumer that went away is not an error; the event is discarded.
    pub async fn emit(&self, event: ExecutionEvent) {
        if self.events.send(event).await.is_err() {
            trace!("Event consumer dropped, discarding event");
        }
    }

    /// Sends a platform warning.
    pub async fn warning(&self, message: impl Into<String>) {
        self.emit(ExecutionEvent::Warning {
            message: message.into(),
        })
        .await;
    }

    /// Sends every warning in order.
    pub async fn warnings(&self, warnings: Vec<String>) {
        for message in warnings {
            self.warning(message).await;
        }
    }

    /// Sends a change result.
    pub async fn changed(&self, change: Change, result: ChangeResult) {
        self.emit(ExecutionEvent::Changed { change, result }).await;
    }

    /// Reports upload progress without waiting; the tick is dropped if the
    /// buffer is full.
    pub fn progress(&self, sent: u64, total: u64) {
        if self
            .events
            .try_send(ExecutionEvent::UploadProgress { sent, total })
            .is_err()
        {
            trace!("Dropping upload progress tick");
        }
    }

    /// Publishes an instance snapshot, replacing any unread one.
    pub fn publish_snapshot(&self, instances: Vec<InstanceSnapshot>) {
        self.snapshots.send_modify(|slot| {
            slot.seq += 1;
            slot.instances = instances;
        });
    }
}

impl EventStream {
    /// Returns the next event, or `None` once the push is over.
    pub async fn next(&mut self) -> Option<ExecutionEvent> {
        loop {
            if self.events_closed && self.snapshots_closed {
                return None;
            }

            tokio::select! {
                biased;
                event = self.events.recv(), if !self.events_closed => {
                    match event {
                        Some(event) => return Some(event),
                        None => self.events_closed = true,
                    }
                }
                changed = self.snapshots.changed(), if !self.snapshots_closed => {
                    if changed.is_err() {
                        self.snapshots_closed = true;
                    }
                    if let Some(event) = self.take_snapshot() {
                        return Some(event);
                    }
                }
            }
        }
    }

    fn take_snapshot(&mut self) -> Option<ExecutionEvent> {
        let slot = self.snapshots.borrow_and_update();
        if slot.seq == self.last_snapshot {
            return None;
        }
        self.last_snapshot = slot.seq;
        Some(ExecutionEvent::InstanceSnapshot {
            instances: slot.instances.clone(),
        })
    }

    /// Drains the stream into a vector.
    pub async fn collect(mut self) -> Vec<ExecutionEvent> {
        let mut events = Vec::new();
        while let Some(event) = self.next().await {
            events.push(event);
        }
        events
    }

    /// Converts into a [`Stream`].
    pub fn into_stream(self) -> impl Stream<Item = ExecutionEvent> {
        futures::stream::unfold(self, |mut stream| async move {
            stream.next().await.map(|event| (event, stream))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::InstanceState;
    use futures::StreamExt;

    fn snapshot(state: InstanceState) -> Vec<InstanceSnapshot> {
        vec![InstanceSnapshot {
            index: 0,
            state,
            ..InstanceSnapshot::default()
        }]
    }

    #[tokio::test]
    async fn test_events_arrive_in_order() {
        let (tx, rx) = channel(8);
        tx.warning("first").await;
        tx.warning("second").await;
        drop(tx);

        let events = rx.collect().await;
        assert_eq!(
            events,
            vec![
                ExecutionEvent::Warning {
                    message: String::from("first")
                },
                ExecutionEvent::Warning {
                    message: String::from("second")
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_latest_snapshot_wins() {
        let (tx, rx) = channel(8);
        tx.publish_snapshot(snapshot(InstanceState::Starting));
        tx.publish_snapshot(snapshot(InstanceState::Running));
        drop(tx);

        let events = rx.collect().await;
        assert_eq!(
            events,
            vec![ExecutionEvent::InstanceSnapshot {
                instances: snapshot(InstanceState::Running)
            }]
        );
    }

    #[tokio::test]
    async fn test_progress_dropped_when_full() {
        let (tx, rx) = channel(1);
        tx.progress(10, 100);
        tx.progress(20, 100);
        drop(tx);

        let events = rx.collect().await;
        assert_eq!(
            events,
            vec![ExecutionEvent::UploadProgress {
                sent: 10,
                total: 100
            }]
        );
    }

    #[tokio::test]
    async fn test_sender_survives_dropped_consumer() {
        let (tx, rx) = channel(1);
        drop(rx);
        tx.warning("nobody listening").await;
        tx.publish_snapshot(Vec::new());
    }

    #[tokio::test]
    async fn test_into_stream() {
        let (tx, rx) = channel(4);
        tx.warning("w").await;
        drop(tx);

        let events: Vec<_> = rx.into_stream().collect().await;
        assert_eq!(events.len(), 1);
    }
}
