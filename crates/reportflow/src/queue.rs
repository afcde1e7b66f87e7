//! The handoff queue between discovery and processing.
//!
//! A strict FIFO channel of discovered-file notifications, the single
//! concurrency boundary in the pipeline. The watcher is the only producer,
//! the processor the only consumer. A bounded queue makes `put` block when
//! full, which is the backpressure that slows discovery down to match a
//! slow processor.

use reportflow_protocol::ReportKind;
use std::path::PathBuf;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, SyncSender, TryRecvError};
use std::time::Duration;

/// A discovered report file, handed from watcher to processor. Ownership
/// moves through the queue; each notification has exactly one consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportNotification {
    pub kind: ReportKind,
    pub file: PathBuf,
}

enum TxInner {
    Bounded(SyncSender<ReportNotification>),
    Unbounded(Sender<ReportNotification>),
}

/// Producer half. `put` blocks while a bounded queue is full.
pub struct NotificationSender {
    inner: TxInner,
}

impl NotificationSender {
    /// Enqueue a notification. `Err` means the processor is gone, which only
    /// happens when the pipeline is being torn down.
    pub fn put(&self, notification: ReportNotification) -> Result<(), ReportNotification> {
        match &self.inner {
            TxInner::Bounded(tx) => tx.send(notification).map_err(|e| e.0),
            TxInner::Unbounded(tx) => tx.send(notification).map_err(|e| e.0),
        }
    }
}

/// What a poll observed.
#[derive(Debug)]
pub enum Poll {
    Item(ReportNotification),
    /// Nothing available before the timeout; not an error.
    Empty,
    /// All senders dropped: the watcher has finished its final scan and no
    /// further notifications can ever arrive.
    Disconnected,
}

/// Consumer half.
pub struct NotificationReceiver {
    rx: Receiver<ReportNotification>,
}

impl NotificationReceiver {
    /// Bounded wait; yields regularly so the caller can observe its stop
    /// flag.
    pub fn poll_timeout(&self, timeout: Duration) -> Poll {
        match self.rx.recv_timeout(timeout) {
            Ok(item) => Poll::Item(item),
            Err(RecvTimeoutError::Timeout) => Poll::Empty,
            Err(RecvTimeoutError::Disconnected) => Poll::Disconnected,
        }
    }

    /// Non-blocking drain step for shutdown.
    pub fn try_poll(&self) -> Poll {
        match self.rx.try_recv() {
            Ok(item) => Poll::Item(item),
            Err(TryRecvError::Empty) => Poll::Empty,
            Err(TryRecvError::Disconnected) => Poll::Disconnected,
        }
    }

    /// Block until the next notification or sender disconnect. Used after
    /// the stop signal: the watcher still owes its guaranteed final scan,
    /// and dropping its sender is the "nothing more is coming" signal.
    pub fn recv(&self) -> Option<ReportNotification> {
        self.rx.recv().ok()
    }
}

/// Build the watcher→processor handoff queue. `capacity: None` gives an
/// unbounded queue (no backpressure).
pub fn handoff_queue(capacity: Option<usize>) -> (NotificationSender, NotificationReceiver) {
    match capacity {
        Some(bound) => {
            let (tx, rx) = mpsc::sync_channel(bound);
            (
                NotificationSender {
                    inner: TxInner::Bounded(tx),
                },
                NotificationReceiver { rx },
            )
        }
        None => {
            let (tx, rx) = mpsc::channel();
            (
                NotificationSender {
                    inner: TxInner::Unbounded(tx),
                },
                NotificationReceiver { rx },
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn notification(name: &str) -> ReportNotification {
        ReportNotification {
            kind: ReportKind::Junit,
            file: Path::new(name).to_path_buf(),
        }
    }

    #[test]
    fn preserves_fifo_order() {
        let (tx, rx) = handoff_queue(Some(8));
        tx.put(notification("a.xml")).unwrap();
        tx.put(notification("b.xml")).unwrap();

        let Poll::Item(first) = rx.poll_timeout(Duration::from_millis(10)) else {
            panic!("expected an item");
        };
        let Poll::Item(second) = rx.poll_timeout(Duration::from_millis(10)) else {
            panic!("expected an item");
        };
        assert_eq!(first.file, Path::new("a.xml"));
        assert_eq!(second.file, Path::new("b.xml"));
    }

    #[test]
    fn poll_times_out_without_items() {
        let (_tx, rx) = handoff_queue(Some(1));
        assert!(matches!(
            rx.poll_timeout(Duration::from_millis(5)),
            Poll::Empty
        ));
    }

    #[test]
    fn disconnect_is_distinguishable() {
        let (tx, rx) = handoff_queue(Some(1));
        tx.put(notification("a.xml")).unwrap();
        drop(tx);
        assert!(matches!(rx.try_poll(), Poll::Item(_)));
        assert!(matches!(rx.try_poll(), Poll::Disconnected));
        assert!(rx.recv().is_none());
    }

    #[test]
    fn bounded_put_blocks_until_consumed() {
        let (tx, rx) = handoff_queue(Some(1));
        tx.put(notification("a.xml")).unwrap();

        let producer = std::thread::spawn(move || {
            // Queue is full; this put parks until the consumer drains one.
            tx.put(notification("b.xml")).unwrap();
        });
        std::thread::sleep(Duration::from_millis(30));
        assert!(!producer.is_finished());

        assert!(matches!(rx.poll_timeout(Duration::from_millis(100)), Poll::Item(_)));
        producer.join().unwrap();
        assert!(matches!(rx.poll_timeout(Duration::from_millis(100)), Poll::Item(_)));
    }
}
