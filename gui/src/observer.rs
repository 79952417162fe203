//! Change notifications of the projects list.
//!
//! A view bound to the list implements [`ListObserver`] and receives the
//! classic observable-list protocol: every insertion and removal is
//! bracketed by a `begin_*`/`end_*` pair carrying the affected row range,
//! and the list mutates its storage strictly in between.

use tokio::sync::mpsc;

/// Receives list change notifications. All methods default to no-ops.
///
/// Methods are called on the thread that mutates the list, while the item
/// storage is unlocked, so implementations may read the list back. They must
/// not add or remove items from inside a notification.
pub trait ListObserver: Send + Sync {
    fn begin_insert_rows(&self, _first: usize, _last: usize) {}

    fn end_insert_rows(&self) {}

    fn begin_remove_rows(&self, _first: usize, _last: usize) {}

    fn end_remove_rows(&self) {}

    /// Asks the view to focus the project at `index`.
    fn go_to_project(&self, _index: usize) {}
}

/// Observer that ignores everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl ListObserver for NoopObserver {}

/// One list notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListEvent {
    BeginInsertRows { first: usize, last: usize },
    EndInsertRows,
    BeginRemoveRows { first: usize, last: usize },
    EndRemoveRows,
    GoToProject { index: usize },
}

/// Forwards notifications over an unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelObserver {
    tx: mpsc::UnboundedSender<ListEvent>,
}

impl ChannelObserver {
    /// Creates an observer and the receiving end of its channel.
    #[must_use]
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ListEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn send(&self, event: ListEvent) {
        // A dropped receiver just means nobody is listening anymore.
        let _ = self.tx.send(event);
    }
}

impl ListObserver for ChannelObserver {
    fn begin_insert_rows(&self, first: usize, last: usize) {
        self.send(ListEvent::BeginInsertRows { first, last });
    }

    fn end_insert_rows(&self) {
        self.send(ListEvent::EndInsertRows);
    }

    fn begin_remove_rows(&self, first: usize, last: usize) {
        self.send(ListEvent::BeginRemoveRows { first, last });
    }

    fn end_remove_rows(&self) {
        self.send(ListEvent::EndRemoveRows);
    }

    fn go_to_project(&self, index: usize) {
        self.send(ListEvent::GoToProject { index });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_observer_forwards_in_order() {
        let (observer, mut rx) = ChannelObserver::new();

        observer.begin_insert_rows(2, 2);
        observer.end_insert_rows();
        observer.go_to_project(0);

        assert_eq!(
            rx.try_recv().unwrap(),
            ListEvent::BeginInsertRows { first: 2, last: 2 }
        );
        assert_eq!(rx.try_recv().unwrap(), ListEvent::EndInsertRows);
        assert_eq!(rx.try_recv().unwrap(), ListEvent::GoToProject { index: 0 });
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn closed_channel_is_ignored() {
        let (observer, rx) = ChannelObserver::new();
        drop(rx);
        observer.end_remove_rows();
    }
}
