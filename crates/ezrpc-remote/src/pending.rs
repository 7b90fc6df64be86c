//! Correlation of outgoing requests with their responses.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard};
use std::task::{Context, Poll};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::Sleep;

use crate::envelope::Id;
use crate::error::{Result, RpcError};

type Slot = oneshot::Sender<Result<Value>>;

/// Pending id to completion slot.
///
/// Every transition (register, resolve, cancel, close) happens under one
/// mutex, so whichever of response, timeout, or close removes an entry first
/// is the only one that completes it.
#[derive(Debug, Default)]
pub(crate) struct PendingTable {
    inner: Mutex<TableInner>,
}

#[derive(Debug, Default)]
struct TableInner {
    entries: HashMap<Id, Slot>,
    closed: bool,
}

impl PendingTable {
    fn lock(&self) -> MutexGuard<'_, TableInner> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Add an entry. Fails once the table has been closed.
    pub(crate) fn register(&self, id: Id) -> Result<oneshot::Receiver<Result<Value>>> {
        let mut inner = self.lock();
        if inner.closed {
            return Err(RpcError::ConnectionClosed);
        }
        let (tx, rx) = oneshot::channel();
        inner.entries.insert(id, tx);
        Ok(rx)
    }

    /// Complete the entry for `id`. Returns false for unknown ids.
    pub(crate) fn resolve(&self, id: &Id, outcome: Result<Value>) -> bool {
        let mut inner = self.lock();
        match inner.entries.remove(id) {
            Some(slot) => {
                // The receiver may already be gone; the entry is consumed either way.
                let _ = slot.send(outcome);
                true
            }
            None => false,
        }
    }

    /// Remove the entry for `id` without completing it.
    pub(crate) fn cancel(&self, id: &Id) -> bool {
        self.lock().entries.remove(id).is_some()
    }

    /// Fail every entry with `ConnectionClosed` and refuse new ones.
    pub(crate) fn close_all(&self) -> usize {
        let mut inner = self.lock();
        inner.closed = true;
        let drained: Vec<Slot> = inner.entries.drain().map(|(_, slot)| slot).collect();
        let count = drained.len();
        for slot in drained {
            let _ = slot.send(Err(RpcError::ConnectionClosed));
        }
        count
    }

    pub(crate) fn len(&self) -> usize {
        self.lock().entries.len()
    }
}

/// Completion handle for one outgoing request.
///
/// Resolves exactly once, with the first of: the matching response, the
/// deadline, or connection close. Dropping it before then removes the
/// pending entry, so a late response is discarded as unknown.
#[must_use = "a PendingCall does nothing unless awaited"]
pub struct PendingCall {
    id: Id,
    rx: oneshot::Receiver<Result<Value>>,
    deadline: Option<(Duration, Pin<Box<Sleep>>)>,
    table: Arc<PendingTable>,
    done: bool,
}

impl PendingCall {
    pub(crate) fn new(
        id: Id,
        rx: oneshot::Receiver<Result<Value>>,
        timeout: Option<Duration>,
        table: Arc<PendingTable>,
    ) -> Self {
        Self {
            id,
            rx,
            deadline: timeout.map(|after| (after, Box::pin(tokio::time::sleep(after)))),
            table,
            done: false,
        }
    }

    /// The id this request was sent with.
    pub fn id(&self) -> &Id {
        &self.id
    }

    /// Run `callback` with the outcome once the call completes.
    pub fn on_complete<F>(self, callback: F) -> JoinHandle<()>
    where
        F: FnOnce(Result<Value>) + Send + 'static,
    {
        tokio::spawn(async move { callback(self.await) })
    }
}

impl Future for PendingCall {
    type Output = Result<Value>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        if this.done {
            return Poll::Ready(Err(RpcError::ConnectionClosed));
        }

        if let Poll::Ready(outcome) = Pin::new(&mut this.rx).poll(cx) {
            this.done = true;
            return Poll::Ready(outcome.unwrap_or(Err(RpcError::ConnectionClosed)));
        }

        if let Some((after, sleep)) = this.deadline.as_mut() {
            if sleep.as_mut().poll(cx).is_ready() {
                this.done = true;
                if this.table.cancel(&this.id) {
                    return Poll::Ready(Err(RpcError::Timeout(*after)));
                }
                // Lost the race: the outcome is already in the channel.
                return Poll::Ready(
                    this.rx
                        .try_recv()
                        .unwrap_or(Err(RpcError::ConnectionClosed)),
                );
            }
        }

        Poll::Pending
    }
}

impl Drop for PendingCall {
    fn drop(&mut self) {
        if !self.done {
            self.table.cancel(&self.id);
        }
    }
}

impl std::fmt::Debug for PendingCall {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingCall")
            .field("id", &self.id)
            .field("timeout", &self.deadline.as_ref().map(|(after, _)| after))
            .field("done", &self.done)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn call(table: &Arc<PendingTable>, id: i64, timeout: Option<Duration>) -> PendingCall {
        let rx = table.register(Id::from(id)).unwrap();
        PendingCall::new(Id::from(id), rx, timeout, Arc::clone(table))
    }

    #[tokio::test]
    async fn resolves_with_response() {
        let table = Arc::new(PendingTable::default());
        let pending = call(&table, 1, None);

        assert!(table.resolve(&Id::from(1), Ok(json!("pong"))));
        assert_eq!(pending.await.unwrap(), json!("pong"));
        assert_eq!(table.len(), 0);
    }

    #[tokio::test]
    async fn second_resolution_is_a_noop() {
        let table = Arc::new(PendingTable::default());
        let pending = call(&table, 1, None);

        assert!(table.resolve(&Id::from(1), Ok(json!(1))));
        assert!(!table.resolve(&Id::from(1), Ok(json!(2))));
        assert_eq!(table.close_all(), 0);
        assert_eq!(pending.await.unwrap(), json!(1));
    }

    #[tokio::test]
    async fn unknown_id_does_not_disturb_others() {
        let table = Arc::new(PendingTable::default());
        let pending = call(&table, 1, None);

        assert!(!table.resolve(&Id::from(99), Ok(json!(0))));
        assert_eq!(table.len(), 1);
        table.resolve(&Id::from(1), Ok(json!("ok")));
        assert_eq!(pending.await.unwrap(), json!("ok"));
    }

    #[tokio::test]
    async fn times_out_and_removes_entry() {
        let table = Arc::new(PendingTable::default());
        let pending = call(&table, 1, Some(Duration::from_millis(50)));

        let err = pending.await.unwrap_err();
        assert!(matches!(err, RpcError::Timeout(d) if d == Duration::from_millis(50)));
        assert_eq!(table.len(), 0);
        assert!(!table.resolve(&Id::from(1), Ok(json!("late"))));
    }

    #[tokio::test]
    async fn response_before_deadline_wins() {
        let table = Arc::new(PendingTable::default());
        let pending = call(&table, 1, Some(Duration::from_millis(50)));

        table.resolve(&Id::from(1), Ok(json!(true)));
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(pending.await.unwrap(), json!(true));
    }

    #[tokio::test]
    async fn close_fails_every_entry_and_refuses_new_ones() {
        let table = Arc::new(PendingTable::default());
        let calls: Vec<_> = (1..=3).map(|id| call(&table, id, None)).collect();

        assert_eq!(table.close_all(), 3);
        for pending in calls {
            assert!(matches!(pending.await, Err(RpcError::ConnectionClosed)));
        }
        assert!(matches!(
            table.register(Id::from(4)),
            Err(RpcError::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn dropping_the_handle_cancels_the_entry() {
        let table = Arc::new(PendingTable::default());
        let pending = call(&table, 1, None);
        assert_eq!(table.len(), 1);

        drop(pending);
        assert_eq!(table.len(), 0);
    }

    #[tokio::test]
    async fn on_complete_runs_callback() {
        let table = Arc::new(PendingTable::default());
        let pending = call(&table, 7, None);
        let (tx, rx) = oneshot::channel();

        let handle = pending.on_complete(move |outcome| {
            let _ = tx.send(outcome.map_err(|err| err.to_string()));
        });
        table.resolve(&Id::from(7), Ok(json!({"done": true})));

        handle.await.unwrap();
        assert_eq!(rx.await.unwrap(), Ok(json!({"done": true})));
    }
}
