use super::config::STATE_CHANNEL_CAPACITY;
use super::state::State;
use futures::{Stream, StreamExt};
use std::sync::{Mutex, PoisonError};
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;

/// Dispatch boundary for a controller's observable state.
///
/// Every transition replaces the current state and broadcasts it while
/// holding one lock, so observers see transitions in exactly the order the
/// current value went through them.
#[derive(Debug)]
pub struct StateCell<T> {
    current: Mutex<State<T>>,
    tx: broadcast::Sender<State<T>>,
}

impl<T> StateCell<T>
where
    T: Clone + Send + Sync + 'static,
{
    #[must_use]
    pub fn new(initial: State<T>) -> Self {
        let (tx, _) = broadcast::channel(STATE_CHANNEL_CAPACITY);
        Self {
            current: Mutex::new(initial),
            tx,
        }
    }

    pub fn transition(&self, next: State<T>) {
        let mut current = self.current.lock().unwrap_or_else(PoisonError::into_inner);
        *current = next.clone();
        // No receivers is fine
        let _ = self.tx.send(next);
    }

    pub fn get(&self) -> State<T> {
        self.current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Transitions after this call
    pub fn updates(&self) -> broadcast::Receiver<State<T>> {
        self.tx.subscribe()
    }

    /// The current state followed by every later transition. Observers that
    /// fall behind by more than the channel capacity skip the missed states.
    pub fn subscribe(&self) -> impl Stream<Item = State<T>> + Send + 'static {
        let (current, rx) = {
            let guard = self.current.lock().unwrap_or_else(PoisonError::into_inner);
            (guard.clone(), self.tx.subscribe())
        };

        futures::stream::once(futures::future::ready(current))
            .chain(BroadcastStream::new(rx).filter_map(|update| futures::future::ready(update.ok())))
    }
}
