use super::dispatch::StateCell;
use super::fetcher::Fetcher;
use super::invalidation::{InvalidationBus, Invalidator};
use super::state::State;
use crate::environment::QueryEnvironment;
use futures::Stream;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::broadcast;
use tracing::{info, warn};

/// A one-shot remote operation whose success hook can invalidate queries.
///
/// Mutations never read or write the cache and never poll. Calls to
/// `execute` on one instance are not serialized against each other.
pub struct Mutation<R, T> {
    fetcher: Arc<dyn Fetcher<R, T>>,
    state: StateCell<T>,
    invalidator: Invalidator,
}

impl<R, T> Mutation<R, T>
where
    R: Send + 'static,
    T: Clone + Send + Sync + 'static,
{
    pub fn new(fetcher: impl Fetcher<R, T> + 'static, bus: Arc<InvalidationBus>) -> Self {
        Self {
            fetcher: Arc::new(fetcher),
            state: StateCell::new(State::Idle),
            invalidator: Invalidator::new(bus),
        }
    }

    /// Publishes on the environment's bus
    pub fn with_environment(fetcher: impl Fetcher<R, T> + 'static, environment: &QueryEnvironment) -> Self {
        Self::new(fetcher, environment.bus.clone())
    }

    /// Runs the mutation. On success `on_success` receives the response and
    /// an [`Invalidator`]; on failure it is not called. Returns the final state.
    pub async fn execute<H>(&self, request: R, on_success: H) -> State<T>
    where
        H: FnOnce(&T, &Invalidator) + Send,
    {
        self.state.transition(State::Loading);
        let start = Instant::now();

        match self.fetcher.fetch(request).await {
            Ok(response) => {
                info!("✅ MUTATION SUCCESS ({:.2}s)", start.elapsed().as_secs_f64());
                self.state.transition(State::Succeeded(response.clone()));
                on_success(&response, &self.invalidator);
                State::Succeeded(response)
            }
            Err(error) => {
                warn!("❌ MUTATION FAILED ({:.2}s) - {}", start.elapsed().as_secs_f64(), error);
                let failed = State::failed(error);
                self.state.transition(failed.clone());
                failed
            }
        }
    }

    #[must_use]
    pub fn state(&self) -> State<T> {
        self.state.get()
    }

    pub fn subscribe(&self) -> impl Stream<Item = State<T>> + Send + 'static {
        self.state.subscribe()
    }

    #[must_use]
    pub fn updates(&self) -> broadcast::Receiver<State<T>> {
        self.state.updates()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{Error, Result};
    use crate::query::invalidation::InvalidationPayload;
    use crate::query::key::QueryKey;

    fn echo(request: String) -> futures::future::Ready<Result<String>> {
        futures::future::ready(if request.is_empty() {
            Err(Error::fetch("empty body"))
        } else {
            Ok(format!("saved:{request}"))
        })
    }

    #[tokio::test]
    async fn test_success_runs_hook_after_transition() {
        let bus = Arc::new(InvalidationBus::new());
        let mut listener = bus.listen::<String>(QueryKey::new("posts"));
        let mutation = Mutation::new(echo, bus.clone());
        let mut updates = mutation.updates();

        let final_state = mutation
            .execute("hello".to_string(), |response, invalidate| {
                invalidate.invalidate_with(&QueryKey::new("posts"), response.clone());
            })
            .await;

        assert_eq!(final_state, State::Succeeded("saved:hello".to_string()));
        assert_eq!(updates.recv().await.ok(), Some(State::Loading));
        assert_eq!(updates.recv().await.ok(), Some(State::Succeeded("saved:hello".to_string())));
        assert_eq!(
            listener.recv().await,
            Some(InvalidationPayload::NewData("saved:hello".to_string()))
        );
    }

    #[tokio::test]
    async fn test_failure_skips_hook() {
        let bus = Arc::new(InvalidationBus::new());
        let mutation = Mutation::new(echo, bus);
        let mut called = false;

        let final_state = mutation.execute(String::new(), |_, _| called = true).await;

        assert!(!called);
        assert!(final_state.error().is_some());
        assert!(mutation.state().error().is_some());
    }
}
