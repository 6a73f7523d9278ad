use querykit::query::{
    CacheConfig, InvalidationPolicy, PollingBehavior, Query, State, StateKind, UsagePolicy,
};
use querykit::{Error, QueryEnvironment, Result};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::time::sleep;

const INTERVAL: Duration = Duration::from_secs(5);

fn environment() -> QueryEnvironment {
    QueryEnvironment::new().with_cache_config(CacheConfig::new(
        UsagePolicy::AlwaysFetch,
        InvalidationPolicy::NeverExpires,
    ))
}

/// Answers `<request>#<call number>`
fn counting(calls: Arc<AtomicUsize>) -> impl Fn(String) -> futures::future::Ready<Result<String>> + Send + Sync {
    move |request: String| {
        let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
        futures::future::ready(Ok(format!("{request}#{n}")))
    }
}

async fn polling_query(env: &QueryEnvironment, calls: Arc<AtomicUsize>) -> Query<String, String> {
    Query::builder("ticker", counting(calls))
        .polling(PollingBehavior::PollEvery(INTERVAL))
        .environment(env)
        .build()
        .await
}

#[tokio::test(start_paused = true)]
async fn test_polls_with_last_request() {
    let env = environment();
    let calls = Arc::new(AtomicUsize::new(0));
    let query = polling_query(&env, calls.clone()).await;

    // Nothing is polled before the first request
    sleep(INTERVAL * 2).await;
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert!(!query.is_polling());

    query.refetch("t".to_string()).await;
    assert!(query.is_polling());

    sleep(Duration::from_secs(16)).await;
    assert_eq!(calls.load(Ordering::SeqCst), 4);
    assert_eq!(query.state(), State::Succeeded("t#4".to_string()));
}

#[tokio::test(start_paused = true)]
async fn test_failed_poll_stops_polling_until_refetch() {
    let env = environment();
    let calls = Arc::new(AtomicUsize::new(0));
    let outage = Arc::new(AtomicBool::new(false));
    let fetcher = {
        let (calls, outage) = (calls.clone(), outage.clone());
        move |request: String| {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            futures::future::ready(if outage.load(Ordering::SeqCst) {
                Err(Error::fetch("server went away"))
            } else {
                Ok(format!("{request}#{n}"))
            })
        }
    };
    let query: Query<String, String> = Query::builder("ticker", fetcher)
        .polling(PollingBehavior::PollEvery(INTERVAL))
        .environment(&env)
        .build()
        .await;

    query.refetch("t".to_string()).await;
    outage.store(true, Ordering::SeqCst);
    sleep(Duration::from_secs(30)).await;

    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(query.state().kind(), StateKind::Failed);
    assert!(!query.is_polling());

    // A manual refetch starts polling again
    outage.store(false, Ordering::SeqCst);
    query.refetch("t".to_string()).await;
    assert!(query.is_polling());
    assert_eq!(query.state(), State::Succeeded("t#3".to_string()));

    sleep(Duration::from_secs(6)).await;
    assert_eq!(calls.load(Ordering::SeqCst), 4);
    assert_eq!(query.state(), State::Succeeded("t#4".to_string()));
    assert!(query.is_polling());
}

#[tokio::test(start_paused = true)]
async fn test_manual_refetch_restarts_timer() {
    let env = environment();
    let calls = Arc::new(AtomicUsize::new(0));
    let query = polling_query(&env, calls.clone()).await;

    query.refetch("a".to_string()).await;
    sleep(Duration::from_secs(3)).await;
    query.refetch("b".to_string()).await;

    // The first timer would have fired at 5s
    sleep(Duration::from_secs(3)).await;
    assert_eq!(calls.load(Ordering::SeqCst), 2);

    sleep(Duration::from_secs(3)).await;
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(query.state(), State::Succeeded("b#3".to_string()));
}

#[tokio::test(start_paused = true)]
async fn test_dropping_query_stops_polling() {
    let env = environment();
    let calls = Arc::new(AtomicUsize::new(0));
    let query = polling_query(&env, calls.clone()).await;

    query.refetch("t".to_string()).await;
    drop(query);

    sleep(INTERVAL * 4).await;
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(env.registry.is_empty());
}
