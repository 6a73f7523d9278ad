use clap::{Parser, ValueEnum};
use futures::StreamExt;
use querykit::query::{
    CacheConfig, InvalidationPolicy, Mutation, PageNumber, PaginatedQuery, PollingBehavior, Query,
    QueryKey, StartBehavior, State, UsagePolicy,
};
use querykit::{Error, QueryEnvironment, Result};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::sleep;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Poll interval of the profile query in milliseconds
    #[arg(long, default_value_t = 500)]
    poll_ms: u64,

    /// How long cached responses stay valid
    #[arg(long, default_value_t = 60)]
    ttl_secs: u64,

    /// Number of feed pages to load
    #[arg(short, long, default_value_t = 3)]
    pages: u32,

    /// How queries use cached responses
    #[arg(long, value_enum, default_value_t = Policy::UseIfFetchFails)]
    policy: Policy,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Policy {
    UseInsteadOfFetching,
    UseAndThenFetch,
    UseIfFetchFails,
    AlwaysFetch,
}

impl From<Policy> for UsagePolicy {
    fn from(policy: Policy) -> Self {
        match policy {
            Policy::UseInsteadOfFetching => Self::UseInsteadOfFetching,
            Policy::UseAndThenFetch => Self::UseAndThenFetch,
            Policy::UseIfFetchFails => Self::UseIfFetchFails,
            Policy::AlwaysFetch => Self::AlwaysFetch,
        }
    }
}

fn describe<T: std::fmt::Debug>(state: &State<T>) -> String {
    match state {
        State::Idle => "idle".to_string(),
        State::Loading => "loading".to_string(),
        State::Succeeded(value) => format!("succeeded: {value:?}"),
        State::Failed(error) => format!("failed: {error}"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("querykit=info")),
        )
        .init();

    let args = Args::parse();
    let env = QueryEnvironment::new().with_cache_config(CacheConfig::new(
        args.policy.into(),
        InvalidationPolicy::ttl_secs(args.ttl_secs),
    ));
    QueryEnvironment::initialize(env.clone())?;

    // Simulated backend: every profile read sees a newer revision
    let revision = Arc::new(AtomicU64::new(0));
    let profile_fetcher = move |user: String| {
        let n = revision.fetch_add(1, Ordering::SeqCst);
        async move {
            sleep(Duration::from_millis(50)).await;
            Ok::<_, Error>(format!("{user}@rev{n}"))
        }
    };

    let profile_key = QueryKey::new("profile");
    let profile: Query<String, String> = Query::builder(profile_key.clone(), profile_fetcher)
        .start(StartBehavior::StartImmediately("alice".to_string()))
        .polling(PollingBehavior::PollEvery(Duration::from_millis(args.poll_ms)))
        .build()
        .await;

    let mut states = profile.subscribe();
    tokio::spawn(async move {
        while let Some(state) = states.next().await {
            info!("profile -> {}", describe(&state));
        }
    });

    sleep(Duration::from_millis(args.poll_ms * 3)).await;

    let rename = Mutation::with_environment(
        |name: String| async move { Ok::<_, Error>(name) },
        &env,
    );
    let key = profile_key.clone();
    rename
        .execute("bob".to_string(), move |name, invalidate| {
            invalidate.invalidate_with(&key, name.clone());
        })
        .await;

    sleep(Duration::from_millis(args.poll_ms)).await;

    let feed: PaginatedQuery<String, PageNumber, String> = PaginatedQuery::builder(
        "feed",
        |user: String, page: PageNumber| async move {
            Ok::<_, Error>((0..3).map(|i| format!("{user}/post-{}-{i}", page.get())).collect::<Vec<_>>())
        },
    )
    .key_adapter(|key, user: &String| key.appending(user))
    .environment(&env)
    .build()
    .await;

    feed.refetch(profile.last_request().unwrap_or_default()).await;
    for _ in 1..args.pages {
        feed.fetch_next_page().await;
    }
    info!("feed -> {} posts over {} page(s)", feed.accumulated().len(), feed.current_page().get());

    let stats = env.cache.stats().await;
    info!(
        "cache: {} entries, hit rate {:.0}%; live controllers: {:?}",
        stats.total_entries,
        stats.hit_rate() * 100.0,
        env.registry.keys()
    );

    Ok(())
}
