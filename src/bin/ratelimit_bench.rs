// src/bin/ratelimit_bench.rs

use indicatif::{ProgressBar, ProgressStyle};
use prettytable::{row, Table};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use structopt::StructOpt;
use tokio::sync::Barrier;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};
use uuid::Uuid;

use gateway_ratelimit::config::{CacheConfig, InMemoryConfig, RateLimiterConfig, RedisConfig, SqliteConfig};
use gateway_ratelimit::policy::{Policy, PolicyResolver, RouteContext};
use gateway_ratelimit::storage::{CacheStorage, MemoryStorage, RedisStorage, SqliteStorage, StorageBackend};
use gateway_ratelimit::RateLimiter;

#[derive(Debug, Clone, StructOpt)]
#[structopt(
    name = "ratelimit_bench",
    about = "Hammers one rate limit key from many tasks and checks the admitted count"
)]
struct Opt {
    /// Storage backend to use
    #[structopt(short, long, possible_values = &["memory", "cache", "redis", "sqlite"], default_value = "memory")]
    storage: String,

    /// Redis URL (redis backend)
    #[structopt(long, default_value = "redis://localhost:6379")]
    redis_url: String,

    /// Database file (sqlite backend)
    #[structopt(long, default_value = "ratelimit-bench.db")]
    sqlite_path: String,

    /// Requests admitted per window
    #[structopt(short, long, default_value = "1000")]
    limit: u64,

    /// Window length in seconds; keep it longer than the run
    #[structopt(short, long, default_value = "600")]
    window_seconds: u64,

    /// Total requests to send
    #[structopt(short = "r", long, default_value = "5000")]
    requests: u64,

    /// Concurrent tasks, each with one request in flight
    #[structopt(short = "c", long, default_value = "64")]
    concurrency: usize,

    /// Number of runs, each on a fresh key
    #[structopt(short, long, default_value = "3")]
    iterations: usize,

    /// Verbosity level
    #[structopt(short, long, parse(from_occurrences))]
    verbose: usize,
}

#[derive(Debug)]
struct RunResult {
    sent: u64,
    admitted: u64,
    degraded: u64,
    elapsed: Duration,
    interrupted: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let opt = Opt::from_args();

    let log_level = match opt.verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::new(format!(
            "ratelimit_bench={},gateway_ratelimit={}",
            log_level, log_level
        )))
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let stop = Arc::new(AtomicBool::new(false));
    let handler_stop = Arc::clone(&stop);
    if let Err(e) = ctrlc::set_handler(move || {
        handler_stop.store(true, Ordering::SeqCst);
    }) {
        warn!("failed to set Ctrl-C handler: {}", e);
    }

    let results = match opt.storage.as_str() {
        "memory" => {
            let storage = MemoryStorage::new(InMemoryConfig::default());
            run_all(&opt, storage, &stop).await?
        }
        "cache" => {
            let storage = CacheStorage::new(CacheConfig::default());
            run_all(&opt, storage, &stop).await?
        }
        "redis" => {
            let storage = RedisStorage::new(RedisConfig::new(opt.redis_url.clone())).await?;
            run_all(&opt, storage, &stop).await?
        }
        "sqlite" => {
            let config = SqliteConfig::new(opt.sqlite_path.clone()).fit_within(RateLimiterConfig::default().timeout);
            let storage = SqliteStorage::open(config)?;
            run_all(&opt, storage, &stop).await?
        }
        other => {
            error!("Unknown storage backend: {}", other);
            return Err("Unknown storage backend".into());
        }
    };

    let consistent = report(&opt, &results);
    if !consistent {
        return Err("admitted count does not match the limit".into());
    }
    Ok(())
}

async fn run_all<S>(
    opt: &Opt,
    storage: S,
    stop: &Arc<AtomicBool>,
) -> Result<Vec<RunResult>, Box<dyn std::error::Error>>
where
    S: StorageBackend + 'static,
{
    let storage = Arc::new(storage);
    let mut results = Vec::with_capacity(opt.iterations);

    for iteration in 0..opt.iterations {
        if stop.load(Ordering::SeqCst) {
            break;
        }
        // A fresh route per run keeps runs independent on persistent backends
        let route = format!("bench-{}", Uuid::new_v4());
        let policy = Policy::requests(opt.limit, Duration::from_secs(opt.window_seconds), vec![])?;
        let resolver = PolicyResolver::new("ratelimit-bench").with_route_policy(route.clone(), policy)?;
        let limiter = Arc::new(RateLimiter::new(Arc::clone(&storage), resolver, RateLimiterConfig::default()));

        info!(iteration = iteration + 1, backend = storage.name(), "Starting run");
        let result = run_once(opt, limiter, route, Arc::clone(stop)).await;
        results.push(result);
    }

    Ok(results)
}

async fn run_once<S>(
    opt: &Opt,
    limiter: Arc<RateLimiter<S>>,
    route: String,
    stop: Arc<AtomicBool>,
) -> RunResult
where
    S: StorageBackend + 'static,
{
    let progress = ProgressBar::new(opt.requests);
    match ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({per_sec})")
    {
        Ok(style) => progress.set_style(style.progress_chars("#>-")),
        Err(e) => warn!("invalid progress template: {}", e),
    }

    let sent = Arc::new(AtomicU64::new(0));
    let admitted = Arc::new(AtomicU64::new(0));
    let degraded = Arc::new(AtomicU64::new(0));
    let workers = opt.concurrency.max(1);
    let barrier = Arc::new(Barrier::new(workers));

    let start = Instant::now();
    let mut handles = Vec::with_capacity(workers);
    for _ in 0..workers {
        let limiter = Arc::clone(&limiter);
        let barrier = Arc::clone(&barrier);
        let stop = Arc::clone(&stop);
        let (sent, admitted, degraded) = (Arc::clone(&sent), Arc::clone(&admitted), Arc::clone(&degraded));
        let progress = progress.clone();
        let ctx = RouteContext::new(route.clone(), "/bench");
        let total = opt.requests;

        handles.push(tokio::spawn(async move {
            barrier.wait().await;
            loop {
                if stop.load(Ordering::SeqCst) {
                    break;
                }
                // Claim a request slot before sending so the total is exact
                if sent.fetch_add(1, Ordering::SeqCst) >= total {
                    sent.fetch_sub(1, Ordering::SeqCst);
                    break;
                }
                if let Some(outcome) = limiter.evaluate(&ctx).await {
                    if outcome.admitted {
                        admitted.fetch_add(1, Ordering::SeqCst);
                    }
                    if outcome.degraded {
                        degraded.fetch_add(1, Ordering::SeqCst);
                    }
                }
                progress.inc(1);
            }
        }));
    }

    for handle in futures::future::join_all(handles).await {
        if let Err(e) = handle {
            error!("benchmark task failed: {}", e);
        }
    }
    progress.finish_and_clear();

    RunResult {
        sent: sent.load(Ordering::SeqCst),
        admitted: admitted.load(Ordering::SeqCst),
        degraded: degraded.load(Ordering::SeqCst),
        elapsed: start.elapsed(),
        interrupted: stop.load(Ordering::SeqCst),
    }
}

// Prints one row per run; false if a conclusive run admitted anything but
// min(limit, requests)
fn report(opt: &Opt, results: &[RunResult]) -> bool {
    let mut table = Table::new();
    table.add_row(row!["Run", "Backend", "Sent", "Admitted", "Expected", "Degraded", "Req/s", "Consistent"]);

    let mut all_consistent = true;
    for (i, result) in results.iter().enumerate() {
        let expected = opt.limit.min(result.sent);
        let consistent = result.admitted == expected;
        // Interrupted runs and fail-open admissions prove nothing either way
        let conclusive = !result.interrupted && result.degraded == 0;
        all_consistent &= consistent || !conclusive;

        let throughput = result.sent as f64 / result.elapsed.as_secs_f64().max(f64::EPSILON);
        table.add_row(row![
            i + 1,
            opt.storage,
            result.sent,
            result.admitted,
            expected,
            result.degraded,
            format!("{:.0}", throughput),
            if result.interrupted {
                "interrupted"
            } else if result.degraded > 0 {
                "degraded"
            } else if consistent {
                "yes"
            } else {
                "NO"
            }
        ]);
    }

    table.printstd();
    all_consistent
}
