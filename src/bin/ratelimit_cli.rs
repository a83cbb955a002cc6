// src/bin/ratelimit_cli.rs

use prettytable::{row, Table};
use std::sync::Arc;
use std::time::{Duration, Instant};
use structopt::StructOpt;
use tokio::time;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use gateway_ratelimit::config::{InMemoryConfig, RateLimitProperties, RateLimiterConfig};
use gateway_ratelimit::policy::{Discriminator, Policy, PolicyResolver, RouteContext};
use gateway_ratelimit::storage::MemoryStorage;
use gateway_ratelimit::{Clock, RateLimitOutcome, RateLimiter, SystemClock};

#[derive(Debug, StructOpt)]
#[structopt(
    name = "ratelimit_cli",
    about = "Simulates requests against gateway rate limit policies"
)]
struct Opt {
    /// Policy file; without it a single policy is built from --limit and --refresh-ms
    #[structopt(long)]
    config: Option<String>,

    /// Requests per window for the inline policy
    #[structopt(short, long, default_value = "10")]
    limit: u64,

    /// Window length in milliseconds for the inline policy
    #[structopt(long, default_value = "60000")]
    refresh_ms: u64,

    /// Split the inline policy per user
    #[structopt(long)]
    per_user: bool,

    /// Route id of the simulated requests
    #[structopt(short, long, default_value = "demo")]
    route: String,

    /// Request path
    #[structopt(short, long, default_value = "/demo")]
    path: String,

    /// HTTP method
    #[structopt(short, long, default_value = "GET")]
    method: String,

    /// Authenticated user, if any
    #[structopt(short, long)]
    user: Option<String>,

    /// Number of requests to simulate
    #[structopt(short = "n", long, default_value = "20")]
    num_requests: usize,

    /// Simulation mode
    #[structopt(long, possible_values = &["burst", "steady"], default_value = "burst")]
    simulation: String,

    /// Time between requests in milliseconds (steady mode)
    #[structopt(short = "t", long, default_value = "100")]
    request_interval_ms: u64,

    /// Upstream response time to charge after each admitted request
    #[structopt(long)]
    response_ms: Option<u64>,

    /// Verbosity level
    #[structopt(short, long, parse(from_occurrences))]
    verbose: usize,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let opt = Opt::from_args();

    let log_level = match opt.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::new(format!(
            "ratelimit_cli={},gateway_ratelimit={}",
            log_level, log_level
        )))
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let (resolver, config) = match build_resolver(&opt) {
        Ok(built) => built,
        Err(e) => {
            error!("Invalid policy setup: {}", e);
            return Err(e.into());
        }
    };

    let storage = Arc::new(MemoryStorage::new(InMemoryConfig::default()));
    let limiter = RateLimiter::new(storage, resolver, config);

    let mut ctx = RouteContext::new(opt.route.clone(), opt.path.clone()).with_method(opt.method.clone());
    if let Some(user) = &opt.user {
        ctx = ctx.with_user(user.clone());
    }

    info!(
        route = opt.route.as_str(),
        requests = opt.num_requests,
        simulation = opt.simulation.as_str(),
        "Starting simulation"
    );

    let interval = match opt.simulation.as_str() {
        "steady" => Some(Duration::from_millis(opt.request_interval_ms)),
        _ => None,
    };
    let summary = simulate(&opt, &limiter, &ctx, interval).await;
    summary.print();

    Ok(())
}

fn build_resolver(opt: &Opt) -> gateway_ratelimit::Result<(PolicyResolver, RateLimiterConfig)> {
    if let Some(path) = &opt.config {
        let props = RateLimitProperties::from_file(path)?;
        let resolver = PolicyResolver::from_properties(&props)?;
        return Ok((resolver, props.limiter));
    }

    let discriminators = if opt.per_user {
        vec![Discriminator::User]
    } else {
        Vec::new()
    };
    let policy = Policy::requests(opt.limit, Duration::from_millis(opt.refresh_ms), discriminators)?;
    let props = RateLimitProperties::default();
    let resolver = PolicyResolver::new(props.key_prefix).with_route_policy(opt.route.clone(), policy)?;
    Ok((resolver, props.limiter))
}

#[derive(Debug, Default)]
struct Summary {
    admitted: usize,
    rejected: usize,
    unlimited: usize,
    degraded: usize,
    elapsed: Duration,
    last: Option<RateLimitOutcome>,
}

impl Summary {
    fn print(&self) {
        let mut table = Table::new();
        table.add_row(row!["Metric", "Value"]);
        table.add_row(row!["Admitted", self.admitted]);
        table.add_row(row!["Rejected", self.rejected]);
        table.add_row(row!["Not limited", self.unlimited]);
        table.add_row(row!["Degraded", self.degraded]);
        table.add_row(row!["Elapsed (ms)", self.elapsed.as_millis()]);
        if let Some(last) = &self.last {
            let now = SystemClock.now_millis();
            table.add_row(row!["Last limit", last.limit]);
            table.add_row(row!["Last remaining", last.remaining]);
            table.add_row(row!["Resets in (ms)", last.reset.saturating_sub(now)]);
        }
        table.printstd();
    }
}

async fn simulate(
    opt: &Opt,
    limiter: &RateLimiter<MemoryStorage>,
    ctx: &RouteContext,
    interval: Option<Duration>,
) -> Summary {
    let mut summary = Summary::default();
    let start = Instant::now();

    for i in 0..opt.num_requests {
        let request_start = Instant::now();

        match limiter.evaluate(ctx).await {
            None => {
                summary.unlimited += 1;
                println!("Request {:>4}: not rate limited", i + 1);
            }
            Some(outcome) => {
                if outcome.admitted {
                    summary.admitted += 1;
                    if let Some(ms) = opt.response_ms {
                        limiter.record_response(ctx, Duration::from_millis(ms)).await;
                    }
                } else {
                    summary.rejected += 1;
                }
                if outcome.degraded {
                    summary.degraded += 1;
                }
                println!(
                    "Request {:>4}: {} (limit {}, remaining {})",
                    i + 1,
                    if outcome.admitted { "ADMITTED" } else { "REJECTED" },
                    outcome.limit,
                    outcome.remaining
                );
                summary.last = Some(outcome);
            }
        }

        if let Some(interval) = interval {
            let elapsed = request_start.elapsed();
            if elapsed < interval {
                time::sleep(interval - elapsed).await;
            }
        }
    }

    summary.elapsed = start.elapsed();
    summary
}
