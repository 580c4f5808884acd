use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use tokio::signal;
use tokio::time::Instant;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use quotagate::config::{LoggingConfig, QuotagateConfig};
use quotagate::ratelimit::{
    guarded, Behavior, BehaviorOverride, LimiterRegistry, MultiRateLimiter, RateLimit,
    SharedRateLimiter, Tier, TokenBucket,
};
use quotagate::LimiterError;

/// Inspect and exercise in-process rate limiters.
#[derive(Debug, Parser)]
#[command(name = "quotagate", version)]
struct Cli {
    /// Path to the limiter configuration file (YAML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Validate the configuration and list its limiters
    Check,
    /// Print every limiter's status as JSON
    Status,
    /// Push requests through a limiter and report what was admitted
    Probe(ProbeArgs),
}

#[derive(Debug, Args)]
struct ProbeArgs {
    /// Name of a configured limiter
    #[arg(long, conflicts_with = "tier", required_unless_present = "tier")]
    limiter: Option<String>,

    /// Ad-hoc tier such as `10/s` or `5/2s`; repeat for several tiers
    #[arg(long)]
    tier: Vec<Tier>,

    /// Number of acquisitions to attempt
    #[arg(long, default_value_t = 10)]
    requests: u32,

    /// Tokens per acquisition
    #[arg(long, default_value_t = 1)]
    tokens: u32,

    /// Number of concurrent callers
    #[arg(long, default_value_t = 1)]
    concurrency: u32,

    /// Override the limiter's behavior (block, raise or skip)
    #[arg(long)]
    behavior: Option<Behavior>,

    /// Give up on a blocked acquisition after this many milliseconds
    #[arg(long)]
    timeout_ms: Option<u64>,
}

#[derive(Debug, Default, Clone, Copy, Serialize)]
struct Tally {
    admitted: u32,
    denied: u32,
    rate_limited: u32,
    cancelled: u32,
    failed: u32,
}

impl Tally {
    fn merge(mut self, other: Tally) -> Self {
        self.admitted += other.admitted;
        self.denied += other.denied;
        self.rate_limited += other.rate_limited;
        self.cancelled += other.cancelled;
        self.failed += other.failed;
        self
    }
}

#[derive(Debug, Serialize)]
struct ProbeSummary {
    limiter: String,
    requests: u32,
    #[serde(flatten)]
    tally: Tally,
    elapsed_ms: u128,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let (config, ()) = bootstrap(&cli, init_tracing)?;

    let registry = LimiterRegistry::from_config(&config)?;

    match cli.command {
        Command::Check => check(&config),
        Command::Status => status(&registry),
        Command::Probe(args) => probe(&registry, args).await,
    }
}

/// Load the configuration, hand its logging section to `install`, then
/// report startup through the freshly installed subscriber.
fn bootstrap<G>(
    cli: &Cli,
    install: impl FnOnce(&LoggingConfig) -> G,
) -> anyhow::Result<(QuotagateConfig, G)> {
    let config = match &cli.config {
        Some(path) => QuotagateConfig::load(path)
            .with_context(|| format!("failed to load configuration from {}", path.display()))?,
        None => QuotagateConfig::default(),
    };

    let guard = install(&config.logging);
    info!(version = env!("CARGO_PKG_VERSION"), "Starting quotagate");
    if let Some(path) = &cli.config {
        info!(
            path = %path.display(),
            limiters = config.limiters.len(),
            "Loaded limiter configuration"
        );
    }

    Ok((config, guard))
}

/// Install the global subscriber. `RUST_LOG` takes precedence over the config.
fn init_tracing(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(logging.level.as_str()));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(true);

    if logging.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn check(config: &QuotagateConfig) -> anyhow::Result<()> {
    if config.limiters.is_empty() {
        println!("no limiters configured");
        return Ok(());
    }

    for (name, limiter) in &config.limiters {
        let tiers = limiter
            .to_tiers()?
            .iter()
            .map(Tier::to_string)
            .collect::<Vec<_>>()
            .join(", ");
        println!(
            "{}: behavior={} wait_policy={:?} tiers=[{}]",
            name, limiter.behavior, limiter.wait_policy, tiers
        );
    }
    Ok(())
}

fn status(registry: &LimiterRegistry) -> anyhow::Result<()> {
    let status = registry.status();
    println!("{}", serde_json::to_string_pretty(&status)?);
    Ok(())
}

async fn probe(registry: &LimiterRegistry, args: ProbeArgs) -> anyhow::Result<()> {
    let (name, limiter) = resolve_limiter(registry, &args)?;
    let behavior = BehaviorOverride::from(args.behavior);
    let timeout = args.timeout_ms.map(Duration::from_millis);
    let concurrency = args.concurrency.max(1);

    info!(
        limiter = %name,
        requests = args.requests,
        tokens = args.tokens,
        concurrency,
        "Probing limiter"
    );

    let start = Instant::now();
    let workers = (0..concurrency).map(|worker| {
        let share = args.requests / concurrency + u32::from(worker < args.requests % concurrency);
        run_worker(worker, limiter.clone(), share, args.tokens, behavior, timeout)
    });

    let tally = tokio::select! {
        tallies = futures::future::join_all(workers) => {
            tallies.into_iter().fold(Tally::default(), Tally::merge)
        }
        _ = signal::ctrl_c() => {
            info!("Received Ctrl+C, stopping probe");
            return Ok(());
        }
    };

    let summary = ProbeSummary {
        limiter: name,
        requests: args.requests,
        tally,
        elapsed_ms: start.elapsed().as_millis(),
    };
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

fn resolve_limiter(
    registry: &LimiterRegistry,
    args: &ProbeArgs,
) -> anyhow::Result<(String, Arc<dyn RateLimit>)> {
    if let Some(name) = &args.limiter {
        let limiter = registry
            .get(name)
            .with_context(|| format!("no limiter named '{}' in the configuration", name))?;
        return Ok((name.clone(), limiter));
    }

    let default_behavior = args.behavior.unwrap_or_default();
    let name = args
        .tier
        .iter()
        .map(Tier::to_string)
        .collect::<Vec<_>>()
        .join("+");

    let limiter: Arc<dyn RateLimit> = match args.tier.as_slice() {
        [] => bail!("either --limiter or at least one --tier is required"),
        [tier] => Arc::new(SharedRateLimiter::from_bucket(TokenBucket::from_tier(
            *tier,
            default_behavior,
        ))),
        tiers => Arc::new(MultiRateLimiter::new(tiers.to_vec(), default_behavior)?),
    };
    Ok((name, limiter))
}

async fn run_worker(
    worker: u32,
    limiter: Arc<dyn RateLimit>,
    requests: u32,
    tokens: u32,
    behavior: BehaviorOverride,
    timeout: Option<Duration>,
) -> Tally {
    let mut tally = Tally::default();

    for request in 0..requests {
        let attempt = guarded(limiter.as_ref(), tokens, behavior, async {});
        let outcome = match timeout {
            Some(timeout) => tokio::time::timeout(timeout, attempt)
                .await
                .unwrap_or_else(|_| Err(LimiterError::Timeout(timeout))),
            None => attempt.await,
        };
        debug!(worker, request, ?outcome, "Probe request finished");

        match outcome {
            Ok(Some(())) => tally.admitted += 1,
            Ok(None) => tally.denied += 1,
            Err(LimiterError::RateLimitExceeded { .. }) => tally.rate_limited += 1,
            Err(e) if e.is_cancellation() => tally.cancelled += 1,
            Err(e) => {
                debug!(worker, request, error = %e, "Acquisition failed");
                tally.failed += 1;
            }
        }
    }

    tally
}
