use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use ratewarden::config::{LoggingConfig, RateWardenConfig};
use ratewarden::http::{Request, Response};
use ratewarden::ratelimit::headers::{
    RETRY_AFTER, X_RATELIMIT_LIMIT, X_RATELIMIT_REMAINING, X_RATELIMIT_RESET,
};
use ratewarden::ratelimit::RateLimiterBackend;

#[derive(Parser, Debug)]
#[command(name = "ratewarden", version, about = "Sliding-window rate limit policy engine")]
struct Cli {
    /// Path to the rate limit configuration file
    #[arg(short, long, global = true, default_value = "ratewarden.yaml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Load and validate the configuration
    Check,

    /// Show which rule governs a path
    Route {
        /// Request path, e.g. /api/v1/items
        path: String,
    },

    /// Send requests through the limiter and print each decision
    Simulate {
        /// Request path
        #[arg(long, default_value = "/")]
        path: String,

        /// Remote address the requests come from
        #[arg(long, default_value = "127.0.0.1")]
        key: String,

        /// Request header as NAME=VALUE, may be repeated
        #[arg(long = "header", value_parser = parse_header)]
        headers: Vec<(String, String)>,

        /// Number of requests to send
        #[arg(long, default_value_t = 10)]
        count: u32,

        /// Delay between requests in milliseconds
        #[arg(long, default_value_t = 0)]
        interval_ms: u64,

        /// Print one JSON object per request
        #[arg(long)]
        json: bool,
    },
}

fn parse_header(raw: &str) -> Result<(String, String), String> {
    raw.split_once('=')
        .map(|(name, value)| (name.trim().to_string(), value.trim().to_string()))
        .filter(|(name, _)| !name.is_empty())
        .ok_or_else(|| format!("expected NAME=VALUE, got {:?}", raw))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = RateWardenConfig::from_file(&cli.config)
        .with_context(|| format!("failed to load {}", cli.config.display()))?;

    init_tracing(&config.logging);

    info!("Version: {}", env!("CARGO_PKG_VERSION"));
    info!(config = %cli.config.display(), "Configuration loaded");

    let limiter = config.build().context("invalid rate limit configuration")?;

    match cli.command {
        Command::Check => {
            println!("configuration ok");
            for endpoint in &config.endpoints {
                println!(
                    "  {} -> {} requests / {}s",
                    endpoint.pattern, endpoint.limit.max_requests, endpoint.limit.window_secs
                );
            }
            match config.global.as_ref().or(config.default.as_ref()) {
                Some(limit) => {
                    println!("  * -> {} requests / {}s", limit.max_requests, limit.window_secs)
                }
                None => println!("  unmatched paths are not rate limited"),
            }
        }
        Command::Route { path } => match limiter.rule_for(&path) {
            Some((pattern, options)) => println!(
                "{} -> {} ({} requests / {}s)",
                path,
                pattern,
                options.max_requests(),
                options.window().as_secs()
            ),
            None => println!("{} -> not rate limited", path),
        },
        Command::Simulate {
            path,
            key,
            headers,
            count,
            interval_ms,
            json,
        } => {
            let sweepers = config
                .idle_sweep_interval()
                .map(|every| limiter.spawn_idle_sweepers(every))
                .unwrap_or_default();

            let handler = |_req: Request| async { Response::ok("ok") };

            for n in 1..=count {
                let mut request = Request::new(path.as_str()).with_remote_addr(key.as_str());
                for (name, value) in &headers {
                    request = request.with_header(name.as_str(), value.as_str());
                }

                let response = limiter.handle(request, &handler).await?;
                print_response(n, &response, json)?;

                if interval_ms > 0 && n < count {
                    tokio::time::sleep(Duration::from_millis(interval_ms)).await;
                }
            }

            for sweeper in sweepers {
                sweeper.abort();
            }
        }
    }

    Ok(())
}

fn init_tracing(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&logging.level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true)
        .with_writer(std::io::stderr);

    if logging.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn print_response(n: u32, response: &Response, json: bool) -> anyhow::Result<()> {
    let header = |name: &str| response.header(name).unwrap_or("-").to_string();

    if json {
        let line = serde_json::json!({
            "request": n,
            "status": response.status(),
            "retry_after": header(RETRY_AFTER),
            "limit": header(X_RATELIMIT_LIMIT),
            "remaining": header(X_RATELIMIT_REMAINING),
            "reset": header(X_RATELIMIT_RESET),
        });
        println!("{}", serde_json::to_string(&line)?);
    } else {
        println!(
            "#{:<4} {}  limit={} remaining={} reset={} retry-after={}",
            n,
            response.status(),
            header(X_RATELIMIT_LIMIT),
            header(X_RATELIMIT_REMAINING),
            header(X_RATELIMIT_RESET),
            header(RETRY_AFTER),
        );
    }
    Ok(())
}
