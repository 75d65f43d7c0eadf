//! Server configuration and CLI argument parsing
//!
//! Every option can be given on the command line or through an environment
//! variable with the `THROTTLEGATE_` prefix.
//!
//! # Configuration Priority
//!
//! 1. CLI arguments (highest priority)
//! 2. Environment variables
//! 3. Default values (lowest priority)
//!
//! # Example Usage
//!
//! ```bash
//! # Tighter sustained limit, more downstream concurrency
//! throttlegate --max-requests 5 --queue-max-concurrency 10
//!
//! # Same via environment variables
//! export THROTTLEGATE_MAX_REQUESTS=5
//! export THROTTLEGATE_QUEUE_MAX_CONCURRENCY=10
//! throttlegate
//! ```

use crate::queue::{QueueConfig, TimeoutPolicy};
use anyhow::{Result, anyhow};
use clap::Parser;
use std::time::Duration;
use throttlegate::{CacheConfig, CircuitBreakerConfig, SlidingWindowConfig, TokenBucketConfig};

/// Main configuration structure for the server
#[derive(Debug, Clone)]
pub struct Config {
    pub http: HttpConfig,
    pub sliding_window: SlidingWindowConfig,
    pub token_bucket: TokenBucketConfig,
    pub cache: CacheConfig,
    pub breaker: CircuitBreakerConfig,
    pub queue: QueueConfig,
    /// How often limiters and caches are swept
    pub sweep_interval: Duration,
    /// Logging level (error, warn, info, debug, trace)
    pub log_level: String,
}

#[derive(Debug, Clone)]
pub struct HttpConfig {
    /// Host address to bind to (e.g., "0.0.0.0")
    pub host: String,
    pub port: u16,
}

/// Command-line arguments for the server
///
/// All arguments can also be set via environment variables with the
/// THROTTLEGATE_ prefix. CLI arguments take precedence over environment variables.
#[derive(Parser, Debug)]
#[command(
    name = "throttlegate",
    about = "Request governance server",
    long_about = "Admission control, caching, circuit breaking and bounded-concurrency scheduling in front of an expensive backend.\n\nEnvironment variables with THROTTLEGATE_ prefix are supported. CLI arguments take precedence over environment variables."
)]
pub struct Args {
    // HTTP Transport
    #[arg(
        long,
        value_name = "HOST",
        help = "HTTP host",
        default_value = "127.0.0.1",
        env = "THROTTLEGATE_HTTP_HOST"
    )]
    pub http_host: String,
    #[arg(
        long,
        value_name = "PORT",
        help = "HTTP port",
        default_value_t = 8080,
        env = "THROTTLEGATE_HTTP_PORT"
    )]
    pub http_port: u16,

    // Sliding window
    #[arg(
        long,
        value_name = "MS",
        help = "Length of one sliding-window bucket in milliseconds",
        default_value_t = 60_000,
        env = "THROTTLEGATE_WINDOW_SIZE_MS"
    )]
    pub window_size_ms: u64,
    #[arg(
        long,
        value_name = "N",
        help = "Requests allowed per identifier across the whole horizon",
        default_value_t = 10,
        env = "THROTTLEGATE_MAX_REQUESTS"
    )]
    pub max_requests: u64,
    #[arg(
        long,
        value_name = "N",
        help = "Number of buckets in the horizon",
        default_value_t = 5,
        env = "THROTTLEGATE_WINDOW_COUNT"
    )]
    pub window_count: u32,
    #[arg(
        long,
        value_name = "MS",
        help = "Block duration after exceeding the limit in milliseconds",
        default_value_t = 60_000,
        env = "THROTTLEGATE_BLOCK_DURATION_MS"
    )]
    pub block_duration_ms: u64,
    #[arg(
        long,
        value_name = "N",
        help = "Maximum identifiers kept after a sweep",
        default_value_t = 10_000,
        env = "THROTTLEGATE_MAX_MEMORY_ENTRIES"
    )]
    pub max_memory_entries: usize,

    // Token bucket
    #[arg(
        long,
        value_name = "N",
        help = "Burst capacity per identifier",
        default_value_t = 20,
        env = "THROTTLEGATE_BUCKET_MAX_TOKENS"
    )]
    pub bucket_max_tokens: u64,
    #[arg(
        long,
        value_name = "RATE",
        help = "Tokens refilled per second",
        default_value_t = 2.0,
        env = "THROTTLEGATE_BUCKET_REFILL_RATE"
    )]
    pub bucket_refill_rate: f64,
    #[arg(
        long,
        value_name = "SECS",
        help = "Idle time after which a bucket is forgotten",
        default_value_t = 600,
        env = "THROTTLEGATE_BUCKET_IDLE_TIMEOUT_SECS"
    )]
    pub bucket_idle_timeout_secs: u64,

    // Cache
    #[arg(
        long,
        value_name = "MS",
        help = "Default cache TTL in milliseconds",
        default_value_t = 300_000,
        env = "THROTTLEGATE_CACHE_TTL_MS"
    )]
    pub cache_ttl_ms: u64,
    #[arg(
        long,
        value_name = "N",
        help = "Maximum cached entries",
        default_value_t = 1000,
        env = "THROTTLEGATE_CACHE_MAX_ENTRIES"
    )]
    pub cache_max_entries: usize,

    // Circuit breaker
    #[arg(
        long,
        value_name = "N",
        help = "Consecutive failures that open the breaker",
        default_value_t = 5,
        env = "THROTTLEGATE_BREAKER_FAILURE_THRESHOLD"
    )]
    pub breaker_failure_threshold: u32,
    #[arg(
        long,
        value_name = "N",
        help = "Consecutive trial successes that close the breaker",
        default_value_t = 3,
        env = "THROTTLEGATE_BREAKER_SUCCESS_THRESHOLD"
    )]
    pub breaker_success_threshold: u32,
    #[arg(
        long,
        value_name = "MS",
        help = "Time the breaker stays open before a trial call",
        default_value_t = 60_000,
        env = "THROTTLEGATE_BREAKER_COOLDOWN_MS"
    )]
    pub breaker_cooldown_ms: u64,

    // Queue
    #[arg(
        long,
        value_name = "N",
        help = "Downstream calls allowed to run at once",
        default_value_t = 5,
        env = "THROTTLEGATE_QUEUE_MAX_CONCURRENCY"
    )]
    pub queue_max_concurrency: usize,
    #[arg(
        long,
        value_name = "MS",
        help = "Default queue timeout in milliseconds, measured from enqueue",
        default_value_t = 30_000,
        env = "THROTTLEGATE_QUEUE_TIMEOUT_MS"
    )]
    pub queue_timeout_ms: u64,
    #[arg(
        long,
        help = "Abort running work when its caller times out",
        env = "THROTTLEGATE_QUEUE_ABORT_ON_TIMEOUT"
    )]
    pub queue_abort_on_timeout: bool,

    // General options
    #[arg(
        long,
        value_name = "SECS",
        help = "Interval between sweeps of limiters and caches",
        default_value_t = 60,
        env = "THROTTLEGATE_SWEEP_INTERVAL_SECS"
    )]
    pub sweep_interval_secs: u64,
    #[arg(
        long,
        value_name = "LEVEL",
        help = "Log level: error, warn, info, debug, trace",
        default_value = "info",
        env = "THROTTLEGATE_LOG_LEVEL"
    )]
    pub log_level: String,

    // Utility options
    #[arg(
        long,
        help = "List all environment variables and exit",
        action = clap::ArgAction::SetTrue
    )]
    pub list_env_vars: bool,
}

impl Config {
    /// Build configuration from environment variables and CLI arguments
    ///
    /// # Errors
    ///
    /// Returns an error if a limit, capacity or interval is zero.
    pub fn from_env_and_args() -> Result<Self> {
        let args = Args::parse();

        if args.list_env_vars {
            Self::print_env_vars();
            std::process::exit(0);
        }

        let config = Self::from_args(args);
        config.validate()?;
        Ok(config)
    }

    fn from_args(args: Args) -> Self {
        Config {
            http: HttpConfig {
                host: args.http_host,
                port: args.http_port,
            },
            sliding_window: SlidingWindowConfig {
                window_size: Duration::from_millis(args.window_size_ms),
                max_requests: args.max_requests,
                sliding_window_count: args.window_count,
                block_duration: Duration::from_millis(args.block_duration_ms),
                max_memory_entries: args.max_memory_entries,
            },
            token_bucket: TokenBucketConfig {
                max_tokens: args.bucket_max_tokens,
                refill_rate: args.bucket_refill_rate,
                idle_timeout: Duration::from_secs(args.bucket_idle_timeout_secs),
            },
            cache: CacheConfig {
                default_ttl: Duration::from_millis(args.cache_ttl_ms),
                max_entries: args.cache_max_entries,
            },
            breaker: CircuitBreakerConfig {
                failure_threshold: args.breaker_failure_threshold,
                success_threshold: args.breaker_success_threshold,
                cooldown: Duration::from_millis(args.breaker_cooldown_ms),
            },
            queue: QueueConfig {
                max_concurrency: args.queue_max_concurrency,
                default_timeout: Duration::from_millis(args.queue_timeout_ms),
                on_timeout: if args.queue_abort_on_timeout {
                    TimeoutPolicy::Abort
                } else {
                    TimeoutPolicy::Detach
                },
            },
            sweep_interval: Duration::from_secs(args.sweep_interval_secs),
            log_level: args.log_level,
        }
    }

    /// Validate the configuration
    ///
    /// Component constructors repeat their own checks; this catches bad
    /// values before anything is started and names the offending option.
    pub fn validate(&self) -> Result<()> {
        self.sliding_window
            .validate()
            .map_err(|e| anyhow!("invalid sliding window configuration: {e}"))?;

        if self.token_bucket.max_tokens == 0 {
            return Err(anyhow!("--bucket-max-tokens must be greater than zero"));
        }
        if !(self.token_bucket.refill_rate.is_finite() && self.token_bucket.refill_rate > 0.0) {
            return Err(anyhow!("--bucket-refill-rate must be a positive number"));
        }
        if self.cache.max_entries == 0 || self.cache.default_ttl.is_zero() {
            return Err(anyhow!(
                "--cache-max-entries and --cache-ttl-ms must be greater than zero"
            ));
        }
        if self.breaker.failure_threshold == 0 || self.breaker.success_threshold == 0 {
            return Err(anyhow!("breaker thresholds must be greater than zero"));
        }
        if self.queue.max_concurrency == 0 {
            return Err(anyhow!("--queue-max-concurrency must be greater than zero"));
        }
        if self.queue.default_timeout.is_zero() {
            return Err(anyhow!("--queue-timeout-ms must be greater than zero"));
        }
        if self.sweep_interval.is_zero() {
            return Err(anyhow!("--sweep-interval-secs must be greater than zero"));
        }
        Ok(())
    }

    /// Print all available environment variables and their descriptions
    fn print_env_vars() {
        println!("ThrottleGate Environment Variables");
        println!("==================================");
        println!();
        println!("All environment variables use the THROTTLEGATE_ prefix.");
        println!("CLI arguments take precedence over environment variables.");
        println!();

        println!("HTTP Transport:");
        println!("  THROTTLEGATE_HTTP_HOST=<host>                 HTTP host [default: 127.0.0.1]");
        println!("  THROTTLEGATE_HTTP_PORT=<port>                 HTTP port [default: 8080]");
        println!();

        println!("Sliding Window:");
        println!("  THROTTLEGATE_WINDOW_SIZE_MS=<ms>              Bucket length [default: 60000]");
        println!("  THROTTLEGATE_MAX_REQUESTS=<n>                 Requests per horizon [default: 10]");
        println!("  THROTTLEGATE_WINDOW_COUNT=<n>                 Buckets per horizon [default: 5]");
        println!("  THROTTLEGATE_BLOCK_DURATION_MS=<ms>           Block after violation [default: 60000]");
        println!("  THROTTLEGATE_MAX_MEMORY_ENTRIES=<n>           Identifiers kept after sweep [default: 10000]");
        println!();

        println!("Token Bucket:");
        println!("  THROTTLEGATE_BUCKET_MAX_TOKENS=<n>            Burst capacity [default: 20]");
        println!("  THROTTLEGATE_BUCKET_REFILL_RATE=<rate>        Tokens per second [default: 2.0]");
        println!("  THROTTLEGATE_BUCKET_IDLE_TIMEOUT_SECS=<secs>  Idle bucket lifetime [default: 600]");
        println!();

        println!("Cache:");
        println!("  THROTTLEGATE_CACHE_TTL_MS=<ms>                Default TTL [default: 300000]");
        println!("  THROTTLEGATE_CACHE_MAX_ENTRIES=<n>            Maximum entries [default: 1000]");
        println!();

        println!("Circuit Breaker:");
        println!("  THROTTLEGATE_BREAKER_FAILURE_THRESHOLD=<n>    Failures to open [default: 5]");
        println!("  THROTTLEGATE_BREAKER_SUCCESS_THRESHOLD=<n>    Trial successes to close [default: 3]");
        println!("  THROTTLEGATE_BREAKER_COOLDOWN_MS=<ms>         Open duration [default: 60000]");
        println!();

        println!("Queue:");
        println!("  THROTTLEGATE_QUEUE_MAX_CONCURRENCY=<n>        Concurrent downstream calls [default: 5]");
        println!("  THROTTLEGATE_QUEUE_TIMEOUT_MS=<ms>            Default timeout [default: 30000]");
        println!("  THROTTLEGATE_QUEUE_ABORT_ON_TIMEOUT=true|false  Abort timed-out work [default: false]");
        println!();

        println!("General Configuration:");
        println!("  THROTTLEGATE_SWEEP_INTERVAL_SECS=<secs>       Sweep interval [default: 60]");
        println!(
            "  THROTTLEGATE_LOG_LEVEL=<level>                Log level: error, warn, info, debug, trace [default: info]"
        );
        println!();

        println!("Examples:");
        println!("  # Allow 100 requests per 5 minutes");
        println!("  export THROTTLEGATE_MAX_REQUESTS=100");
        println!();
        println!("  # Run server (CLI args override env vars)");
        println!("  throttlegate --http-port 9090");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Config {
        let mut argv = vec!["throttlegate"];
        argv.extend_from_slice(args);
        Config::from_args(Args::try_parse_from(argv).unwrap())
    }

    #[test]
    fn test_defaults() {
        let config = parse(&[]);

        assert_eq!(config.http.port, 8080);
        assert_eq!(config.sliding_window, SlidingWindowConfig::default());
        assert_eq!(config.token_bucket.max_tokens, 20);
        assert_eq!(config.token_bucket.refill_rate, 2.0);
        assert_eq!(config.cache, CacheConfig::default());
        assert_eq!(config.breaker, CircuitBreakerConfig::default());
        assert_eq!(config.queue, QueueConfig::default());
        assert_eq!(config.sweep_interval, Duration::from_secs(60));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_cli_overrides() {
        let config = parse(&[
            "--http-port",
            "9090",
            "--max-requests",
            "100",
            "--window-size-ms",
            "1000",
            "--breaker-cooldown-ms",
            "5000",
            "--queue-max-concurrency",
            "16",
            "--queue-abort-on-timeout",
        ]);

        assert_eq!(config.http.port, 9090);
        assert_eq!(config.sliding_window.max_requests, 100);
        assert_eq!(config.sliding_window.window_size, Duration::from_secs(1));
        assert_eq!(config.breaker.cooldown, Duration::from_secs(5));
        assert_eq!(config.queue.max_concurrency, 16);
        assert_eq!(config.queue.on_timeout, TimeoutPolicy::Abort);
    }

    #[test]
    fn test_validation_rejects_zero_values() {
        for args in [
            ["--max-requests", "0"],
            ["--window-count", "0"],
            ["--bucket-max-tokens", "0"],
            ["--bucket-refill-rate", "0"],
            ["--cache-max-entries", "0"],
            ["--queue-max-concurrency", "0"],
            ["--sweep-interval-secs", "0"],
        ] {
            let config = parse(&args);
            assert!(config.validate().is_err(), "{args:?} should be rejected");
        }
    }
}
