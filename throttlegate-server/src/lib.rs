//! # ThrottleGate Server
//!
//! An in-process request governance layer for expensive, rate-limited or
//! unreliable downstream calls (generative-content providers, slow databases).
//!
//! ## Purpose
//!
//! Before a unit of work reaches the downstream, ThrottleGate decides whether
//! it may run at all and how. It:
//!
//! - **Enforces rate limits** per identifier, both sustained and burst
//! - **Serves cached results** for repeated fingerprints
//! - **Collapses identical concurrent work** into one downstream call
//! - **Bounds downstream concurrency** with a priority queue and timeouts
//! - **Fails fast** through a circuit breaker when the downstream is unhealthy
//!
//! ## Quick Start
//!
//! ```bash
//! # Show all available options
//! throttlegate --help
//!
//! # Admission endpoint on port 8080, 100 requests per 5 minutes
//! throttlegate --http-port 8080 --max-requests 100
//!
//! # List all available environment variables
//! throttlegate --list-env-vars
//! ```
//!
//! ## Embedding
//!
//! ```no_run
//! use throttlegate_server::config::Config;
//! use throttlegate_server::factory::Components;
//! use throttlegate_server::types::GovernedRequest;
//!
//! # async fn run() -> anyhow::Result<()> {
//! let config = Config::from_env_and_args()?;
//! let components = Components::from_config(&config)?;
//! let summaries = components.governor::<String>("summaries")?;
//!
//! let request = GovernedRequest::new("203.0.113.9:summarize").fingerprint("doc-42");
//! let summary = summaries
//!     .execute(request, || async { Ok("a short summary".to_string()) })
//!     .await?;
//! println!("{} ({:?})", summary.value, summary.source);
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! ```text
//!   request ──► AdmissionControl ──► ResponseCache ──hit──► result
//!              (window, bucket)           │ miss
//!                                         ▼
//!                               RequestDeduplicator
//!                                         │ leader only
//!                                         ▼
//!                              PriorityRequestQueue
//!                                         │ slot
//!                                         ▼
//!                               AsyncCircuitBreaker ──► downstream
//! ```
//!
//! Limiters and caches are swept periodically by the [`sweeper`]. The
//! synchronous state machines live in the `throttlegate` crate.

pub mod admission;
pub mod breaker;
pub mod cache;
pub mod config;
pub mod dedup;
pub mod error;
pub mod factory;
pub mod governor;
pub mod metrics;
pub mod queue;
pub mod sweeper;
pub mod transport;
pub mod types;

pub use error::{GovernanceError, LimitScope, Result};
pub use governor::{Governor, GovernorBuilder};
pub use types::{Governed, GovernedRequest, ResultSource};
