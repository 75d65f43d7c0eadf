//! Network surface of the governance server
//!
//! The HTTP transport exposes admission decisions and observability
//! endpoints. Downstream work is run in-process through a
//! [`Governor`](crate::governor::Governor); the transport only lets external
//! callers ask "may this identifier proceed?" and inspect shared state.
//!
//! # Available Transports
//!
//! - [`http`]: REST API with JSON

pub mod http;

#[cfg(test)]
mod http_test;

use crate::admission::AdmissionControl;
use crate::breaker::AsyncCircuitBreaker;
use crate::factory::Components;
use crate::metrics::Metrics;
use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;

/// Shared state handed to every transport
#[derive(Clone)]
pub struct Gateway {
    pub admission: Arc<AdmissionControl>,
    pub breaker: Arc<AsyncCircuitBreaker>,
    pub metrics: Arc<Metrics>,
}

impl From<&Components> for Gateway {
    fn from(components: &Components) -> Self {
        Self {
            admission: Arc::clone(&components.admission),
            breaker: Arc::clone(&components.breaker),
            metrics: Arc::clone(&components.metrics),
        }
    }
}

/// Common interface for transport implementations
///
/// A transport binds its listener, serves requests against the shared
/// [`Gateway`] and returns only on error or shutdown.
#[async_trait]
pub trait Transport {
    async fn start(self, gateway: Gateway) -> Result<()>;
}
