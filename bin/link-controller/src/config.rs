//! Controller configuration from `LINK_*` environment variables

use link_core::{CoreError, PortRange, ReconcilerConfig, Result, RetryPolicy};
use std::fmt::Display;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

#[derive(Clone, Debug)]
pub struct ControllerConfig {
    pub reconciler: ReconcilerConfig,
    /// Concurrent reconciliation workers
    pub workers: usize,
    /// Interval between full resyncs of all Imports
    pub resync: Duration,
    pub metrics_addr: SocketAddr,
}

impl ControllerConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = ReconcilerConfig::default();

        let workers: usize = parse(&lookup, "LINK_WORKERS", 4)?;
        if workers == 0 {
            return Err(CoreError::InvalidConfiguration(
                "LINK_WORKERS must be at least 1".to_string(),
            ));
        }

        let retry = RetryPolicy {
            max_retries: parse(&lookup, "LINK_RETRY_MAX", defaults.retry.max_retries)?,
            initial_backoff: Duration::from_millis(parse(&lookup, "LINK_RETRY_INITIAL_MS", 100)?),
            max_backoff: Duration::from_millis(parse(&lookup, "LINK_RETRY_MAX_MS", 10_000)?),
        };

        Ok(Self {
            reconciler: ReconcilerConfig {
                system_namespace: lookup("LINK_SYSTEM_NAMESPACE").unwrap_or(defaults.system_namespace),
                dataplane_service: lookup("LINK_DATAPLANE_SERVICE").unwrap_or(defaults.dataplane_service),
                port_range: parse(&lookup, "LINK_PORT_RANGE", PortRange::default())?,
                retry,
            },
            workers,
            resync: Duration::from_secs(parse(&lookup, "LINK_RESYNC_SECS", 300)?),
            metrics_addr: parse(&lookup, "LINK_METRICS_ADDR", SocketAddr::from(([0, 0, 0, 0], 9090)))?,
        })
    }
}

fn parse<T>(lookup: &impl Fn(&str) -> Option<String>, name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: Display,
{
    match lookup(name) {
        None => Ok(default),
        Some(value) => value
            .trim()
            .parse()
            .map_err(|e| CoreError::InvalidConfiguration(format!("{}={:?}: {}", name, value, e))),
    }
}
