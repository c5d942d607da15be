use crate::config::{ConfigLoader, GatewayConfig};
use crate::error::AppError;
use crate::filter::{FilterChain, FilterFactory};
use arc_swap::ArcSwap;
use parking_lot::Mutex;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// A configuration together with the chain built from it.
///
/// Requests load one snapshot and use it start to finish.
pub struct Snapshot {
    pub config: GatewayConfig,
    pub chain: FilterChain,
}

/// Process-wide request counters (Atomic Counters)
#[derive(Debug, Default)]
pub struct Metrics {
    pub total_requests: AtomicU64,
    pub forwarded: AtomicU64,
    pub halted: AtomicU64,
    pub errored: AtomicU64,
    pub deadline_exceeded: AtomicU64,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub total_requests: u64,
    pub forwarded: u64,
    pub halted: u64,
    pub errored: u64,
    pub deadline_exceeded: u64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            total_requests: self.total_requests.load(Ordering::Relaxed),
            forwarded: self.forwarded.load(Ordering::Relaxed),
            halted: self.halted.load(Ordering::Relaxed),
            errored: self.errored.load(Ordering::Relaxed),
            deadline_exceeded: self.deadline_exceeded.load(Ordering::Relaxed),
        }
    }
}

/// Shared state between the data plane and the admin API.
#[derive(Clone)]
pub struct AppState {
    /// Atomic pointer to the active snapshot. Reads are lock-free.
    active: Arc<ArcSwap<Snapshot>>,
    factory: Arc<FilterFactory>,
    config_path: Option<PathBuf>,
    reload_lock: Arc<Mutex<()>>,
    pub metrics: Arc<Metrics>,
}

impl AppState {
    /// Builds the initial chain. Fails, and nothing starts, if any filter
    /// cannot be resolved.
    pub fn new(config: GatewayConfig, factory: FilterFactory) -> Result<Self, AppError> {
        let chain = FilterChain::build(&factory, &config.filters)?;
        Ok(Self {
            active: Arc::new(ArcSwap::from_pointee(Snapshot { config, chain })),
            factory: Arc::new(factory),
            config_path: None,
            reload_lock: Arc::new(Mutex::new(())),
            metrics: Arc::new(Metrics::new()),
        })
    }

    /// File re-read by [`reload`](Self::reload).
    pub fn with_config_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config_path = Some(path.into());
        self
    }

    pub fn snapshot(&self) -> Arc<Snapshot> {
        self.active.load_full()
    }

    pub fn factory(&self) -> &FilterFactory {
        &self.factory
    }

    /// Builds a chain for `config` and swaps it in. On failure the active
    /// snapshot is left untouched.
    pub fn apply_config(&self, config: GatewayConfig) -> Result<Arc<Snapshot>, AppError> {
        let _guard = self.reload_lock.lock();
        let chain = FilterChain::build(&self.factory, &config.filters)?;
        let snapshot = Arc::new(Snapshot { config, chain });
        self.active.store(snapshot.clone());
        tracing::info!(
            "♻️ Filter chain swapped ({} filter(s))",
            snapshot.chain.len()
        );
        Ok(snapshot)
    }

    /// Re-reads the configuration file and applies it. Blocking.
    pub fn reload(&self) -> Result<Arc<Snapshot>, AppError> {
        let path = self
            .config_path
            .as_ref()
            .ok_or_else(|| AppError::NotFound("no configuration file to reload".to_string()))?;
        let config = ConfigLoader::load_from_file(path)?;
        self.apply_config(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::{FilterSpec, ResolveError};

    fn config(names: &[&str]) -> GatewayConfig {
        GatewayConfig {
            filters: names.iter().map(|n| FilterSpec::builtin(*n)).collect(),
            ..GatewayConfig::default()
        }
    }

    #[test]
    fn startup_fails_on_unknown_filter() {
        let err = AppState::new(config(&["HEAD", "NOPE"]), FilterFactory::standard())
            .err()
            .expect("should fail");
        assert!(matches!(
            err,
            AppError::Resolve(ResolveError::UnknownKind { ref name }) if name == "NOPE"
        ));
    }

    #[test]
    fn failed_apply_keeps_previous_chain() {
        let state = AppState::new(config(&["HEAD"]), FilterFactory::standard()).unwrap();
        let before = state.snapshot();

        assert!(state.apply_config(config(&["HEAD", "bogus"])).is_err());

        let after = state.snapshot();
        assert!(Arc::ptr_eq(&before, &after));
    }

    #[test]
    fn in_flight_snapshot_survives_swap() {
        let state = AppState::new(config(&["HEAD"]), FilterFactory::standard()).unwrap();
        let in_flight = state.snapshot();

        state.apply_config(config(&["XFORWARD", "AUTH"])).unwrap();

        assert_eq!(in_flight.chain.names().collect::<Vec<_>>(), ["HEAD"]);
        assert_eq!(state.snapshot().chain.names().collect::<Vec<_>>(), ["XFORWARD", "AUTH"]);
    }

    #[test]
    fn reload_without_path_is_not_found() {
        let state = AppState::new(config(&[]), FilterFactory::standard()).unwrap();
        assert!(matches!(state.reload(), Err(AppError::NotFound(_))));
    }
}
