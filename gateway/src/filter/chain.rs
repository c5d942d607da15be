use super::error::{FilterError, ResolveError};
use super::{Filter, FilterAction, FilterContext, FilterFactory, FilterSpec};
use http::StatusCode;
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, error, info};

struct ChainEntry {
    spec_name: String,
    external: bool,
    filter: Arc<dyn Filter>,
}

/// Ordered, immutable list of resolved filters.
///
/// Built once per configuration load and shared by every request; order is
/// exactly the order of the specs it was built from.
pub struct FilterChain {
    entries: Vec<ChainEntry>,
}

/// Result of a chain run that did not fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainOutcome {
    pub action: FilterAction,
    /// Configured name of the filter that halted, if one did.
    pub decided_by: Option<String>,
    /// Number of filters that were invoked.
    pub invoked: usize,
}

#[derive(Error, Debug)]
pub enum ChainError {
    #[error("filter `{filter}` at position {index} failed: {source}")]
    Filter {
        index: usize,
        filter: String,
        #[source]
        source: FilterError,
    },

    #[error("request deadline exceeded at filter `{filter}` (position {index})")]
    DeadlineExceeded {
        index: usize,
        filter: String,
        invoked: usize,
    },
}

impl ChainError {
    /// Number of filters invoked before the run stopped.
    pub fn invoked(&self) -> usize {
        match self {
            ChainError::Filter { index, .. } => index + 1,
            ChainError::DeadlineExceeded { invoked, .. } => *invoked,
        }
    }
}

/// Read-only view of one chain position, for the admin API.
#[derive(Debug, Clone, Serialize)]
pub struct ChainEntryInfo {
    pub position: usize,
    pub name: String,
    pub kind: String,
    pub external: bool,
}

impl FilterChain {
    pub fn empty() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Resolves every spec in order. The first failure aborts the build and no
    /// chain is returned.
    pub fn build(factory: &FilterFactory, specs: &[FilterSpec]) -> Result<Self, ResolveError> {
        let mut entries = Vec::with_capacity(specs.len());

        for (index, spec) in specs.iter().enumerate() {
            let filter = factory.resolve(spec).map_err(|e| {
                error!(
                    "❌ Failed to resolve filter `{}` at position {}: {}",
                    spec.name(),
                    index,
                    e
                );
                e
            })?;
            debug!(
                position = index,
                name = spec.name(),
                kind = filter.name(),
                external = spec.is_external(),
                "filter resolved"
            );
            entries.push(ChainEntry {
                spec_name: spec.name().to_string(),
                external: spec.is_external(),
                filter,
            });
        }

        info!("🔗 Filter chain built with {} filter(s)", entries.len());
        Ok(Self { entries })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Configured names, in chain order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.spec_name.as_str())
    }

    pub fn describe(&self) -> Vec<ChainEntryInfo> {
        self.entries
            .iter()
            .enumerate()
            .map(|(position, e)| ChainEntryInfo {
                position,
                name: e.spec_name.clone(),
                kind: e.filter.name().to_string(),
                external: e.external,
            })
            .collect()
    }

    /// Drives `ctx` through the filters in order.
    ///
    /// Stops at the first `Halt`, the first error, or when the context's
    /// deadline passes. No lock is held across the traversal.
    pub async fn run(&self, ctx: &mut FilterContext) -> Result<ChainOutcome, ChainError> {
        let started = Instant::now();
        let result = self.traverse(ctx).await;
        metrics::histogram!("gateway_chain_duration_seconds")
            .record(started.elapsed().as_secs_f64());
        result
    }

    async fn traverse(&self, ctx: &mut FilterContext) -> Result<ChainOutcome, ChainError> {
        for (index, entry) in self.entries.iter().enumerate() {
            let result = match ctx.deadline() {
                Some(deadline) => {
                    if Instant::now() >= deadline {
                        return Err(self.deadline_exceeded(index, index));
                    }
                    match tokio::time::timeout_at(deadline, entry.filter.process(ctx)).await {
                        Ok(result) => result,
                        Err(_) => return Err(self.deadline_exceeded(index, index + 1)),
                    }
                }
                None => entry.filter.process(ctx).await,
            };

            match result {
                Ok(FilterAction::Continue) => {}
                Ok(FilterAction::Halt) => {
                    debug!("request halted by `{}` at position {}", entry.spec_name, index);
                    metrics::counter!("gateway_filter_halts_total", "filter" => entry.spec_name.clone())
                        .increment(1);
                    return Ok(ChainOutcome {
                        action: FilterAction::Halt,
                        decided_by: Some(entry.spec_name.clone()),
                        invoked: index + 1,
                    });
                }
                Err(source) => {
                    metrics::counter!("gateway_filter_errors_total", "filter" => entry.spec_name.clone())
                        .increment(1);
                    return Err(ChainError::Filter {
                        index,
                        filter: entry.spec_name.clone(),
                        source,
                    });
                }
            }
        }

        Ok(ChainOutcome {
            action: FilterAction::Continue,
            decided_by: None,
            invoked: self.entries.len(),
        })
    }

    fn deadline_exceeded(&self, index: usize, invoked: usize) -> ChainError {
        metrics::counter!("gateway_chain_deadline_total").increment(1);
        ChainError::DeadlineExceeded {
            index,
            filter: self.entries[index].spec_name.clone(),
            invoked,
        }
    }

    /// Reports the final response status to the first `invoked` filters.
    pub fn observe_response(&self, invoked: usize, ctx: &FilterContext, status: StatusCode) {
        for entry in self.entries.iter().take(invoked) {
            entry.filter.on_response(ctx, status);
        }
    }
}

impl Default for FilterChain {
    fn default() -> Self {
        Self::empty()
    }
}
