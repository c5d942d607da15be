//! Filter-chain core.
//!
//! A [`FilterSpec`] names a filter kind. The [`FilterFactory`] resolves it to a
//! live [`Filter`], either from the compiled-in [`BuiltinRegistry`] or from an
//! external module through a [`ModuleLoader`]. [`FilterChain::build`] resolves a
//! whole list all-or-nothing, and [`FilterChain::run`] drives one request's
//! [`FilterContext`] through the result.

use async_trait::async_trait;
use http::StatusCode;

pub mod chain;
pub mod context;
pub mod error;
pub mod external;
pub mod factory;
pub mod registry;
pub mod spec;

pub use chain::{ChainError, ChainOutcome, FilterChain};
pub use context::{FilterContext, FilterResponse};
pub use error::{BoxError, FilterError, ResolveError};
pub use external::{DylibLoader, ModuleLoader};
pub use factory::FilterFactory;
pub use registry::{BuiltinKind, BuiltinRegistry};
pub use spec::{FilterParams, FilterSpec};

/// Decision returned by a filter for one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterAction {
    /// Hand the context to the next filter.
    Continue,
    /// Stop the chain. The filter is expected to have set `ctx.response`.
    Halt,
}

/// The capability every built-in and external filter implements.
///
/// One instance is shared by every request running against the chain that
/// built it, so implementations guard their own mutable state.
#[async_trait]
pub trait Filter: Send + Sync {
    /// Canonical identifier of the filter kind, used in logs and metrics.
    fn name(&self) -> &str;

    async fn process(&self, ctx: &mut FilterContext) -> Result<FilterAction, FilterError>;

    /// Called once the upstream (or a halting filter) produced the final status.
    /// Only filters that were invoked for the request see it.
    fn on_response(&self, _ctx: &FilterContext, _status: StatusCode) {}
}
