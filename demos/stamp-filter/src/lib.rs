//! Example external filter. Build with `cargo build -p stamp-filter` and point
//! a filter spec's `externalModulePath` at the resulting shared library.

use async_trait::async_trait;
use gateway::filter::{BoxError, Filter, FilterAction, FilterContext, FilterError};
use http::HeaderValue;

/// Tags every response passing through the gateway.
pub struct StampFilter;

#[async_trait]
impl Filter for StampFilter {
    fn name(&self) -> &str {
        "STAMP"
    }

    async fn process(&self, ctx: &mut FilterContext) -> Result<FilterAction, FilterError> {
        ctx.response_headers
            .insert("x-gateway-plugin", HeaderValue::from_static("stamp"));
        Ok(FilterAction::Continue)
    }
}

fn new_external_filter() -> Result<Box<dyn Filter>, BoxError> {
    Ok(Box::new(StampFilter))
}

gateway::declare_filter_plugin!(new_external_filter);
