//! Priority-ordered fallback across the sources registered for a segment.

use super::provider::{FetchOutput, SourceError};
use super::registry::DataSourceRegistry;
use crate::domain::{FetchRequest, MarketSegment, Operation};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// The only data-layer failures that leave the core.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("no data source registered for segment {segment}")]
    NoDataSource { segment: MarketSegment },

    #[error("all data sources failed for {operation} on segment {segment}")]
    DataFetchFailed {
        operation: Operation,
        segment: MarketSegment,
    },
}

/// Why a single source did not produce data.
#[derive(Debug)]
pub enum SoftFailure {
    Unsupported,
    Empty,
    Failed(SourceError),
}

/// Walks the registry strictly sequentially; never races sources.
#[derive(Debug, Clone)]
pub struct DataSourceManager {
    registry: Arc<DataSourceRegistry>,
}

impl DataSourceManager {
    pub fn new(registry: Arc<DataSourceRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &DataSourceRegistry {
        &self.registry
    }

    /// First non-empty successful result in priority order.
    pub async fn fetch(&self, req: &FetchRequest) -> Result<FetchOutput, FetchError> {
        let sources = self.registry.sources_for(req.segment);
        if sources.is_empty() {
            return Err(FetchError::NoDataSource { segment: req.segment });
        }

        for source in &sources {
            let outcome = if !source.supports(req.operation) {
                Err(SoftFailure::Unsupported)
            } else {
                match source.fetch(req).await {
                    Ok(out) if out.is_empty() => Err(SoftFailure::Empty),
                    Ok(out) => Ok(out),
                    Err(e) => Err(SoftFailure::Failed(e)),
                }
            };

            match outcome {
                Ok(out) => {
                    info!(source = source.name(), operation = %req.operation, segment = %req.segment, "fetch succeeded");
                    return Ok(out);
                }
                Err(SoftFailure::Unsupported) => {
                    debug!(source = source.name(), operation = %req.operation, "operation unsupported, trying next source");
                }
                Err(SoftFailure::Empty) => {
                    warn!(source = source.name(), operation = %req.operation, symbols = ?req.symbols, "empty result, trying next source");
                }
                Err(SoftFailure::Failed(e)) => {
                    warn!(source = source.name(), operation = %req.operation, symbols = ?req.symbols, error = %e, "source failed, trying next source");
                }
            }
        }

        error!(operation = %req.operation, segment = %req.segment, "all data sources exhausted");
        Err(FetchError::DataFetchFailed {
            operation: req.operation,
            segment: req.segment,
        })
    }
}
