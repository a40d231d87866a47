//! Batched multi-symbol fetches.
//!
//! Symbols are split into `batch_size` chunks. Each chunk's fetches run
//! concurrently; chunks run one after another with a pause in between so a
//! quota-limited upstream never sees a burst larger than one chunk.

use std::time::Duration;

use futures::future::join_all;
use tracing::{info, warn};

use marketlens_core::data::{DataSourceManager, FetchError};
use marketlens_core::domain::{FetchRequest, Table};

/// Progress callback for batched fetches.
pub trait BatchProgress: Send + Sync {
    /// Called before each chunk starts.
    fn on_batch_start(&self, batch: usize, batches: usize, symbols: &[String]);

    /// Called once per symbol, in input order.
    fn on_symbol_complete(&self, symbol: &str, result: &Result<Table, FetchError>);

    /// Called once after every chunk.
    fn on_complete(&self, succeeded: usize, failed: usize, total: usize);
}

#[derive(Debug)]
pub struct SymbolOutcome {
    pub symbol: String,
    pub result: Result<Table, FetchError>,
}

/// Summary of a batched fetch.
#[derive(Debug)]
pub struct BatchSummary {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// One entry per input symbol, in input order.
    pub outcomes: Vec<SymbolOutcome>,
}

impl BatchSummary {
    pub fn all_succeeded(&self) -> bool {
        self.failed == 0
    }

    pub fn errors(&self) -> impl Iterator<Item = (&str, &FetchError)> {
        self.outcomes
            .iter()
            .filter_map(|o| o.result.as_ref().err().map(|e| (o.symbol.as_str(), e)))
    }
}

/// Fetch `template.operation` for every symbol in `template.symbols`, one
/// request per symbol, sharing the template's segment, range and params.
pub async fn fetch_batched(
    manager: &DataSourceManager,
    template: &FetchRequest,
    batch_size: usize,
    pause: Duration,
    progress: Option<&dyn BatchProgress>,
) -> BatchSummary {
    let total = template.symbols.len();
    let chunks: Vec<&[String]> = template.symbols.chunks(batch_size.max(1)).collect();
    let batches = chunks.len();
    let mut outcomes = Vec::with_capacity(total);

    for (i, chunk) in chunks.into_iter().enumerate() {
        if i > 0 && !pause.is_zero() {
            tokio::time::sleep(pause).await;
        }
        if let Some(p) = progress {
            p.on_batch_start(i, batches, chunk);
        }
        info!(batch = i + 1, batches, symbols = chunk.len(), operation = %template.operation, "fetching batch");

        let fetches = chunk.iter().map(|symbol| async move {
            let req = FetchRequest {
                symbols: vec![symbol.clone()],
                ..template.clone()
            };
            let result = manager.fetch(&req).await.map(|out| out.into_table());
            SymbolOutcome {
                symbol: symbol.clone(),
                result,
            }
        });
        for outcome in join_all(fetches).await {
            if let Some(p) = progress {
                p.on_symbol_complete(&outcome.symbol, &outcome.result);
            }
            if let Err(e) = &outcome.result {
                warn!(symbol = %outcome.symbol, error = %e, "fetch failed");
            }
            outcomes.push(outcome);
        }
    }

    let failed = outcomes.iter().filter(|o| o.result.is_err()).count();
    let succeeded = total - failed;
    if let Some(p) = progress {
        p.on_complete(succeeded, failed, total);
    }

    BatchSummary {
        total,
        succeeded,
        failed,
        outcomes,
    }
}
