//! Data sources, standardization and multi-provider fallback.

pub mod binance;
pub mod circuit_breaker;
pub mod eastmoney;
pub mod http;
pub mod manager;
pub mod provider;
pub mod quota;
pub mod registry;
pub mod retry;
pub mod standardize;
pub mod tushare;
pub mod yahoo;

pub use binance::BinanceSource;
pub use circuit_breaker::CircuitBreaker;
pub use eastmoney::EastmoneySource;
pub use manager::{DataSourceManager, FetchError};
pub use provider::{DataSource, FetchOutput, SourceError};
pub use quota::QuotaTracker;
pub use registry::{DataSourceRegistry, SourceDescriptor};
pub use retry::{RetryOverride, RetryPolicy};
pub use tushare::TushareSource;
pub use yahoo::YahooSource;
