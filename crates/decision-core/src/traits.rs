use async_trait::async_trait;

use crate::error::CoreError;
use crate::types::{ContextRecord, MacroPoint, OhlcvFrame, Quote};

/// External market-data source. Implementations own retry, rate limiting,
/// symbol-suffix conventions, and the data-quality gate; callers receive
/// either a validated frame or a typed failure.
#[async_trait]
pub trait MarketDataSource: Send + Sync {
    /// Daily OHLCV history covering roughly the last `days` calendar days.
    async fn fetch_history(&self, ticker: &str, days: u32) -> Result<OhlcvFrame, CoreError>;

    /// Macro series by opaque id (e.g. the volatility index).
    async fn fetch_macro(&self, series_id: &str, days: u32) -> Result<Vec<MacroPoint>, CoreError>;

    async fn fetch_current(&self, ticker: &str) -> Result<Quote, CoreError>;
}

/// Optional contextual subsystem. Strictly additive: its output can only
/// nudge a composite by the configured bounded adjustment, never produce a
/// signal of its own. `None` means "no context available" and is not an
/// error.
#[async_trait]
pub trait ContextProvider: Send + Sync {
    async fn context_for(&self, ticker: &str) -> Option<ContextRecord>;
}

/// Context provider that always reports nothing. The core must behave
/// identically with this wired in and the subsystem disabled.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopContextProvider;

#[async_trait]
impl ContextProvider for NoopContextProvider {
    async fn context_for(&self, _ticker: &str) -> Option<ContextRecord> {
        None
    }
}
