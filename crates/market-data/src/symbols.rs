/// Symbol conventions of the upstream source. Tickers are opaque to the
/// rest of the core; exchange suffixes (`.SW`, `.DE`, `.L`) only matter
/// here.
pub fn source_symbol(ticker: &str) -> String {
    ticker.trim().to_uppercase()
}

/// The exchange suffix, if the symbol carries one.
pub fn exchange_suffix(ticker: &str) -> Option<&str> {
    let (_, suffix) = ticker.rsplit_once('.')?;
    (!suffix.is_empty() && suffix.chars().all(|c| c.is_ascii_alphabetic())).then_some(suffix)
}
