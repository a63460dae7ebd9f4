use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Per-ticker table of named indicator columns keyed by date. Rows are the
/// dates where every feature is defined; warmup rows never appear.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureFrame {
    pub ticker: String,
    /// Version of the closed feature set that produced this frame.
    pub version: u32,
    pub dates: Vec<NaiveDate>,
    columns: BTreeMap<String, Vec<f64>>,
}

impl FeatureFrame {
    pub fn new(
        ticker: impl Into<String>,
        version: u32,
        dates: Vec<NaiveDate>,
        columns: BTreeMap<String, Vec<f64>>,
    ) -> Self {
        debug_assert!(columns.values().all(|c| c.len() == dates.len()));
        Self {
            ticker: ticker.into(),
            version,
            dates,
            columns,
        }
    }

    pub fn len(&self) -> usize {
        self.dates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dates.is_empty()
    }

    pub fn feature_names(&self) -> impl Iterator<Item = &str> {
        self.columns.keys().map(String::as_str)
    }

    pub fn column(&self, name: &str) -> Option<&[f64]> {
        self.columns.get(name).map(Vec::as_slice)
    }

    pub fn value_at(&self, row: usize, name: &str) -> Option<f64> {
        self.columns.get(name)?.get(row).copied()
    }

    /// View over the most recent row, if any.
    pub fn latest(&self) -> Option<FeatureRow<'_>> {
        (!self.is_empty()).then(|| FeatureRow {
            frame: self,
            row: self.len() - 1,
        })
    }

    pub fn row(&self, row: usize) -> Option<FeatureRow<'_>> {
        (row < self.len()).then_some(FeatureRow { frame: self, row })
    }

    /// Feature values in the given name order, for model input. Returns
    /// `None` if any name is missing from the frame.
    pub fn vector_at(&self, row: usize, names: &[&str]) -> Option<Vec<f64>> {
        names
            .iter()
            .map(|name| self.value_at(row, name))
            .collect()
    }
}

/// Borrowed view of one frame row.
#[derive(Debug, Clone, Copy)]
pub struct FeatureRow<'a> {
    frame: &'a FeatureFrame,
    row: usize,
}

impl<'a> FeatureRow<'a> {
    pub fn date(&self) -> NaiveDate {
        self.frame.dates[self.row]
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.frame.value_at(self.row, name)
    }

    pub fn index(&self) -> usize {
        self.row
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> FeatureFrame {
        let dates = vec![
            NaiveDate::from_ymd_opt(2025, 3, 3).unwrap(),
            NaiveDate::from_ymd_opt(2025, 3, 4).unwrap(),
        ];
        let mut columns = BTreeMap::new();
        columns.insert("rsi_14".to_string(), vec![55.0, 60.0]);
        columns.insert("atr_14".to_string(), vec![1.5, 1.6]);
        FeatureFrame::new("AAPL", 1, dates, columns)
    }

    #[test]
    fn latest_row_reads_named_values() {
        let frame = sample();
        let row = frame.latest().unwrap();
        assert_eq!(row.get("rsi_14"), Some(60.0));
        assert_eq!(row.get("missing"), None);
        assert_eq!(row.date(), NaiveDate::from_ymd_opt(2025, 3, 4).unwrap());
    }

    #[test]
    fn vector_at_preserves_requested_order() {
        let frame = sample();
        let vector = frame.vector_at(0, &["atr_14", "rsi_14"]).unwrap();
        assert_eq!(vector, vec![1.5, 55.0]);
        assert!(frame.vector_at(0, &["nope"]).is_none());
    }
}
