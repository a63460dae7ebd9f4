use std::fs::OpenOptions;
use std::io::{BufRead, BufReader, Write};
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use decision_core::{CoreError, RetrainingDecision, ValidationMetrics};

/// One retraining outcome; the log is append-only JSON lines.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingLogRecord {
    pub at: DateTime<Utc>,
    pub decision: RetrainingDecision,
    pub reason: String,
    pub metrics: Option<ValidationMetrics>,
    pub version: Option<String>,
    #[serde(default)]
    pub forced: bool,
}

pub fn append(path: &Path, record: &TrainingLogRecord) -> Result<(), CoreError> {
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    let line = serde_json::to_string(record)?;
    writeln!(file, "{line}")?;
    Ok(())
}

pub fn read_all(path: &Path) -> Result<Vec<TrainingLogRecord>, CoreError> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let reader = BufReader::new(std::fs::File::open(path)?);
    let mut records = Vec::new();
    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        records.push(serde_json::from_str(&line)?);
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn appends_and_reads_back_in_order() {
        let path = std::env::temp_dir().join(format!(
            "metrics-log-test-{}.jsonl",
            std::process::id()
        ));
        let _ = std::fs::remove_file(&path);

        for (decision, reason) in [
            (RetrainingDecision::Promoted, "candidate cleared thresholds"),
            (RetrainingDecision::RejectedLow, "f1 below floor"),
        ] {
            append(
                &path,
                &TrainingLogRecord {
                    at: Utc::now(),
                    decision,
                    reason: reason.to_string(),
                    metrics: None,
                    version: None,
                    forced: false,
                },
            )
            .unwrap();
        }

        let records = read_all(&path).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].decision, RetrainingDecision::Promoted);
        assert_eq!(records[1].decision, RetrainingDecision::RejectedLow);
        let _ = std::fs::remove_file(&path);
    }
}
