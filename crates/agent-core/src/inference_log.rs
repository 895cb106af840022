//! On-disk audit trail of model calls.
//!
//! Each call writes `<call_type>_request_<stamp>.json` and
//! `<call_type>_response_<stamp>.json` into the log directory and appends one
//! row to `summary.csv`.

use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};

use chrono::Utc;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use waypoint_core_types::TokenUsage;

use crate::errors::AgentError;

pub const SUMMARY_FILE: &str = "summary.csv";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SummaryRow {
    pub call_type: String,
    pub timestamp: String,
    pub request_file: String,
    pub response_file: String,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub inference_time_ms: u64,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct CallTotals {
    pub calls: usize,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub inference_time_ms: u64,
}

impl CallTotals {
    fn add(&mut self, row: &SummaryRow) {
        self.calls += 1;
        self.prompt_tokens += row.prompt_tokens;
        self.completion_tokens += row.completion_tokens;
        self.inference_time_ms += row.inference_time_ms;
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct InferenceSummary {
    pub total: CallTotals,
    pub by_type: BTreeMap<String, CallTotals>,
}

pub struct InferenceLog {
    dir: PathBuf,
    // Serializes file naming and CSV appends.
    write_lock: Mutex<()>,
}

impl InferenceLog {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn summary_path(&self) -> PathBuf {
        self.dir.join(SUMMARY_FILE)
    }

    pub fn record(
        &self,
        call_type: &str,
        request: &Value,
        response: &Value,
        usage: TokenUsage,
        inference_time_ms: u64,
    ) -> Result<SummaryRow, AgentError> {
        let _guard = self.write_lock.lock();
        fs::create_dir_all(&self.dir)?;

        let timestamp = self.unique_stamp(call_type);
        let request_file = format!("{call_type}_request_{timestamp}.json");
        let response_file = format!("{call_type}_response_{timestamp}.json");
        fs::write(
            self.dir.join(&request_file),
            serde_json::to_vec_pretty(request)?,
        )?;
        fs::write(
            self.dir.join(&response_file),
            serde_json::to_vec_pretty(response)?,
        )?;

        let row = SummaryRow {
            call_type: call_type.to_string(),
            timestamp,
            request_file,
            response_file,
            prompt_tokens: usage.prompt_tokens,
            completion_tokens: usage.completion_tokens,
            inference_time_ms,
        };

        let summary_path = self.summary_path();
        let needs_header = fs::metadata(&summary_path)
            .map(|meta| meta.len() == 0)
            .unwrap_or(true);
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&summary_path)?;
        let mut writer = csv::WriterBuilder::new()
            .has_headers(needs_header)
            .from_writer(file);
        writer.serialize(&row)?;
        writer.flush()?;
        Ok(row)
    }

    /// Millisecond stamp, suffixed when two calls of one type share it.
    fn unique_stamp(&self, call_type: &str) -> String {
        let base = Utc::now().format("%Y%m%dT%H%M%S%3f").to_string();
        let taken = |stamp: &str| {
            self.dir
                .join(format!("{call_type}_request_{stamp}.json"))
                .exists()
        };
        if !taken(&base) {
            return base;
        }
        (1u32..)
            .map(|n| format!("{base}-{n}"))
            .find(|candidate| !taken(candidate))
            .unwrap_or(base)
    }
}

/// Total a `summary.csv` overall and per call type.
pub fn summarize(path: impl AsRef<Path>) -> Result<InferenceSummary, AgentError> {
    let mut reader = csv::Reader::from_path(path.as_ref())?;
    let mut summary = InferenceSummary::default();
    for row in reader.deserialize::<SummaryRow>() {
        let row = row?;
        summary.total.add(&row);
        summary
            .by_type
            .entry(row.call_type.clone())
            .or_default()
            .add(&row);
    }
    Ok(summary)
}
