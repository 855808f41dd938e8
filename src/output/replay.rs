//! Reading an outcome log back
//!
//! A log may hold several passes over the same workload. Successful records
//! are kept once per request; failed requests can be extracted for a later
//! pass, and the log can be compacted down to its successes.

use crate::output::sink::OutcomeRecord;
use crate::output::traits::{OutputError, OutputResult};
use serde_json::Value;
use std::collections::HashSet;
use std::fs;
use std::io::{BufRead, BufReader, Write};
use std::path::Path;

/// Result of compacting a log in place
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompactReport {
    /// Successful records kept
    pub kept: usize,

    /// Failed records dropped
    pub dropped_failed: usize,

    /// Repeated successes of the same request dropped
    pub dropped_duplicates: usize,
}

/// Reads every record of a log
///
/// Blank lines are skipped; any other unparsable line is an error.
pub fn read_records(path: &Path) -> OutputResult<Vec<OutcomeRecord>> {
    let reader = BufReader::new(fs::File::open(path)?);
    let mut records = Vec::new();

    for (index, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let record = serde_json::from_str(&line).map_err(|e| OutputError::Malformed {
            line: index + 1,
            message: e.to_string(),
        })?;
        records.push(record);
    }

    Ok(records)
}

/// Key identifying the same request across passes
fn request_key(record: &OutcomeRecord) -> String {
    let metadata = record.metadata.as_ref().map(Value::to_string).unwrap_or_default();
    format!("{}\u{1f}{}", record.request, metadata)
}

/// Successful records, first occurrence per request
pub fn successful_records(path: &Path) -> OutputResult<Vec<OutcomeRecord>> {
    let mut seen = HashSet::new();
    Ok(read_records(path)?
        .into_iter()
        .filter(|r| !r.is_failed())
        .filter(|r| seen.insert(request_key(r)))
        .collect())
}

/// Requests that failed and never succeeded in any pass
///
/// Each request is returned as an input line for another pass, with its
/// metadata merged back under the `metadata` key.
pub fn failed_requests(path: &Path) -> OutputResult<Vec<Value>> {
    let records = read_records(path)?;
    let succeeded: HashSet<String> = records
        .iter()
        .filter(|r| !r.is_failed())
        .map(request_key)
        .collect();

    let mut seen = HashSet::new();
    let mut requests = Vec::new();
    for record in records.into_iter().filter(|r| r.is_failed()) {
        let key = request_key(&record);
        if succeeded.contains(&key) || !seen.insert(key) {
            continue;
        }

        let mut request = record.request;
        if let (Value::Object(map), Some(metadata)) = (&mut request, record.metadata) {
            map.insert("metadata".to_string(), metadata);
        }
        requests.push(request);
    }

    Ok(requests)
}

/// Writes requests as JSONL, one per line
pub fn write_requests(path: &Path, requests: &[Value]) -> OutputResult<()> {
    let mut file = fs::File::create(path)?;
    for request in requests {
        writeln!(file, "{}", serde_json::to_string(request)?)?;
    }
    Ok(())
}

/// Rewrites the log keeping only the first success of each request
///
/// Running it again on a compacted log changes nothing.
pub fn compact_log(path: &Path) -> OutputResult<CompactReport> {
    let records = read_records(path)?;
    let total = records.len();
    let failed = records.iter().filter(|r| r.is_failed()).count();
    let kept = successful_records(path)?;

    let tmp = path.with_extension("jsonl.tmp");
    {
        let mut file = fs::File::create(&tmp)?;
        for record in &kept {
            writeln!(file, "{}", serde_json::to_string(record)?)?;
        }
        file.flush()?;
    }
    fs::rename(&tmp, path)?;

    let report = CompactReport {
        kept: kept.len(),
        dropped_failed: failed,
        dropped_duplicates: total - failed - kept.len(),
    };

    tracing::info!(
        "Compacted {}: kept {}, dropped {} failed and {} duplicate record(s)",
        path.display(),
        report.kept,
        report.dropped_failed,
        report.dropped_duplicates
    );

    Ok(report)
}
