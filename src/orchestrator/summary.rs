use serde::Serialize;

use crate::error::RunError;

use super::results::ResultRow;

/// Aggregate statistics for one sampler label.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LabelSummary {
    pub label: String,
    pub request_count: u64,
    pub average: f64,
    pub median: f64,
    pub ninety_percent: f64,
    pub ninety_five: f64,
    pub ninety_nine: f64,
    pub min_time: f64,
    pub max_time: f64,
    pub error_percent: f64,
    pub throughput: f64,
    pub received_kb: f64,
    pub sent_kb: f64,
}

struct Columns {
    timestamp: usize,
    elapsed: usize,
    label: usize,
    success: usize,
    bytes: Option<usize>,
    sent_bytes: Option<usize>,
}

impl Columns {
    fn locate(header: &[String]) -> Result<Self, RunError> {
        let find = |name: &str| header.iter().position(|column| column == name);
        let require = |name: &'static str| find(name).ok_or(RunError::MissingColumn { column: name });
        Ok(Self {
            timestamp: require("timeStamp")?,
            elapsed: require("elapsed")?,
            label: require("label")?,
            success: require("success")?,
            bytes: find("bytes"),
            sent_bytes: find("sentBytes"),
        })
    }
}

#[derive(Default)]
struct LabelSamples {
    elapsed: Vec<u64>,
    errors: u64,
    bytes: u64,
    sent_bytes: u64,
    first_ts: Option<u64>,
    last_ts: Option<u64>,
}

fn field<'row>(row: &'row [String], idx: usize, line: usize) -> Result<&'row str, RunError> {
    row.get(idx)
        .map(String::as_str)
        .ok_or_else(|| RunError::Parse {
            line,
            message: format!("missing field #{}", idx),
        })
}

fn number(row: &[String], idx: usize, line: usize) -> Result<u64, RunError> {
    let value = field(row, idx, line)?;
    value.trim().parse::<u64>().map_err(|_err| RunError::Parse {
        line,
        message: format!("'{}' is not a number", value),
    })
}

/// Nearest-rank percentile over an ascending list.
fn percentile(sorted: &[u64], fraction: f64) -> f64 {
    let rank = (sorted.len() as f64 * fraction).ceil() as usize;
    sorted
        .get(rank.saturating_sub(1))
        .map_or(0.0, |value| *value as f64)
}

fn median(sorted: &[u64]) -> f64 {
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        match (sorted.get(mid.wrapping_sub(1)), sorted.get(mid)) {
            (Some(low), Some(high)) => (*low as f64 + *high as f64) / 2.0,
            _ => 0.0,
        }
    } else {
        sorted.get(mid).map_or(0.0, |value| *value as f64)
    }
}

/// Groups rows by label, in order of first appearance. `rows` starts with the
/// generator's CSV header.
///
/// # Errors
///
/// Returns [`RunError::MissingColumn`] when a required header is absent and
/// [`RunError::Parse`] when a numeric field does not parse.
pub fn summarize(rows: &[ResultRow]) -> Result<Vec<LabelSummary>, RunError> {
    let Some((header, samples)) = rows.split_first() else {
        return Ok(Vec::new());
    };
    let columns = Columns::locate(header)?;

    let mut order: Vec<String> = Vec::new();
    let mut groups: std::collections::HashMap<String, LabelSamples> =
        std::collections::HashMap::new();
    for (idx, row) in samples.iter().enumerate() {
        // Header is line 1.
        let line = idx.saturating_add(2);
        let label = field(row, columns.label, line)?;
        let timestamp = number(row, columns.timestamp, line)?;
        let elapsed = number(row, columns.elapsed, line)?;
        let bytes = columns
            .bytes
            .map(|col| number(row, col, line))
            .transpose()?
            .unwrap_or(0);
        let sent_bytes = columns
            .sent_bytes
            .map(|col| number(row, col, line))
            .transpose()?
            .unwrap_or(0);
        let failed = field(row, columns.success, line)?.trim() != "true";

        if !groups.contains_key(label) {
            order.push(label.to_owned());
        }
        let group = groups.entry(label.to_owned()).or_default();
        group.elapsed.push(elapsed);
        group.errors = group.errors.saturating_add(u64::from(failed));
        group.bytes = group.bytes.saturating_add(bytes);
        group.sent_bytes = group.sent_bytes.saturating_add(sent_bytes);
        group.first_ts = Some(group.first_ts.map_or(timestamp, |ts| ts.min(timestamp)));
        group.last_ts = Some(group.last_ts.map_or(timestamp, |ts| ts.max(timestamp)));
    }

    Ok(order
        .into_iter()
        .filter_map(|label| {
            let group = groups.remove(&label)?;
            Some(summarize_label(label, group))
        })
        .collect())
}

fn summarize_label(label: String, mut group: LabelSamples) -> LabelSummary {
    group.elapsed.sort_unstable();
    let count = group.elapsed.len() as f64;
    let total = group.elapsed.iter().copied().fold(0u64, u64::saturating_add);
    let span_ms = match (group.first_ts, group.last_ts) {
        (Some(first), Some(last)) => last.saturating_sub(first) as f64,
        _ => 0.0,
    };
    let per_second = |amount: f64| {
        if span_ms > 0.0 {
            amount / span_ms * 1000.0
        } else {
            0.0
        }
    };

    LabelSummary {
        label,
        request_count: group.elapsed.len() as u64,
        average: if count > 0.0 { total as f64 / count } else { 0.0 },
        median: median(&group.elapsed),
        ninety_percent: percentile(&group.elapsed, 0.90),
        ninety_five: percentile(&group.elapsed, 0.95),
        ninety_nine: percentile(&group.elapsed, 0.99),
        min_time: group.elapsed.first().map_or(0.0, |value| *value as f64),
        max_time: group.elapsed.last().map_or(0.0, |value| *value as f64),
        error_percent: if count > 0.0 {
            group.errors as f64 / count * 100.0
        } else {
            0.0
        },
        throughput: per_second(count),
        received_kb: per_second(group.bytes as f64 / 1024.0),
        sent_kb: per_second(group.sent_bytes as f64 / 1024.0),
    }
}
