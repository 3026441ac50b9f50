use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{debug, warn};

use crate::domain::RunId;
use crate::error::RunError;

use super::results::{ResultReader, ResultRow};

/// Host resource collected by the agent during a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    Cpu,
    Disk,
    Memory,
    Network,
}

impl MetricKind {
    pub const ALL: [Self; 4] = [Self::Cpu, Self::Disk, Self::Memory, Self::Network];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Cpu => "cpu",
            Self::Disk => "disk",
            Self::Memory => "memory",
            Self::Network => "network",
        }
    }

    /// `<prefix>_<kind>_result.csv`, where the prefix is the run workspace
    /// joined with the run id.
    #[must_use]
    pub fn file_in(self, dir: &Path, run_id: &RunId) -> PathBuf {
        dir.join(format!("{}_{}_result.csv", run_id, self.as_str()))
    }
}

/// Raw values are written scaled; `multiple` brings them back to `unit`.
struct TagUnit {
    multiple: f64,
    unit: &'static str,
}

fn tag_unit(tag: &str) -> Option<TagUnit> {
    let (multiple, unit) = match tag {
        "cpu_all_combined" | "cpu_all_idle" | "memory_all_used" | "memory_all_free" => {
            (0.001, "%")
        }
        "memory_all_used_kb" | "memory_all_free_kb" => (0.000_001, "mb"),
        "disk_read_kb" | "disk_write_kb" => (0.001, "kb"),
        "disk_use" => (0.001, "%"),
        "disk_total" => (0.000_001, "mb"),
        "network_recv_kb" => (0.000_001, "kb"),
        "network_sent_kb" => (0.001, "kb"),
        _ => return None,
    };
    Some(TagUnit { multiple, unit })
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricSample {
    pub timestamp_ms: u64,
    pub value: f64,
}

/// Samples for one monitored tag, e.g. `cpu_all_combined`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricSeries {
    pub kind: MetricKind,
    pub tag: String,
    pub unit: String,
    pub count: u64,
    pub min: f64,
    pub max: f64,
    pub average: f64,
    pub samples: Vec<MetricSample>,
}

/// A sample the agent reported as failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricFailure {
    pub kind: MetricKind,
    pub label: String,
    pub timestamp_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunMetrics {
    pub run_id: RunId,
    pub series: Vec<MetricSeries>,
    pub failures: Vec<MetricFailure>,
    /// Kinds whose file was never written.
    pub missing: Vec<MetricKind>,
}

struct Columns {
    timestamp: usize,
    value: usize,
    label: usize,
    success: usize,
}

impl Columns {
    fn locate(header: &[String]) -> Result<Self, RunError> {
        let require = |name: &'static str| {
            header
                .iter()
                .position(|column| column == name)
                .ok_or(RunError::MissingColumn { column: name })
        };
        Ok(Self {
            timestamp: require("timeStamp")?,
            value: require("elapsed")?,
            label: require("label")?,
            success: require("success")?,
        })
    }
}

#[derive(Default)]
struct Collector {
    order: Vec<String>,
    series: HashMap<String, MetricSeries>,
    failures: Vec<MetricFailure>,
}

impl Collector {
    fn push(&mut self, kind: MetricKind, columns: &Columns, row: &ResultRow, line: usize) {
        let fields = (
            row.get(columns.timestamp),
            row.get(columns.value),
            row.get(columns.label),
            row.get(columns.success),
        );
        let (Some(timestamp), Some(reading), Some(label), Some(success)) = fields else {
            warn!(kind = kind.as_str(), line, "Metric row is missing fields");
            return;
        };
        let (Ok(timestamp_ms), Ok(raw)) = (
            timestamp.trim().parse::<u64>(),
            reading.trim().parse::<i64>(),
        ) else {
            warn!(kind = kind.as_str(), line, "Metric row has a non-numeric field");
            return;
        };

        if success.trim() == "false" {
            self.failures.push(MetricFailure {
                kind,
                label: label.clone(),
                timestamp_ms,
            });
            return;
        }

        // Labels read "<host:port> <tag>"; only the tag matters.
        let tag = label.rsplit(' ').next().unwrap_or(label.as_str());
        let Some(unit) = tag_unit(tag) else {
            debug!(tag, "Skipping unknown metric tag");
            return;
        };
        let value = (raw as f64 * unit.multiple * 1000.0).round() / 1000.0;

        if !self.series.contains_key(tag) {
            self.order.push(tag.to_owned());
        }
        let series = self
            .series
            .entry(tag.to_owned())
            .or_insert_with(|| MetricSeries {
                kind,
                tag: tag.to_owned(),
                unit: unit.unit.to_owned(),
                count: 0,
                min: value,
                max: value,
                average: 0.0,
                samples: Vec::new(),
            });
        series.count = series.count.saturating_add(1);
        series.min = series.min.min(value);
        series.max = series.max.max(value);
        series.samples.push(MetricSample {
            timestamp_ms,
            value,
        });
    }

    fn finish(mut self, run_id: RunId, missing: Vec<MetricKind>) -> RunMetrics {
        let series = self
            .order
            .iter()
            .filter_map(|tag| self.series.remove(tag))
            .map(|mut series| {
                let total: f64 = series.samples.iter().map(|sample| sample.value).sum();
                if series.count > 0 {
                    series.average = total / series.count as f64;
                }
                series
            })
            .collect();
        RunMetrics {
            run_id,
            series,
            failures: self.failures,
            missing,
        }
    }
}

/// Reads every resource file the agent left in `dir` for `run_id`.
///
/// Kinds without a file are listed in [`RunMetrics::missing`]. Rows with
/// unknown tags or non-numeric fields are skipped.
///
/// # Errors
///
/// Returns [`RunError::MissingColumn`] when a file lacks a required header,
/// and parse or I/O errors from the reader.
pub async fn read_metrics(dir: &Path, run_id: &RunId) -> Result<RunMetrics, RunError> {
    let mut collector = Collector::default();
    let mut missing = Vec::new();
    for kind in MetricKind::ALL {
        let mut reader = match ResultReader::open(&kind.file_in(dir, run_id)).await {
            Ok(reader) => reader,
            Err(RunError::ResultNotFound { .. }) => {
                missing.push(kind);
                continue;
            }
            Err(err) => return Err(err),
        };
        let Some(header) = reader.next_row().await? else {
            continue;
        };
        let columns = Columns::locate(&header)?;
        // Header is line 1.
        let mut line = 1usize;
        while let Some(row) = reader.next_row().await? {
            line = line.saturating_add(1);
            collector.push(kind, &columns, &row, line);
        }
    }
    Ok(collector.finish(run_id.clone(), missing))
}

#[cfg(test)]
mod tests {
    use super::*;

    const CPU_CSV: &str = "timeStamp,elapsed,label,responseCode,responseMessage,threadName,dataType,success\n\
1700000000000,12500,10.0.0.5:4444 CPU cpu_all_combined,,,,,true\n\
1700000001000,37500,10.0.0.5:4444 CPU cpu_all_combined,,,,,true\n\
1700000001000,0,10.0.0.5:4444 CPU cpu_all_combined,,,,,false\n\
1700000002000,1,10.0.0.5:4444 CPU cpu_user,,,,,true\n\
1700000002000,n/a,10.0.0.5:4444 CPU cpu_all_idle,,,,,true\n";

    const MEMORY_CSV: &str = "timeStamp,elapsed,label,success\n\
1700000000000,2048000000,10.0.0.5:4444 Memory memory_all_used_kb,true\n";

    fn run_id() -> RunId {
        RunId::from_parts(1_700_000_000_000, 42)
    }

    async fn write(dir: &Path, kind: MetricKind, body: &str) -> Result<(), String> {
        tokio::fs::write(kind.file_in(dir, &run_id()), body)
            .await
            .map_err(|err| format!("write failed: {}", err))
    }

    #[tokio::test(flavor = "current_thread")]
    async fn metrics_are_scaled_per_tag() -> Result<(), String> {
        let dir = tempfile::tempdir().map_err(|err| format!("tempdir failed: {}", err))?;
        write(dir.path(), MetricKind::Cpu, CPU_CSV).await?;
        write(dir.path(), MetricKind::Memory, MEMORY_CSV).await?;

        let metrics = read_metrics(dir.path(), &run_id())
            .await
            .map_err(|err| err.to_string())?;
        if metrics.missing != [MetricKind::Disk, MetricKind::Network] {
            return Err(format!("Unexpected missing kinds: {:?}", metrics.missing));
        }
        let tags: Vec<&str> = metrics.series.iter().map(|series| series.tag.as_str()).collect();
        if tags != ["cpu_all_combined", "memory_all_used_kb"] {
            return Err(format!("Unexpected tags: {:?}", tags));
        }

        let cpu = metrics
            .series
            .first()
            .ok_or_else(|| "Missing cpu series".to_owned())?;
        if cpu.unit != "%" || cpu.count != 2 || cpu.min != 12.5 || cpu.max != 37.5 {
            return Err(format!("Unexpected cpu series: {:?}", cpu));
        }
        if (cpu.average - 25.0).abs() > f64::EPSILON {
            return Err(format!("Unexpected cpu average: {}", cpu.average));
        }

        let memory = metrics
            .series
            .get(1)
            .ok_or_else(|| "Missing memory series".to_owned())?;
        if memory.kind != MetricKind::Memory || memory.unit != "mb" || memory.max != 2048.0 {
            return Err(format!("Unexpected memory series: {:?}", memory));
        }

        match metrics.failures.as_slice() {
            [failure] if failure.kind == MetricKind::Cpu && failure.timestamp_ms == 1_700_000_001_000 => {
                Ok(())
            }
            other => Err(format!("Unexpected failures: {:?}", other)),
        }
    }

    #[tokio::test(flavor = "current_thread")]
    async fn no_files_means_every_kind_is_missing() -> Result<(), String> {
        let dir = tempfile::tempdir().map_err(|err| format!("tempdir failed: {}", err))?;
        let metrics = read_metrics(dir.path(), &run_id())
            .await
            .map_err(|err| err.to_string())?;
        if metrics.missing != MetricKind::ALL || !metrics.series.is_empty() {
            return Err(format!("Unexpected metrics: {:?}", metrics));
        }
        Ok(())
    }

    #[tokio::test(flavor = "current_thread")]
    async fn header_without_value_column_is_rejected() -> Result<(), String> {
        let dir = tempfile::tempdir().map_err(|err| format!("tempdir failed: {}", err))?;
        write(dir.path(), MetricKind::Disk, "timeStamp,label,success\n1,a disk_use,true\n").await?;
        match read_metrics(dir.path(), &run_id()).await {
            Err(RunError::MissingColumn { column: "elapsed" }) => Ok(()),
            other => Err(format!("Expected missing column, got {:?}", other)),
        }
    }
}
