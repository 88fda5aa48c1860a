//! CSV result report.

use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::channels::TestResult;
use crate::config::DeviceConfig;

pub const HEADER: [&str; 5] = ["scenario", "channel", "status", "details", "timestamp"];
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Summary {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
}

impl Summary {
    pub fn of(results: &[TestResult]) -> Self {
        let passed = results.iter().filter(|r| r.passed).count();
        Self {
            total: results.len(),
            passed,
            failed: results.len() - passed,
        }
    }
}

/// `{device}_{YYYYmmdd_HHMMSS}_{modem}_{firmware}.csv`, `unknown` for missing parts.
pub fn report_file_name(device: &DeviceConfig, at: DateTime<Local>) -> String {
    let info = &device.device;
    let part = |value: &Option<String>| {
        value
            .as_deref()
            .filter(|v| !v.trim().is_empty())
            .unwrap_or("unknown")
            .to_string()
    };
    format!(
        "{}_{}_{}_{}.csv",
        info.name,
        at.format("%Y%m%d_%H%M%S"),
        part(&info.modem),
        part(&info.firmware)
    )
}

/// Quotes a field when it holds a comma, quote or line break (RFC 4180).
pub fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

fn csv_line<'a>(fields: impl IntoIterator<Item = &'a str>) -> String {
    let mut line = fields
        .into_iter()
        .map(csv_field)
        .collect::<Vec<_>>()
        .join(",");
    line.push_str("\r\n");
    line
}

pub fn render_csv(results: &[TestResult]) -> String {
    let mut out = csv_line(HEADER);
    for result in results {
        let timestamp = result.timestamp.format(TIMESTAMP_FORMAT).to_string();
        out.push_str(&csv_line([
            result.scenario.as_str(),
            result.channel.as_str(),
            result.status(),
            result.details.as_str(),
            timestamp.as_str(),
        ]));
    }
    out
}

/// Writes the report under `results_dir` and logs the totals.
pub fn write_report(
    results: &[TestResult],
    device: &DeviceConfig,
    results_dir: &Path,
) -> Result<PathBuf> {
    fs::create_dir_all(results_dir)
        .with_context(|| format!("Failed to create results directory: {:?}", results_dir))?;

    let path = results_dir.join(report_file_name(device, Local::now()));
    fs::write(&path, render_csv(results))
        .with_context(|| format!("Failed to write report: {:?}", path))?;

    let summary = Summary::of(results);
    info!("Results written to {:?}", path);
    info!(
        "Total: {}, Passed: {}, Failed: {}",
        summary.total, summary.passed, summary.failed
    );
    Ok(path)
}
