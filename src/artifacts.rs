//! Result artifacts written to the output directory
//!
//! Every artifact writer is deterministic: given the same inputs it produces
//! byte-identical files, so re-running a report step never dirties a results
//! directory that is under version control or checksummed.

use crate::defaults;
use crate::error::Result;
use crate::monitor::MonitorSample;
use crate::orchestrator::CampaignResult;
use crate::report::StatsReport;
use crate::runner::PairResult;
use serde_json::json;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

fn report_to_strings(report: Option<&StatsReport>) -> BTreeMap<String, String> {
    report
        .map(|r| r.iter().map(|(k, v)| (k.clone(), v.to_string())).collect())
        .unwrap_or_default()
}

/// Side-by-side server/client comparison table for one pair.
///
/// Rows are the sorted union of both sides' metric names; a metric one side
/// lacks gets the `N/A` sentinel rather than an empty cell.
pub fn write_comparison<P: AsRef<Path>>(path: P, result: &PairResult) -> Result<()> {
    write_comparison_maps(
        path,
        &report_to_strings(result.server.as_ref()),
        &report_to_strings(result.client.as_ref()),
    )
}

/// Comparison table from already-stringified metric maps (the shape the
/// store hands back).
pub fn write_comparison_maps<P: AsRef<Path>>(
    path: P,
    server: &BTreeMap<String, String>,
    client: &BTreeMap<String, String>,
) -> Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let metrics: BTreeSet<&String> = server.keys().chain(client.keys()).collect();

    let mut writer = csv::Writer::from_path(path)?;
    writer.write_record(["Metric", "Server", "Client"])?;
    for metric in metrics {
        let server_value = server
            .get(metric)
            .map(String::as_str)
            .unwrap_or(defaults::MISSING_METRIC);
        let client_value = client
            .get(metric)
            .map(String::as_str)
            .unwrap_or(defaults::MISSING_METRIC);
        writer.write_record([metric.as_str(), server_value, client_value])?;
    }
    writer.flush()?;
    Ok(())
}

/// Full resource-sample series as CSV
pub fn write_monitor_series<P: AsRef<Path>>(path: P, samples: &[MonitorSample]) -> Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut writer = csv::Writer::from_path(path)?;
    writer.write_record([
        "Timestamp",
        "CPU_Usage_Percent",
        "RAM_Used_MB",
        "RAM_Total_MB",
        "RAM_Usage_Percent",
    ])?;
    for sample in samples {
        writer.write_record([
            sample.timestamp.as_str(),
            &sample.cpu_usage.to_string(),
            &sample.ram_used_mb.to_string(),
            &sample.ram_total_mb.to_string(),
            &sample.ram_usage.to_string(),
        ])?;
    }
    writer.flush()?;
    Ok(())
}

/// Campaign-level JSON summary: per-pair metric maps plus how much of the
/// resource series was captured.
pub fn write_campaign_summary<P: AsRef<Path>>(path: P, result: &CampaignResult) -> Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let pairs: BTreeMap<String, serde_json::Value> = result
        .pairs
        .iter()
        .map(|(index, pair_result)| {
            let side = |report: Option<&StatsReport>| match report {
                Some(report) => json!(report_to_strings(Some(report))),
                None => serde_json::Value::Null,
            };
            (
                index.to_string(),
                json!({
                    "server": side(pair_result.server.as_ref()),
                    "client": side(pair_result.client.as_ref()),
                }),
            )
        })
        .collect();

    let summary = json!({
        "pairs": pairs,
        "monitor_samples": result.monitor.len(),
    });
    let text = serde_json::to_string_pretty(&summary)?;
    std::fs::write(path, text)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::MetricValue;

    fn report(entries: &[(&str, MetricValue)]) -> StatsReport {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_comparison_union_and_sentinel() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pair0_comparison.csv");
        let result = PairResult {
            server: Some(report(&[
                ("Received:", MetricValue::Integer(999_900)),
                ("Errors:", MetricValue::Integer(0)),
            ])),
            client: Some(report(&[
                ("Sent:", MetricValue::Integer(1_000_000)),
                ("Errors:", MetricValue::Integer(3)),
            ])),
        };
        write_comparison(&path, &result).unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines[0], "Metric,Server,Client");
        assert_eq!(lines[1], "Errors:,0,3");
        assert_eq!(lines[2], "Received:,999900,N/A");
        assert_eq!(lines[3], "Sent:,N/A,1000000");
    }

    #[test]
    fn test_comparison_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cmp.csv");
        let result = PairResult {
            server: Some(report(&[("Sent:", MetricValue::Integer(10))])),
            client: None,
        };
        write_comparison(&path, &result).unwrap();
        let first = std::fs::read(&path).unwrap();
        write_comparison(&path, &result).unwrap();
        let second = std::fs::read(&path).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_comparison_with_both_sides_absent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.csv");
        let result = PairResult {
            server: None,
            client: None,
        };
        write_comparison(&path, &result).unwrap();
        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents.trim(), "Metric,Server,Client");
    }

    #[test]
    fn test_monitor_series() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("monitor.csv");
        let samples = vec![MonitorSample {
            timestamp: "2026-08-31 12:00:00".to_string(),
            cpu_usage: 12.5,
            ram_used_mb: 1024,
            ram_total_mb: 8192,
            ram_usage: 12.5,
        }];
        write_monitor_series(&path, &samples).unwrap();
        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.contains("2026-08-31 12:00:00,12.5,1024,8192,12.5"));
    }

    #[test]
    fn test_campaign_summary_shape() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("summary.json");
        let mut pairs = BTreeMap::new();
        pairs.insert(
            0usize,
            PairResult {
                server: Some(report(&[("Sent:", MetricValue::Integer(5))])),
                client: None,
            },
        );
        let campaign = CampaignResult {
            pairs,
            monitor: Vec::new(),
        };
        write_campaign_summary(&path, &campaign).unwrap();

        let value: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(value["pairs"]["0"]["server"]["Sent:"], "5");
        assert!(value["pairs"]["0"]["client"].is_null());
        assert_eq!(value["monitor_samples"], 0);
    }
}
