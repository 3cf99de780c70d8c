//! dperf completion-report parsing
//!
//! At the end of a run dperf prints a `dperf Test Finished` banner followed
//! by a totals section. The totals are laid out as label/value pairs spread
//! over whitespace-aligned columns, e.g.:
//!
//! ```text
//! dperf Test Finished
//!
//! Total Numbers
//! Sent:                 1,000,000     Received:             999,900
//! Errors:               0             Retransmissions:      12
//! ```
//!
//! Parsing tokenizes the section and pairs tokens up; numeric values keep
//! their meaning (commas stripped), anything else survives verbatim. Labels
//! keep their trailing colon so the artifact rows read like the raw report.

use crate::sink::clean_ansi;
use std::collections::BTreeMap;
use std::fmt;

/// Banner dperf prints when a run completes normally
pub const COMPLETION_MARKER: &str = "dperf Test Finished";

/// Header of the totals section within the completion report
pub const TOTALS_HEADER: &str = "Total Numbers";

/// One parsed statistic value
#[derive(Debug, Clone, PartialEq)]
pub enum MetricValue {
    Integer(i64),
    /// Non-numeric values (rates with units, durations) kept verbatim
    Text(String),
}

impl fmt::Display for MetricValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Integer(n) => write!(f, "{}", n),
            Self::Text(s) => write!(f, "{}", s),
        }
    }
}

/// Parsed totals, ordered by metric name for stable artifact output
pub type StatsReport = BTreeMap<String, MetricValue>;

/// Extract the totals from a captured dperf log.
///
/// Returns `None` when the log has no completion banner; a crashed or
/// interrupted run produces no report rather than a partial one.
pub fn parse_report(log: &str) -> Option<StatsReport> {
    let text = clean_ansi(log);
    let marker_at = text.find(COMPLETION_MARKER)?;
    let after_marker = &text[marker_at + COMPLETION_MARKER.len()..];

    // prefer the totals section; older builds print the pairs directly
    // after the banner without the header line
    let section = match after_marker.find(TOTALS_HEADER) {
        Some(at) => &after_marker[at + TOTALS_HEADER.len()..],
        None => after_marker,
    };

    let mut report = StatsReport::new();
    for line in section.lines() {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        // pairing restarts on every line, so one odd trailing token never
        // shifts the labels of the lines after it
        for pair in tokens.chunks(2) {
            if let [label, value] = pair {
                report.insert((*label).to_string(), parse_value(value));
            }
        }
    }
    Some(report)
}

fn parse_value(token: &str) -> MetricValue {
    let digits = token.replace(',', "");
    match digits.parse::<i64>() {
        Ok(n) => MetricValue::Integer(n),
        Err(_) => MetricValue::Text(token.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple_totals() {
        let log = "\
launching workers\n\
dperf Test Finished\n\
\n\
Total Numbers\n\
Sent:       1,000,000\n\
Received:   999,900\n\
Errors:     0\n";
        let report = parse_report(log).unwrap();
        assert_eq!(report.get("Sent:"), Some(&MetricValue::Integer(1_000_000)));
        assert_eq!(report.get("Received:"), Some(&MetricValue::Integer(999_900)));
        assert_eq!(report.get("Errors:"), Some(&MetricValue::Integer(0)));
        assert_eq!(report.len(), 3);
    }

    #[test]
    fn test_parse_multi_column_layout() {
        let log = "\
dperf Test Finished\n\
\n\
Total Numbers\n\
pktRx:      12,345,678     pktTx:      12,345,600\n\
bitsRx:     987,654,321    bitsTx:     987,000,000\n\
dropTx:     0              tcpFlow:    2,000,000\n";
        let report = parse_report(log).unwrap();
        assert_eq!(report.len(), 6);
        assert_eq!(report.get("pktRx:"), Some(&MetricValue::Integer(12_345_678)));
        assert_eq!(report.get("tcpFlow:"), Some(&MetricValue::Integer(2_000_000)));
    }

    #[test]
    fn test_missing_marker_yields_no_report() {
        let log = "workers launching\nsending traffic\nkilled\n";
        assert!(parse_report(log).is_none());
    }

    #[test]
    fn test_non_numeric_values_survive_verbatim() {
        let log = "\
dperf Test Finished\n\
Total Numbers\n\
Duration:   30s\n\
Rate:       9.8Gbps\n\
Sent:       500\n";
        let report = parse_report(log).unwrap();
        assert_eq!(
            report.get("Duration:"),
            Some(&MetricValue::Text("30s".to_string()))
        );
        assert_eq!(
            report.get("Rate:"),
            Some(&MetricValue::Text("9.8Gbps".to_string()))
        );
        assert_eq!(report.get("Sent:"), Some(&MetricValue::Integer(500)));
    }

    #[test]
    fn test_ansi_decorated_log() {
        let log = "\x1b[1mdperf Test Finished\x1b[0m\nTotal Numbers\nSent: \x1b[32m42\x1b[0m\n";
        let report = parse_report(log).unwrap();
        assert_eq!(report.get("Sent:"), Some(&MetricValue::Integer(42)));
    }

    #[test]
    fn test_missing_totals_header_falls_back_to_banner() {
        let log = "dperf Test Finished\nSent: 10 Received: 9\n";
        let report = parse_report(log).unwrap();
        assert_eq!(report.get("Sent:"), Some(&MetricValue::Integer(10)));
        assert_eq!(report.get("Received:"), Some(&MetricValue::Integer(9)));
    }

    #[test]
    fn test_odd_trailing_token_is_ignored() {
        let log = "dperf Test Finished\nTotal Numbers\nSent: 10 Dangling\n";
        let report = parse_report(log).unwrap();
        assert_eq!(report.len(), 1);
        assert!(report.contains_key("Sent:"));
    }

    #[test]
    fn test_odd_token_does_not_shift_later_lines() {
        let log = "dperf Test Finished\nTotal Numbers\nSent: 10 Dangling\nReceived: 9\n";
        let report = parse_report(log).unwrap();
        assert_eq!(report.get("Sent:"), Some(&MetricValue::Integer(10)));
        assert_eq!(report.get("Received:"), Some(&MetricValue::Integer(9)));
        assert!(!report.contains_key("Dangling"));
    }

    #[test]
    fn test_report_iterates_in_sorted_order() {
        let log = "dperf Test Finished\nTotal Numbers\nzeta: 1 alpha: 2\n";
        let report = parse_report(log).unwrap();
        let keys: Vec<&str> = report.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["alpha:", "zeta:"]);
    }

    #[test]
    fn test_metric_value_display() {
        assert_eq!(MetricValue::Integer(1_000_000).to_string(), "1000000");
        assert_eq!(MetricValue::Text("9.8Gbps".into()).to_string(), "9.8Gbps");
    }
}
