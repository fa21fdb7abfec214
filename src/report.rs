/*
 * This file is part of nagleperf.
 *
 * nagleperf is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * nagleperf is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with nagleperf.  If not, see <https://www.gnu.org/licenses/>.
 */

use std::fmt::Write as _;
use std::fs;
use std::path::Path;

use crate::results::{RunRecord, RECEIVER_ROLE, SENDER_ROLE};
use crate::BoxResult;

const BAR_WIDTH: usize = 50;

/// one comparable numeric column of the report
struct Metric {
    title: &'static str,
    unit: &'static str,
    get: fn(&RunRecord) -> Option<f64>,
}

fn receiver_metrics() -> Vec<Metric> {
    vec![
        Metric { title: "Throughput", unit: "bytes/sec", get: |r| r.throughput },
        Metric { title: "Goodput", unit: "bytes/sec", get: |r| r.goodput },
        // structurally zero over a reliable stream; reported so the
        // absence of loss visibility is explicit rather than implied
        Metric { title: "Packet Loss Rate", unit: "", get: |r| r.packet_loss_rate },
        Metric {
            title: "Maximum Packet Size",
            unit: "bytes",
            get: |r| r.max_packet_size.map(|v| v as f64),
        },
    ]
}

fn sender_metrics() -> Vec<Metric> {
    vec![
        Metric { title: "Average Rate", unit: "bytes/sec", get: |r| r.mean_rate },
        Metric { title: "Average Packet Size", unit: "bytes", get: |r| r.mean_packet_size },
        Metric {
            title: "Maximum Packet Size",
            unit: "bytes",
            get: |r| r.max_packet_size.map(|v| v as f64),
        },
    ]
}

/// Writes every aggregate artifact: per-role CSV summaries, the
/// human-readable comparison report, and one bar chart per metric.
pub fn generate(out_dir: &Path, senders: &[RunRecord], receivers: &[RunRecord]) -> BoxResult<()> {
    fs::create_dir_all(out_dir)?;

    write_summary_csv(out_dir, SENDER_ROLE, &sender_metrics(), senders)?;
    write_summary_csv(out_dir, RECEIVER_ROLE, &receiver_metrics(), receivers)?;
    write_comparison_report(out_dir, senders, receivers)?;

    for metric in receiver_metrics() {
        write_chart(out_dir, RECEIVER_ROLE, &metric, receivers)?;
    }
    for metric in sender_metrics() {
        write_chart(out_dir, SENDER_ROLE, &metric, senders)?;
    }
    Ok(())
}

fn write_summary_csv(out_dir: &Path, role: &str, metrics: &[Metric], rows: &[RunRecord]) -> BoxResult<()> {
    let mut out = String::from("nagle,delayed_ack,outcome,duration");
    for metric in metrics {
        out.push(',');
        out.push_str(&slug(metric.title));
    }
    out.push('\n');

    for row in rows {
        let _ = write!(
            out,
            "{},{},{:?},{:.4}",
            row.config.nagle, row.config.delayed_ack, row.outcome, row.duration
        );
        for metric in metrics {
            match (metric.get)(row) {
                Some(value) => {
                    let _ = write!(out, ",{:.4}", value);
                }
                None => out.push(','),
            }
        }
        out.push('\n');
    }

    let path = out_dir.join(format!("{}_summary.csv", role));
    fs::write(&path, out)?;
    log::info!("summary written to {}", path.display());
    Ok(())
}

fn write_comparison_report(out_dir: &Path, senders: &[RunRecord], receivers: &[RunRecord]) -> BoxResult<()> {
    let rule = "=".repeat(80);
    let thin_rule = "-".repeat(80);

    let mut out = String::new();
    let _ = writeln!(out, "{}", rule);
    let _ = writeln!(
        out,
        "TCP/IP Performance Comparison with Different Nagle and Delayed-ACK Settings"
    );
    let _ = writeln!(out, "{}\n", rule);

    write_metric_section(&mut out, &thin_rule, "RECEIVER-SIDE METRICS", &receiver_metrics(), receivers);
    write_metric_section(&mut out, &thin_rule, "SENDER-SIDE METRICS", &sender_metrics(), senders);

    let _ = writeln!(out, "{}", thin_rule);
    let _ = writeln!(out, "ANALYSIS AND OBSERVATIONS");
    let _ = writeln!(out, "{}\n", thin_rule);
    out.push_str(ANALYSIS_NOTES);

    let path = out_dir.join("comparison_report.txt");
    fs::write(&path, out)?;
    log::info!("comparison report written to {}", path.display());
    Ok(())
}

fn write_metric_section(
    out: &mut String,
    thin_rule: &str,
    heading: &str,
    metrics: &[Metric],
    rows: &[RunRecord],
) {
    let _ = writeln!(out, "{}", thin_rule);
    let _ = writeln!(out, "{}", heading);
    let _ = writeln!(out, "{}\n", thin_rule);

    for metric in metrics {
        if rows.iter().all(|r| (metric.get)(r).is_none()) {
            log::warn!("metric \"{}\" is absent from all records; omitting it from the report", metric.title);
            continue;
        }
        let _ = writeln!(out, "{} Comparison:", metric.title);
        for row in rows {
            let Some(value) = (metric.get)(row) else {
                continue;
            };
            // runs cut short by a transport error are flagged, never
            // passed off as clean measurements
            let marker = if row.complete() { "" } else { " (incomplete run)" };
            let unit = if metric.unit.is_empty() {
                String::new()
            } else {
                format!(" {}", metric.unit)
            };
            let _ = writeln!(out, "  {}: {:.2}{}{}", row.config.describe(), value, unit, marker);
        }
        out.push('\n');
    }
}

/// A horizontal text bar chart per metric, one bar per configuration.
/// Metrics absent from every record are skipped with a log line.
fn write_chart(out_dir: &Path, role: &str, metric: &Metric, rows: &[RunRecord]) -> BoxResult<()> {
    let bars: Vec<(String, f64)> = rows
        .iter()
        .filter_map(|r| (metric.get)(r).map(|v| (chart_label(r), v)))
        .collect();
    if bars.is_empty() {
        log::warn!(
            "metric \"{}\" is absent from all {} records; skipping its chart",
            metric.title,
            role
        );
        return Ok(());
    }

    let max_value = bars.iter().fold(0.0_f64, |acc, (_, v)| acc.max(*v));

    let mut out = String::new();
    if metric.unit.is_empty() {
        let _ = writeln!(out, "{} Comparison\n", metric.title);
    } else {
        let _ = writeln!(out, "{} Comparison ({})\n", metric.title, metric.unit);
    }
    for (label, value) in &bars {
        let width = if max_value > 0.0 {
            ((value / max_value) * BAR_WIDTH as f64).round() as usize
        } else {
            0
        };
        let _ = writeln!(out, "{:<12} | {:<width$} | {:.2}", label, "#".repeat(width), value, width = BAR_WIDTH);
    }

    let path = out_dir.join(format!("{}_{}_comparison.txt", role, slug(metric.title)));
    fs::write(&path, out)?;
    log::info!("chart written to {}", path.display());
    Ok(())
}

fn chart_label(record: &RunRecord) -> String {
    format!(
        "N:{} D:{}",
        if record.config.nagle { "On" } else { "Off" },
        if record.config.delayed_ack { "On" } else { "Off" }
    )
}

fn slug(title: &str) -> String {
    title.to_lowercase().replace(' ', "_")
}

const ANALYSIS_NOTES: &str = "\
Effects of Nagle's Algorithm:
  Nagle's algorithm reduces network overhead by combining small writes
  into larger segments. When enabled it lowers the packet count and
  raises the average packet size, which suits bulk transfers but adds
  latency for interactive traffic.

Effects of Delayed-ACK:
  Delayed ACKs withhold acknowledgments briefly so they can ride along
  with other traffic. When enabled they reduce the number of pure ACK
  segments on the wire at the cost of slower feedback to the sender.

Interaction Between Nagle and Delayed-ACK:
  With both enabled the two mechanisms can deadlock briefly: the sender
  withholds a small segment until an ACK arrives, while the receiver
  withholds that ACK waiting for more data. For small paced writes this
  interaction is the dominant performance effect under test here.

Choosing a Configuration:
  - bulk transfer: Nagle enabled, Delayed-ACK enabled
  - interactive traffic: Nagle disabled, Delayed-ACK workload-dependent
  - minimal latency: both disabled
";

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Configuration;
    use crate::results::{PerfMonitor, RunOutcome};
    use std::path::PathBuf;

    fn temp_out_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "nagleperf-report-{}-{}",
            tag,
            uuid::Uuid::new_v4().simple()
        ));
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn matrix_records(role: &str) -> Vec<RunRecord> {
        Configuration::MATRIX
            .iter()
            .map(|config| {
                let mut monitor = PerfMonitor::new();
                monitor.record_packet(1000);
                monitor.record_packet(500);
                monitor.stop();
                if role == SENDER_ROLE {
                    RunRecord::sender(*config, &monitor, RunOutcome::Closed, None)
                } else {
                    RunRecord::receiver(*config, &monitor, RunOutcome::Closed, None)
                }
            })
            .collect()
    }

    #[test]
    fn generates_every_artifact_for_a_full_matrix() {
        let dir = temp_out_dir("full");
        let senders = matrix_records(SENDER_ROLE);
        let receivers = matrix_records(RECEIVER_ROLE);

        generate(&dir, &senders, &receivers).unwrap();

        for file in [
            "sender_summary.csv",
            "receiver_summary.csv",
            "comparison_report.txt",
            "receiver_throughput_comparison.txt",
            "receiver_goodput_comparison.txt",
            "receiver_packet_loss_rate_comparison.txt",
            "receiver_maximum_packet_size_comparison.txt",
            "sender_average_rate_comparison.txt",
            "sender_average_packet_size_comparison.txt",
            "sender_maximum_packet_size_comparison.txt",
        ] {
            assert!(dir.join(file).is_file(), "missing artifact {}", file);
        }

        let csv = fs::read_to_string(dir.join("receiver_summary.csv")).unwrap();
        assert_eq!(csv.lines().count(), 5, "expected a header and four rows");

        let report = fs::read_to_string(dir.join("comparison_report.txt")).unwrap();
        assert!(report.contains("Throughput Comparison:"));
        assert!(report.contains("Average Rate Comparison:"));
        assert_eq!(report.matches("Nagle's Algorithm: Enabled, Delayed-ACK: Enabled").count(), 7);

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn metrics_absent_everywhere_are_skipped_not_fatal() {
        let dir = temp_out_dir("absent");
        let mut receivers = matrix_records(RECEIVER_ROLE);
        for record in &mut receivers {
            record.throughput = None;
        }

        generate(&dir, &[], &receivers).unwrap();

        assert!(!dir.join("receiver_throughput_comparison.txt").exists());
        assert!(dir.join("receiver_goodput_comparison.txt").is_file());

        let report = fs::read_to_string(dir.join("comparison_report.txt")).unwrap();
        assert!(!report.contains("Throughput Comparison:"));
        assert!(report.contains("Goodput Comparison:"));

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn incomplete_runs_are_flagged_in_the_report() {
        let dir = temp_out_dir("incomplete");
        let mut receivers = matrix_records(RECEIVER_ROLE);
        receivers[0].outcome = RunOutcome::Failed;
        receivers[0].error = Some("connection reset by peer".to_string());

        generate(&dir, &[], &receivers).unwrap();

        let report = fs::read_to_string(dir.join("comparison_report.txt")).unwrap();
        assert!(report.contains("(incomplete run)"));

        fs::remove_dir_all(&dir).unwrap();
    }
}
