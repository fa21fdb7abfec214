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

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::config::Configuration;
use crate::BoxResult;

pub const SENDER_ROLE: &str = "sender";
pub const RECEIVER_ROLE: &str = "receiver";

pub fn get_unix_timestamp() -> f64 {
    match std::time::SystemTime::now().duration_since(std::time::SystemTime::UNIX_EPOCH) {
        Ok(duration) => duration.as_secs_f64(),
        Err(_) => 0.0, // the clock is before 1970; not worth aborting a run over
    }
}

/// Per-run statistics accumulator, owned by exactly one role for the
/// lifetime of one run.
pub struct PerfMonitor {
    bytes: u64,
    useful_bytes: u64,
    packets: u64,
    packets_lost: u64,
    max_packet_size: u64,
    started: Instant,
    stopped: Option<Instant>,
}

impl PerfMonitor {
    pub fn new() -> PerfMonitor {
        PerfMonitor {
            bytes: 0,
            useful_bytes: 0,
            packets: 0,
            packets_lost: 0,
            max_packet_size: 0,
            started: Instant::now(),
            stopped: None,
        }
    }

    /// every observed unit counts as useful; a reliable in-order stream
    /// never delivers duplicate or stale bytes to the application
    pub fn record_packet(&mut self, length: usize) {
        self.bytes += length as u64;
        self.useful_bytes += length as u64;
        self.packets += 1;
        self.max_packet_size = self.max_packet_size.max(length as u64);
    }

    /// Nothing invokes this over TCP; the transport hides segment loss
    /// from the application, so the loss rate it feeds is structurally
    /// zero. The path is kept so the record schema states that fact
    /// instead of omitting it.
    pub fn register_lost(&mut self) {
        self.packets_lost += 1;
    }

    pub fn stop(&mut self) {
        if self.stopped.is_none() {
            self.stopped = Some(Instant::now());
        }
    }

    pub fn bytes(&self) -> u64 {
        self.bytes
    }

    pub fn packets(&self) -> u64 {
        self.packets
    }

    pub fn max_packet_size(&self) -> u64 {
        self.max_packet_size
    }

    pub fn duration(&self) -> f64 {
        let end = self.stopped.unwrap_or_else(Instant::now);
        end.duration_since(self.started).as_secs_f64()
    }

    pub fn throughput(&self) -> f64 {
        let duration = self.duration();
        if duration > 0.0 {
            self.bytes as f64 / duration
        } else {
            0.0
        }
    }

    pub fn goodput(&self) -> f64 {
        let duration = self.duration();
        if duration > 0.0 {
            self.useful_bytes as f64 / duration
        } else {
            0.0
        }
    }

    pub fn loss_rate(&self) -> f64 {
        let observed = self.packets + self.packets_lost;
        if observed > 0 {
            self.packets_lost as f64 / observed as f64
        } else {
            0.0
        }
    }

    pub fn mean_packet_size(&self) -> f64 {
        if self.packets > 0 {
            self.bytes as f64 / self.packets as f64
        } else {
            0.0
        }
    }
}

impl Default for PerfMonitor {
    fn default() -> Self {
        Self::new()
    }
}

/// How a run ended.
#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum RunOutcome {
    /// the peer closed cleanly, or the sender's time budget elapsed
    Closed,
    /// the receive deadline expired; a normal run boundary, not a failure
    Timeout,
    /// the transfer was cut short by a transport error
    Failed,
}

/// The record one role persists at the end of one run. Sender and
/// receiver metrics share a schema, with the fields that do not apply
/// to a role left unset.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
pub struct RunRecord {
    pub role: String,
    pub run_id: uuid::Uuid,
    pub timestamp: f64,
    #[serde(flatten)]
    pub config: Configuration,
    pub outcome: RunOutcome,
    pub error: Option<String>,
    pub duration: f64,

    pub bytes_sent: Option<u64>,
    pub packets_sent: Option<u64>,
    pub mean_rate: Option<f64>,
    pub mean_packet_size: Option<f64>,

    pub bytes_received: Option<u64>,
    pub packets_received: Option<u64>,
    pub throughput: Option<f64>,
    pub goodput: Option<f64>,
    pub packet_loss_rate: Option<f64>,

    pub max_packet_size: Option<u64>,
}

impl RunRecord {
    pub fn sender(
        config: Configuration,
        monitor: &PerfMonitor,
        outcome: RunOutcome,
        error: Option<String>,
    ) -> RunRecord {
        RunRecord {
            role: SENDER_ROLE.to_string(),
            run_id: uuid::Uuid::new_v4(),
            timestamp: get_unix_timestamp(),
            config,
            outcome,
            error,
            duration: monitor.duration(),

            bytes_sent: Some(monitor.bytes()),
            packets_sent: Some(monitor.packets()),
            mean_rate: Some(monitor.throughput()),
            mean_packet_size: Some(monitor.mean_packet_size()),

            bytes_received: None,
            packets_received: None,
            throughput: None,
            goodput: None,
            packet_loss_rate: None,

            max_packet_size: Some(monitor.max_packet_size()),
        }
    }

    pub fn receiver(
        config: Configuration,
        monitor: &PerfMonitor,
        outcome: RunOutcome,
        error: Option<String>,
    ) -> RunRecord {
        RunRecord {
            role: RECEIVER_ROLE.to_string(),
            run_id: uuid::Uuid::new_v4(),
            timestamp: get_unix_timestamp(),
            config,
            outcome,
            error,
            duration: monitor.duration(),

            bytes_sent: None,
            packets_sent: None,
            mean_rate: None,
            mean_packet_size: None,

            bytes_received: Some(monitor.bytes()),
            packets_received: Some(monitor.packets()),
            throughput: Some(monitor.throughput()),
            goodput: Some(monitor.goodput()),
            packet_loss_rate: Some(monitor.loss_rate()),

            max_packet_size: Some(monitor.max_packet_size()),
        }
    }

    /// true unless the run was cut short by a transport error; timeouts
    /// are an expected boundary for the receiver
    pub fn complete(&self) -> bool {
        self.outcome != RunOutcome::Failed
    }
}

/// Filename encoding role, configuration, wall-clock time and a short
/// run id, so repeated or concurrent runs never collide.
fn record_filename(record: &RunRecord) -> String {
    let stamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
    let run_id = record.run_id.simple().to_string();
    format!(
        "{}_results_{}_{}_{}.json",
        record.role,
        record.config.label(),
        stamp,
        &run_id[..8]
    )
}

pub fn save_record(results_dir: &Path, record: &RunRecord) -> BoxResult<PathBuf> {
    fs::create_dir_all(results_dir)?;
    let path = results_dir.join(record_filename(record));
    fs::write(&path, serde_json::to_string_pretty(record)?)?;
    log::info!("results saved to {}", path.display());
    Ok(path)
}

/// Best-effort scan of the record store: files that are not well-formed
/// records are skipped with a warning, never a failure. A missing
/// directory yields an empty set.
pub fn collect_records(results_dir: &Path) -> BoxResult<Vec<RunRecord>> {
    let mut records = Vec::new();
    if !results_dir.is_dir() {
        return Ok(records);
    }

    for entry in fs::read_dir(results_dir)? {
        let path = entry?.path();
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }

        let parsed: crate::Result<RunRecord> = (|| {
            let text = fs::read_to_string(&path)?;
            Ok(serde_json::from_str(&text)?)
        })();
        match parsed {
            Ok(record) => records.push(record),
            Err(e) => log::warn!("skipping unreadable record {}: {}", path.display(), e),
        }
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;
    use std::time::Duration;

    fn temp_results_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "nagleperf-{}-{}",
            tag,
            uuid::Uuid::new_v4().simple()
        ));
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn monitor_tracks_packet_statistics() {
        let mut monitor = PerfMonitor::new();
        monitor.record_packet(100);
        monitor.record_packet(300);
        monitor.record_packet(200);
        sleep(Duration::from_millis(20));
        monitor.stop();

        assert_eq!(monitor.bytes(), 600);
        assert_eq!(monitor.packets(), 3);
        assert_eq!(monitor.max_packet_size(), 300);
        assert_eq!(monitor.mean_packet_size(), 200.0);
        assert!(monitor.throughput() > 0.0);
    }

    #[test]
    fn goodput_equals_throughput_without_a_loss_path() {
        let mut monitor = PerfMonitor::new();
        monitor.record_packet(4096);
        monitor.record_packet(512);
        sleep(Duration::from_millis(10));
        monitor.stop();

        assert_eq!(monitor.goodput(), monitor.throughput());
        assert_eq!(monitor.loss_rate(), 0.0);
    }

    #[test]
    fn loss_rate_reflects_registered_losses() {
        let mut monitor = PerfMonitor::new();
        monitor.record_packet(100);
        monitor.record_packet(100);
        monitor.record_packet(100);
        monitor.register_lost();
        monitor.stop();

        assert_eq!(monitor.loss_rate(), 0.25);
    }

    #[test]
    fn idle_monitor_reports_zeroes() {
        let mut monitor = PerfMonitor::new();
        monitor.stop();

        assert_eq!(monitor.bytes(), 0);
        assert_eq!(monitor.max_packet_size(), 0);
        assert_eq!(monitor.throughput(), 0.0);
        assert_eq!(monitor.goodput(), 0.0);
        assert_eq!(monitor.loss_rate(), 0.0);
        assert_eq!(monitor.mean_packet_size(), 0.0);
    }

    #[test]
    fn record_survives_a_store_round_trip() {
        let dir = temp_results_dir("roundtrip");
        let config = Configuration { nagle: true, delayed_ack: false };

        let mut monitor = PerfMonitor::new();
        monitor.record_packet(1500);
        monitor.record_packet(700);
        sleep(Duration::from_millis(5));
        monitor.stop();
        let record = RunRecord::receiver(config, &monitor, RunOutcome::Closed, None);

        save_record(&dir, &record).unwrap();
        let loaded = collect_records(&dir).unwrap();

        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0], record);
        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn parsing_a_record_is_idempotent() {
        let mut monitor = PerfMonitor::new();
        monitor.record_packet(64);
        monitor.stop();
        let record = RunRecord::sender(
            Configuration { nagle: false, delayed_ack: true },
            &monitor,
            RunOutcome::Closed,
            None,
        );

        let text = serde_json::to_string(&record).unwrap();
        let first: RunRecord = serde_json::from_str(&text).unwrap();
        let second: RunRecord = serde_json::from_str(&text).unwrap();
        assert_eq!(first, second);
        assert_eq!(first, record);
    }

    #[test]
    fn malformed_records_are_skipped() {
        let dir = temp_results_dir("malformed");

        let mut monitor = PerfMonitor::new();
        monitor.record_packet(256);
        monitor.stop();
        let record = RunRecord::sender(
            Configuration { nagle: true, delayed_ack: true },
            &monitor,
            RunOutcome::Closed,
            None,
        );
        save_record(&dir, &record).unwrap();
        fs::write(dir.join("sender_results_broken.json"), "{not json").unwrap();
        fs::write(dir.join("notes.txt"), "not a record").unwrap();

        let loaded = collect_records(&dir).unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0], record);
        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn missing_directory_yields_no_records() {
        let dir = std::env::temp_dir().join(format!(
            "nagleperf-absent-{}",
            uuid::Uuid::new_v4().simple()
        ));
        assert!(collect_records(&dir).unwrap().is_empty());
    }
}
