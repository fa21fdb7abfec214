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

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

use crate::args::Args;
use crate::config::Configuration;
use crate::report;
use crate::results::{self, RunRecord, RECEIVER_ROLE, SENDER_ROLE};
use crate::stream::tcp::{receiver::TcpReceiver, sender::TcpSender};
use crate::BoxResult;

/// extra window, in seconds, the receiver keeps waiting beyond the
/// nominal run duration
pub const RECEIVE_GRACE: f64 = 5.0;

/// when false, no further runs are scheduled
static ALIVE: AtomicBool = AtomicBool::new(true);

pub fn kill() -> bool {
    ALIVE.swap(false, Ordering::Relaxed)
}
fn is_alive() -> bool {
    ALIVE.load(Ordering::Relaxed)
}

/// Drives the four-configuration matrix sequentially, one run at a
/// time on its own port, then rebuilds the comparison report from the
/// record store.
pub fn run_matrix(args: &Args) -> BoxResult<()> {
    let results_dir = PathBuf::from(&args.results_dir);

    if !args.report_only {
        for (run_idx, config) in Configuration::MATRIX.iter().enumerate() {
            if !is_alive() {
                log::warn!("shutdown requested; skipping the remaining configurations");
                break;
            }
            let port = args.base_port + run_idx as u16;

            log::info!("{}", "=".repeat(80));
            log::info!("starting test on port {}: {}", port, config.describe());
            log::info!("{}", "=".repeat(80));

            if let Err(e) = run_pair(*config, args, port, &results_dir) {
                log::error!("test failed [{}]: {}", config.label(), e);
            }
        }
    }

    aggregate(&results_dir)
}

/// One run: the receiver binds first (its constructor is the readiness
/// signal), then the sender runs to completion on this thread, then the
/// receiver is joined. The join is bounded by the receiver's own read
/// deadline, so a stalled peer cannot wedge the matrix.
fn run_pair(config: Configuration, args: &Args, port: u16, results_dir: &Path) -> BoxResult<()> {
    let max_wait = args.duration + RECEIVE_GRACE;
    let mut receiver = TcpReceiver::new(config, &args.host, port, max_wait, results_dir)?;

    // both roles are constructed before the receiver thread starts; a
    // construction failure after the spawn would detach the receiver
    // into the next configuration's run
    let mut sender = TcpSender::new(
        config,
        &args.host,
        port,
        args.data_size,
        args.rate,
        args.duration,
        results_dir,
    )?;

    let receiver_handle = thread::Builder::new()
        .name(format!("receiver-{}", config.label()))
        .spawn(move || receiver.run())?;

    if let Err(e) = sender.run() {
        log::error!("sender failed [{}]: {}", config.label(), e);
    }

    match receiver_handle.join() {
        Ok(Ok(_)) => (),
        Ok(Err(e)) => log::error!("receiver failed [{}]: {}", config.label(), e),
        Err(_) => log::error!("receiver thread panicked [{}]", config.label()),
    }
    Ok(())
}

/// Loads every record the store holds and produces the comparison
/// artifacts. Aggregation is read-only and best-effort: it reports on
/// whatever records exist, complete or not.
pub fn aggregate(results_dir: &Path) -> BoxResult<()> {
    let records = results::collect_records(results_dir)?;
    if records.is_empty() {
        log::warn!("no result records found in {}; nothing to report", results_dir.display());
        return Ok(());
    }

    let senders = latest_per_configuration(&records, SENDER_ROLE);
    let receivers = latest_per_configuration(&records, RECEIVER_ROLE);
    log::info!(
        "aggregating {} sender and {} receiver configurations from {}",
        senders.len(),
        receivers.len(),
        results_dir.display()
    );

    report::generate(results_dir, &senders, &receivers)
}

/// One row per configuration: repeated runs keep only the newest
/// record, ordered as the matrix runs them.
fn latest_per_configuration(records: &[RunRecord], role: &str) -> Vec<RunRecord> {
    let mut newest: HashMap<Configuration, RunRecord> = HashMap::new();
    for record in records.iter().filter(|r| r.role == role) {
        match newest.entry(record.config) {
            Entry::Occupied(mut e) => {
                if record.timestamp > e.get().timestamp {
                    e.insert(record.clone());
                }
            }
            Entry::Vacant(e) => {
                e.insert(record.clone());
            }
        }
    }

    let mut rows: Vec<RunRecord> = newest.into_values().collect();
    rows.sort_by_key(|r| r.config.matrix_key());
    rows
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::results::{PerfMonitor, RunOutcome};

    fn record_with(config: Configuration, timestamp: f64) -> RunRecord {
        let mut monitor = PerfMonitor::new();
        monitor.record_packet(100);
        monitor.stop();
        let mut record = RunRecord::receiver(config, &monitor, RunOutcome::Closed, None);
        record.timestamp = timestamp;
        record
    }

    #[test]
    fn keeps_the_newest_record_per_configuration() {
        let config = Configuration { nagle: true, delayed_ack: true };
        let stale = record_with(config, 100.0);
        let fresh = record_with(config, 200.0);
        let records = vec![stale, fresh.clone()];

        let rows = latest_per_configuration(&records, RECEIVER_ROLE);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0], fresh);
    }

    #[test]
    fn rows_follow_the_matrix_order() {
        let mut records = Vec::new();
        for (i, config) in Configuration::MATRIX.iter().rev().enumerate() {
            records.push(record_with(*config, i as f64));
        }

        let rows = latest_per_configuration(&records, RECEIVER_ROLE);
        assert_eq!(rows.len(), 4);
        let configs: Vec<Configuration> = rows.iter().map(|r| r.config).collect();
        assert_eq!(configs, Configuration::MATRIX.to_vec());
    }

    #[test]
    fn failed_sender_construction_leaves_no_stray_receiver() {
        let dir = std::env::temp_dir().join(format!(
            "nagleperf-harness-{}",
            uuid::Uuid::new_v4().simple()
        ));
        std::fs::create_dir_all(&dir).unwrap();

        // an invalid duration fails sender construction; the receiver's
        // wait window (duration + grace) stays short so a wrongly
        // spawned receiver would persist a timeout record almost
        // immediately
        let args = Args {
            receiver: false,
            sender: false,
            host: "127.0.0.1".to_string(),
            base_port: 0,
            nagle: false,
            delayed_ack: false,
            data_size: 4096,
            rate: 40,
            duration: -4.9,
            results_dir: dir.to_string_lossy().into_owned(),
            report_only: false,
        };
        let config = Configuration { nagle: true, delayed_ack: true };

        let start = std::time::Instant::now();
        assert!(run_pair(config, &args, 0, &dir).is_err());
        assert!(start.elapsed().as_secs_f64() < 2.0, "run_pair did not fail fast");

        // neither role ran, so nothing may show up in the record store,
        // not even after a detached thread would have finished
        std::thread::sleep(std::time::Duration::from_millis(700));
        assert!(results::collect_records(&dir).unwrap().is_empty());

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn roles_are_kept_apart() {
        let config = Configuration { nagle: false, delayed_ack: false };
        let records = vec![record_with(config, 1.0)];
        assert!(latest_per_configuration(&records, SENDER_ROLE).is_empty());
    }
}
