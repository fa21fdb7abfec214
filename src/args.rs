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

use clap::Parser;

#[derive(Parser, Debug, Clone)]
#[command(
    name = "nagleperf",
    version,
    about = "measures the interaction of Nagle's algorithm and delayed ACKs over TCP"
)]
pub struct Args {
    /// run only the receiver role, listening on the base port
    #[arg(long, conflicts_with = "sender")]
    pub receiver: bool,

    /// run only the sender role against host:base-port
    #[arg(long, conflicts_with = "receiver")]
    pub sender: bool,

    /// host the sender connects to and the receiver binds
    #[arg(long, default_value = "127.0.0.1")]
    pub host: String,

    /// first port of the experiment matrix; single-role runs use it
    /// directly
    #[arg(short = 'p', long, default_value_t = 8000)]
    pub base_port: u16,

    /// enable Nagle's algorithm (single-role runs; the matrix covers
    /// all four combinations itself)
    #[arg(long)]
    pub nagle: bool,

    /// enable delayed ACKs (single-role runs)
    #[arg(long)]
    pub delayed_ack: bool,

    /// size of the cyclic test payload, in bytes
    #[arg(long, default_value_t = 4096)]
    pub data_size: usize,

    /// target pacing rate, in bytes per second
    #[arg(long, default_value_t = 40)]
    pub rate: u64,

    /// duration of each run, in seconds
    #[arg(long, default_value_t = 120.0)]
    pub duration: f64,

    /// directory holding result records and report artifacts
    #[arg(long, default_value = "results")]
    pub results_dir: String,

    /// skip the runs and rebuild the report from existing records
    #[arg(long)]
    pub report_only: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_documented_experiment() {
        let args = Args::parse_from(["nagleperf"]);
        assert_eq!(args.base_port, 8000);
        assert_eq!(args.data_size, 4096);
        assert_eq!(args.rate, 40);
        assert_eq!(args.duration, 120.0);
        assert!(!args.sender);
        assert!(!args.receiver);
    }

    #[test]
    fn single_role_flags_are_exclusive() {
        assert!(Args::try_parse_from(["nagleperf", "--sender", "--receiver"]).is_err());
    }

    #[test]
    fn role_and_options_parse_together() {
        let args = Args::parse_from([
            "nagleperf",
            "--receiver",
            "--nagle",
            "--delayed-ack",
            "-p",
            "9000",
            "--duration",
            "5",
        ]);
        assert!(args.receiver);
        assert!(args.nagle);
        assert!(args.delayed_ack);
        assert_eq!(args.base_port, 9000);
        assert_eq!(args.duration, 5.0);
    }
}
