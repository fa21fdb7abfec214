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

use std::path::PathBuf;

use clap::Parser;

use nagleperf::args::Args;
use nagleperf::config::Configuration;
use nagleperf::harness;
use nagleperf::stream::tcp::{receiver::TcpReceiver, sender::TcpSender};
use nagleperf::BoxResult;

fn main() -> BoxResult<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();

    let _ctrlc_handle = ctrlc2::set_handler(move || {
        if harness::kill() {
            log::warn!("shutdown requested; stopping after the current run");
        }
        true
    })?;

    let results_dir = PathBuf::from(&args.results_dir);
    let config = Configuration {
        nagle: args.nagle,
        delayed_ack: args.delayed_ack,
    };

    if args.receiver {
        let max_wait = args.duration + harness::RECEIVE_GRACE;
        let mut receiver = TcpReceiver::new(config, &args.host, args.base_port, max_wait, &results_dir)?;
        receiver.run()?;
    } else if args.sender {
        let mut sender = TcpSender::new(
            config,
            &args.host,
            args.base_port,
            args.data_size,
            args.rate,
            args.duration,
            &results_dir,
        )?;
        sender.run()?;
    } else {
        harness::run_matrix(&args)?;
    }
    Ok(())
}
