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

pub mod sender {
    use std::io::Write;
    use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
    use std::path::{Path, PathBuf};
    use std::thread::sleep;
    use std::time::{Duration, Instant};

    use rand::Rng;

    use crate::config::Configuration;
    use crate::limiter::RateLimiter;
    use crate::results::{self, PerfMonitor, RunOutcome, RunRecord};
    use crate::stream::PROGRESS_INTERVAL;
    use crate::{error_gen, BoxResult};

    const CONNECT_TIMEOUT: Duration = Duration::from_secs(2);
    const CONNECT_ATTEMPTS: u32 = 10;
    const CONNECT_RETRY_DELAY: Duration = Duration::from_millis(250);

    /// Generates traffic at a bounded rate against one receiver and
    /// reports what was actually sent.
    pub struct TcpSender {
        config: Configuration,
        socket_addr: SocketAddr,
        payload: Vec<u8>,
        rate: u64,
        duration: Duration,
        results_dir: PathBuf,
    }

    impl TcpSender {
        pub fn new(
            config: Configuration,
            host: &str,
            port: u16,
            data_size: usize,
            rate: u64,
            duration: f64,
            results_dir: &Path,
        ) -> BoxResult<TcpSender> {
            if data_size == 0 {
                return Err(Box::new(error_gen!("data-size must be positive")));
            }
            if !duration.is_finite() || duration < 0.0 {
                return Err(Box::new(error_gen!("duration must be a non-negative number of seconds")));
            }
            if rate == 0 {
                return Err(Box::new(error_gen!("rate must be positive")));
            }
            let socket_addr = (host, port)
                .to_socket_addrs()?
                .next()
                .ok_or_else(|| Box::new(error_gen!("no address found for {}:{}", host, port)))?;

            Ok(TcpSender {
                config,
                socket_addr,
                payload: build_payload(data_size),
                rate,
                duration: Duration::from_secs_f64(duration),
                results_dir: results_dir.to_path_buf(),
            })
        }

        /// Bounded retries with a fixed delay stand in for out-of-band
        /// startup synchronisation with the receiver.
        fn connect(&self) -> BoxResult<TcpStream> {
            let mut last_error: Option<std::io::Error> = None;
            for attempt in 1..=CONNECT_ATTEMPTS {
                match TcpStream::connect_timeout(&self.socket_addr, CONNECT_TIMEOUT) {
                    Ok(stream) => return Ok(stream),
                    Err(e) => {
                        log::debug!(
                            "connect attempt {}/{} to {} failed: {}",
                            attempt,
                            CONNECT_ATTEMPTS,
                            self.socket_addr,
                            e
                        );
                        last_error = Some(e);
                        sleep(CONNECT_RETRY_DELAY);
                    }
                }
            }
            match last_error {
                Some(e) => Err(Box::new(error_gen!("unable to connect to {}: {}", self.socket_addr, e))),
                None => Err(Box::new(error_gen!("unable to connect to {}", self.socket_addr))),
            }
        }

        /// Runs the paced transfer to completion and persists the
        /// resulting record. A failed connect is the only path that
        /// leaves no record behind; once connected, every exit persists
        /// whatever statistics were accumulated.
        pub fn run(&mut self) -> BoxResult<RunRecord> {
            let mut stream = self.connect()?;
            self.config.transport_options().apply_stream(&stream)?;
            log::info!("connected to {} [{}]", self.socket_addr, self.config.describe());

            let mut limiter = RateLimiter::new(self.rate as f64)?;
            let mut rng = rand::thread_rng();
            let mut monitor = PerfMonitor::new();

            let start = Instant::now();
            let mut last_report = start;
            let mut outcome = RunOutcome::Closed;
            let mut error: Option<String> = None;

            while start.elapsed() < self.duration {
                // the payload is cyclic: chunks never read past the end
                // of a cycle, so the stream outlives any payload size
                let position = (monitor.bytes() % self.payload.len() as u64) as usize;
                let remaining = self.payload.len() - position;
                let max_chunk = self.rate.min(remaining as u64).max(1) as usize;
                let chunk_size = rng.gen_range(1..=max_chunk);
                let chunk = &self.payload[position..position + chunk_size];

                limiter.limit(chunk.len());

                if let Err(e) = stream.write_all(chunk) {
                    log::error!("write failed after {} bytes: {}", monitor.bytes(), e);
                    outcome = RunOutcome::Failed;
                    error = Some(e.to_string());
                    break;
                }
                monitor.record_packet(chunk.len());

                if last_report.elapsed() >= PROGRESS_INTERVAL {
                    log::info!(
                        "sent {} bytes in {} packets ({:.2} bytes/sec)",
                        monitor.bytes(),
                        monitor.packets(),
                        monitor.throughput()
                    );
                    last_report = Instant::now();
                }
            }
            monitor.stop();

            // closed on every path, not just the happy one
            let _ = stream.shutdown(Shutdown::Both);
            drop(stream);

            let record = RunRecord::sender(self.config, &monitor, outcome, error);
            log::info!(
                "sender done [{}]: {} bytes in {} packets over {:.2}s ({:.2} bytes/sec, max packet {} bytes)",
                self.config.label(),
                monitor.bytes(),
                monitor.packets(),
                monitor.duration(),
                monitor.throughput(),
                monitor.max_packet_size()
            );
            results::save_record(&self.results_dir, &record)?;
            Ok(record)
        }
    }

    /// fixed byte sequence; only size and timing matter to the test
    fn build_payload(length: usize) -> Vec<u8> {
        let mut payload = vec![0_u8; length];
        for (i, payload_i) in payload.iter_mut().enumerate() {
            *payload_i = (i % 256) as u8;
        }
        payload
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn payload_cycles_through_a_fixed_sequence() {
            let payload = build_payload(600);
            assert_eq!(payload.len(), 600);
            assert_eq!(payload[0], 0);
            assert_eq!(payload[255], 255);
            assert_eq!(payload[256], 0);
        }

        #[test]
        fn zero_data_size_is_rejected() {
            let config = Configuration { nagle: true, delayed_ack: true };
            assert!(TcpSender::new(config, "127.0.0.1", 9, 0, 40, 1.0, Path::new(".")).is_err());
        }

        #[test]
        fn zero_rate_is_rejected() {
            let config = Configuration { nagle: true, delayed_ack: true };
            assert!(TcpSender::new(config, "127.0.0.1", 9, 4096, 0, 1.0, Path::new(".")).is_err());
        }
    }
}

pub mod receiver {
    use std::io::{ErrorKind, Read};
    use std::net::{Shutdown, TcpListener, TcpStream, ToSocketAddrs};
    use std::path::{Path, PathBuf};
    use std::thread::sleep;
    use std::time::{Duration, Instant};

    use crate::config::Configuration;
    use crate::results::{self, PerfMonitor, RunOutcome, RunRecord};
    use crate::stream::{PROGRESS_INTERVAL, RECEIVE_CHUNK_SIZE};
    use crate::{error_gen, BoxResult};

    const ACCEPT_POLL_TIMEOUT: Duration = Duration::from_millis(250);

    /// Accepts exactly one connection, absorbs what the peer produces
    /// within a bounded window, and reports reception statistics.
    pub struct TcpReceiver {
        config: Configuration,
        listener: TcpListener,
        max_wait: Duration,
        results_dir: PathBuf,
    }

    impl TcpReceiver {
        /// The listener is bound here, before `run`, so a caller holding
        /// a constructed receiver knows the port is ready for the peer.
        pub fn new(
            config: Configuration,
            host: &str,
            port: u16,
            max_wait: f64,
            results_dir: &Path,
        ) -> BoxResult<TcpReceiver> {
            let bind_addr = (host, port)
                .to_socket_addrs()?
                .next()
                .ok_or_else(|| Box::new(error_gen!("no address found for {}:{}", host, port)))?;

            let listener = TcpListener::bind(bind_addr)?;
            listener.set_nonblocking(true)?;
            config.transport_options().apply_listener(&listener)?;
            log::info!("listening on {} [{}]", listener.local_addr()?, config.describe());

            Ok(TcpReceiver {
                config,
                listener,
                max_wait: Duration::from_secs_f64(max_wait.max(0.001)),
                results_dir: results_dir.to_path_buf(),
            })
        }

        pub fn local_port(&self) -> BoxResult<u16> {
            Ok(self.listener.local_addr()?.port())
        }

        /// Every exit path, including timeouts and resets, produces and
        /// persists a record; the aggregation pass depends on finding
        /// one per run per role.
        pub fn run(&mut self) -> BoxResult<RunRecord> {
            let deadline = Instant::now() + self.max_wait;
            let mut monitor = PerfMonitor::new();
            let mut outcome = RunOutcome::Timeout;
            let mut error: Option<String> = None;

            match self.accept_one(deadline) {
                Ok(Some(mut stream)) => {
                    // listener options do not carry over to accepted
                    // sockets, so they are applied a second time here
                    if let Err(e) = self.config.transport_options().apply_stream(&stream) {
                        log::warn!("unable to apply transport options to the connection: {}", e);
                    }
                    (outcome, error) = self.receive_into(&mut stream, deadline, &mut monitor);
                    let _ = stream.shutdown(Shutdown::Both);
                }
                Ok(None) => {
                    log::warn!(
                        "no connection within {:.1}s; giving up",
                        self.max_wait.as_secs_f64()
                    );
                }
                Err(e) => {
                    log::error!("accept failed: {}", e);
                    outcome = RunOutcome::Failed;
                    error = Some(e.to_string());
                }
            }
            monitor.stop();

            let record = RunRecord::receiver(self.config, &monitor, outcome, error);
            log::info!(
                "receiver done [{}]: {} bytes in {} packets over {:.2}s ({:.2} bytes/sec, max packet {} bytes)",
                self.config.label(),
                monitor.bytes(),
                monitor.packets(),
                monitor.duration(),
                monitor.throughput(),
                monitor.max_packet_size()
            );
            results::save_record(&self.results_dir, &record)?;
            Ok(record)
        }

        fn accept_one(&self, deadline: Instant) -> BoxResult<Option<TcpStream>> {
            loop {
                match self.listener.accept() {
                    Ok((stream, address)) => {
                        log::info!("connection from {}", address);
                        return Ok(Some(stream));
                    }
                    Err(ref e) if e.kind() == ErrorKind::WouldBlock => {
                        let now = Instant::now();
                        if now >= deadline {
                            return Ok(None);
                        }
                        sleep(ACCEPT_POLL_TIMEOUT.min(deadline - now));
                    }
                    Err(e) => return Err(Box::new(e)),
                }
            }
        }

        fn receive_into(
            &self,
            stream: &mut TcpStream,
            deadline: Instant,
            monitor: &mut PerfMonitor,
        ) -> (RunOutcome, Option<String>) {
            if let Err(e) = self.prepare_stream(stream, deadline) {
                log::error!("unable to prepare the connection for receiving: {}", e);
                return (RunOutcome::Failed, Some(e.to_string()));
            }

            let mut buf = vec![0_u8; RECEIVE_CHUNK_SIZE];
            let mut last_report = Instant::now();
            loop {
                if Instant::now() >= deadline {
                    log::warn!("receive deadline reached with the peer still connected");
                    return (RunOutcome::Timeout, None);
                }

                match stream.read(&mut buf) {
                    Ok(0) => {
                        // the peer closed its side; transfer complete
                        return (RunOutcome::Closed, None);
                    }
                    Ok(packet_size) => {
                        monitor.record_packet(packet_size);
                        if last_report.elapsed() >= PROGRESS_INTERVAL {
                            log::info!(
                                "received {} bytes in {} packets",
                                monitor.bytes(),
                                monitor.packets()
                            );
                            last_report = Instant::now();
                        }
                    }
                    Err(ref e) if e.kind() == ErrorKind::WouldBlock || e.kind() == ErrorKind::TimedOut => {
                        log::warn!("timed out waiting for data");
                        return (RunOutcome::Timeout, None);
                    }
                    Err(e) => {
                        // e.g. connection reset by peer
                        log::error!("read failed after {} bytes: {}", monitor.bytes(), e);
                        return (RunOutcome::Failed, Some(e.to_string()));
                    }
                }
            }
        }

        fn prepare_stream(&self, stream: &mut TcpStream, deadline: Instant) -> BoxResult<()> {
            // the accepted socket must block, with the remaining window
            // as its read deadline
            stream.set_nonblocking(false)?;
            let remaining = deadline
                .saturating_duration_since(Instant::now())
                .max(Duration::from_millis(1));
            stream.set_read_timeout(Some(remaining))?;
            Ok(())
        }
    }
}
