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

use std::net::{TcpListener, TcpStream};

use serde::{Deserialize, Serialize};

/// One of the four experiment variants: whether the sender coalesces
/// small writes (Nagle's algorithm) and whether the receiver delays
/// acknowledgments.
#[derive(Clone, Copy, Serialize, Deserialize, Debug, Default, PartialEq, Eq, Hash)]
pub struct Configuration {
    pub nagle: bool,
    pub delayed_ack: bool,
}

impl Configuration {
    /// run order for the experiment matrix: both coalescing behaviours
    /// enabled first, both disabled last
    pub const MATRIX: [Configuration; 4] = [
        Configuration { nagle: true, delayed_ack: true },
        Configuration { nagle: true, delayed_ack: false },
        Configuration { nagle: false, delayed_ack: true },
        Configuration { nagle: false, delayed_ack: false },
    ];

    /// filename-safe tag, e.g. `nagleOn_delayedackOff`
    pub fn label(&self) -> String {
        format!(
            "nagle{}_delayedack{}",
            if self.nagle { "On" } else { "Off" },
            if self.delayed_ack { "On" } else { "Off" }
        )
    }

    pub fn describe(&self) -> String {
        format!(
            "Nagle's Algorithm: {}, Delayed-ACK: {}",
            if self.nagle { "Enabled" } else { "Disabled" },
            if self.delayed_ack { "Enabled" } else { "Disabled" }
        )
    }

    /// the socket options are the negations of the behaviours under test
    pub fn transport_options(&self) -> TransportOptions {
        TransportOptions {
            no_delay: !self.nagle,
            quick_ack: !self.delayed_ack,
        }
    }

    /// sort key matching the order of [`Configuration::MATRIX`]
    pub fn matrix_key(&self) -> (bool, bool) {
        (!self.nagle, !self.delayed_ack)
    }
}

/// Socket-level toggles derived from a [`Configuration`]. Options set
/// on a listening socket do not carry over to accepted connections, so
/// the receiver applies these twice.
#[derive(Clone, Copy, Debug)]
pub struct TransportOptions {
    /// `TCP_NODELAY`: disables send-side coalescing
    pub no_delay: bool,
    /// `TCP_QUICKACK`: disables ack-delay; Linux-only
    pub quick_ack: bool,
}

impl TransportOptions {
    pub fn apply_stream(&self, stream: &TcpStream) -> crate::Result<()> {
        stream.set_nodelay(self.no_delay)?;
        self.apply_quick_ack(&socket2::SockRef::from(stream));
        Ok(())
    }

    pub fn apply_listener(&self, listener: &TcpListener) -> crate::Result<()> {
        let raw_socket = socket2::SockRef::from(listener);
        raw_socket.set_nodelay(self.no_delay)?;
        self.apply_quick_ack(&raw_socket);
        Ok(())
    }

    /// absence of platform support degrades to a warning, never an abort
    fn apply_quick_ack(&self, _raw_socket: &socket2::SockRef<'_>) {
        #[cfg(any(target_os = "android", target_os = "fuchsia", target_os = "linux"))]
        if let Err(e) = _raw_socket.set_quickack(self.quick_ack) {
            log::warn!("unable to set TCP_QUICKACK to {}: {}", self.quick_ack, e);
        }

        #[cfg(not(any(target_os = "android", target_os = "fuchsia", target_os = "linux")))]
        if self.quick_ack {
            log::warn!("TCP_QUICKACK is not supported on this platform; ACKs will be delayed at the OS default");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matrix_covers_all_four_variants() {
        let mut seen = std::collections::HashSet::new();
        for config in Configuration::MATRIX {
            seen.insert((config.nagle, config.delayed_ack));
        }
        assert_eq!(seen.len(), 4);
        assert_eq!(
            Configuration::MATRIX[0],
            Configuration { nagle: true, delayed_ack: true }
        );
        assert_eq!(
            Configuration::MATRIX[3],
            Configuration { nagle: false, delayed_ack: false }
        );
    }

    #[test]
    fn matrix_key_sorts_in_matrix_order() {
        let mut shuffled = Configuration::MATRIX;
        shuffled.reverse();
        shuffled.sort_by_key(|c| c.matrix_key());
        assert_eq!(shuffled, Configuration::MATRIX);
    }

    #[test]
    fn options_are_negations_of_the_behaviours() {
        let options = Configuration { nagle: true, delayed_ack: false }.transport_options();
        assert!(!options.no_delay);
        assert!(options.quick_ack);

        let options = Configuration { nagle: false, delayed_ack: true }.transport_options();
        assert!(options.no_delay);
        assert!(!options.quick_ack);
    }

    #[test]
    fn label_encodes_the_configuration() {
        let config = Configuration { nagle: true, delayed_ack: false };
        assert_eq!(config.label(), "nagleOn_delayedackOff");
    }
}
