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

pub mod tcp;

/// The receiver counts every `read()` as one packet, so observed packet
/// boundaries are a function of the coalescing behaviour under test.
/// This caps the size of a single observation.
pub const RECEIVE_CHUNK_SIZE: usize = 4096;

/// how often the roles log running totals during a transfer
pub(crate) const PROGRESS_INTERVAL: std::time::Duration = std::time::Duration::from_secs(1);
