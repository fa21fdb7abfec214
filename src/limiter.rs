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

use std::thread::sleep;
use std::time::{Duration, Instant};

use crate::{error_gen, Result};

/// Paces a sequence of variable-sized writes to a long-run average byte
/// rate.
///
/// This is a simplified leaky bucket: when a chunk would exceed the
/// allowance accumulated since the last reset point, the caller sleeps
/// off the excess and the bucket is flushed rather than drained
/// incrementally. Short-term variance right after a sleep is therefore
/// higher than a strict traffic shaper would allow, which is acceptable
/// for enforcing a long-run average.
pub struct RateLimiter {
    rate: f64,
    last_check: Instant,
    bytes_since_check: f64,
}

impl RateLimiter {
    /// a non-positive rate is a caller error, not "unlimited"
    pub fn new(rate_bytes_per_sec: f64) -> Result<RateLimiter> {
        if rate_bytes_per_sec <= 0.0 {
            return Err(error_gen!("rate must be positive, got {}", rate_bytes_per_sec));
        }
        Ok(RateLimiter {
            rate: rate_bytes_per_sec,
            last_check: Instant::now(),
            bytes_since_check: 0.0,
        })
    }

    /// Blocks, if necessary, so that the bytes admitted since the last
    /// reset point never exceed `rate * elapsed`. An oversized chunk
    /// produces a single long sleep; pacing decisions are taken per
    /// logical chunk, not per byte.
    pub fn limit(&mut self, n_bytes: usize) {
        let allowed = self.rate * self.last_check.elapsed().as_secs_f64();
        let pending = self.bytes_since_check + n_bytes as f64;

        if pending > allowed {
            let over = pending - allowed;
            sleep(Duration::from_secs_f64(over / self.rate));

            self.last_check = Instant::now();
            self.bytes_since_check = 0.0;
        } else {
            self.bytes_since_check = pending;
        }
    }
}
