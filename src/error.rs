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

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    String(String),
}

impl From<Error> for std::io::Error {
    fn from(e: Error) -> Self {
        match e {
            Error::Io(e) => e,
            _ => std::io::Error::new(std::io::ErrorKind::Other, e),
        }
    }
}

impl From<&str> for Error {
    fn from(s: &str) -> Self {
        Error::String(s.to_string())
    }
}

impl From<String> for Error {
    fn from(s: String) -> Self {
        Error::String(s)
    }
}

impl From<&String> for Error {
    fn from(s: &String) -> Self {
        Error::String(s.to_string())
    }
}

pub type BoxResult<T> = Result<T, Box<dyn std::error::Error + Send + Sync + 'static>>;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[macro_export]
macro_rules! error_gen {
    ($fmt:literal) => {
        $crate::Error::from(format!($fmt))
    };
    ($e:expr) => {
        $crate::Error::from($e)
    };
    ($fmt:literal, $($arg:tt)+) => {
        $crate::Error::from(format!($fmt, $($arg)+))
    };
}
