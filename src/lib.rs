pub mod args;
pub mod config;
mod error;
pub mod harness;
pub mod limiter;
pub mod report;
pub mod results;
pub mod stream;

pub use error::{BoxResult, Error, Result};
