//! Mergeable probabilistic summaries over value streams.
//!
//! These structures know nothing about SQL values: callers hash or encode
//! their values into bytes first.

pub mod distinct;
mod error;
pub mod frequent;
pub mod utils;

pub use error::{Error, Result};
