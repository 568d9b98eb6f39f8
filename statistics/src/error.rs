use snafu::prelude::*;

use crate::datum::Datum;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    #[snafu(display("Failed to read the record stream: {}", source))]
    SourceRead {
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    #[snafu(display("Record has {} values, expected {}", actual, expected))]
    RecordWidth { expected: usize, actual: usize },
    #[snafu(display("Sorted input went backwards: {:?} after {:?}", value, previous))]
    UnsortedInput { previous: Datum, value: Datum },
    #[snafu(display("Sketch error: {}", source))]
    Sketch { source: synopses::Error },
    #[snafu(display("Failed to decode: {}", message))]
    Decode { message: String },
    #[snafu(display("Proto serialization error: {}", source))]
    Proto { source: bincode::Error },
    #[snafu(display("Invalid JSON configuration: {}", source))]
    ConfigJson { source: serde_json::Error },
    #[snafu(display("Invalid configuration: {}", message))]
    InvalidConfig { message: String },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
