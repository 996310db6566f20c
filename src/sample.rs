use chrono::{DateTime, Local};
use serde::Serialize;
use std::fmt;

use crate::proto::response::{Status, WeightReading};

/// One completed sampling cycle, as handed to the observer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Sample {
    /// Starts at 1 for each run of the session
    pub seq: u64,
    pub timestamp: DateTime<Local>,
    pub reading: WeightReading,
}

impl Sample {
    pub fn new(seq: u64, reading: WeightReading) -> Self {
        Self {
            seq,
            timestamp: Local::now(),
            reading,
        }
    }
}

impl fmt::Display for Sample {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if f.alternate() {
            write!(
                f,
                "#{:0>4} {} {}",
                self.seq,
                self.timestamp.format("%H:%M:%S%.3f"),
                self.reading
            )
        } else {
            write!(f, "#{:0>4} {}", self.seq, self.reading)
        }
    }
}

/// Flat record for CSV output
#[derive(Debug, Clone, Serialize)]
pub struct FlattenSample {
    pub seq: u64,
    pub timestamp: DateTime<Local>,
    pub status: Status,
    pub weight: Option<f64>,
    pub unit: Option<String>,
}

impl From<Sample> for FlattenSample {
    fn from(sample: Sample) -> Self {
        Self {
            seq: sample.seq,
            timestamp: sample.timestamp,
            status: sample.reading.status(),
            weight: sample.reading.weight(),
            unit: sample.reading.unit().map(String::from),
        }
    }
}
