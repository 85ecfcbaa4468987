use std::time::{SystemTime, UNIX_EPOCH};

use crate::time::TimeSource;

/// The system wall clock.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl TimeSource for SystemClock {
    fn unix_secs(&self) -> i64 {
        match SystemTime::now().duration_since(UNIX_EPOCH) {
            Ok(elapsed) => elapsed.as_secs() as i64,
            Err(e) => -(e.duration().as_secs() as i64),
        }
    }
}
