use std::time::{Instant, SystemTime, UNIX_EPOCH};

/// The source of the synthetic chain height.
///
/// The height is the number of whole seconds elapsed since the clock was started, measured on a
/// monotonic clock so that it never decreases. The wall clock start time is kept to derive block
/// timestamps.
#[derive(Clone, Copy, Debug)]
pub struct BlockClock {
    started: Instant,
    start_time: u64,
}

impl BlockClock {
    /// Starts the clock now.
    pub fn start() -> Self {
        let start_time = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|duration| duration.as_secs())
            .unwrap_or_default();
        Self::with_start_time(start_time)
    }

    /// Starts the clock now, reporting the given unix timestamp as its start time.
    pub fn with_start_time(start_time: u64) -> Self {
        Self {
            started: Instant::now(),
            start_time,
        }
    }

    /// The unix timestamp, in seconds, at which the clock was started.
    pub fn start_time(&self) -> u64 {
        self.start_time
    }

    pub fn block_number(&self) -> u64 {
        self.started.elapsed().as_secs()
    }
}
