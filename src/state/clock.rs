use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::time::Instant;

/// Source of the wall-clock timestamps stored as question deadlines.
///
/// Deadlines are exchanged between instances, so servers read the operating-system
/// clock. The anchored variant advances with the tokio clock instead, which lets paused
/// test runtimes drive deadlines.
#[derive(Debug, Clone, Copy, Default)]
pub enum Clock {
    /// Operating-system clock, NTP corrections included.
    #[default]
    System,
    /// Wall time captured once, then advanced by the tokio monotonic clock.
    Anchored {
        wall_anchor: SystemTime,
        mono_anchor: Instant,
    },
}

impl Clock {
    pub fn system() -> Self {
        Self::System
    }

    /// Anchor a clock at the current instant of the tokio runtime.
    pub fn anchored() -> Self {
        Self::Anchored {
            wall_anchor: SystemTime::now(),
            mono_anchor: Instant::now(),
        }
    }

    /// Current wall-clock time, truncated to whole milliseconds.
    pub fn now(&self) -> SystemTime {
        let now = match self {
            Self::System => SystemTime::now(),
            Self::Anchored {
                wall_anchor,
                mono_anchor,
            } => *wall_anchor + mono_anchor.elapsed(),
        };
        truncate_to_millis(now)
    }

    /// Time left until `deadline`, zero once it has passed.
    pub fn until(&self, deadline: SystemTime) -> Duration {
        deadline.duration_since(self.now()).unwrap_or(Duration::ZERO)
    }
}

fn truncate_to_millis(time: SystemTime) -> SystemTime {
    match time.duration_since(UNIX_EPOCH) {
        Ok(since_epoch) => UNIX_EPOCH + Duration::from_millis(since_epoch.as_millis() as u64),
        Err(_) => time,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn anchored_clock_follows_the_tokio_clock() {
        let clock = Clock::anchored();
        let start = clock.now();
        tokio::time::advance(Duration::from_secs(3)).await;
        assert_eq!(clock.now().duration_since(start).unwrap(), Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn until_saturates_at_zero() {
        let clock = Clock::anchored();
        let deadline = clock.now() + Duration::from_secs(1);
        assert_eq!(clock.until(deadline), Duration::from_secs(1));
        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(clock.until(deadline), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn system_clock_ignores_the_paused_runtime() {
        let clock = Clock::system();
        let before = SystemTime::now();
        tokio::time::advance(Duration::from_secs(3600)).await;
        let now = clock.now();
        let drift = now
            .duration_since(before)
            .unwrap_or_else(|err| err.duration());
        assert!(drift < Duration::from_secs(60));
    }
}
