//! Throttle deciding when a running tally is published.

use std::time::Duration;

use dashmap::DashMap;
use tokio::time::Instant;

/// What the vote path should do about the tally broadcast after a counted vote.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TallyDecision {
    /// Broadcast immediately.
    Now,
    /// Schedule one trailing broadcast after the given delay.
    Trailing(Duration),
    /// A trailing broadcast is already scheduled and will include this vote.
    Coalesced,
}

#[derive(Debug, Default)]
struct TallyGate {
    last_sent: Option<Instant>,
    trailing: bool,
}

/// Per-question throttle bounding tally broadcasts to one per interval.
#[derive(Default)]
pub struct TallyThrottle {
    gates: DashMap<String, TallyGate>,
}

impl TallyThrottle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a counted vote for `question_key` and decide how to publish it.
    pub fn on_vote(&self, question_key: &str, interval: Duration) -> TallyDecision {
        let now = Instant::now();
        let mut gate = self.gates.entry(question_key.to_owned()).or_default();
        if gate.trailing {
            return TallyDecision::Coalesced;
        }

        match gate.last_sent {
            Some(last) if now.duration_since(last) < interval => {
                gate.trailing = true;
                TallyDecision::Trailing(interval - now.duration_since(last))
            }
            _ => {
                gate.last_sent = Some(now);
                TallyDecision::Now
            }
        }
    }

    /// Mark the scheduled trailing broadcast of `question_key` as sent.
    pub fn trailing_sent(&self, question_key: &str) {
        if let Some(mut gate) = self.gates.get_mut(question_key) {
            gate.trailing = false;
            gate.last_sent = Some(Instant::now());
        }
    }

    /// Drop throttle state once the question is closed.
    pub fn clear(&self, question_key: &str) {
        self.gates.remove(question_key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const INTERVAL: Duration = Duration::from_millis(100);

    #[tokio::test(start_paused = true)]
    async fn first_vote_broadcasts_immediately() {
        let throttle = TallyThrottle::new();
        assert_eq!(throttle.on_vote("q1", INTERVAL), TallyDecision::Now);
    }

    #[tokio::test(start_paused = true)]
    async fn burst_collapses_into_one_trailing_broadcast() {
        let throttle = TallyThrottle::new();
        throttle.on_vote("q1", INTERVAL);
        tokio::time::advance(Duration::from_millis(30)).await;

        assert_eq!(
            throttle.on_vote("q1", INTERVAL),
            TallyDecision::Trailing(Duration::from_millis(70))
        );
        assert_eq!(throttle.on_vote("q1", INTERVAL), TallyDecision::Coalesced);

        tokio::time::advance(Duration::from_millis(70)).await;
        throttle.trailing_sent("q1");
        assert_eq!(
            throttle.on_vote("q1", INTERVAL),
            TallyDecision::Trailing(INTERVAL)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn quiet_period_reopens_leading_edge() {
        let throttle = TallyThrottle::new();
        throttle.on_vote("q1", INTERVAL);
        tokio::time::advance(Duration::from_millis(150)).await;
        assert_eq!(throttle.on_vote("q1", INTERVAL), TallyDecision::Now);
    }
}
