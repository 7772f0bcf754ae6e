use tokio::time::{Duration, Instant};

/// Tracks the last state-mutating interaction
///
/// Nominal timeouts are measured from that instant rather than from "now",
/// so consecutive waits after an idle period do not each get a full window.
#[derive(Debug, Clone, Copy)]
pub struct InteractionClock {
    last_interaction: Instant,
}

impl Default for InteractionClock {
    fn default() -> Self {
        Self::new()
    }
}

impl InteractionClock {
    pub fn new() -> Self {
        Self {
            last_interaction: Instant::now(),
        }
    }

    /// Mark "now" as the last interaction
    pub fn touch(&mut self) {
        self.last_interaction = Instant::now();
    }

    pub fn since_last_interaction(&self) -> Duration {
        self.last_interaction.elapsed()
    }

    /// `max(0, nominal - elapsed since last interaction)`
    pub fn adjusted(&self, nominal_ms: u64) -> u64 {
        adjusted_timeout(nominal_ms, self.since_last_interaction())
    }
}

pub fn adjusted_timeout(nominal_ms: u64, elapsed: Duration) -> u64 {
    let elapsed_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);
    nominal_ms.saturating_sub(elapsed_ms)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_adjusted_timeout() {
        assert_eq!(adjusted_timeout(5000, Duration::from_millis(2000)), 3000);
        assert_eq!(adjusted_timeout(5000, Duration::from_millis(6000)), 0);
        assert_eq!(adjusted_timeout(5000, Duration::ZERO), 5000);
    }

    #[tokio::test(start_paused = true)]
    async fn test_clock_measures_from_last_interaction() {
        let mut clock = InteractionClock::new();

        tokio::time::sleep(Duration::from_millis(2000)).await;
        assert_eq!(clock.adjusted(5000), 3000);

        tokio::time::sleep(Duration::from_millis(4000)).await;
        assert_eq!(clock.adjusted(5000), 0);

        clock.touch();
        assert_eq!(clock.adjusted(5000), 5000);
    }
}
