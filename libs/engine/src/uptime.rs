//! Logs an `INFO` breadcrumb at startup and then at doubling intervals,
//! so a long-running daemon leaves a trail of roughly how long it's
//! been up without flooding the log file.

use std::time::Duration;

use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;

pub async fn run(cancellation: CancellationToken) {
    let mut next = Doubling::default();
    loop {
        tokio::select! {
            _ = cancellation.cancelled() => return,
            _ = sleep_until(next.instant) => {
                tracing::info!(uptime_secs = next.uptime_secs, "daemon uptime");
                next.tick();
            }
        }
    }
}

struct Doubling {
    instant: Instant,
    interval: Duration,
    uptime_secs: u64,
}

impl Default for Doubling {
    fn default() -> Self {
        Self { instant: Instant::now(), interval: Duration::from_secs(60), uptime_secs: 0 }
    }
}

impl Doubling {
    fn tick(&mut self) {
        self.uptime_secs += self.interval.as_secs();
        self.instant += self.interval;
        self.interval *= 2;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stays_bounded_over_decades() {
        let mut next = Doubling::default();
        let far_future = next.instant + Duration::from_secs(60 * 60 * 24 * 365 * 50);

        for _ in 0..50 {
            next.tick();
        }

        assert!(next.instant > far_future);
    }
}
