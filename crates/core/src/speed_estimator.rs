use std::time::Instant;

/// Tracks bytes transferred over a short sliding window and exposes a
/// current rate estimate. Used by the swarm's choking policy to rank
/// peers by download/upload rate.
#[derive(Debug)]
pub struct SpeedEstimator {
    window: std::collections::VecDeque<(Instant, u64)>,
    window_duration: std::time::Duration,
}

impl SpeedEstimator {
    pub fn new(window_duration: std::time::Duration) -> Self {
        Self {
            window: std::collections::VecDeque::new(),
            window_duration,
        }
    }

    /// Records that `bytes` were transferred at `now`.
    pub fn record(&mut self, bytes: u64, now: Instant) {
        self.window.push_back((now, bytes));
        while let Some(&(t, _)) = self.window.front() {
            if now.duration_since(t) > self.window_duration {
                self.window.pop_front();
            } else {
                break;
            }
        }
    }

    /// Bytes per second averaged over whatever of the window is populated.
    pub fn bytes_per_second(&self, now: Instant) -> f64 {
        if self.window.is_empty() {
            return 0.0;
        }
        let total: u64 = self.window.iter().map(|&(_, b)| b).sum();
        let earliest = self.window.front().unwrap().0;
        let elapsed = now.duration_since(earliest).as_secs_f64().max(0.001);
        total as f64 / elapsed
    }
}
