use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Randomized wait window between browser interaction steps. The jitter
/// is required behavior, not a tuning knob; a window collapses to a fixed
/// wait only when explicitly configured that way.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct JitterWindow {
    pub min_ms: u64,
    pub max_ms: u64,
}

impl Default for JitterWindow {
    fn default() -> Self {
        // 8.4–22.1 s, tuned against platform heuristics.
        Self {
            min_ms: 8_400,
            max_ms: 22_100,
        }
    }
}

impl JitterWindow {
    pub fn new(min_ms: u64, max_ms: u64) -> Self {
        let max_ms = max_ms.max(min_ms);
        Self { min_ms, max_ms }
    }

    /// Degenerate window for `randomize_timing: false`.
    pub fn fixed(ms: u64) -> Self {
        Self {
            min_ms: ms,
            max_ms: ms,
        }
    }

    pub fn sample(&self, rng: &mut impl Rng) -> Duration {
        Duration::from_millis(rng.gen_range(self.min_ms..=self.max_ms))
    }

    pub fn contains(&self, d: Duration) -> bool {
        let ms = d.as_millis() as u64;
        ms >= self.min_ms && ms <= self.max_ms
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn samples_stay_in_bounds() {
        let window = JitterWindow::new(50, 200);
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..1000 {
            let d = window.sample(&mut rng);
            assert!(window.contains(d), "sample {d:?} escaped the window");
        }
    }

    #[test]
    fn samples_are_not_all_identical() {
        let window = JitterWindow::new(50, 200);
        let mut rng = StdRng::seed_from_u64(7);
        let samples: Vec<Duration> = (0..50).map(|_| window.sample(&mut rng)).collect();
        assert!(samples.iter().any(|d| *d != samples[0]));
    }

    #[test]
    fn fixed_window_is_constant() {
        let window = JitterWindow::fixed(100);
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..10 {
            assert_eq!(window.sample(&mut rng), Duration::from_millis(100));
        }
    }

    #[test]
    fn inverted_bounds_are_normalized() {
        let window = JitterWindow::new(200, 50);
        assert_eq!(window.min_ms, 200);
        assert_eq!(window.max_ms, 200);
    }
}
