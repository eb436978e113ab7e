/// Synthetic progress for a blocking step that reports nothing itself.
///
/// Elapsed time is mapped linearly onto `[base, end]` over an assumed
/// duration. Samples are clamped to `end` and never go backwards.
#[derive(Debug, Clone, PartialEq)]
pub struct HeartbeatCurve {
    expected_ms: u64,
    base: u64,
    end: u64,
    last: Option<u64>,
}

impl HeartbeatCurve {
    pub fn new(base: u64, end: u64, expected_ms: u64) -> Self {
        Self {
            expected_ms,
            base,
            end: end.max(base),
            last: None,
        }
    }

    /// Lower half of `[0, total]`.
    pub fn first_half(total: u64, expected_ms: u64) -> Self {
        Self::new(0, total / 2, expected_ms)
    }

    /// Upper half of `[0, total]`.
    pub fn second_half(total: u64, expected_ms: u64) -> Self {
        Self::new(total / 2, total, expected_ms)
    }

    pub fn base(&self) -> u64 {
        self.base
    }

    pub fn end(&self) -> u64 {
        self.end
    }

    pub fn sample(&mut self, elapsed_ms: u64) -> u64 {
        let frac = if self.expected_ms == 0 {
            1.0
        } else {
            (elapsed_ms as f64 / self.expected_ms as f64).clamp(0.0, 1.0)
        };
        let span = self.end - self.base;
        let mut value = self.base + (frac * span as f64) as u64;
        if let Some(last) = self.last {
            value = value.max(last);
        }
        self.last = Some(value);
        value
    }
}

#[cfg(test)]
mod tests {
    use super::HeartbeatCurve;

    #[test]
    fn maps_elapsed_time_into_its_segment() {
        let mut lower = HeartbeatCurve::first_half(1_000, 30_000);
        assert_eq!(lower.sample(0), 0);
        assert_eq!(lower.sample(3_000), 50);
        assert_eq!(lower.sample(15_000), 250);
        assert_eq!(lower.sample(90_000), 500);

        let mut upper = HeartbeatCurve::second_half(1_000, 30_000);
        assert_eq!(upper.sample(0), 500);
        assert_eq!(upper.sample(30_000), 1_000);
    }

    #[test]
    fn never_moves_backwards() {
        let mut c = HeartbeatCurve::new(10, 20, 1_000);
        assert_eq!(c.sample(500), 15);
        assert_eq!(c.sample(100), 15);
    }

    #[test]
    fn zero_expected_duration_jumps_to_end() {
        let mut c = HeartbeatCurve::new(0, 8, 0);
        assert_eq!(c.sample(0), 8);
    }
}
