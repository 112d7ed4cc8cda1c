/// Local monotonic clock plus the estimated offset to the server clock.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TimeClock {
    elapsed_seconds: f64,
    server_clock_delta_seconds: f64,
}

impl TimeClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, dt: f32) {
        self.elapsed_seconds += f64::from(dt);
    }

    pub fn elapsed_seconds(&self) -> f64 {
        self.elapsed_seconds
    }

    /// Local time in milliseconds as carried by time-sync messages. Wraps
    /// after roughly 49 days.
    pub fn local_time_ms(&self) -> u32 {
        (self.elapsed_seconds * 1000.0) as u64 as u32
    }

    pub fn server_clock_delta_seconds(&self) -> f64 {
        self.server_clock_delta_seconds
    }

    pub fn set_server_clock_delta(&mut self, delta_seconds: f64) {
        self.server_clock_delta_seconds = delta_seconds;
    }

    pub fn server_time_seconds(&self) -> f64 {
        self.elapsed_seconds + self.server_clock_delta_seconds
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_time_applies_delta() {
        let mut clock = TimeClock::new();
        clock.update(1.5);
        clock.set_server_clock_delta(10.0);

        assert_eq!(clock.local_time_ms(), 1500);
        assert!((clock.server_time_seconds() - 11.5).abs() < 1e-9);
    }
}
