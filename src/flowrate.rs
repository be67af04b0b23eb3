//! Receive-rate estimation.
//!
//! A [`RateMonitor`] accumulates bytes into samples of at least one sample
//! interval and folds each closed sample into an exponential moving average,
//! in the style of the *nix load average: longer samples carry more weight.

use std::time::{Duration, Instant};

/// Granularity of the monitor's clock. All timestamps are rounded to it.
const CLOCK_RATE: Duration = Duration::from_millis(20);
const DEFAULT_SAMPLE_RATE: Duration = Duration::from_millis(5 * 20);
const DEFAULT_WINDOW: Duration = Duration::from_secs(1);

/// Snapshot of a monitor. Rates are bytes/sec, rounded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RateStatus {
    /// Bytes folded into closed samples.
    pub bytes: u64,
    pub samples: u64,
    /// Time from creation to the last closed sample.
    pub duration: Duration,
    /// Time since bytes were last received.
    pub idle: Duration,
    pub inst_rate: i64,
    /// Smoothed rate. Zero until the first sample closes.
    pub cur_rate: i64,
    pub avg_rate: i64,
    pub peak_rate: i64,
}

#[derive(Debug)]
pub struct RateMonitor {
    origin: Instant,
    sample_rate: Duration,
    window_secs: f64,

    bytes: u64,
    samples: u64,
    r_sample: f64,
    r_ema: f64,
    r_peak: f64,

    // open sample
    s_bytes: u64,
    s_last: Duration,
    t_last: Duration,
}

fn clock_round(d: Duration) -> Duration {
    let rate = CLOCK_RATE.as_nanos();
    let rounded = (d.as_nanos() + rate / 2) / rate * rate;
    Duration::from_nanos(rounded as u64)
}

fn round(x: f64) -> i64 {
    x.round() as i64
}

impl RateMonitor {
    /// Zero `sample_rate` or `window` fall back to 100ms and 1s.
    pub fn new(sample_rate: Duration, window: Duration) -> Self {
        Self::new_at(sample_rate, window, Instant::now())
    }

    pub(crate) fn new_at(sample_rate: Duration, window: Duration, now: Instant) -> Self {
        let mut sample_rate = clock_round(sample_rate);
        if sample_rate.is_zero() {
            sample_rate = DEFAULT_SAMPLE_RATE;
        }
        let window = if window.is_zero() { DEFAULT_WINDOW } else { window };
        Self {
            origin: now,
            sample_rate,
            window_secs: window.as_secs_f64(),
            bytes: 0,
            samples: 0,
            r_sample: 0.0,
            r_ema: 0.0,
            r_peak: 0.0,
            s_bytes: 0,
            s_last: Duration::ZERO,
            t_last: Duration::ZERO,
        }
    }

    /// Record `n` bytes received now.
    pub fn update(&mut self, n: u64) {
        self.update_at(n, Instant::now());
    }

    /// Seed the moving average. Counts as a sample so the next closed sample
    /// is averaged against `rate` instead of replacing it.
    pub fn set_rema(&mut self, rate: f64) {
        self.r_ema = rate;
        self.samples += 1;
    }

    pub fn status(&mut self) -> RateStatus {
        self.status_at(Instant::now())
    }

    /// Smoothed rate in bytes/sec, 0 while no real sample has closed yet.
    pub fn current_rate(&mut self) -> i64 {
        self.status().cur_rate
    }

    fn clock(&self, now: Instant) -> Duration {
        clock_round(now.saturating_duration_since(self.origin))
    }

    pub(crate) fn update_at(&mut self, n: u64, now: Instant) -> Duration {
        let now = self.clock(now);
        if n > 0 {
            self.t_last = now;
        }
        self.s_bytes += n;
        let s_time = now.saturating_sub(self.s_last);
        if s_time >= self.sample_rate {
            let t = s_time.as_secs_f64();
            self.r_sample = self.s_bytes as f64 / t;
            if self.r_sample > self.r_peak {
                self.r_peak = self.r_sample;
            }
            if self.samples > 0 {
                let w = (-t / self.window_secs).exp();
                self.r_ema = self.r_sample + w * (self.r_ema - self.r_sample);
            } else {
                self.r_ema = self.r_sample;
            }
            self.bytes += self.s_bytes;
            self.samples += 1;
            self.s_bytes = 0;
            self.s_last = now;
        }
        now
    }

    pub(crate) fn status_at(&mut self, now: Instant) -> RateStatus {
        let now = self.update_at(0, now);
        let mut s = RateStatus {
            bytes: self.bytes,
            samples: self.samples,
            duration: self.s_last,
            idle: now.saturating_sub(self.t_last),
            peak_rate: round(self.r_peak),
            ..RateStatus::default()
        };
        if !s.duration.is_zero() {
            s.avg_rate = round(s.bytes as f64 / s.duration.as_secs_f64());
            s.inst_rate = round(self.r_sample);
            s.cur_rate = round(self.r_ema);
        }
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn zero_parameters_use_defaults() {
        let m = RateMonitor::new(Duration::ZERO, Duration::ZERO);
        assert_eq!(m.sample_rate, DEFAULT_SAMPLE_RATE);
        assert_eq!(m.window_secs, 1.0);
    }

    #[test]
    fn sample_rate_is_rounded_to_clock() {
        let m = RateMonitor::new(ms(109), ms(500));
        assert_eq!(m.sample_rate, ms(100));
    }

    #[test]
    fn no_rate_before_first_sample() {
        let t0 = Instant::now();
        let mut m = RateMonitor::new_at(ms(100), ms(1000), t0);
        m.set_rema(500.0);
        m.update_at(50, t0 + ms(40));
        let s = m.status_at(t0 + ms(60));
        assert_eq!(s.cur_rate, 0, "grace period must not report a rate");
        assert_eq!(s.samples, 1, "seed counts as a sample");
    }

    #[test]
    fn first_sample_without_seed_is_taken_as_is() {
        let t0 = Instant::now();
        let mut m = RateMonitor::new_at(ms(100), ms(1000), t0);
        m.update_at(20, t0 + ms(10));
        let s = m.status_at(t0 + ms(200));
        assert_eq!(s.cur_rate, 100);
        assert_eq!(s.inst_rate, 100);
        assert_eq!(s.bytes, 20);
        assert_eq!(s.avg_rate, 100);
    }

    #[test]
    fn seeded_average_decays_towards_samples() {
        let t0 = Instant::now();
        let mut m = RateMonitor::new_at(ms(100), ms(1000), t0);
        m.set_rema(1000.0);
        let mut now = t0;
        for _ in 0..50 {
            now += ms(100);
            m.update_at(10, now);
        }
        let rate = m.status_at(now).cur_rate;
        // 100 B/s samples; residual from the seed is 900 * e^-5 ~ 6
        assert!((100..=110).contains(&rate), "rate {rate} should approach 100");
    }

    #[test]
    fn peak_and_idle_are_tracked() {
        let t0 = Instant::now();
        let mut m = RateMonitor::new_at(ms(100), ms(1000), t0);
        m.update_at(100, t0 + ms(100));
        m.update_at(10, t0 + ms(200));
        let s = m.status_at(t0 + ms(500));
        assert_eq!(s.peak_rate, 1000);
        assert_eq!(s.idle, ms(300));
    }
}
