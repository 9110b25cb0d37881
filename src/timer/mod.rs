//! Restartable stopwatch for transaction latency measurement
//!
//! A `Timer` measures wall-clock time across one asynchronous operation.
//! While running it reports progress through an update callback at a fixed
//! sampling interval; `stop()` freezes the elapsed value and fires the
//! completion callback once.

use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::debug;

/// Default sampling interval for progress updates
pub const DEFAULT_SAMPLING_INTERVAL_MS: u64 = 10;

/// Callback receiving elapsed milliseconds and the formatted `HH:MM:SS.mmm` string
pub type TimerCallback = Arc<dyn Fn(u64, &str) + Send + Sync>;

/// Stopwatch with periodic sampling and a completion callback
pub struct Timer {
    /// Monotonic anchor, shifted back by any previously accumulated time
    start: Option<Instant>,
    /// Frozen elapsed time, valid while stopped
    elapsed: Duration,
    running: bool,
    sampling_interval: Duration,
    on_update: Option<TimerCallback>,
    on_complete: Option<TimerCallback>,
    /// The single active sampler task
    sampler: Option<JoinHandle<()>>,
}

impl Timer {
    /// Create a timer with the default sampling interval and no callbacks
    pub fn new() -> Self {
        Self {
            start: None,
            elapsed: Duration::ZERO,
            running: false,
            sampling_interval: Duration::from_millis(DEFAULT_SAMPLING_INTERVAL_MS),
            on_update: None,
            on_complete: None,
            sampler: None,
        }
    }

    /// Set the sampling interval (zero is clamped to 1ms)
    pub fn with_sampling_interval(mut self, interval: Duration) -> Self {
        self.sampling_interval = interval.max(Duration::from_millis(1));
        self
    }

    /// Callback fired on every sample while running
    pub fn on_update(mut self, callback: TimerCallback) -> Self {
        self.on_update = Some(callback);
        self
    }

    /// Callback fired once per `stop()` of a running timer
    pub fn on_complete(mut self, callback: TimerCallback) -> Self {
        self.on_complete = Some(callback);
        self
    }

    /// Start measuring. No-op if already running.
    ///
    /// Resumes from any elapsed time left by a `stop()` without `reset()`.
    pub fn start(&mut self) {
        if self.running {
            return;
        }

        let now = Instant::now();
        let start = now.checked_sub(self.elapsed).unwrap_or(now);
        self.start = Some(start);
        self.running = true;
        self.sampler = self.spawn_sampler(start);
    }

    fn spawn_sampler(&self, start: Instant) -> Option<JoinHandle<()>> {
        let on_update = self.on_update.clone()?;

        let handle = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(_) => {
                debug!("No tokio runtime available, timer sampling disabled");
                return None;
            }
        };

        let period = self.sampling_interval;
        Some(handle.spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                let ms = millis(start.elapsed());
                on_update(ms, &format_time(ms));
            }
        }))
    }

    /// Stop measuring and fire the completion callback. No-op if not running.
    pub fn stop(&mut self) {
        if !self.running {
            return;
        }

        if let Some(sampler) = self.sampler.take() {
            sampler.abort();
        }

        self.elapsed = self.start.map(|s| s.elapsed()).unwrap_or(self.elapsed);
        self.running = false;

        if let Some(on_complete) = &self.on_complete {
            let ms = millis(self.elapsed);
            on_complete(ms, &format_time(ms));
        }
    }

    /// Stop if running and zero the elapsed time
    pub fn reset(&mut self) {
        self.stop();
        self.elapsed = Duration::ZERO;
        self.start = None;
    }

    /// Elapsed milliseconds: live while running, frozen otherwise
    pub fn get_time(&self) -> u64 {
        match (self.running, self.start) {
            (true, Some(start)) => millis(start.elapsed()),
            _ => millis(self.elapsed),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        if self.is_running() {
            debug!("Timer dropped while running, stopping");
            self.stop();
        }
    }
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

/// Render milliseconds as `HH:MM:SS.mmm`.
///
/// Hours widen past two digits instead of wrapping.
pub fn format_time(ms: u64) -> String {
    let hours = ms / 3_600_000;
    let minutes = (ms % 3_600_000) / 60_000;
    let seconds = (ms % 60_000) / 1_000;
    let millis = ms % 1_000;

    format!("{:02}:{:02}:{:02}.{:03}", hours, minutes, seconds, millis)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    fn counting_timer(completions: Arc<AtomicUsize>) -> Timer {
        Timer::new().on_complete(Arc::new(move |_, _| {
            completions.fetch_add(1, Ordering::SeqCst);
        }))
    }

    #[test]
    fn test_format_time_boundaries() {
        assert_eq!(format_time(0), "00:00:00.000");
        assert_eq!(format_time(3_661_001), "01:01:01.001");
        assert_eq!(format_time(359_999_999), "99:59:59.999");
        assert_eq!(format_time(360_000_000), "100:00:00.000");
        assert_eq!(format_time(59_999), "00:00:59.999");
    }

    #[test]
    fn test_reset_on_fresh_timer() {
        let mut timer = Timer::new();
        timer.reset();
        assert_eq!(timer.get_time(), 0);
        assert!(!timer.is_running());
        assert_eq!(format_time(timer.get_time()), "00:00:00.000");
    }

    #[test]
    fn test_completions_never_exceed_starts() {
        let completions = Arc::new(AtomicUsize::new(0));
        let mut timer = counting_timer(completions.clone());

        timer.stop();
        assert_eq!(completions.load(Ordering::SeqCst), 0);

        timer.start();
        timer.start();
        timer.stop();
        timer.stop();
        assert_eq!(completions.load(Ordering::SeqCst), 1);
        assert!(!timer.is_running());

        timer.reset();
        timer.start();
        timer.reset();
        assert_eq!(completions.load(Ordering::SeqCst), 2);
        assert!(!timer.is_running());
    }

    #[test]
    fn test_stop_freezes_elapsed() {
        let mut timer = Timer::new();
        timer.start();
        std::thread::sleep(Duration::from_millis(15));
        timer.stop();

        let frozen = timer.get_time();
        assert!(frozen >= 15);
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(timer.get_time(), frozen);
    }

    #[test]
    fn test_start_after_stop_resumes() {
        let mut timer = Timer::new();
        timer.start();
        std::thread::sleep(Duration::from_millis(10));
        timer.stop();
        let first = timer.get_time();

        timer.start();
        assert!(timer.get_time() >= first);
        timer.reset();
        assert_eq!(timer.get_time(), 0);
    }

    #[test]
    fn test_live_time_is_monotonic() {
        let mut timer = Timer::new();
        timer.start();
        let mut last = 0;
        for _ in 0..50 {
            let now = timer.get_time();
            assert!(now >= last);
            last = now;
        }
        timer.stop();
    }

    #[test]
    fn test_drop_fires_completion_once() {
        let completions = Arc::new(AtomicUsize::new(0));
        {
            let mut timer = counting_timer(completions.clone());
            timer.start();
        }
        assert_eq!(completions.load(Ordering::SeqCst), 1);

        {
            let _idle = counting_timer(completions.clone());
        }
        assert_eq!(completions.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_samples_are_non_decreasing() {
        let samples = Arc::new(Mutex::new(Vec::new()));
        let sink = samples.clone();
        let mut timer = Timer::new()
            .with_sampling_interval(Duration::from_millis(2))
            .on_update(Arc::new(move |ms, formatted| {
                assert_eq!(formatted, format_time(ms));
                sink.lock().unwrap().push(ms);
            }));

        timer.start();
        tokio::time::sleep(Duration::from_millis(40)).await;
        timer.stop();

        let taken = samples.lock().unwrap().clone();
        assert!(!taken.is_empty());
        assert!(taken.windows(2).all(|w| w[0] <= w[1]));

        // Sampler is cancelled by stop()
        let count = taken.len();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(samples.lock().unwrap().len(), count);
    }

    #[tokio::test]
    async fn test_completion_reports_final_value() {
        let reported = Arc::new(Mutex::new(None));
        let sink = reported.clone();
        let mut timer = Timer::new().on_complete(Arc::new(move |ms, formatted| {
            *sink.lock().unwrap() = Some((ms, formatted.to_string()));
        }));

        timer.start();
        tokio::time::sleep(Duration::from_millis(12)).await;
        timer.stop();

        let (ms, formatted) = reported.lock().unwrap().clone().unwrap();
        assert_eq!(ms, timer.get_time());
        assert_eq!(formatted, format_time(ms));
        assert!(ms >= 12);
    }
}
