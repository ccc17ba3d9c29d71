//! Frame timer with pause/resume, driven by a high-resolution counter.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use crate::lock::NamedMutex;

/// A monotonic counter. `None` from either method means the counter is unavailable.
pub trait TimeSource {
    /// Counts per second.
    fn frequency(&self) -> Option<i64>;

    fn now(&self) -> Option<i64>;
}

/// `std::time::Instant` expressed in nanosecond counts.
pub struct MonotonicTime {
    origin: Instant,
}

impl MonotonicTime {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for MonotonicTime {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeSource for MonotonicTime {
    fn frequency(&self) -> Option<i64> {
        Some(1_000_000_000)
    }

    fn now(&self) -> Option<i64> {
        i64::try_from(self.origin.elapsed().as_nanos()).ok()
    }
}

#[cfg(windows)]
pub use performance_counter::PerformanceCounter;

#[cfg(windows)]
mod performance_counter {
    use windows::Win32::System::Performance::{QueryPerformanceCounter, QueryPerformanceFrequency};

    use super::TimeSource;

    #[derive(Clone, Copy, Debug, Default)]
    pub struct PerformanceCounter;

    impl TimeSource for PerformanceCounter {
        fn frequency(&self) -> Option<i64> {
            let mut frequency = 0;
            unsafe { QueryPerformanceFrequency(&mut frequency) }.ok()?;
            (frequency > 0).then_some(frequency)
        }

        fn now(&self) -> Option<i64> {
            let mut counter = 0;
            unsafe { QueryPerformanceCounter(&mut counter) }.ok()?;
            Some(counter)
        }
    }
}

#[derive(Default)]
struct Samples {
    base: i64,
    paused: i64,
    stop: i64,
    previous: i64,
    current: i64,
    delta: f64,
    stopped: bool,
}

pub struct FrameClock<T: TimeSource> {
    source: T,
    seconds_per_count: f64,
    valid: AtomicBool,
    samples: NamedMutex<Samples>,
}

impl<T: TimeSource> FrameClock<T> {
    /// Starts running from the current counter value. If the source has no usable frequency
    /// the clock is invalid from the start.
    pub fn new(source: T) -> Self {
        let frequency = source.frequency();
        let clock = Self {
            source,
            seconds_per_count: frequency.map_or(0.0, |frequency| 1.0 / frequency as f64),
            valid: AtomicBool::new(frequency.is_some()),
            samples: NamedMutex::new("frame-clock", Samples::default()),
        };

        if frequency.is_none() {
            log::error!("high-resolution counter frequency is unavailable");
        } else {
            clock.reset();
        }
        clock
    }

    pub fn is_valid(&self) -> bool {
        self.valid.load(Ordering::Acquire)
    }

    fn sample(&self) -> Option<i64> {
        let now = self.source.now();
        if now.is_none() && self.valid.swap(false, Ordering::AcqRel) {
            log::error!("high-resolution counter stopped responding, frame clock disabled");
        }
        now
    }

    /// Runs `f` with the samples and the current count, unless the clock is invalid or its
    /// lock is contended.
    fn with_samples<R>(&self, f: impl FnOnce(&mut Samples) -> R) -> Option<R> {
        if !self.is_valid() {
            return None;
        }
        match self.samples.lock() {
            Ok(mut samples) => Some(f(&mut samples)),
            Err(err) => {
                log::warn!("frame clock: {err}");
                None
            }
        }
    }

    pub fn reset(&self) {
        self.with_samples(|samples| {
            if let Some(now) = self.sample() {
                *samples = Samples {
                    base: now,
                    previous: now,
                    current: now,
                    ..Samples::default()
                };
            }
        });
    }

    pub fn start(&self) {
        self.with_samples(|samples| {
            if !samples.stopped {
                return;
            }
            if let Some(now) = self.sample() {
                samples.paused += now - samples.stop;
                samples.previous = now;
                samples.current = now;
                samples.stop = 0;
                samples.stopped = false;
            }
        });
    }

    pub fn stop(&self) {
        self.with_samples(|samples| {
            if samples.stopped {
                return;
            }
            if let Some(now) = self.sample() {
                samples.stop = now;
                samples.stopped = true;
            }
        });
    }

    pub fn is_stopped(&self) -> bool {
        self.with_samples(|samples| samples.stopped)
            .unwrap_or(false)
    }

    /// Advances the clock and returns the seconds since the previous tick.
    pub fn tick(&self) -> f32 {
        self.with_samples(|samples| {
            if samples.stopped {
                samples.delta = 0.0;
                return 0.0;
            }
            let Some(now) = self.sample() else {
                return 0.0;
            };

            samples.current = now;
            // The counter can step backwards across processor cores or power states.
            samples.delta =
                ((samples.current - samples.previous) as f64 * self.seconds_per_count).max(0.0);
            samples.previous = samples.current;
            samples.delta as f32
        })
        .unwrap_or(0.0)
    }

    pub fn delta_time(&self) -> f32 {
        self.with_samples(|samples| samples.delta as f32)
            .unwrap_or(0.0)
    }

    /// Seconds since the last reset, excluding time spent stopped.
    pub fn total_time(&self) -> f32 {
        self.with_samples(|samples| {
            let end = if samples.stopped {
                samples.stop
            } else {
                samples.current
            };
            let counts = end - samples.paused - samples.base;
            (counts as f64 * self.seconds_per_count).max(0.0) as f32
        })
        .unwrap_or(0.0)
    }
}
