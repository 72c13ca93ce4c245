use std::sync::Mutex;
use std::time::{Duration, Instant};

/// An in-flight timing sample. Created by [`TimerAggregator::start`] and
/// handed back on completion, success or not.
pub struct TimerSample {
    started: Instant,
}

/// Windowed latency aggregation. Samples accumulate into a window of fixed
/// size; when the window fills, one summary line goes to `tracing` and the
/// window resets. Keeps the hot path to a clock read and a short
/// mutex-guarded update.
pub struct TimerAggregator {
    name: &'static str,
    window: usize,
    state: Mutex<Window>,
}

#[derive(Default)]
struct Window {
    samples: usize,
    items: usize,
    total: Duration,
    min: Option<Duration>,
    max: Duration,
}

impl TimerAggregator {
    pub fn new(name: &'static str, window: usize) -> Self {
        Self {
            name,
            window: window.max(1),
            state: Mutex::new(Window::default()),
        }
    }

    pub fn start(&self) -> TimerSample {
        TimerSample {
            started: Instant::now(),
        }
    }

    /// Records a sample covering a single item.
    pub fn record(&self, sample: TimerSample) {
        self.record_many(sample, 1);
    }

    /// Records a sample covering `items` work items (bulk requests).
    pub fn record_many(&self, sample: TimerSample, items: usize) {
        let elapsed = sample.started.elapsed();

        let mut window = self.state.lock().unwrap();
        window.samples += 1;
        window.items += items;
        window.total += elapsed;
        window.min = Some(window.min.map_or(elapsed, |min| min.min(elapsed)));
        window.max = window.max.max(elapsed);

        if window.samples >= self.window {
            let mean = window.total / window.samples as u32;
            tracing::debug!(
                timer = self.name,
                samples = window.samples,
                items = window.items,
                mean_us = mean.as_micros() as u64,
                min_us = window.min.unwrap_or_default().as_micros() as u64,
                max_us = window.max.as_micros() as u64,
                "timing window"
            );
            *window = Window::default();
        }
    }
}
