//! Progress reporting of the star loop.
//!
//! With the `progress` feature, [`StarProgress`] draws an `indicatif` bar over the stars
//! left to process. The bar message shows the time spent on the last star, a smoothed
//! per-star time and the resulting throughput. Without the feature it compiles to a no-op,
//! so the batch loop does not need two versions.
//!
//! The smoothed time follows `ema ← α·dt + (1 − α)·ema`, seeded with the first star.
#[cfg(feature = "progress")]
use std::time::{Duration, Instant};

#[cfg(feature = "progress")]
use indicatif::{ProgressBar, ProgressStyle};

/// Weight of the newest star in the smoothed per-star time.
#[cfg(feature = "progress")]
const STAR_TIME_ALPHA: f64 = 0.2;

#[cfg(feature = "progress")]
pub(crate) struct StarProgress {
    bar: ProgressBar,
    last_star: Instant,
    /// Smoothed per-star time in seconds, `None` before the first star.
    star_secs: Option<f64>,
}

#[cfg(feature = "progress")]
impl StarProgress {
    pub(crate) fn new(n_stars: usize, start: usize) -> Self {
        let bar = ProgressBar::new(n_stars.max(1) as u64);
        if let Ok(style) = ProgressStyle::with_template(
            "{bar:40.cyan/blue} {pos}/{len} stars ({percent:>3}%) | ETA {eta_precise} | {msg}",
        ) {
            bar.set_style(style);
        }
        bar.enable_steady_tick(Duration::from_millis(200));
        Self::with_bar(bar, start)
    }

    fn with_bar(bar: ProgressBar, start: usize) -> Self {
        bar.set_position(start as u64);
        StarProgress {
            bar,
            last_star: Instant::now(),
            star_secs: None,
        }
    }

    /// Close the timing of the current star at `now` and return its duration.
    fn close_star(&mut self, now: Instant) -> Duration {
        let dt = now.saturating_duration_since(self.last_star);
        self.last_star = now;
        let secs = dt.as_secs_f64();
        self.star_secs = Some(match self.star_secs {
            None => secs,
            Some(ema) => STAR_TIME_ALPHA * secs + (1.0 - STAR_TIME_ALPHA) * ema,
        });
        dt
    }

    fn star_message(&self, last: Duration) -> String {
        let avg = self.star_secs.unwrap_or(0.0);
        let rate = if avg > 0.0 { 1.0 / avg } else { 0.0 };
        format!(
            "last: {last:.1?}, avg: {:.1?} ({rate:.1} stars/s)",
            Duration::from_secs_f64(avg)
        )
    }

    pub(crate) fn star_done(&mut self) {
        let last = self.close_star(Instant::now());
        self.bar.set_message(self.star_message(last));
        self.bar.inc(1);
    }

    pub(crate) fn flushing(&self, e: usize) {
        self.bar.set_message(format!("checkpoint after star {e}"));
    }

    pub(crate) fn finish(&self) {
        self.bar.disable_steady_tick();
        self.bar.finish_and_clear();
    }
}

#[cfg(not(feature = "progress"))]
pub(crate) struct StarProgress;

#[cfg(not(feature = "progress"))]
impl StarProgress {
    pub(crate) fn new(_n_stars: usize, _start: usize) -> Self {
        StarProgress
    }

    pub(crate) fn star_done(&mut self) {}

    pub(crate) fn flushing(&self, _e: usize) {}

    pub(crate) fn finish(&self) {}
}
