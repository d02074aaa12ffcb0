//! Audio level metering for visualization
//!
//! Capture and playback each write their recent peak amplitude into a
//! `LevelTap`. A ~60fps task reads both taps, takes the louder one, and
//! publishes an EMA-smoothed 0-100 level. Purely advisory: a tap that has
//! never seen audio is skipped, and with no live taps nothing is published.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::interval;
use tokio_util::sync::CancellationToken;

/// Weight of the previous level (0.7 old + 0.3 new)
const EMA_RETAIN: f32 = 0.7;

/// Weight of the instantaneous peak
const EMA_ALPHA: f32 = 0.3;

/// Peaks are 0..1, the published level is 0..100
const LEVEL_SCALE: f32 = 100.0;

/// Frame interval for ~60fps sampling
const FRAME_INTERVAL_MS: u64 = 16;

/// Lock-free peak holder shared with an audio callback
#[derive(Debug, Clone, Default)]
pub struct LevelTap {
    inner: Arc<TapInner>,
}

#[derive(Debug, Default)]
struct TapInner {
    peak_bits: AtomicU32,
    attached: AtomicBool,
}

impl LevelTap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold a block of samples into the held peak. Safe from an audio thread.
    pub fn record(&self, samples: &[f32]) {
        let block_peak = samples
            .iter()
            .fold(0.0f32, |acc, &s| acc.max(s.abs()))
            .min(1.0);
        let mut current = self.inner.peak_bits.load(Ordering::Relaxed);
        loop {
            if f32::from_bits(current) >= block_peak {
                break;
            }
            match self.inner.peak_bits.compare_exchange_weak(
                current,
                block_peak.to_bits(),
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }
        self.inner.attached.store(true, Ordering::Relaxed);
    }

    /// Read and clear the held peak. `None` until audio has flowed through.
    pub fn take_peak(&self) -> Option<f32> {
        if !self.inner.attached.load(Ordering::Relaxed) {
            return None;
        }
        Some(f32::from_bits(
            self.inner.peak_bits.swap(0f32.to_bits(), Ordering::Relaxed),
        ))
    }

    pub fn detach(&self) {
        self.inner.attached.store(false, Ordering::Relaxed);
        self.inner.peak_bits.store(0f32.to_bits(), Ordering::Relaxed);
    }
}

/// EMA smoothing over the combined input/output peak
#[derive(Debug, Clone, Default)]
pub struct LevelMonitor {
    level: f32,
}

impl LevelMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the new level, or `None` when neither tap has data
    pub fn tick(&mut self, input_peak: Option<f32>, output_peak: Option<f32>) -> Option<f32> {
        let instant = match (input_peak, output_peak) {
            (None, None) => return None,
            (Some(a), None) | (None, Some(a)) => a,
            (Some(a), Some(b)) => a.max(b),
        };
        self.level = EMA_RETAIN * self.level + EMA_ALPHA * instant * LEVEL_SCALE;
        Some(self.level)
    }
}

/// Sample both taps until cancelled, publishing on `level_tx`
pub async fn run_level_monitor(
    input: LevelTap,
    output: LevelTap,
    level_tx: watch::Sender<f32>,
    cancel: CancellationToken,
) {
    let mut monitor = LevelMonitor::new();
    let mut tick = interval(Duration::from_millis(FRAME_INTERVAL_MS));

    log::debug!("Level monitor started");

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tick.tick() => {
                if let Some(level) = monitor.tick(input.take_peak(), output.take_peak()) {
                    level_tx.send_replace(level);
                }
            }
        }
    }

    level_tx.send_replace(0.0);
    log::debug!("Level monitor stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_tap_has_no_reading() {
        let tap = LevelTap::new();
        assert_eq!(tap.take_peak(), None);
    }

    #[test]
    fn tap_holds_max_until_taken() {
        let tap = LevelTap::new();
        tap.record(&[0.1, -0.6, 0.3]);
        tap.record(&[0.2]);
        assert_eq!(tap.take_peak(), Some(0.6));
        // Cleared, but still attached
        assert_eq!(tap.take_peak(), Some(0.0));
    }

    #[test]
    fn tap_clamps_to_unit() {
        let tap = LevelTap::new();
        tap.record(&[3.0]);
        assert_eq!(tap.take_peak(), Some(1.0));
    }

    #[test]
    fn detach_hides_reading() {
        let tap = LevelTap::new();
        tap.record(&[0.5]);
        tap.detach();
        assert_eq!(tap.take_peak(), None);
    }

    #[test]
    fn no_taps_leaves_level_alone() {
        let mut monitor = LevelMonitor::new();
        assert_eq!(monitor.tick(None, None), None);
        // Still starting from zero: 0.3 * 0.5 * 100
        let level = monitor.tick(Some(0.5), None).unwrap();
        assert!((level - 15.0).abs() < 1e-4);
    }

    #[test]
    fn ema_uses_louder_path() {
        let mut monitor = LevelMonitor::new();

        // 0.7 * 0 + 0.3 * 0.5 * 100 = 15
        let first = monitor.tick(Some(0.2), Some(0.5)).unwrap();
        assert!((first - 15.0).abs() < 1e-4);

        // 0.7 * 15 + 0.3 * 1.0 * 100 = 40.5
        let second = monitor.tick(None, Some(1.0)).unwrap();
        assert!((second - 40.5).abs() < 1e-4);

        // Decays toward zero on silence: 0.7 * 40.5 = 28.35
        let third = monitor.tick(Some(0.0), None).unwrap();
        assert!((third - 28.35).abs() < 1e-3);
    }

    #[tokio::test(start_paused = true)]
    async fn monitor_publishes_until_cancelled() {
        let input = LevelTap::new();
        let output = LevelTap::new();
        let (tx, rx) = watch::channel(0.0f32);
        let cancel = CancellationToken::new();

        input.record(&[1.0]);
        let task = tokio::spawn(run_level_monitor(
            input.clone(),
            output.clone(),
            tx,
            cancel.clone(),
        ));

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(*rx.borrow() > 0.0);

        cancel.cancel();
        task.await.unwrap();
        assert_eq!(*rx.borrow(), 0.0);
    }
}
