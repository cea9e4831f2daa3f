//! The latest gyroscope reading and the sources that feed it.

use std::sync::Arc;
use std::time::Duration;

use beam_core::MotionSample;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Single last-writer-wins slot for the most recent motion sample.
///
/// Writers never wait for readers and readers always see the newest value,
/// possibly one sensor period old.
#[derive(Clone)]
pub struct MotionSlot {
    tx: Arc<watch::Sender<MotionSample>>,
}

impl Default for MotionSlot {
    fn default() -> Self {
        Self::new()
    }
}

impl MotionSlot {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(MotionSample::ZERO);
        Self { tx: Arc::new(tx) }
    }

    /// Overwrite the slot with a new reading.
    pub fn publish(&self, sample: MotionSample) {
        self.tx.send_replace(sample);
    }

    /// The most recent reading.
    pub fn latest(&self) -> MotionSample {
        *self.tx.borrow()
    }

    /// Receiver that wakes on every new reading.
    pub fn subscribe(&self) -> watch::Receiver<MotionSample> {
        self.tx.subscribe()
    }
}

/// Replays a fixed script of samples into a [`MotionSlot`] at a steady rate,
/// standing in for a gyroscope driver.
#[derive(Debug, Clone)]
pub struct ScriptedMotionSource {
    script: Vec<MotionSample>,
    period: Duration,
}

impl ScriptedMotionSource {
    pub fn new(script: Vec<MotionSample>, period: Duration) -> Self {
        Self { script, period }
    }

    /// Hold still for `rest_ticks`, jolt with `jolt` for `jolt_ticks`, then
    /// hold still again.
    pub fn bump(period: Duration, rest_ticks: usize, jolt_ticks: usize, jolt: MotionSample) -> Self {
        let mut script = vec![MotionSample::ZERO; rest_ticks];
        script.extend(std::iter::repeat_n(jolt, jolt_ticks));
        script.push(MotionSample::ZERO);
        Self::new(script, period)
    }

    pub fn len(&self) -> usize {
        self.script.len()
    }

    pub fn is_empty(&self) -> bool {
        self.script.is_empty()
    }

    /// Play the script into `slot`. The last sample stays in the slot once the
    /// script ends.
    pub fn spawn(self, slot: MotionSlot, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.period);
            for sample in self.script {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        debug!("motion source cancelled");
                        return;
                    }
                    _ = ticker.tick() => slot.publish(sample),
                }
            }
            debug!("motion script finished");
        })
    }
}
