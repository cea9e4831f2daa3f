//! Motion telemetry over the radio link.
//!
//! Wire format: `G<x>;<y>;<z>` as UTF-8, each component in decimal text. Rust
//! prints floats with the shortest representation that parses back to the same
//! value, so a sample survives the trip bit for bit.

use std::sync::Arc;
use std::time::Duration;

use beam_core::{BeamError, MotionSample, RadioLink};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::gesture::GestureMatcher;
use crate::sensor::MotionSlot;

/// Leading tag character of a motion frame.
pub const TELEMETRY_TAG: char = 'G';

/// Shortest sender period; smaller values are raised to this.
pub const MIN_PERIOD: Duration = Duration::from_millis(1);

/// Serialize a sample into its wire text.
pub fn encode_sample(sample: &MotionSample) -> String {
    format!("{TELEMETRY_TAG}{};{};{}", sample.x, sample.y, sample.z)
}

/// Parse a wire frame back into a sample.
pub fn decode_sample(frame: &[u8]) -> beam_core::Result<MotionSample> {
    let text = std::str::from_utf8(frame)
        .map_err(|e| BeamError::MalformedTelemetry(format!("not UTF-8: {e}")))?;
    let body = text
        .strip_prefix(TELEMETRY_TAG)
        .ok_or_else(|| BeamError::MalformedTelemetry(format!("missing '{TELEMETRY_TAG}' tag")))?;

    let parts: Vec<&str> = body.split(';').collect();
    if parts.len() != 3 {
        return Err(BeamError::MalformedTelemetry(format!(
            "expected 3 components, got {}",
            parts.len()
        )));
    }

    let mut values = [0f32; 3];
    for (slot, part) in values.iter_mut().zip(&parts) {
        *slot = part.trim().parse::<f32>().map_err(|e| {
            BeamError::MalformedTelemetry(format!("bad component '{part}': {e}"))
        })?;
    }
    Ok(MotionSample::from(values))
}

/// Send the latest local sample every `period` until the peer leaves the
/// active set or `cancel` fires. Returns the number of frames sent.
///
/// Membership is checked once per period, so a removed peer can receive at
/// most one more frame. Send failures are expected while the link is being
/// torn down and never stop the loop on their own.
pub async fn run_sender<F>(
    link: Arc<dyn RadioLink>,
    slot: MotionSlot,
    period: Duration,
    cancel: CancellationToken,
    still_active: F,
) -> u64
where
    F: Fn() -> bool + Send,
{
    // `interval` panics on a zero period.
    let mut ticker = tokio::time::interval(period.max(MIN_PERIOD));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut sent = 0u64;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }
        if !still_active() {
            debug!("peer left the active set, stopping telemetry sender");
            break;
        }
        let frame = encode_sample(&slot.latest());
        match link.send(frame.as_bytes()).await {
            Ok(()) => sent += 1,
            Err(e) => debug!(error = %e, "telemetry send failed"),
        }
    }

    debug!(sent, "telemetry sender stopped");
    sent
}

/// What a receiver loop saw before it ended.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReceiverSummary {
    pub frames: u64,
    pub malformed: u64,
    pub matched: bool,
}

/// Read remote samples from the link and compare each against the latest
/// local sample. `on_match` runs once, on the first bump.
pub async fn run_receiver<F>(
    link: Arc<dyn RadioLink>,
    slot: MotionSlot,
    mut matcher: GestureMatcher,
    cancel: CancellationToken,
    on_match: F,
) -> ReceiverSummary
where
    F: FnOnce(MotionSample, MotionSample) + Send,
{
    let mut summary = ReceiverSummary::default();
    let mut on_match = Some(on_match);

    loop {
        let frame = tokio::select! {
            _ = cancel.cancelled() => break,
            frame = link.recv() => frame,
        };
        let frame = match frame {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                debug!("radio link closed by peer");
                break;
            }
            Err(e) => {
                debug!(error = %e, "telemetry receive failed");
                break;
            }
        };

        let remote = match decode_sample(&frame) {
            Ok(sample) => sample,
            Err(e) => {
                summary.malformed += 1;
                debug!(error = %e, "dropping telemetry frame");
                continue;
            }
        };
        summary.frames += 1;

        let local = slot.latest();
        if matcher.observe(&local, &remote) {
            summary.matched = true;
            info!(?local, ?remote, "bump detected");
            if let Some(callback) = on_match.take() {
                callback(local, remote);
            }
        }
    }

    summary
}
