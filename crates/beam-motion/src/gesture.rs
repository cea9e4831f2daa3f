//! Bump detection from two simultaneous gyroscope samples.
//!
//! The verdict is a raw dot product against a fixed threshold. Samples are not
//! normalized: the threshold is calibrated for a deliberate bump, where both
//! angular-velocity vectors sit close to unit magnitude. Slow drifts with a
//! small magnitude never match, and a very hard jolt can match at an angle a
//! cosine similarity would reject.

use beam_core::MotionSample;
use tracing::debug;

pub const DEFAULT_MATCH_THRESHOLD: f32 = 0.9;

/// Whether two samples describe the same bump, using the default threshold.
pub fn is_matched(local: &MotionSample, remote: &MotionSample) -> bool {
    local.dot(remote) > DEFAULT_MATCH_THRESHOLD
}

/// One-shot matcher: reports the first match of a session and stays quiet
/// afterwards.
#[derive(Debug, Clone)]
pub struct GestureMatcher {
    threshold: f32,
    matched: bool,
}

impl Default for GestureMatcher {
    fn default() -> Self {
        Self::new(DEFAULT_MATCH_THRESHOLD)
    }
}

impl GestureMatcher {
    pub fn new(threshold: f32) -> Self {
        Self {
            threshold,
            matched: false,
        }
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    /// Stateless check against this matcher's threshold.
    pub fn matches(&self, local: &MotionSample, remote: &MotionSample) -> bool {
        local.dot(remote) > self.threshold
    }

    /// Feed a pair of samples. Returns `true` exactly once, on the first match.
    pub fn observe(&mut self, local: &MotionSample, remote: &MotionSample) -> bool {
        if self.matched || !self.matches(local, remote) {
            return false;
        }
        debug!(?local, ?remote, dot = local.dot(remote), "bump gesture matched");
        self.matched = true;
        true
    }

    pub fn has_matched(&self) -> bool {
        self.matched
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identical_unit_vectors_match() {
        let a = MotionSample::new(1.0, 0.0, 0.0);
        assert!(is_matched(&a, &a));
    }

    #[test]
    fn test_orthogonal_vectors_do_not_match() {
        let a = MotionSample::new(1.0, 0.0, 0.0);
        let b = MotionSample::new(0.0, 1.0, 0.0);
        assert!(!is_matched(&a, &b));
    }

    #[test]
    fn test_diagonal_vectors_match() {
        let a = MotionSample::new(0.7, 0.7, 0.0);
        assert!((a.dot(&a) - 0.98).abs() < 1e-6);
        assert!(is_matched(&a, &a));
    }

    #[test]
    fn test_threshold_is_strict() {
        let a = MotionSample::new(0.9, 0.0, 0.0);
        let b = MotionSample::new(1.0, 0.0, 0.0);
        assert!(!GestureMatcher::new(0.9).matches(&a, &b));
    }

    #[test]
    fn test_no_normalization_small_magnitudes() {
        let a = MotionSample::new(0.1, 0.0, 0.0);
        assert!(!is_matched(&a, &a));
    }

    #[test]
    fn test_observe_is_one_shot() {
        let mut m = GestureMatcher::default();
        let a = MotionSample::new(1.0, 0.0, 0.0);
        assert!(!m.observe(&a, &MotionSample::ZERO));
        assert!(!m.has_matched());
        assert!(m.observe(&a, &a));
        assert!(m.has_matched());
        assert!(!m.observe(&a, &a));
    }
}
