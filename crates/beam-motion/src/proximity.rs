//! Log-distance path-loss estimate of how far away a radio peer is.

use beam_config::schema::ProximityConfig;

/// RSSI value platforms report when the strength is unknown.
pub const RSSI_UNKNOWN: i16 = i16::MIN;

/// Six inches, in meters.
pub const VERY_CLOSE_METERS: f64 = 0.1524;

/// Calibration for the path-loss model.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProximityModel {
    /// Signal strength measured at one meter, in dBm.
    pub rssi_at_one_meter: i16,
    /// Environment constant: 2.0 in free space, higher indoors.
    pub path_loss_exponent: f64,
    /// Distance at or below which a peer counts as very close.
    pub threshold_meters: f64,
}

impl Default for ProximityModel {
    fn default() -> Self {
        Self {
            rssi_at_one_meter: -50,
            path_loss_exponent: 2.0,
            threshold_meters: VERY_CLOSE_METERS,
        }
    }
}

impl From<&ProximityConfig> for ProximityModel {
    fn from(config: &ProximityConfig) -> Self {
        Self {
            rssi_at_one_meter: config.rssi_at_one_meter,
            path_loss_exponent: config.path_loss_exponent,
            threshold_meters: config.threshold_meters,
        }
    }
}

impl ProximityModel {
    /// Estimated distance in meters, or `None` when the reading or the
    /// calibration can't produce a meaningful number.
    pub fn estimate_distance(&self, rssi: i16) -> Option<f64> {
        if rssi == RSSI_UNKNOWN {
            return None;
        }
        if !(self.path_loss_exponent > 0.0 && self.path_loss_exponent.is_finite()) {
            return None;
        }
        let exponent = (f64::from(self.rssi_at_one_meter) - f64::from(rssi))
            / (10.0 * self.path_loss_exponent);
        let distance = 10f64.powf(exponent);
        distance.is_finite().then_some(distance)
    }

    /// Whether a peer heard at `rssi` is within the threshold distance.
    pub fn is_very_close(&self, rssi: i16) -> bool {
        self.estimate_distance(rssi)
            .is_some_and(|d| d <= self.threshold_meters)
    }
}

/// Convenience form with the default six-inch threshold.
pub fn is_device_very_close(rssi: i16, rssi_at_one_meter: i16, path_loss_exponent: f64) -> bool {
    ProximityModel {
        rssi_at_one_meter,
        path_loss_exponent,
        threshold_meters: VERY_CLOSE_METERS,
    }
    .is_very_close(rssi)
}
