use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Root configuration, maps to `beam.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BeamConfig {
    pub mesh: MeshConfig,
    pub radio: RadioConfig,
    pub proximity: ProximityConfig,
    pub gesture: GestureConfig,
    pub telemetry: TelemetryConfig,
    pub logging: LoggingConfig,
}

// ── Mesh ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MeshConfig {
    /// Service id both devices advertise and discover on.
    pub service_id: String,
    /// Name shown to peers during discovery.
    pub display_name: String,
    /// Advertise this device on startup.
    pub advertise: bool,
    /// Discover peers on startup.
    pub discover: bool,
}

impl Default for MeshConfig {
    fn default() -> Self {
        Self {
            service_id: "com.beam.mesh".into(),
            display_name: "Beam Device".into(),
            advertise: true,
            discover: true,
        }
    }
}

// ── Radio ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RadioConfig {
    /// How long the server stays discoverable waiting for the client.
    pub discoverable_secs: u64,
    /// How long the client scans for the server's radio identity.
    pub scan_secs: u64,
}

impl Default for RadioConfig {
    fn default() -> Self {
        Self {
            discoverable_secs: 300,
            scan_secs: 30,
        }
    }
}

impl RadioConfig {
    pub fn discoverable_window(&self) -> Duration {
        Duration::from_secs(self.discoverable_secs)
    }

    pub fn scan_window(&self) -> Duration {
        Duration::from_secs(self.scan_secs)
    }
}

// ── Proximity ──────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProximityConfig {
    /// Calibrated signal strength at one meter, in dBm.
    pub rssi_at_one_meter: i16,
    /// Environment path-loss exponent (2.0 in free space).
    pub path_loss_exponent: f64,
    /// Estimated distance at or below which a peer counts as very close.
    pub threshold_meters: f64,
}

impl Default for ProximityConfig {
    fn default() -> Self {
        Self {
            rssi_at_one_meter: -50,
            path_loss_exponent: 2.0,
            // six inches
            threshold_meters: 0.1524,
        }
    }
}

// ── Gesture ────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GestureConfig {
    /// Dot product above which two samples count as the same bump.
    pub match_threshold: f32,
}

impl Default for GestureConfig {
    fn default() -> Self {
        Self {
            match_threshold: 0.9,
        }
    }
}

// ── Telemetry ──────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    /// Interval between motion samples sent over the radio link.
    pub period_ms: u64,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self { period_ms: 100 }
    }
}

impl TelemetryConfig {
    pub fn period(&self) -> Duration {
        Duration::from_millis(self.period_ms)
    }
}

// ── Logging ────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    pub level: String,
    /// Output format: "pretty", "json", "compact".
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "pretty".into(),
        }
    }
}

// ── Validation ─────────────────────────────────────────────────

/// A single config validation issue.
#[derive(Debug)]
pub struct ConfigWarning {
    pub field: String,
    pub message: String,
    pub severity: WarningSeverity,
    pub hint: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WarningSeverity {
    Error,
    Warning,
}

impl std::fmt::Display for ConfigWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self.severity {
            WarningSeverity::Error => "error",
            WarningSeverity::Warning => "warning",
        };
        write!(f, "{}: {}: {}", label, self.field, self.message)?;
        if let Some(ref h) = self.hint {
            write!(f, "\n   ↳ {}", h)?;
        }
        Ok(())
    }
}

impl BeamConfig {
    /// Validate the config and return a list of warnings/errors.
    /// Returns `Err` with all messages joined if any severity is Error.
    pub fn validate(&self) -> Result<Vec<ConfigWarning>, String> {
        let mut warnings = Vec::new();

        // ── Mesh ───
        if self.mesh.service_id.trim().is_empty() {
            warnings.push(ConfigWarning {
                field: "mesh.service_id".into(),
                message: "service id is empty: peers can't find each other".into(),
                severity: WarningSeverity::Error,
                hint: Some("Set to e.g. 'com.beam.mesh' on both devices".into()),
            });
        }
        if !self.mesh.advertise && !self.mesh.discover {
            warnings.push(ConfigWarning {
                field: "mesh".into(),
                message: "advertise and discover are both off: no peer will ever be found".into(),
                severity: WarningSeverity::Warning,
                hint: Some("Enable at least one of mesh.advertise / mesh.discover".into()),
            });
        }

        // ── Radio windows ───
        if self.radio.discoverable_secs == 0 {
            warnings.push(ConfigWarning {
                field: "radio.discoverable_secs".into(),
                message: "discoverable window is 0: the server can never accept".into(),
                severity: WarningSeverity::Error,
                hint: Some("Set to e.g. 300".into()),
            });
        }
        if self.radio.scan_secs == 0 {
            warnings.push(ConfigWarning {
                field: "radio.scan_secs".into(),
                message: "scan window is 0: the client can never connect".into(),
                severity: WarningSeverity::Error,
                hint: Some("Set to e.g. 30".into()),
            });
        }

        // ── Proximity ───
        if !(self.proximity.path_loss_exponent > 0.0 && self.proximity.path_loss_exponent.is_finite())
        {
            warnings.push(ConfigWarning {
                field: "proximity.path_loss_exponent".into(),
                message: format!(
                    "exponent {} must be a positive number",
                    self.proximity.path_loss_exponent
                ),
                severity: WarningSeverity::Error,
                hint: Some("Typical values range from 2.0 (free space) to 4.0 (indoors)".into()),
            });
        }
        if self.proximity.threshold_meters <= 0.0 {
            warnings.push(ConfigWarning {
                field: "proximity.threshold_meters".into(),
                message: "threshold is zero or negative: no peer will ever be very close".into(),
                severity: WarningSeverity::Warning,
                hint: Some("Default is 0.1524 (six inches)".into()),
            });
        }

        // ── Gesture ───
        if self.gesture.match_threshold <= 0.0 || self.gesture.match_threshold > 1.0 {
            warnings.push(ConfigWarning {
                field: "gesture.match_threshold".into(),
                message: format!(
                    "threshold {} is outside (0, 1]: samples are assumed near unit magnitude",
                    self.gesture.match_threshold
                ),
                severity: WarningSeverity::Warning,
                hint: Some("Default is 0.9".into()),
            });
        }

        // ── Telemetry ───
        if self.telemetry.period_ms == 0 {
            warnings.push(ConfigWarning {
                field: "telemetry.period_ms".into(),
                message: "period is 0: the sender would spin".into(),
                severity: WarningSeverity::Error,
                hint: Some("Set to e.g. 100".into()),
            });
        }

        // ── Logging format ───
        let valid_formats = ["pretty", "json", "compact"];
        if !valid_formats.contains(&self.logging.format.as_str()) {
            warnings.push(ConfigWarning {
                field: "logging.format".into(),
                message: format!("unknown log format '{}'", self.logging.format),
                severity: WarningSeverity::Warning,
                hint: Some(format!("Valid values: {}", valid_formats.join(", "))),
            });
        }

        // ── Logging level ───
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            warnings.push(ConfigWarning {
                field: "logging.level".into(),
                message: format!("unknown log level '{}'", self.logging.level),
                severity: WarningSeverity::Warning,
                hint: Some(format!("Valid values: {}", valid_levels.join(", "))),
            });
        }

        // Check for hard errors
        let errors: Vec<String> = warnings
            .iter()
            .filter(|w| w.severity == WarningSeverity::Error)
            .map(|w| format!("{}: {}", w.field, w.message))
            .collect();

        if !errors.is_empty() {
            return Err(format!("Configuration errors:\n  • {}", errors.join("\n  • ")));
        }

        Ok(warnings)
    }
}
