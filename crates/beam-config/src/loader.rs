use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::schema::BeamConfig;

/// Loads the Beam configuration once at startup.
pub struct ConfigLoader {
    config: BeamConfig,
    config_path: PathBuf,
}

impl ConfigLoader {
    /// Resolve the config path: explicit path > BEAM_CONFIG env > ~/.beam/beam.toml
    pub fn resolve_path(explicit: Option<&Path>) -> PathBuf {
        if let Some(p) = explicit {
            return p.to_path_buf();
        }
        if let Ok(p) = std::env::var("BEAM_CONFIG") {
            return PathBuf::from(p);
        }
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".beam")
            .join("beam.toml")
    }

    /// Load the config from disk, falling back to defaults.
    pub fn load(path: Option<&Path>) -> beam_core::Result<Self> {
        let config_path = Self::resolve_path(path);
        let config = if config_path.exists() {
            info!(?config_path, "loading configuration");
            Self::read_file(&config_path)?
        } else {
            warn!(?config_path, "config file not found, using defaults");
            BeamConfig::default()
        };

        let config = Self::apply_env_overrides(config);

        // Validate config: log warnings, fail on errors
        match config.validate() {
            Ok(warnings) => {
                for w in &warnings {
                    warn!("{}", w);
                }
            }
            Err(e) => {
                return Err(beam_core::BeamError::Config(e));
            }
        }

        Ok(Self {
            config,
            config_path,
        })
    }

    /// A copy of the loaded config.
    pub fn get(&self) -> BeamConfig {
        self.config.clone()
    }

    /// Path the config was loaded from.
    pub fn path(&self) -> &Path {
        &self.config_path
    }

    fn read_file(path: &Path) -> beam_core::Result<BeamConfig> {
        let raw = std::fs::read_to_string(path)?;
        toml::from_str::<BeamConfig>(&raw).map_err(|e| {
            beam_core::BeamError::Config(format!("failed to parse {}: {}", path.display(), e))
        })
    }

    /// Apply env var overrides (BEAM_SERVICE_ID, BEAM_LOG_LEVEL, etc.)
    fn apply_env_overrides(config: BeamConfig) -> BeamConfig {
        Self::apply_overrides_from(config, |key| std::env::var(key).ok())
    }

    /// Apply overrides using an arbitrary variable lookup.
    pub fn apply_overrides_from<F>(mut config: BeamConfig, lookup: F) -> BeamConfig
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("BEAM_SERVICE_ID") {
            config.mesh.service_id = v;
        }
        if let Some(v) = lookup("BEAM_DISPLAY_NAME") {
            config.mesh.display_name = v;
        }
        if let Some(v) = lookup("BEAM_LOG_LEVEL") {
            config.logging.level = v;
        }
        if let Some(v) = lookup("BEAM_TELEMETRY_PERIOD_MS") {
            match v.parse::<u64>() {
                Ok(ms) => config.telemetry.period_ms = ms,
                Err(_) => warn!(value = %v, "ignoring non-numeric BEAM_TELEMETRY_PERIOD_MS"),
            }
        }
        config
    }
}
