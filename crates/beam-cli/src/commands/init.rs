use std::path::PathBuf;

use beam_config::BeamConfig;
use beam_core::BeamError;

pub(super) fn cmd_init(local: bool) -> beam_core::Result<()> {
    let dir = if local {
        std::env::current_dir()?
    } else {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".beam")
    };

    std::fs::create_dir_all(&dir)?;
    let config_path = dir.join("beam.toml");

    if config_path.exists() {
        println!("⚠️  {} already exists", config_path.display());
        println!("   Run 'beam config' to see the effective configuration.");
        return Ok(());
    }

    let body = toml::to_string_pretty(&BeamConfig::default())
        .map_err(|e| BeamError::Config(e.to_string()))?;
    let contents = format!(
        "# Beam configuration\n\
         # Environment overrides: BEAM_SERVICE_ID, BEAM_DISPLAY_NAME,\n\
         # BEAM_LOG_LEVEL, BEAM_TELEMETRY_PERIOD_MS\n\n{body}"
    );
    std::fs::write(&config_path, contents)?;

    println!("✅ Created {}", config_path.display());
    Ok(())
}
