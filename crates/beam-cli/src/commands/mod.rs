use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::{Shell, generate};
use std::path::PathBuf;

use beam_config::{BeamConfig, ConfigLoader, ConfigWarning};
use beam_core::{BeamError, MotionSample};
use beam_motion::{GestureMatcher, ProximityModel};

mod demo;
mod init;

/// Beam: bump two phones together to pair them
#[derive(Parser)]
#[command(name = "beam", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to beam.toml config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log level override (e.g. debug, info, warn, error)
    #[arg(short, long, global = true)]
    log_level: Option<String>,

    /// Enable verbose output (debug logging)
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    verbose: bool,

    /// Suppress all log output (errors only)
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run two simulated devices through discovery, negotiation and a bump
    Demo {
        /// When both devices jolt, in milliseconds after start
        #[arg(long, default_value = "1500")]
        bump_at_ms: u64,
        /// Give up after this many seconds
        #[arg(long, default_value = "10")]
        run_secs: u64,
        /// Signal strength each device sees for the other, in dBm
        #[arg(long, default_value = "-30", allow_negative_numbers = true)]
        rssi: i16,
    },
    /// Estimate distance from a signal strength reading
    Proximity {
        /// Observed signal strength in dBm
        #[arg(allow_negative_numbers = true)]
        rssi: i16,
    },
    /// Check whether two motion samples count as the same bump
    Gesture {
        /// Local sample as x,y,z
        #[arg(allow_hyphen_values = true, value_parser = parse_sample)]
        local: MotionSample,
        /// Remote sample as x,y,z
        #[arg(allow_hyphen_values = true, value_parser = parse_sample)]
        remote: MotionSample,
    },
    /// Show version and build info
    Version,
    /// Show current configuration
    Config {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Validate configuration and report problems
    Doctor,
    /// Write a default beam.toml in the current or home directory
    Init {
        /// Create in current directory instead of ~/.beam/
        #[arg(long)]
        local: bool,
    },
    /// Generate shell completions for bash, zsh, or fish
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

fn doctor_summary(warnings: &[ConfigWarning]) -> String {
    match warnings.len() {
        0 => "✅ configuration looks good".to_string(),
        1 => "⚠️  1 warning".to_string(),
        n => format!("⚠️  {n} warnings"),
    }
}

/// Parse "x,y,z" into a motion sample.
fn parse_sample(s: &str) -> std::result::Result<MotionSample, String> {
    let parts: Vec<&str> = s.split(',').collect();
    if parts.len() != 3 {
        return Err(format!("expected x,y,z but got `{s}`"));
    }
    let mut values = [0f32; 3];
    for (value, part) in values.iter_mut().zip(&parts) {
        *value = part
            .trim()
            .parse()
            .map_err(|e| format!("invalid component `{part}`: {e}"))?;
    }
    Ok(MotionSample::from(values))
}

impl Cli {
    pub async fn run(self) -> beam_core::Result<()> {
        // Load config first so we can use it for log format
        let config_loader = ConfigLoader::load(self.config.as_deref())?;
        let config = config_loader.get();

        // Resolve log level: --verbose > --quiet > --log-level > config
        let log_level = if self.verbose {
            "debug"
        } else if self.quiet {
            "error"
        } else {
            self.log_level
                .as_deref()
                .unwrap_or(config.logging.level.as_str())
        };

        let filter = || {
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level))
        };
        match config.logging.format.as_str() {
            "json" => tracing_subscriber::fmt()
                .with_env_filter(filter())
                .json()
                .with_target(true)
                .init(),
            "compact" => tracing_subscriber::fmt()
                .with_env_filter(filter())
                .compact()
                .with_target(false)
                .init(),
            _ => tracing_subscriber::fmt()
                .with_env_filter(filter())
                .with_target(false)
                .init(),
        }

        match self.command {
            Commands::Demo {
                bump_at_ms,
                run_secs,
                rssi,
            } => {
                demo::cmd_demo(
                    config,
                    demo::DemoOptions {
                        bump_at_ms,
                        run_secs,
                        rssi,
                    },
                )
                .await
            }
            Commands::Proximity { rssi } => Self::cmd_proximity(&config, rssi),
            Commands::Gesture { local, remote } => Self::cmd_gesture(&config, local, remote),
            Commands::Version => Self::cmd_version(),
            Commands::Config { json } => Self::cmd_config(config, json),
            Commands::Doctor => Self::cmd_doctor(config, &config_loader),
            Commands::Init { local } => init::cmd_init(local),
            Commands::Completions { shell } => Self::cmd_completions(shell),
        }
    }

    fn cmd_proximity(config: &BeamConfig, rssi: i16) -> beam_core::Result<()> {
        let model = ProximityModel::from(&config.proximity);
        match model.estimate_distance(rssi) {
            Some(meters) => {
                println!("📶 {rssi} dBm ≈ {meters:.3} m");
                println!(
                    "   Very close (≤ {} m): {}",
                    model.threshold_meters,
                    model.is_very_close(rssi)
                );
            }
            None => println!("📶 {rssi} dBm: no usable distance estimate"),
        }
        Ok(())
    }

    fn cmd_gesture(
        config: &BeamConfig,
        local: MotionSample,
        remote: MotionSample,
    ) -> beam_core::Result<()> {
        let matcher = GestureMatcher::new(config.gesture.match_threshold);
        let score = local.dot(&remote);
        let verdict = if matcher.matches(&local, &remote) {
            "bump ✅"
        } else {
            "no bump"
        };
        println!(
            "🤜 {score:.3} vs threshold {}: {verdict}",
            matcher.threshold()
        );
        Ok(())
    }

    fn cmd_config(config: BeamConfig, json: bool) -> beam_core::Result<()> {
        if json {
            println!("{}", serde_json::to_string_pretty(&config)?);
        } else {
            println!(
                "{}",
                toml::to_string_pretty(&config).map_err(|e| BeamError::Config(e.to_string()))?
            );
        }
        Ok(())
    }

    fn cmd_doctor(config: BeamConfig, loader: &ConfigLoader) -> beam_core::Result<()> {
        println!("🩺 Beam Doctor: configuration audit");
        println!();

        if loader.path().exists() {
            println!("  config: {}", loader.path().display());
        } else {
            println!(
                "  config: {} (not found, using defaults)",
                loader.path().display()
            );
        }
        println!();

        let warnings = match config.validate() {
            Ok(w) => w,
            Err(e) => {
                println!("{e}");
                return Ok(());
            }
        };

        for w in &warnings {
            println!("  {w}");
        }
        println!();
        println!("  {}", doctor_summary(&warnings));
        Ok(())
    }

    fn cmd_version() -> beam_core::Result<()> {
        println!("📡 Beam v{}", env!("CARGO_PKG_VERSION"));
        println!("   Rust edition: 2024");
        println!("   Target: {}", std::env::consts::ARCH);
        println!("   OS: {}", std::env::consts::OS);
        #[cfg(debug_assertions)]
        println!("   Profile: debug");
        #[cfg(not(debug_assertions))]
        println!("   Profile: release");
        Ok(())
    }

    fn cmd_completions(shell: Shell) -> beam_core::Result<()> {
        let mut cmd = Cli::command();
        generate(shell, &mut cmd, "beam", &mut std::io::stdout());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_sample() {
        assert_eq!(
            parse_sample("0.5, -1,2").unwrap(),
            MotionSample::new(0.5, -1.0, 2.0)
        );
        assert!(parse_sample("1,2").is_err());
        assert!(parse_sample("1,2,x").is_err());
    }

    #[test]
    fn test_negative_rssi_parses() {
        let cli = Cli::try_parse_from(["beam", "proximity", "-70"]).unwrap();
        assert!(matches!(cli.command, Commands::Proximity { rssi: -70 }));
    }

    #[test]
    fn test_gesture_args_parse() {
        let cli = Cli::try_parse_from(["beam", "gesture", "-0.5,0,1", "1,1,0"]).unwrap();
        match cli.command {
            Commands::Gesture { local, remote } => {
                assert_eq!(local, MotionSample::new(-0.5, 0.0, 1.0));
                assert_eq!(remote, MotionSample::new(1.0, 1.0, 0.0));
            }
            _ => panic!("expected gesture command"),
        }
    }

    #[test]
    fn test_demo_defaults() {
        let cli = Cli::try_parse_from(["beam", "demo"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Demo {
                bump_at_ms: 1500,
                run_secs: 10,
                rssi: -30
            }
        ));
    }

    #[test]
    fn test_doctor_summary_counts_warnings() {
        assert_eq!(doctor_summary(&[]), "✅ configuration looks good");

        let mut config = BeamConfig::default();
        config.logging.level = "loud".into();
        config.logging.format = "xml".into();
        let warnings = config.validate().unwrap();
        assert_eq!(doctor_summary(&warnings), "⚠️  2 warnings");
    }

    #[test]
    fn test_verbose_conflicts_with_quiet() {
        assert!(Cli::try_parse_from(["beam", "-v", "-q", "version"]).is_err());
    }
}
