pub mod config;
pub mod doctor;

use clap::{Parser, Subcommand};

/// tfrelay — a provider-registry caching proxy.
#[derive(Debug, Parser)]
#[command(name = "tfrelay", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Start the cache server (default when no subcommand is given).
    Run {
        /// Path to the TOML config file.
        #[arg(long)]
        config: Option<String>,
    },
    /// Run diagnostic checks against the current configuration.
    Doctor,
    /// Configuration utilities.
    #[command(subcommand)]
    Config(ConfigCommand),
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Parse the config file and report any errors.
    Validate,
    /// Dump the resolved configuration (with defaults) as TOML.
    Show,
}

/// Loads configuration from the given path (or `TFRELAY_CONFIG`, or
/// `tfrelay.toml` by default). Missing files fall back to `Config::default()`
/// rather than erroring, matching the teacher's `load_config` behavior —
/// `run`, `doctor`, and `config` all share this one loading path.
pub fn load_config(path: Option<&str>) -> anyhow::Result<(tfrelay_domain::Config, String)> {
    let config_path = path
        .map(str::to_string)
        .or_else(|| std::env::var("TFRELAY_CONFIG").ok())
        .unwrap_or_else(|| "tfrelay.toml".to_string());

    let config = if std::path::Path::new(&config_path).exists() {
        let raw = std::fs::read_to_string(&config_path)
            .map_err(|e| anyhow::anyhow!("reading {config_path}: {e}"))?;
        toml::from_str(&raw).map_err(|e| anyhow::anyhow!("parsing {config_path}: {e}"))?
    } else {
        tfrelay_domain::Config::default()
    };

    Ok((config, config_path))
}
