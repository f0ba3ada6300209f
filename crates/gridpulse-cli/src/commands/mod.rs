pub mod config;
pub mod fetch;
pub mod serve;

use std::path::PathBuf;

use clap::Args;
use gridpulse_core::{Config, ConfigError, parse_duration};

/// Options shared by every subcommand. Flags override the config file.
#[derive(Args, Debug, Default)]
pub struct ConfigArgs {
    /// JSON configuration file
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Remote collection URL (e.g. http://10.1.19.105:5000/energygrid2)
    #[arg(long)]
    pub base_url: Option<String>,

    /// Comma-separated device ids
    #[arg(long, value_delimiter = ',')]
    pub devices: Vec<String>,

    /// Pause after a successful refresh (e.g. "5m", "30s")
    #[arg(long)]
    pub interval: Option<String>,

    /// Pause after a failed refresh
    #[arg(long)]
    pub retry_delay: Option<String>,

    /// Per-request timeout against the remote
    #[arg(long)]
    pub timeout: Option<String>,

    /// Query endpoint bind address (e.g. 0.0.0.0:5001)
    #[arg(long)]
    pub bind: Option<String>,
}

impl ConfigArgs {
    /// Config file (or defaults) with flag overrides applied, validated.
    pub fn resolve(&self) -> Result<Config, ConfigError> {
        let mut config = match &self.config {
            Some(path) => Config::load(path)?,
            None => Config::default(),
        };

        if let Some(url) = &self.base_url {
            config.base_url = url.clone();
        }
        if !self.devices.is_empty() {
            config.devices = self
                .devices
                .iter()
                .map(|d| d.trim().to_string())
                .filter(|d| !d.is_empty())
                .collect();
        }
        if let Some(s) = &self.interval {
            config.refresh_interval = parse_duration(s)?;
        }
        if let Some(s) = &self.retry_delay {
            config.retry_delay = parse_duration(s)?;
        }
        if let Some(s) = &self.timeout {
            config.request_timeout = parse_duration(s)?;
        }
        if let Some(bind) = &self.bind {
            config.bind = bind.clone();
        }

        config.validate()?;
        Ok(config)
    }
}

/// Resolve the configuration or report the problem and exit.
pub fn resolve_or_exit(args: &ConfigArgs) -> Config {
    match args.resolve() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    }
}

/// Install the global logger: `info` by default, `debug` with `--verbose`.
pub fn init_logging(verbose: bool) {
    let level = if verbose {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };
    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .init();
}
