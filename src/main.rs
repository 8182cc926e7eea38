use anyhow::{Context, Result};
use clap::Parser;
use std::fs::File;
use std::sync::Mutex;
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    let cfg = mandala_lab::config::Config::parse();
    if cfg.list_devices {
        mandala_lab::audio::list_input_devices()?;
        return Ok(());
    }

    // The preview owns the terminal, so logs only go to a file when asked for.
    if let Some(path) = &cfg.log_file {
        let file = File::create(path)
            .with_context(|| format!("create log file {}", path.display()))?;
        tracing_subscriber::fmt()
            .with_writer(Mutex::new(file))
            .with_ansi(false)
            .with_env_filter(
                EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
            )
            .init();
    }

    mandala_lab::app::run(cfg)
}
