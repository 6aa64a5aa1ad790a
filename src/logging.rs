//! Logging setup for SFU server binaries
//
// The listener itself only emits `tracing` events; binaries call
// [`init_logging`] once at startup to install a subscriber.

use tracing_subscriber::{
    fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter,
};

use crate::config::LoggingConfig;

/// Install the global `tracing` subscriber.
///
/// Uses JSON output when `format` is `"json"` (production), a
/// human-readable format otherwise. `RUST_LOG` overrides the configured
/// level. Output goes to the configured file, or stdout when none is set.
pub fn init_logging(config: &LoggingConfig) -> anyhow::Result<()> {
    let filter = build_env_filter(&config.level)?;
    let registry = tracing_subscriber::registry().with(filter);

    let writer: Box<dyn std::io::Write + Send + Sync> = match &config.file_path {
        Some(path) => Box::new(
            std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)?,
        ),
        None => Box::new(std::io::stdout()),
    };
    let writer = std::sync::Arc::new(std::sync::Mutex::new(writer));
    let make_writer = move || LockedWriter(std::sync::Arc::clone(&writer));

    if config.format == "json" {
        registry
            .with(fmt::layer().json().with_target(true).with_writer(make_writer))
            .init();
    } else {
        registry
            .with(fmt::layer().with_target(true).with_writer(make_writer))
            .init();
    }

    Ok(())
}

fn build_env_filter(level: &str) -> anyhow::Result<EnvFilter> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }
    EnvFilter::try_new(level).map_err(|e| anyhow::anyhow!("invalid log level {level:?}: {e}"))
}

struct LockedWriter(std::sync::Arc<std::sync::Mutex<Box<dyn std::io::Write + Send + Sync>>>);

impl std::io::Write for LockedWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let mut inner = self.0.lock().unwrap_or_else(|e| e.into_inner());
        inner.write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        let mut inner = self.0.lock().unwrap_or_else(|e| e.into_inner());
        inner.flush()
    }
}
