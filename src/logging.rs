//! Logging configuration with journald support on Linux.
//!
//! This module sets up tracing-based logging that integrates with systemd's
//! journal on Linux systems, with file-based fallback for other platforms
//! or when journald is unavailable.

use anyhow::Result;
use std::path::PathBuf;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize the logging system.
///
/// On Linux, this will attempt to connect to systemd-journald.
/// If unavailable or on other platforms, logs go to a file under `log_dir`.
///
/// Log level can be controlled via the `AI_LOG_LEVEL` environment variable:
/// - `AI_LOG_LEVEL=debug` for verbose output
/// - `AI_LOG_LEVEL=info` for standard output (default)
/// - `AI_LOG_LEVEL=warn` for warnings and errors only
/// - `AI_LOG_LEVEL=error` for errors only
pub fn init(log_dir: Option<PathBuf>) -> Result<()> {
    let env_filter =
        EnvFilter::try_from_env("AI_LOG_LEVEL").unwrap_or_else(|_| EnvFilter::new("info"));

    #[cfg(target_os = "linux")]
    {
        // Try to use journald on Linux
        if let Ok(journald_layer) = tracing_journald::layer() {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(journald_layer)
                .init();

            tracing::info!("logging initialized with journald backend");
            return Ok(());
        }
    }

    // Fallback to file-based logging
    let log_dir = log_dir.unwrap_or_else(|| PathBuf::from("./logs"));

    std::fs::create_dir_all(&log_dir)?;

    let file_appender = tracing_appender::rolling::daily(&log_dir, "photo-ai-worker.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    // Store the guard in a static to prevent it from being dropped; safe
    // because init() only runs once at process startup.
    static GUARD: std::sync::OnceLock<tracing_appender::non_blocking::WorkerGuard> =
        std::sync::OnceLock::new();
    let _ = GUARD.set(guard);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_writer(non_blocking).with_ansi(false))
        .init();

    tracing::info!(?log_dir, "logging initialized with file backend");
    Ok(())
}
