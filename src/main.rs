use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use freshdesk_sync::config::Settings;
use freshdesk_sync::resource::Registry;
use freshdesk_sync::server::{build_router, AppState};
use tracing::Level;
use tracing_subscriber::EnvFilter;

/// Streaming sync connector for the Freshdesk REST API
#[derive(Parser, Debug)]
#[command(name = "freshdesk-sync", version, about, long_about = None)]
struct Args {
    /// Listen port (overrides the `port` environment variable)
    #[arg(short, long)]
    port: Option<u16>,

    /// Log level
    #[arg(long, value_enum, default_value = "info")]
    log_level: LogLevel,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    fn to_tracing_level(self) -> Level {
        match self {
            LogLevel::Error => Level::ERROR,
            LogLevel::Warn => Level::WARN,
            LogLevel::Info => Level::INFO,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Trace => Level::TRACE,
        }
    }
}

fn setup_logging(level: LogLevel) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.to_tracing_level().to_string()));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    setup_logging(args.log_level);

    // Missing mandatory connection settings refuse startup.
    let mut settings = Settings::from_env()
        .context("freshdesk-sync cannot be started")?;
    if let Some(port) = args.port {
        settings.port = port;
    }
    let port = settings.port;

    let registry = Registry::load().context("invalid embedded resource registry")?;
    let state = AppState::new(settings, registry)?;
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port))
        .await
        .with_context(|| format!("failed to bind port {port}"))?;
    tracing::info!(port, "freshdesk-sync listening");

    axum::serve(listener, app)
        .await
        .context("HTTP server failed")?;
    Ok(())
}
