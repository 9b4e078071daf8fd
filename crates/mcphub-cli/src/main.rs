use clap::{Parser, ValueEnum};
use mcphub_config::{ConfigStore, ConfigWatcher, WatchSettings};
use mcphub_gateway::GatewayServer;
use mcphub_logs::{default_log_path, LogHub, LogHubSettings, LogRotation};
use mcphub_mcp::{DefaultTransportFactory, HubContext, HubManager, SupervisorSettings};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "mcp-hub",
    version,
    about = "Supervise MCP servers behind one HTTP control API"
)]
struct Cli {
    /// Port for the control API
    #[arg(short, long, default_value_t = 3000, env = "MCP_HUB_PORT")]
    port: u16,

    /// Address to bind the control API to
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Server configuration file; repeat to merge several (later wins)
    #[arg(short, long = "config", required = true)]
    config: Vec<PathBuf>,

    /// Reload when a configuration file changes
    #[arg(short, long)]
    watch: bool,

    /// Persisted log file
    #[arg(long)]
    log_file: Option<PathBuf>,

    /// How often the log file rolls over
    #[arg(long, value_enum, default_value_t = Rotation::Daily)]
    log_rotation: Rotation,

    /// Log files to keep, the active one included
    #[arg(long, default_value_t = 7)]
    log_max_files: usize,

    /// Seconds to wait for servers to close on shutdown
    #[arg(long, default_value_t = 10)]
    shutdown_grace_secs: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Rotation {
    Hourly,
    Daily,
    Never,
}

impl From<Rotation> for LogRotation {
    fn from(rotation: Rotation) -> Self {
        match rotation {
            Rotation::Hourly => LogRotation::Hourly,
            Rotation::Daily => LogRotation::Daily,
            Rotation::Never => LogRotation::Never,
        }
    }
}

impl Cli {
    fn log_settings(&self) -> LogHubSettings {
        LogHubSettings {
            path: Some(self.log_file.clone().unwrap_or_else(default_log_path)),
            rotation: self.log_rotation.into(),
            max_files: self.log_max_files,
            ..LogHubSettings::default()
        }
    }

    fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let logs = Arc::new(LogHub::new(cli.log_settings()));
    let store = Arc::new(
        ConfigStore::load(cli.config.clone(), logs.clone())
            .await
            .map_err(|e| anyhow::anyhow!("Failed to load configuration: {e}"))?,
    );

    let manager = HubManager::new(
        HubContext::new(store.clone(), logs.clone()),
        Arc::new(DefaultTransportFactory::new(logs.clone())),
        SupervisorSettings::default(),
    );

    let addr = format!("{}:{}", cli.host, cli.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to bind {addr}: {e}"))?;

    manager.start().await;

    let _watcher = if cli.watch {
        let watcher = ConfigWatcher::start(store.clone(), WatchSettings::default())?;
        info!(sources = store.sources().len(), "Watching configuration for changes");
        Some(watcher)
    } else {
        None
    };

    logs.hub(format!("MCP hub listening on http://{addr}"));
    let app = GatewayServer::build(manager.clone());
    GatewayServer::serve(listener, app, shutdown_signal()).await?;

    manager.shutdown(cli.shutdown_grace()).await;
    info!("MCP hub stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Shutdown signal received");
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cli = Cli::try_parse_from(["mcp-hub", "--config", "servers.json"]).unwrap();
        assert_eq!(cli.host, "127.0.0.1");
        assert!(!cli.watch);
        assert_eq!(cli.config, vec![PathBuf::from("servers.json")]);
        assert_eq!(cli.shutdown_grace(), Duration::from_secs(10));

        let settings = cli.log_settings();
        assert_eq!(settings.rotation, LogRotation::Daily);
        assert_eq!(settings.max_files, 7);
        assert!(settings.path.is_some());
    }

    #[test]
    fn test_repeated_config_keeps_order() {
        let cli = Cli::try_parse_from([
            "mcp-hub", "-c", "global.json", "-c", "project.json", "-w", "-p", "4000",
        ])
        .unwrap();
        assert_eq!(
            cli.config,
            vec![PathBuf::from("global.json"), PathBuf::from("project.json")]
        );
        assert!(cli.watch);
        assert_eq!(cli.port, 4000);
    }

    #[test]
    fn test_config_is_required() {
        assert!(Cli::try_parse_from(["mcp-hub"]).is_err());
    }

    #[test]
    fn test_log_file_override() {
        let cli = Cli::try_parse_from([
            "mcp-hub",
            "-c",
            "a.json",
            "--log-file",
            "/tmp/hub.log",
            "--log-max-files",
            "2",
            "--log-rotation",
            "never",
        ])
        .unwrap();
        let settings = cli.log_settings();
        assert_eq!(settings.path, Some(PathBuf::from("/tmp/hub.log")));
        assert_eq!(settings.max_files, 2);
        assert_eq!(settings.rotation, LogRotation::Never);
    }
}
