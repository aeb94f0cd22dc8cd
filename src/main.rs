use clap::Parser;
use sensor_relay::{
    cli::{Cli, Commands},
    config::RelayConfig,
    create_router,
    state::RelayState,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "sensor_relay=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Parse CLI arguments
    let cli = Cli::parse();

    // Load configuration
    let mut config = RelayConfig::from_env()?;

    match cli.command {
        Some(Commands::Config) => {
            print_config(&config);
            return Ok(());
        }
        Some(Commands::Serve { port: Some(port) }) => {
            config.port = port;
        }
        Some(Commands::Serve { port: None }) | None => {}
    }

    info!("🚀 Starting Sensor Relay v{}", VERSION);
    info!("📋 Configuration loaded:");
    info!("   Port: {}", config.port);
    info!("   Bind address: {}", config.bind_addr);
    info!(
        "   EMG buffer: {} samples, window {}, timeout {} ms",
        config.emg.capacity, config.emg.recent_window, config.emg.connection_timeout_ms
    );
    info!(
        "   Thermal buffer: {} frames, window {}, timeout {} ms",
        config.thermal.capacity, config.thermal.recent_window, config.thermal.connection_timeout_ms
    );
    info!("   Push heartbeat: {} ms", config.push_heartbeat_interval_ms);

    let state = Arc::new(RelayState::new(config.clone()));

    // Log device connect/disconnect transitions
    let monitor = state
        .hub
        .clone()
        .spawn_liveness_monitor(config.liveness_check_interval(), state.shutdown.clone());

    let app = create_router(state.clone());

    let addr: SocketAddr = config.bind_address().parse()?;
    info!("🎧 Listening on http://{}", addr);
    info!("📡 Stream endpoints: http://{}/api/{{emg,thermal}}/stream", addr);
    info!("🔑 Health endpoint: http://{}/health", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(state.shutdown.clone()))
        .await?;

    if let Err(e) = monitor.await {
        warn!("Liveness monitor ended abnormally: {}", e);
    }
    info!("👋 Sensor Relay stopped");

    Ok(())
}

/// Resolve on Ctrl-C or SIGTERM and cancel `shutdown`, which closes every
/// open push stream so the server can drain.
async fn shutdown_signal(shutdown: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!("Failed to listen for SIGTERM: {}", e);
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

    info!("Shutdown signal received, closing push streams");
    shutdown.cancel();
}

fn print_config(config: &RelayConfig) {
    println!("{:<34} {}", "Bind address", config.bind_address());
    for (name, channel) in [("EMG", &config.emg), ("Thermal", &config.thermal)] {
        println!("{:<34} {}", format!("{} buffer capacity", name), channel.capacity);
        println!("{:<34} {}", format!("{} recent window", name), channel.recent_window);
        println!(
            "{:<34} {} ms",
            format!("{} connection timeout", name),
            channel.connection_timeout_ms
        );
        println!(
            "{:<34} {}",
            format!("{} max sample age", name),
            channel
                .max_sample_age_ms
                .map(|ms| format!("{} ms", ms))
                .unwrap_or_else(|| "disabled".to_string())
        );
    }
    println!("{:<34} {} ms", "Push heartbeat interval", config.push_heartbeat_interval_ms);
    println!("{:<34} {}", "Subscriber queue capacity", config.subscriber_queue_capacity);
    println!(
        "{:<34} {} s",
        "Liveness check interval", config.liveness_check_interval_seconds
    );
    println!("{:<34} {} ms", "Command retention", config.command_retention_ms);
    println!("{:<34} {} bytes", "Max body size", config.max_body_size);
}
