//! Switchboard HTTP server and CLI

use clap::Parser;
use std::net::SocketAddr;
use std::sync::Arc;
use switchboard::{
    cli::{Cli, Command, generate_config_template},
    config::Config,
    coordinator::ChatRequest,
    handlers::{self, AppState},
    telemetry,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    match cli.command {
        Some(Command::Config { output }) => {
            let template = generate_config_template();
            match output {
                Some(path) => {
                    std::fs::write(&path, template)?;
                    eprintln!("Wrote configuration template to {}", path);
                }
                None => print!("{}", template),
            }
            Ok(())
        }
        Some(Command::Ask { message, verbose }) => ask(&cli.config, message, verbose).await,
        Some(Command::Serve) | None => serve(&cli.config).await,
    }
}

async fn serve(config_path: &str) -> Result<(), Box<dyn std::error::Error>> {
    let config = Arc::new(Config::from_file(config_path)?);
    telemetry::init(&config.observability.log_level);

    tracing::info!(
        "Starting Switchboard server on {}:{}",
        config.server.host,
        config.server.port
    );

    let state = AppState::from_config(config.clone())?;
    let app = handlers::app(state);

    let addr = SocketAddr::from((
        config
            .server
            .host
            .parse::<std::net::IpAddr>()
            .unwrap_or_else(|_| std::net::IpAddr::from([0, 0, 0, 0])),
        config.server.port,
    ));

    tracing::info!("Listening on {}", addr);
    tracing::info!("Chat endpoint available at http://{}/chat", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server stopped");
    Ok(())
}

async fn ask(
    config_path: &str,
    message: String,
    verbose: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = Arc::new(Config::from_file(config_path)?);
    telemetry::init(if verbose { "info" } else { "warn" });

    if message.trim().is_empty() {
        return Err("message cannot be empty".into());
    }

    let state = AppState::from_config(config)?;
    let request = ChatRequest::new(message, "cli", uuid::Uuid::new_v4().to_string());
    let outcome = state.coordinator().dispatch(request).await;

    if verbose {
        eprintln!(
            "category: {} (confidence {:.2}), provider: {}, fellback: {}",
            outcome.result.category,
            outcome.decision.confidence(),
            outcome.result.provider_used,
            outcome.result.fellback
        );
        eprintln!("reasoning: {}", outcome.decision.reasoning());
    }
    println!("{}", outcome.result.text);
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
