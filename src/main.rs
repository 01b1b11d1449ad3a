//! SOAP runtime binary.
//!
//! Run with: `soap-runtime serve --config config.yaml`

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use soap_runtime::message::xml_http::identify;
use soap_runtime::message::{to_bytes, DomMessage, Message};
use soap_runtime::packet::{keys, Packet};
use soap_runtime::pipe::ServerAssemblerContext;
use soap_runtime::server::{create_endpoint, provider_tube};
use soap_runtime::transport::router;
use soap_runtime::xml::XmlWriterFactory;
use soap_runtime::{RuntimeConfig, Stub};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::signal;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

/// SOAP/XML web-services runtime.
///
/// Serves an echo endpoint, sends single requests through the client
/// pipeline and classifies content types.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info", global = true)]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve an echo endpoint over HTTP
    Serve {
        /// Path to configuration file (YAML)
        #[arg(short, long, default_value = "config.yaml")]
        config: PathBuf,
    },
    /// Send one request and print the response envelope
    Call {
        /// Endpoint address
        #[arg(short, long)]
        url: String,

        /// File holding the payload element
        #[arg(short, long)]
        payload: PathBuf,

        /// SOAP action
        #[arg(short, long)]
        action: Option<String>,

        /// Path to configuration file (YAML)
        #[arg(short, long, default_value = "config.yaml")]
        config: PathBuf,
    },
    /// Print the classification of a content type
    Classify {
        content_type: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let log_level = args.log_level.parse().unwrap_or(Level::INFO);
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set tracing subscriber")?;

    match args.command {
        Command::Serve { config } => serve(&config).await,
        Command::Call {
            url,
            payload,
            action,
            config,
        } => call(&config, url, &payload, action).await,
        Command::Classify { content_type } => {
            let class = identify(&content_type).context("Invalid content type")?;
            println!("{}", class);
            Ok(())
        }
    }
}

async fn load_config(path: &Path) -> Result<RuntimeConfig> {
    if path.exists() {
        let content = tokio::fs::read_to_string(path)
            .await
            .context("Failed to read config file")?;
        RuntimeConfig::from_yaml(&content).context("Failed to parse config file")
    } else {
        info!("Config file not found, using defaults");
        Ok(RuntimeConfig::default())
    }
}

fn echo(request: &mut Packet) -> soap_runtime::Result<Option<Box<dyn Message>>> {
    Ok(request.take_message())
}

async fn serve(config_path: &Path) -> Result<()> {
    info!("Starting SOAP runtime v{}", env!("CARGO_PKG_VERSION"));
    info!("Config file: {}", config_path.display());
    let config = Arc::new(load_config(config_path).await?);

    info!(
        soap_version = ?config.binding.soap_version,
        mtom = config.binding.mtom.enabled,
        validation = config.validation.enabled,
        dump = config.http.dump,
        "Configuration loaded"
    );

    let writers = Arc::new(XmlWriterFactory::default());
    let ctx = ServerAssemblerContext::new(config.clone(), provider_tube(Arc::new(echo)));
    let adapter = create_endpoint(&ctx, writers).context("Failed to create endpoint")?;
    let app = router(adapter.clone(), &config.server.path);

    let listener = tokio::net::TcpListener::bind(&config.server.listen_address)
        .await
        .with_context(|| format!("Failed to bind {}", config.server.listen_address))?;
    info!(
        address = %config.server.listen_address,
        path = %config.server.path,
        endpoint = %config.server.endpoint_name,
        "Listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server error")?;

    let metrics = adapter.metrics();
    info!(
        requests_processed = metrics.requests_processed,
        requests_faulted = metrics.requests_faulted,
        "SOAP runtime stopped"
    );
    Ok(())
}

async fn call(config_path: &Path, url: String, payload: &Path, action: Option<String>) -> Result<()> {
    let config = Arc::new(load_config(config_path).await?);
    let xml = tokio::fs::read(payload)
        .await
        .with_context(|| format!("Failed to read {}", payload.display()))?;

    let stub = Stub::http(config.clone(), url, Arc::new(XmlWriterFactory::default()))
        .context("Failed to create client")?;
    if let Some(action) = action {
        stub.set_property(keys::SOAP_ACTION, action);
    }
    let request = DomMessage::from_xml(config.binding.soap_version, &xml)
        .context("Failed to parse payload")?;

    let mut response = stub
        .invoke(Box::new(request))
        .await
        .context("Invocation failed")?;
    let bytes = to_bytes(response.as_mut()).context("Failed to serialize response")?;
    println!("{}", String::from_utf8_lossy(&bytes));
    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut s) => {
                s.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
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
    info!("Shutdown signal received, stopping server");
}
