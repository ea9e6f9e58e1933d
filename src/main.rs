mod config;
mod embed;
mod error;
mod identity;
mod logging;
mod routes;
mod session;

use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;

use config::LogFormat;

/// DataLens embed gateway: signs visitors in through an OAuth identity
/// provider and serves a dashboard embed scoped to each visitor.
#[derive(Parser, Debug)]
#[command(name = "datalens-embed-gateway", version, about)]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    /// Port to listen on (overrides config file)
    #[arg(short, long)]
    port: Option<u16>,

    /// Log output format (overrides config file)
    #[arg(long, value_enum)]
    log_format: Option<LogFormat>,
}

fn fail(message: &str, err: &dyn std::fmt::Display) -> ! {
    tracing::error!(fatal = true, error.message = %err, "{message}");
    std::process::exit(1);
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // The logger's own settings live in the config file, so it is read first
    // and any read error is reported once the logger exists.
    let loaded = config::load_config(&cli.config);
    let (filter, format) = match &loaded {
        Ok(cfg) => (cfg.logging.filter.clone(), cfg.logging.format),
        Err(_) => ("info".to_string(), LogFormat::Json),
    };
    logging::init(&filter, cli.log_format.unwrap_or(format));

    let mut cfg = match loaded {
        Ok(c) => c,
        Err(e) => fail("Configuration error", &e),
    };
    if let Err(e) = cfg.validate() {
        fail("Configuration error", &e);
    }

    // CLI --port overrides config
    if let Some(port) = cli.port {
        cfg.server.port = port;
    }

    let state = match routes::AppState::from_config(&cfg) {
        Ok(state) => Arc::new(state),
        Err(e) => fail("Failed to initialize gateway", &e),
    };

    tracing::info!(
        embed_id = %cfg.embed.embed_id,
        dashboard_url = %cfg.embed.dashboard_url,
        identity_provider = %cfg.oauth.token_url,
        "Configuration loaded successfully"
    );

    let app = routes::router(state);

    let bind_addr = format!("{}:{}", cfg.server.host, cfg.server.port);
    tracing::info!("Listening on {bind_addr}");
    tracing::info!("Public URL: {}", cfg.server.public_url);

    let listener = match tokio::net::TcpListener::bind(&bind_addr).await {
        Ok(listener) => listener,
        Err(e) => fail(&format!("Failed to bind to {bind_addr}"), &e),
    };

    if let Err(e) = axum::serve(listener, app).await {
        fail("Server error", &e);
    }
}
