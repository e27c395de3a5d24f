use std::sync::Arc;

use clap::Parser;
use tokio::net::TcpListener;

use huddle_server::config::{generate_config_template, CliArgs, Config};
use huddle_server::{auth, db, routes, state, store};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = CliArgs::parse();

    // Handle --generate-config: print template and exit
    if cli.generate_config {
        print!("{}", generate_config_template());
        return Ok(());
    }

    // Load config with layered precedence: defaults < TOML < env < CLI
    let config = Config::load(&cli)?;

    // Initialize tracing/logging
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("huddle_server=info"));
    if config.json_logs {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .init();
    } else {
        tracing_subscriber::fmt()
            .pretty()
            .with_env_filter(env_filter)
            .init();
    }

    tracing::info!("Huddle server v{} starting", env!("CARGO_PKG_VERSION"));

    // Initialize SQLite database
    let db = db::init_db(&config.data_dir)?;

    // Load or generate JWT signing key (256-bit random, stored in data_dir)
    let jwt_secret = auth::jwt::load_or_generate_jwt_secret(&config.data_dir)?;

    let engine_config = config.engine_config();
    tracing::info!(
        notify_self = engine_config.notify_self,
        leave_channels_on_disconnect = engine_config.leave_channels_on_disconnect,
        "Engine configured"
    );

    let heartbeat = config.heartbeat();
    tracing::info!(
        ping_interval_secs = heartbeat.interval.as_secs(),
        pong_timeout_secs = heartbeat.timeout.as_secs(),
        "WebSocket heartbeat configured"
    );

    let app_state = state::AppState::new(
        engine_config,
        store::SqliteStore::new(db),
        Arc::new(auth::JwtIdentity::new(jwt_secret)),
    )
    .with_heartbeat(heartbeat);

    // Build router
    let app = routes::build_router(app_state);

    // Bind and serve
    let addr = format!("{}:{}", config.bind_address, config.port);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("Listening on {}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}
