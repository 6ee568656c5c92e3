//! Solfege authentication API server.
//!
//! Connects to PostgreSQL, applies migrations and serves the auth routes.

use clap::Parser;
use solfege_api::config::ApiConfig;
use solfege_api::{AppState, Backends};
use sqlx::postgres::PgPoolOptions;
use tracing::info;

/// CLI arguments. Flags override the matching environment variables.
#[derive(Parser, Debug)]
#[command(name = "solfege_server", about = "Solfege authentication API server")]
struct Args {
    /// Address to listen on.
    #[arg(long, env = "BIND_ADDR", default_value = "127.0.0.1:3100")]
    bind: String,

    /// PostgreSQL connection URL.
    #[arg(
        long,
        env = "DATABASE_URL",
        default_value = "postgres://localhost:5432/solfege"
    )]
    database_url: String,

    /// Maximum number of database connections in the pool.
    #[arg(long, default_value_t = 5)]
    max_connections: u32,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,solfege_api=debug,solfege_core=debug".into()),
        )
        .init();

    let args = Args::parse();
    info!(
        bind = %args.bind,
        max_connections = args.max_connections,
        version = solfege_core::version(),
        "starting solfege_server"
    );

    let pool = PgPoolOptions::new()
        .max_connections(args.max_connections)
        .acquire_timeout(std::time::Duration::from_secs(30))
        .connect(&args.database_url)
        .await?;

    info!("running database migrations");
    solfege_api::migrate(&pool).await?;

    let config = ApiConfig {
        bind_addr: args.bind,
        pg_connection_url: args.database_url,
        ..ApiConfig::from_env()
    };
    let state = AppState::new(config.clone(), Backends::postgres(pool))?;
    let app = solfege_api::router(state);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    info!(addr = %listener.local_addr()?, "REST API listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown signal received");
        })
        .await?;

    Ok(())
}
