use std::net::SocketAddr;
use std::time::Duration;

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use licensegate::config::Config;
use licensegate::db::{AppState, create_pool, init_db};
use licensegate::handlers;
use licensegate::models::CreateLicense;
use licensegate::rate_limit::RateLimiters;
use licensegate::service::LicenseService;
use licensegate::tls;
use licensegate_sdk::{LicenseType, codec};

const RATE_LIMIT_CLEANUP_INTERVAL: Duration = Duration::from_secs(60);
const TLS_SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

#[derive(Parser, Debug)]
#[command(name = "licensegate")]
#[command(about = "License issuance and machine activation server")]
struct Cli {
    /// Issue a demo license on startup (dev mode only)
    #[arg(long)]
    seed: bool,

    /// Print a new base64 Ed25519 key pair and exit
    #[arg(long)]
    generate_keypair: bool,
}

/// Issues one demo license so a client can be pointed at a fresh server.
fn seed_dev_data(state: &AppState) {
    let input = CreateLicense {
        licensee_name: "Dev Licensee".to_string(),
        licensee_email: "dev@licensegate.local".to_string(),
        company: Some("LicenseGate Dev".to_string()),
        license_type: Some(LicenseType::Professional),
        max_machines: 3,
        support_duration_days: 365,
        duration_days: Some(365),
        offline_grace_days: None,
    };
    let license = state
        .licenses
        .issue(&input)
        .expect("Failed to issue dev license");

    tracing::info!("============================================");
    tracing::info!("SEEDED DEV LICENSE");
    tracing::info!("License ID: {}", license.record.license_id);
    tracing::info!("License Key: {}", license.record.license_key);
    tracing::info!("Public Key: {}", state.licenses.public_key());
    tracing::info!("============================================");
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if cli.generate_keypair {
        let (private_key, public_key) = codec::generate_keypair();
        println!("SIGNING_KEY={}", private_key);
        println!("PUBLIC_KEY={}", public_key);
        println!();
        println!("Keep SIGNING_KEY on the server only. Embed PUBLIC_KEY in the client.");
        return;
    }

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "licensegate=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("Invalid configuration: {}", e);
            std::process::exit(1);
        }
    };

    if config.dev_mode {
        tracing::info!("Running in DEVELOPMENT mode");
    }

    let db_pool = create_pool(&config.database_path).expect("Failed to create database pool");
    {
        let conn = db_pool.get().expect("Failed to get connection");
        init_db(&conn).expect("Failed to initialize database");
    }

    let licenses = LicenseService::new(
        db_pool.clone(),
        config.signing_key.clone(),
        config.default_offline_grace_days,
    );
    let state = AppState {
        db: db_pool,
        licenses,
        admin_key: config.admin_key.clone(),
        ready_max_rss_mb: config.ready_max_rss_mb,
    };
    tracing::info!("Clients verify licenses with public key {}", state.licenses.public_key());

    if cli.seed {
        if !config.dev_mode {
            tracing::warn!("--seed flag ignored: not in dev mode (set LICENSEGATE_ENV=dev)");
        } else {
            seed_dev_data(&state);
        }
    }

    let limits = RateLimiters::new(config.rate_limit);
    limits.spawn_cleanup(RATE_LIMIT_CLEANUP_INTERVAL);

    let app = handlers::app(state, &limits, &config.cors_origins);

    let tls_handle = axum_server::Handle::new();
    if let (Some(tls_config), Some(tls_addr)) = (config.tls.clone(), config.tls_addr()) {
        let rustls = tls::load_rustls_config(&tls_config.cert_path, &tls_config.key_path)
            .await
            .expect("Failed to load TLS certificate and key");
        let addr: SocketAddr = tls_addr.parse().expect("Invalid HTTPS listen address");
        let handle = tls_handle.clone();
        let app = app.clone();
        tokio::spawn(async move {
            tracing::info!("LicenseGate HTTPS listening on {}", addr);
            if let Err(e) = axum_server::bind_rustls(addr, rustls)
                .handle(handle)
                .serve(app.into_make_service_with_connect_info::<SocketAddr>())
                .await
            {
                tracing::error!("HTTPS server failed: {}", e);
            }
        });
    }

    let addr = config.addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("Failed to bind to address");

    tracing::info!("LicenseGate listening on {}", addr);

    // Connect info is required for per-IP rate limiting
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        shutdown_signal().await;
        tls_handle.graceful_shutdown(Some(TLS_SHUTDOWN_GRACE));
    })
    .await
    .expect("Failed to start server");
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to install Ctrl+C handler");
    tracing::info!("Shutdown signal received, stopping server...");
}
