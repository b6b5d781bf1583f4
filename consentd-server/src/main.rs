//! consentd server entry point

use anyhow::Context;
use clap::{Arg, Command};
use rand::rngs::OsRng;
use rand::RngCore;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use consentd_core::auth::TokenIssuer;
use consentd_engine::StorageEngine;

mod auth;
mod handlers;
mod registry;
mod server;

use auth::{AuthenticationOrchestrator, SignInProfile};
use handlers::AppState;
use registry::{AssetRegistry, HttpAssetRegistry};
use server::ConsentdServer;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt::init();

    let matches = Command::new("consentd-server")
        .version("0.1.0")
        .about("Consent negotiation service with wallet-based authentication")
        .arg(
            Arg::new("data-dir")
                .long("data-dir")
                .value_name("PATH")
                .help("Data directory path")
                .default_value("./data"),
        )
        .arg(
            Arg::new("bind")
                .long("bind")
                .value_name("ADDR")
                .help("Bind address")
                .default_value("127.0.0.1:8050"),
        )
        .arg(
            Arg::new("domain")
                .long("domain")
                .value_name("DOMAIN")
                .help("Domain presented in sign-in messages")
                .default_value("localhost:8050"),
        )
        .arg(
            Arg::new("uri")
                .long("uri")
                .value_name("URI")
                .help("URI presented in sign-in messages")
                .default_value("http://localhost:8050"),
        )
        .arg(
            Arg::new("statement")
                .long("statement")
                .value_name("TEXT")
                .help("Statement presented in sign-in messages")
                .default_value("Sign in to manage consent petitions for your assets."),
        )
        .arg(
            Arg::new("registry-url")
                .long("registry-url")
                .value_name("URL")
                .help("Base URL of the asset registry")
                .default_value("https://registry.example.org"),
        )
        .arg(
            Arg::new("registry-timeout-secs")
                .long("registry-timeout-secs")
                .value_name("SECS")
                .help("Per-request timeout for registry lookups")
                .default_value("10"),
        )
        .arg(
            Arg::new("nonce-ttl-secs")
                .long("nonce-ttl-secs")
                .value_name("SECS")
                .help("Challenge lifetime")
                .default_value("900"),
        )
        .arg(
            Arg::new("token-ttl-secs")
                .long("token-ttl-secs")
                .value_name("SECS")
                .help("Bearer token lifetime")
                .default_value("3600"),
        )
        .arg(
            Arg::new("token-secret")
                .long("token-secret")
                .value_name("SECRET")
                .help("HS256 token secret (falls back to CONSENTD_TOKEN_SECRET)"),
        )
        .get_matches();

    let data_dir: PathBuf = matches
        .get_one::<String>("data-dir")
        .unwrap()
        .parse()
        .expect("Invalid data directory path");

    let bind_addr: SocketAddr = matches
        .get_one::<String>("bind")
        .unwrap()
        .parse()
        .expect("Invalid bind address");

    let nonce_ttl_secs: u64 = matches
        .get_one::<String>("nonce-ttl-secs")
        .unwrap()
        .parse()
        .expect("Invalid nonce TTL");

    let token_ttl_secs: u64 = matches
        .get_one::<String>("token-ttl-secs")
        .unwrap()
        .parse()
        .expect("Invalid token TTL");

    let registry_timeout_secs: u64 = matches
        .get_one::<String>("registry-timeout-secs")
        .unwrap()
        .parse()
        .expect("Invalid registry timeout");

    info!("Starting consentd server");
    info!("Data directory: {}", data_dir.display());
    info!("Bind address: {}", bind_addr);

    // Create data directory if it doesn't exist
    if !data_dir.exists() {
        std::fs::create_dir_all(&data_dir)?;
        info!("Created data directory: {}", data_dir.display());
    }

    let engine = StorageEngine::with_nonce_ttl(&data_dir, nonce_ttl_secs)
        .context("failed to initialize storage engine")?;

    info!("Storage engine initialized");

    let secret = token_secret(&matches);
    let tokens = TokenIssuer::new(&secret, token_ttl_secs);

    let profile = SignInProfile {
        domain: matches.get_one::<String>("domain").unwrap().clone(),
        uri: matches.get_one::<String>("uri").unwrap().clone(),
        statement: matches.get_one::<String>("statement").unwrap().clone(),
    };

    let orchestrator = AuthenticationOrchestrator::new(
        engine.nonces().clone(),
        engine.identities().clone(),
        tokens,
        profile,
    );

    let registry_url = matches.get_one::<String>("registry-url").unwrap();
    let registry = HttpAssetRegistry::new(
        registry_url,
        Duration::from_secs(registry_timeout_secs),
    )
    .context("failed to initialize asset registry client")?;

    info!("Asset registry: {}", registry_url);

    let state = Arc::new(AppState {
        engine,
        auth: orchestrator,
        registry: Arc::new(registry) as Arc<dyn AssetRegistry>,
    });

    let server = ConsentdServer::new(state);

    match server.serve(bind_addr).await {
        Ok(_) => info!("Server shutdown gracefully"),
        Err(e) => {
            warn!("Server error: {}", e);
            return Err(anyhow::anyhow!("{}", e));
        }
    }

    Ok(())
}

/// Resolve the HS256 secret: flag, then environment, then an ephemeral one
fn token_secret(matches: &clap::ArgMatches) -> Vec<u8> {
    if let Some(secret) = matches.get_one::<String>("token-secret") {
        return secret.as_bytes().to_vec();
    }

    if let Ok(secret) = std::env::var("CONSENTD_TOKEN_SECRET") {
        return secret.into_bytes();
    }

    warn!("No token secret configured; using an ephemeral one (tokens will not survive restart)");
    let mut bytes = [0u8; 32];
    OsRng.fill_bytes(&mut bytes);
    bytes.to_vec()
}
