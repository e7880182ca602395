use env_logger::Env;
use log::{error, info, warn};
use std::net::SocketAddr;
use std::sync::Arc;

use moderated_chat::config::ServerConfig;
use moderated_chat::core::server::ChatRelay;
use moderated_chat::handlers::websocket::routes;
use moderated_chat::moderation::{GeminiModerator, SharedModerator};

#[tokio::main]
async fn main() {
    // Initialize env
    let dotenv_result = dotenvy::dotenv();

    // Load config from .env
    let config = match ServerConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();
            error!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    // Initialize logging
    let default_level = if config.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(Env::default().default_filter_or(default_level)).init();

    match dotenv_result {
        Ok(_) => info!("Environment variables loaded from .env file"),
        Err(e) => warn!("Failed to load .env file: {}", e),
    }

    info!(
        "Configuration: host={}, port={}, model={}, echo_to_sender={}",
        config.host, config.port, config.model, config.relay.echo_to_sender
    );

    let moderator = match GeminiModerator::new(
        config.api_key.clone(),
        config.moderation_endpoint.clone(),
        config.model.clone(),
        config.relay.classifier_timeout,
    ) {
        Ok(moderator) => moderator,
        Err(e) => {
            error!("Failed to initialize content moderator: {}", e);
            std::process::exit(1);
        }
    };
    let moderator: SharedModerator = Arc::new(moderator);

    let relay = Arc::new(ChatRelay::new(moderator, config.relay.clone()));
    let routes = routes(relay, config.ip_extraction.clone());

    // Build the server address
    let addr: SocketAddr = match format!("{}:{}", config.host, config.port).parse() {
        Ok(addr) => addr,
        Err(e) => {
            error!("Failed to parse server address: {}", e);
            std::process::exit(1);
        }
    };

    match (config.enable_tls, config.tls_cert_path, config.tls_key_path) {
        (true, Some(cert_path), Some(key_path)) => {
            info!("Starting moderated chat server on wss://{}", addr);
            warp::serve(routes)
                .tls()
                .cert_path(cert_path)
                .key_path(key_path)
                .run(addr)
                .await;
        }
        _ => {
            info!("Starting moderated chat server on ws://{}", addr);
            warp::serve(routes).run(addr).await;
        }
    }
}
