//! CLI for the popstellar hub
//!
//! Subcommands:
//! - `server`: run the hub with its client and server endpoints
//! - `client`: create an organization on a running hub (useful for smoke tests)

use std::sync::Arc;

use clap::Parser;
use tracing::{error, info, warn};

use popstellar::config::load_config;
use popstellar::hub::Hub;
use popstellar::persistence::{Repository, SledRepository};
use popstellar::transport::websocket::{
    connect_to_server, start_client_listener, start_server_listener,
};
use popstellar::utils::logging;

#[derive(Parser)]
#[command(name = "popstellar")]
enum Command {
    /// Start the hub
    Server {
        /// Log level (error, warn, info, debug, trace)
        #[arg(long, default_value = "info")]
        log_level: String,
    },
    /// Publish a new organization and print the server's greeting
    Client {
        /// Client endpoint of the hub
        #[arg(long, default_value = "ws://127.0.0.1:9000")]
        url: String,
        /// Organization name
        #[arg(long, default_value = "Demo")]
        name: String,
    },
}

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();
    let cmd = Command::parse();

    match cmd {
        Command::Server { log_level } => {
            logging::init(&log_level);
            if let Err(e) = run_server().await {
                error!("Server failed: {}", e);
            }
        }
        Command::Client { url, name } => {
            logging::init("info");
            if let Err(e) = run_client(&url, &name).await {
                error!("Client failed: {}", e);
            }
        }
    }
}

async fn run_server() -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config()?;
    let repo: Arc<dyn Repository> = Arc::new(SledRepository::open(&config.persistence.path)?);
    let hub = Hub::new(&config, repo)?;
    hub.start();

    let client_addr = format!("{}:{}", config.server.host, config.server.client_port);
    let server_addr = format!("{}:{}", config.server.host, config.server.server_port);
    let clients = tokio::spawn({
        let hub = hub.clone();
        async move { start_client_listener(&client_addr, hub).await }
    });
    let servers = tokio::spawn({
        let hub = hub.clone();
        async move { start_server_listener(&server_addr, hub).await }
    });

    for peer in &config.server.peers {
        if let Err(e) = connect_to_server(peer, hub.clone()).await {
            warn!("Could not reach peer {}: {}", peer, e);
        }
    }

    tokio::select! {
        res = clients => error!("Client endpoint exited: {:?}", res),
        res = servers => error!("Server endpoint exited: {:?}", res),
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received. Exiting gracefully.");
        }
    }

    hub.stop().await;
    Ok(())
}

async fn run_client(url: &str, name: &str) -> Result<(), Box<dyn std::error::Error>> {
    use futures_util::{SinkExt, StreamExt};
    use popstellar::message::ServerKeys;
    use popstellar::message::data::LaoCreate;
    use serde_json::json;
    use tokio_tungstenite::connect_async;
    use tokio_tungstenite::tungstenite::Message as WsMessage;

    let (mut ws_stream, _response) = connect_async(url).await?;

    let organizer = ServerKeys::generate();
    let create = LaoCreate::new(&organizer.public_key(), name, chrono::Utc::now().timestamp());
    let message = organizer.sign_data(&create)?;

    let publish = json!({
        "jsonrpc": "2.0",
        "method": "publish",
        "params": {"channel": "/root", "message": message},
        "id": 1
    });
    ws_stream.send(WsMessage::text(publish.to_string())).await?;
    if let Some(Ok(WsMessage::Text(reply))) = ws_stream.next().await {
        println!("Publish response: {reply}");
    }

    let catchup = json!({
        "jsonrpc": "2.0",
        "method": "catchup",
        "params": {"channel": format!("/root/{}", create.id)},
        "id": 2
    });
    ws_stream.send(WsMessage::text(catchup.to_string())).await?;
    if let Some(Ok(WsMessage::Text(reply))) = ws_stream.next().await {
        println!("Catchup response: {reply}");
    }

    ws_stream.close(None).await?;
    Ok(())
}
