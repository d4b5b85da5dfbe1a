#![warn(unused_crate_dependencies)]

use crate::config::{load_config, VERSION};
use log::{error, info};
use sea_orm::ConnectionTrait;
use state::App;
use std::{net::SocketAddr, sync::Arc};
use tokio::{net::TcpListener, signal};
use utils::logging;

mod config;
mod database;
mod services;
mod session;
mod state;
mod utils;

#[tokio::main]
async fn main() {
    // Load configuration
    let config = load_config().unwrap_or_default();

    // Initialize logging
    logging::setup(&config);

    // Create the listener addresses while the config is still around
    let client_addr = SocketAddr::new(config.client.listen_ip, config.client.port);
    let game_addr = SocketAddr::new(config.game.listen_ip, config.game.port);
    let client_enabled = config.client.auto_start;
    let game_enabled = config.game.auto_start;

    let db = match database::connect(&config.db).await {
        Ok(value) => value,
        Err(err) => {
            error!("Failed to connect to database: {err}");
            return;
        }
    };
    let backend = db.get_database_backend();

    let app = App::new(config, db, backend);

    info!("Starting server (v{VERSION})");

    if client_enabled {
        match TcpListener::bind(client_addr).await {
            Ok(listener) => {
                info!("Accepting clients on {client_addr}");
                tokio::spawn(accept_clients(listener, app.clone()));
            }
            Err(err) => {
                error!("Failed to bind client listener on {client_addr}: {err:?}");
                return;
            }
        }
    }

    if game_enabled {
        match TcpListener::bind(game_addr).await {
            Ok(listener) => {
                info!("Accepting game servers on {game_addr}");
                tokio::spawn(accept_game_servers(listener, app.clone()));
            }
            Err(err) => {
                error!("Failed to bind game server listener on {game_addr}: {err:?}");
                return;
            }
        }
    }

    // Run until the process is asked to stop
    _ = signal::ctrl_c().await;
    info!("Shutting down ({} active account(s))", app.registry.count());
}

/// Accepts client connections as they occur
async fn accept_clients(listener: TcpListener, app: Arc<App>) {
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                session::spawn(stream, addr.ip().to_string(), app.clone());
            }
            Err(err) => {
                error!("Failed to accept client connection: {err}");
            }
        }
    }
}

/// Accepts game server connections as they occur
async fn accept_game_servers(listener: TcpListener, app: Arc<App>) {
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                session::game::spawn(stream, addr.ip().to_string(), app.clone());
            }
            Err(err) => {
                error!("Failed to accept game server connection: {err}");
            }
        }
    }
}
