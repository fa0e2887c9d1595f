use std::sync::Arc;

use log::{error, info, warn};
use tokio::sync::mpsc;

use presence_relay::auth::MemoryAuthenticator;
use presence_relay::client::connection;
use presence_relay::client::dispatcher::Dispatcher;
use presence_relay::client::login::authenticate;
use presence_relay::client::store::SessionStore;
use presence_relay::client::terminal::{spawn_stdin_reader, TerminalRenderer, HELP};
use presence_relay::config::{ClientConfig, ServerConfig};
use presence_relay::error::ClientError;
use presence_relay::routes::routes;
use presence_relay::server::Server;
use presence_relay::tls::load_tls_config;

const USAGE: &str = "usage: presence_relay [server | client <username> [password]]";

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    match args.first().map(String::as_str) {
        None | Some("server") => run_server().await,
        Some("client") => {
            if let Err(e) = run_client(args.get(1).cloned(), args.get(2).cloned()).await {
                error!("Client stopped: {}", e);
                std::process::exit(1);
            }
        }
        Some(_) => {
            eprintln!("{USAGE}");
            std::process::exit(2);
        }
    }
}

async fn run_server() {
    let config = ServerConfig::from_env();
    let server = Server::default();
    server.spawn_heartbeat(config.heartbeat_interval, config.heartbeat_timeout);

    let routes = routes(server, Arc::new(MemoryAuthenticator::new()), config.static_dir.clone());

    match &config.tls {
        Some((cert, key)) => match load_tls_config(cert, key) {
            Ok(_) => {
                info!("Starting secure relay (HTTPS/WSS) on {}", config.addr);
                warp::serve(routes)
                    .tls()
                    .cert_path(cert)
                    .key_path(key)
                    .run(config.addr)
                    .await;
            }
            Err(e) => {
                warn!("Failed to load TLS config ({}), falling back to HTTP/WS", e);
                info!("Starting relay on {}", config.addr);
                warp::serve(routes).run(config.addr).await;
            }
        },
        None => {
            info!("Starting relay on {}", config.addr);
            warp::serve(routes).run(config.addr).await;
        }
    }
}

async fn run_client(username: Option<String>, password: Option<String>) -> Result<(), ClientError> {
    let config = ClientConfig::from_env();
    let store = Arc::new(SessionStore::open(&config.session_dir).await?);

    let requested = match username {
        Some(name) if !name.trim().is_empty() => name.trim().to_string(),
        _ => match store.identity().await {
            Some(name) => name,
            None => {
                eprintln!("{USAGE}");
                return Ok(());
            }
        },
    };
    let Some(password) = password.or_else(|| config.password.clone()) else {
        return Err(ClientError::Auth(
            "a password is required (argument or RELAY_PASSWORD)".to_string(),
        ));
    };

    let identity = authenticate(&reqwest::Client::new(), &config.url, &requested, &password).await?;
    store.save_identity(&identity).await?;
    let migrated = store.migrate_legacy(&identity).await?;
    if migrated > 0 {
        info!("Migrated {} legacy messages", migrated);
    }

    let mut dispatcher = Dispatcher::new(&identity, store, TerminalRenderer);
    dispatcher.open_group().await?;
    println!("{HELP}");

    let (tx, mut rx) = mpsc::unbounded_channel();
    spawn_stdin_reader(tx, config.max_image_bytes);
    connection::run(&config, &mut dispatcher, &mut rx).await
}
