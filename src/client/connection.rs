//! Relay connection lifecycle: connect, log in, pump events both ways, and
//! reconnect with a fixed delay until the user logs out or quits.

use std::path::PathBuf;

use futures_util::{Sink, SinkExt, StreamExt};
use log::{debug, info, warn};
use tokio::sync::mpsc;
use tokio::time::sleep;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::{self, Message};

use crate::client::dispatcher::{Dispatcher, Renderer};
use crate::config::ClientConfig;
use crate::error::{ClientError, StoreError};
use crate::messages::{ClientMessage, ServerMessage};

/// Something the user asked for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Text(String),
    Emoji(String),
    Image { filename: String, data_uri: String },
    OpenGroup,
    OpenPrivate(String),
    ShowSessions,
    Export(PathBuf),
    Import(PathBuf),
    Logout,
    Quit,
}

#[derive(Debug, PartialEq)]
enum Step {
    Idle,
    Send(ClientMessage),
    Logout,
    Quit,
}

#[derive(Debug, PartialEq, Eq)]
enum Outcome {
    Reconnect,
    Stop,
}

pub async fn run<R: Renderer>(
    config: &ClientConfig,
    dispatcher: &mut Dispatcher<R>,
    commands: &mut mpsc::UnboundedReceiver<Command>,
) -> Result<(), ClientError> {
    loop {
        match connect_async(config.url.as_str()).await {
            Ok((ws, _)) => {
                info!("Connected to {}", config.url);
                match session(ws, dispatcher, commands).await {
                    Ok(Outcome::Stop) => return Ok(()),
                    Ok(Outcome::Reconnect) => info!("Relay closed the connection"),
                    Err(e) => warn!("Connection lost: {}", e),
                }
            }
            Err(e) => warn!("Failed to connect to {}: {}", config.url, e),
        }

        dispatcher.on_disconnected();
        let notice = format!("Disconnected, retrying in {}s", config.reconnect_delay.as_secs());
        dispatcher.renderer_mut().notify(&notice);

        let delay = sleep(config.reconnect_delay);
        tokio::pin!(delay);
        loop {
            tokio::select! {
                () = &mut delay => break,
                command = commands.recv() => {
                    let Some(command) = command else { return Ok(()) };
                    match apply(command, dispatcher).await {
                        Step::Logout => {
                            dispatcher.store().clear_identity().await?;
                            return Ok(());
                        }
                        Step::Quit => return Ok(()),
                        Step::Idle | Step::Send(_) => {}
                    }
                }
            }
        }
    }
}

async fn session<S, R>(
    ws: S,
    dispatcher: &mut Dispatcher<R>,
    commands: &mut mpsc::UnboundedReceiver<Command>,
) -> Result<Outcome, ClientError>
where
    S: Sink<Message, Error = tungstenite::Error>
        + futures_util::Stream<Item = Result<Message, tungstenite::Error>>
        + Unpin,
    R: Renderer,
{
    let (mut sink, mut stream) = ws.split();
    send(&mut sink, &dispatcher.login_request()).await?;

    loop {
        tokio::select! {
            frame = stream.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    let event = match ServerMessage::decode(text.as_str()) {
                        Ok(event) => event,
                        Err(e) => {
                            warn!("Ignoring frame from relay: {}", e);
                            continue;
                        }
                    };
                    match dispatcher.handle(event).await {
                        Ok(Some(reply)) => send(&mut sink, &reply).await?,
                        Ok(None) => {}
                        Err(e) => report(dispatcher, &e),
                    }
                }
                Some(Ok(Message::Close(_))) | None => return Ok(Outcome::Reconnect),
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(e.into()),
            },
            command = commands.recv() => {
                let Some(command) = command else {
                    let _ = sink.close().await;
                    return Ok(Outcome::Stop);
                };
                match apply(command, dispatcher).await {
                    Step::Idle => {}
                    Step::Send(message) => send(&mut sink, &message).await?,
                    Step::Logout => {
                        send(&mut sink, &ClientMessage::Logout).await?;
                        let _ = sink.close().await;
                        dispatcher.store().clear_identity().await?;
                        info!("Logged out");
                        return Ok(Outcome::Stop);
                    }
                    Step::Quit => {
                        let _ = sink.close().await;
                        return Ok(Outcome::Stop);
                    }
                }
            }
        }
    }
}

async fn send<S>(sink: &mut S, message: &ClientMessage) -> Result<(), ClientError>
where
    S: Sink<Message, Error = tungstenite::Error> + Unpin,
{
    let json = serde_json::to_string(message).map_err(StoreError::from)?;
    sink.send(Message::text(json)).await?;
    Ok(())
}

/// Applies one command locally. Failures are shown to the user and never end
/// the connection.
async fn apply<R: Renderer>(command: Command, dispatcher: &mut Dispatcher<R>) -> Step {
    match try_apply(command, dispatcher).await {
        Ok(step) => step,
        Err(e) => {
            report(dispatcher, &e);
            Step::Idle
        }
    }
}

async fn try_apply<R: Renderer>(command: Command, dispatcher: &mut Dispatcher<R>) -> Result<Step, ClientError> {
    let composed = match command {
        Command::Text(_) | Command::Emoji(_) | Command::Image { .. } if !dispatcher.is_logged_in() => {
            return Err(ClientError::NotLoggedIn);
        }
        Command::Text(text) => dispatcher.send_text(&text).await?,
        Command::Emoji(emoji) => dispatcher.send_emoji(&emoji).await?,
        Command::Image { filename, data_uri } => dispatcher.send_image(&data_uri, &filename).await?,
        Command::OpenGroup => {
            dispatcher.open_group().await?;
            None
        }
        Command::OpenPrivate(peer) => {
            dispatcher.open_private(&peer).await?;
            None
        }
        Command::ShowSessions => {
            let sessions = dispatcher.sessions().await?;
            let unread = dispatcher.total_unread().await?;
            dispatcher.renderer_mut().update_catalog(&sessions);
            dispatcher.renderer_mut().notify(&format!("{unread} unread"));
            None
        }
        Command::Export(path) => {
            let bundle = dispatcher.export_active().await?;
            tokio::fs::write(&path, bundle).await.map_err(StoreError::from)?;
            let notice = format!("Exported {} to {}", dispatcher.active().name, path.display());
            dispatcher.renderer_mut().notify(&notice);
            None
        }
        Command::Import(path) => {
            let text = tokio::fs::read_to_string(&path).await.map_err(StoreError::from)?;
            let stored = dispatcher.import_into_active(&text).await?;
            dispatcher
                .renderer_mut()
                .notify(&format!("Imported {stored} new messages"));
            None
        }
        Command::Logout => return Ok(Step::Logout),
        Command::Quit => return Ok(Step::Quit),
    };
    debug!("Command produced outbound message: {}", composed.is_some());
    Ok(composed.map_or(Step::Idle, Step::Send))
}

fn report<R: Renderer>(dispatcher: &mut Dispatcher<R>, error: &dyn std::error::Error) {
    warn!("{}", error);
    dispatcher.renderer_mut().notify(&error.to_string());
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use crate::auth::MemoryAuthenticator;
    use crate::client::dispatcher::tests::Recorder;
    use crate::client::store::SessionStore;
    use crate::routes::routes;
    use crate::server::Server;
    use tempfile::TempDir;
    use tokio::time::timeout;

    async fn dispatcher(identity: &str) -> (TempDir, Dispatcher<Recorder>) {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(SessionStore::open(dir.path()).await.unwrap());
        (dir, Dispatcher::new(identity, store, Recorder::default()))
    }

    /// Serves the full route set on a free local port.
    fn relay(server: &Server) -> String {
        let filter = routes(
            server.clone(),
            Arc::new(MemoryAuthenticator::new()),
            std::env::temp_dir(),
        );
        let (addr, serving) = warp::serve(filter).bind_ephemeral(([127, 0, 0, 1], 0));
        tokio::spawn(serving);
        format!("ws://{addr}/ws")
    }

    /// Waits until `name` is bound on a connection other than `previous`.
    async fn bound_connection(server: &Server, name: &str, previous: Option<&str>) -> String {
        timeout(Duration::from_secs(5), async {
            loop {
                if let Some((id, _)) = server.registry().lookup(name).await {
                    if Some(id.as_str()) != previous {
                        return id;
                    }
                }
                sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("login never reached the relay")
    }

    #[tokio::test]
    async fn reconnects_with_fresh_login_until_logout() {
        let server = Server::default();
        let config = ClientConfig {
            url: relay(&server),
            reconnect_delay: Duration::from_millis(50),
            ..ClientConfig::default()
        };
        let (_dir, mut alice) = dispatcher("alice").await;
        alice.store().save_identity("alice").await.unwrap();
        let (commands, mut rx) = mpsc::unbounded_channel();

        let client = tokio::spawn(async move {
            let result = run(&config, &mut alice, &mut rx).await;
            (result, alice)
        });

        let first = bound_connection(&server, "alice", None).await;
        server.close(&first).await;
        let second = bound_connection(&server, "alice", Some(&first)).await;
        assert_ne!(first, second);

        commands.send(Command::Logout).unwrap();
        let (result, alice) = timeout(Duration::from_secs(5), client)
            .await
            .expect("client kept running after logout")
            .unwrap();
        assert!(result.is_ok());
        assert!(alice
            .renderer()
            .notices
            .iter()
            .any(|notice| notice.starts_with("Disconnected")));
        assert!(alice.store().identity().await.is_none());

        timeout(Duration::from_secs(5), async {
            while server.registry().lookup("alice").await.is_some() {
                sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("relay still lists alice after logout");
    }

    #[tokio::test]
    async fn sending_before_login_is_refused() {
        let (_dir, mut alice) = dispatcher("alice").await;
        let step = apply(Command::Text("hi".to_string()), &mut alice).await;

        assert_eq!(step, Step::Idle);
        assert_eq!(alice.renderer().notices, vec!["Not logged in"]);
        assert!(alice.store().load("group_all").await.is_empty());
    }

    #[tokio::test]
    async fn logged_in_text_becomes_wire_message() {
        let (_dir, mut alice) = dispatcher("alice").await;
        alice
            .handle(ServerMessage::login_accepted("alice", vec![]))
            .await
            .unwrap();

        let step = apply(Command::Text("hi".to_string()), &mut alice).await;
        assert!(matches!(step, Step::Send(ClientMessage::Message { ref to, .. }) if to == "all"));
        assert_eq!(alice.store().load("group_all").await.len(), 1);
    }

    #[tokio::test]
    async fn export_then_import_through_files() {
        let (dir, mut alice) = dispatcher("alice").await;
        alice
            .handle(ServerMessage::login_accepted("alice", vec![]))
            .await
            .unwrap();
        apply(Command::Text("keep me".to_string()), &mut alice).await;

        let path = dir.path().join("export.json");
        assert_eq!(apply(Command::Export(path.clone()), &mut alice).await, Step::Idle);
        assert!(path.exists());

        let (_other, mut copy) = dispatcher("alice").await;
        apply(Command::Import(path), &mut copy).await;
        assert_eq!(copy.store().load("group_all").await.len(), 1);
        assert_eq!(copy.renderer().notices.last().unwrap(), "Imported 1 new messages");
    }

    #[tokio::test]
    async fn missing_import_file_is_reported() {
        let (dir, mut alice) = dispatcher("alice").await;
        let step = apply(Command::Import(dir.path().join("absent.json")), &mut alice).await;
        assert_eq!(step, Step::Idle);
        assert_eq!(alice.renderer().notices.len(), 1);
    }

    #[tokio::test]
    async fn logout_and_quit_end_the_session() {
        let (_dir, mut alice) = dispatcher("alice").await;
        assert_eq!(apply(Command::Logout, &mut alice).await, Step::Logout);
        assert_eq!(apply(Command::Quit, &mut alice).await, Step::Quit);
    }
}
