//! End-to-end scenarios: one in-process relay, several clients with their own
//! session directories, frames carried over the relay's outbound queues.

use std::sync::Arc;

use presence_relay::chat::ChatMessage;
use presence_relay::client::catalog::SessionSummary;
use presence_relay::client::dispatcher::{ActiveSession, Dispatcher, Renderer};
use presence_relay::client::store::SessionStore;
use presence_relay::messages::{ClientMessage, ServerMessage};
use presence_relay::registry::ConnectionId;
use presence_relay::server::Server;
use tempfile::TempDir;
use tokio::sync::mpsc::UnboundedReceiver;

#[derive(Default)]
struct Screen {
    rendered: Vec<ChatMessage>,
    notices: Vec<String>,
    catalog: Vec<SessionSummary>,
}

impl Renderer for Screen {
    fn render(&mut self, _session: &str, message: &ChatMessage) {
        self.rendered.push(message.clone());
    }
    fn show_session(&mut self, _session: &ActiveSession, _log: &[ChatMessage]) {}
    fn update_catalog(&mut self, sessions: &[SessionSummary]) {
        self.catalog = sessions.to_vec();
    }
    fn notify(&mut self, text: &str) {
        self.notices.push(text.to_string());
    }
}

struct Peer {
    id: ConnectionId,
    rx: UnboundedReceiver<String>,
    client: Dispatcher<Screen>,
    _dir: TempDir,
}

impl Peer {
    async fn connect(server: &Server, name: &str) -> Peer {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(SessionStore::open(dir.path()).await.unwrap());
        let (id, rx) = server.open(None).await;
        let mut peer = Peer {
            id,
            rx,
            client: Dispatcher::new(name, store, Screen::default()),
            _dir: dir,
        };
        peer.send(server, Some(peer.client.login_request())).await;
        peer
    }

    async fn send(&mut self, server: &Server, message: Option<ClientMessage>) {
        let message = message.expect("nothing to send");
        let frame = serde_json::to_string(&message).unwrap();
        server.handle_text(&self.id, &frame).await;
        self.pump(server).await;
    }

    /// Applies every frame the relay has queued for this client.
    async fn pump(&mut self, server: &Server) {
        while let Ok(frame) = self.rx.try_recv() {
            let event = ServerMessage::decode(&frame).unwrap();
            if let Some(reply) = self.client.handle(event).await.unwrap() {
                let frame = serde_json::to_string(&reply).unwrap();
                server.handle_text(&self.id, &frame).await;
            }
        }
    }

    async fn group_count(&self, content: &str) -> usize {
        self.client
            .store()
            .load("group_all")
            .await
            .iter()
            .filter(|m| m.content.as_deref() == Some(content))
            .count()
    }
}

async fn pair(server: &Server) -> (Peer, Peer) {
    let mut alice = Peer::connect(server, "alice").await;
    let mut bob = Peer::connect(server, "bob").await;
    alice.pump(server).await;
    bob.pump(server).await;
    (alice, bob)
}

#[tokio::test]
async fn both_peers_see_each_other_online() {
    let server = Server::default();
    let (alice, bob) = pair(&server).await;

    assert!(alice.client.is_logged_in());
    assert_eq!(alice.client.online(), ["bob".to_string()]);
    assert_eq!(bob.client.online(), ["alice".to_string()]);
    assert_eq!(alice.group_count("bob is online").await, 1);

    let names: Vec<&str> = alice.client.renderer().catalog.iter().map(|s| s.name.as_str()).collect();
    assert_eq!(names, vec!["Everyone", "bob"]);
}

#[tokio::test]
async fn private_message_is_unread_until_opened() {
    let server = Server::default();
    let (mut alice, mut bob) = pair(&server).await;

    alice.client.open_private("bob").await.unwrap();
    let wire = alice.client.send_text("hi bob").await.unwrap();
    alice.send(&server, wire).await;
    bob.pump(&server).await;

    assert_eq!(bob.client.unread("private_alice_bob").await, 1);
    let badge = bob
        .client
        .renderer()
        .catalog
        .iter()
        .find(|s| s.key == "private_alice_bob")
        .unwrap()
        .unread;
    assert_eq!(badge, 1);

    bob.client.open_private("alice").await.unwrap();
    assert_eq!(bob.client.unread("private_alice_bob").await, 0);

    let sent = alice.client.store().load("private_alice_bob").await;
    assert_eq!(sent.len(), 1, "echo must not duplicate the optimistic copy");
}

#[tokio::test]
async fn duplicate_login_is_rejected_without_disturbing_first() {
    let server = Server::default();
    let (mut alice, mut bob) = pair(&server).await;

    let mut impostor = Peer::connect(&server, "alice").await;
    assert!(!impostor.client.is_logged_in());
    assert_eq!(
        impostor.client.renderer().notices.last().unwrap(),
        "Login rejected: alice is already online"
    );
    bob.pump(&server).await;
    assert_eq!(bob.client.online(), ["alice".to_string()]);

    let wire = bob.client.send_text("still there?").await.unwrap();
    bob.send(&server, wire).await;
    alice.pump(&server).await;
    impostor.pump(&server).await;
    assert_eq!(alice.group_count("still there?").await, 1);
    // Unauthenticated connections still hear broadcasts.
    assert_eq!(impostor.group_count("still there?").await, 1);
    assert!(!impostor.client.is_logged_in());
}

#[tokio::test]
async fn broadcast_lands_once_in_every_group_session() {
    let server = Server::default();
    let (mut alice, mut bob) = pair(&server).await;
    let mut carol = Peer::connect(&server, "carol").await;
    alice.pump(&server).await;
    bob.pump(&server).await;

    let wire = alice.client.send_text("hello all").await.unwrap();
    alice.send(&server, wire).await;
    bob.pump(&server).await;
    carol.pump(&server).await;

    assert_eq!(alice.group_count("hello all").await, 1);
    assert_eq!(bob.group_count("hello all").await, 1);
    assert_eq!(carol.group_count("hello all").await, 1);
    // Group is the active session, so it is shown and read right away.
    assert_eq!(bob.client.unread("group_all").await, 0);
    assert!(bob.client.renderer().rendered.iter().any(|m| m.content.as_deref() == Some("hello all")));
}

#[tokio::test]
async fn logout_keeps_connection_and_allows_login_again() {
    let server = Server::default();
    let (mut alice, mut bob) = pair(&server).await;

    alice.send(&server, Some(ClientMessage::Logout)).await;
    bob.pump(&server).await;
    assert!(bob.client.online().is_empty());
    assert_eq!(bob.group_count("alice went offline").await, 1);
    assert_eq!(alice.group_count("alice went offline").await, 1);
    assert_eq!(alice.client.online(), ["bob".to_string()]);

    alice.send(&server, Some(alice.client.login_request())).await;
    bob.pump(&server).await;
    assert_eq!(bob.client.online(), ["alice".to_string()]);
}

#[tokio::test]
async fn disconnect_announces_offline_and_frees_name() {
    let server = Server::default();
    let (alice, mut bob) = pair(&server).await;

    server.close(&alice.id).await;
    bob.pump(&server).await;
    assert!(bob.client.online().is_empty());

    let returning = Peer::connect(&server, "alice").await;
    assert!(returning.client.is_logged_in());
}

#[tokio::test]
async fn message_to_offline_peer_is_only_echoed() {
    let server = Server::default();
    let (mut alice, mut bob) = pair(&server).await;

    alice.client.open_private("dave").await.unwrap();
    let wire = alice.client.send_text("are you there").await.unwrap();
    alice.send(&server, wire).await;
    bob.pump(&server).await;

    assert_eq!(alice.client.store().load("private_alice_dave").await.len(), 1);
    assert!(bob.client.store().load("private_alice_dave").await.is_empty());
    assert!(bob.client.store().load("private_bob_dave").await.is_empty());
}

#[tokio::test]
async fn ping_is_answered() {
    let server = Server::default();
    let (mut alice, _bob) = pair(&server).await;
    let frame = serde_json::to_string(&ClientMessage::Ping).unwrap();
    server.handle_text(&alice.id, &frame).await;
    let reply = alice.rx.try_recv().unwrap();
    assert_eq!(ServerMessage::decode(&reply).unwrap(), ServerMessage::Pong);
}
