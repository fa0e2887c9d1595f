//! Credential exchange with the relay's HTTP login endpoint. The WebSocket
//! session only ever carries the username handed back here.

use log::{info, warn};
use reqwest::Url;
use serde::{Deserialize, Serialize};

use crate::error::ClientError;

const LOGIN_PATH: &str = "/api/login";

#[derive(Serialize)]
struct Credentials<'a> {
    username: &'a str,
    password: &'a str,
}

#[derive(Deserialize)]
struct LoginReply {
    success: bool,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    user: Option<ReplyUser>,
}

#[derive(Deserialize)]
struct ReplyUser {
    username: String,
}

/// The login endpoint served next to the relay's WebSocket path.
pub fn login_url(relay_url: &str) -> Result<Url, ClientError> {
    let mut url = Url::parse(relay_url).map_err(|e| ClientError::InvalidUrl(format!("{relay_url}: {e}")))?;
    let scheme = match url.scheme() {
        "ws" | "http" => "http",
        "wss" | "https" => "https",
        other => return Err(ClientError::InvalidUrl(format!("unsupported scheme {other}"))),
    };
    url.set_scheme(scheme)
        .map_err(|()| ClientError::InvalidUrl(relay_url.to_string()))?;
    url.set_path(LOGIN_PATH);
    url.set_query(None);
    Ok(url)
}

/// Posts the credentials and returns the username the relay knows us by.
/// A refusal carries the server's reason.
pub async fn authenticate(
    http: &reqwest::Client,
    relay_url: &str,
    username: &str,
    password: &str,
) -> Result<String, ClientError> {
    let url = login_url(relay_url)?;
    let reply: LoginReply = http
        .post(url)
        .json(&Credentials { username, password })
        .send()
        .await?
        .json()
        .await?;

    match reply {
        LoginReply {
            success: true,
            user: Some(user),
            ..
        } => {
            info!("Authenticated as {}", user.username);
            Ok(user.username)
        }
        LoginReply { message, .. } => {
            let reason = message.unwrap_or_else(|| "login failed".to_string());
            warn!("Login as {} refused: {}", username, reason);
            Err(ClientError::Auth(reason))
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::auth::MemoryAuthenticator;
    use crate::routes::routes;
    use crate::server::Server;

    fn relay_url() -> String {
        let filter = routes(
            Server::default(),
            Arc::new(MemoryAuthenticator::new()),
            std::env::temp_dir(),
        );
        let (addr, serving) = warp::serve(filter).bind_ephemeral(([127, 0, 0, 1], 0));
        tokio::spawn(serving);
        format!("ws://{addr}/ws")
    }

    #[test]
    fn login_url_follows_relay_scheme() {
        assert_eq!(
            login_url("ws://127.0.0.1:3001/ws").unwrap().as_str(),
            "http://127.0.0.1:3001/api/login"
        );
        assert_eq!(
            login_url("wss://chat.example/relay/ws?x=1").unwrap().as_str(),
            "https://chat.example/api/login"
        );
        assert!(matches!(login_url("ftp://host/ws"), Err(ClientError::InvalidUrl(_))));
        assert!(matches!(login_url("not a url"), Err(ClientError::InvalidUrl(_))));
    }

    #[tokio::test]
    async fn registers_then_requires_same_password() {
        let url = relay_url();
        let http = reqwest::Client::new();

        assert_eq!(authenticate(&http, &url, "alice", "pw").await.unwrap(), "alice");
        assert_eq!(authenticate(&http, &url, "alice", "pw").await.unwrap(), "alice");
        assert!(matches!(
            authenticate(&http, &url, "alice", "wrong").await,
            Err(ClientError::Auth(_))
        ));
        assert!(matches!(
            authenticate(&http, &url, "bob", "").await,
            Err(ClientError::Auth(_))
        ));
    }
}
