use std::convert::Infallible;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use log::{info, warn};
use serde::Deserialize;
use serde_json::json;
use warp::http::StatusCode;
use warp::{Filter, Rejection, Reply};

use crate::auth::{Authentication, Authenticator};
use crate::error::AuthError;
use crate::server::Server;

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
}

pub fn routes(
    server: Server,
    auth: Arc<dyn Authenticator>,
    static_dir: PathBuf,
) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    let ws_route = warp::path("ws")
        .and(warp::path::end())
        .and(warp::ws())
        .and(warp::addr::remote())
        .and(with_server(server.clone()))
        .map(|ws: warp::ws::Ws, addr: Option<SocketAddr>, server: Server| {
            ws.on_upgrade(move |socket| async move {
                server.handle_connection(socket, addr).await;
            })
        });

    let login_route = warp::path!("api" / "login")
        .and(warp::post())
        .and(warp::body::json())
        .and(warp::any().map(move || auth.clone()))
        .and_then(login);

    let online_route = warp::path!("api" / "online-users")
        .and(warp::get())
        .and(with_server(server))
        .and_then(online_users);

    ws_route
        .or(login_route)
        .or(online_route)
        .or(warp::fs::dir(static_dir))
        .with(warp::cors().allow_any_origin())
}

fn with_server(server: Server) -> impl Filter<Extract = (Server,), Error = Infallible> + Clone {
    warp::any().map(move || server.clone())
}

async fn login(
    request: LoginRequest,
    auth: Arc<dyn Authenticator>,
) -> Result<warp::reply::WithStatus<warp::reply::Json>, Infallible> {
    let (status, body) = match auth.authenticate(&request.username, &request.password).await {
        Ok(result) => {
            let message = match result {
                Authentication::Registered(_) => "registered",
                Authentication::LoggedIn(_) => "logged in",
            };
            info!("HTTP login for {}: {}", result.user().username, message);
            (
                StatusCode::OK,
                json!({ "success": true, "message": message, "user": result.user() }),
            )
        }
        Err(e) => {
            warn!("HTTP login for {:?} failed: {}", request.username, e);
            let status = match e {
                AuthError::MissingCredentials => StatusCode::BAD_REQUEST,
                AuthError::WrongPassword => StatusCode::UNAUTHORIZED,
            };
            (status, json!({ "success": false, "message": e.to_string() }))
        }
    };
    Ok(warp::reply::with_status(warp::reply::json(&body), status))
}

async fn online_users(server: Server) -> Result<warp::reply::Json, Infallible> {
    let users = server.registry().online_identities(None).await;
    Ok(warp::reply::json(&json!({ "users": users })))
}
