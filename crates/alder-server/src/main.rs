use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    Router,
    extract::{Query, State, WebSocketUpgrade},
    middleware,
    response::IntoResponse,
    routing::{get, post, put},
};
use serde::Deserialize;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use alder_api::auth::{self, AppState, AppStateInner};
use alder_api::middleware::require_auth;
use alder_api::{contacts, groups, messages, users};
use alder_db::Database;
use alder_gateway::connection;
use alder_gateway::registry::Registry;
use alder_gateway::relay::Relay;
use alder_gateway::store::{GroupMembership, IdentityStore, MessageStore};

#[derive(Clone)]
struct ServerState {
    relay: Relay,
    jwt_secret: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "alder=debug,tower_http=debug".into()),
        )
        .init();

    // Config
    let jwt_secret =
        std::env::var("ALDER_JWT_SECRET").unwrap_or_else(|_| "dev-secret-change-me".into());
    let db_path = std::env::var("ALDER_DB_PATH").unwrap_or_else(|_| "alder.db".into());
    let host = std::env::var("ALDER_HOST").unwrap_or_else(|_| "0.0.0.0".into());
    let port: u16 = std::env::var("ALDER_PORT")
        .unwrap_or_else(|_| "8080".into())
        .parse()?;

    // Init database
    let db = Arc::new(Database::open(&PathBuf::from(&db_path))?);

    // The relay engine consumes the database through its collaborator
    // traits; one Arc backs all three.
    let identities: Arc<dyn IdentityStore> = db.clone();
    let messages_store: Arc<dyn MessageStore> = db.clone();
    let memberships: Arc<dyn GroupMembership> = db.clone();
    let relay = Relay::new(Registry::new(), identities, messages_store, memberships);

    let app_state: AppState = Arc::new(AppStateInner {
        db,
        jwt_secret: jwt_secret.clone(),
    });

    let state = ServerState {
        relay,
        jwt_secret,
    };

    // Routes
    let public_routes = Router::new()
        .route("/api/auth/register", post(auth::register))
        .route("/api/auth/login", post(auth::login))
        .with_state(app_state.clone());

    let protected_routes = Router::new()
        .route("/api/users/profile", get(users::get_profile))
        .route("/api/users/profile", put(users::update_profile))
        .route("/api/users/profile/keys", put(users::update_keys))
        .route("/api/users/{id}", get(users::get_user))
        .route("/api/users/{id}/keys", get(users::get_user_keys))
        .route("/api/contacts", get(contacts::list_contacts))
        .route("/api/contacts/add/{user_id}", post(contacts::add_contact))
        .route("/api/groups/create", post(groups::create_group))
        .route("/api/groups", get(groups::my_groups))
        .route("/api/groups/{id}", get(groups::get_group))
        .route("/api/groups/{id}/join", post(groups::join_group))
        .route("/api/groups/{id}/leave", post(groups::leave_group))
        .route("/api/messages/conversation/{user_id}", get(messages::conversation))
        .route("/api/messages/group/{group_id}", get(messages::group_history))
        .layer(middleware::from_fn_with_state(app_state.clone(), require_auth))
        .with_state(app_state);

    let ws_route = Router::new().route("/ws", get(ws_upgrade)).with_state(state);

    let app = Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .merge(ws_route)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    info!("Alder hub listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Browser WebSocket clients cannot set headers on the upgrade request, so
/// the bearer token rides in as a query parameter. The gateway's
/// authentication gate validates it before any frame is processed.
#[derive(Debug, Deserialize)]
struct WsQuery {
    token: Option<String>,
}

async fn ws_upgrade(
    State(state): State<ServerState>,
    Query(query): Query<WsQuery>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| {
        connection::handle_socket(socket, state.relay, state.jwt_secret, query.token)
    })
}
