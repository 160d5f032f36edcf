mod sweep;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    Router,
    extract::{State, WebSocketUpgrade},
    middleware,
    response::IntoResponse,
    routing::{get, post},
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use pact_api::auth::{self, AppState, AppStateInner};
use pact_api::checkins;
use pact_api::crisis;
use pact_api::middleware::require_auth;
use pact_api::pods;
use pact_api::restores;
use pact_api::support_content::SupportContentClient;
use pact_db::Database;
use pact_gateway::connection;
use pact_gateway::dispatcher::Dispatcher;

#[derive(Clone)]
struct ServerState {
    app: AppState,
    dispatcher: Dispatcher,
    db: Arc<Database>,
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
                .unwrap_or_else(|_| "pact=debug,tower_http=debug".into()),
        )
        .init();

    // Config
    let jwt_secret =
        std::env::var("PACT_JWT_SECRET").unwrap_or_else(|_| "dev-secret-change-me".into());
    let db_path = std::env::var("PACT_DB_PATH").unwrap_or_else(|_| "pact.db".into());
    let host = std::env::var("PACT_HOST").unwrap_or_else(|_| "0.0.0.0".into());
    let port: u16 = std::env::var("PACT_PORT")
        .unwrap_or_else(|_| "3000".into())
        .parse()?;
    let support_api_url = std::env::var("PACT_SUPPORT_API_URL").ok();
    let sweep_interval_secs: u64 = std::env::var("PACT_SWEEP_INTERVAL_SECS")
        .unwrap_or_else(|_| "3600".into())
        .parse()?;

    // Init database
    let db = Arc::new(Database::open(&PathBuf::from(&db_path))?);

    // Shared state
    let dispatcher = Dispatcher::new();
    let support = SupportContentClient::new(support_api_url);
    let app_state: AppState = Arc::new(AppStateInner {
        db: db.clone(),
        jwt_secret: jwt_secret.clone(),
        dispatcher: dispatcher.clone(),
        support,
    });

    let state = ServerState {
        app: app_state.clone(),
        dispatcher: dispatcher.clone(),
        db: db.clone(),
        jwt_secret: jwt_secret.clone(),
    };

    // Background decay sweep for abandoned streaks
    tokio::spawn(sweep::run_decay_loop(
        db.clone(),
        dispatcher.clone(),
        sweep_interval_secs,
    ));

    // Routes
    let public_routes = Router::new()
        .route("/auth/register", post(auth::register))
        .route("/auth/login", post(auth::login))
        .with_state(app_state.clone());

    let protected_routes = Router::new()
        .route("/me", get(auth::me))
        .route("/checkins", post(checkins::check_in))
        .route("/restores", post(restores::use_restore))
        .route("/pods/assign", post(pods::assign_pod))
        .route("/pods/{pod_id}", get(pods::get_pod))
        .route("/crisis", post(crisis::request_support))
        .route("/crisis/{alert_id}/respond", post(crisis::respond_to_alert))
        .route("/crisis/{alert_id}/resolve", post(crisis::resolve_alert))
        .layer(middleware::from_fn(require_auth))
        .with_state(app_state);

    let ws_route = Router::new()
        .route("/gateway", get(ws_upgrade))
        .with_state(state);

    let app = Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .merge(ws_route)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    info!("Pact server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

async fn ws_upgrade(State(state): State<ServerState>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| {
        connection::handle_connection(socket, state.dispatcher, state.db, state.jwt_secret)
    })
}
