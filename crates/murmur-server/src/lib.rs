pub mod config;

use std::sync::Arc;

use axum::{
    Router,
    extract::{Query, State, WebSocketUpgrade},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use axum_extra::{
    TypedHeader,
    headers::{Authorization, authorization::Bearer},
};
use murmur_api::{AppState, AppStateInner};
use murmur_db::Database;
use murmur_gateway::auth::verify_token;
use murmur_gateway::notify::Notifier;
use murmur_gateway::{DeliveryEngine, Dispatcher, GatewayState, connection};
use serde::Deserialize;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::warn;

/// Shared state for both surfaces, built once at startup.
#[derive(Clone)]
pub struct Services {
    pub api: AppState,
    pub gateway: GatewayState,
}

impl Services {
    pub fn new(
        db: Arc<Database>,
        notifier: Arc<dyn Notifier>,
        jwt_secret: String,
        history_page: u32,
    ) -> Self {
        let engine = DeliveryEngine::new(db.clone(), Dispatcher::new(), notifier);
        Self {
            api: Arc::new(AppStateInner {
                db,
                jwt_secret: jwt_secret.clone(),
                history_page,
            }),
            gateway: GatewayState {
                engine,
                jwt_secret,
                history_page,
            },
        }
    }
}

pub fn build_router(services: &Services) -> Router {
    let ws_route = Router::new()
        .route("/gateway", get(ws_upgrade))
        .with_state(services.gateway.clone());

    murmur_api::routes(services.api.clone())
        .merge(ws_route)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

#[derive(Debug, Deserialize)]
struct GatewayQuery {
    token: Option<String>,
}

/// The JWT is checked before upgrading, so an unauthenticated socket never
/// reaches the registry.
async fn ws_upgrade(
    State(state): State<GatewayState>,
    Query(query): Query<GatewayQuery>,
    bearer: Option<TypedHeader<Authorization<Bearer>>>,
    ws: WebSocketUpgrade,
) -> Response {
    let token = query
        .token
        .or_else(|| bearer.map(|TypedHeader(Authorization(b))| b.token().to_string()));
    let Some(token) = token else {
        return StatusCode::UNAUTHORIZED.into_response();
    };

    match verify_token(&token, &state.jwt_secret) {
        Ok(claims) => ws.on_upgrade(move |socket| {
            connection::handle_connection(socket, state, claims.sub, claims.username)
        }),
        Err(e) => {
            warn!("Rejected gateway upgrade: {}", e);
            StatusCode::UNAUTHORIZED.into_response()
        }
    }
}
