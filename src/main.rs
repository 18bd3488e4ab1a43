use std::sync::Arc;

use axum::http::{header, Method};
use axum::routing::{get, post, put};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::info;

mod auth;
mod battlemap;
mod chat;
mod combat;
mod config;
mod error;
mod http;
mod hub;
mod model;
mod store;
mod telemetry;
mod ws;

use crate::auth::Accounts;
use crate::battlemap::BattleMap;
use crate::chat::Chat;
use crate::combat::CombatEngine;
use crate::http::routes::{self, AppState};
use crate::hub::Hub;
use crate::store::{CampaignStore, MemoryStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    telemetry::init();
    auth::init_key();

    let logins = config::accounts();
    let logins_ref: Vec<(&str, &str, model::Role)> = logins
        .iter()
        .map(|(u, p, r)| (u.as_str(), p.as_str(), *r))
        .collect();
    let accounts = Arc::new(Accounts::new(&logins_ref));

    let store: Arc<dyn CampaignStore> = {
        let store = Arc::new(MemoryStore::new(config::grid_bounds()));
        if let Some(player) = accounts.by_username("player") {
            store.seed_defaults(player.id)?;
        }
        store
    };

    let hub = Arc::new(Hub::new());
    let map = Arc::new(BattleMap::new(store.clone(), hub.clone()));
    let combat = Arc::new(CombatEngine::new(store.clone(), hub.clone(), map.clone()));
    let chat = Arc::new(Chat::new(store.clone(), hub.clone()));
    let state = AppState { store, hub, combat, map, chat, accounts };

    let api = Router::new()
        .route("/api/healthz", get(routes::health))
        .route("/api/login", post(routes::login))
        .route("/api/characters", get(routes::list_characters).post(routes::create_character))
        .route(
            "/api/characters/:id",
            put(routes::update_character).delete(routes::delete_character),
        )
        .route("/api/combat", get(routes::get_combat))
        .route("/api/battle-map", get(routes::get_battle_map))
        .route("/api/messages", get(routes::get_messages))
        .route("/api/campaign", get(routes::get_campaign))
        .route("/api/campaign/:key", put(routes::put_campaign_value))
        .route("/api/ws", get(ws::connection::ws_handler));

    let app = Router::new()
        .merge(api)
        .fallback_service(ServeDir::new(config::static_dir()))
        .layer(
            CorsLayer::new()
                .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
                .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
                .allow_origin(Any),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr = config::server_addr();
    info!(%addr, "listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
