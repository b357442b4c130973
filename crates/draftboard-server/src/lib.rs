pub mod api;
pub mod config;
pub mod directory;
pub mod error;
pub mod health;
pub mod hub;
pub mod state;
pub mod store;
pub mod ws;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use tower_http::cors::CorsLayer;

use config::{ServerConfig, StoreBackend, StoreConfig};
use state::{AppState, SharedStore};
use store::{FileStore, MemoryStore, StoreError};

/// Open the store selected by the config.
pub fn open_store(config: &StoreConfig) -> Result<SharedStore, StoreError> {
    match config.backend {
        StoreBackend::Memory => {
            tracing::info!("Using in-memory game store");
            Ok(Arc::new(MemoryStore::new()))
        },
        StoreBackend::File => Ok(Arc::new(FileStore::open(config.data_dir.clone())?)),
    }
}

/// Build the Axum router and application state from a config and store.
pub fn build_app(config: ServerConfig, store: SharedStore) -> (Router<()>, AppState) {
    let state = AppState::new(config, store);
    (router(state.clone()), state)
}

/// All routes over an already constructed state.
pub fn router(state: AppState) -> Router<()> {
    Router::new()
        .route("/", get(api::root))
        .route("/create", post(api::create_game))
        .route("/join/{game_id}", get(api::join_game))
        .route("/game/{game_id}", get(api::get_game))
        .route("/draft/{game_id}", post(api::submit_draft))
        .route("/websocket/{game_id}", get(ws::ws_handler))
        .route("/health", get(health::health_check))
        .layer(CorsLayer::permissive())
        .with_state(state)
}
