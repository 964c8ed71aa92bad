mod ai_chat;
mod api;
mod attributes;
mod auth;
mod chat;
mod config;
mod context;
mod error;
mod filter_compiler;
mod filter_values;
mod models;
mod notion;
mod selection;
mod session;
mod store;
mod summary;

use std::{collections::HashMap, sync::Arc};

use ai_chat::{ChatBackend, WebhookChatBackend};
use anyhow::Result;
use axum::{
    routing::{delete, get, patch, post, put},
    Router,
};
use config::Config;
use notion::{NotionClient, NotionMetadata, PageQuery};
use session::SessionMap;
use store::ThreadStore;
use tokio::sync::RwLock;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{info, warn};

#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub sessions: SessionMap,
    pub threads: Arc<ThreadStore>,
    pub notion: Arc<dyn NotionMetadata>,
    pub pages: Arc<dyn PageQuery>,
    pub chat_backend: Arc<dyn ChatBackend>,
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(api::healthz))
        .route("/v1/sessions", post(api::create_session))
        .route(
            "/v1/sessions/{sid}",
            get(api::get_session).delete(api::delete_session),
        )
        .route("/v1/sessions/{sid}/database", put(api::select_database))
        .route("/v1/sessions/{sid}/page", put(api::select_page))
        .route(
            "/v1/sessions/{sid}/filtering-attributes/toggle",
            post(api::toggle_filtering_attribute),
        )
        .route(
            "/v1/sessions/{sid}/data-attributes/toggle",
            post(api::toggle_data_attribute),
        )
        .route(
            "/v1/sessions/{sid}/filter-values/toggle",
            post(api::toggle_filter_value),
        )
        .route(
            "/v1/sessions/{sid}/filter-values/{attribute_id}/{value_id}",
            delete(api::remove_filter_value),
        )
        .route("/v1/sessions/{sid}/clear", post(api::clear_selection))
        .route("/v1/sessions/{sid}/summary", get(api::get_summary))
        .route(
            "/v1/sessions/{sid}/compiled-filter",
            get(api::get_compiled_filter),
        )
        .route("/v1/sessions/{sid}/threads", post(api::create_thread))
        .route(
            "/v1/sessions/{sid}/threads/{tid}/messages",
            post(api::send_message),
        )
        .route("/v1/notion/databases", get(api::list_databases))
        .route("/v1/notion/databases/{id}/pages", get(api::list_pages))
        .route(
            "/v1/notion/databases/{id}/attributes",
            get(api::list_attributes),
        )
        .route(
            "/v1/notion/databases/{id}/attributes/{name}/options",
            get(api::list_attribute_options),
        )
        .route("/v1/threads", get(api::list_threads))
        .route(
            "/v1/threads/{tid}",
            patch(api::rename_thread).delete(api::delete_thread),
        )
        .route("/v1/threads/{tid}/messages", get(api::list_messages))
        .route("/v1/threads/{tid}/events", get(api::thread_events))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "notion_chat_api=info,tower_http=info".into()),
        )
        .init();

    let config = Config::from_env()?;
    if config.api_key_is_fallback {
        warn!("Bearer key is generated for this run; /v1 routes stay locked until NOTION_CHAT_API_KEY is set");
    }

    let threads = Arc::new(ThreadStore::open(&config.db_path)?);
    let notion = Arc::new(NotionClient::from_config(&config)?);
    let chat_backend = Arc::new(WebhookChatBackend::from_config(&config)?);

    let state = AppState {
        config: config.clone(),
        sessions: Arc::new(RwLock::new(HashMap::new())),
        threads,
        notion: notion.clone(),
        pages: notion,
        chat_backend,
    };

    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    info!("notion-chat-api listening on {}", config.bind_addr);
    axum::serve(listener, app).await?;
    Ok(())
}
