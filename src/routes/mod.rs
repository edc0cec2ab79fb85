use axum::http::HeaderValue;
use axum::{
    routing::{get, post, put},
    Router,
};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::warn;

use crate::state::AppState;

pub mod events;
pub mod health;
pub mod insights;
pub mod notices;
pub mod questions;
pub mod sentiment;
pub mod tables;
pub mod transcripts;
pub mod ws;

pub fn create_router(state: AppState) -> Router<()> {
    let cors = if let Some(origins) = state.config.cors_allowed_origin.as_ref() {
        let headers: Vec<HeaderValue> = origins
            .split(',')
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .filter_map(|value| match value.parse::<HeaderValue>() {
                Ok(header) => Some(header),
                Err(_) => {
                    warn!(origin = value, "ignoring invalid CORS allowed origin");
                    None
                }
            })
            .collect();

        CorsLayer::new()
            .allow_origin(AllowOrigin::list(headers))
            .allow_methods(tower_http::cors::AllowMethods::mirror_request())
            .allow_headers(tower_http::cors::AllowHeaders::mirror_request())
            .allow_credentials(true)
    } else {
        CorsLayer::new()
            .allow_origin(AllowOrigin::mirror_request())
            .allow_methods(tower_http::cors::AllowMethods::mirror_request())
            .allow_headers(tower_http::cors::AllowHeaders::mirror_request())
            .allow_credentials(true)
    };

    let events_routes = Router::new()
        .route("/", get(events::list_events).post(events::create_event))
        .route("/:id", get(events::get_event))
        .route(
            "/:id/tables",
            get(tables::list_tables).post(tables::create_table),
        )
        .route("/:id/transcripts", get(transcripts::list_event_transcripts))
        .route(
            "/:id/insights",
            get(insights::list_insights).post(insights::create_insight),
        )
        .route("/:id/generate-insights", post(insights::generate_insights))
        .route("/:id/broadcast", post(notices::broadcast_notice))
        .route(
            "/:id/questions",
            get(questions::list_questions).post(questions::create_question),
        )
        .route("/:id/sentiment-data", get(sentiment::sentiment_data));

    let tables_routes = Router::new()
        .route(
            "/:id",
            put(tables::update_table).delete(tables::delete_table),
        )
        .route("/:id/join", get(tables::join_table))
        .route(
            "/:id/transcripts",
            get(transcripts::list_table_transcripts).post(transcripts::create_transcript),
        )
        .route("/:id/notices", get(notices::list_unread_notices));

    Router::new()
        .nest("/api/events", events_routes)
        .nest("/api/tables", tables_routes)
        .route("/api/insights/:id", put(insights::update_insight))
        .route("/api/notices/:id/read", post(notices::mark_notice_read))
        .route("/api/health", get(health::health_check))
        .route("/ws", get(ws::ws_handler))
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}
