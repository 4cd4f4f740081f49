use super::{MAX_REQUEST_BODY_BYTES, SharedServer, handlers};
use axum::{
    Router,
    extract::DefaultBodyLimit,
    http::{HeaderValue, header},
    routing::post,
};
use tower_http::{
    set_header::SetResponseHeaderLayer,
    trace::{DefaultMakeSpan, TraceLayer},
};
use tracing::Level;

pub fn create_app(server: SharedServer) -> Router {
    Router::new()
        .route("/", post(handlers::submit))
        // Limit the maximum size of request bodies
        .layer(DefaultBodyLimit::max(MAX_REQUEST_BODY_BYTES))
        // Responses are generated per request and must not be cached
        .layer(SetResponseHeaderLayer::overriding(
            header::CACHE_CONTROL,
            HeaderValue::from_static("max-age=0"),
        ))
        // Add tracing for HTTP requests and responses
        .layer(TraceLayer::new_for_http().make_span_with(DefaultMakeSpan::new().level(Level::INFO)))
        // Provide the shared state
        .with_state(server)
}
