pub mod auth;
pub mod error;
pub mod routes;
pub mod state;

use axum::http::HeaderValue;
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};

use state::AppState;

/// Build the axum Router with all API routes and middleware.
/// Used by `serve()` and available for integration testing.
pub fn build_router(app_state: AppState) -> Router {
    let cors = match &app_state.settings.cors_origins {
        None => CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any),
        Some(origins) => {
            let origins: Vec<HeaderValue> = origins
                .iter()
                .filter_map(|o| o.parse::<HeaderValue>().ok())
                .collect();
            CorsLayer::new()
                .allow_origin(origins)
                .allow_methods(Any)
                .allow_headers(Any)
        }
    };

    Router::new()
        // Publish flow + jobs
        .route("/api/git/publish", post(routes::git::publish))
        .route("/api/jobs/{job_id}", get(routes::jobs::get_job))
        // Read-only repo views
        .route("/api/git/status", get(routes::git::status))
        .route("/api/git/diff", get(routes::git::diff))
        // Patch application (pull a session diff, land it on a feature branch)
        .route("/api/patch/apply", post(routes::git::apply_patch))
        // Agent sessions
        .route("/api/sessions", get(routes::sessions::list))
        .route("/api/sessions/new", post(routes::sessions::create))
        .route(
            "/api/sessions/{session_id}/diff",
            get(routes::sessions::diff),
        )
        .route(
            "/api/sessions/{session_id}/diff/download",
            get(routes::sessions::diff_download),
        )
        // Audits
        .route("/api/audit/git/sync", get(routes::audit::sync))
        .route("/api/audit/git/latest", get(routes::audit::latest))
        .route("/api/audit/git", post(routes::audit::start_job))
        // Routines (preview → confirm → apply)
        .route("/api/routine/preview", post(routes::routines::preview))
        .route("/api/routine/apply", post(routes::routines::apply))
        .layer(cors)
        .with_state(app_state)
}

/// Start the panel server. Binds loopback only; this is a single-operator
/// local tool, not a service to expose.
pub async fn serve(app_state: AppState, port: u16) -> anyhow::Result<()> {
    let app = build_router(app_state);

    let addr = format!("127.0.0.1:{port}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("panel listening on http://{addr}");

    axum::serve(listener, app).await?;
    Ok(())
}
