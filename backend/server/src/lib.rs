//! Documentation of a dating profile review platform.
//!
//! Users submit their dating profile (text + photos) and reviewers leave a 1-5 star rating
//! with written feedback. This crate is the backend the browser frontend talks to.
//!
//!
//!
//! # General Infrastructure
//! - Identity provider handles sign up, login and OAuth, then issues HS256 access tokens
//! - Frontend sends that token as a bearer header or the `sb-access-token` cookie
//! - Backend verifies the token with the shared secret, never sees passwords
//! - Redis holds every table, photos go to the upload directory and are served at `/images`
//!
//!
//!
//! # Roles
//!
//! **Submitter**: uploads one submission (text + up to 6 photos), reads the reviews it got.
//!
//! **Reviewer**: pulls the oldest submission they have not reviewed yet, rates it, moves on.
//!
//! Every user picks a role once signed in, then fills in a display name and username.
//! Where the client should go next is decided server side by [`session::reconcile`],
//! clients do not keep their own copy of the role.
//!
//!
//!
//! # Endpoints
//!
//! | Method | Path | Purpose |
//! |--------|------|---------|
//! | GET | `/api/auth-status` | Token check, always 200 |
//! | GET | `/api/session` | Role, completion and next page |
//! | POST | `/api/set-user-role` | Pick or switch role |
//! | GET/PUT | `/api/account` | Read or edit display name and bio |
//! | POST | `/api/profile-setup` | Display name, username, avatar (multipart) |
//! | POST | `/api/submit-profile` | Create or replace own submission (multipart) |
//! | GET | `/api/get-profile-to-review` | Next submission for a reviewer |
//! | POST | `/api/submit-review` | Rate a submission |
//! | GET | `/api/get-my-reviews` | Reviews + analytics of own submission |
//! | GET/POST | `/api/get-notifications` | Unread notifications / mark read |
//! | GET | `/images/*` | Uploaded photos |
//!
//!
//!
//! # Notes
//!
//! ## Notifications
//! Owners learn about new reviews by polling `/api/get-notifications`. A review is kept even
//! if writing its notification fails, the failure is only logged.
//!
//! ## Review Queue
//! Oldest submission first, skipping the caller's own and the ones they already reviewed.
//! Fine at current volume, revisit once a full scan of `submission_queue` shows up in latency.
//!
//!
//!
//! # Setup
//!
//! View current docs.
//! ```sh
//! cargo doc --open
//! ```
//!
//! Run against a local Redis.
//! ```sh
//! JWT_SECRET=dev REDIS_URL=redis://localhost:6379 RUST_LOG=info cargo run -p backend
//! ```
//!
//! Run without Redis.
//! ```sh
//! JWT_SECRET=dev STORE_BACKEND=memory RUST_LOG=info cargo run -p backend
//! ```
//!
//! Mint a development token.
//! ```sh
//! JWT_SECRET=dev cargo run -p tester -- token --role reviewer
//! ```
use std::{sync::Arc, time::Duration};

use axum::{
    Router,
    extract::DefaultBodyLimit,
    http::{
        HeaderValue, Method,
        header::{AUTHORIZATION, CONTENT_TYPE, X_CONTENT_TYPE_OPTIONS},
    },
    routing::{get, post},
};

use signal::{
    ctrl_c,
    unix::{SignalKind, signal},
};
use tokio::{net::TcpListener, signal};
use tower_http::{
    cors::CorsLayer, services::ServeDir, set_header::SetResponseHeader, trace::TraceLayer,
};
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt};

pub mod analytics;
pub mod auth;
pub mod config;
pub mod database;
pub mod error;
pub mod images;
pub mod models;
pub mod routes;
pub mod session;
pub mod state;
pub mod store;
pub mod utils;

use config::Config;
use error::AppResult;
use images::IMAGES_ROUTE;
use routes::{
    auth_status_handler, get_account_handler, mark_read_handler, my_reviews_handler,
    notifications_handler, profile_setup_handler, profile_to_review_handler, session_handler,
    set_role_handler, submit_profile_handler, submit_review_handler, update_account_handler,
};
use state::State;

pub fn create_router(state: Arc<State>) -> Router {
    let mut cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::OPTIONS])
        .allow_headers([CONTENT_TYPE, AUTHORIZATION])
        .max_age(Duration::from_secs(60 * 60));

    match HeaderValue::from_str(&state.config.frontend_origin) {
        Ok(origin) => cors = cors.allow_origin(origin).allow_credentials(true),
        Err(e) => warn!("Invalid FRONTEND_ORIGIN, cross origin requests disabled: {e}"),
    }

    let images = SetResponseHeader::overriding(
        ServeDir::new(state.images.root()),
        X_CONTENT_TYPE_OPTIONS,
        HeaderValue::from_static("nosniff"),
    );

    Router::new()
        .route("/api/auth-status", get(auth_status_handler))
        .route("/api/session", get(session_handler))
        .route("/api/set-user-role", post(set_role_handler))
        .route(
            "/api/account",
            get(get_account_handler).put(update_account_handler),
        )
        .route("/api/profile-setup", post(profile_setup_handler))
        .route("/api/submit-profile", post(submit_profile_handler))
        .route("/api/get-profile-to-review", get(profile_to_review_handler))
        .route("/api/submit-review", post(submit_review_handler))
        .route("/api/get-my-reviews", get(my_reviews_handler))
        .route(
            "/api/get-notifications",
            get(notifications_handler).post(mark_read_handler),
        )
        .nest_service(IMAGES_ROUTE, images)
        .layer(DefaultBodyLimit::max(state.config.max_body_bytes()))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

pub async fn start_server() -> AppResult<()> {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();

    info!("Loading config...");
    let config = Config::load();

    info!("Initializing state...");
    let state = State::new(config).await?;

    info!("Starting server...");

    let address = format!("0.0.0.0:{}", state.config.port);
    let app = create_router(state);

    info!("Binding to {address}");

    let listener = TcpListener::bind(&address).await?;
    info!("Server running on {address}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shut down");

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        ctrl_c().await.expect("Failed to install Ctrl+C handler");

        info!("Received Ctrl+C, shutting down");
    };

    #[cfg(unix)]
    let terminate = async {
        signal(SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;

        info!("Received terminate signal, shutting down");
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
