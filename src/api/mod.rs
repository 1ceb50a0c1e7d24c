use crate::{
    auth::AuthState,
    totp::TotpManager,
};
use anyhow::{Context, Result};
use axum::{
    body::Body,
    extract::MatchedPath,
    http::{HeaderName, HeaderValue, Request},
    routing::{get, post},
    Extension, Router,
};
use sqlx::{postgres::PgPoolOptions, Executor};
use std::{sync::Arc, time::Duration};
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{
    request_id::PropagateRequestIdLayer, set_header::SetRequestHeaderLayer, trace::TraceLayer,
};
use tracing::{info, info_span, Span};
use ulid::Ulid;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

pub mod errors;
pub(crate) mod handlers;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

pub static APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"),);

#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::health::health,
        handlers::login::login,
        handlers::twofa::setup,
        handlers::twofa::verify,
        handlers::twofa::validate,
        handlers::twofa::disable,
        handlers::twofa::status,
        handlers::admin::check,
    ),
    components(schemas(
        errors::ErrorBody,
        handlers::health::Health,
        handlers::login::LoginRequest,
        handlers::login::LoginResponse,
        handlers::login::LoginUser,
        handlers::twofa::SetupResponse,
        handlers::twofa::VerifyRequest,
        handlers::twofa::VerifyResponse,
        handlers::twofa::ValidateRequest,
        handlers::twofa::ValidateResponse,
        handlers::twofa::DisableRequest,
        handlers::twofa::DisableResponse,
        handlers::twofa::StatusResponse,
        handlers::admin::AdminCheckResponse,
    )),
    tags(
        (name = "health", description = "Service health"),
        (name = "auth", description = "Password login and sessions"),
        (name = "2fa", description = "Second-factor lifecycle"),
        (name = "admin", description = "Admin gate"),
    )
)]
struct ApiDoc;

/// Queries that exceed this are cancelled server-side rather than holding a
/// connection.
const STATEMENT_TIMEOUT_MS: u64 = 3000;

/// Start the server
/// # Errors
/// Return error if failed to start the server
pub async fn new(port: u16, dsn: String, auth_state: AuthState) -> Result<()> {
    let pool = PgPoolOptions::new()
        .min_connections(1)
        .max_connections(5)
        .max_lifetime(Duration::from_secs(60 * 2))
        .acquire_timeout(Duration::from_secs(3))
        .test_before_acquire(true)
        .after_connect(|conn, _meta| {
            Box::pin(async move {
                conn.execute(
                    format!("SET statement_timeout = {STATEMENT_TIMEOUT_MS}").as_str(),
                )
                .await?;
                Ok(())
            })
        })
        .connect(&dsn)
        .await
        .context("Failed to connect to database")?;

    let manager = TotpManager::new(pool.clone(), auth_state.issuer().to_string());
    let auth_state = Arc::new(auth_state);

    let app = Router::new()
        .route("/health", get(handlers::health::health))
        .route("/login", post(handlers::login::login))
        .route("/2fa/setup", post(handlers::twofa::setup))
        .route("/2fa/verify", post(handlers::twofa::verify))
        .route("/2fa/validate", post(handlers::twofa::validate))
        .route("/2fa/disable", post(handlers::twofa::disable))
        .route("/2fa/status/:user_id", get(handlers::twofa::status))
        .route("/admin/check", get(handlers::admin::check))
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestHeaderLayer::if_not_present(
                    HeaderName::from_static("x-request-id"),
                    |_req: &_| HeaderValue::from_str(Ulid::new().to_string().as_str()).ok(),
                ))
                .layer(PropagateRequestIdLayer::new(HeaderName::from_static(
                    "x-request-id",
                )))
                .layer(TraceLayer::new_for_http().make_span_with(make_span))
                .layer(Extension(auth_state))
                .layer(Extension(manager))
                .layer(Extension(pool)),
        );

    let listener = TcpListener::bind(format!("::0:{port}")).await?;

    info!("Listening on [::]:{}", port);

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Gracefully shutdown");
        })
        .await?;

    Ok(())
}

fn make_span(request: &Request<Body>) -> Span {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|val| val.to_str().ok())
        .unwrap_or("none");
    let matched_path = request
        .extensions()
        .get::<MatchedPath>()
        .map_or_else(|| request.uri().path(), MatchedPath::as_str);

    info_span!(
        "http.request",
        http.method = %request.method(),
        http.route = matched_path,
        request_id
    )
}
