//! Admin gate probe used by the frontend to decide whether to render admin
//! navigation. The real enforcement happens per-operation; this endpoint only
//! reports the outcome of the same check.

use axum::{
    extract::Extension,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
};
use serde::Serialize;
use sqlx::PgPool;
use std::sync::Arc;
use utoipa::ToSchema;

use crate::api::errors::ApiError;
use crate::auth::roles::{require_role, RoleRequirement};
use crate::auth::{authenticate, AuthState};

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AdminCheckResponse {
    pub is_admin: bool,
    pub user_id: String,
    pub display_name: String,
    /// Which credential mechanism authenticated the caller.
    pub auth_source: String,
}

#[utoipa::path(
    get,
    path = "/admin/check",
    responses(
        (status = 200, description = "Caller holds the admin role", body = AdminCheckResponse),
        (status = 401, description = "Not authenticated"),
        (status = 403, description = "Authenticated but not admin"),
    ),
    tag = "admin"
)]
pub async fn check(
    headers: HeaderMap,
    Extension(pool): Extension<PgPool>,
    Extension(auth): Extension<Arc<AuthState>>,
) -> Response {
    let result = async {
        let principal = authenticate(&headers, auth.token_secret())?;
        let granted =
            require_role(&pool, &principal, &RoleRequirement::Admin, auth.admin_policy()).await?;
        if !granted {
            return Err(ApiError::Forbidden);
        }
        Ok::<_, ApiError>(AdminCheckResponse {
            is_admin: true,
            user_id: principal.user_id,
            display_name: principal.display_name,
            auth_source: principal.source.as_str().to_string(),
        })
    }
    .await;

    match result {
        Ok(body) => (StatusCode::OK, Json(body)).into_response(),
        Err(err) => err.into_response(),
    }
}
