use crate::auth::AuthenticatedRequest;
use crate::errors::AppError;
use crate::models::{
    AuthResponse, CreateEntryRequest, Credentials, Entry, RefreshRequest, SignupResponse,
    SummaryQuery, User,
};
use crate::state::AppState;
use crate::summary::{daily_summary, daily_summary_now, DailySummary};
use crate::ui::render_index;
use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::StatusCode,
    response::{Html, Redirect},
    Json,
};
use chrono::DateTime;
use serde::Deserialize;
use tracing::info;

pub async fn index() -> Html<String> {
    Html(render_index())
}

pub async fn health() -> &'static str {
    "Driver's Ledger API is running!"
}

pub async fn login(
    State(state): State<AppState>,
    credentials: Result<Json<Credentials>, JsonRejection>,
) -> Result<Json<AuthResponse>, AppError> {
    let Json(credentials) = credentials?;
    if !credentials.is_complete() {
        return Err(AppError::bad_request("Email and password are required"));
    }

    let response = state
        .provider
        .sign_in_with_password(&credentials)
        .await
        .map_err(AppError::auth_failure)?;

    info!(user_id = %response.user.id, "user logged in");
    Ok(Json(response))
}

pub async fn signup(
    State(state): State<AppState>,
    credentials: Result<Json<Credentials>, JsonRejection>,
) -> Result<Json<SignupResponse>, AppError> {
    let Json(credentials) = credentials?;
    if !credentials.is_complete() {
        return Err(AppError::bad_request("Email and password are required"));
    }

    let user = state
        .provider
        .sign_up(&credentials)
        .await
        .map_err(AppError::auth_failure)?;

    Ok(Json(SignupResponse { user }))
}

pub async fn refresh(
    State(state): State<AppState>,
    payload: Result<Json<RefreshRequest>, JsonRejection>,
) -> Result<Json<AuthResponse>, AppError> {
    let Json(payload) = payload?;
    let refresh_token = payload.refresh_token.trim();
    if refresh_token.is_empty() {
        return Err(AppError::bad_request("refresh_token is required"));
    }

    let response = state
        .provider
        .refresh_session(refresh_token)
        .await
        .map_err(AppError::auth_failure)?;
    Ok(Json(response))
}

#[derive(Debug, Default, Deserialize)]
pub struct OAuthQuery {
    pub redirect_to: Option<String>,
}

pub async fn google_sign_in(
    State(state): State<AppState>,
    Query(query): Query<OAuthQuery>,
) -> Result<Redirect, AppError> {
    let url = state
        .provider
        .oauth_authorize_url("google", query.redirect_to.as_deref())
        .map_err(AppError::auth_failure)?;
    Ok(Redirect::to(url.as_str()))
}

pub async fn current_user(auth: AuthenticatedRequest) -> Json<User> {
    Json(auth.user)
}

pub async fn logout(
    State(state): State<AppState>,
    auth: AuthenticatedRequest,
) -> Result<StatusCode, AppError> {
    state
        .provider
        .sign_out(&auth.token)
        .await
        .map_err(AppError::auth_failure)?;

    info!(user_id = %auth.user.id, "user logged out");
    Ok(StatusCode::NO_CONTENT)
}

pub async fn list_entries(
    State(state): State<AppState>,
    auth: AuthenticatedRequest,
) -> Result<Json<Vec<Entry>>, AppError> {
    let entries = state
        .provider
        .list_entries(&auth.user.id)
        .await
        .map_err(AppError::provider)?;
    Ok(Json(entries))
}

pub async fn create_entry(
    State(state): State<AppState>,
    auth: AuthenticatedRequest,
    payload: Result<Json<CreateEntryRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<Entry>), AppError> {
    let Json(payload) = payload?;
    let new_entry = payload.into_new_entry(&auth.user.id)?;

    let entry = state
        .provider
        .insert_entry(&new_entry)
        .await
        .map_err(AppError::provider)?;

    info!(
        user_id = %auth.user.id,
        entry_id = entry.id,
        kind = entry.entry_type.as_str(),
        "entry created"
    );
    Ok((StatusCode::CREATED, Json(entry)))
}

pub async fn delete_entry(
    State(state): State<AppState>,
    auth: AuthenticatedRequest,
    Path(id): Path<i64>,
) -> Result<StatusCode, AppError> {
    state
        .provider
        .delete_entry(id, &auth.user.id)
        .await
        .map_err(AppError::provider)?;

    info!(user_id = %auth.user.id, entry_id = id, "entry delete requested");
    Ok(StatusCode::NO_CONTENT)
}

pub async fn get_summary(
    State(state): State<AppState>,
    auth: AuthenticatedRequest,
    Query(query): Query<SummaryQuery>,
) -> Result<Json<DailySummary>, AppError> {
    let entries = state
        .provider
        .list_entries(&auth.user.id)
        .await
        .map_err(AppError::provider)?;

    let summary = match query.at.as_deref() {
        Some(at) => {
            // an unescaped '+' offset arrives as a space
            let reference = DateTime::parse_from_rfc3339(&at.replace(' ', "+"))
                .map_err(|_| AppError::bad_request("at must be an RFC 3339 timestamp"))?;
            daily_summary(&entries, &reference)
        }
        None => daily_summary_now(&entries),
    };
    Ok(Json(summary))
}
