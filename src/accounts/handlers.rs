use axum::{
    extract::{
        rejection::{JsonRejection, PathRejection, QueryRejection},
        Path, Query, State,
    },
    routing::{delete, get, post},
    Json, Router,
};
use tracing::instrument;

use super::{
    dto::{
        EmailRequest, LoginRequest, LoginResponse, MessageResponse, PublicUser,
        ResetPasswordRequest, SignUpRequest, TokenLinkQuery,
    },
    services,
};
use crate::{auth::AuthUser, error::AppError, state::AppState};

pub fn account_routes() -> Router<AppState> {
    Router::new()
        .route("/sign-up", post(sign_up))
        .route("/confirm-email", get(confirm_email))
        .route("/resend-confirmation", post(resend_confirmation))
        .route("/login", post(login))
        .route("/forgot-password", post(forgot_password))
        .route("/reset-password", get(reset_password_form).post(reset_password))
}

pub fn user_routes() -> Router<AppState> {
    Router::new()
        .route("/users", get(list_users))
        .route("/user/:id", get(get_user))
        .route("/delete/:id", delete(delete_user))
        .route("/profile", get(get_profile))
}

#[instrument(skip(state, payload))]
pub async fn sign_up(
    State(state): State<AppState>,
    payload: Result<Json<SignUpRequest>, JsonRejection>,
) -> Result<Json<MessageResponse>, AppError> {
    let Json(req) = payload?;
    services::sign_up(&state, req).await?;
    Ok(Json(MessageResponse::new(
        "User created successfully, check your email to confirm your account",
    )))
}

#[instrument(skip(state, query))]
pub async fn confirm_email(
    State(state): State<AppState>,
    query: Result<Query<TokenLinkQuery>, QueryRejection>,
) -> Result<Json<MessageResponse>, AppError> {
    let Query(q) = query?;
    services::confirm_email(&state, &q.token, &q.email).await?;
    Ok(Json(MessageResponse::new("Email confirmed successfully")))
}

#[instrument(skip(state, payload))]
pub async fn resend_confirmation(
    State(state): State<AppState>,
    payload: Result<Json<EmailRequest>, JsonRejection>,
) -> Result<Json<MessageResponse>, AppError> {
    let Json(req) = payload?;
    services::resend_confirmation(&state, &req.email).await?;
    Ok(Json(MessageResponse::new("Confirmation email sent")))
}

#[instrument(skip(state, payload))]
pub async fn login(
    State(state): State<AppState>,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> Result<Json<LoginResponse>, AppError> {
    let Json(req) = payload?;
    Ok(Json(services::login(&state, req).await?))
}

#[instrument(skip(state, payload))]
pub async fn forgot_password(
    State(state): State<AppState>,
    payload: Result<Json<EmailRequest>, JsonRejection>,
) -> Result<Json<MessageResponse>, AppError> {
    let Json(req) = payload?;
    services::forgot_password(&state, &req.email).await?;
    Ok(Json(MessageResponse::new(
        "Password reset link sent to your email",
    )))
}

/// Target of the emailed reset link: hands token and email back to the client form.
#[instrument(skip(query))]
pub async fn reset_password_form(
    query: Result<Query<TokenLinkQuery>, QueryRejection>,
) -> Result<Json<TokenLinkQuery>, AppError> {
    let Query(q) = query?;
    Ok(Json(q))
}

#[instrument(skip(state, payload))]
pub async fn reset_password(
    State(state): State<AppState>,
    payload: Result<Json<ResetPasswordRequest>, JsonRejection>,
) -> Result<Json<MessageResponse>, AppError> {
    let Json(req) = payload?;
    services::reset_password(&state, req).await?;
    Ok(Json(MessageResponse::new("Password reset successfully")))
}

#[instrument(skip(state))]
pub async fn list_users(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<Json<Vec<PublicUser>>, AppError> {
    Ok(Json(services::list_users(&state, &user).await?))
}

#[instrument(skip(state))]
pub async fn get_user(
    State(state): State<AppState>,
    id: Result<Path<i64>, PathRejection>,
) -> Result<Json<PublicUser>, AppError> {
    let Path(id) = id?;
    Ok(Json(services::get_user(&state, id).await?))
}

#[instrument(skip(state))]
pub async fn delete_user(
    State(state): State<AppState>,
    user: AuthUser,
    id: Result<Path<i64>, PathRejection>,
) -> Result<Json<MessageResponse>, AppError> {
    let Path(id) = id?;
    services::delete_user(&state, &user, id).await?;
    Ok(Json(MessageResponse::new("User deleted successfully")))
}

#[instrument(skip(state))]
pub async fn get_profile(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<Json<PublicUser>, AppError> {
    Ok(Json(services::get_profile(&state, &user).await?))
}
