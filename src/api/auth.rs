use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use axum::{
    async_trait,
    body::Body,
    extract::{FromRequestParts, State},
    http::{header, request::Parts, Request, StatusCode},
    middleware::Next,
    response::Response,
    Json,
};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use super::audit::audit;
use super::error::{ApiError, ValidationErrorBuilder};
use super::extract::ApiJson;
use super::users::{insert_user, NewUser};
use super::validation::{parse_role, validate_email, validate_password, validate_username};
use crate::db::{
    actions, resource_types, LoginRequest, LoginResponse, RefreshRequest, RegisterRequest, Role,
    School, User, UserWithSchool,
};
use crate::AppState;

/// Hash a password using Argon2
pub fn hash_password(password: &str) -> Result<String, argon2::password_hash::Error> {
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();
    let hash = argon2.hash_password(password.as_bytes(), &salt)?;
    Ok(hash.to_string())
}

/// Verify a password against a hash
pub fn verify_password(password: &str, hash: &str) -> bool {
    let parsed_hash = match PasswordHash::new(hash) {
        Ok(h) => h,
        Err(_) => return false,
    };
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .is_ok()
}

// -------------------------------------------------------------------------
// Bearer tokens
// -------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    Access,
    Refresh,
}

/// Signed token payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    pub user_id: i64,
    pub school_id: i64,
    pub role: Role,
    pub iat: i64,
    pub exp: i64,
    pub typ: TokenKind,
}

impl Claims {
    pub fn new(user: &User, kind: TokenKind, ttl: Duration) -> Self {
        let iat = chrono::Utc::now().timestamp();
        Self {
            user_id: user.id,
            school_id: user.school_id,
            role: user.role,
            iat,
            exp: expires_at(iat, ttl),
            typ: kind,
        }
    }
}

/// `iat + ttl`, clamped at the end of time
fn expires_at(iat: i64, ttl: Duration) -> i64 {
    iat.saturating_add(i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX))
}

/// Sign claims with HMAC-SHA256
pub fn mint_token(secret: &str, claims: &Claims) -> Result<String, jsonwebtoken::errors::Error> {
    encode(
        &Header::new(Algorithm::HS256),
        claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
}

/// Check signature and expiry
pub fn verify_token(secret: &str, token: &str) -> Result<Claims, jsonwebtoken::errors::Error> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.leeway = 0;
    validation.set_required_spec_claims(&["exp"]);

    let data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &validation,
    )?;
    Ok(data.claims)
}

fn sign(state: &AppState, claims: &Claims) -> Result<String, ApiError> {
    mint_token(&state.config.auth.jwt_secret, claims).map_err(|e| {
        tracing::error!("Failed to sign token: {}", e);
        ApiError::internal("Failed to generate token")
    })
}

/// Access and refresh token for a user
fn issue_pair(state: &AppState, user: &User) -> Result<(String, String), ApiError> {
    let auth = &state.config.auth;
    let access = Claims::new(user, TokenKind::Access, auth.access_token_ttl());
    let refresh = Claims::new(user, TokenKind::Refresh, auth.refresh_token_ttl());
    Ok((sign(state, &access)?, sign(state, &refresh)?))
}

// -------------------------------------------------------------------------
// Request context
// -------------------------------------------------------------------------

/// Identity of the caller, resolved from the bearer token
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthContext {
    pub user_id: i64,
    pub school_id: i64,
    pub role: Role,
}

impl AuthContext {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

impl From<Claims> for AuthContext {
    fn from(claims: Claims) -> Self {
        Self {
            user_id: claims.user_id,
            school_id: claims.school_id,
            role: claims.role,
        }
    }
}

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for AuthContext {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthContext>()
            .copied()
            .ok_or_else(|| ApiError::unauthorized("Authorization header required"))
    }
}

/// Resolves `Authorization: Bearer <token>` into an [`AuthContext`]
pub async fn auth_middleware(
    State(state): State<Arc<AppState>>,
    mut request: Request<Body>,
    next: Next,
) -> Result<Response, ApiError> {
    let header = request
        .headers()
        .get(header::AUTHORIZATION)
        .ok_or_else(|| ApiError::unauthorized("Authorization header required"))?;

    let token = header
        .to_str()
        .ok()
        .and_then(|h| h.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| ApiError::unauthorized("Invalid authorization header format"))?;

    let claims = verify_token(&state.config.auth.jwt_secret, token)
        .ok()
        .filter(|c| c.typ == TokenKind::Access)
        .ok_or_else(|| ApiError::unauthorized("Invalid or expired token"))?;

    request.extensions_mut().insert(AuthContext::from(claims));
    Ok(next.run(request).await)
}

// -------------------------------------------------------------------------
// Handlers
// -------------------------------------------------------------------------

/// POST /api/auth/register
///
/// The first account of a school must be its admin; later public sign-ups
/// may only take the other roles.
pub async fn register(
    State(state): State<Arc<AppState>>,
    ApiJson(req): ApiJson<RegisterRequest>,
) -> Result<(StatusCode, Json<LoginResponse>), ApiError> {
    let school_id = req
        .school_id
        .filter(|id| *id > 0)
        .ok_or_else(|| ApiError::bad_request("School ID is required"))?;

    let mut errors = ValidationErrorBuilder::new();
    errors
        .check("username", validate_username(&req.username))
        .check("email", validate_email(&req.email))
        .check("password", validate_password(&req.password))
        .check("role", parse_role(&req.role).map(|_| ()));
    errors.finish()?;
    let role = parse_role(&req.role).map_err(ApiError::bad_request)?;

    let school: Option<(i64,)> =
        sqlx::query_as("SELECT id FROM schools WHERE id = ? AND deleted_at IS NULL")
            .bind(school_id)
            .fetch_optional(&state.db)
            .await?;
    if school.is_none() {
        return Err(ApiError::bad_request("School not found"));
    }

    let (existing,): (i64,) =
        sqlx::query_as("SELECT COUNT(*) FROM users WHERE school_id = ? AND deleted_at IS NULL")
            .bind(school_id)
            .fetch_one(&state.db)
            .await?;

    match (existing == 0, role == Role::Admin) {
        (true, false) => {
            return Err(ApiError::forbidden(
                "The first account of a school must be an admin",
            ))
        }
        (false, true) => {
            warn!(school_id = school_id, "Public admin sign-up refused");
            return Err(ApiError::forbidden(
                "Admin accounts can only be created by an admin",
            ));
        }
        _ => {}
    }

    let user = insert_user(
        &state.db,
        school_id,
        NewUser {
            username: req.username,
            email: req.email,
            password: req.password,
            role,
            first_name: req.first_name,
            last_name: req.last_name,
            middle_name: req.middle_name,
            admin_title: req.admin_title,
            teacher_subject: req.teacher_subject,
        },
    )
    .await?;

    if existing == 0 {
        sqlx::query("UPDATE schools SET admin_id = ?, updated_at = ? WHERE id = ?")
            .bind(user.id)
            .bind(crate::db::now())
            .bind(school_id)
            .execute(&state.db)
            .await?;
    }

    let ctx = AuthContext {
        user_id: user.id,
        school_id,
        role: user.role,
    };
    audit(
        &state,
        &ctx,
        actions::USER_REGISTER,
        resource_types::USER,
        user.id,
        Some(json!({ "role": user.role })),
    )
    .await;

    info!(user_id = user.id, school_id = school_id, role = %user.role, "User registered");

    let (token, refresh_token) = issue_pair(&state, &user)?;
    Ok((
        StatusCode::CREATED,
        Json(LoginResponse {
            token,
            refresh_token,
            user,
        }),
    ))
}

/// POST /api/auth/login
pub async fn login(
    State(state): State<Arc<AppState>>,
    ApiJson(req): ApiJson<LoginRequest>,
) -> Result<Json<LoginResponse>, ApiError> {
    let user: Option<User> =
        sqlx::query_as("SELECT * FROM users WHERE username = ? AND deleted_at IS NULL")
            .bind(&req.username)
            .fetch_optional(&state.db)
            .await?;

    let user = match user {
        Some(user) if verify_password(&req.password, &user.password_hash) => user,
        _ => {
            warn!(username = %req.username, "Failed login attempt");
            return Err(ApiError::unauthorized("Invalid credentials"));
        }
    };

    let (token, refresh_token) = issue_pair(&state, &user)?;
    info!(user_id = user.id, "User logged in");

    Ok(Json(LoginResponse {
        token,
        refresh_token,
        user,
    }))
}

/// POST /api/auth/refresh
pub async fn refresh(
    State(state): State<Arc<AppState>>,
    ApiJson(req): ApiJson<RefreshRequest>,
) -> Result<Json<Value>, ApiError> {
    let claims = verify_token(&state.config.auth.jwt_secret, &req.refresh_token)
        .ok()
        .filter(|c| c.typ == TokenKind::Refresh)
        .ok_or_else(|| ApiError::unauthorized("Invalid or expired token"))?;

    let user: User = sqlx::query_as(
        "SELECT * FROM users WHERE id = ? AND school_id = ? AND deleted_at IS NULL",
    )
    .bind(claims.user_id)
    .bind(claims.school_id)
    .fetch_optional(&state.db)
    .await?
    .ok_or_else(|| ApiError::unauthorized("Invalid or expired token"))?;

    let access = Claims::new(&user, TokenKind::Access, state.config.auth.access_token_ttl());
    let token = sign(&state, &access)?;

    Ok(Json(json!({ "token": token })))
}

/// GET /api/auth/me
pub async fn me(
    State(state): State<Arc<AppState>>,
    ctx: AuthContext,
) -> Result<Json<Value>, ApiError> {
    let user: User = sqlx::query_as(
        "SELECT * FROM users WHERE id = ? AND school_id = ? AND deleted_at IS NULL",
    )
    .bind(ctx.user_id)
    .bind(ctx.school_id)
    .fetch_optional(&state.db)
    .await?
    .ok_or_else(|| ApiError::not_found("User not found"))?;

    let school: Option<School> =
        sqlx::query_as("SELECT * FROM schools WHERE id = ? AND deleted_at IS NULL")
            .bind(user.school_id)
            .fetch_optional(&state.db)
            .await?;

    Ok(Json(json!({ "user": UserWithSchool { user, school } })))
}
