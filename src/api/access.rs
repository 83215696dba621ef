//! Per-route role whitelists.
//!
//! Routes opt in with
//! `route_layer(middleware::from_fn_with_state(ADMIN, require_role))`,
//! placed inside the bearer-token layer so the caller is already known.

use axum::{
    body::Body,
    extract::State,
    http::Request,
    middleware::Next,
    response::Response,
};

use super::auth::AuthContext;
use super::error::ApiError;
use crate::db::Role;

pub const ADMIN: &[Role] = &[Role::Admin];
pub const STAFF: &[Role] = &[Role::Admin, Role::Teacher];
pub const ATTENDANCE_MARKERS: &[Role] = &[Role::Admin, Role::Teacher, Role::Starosta];

pub async fn require_role(
    State(allowed): State<&'static [Role]>,
    request: Request<Body>,
    next: Next,
) -> Result<Response, ApiError> {
    let ctx = request
        .extensions()
        .get::<AuthContext>()
        .copied()
        .ok_or_else(|| ApiError::unauthorized("Authorization header required"))?;

    if let Err(e) = ensure_role(&ctx, allowed) {
        tracing::warn!(
            user_id = ctx.user_id,
            role = %ctx.role,
            path = %request.uri().path(),
            "Role check failed"
        );
        return Err(e);
    }

    Ok(next.run(request).await)
}

pub fn ensure_role(ctx: &AuthContext, allowed: &[Role]) -> Result<(), ApiError> {
    if allowed.contains(&ctx.role) {
        Ok(())
    } else {
        Err(ApiError::forbidden("Insufficient permissions"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(role: Role) -> AuthContext {
        AuthContext {
            user_id: 1,
            school_id: 1,
            role,
        }
    }

    #[test]
    fn test_whitelists() {
        assert!(ensure_role(&ctx(Role::Admin), ADMIN).is_ok());
        assert!(ensure_role(&ctx(Role::Teacher), ADMIN).is_err());
        assert!(ensure_role(&ctx(Role::Teacher), STAFF).is_ok());
        assert!(ensure_role(&ctx(Role::Starosta), ATTENDANCE_MARKERS).is_ok());
        assert!(ensure_role(&ctx(Role::Student), ATTENDANCE_MARKERS).is_err());
        assert!(ensure_role(&ctx(Role::Parent), STAFF).is_err());
    }
}
