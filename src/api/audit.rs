//! Activity log helper shared by the mutating handlers.

use crate::db::log_audit;
use crate::AppState;

use super::auth::AuthContext;

/// Record a mutation performed by the caller.
/// A failure to write the entry is logged and never fails the request.
pub async fn audit(
    state: &AppState,
    ctx: &AuthContext,
    action: &str,
    resource_type: &str,
    resource_id: impl ToString,
    details: Option<serde_json::Value>,
) {
    let resource_id = resource_id.to_string();
    if let Err(e) = log_audit(
        &state.db,
        ctx.school_id,
        action,
        resource_type,
        Some(&resource_id),
        Some(ctx.user_id),
        details,
    )
    .await
    {
        tracing::warn!(
            action = action,
            resource_type = resource_type,
            error = %e,
            "Failed to create audit log entry"
        );
    }
}
