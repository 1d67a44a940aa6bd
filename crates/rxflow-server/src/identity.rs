//! Caller identity from gateway headers.

use axum::http::HeaderMap;
use rxflow_core::models::{UserRole, WorkspaceContext};

use crate::error::{ApiError, ApiResult};

pub const USER_ID_HEADER: &str = "x-user-id";
pub const WORKPLACE_ID_HEADER: &str = "x-workplace-id";
pub const USER_ROLE_HEADER: &str = "x-user-role";

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

/// Build the workspace context for a request. Only super-admins may omit
/// the workspace.
pub fn caller(headers: &HeaderMap) -> ApiResult<WorkspaceContext> {
    let user_id = header(headers, USER_ID_HEADER)
        .ok_or_else(|| ApiError::Unauthorized(format!("Missing {} header", USER_ID_HEADER)))?;
    let role = match header(headers, USER_ROLE_HEADER) {
        Some(value) => UserRole::parse(value)
            .ok_or_else(|| ApiError::Unauthorized(format!("Unknown role: {}", value)))?,
        None => UserRole::Pharmacist,
    };
    let workplace_id = header(headers, WORKPLACE_ID_HEADER).map(str::to_string);
    if workplace_id.is_none() && role != UserRole::SuperAdmin {
        return Err(ApiError::Unauthorized(format!(
            "Missing {} header",
            WORKPLACE_ID_HEADER
        )));
    }

    Ok(WorkspaceContext {
        user_id: user_id.to_string(),
        workplace_id,
        role,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(*name, HeaderValue::from_static(value));
        }
        map
    }

    #[test]
    fn test_pharmacist_is_the_default_role() {
        let ctx = caller(&headers(&[(USER_ID_HEADER, "pharm-1"), (WORKPLACE_ID_HEADER, "ws-1")])).unwrap();
        assert_eq!(ctx, WorkspaceContext::pharmacist("pharm-1", "ws-1"));
    }

    #[test]
    fn test_workspace_required_unless_super_admin() {
        assert!(matches!(
            caller(&headers(&[(USER_ID_HEADER, "pharm-1")])),
            Err(ApiError::Unauthorized(_))
        ));

        let ctx = caller(&headers(&[(USER_ID_HEADER, "root"), (USER_ROLE_HEADER, "super_admin")])).unwrap();
        assert!(ctx.is_super_admin());
        assert_eq!(ctx.workplace_id, None);
    }

    #[test]
    fn test_missing_user_or_unknown_role_is_unauthorized() {
        assert!(caller(&headers(&[(WORKPLACE_ID_HEADER, "ws-1")])).is_err());
        assert!(caller(&headers(&[
            (USER_ID_HEADER, "pharm-1"),
            (WORKPLACE_ID_HEADER, "ws-1"),
            (USER_ROLE_HEADER, "janitor"),
        ]))
        .is_err());
    }
}
