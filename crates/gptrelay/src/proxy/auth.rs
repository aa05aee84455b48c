//! Operator authentication for admin routes

use axum::{
    body::Body,
    http::{StatusCode, header},
    response::Response,
};

use super::framing::sse_record;
use crate::dispatch::UserMessageKey;
use crate::turn::ProxyReturn;

/// Id of the record returned to unauthenticated callers
pub const UNAUTHORIZED_ID: &str = "Unauthorized";

/// Check `provided` against the configured admin key.
///
/// Without a configured key every caller passes. Both sides are trimmed.
pub fn authorize(admin_key: Option<&str>, provided: Option<&str>) -> bool {
    let Some(expected) = admin_key.map(str::trim).filter(|k| !k.is_empty()) else {
        return true;
    };
    provided.map(str::trim) == Some(expected)
}

/// The single record answered to a failed admin check
pub fn unauthorized_record() -> ProxyReturn {
    ProxyReturn::new(
        Some(UNAUTHORIZED_ID.to_string()),
        None,
        UserMessageKey::Unauthorized.default_text(),
    )
}

pub fn unauthorized_response() -> Response {
    let json = serde_json::to_string(&unauthorized_record()).unwrap_or_default();
    Response::builder()
        .status(StatusCode::UNAUTHORIZED)
        .header(header::CONTENT_TYPE, "text/event-stream;charset=utf-8")
        .body(Body::from(sse_record(&json)))
        .unwrap_or_else(|_| {
            let mut response = Response::new(Body::empty());
            *response.status_mut() = StatusCode::UNAUTHORIZED;
            response
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_admin_key_allows_everyone() {
        assert!(authorize(None, None));
        assert!(authorize(None, Some("anything")));
        assert!(authorize(Some("  "), None));
    }

    #[test]
    fn test_admin_key_must_match_after_trimming() {
        assert!(authorize(Some("sk-admin"), Some(" sk-admin ")));
        assert!(authorize(Some(" sk-admin\n"), Some("sk-admin")));
        assert!(!authorize(Some("sk-admin"), Some("sk-other")));
        assert!(!authorize(Some("sk-admin"), None));
        assert!(!authorize(Some("sk-admin"), Some("")));
    }

    #[test]
    fn test_unauthorized_record_shape() {
        let json = serde_json::to_value(unauthorized_record()).unwrap();
        assert_eq!(json["id"], "Unauthorized");
        assert_eq!(json["text"], "No access permission");
        assert!(json.get("conversationId").is_none());
    }
}
