//! Session id derivation for inbound chat requests.

use crate::openai::ChatCompletionRequest;
use agent_common::config::SessionKeying;
use axum::http::HeaderMap;

/// Header carrying a caller-chosen session id.
pub const SESSION_HEADER: &str = "x-session-id";

/// Longest caller-supplied id accepted as a session key.
const MAX_SESSION_ID_LEN: usize = 256;

/// Pick the session id for a request under the configured keying policy.
///
/// Falls back to a fresh random id whenever the policy's source is missing
/// or unusable.
pub fn resolve_session_id(
    keying: SessionKeying,
    headers: &HeaderMap,
    request: &ChatCompletionRequest,
) -> String {
    let supplied = match keying {
        SessionKeying::PerRequest => None,
        SessionKeying::Header => headers
            .get(SESSION_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(usable),
        SessionKeying::User => request.user.as_deref().and_then(usable),
    };

    supplied.unwrap_or_else(|| uuid::Uuid::new_v4().to_string())
}

fn usable(raw: &str) -> Option<String> {
    let id = raw.trim();
    (!id.is_empty() && id.len() <= MAX_SESSION_ID_LEN).then(|| id.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn request(user: Option<&str>) -> ChatCompletionRequest {
        serde_json::from_value(serde_json::json!({
            "model": "agent-model",
            "messages": [{"role": "user", "content": "hi"}],
            "user": user,
        }))
        .unwrap()
    }

    fn headers(session: &str) -> HeaderMap {
        let mut map = HeaderMap::new();
        map.insert(SESSION_HEADER, HeaderValue::from_str(session).unwrap());
        map
    }

    #[test]
    fn per_request_ignores_caller_ids() {
        let req = request(Some("alice"));
        let a = resolve_session_id(SessionKeying::PerRequest, &headers("s1"), &req);
        let b = resolve_session_id(SessionKeying::PerRequest, &headers("s1"), &req);
        assert_ne!(a, b);
        assert!(uuid::Uuid::parse_str(&a).is_ok());
    }

    #[test]
    fn header_keying_uses_trimmed_header() {
        let id = resolve_session_id(SessionKeying::Header, &headers("  thread-7 "), &request(None));
        assert_eq!(id, "thread-7");
    }

    #[test]
    fn user_keying_uses_user_field() {
        let id = resolve_session_id(SessionKeying::User, &HeaderMap::new(), &request(Some("alice")));
        assert_eq!(id, "alice");
    }

    #[test]
    fn missing_or_unusable_ids_fall_back() {
        let id = resolve_session_id(SessionKeying::Header, &HeaderMap::new(), &request(None));
        assert!(uuid::Uuid::parse_str(&id).is_ok());

        let id = resolve_session_id(SessionKeying::User, &HeaderMap::new(), &request(Some("   ")));
        assert!(uuid::Uuid::parse_str(&id).is_ok());

        let long = "x".repeat(MAX_SESSION_ID_LEN + 1);
        let id = resolve_session_id(SessionKeying::Header, &headers(&long), &request(None));
        assert_ne!(id, long);
    }
}
