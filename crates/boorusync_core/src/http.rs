use anyhow::Result;
use reqwest::blocking::Response;
use serde_json::Value;

use crate::error::SyncError;

pub(crate) const USER_AGENT: &str = "boorusync/0.1";

pub(crate) fn join_url(api_base: &str, path: &str) -> String {
    let base = api_base.trim_end_matches('/');
    if path.starts_with('/') {
        format!("{base}{path}")
    } else {
        format!("{base}/{path}")
    }
}

/// Passes 2xx responses through; anything else becomes a remote-service
/// failure carrying the best detail the body offers.
pub(crate) fn ensure_success(operation: &str, response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().unwrap_or_default();
    Err(remote_failure(operation, status.as_u16(), &body))
}

pub(crate) fn remote_failure(operation: &str, status: u16, body: &str) -> anyhow::Error {
    SyncError::RemoteService {
        operation: operation.to_string(),
        status,
        detail: error_detail(body),
    }
    .into()
}

/// JSON object bodies yield `description`, then `title`, then the compact
/// object; everything else falls back to the raw text.
fn error_detail(body: &str) -> String {
    if let Ok(parsed) = serde_json::from_str::<Value>(body)
        && parsed.is_object()
    {
        if let Some(text) = parsed.get("description").and_then(Value::as_str) {
            return text.to_string();
        }
        if let Some(text) = parsed.get("title").and_then(Value::as_str) {
            return text.to_string();
        }
        return parsed.to_string();
    }
    body.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::{error_detail, join_url, remote_failure};
    use crate::error::SyncError;

    #[test]
    fn join_url_handles_slash_combinations() {
        assert_eq!(join_url("http://x/api", "/posts"), "http://x/api/posts");
        assert_eq!(join_url("http://x/api/", "/posts"), "http://x/api/posts");
        assert_eq!(join_url("http://x/api/", "posts"), "http://x/api/posts");
        assert_eq!(join_url("http://x/api", "posts"), "http://x/api/posts");
    }

    #[test]
    fn error_detail_prefers_description() {
        let body = r#"{"title": "ValidationError", "description": "tag name too long"}"#;
        assert_eq!(error_detail(body), "tag name too long");
    }

    #[test]
    fn error_detail_falls_back_to_title() {
        let body = r#"{"title": "Conflict", "status": 409}"#;
        assert_eq!(error_detail(body), "Conflict");
    }

    #[test]
    fn error_detail_compacts_objects_without_known_fields() {
        let body = r#"{"code": 17}"#;
        assert_eq!(error_detail(body), r#"{"code":17}"#);
    }

    #[test]
    fn error_detail_ignores_non_string_description() {
        let body = r#"{"description": 5, "title": "Bad Request"}"#;
        assert_eq!(error_detail(body), "Bad Request");
    }

    #[test]
    fn error_detail_passes_plain_text_through() {
        assert_eq!(error_detail("gateway timeout\n"), "gateway timeout");
        assert_eq!(error_detail("[1, 2]"), "[1, 2]");
    }

    #[test]
    fn remote_failure_is_a_typed_sync_error() {
        let error = remote_failure("attach tag to post 7", 500, "boom");
        let typed = error
            .downcast_ref::<SyncError>()
            .expect("remote failure should downcast");
        match typed {
            SyncError::RemoteService {
                operation,
                status,
                detail,
            } => {
                assert_eq!(operation, "attach tag to post 7");
                assert_eq!(*status, 500);
                assert_eq!(detail, "boom");
            }
            other => panic!("unexpected variant: {other:?}"),
        }
    }
}
