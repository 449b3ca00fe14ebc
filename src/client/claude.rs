use axum::http::HeaderMap;

use super::{forward_headers, insert, join_url};
use crate::credential::CredentialConfig;

pub const ANTHROPIC_VERSION: &str = "2023-06-01";

const FORWARDED: &[&str] = &["anthropic-", "user-agent", "x-app"];

/// `POST {base_url}/v1/messages`, tolerating a base url that already ends in `/v1`
pub fn messages_url(base_url: &str) -> String {
    let base = base_url.trim_end_matches('/');
    if base.ends_with("/v1") {
        join_url(base, "messages")
    } else {
        join_url(base, "v1/messages")
    }
}

pub fn request_headers(credential: &CredentialConfig, client: &HeaderMap, stream: bool) -> HeaderMap {
    let mut headers = HeaderMap::new();
    forward_headers(client, &mut headers, FORWARDED);

    if !headers.contains_key("anthropic-version") {
        insert(&mut headers, "anthropic-version", ANTHROPIC_VERSION);
    }
    insert(&mut headers, "x-api-key", &credential.api_key);
    insert(
        &mut headers,
        "authorization",
        &format!("Bearer {}", credential.api_key),
    );
    insert(&mut headers, "content-type", "application/json");
    insert(
        &mut headers,
        "accept",
        if stream { "text/event-stream" } else { "application/json" },
    );
    headers
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_messages_url() {
        assert_eq!(
            messages_url("https://api.anthropic.com"),
            "https://api.anthropic.com/v1/messages"
        );
        assert_eq!(
            messages_url("https://relay.example.com/api/v1/"),
            "https://relay.example.com/api/v1/messages"
        );
    }

    #[test]
    fn test_headers_replace_client_auth() {
        let credential = CredentialConfig::new("a", "https://api.anthropic.com", "sk-upstream");
        let mut client = HeaderMap::new();
        client.insert("authorization", HeaderValue::from_static("Bearer client-key"));
        client.insert("anthropic-beta", HeaderValue::from_static("tools-2024"));
        client.insert("anthropic-version", HeaderValue::from_static("2024-01-01"));
        client.insert("cookie", HeaderValue::from_static("secret"));

        let headers = request_headers(&credential, &client, true);
        assert_eq!(headers["authorization"], "Bearer sk-upstream");
        assert_eq!(headers["x-api-key"], "sk-upstream");
        assert_eq!(headers["anthropic-beta"], "tools-2024");
        assert_eq!(headers["anthropic-version"], "2024-01-01");
        assert_eq!(headers["accept"], "text/event-stream");
        assert!(!headers.contains_key("cookie"));
    }
}
