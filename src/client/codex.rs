use axum::http::HeaderMap;

use super::{forward_headers, insert, join_url};
use crate::credential::CredentialConfig;

const FORWARDED: &[&str] = &[
    "session_id",
    "conversation_id",
    "originator",
    "version",
    "user-agent",
    "chatgpt-account-id",
];

/// `POST {base_url}/responses`; the base url carries any `/v1` or `/backend-api/codex` prefix
pub fn responses_url(base_url: &str) -> String {
    join_url(base_url, "responses")
}

pub fn request_headers(credential: &CredentialConfig, client: &HeaderMap) -> HeaderMap {
    let mut headers = HeaderMap::new();
    forward_headers(client, &mut headers, FORWARDED);

    // upstream session tracking expects both ids, keep them equal when the client sent neither
    if !headers.contains_key("session_id") {
        let session = uuid::Uuid::new_v4().to_string();
        insert(&mut headers, "session_id", &session);
        if !headers.contains_key("conversation_id") {
            insert(&mut headers, "conversation_id", &session);
        }
    }
    if !headers.contains_key("originator") {
        insert(&mut headers, "originator", "codex_cli_rs");
    }
    insert(
        &mut headers,
        "authorization",
        &format!("Bearer {}", credential.api_key),
    );
    insert(&mut headers, "openai-beta", "responses=experimental");
    insert(&mut headers, "content-type", "application/json");
    insert(&mut headers, "accept", "text/event-stream");
    headers
}
