pub mod claude;
pub mod codex;
pub mod http;

use axum::http::{HeaderMap, HeaderName, HeaderValue};

pub use http::HttpTransport;

/// Copy the listed client headers (or prefixes ending in `-`) into `target`
fn forward_headers(source: &HeaderMap, target: &mut HeaderMap, allowed: &[&str]) {
    for (name, value) in source {
        let key = name.as_str();
        let keep = allowed.iter().any(|allowed| {
            if allowed.ends_with('-') {
                key.starts_with(allowed)
            } else {
                key == *allowed
            }
        });
        if keep {
            target.insert(name.clone(), value.clone());
        }
    }
}

fn insert(headers: &mut HeaderMap, name: &'static str, value: &str) {
    if let Ok(value) = HeaderValue::from_str(value) {
        headers.insert(HeaderName::from_static(name), value);
    }
}

fn join_url(base_url: &str, path: &str) -> String {
    format!("{}/{}", base_url.trim_end_matches('/'), path.trim_start_matches('/'))
}
