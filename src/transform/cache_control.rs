use serde_json::Value;
use tracing::debug;

/// Keep at most `max` `cache_control` markers, system blocks first then
/// message content blocks in order. Returns how many were removed; a `max` of
/// 0 leaves the request untouched.
pub fn limit(request: &mut Value, max: usize) -> usize {
    if max == 0 {
        return 0;
    }

    let mut kept = 0;
    let mut removed = 0;
    let mut visit = |block: &mut Value| {
        if let Some(object) = block.as_object_mut()
            && object.contains_key("cache_control")
        {
            if kept < max {
                kept += 1;
            } else {
                object.remove("cache_control");
                removed += 1;
            }
        }
    };

    if let Some(system) = request.get_mut("system").and_then(Value::as_array_mut) {
        system.iter_mut().for_each(&mut visit);
    }
    if let Some(messages) = request.get_mut("messages").and_then(Value::as_array_mut) {
        for message in messages {
            if let Some(content) = message.get_mut("content").and_then(Value::as_array_mut) {
                content.iter_mut().for_each(&mut visit);
            }
        }
    }

    if removed > 0 {
        debug!(kept, removed, "Excess cache_control markers stripped");
    }
    removed
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn marker() -> Value {
        json!({"type": "ephemeral"})
    }

    fn count(request: &Value) -> usize {
        request.to_string().matches("cache_control").count()
    }

    #[test]
    fn test_keeps_system_first() {
        let mut request = json!({
            "system": [
                {"type": "text", "text": "a", "cache_control": marker()},
                {"type": "text", "text": "b", "cache_control": marker()}
            ],
            "messages": [
                {"role": "user", "content": [
                    {"type": "text", "text": "1", "cache_control": marker()},
                    {"type": "text", "text": "2", "cache_control": marker()}
                ]},
                {"role": "assistant", "content": "plain"},
                {"role": "user", "content": [
                    {"type": "text", "text": "3", "cache_control": marker()}
                ]}
            ]
        });

        assert_eq!(limit(&mut request, 3), 2);
        assert_eq!(count(&request), 3);
        assert!(request["system"][1].get("cache_control").is_some());
        assert!(request["messages"][0]["content"][0].get("cache_control").is_some());
        assert!(request["messages"][0]["content"][1].get("cache_control").is_none());
        assert!(request["messages"][2]["content"][0].get("cache_control").is_none());
    }

    #[test]
    fn test_under_limit_untouched() {
        let mut request = json!({
            "system": "plain",
            "messages": [{"role": "user", "content": [{"type": "text", "text": "x", "cache_control": marker()}]}]
        });
        let before = request.clone();
        assert_eq!(limit(&mut request, 4), 0);
        assert_eq!(request, before);
    }

    #[test]
    fn test_zero_disables() {
        let mut request = json!({
            "messages": [{"role": "user", "content": [
                {"type": "text", "text": "x", "cache_control": marker()},
                {"type": "text", "text": "y", "cache_control": marker()}
            ]}]
        });
        assert_eq!(limit(&mut request, 0), 0);
        assert_eq!(count(&request), 2);
    }
}
