use crate::error::{GatewayError, Result};
use crate::models::openai::ChatCompletionRequest;
use crate::validation::validate_tools;

/// Validate an OpenAI chat request before translation
pub fn validate_chat_request(req: &ChatCompletionRequest) -> Result<()> {
    if req.model.trim().is_empty() {
        return Err(GatewayError::UnsupportedRequestShape(
            "Model name cannot be empty".into(),
        ));
    }

    if req.messages.is_empty() {
        return Err(GatewayError::UnsupportedRequestShape(
            "No messages provided".into(),
        ));
    }

    let mut has_turn = false;
    for (i, msg) in req.messages.iter().enumerate() {
        match msg.role.as_str() {
            "system" | "developer" => {}
            "user" | "assistant" => has_turn = true,
            "tool" => {
                has_turn = true;
                if msg.tool_call_id.as_deref().is_none_or(str::is_empty) {
                    return Err(GatewayError::UnsupportedRequestShape(format!(
                        "Message {} has role 'tool' but no tool_call_id",
                        i
                    )));
                }
            }
            other => {
                return Err(GatewayError::UnsupportedRequestShape(format!(
                    "Unsupported message role '{}' at index {}",
                    other, i
                )));
            }
        }
    }

    if !has_turn {
        return Err(GatewayError::UnsupportedRequestShape(
            "Request contains only system messages".into(),
        ));
    }

    // Check token limits
    if let Some(max_tokens) = req.max_completion_tokens.or(req.max_tokens)
        && (max_tokens == 0 || max_tokens > 1_000_000)
    {
        return Err(GatewayError::UnsupportedRequestShape(format!(
            "Invalid max_tokens: {}. Must be between 1 and 1,000,000",
            max_tokens
        )));
    }

    if let Some(temp) = req.temperature
        && !(0.0..=2.0).contains(&temp)
    {
        return Err(GatewayError::UnsupportedRequestShape(format!(
            "Invalid temperature: {}. Must be between 0.0 and 2.0",
            temp
        )));
    }

    if let Some(top_p) = req.top_p
        && !(0.0..=1.0).contains(&top_p)
    {
        return Err(GatewayError::UnsupportedRequestShape(format!(
            "Invalid top_p: {}. Must be between 0.0 and 1.0",
            top_p
        )));
    }

    if let Some(tools) = &req.tools {
        validate_tools(tools)?;
    }

    Ok(())
}
