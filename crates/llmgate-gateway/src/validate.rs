//! Request validation.
//!
//! Structural and size checks over a parsed [`ChatRequest`]. All checks are
//! independent and all must pass. Validation authorises *existence* (the
//! model is one this deployment serves); the policy engine separately
//! authorises *use*. Failure messages name the violated limit but never echo
//! request content, so an injected payload cannot be reflected back.

use llmgate_core::{ChatRequest, GatewayError, LimitsConfig, Result};

/// Roles a message may carry.
const ALLOWED_ROLES: &[&str] = &["system", "user", "assistant", "tool"];

/// Validate a request against the configured limits.
///
/// # Errors
///
/// Returns [`GatewayError::InvalidRequest`] naming the violated limit.
pub fn validate(req: &ChatRequest, limits: &LimitsConfig) -> Result<()> {
    if req.model.is_empty() {
        return Err(GatewayError::InvalidRequest(
            "model must not be empty".to_string(),
        ));
    }
    if !limits.allowed_models.iter().any(|m| m == &req.model) {
        return Err(GatewayError::InvalidRequest(
            "model is not in the allowed model list".to_string(),
        ));
    }

    if req.messages.is_empty() {
        return Err(GatewayError::InvalidRequest(
            "messages must not be empty".to_string(),
        ));
    }
    if req.messages.len() > limits.max_messages {
        return Err(GatewayError::InvalidRequest(format!(
            "too many messages: limit is {}",
            limits.max_messages
        )));
    }

    let mut total_chars = 0usize;
    for message in &req.messages {
        if !ALLOWED_ROLES.contains(&message.role.as_str()) {
            return Err(GatewayError::InvalidRequest(
                "message role must be one of system, user, assistant, tool".to_string(),
            ));
        }
        let len = message.content.chars().count();
        if len > limits.max_message_chars {
            return Err(GatewayError::InvalidRequest(format!(
                "a message exceeds the {}-character limit",
                limits.max_message_chars
            )));
        }
        total_chars += len;
    }
    if total_chars > limits.max_total_chars {
        return Err(GatewayError::InvalidRequest(format!(
            "combined message content exceeds the {}-character limit",
            limits.max_total_chars
        )));
    }

    if let Some(max_tokens) = req.max_tokens {
        if max_tokens > limits.max_tokens_limit {
            return Err(GatewayError::InvalidRequest(format!(
                "max_tokens exceeds the cap of {}",
                limits.max_tokens_limit
            )));
        }
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
