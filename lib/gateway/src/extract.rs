// SPDX-FileCopyrightText: Copyright (c) 2026 Flowgate Contributors
// SPDX-License-Identifier: Apache-2.0

//! Request-body extraction: untyped JSON body map to typed [`RequestData`].
//!
//! The two request shapes share the `model` field but have mutually
//! exclusive content fields, so decoding is two-stage: try completions
//! first (a present, non-empty `prompt` wins), then chat-completions. A
//! merely-absent `prompt` must not fail the whole request.

use crate::error::GatewayError;
use crate::protocols::{ChatCompletionsRequest, CompletionsRequest, Message, RequestData};
use serde_json::{Map, Value};

/// Extract the typed request data from a decoded JSON body map.
pub fn extract_request_data(body: &Map<String, Value>) -> Result<RequestData, GatewayError> {
    // Canonical byte form of the body, so both parses see identical input.
    let body_bytes = serde_json::to_vec(body)
        .map_err(|_| GatewayError::BadRequest("invalid request body".to_string()))?;

    if let Ok(completions) = serde_json::from_slice::<CompletionsRequest>(&body_bytes)
        && !completions.prompt.is_empty()
    {
        return Ok(RequestData::Completions(completions));
    }

    let chat = serde_json::from_slice::<ChatCompletionsRequest>(&body_bytes)
        .map_err(|_| GatewayError::BadRequest("invalid request format".to_string()))?;

    validate_chat_completions_messages(&chat.messages).map_err(|detail| {
        GatewayError::BadRequest(format!("invalid chat-completions request: {detail}"))
    })?;

    Ok(RequestData::ChatCompletions(chat))
}

fn validate_chat_completions_messages(messages: &[Message]) -> Result<(), String> {
    if messages.is_empty() {
        return Err("chat-completions request must have at least one message".to_string());
    }
    Ok(())
}
