// SPDX-FileCopyrightText: Copyright (c) 2026 Flowgate Contributors
// SPDX-License-Identifier: Apache-2.0

//! Request and scheduling types shared across the gateway core.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub use flowgate_prefix_cache::ReplicaId;

/// Header identifying a request end-to-end.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// One chat message. Serialization order (`role`, then `content`) is part of
/// the hashing contract: the prefix scorer hashes the serialized `messages`
/// array, so the byte form must be deterministic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: String,
    pub content: String,
}

/// Body of an OpenAI-style completions request.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CompletionsRequest {
    pub prompt: String,
}

/// Body of an OpenAI-style chat-completions request. Optional fields are
/// validated for shape when present and otherwise ignored by the core.
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
pub struct ChatCompletionsRequest {
    #[serde(default)]
    pub messages: Vec<Message>,
    pub tools: Option<Vec<Map<String, Value>>>,
    pub documents: Option<Vec<Map<String, Value>>>,
    pub chat_template: Option<String>,
    pub return_assistant_tokens_mask: Option<bool>,
    pub continue_final_message: Option<bool>,
    pub add_generation_prompt: Option<bool>,
    pub chat_template_kwargs: Option<Map<String, Value>>,
}

/// The two request shapes, exactly one of which is populated per request.
#[derive(Debug, Clone, PartialEq)]
pub enum RequestData {
    Completions(CompletionsRequest),
    ChatCompletions(ChatCompletionsRequest),
}

/// A single in-flight request as seen by the scheduler and plugins.
/// Lives for exactly one request.
#[derive(Debug, Clone)]
pub struct LLMRequest {
    /// Unique per in-flight request, taken from the `x-request-id` header.
    pub request_id: String,
    /// Model the request is routed for, after any objective rewrite.
    pub target_model: String,
    pub data: RequestData,
    pub headers: HashMap<String, String>,
}

/// Response metadata handed to post-response plugins.
#[derive(Debug, Clone)]
pub struct Response {
    pub request_id: String,
    pub headers: HashMap<String, String>,
}

/// Identity and address of one backend replica.
#[derive(Debug, Clone, PartialEq)]
pub struct Pod {
    pub namespaced_name: ReplicaId,
    pub address: String,
}

/// Load metrics scraped from a replica. Cloned into per-cycle snapshots.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetricsSnapshot {
    pub waiting_queue_size: usize,
    pub running_queue_size: usize,
    pub kv_cache_usage: f64,
}

/// Deep-cloned `(identity, address, metrics)` tuple taken at scheduling-cycle
/// start; immutable for the cycle.
#[derive(Debug, Clone)]
pub struct PodSnapshot {
    pub pod: Pod,
    pub metrics: MetricsSnapshot,
}

/// Ranked pods produced by one scheduling profile.
#[derive(Debug, Clone)]
pub struct ProfileRunResult {
    pub target_pods: Vec<PodSnapshot>,
}

/// Outcome of a scheduling cycle. The primary profile's first pod is the
/// dispatch target.
#[derive(Debug, Clone)]
pub struct SchedulingResult {
    pub primary_profile_name: String,
    pub profile_results: HashMap<String, ProfileRunResult>,
}

impl SchedulingResult {
    /// The primary profile's result, if the scheduler produced one.
    pub fn primary_result(&self) -> Option<&ProfileRunResult> {
        self.profile_results.get(&self.primary_profile_name)
    }

    /// The dispatch target: first pod of the primary profile.
    pub fn primary_target_pod(&self) -> Option<&PodSnapshot> {
        self.primary_result()?.target_pods.first()
    }
}
