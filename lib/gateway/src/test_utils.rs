// SPDX-FileCopyrightText: Copyright (c) 2026 Flowgate Contributors
// SPDX-License-Identifier: Apache-2.0

//! Shared mock collaborators and builders for unit tests.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::{Map, Value, json};

use crate::backend::{Datastore, InferenceObjective, InferencePool};
use crate::director::{SaturationDetector, Scheduler};
use crate::plugins::{PostResponse, PreRequest, TypedName};
use crate::protocols::{
    CompletionsRequest, LLMRequest, MetricsSnapshot, Pod, PodSnapshot, ProfileRunResult,
    ReplicaId, RequestData, Response, SchedulingResult,
};

pub(crate) fn pod_snapshot(name: &str, address: &str) -> PodSnapshot {
    PodSnapshot {
        pod: Pod {
            namespaced_name: ReplicaId::new("default", name),
            address: address.to_string(),
        },
        metrics: MetricsSnapshot::default(),
    }
}

pub(crate) fn completions_body(model: &str, prompt: &str) -> Map<String, Value> {
    json!({"model": model, "prompt": prompt})
        .as_object()
        .unwrap()
        .clone()
}

pub(crate) fn llm_request(id: &str, model: &str, prompt: &str) -> LLMRequest {
    llm_request_with_data(
        id,
        model,
        RequestData::Completions(CompletionsRequest {
            prompt: prompt.to_string(),
        }),
    )
}

pub(crate) fn llm_request_with_data(id: &str, model: &str, data: RequestData) -> LLMRequest {
    LLMRequest {
        request_id: id.to_string(),
        target_model: model.to_string(),
        data,
        headers: HashMap::new(),
    }
}

/// A single-profile scheduling result selecting `target`.
pub(crate) fn scheduling_result(target: &PodSnapshot) -> SchedulingResult {
    SchedulingResult {
        primary_profile_name: "default".to_string(),
        profile_results: HashMap::from([(
            "default".to_string(),
            ProfileRunResult {
                target_pods: vec![target.clone()],
            },
        )]),
    }
}

/// In-memory datastore over a fixed pod set.
pub(crate) struct StaticDatastore {
    pods: Vec<PodSnapshot>,
    objectives: HashMap<String, InferenceObjective>,
    pool: InferencePool,
}

impl StaticDatastore {
    pub(crate) fn with_pods(pods: Vec<PodSnapshot>) -> Self {
        Self {
            pods,
            objectives: HashMap::new(),
            pool: InferencePool {
                target_ports: vec![8000],
            },
        }
    }

    pub(crate) fn set_objective(&mut self, key: &str, priority: Option<i32>) {
        self.objectives
            .insert(key.to_string(), InferenceObjective { priority });
    }

    pub(crate) fn set_pool(&mut self, pool: InferencePool) {
        self.pool = pool;
    }
}

impl Datastore for StaticDatastore {
    fn objective_get(&self, key: &str) -> Option<InferenceObjective> {
        self.objectives.get(key).cloned()
    }

    fn pod_list(&self, predicate: &dyn Fn(&PodSnapshot) -> bool) -> Vec<PodSnapshot> {
        self.pods
            .iter()
            .filter(|pod| predicate(pod))
            .cloned()
            .collect()
    }

    fn pool_get(&self) -> anyhow::Result<InferencePool> {
        Ok(self.pool.clone())
    }
}

/// Schedules every request onto the first candidate.
pub(crate) struct FirstPodScheduler;

#[async_trait]
impl Scheduler for FirstPodScheduler {
    async fn schedule(
        &self,
        _request: &LLMRequest,
        candidate_pods: Vec<PodSnapshot>,
    ) -> anyhow::Result<SchedulingResult> {
        let target = candidate_pods
            .first()
            .ok_or_else(|| anyhow::anyhow!("no candidates"))?;
        Ok(scheduling_result(target))
    }
}

pub(crate) struct FailingScheduler;

#[async_trait]
impl Scheduler for FailingScheduler {
    async fn schedule(
        &self,
        _request: &LLMRequest,
        _candidate_pods: Vec<PodSnapshot>,
    ) -> anyhow::Result<SchedulingResult> {
        anyhow::bail!("all workers busy")
    }
}

pub(crate) struct StaticSaturation(pub(crate) bool);

#[async_trait]
impl SaturationDetector for StaticSaturation {
    async fn is_saturated(&self) -> bool {
        self.0
    }
}

/// Records `(request_id, target_port)` per invocation.
#[derive(Default)]
pub(crate) struct RecordingPreRequest {
    pub(crate) calls: Mutex<Vec<(String, u16)>>,
}

#[async_trait]
impl PreRequest for RecordingPreRequest {
    fn typed_name(&self) -> &TypedName {
        static NAME: std::sync::LazyLock<TypedName> = std::sync::LazyLock::new(|| TypedName {
            plugin_type: "recording-pre-request",
            name: "recording-pre-request".to_string(),
        });
        &NAME
    }

    async fn pre_request(
        &self,
        request: &LLMRequest,
        _scheduling_result: &SchedulingResult,
        target_port: u16,
    ) {
        self.calls
            .lock()
            .unwrap()
            .push((request.request_id.clone(), target_port));
    }
}

/// Records `(request_id, target pod address)` per invocation.
#[derive(Default)]
pub(crate) struct RecordingPostResponse {
    pub(crate) calls: Mutex<Vec<(String, Option<String>)>>,
}

#[async_trait]
impl PostResponse for RecordingPostResponse {
    fn typed_name(&self) -> &TypedName {
        static NAME: std::sync::LazyLock<TypedName> = std::sync::LazyLock::new(|| TypedName {
            plugin_type: "recording-post-response",
            name: "recording-post-response".to_string(),
        });
        &NAME
    }

    async fn post_response(
        &self,
        _request: &LLMRequest,
        response: &Response,
        target_pod: Option<&Pod>,
    ) {
        self.calls.lock().unwrap().push((
            response.request_id.clone(),
            target_pod.map(|pod| pod.address.clone()),
        ));
    }
}
