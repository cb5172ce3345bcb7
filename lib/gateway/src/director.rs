// SPDX-FileCopyrightText: Copyright (c) 2026 Flowgate Contributors
// SPDX-License-Identifier: Apache-2.0

//! The Director orchestrates the request lifecycle: parse, admit, schedule,
//! and prepare, in that fixed order. It owns no policy of its own beyond
//! priority-aware admission; scoring and target selection belong to the
//! scheduler and its plugins.
//!
//! Every entry point takes the request context by mutable borrow, so the
//! caller retains the (possibly partially populated) context on error
//! paths; downstream error handling needs it.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use derive_builder::Builder;
use rand::Rng;
use serde_json::{Map, Value};

use crate::backend::{Datastore, InferenceObjective, all_pods};
use crate::error::GatewayError;
use crate::extract::extract_request_data;
use crate::metrics::PLUGIN_METRICS;
use crate::plugins::{
    POST_RESPONSE_EXTENSION_POINT, PRE_REQUEST_EXTENSION_POINT, PostResponse, PreRequest,
};
use crate::protocols::{
    LLMRequest, Pod, PodSnapshot, REQUEST_ID_HEADER, Response, SchedulingResult,
};

/// Request-metadata namespace carrying endpoint-subset hints from the proxy.
pub const SUBSET_FILTER_NAMESPACE: &str = "envoy.lb.subset_hint";
/// Key under the subset namespace listing permitted `"addr:port"` endpoints.
pub const SUBSET_FILTER_KEY: &str = "x-gateway-destination-endpoint-subset";

/// Interface required by the Director for scheduling.
#[async_trait]
pub trait Scheduler: Send + Sync {
    async fn schedule(
        &self,
        request: &LLMRequest,
        candidate_pods: Vec<PodSnapshot>,
    ) -> anyhow::Result<SchedulingResult>;
}

/// Signal indicating whether the backends are considered saturated.
#[async_trait]
pub trait SaturationDetector: Send + Sync {
    async fn is_saturated(&self) -> bool;
}

/// The request as delivered by the proxy: decoded JSON body, headers, and
/// proxy-level metadata.
#[derive(Debug, Clone, Default)]
pub struct IncomingRequest {
    pub body: Map<String, Value>,
    pub headers: HashMap<String, String>,
    pub metadata: Map<String, Value>,
}

#[derive(Debug, Clone, Default)]
pub struct IncomingResponse {
    pub headers: HashMap<String, String>,
}

/// Mutable state threaded through one request's lifecycle. Populated
/// incrementally; fields already set remain valid on error paths.
#[derive(Default)]
pub struct RequestContext {
    pub request: IncomingRequest,
    pub response: IncomingResponse,
    /// Key used to resolve the request's objective from the datastore.
    pub objective_key: String,
    pub fairness_id: String,
    pub incoming_model_name: String,
    /// When preset (e.g. by an objective's model rewrite), overrides the
    /// incoming model; the body is rewritten to match.
    pub target_model_name: String,
    pub scheduling_request: Option<LLMRequest>,
    pub target_pod: Option<Pod>,
    /// Comma-joined `addr:port` endpoints of the primary profile's pods;
    /// index 0 is the selected pod.
    pub target_endpoint: String,
}

impl RequestContext {
    pub fn new(request: IncomingRequest) -> Self {
        Self {
            request,
            ..Default::default()
        }
    }
}

#[derive(Default, Builder)]
#[builder(pattern = "owned", default)]
pub struct DirectorConfig {
    pub pre_request_plugins: Vec<Arc<dyn PreRequest>>,
    pub post_response_plugins: Vec<Arc<dyn PostResponse>>,
}

pub struct Director {
    datastore: Arc<dyn Datastore>,
    scheduler: Arc<dyn Scheduler>,
    saturation_detector: Arc<dyn SaturationDetector>,
    pre_request_plugins: Vec<Arc<dyn PreRequest>>,
    post_response_plugins: Vec<Arc<dyn PostResponse>>,
    /// Applied when the objective catalog has no entry or leaves the
    /// priority unset.
    default_priority: i32,
}

impl Director {
    pub fn new(
        datastore: Arc<dyn Datastore>,
        scheduler: Arc<dyn Scheduler>,
        saturation_detector: Arc<dyn SaturationDetector>,
        config: DirectorConfig,
    ) -> Self {
        Self {
            datastore,
            scheduler,
            saturation_detector,
            pre_request_plugins: config.pre_request_plugins,
            post_response_plugins: config.post_response_plugins,
            default_priority: 0,
        }
    }

    /// Orchestrates the request lifecycle:
    /// 1. Parses request details and resolves the target model.
    /// 2. Admits or sheds against priority and the saturation signal.
    /// 3. Schedules across the candidate pods.
    /// 4. Prepares the routing verdict and runs PreRequest plugins.
    pub async fn handle_request(&self, ctx: &mut RequestContext) -> Result<(), GatewayError> {
        // --- 1. Parse request, resolve target model, determine priority ---
        let incoming_model = match ctx.request.body.get("model").and_then(Value::as_str) {
            Some(model) if !model.is_empty() => model.to_string(),
            _ => {
                return Err(GatewayError::BadRequest(
                    "model not found in request body".to_string(),
                ));
            }
        };
        ctx.incoming_model_name = incoming_model.clone();
        if ctx.target_model_name.is_empty() {
            ctx.target_model_name = incoming_model;
        }
        // Downstream consumers receive the rewritten model.
        ctx.request.body.insert(
            "model".to_string(),
            Value::String(ctx.target_model_name.clone()),
        );

        let request_data = extract_request_data(&ctx.request.body)
            .map_err(|err| GatewayError::BadRequest(format!("failed to extract request data: {err}")))?;

        let objective = self
            .datastore
            .objective_get(&ctx.objective_key)
            .unwrap_or_else(|| {
                tracing::debug!(
                    objective_key = %ctx.objective_key,
                    "no associated objective found, using default"
                );
                InferenceObjective::default()
            });
        let priority = objective.priority.unwrap_or(self.default_priority);

        let request = LLMRequest {
            request_id: ctx
                .request
                .headers
                .get(REQUEST_ID_HEADER)
                .cloned()
                .unwrap_or_default(),
            target_model: ctx.target_model_name.clone(),
            data: request_data,
            headers: ctx.request.headers.clone(),
        };
        tracing::debug!(
            objective_key = %ctx.objective_key,
            incoming_model_name = %ctx.incoming_model_name,
            target_model_name = %ctx.target_model_name,
            priority,
            "LLM request assembled"
        );
        ctx.scheduling_request = Some(request.clone());

        // --- 2. Admission control ---
        self.admit_request(priority, &ctx.fairness_id).await?;

        // --- 3. Schedule across the candidate pods ---
        let candidate_pods = self.candidate_pods(&ctx.request.metadata);
        if candidate_pods.is_empty() {
            return Err(GatewayError::ServiceUnavailable(
                "failed to find candidate pods for serving the request".to_string(),
            ));
        }
        let result = self
            .scheduler
            .schedule(&request, candidate_pods)
            .await
            .map_err(|err| {
                GatewayError::InferencePoolResourceExhausted(format!(
                    "failed to find target pod: {err}"
                ))
            })?;

        // --- 4. Populate the verdict and run PreRequest plugins ---
        self.prepare_request(ctx, &request, &result).await
    }

    /// Sheds negative-priority requests when the saturation detector
    /// reports pressure; everything else bypasses the check.
    async fn admit_request(&self, priority: i32, fairness_id: &str) -> Result<(), GatewayError> {
        tracing::trace!(priority, fairness_id, "entering flow control");

        if priority >= 0 {
            tracing::trace!("non-sheddable request bypassing saturation check");
            return Ok(());
        }

        if self.saturation_detector.is_saturated().await {
            return Err(GatewayError::InferencePoolResourceExhausted(
                "system saturated, sheddable request dropped".to_string(),
            ));
        }

        Ok(())
    }

    /// Candidate pods for the scheduling cycle. When the proxy attached an
    /// endpoint-subset hint, only pods whose address appears in the hint
    /// are considered; an explicitly empty hint filters out every pod.
    fn candidate_pods(&self, metadata: &Map<String, Value>) -> Vec<PodSnapshot> {
        let Some(subset_map) = metadata.get(SUBSET_FILTER_NAMESPACE).and_then(Value::as_object)
        else {
            return self.datastore.pod_list(&all_pods);
        };
        let Some(endpoints) = subset_map.get(SUBSET_FILTER_KEY).and_then(Value::as_array) else {
            return self.datastore.pod_list(&all_pods);
        };
        if endpoints.is_empty() {
            tracing::trace!("found empty subset filter in request metadata, filtering all pods");
            return Vec::new();
        }

        // Endpoints are "<address>:<port>"; only the address selects pods.
        let addresses: HashSet<&str> = endpoints
            .iter()
            .filter_map(Value::as_str)
            .map(|endpoint| endpoint.split(':').next().unwrap_or(endpoint))
            .collect();

        let filtered = self
            .datastore
            .pod_list(&|pod: &PodSnapshot| addresses.contains(pod.pod.address.as_str()));
        tracing::trace!(
            filtered_count = filtered.len(),
            "filtered candidate pods by subset filtering"
        );
        filtered
    }

    /// Populates the routing verdict from the primary profile and runs the
    /// PreRequest plugins.
    async fn prepare_request(
        &self,
        ctx: &mut RequestContext,
        request: &LLMRequest,
        result: &SchedulingResult,
    ) -> Result<(), GatewayError> {
        if result.profile_results.is_empty() {
            return Err(GatewayError::Internal(
                "results must be greater than zero".to_string(),
            ));
        }

        let pool = self
            .datastore
            .pool_get()
            .map_err(|err| GatewayError::Internal(err.to_string()))?;
        if pool.target_ports.len() != 1 {
            return Err(GatewayError::BadRequest(
                "targetPorts should have length 1".to_string(),
            ));
        }
        let target_port = pool.target_ports[0];

        let target_pods = result
            .primary_result()
            .map(|profile| profile.target_pods.as_slice())
            .unwrap_or_default();
        if target_pods.is_empty() {
            return Err(GatewayError::Internal(
                "primary profile has no target pods".to_string(),
            ));
        }

        let target_endpoints: Vec<String> = target_pods
            .iter()
            .map(|snapshot| join_host_port(&snapshot.pod.address, target_port))
            .collect();
        let endpoint = target_endpoints.join(",");

        tracing::debug!(
            objective_key = %ctx.objective_key,
            incoming_model_name = %ctx.incoming_model_name,
            target_model_name = %ctx.target_model_name,
            endpoint = %endpoint,
            "request handled"
        );

        ctx.target_pod = Some(target_pods[0].pod.clone());
        ctx.target_endpoint = endpoint;

        self.run_pre_request_plugins(request, result, target_port)
            .await;

        Ok(())
    }

    /// Builds the response record and runs PostResponse plugins.
    pub async fn handle_response(&self, ctx: &mut RequestContext) -> Result<(), GatewayError> {
        let response = Response {
            request_id: ctx
                .request
                .headers
                .get(REQUEST_ID_HEADER)
                .cloned()
                .unwrap_or_default(),
            headers: ctx.response.headers.clone(),
        };

        let Some(request) = ctx.scheduling_request.as_ref() else {
            tracing::warn!("response handled without a scheduling request, skipping plugins");
            return Ok(());
        };
        self.run_post_response_plugins(request, &response, ctx.target_pod.as_ref())
            .await;

        Ok(())
    }

    /// Uniform random pick over all pods; `None` when the datastore is
    /// empty.
    pub fn get_random_pod(&self) -> Option<Pod> {
        let pods = self.datastore.pod_list(&all_pods);
        if pods.is_empty() {
            return None;
        }
        let index = rand::rng().random_range(0..pods.len());
        Some(pods[index].pod.clone())
    }

    async fn run_pre_request_plugins(
        &self,
        request: &LLMRequest,
        scheduling_result: &SchedulingResult,
        target_port: u16,
    ) {
        for plugin in &self.pre_request_plugins {
            tracing::debug!(plugin = %plugin.typed_name(), "running pre-request plugin");
            let before = Instant::now();
            plugin
                .pre_request(request, scheduling_result, target_port)
                .await;
            PLUGIN_METRICS.observe(
                PRE_REQUEST_EXTENSION_POINT,
                plugin.typed_name().plugin_type,
                &plugin.typed_name().name,
                before.elapsed(),
            );
        }
    }

    async fn run_post_response_plugins(
        &self,
        request: &LLMRequest,
        response: &Response,
        target_pod: Option<&Pod>,
    ) {
        for plugin in &self.post_response_plugins {
            tracing::debug!(plugin = %plugin.typed_name(), "running post-response plugin");
            let before = Instant::now();
            plugin.post_response(request, response, target_pod).await;
            PLUGIN_METRICS.observe(
                POST_RESPONSE_EXTENSION_POINT,
                plugin.typed_name().plugin_type,
                &plugin.typed_name().name,
                before.elapsed(),
            );
        }
    }
}

/// Joins host and port, bracketing IPv6 literals.
fn join_host_port(host: &str, port: u16) -> String {
    if host.contains(':') {
        format!("[{host}]:{port}")
    } else {
        format!("{host}:{port}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::InferencePool;
    use crate::test_utils::{
        FirstPodScheduler, RecordingPostResponse, RecordingPreRequest, StaticDatastore,
        StaticSaturation, completions_body, pod_snapshot,
    };
    use serde_json::json;

    fn director_with(
        datastore: StaticDatastore,
        scheduler: Arc<dyn Scheduler>,
        saturated: bool,
        config: DirectorConfig,
    ) -> Director {
        Director::new(
            Arc::new(datastore),
            scheduler,
            Arc::new(StaticSaturation(saturated)),
            config,
        )
    }

    fn context(body: Map<String, Value>) -> RequestContext {
        let mut ctx = RequestContext::new(IncomingRequest {
            body,
            headers: HashMap::from([(REQUEST_ID_HEADER.to_string(), "req-1".to_string())]),
            metadata: Map::new(),
        });
        ctx.objective_key = "default-objective".to_string();
        ctx
    }

    #[tokio::test]
    async fn test_missing_model_is_bad_request() {
        let datastore = StaticDatastore::with_pods(vec![pod_snapshot("pod-a", "10.0.0.1")]);
        let director = director_with(
            datastore,
            Arc::new(FirstPodScheduler),
            false,
            DirectorConfig::default(),
        );

        for body in [json!({}), json!({"model": ""}), json!({"model": 7})] {
            let mut ctx = context(body.as_object().unwrap().clone());
            let err = director.handle_request(&mut ctx).await.unwrap_err();
            assert_eq!(err.to_string(), "model not found in request body");
            // The context survives the error path.
            assert!(ctx.scheduling_request.is_none());
        }
    }

    #[tokio::test]
    async fn test_happy_path_populates_verdict() {
        let datastore = StaticDatastore::with_pods(vec![
            pod_snapshot("pod-a", "10.0.0.1"),
            pod_snapshot("pod-b", "10.0.0.2"),
        ]);
        let pre = Arc::new(RecordingPreRequest::default());
        let config = DirectorConfigBuilder::default()
            .pre_request_plugins(vec![pre.clone() as Arc<dyn PreRequest>])
            .build()
            .unwrap();
        let director = director_with(datastore, Arc::new(FirstPodScheduler), false, config);

        let mut ctx = context(completions_body("m", "hello world"));
        director.handle_request(&mut ctx).await.unwrap();

        assert_eq!(ctx.incoming_model_name, "m");
        assert_eq!(ctx.target_model_name, "m");
        assert_eq!(ctx.target_endpoint, "10.0.0.1:8000");
        assert_eq!(ctx.target_pod.as_ref().unwrap().address, "10.0.0.1");

        let request = ctx.scheduling_request.as_ref().unwrap();
        assert_eq!(request.request_id, "req-1");
        assert_eq!(request.target_model, "m");

        // The PreRequest plugin observed the same request and port.
        let calls = pre.calls.lock().unwrap();
        assert_eq!(calls.as_slice(), &[("req-1".to_string(), 8000u16)]);
    }

    #[tokio::test]
    async fn test_target_model_override_rewrites_body() {
        let datastore = StaticDatastore::with_pods(vec![pod_snapshot("pod-a", "10.0.0.1")]);
        let director = director_with(
            datastore,
            Arc::new(FirstPodScheduler),
            false,
            DirectorConfig::default(),
        );

        let mut ctx = context(completions_body("public-name", "hello world"));
        ctx.target_model_name = "backend-name".to_string();
        director.handle_request(&mut ctx).await.unwrap();

        assert_eq!(ctx.incoming_model_name, "public-name");
        assert_eq!(
            ctx.request.body.get("model").and_then(Value::as_str),
            Some("backend-name")
        );
        assert_eq!(
            ctx.scheduling_request.as_ref().unwrap().target_model,
            "backend-name"
        );
    }

    #[tokio::test]
    async fn test_extract_failure_is_wrapped() {
        let datastore = StaticDatastore::with_pods(vec![pod_snapshot("pod-a", "10.0.0.1")]);
        let director = director_with(
            datastore,
            Arc::new(FirstPodScheduler),
            false,
            DirectorConfig::default(),
        );

        let body = json!({"model": "m", "prompt": 123});
        let mut ctx = context(body.as_object().unwrap().clone());
        let err = director.handle_request(&mut ctx).await.unwrap_err();
        assert!(err.to_string().starts_with("failed to extract request data:"));
        assert!(matches!(err, GatewayError::BadRequest(_)));
    }

    #[tokio::test]
    async fn test_sheddable_request_dropped_when_saturated() {
        let mut datastore = StaticDatastore::with_pods(vec![pod_snapshot("pod-a", "10.0.0.1")]);
        datastore.set_objective("shed-objective", Some(-1));
        let director = director_with(
            datastore,
            Arc::new(FirstPodScheduler),
            true,
            DirectorConfig::default(),
        );

        let mut ctx = context(completions_body("m", "hello world"));
        ctx.objective_key = "shed-objective".to_string();
        let err = director.handle_request(&mut ctx).await.unwrap_err();
        assert_eq!(
            err.to_string(),
            "system saturated, sheddable request dropped"
        );
        assert!(matches!(
            err,
            GatewayError::InferencePoolResourceExhausted(_)
        ));
        // The context is still populated up to the admission step.
        assert!(ctx.scheduling_request.is_some());
    }

    #[tokio::test]
    async fn test_sheddable_request_admitted_when_not_saturated() {
        let mut datastore = StaticDatastore::with_pods(vec![pod_snapshot("pod-a", "10.0.0.1")]);
        datastore.set_objective("shed-objective", Some(-1));
        let director = director_with(
            datastore,
            Arc::new(FirstPodScheduler),
            false,
            DirectorConfig::default(),
        );

        let mut ctx = context(completions_body("m", "hello world"));
        ctx.objective_key = "shed-objective".to_string();
        director.handle_request(&mut ctx).await.unwrap();
    }

    #[tokio::test]
    async fn test_unknown_objective_defaults_to_priority_zero() {
        // Saturated, but the default priority (0) bypasses the check.
        let datastore = StaticDatastore::with_pods(vec![pod_snapshot("pod-a", "10.0.0.1")]);
        let director = director_with(
            datastore,
            Arc::new(FirstPodScheduler),
            true,
            DirectorConfig::default(),
        );

        let mut ctx = context(completions_body("m", "hello world"));
        ctx.objective_key = "no-such-objective".to_string();
        director.handle_request(&mut ctx).await.unwrap();
    }

    #[tokio::test]
    async fn test_subset_filter_restricts_candidates() {
        let datastore = StaticDatastore::with_pods(vec![
            pod_snapshot("pod-a", "10.0.0.1"),
            pod_snapshot("pod-b", "10.0.0.2"),
        ]);
        let director = director_with(
            datastore,
            Arc::new(FirstPodScheduler),
            false,
            DirectorConfig::default(),
        );

        let mut ctx = context(completions_body("m", "hello world"));
        ctx.request.metadata = json!({
            SUBSET_FILTER_NAMESPACE: {
                SUBSET_FILTER_KEY: ["10.0.0.2:8080"],
            },
        })
        .as_object()
        .unwrap()
        .clone();

        director.handle_request(&mut ctx).await.unwrap();
        assert_eq!(ctx.target_pod.as_ref().unwrap().address, "10.0.0.2");
    }

    #[tokio::test]
    async fn test_empty_subset_filter_fails_service_unavailable() {
        let datastore = StaticDatastore::with_pods(vec![pod_snapshot("pod-a", "10.0.0.1")]);
        let director = director_with(
            datastore,
            Arc::new(FirstPodScheduler),
            false,
            DirectorConfig::default(),
        );

        let mut ctx = context(completions_body("m", "hello world"));
        ctx.request.metadata = json!({
            SUBSET_FILTER_NAMESPACE: { SUBSET_FILTER_KEY: [] },
        })
        .as_object()
        .unwrap()
        .clone();

        let err = director.handle_request(&mut ctx).await.unwrap_err();
        assert!(matches!(err, GatewayError::ServiceUnavailable(_)));
        assert!(err.to_string().starts_with("failed to find candidate pods"));
    }

    #[tokio::test]
    async fn test_malformed_subset_filter_falls_back_to_all_pods() {
        let datastore = StaticDatastore::with_pods(vec![pod_snapshot("pod-a", "10.0.0.1")]);
        let director = director_with(
            datastore,
            Arc::new(FirstPodScheduler),
            false,
            DirectorConfig::default(),
        );

        let mut ctx = context(completions_body("m", "hello world"));
        ctx.request.metadata = json!({ SUBSET_FILTER_NAMESPACE: "not-an-object" })
            .as_object()
            .unwrap()
            .clone();

        director.handle_request(&mut ctx).await.unwrap();
        assert_eq!(ctx.target_pod.as_ref().unwrap().address, "10.0.0.1");
    }

    #[tokio::test]
    async fn test_scheduler_failure_maps_to_resource_exhausted() {
        let datastore = StaticDatastore::with_pods(vec![pod_snapshot("pod-a", "10.0.0.1")]);
        let director = director_with(
            datastore,
            Arc::new(crate::test_utils::FailingScheduler),
            false,
            DirectorConfig::default(),
        );

        let mut ctx = context(completions_body("m", "hello world"));
        let err = director.handle_request(&mut ctx).await.unwrap_err();
        assert!(matches!(
            err,
            GatewayError::InferencePoolResourceExhausted(_)
        ));
        assert!(err.to_string().starts_with("failed to find target pod:"));
    }

    #[tokio::test]
    async fn test_multi_port_pool_is_rejected() {
        let mut datastore = StaticDatastore::with_pods(vec![pod_snapshot("pod-a", "10.0.0.1")]);
        datastore.set_pool(InferencePool {
            target_ports: vec![8000, 8001],
        });
        let director = director_with(
            datastore,
            Arc::new(FirstPodScheduler),
            false,
            DirectorConfig::default(),
        );

        let mut ctx = context(completions_body("m", "hello world"));
        let err = director.handle_request(&mut ctx).await.unwrap_err();
        assert_eq!(err.to_string(), "targetPorts should have length 1");
        assert!(matches!(err, GatewayError::BadRequest(_)));
    }

    #[tokio::test]
    async fn test_handle_response_runs_post_response_plugins() {
        let datastore = StaticDatastore::with_pods(vec![pod_snapshot("pod-a", "10.0.0.1")]);
        let post = Arc::new(RecordingPostResponse::default());
        let config = DirectorConfigBuilder::default()
            .post_response_plugins(vec![post.clone() as Arc<dyn PostResponse>])
            .build()
            .unwrap();
        let director = director_with(datastore, Arc::new(FirstPodScheduler), false, config);

        let mut ctx = context(completions_body("m", "hello world"));
        director.handle_request(&mut ctx).await.unwrap();

        ctx.response.headers = HashMap::from([("status".to_string(), "ok".to_string())]);
        director.handle_response(&mut ctx).await.unwrap();

        let calls = post.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        let (request_id, target_address) = &calls[0];
        assert_eq!(request_id, "req-1");
        assert_eq!(target_address.as_deref(), Some("10.0.0.1"));
    }

    #[tokio::test]
    async fn test_get_random_pod() {
        let empty = StaticDatastore::with_pods(Vec::new());
        let director = director_with(
            empty,
            Arc::new(FirstPodScheduler),
            false,
            DirectorConfig::default(),
        );
        assert!(director.get_random_pod().is_none());

        let datastore = StaticDatastore::with_pods(vec![
            pod_snapshot("pod-a", "10.0.0.1"),
            pod_snapshot("pod-b", "10.0.0.2"),
        ]);
        let director = director_with(
            datastore,
            Arc::new(FirstPodScheduler),
            false,
            DirectorConfig::default(),
        );
        let pod = director.get_random_pod().unwrap();
        assert!(["10.0.0.1", "10.0.0.2"].contains(&pod.address.as_str()));
    }

    /// Scheduler that consults the prefix scorer and picks the
    /// highest-scoring candidate.
    struct ScoringScheduler {
        scorer: Arc<crate::plugins::prefix::PrefixCachePlugin>,
    }

    #[async_trait]
    impl Scheduler for ScoringScheduler {
        async fn schedule(
            &self,
            request: &LLMRequest,
            candidate_pods: Vec<PodSnapshot>,
        ) -> anyhow::Result<SchedulingResult> {
            let cycle_state = crate::plugins::CycleState::new();
            let scores = crate::plugins::Scorer::score(
                self.scorer.as_ref(),
                &cycle_state,
                request,
                &candidate_pods,
            )
            .await;

            let target = candidate_pods
                .iter()
                .max_by(|a, b| {
                    let score_a = scores.get(&a.pod.namespaced_name).copied().unwrap_or(0.0);
                    let score_b = scores.get(&b.pod.namespaced_name).copied().unwrap_or(0.0);
                    score_a
                        .partial_cmp(&score_b)
                        .unwrap_or(std::cmp::Ordering::Equal)
                })
                .ok_or_else(|| anyhow::anyhow!("no candidates"))?;

            Ok(crate::test_utils::scheduling_result(target))
        }
    }

    #[tokio::test]
    async fn test_prefix_aware_routing_end_to_end() {
        use crate::plugins::prefix::{PrefixCacheConfig, PrefixCachePlugin};
        use crate::plugins::PluginHandle;
        use tokio_util::sync::CancellationToken;

        let handle = PluginHandle::new(CancellationToken::new());
        let scorer = Arc::new(PrefixCachePlugin::new(
            PrefixCacheConfig {
                hash_block_size: 64,
                max_prefix_blocks_to_match: 256,
                lru_capacity_per_server: 10,
            },
            &handle,
        ));

        let datastore = StaticDatastore::with_pods(vec![
            pod_snapshot("pod-a", "10.0.0.1"),
            pod_snapshot("pod-b", "10.0.0.2"),
        ]);
        let config = DirectorConfigBuilder::default()
            .pre_request_plugins(vec![scorer.clone() as Arc<dyn PreRequest>])
            .build()
            .unwrap();
        let director = director_with(
            datastore,
            Arc::new(ScoringScheduler {
                scorer: scorer.clone(),
            }),
            false,
            config,
        );

        // Cold start: every candidate scores zero and one is picked; the
        // PreRequest hook then indexes the prompt under that pod.
        let mut ctx = context(completions_body("m", &"a".repeat(128)));
        director.handle_request(&mut ctx).await.unwrap();
        let first_target = ctx.target_pod.clone().unwrap();

        // Identical request routes back to the warmed pod.
        let mut ctx = RequestContext::new(IncomingRequest {
            body: completions_body("m", &"a".repeat(128)),
            headers: HashMap::from([(REQUEST_ID_HEADER.to_string(), "req-2".to_string())]),
            metadata: Map::new(),
        });
        director.handle_request(&mut ctx).await.unwrap();
        assert_eq!(ctx.target_pod.unwrap(), first_target);
    }

    #[test]
    fn test_join_host_port_brackets_ipv6() {
        assert_eq!(join_host_port("10.0.0.1", 8000), "10.0.0.1:8000");
        assert_eq!(join_host_port("::1", 8000), "[::1]:8000");
        assert_eq!(join_host_port("fd00::2", 443), "[fd00::2]:443");
    }
}
