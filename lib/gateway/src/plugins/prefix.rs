// SPDX-FileCopyrightText: Copyright (c) 2026 Flowgate Contributors
// SPDX-License-Identifier: Apache-2.0

//! Prefix-cache scorer plugin.
//!
//! Scores each candidate replica by the fraction of the request's prompt
//! blocks it is believed to already hold, and records the routing decision
//! back into the [`PrefixCacheIndexer`] once the target is chosen. The
//! index is a deliberate approximation of remote KV-cache state: false
//! negatives cost one cold route, false positives would route to a replica
//! that already evicted the prefix, so sizing errs toward undercounting.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use flowgate_prefix_cache::{BlockHash, PrefixCacheIndexer, ReplicaId, compute_block_hashes};

use crate::metrics::PREFIX_CACHE_METRICS;
use crate::plugins::state::PluginStateStore;
use crate::plugins::{CycleState, PluginHandle, PreRequest, Scorer, TypedName};
use crate::protocols::{LLMRequest, PodSnapshot, RequestData, SchedulingResult};

pub const PREFIX_CACHE_PLUGIN_TYPE: &str = "prefix-cache-scorer";

/// vLLM's default token block is 16 tokens; a good guess of average
/// characters per token is 4.
pub const DEFAULT_HASH_BLOCK_SIZE: i64 = 64;
/// Two long requests sharing a prefix past this limit are indistinguishable.
/// Trades cache size and matching speed against matching accuracy.
pub const DEFAULT_MAX_PREFIX_BLOCKS: i64 = 256;
/// Approximates the per-replica KV block count: an 80GB HBM replica serving
/// a llama3-8B-class model retains roughly 500K cached tokens, or ~31K
/// blocks of 16 tokens.
pub const DEFAULT_LRU_CAPACITY_PER_SERVER: i64 = 31250;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields, default)]
pub struct PrefixCacheConfig {
    /// The prompt is hashed in blocks of this many bytes; shorter requests
    /// are not indexed. Used as given, even when non-positive (which
    /// disables hashing entirely).
    pub hash_block_size: i64,
    /// Maximum number of prefix blocks to match; input beyond the limit is
    /// ignored. Used as given, even when non-positive.
    pub max_prefix_blocks_to_match: i64,
    /// Per-replica capacity of the index. Non-positive values fall back to
    /// the default at construction.
    pub lru_capacity_per_server: i64,
}

impl Default for PrefixCacheConfig {
    fn default() -> Self {
        Self {
            hash_block_size: DEFAULT_HASH_BLOCK_SIZE,
            max_prefix_blocks_to_match: DEFAULT_MAX_PREFIX_BLOCKS,
            lru_capacity_per_server: DEFAULT_LRU_CAPACITY_PER_SERVER,
        }
    }
}

/// Per-request scoring state carried from the score phase to the dispatch
/// phase. For every `(replica -> k)` entry, the replica matched every one
/// of the first `k` prefix hashes at score time.
#[derive(Debug, Default)]
pub struct ScoringState {
    pub prefix_hashes: Vec<BlockHash>,
    pub prefix_cache_servers: HashMap<ReplicaId, usize>,
}

pub struct PrefixCachePlugin {
    typed_name: TypedName,
    config: PrefixCacheConfig,
    state: Arc<PluginStateStore>,
    indexer: PrefixCacheIndexer,
}

impl PrefixCachePlugin {
    pub fn new(config: PrefixCacheConfig, handle: &PluginHandle) -> Self {
        let capacity = if config.lru_capacity_per_server <= 0 {
            tracing::warn!(
                configured = config.lru_capacity_per_server,
                default = DEFAULT_LRU_CAPACITY_PER_SERVER,
                "lruCapacityPerServer is not positive, using default value"
            );
            DEFAULT_LRU_CAPACITY_PER_SERVER
        } else {
            config.lru_capacity_per_server
        };

        Self {
            typed_name: TypedName {
                plugin_type: PREFIX_CACHE_PLUGIN_TYPE,
                name: PREFIX_CACHE_PLUGIN_TYPE.to_string(),
            },
            config,
            state: PluginStateStore::new(handle.shutdown_token()),
            indexer: PrefixCacheIndexer::new(capacity as usize),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.typed_name.name = name.into();
        self
    }

    /// Factory for registration by name with raw JSON parameters. Missing
    /// parameters take defaults; unknown or ill-typed parameters fail.
    pub fn factory(
        name: &str,
        raw_parameters: Option<&serde_json::Value>,
        handle: &PluginHandle,
    ) -> anyhow::Result<Self> {
        let config = match raw_parameters {
            Some(raw) => serde_json::from_value(raw.clone()).with_context(|| {
                format!("failed to parse the parameters of the {PREFIX_CACHE_PLUGIN_TYPE} plugin")
            })?,
            None => PrefixCacheConfig::default(),
        };
        Ok(Self::new(config, handle).with_name(name))
    }

    /// Type and instance name, shared by both extension-point impls.
    pub fn typed_name(&self) -> &TypedName {
        &self.typed_name
    }

    fn block_size(&self) -> usize {
        usize::try_from(self.config.hash_block_size).unwrap_or(0)
    }

    fn max_blocks(&self) -> usize {
        usize::try_from(self.config.max_prefix_blocks_to_match).unwrap_or(0)
    }

    /// The bytes the backend sees as user input: the raw prompt for
    /// completions, the serialized `messages` array (and nothing else from
    /// the envelope) for chat completions. Chat messages serialize from the
    /// typed structs, so the byte form is deterministic per message content
    /// regardless of how the upstream body was formatted.
    fn user_input_bytes(request: &LLMRequest) -> Option<Vec<u8>> {
        match &request.data {
            RequestData::Completions(completions) => {
                Some(completions.prompt.as_bytes().to_vec())
            }
            RequestData::ChatCompletions(chat) => match serde_json::to_vec(&chat.messages) {
                Ok(bytes) => Some(bytes),
                Err(err) => {
                    tracing::debug!(%err, "failed to serialize chat messages for hashing");
                    None
                }
            },
        }
    }

    fn hash_request(&self, request: &LLMRequest) -> Vec<BlockHash> {
        let Some(input) = Self::user_input_bytes(request) else {
            return Vec::new();
        };
        compute_block_hashes(
            &input,
            &request.target_model,
            self.block_size(),
            self.max_blocks(),
        )
    }

    /// Longest-prefix walk over the index. Tracks the still-live replica
    /// set explicitly: a replica is credited for block i only if it matched
    /// every block before it, and the walk stops once no replica is live.
    fn match_longest_prefix(&self, hashes: &[BlockHash]) -> HashMap<ReplicaId, usize> {
        let mut matched: HashMap<ReplicaId, usize> = HashMap::new();
        let mut live: Option<HashSet<ReplicaId>> = None;

        for &hash in hashes {
            let replicas = self.indexer.get(hash);
            let still_live = match live {
                None => replicas,
                Some(previous) => previous
                    .into_iter()
                    .filter(|replica| replicas.contains(replica))
                    .collect(),
            };
            if still_live.is_empty() {
                break;
            }
            for replica in &still_live {
                *matched.entry(replica.clone()).or_default() += 1;
            }
            live = Some(still_live);
        }

        matched
    }

    #[cfg(test)]
    pub(crate) fn state_store(&self) -> &PluginStateStore {
        &self.state
    }
}

#[async_trait]
impl Scorer for PrefixCachePlugin {
    fn typed_name(&self) -> &TypedName {
        &self.typed_name
    }

    async fn score(
        &self,
        _cycle_state: &CycleState,
        request: &LLMRequest,
        pods: &[PodSnapshot],
    ) -> HashMap<ReplicaId, f64> {
        let hashes = self.hash_request(request);
        let state = Arc::new(ScoringState {
            prefix_cache_servers: self.match_longest_prefix(&hashes),
            prefix_hashes: hashes,
        });

        tracing::trace!(
            request_id = %request.request_id,
            total_blocks = state.prefix_hashes.len(),
            cached_servers = ?state.prefix_cache_servers,
            "longest prefix match computed"
        );

        self.state.write(
            &request.request_id,
            PREFIX_CACHE_PLUGIN_TYPE,
            Arc::clone(&state) as Arc<dyn std::any::Any + Send + Sync>,
        );

        let total = state.prefix_hashes.len();
        pods.iter()
            .map(|pod| {
                let score = if total == 0 {
                    0.0
                } else {
                    let match_len = state
                        .prefix_cache_servers
                        .get(&pod.pod.namespaced_name)
                        .copied()
                        .unwrap_or(0);
                    match_len as f64 / total as f64
                };
                (pod.pod.namespaced_name.clone(), score)
            })
            .collect()
    }
}

#[async_trait]
impl PreRequest for PrefixCachePlugin {
    fn typed_name(&self) -> &TypedName {
        &self.typed_name
    }

    async fn pre_request(
        &self,
        request: &LLMRequest,
        scheduling_result: &SchedulingResult,
        _target_port: u16,
    ) {
        let state = match self
            .state
            .read_and_delete::<ScoringState>(&request.request_id, PREFIX_CACHE_PLUGIN_TYPE)
        {
            Ok(state) => state,
            Err(err) => {
                tracing::error!(request_id = %request.request_id, %err, "failed to read prefix plugin state");
                return;
            }
        };

        let Some(target) = scheduling_result.primary_target_pod() else {
            tracing::error!(
                request_id = %request.request_id,
                "scheduling result carries no target pod for the primary profile"
            );
            return;
        };
        let server = target.pod.namespaced_name.clone();

        self.indexer.add(&state.prefix_hashes, &server);

        let total = state.prefix_hashes.len();
        let match_len = state
            .prefix_cache_servers
            .get(&server)
            .copied()
            .unwrap_or(0);
        PREFIX_CACHE_METRICS.record_match(
            match_len * self.block_size(),
            total * self.block_size(),
        );
    }
}
