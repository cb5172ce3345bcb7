// SPDX-FileCopyrightText: Copyright (c) 2026 Flowgate Contributors
// SPDX-License-Identifier: Apache-2.0

//! Plugin framework: extension-point traits and shared plugin plumbing.
//!
//! Plugins are registered on the Director in construction order and invoked
//! sequentially. A plugin receives a framework [`PluginHandle`] at
//! construction time for lifecycle wiring and must not retain it afterwards.

pub mod prefix;
pub mod state;

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio_util::sync::CancellationToken;

use crate::protocols::{LLMRequest, PodSnapshot, ReplicaId, Response, SchedulingResult};

pub const PRE_REQUEST_EXTENSION_POINT: &str = "PreRequest";
pub const POST_RESPONSE_EXTENSION_POINT: &str = "PostResponse";

/// Type and instance name of a plugin, used for logging and metric labels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypedName {
    pub plugin_type: &'static str,
    pub name: String,
}

impl fmt::Display for TypedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.plugin_type, self.name)
    }
}

/// Construction-time handle a plugin factory receives from the framework.
/// Exposes the process lifecycle; plugins take what they need and drop the
/// handle.
pub struct PluginHandle {
    shutdown: CancellationToken,
}

impl PluginHandle {
    pub fn new(shutdown: CancellationToken) -> Self {
        Self { shutdown }
    }

    /// Token fired once at process shutdown.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }
}

/// Scratch state shared by plugins within a single scheduling cycle.
/// Dropped when the cycle ends.
#[derive(Default)]
pub struct CycleState {
    entries: DashMap<String, Arc<dyn Any + Send + Sync>>,
}

impl CycleState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn write(&self, key: impl Into<String>, data: Arc<dyn Any + Send + Sync>) {
        self.entries.insert(key.into(), data);
    }

    pub fn read<T: Send + Sync + 'static>(&self, key: &str) -> Option<Arc<T>> {
        self.entries
            .get(key)
            .and_then(|entry| Arc::clone(entry.value()).downcast::<T>().ok())
    }
}

/// Scores candidate pods during a scheduling cycle. Scores are in `[0, 1]`
/// and keyed by replica identity; the outer scheduler weighs them against
/// other scorers.
#[async_trait]
pub trait Scorer: Send + Sync {
    fn typed_name(&self) -> &TypedName;

    async fn score(
        &self,
        cycle_state: &CycleState,
        request: &LLMRequest,
        pods: &[PodSnapshot],
    ) -> HashMap<ReplicaId, f64>;
}

/// Invoked after a target pod is selected, before the verdict is returned
/// to the proxy.
#[async_trait]
pub trait PreRequest: Send + Sync {
    fn typed_name(&self) -> &TypedName;

    async fn pre_request(
        &self,
        request: &LLMRequest,
        scheduling_result: &SchedulingResult,
        target_port: u16,
    );
}

/// Invoked when the proxy reports the backend response.
#[async_trait]
pub trait PostResponse: Send + Sync {
    fn typed_name(&self) -> &TypedName;

    async fn post_response(
        &self,
        request: &LLMRequest,
        response: &Response,
        target_pod: Option<&crate::protocols::Pod>,
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_typed_name_display() {
        let name = TypedName {
            plugin_type: "prefix-cache-scorer",
            name: "my-scorer".into(),
        };
        assert_eq!(name.to_string(), "prefix-cache-scorer/my-scorer");
    }

    #[test]
    fn test_cycle_state_typed_round_trip() {
        let state = CycleState::new();
        state.write("weights", Arc::new(vec![1.0f64, 2.0]));

        let read: Arc<Vec<f64>> = state.read("weights").unwrap();
        assert_eq!(*read, vec![1.0, 2.0]);

        // Wrong type reads as absent.
        assert!(state.read::<String>("weights").is_none());
        assert!(state.read::<Vec<f64>>("missing").is_none());
    }
}
