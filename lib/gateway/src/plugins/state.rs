// SPDX-FileCopyrightText: Copyright (c) 2026 Flowgate Contributors
// SPDX-License-Identifier: Apache-2.0

//! Ephemeral per-request plugin state.
//!
//! A plugin's score phase and dispatch phase run in the same worker but
//! cross plugin boundaries; this store decouples them without threading
//! typed state through the outer scheduler. Entries are keyed by
//! `(request_id, plugin type)` and follow single-writer-then-single-reader
//! discipline: every write is consumed by exactly one
//! [`read_and_delete`](PluginStateStore::read_and_delete). State stranded by
//! canceled requests is reclaimed when the lifecycle token fires.

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use tokio_util::sync::CancellationToken;

#[derive(Debug, thiserror::Error)]
pub enum StateStoreError {
    #[error("no state stored for request {request_id} under key {plugin_type}")]
    NotFound {
        request_id: String,
        plugin_type: String,
    },

    #[error("state stored for request {request_id} under key {plugin_type} has unexpected type")]
    WrongType {
        request_id: String,
        plugin_type: String,
    },
}

/// Process-wide store of per-request plugin state.
pub struct PluginStateStore {
    entries: DashMap<String, HashMap<&'static str, Arc<dyn Any + Send + Sync>>>,
}

impl PluginStateStore {
    /// Create a store bound to `lifecycle`: all remaining entries are
    /// dropped when the token fires, so state abandoned by canceled
    /// requests does not outlive shutdown.
    pub fn new(lifecycle: CancellationToken) -> Arc<Self> {
        let store = Arc::new(Self {
            entries: DashMap::new(),
        });

        let weak = Arc::downgrade(&store);
        tokio::spawn(async move {
            lifecycle.cancelled().await;
            if let Some(store) = weak.upgrade() {
                store.entries.clear();
            }
        });

        store
    }

    pub fn write(
        &self,
        request_id: &str,
        plugin_type: &'static str,
        data: Arc<dyn Any + Send + Sync>,
    ) {
        self.entries
            .entry(request_id.to_string())
            .or_default()
            .insert(plugin_type, data);
    }

    /// Typed read that leaves the entry in place.
    pub fn read<T: Send + Sync + 'static>(
        &self,
        request_id: &str,
        plugin_type: &str,
    ) -> Result<Arc<T>, StateStoreError> {
        let entry = self
            .entries
            .get(request_id)
            .and_then(|per_request| per_request.get(plugin_type).cloned())
            .ok_or_else(|| StateStoreError::NotFound {
                request_id: request_id.to_string(),
                plugin_type: plugin_type.to_string(),
            })?;

        entry
            .downcast::<T>()
            .map_err(|_| StateStoreError::WrongType {
                request_id: request_id.to_string(),
                plugin_type: plugin_type.to_string(),
            })
    }

    /// Typed read that removes every entry for `request_id`, whether or not
    /// the read succeeds. This is the dispatch-phase accessor: state must
    /// not leak past the request that produced it.
    pub fn read_and_delete<T: Send + Sync + 'static>(
        &self,
        request_id: &str,
        plugin_type: &str,
    ) -> Result<Arc<T>, StateStoreError> {
        let result = self.read(request_id, plugin_type);
        self.delete(request_id);
        result
    }

    /// Drop all state for `request_id`.
    pub fn delete(&self, request_id: &str) {
        self.entries.remove(request_id);
    }

    #[cfg(test)]
    pub(crate) fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
