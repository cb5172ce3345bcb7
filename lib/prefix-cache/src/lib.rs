// SPDX-FileCopyrightText: Copyright (c) 2026 Flowgate Contributors
// SPDX-License-Identifier: Apache-2.0

//! Prefix cache index - approximate per-replica KV cache state for routing.
//!
//! This crate provides the two building blocks a prefix-cache-aware router
//! needs: a model-seeded chained block hash over prompt bytes, and a bounded
//! index that tracks which backend replicas are likely to hold which prefix
//! blocks.

pub mod indexer;
pub mod protocols;

// Re-export key types for convenience
pub use indexer::PrefixCacheIndexer;
pub use protocols::{BlockHash, ReplicaId, compute_block_hashes};
