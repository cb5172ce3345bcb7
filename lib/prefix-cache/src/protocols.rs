// SPDX-FileCopyrightText: Copyright (c) 2026 Flowgate Contributors
// SPDX-License-Identifier: Apache-2.0

//! Core types and the chained block hash.
//!
//! A prompt is split into fixed-size byte blocks; block i's hash covers the
//! block bytes plus the previous block's hash, so `h_i` identifies the whole
//! prefix up to block i rather than just the block content. The chain is
//! seeded with the target model name: different models never share prefix
//! entries even for identical prompts.

use serde::{Deserialize, Serialize};
use std::fmt;
use xxhash_rust::xxh64::Xxh64;

/// Hash of one prompt block, chained over all preceding blocks.
///
/// Opaque outside this crate: equality and hashing are the only operations
/// callers need.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BlockHash(pub u64);

/// Identity of one backend replica (pod), namespaced like a Kubernetes
/// object. Ordered lexicographically by `(namespace, name)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ReplicaId {
    pub namespace: String,
    pub name: String,
}

impl ReplicaId {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for ReplicaId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Compute the chained block hashes for a prompt's user-input bytes.
///
/// Rules, in order:
/// 1. Inputs shorter than `block_size` produce no hashes.
/// 2. Inputs longer than `block_size * max_blocks` are truncated to that
///    length; two long prompts sharing a prefix up to the limit are
///    indistinguishable.
/// 3. The chain seed is `xxh64(target_model)`.
/// 4. Block i covers bytes `[i*block_size, (i+1)*block_size)` and hashes
///    `xxh64(block_bytes || le_u64(h_{i-1}))`.
/// 5. A trailing partial block is discarded.
pub fn compute_block_hashes(
    input: &[u8],
    target_model: &str,
    block_size: usize,
    max_blocks: usize,
) -> Vec<BlockHash> {
    if block_size == 0 || input.len() < block_size {
        return Vec::new();
    }

    let limit = block_size.saturating_mul(max_blocks);
    let input = if input.len() > limit {
        &input[..limit]
    } else {
        input
    };

    let mut hashes = Vec::with_capacity(input.len() / block_size);
    let mut prev = {
        let mut h = Xxh64::new(0);
        h.update(target_model.as_bytes());
        h.digest()
    };

    for block in input.chunks_exact(block_size) {
        let mut h = Xxh64::new(0);
        h.update(block);
        h.update(&prev.to_le_bytes());
        prev = h.digest();
        hashes.push(BlockHash(prev));
    }

    hashes
}
