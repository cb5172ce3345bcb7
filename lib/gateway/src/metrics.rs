// SPDX-FileCopyrightText: Copyright (c) 2026 Flowgate Contributors
// SPDX-License-Identifier: Apache-2.0

//! Prometheus metrics for the gateway core.
//!
//! Two metric families are owned here:
//!
//! - [`PrefixCacheMetrics`]: matched vs. queried prompt characters per
//!   dispatched request, observed by the prefix scorer's pre-request hook.
//! - [`PluginMetrics`]: per-invocation plugin latency histograms, observed
//!   by the Director around every extension-point call.
//!
//! Metrics are created once as statics and registered explicitly on the
//! caller's `prometheus::Registry` during service setup.

use std::sync::LazyLock;
use std::time::Duration;

use prometheus::{HistogramOpts, HistogramVec, IntCounter, Opts};

const NAME_PREFIX: &str = "flowgate";

/// Exponential buckets for plugin latency: from 1 µs to ~4 s, factor 4.
fn latency_buckets() -> Vec<f64> {
    prometheus::exponential_buckets(0.000001, 4.0, 12).expect("exponential buckets should not fail")
}

// ---------------------------------------------------------------------------
// Prefix cache match metrics (counters)
// ---------------------------------------------------------------------------

/// Running totals of how many prompt characters were already cached on the
/// selected replica versus how many were hashed at all. Their ratio is the
/// fleet-wide prefix-cache hit rate.
pub struct PrefixCacheMetrics {
    pub matched_chars: IntCounter,
    pub queried_chars: IntCounter,
}

impl PrefixCacheMetrics {
    /// Record one routing decision's cache match.
    pub fn record_match(&self, matched_chars: usize, total_chars: usize) {
        self.matched_chars.inc_by(matched_chars as u64);
        self.queried_chars.inc_by(total_chars as u64);
    }
}

pub static PREFIX_CACHE_METRICS: LazyLock<PrefixCacheMetrics> =
    LazyLock::new(|| PrefixCacheMetrics {
        matched_chars: IntCounter::with_opts(Opts::new(
            format!("{NAME_PREFIX}_prefix_cache_matched_chars_total"),
            "Prompt characters found in the selected replica's prefix cache",
        ))
        .expect("prefix_cache_matched_chars_total"),
        queried_chars: IntCounter::with_opts(Opts::new(
            format!("{NAME_PREFIX}_prefix_cache_queried_chars_total"),
            "Prompt characters queried against the prefix cache index",
        ))
        .expect("prefix_cache_queried_chars_total"),
    });

/// Register the prefix cache counters with the given Prometheus registry.
pub fn register_prefix_cache_metrics(
    registry: &prometheus::Registry,
) -> Result<(), prometheus::Error> {
    let m = &*PREFIX_CACHE_METRICS;
    registry.register(Box::new(m.matched_chars.clone()))?;
    registry.register(Box::new(m.queried_chars.clone()))?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Plugin processing latency (histogram)
// ---------------------------------------------------------------------------

/// Wall-clock latency of each plugin invocation, labeled by extension point
/// and plugin identity.
pub struct PluginMetrics {
    pub processing_latency: HistogramVec,
}

impl PluginMetrics {
    pub fn observe(
        &self,
        extension_point: &str,
        plugin_type: &str,
        plugin_name: &str,
        elapsed: Duration,
    ) {
        self.processing_latency
            .with_label_values(&[extension_point, plugin_type, plugin_name])
            .observe(elapsed.as_secs_f64());
    }
}

pub static PLUGIN_METRICS: LazyLock<PluginMetrics> = LazyLock::new(|| PluginMetrics {
    processing_latency: HistogramVec::new(
        HistogramOpts::new(
            format!("{NAME_PREFIX}_plugin_processing_seconds"),
            "Plugin processing latency per invocation in seconds",
        )
        .buckets(latency_buckets()),
        &["extension_point", "plugin_type", "plugin_name"],
    )
    .expect("plugin_processing_seconds"),
});

/// Register the plugin latency histogram with the given Prometheus registry.
pub fn register_plugin_metrics(registry: &prometheus::Registry) -> Result<(), prometheus::Error> {
    registry.register(Box::new(PLUGIN_METRICS.processing_latency.clone()))
}
