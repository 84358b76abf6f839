use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use log::info;

use crate::error::Error;
use crate::messages::IntentSpec;
use crate::RouterId;

/// A per-flow policy constraining path selection towards a destination.
#[derive(Debug, Clone)]
pub struct Intent {
    pub src: String,
    pub dst: String,
    pub min_bandwidth: Option<f64>,
    pub max_latency: Option<f64>,
    pub installed_at: DateTime<Utc>,
}

/// Intents keyed by (src, dst). Local to this router: intents are applied
/// where they are injected, never flooded.
#[derive(Debug, Default)]
pub struct IntentStore {
    by_key: BTreeMap<(String, String), Intent>,
}

impl IntentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install or replace an intent. An intent with no constraints is
    /// equivalent to no intent, so it clears the key instead. Returns
    /// whether the store changed (i.e. whether routes need recomputing).
    pub fn put(&mut self, spec: IntentSpec, now: DateTime<Utc>) -> Result<bool, Error> {
        if spec.src.is_empty() || spec.dst.is_empty() {
            return Err(Error::Intent("src and dst must be non-empty".to_string()));
        }
        for (name, v) in [("min_bandwidth", spec.min_bandwidth), ("max_latency", spec.max_latency)] {
            if let Some(v) = v {
                if !v.is_finite() || v < 0.0 {
                    return Err(Error::Intent(format!("{} must be non-negative, got {}", name, v)));
                }
            }
        }

        let key = (spec.src.clone(), spec.dst.clone());
        if spec.min_bandwidth.is_none() && spec.max_latency.is_none() {
            return Ok(self.by_key.remove(&key).is_some());
        }

        info!(
            "intent {} -> {}: min_bw={:?} max_latency={:?}",
            spec.src, spec.dst, spec.min_bandwidth, spec.max_latency
        );
        self.by_key.insert(
            key,
            Intent {
                src: spec.src,
                dst: spec.dst,
                min_bandwidth: spec.min_bandwidth,
                max_latency: spec.max_latency,
                installed_at: now,
            },
        );
        Ok(true)
    }

    pub fn delete(&mut self, src: &str, dst: &str) -> bool {
        self.by_key
            .remove(&(src.to_string(), dst.to_string()))
            .is_some()
    }

    pub fn list(&self) -> impl Iterator<Item = &Intent> {
        self.by_key.values()
    }

    pub fn is_empty(&self) -> bool {
        self.by_key.is_empty()
    }

    /// The intent governing routes towards `dest_router`, if any. Intent
    /// endpoints name either a router directly or an attached host that
    /// the `hosts` map resolves to its router. Ties (several intents
    /// resolving to the same router) go to the smallest (src, dst) key.
    pub fn for_destination<'a>(
        &'a self,
        dest_router: &str,
        hosts: &HashMap<String, RouterId>,
    ) -> Option<&'a Intent> {
        self.by_key
            .values()
            .find(|i| resolve(&i.dst, hosts) == dest_router)
    }
}

/// Resolve an endpoint name to a router id: through the host attachment
/// map if present, otherwise the name is taken to be a router id.
pub fn resolve<'a>(name: &'a str, hosts: &'a HashMap<String, RouterId>) -> &'a str {
    hosts.get(name).map(String::as_str).unwrap_or(name)
}
