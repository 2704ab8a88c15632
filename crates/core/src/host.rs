// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Hosts and clusters: execution targets.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A machine tasks can execute on, with its declared resource pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Host {
    pub id: String,
    pub hostname: String,
    /// Configured resource totals, kind -> quantity.
    pub resources: HashMap<String, u32>,
}

impl Host {
    pub fn new(id: impl Into<String>) -> Self {
        let id = id.into();
        Self { hostname: id.clone(), id, resources: HashMap::new() }
    }

    crate::setters! {
        into {
            hostname: String,
        }
        set {
            resources: HashMap<String, u32>,
        }
    }

    pub fn with_resource(mut self, kind: impl Into<String>, quantity: u32) -> Self {
        self.resources.insert(kind.into(), quantity);
        self
    }
}

/// Policy for picking the member host(s) of a cluster target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClusterBalancing {
    /// Use the first host (in configured list order) with sufficient resources.
    First,
    /// Fan out one instance per member host.
    Each,
}

crate::simple_display! {
    ClusterBalancing {
        First => "first",
        Each => "each",
    }
}

/// An ordered group of hosts addressed as one target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cluster {
    pub id: String,
    pub balancing: ClusterBalancing,
    /// Member host ids, in configured order.
    pub hosts: Vec<String>,
}

impl Cluster {
    pub fn new(id: impl Into<String>, balancing: ClusterBalancing) -> Self {
        Self { id: id.into(), balancing, hosts: Vec::new() }
    }

    pub fn with_host(mut self, host_id: impl Into<String>) -> Self {
        self.hosts.push(host_id.into());
        self
    }
}

#[cfg(test)]
#[path = "host_tests.rs"]
mod tests;