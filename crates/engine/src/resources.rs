// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Resource ledger: per-host consumption accounting.
//!
//! The ledger tracks only what is consumed; configured totals are always
//! read from the host passed in, so a config reload that resizes a host's
//! capacity takes effect on the very next reservation without any
//! migration step.

use cadence_core::Host;
use std::collections::HashMap;

#[derive(Debug, Default)]
pub struct ResourceLedger {
    /// host id -> resource kind -> quantity currently consumed.
    consumed: HashMap<String, HashMap<String, u32>>,
}

impl ResourceLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve `needs` on `host`, all or nothing.
    ///
    /// A kind the host does not configure has capacity zero. Forced
    /// reservations skip the capacity check but are still accounted, so
    /// a later release balances out.
    pub fn try_reserve(&mut self, host: &Host, needs: &HashMap<String, u32>, force: bool) -> bool {
        if needs.is_empty() {
            return true;
        }
        if !force {
            for (kind, quantity) in needs {
                let total = host.resources.get(kind).copied().unwrap_or(0);
                let used = self.consumed(&host.id, kind);
                // an overflowing need can never fit
                if used.checked_add(*quantity).map_or(true, |sum| sum > total) {
                    tracing::debug!(
                        host = %host.id,
                        kind = %kind,
                        needed = quantity,
                        used,
                        total,
                        "reservation refused"
                    );
                    return false;
                }
            }
        }
        let entry = self.consumed.entry(host.id.clone()).or_default();
        for (kind, quantity) in needs {
            let used = entry.entry(kind.clone()).or_default();
            *used = used.saturating_add(*quantity);
        }
        true
    }

    /// Release a previous reservation. Saturates at zero: if capacity was
    /// reconfigured mid-flight the ledger never goes negative.
    pub fn release(&mut self, host: &Host, needs: &HashMap<String, u32>) {
        if let Some(entry) = self.consumed.get_mut(&host.id) {
            for (kind, quantity) in needs {
                if let Some(used) = entry.get_mut(kind) {
                    *used = used.saturating_sub(*quantity);
                }
            }
        }
    }

    /// Quantity currently consumed on a host for one resource kind.
    pub fn consumed(&self, host_id: &str, kind: &str) -> u32 {
        self.consumed.get(host_id).and_then(|kinds| kinds.get(kind)).copied().unwrap_or(0)
    }
}

#[cfg(test)]
#[path = "resources_tests.rs"]
mod tests;
