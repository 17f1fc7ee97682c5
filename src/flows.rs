//! Per-client flow contexts.
//!
//! Each client gets its own [`ScoutRateAdaptation`], shared by the feedback
//! threads and the sender thread of that client. Workers are handed the
//! table (or the `Arc` for their flow) when they are spawned and look flows
//! up by client id.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::info;

use crate::scout::{ScoutConfig, ScoutRateAdaptation};
use crate::{Error, LossView, RateSet};

/// Identifier of a client station.
pub type ClientId = u32;

/// Concurrent map from client to its rate adaptation context.
#[derive(Debug, Default)]
pub struct FlowTable {
    flows: RwLock<HashMap<ClientId, Arc<ScoutRateAdaptation>>>,
}

impl FlowTable {
    /// Empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create and register a context for `client`, replacing any existing one.
    pub fn register(
        &self,
        client: ClientId,
        rates: RateSet,
        config: ScoutConfig,
    ) -> Result<Arc<ScoutRateAdaptation>, Error> {
        let flow = Arc::new(ScoutRateAdaptation::new(rates, config)?);
        self.flows.write().insert(client, Arc::clone(&flow));
        info!(client, rates = %flow.rates(), "flow registered");
        Ok(flow)
    }

    /// Context for `client`, or [`Error::UnknownClient`].
    pub fn get(&self, client: ClientId) -> Result<Arc<ScoutRateAdaptation>, Error> {
        self.flows
            .read()
            .get(&client)
            .cloned()
            .ok_or(Error::UnknownClient(client))
    }

    /// Drop the table's reference to a flow. Workers holding the `Arc` keep it alive.
    pub fn remove(&self, client: ClientId) -> Option<Arc<ScoutRateAdaptation>> {
        let removed = self.flows.write().remove(&client);
        if removed.is_some() {
            info!(client, "flow removed");
        }
        removed
    }

    /// Number of registered clients.
    pub fn len(&self) -> usize {
        self.flows.read().len()
    }

    /// True when no client is registered.
    pub fn is_empty(&self) -> bool {
        self.flows.read().is_empty()
    }

    /// Registered clients in ascending order.
    pub fn clients(&self) -> Vec<ClientId> {
        let mut clients: Vec<ClientId> = self.flows.read().keys().copied().collect();
        clients.sort_unstable();
        clients
    }

    /// Throughput estimate from the client's back feedback, in tenths of Mbps.
    ///
    /// `Ok(None)` while no rate has a loss estimate yet.
    pub fn throughput_report(&self, client: ClientId) -> Result<Option<f64>, Error> {
        Ok(self.get(client)?.throughput_estimate(LossView::Back))
    }
}
