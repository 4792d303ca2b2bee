use anyhow::{Result, bail};
use std::collections::HashMap;
use tokio::sync::mpsc;

use crate::domain::requests::MarketRequest;

/// Routes typed requests to the tracker owning the named market.
///
/// Responses travel back on the single-shot channel inside each request,
/// so the bus itself never holds tracker state.
#[derive(Debug, Clone, Default)]
pub struct RequestBus {
    routes: HashMap<String, mpsc::Sender<MarketRequest>>,
}

impl RequestBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_route(&mut self, market: impl Into<String>, tx: mpsc::Sender<MarketRequest>) {
        self.routes.insert(market.into(), tx);
    }

    pub fn markets(&self) -> Vec<String> {
        self.routes.keys().cloned().collect()
    }

    pub async fn route(&self, request: MarketRequest) -> Result<()> {
        let market = request.market().to_string();
        let Some(tx) = self.routes.get(&market) else {
            bail!("no tracker registered for market '{market}'");
        };
        if tx.send(request).await.is_err() {
            bail!("tracker for market '{market}' is gone");
        }
        Ok(())
    }
}
