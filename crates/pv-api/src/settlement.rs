//! Settlement service client

use async_trait::async_trait;
use tracing::debug;

use pv_core::{CancellationRecord, EngineError, EngineResult, SettlementNotifier};

/// Pushes persisted cancellation records to the payment-settlement service.
/// Delivery failures surface to the engine, which logs and moves on; the
/// record stays `pending` for the settlement service to pick up later.
pub struct HttpSettlementNotifier {
    client: reqwest::Client,
    url: String,
}

impl HttpSettlementNotifier {
    pub fn new(url: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            url,
        }
    }
}

#[async_trait]
impl SettlementNotifier for HttpSettlementNotifier {
    async fn submit(&self, record: &CancellationRecord) -> EngineResult<()> {
        self.client
            .post(&self.url)
            .json(record)
            .send()
            .await
            .and_then(|resp| resp.error_for_status())
            .map_err(|e| EngineError::Upstream {
                service: "settlement",
                detail: e.to_string(),
            })?;

        debug!(
            cancellation_id = %record.id,
            shipment_id = %record.shipment_id,
            "cancellation record submitted for settlement"
        );
        Ok(())
    }
}
