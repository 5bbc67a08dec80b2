use std::time::Duration;

use async_trait::async_trait;

use super::{DeliveryClient, DeliveryError};

/// Delivers batches with a JSON `POST` to the collector endpoint.
pub struct HttpDeliveryClient {
    client: reqwest::Client,
}

impl HttpDeliveryClient {
    pub fn new(timeout: Duration) -> Result<Self, DeliveryError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl DeliveryClient for HttpDeliveryClient {
    async fn send(&self, endpoint: &str, payload: String) -> Result<(), DeliveryError> {
        let response = self
            .client
            .post(endpoint)
            .header("Content-Type", "application/json")
            .body(payload)
            .send()
            .await?;

        let status = response.status();
        tracing::debug!("collector response: status={status}");

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(DeliveryError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(())
    }
}
