//! # Metric Collector Client
//!
//! Submits signed sensor metrics to the remote collector:
//!
//! ```text
//! POST {collector_url}/sensors/sm/create-sign
//! {"data": "0x<hex of {from,to,indicator,address} JSON>", "signed": "0x...",
//!  "isIotSign": true, "signAddress": "0x...", "sensorId": 1}
//! ```

use crate::error::IotError;
use crate::identity::Signer;
use crate::sensors::{Indicator, TimedIndicator};
use crate::util::hex::encode_prefixed;
use async_trait::async_trait;
use log::debug;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Receives every metric a sensor reports.
#[async_trait]
pub trait MetricPoster: Send + Sync {
    async fn post_metric(&self, sensor_id: u32, metric: &TimedIndicator) -> Result<(), IotError>;
}

/// The signed document, before hex encoding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricData {
    pub from: i64,
    pub to: i64,
    pub indicator: Indicator,
    pub address: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricPayload {
    pub data: String,
    pub signed: String,
    pub is_iot_sign: bool,
    pub sign_address: String,
    pub sensor_id: u32,
}

impl MetricPayload {
    /// Serializes and signs `metric` on behalf of `signer`.
    pub async fn build(
        signer: &dyn Signer,
        sensor_id: u32,
        metric: &TimedIndicator,
    ) -> Result<Self, IotError> {
        let address = signer.identity();
        let data = MetricData {
            from: metric.from,
            to: metric.to,
            indicator: metric.indicator.clone(),
            address: address.clone(),
        };
        let bytes = serde_json::to_vec(&data)?;
        let signed = signer.sign_message(&bytes).await?;

        Ok(MetricPayload {
            data: encode_prefixed(&bytes),
            signed,
            // Sensors sign with the appliance key.
            is_iot_sign: true,
            sign_address: address,
            sensor_id,
        })
    }
}

pub struct MetricClient {
    client: Client,
    base_url: String,
    signer: Arc<dyn Signer>,
}

impl MetricClient {
    pub fn new(base_url: impl Into<String>, signer: Arc<dyn Signer>) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();
        MetricClient {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            signer,
        }
    }

    pub fn endpoint(&self) -> String {
        format!("{}/sensors/sm/create-sign", self.base_url)
    }
}

#[async_trait]
impl MetricPoster for MetricClient {
    async fn post_metric(&self, sensor_id: u32, metric: &TimedIndicator) -> Result<(), IotError> {
        let payload = MetricPayload::build(self.signer.as_ref(), sensor_id, metric).await?;
        let response = self
            .client
            .post(self.endpoint())
            .json(&payload)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(IotError::Network(format!(
                "post metric for sensor {sensor_id}: {status} {body}"
            )));
        }
        debug!("Sensor {sensor_id}: metric accepted");
        Ok(())
    }
}
