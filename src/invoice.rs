//! Payment invoice API used to confirm PTC credit deposits.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

use crate::config::{HttpConfig, InvoiceConfig};
use crate::errors::{BatchError, BatchResult};

/// State reported for an invoice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvoiceStatus(pub i64);

impl InvoiceStatus {
    /// Status 2 (paid) and 3 (paid and confirmed) both settle a deposit.
    pub fn is_paid(&self) -> bool {
        matches!(self.0, 2 | 3)
    }
}

#[async_trait]
pub trait InvoiceApi: Send + Sync {
    async fn invoice_status(&self, invoice_hash: &str) -> BatchResult<InvoiceStatus>;
}

#[derive(Debug, Deserialize)]
struct InvoiceEnvelope {
    message: Option<InvoiceMessage>,
}

#[derive(Debug, Deserialize)]
struct InvoiceMessage {
    #[serde(default)]
    status: Value,
}

fn status_from(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// CryptoUnifier merchant API client.
#[derive(Debug, Clone)]
pub struct CryptoUnifierClient {
    http: Client,
    url: String,
    merchant_key: String,
    secret_key: String,
}

impl CryptoUnifierClient {
    pub fn new(invoices: &InvoiceConfig, http: &HttpConfig) -> BatchResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(http.timeout_secs))
            .build()?;
        Ok(Self {
            http: client,
            url: invoices.api_url.clone(),
            merchant_key: invoices.merchant_key.clone(),
            secret_key: invoices.secret_key.clone(),
        })
    }
}

#[async_trait]
impl InvoiceApi for CryptoUnifierClient {
    async fn invoice_status(&self, invoice_hash: &str) -> BatchResult<InvoiceStatus> {
        debug!(invoice_hash, "Querying invoice status");

        let resp = self
            .http
            .get(&self.url)
            .query(&[("invoice_hash", invoice_hash)])
            .header("X-Merchant-Key", &self.merchant_key)
            .header("X-Secret-Key", &self.secret_key)
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(BatchError::UpstreamMissing(format!(
                "invoice lookup answered with HTTP status {}",
                resp.status()
            )));
        }

        let body: InvoiceEnvelope = resp.json().await.map_err(|e| {
            BatchError::UpstreamMissing(format!("failed to parse invoice response: {e}"))
        })?;

        body.message
            .as_ref()
            .and_then(|m| status_from(&m.status))
            .map(InvoiceStatus)
            .ok_or_else(|| BatchError::UpstreamMissing("invoice status missing".to_string()))
    }
}
