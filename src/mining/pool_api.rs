//! Mining pool HTTP API.

use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

use crate::config::{HttpConfig, MiningConfig};
use crate::errors::{BatchError, BatchResult};
use crate::types::Coin;

/// Average hashrate of one worker.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct WorkerHashrate {
    #[serde(default)]
    pub worker: Option<String>,
    #[serde(default)]
    pub hashrate: f64,
}

/// Accepted shares of one worker.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct WorkerShares {
    #[serde(default)]
    pub worker: Option<String>,
    #[serde(default)]
    pub shares: f64,
}

/// Read access to the pool account that collects the miners' work.
#[async_trait]
pub trait PoolApi: Send + Sync {
    /// Average hashrate of the whole account over the last `hours`.
    async fn average_hashrate(&self, coin: Coin, wallet: &str, hours: u32) -> BatchResult<f64>;

    async fn worker_hashrates(
        &self,
        coin: Coin,
        wallet: &str,
        hours: u32,
    ) -> BatchResult<Vec<WorkerHashrate>>;

    async fn worker_shares(
        &self,
        coin: Coin,
        wallet: &str,
        hours: u32,
    ) -> BatchResult<Vec<WorkerShares>>;

    /// Unpaid balance of the account.
    async fn balance(&self, coin: Coin, wallet: &str) -> BatchResult<f64>;
}

#[derive(Debug, Deserialize)]
struct PoolEnvelope<T> {
    #[serde(default)]
    status: bool,
    data: Option<T>,
    #[serde(default)]
    error: Option<String>,
}

/// Nanopool-compatible JSON API client.
#[derive(Debug, Clone)]
pub struct NanopoolClient {
    http: Client,
    base_url: String,
}

impl NanopoolClient {
    pub fn new(mining: &MiningConfig, http: &HttpConfig) -> BatchResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(http.timeout_secs))
            .build()?;
        Ok(Self {
            http: client,
            base_url: mining.api_base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn fetch<T: DeserializeOwned>(&self, path: &str) -> BatchResult<T> {
        let url = format!("{}/{}", self.base_url, path);
        debug!(url = %url, "Querying pool API");

        let resp = self.http.get(&url).send().await?;

        if !resp.status().is_success() {
            return Err(BatchError::UpstreamMissing(format!(
                "{path} answered with HTTP status {}",
                resp.status()
            )));
        }

        let body: PoolEnvelope<T> = resp.json().await.map_err(|e| {
            BatchError::UpstreamMissing(format!("failed to parse {path} response: {e}"))
        })?;

        match body.data {
            Some(data) if body.status => Ok(data),
            _ => Err(BatchError::UpstreamMissing(format!(
                "{path}: {}",
                body.error.unwrap_or_else(|| "no data".to_string())
            ))),
        }
    }
}

#[async_trait]
impl PoolApi for NanopoolClient {
    async fn average_hashrate(&self, coin: Coin, wallet: &str, hours: u32) -> BatchResult<f64> {
        self.fetch(&format!("{coin}/avghashratelimited/{wallet}/{hours}"))
            .await
    }

    async fn worker_hashrates(
        &self,
        coin: Coin,
        wallet: &str,
        hours: u32,
    ) -> BatchResult<Vec<WorkerHashrate>> {
        self.fetch(&format!("{coin}/avghashrateworkers/{wallet}/{hours}"))
            .await
    }

    async fn worker_shares(
        &self,
        coin: Coin,
        wallet: &str,
        hours: u32,
    ) -> BatchResult<Vec<WorkerShares>> {
        self.fetch(&format!("{coin}/sharesperworker/{wallet}/{hours}"))
            .await
    }

    async fn balance(&self, coin: Coin, wallet: &str) -> BatchResult<f64> {
        self.fetch(&format!("{coin}/balance/{wallet}")).await
    }
}
