use reqwest::{Client, Method};
use serde::de::DeserializeOwned;

use crate::config::{TrackerConfig, USER_AGENT};
use crate::core::error::{AicmError, AicmResult};
use crate::modules::limits::models::{UsageLimitIn, UsageLimitOut};

/// Typed client for the limits management endpoints.
///
/// Deliberately thin: the delivery engine owns the ingestion path, this
/// client only covers the calls the limit lifecycle needs (fetching the
/// signed triggered-limits envelope and usage-limit CRUD).
pub struct CostManagerClient {
    client: Client,
    api_root: String,
    api_key: String,
}

impl CostManagerClient {
    pub fn new(config: &TrackerConfig) -> AicmResult<Self> {
        if config.api_key.is_empty() {
            return Err(AicmError::missing_configuration(
                "API key not provided. Set AICM_API_KEY or pass an explicit key",
            ));
        }
        let client = Client::builder().timeout(config.timeout).build()?;
        Ok(Self {
            client,
            api_root: config.api_root(),
            api_key: config.api_key.clone(),
        })
    }

    /// Fetch the current signed triggered-limits envelope. The server may
    /// return the envelope bare or wrapped in a `triggered_limits` key;
    /// callers normalize.
    pub async fn get_triggered_limits(&self) -> AicmResult<serde_json::Value> {
        self.request(Method::GET, "/triggered-limits", None::<&()>)
            .await
    }

    pub async fn list_usage_limits(&self) -> AicmResult<Vec<UsageLimitOut>> {
        self.request(Method::GET, "/usage-limits/", None::<&()>)
            .await
    }

    pub async fn create_usage_limit(&self, data: &UsageLimitIn) -> AicmResult<UsageLimitOut> {
        self.request(Method::POST, "/usage-limits/", Some(data))
            .await
    }

    pub async fn get_usage_limit(&self, limit_id: &str) -> AicmResult<UsageLimitOut> {
        self.request(
            Method::GET,
            &format!("/usage-limits/{limit_id}/"),
            None::<&()>,
        )
        .await
    }

    pub async fn update_usage_limit(
        &self,
        limit_id: &str,
        data: &UsageLimitIn,
    ) -> AicmResult<UsageLimitOut> {
        self.request(Method::PUT, &format!("/usage-limits/{limit_id}/"), Some(data))
            .await
    }

    pub async fn delete_usage_limit(&self, limit_id: &str) -> AicmResult<()> {
        let url = format!("{}/usage-limits/{}/", self.api_root, limit_id);
        let response = self
            .client
            .request(Method::DELETE, url)
            .bearer_auth(&self.api_key)
            .header(reqwest::header::USER_AGENT, USER_AGENT)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AicmError::api_request(status.as_u16(), &body));
        }
        Ok(())
    }

    async fn request<B: serde::Serialize, T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
    ) -> AicmResult<T> {
        let url = format!("{}{}", self.api_root, path);
        let mut builder = self
            .client
            .request(method, url)
            .bearer_auth(&self.api_key)
            .header(reqwest::header::USER_AGENT, USER_AGENT);
        if let Some(body) = body {
            builder = builder.json(body);
        }
        let response = builder.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AicmError::api_request(status.as_u16(), &body));
        }
        Ok(response.json().await?)
    }
}
