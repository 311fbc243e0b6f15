use std::time::Duration;

use brewsync_config::SquareConfig;
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use crate::error::{SquareError, SquareResult};

/// Connection settings for [`SquareClient`].
#[derive(Debug, Clone)]
pub struct SquareClientConfig {
    pub base_url: String,
    pub access_token: String,
    /// Sent as the `Square-Version` header.
    pub version: String,
    pub location_id: Option<String>,
    pub timeout_secs: u64,
}

impl SquareClientConfig {
    pub fn from_config(config: &SquareConfig, access_token: String) -> Self {
        Self {
            base_url: config.base_url(),
            access_token,
            version: config.version.clone(),
            location_id: config.location_id.clone().filter(|l| !l.is_empty()),
            timeout_secs: config.timeout_secs,
        }
    }
}

/// Thin JSON client for the Square REST API. Cheap to clone.
#[derive(Clone)]
pub struct SquareClient {
    http: Client,
    config: SquareClientConfig,
}

impl SquareClient {
    pub fn new(config: SquareClientConfig) -> SquareResult<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self { http, config })
    }

    pub fn location_id(&self) -> Option<&str> {
        self.config.location_id.as_deref()
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .bearer_auth(&self.config.access_token)
            .header("Square-Version", &self.config.version)
            .header("Accept", "application/json")
    }

    /// GET `path` with query parameters.
    pub async fn get<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> SquareResult<T> {
        debug!(path, "GET");
        let request = self.authorized(self.http.get(self.url(path)).query(query));
        self.send(path, request).await
    }

    /// POST a JSON body to `path`.
    pub async fn post<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> SquareResult<T> {
        debug!(path, "POST");
        let request = self.authorized(self.http.post(self.url(path)).json(body));
        self.send(path, request).await
    }

    async fn send<T: DeserializeOwned>(&self, path: &str, request: RequestBuilder) -> SquareResult<T> {
        let response = request.send().await?;
        let status = response.status();

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SquareError::Http {
                status: status.as_u16(),
                body,
            });
        }

        let bytes = response.bytes().await?;
        serde_json::from_slice(&bytes).map_err(|e| SquareError::Decode {
            path: path.to_string(),
            message: e.to_string(),
        })
    }
}
