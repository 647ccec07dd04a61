//! Shared reqwest plumbing for HTTP-backed adapters.

use std::time::Duration;

use reqwest::{RequestBuilder, Response, StatusCode, header};
use serde::Serialize;
use serde::de::DeserializeOwned;
use url::Url;

use crate::config::ProviderCredentials;
use crate::error::AdapterError;
use crate::telemetry;

const USER_AGENT: &str = concat!("leadintel/", env!("CARGO_PKG_VERSION"));
pub const REQUEST_ID_HEADER: &str = "X-Request-Id";

/// Authenticated JSON client bound to one provider's API base.
#[derive(Debug, Clone)]
pub struct ProviderHttpClient {
    provider: String,
    client: reqwest::Client,
    api_base: Url,
    api_key: String,
    timeout_ms: u64,
}

impl ProviderHttpClient {
    /// Build from the provider's credential map (`api_base`, `api_key`).
    pub fn from_credentials(
        provider: &str,
        credentials: &ProviderCredentials,
        timeout: Duration,
    ) -> Result<Self, AdapterError> {
        let api_base = credentials
            .get("api_base")
            .ok_or_else(|| AdapterError::permanent(provider, "missing api_base setting"))?;
        let api_key = credentials
            .get("api_key")
            .ok_or_else(|| AdapterError::permanent(provider, "missing api_key setting"))?;
        Self::new(provider, api_base, api_key, timeout)
    }

    pub fn new(
        provider: &str,
        api_base: &str,
        api_key: &str,
        timeout: Duration,
    ) -> Result<Self, AdapterError> {
        let mut api_base = Url::parse(api_base).map_err(|err| {
            AdapterError::permanent(provider, format!("invalid api_base '{api_base}': {err}"))
        })?;
        // Url::join drops the last path segment unless the base ends in '/'.
        if !api_base.path().ends_with('/') {
            let path = format!("{}/", api_base.path());
            api_base.set_path(&path);
        }
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|err| AdapterError::permanent(provider, format!("http client: {err}")))?;

        Ok(Self {
            provider: provider.to_string(),
            client,
            api_base,
            api_key: api_key.to_string(),
            timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url, AdapterError> {
        self.api_base
            .join(path.trim_start_matches('/'))
            .map_err(|err| AdapterError::permanent(&self.provider, format!("bad path {path}: {err}")))
    }

    fn authorize(&self, builder: RequestBuilder) -> RequestBuilder {
        let builder = builder
            .bearer_auth(&self.api_key)
            .header(header::ACCEPT, "application/json");
        match telemetry::current_trace_id() {
            Some(trace_id) => builder.header(REQUEST_ID_HEADER, trace_id),
            None => builder,
        }
    }

    /// GET a JSON document. `Ok(None)` on 404.
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<Option<T>, AdapterError> {
        let url = self.endpoint(path)?;
        let request = self.authorize(self.client.get(url).query(query));
        self.execute(request).await
    }

    /// POST a JSON body and decode the JSON response. `Ok(None)` on 404.
    pub async fn post_json<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<Option<T>, AdapterError> {
        let url = self.endpoint(path)?;
        let request = self.authorize(self.client.post(url).json(body));
        self.execute(request).await
    }

    async fn execute<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
    ) -> Result<Option<T>, AdapterError> {
        let response = request
            .send()
            .await
            .map_err(|err| self.classify_transport(err))?;
        self.decode(response).await
    }

    async fn decode<T: DeserializeOwned>(&self, response: Response) -> Result<Option<T>, AdapterError> {
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            let retry_after = parse_retry_after(response.headers());
            let body = response.text().await.unwrap_or_default();
            return Err(AdapterError::from_status(
                &self.provider,
                status.as_u16(),
                retry_after,
                &body,
            ));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|err| self.classify_transport(err))?;
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|err| AdapterError::malformed(&self.provider, err.to_string()))
    }

    fn classify_transport(&self, err: reqwest::Error) -> AdapterError {
        if err.is_timeout() {
            AdapterError::Timeout {
                provider: self.provider.clone(),
                timeout_ms: self.timeout_ms,
            }
        } else if err.is_decode() {
            AdapterError::malformed(&self.provider, err.to_string())
        } else if err.is_builder() {
            AdapterError::permanent(&self.provider, err.to_string())
        } else {
            AdapterError::transient(&self.provider, err.to_string())
        }
    }
}

fn parse_retry_after(headers: &header::HeaderMap) -> Option<u64> {
    headers
        .get(header::RETRY_AFTER)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse().ok())
}
