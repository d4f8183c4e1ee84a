use crate::config::BitbucketConfig;
use crate::provider::{ProviderError, ProviderResult};
use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Method, Url};
use serde::de::DeserializeOwned;
use tracing::debug;

/// Status and body of a completed HTTP exchange. Non-2xx statuses are data
/// here, not errors; callers decide what each status means.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiResponse {
    pub status: u16,
    pub body: String,
}

impl ApiResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn json<T: DeserializeOwned>(&self) -> ProviderResult<T> {
        Ok(serde_json::from_str(&self.body)?)
    }
}

/// The four verbs resources need from the Bitbucket API. Paths are relative
/// to the API base URL; absolute URLs (pagination links) are also accepted.
#[async_trait]
pub trait ApiClient: Send + Sync {
    async fn get(&self, path: &str) -> ProviderResult<ApiResponse>;

    async fn post(&self, path: &str, body: Vec<u8>) -> ProviderResult<ApiResponse>;

    async fn put(&self, path: &str, body: Vec<u8>) -> ProviderResult<ApiResponse>;

    async fn delete(&self, path: &str) -> ProviderResult<ApiResponse>;
}

pub struct BitbucketClient {
    client: reqwest::Client,
    base_url: Url,
    config: BitbucketConfig,
}

impl BitbucketClient {
    pub fn new(config: BitbucketConfig) -> ProviderResult<Self> {
        config
            .validate()
            .map_err(|msg| ProviderError::InvalidConfig { message: msg })?;

        let base = if config.base_url.ends_with('/') {
            config.base_url.clone()
        } else {
            format!("{}/", config.base_url)
        };

        let base_url = Url::parse(&base).map_err(|e| ProviderError::InvalidConfig {
            message: format!("Invalid base URL {}: {}", config.base_url, e),
        })?;

        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| ProviderError::Unknown {
                message: format!("Failed to create HTTP client: {}", e),
            })?;

        Ok(Self {
            client,
            base_url,
            config,
        })
    }

    fn resolve(&self, path: &str) -> ProviderResult<Url> {
        if path.starts_with("http://") || path.starts_with("https://") {
            let url = Url::parse(path).map_err(|_| ProviderError::ForeignUrl {
                url: path.to_string(),
            })?;

            if url.origin() != self.base_url.origin()
                || !url.path().starts_with(self.base_url.path())
            {
                return Err(ProviderError::ForeignUrl {
                    url: path.to_string(),
                });
            }
            return Ok(url);
        }

        self.base_url
            .join(path.trim_start_matches('/'))
            .map_err(|e| ProviderError::InvalidConfig {
                message: format!("Cannot build URL from {}: {}", path, e),
            })
    }

    async fn send(
        &self,
        method: Method,
        path: &str,
        body: Option<Vec<u8>>,
    ) -> ProviderResult<ApiResponse> {
        let url = self.resolve(path)?;
        debug!("{} {}", method, url);

        let mut request = self.client.request(method, url);

        if let Some(credentials) = &self.config.credentials {
            request = request.basic_auth(&credentials.username, Some(&credentials.password));
        }

        if let Some(body) = body {
            request = request.header(CONTENT_TYPE, "application/json").body(body);
        }

        let response = request.send().await.map_err(Self::handle_http_error)?;
        let status = response.status().as_u16();
        let body = response.text().await.map_err(Self::handle_http_error)?;

        debug!("Response status {} ({} bytes)", status, body.len());
        Ok(ApiResponse { status, body })
    }

    fn handle_http_error(err: reqwest::Error) -> ProviderError {
        if err.is_timeout() {
            ProviderError::ServiceUnavailable {
                message: "Request timeout".to_string(),
            }
        } else if err.is_connect() {
            ProviderError::ServiceUnavailable {
                message: "Cannot connect to Bitbucket API".to_string(),
            }
        } else {
            ProviderError::Network(err)
        }
    }
}

#[async_trait]
impl ApiClient for BitbucketClient {
    async fn get(&self, path: &str) -> ProviderResult<ApiResponse> {
        self.send(Method::GET, path, None).await
    }

    async fn post(&self, path: &str, body: Vec<u8>) -> ProviderResult<ApiResponse> {
        self.send(Method::POST, path, Some(body)).await
    }

    async fn put(&self, path: &str, body: Vec<u8>) -> ProviderResult<ApiResponse> {
        self.send(Method::PUT, path, Some(body)).await
    }

    async fn delete(&self, path: &str) -> ProviderResult<ApiResponse> {
        self.send(Method::DELETE, path, None).await
    }
}
