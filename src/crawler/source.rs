//! Document sources
//!
//! A `DocumentSource` performs one request and classifies the answer. It does
//! no rate limiting and no retrying; the executor layers both on top.

use crate::config::UserAgentConfig;
use reqwest::{redirect::Policy, Client, StatusCode};
use std::future::Future;
use std::time::Duration;

/// Classified answer to a single request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceResponse {
    /// 2xx with the response body
    Ok(String),

    /// 404
    NotFound,

    /// 429
    RateLimited,

    /// 5xx
    ServerError(u16),

    /// Any other 4xx (or unexpected status)
    ClientError(u16),

    /// Connection failure, timeout or unreadable body
    Network(String),
}

impl SourceResponse {
    /// Short human readable form for logs and error messages
    pub fn describe(&self) -> String {
        match self {
            Self::Ok(_) => "ok".to_string(),
            Self::NotFound => "not found (404)".to_string(),
            Self::RateLimited => "rate limited (429)".to_string(),
            Self::ServerError(code) => format!("server error ({})", code),
            Self::ClientError(code) => format!("client error ({})", code),
            Self::Network(error) => format!("network error: {}", error),
        }
    }

    /// Maps an HTTP status to a response class; the body is only used on 2xx
    pub fn from_status(status: StatusCode, body: impl FnOnce() -> String) -> Self {
        match status.as_u16() {
            200..=299 => Self::Ok(body()),
            404 => Self::NotFound,
            429 => Self::RateLimited,
            500..=599 => Self::ServerError(status.as_u16()),
            code => Self::ClientError(code),
        }
    }
}

/// Performs requests against the remote
pub trait DocumentSource: Send + Sync + 'static {
    fn get(&self, locator: &str) -> impl Future<Output = SourceResponse> + Send;
}

/// Builds an HTTP client with proper configuration
///
/// # Arguments
///
/// * `config` - The user agent configuration
///
/// # Returns
///
/// * `Ok(Client)` - Successfully built HTTP client
/// * `Err(reqwest::Error)` - Failed to build client
///
/// # Example
///
/// ```no_run
/// use crag_harvest::config::UserAgentConfig;
/// use crag_harvest::crawler::build_http_client;
///
/// let config = UserAgentConfig {
///     crawler_name: "CragHarvest".to_string(),
///     crawler_version: "1.0".to_string(),
///     contact_url: "https://example.com/about".to_string(),
///     contact_email: "admin@example.com".to_string(),
/// };
///
/// let client = build_http_client(&config).unwrap();
/// ```
pub fn build_http_client(config: &UserAgentConfig) -> Result<Client, reqwest::Error> {
    // Format: HarvesterName/Version (+ContactURL; ContactEmail)
    let user_agent = format!(
        "{}/{} (+{}; {})",
        config.crawler_name, config.crawler_version, config.contact_url, config.contact_email
    );

    Client::builder()
        .user_agent(user_agent)
        .timeout(Duration::from_secs(30))
        .connect_timeout(Duration::from_secs(10))
        .redirect(Policy::limited(10))
        .gzip(true)
        .brotli(true)
        .build()
}

/// `DocumentSource` backed by a reqwest client
#[derive(Debug, Clone)]
pub struct HttpSource {
    client: Client,
}

impl HttpSource {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    pub fn from_config(config: &UserAgentConfig) -> Result<Self, reqwest::Error> {
        Ok(Self::new(build_http_client(config)?))
    }
}

impl DocumentSource for HttpSource {
    async fn get(&self, locator: &str) -> SourceResponse {
        let response = match self.client.get(locator).send().await {
            Ok(response) => response,
            Err(e) => return SourceResponse::Network(classify_network_error(&e)),
        };

        let status = response.status();
        if !status.is_success() {
            return SourceResponse::from_status(status, String::new);
        }

        match response.text().await {
            Ok(body) => SourceResponse::Ok(body),
            Err(e) => SourceResponse::Network(format!("failed to read body: {}", e)),
        }
    }
}

fn classify_network_error(error: &reqwest::Error) -> String {
    if error.is_timeout() {
        format!("timeout: {}", error)
    } else if error.is_connect() {
        format!("connection failed: {}", error)
    } else if error.is_redirect() {
        format!("redirect error: {}", error)
    } else {
        error.to_string()
    }
}
