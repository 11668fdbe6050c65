use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;

use deskbox::{ProvisionError, Result};

/// Default timeout for sandbox API requests.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Shared HTTP client for the sandbox provider API. Owns the connection pool,
/// base URL, and API key. Clone is a cheap Arc refcount bump.
#[derive(Clone)]
pub struct HttpClient {
    inner: Arc<Inner>,
}

struct Inner {
    client: Client,
    api_url: String,
    api_key: String,
}

impl HttpClient {
    pub fn new(api_url: String, api_key: String) -> Result<Self> {
        let client = Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .map_err(|e| ProvisionError::Backend(format!("http client: {e}")))?;

        Ok(Self {
            inner: Arc::new(Inner {
                client,
                api_url: api_url.trim_end_matches('/').to_string(),
                api_key,
            }),
        })
    }

    /// Build an authenticated request. `path` is appended to the base URL
    /// (e.g. `/snapshots/osworld`).
    pub fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let url = format!("{}{path}", self.inner.api_url);
        self.inner
            .client
            .request(method, url)
            .bearer_auth(&self.inner.api_key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trailing_slash_is_normalized() {
        let http = HttpClient::new("https://api.example.com/".to_string(), "k".to_string())
            .unwrap();
        assert_eq!(http.inner.api_url, "https://api.example.com");
    }
}
