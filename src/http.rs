// ABOUTME: Shared HTTP GET client for the config API and access probes.
// ABOUTME: Wraps one pooled reqwest client (rustls) with per-request timeouts.

use bytes::Bytes;
use std::time::Duration;

/// Errors from a single HTTP exchange.
#[derive(Debug, thiserror::Error)]
pub enum HttpError {
    #[error("invalid URL {url}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),

    #[error("failed to connect to {url}: {source}")]
    Connect {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("request to {url} timed out after {timeout:?}")]
    Timeout { url: String, timeout: Duration },

    #[error("HTTP exchange with {url} failed: {source}")]
    Exchange {
        url: String,
        #[source]
        source: reqwest::Error,
    },
}

#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub body: Bytes,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Cloneable handle to a pooled client; clones share connections.
#[derive(Debug, Clone)]
pub struct HttpClient {
    inner: reqwest::Client,
}

impl HttpClient {
    pub fn new() -> Result<Self, HttpError> {
        let inner = reqwest::Client::builder()
            .user_agent(concat!("storage-operator/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(HttpError::Client)?;
        Ok(Self { inner })
    }

    /// Issue a GET request and collect the full response body.
    pub async fn get(
        &self,
        url: &str,
        headers: &[(&str, String)],
        timeout: Duration,
    ) -> Result<HttpResponse, HttpError> {
        let parsed = reqwest::Url::parse(url).map_err(|e| HttpError::InvalidUrl {
            url: url.to_string(),
            reason: e.to_string(),
        })?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(HttpError::InvalidUrl {
                url: url.to_string(),
                reason: format!("unsupported scheme {}", parsed.scheme()),
            });
        }

        let mut request = self.inner.get(parsed).timeout(timeout);
        for (name, value) in headers {
            request = request.header(*name, value.as_str());
        }

        let classify = |source: reqwest::Error| classify(url, timeout, source);
        let response = request.send().await.map_err(classify)?;
        let status = response.status().as_u16();
        let body = response.bytes().await.map_err(classify)?;

        Ok(HttpResponse { status, body })
    }
}

fn classify(url: &str, timeout: Duration, source: reqwest::Error) -> HttpError {
    let url = url.to_string();
    if source.is_timeout() {
        HttpError::Timeout { url, timeout }
    } else if source.is_connect() {
        HttpError::Connect { url, source }
    } else {
        HttpError::Exchange { url, source }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn closed_port() -> u16 {
        // Bind then drop to get a port nothing listens on.
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    }

    #[tokio::test]
    async fn rejects_unsupported_scheme() {
        let client = HttpClient::new().unwrap();
        let err = client
            .get("ftp://example.com/", &[], Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, HttpError::InvalidUrl { .. }));

        let err = client
            .get("not a url", &[], Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, HttpError::InvalidUrl { .. }));
    }

    #[tokio::test]
    async fn https_urls_are_attempted() {
        let client = HttpClient::new().unwrap();
        let err = client
            .get(
                &format!("https://127.0.0.1:{}/volume/w1", closed_port()),
                &[],
                Duration::from_secs(2),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, HttpError::Connect { .. }));
    }

    #[tokio::test]
    async fn connection_refused_is_connect_error() {
        let client = HttpClient::new().unwrap();
        let err = client
            .get(
                &format!("http://127.0.0.1:{}/", closed_port()),
                &[],
                Duration::from_secs(2),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, HttpError::Connect { .. }));
    }

    #[test]
    fn success_range() {
        let ok = HttpResponse {
            status: 204,
            body: Bytes::new(),
        };
        let missing = HttpResponse {
            status: 404,
            body: Bytes::from_static(b"nope"),
        };
        assert!(ok.is_success());
        assert!(!missing.is_success());
        assert_eq!(missing.text(), "nope");
    }
}
