//! HTTP client construction and request plumbing.
//!
//! A fresh [`reqwest::Client`] is built per download so each one carries its
//! own proxy, authentication headers and timeout.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderName, HeaderValue, RANGE, RETRY_AFTER};
use reqwest::{Client, Method, Proxy};
use tracing::{debug, instrument};

use super::constants::CONNECT_TIMEOUT;
use super::error::DownloadError;
use super::options::{AuthConfig, DownloadOptions};
use crate::user_agent;

/// Builds configured HTTP clients for downloads.
#[derive(Debug, Clone, Copy, Default)]
pub struct HttpClientFactory;

impl HttpClientFactory {
    /// Creates a new factory.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Builds a client honoring the proxy, auth and timeout in `options`.
    ///
    /// # Errors
    ///
    /// Returns [`DownloadError::InvalidOptions`] if the proxy URL or an auth
    /// header cannot be represented, or if the client builder fails.
    #[instrument(level = "debug", skip(self, options), fields(url = %options.url))]
    pub fn create_client(&self, options: &DownloadOptions) -> Result<Client, DownloadError> {
        let mut builder = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT.min(options.timeout))
            .timeout(options.timeout)
            .user_agent(user_agent::default_download_user_agent());

        if let Some(proxy_config) = &options.proxy {
            let mut proxy = Proxy::all(proxy_config.url()).map_err(|e| {
                DownloadError::invalid_options(format!("invalid proxy {}: {e}", proxy_config.url()))
            })?;
            if let Some(username) = &proxy_config.username {
                proxy = proxy.basic_auth(username, proxy_config.password.as_deref().unwrap_or(""));
            }
            debug!(proxy = %proxy_config.url(), "routing through proxy");
            builder = builder.proxy(proxy);
        }

        if let Some(auth) = &options.auth {
            builder = builder.default_headers(auth_headers(auth)?);
        }

        builder
            .build()
            .map_err(|e| DownloadError::invalid_options(format!("failed to build HTTP client: {e}")))
    }
}

/// Converts an [`AuthConfig`] into default request headers.
fn auth_headers(auth: &AuthConfig) -> Result<HeaderMap, DownloadError> {
    let mut headers = HeaderMap::new();
    match auth {
        AuthConfig::Basic { username, password } => {
            let encoded = STANDARD.encode(format!("{username}:{password}"));
            headers.insert(AUTHORIZATION, sensitive_value(&format!("Basic {encoded}"))?);
        }
        AuthConfig::Bearer { token } => {
            headers.insert(AUTHORIZATION, sensitive_value(&format!("Bearer {token}"))?);
        }
        AuthConfig::ApiKey { header_name, key } => {
            headers.insert(header_name_for(header_name)?, sensitive_value(key)?);
        }
        AuthConfig::Custom { header_name, value } => {
            headers.insert(header_name_for(header_name)?, sensitive_value(value)?);
        }
    }
    Ok(headers)
}

fn header_name_for(name: &str) -> Result<HeaderName, DownloadError> {
    HeaderName::from_bytes(name.as_bytes())
        .map_err(|_| DownloadError::invalid_options(format!("invalid auth header name: {name}")))
}

fn sensitive_value(value: &str) -> Result<HeaderValue, DownloadError> {
    let mut header = HeaderValue::from_str(value)
        .map_err(|_| DownloadError::invalid_options("auth header value is not valid ASCII"))?;
    header.set_sensitive(true);
    Ok(header)
}

/// Formats a `Range` header value for `[start, end]`, open-ended when `end` is unknown.
#[must_use]
pub(crate) fn range_header(start: u64, end: Option<u64>) -> String {
    match end {
        Some(end) => format!("bytes={start}-{end}"),
        None => format!("bytes={start}-"),
    }
}

/// Sends a request and maps transport failures and error statuses.
///
/// Success covers every 2xx status; callers check for 206 where it matters.
pub(crate) async fn send_request(
    client: &Client,
    method: Method,
    url: &str,
    range: Option<&str>,
) -> Result<reqwest::Response, DownloadError> {
    let mut request = client.request(method, url);
    if let Some(range) = range {
        request = request.header(RANGE, range);
    }

    let response = request.send().await.map_err(|e| {
        if e.is_timeout() {
            DownloadError::timeout(url)
        } else {
            DownloadError::network(url, e)
        }
    })?;

    if !response.status().is_success() {
        let retry_after = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .map(std::string::ToString::to_string);
        return Err(DownloadError::http_status_with_retry_after(
            url,
            response.status().as_u16(),
            retry_after,
        ));
    }

    Ok(response)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::download::ProxyConfig;

    fn options() -> DownloadOptions {
        DownloadOptions::new("https://example.com/file.bin", "/tmp/file.bin")
    }

    #[test]
    fn test_range_header_closed_and_open() {
        assert_eq!(range_header(0, Some(249)), "bytes=0-249");
        assert_eq!(range_header(500, None), "bytes=500-");
    }

    #[test]
    fn test_basic_auth_header_is_base64_encoded() {
        let headers = auth_headers(&AuthConfig::Basic {
            username: "user".to_string(),
            password: "pass".to_string(),
        })
        .unwrap();
        assert_eq!(headers.get(AUTHORIZATION).unwrap(), "Basic dXNlcjpwYXNz");
        assert!(headers.get(AUTHORIZATION).unwrap().is_sensitive());
    }

    #[test]
    fn test_bearer_auth_header() {
        let headers = auth_headers(&AuthConfig::Bearer {
            token: "t0k3n".to_string(),
        })
        .unwrap();
        assert_eq!(headers.get(AUTHORIZATION).unwrap(), "Bearer t0k3n");
    }

    #[test]
    fn test_api_key_uses_named_header() {
        let headers = auth_headers(&AuthConfig::ApiKey {
            header_name: "X-Api-Key".to_string(),
            key: "secret".to_string(),
        })
        .unwrap();
        assert_eq!(headers.get("x-api-key").unwrap(), "secret");
    }

    #[test]
    fn test_invalid_custom_header_name_rejected() {
        let result = auth_headers(&AuthConfig::Custom {
            header_name: "bad header".to_string(),
            value: "v".to_string(),
        });
        assert!(matches!(result, Err(DownloadError::InvalidOptions { .. })));
    }

    #[test]
    fn test_create_client_with_proxy_and_auth() {
        let options = options()
            .with_proxy(ProxyConfig {
                host: "127.0.0.1".to_string(),
                port: 3128,
                username: Some("proxyuser".to_string()),
                password: Some("proxypass".to_string()),
            })
            .with_auth(AuthConfig::Bearer {
                token: "abc".to_string(),
            });
        assert!(HttpClientFactory::new().create_client(&options).is_ok());
    }
}
